//! Market Normalizer: raw bookmaker payloads into [`FixtureMarkets`].
//!
//! Two feed shapes are understood and may be mixed in one payload:
//!
//! * API-Football `/odds`: `response[].bookmakers[].bets[].values[{value, odd}]`
//! * The Odds API events: `bookmakers[].markets[{key, outcomes[{name, price, point}]}]`
//!
//! Missing arrays count as empty, malformed bookmakers or bets are skipped
//! one at a time, and unrecognised markets are ignored.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::market::{
    BookmakerMarket, FixtureMarkets, HcpSide, MarketKind, MatchWinner, OuSide, Selection,
};
use super::parse::{format_line, format_odd, parse_hcp_value, parse_ou_value};

// --- API-Football ---------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AfBookmaker {
    id: Value,
    name: Option<String>,
    bets: Vec<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AfBet {
    id: Option<i64>,
    name: Option<String>,
    values: Vec<AfValue>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AfValue {
    value: Value,
    odd: Value,
}

// --- The Odds API ---------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OddsApiBookmaker {
    key: String,
    markets: Vec<OddsApiMarket>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OddsApiMarket {
    key: String,
    outcomes: Vec<OddsApiOutcome>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OddsApiOutcome {
    name: String,
    price: Option<f64>,
    point: Option<f64>,
}

/// Normalize any supported payload: a full API response object, a list of
/// entries, or a single entry/event.
pub fn normalize_payload(payload: &Value) -> FixtureMarkets {
    let mut out = FixtureMarkets::new();
    for entry in entries(payload) {
        normalize_entry(entry, &mut out);
    }
    out.retain(|_, m| !m.is_empty());
    out
}

fn entries(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("response") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(_) => Vec::new(),
            None => vec![payload],
        },
        _ => Vec::new(),
    }
}

fn normalize_entry(entry: &Value, out: &mut FixtureMarkets) {
    let Some(bookmakers) = entry.get("bookmakers").and_then(Value::as_array) else {
        return;
    };
    let home_team = entry.get("home_team").and_then(Value::as_str).unwrap_or_default();
    let away_team = entry.get("away_team").and_then(Value::as_str).unwrap_or_default();

    for raw in bookmakers {
        if raw.get("markets").is_some() {
            match OddsApiBookmaker::deserialize(raw) {
                Ok(bm) => merge_odds_api_bookmaker(&bm, home_team, away_team, out),
                Err(e) => debug!("Skipping malformed bookmaker: {}", e),
            }
        } else {
            match AfBookmaker::deserialize(raw) {
                Ok(bm) => merge_af_bookmaker(&bm, out),
                Err(e) => debug!("Skipping malformed bookmaker: {}", e),
            }
        }
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn merge_af_bookmaker(bm: &AfBookmaker, out: &mut FixtureMarkets) {
    let Some(bm_id) = scalar_string(&bm.id) else {
        debug!("Skipping bookmaker without id ({:?})", bm.name);
        return;
    };
    let node = out.entry(bm_id).or_default();

    for raw_bet in &bm.bets {
        let Ok(bet) = AfBet::deserialize(raw_bet) else {
            continue;
        };
        match MarketKind::classify_bet(bet.id, bet.name.as_deref()) {
            Some(MarketKind::MatchWinner) => {
                let mut rec = MatchWinner::default();
                for v in &bet.values {
                    let (Some(token), Some(odd)) = (scalar_string(&v.value), scalar_string(&v.odd)) else {
                        continue;
                    };
                    if let Some(sel) = Selection::parse(&token) {
                        rec.set(sel, odd);
                    }
                }
                node.match_winner.merge(rec);
            }
            Some(MarketKind::OverUnder) => {
                for v in &bet.values {
                    let (Some(label), Some(odd)) = (scalar_string(&v.value), scalar_string(&v.odd)) else {
                        continue;
                    };
                    if let Some((side, line)) = parse_ou_value(&label) {
                        node.ou.entry(line).or_default().set(side, odd);
                    }
                }
            }
            Some(MarketKind::Handicap) => {
                for v in &bet.values {
                    let Some(label) = scalar_string(&v.value) else {
                        continue;
                    };
                    let Some((side, line)) = parse_hcp_value(&label) else {
                        continue;
                    };
                    let quote = node.hcp.entry(line).or_default();
                    if let (Some(side), Some(odd)) = (side, scalar_string(&v.odd)) {
                        quote.set(side, odd);
                    }
                }
            }
            None => {}
        }
    }
}

fn merge_odds_api_bookmaker(bm: &OddsApiBookmaker, home_team: &str, away_team: &str, out: &mut FixtureMarkets) {
    if bm.key.trim().is_empty() {
        return;
    }
    let node: &mut BookmakerMarket = out.entry(bm.key.trim().to_string()).or_default();

    for market in &bm.markets {
        let Some(kind) = MarketKind::from_odds_api_key(&market.key) else {
            continue;
        };
        for outcome in &market.outcomes {
            let Some(price) = outcome.price.filter(|p| p.is_finite() && *p > 0.0) else {
                continue;
            };
            let odd = format_odd(price);
            match kind {
                MarketKind::MatchWinner => {
                    let sel = if outcome.name == home_team {
                        Some(Selection::Home)
                    } else if outcome.name == away_team {
                        Some(Selection::Away)
                    } else {
                        Selection::parse(&outcome.name)
                    };
                    if let Some(sel) = sel {
                        node.match_winner.set(sel, odd);
                    }
                }
                MarketKind::OverUnder => {
                    if let (Some(side), Some(point)) = (OuSide::parse(&outcome.name), outcome.point) {
                        node.ou.entry(format_line(point)).or_default().set(side, odd);
                    }
                }
                MarketKind::Handicap => {
                    // Lines are keyed from the home side's perspective.
                    let Some(point) = outcome.point else { continue };
                    if outcome.name == home_team {
                        node.hcp.entry(format_line(point)).or_default().set(HcpSide::Home, odd);
                    } else if outcome.name == away_team {
                        node.hcp.entry(format_line(-point)).or_default().set(HcpSide::Away, odd);
                    }
                }
            }
        }
    }
}

/// Keep only the listed bookmaker ids; an empty filter keeps everything.
pub fn filter_bookmakers(markets: FixtureMarkets, only: &[String]) -> FixtureMarkets {
    if only.is_empty() {
        return markets;
    }
    markets
        .into_iter()
        .filter(|(id, _)| only.iter().any(|o| o == id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn af_payload() -> Value {
        json!({
            "response": [{
                "fixture": {"id": 1035037},
                "bookmakers": [{
                    "id": 6,
                    "name": "Bwin",
                    "bets": [
                        {"id": 1, "name": "Match Winner", "values": [
                            {"value": "Home", "odd": "2.10"},
                            {"value": "Draw", "odd": "3.40"},
                            {"value": "Away", "odd": "3.60"},
                            {"value": "Home/Draw", "odd": "1.30"}
                        ]},
                        {"id": 5, "name": "Goals Over/Under", "values": [
                            {"value": "Over 2.5", "odd": "1.90"},
                            {"value": "Under 2.5", "odd": "1.95"},
                            {"value": "Over 3.0", "odd": "2.40"},
                            {"value": "garbage", "odd": "9.00"}
                        ]},
                        {"id": 4, "name": "Asian Handicap", "values": [
                            {"value": "Home -0.25", "odd": "1.88"},
                            {"value": "Away -0.25", "odd": "2.02"},
                            {"value": "0", "odd": "1.99"}
                        ]},
                        {"id": 6, "name": "Goals Over/Under First Half", "values": [
                            {"value": "Over 0.5", "odd": "1.30"}
                        ]},
                        {"id": 8, "name": "Both Teams Score", "values": [
                            {"value": "Yes", "odd": "1.70"}
                        ]}
                    ]
                }]
            }]
        })
    }

    #[test]
    fn api_football_markets_are_canonicalized() {
        let out = normalize_payload(&af_payload());
        let bm = &out["6"];
        assert_eq!(bm.match_winner.home.as_deref(), Some("2.10"));
        assert_eq!(bm.match_winner.draw.as_deref(), Some("3.40"));
        assert_eq!(bm.ou.len(), 2);
        assert_eq!(bm.ou["2.5"].under.as_deref(), Some("1.95"));
        assert_eq!(bm.ou["3.0"].under, None);
        assert!(!bm.ou.contains_key("0.5"));
        assert_eq!(bm.hcp["-0.25"].home.as_deref(), Some("1.88"));
        assert_eq!(bm.hcp["-0.25"].away.as_deref(), Some("2.02"));
        // bare line: recorded, side unknown
        assert_eq!(bm.hcp["0"].home, None);
        assert_eq!(bm.hcp["0"].away, None);
    }

    #[test]
    fn missing_arrays_and_bad_entries_are_tolerated() {
        assert!(normalize_payload(&json!({})).is_empty());
        assert!(normalize_payload(&json!({"response": []})).is_empty());
        assert!(normalize_payload(&json!({"response": [{"bookmakers": null}]})).is_empty());
        let out = normalize_payload(&json!([{
            "bookmakers": [
                {"name": "no id", "bets": []},
                {"id": 8, "bets": [{"id": 1, "values": "oops"}, {"id": 1, "values": [{"value": "1", "odd": 1.5}]}]}
            ]
        }]));
        assert_eq!(out.len(), 1);
        assert_eq!(out["8"].match_winner.home.as_deref(), Some("1.5"));
    }

    #[test]
    fn the_odds_api_event_shape() {
        let event = json!({
            "id": "e1",
            "home_team": "Arsenal",
            "away_team": "Chelsea",
            "bookmakers": [{
                "key": "pinnacle",
                "markets": [
                    {"key": "h2h", "outcomes": [
                        {"name": "Arsenal", "price": 2.1},
                        {"name": "Chelsea", "price": 3.5},
                        {"name": "Draw", "price": 3.3}
                    ]},
                    {"key": "totals", "outcomes": [
                        {"name": "Over", "price": 1.91, "point": 2.5},
                        {"name": "Under", "price": 1.99, "point": 2.5}
                    ]},
                    {"key": "spreads", "outcomes": [
                        {"name": "Arsenal", "price": 1.95, "point": -0.5},
                        {"name": "Chelsea", "price": 1.95, "point": 0.5}
                    ]},
                    {"key": "h2h_h1", "outcomes": [{"name": "Arsenal", "price": 2.9}]}
                ]
            }]
        });
        let out = normalize_payload(&event);
        let bm = &out["pinnacle"];
        assert_eq!(bm.match_winner.home.as_deref(), Some("2.1"));
        assert_eq!(bm.match_winner.draw.as_deref(), Some("3.3"));
        assert_eq!(bm.ou["2.5"].over.as_deref(), Some("1.91"));
        assert_eq!(bm.hcp["-0.5"].home.as_deref(), Some("1.95"));
        assert_eq!(bm.hcp["-0.5"].away.as_deref(), Some("1.95"));
    }

    #[test]
    fn odds_api_bookmaker_without_key_is_skipped() {
        let event = json!({
            "home_team": "Arsenal",
            "away_team": "Chelsea",
            "bookmakers": [
                {"key": " ", "markets": [{"key": "h2h", "outcomes": [{"name": "Arsenal", "price": 2.0}]}]},
                {"key": "bet365", "markets": [{"key": "h2h", "outcomes": [{"name": "Chelsea", "price": -1.0}]}]}
            ]
        });
        assert!(normalize_payload(&event).is_empty());
    }

    #[test]
    fn same_bookmaker_across_entries_merges() {
        let payload = json!([
            {"bookmakers": [{"id": 6, "bets": [{"name": "Match Winner", "values": [{"value": "Home", "odd": "2.0"}]}]}]},
            {"bookmakers": [{"id": 6, "bets": [{"name": "Match Winner", "values": [{"value": "Away", "odd": "3.0"}]}]}]}
        ]);
        let out = normalize_payload(&payload);
        assert_eq!(out["6"].match_winner.home.as_deref(), Some("2.0"));
        assert_eq!(out["6"].match_winner.away.as_deref(), Some("3.0"));
    }

    #[test]
    fn bookmaker_filter() {
        let out = normalize_payload(&af_payload());
        assert_eq!(filter_bookmakers(out.clone(), &[]).len(), 1);
        assert!(filter_bookmakers(out, &["8".to_string()]).is_empty());
    }
}
