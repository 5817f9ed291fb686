//! Canonical per-bookmaker market records.
//!
//! Odds are kept as the strings the feed sent; numeric interpretation happens
//! in [`super::parse`]. The serialized shape matches the `odds_full_*.json`
//! snapshots: `{"1x2": {home, draw, away}, "ou": {line: {Over, Under}},
//! "hcp": {line: {Home, Away}}}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::parse::parse_odd;

/// Markets the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    #[serde(rename = "1x2")]
    MatchWinner,
    #[serde(rename = "ou")]
    OverUnder,
    #[serde(rename = "hcp")]
    Handicap,
}

/// API-Football bet ids used when a bet carries no name.
const BET_MATCH_WINNER: i64 = 1;
const BET_OVER_UNDER: i64 = 2;
const BET_HANDICAP: i64 = 5;

const PARTIAL_MARKET_TOKENS: [&str; 8] = [
    "first half",
    "second half",
    "1st half",
    "2nd half",
    "half time",
    "halftime",
    "corner",
    "card",
];

impl MarketKind {
    pub fn key(self) -> &'static str {
        match self {
            MarketKind::MatchWinner => "1x2",
            MarketKind::OverUnder => "ou",
            MarketKind::Handicap => "hcp",
        }
    }

    /// Classify a declared market name. Partial-match markets (halves,
    /// corners, cards) are not the full-time markets and are rejected.
    pub fn from_name(name: &str) -> Option<Self> {
        let n = name.trim().to_lowercase();
        if n.is_empty() || PARTIAL_MARKET_TOKENS.iter().any(|t| n.contains(t)) {
            return None;
        }
        match n.as_str() {
            "match winner" | "1x2" | "fulltime result" | "full time result" | "home/draw/away" => {
                return Some(MarketKind::MatchWinner)
            }
            "handicap" => return Some(MarketKind::Handicap),
            _ => {}
        }
        if n.contains("over/under") || n.contains("total goals") {
            Some(MarketKind::OverUnder)
        } else if n.contains("asian handicap") {
            Some(MarketKind::Handicap)
        } else {
            None
        }
    }

    /// Classify an API-Football bet. The name wins; the id is only consulted
    /// when no name was sent.
    pub fn classify_bet(id: Option<i64>, name: Option<&str>) -> Option<Self> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => Self::from_name(n),
            None => match id? {
                BET_MATCH_WINNER => Some(MarketKind::MatchWinner),
                BET_OVER_UNDER => Some(MarketKind::OverUnder),
                BET_HANDICAP => Some(MarketKind::Handicap),
                _ => None,
            },
        }
    }

    /// The Odds API market keys (`h2h`, `totals`, `spreads`), full game only.
    pub fn from_odds_api_key(key: &str) -> Option<Self> {
        match key {
            "h2h" => Some(MarketKind::MatchWinner),
            "totals" => Some(MarketKind::OverUnder),
            "spreads" => Some(MarketKind::Handicap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuSide {
    Over,
    Under,
}

impl OuSide {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "over" => Some(OuSide::Over),
            "under" => Some(OuSide::Under),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HcpSide {
    Home,
    Away,
}

impl HcpSide {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "home" => Some(HcpSide::Home),
            "away" => Some(HcpSide::Away),
            _ => None,
        }
    }
}

/// 1x2 selection names, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Home,
    Draw,
    Away,
}

impl Selection {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "home" | "1" | "1 (home)" => Some(Selection::Home),
            "draw" | "x" => Some(Selection::Draw),
            "away" | "2" | "2 (away)" => Some(Selection::Away),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Selection::Home => "home",
            Selection::Draw => "draw",
            Selection::Away => "away",
        }
    }
}

/// Accepts a string, a number or null; empty strings count as absent.
fn odd_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Match winner quotes of one bookmaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchWinner {
    #[serde(default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub draw: Option<String>,
    #[serde(default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub away: Option<String>,
}

impl MatchWinner {
    pub fn is_empty(&self) -> bool {
        self.home.is_none() && self.draw.is_none() && self.away.is_none()
    }

    pub fn get(&self, sel: Selection) -> Option<&str> {
        match sel {
            Selection::Home => self.home.as_deref(),
            Selection::Draw => self.draw.as_deref(),
            Selection::Away => self.away.as_deref(),
        }
    }

    pub fn set(&mut self, sel: Selection, odd: String) {
        match sel {
            Selection::Home => self.home = Some(odd),
            Selection::Draw => self.draw = Some(odd),
            Selection::Away => self.away = Some(odd),
        }
    }

    /// Set only the sides present in `other`.
    pub fn merge(&mut self, other: MatchWinner) {
        if other.home.is_some() {
            self.home = other.home;
        }
        if other.draw.is_some() {
            self.draw = other.draw;
        }
        if other.away.is_some() {
            self.away = other.away;
        }
    }
}

/// A market with two opposing prices per line.
pub trait TwoSided {
    /// Parsed decimal prices of the two sides, in market order
    /// (over/under, home/away).
    fn prices(&self) -> (Option<f64>, Option<f64>);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverUnderQuote {
    #[serde(rename = "Over", default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub over: Option<String>,
    #[serde(rename = "Under", default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub under: Option<String>,
}

impl OverUnderQuote {
    pub fn set(&mut self, side: OuSide, odd: String) {
        match side {
            OuSide::Over => self.over = Some(odd),
            OuSide::Under => self.under = Some(odd),
        }
    }
}

impl TwoSided for OverUnderQuote {
    fn prices(&self) -> (Option<f64>, Option<f64>) {
        (
            self.over.as_deref().and_then(parse_odd),
            self.under.as_deref().and_then(parse_odd),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandicapQuote {
    #[serde(rename = "Home", default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(rename = "Away", default, deserialize_with = "odd_string", skip_serializing_if = "Option::is_none")]
    pub away: Option<String>,
}

impl HandicapQuote {
    pub fn set(&mut self, side: HcpSide, odd: String) {
        match side {
            HcpSide::Home => self.home = Some(odd),
            HcpSide::Away => self.away = Some(odd),
        }
    }
}

impl TwoSided for HandicapQuote {
    fn prices(&self) -> (Option<f64>, Option<f64>) {
        (
            self.home.as_deref().and_then(parse_odd),
            self.away.as_deref().and_then(parse_odd),
        )
    }
}

/// Averaged prices across bookmakers for one line.
///
/// Each side is averaged on its own, so `first` and `second` may come from
/// different bookmakers. The line only counts as priced when at least one
/// bookmaker quotes both sides (`two_sided > 0`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConsensusQuote {
    pub first: Option<f64>,
    pub second: Option<f64>,
    /// Bookmakers with a parseable price on both sides of this line.
    pub two_sided: usize,
}

impl TwoSided for ConsensusQuote {
    fn prices(&self) -> (Option<f64>, Option<f64>) {
        if self.two_sided == 0 {
            return (None, None);
        }
        (self.first, self.second)
    }
}

/// Everything one bookmaker quotes for one fixture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookmakerMarket {
    #[serde(rename = "1x2", default)]
    pub match_winner: MatchWinner,
    #[serde(default)]
    pub ou: BTreeMap<String, OverUnderQuote>,
    #[serde(default)]
    pub hcp: BTreeMap<String, HandicapQuote>,
}

impl BookmakerMarket {
    pub fn is_empty(&self) -> bool {
        self.match_winner.is_empty() && self.ou.is_empty() && self.hcp.is_empty()
    }
}

/// Bookmaker id -> markets.
pub type FixtureMarkets = BTreeMap<String, BookmakerMarket>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_by_name_aliases() {
        assert_eq!(MarketKind::from_name("Match Winner"), Some(MarketKind::MatchWinner));
        assert_eq!(MarketKind::from_name("Goals Over/Under"), Some(MarketKind::OverUnder));
        assert_eq!(MarketKind::from_name("Total Goals"), Some(MarketKind::OverUnder));
        assert_eq!(MarketKind::from_name("Asian Handicap"), Some(MarketKind::Handicap));
        assert_eq!(MarketKind::from_name("Goals Over/Under First Half"), None);
        assert_eq!(MarketKind::from_name("Corners Over Under"), None);
        assert_eq!(MarketKind::from_name("Both Teams Score"), None);
    }

    #[test]
    fn classify_bet_prefers_name_over_id() {
        assert_eq!(MarketKind::classify_bet(Some(1), Some("Both Teams Score")), None);
        assert_eq!(MarketKind::classify_bet(Some(5), None), Some(MarketKind::Handicap));
        assert_eq!(MarketKind::classify_bet(Some(99), Some("")), None);
    }

    #[test]
    fn selection_tokens() {
        assert_eq!(Selection::parse("HOME"), Some(Selection::Home));
        assert_eq!(Selection::parse("x"), Some(Selection::Draw));
        assert_eq!(Selection::parse("2 (Away)"), Some(Selection::Away));
        assert_eq!(Selection::parse("Home/Draw"), None);
    }

    #[test]
    fn snapshot_shape_round_trips_and_tolerates_blanks() {
        let raw = json!({
            "1x2": {"home": "2.10", "draw": "", "away": 3.4},
            "ou": {"2.5": {"Over": "1.90", "Under": ""}},
            "hcp": {}
        });
        let bm: BookmakerMarket = serde_json::from_value(raw).unwrap();
        assert_eq!(bm.match_winner.draw, None);
        assert_eq!(bm.match_winner.away.as_deref(), Some("3.4"));
        assert_eq!(bm.ou["2.5"].under, None);

        let back = serde_json::to_value(&bm).unwrap();
        assert_eq!(back["1x2"], json!({"home": "2.10", "away": "3.4"}));
        assert_eq!(back["ou"]["2.5"], json!({"Over": "1.90"}));
    }

    #[test]
    fn quote_prices_parse_lazily() {
        let q = OverUnderQuote { over: Some("1.90".into()), under: Some("bad".into()) };
        assert_eq!(q.prices(), (Some(1.9), None));
    }
}
