//! Per-fixture odds feature record.
//!
//! Prices of all bookmakers are averaged per line into a consensus market,
//! the balanced line is picked from that consensus, and the 1x2 quotes are
//! summarized across bookmakers.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::market::{ConsensusQuote, FixtureMarkets, MarketKind, TwoSided};
use super::parse::line_value;
use super::select::{SelectedLine, HCP_ANCHOR, OU_ANCHOR};
use super::stats::{bookmaker_stats_1x2, CrossBookmakerStats};

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureFeatures {
    pub ou: SelectedLine,
    pub hcp: SelectedLine,
    /// Every over/under line seen, ascending.
    pub ou_all: Vec<String>,
    pub hcp_all: Vec<String>,
    pub bookmakers: usize,
    pub x12: CrossBookmakerStats,
}

#[derive(Default)]
struct LineSums {
    sides: [(f64, usize); 2],
    two_sided: usize,
}

/// Average each side's parseable prices per line over all bookmakers.
///
/// A line that no single bookmaker prices on both sides keeps its averages
/// but is not quotable (see [`ConsensusQuote`]).
pub fn consensus<'a, Q, I>(markets: I) -> BTreeMap<String, ConsensusQuote>
where
    Q: TwoSided + 'a,
    I: IntoIterator<Item = &'a BTreeMap<String, Q>>,
{
    let mut sums: BTreeMap<String, LineSums> = BTreeMap::new();
    for lines in markets {
        for (line, q) in lines {
            let acc = sums.entry(line.clone()).or_default();
            let (a, b) = q.prices();
            if a.is_some() && b.is_some() {
                acc.two_sided += 1;
            }
            for (slot, price) in acc.sides.iter_mut().zip([a, b]) {
                if let Some(p) = price {
                    slot.0 += p;
                    slot.1 += 1;
                }
            }
        }
    }
    let avg = |(sum, n): (f64, usize)| (n > 0).then(|| sum / n as f64);
    sums.into_iter()
        .map(|(line, LineSums { sides: [a, b], two_sided })| {
            (line, ConsensusQuote { first: avg(a), second: avg(b), two_sided })
        })
        .collect()
}

fn sorted_lines<Q>(lines: &BTreeMap<String, Q>) -> Vec<String> {
    let mut keys: Vec<&String> = lines.keys().collect();
    keys.sort_by(|a, b| match (line_value(a), line_value(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    keys.into_iter().cloned().collect()
}

pub fn build_features(bookmakers: &FixtureMarkets) -> FixtureFeatures {
    let ou = consensus(bookmakers.values().map(|b| &b.ou));
    let hcp = consensus(bookmakers.values().map(|b| &b.hcp));
    FixtureFeatures {
        ou: SelectedLine::select(&ou, OU_ANCHOR),
        hcp: SelectedLine::select(&hcp, HCP_ANCHOR),
        ou_all: sorted_lines(&ou),
        hcp_all: sorted_lines(&hcp),
        bookmakers: bookmakers.len(),
        x12: bookmaker_stats_1x2(bookmakers.values().map(|b| &b.match_winner)),
    }
}

impl FixtureFeatures {
    pub fn to_value(&self, updated_at: &str) -> Value {
        json!({
            "ou": self.ou.to_value(MarketKind::OverUnder),
            "hcp": self.hcp.to_value(MarketKind::Handicap),
            "ou_all": self.ou_all,
            "hcp_all": self.hcp_all,
            "bookmakers": self.bookmakers,
            "x12": serde_json::to_value(&self.x12).unwrap_or(Value::Null),
            "updated_at": updated_at,
        })
    }
}
