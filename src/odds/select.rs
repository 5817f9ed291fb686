//! Balanced line selection.

use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::market::{MarketKind, TwoSided};
use super::parse::{implied_probability, line_value};

/// Anchor for over/under: the customary goals line.
pub const OU_ANCHOR: f64 = 2.5;
/// Anchor for handicap: pick'em.
pub const HCP_ANCHOR: f64 = 0.0;

/// Pick the line whose two sides are priced closest to even.
///
/// Candidates need a positive price on both sides. They are ranked by
/// `(|p_a - p_b|, |line - anchor|, line)`. With no complete candidate the
/// line nearest the anchor is returned instead (smallest line on ties), and
/// `None` only when no key parses as a number.
pub fn choose_balanced_line<'a, Q: TwoSided>(
    lines: &'a BTreeMap<String, Q>,
    anchor: f64,
) -> Option<(&'a str, &'a Q)> {
    let parsed: Vec<(&str, f64, &Q)> = lines
        .iter()
        .filter_map(|(k, q)| Some((k.as_str(), line_value(k)?, q)))
        .collect();

    let balanced = parsed
        .iter()
        .filter_map(|&(k, lv, q)| {
            let (a, b) = q.prices();
            let gap = (implied_probability(a?)? - implied_probability(b?)?).abs();
            Some(((gap, (lv - anchor).abs(), lv), k, q))
        })
        .min_by(|x, y| cmp_score(&x.0, &y.0));
    if let Some((_, k, q)) = balanced {
        return Some((k, q));
    }

    parsed
        .iter()
        .min_by(|x, y| {
            (x.1 - anchor)
                .abs()
                .total_cmp(&(y.1 - anchor).abs())
                .then(x.1.total_cmp(&y.1))
        })
        .map(|&(k, _, q)| (k, q))
}

fn cmp_score(a: &(f64, f64, f64), b: &(f64, f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then(a.1.total_cmp(&b.1))
        .then(a.2.total_cmp(&b.2))
}

/// One representative line of a market with its two prices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedLine {
    pub line: Option<String>,
    pub first: Option<f64>,
    pub second: Option<f64>,
}

impl SelectedLine {
    pub fn none() -> Self {
        Self::default()
    }

    /// Balanced line of `lines`, kept only when both sides are priced.
    pub fn select<Q: TwoSided>(lines: &BTreeMap<String, Q>, anchor: f64) -> Self {
        match choose_balanced_line(lines, anchor) {
            Some((line, q)) => match q.prices() {
                (Some(a), Some(b)) => Self {
                    line: Some(line.to_string()),
                    first: Some(a),
                    second: Some(b),
                },
                _ => Self::none(),
            },
            None => Self::none(),
        }
    }

    pub fn is_some(&self) -> bool {
        self.line.is_some()
    }

    /// Store record: `{line, over, under}` / `{line, home, away}`, or
    /// `{line: null}` when nothing was selected.
    pub fn to_value(&self, kind: MarketKind) -> Value {
        let Some(line) = &self.line else {
            return json!({ "line": Value::Null });
        };
        let (a, b) = match kind {
            MarketKind::OverUnder => ("over", "under"),
            _ => ("home", "away"),
        };
        json!({ "line": line, a: self.first, b: self.second })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::market::{ConsensusQuote, OverUnderQuote};

    fn ou(pairs: &[(&str, &str, &str)]) -> BTreeMap<String, OverUnderQuote> {
        pairs
            .iter()
            .map(|(l, o, u)| {
                let side = |s: &str| (!s.is_empty()).then(|| s.to_string());
                (l.to_string(), OverUnderQuote { over: side(o), under: side(u) })
            })
            .collect()
    }

    #[test]
    fn smaller_probability_gap_wins() {
        let lines = ou(&[("2.5", "1.90", "1.95"), ("3.0", "2.40", "1.55")]);
        let (line, _) = choose_balanced_line(&lines, OU_ANCHOR).unwrap();
        assert_eq!(line, "2.5");
    }

    #[test]
    fn empty_map_selects_nothing() {
        let lines: BTreeMap<String, OverUnderQuote> = BTreeMap::new();
        assert!(choose_balanced_line(&lines, OU_ANCHOR).is_none());
        assert_eq!(SelectedLine::select(&lines, OU_ANCHOR), SelectedLine::none());
    }

    #[test]
    fn equal_balance_prefers_line_near_anchor_then_smaller() {
        let lines = ou(&[("3.5", "1.90", "1.90"), ("2.0", "1.90", "1.90"), ("3.0", "1.90", "1.90")]);
        assert_eq!(choose_balanced_line(&lines, 2.5).unwrap().0, "2.0");

        let hcp: BTreeMap<String, ConsensusQuote> = [
            ("0.5".to_string(), ConsensusQuote { first: Some(2.0), second: Some(2.0), two_sided: 1 }),
            ("-0.5".to_string(), ConsensusQuote { first: Some(2.0), second: Some(2.0), two_sided: 1 }),
        ]
        .into_iter()
        .collect();
        assert_eq!(choose_balanced_line(&hcp, HCP_ANCHOR).unwrap().0, "-0.5");
    }

    #[test]
    fn incomplete_lines_fall_back_to_anchor_distance() {
        let lines = ou(&[("1.5", "1.30", ""), ("2.75", "", "1.80"), ("4.5", "x", "1.2")]);
        assert_eq!(choose_balanced_line(&lines, 2.5).unwrap().0, "2.75");
        // fallback line is not fully priced, so no selection is emitted
        assert_eq!(SelectedLine::select(&lines, 2.5).line, None);
    }

    #[test]
    fn unparseable_line_keys_are_ignored() {
        let lines = ou(&[("abc", "1.9", "1.9"), ("2.5", "1.5", "2.6")]);
        assert_eq!(choose_balanced_line(&lines, 2.5).unwrap().0, "2.5");
    }

    #[test]
    fn record_shapes() {
        let lines = ou(&[("2.5", "1.90", "1.95")]);
        let sel = SelectedLine::select(&lines, OU_ANCHOR);
        assert_eq!(
            sel.to_value(MarketKind::OverUnder),
            json!({"line": "2.5", "over": 1.9, "under": 1.95})
        );
        assert_eq!(SelectedLine::none().to_value(MarketKind::Handicap), json!({"line": null}));
    }
}
