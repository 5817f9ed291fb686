//! Match statistics normalizer for API-Football `/fixtures/statistics`.
//!
//! The endpoint returns one entry per team, home first, each holding a list
//! of `{type, value}` pairs whose names and value formats drift between
//! competitions. Values may be numbers, numeric strings or percentages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::odds::parse::parse_percent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamStats {
    pub shots_total: Option<f64>,
    pub shots_on_goal: Option<f64>,
    pub shots_off_goal: Option<f64>,
    pub blocked_shots: Option<f64>,
    pub shots_insidebox: Option<f64>,
    pub shots_outsidebox: Option<f64>,
    pub big_chances: Option<f64>,
    pub penalties: Option<f64>,
    pub possession_pct: Option<f64>,
    pub red_cards: Option<f64>,
}

impl TeamStats {
    pub fn is_empty(&self) -> bool {
        *self == TeamStats::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchStats {
    pub home: TeamStats,
    pub away: TeamStats,
}

impl MatchStats {
    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.away.is_empty()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatEntry {
    statistics: Vec<StatItem>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Value,
}

fn team_stats(items: &[StatItem]) -> TeamStats {
    let by_name: HashMap<String, &Value> = items
        .iter()
        .filter_map(|it| Some((it.kind.as_deref()?.trim().to_lowercase(), &it.value)))
        .collect();
    let num = |names: &[&str]| {
        names
            .iter()
            .filter_map(|n| by_name.get(*n))
            .find_map(|v| parse_percent(v))
    };

    let mut st = TeamStats {
        shots_total: num(&["total shots", "shots total"]),
        shots_on_goal: num(&["shots on goal", "shots on target"]),
        shots_off_goal: num(&["shots off goal"]),
        blocked_shots: num(&["blocked shots"]),
        shots_insidebox: num(&["shots insidebox", "shots inside box"]),
        shots_outsidebox: num(&["shots outsidebox", "shots outside box"]),
        big_chances: num(&["big chances"]),
        penalties: num(&["penalties", "penalty"]),
        possession_pct: num(&["ball possession", "possession"]),
        red_cards: num(&["red cards", "red card"]),
    };
    if st.shots_off_goal.is_none() {
        if let Some(total) = st.shots_total {
            let est = total - st.shots_on_goal.unwrap_or(0.0) - st.blocked_shots.unwrap_or(0.0);
            st.shots_off_goal = Some(est.max(0.0));
        }
    }
    st
}

/// Normalize the statistics response (the `response` array) for one fixture.
/// Entries beyond the first two are ignored; unreadable entries give empty stats.
pub fn normalize_stats(response: &Value) -> MatchStats {
    let entries: Vec<StatEntry> = response
        .as_array()
        .map(|a| {
            a.iter()
                .take(2)
                .map(|e| StatEntry::deserialize(e).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();

    let mut out = MatchStats::default();
    if let Some(home) = entries.first() {
        out.home = team_stats(&home.statistics);
    }
    if let Some(away) = entries.get(1) {
        out.away = team_stats(&away.statistics);
    }
    out
}
