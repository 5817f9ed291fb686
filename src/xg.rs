//! Expected-goals estimates from match statistics.
//!
//! Weightings differ between sources and none is authoritative, so the
//! estimate is a pluggable [`XgModel`]; callers pick one at run time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stats::{MatchStats, TeamStats};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XgPair {
    pub home: f64,
    pub away: f64,
}

pub trait XgModel: Send + Sync {
    /// Tag stored next to the estimate.
    fn method(&self) -> &'static str;

    /// `None` when the statistics carry nothing to estimate from.
    fn estimate(&self, stats: &MatchStats) -> Option<XgPair>;
}

/// Per-event weights of [`ShotWeighted`].
#[derive(Debug, Clone, PartialEq)]
pub struct XgWeights {
    pub on_goal: f64,
    pub blocked: f64,
    pub off_goal: f64,
    pub big_chance: f64,
    /// Applied to inside-box shots beyond those on target.
    pub inside_box_surplus: f64,
    pub penalty: f64,
    /// Multiplier slope per possession point above 50%.
    pub possession_slope: f64,
    /// Multiplier bonus per extra red card of the opponent.
    pub red_card_bonus: f64,
}

impl Default for XgWeights {
    fn default() -> Self {
        Self {
            on_goal: 0.13,
            blocked: 0.06,
            off_goal: 0.03,
            big_chance: 0.18,
            inside_box_surplus: 0.05,
            penalty: 0.76,
            possession_slope: 0.003,
            red_card_bonus: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShotWeighted {
    pub weights: XgWeights,
}

impl ShotWeighted {
    fn team(&self, me: &TeamStats, opp: &TeamStats) -> f64 {
        let w = &self.weights;
        let v = |x: Option<f64>| x.unwrap_or(0.0);

        let total = v(me.shots_total);
        let on_goal = v(me.shots_on_goal);
        let blocked = v(me.blocked_shots);
        let mut off_goal = v(me.shots_off_goal);
        if off_goal == 0.0 && total > 0.0 {
            off_goal = (total - on_goal - blocked).max(0.0);
        }
        let inside_surplus = (v(me.shots_insidebox) - on_goal).max(0.0);

        let base = w.on_goal * on_goal
            + w.blocked * blocked
            + w.off_goal * off_goal
            + w.big_chance * v(me.big_chances)
            + w.inside_box_surplus * inside_surplus
            + w.penalty * v(me.penalties);

        let possession = me.possession_pct.unwrap_or(50.0);
        let pos_mult = 1.0 + w.possession_slope * (possession - 50.0);
        let red_adv = (v(opp.red_cards) - v(me.red_cards)).max(0.0);
        let rc_mult = 1.0 + w.red_card_bonus * red_adv;

        round3((base * pos_mult * rc_mult).max(0.0))
    }
}

impl XgModel for ShotWeighted {
    fn method(&self) -> &'static str {
        "heuristic"
    }

    fn estimate(&self, stats: &MatchStats) -> Option<XgPair> {
        if stats.is_empty() {
            return None;
        }
        Some(XgPair {
            home: self.team(&stats.home, &stats.away),
            away: self.team(&stats.away, &stats.home),
        })
    }
}

/// `0.10 * on target + 0.04 * off target`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShotsOnTarget;

impl ShotsOnTarget {
    fn team(st: &TeamStats) -> f64 {
        let shots = st.shots_total.unwrap_or(0.0);
        let sot = st.shots_on_goal.unwrap_or(0.0);
        round3(0.10 * sot + 0.04 * (shots - sot).max(0.0))
    }
}

impl XgModel for ShotsOnTarget {
    fn method(&self) -> &'static str {
        "heuristic_sot"
    }

    fn estimate(&self, stats: &MatchStats) -> Option<XgPair> {
        if stats.is_empty() {
            return None;
        }
        Some(XgPair {
            home: Self::team(&stats.home),
            away: Self::team(&stats.away),
        })
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Model choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XgModelKind {
    #[default]
    ShotWeighted,
    ShotsOnTarget,
    None,
}

impl XgModelKind {
    pub fn build(self) -> Option<Box<dyn XgModel>> {
        match self {
            XgModelKind::ShotWeighted => Some(Box::new(ShotWeighted::default())),
            XgModelKind::ShotsOnTarget => Some(Box::new(ShotsOnTarget)),
            XgModelKind::None => None,
        }
    }
}

impl FromStr for XgModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shot-weighted" | "shots" | "heuristic" => Ok(XgModelKind::ShotWeighted),
            "sot" | "shots-on-target" => Ok(XgModelKind::ShotsOnTarget),
            "none" | "off" => Ok(XgModelKind::None),
            other => Err(format!("unknown xG model '{}'", other)),
        }
    }
}

impl fmt::Display for XgModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            XgModelKind::ShotWeighted => "shot-weighted",
            XgModelKind::ShotsOnTarget => "sot",
            XgModelKind::None => "none",
        })
    }
}
