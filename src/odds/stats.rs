//! Cross-bookmaker aggregation of match winner prices.

use serde::Serialize;

use super::market::{MatchWinner, Selection};
use super::parse::{implied_probability, parse_odd};

/// Summary of one selection's prices across bookmakers. Every field except
/// `count` is `None` when no bookmaker priced the selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OddsStats {
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: usize,
    pub spread: Option<f64>,
}

impl OddsStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            mean: Some(mean),
            stdev: Some(var.sqrt()),
            min: Some(min),
            max: Some(max),
            count: samples.len(),
            spread: Some(max - min),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpliedProbabilities {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossBookmakerStats {
    pub home: OddsStats,
    pub draw: OddsStats,
    pub away: OddsStats,
    /// Mean of `1/odd` per selection.
    pub implied: ImpliedProbabilities,
    pub overround: Option<f64>,
    /// Shannon entropy (bits) of the normalized implied distribution.
    pub entropy: Option<f64>,
}

/// Aggregate 1x2 quotes of several bookmakers.
///
/// Sides nobody priced are excluded from the overround and entropy rather
/// than counted as zero.
pub fn bookmaker_stats_1x2<'a, I>(quotes: I) -> CrossBookmakerStats
where
    I: IntoIterator<Item = &'a MatchWinner>,
{
    let mut odds: [Vec<f64>; 3] = Default::default();
    for q in quotes {
        for (i, sel) in [Selection::Home, Selection::Draw, Selection::Away].into_iter().enumerate() {
            if let Some(v) = q.get(sel).and_then(parse_odd) {
                odds[i].push(v);
            }
        }
    }

    let mean_implied = |samples: &[f64]| -> Option<f64> {
        let probs: Vec<f64> = samples.iter().filter_map(|o| implied_probability(*o)).collect();
        (!probs.is_empty()).then(|| probs.iter().sum::<f64>() / probs.len() as f64)
    };
    let implied = ImpliedProbabilities {
        home: mean_implied(&odds[0]),
        draw: mean_implied(&odds[1]),
        away: mean_implied(&odds[2]),
    };

    let present: Vec<f64> = [implied.home, implied.draw, implied.away]
        .into_iter()
        .flatten()
        .collect();
    let overround = (!present.is_empty()).then(|| present.iter().sum::<f64>());

    CrossBookmakerStats {
        home: OddsStats::from_samples(&odds[0]),
        draw: OddsStats::from_samples(&odds[1]),
        away: OddsStats::from_samples(&odds[2]),
        implied,
        overround,
        entropy: entropy_bits(&present),
    }
}

/// Entropy of `weights` after normalizing them to sum to 1; `None` when the
/// sum is not positive.
pub fn entropy_bits(weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return None;
    }
    Some(
        weights
            .iter()
            .map(|w| w / total)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.log2())
            .sum(),
    )
}
