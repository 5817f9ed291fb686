//! Odds markets: parsing, normalization, line selection and aggregation.

pub mod features;
pub mod market;
pub mod normalize;
pub mod parse;
pub mod select;
pub mod stats;

pub use features::{build_features, FixtureFeatures};
pub use market::{BookmakerMarket, FixtureMarkets, MarketKind, MatchWinner};
pub use normalize::{filter_bookmakers, normalize_payload};
pub use parse::parse_odd;
pub use select::{choose_balanced_line, SelectedLine};
pub use stats::{bookmaker_stats_1x2, CrossBookmakerStats, OddsStats};
