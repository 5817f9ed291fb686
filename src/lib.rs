//! Football fixture ingestion: odds and results from API-Football, normalized
//! and written to a hierarchical tree store in chunked, retried batches, plus
//! per-match expected-goals history from Understat.

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod files;
pub mod odds;
pub mod path;
pub mod pipeline;
pub mod results;
pub mod stats;
pub mod store;
pub mod understat;
pub mod update;
pub mod xg;
