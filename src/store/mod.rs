//! Persistence hand-off

pub mod stats;

pub use stats::{MatchResult, StatsClient};
