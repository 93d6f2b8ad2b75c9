//! Trading logic: trailing-stop policy and per-position tracking.

mod config;
mod policy;
mod tracker;

pub use config::{normalize_symbol, TrailingStopConfig};
pub use policy::{
    profit_pct, CloseReason, PolicyError, PolicyInput, StopDecision, Tier, TrailingStopPolicy,
};
pub use tracker::{PositionTracker, TrackerEvent, Verdict};
