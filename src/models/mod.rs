//! Data models for exchange positions and closed trades.

mod closed_trade;
mod position;

pub use closed_trade::ClosedTrade;
pub use position::{Position, PositionKey, PositionSide};
