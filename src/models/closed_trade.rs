//! Record of a position closed by the monitor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Position, PositionSide};

/// Outcome of a confirmed close, computed from the snapshot taken right
/// before the close order was submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,

    pub side: PositionSide,

    /// Contracts closed
    pub amount: Decimal,

    pub entry_price: Decimal,

    /// Mark price of the pre-close snapshot
    pub exit_price: Decimal,

    /// Realized profit as a percentage of entry price
    pub profit_pct: Decimal,

    /// Realized profit in quote currency (USDT)
    pub profit_amount: Decimal,

    /// Rule that triggered the close
    #[serde(default)]
    pub reason: String,

    /// Exchange order IDs acknowledging the close
    #[serde(default)]
    pub order_ids: Vec<String>,

    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    /// Build the record from a pre-close snapshot and its realized profit.
    pub fn from_snapshot(
        position: &Position,
        profit_pct: Decimal,
        profit_amount: Decimal,
        reason: impl Into<String>,
        order_ids: Vec<String>,
    ) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side,
            amount: position.contracts,
            entry_price: position.entry_price,
            exit_price: position.mark_price,
            profit_pct,
            profit_amount,
            reason: reason.into(),
            order_ids,
            closed_at: Utc::now(),
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.profit_pct > Decimal::ZERO
    }

    pub fn is_loss(&self) -> bool {
        self.profit_pct < Decimal::ZERO
    }
}
