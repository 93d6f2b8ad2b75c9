//! Exchange gateway: the trait the monitor drives and its Bitget implementation.

mod bitget_client;
mod types;

pub use bitget_client::BitgetClient;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

use crate::models::{Position, PositionSide};

/// Account position mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    /// Long and short may be held on the same symbol
    Hedge,
    OneWay,
}

impl PositionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionMode::Hedge => "hedge_mode",
            PositionMode::OneWay => "one_way_mode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hedge_mode" => Some(PositionMode::Hedge),
            "one_way_mode" => Some(PositionMode::OneWay),
            _ => None,
        }
    }
}

impl fmt::Display for PositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange acknowledgement of a close-full-position request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseAck {
    /// True only when the exchange confirmed at least one close order
    pub success: bool,
    pub order_ids: Vec<String>,
    pub filled_amount: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    /// Rejection detail when `success` is false
    pub message: String,
}

impl CloseAck {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Operations the monitor needs from a futures exchange.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// All open positions on the account, including zero-size entries.
    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    /// Market-close the whole (symbol, side) position.
    async fn close_full_position(&self, symbol: &str, side: PositionSide) -> Result<CloseAck>;

    /// Switch the account position mode and return the mode the exchange reports.
    async fn set_hedge_mode(&self, enabled: bool) -> Result<PositionMode>;
}

#[async_trait]
impl<T: ExchangeGateway + ?Sized> ExchangeGateway for Arc<T> {
    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        (**self).fetch_positions().await
    }

    async fn close_full_position(&self, symbol: &str, side: PositionSide) -> Result<CloseAck> {
        (**self).close_full_position(symbol, side).await
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Result<PositionMode> {
        (**self).set_hedge_mode(enabled).await
    }
}
