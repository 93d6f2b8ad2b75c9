//! Response types for the Bitget v2 mix (futures) REST API.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::models::{Position, PositionSide};

/// Success code returned in every Bitget envelope.
pub const SUCCESS_CODE: &str = "00000";

/// Standard Bitget response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// Position entry from `/api/v2/mix/position/all-position`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub symbol: String,
    pub hold_side: String,
    /// Total position size in contracts
    pub total: Decimal,
    pub open_price_avg: Decimal,
    pub mark_price: Decimal,
    #[serde(default)]
    pub margin_mode: String,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub leverage: Option<Decimal>,
}

impl PositionResponse {
    /// Convert to the domain snapshot. Entries with an unknown hold side
    /// (one-way `net` positions) are dropped.
    pub fn into_position(self) -> Option<Position> {
        let side = match PositionSide::parse(&self.hold_side) {
            Some(side) => side,
            None => {
                warn!(symbol = %self.symbol, hold_side = %self.hold_side, "Unknown hold side");
                return None;
            }
        };

        Some(Position {
            symbol: self.symbol,
            side,
            contracts: self.total,
            entry_price: self.open_price_avg,
            mark_price: self.mark_price,
            margin_mode: self.margin_mode,
            leverage: self.leverage,
        })
    }
}

/// Body for `/api/v2/mix/order/close-positions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionsRequest {
    pub symbol: String,
    pub hold_side: String,
    pub product_type: String,
}

/// Data of a close-positions response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionsData {
    #[serde(default)]
    pub success_list: Vec<CloseOrderItem>,
    #[serde(default)]
    pub failure_list: Vec<CloseOrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOrderItem {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub error_code: String,
}

/// Body for `/api/v2/mix/account/set-position-mode`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPositionModeRequest {
    pub product_type: String,
    pub pos_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionModeData {
    #[serde(default)]
    pub pos_mode: String,
}

/// Bitget sends numbers as strings and uses `""` for absent values.
fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Decimal::from_str(s.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected decimal, got {}",
            other
        ))),
    }
}
