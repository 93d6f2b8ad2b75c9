//! Position snapshot as reported by the exchange on each poll.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Wire name used by the exchange (`holdSide`).
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Identity of a tracked position. The account runs in hedge mode, so a
/// symbol can carry one long and one short at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub symbol: String,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.side)
    }
}

/// Open futures position. A snapshot: re-read every cycle, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Exchange symbol, e.g. `BTCUSDT`
    pub symbol: String,

    pub side: PositionSide,

    /// Open size in contracts (0 means flat)
    pub contracts: Decimal,

    /// Average entry price
    pub entry_price: Decimal,

    /// Current mark price
    pub mark_price: Decimal,

    /// Margin mode as reported by the exchange (`crossed`, `isolated`)
    #[serde(default)]
    pub margin_mode: String,

    /// Leverage reported by the exchange, informational only
    #[serde(default)]
    pub leverage: Option<Decimal>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }

    /// A position with no contracts is closed.
    pub fn is_flat(&self) -> bool {
        self.contracts.is_zero()
    }

    /// Unrealized profit in quote currency at the current mark price.
    /// `None` when the result does not fit in a `Decimal`.
    pub fn profit_amount(&self) -> Option<Decimal> {
        let diff = match self.side {
            PositionSide::Long => self.mark_price.checked_sub(self.entry_price)?,
            PositionSide::Short => self.entry_price.checked_sub(self.mark_price)?,
        };
        diff.checked_mul(self.contracts)
    }

    /// Notional value at the mark price.
    pub fn notional(&self) -> Decimal {
        self.contracts * self.mark_price
    }
}
