//! Trailing-stop configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Thresholds and retracement parameters for the tiered trailing stop.
///
/// Profit thresholds and stop levels are percentages of entry price
/// (`2` means 2%). The two trailing retracements are fractions of the peak
/// profit (`0.5` gives back at most half of the peak).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Informational; the monitor never changes leverage
    pub leverage: Decimal,

    /// Hard stop-loss, compared against the negated current profit
    pub stop_loss_pct: Decimal,

    /// Absolute profit floor while in the LowProtect tier
    pub low_trail_stop_loss_pct: Decimal,

    /// Fraction of peak profit that may be given back in Tier1
    pub trail_stop_loss_pct: Decimal,

    /// Fraction of peak profit that may be given back in Tier2
    pub higher_trail_stop_loss_pct: Decimal,

    /// Peak profit that arms the LowProtect tier
    pub low_trail_profit_threshold: Decimal,

    /// Peak profit that arms Tier1
    pub first_trail_profit_threshold: Decimal,

    /// Peak profit that arms Tier2
    pub second_trail_profit_threshold: Decimal,

    /// Symbols that are tracked but never closed
    #[serde(default)]
    pub blacklist: HashSet<String>,

    /// Evaluate stops on the cycle a position is first seen
    #[serde(default)]
    pub evaluate_on_first_sight: bool,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            leverage: dec!(10),
            stop_loss_pct: dec!(3),
            low_trail_stop_loss_pct: dec!(0.3),
            trail_stop_loss_pct: dec!(0.5),
            higher_trail_stop_loss_pct: dec!(0.3),
            low_trail_profit_threshold: dec!(2),
            first_trail_profit_threshold: dec!(5),
            second_trail_profit_threshold: dec!(10),
            blacklist: HashSet::new(),
            evaluate_on_first_sight: false,
        }
    }
}

impl TrailingStopConfig {
    /// Check the parameter relationships the policy relies on.
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.leverage <= Decimal::ZERO {
            return Err(format!("leverage must be positive, got {}", self.leverage));
        }
        if self.stop_loss_pct <= Decimal::ZERO {
            return Err(format!(
                "stop_loss_pct must be positive, got {}",
                self.stop_loss_pct
            ));
        }
        if self.low_trail_profit_threshold <= Decimal::ZERO {
            return Err(format!(
                "low_trail_profit_threshold must be positive, got {}",
                self.low_trail_profit_threshold
            ));
        }
        if !(self.low_trail_profit_threshold < self.first_trail_profit_threshold
            && self.first_trail_profit_threshold < self.second_trail_profit_threshold)
        {
            return Err(format!(
                "profit thresholds must be strictly ascending: low {} < first {} < second {}",
                self.low_trail_profit_threshold,
                self.first_trail_profit_threshold,
                self.second_trail_profit_threshold
            ));
        }
        for (name, value) in [
            ("trail_stop_loss_pct", self.trail_stop_loss_pct),
            ("higher_trail_stop_loss_pct", self.higher_trail_stop_loss_pct),
        ] {
            if value < Decimal::ZERO || value >= Decimal::ONE {
                return Err(format!("{} must be in [0, 1), got {}", name, value));
            }
        }
        Ok(())
    }

    /// Whether `symbol` is excluded from stop evaluation.
    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.contains(symbol)
    }
}

/// Convert a ccxt-style unified symbol (`BTC/USDT:USDT`) to the exchange
/// symbol (`BTCUSDT`). Native symbols pass through unchanged.
pub fn normalize_symbol(symbol: &str) -> String {
    let base = symbol.split(':').next().unwrap_or(symbol);
    base.replace('/', "").trim().to_uppercase()
}
