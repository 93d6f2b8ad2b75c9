//! Tiered trailing-stop policy.
//!
//! This module defines the rules for:
//! - How unrealized profit is measured for each direction
//! - Which trailing tier a peak profit arms
//! - When the current profit breaches the armed tier or the hard stop
//!
//! Everything here is a pure function of its inputs. Per-position history
//! (peak profit, detected size) lives in the tracker.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::PositionSide;

use super::config::TrailingStopConfig;

/// Trailing-stop escalation level, ordered from least to most protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Tier {
    #[default]
    None,
    LowProtect,
    Tier1,
    Tier2,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::None => "none",
            Tier::LowProtect => "low-protect",
            Tier::Tier1 => "trail-1",
            Tier::Tier2 => "trail-2",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position should be closed. Each variant carries the level it breached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Profit fell to the absolute LowProtect floor
    LowProtect { floor: Decimal },
    /// Profit retraced past the Tier1 trail
    Trail1 { peak: Decimal, floor: Decimal },
    /// Profit retraced past the Tier2 trail
    Trail2 { peak: Decimal, floor: Decimal },
    /// Loss reached the hard stop
    HardStop { threshold: Decimal },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LowProtect { floor } => {
                write!(f, "low-protect floor {:.2}%", floor)
            }
            CloseReason::Trail1 { peak, floor } => {
                write!(f, "trail-1 retrace (peak {:.2}%, floor {:.2}%)", peak, floor)
            }
            CloseReason::Trail2 { peak, floor } => {
                write!(f, "trail-2 retrace (peak {:.2}%, floor {:.2}%)", peak, floor)
            }
            CloseReason::HardStop { threshold } => {
                write!(f, "hard stop-loss at {:.2}%", threshold)
            }
        }
    }
}

/// Close or keep, decided once per position per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    Hold,
    Close(CloseReason),
}

/// Everything the policy needs about one position for one cycle.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub peak_profit_pct: Decimal,
    pub blacklisted: bool,
}

/// Result of a full policy pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub profit_pct: Decimal,
    pub tier: Tier,
    pub decision: StopDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntryPrice(Decimal),

    #[error("decimal overflow computing {0}")]
    Overflow(&'static str),
}

/// Unrealized profit as a percentage of entry price.
pub fn profit_pct(
    side: PositionSide,
    entry_price: Decimal,
    mark_price: Decimal,
) -> Result<Decimal, PolicyError> {
    if entry_price <= Decimal::ZERO {
        return Err(PolicyError::NonPositiveEntryPrice(entry_price));
    }
    let diff = match side {
        PositionSide::Long => mark_price.checked_sub(entry_price),
        PositionSide::Short => entry_price.checked_sub(mark_price),
    };
    diff.and_then(|d| d.checked_div(entry_price))
        .and_then(|m| m.checked_mul(dec!(100)))
        .ok_or(PolicyError::Overflow("profit percentage"))
}

/// Trailing-stop policy engine.
#[derive(Debug, Clone)]
pub struct TrailingStopPolicy {
    config: TrailingStopConfig,
}

impl TrailingStopPolicy {
    pub fn new(config: TrailingStopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrailingStopConfig {
        &self.config
    }

    /// Tier armed by a peak profit: the highest threshold the peak meets.
    pub fn tier_for_peak(&self, peak_profit_pct: Decimal) -> Tier {
        if peak_profit_pct >= self.config.second_trail_profit_threshold {
            Tier::Tier2
        } else if peak_profit_pct >= self.config.first_trail_profit_threshold {
            Tier::Tier1
        } else if peak_profit_pct >= self.config.low_trail_profit_threshold {
            Tier::LowProtect
        } else {
            Tier::None
        }
    }

    /// Profit floor of the armed tier, if the tier has one.
    pub fn trail_floor(
        &self,
        tier: Tier,
        peak_profit_pct: Decimal,
    ) -> Result<Option<Decimal>, PolicyError> {
        let retracement = match tier {
            Tier::None => return Ok(None),
            Tier::LowProtect => return Ok(Some(self.config.low_trail_stop_loss_pct)),
            Tier::Tier1 => self.config.trail_stop_loss_pct,
            Tier::Tier2 => self.config.higher_trail_stop_loss_pct,
        };
        Decimal::ONE
            .checked_sub(retracement)
            .and_then(|kept| peak_profit_pct.checked_mul(kept))
            .map(Some)
            .ok_or(PolicyError::Overflow("trailing floor"))
    }

    /// Decide for one position. The tier's trailing rule is checked first; the
    /// hard stop only when the trailing rule did not fire.
    pub fn evaluate(
        &self,
        current_profit_pct: Decimal,
        peak_profit_pct: Decimal,
        tier: Tier,
    ) -> Result<StopDecision, PolicyError> {
        if let Some(floor) = self.trail_floor(tier, peak_profit_pct)? {
            debug!(
                tier = %tier,
                floor = %floor.round_dp(2),
                current = %current_profit_pct.round_dp(2),
                "Trailing floor"
            );
            if current_profit_pct <= floor {
                let reason = match tier {
                    Tier::LowProtect => CloseReason::LowProtect { floor },
                    Tier::Tier1 => CloseReason::Trail1 {
                        peak: peak_profit_pct,
                        floor,
                    },
                    _ => CloseReason::Trail2 {
                        peak: peak_profit_pct,
                        floor,
                    },
                };
                return Ok(StopDecision::Close(reason));
            }
        }

        let threshold = -self.config.stop_loss_pct;
        if current_profit_pct <= threshold {
            warn!(
                current = %current_profit_pct.round_dp(2),
                threshold = %threshold,
                "Hard stop-loss breached"
            );
            return Ok(StopDecision::Close(CloseReason::HardStop { threshold }));
        }

        Ok(StopDecision::Hold)
    }

    /// Full pass from raw prices: profit, tier from the (possibly raised) peak,
    /// and the decision. Blacklisted positions always hold.
    pub fn assess(&self, input: &PolicyInput) -> Result<Assessment, PolicyError> {
        let profit = profit_pct(input.side, input.entry_price, input.mark_price)?;

        if input.blacklisted {
            return Ok(Assessment {
                profit_pct: profit,
                tier: Tier::None,
                decision: StopDecision::Hold,
            });
        }

        let peak = input.peak_profit_pct.max(profit);
        let tier = self.tier_for_peak(peak);
        let decision = self.evaluate(profit, peak, tier)?;

        Ok(Assessment {
            profit_pct: profit,
            tier,
            decision,
        })
    }
}
