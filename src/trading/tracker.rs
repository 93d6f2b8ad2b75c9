//! Per-position state carried between polling cycles.

use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

use crate::models::{Position, PositionKey};

use super::policy::{profit_pct, PolicyError, Tier, TrailingStopPolicy};

/// State kept for one open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPosition {
    /// Contracts seen on the last poll; an increase starts a new epoch
    pub detected_amount: Decimal,
    /// Highest profit percentage seen in the current epoch
    pub peak_profit_pct: Decimal,
    pub tier: Tier,
    /// Blacklisted entries only remember their amount
    pub blacklisted: bool,
}

impl TrackedPosition {
    fn fresh(amount: Decimal, blacklisted: bool) -> Self {
        Self {
            detected_amount: amount,
            peak_profit_pct: Decimal::ZERO,
            tier: Tier::None,
            blacklisted,
        }
    }
}

/// Lifecycle events produced while reconciling and observing positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    FirstSeen {
        key: PositionKey,
        amount: Decimal,
        entry_price: Decimal,
    },
    BlacklistDetected {
        key: PositionKey,
    },
    /// Size increased: the epoch restarted
    Added {
        key: PositionKey,
        previous: Decimal,
        amount: Decimal,
    },
    ManuallyClosed {
        key: PositionKey,
    },
    PeakUpdated {
        key: PositionKey,
        peak: Decimal,
    },
}

impl fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerEvent::FirstSeen {
                key,
                amount,
                entry_price,
            } => write!(
                f,
                "New position detected: {}, size {}, entry price {}",
                key, amount, entry_price
            ),
            TrackerEvent::BlacklistDetected { key } => {
                write!(f, "Blacklisted position detected: {}, not monitored", key)
            }
            TrackerEvent::Added {
                key,
                previous,
                amount,
            } => write!(
                f,
                "Position increased: {} {} -> {}, peak profit and tier reset",
                key, previous, amount
            ),
            TrackerEvent::ManuallyClosed { key } => {
                write!(f, "Position closed outside the monitor: {}, no longer tracked", key)
            }
            TrackerEvent::PeakUpdated { key, peak } => {
                write!(f, "New peak profit for {}: {:.2}%", key, peak)
            }
        }
    }
}

/// What the monitor should do with a position this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Do not evaluate stops this cycle
    Skip,
    /// Evaluate the policy with these values
    Evaluate {
        profit_pct: Decimal,
        peak_profit_pct: Decimal,
        tier: Tier,
    },
}

/// Result of observing one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub verdict: Verdict,
    pub events: Vec<TrackerEvent>,
}

impl Observation {
    fn skip(event: Option<TrackerEvent>) -> Self {
        Self {
            verdict: Verdict::Skip,
            events: event.into_iter().collect(),
        }
    }
}

/// Keyed store of tracked positions, owned by the monitor.
#[derive(Debug)]
pub struct PositionTracker {
    policy: TrailingStopPolicy,
    positions: HashMap<PositionKey, TrackedPosition>,
}

impl PositionTracker {
    pub fn new(policy: TrailingStopPolicy) -> Self {
        Self {
            policy,
            positions: HashMap::new(),
        }
    }

    /// Drop every tracked key that is absent or flat in `current`.
    pub fn reconcile(&mut self, current: &[Position]) -> Vec<TrackerEvent> {
        let open: HashSet<PositionKey> = current
            .iter()
            .filter(|p| !p.is_flat())
            .map(Position::key)
            .collect();

        let mut closed: Vec<PositionKey> = self
            .positions
            .keys()
            .filter(|key| !open.contains(*key))
            .cloned()
            .collect();
        closed.sort();

        closed
            .into_iter()
            .map(|key| {
                self.positions.remove(&key);
                info!(position = %key, "Position gone from exchange, untracked");
                TrackerEvent::ManuallyClosed { key }
            })
            .collect()
    }

    /// Update state for one open position and decide whether to evaluate it.
    pub fn observe(
        &mut self,
        position: &Position,
        blacklisted: bool,
    ) -> Result<Observation, PolicyError> {
        let key = position.key();
        let amount = position.contracts;

        if blacklisted {
            if self.positions.contains_key(&key) {
                return Ok(Observation::skip(None));
            }
            self.positions
                .insert(key.clone(), TrackedPosition::fresh(amount, true));
            return Ok(Observation::skip(Some(TrackerEvent::BlacklistDetected { key })));
        }

        let evaluate_first = self.policy.config().evaluate_on_first_sight;
        let mut events = Vec::new();

        let tracked = match self.positions.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let event = TrackerEvent::FirstSeen {
                    key: key.clone(),
                    amount,
                    entry_price: position.entry_price,
                };
                let tracked = entry.insert(TrackedPosition::fresh(amount, false));
                if !evaluate_first {
                    return Ok(Observation::skip(Some(event)));
                }
                events.push(event);
                tracked
            }
        };

        if amount > tracked.detected_amount {
            let previous = tracked.detected_amount;
            *tracked = TrackedPosition::fresh(amount, false);
            debug!(position = %key, %previous, %amount, "Position increased, epoch reset");
            return Ok(Observation::skip(Some(TrackerEvent::Added {
                key,
                previous,
                amount,
            })));
        }
        if amount < tracked.detected_amount {
            tracked.detected_amount = amount;
        }

        let profit = profit_pct(position.side, position.entry_price, position.mark_price)?;
        if profit > tracked.peak_profit_pct {
            tracked.peak_profit_pct = profit;
            events.push(TrackerEvent::PeakUpdated {
                key: key.clone(),
                peak: profit,
            });
        }
        tracked.tier = self.policy.tier_for_peak(tracked.peak_profit_pct);

        Ok(Observation {
            verdict: Verdict::Evaluate {
                profit_pct: profit,
                peak_profit_pct: tracked.peak_profit_pct,
                tier: tracked.tier,
            },
            events,
        })
    }

    /// Stop tracking a key, e.g. after the monitor closed it.
    pub fn forget(&mut self, key: &PositionKey) -> Option<TrackedPosition> {
        self.positions.remove(key)
    }

    #[cfg(test)]
    pub fn get(&self, key: &PositionKey) -> Option<&TrackedPosition> {
        self.positions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PositionKey, &TrackedPosition)> {
        self.positions.iter()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
