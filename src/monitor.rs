//! Monitor runner: the polling loop that protects open positions.
//!
//! Handles:
//! - Confirming hedge position mode before anything else runs
//! - Polling positions and reconciling the tracker
//! - Evaluating the trailing-stop policy per position
//! - Closing positions and reporting the result to the operator

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::{ExchangeGateway, PositionMode};
use crate::models::{ClosedTrade, PositionKey, PositionSide};
use crate::notify::NotificationSink;
use crate::trading::{
    normalize_symbol, profit_pct, CloseReason, PolicyError, PositionTracker, StopDecision,
    TrackerEvent, TrailingStopConfig, TrailingStopPolicy, Verdict,
};

/// Granularity of the shutdown check while sleeping between cycles.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Fatal startup conditions. The process must not start monitoring.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("exchange kept position mode {0}; close open positions and switch to hedge mode")]
    HedgeModeRejected(PositionMode),

    #[error("could not set hedge position mode: {0}")]
    HedgeModeUnavailable(String),
}

/// Errors that end the monitoring loop.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid position snapshot for {key}: {source}")]
    InvalidSnapshot {
        key: PositionKey,
        #[source]
        source: PolicyError,
    },
}

/// Failure of a single close attempt. The position stays tracked and the
/// close is retried on a later cycle if the policy still says so.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("failed to re-fetch positions before closing: {0}")]
    Refetch(String),

    #[error("close request failed: {0}")]
    Gateway(String),

    #[error("close not confirmed by exchange: {0}")]
    Unconfirmed(String),

    #[error(transparent)]
    InvalidSnapshot(#[from] PolicyError),
}

/// Result of a successful close action.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// Nothing left to close; no order was sent
    AlreadyFlat,
    Closed(ClosedTrade),
}

/// Position monitor.
pub struct Monitor<G, N> {
    gateway: G,
    notifier: N,
    policy: TrailingStopPolicy,
    tracker: PositionTracker,
    interval: Duration,
    stats: MonitorStats,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl<G, N> Monitor<G, N>
where
    G: ExchangeGateway,
    N: NotificationSink,
{
    pub fn new(gateway: G, notifier: N, config: TrailingStopConfig, interval: Duration) -> Self {
        let policy = TrailingStopPolicy::new(config);
        Self {
            gateway,
            notifier,
            tracker: PositionTracker::new(policy.clone()),
            policy,
            interval,
            stats: MonitorStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            tracked: self.tracker.len(),
            ..self.stats.clone()
        }
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn notify(&self, content: &str) {
        if !self.notifier.send_notice(content).await {
            debug!("Notice not delivered");
        }
    }

    /// Switch the account to hedge mode and confirm the exchange accepted it.
    pub async fn ensure_hedge_mode(&self) -> Result<(), StartupError> {
        match self.gateway.set_hedge_mode(true).await {
            Ok(PositionMode::Hedge) => {
                info!("Hedge position mode confirmed");
                self.notify("Monitor starting, position mode set to hedge").await;
                Ok(())
            }
            Ok(mode) => {
                let err = StartupError::HedgeModeRejected(mode);
                error!(error = %err, "Startup aborted");
                self.notify(&err.to_string()).await;
                Err(err)
            }
            Err(e) => {
                let err = StartupError::HedgeModeUnavailable(format!("{:#}", e));
                error!(error = %err, "Startup aborted");
                self.notify(&format!(
                    "{}. Open positions can block the switch; close them and restart.",
                    err
                ))
                .await;
                Err(err)
            }
        }
    }

    /// Main run loop. Returns when the shutdown flag is set, or with the
    /// error of the first cycle that could not complete.
    pub async fn run(&mut self) -> Result<(), MonitorError> {
        info!(
            interval_secs = self.interval.as_secs(),
            blacklist = self.policy.config().blacklist.len(),
            "Starting monitor loop"
        );

        while !self.is_shutdown() {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Monitor cycle failed, stopping");
                self.notify(&format!("Monitor stopped after an unrecoverable error: {}", e))
                    .await;
                info!("{}", self.stats());
                return Err(e);
            }
            self.pause().await;
        }

        self.shutdown();
        Ok(())
    }

    /// Sleep for the cycle interval, waking early on shutdown.
    async fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        while !self.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL)).await;
        }
    }

    /// One polling cycle: fetch, reconcile, observe, evaluate, close.
    pub async fn run_cycle(&mut self) -> Result<(), MonitorError> {
        self.stats.cycles += 1;
        debug!(cycle = self.stats.cycles, "Monitor cycle");

        let positions = match self.gateway.fetch_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                self.stats.fetch_failures += 1;
                error!(error = %format!("{:#}", e), "Failed to fetch positions");
                self.notify(&format!("Failed to fetch positions: {:#}", e)).await;
                Vec::new()
            }
        };

        for event in self.tracker.reconcile(&positions) {
            self.notify(&event.to_string()).await;
        }

        for position in positions.iter().filter(|p| !p.is_flat()) {
            let key = position.key();
            let blacklisted = self
                .policy
                .config()
                .is_blacklisted(&normalize_symbol(&position.symbol));

            let observation = self
                .tracker
                .observe(position, blacklisted)
                .map_err(|source| MonitorError::InvalidSnapshot {
                    key: key.clone(),
                    source,
                })?;

            for event in &observation.events {
                match event {
                    TrackerEvent::PeakUpdated { peak, .. } => {
                        debug!(position = %key, peak = %peak.round_dp(2), "Peak profit raised");
                    }
                    _ => {
                        info!(position = %key, "{}", event);
                        self.notify(&event.to_string()).await;
                    }
                }
            }

            let Verdict::Evaluate {
                profit_pct,
                peak_profit_pct,
                tier,
            } = observation.verdict
            else {
                continue;
            };

            debug!(
                position = %key,
                profit = %profit_pct.round_dp(2),
                peak = %peak_profit_pct.round_dp(2),
                tier = %tier,
                "Evaluated"
            );

            let decision = self
                .policy
                .evaluate(profit_pct, peak_profit_pct, tier)
                .map_err(|source| MonitorError::InvalidSnapshot {
                    key: key.clone(),
                    source,
                })?;

            if let StopDecision::Close(reason) = decision {
                info!(position = %key, reason = %reason, "Stop triggered");
                match self.close_position(&position.symbol, position.side, &reason).await {
                    Ok(CloseOutcome::Closed(trade)) => {
                        debug!(position = %key, orders = ?trade.order_ids, "Close confirmed");
                    }
                    Ok(CloseOutcome::AlreadyFlat) => {}
                    Err(CloseError::InvalidSnapshot(source)) => {
                        return Err(MonitorError::InvalidSnapshot { key, source });
                    }
                    Err(e) => {
                        self.stats.closes_failed += 1;
                        error!(position = %key, error = %e, "Close failed, will retry next cycle");
                        self.notify(&format!("Failed to close {}: {}", key, e)).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Close the whole (symbol, side) position.
    ///
    /// Re-fetches positions first. A position that is already flat counts as
    /// closed and no order is sent, so calling this again after a success is
    /// harmless. On error the tracker is left untouched.
    pub async fn close_position(
        &mut self,
        symbol: &str,
        side: PositionSide,
        reason: &CloseReason,
    ) -> Result<CloseOutcome, CloseError> {
        let key = PositionKey::new(symbol, side);

        let positions = self
            .gateway
            .fetch_positions()
            .await
            .map_err(|e| CloseError::Refetch(format!("{:#}", e)))?;

        let snapshot = match positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.side == side && !p.is_flat())
        {
            Some(snapshot) => snapshot,
            None => {
                info!(position = %key, "Already flat, nothing to close");
                self.stats.already_flat += 1;
                self.tracker.forget(&key);
                return Ok(CloseOutcome::AlreadyFlat);
            }
        };

        let realized_pct = profit_pct(snapshot.side, snapshot.entry_price, snapshot.mark_price)?;
        let realized_amount = snapshot
            .profit_amount()
            .ok_or(PolicyError::Overflow("profit amount"))?;

        let ack = self
            .gateway
            .close_full_position(symbol, side)
            .await
            .map_err(|e| CloseError::Gateway(format!("{:#}", e)))?;

        if !ack.success {
            return Err(CloseError::Unconfirmed(ack.message));
        }

        if let Some(filled) = ack.filled_amount {
            if filled != snapshot.contracts {
                warn!(position = %key, %filled, expected = %snapshot.contracts, "Partial fill reported");
            }
        }

        let trade = ClosedTrade::from_snapshot(
            &snapshot,
            realized_pct,
            realized_amount,
            reason.to_string(),
            ack.order_ids,
        );
        info!(
            position = %key,
            profit_pct = %trade.profit_pct.round_dp(2),
            profit = %trade.profit_amount.round_dp(4),
            "Position closed"
        );

        self.stats.closes_confirmed += 1;
        self.stats.realized_profit += trade.profit_amount;
        self.tracker.forget(&key);
        self.notifier.send_trade_closed(&trade).await;

        Ok(CloseOutcome::Closed(trade))
    }

    /// Graceful shutdown.
    fn shutdown(&self) {
        info!("Shutting down monitor...");
        if self.tracker.is_empty() {
            info!("No positions tracked");
        }
        for (key, tracked) in self.tracker.iter() {
            info!(
                position = %key,
                amount = %tracked.detected_amount,
                peak = %tracked.peak_profit_pct.round_dp(2),
                tier = %tracked.tier,
                "Still open"
            );
        }
        info!("{}", self.stats());
        info!("Monitor shutdown complete");
    }
}

/// Monitor statistics.
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub cycles: u64,
    pub fetch_failures: u64,
    pub closes_confirmed: u64,
    pub closes_failed: u64,
    pub already_flat: u64,
    pub realized_profit: Decimal,
    pub tracked: usize,
}

impl fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Monitor Statistics ===")?;
        writeln!(f, "Cycles:           {}", self.cycles)?;
        writeln!(f, "Fetch Failures:   {}", self.fetch_failures)?;
        writeln!(f, "Closes:           {} (Failed: {}, Already Flat: {})",
            self.closes_confirmed, self.closes_failed, self.already_flat)?;
        writeln!(f, "Realized P&L:     {:.4} USDT", self.realized_profit)?;
        writeln!(f, "Tracked:          {}", self.tracked)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CloseAck;
    use crate::models::Position;
    use crate::trading::Tier;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// In-memory exchange: fetches return the current book, a confirmed
    /// close removes the position from it.
    #[derive(Default)]
    struct MockGateway {
        book: Mutex<Vec<Position>>,
        fetch_failures: AtomicUsize,
        close_rejections: AtomicUsize,
        close_calls: Mutex<Vec<(String, PositionSide)>>,
        mode: Mutex<Option<PositionMode>>,
    }

    impl MockGateway {
        fn set_book(&self, book: Vec<Position>) {
            *self.book.lock().unwrap() = book;
        }

        fn close_calls(&self) -> usize {
            self.close_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn fetch_positions(&self) -> Result<Vec<Position>> {
            let remaining = self.fetch_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("request timed out"));
            }
            Ok(self.book.lock().unwrap().clone())
        }

        async fn close_full_position(&self, symbol: &str, side: PositionSide) -> Result<CloseAck> {
            self.close_calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), side));

            let remaining = self.close_rejections.load(Ordering::SeqCst);
            if remaining > 0 {
                self.close_rejections.store(remaining - 1, Ordering::SeqCst);
                return Ok(CloseAck::rejected("22002 no position to close"));
            }

            self.book
                .lock()
                .unwrap()
                .retain(|p| !(p.symbol == symbol && p.side == side));
            Ok(CloseAck {
                success: true,
                order_ids: vec!["1001".to_string()],
                ..Default::default()
            })
        }

        async fn set_hedge_mode(&self, _enabled: bool) -> Result<PositionMode> {
            (*self.mode.lock().unwrap()).ok_or_else(|| anyhow!("40920 position exists"))
        }
    }

    #[derive(Default)]
    struct MockSink {
        cards: Mutex<Vec<(String, String)>>,
    }

    impl MockSink {
        fn count_containing(&self, needle: &str) -> usize {
            self.cards
                .lock()
                .unwrap()
                .iter()
                .filter(|(title, content)| title.contains(needle) || content.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl NotificationSink for MockSink {
        async fn send_card(&self, title: &str, content: &str) -> bool {
            self.cards
                .lock()
                .unwrap()
                .push((title.to_string(), content.to_string()));
            true
        }
    }

    fn make_config() -> TrailingStopConfig {
        TrailingStopConfig {
            stop_loss_pct: dec!(3),
            low_trail_stop_loss_pct: dec!(0.3),
            trail_stop_loss_pct: dec!(0.5),
            higher_trail_stop_loss_pct: dec!(0.3),
            low_trail_profit_threshold: dec!(2),
            first_trail_profit_threshold: dec!(5),
            second_trail_profit_threshold: dec!(10),
            ..Default::default()
        }
    }

    fn make_position(symbol: &str, contracts: Decimal, mark: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            contracts,
            entry_price: dec!(100),
            mark_price: mark,
            margin_mode: "crossed".to_string(),
            leverage: Some(dec!(10)),
        }
    }

    type TestMonitor = Monitor<Arc<MockGateway>, Arc<MockSink>>;

    fn make_monitor(config: TrailingStopConfig) -> (TestMonitor, Arc<MockGateway>, Arc<MockSink>) {
        let gateway = Arc::new(MockGateway::default());
        let sink = Arc::new(MockSink::default());
        let monitor = Monitor::new(gateway.clone(), sink.clone(), config, Duration::ZERO);
        (monitor, gateway, sink)
    }

    async fn cycle_at(monitor: &mut TestMonitor, gateway: &MockGateway, contracts: Decimal, mark: Decimal) {
        gateway.set_book(vec![make_position("BTCUSDT", contracts, mark)]);
        monitor.run_cycle().await.unwrap();
    }

    #[tokio::test]
    async fn test_trailing_stop_closes_after_retrace() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());
        let key = PositionKey::new("BTCUSDT", PositionSide::Long);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(100)).await;
        assert_eq!(sink.count_containing("New position detected"), 1);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(106)).await;
        let tracked = monitor.tracker().get(&key).unwrap();
        assert_eq!(tracked.tier, Tier::Tier1);
        assert_eq!(tracked.peak_profit_pct, dec!(6));
        assert_eq!(gateway.close_calls(), 0);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(103)).await;
        assert_eq!(gateway.close_calls(), 1);
        assert_eq!(sink.count_containing("Position closed: profit"), 1);
        assert!(monitor.tracker().get(&key).is_none());

        // The monitor's own close is not reported as a manual close
        monitor.run_cycle().await.unwrap();
        assert_eq!(sink.count_containing("outside the monitor"), 0);

        let stats = monitor.stats();
        assert_eq!(stats.closes_confirmed, 1);
        assert_eq!(stats.realized_profit, dec!(3));
    }

    #[tokio::test]
    async fn test_hard_stop_without_tier() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(100)).await;
        cycle_at(&mut monitor, &gateway, dec!(1), dec!(101)).await;
        assert_eq!(gateway.close_calls(), 0);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(96.9)).await;
        assert_eq!(gateway.close_calls(), 1);
        assert_eq!(sink.count_containing("Position closed: loss"), 1);
        assert_eq!(sink.count_containing("hard stop-loss"), 1);
    }

    #[tokio::test]
    async fn test_first_sight_never_closes() {
        let (mut monitor, gateway, _sink) = make_monitor(make_config());

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(50)).await;
        assert_eq!(gateway.close_calls(), 0);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(50)).await;
        assert_eq!(gateway.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_symbol_never_closes() {
        let mut config = make_config();
        config.blacklist.insert("BTCUSDT".to_string());
        let (mut monitor, gateway, sink) = make_monitor(config);

        for mark in [dec!(100), dec!(110), dec!(50), dec!(10)] {
            gateway.set_book(vec![make_position("BTC/USDT:USDT", dec!(1), mark)]);
            monitor.run_cycle().await.unwrap();
        }

        assert_eq!(gateway.close_calls(), 0);
        assert_eq!(sink.count_containing("Blacklisted position detected"), 1);
    }

    #[tokio::test]
    async fn test_add_to_position_resets_epoch() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());
        let key = PositionKey::new("BTCUSDT", PositionSide::Long);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(100)).await;
        cycle_at(&mut monitor, &gateway, dec!(1), dec!(108)).await;
        assert_eq!(monitor.tracker().get(&key).unwrap().peak_profit_pct, dec!(8));

        // 3% is below the Tier1 floor of 4%, but the add skips evaluation
        cycle_at(&mut monitor, &gateway, dec!(1.5), dec!(103)).await;
        let tracked = monitor.tracker().get(&key).unwrap();
        assert_eq!(tracked.peak_profit_pct, Decimal::ZERO);
        assert_eq!(tracked.tier, Tier::None);
        assert_eq!(tracked.detected_amount, dec!(1.5));
        assert_eq!(gateway.close_calls(), 0);
        assert_eq!(sink.count_containing("Position increased"), 1);

        cycle_at(&mut monitor, &gateway, dec!(1.5), dec!(103)).await;
        assert_eq!(monitor.tracker().get(&key).unwrap().tier, Tier::LowProtect);
        assert_eq!(gateway.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_notifies_and_does_not_close() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(100)).await;
        gateway.fetch_failures.store(1, Ordering::SeqCst);
        monitor.run_cycle().await.unwrap();

        assert_eq!(sink.count_containing("Failed to fetch positions"), 1);
        assert_eq!(monitor.stats().fetch_failures, 1);
        assert_eq!(gateway.close_calls(), 0);
        assert!(monitor.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_close_failure_is_retried_next_cycle() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());
        let key = PositionKey::new("BTCUSDT", PositionSide::Long);

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(100)).await;
        cycle_at(&mut monitor, &gateway, dec!(1), dec!(106)).await;

        gateway.close_rejections.store(1, Ordering::SeqCst);
        cycle_at(&mut monitor, &gateway, dec!(1), dec!(103)).await;
        assert_eq!(gateway.close_calls(), 1);
        assert_eq!(monitor.stats().closes_failed, 1);
        assert_eq!(sink.count_containing("Failed to close"), 1);
        let tracked = monitor.tracker().get(&key).unwrap();
        assert_eq!(tracked.peak_profit_pct, dec!(6));

        cycle_at(&mut monitor, &gateway, dec!(1), dec!(103)).await;
        assert_eq!(gateway.close_calls(), 2);
        assert_eq!(monitor.stats().closes_confirmed, 1);
        assert!(monitor.tracker().get(&key).is_none());
    }

    #[tokio::test]
    async fn test_close_already_flat_sends_no_order() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());
        gateway.set_book(vec![make_position("BTCUSDT", Decimal::ZERO, dec!(100))]);

        let reason = CloseReason::HardStop { threshold: dec!(-3) };
        let outcome = monitor
            .close_position("BTCUSDT", PositionSide::Long, &reason)
            .await
            .unwrap();
        assert!(matches!(outcome, CloseOutcome::AlreadyFlat));

        let again = monitor
            .close_position("BTCUSDT", PositionSide::Long, &reason)
            .await
            .unwrap();
        assert!(matches!(again, CloseOutcome::AlreadyFlat));

        assert_eq!(gateway.close_calls(), 0);
        assert_eq!(monitor.stats().already_flat, 2);
        assert_eq!(sink.count_containing("Position closed"), 0);
    }

    #[tokio::test]
    async fn test_close_matches_side() {
        let (mut monitor, gateway, _sink) = make_monitor(make_config());
        let mut short = make_position("BTCUSDT", dec!(1), dec!(100));
        short.side = PositionSide::Short;
        gateway.set_book(vec![short]);

        let reason = CloseReason::HardStop { threshold: dec!(-3) };
        let outcome = monitor
            .close_position("BTCUSDT", PositionSide::Long, &reason)
            .await
            .unwrap();
        assert!(matches!(outcome, CloseOutcome::AlreadyFlat));
        assert_eq!(gateway.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_refetch_failure_is_error() {
        let (mut monitor, gateway, _sink) = make_monitor(make_config());
        gateway.fetch_failures.store(1, Ordering::SeqCst);

        let reason = CloseReason::HardStop { threshold: dec!(-3) };
        let err = monitor
            .close_position("BTCUSDT", PositionSide::Long, &reason)
            .await
            .unwrap_err();
        assert!(matches!(err, CloseError::Refetch(_)));
        assert_eq!(gateway.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_terminates_loop() {
        let config = TrailingStopConfig {
            evaluate_on_first_sight: true,
            ..make_config()
        };
        let (mut monitor, gateway, sink) = make_monitor(config);
        let mut broken = make_position("BTCUSDT", dec!(1), dec!(100));
        broken.entry_price = Decimal::ZERO;
        gateway.set_book(vec![broken]);

        let err = monitor.run().await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidSnapshot { .. }));
        assert_eq!(sink.count_containing("unrecoverable error"), 1);
        assert_eq!(monitor.stats().cycles, 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_profit_terminates_before_close() {
        let (mut monitor, gateway, sink) = make_monitor(make_config());

        // Profit percentage fits, profit amount does not
        cycle_at(&mut monitor, &gateway, Decimal::MAX, dec!(100)).await;
        gateway.set_book(vec![make_position("BTCUSDT", Decimal::MAX, dec!(90))]);

        let err = monitor.run().await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::InvalidSnapshot {
                source: PolicyError::Overflow(_),
                ..
            }
        ));
        assert_eq!(gateway.close_calls(), 0);
        assert_eq!(monitor.stats().closes_failed, 0);
        assert_eq!(sink.count_containing("unrecoverable error"), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_flag() {
        let (mut monitor, _gateway, _sink) = make_monitor(make_config());
        monitor.shutdown_signal().store(true, Ordering::SeqCst);

        monitor.run().await.unwrap();
        assert_eq!(monitor.stats().cycles, 0);
    }

    #[tokio::test]
    async fn test_ensure_hedge_mode() {
        let (monitor, gateway, sink) = make_monitor(make_config());

        *gateway.mode.lock().unwrap() = Some(PositionMode::Hedge);
        assert!(monitor.ensure_hedge_mode().await.is_ok());

        *gateway.mode.lock().unwrap() = Some(PositionMode::OneWay);
        assert!(matches!(
            monitor.ensure_hedge_mode().await,
            Err(StartupError::HedgeModeRejected(PositionMode::OneWay))
        ));

        *gateway.mode.lock().unwrap() = None;
        assert!(matches!(
            monitor.ensure_hedge_mode().await,
            Err(StartupError::HedgeModeUnavailable(_))
        ));
        assert_eq!(sink.count_containing("close them and restart"), 1);
    }
}
