//! Operator notifications.

mod feishu;

pub use feishu::FeishuNotifier;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::ClosedTrade;

/// Best-effort message delivery. Failures are logged by the sink and never
/// propagate into the monitor.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send a titled card. Returns true when the receiver accepted it.
    async fn send_card(&self, title: &str, content: &str) -> bool;

    /// Send an operator notice under the default title.
    async fn send_notice(&self, content: &str) -> bool {
        self.send_card(NOTICE_TITLE, content).await
    }

    /// Report a position the monitor has closed.
    async fn send_trade_closed(&self, trade: &ClosedTrade) -> bool {
        let (title, content) = trade_closed_card(trade);
        self.send_card(title, &content).await
    }
}

#[async_trait]
impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    async fn send_card(&self, title: &str, content: &str) -> bool {
        (**self).send_card(title, content).await
    }
}

pub const NOTICE_TITLE: &str = "Position monitor";

/// Title and markdown body for a closed trade.
pub fn trade_closed_card(trade: &ClosedTrade) -> (&'static str, String) {
    let title = if trade.is_profitable() {
        "Position closed: profit"
    } else if trade.is_loss() {
        "Position closed: loss"
    } else {
        "Position closed: flat"
    };

    let mut content = format!(
        "**Symbol:** {}\n**Side:** {}\n**Amount:** {}\n**Entry:** {}\n**Exit:** {}\n\
         **Profit:** {}% ({} USDT)\n**Reason:** {}\n**Time:** {}",
        trade.symbol,
        trade.side,
        trade.amount.normalize(),
        trade.entry_price.normalize(),
        trade.exit_price.normalize(),
        trade.profit_pct.round_dp(2),
        trade.profit_amount.round_dp(4),
        trade.reason,
        trade.closed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if !trade.order_ids.is_empty() {
        content.push_str(&format!("\n**Orders:** {}", trade.order_ids.join(", ")));
    }

    (title, content)
}
