//! Feishu (Lark) custom-bot webhook notifier.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::NotificationSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(15);

/// Button rendered under the card body.
#[derive(Debug, Clone)]
pub struct CardButton {
    pub text: String,
    pub url: String,
}

/// Build an interactive card payload.
pub fn build_card(title: &str, content: &str, button: Option<&CardButton>) -> Value {
    let mut elements = vec![json!({
        "tag": "div",
        "text": {
            "content": content,
            "tag": "lark_md"
        }
    })];

    if let Some(button) = button {
        elements.push(json!({
            "tag": "action",
            "actions": [{
                "tag": "button",
                "text": {
                    "content": button.text,
                    "tag": "plain_text"
                },
                "url": button.url,
                "type": "primary"
            }]
        }));
    }

    json!({
        "msg_type": "interactive",
        "card": {
            "header": {
                "title": {
                    "content": title,
                    "tag": "plain_text"
                }
            },
            "elements": elements
        }
    })
}

/// Posts cards to a Feishu webhook. Without a webhook every send is a no-op.
pub struct FeishuNotifier {
    http: Client,
    webhook: Option<String>,
    button: Option<CardButton>,
    retry_window: Duration,
    warned_missing: AtomicBool,
}

impl FeishuNotifier {
    pub fn new(webhook: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            webhook: webhook.filter(|w| !w.trim().is_empty()),
            button: None,
            retry_window: MAX_RETRY_ELAPSED,
            warned_missing: AtomicBool::new(false),
        })
    }

    /// Attach a link button to every card.
    pub fn with_button(mut self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.button = Some(CardButton {
            text: text.into(),
            url: url.into(),
        });
        self
    }

    #[cfg(test)]
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.retry_window))
            .build()
    }

    async fn post_once(&self, url: &str, payload: &Value) -> Result<(), backoff::Error<anyhow::Error>> {
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow!("webhook request failed: {}", e)))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(backoff::Error::transient(anyhow!(
                "webhook returned {}: {}",
                status,
                body
            )));
        }
        if !status.is_success() {
            return Err(backoff::Error::permanent(anyhow!(
                "webhook returned {}: {}",
                status,
                body
            )));
        }

        // Feishu reports application errors with HTTP 200 and a non-zero code
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            let code = value
                .get("code")
                .or_else(|| value.get("StatusCode"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if code != 0 {
                return Err(backoff::Error::permanent(anyhow!(
                    "webhook rejected card: code {} - {}",
                    code,
                    value.get("msg").and_then(Value::as_str).unwrap_or_default()
                )));
            }
        }

        Ok(())
    }

    async fn post_with_retry(&self, url: &str, payload: &Value) -> Result<()> {
        backoff::future::retry_notify(
            self.retry_policy(),
            move || self.post_once(url, payload),
            |err: anyhow::Error, wait: Duration| {
                debug!(error = %err, wait_ms = wait.as_millis() as u64, "Retrying webhook");
            },
        )
        .await
    }
}

#[async_trait]
impl NotificationSink for FeishuNotifier {
    async fn send_card(&self, title: &str, content: &str) -> bool {
        let url = match &self.webhook {
            Some(url) => url,
            None => {
                if !self.warned_missing.swap(true, Ordering::Relaxed) {
                    warn!("No Feishu webhook configured, notifications disabled");
                }
                return false;
            }
        };

        let payload = build_card(title, content, self.button.as_ref());
        match self.post_with_retry(url, &payload).await {
            Ok(()) => {
                debug!(title, "Card delivered");
                true
            }
            Err(e) => {
                warn!(title, error = %e, "Failed to deliver card");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer successive webhook posts with the given (status, body) pairs.
    async fn serve(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request);
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (url, hits)
    }

    #[test]
    fn test_card_shape() {
        let card = build_card("Title", "**body**", None);
        assert_eq!(card["msg_type"], "interactive");
        assert_eq!(card["card"]["header"]["title"]["content"], "Title");
        assert_eq!(card["card"]["header"]["title"]["tag"], "plain_text");
        assert_eq!(card["card"]["elements"][0]["tag"], "div");
        assert_eq!(card["card"]["elements"][0]["text"]["tag"], "lark_md");
        assert_eq!(card["card"]["elements"][0]["text"]["content"], "**body**");
        assert_eq!(card["card"]["elements"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_card_with_button() {
        let button = CardButton {
            text: "Open Bitget".to_string(),
            url: "https://www.bitget.com".to_string(),
        };
        let card = build_card("T", "c", Some(&button));
        let action = &card["card"]["elements"][1];
        assert_eq!(action["tag"], "action");
        assert_eq!(action["actions"][0]["tag"], "button");
        assert_eq!(action["actions"][0]["url"], "https://www.bitget.com");
    }

    #[tokio::test]
    async fn test_missing_webhook_is_noop() {
        let notifier = FeishuNotifier::new(Some("  ".to_string())).unwrap();
        assert!(!notifier.is_enabled());
        assert!(!notifier.send_card("t", "c").await);
        assert!(!notifier.send_card("t", "c").await);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_gives_up() {
        let notifier = FeishuNotifier::new(Some("http://127.0.0.1:9/hook".to_string()))
            .unwrap()
            .with_retry_window(Duration::ZERO);
        assert!(!notifier.send_card("t", "c").await);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (url, hits) = serve(vec![(503, "busy"), (200, r#"{"code":0,"msg":"success"}"#)]).await;
        let notifier = FeishuNotifier::new(Some(url)).unwrap();

        assert!(notifier.send_card("t", "c").await);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_application_error_is_not_retried() {
        let (url, hits) = serve(vec![
            (200, r#"{"code":19021,"msg":"sign match fail"}"#),
            (200, r#"{"code":0}"#),
        ])
        .await;
        let notifier = FeishuNotifier::new(Some(url)).unwrap();

        assert!(!notifier.send_card("t", "c").await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
