//! Bitget REST client for USDT-margined futures.
//!
//! Handles:
//! - Request signing (HMAC-SHA256 over timestamp, method, path and body, base64)
//! - Listing open positions
//! - Closing a full position with a market order
//! - Switching the account to hedge (dual-direction) position mode
//!
//! SECURITY: the secret and passphrase are never logged.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::models::{Position, PositionSide};

use super::types::*;
use super::{CloseAck, ExchangeGateway, PositionMode};

type HmacSha256 = Hmac<Sha256>;

/// Bitget API base URL
pub const BITGET_URL: &str = "https://api.bitget.com";

/// Product line for USDT-margined perpetuals
pub const PRODUCT_TYPE: &str = "USDT-FUTURES";

const MARGIN_COIN: &str = "USDT";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const POSITIONS_PATH: &str = "/api/v2/mix/position/all-position";
const CLOSE_POSITIONS_PATH: &str = "/api/v2/mix/order/close-positions";
const POSITION_MODE_PATH: &str = "/api/v2/mix/account/set-position-mode";

/// Signed Bitget REST client.
pub struct BitgetClient {
    http: Client,
    base_url: String,
    api_key: String,
    secret: String,
    passphrase: String,
}

impl BitgetClient {
    /// Create a new client against the production API.
    ///
    /// # Arguments
    /// * `api_key` - Bitget API key
    /// * `secret` - API secret, used only for signing
    /// * `passphrase` - passphrase chosen when the key was created
    pub fn new(api_key: &str, secret: &str, passphrase: &str) -> Result<Self> {
        Self::with_base_url(api_key, secret, passphrase, BITGET_URL.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        api_key: &str,
        secret: &str,
        passphrase: &str,
        base_url: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        debug!(base_url = %base_url, "BitgetClient initialised");

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            passphrase: passphrase.to_string(),
        })
    }

    /// Sign `timestamp + METHOD + request_path + body`.
    ///
    /// `request_path` includes the query string (`?a=b`) when there is one.
    pub fn sign(&self, timestamp: &str, method: &Method, request_path: &str, body: &str) -> Result<String> {
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), request_path, body);
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
        mac.update(prehash.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn build_headers(&self, method: &Method, request_path: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, method, request_path, body)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("access-key"),
            HeaderValue::from_str(&self.api_key)?,
        );
        headers.insert(
            HeaderName::from_static("access-sign"),
            HeaderValue::from_str(&signature)?,
        );
        headers.insert(
            HeaderName::from_static("access-timestamp"),
            HeaderValue::from_str(&timestamp)?,
        );
        headers.insert(
            HeaderName::from_static("access-passphrase"),
            HeaderValue::from_str(&self.passphrase)?,
        );
        headers.insert(HeaderName::from_static("locale"), HeaderValue::from_static("en-US"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    /// Send a signed request and decode the envelope without judging `code`.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        request_path: &str,
        body: Option<String>,
    ) -> Result<ApiResponse<T>> {
        let body = body.unwrap_or_default();
        let headers = self.build_headers(&method, request_path, &body)?;
        let url = format!("{}{}", self.base_url, request_path);

        let mut request = self.http.request(method.clone(), &url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("{} {} request failed", method, request_path))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Bitget {} {} returned {}: {}", method, request_path, status, text);
        }

        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {} response: {}", request_path, text))
    }

    /// Send a signed request and return `data`, failing on a non-success code.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        request_path: &str,
        body: Option<String>,
    ) -> Result<T> {
        let resp: ApiResponse<T> = self.send(method, request_path, body).await?;
        if !resp.is_success() {
            bail!("Bitget {} failed: code {} - {}", request_path, resp.code, resp.msg);
        }
        resp.data
            .with_context(|| format!("Bitget {} returned no data", request_path))
    }

    fn json_body<B: Serialize>(body: &B) -> Result<String> {
        serde_json::to_string(body).context("Failed to serialize request body")
    }
}

#[async_trait]
impl ExchangeGateway for BitgetClient {
    #[instrument(skip(self), name = "bitget::fetch_positions")]
    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let request_path = format!(
            "{}?productType={}&marginCoin={}",
            POSITIONS_PATH, PRODUCT_TYPE, MARGIN_COIN
        );

        let items: Vec<PositionResponse> = self.request(Method::GET, &request_path, None).await?;
        let positions: Vec<Position> = items
            .into_iter()
            .filter_map(PositionResponse::into_position)
            .collect();

        debug!(count = positions.len(), "Positions fetched");
        Ok(positions)
    }

    #[instrument(skip(self), name = "bitget::close_full_position")]
    async fn close_full_position(&self, symbol: &str, side: PositionSide) -> Result<CloseAck> {
        let body = Self::json_body(&ClosePositionsRequest {
            symbol: symbol.to_string(),
            hold_side: side.as_str().to_string(),
            product_type: PRODUCT_TYPE.to_string(),
        })?;

        let resp: ApiResponse<ClosePositionsData> = self
            .send(Method::POST, CLOSE_POSITIONS_PATH, Some(body))
            .await?;

        if !resp.is_success() {
            warn!(symbol, side = %side, code = %resp.code, msg = %resp.msg, "Close rejected");
            return Ok(CloseAck::rejected(format!("code {} - {}", resp.code, resp.msg)));
        }

        let data = resp.data.unwrap_or_default();
        if data.success_list.is_empty() {
            let detail = data
                .failure_list
                .iter()
                .map(|f| format!("{} {}", f.error_code, f.error_msg))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(symbol, side = %side, detail = %detail, "Close not confirmed");
            return Ok(CloseAck::rejected(if detail.is_empty() {
                "empty successList".to_string()
            } else {
                detail
            }));
        }

        let order_ids: Vec<String> = data
            .success_list
            .into_iter()
            .map(|item| item.order_id)
            .filter(|id| !id.is_empty())
            .collect();

        info!(symbol, side = %side, orders = ?order_ids, "Close order accepted");
        Ok(CloseAck {
            success: true,
            order_ids,
            filled_amount: None,
            avg_price: None,
            message: String::new(),
        })
    }

    #[instrument(skip(self), name = "bitget::set_hedge_mode")]
    async fn set_hedge_mode(&self, enabled: bool) -> Result<PositionMode> {
        let wanted = if enabled {
            PositionMode::Hedge
        } else {
            PositionMode::OneWay
        };
        let body = Self::json_body(&SetPositionModeRequest {
            product_type: PRODUCT_TYPE.to_string(),
            pos_mode: wanted.as_str().to_string(),
        })?;

        let data: PositionModeData = self
            .request(Method::POST, POSITION_MODE_PATH, Some(body))
            .await?;

        let mode = PositionMode::parse(&data.pos_mode)
            .with_context(|| format!("Unknown position mode '{}'", data.pos_mode))?;
        info!(mode = %mode, "Position mode set");
        Ok(mode)
    }
}
