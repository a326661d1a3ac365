// =============================================================================
// BinanceGateway — HMAC-SHA256 signed REST client behind `ExchangeGateway`
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the bot and Binance servers.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::EngineError;

use super::rate_limit::RateLimitTracker;
use super::{Balance, ExchangeGateway, FilledOrder, Kline, OrderSide, Ticker};

/// Approximate Binance request weights, used to pre-flight
/// `RateLimitTracker::can_send_request` before a call is even sent.
const WEIGHT_TICKERS: u32 = 40;
const WEIGHT_KLINES: u32 = 1;
const WEIGHT_ACCOUNT: u32 = 10;
const WEIGHT_ORDER: u32 = 1;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Binance REST endpoint for production trading.
const LIVE_BASE_URL: &str = "https://api.binance.com";
/// Binance's own sandbox environment (spec.md glossary: "sandbox-provided
/// mock environment"), not a bot-local simulator.
const SANDBOX_BASE_URL: &str = "https://testnet.binance.vision";

/// Binance Spot `ExchangeGateway` implementation.
pub struct BinanceGateway {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<RateLimitTracker>,
}

impl BinanceGateway {
    /// Create a new gateway. `is_sandbox` selects the base URL; the request
    /// path and signing logic are identical either way.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, is_sandbox: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if is_sandbox { SANDBOX_BASE_URL } else { LIVE_BASE_URL }.to_string();
        debug!(base_url, "BinanceGateway initialised");

        let limiter = Arc::new(RateLimitTracker::new());
        Self::spawn_limit_resets(Arc::clone(&limiter));

        Self {
            api_key,
            secret,
            base_url,
            client,
            limiter,
        }
    }

    /// Periodically clears the rate-limit counters on the windows Binance
    /// itself enforces them over: the 10 s order window, the 1-minute
    /// weight window, and the UTC daily order window. A no-op outside a
    /// Tokio runtime (e.g. plain `#[test]` functions constructing a gateway
    /// just to exercise signing/formatting helpers).
    fn spawn_limit_resets(limiter: Arc<RateLimitTracker>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else { return };
        handle.spawn(async move {
            let mut ten_s = tokio::time::interval(Duration::from_secs(10));
            let mut one_m = tokio::time::interval(Duration::from_secs(60));
            let mut one_d = tokio::time::interval(Duration::from_secs(86_400));
            loop {
                tokio::select! {
                    _ = ten_s.tick() => limiter.reset_10s_counter(),
                    _ = one_m.tick() => limiter.reset_1m_weight(),
                    _ = one_d.tick() => limiter.reset_daily_counter(),
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Raw calls (wrapped individually by `initialize`/trait methods via the
    // rate-limit gate)
    // -------------------------------------------------------------------------

    async fn get_account(&self) -> Result<serde_json::Value> {
        if !self.limiter.can_send_request(WEIGHT_ACCOUNT) {
            anyhow::bail!("account request blocked by local rate-limit guard");
        }

        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);

        let resp = self.client.get(&url).send().await.context("GET /api/v3/account request failed")?;
        self.limiter.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse account response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/account returned {}: {}", status, body);
        }
        Ok(body)
    }

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    #[instrument(skip(self), name = "binance::initialize")]
    async fn initialize(&self) -> Result<(), EngineError> {
        if self.api_key.is_empty() || self.secret.is_empty() {
            return Err(EngineError::Configuration(
                "no API key/secret resolved — cannot initialize exchange gateway".to_string(),
            ));
        }

        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp = self
            .limiter
            .gate(async {
                self.client
                    .get(&url)
                    .send()
                    .await
                    .context("GET /api/v3/exchangeInfo request failed")
            })
            .await
            .map_err(EngineError::GatewayTransient)?;

        if !resp.status().is_success() {
            return Err(EngineError::GatewayTransient(anyhow!(
                "Binance GET /api/v3/exchangeInfo returned {}",
                resp.status()
            )));
        }

        if !self.validate_api_key_permissions().await? {
            return Err(EngineError::Permission);
        }

        debug!(base_url = %self.base_url, "exchange gateway initialized");
        Ok(())
    }

    #[instrument(skip(self), name = "binance::validate_api_key_permissions")]
    async fn validate_api_key_permissions(&self) -> Result<bool, EngineError> {
        let account = self.limiter.gate(self.get_account()).await.map_err(EngineError::GatewayTransient)?;
        let can_withdraw = account["canWithdraw"].as_bool().unwrap_or(true);
        if can_withdraw {
            warn!("credentials report canWithdraw=true — refusing to use them");
        }
        Ok(!can_withdraw)
    }

    #[instrument(skip(self), name = "binance::fetch_tickers")]
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, EngineError> {
        if !self.limiter.can_send_request(WEIGHT_TICKERS) {
            return Err(EngineError::GatewayTransient(anyhow!("ticker/24hr request blocked by local rate-limit guard")));
        }

        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let body: serde_json::Value = self
            .limiter
            .gate(async {
                let resp = self.client.get(&url).send().await.context("GET /api/v3/ticker/24hr failed")?;
                self.limiter.update_from_headers(resp.headers());
                let status = resp.status();
                let body: serde_json::Value = resp.json().await.context("failed to parse ticker/24hr response")?;
                if !status.is_success() {
                    anyhow::bail!("Binance GET /api/v3/ticker/24hr returned {}: {}", status, body);
                }
                Ok(body)
            })
            .await
            .map_err(EngineError::GatewayTransient)?;

        let raw = body
            .as_array()
            .context("ticker/24hr response is not an array")
            .map_err(EngineError::GatewayTransient)?;

        let mut tickers = Vec::with_capacity(raw.len());
        for entry in raw {
            let symbol = match entry["symbol"].as_str() {
                Some(s) => s.to_string(),
                None => continue,
            };
            let last = Self::parse_str_f64(&entry["lastPrice"]).unwrap_or(0.0);
            if last <= 0.0 {
                continue;
            }
            let base_volume = Self::parse_str_f64(&entry["volume"]).unwrap_or(0.0);
            let quote_volume = Self::parse_str_f64(&entry["quoteVolume"]).unwrap_or(0.0);
            let percentage = Self::parse_str_f64(&entry["priceChangePercent"]).unwrap_or(0.0);

            tickers.push(Ticker { symbol, last, base_volume, quote_volume, percentage });
        }

        debug!(count = tickers.len(), "tickers fetched");
        Ok(tickers)
    }

    #[instrument(skip(self), name = "binance::fetch_ohlcv")]
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Vec<Kline> {
        if !self.limiter.can_send_request(WEIGHT_KLINES) {
            warn!(symbol, timeframe, "klines request blocked by local rate-limit guard — returning empty series");
            return Vec::new();
        }

        let url = format!("{}/api/v3/klines?symbol={}&interval={}&limit={}", self.base_url, symbol, timeframe, limit);

        let result: Result<Vec<Kline>> = self
            .limiter
            .gate(async {
                let resp = self.client.get(&url).send().await.context("GET /api/v3/klines request failed")?;
                self.limiter.update_from_headers(resp.headers());
                let status = resp.status();
                let body: serde_json::Value = resp.json().await.context("failed to parse klines response")?;
                if !status.is_success() {
                    anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
                }

                let raw = body.as_array().context("klines response is not an array")?;
                let mut klines = Vec::with_capacity(raw.len());
                for entry in raw {
                    let arr = entry.as_array().context("kline entry is not an array")?;
                    if arr.len() < 7 {
                        warn!("skipping malformed kline entry with {} elements", arr.len());
                        continue;
                    }
                    klines.push(Kline {
                        open_time: arr[0].as_i64().unwrap_or(0),
                        open: Self::parse_str_f64(&arr[1])?,
                        high: Self::parse_str_f64(&arr[2])?,
                        low: Self::parse_str_f64(&arr[3])?,
                        close: Self::parse_str_f64(&arr[4])?,
                        volume: Self::parse_str_f64(&arr[5])?,
                        close_time: arr[6].as_i64().unwrap_or(0),
                    });
                }
                Ok(klines)
            })
            .await;

        match result {
            Ok(klines) => {
                debug!(symbol, timeframe, count = klines.len(), "klines fetched");
                klines
            }
            Err(err) => {
                warn!(symbol, timeframe, error = %err, "fetch_ohlcv failed — returning empty series");
                Vec::new()
            }
        }
    }

    #[instrument(skip(self), name = "binance::get_balance")]
    async fn get_balance(&self) -> Result<HashMap<String, Balance>, EngineError> {
        let account = self.limiter.gate(self.get_account()).await.map_err(EngineError::GatewayTransient)?;
        let balances = account["balances"]
            .as_array()
            .context("account response missing 'balances' array")
            .map_err(EngineError::GatewayTransient)?;

        let mut out = HashMap::with_capacity(balances.len());
        for b in balances {
            let asset = match b["asset"].as_str() {
                Some(a) => a.to_string(),
                None => continue,
            };
            let free = Self::parse_str_f64(&b["free"]).unwrap_or(0.0);
            let locked = Self::parse_str_f64(&b["locked"]).unwrap_or(0.0);
            let total = free + locked;
            if total > 0.0 {
                out.insert(asset, Balance { free, locked, total });
            }
        }

        debug!(count = out.len(), "balances retrieved");
        Ok(out)
    }

    #[instrument(skip(self, price), name = "binance::place_order")]
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        price: Option<f64>,
    ) -> Result<FilledOrder, EngineError> {
        if !self.limiter.can_place_order() || !self.limiter.can_send_request(WEIGHT_ORDER) {
            return Err(EngineError::GatewayTransient(anyhow!("order blocked by local rate-limit guard")));
        }

        let params = format!("symbol={symbol}&side={}&type=MARKET&quantity={amount}", side.as_str());
        // `price` is accepted for trait forward-compatibility with a future
        // limit-order mode; market orders never include it in the request.
        let _ = price;

        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        debug!(symbol, side = side.as_str(), amount, "placing market order");

        let (status, body) = self
            .limiter
            .gate(async {
                let resp = self.client.post(&url).send().await.context("POST /api/v3/order request failed")?;
                self.limiter.update_from_headers(resp.headers());
                let status = resp.status();
                let body: serde_json::Value = resp.json().await.context("failed to parse order response")?;
                Ok((status, body))
            })
            .await
            .map_err(EngineError::GatewayTransient)?;

        if !status.is_success() {
            let err = anyhow!("Binance POST /api/v3/order returned {}: {}", status, body);
            // A 4xx means the venue rejected the order itself (invalid
            // quantity, insufficient balance, ...); anything else (network
            // failure surfaced as 5xx) is transient and worth retrying.
            return if status.is_client_error() {
                Err(EngineError::GatewayRejection(err))
            } else {
                Err(EngineError::GatewayTransient(err))
            };
        }

        self.limiter.record_order_sent();

        let id = body["orderId"].as_u64();
        let price = body.get("price").and_then(|v| Self::parse_str_f64(v).ok()).filter(|p| *p > 0.0);
        let filled = body
            .get("executedQty")
            .and_then(|v| Self::parse_str_f64(v).ok())
            .filter(|q| *q > 0.0);
        let cost = body
            .get("cummulativeQuoteQty")
            .and_then(|v| Self::parse_str_f64(v).ok())
            .filter(|c| *c > 0.0);

        // `average` isn't a top-level field on Binance's response; derive it
        // from cost/filled when both are present.
        let average = match (cost, filled) {
            (Some(c), Some(f)) if f > 0.0 => Some(c / f),
            _ => None,
        };

        debug!(symbol, side = side.as_str(), "order placed successfully");
        Ok(FilledOrder { id, price, average, filled, amount, cost })
    }
}

impl std::fmt::Debug for BinanceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceGateway")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_flag_selects_base_url() {
        let live = BinanceGateway::new("k", "s", false);
        assert_eq!(live.base_url, LIVE_BASE_URL);

        let sandbox = BinanceGateway::new("k", "s", true);
        assert_eq!(sandbox.base_url, SANDBOX_BASE_URL);
    }

    #[test]
    fn debug_impl_redacts_credentials() {
        let gw = BinanceGateway::new("my-api-key", "my-secret", false);
        let out = format!("{gw:?}");
        assert!(!out.contains("my-api-key"));
        assert!(!out.contains("my-secret"));
    }

    #[test]
    fn signing_is_deterministic_for_fixed_input() {
        let gw = BinanceGateway::new("k", "topsecret", false);
        let a = gw.sign("symbol=BTCUSDT&timestamp=1");
        let b = gw.sign("symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_ne!(a, gw.sign("symbol=ETHUSDT&timestamp=1"));
    }

    #[test]
    fn parse_str_f64_accepts_string_or_number() {
        assert_eq!(BinanceGateway::parse_str_f64(&serde_json::json!("1.5")).unwrap(), 1.5);
        assert_eq!(BinanceGateway::parse_str_f64(&serde_json::json!(2.5)).unwrap(), 2.5);
        assert!(BinanceGateway::parse_str_f64(&serde_json::json!(null)).is_err());
    }
}
