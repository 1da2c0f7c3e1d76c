//! Binance klines as an `ExchangeGateway`.
//!
//! Historical/live candle fetch only — no order book, no WebSocket stream,
//! no price ticker. Wrapped in the same circuit breaker the teacher uses for
//! its Binance market-data client.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::errors::GatewayError;
use crate::domain::market::candle::RawCandle;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::ExchangeGateway;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};

pub struct BinanceGateway {
    client: ClientWithMiddleware,
    base_url: String,
    circuit_breaker: CircuitBreaker,
}

impl BinanceGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
            circuit_breaker: CircuitBreaker::new("BinanceGateway", 5, 3, Duration::from_secs(60)),
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
        if status.as_u16() == 429 || status.as_u16() == 418 || status.is_server_error() {
            GatewayError::Transient(format!("binance returned {status}: {body}"))
        } else if status.is_client_error() {
            GatewayError::Permanent(format!("binance returned {status}: {body}"))
        } else {
            GatewayError::Unknown(format!("binance returned {status}: {body}"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn list_symbols(&self, _exchange_id: &str) -> Result<Vec<String>, GatewayError> {
        self.circuit_breaker
            .call(async {
                let url = format!("{}/api/v3/exchangeInfo", self.base_url);
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| GatewayError::Transient(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Self::classify_status(status, &body));
                }

                let info: ExchangeInfo = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Unknown(format!("malformed exchangeInfo: {e}")))?;

                Ok(info
                    .symbols
                    .into_iter()
                    .filter(|s| s.status == "TRADING")
                    .map(|s| s.symbol)
                    .collect())
            })
            .await
            .map_err(unwrap_circuit)
    }

    async fn list_timeframes(
        &self,
        _exchange_id: &str,
    ) -> Result<Vec<(Timeframe, i64)>, GatewayError> {
        Ok(Timeframe::all()
            .into_iter()
            .map(|tf| (tf, tf.to_seconds()))
            .collect())
    }

    async fn fetch_candles(
        &self,
        _exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawCandle>, GatewayError> {
        self.circuit_breaker
            .call(async {
                let url = format!("{}/api/v3/klines", self.base_url);

                let start_ms_str = since.timestamp_millis().to_string();
                let end_ms_str = until.timestamp_millis().to_string();
                let limit_str = limit.to_string();

                let url_with_query = build_url_with_query(
                    &url,
                    &[
                        ("symbol", symbol),
                        ("interval", timeframe.to_binance_string()),
                        ("startTime", start_ms_str.as_str()),
                        ("endTime", end_ms_str.as_str()),
                        ("limit", limit_str.as_str()),
                    ],
                );

                let response = self
                    .client
                    .get(&url_with_query)
                    .send()
                    .await
                    .map_err(|e| GatewayError::Transient(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Self::classify_status(status, &body));
                }

                let klines: Vec<serde_json::Value> = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Unknown(format!("malformed klines response: {e}")))?;

                let mut candles = Vec::with_capacity(klines.len());
                for k in &klines {
                    let Some(candle) = parse_kline(k) else {
                        warn!("BinanceGateway: skipping malformed kline entry for {symbol}");
                        continue;
                    };
                    candles.push(candle);
                }

                debug!(symbol, count = candles.len(), "BinanceGateway: fetched klines");
                Ok(candles)
            })
            .await
            .map_err(unwrap_circuit)
    }
}

fn parse_kline(k: &serde_json::Value) -> Option<RawCandle> {
    let arr = k.as_array()?;
    if arr.len() < 6 {
        return None;
    }

    let open_time_ms = arr[0].as_i64()?;
    let open_time = DateTime::<Utc>::from_timestamp_millis(open_time_ms)?;

    Some(RawCandle {
        open_time,
        open: Decimal::from_str(arr[1].as_str()?).ok()?,
        high: Decimal::from_str(arr[2].as_str()?).ok()?,
        low: Decimal::from_str(arr[3].as_str()?).ok()?,
        close: Decimal::from_str(arr[4].as_str()?).ok()?,
        volume: Decimal::from_str(arr[5].as_str()?).ok()?,
    })
}

fn unwrap_circuit(e: CircuitBreakerError<GatewayError>) -> GatewayError {
    match e {
        CircuitBreakerError::Open(msg) => GatewayError::Transient(format!("circuit open: {msg}")),
        CircuitBreakerError::Inner(inner) => inner,
    }
}
