use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::GatewayError;
use super::market::candle::RawCandle;
use super::market::timeframe::Timeframe;

/// The ExchangeGateway capability (§6.1). Modeled only by the contract the
/// core needs; a concrete exchange SDK/HTTP client implements this trait.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn list_symbols(&self, exchange_id: &str) -> Result<Vec<String>, GatewayError>;

    async fn list_timeframes(
        &self,
        exchange_id: &str,
    ) -> Result<Vec<(Timeframe, i64)>, GatewayError>;

    /// Returns candles sorted by `open_time` ascending. The gateway MAY
    /// return fewer than `limit` candles and MAY cap `until` silently.
    async fn fetch_candles(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawCandle>, GatewayError>;
}
