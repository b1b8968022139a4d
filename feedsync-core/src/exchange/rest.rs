// ====
// Binance spot REST client
// ====
// Snapshot endpoints used to seed the projections, plus the
// connectivity checks run before the pipelines start.
// ====

use async_trait::async_trait;
use feedsync_common::{Candle, DepthSnapshot, Trade};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::errors::ExchangeError;
use super::traits::SnapshotSource;
use super::types::{parse_kline_row, DepthSnapshotResponse, RestTrade, ServerTimeResponse};
use crate::config::ExchangeSettings;

const PING_PATH: &str = "/api/v3/ping";
const TIME_PATH: &str = "/api/v3/time";
const DEPTH_PATH: &str = "/api/v3/depth";
const TRADES_PATH: &str = "/api/v3/trades";
const KLINES_PATH: &str = "/api/v3/klines";

/// Binance REST connector
pub struct BinanceRest {
    /// HTTP client
    client: Client,
    /// API base URL
    base_url: Url,
}

impl BinanceRest {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&settings.rest_url)?,
        })
    }

    /// Build `base + path?params`
    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ExchangeError> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ExchangeError> {
        debug!("GET {}", url);
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(body)
    }

    // ====================================================================
    // CONNECTIVITY
    // ====================================================================

    pub async fn ping(&self) -> Result<(), ExchangeError> {
        let url = self.endpoint(PING_PATH, &[])?;
        let _: Value = self.get_json(url).await?;
        Ok(())
    }

    /// Exchange clock in epoch milliseconds
    pub async fn server_time(&self) -> Result<i64, ExchangeError> {
        let url = self.endpoint(TIME_PATH, &[])?;
        let body: ServerTimeResponse = self.get_json(url).await?;
        Ok(body.server_time)
    }
}

#[async_trait]
impl SnapshotSource for BinanceRest {
    async fn depth_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshot, ExchangeError> {
        let url = self.endpoint(
            DEPTH_PATH,
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )?;
        let body: DepthSnapshotResponse = self.get_json(url).await?;
        body.into_snapshot(symbol)
    }

    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Trade>, ExchangeError> {
        let url = self.endpoint(
            TRADES_PATH,
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )?;
        let body: Vec<RestTrade> = self.get_json(url).await?;
        body.into_iter().map(Trade::try_from).collect()
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = self.endpoint(
            KLINES_PATH,
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        let rows: Vec<Vec<Value>> = self.get_json(url).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        rows.iter().map(|row| parse_kline_row(row, now_ms)).collect()
    }
}
