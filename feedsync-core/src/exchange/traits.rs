// exchange/traits.rs

use async_trait::async_trait;
use feedsync_common::{Candle, DepthSnapshot, Trade};
use serde::de::DeserializeOwned;

use crate::exchange::errors::ExchangeError;

/// Point-in-time state used to seed each projection
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Order book with its `lastUpdateId`
    async fn depth_snapshot(&self, symbol: &str, limit: u32)
        -> Result<DepthSnapshot, ExchangeError>;

    /// Most recent trades, oldest first
    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Trade>, ExchangeError>;

    /// Candle history, ascending by open time
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// A raw stream message schema that can be filtered and turned into a typed event.
pub trait StreamPayload: DeserializeOwned + Send + 'static {
    type Event: Send + 'static;

    /// Value of the `e` field this feed carries
    const EVENT_TYPE: &'static str;

    fn event_type(&self) -> &str;
    fn symbol(&self) -> &str;
    fn into_event(self) -> Result<Self::Event, ExchangeError>;

    /// Kind/symbol predicate applied before conversion
    fn accepts(&self, symbol: &str) -> bool {
        self.event_type() == Self::EVENT_TYPE && self.symbol().eq_ignore_ascii_case(symbol)
    }
}
