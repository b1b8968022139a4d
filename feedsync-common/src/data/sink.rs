use async_trait::async_trait;

use super::types::{Candle, DataResult};

/// Persistent destination for flushed candles.
///
/// Implementations must accept concurrent batch writes from several flush
/// schedulers. A batch is written atomically: either every candle of the
/// slice is stored or none is.
#[async_trait]
pub trait CandleSink: Send + Sync {
    /// Store a batch in one transaction, returning the number of rows written.
    async fn insert_batch(&self, symbol: &str, interval: &str, candles: &[Candle])
        -> DataResult<usize>;

    /// Remove every stored candle, returning the number of rows deleted.
    async fn truncate_all(&self) -> DataResult<u64>;
}
