// service/flush.rs
// Flush Scheduler: periodically moves eligible candles from the series into
// the sink. Runs on the sync loop's timer arm, so extraction never overlaps
// an update of the same series.

use async_trait::async_trait;
use feedsync_common::CandleSink;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::sync_loop::TickHandler;
use crate::projection::{CandleSeries, ProjectionWriter};

pub struct CandleFlusher {
    sink: Arc<dyn CandleSink>,
    truncate_on_shutdown: bool,
    flushed: u64,
}

impl CandleFlusher {
    pub fn new(sink: Arc<dyn CandleSink>, truncate_on_shutdown: bool) -> Self {
        Self {
            sink,
            truncate_on_shutdown,
            flushed: 0,
        }
    }

    /// Candles written since start
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Extract and write one batch. A failed write is logged and the batch
    /// dropped; the cursor has already moved past it.
    pub async fn flush(&mut self, series: &mut ProjectionWriter<CandleSeries>) -> usize {
        let (symbol, interval, batch) = series.with_mut(|s| {
            (
                s.symbol().to_string(),
                s.interval().to_string(),
                s.extract_unflushed(),
            )
        });
        if batch.is_empty() {
            debug!(%symbol, %interval, "no closed candles to flush");
            return 0;
        }

        match self.sink.insert_batch(&symbol, &interval, &batch).await {
            Ok(written) => {
                self.flushed += written as u64;
                info!(%symbol, %interval, written, total = self.flushed, "flushed candles");
                written
            }
            Err(e) => {
                error!(
                    %symbol,
                    %interval,
                    lost = batch.len(),
                    first_open_time = batch[0].open_time,
                    "candle flush failed: {}",
                    e
                );
                0
            }
        }
    }
}

#[async_trait]
impl TickHandler<CandleSeries> for CandleFlusher {
    async fn on_tick(&mut self, series: &mut ProjectionWriter<CandleSeries>) {
        self.flush(series).await;
    }

    async fn on_shutdown(&mut self, series: &mut ProjectionWriter<CandleSeries>) {
        self.flush(series).await;

        if self.truncate_on_shutdown {
            match self.sink.truncate_all().await {
                Ok(deleted) => warn!(deleted, "kline store truncated on shutdown"),
                Err(e) => error!("failed to truncate kline store: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::CandleEligibility;
    use feedsync_common::{Candle, DataError, DataResult};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<(String, String, i64)>>,
        fail: bool,
        truncated: Mutex<bool>,
    }

    #[async_trait]
    impl CandleSink for MemorySink {
        async fn insert_batch(
            &self,
            symbol: &str,
            interval: &str,
            candles: &[Candle],
        ) -> DataResult<usize> {
            if self.fail {
                return Err(DataError::Validation("disk full".to_string()));
            }
            let mut rows = self.rows.lock();
            for candle in candles {
                rows.push((symbol.to_string(), interval.to_string(), candle.open_time));
            }
            Ok(candles.len())
        }

        async fn truncate_all(&self) -> DataResult<u64> {
            let mut rows = self.rows.lock();
            let deleted = rows.len() as u64;
            rows.clear();
            *self.truncated.lock() = true;
            Ok(deleted)
        }
    }

    fn candle(open_time: i64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(2),
            volume: dec!(3),
            quote_volume: dec!(6),
            trade_count: 4,
            taker_buy_base_volume: dec!(1),
            taker_buy_quote_volume: dec!(2),
            is_closed,
        }
    }

    fn writer(candles: Vec<Candle>) -> ProjectionWriter<CandleSeries> {
        ProjectionWriter::new(CandleSeries::from_history(
            "BTCUSDT",
            "1m",
            candles,
            CandleEligibility::ClosedFlag,
        ))
    }

    #[tokio::test]
    async fn test_each_closed_candle_is_written_once() {
        let sink = Arc::new(MemorySink::default());
        let mut flusher = CandleFlusher::new(sink.clone(), false);
        let mut series = writer(vec![candle(0, true), candle(60_000, true), candle(120_000, false)]);

        assert_eq!(flusher.flush(&mut series).await, 2);
        assert_eq!(flusher.flush(&mut series).await, 0);

        series.apply(candle(120_000, true));
        assert_eq!(flusher.flush(&mut series).await, 1);

        let rows = sink.rows.lock().clone();
        let open_times: Vec<i64> = rows.iter().map(|(_, _, t)| *t).collect();
        assert_eq!(open_times, vec![0, 60_000, 120_000]);
        assert_eq!(rows[0].0, "BTCUSDT");
        assert_eq!(rows[0].1, "1m");
        assert_eq!(flusher.flushed(), 3);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_rewind_cursor() {
        let sink = Arc::new(MemorySink {
            fail: true,
            ..Default::default()
        });
        let mut flusher = CandleFlusher::new(sink, false);
        let mut series = writer(vec![candle(0, true)]);

        assert_eq!(flusher.flush(&mut series).await, 0);
        assert_eq!(series.view().flush_cursor, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_then_truncates_when_enabled() {
        let sink = Arc::new(MemorySink::default());
        let mut flusher = CandleFlusher::new(sink.clone(), true);
        let mut series = writer(vec![candle(0, true)]);

        flusher.on_shutdown(&mut series).await;

        assert_eq!(flusher.flushed(), 1);
        assert!(*sink.truncated.lock());
        assert!(sink.rows.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_rows_by_default() {
        let sink = Arc::new(MemorySink::default());
        let mut flusher = CandleFlusher::new(sink.clone(), false);
        let mut series = writer(vec![candle(0, true)]);

        flusher.on_shutdown(&mut series).await;

        assert_eq!(sink.rows.lock().len(), 1);
        assert!(!*sink.truncated.lock());
    }
}
