// service/sync_loop.rs
// ====
// Synchronization Loop
// One consumer per projection. Cancellation, the event channel and the
// flush timer are the only three things it waits on; every mutation and
// every flush of the projection happens here, one at a time.
// ====

use async_trait::async_trait;
use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::projection::{ApplyOutcome, DiscardReason, Projection, ProjectionWriter};

/// Work done on the loop's timer arm and once on cancellation.
#[async_trait]
pub trait TickHandler<P: Projection>: Send {
    async fn on_tick(&mut self, projection: &mut ProjectionWriter<P>);

    async fn on_shutdown(&mut self, _projection: &mut ProjectionWriter<P>) {}
}

/// Logs the projection's view on every tick.
pub struct ViewLogger<P> {
    label: String,
    _projection: PhantomData<fn() -> P>,
}

impl<P> ViewLogger<P> {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            _projection: PhantomData,
        }
    }
}

#[async_trait]
impl<P> TickHandler<P> for ViewLogger<P>
where
    P: Projection,
    P::View: Display,
{
    async fn on_tick(&mut self, projection: &mut ProjectionWriter<P>) {
        let view = projection.view();
        info!(pipeline = %self.label, "{}", view);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    StreamClosed,
}

/// Counters kept by one loop run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub applied: u64,
    pub discarded: u64,
    pub ticks: u64,
}

/// Drain `events` into the projection until cancelled or the stream ends.
pub async fn run_sync_loop<P, H>(
    label: &str,
    mut projection: ProjectionWriter<P>,
    mut events: mpsc::Receiver<P::Event>,
    mut handler: H,
    flush_every: Duration,
    cancel: CancellationToken,
) -> (LoopExit, LoopStats)
where
    P: Projection,
    H: TickHandler<P>,
{
    // First tick one full period after start, not immediately.
    let mut ticker = time::interval_at(Instant::now() + flush_every, flush_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = LoopStats::default();

    let exit = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                handler.on_shutdown(&mut projection).await;
                break LoopExit::Cancelled;
            }
            // Ahead of the channel so a backlogged feed cannot starve the timer.
            _ = ticker.tick() => {
                stats.ticks += 1;
                handler.on_tick(&mut projection).await;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    // Last chance to hand out what the final events made eligible.
                    handler.on_tick(&mut projection).await;
                    break LoopExit::StreamClosed;
                };
                match projection.apply(event) {
                    ApplyOutcome::Applied => stats.applied += 1,
                    ApplyOutcome::Discarded(reason) => {
                        stats.discarded += 1;
                        log_discard(label, &reason);
                    }
                }
            }
        }
    };

    debug!(pipeline = %label, exit = ?exit, "sync loop exiting");
    (exit, stats)
}

fn log_discard(label: &str, reason: &DiscardReason) {
    match reason {
        DiscardReason::Gap { .. } => warn!(pipeline = %label, "{}; book not resynchronized", reason),
        DiscardReason::OutOfOrder { .. } => warn!(pipeline = %label, "{}; dropped", reason),
        _ => debug!(pipeline = %label, "{}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{CandleEligibility, CandleSeries, OrderBook, TradeWindow};
    use feedsync_common::{Candle, DepthUpdate, Trade};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn trade(id: u64) -> Trade {
        Trade {
            id,
            price: dec!(10),
            quantity: dec!(1),
            quote_quantity: dec!(10),
            time: id as i64,
            is_buyer_maker: false,
            is_best_match: true,
        }
    }

    fn candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
            quote_volume: dec!(1),
            trade_count: 1,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: false,
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl TickHandler<CandleSeries> for NoopHandler {
        async fn on_tick(&mut self, _projection: &mut ProjectionWriter<CandleSeries>) {}
    }

    #[derive(Default)]
    struct CountingHandler {
        ticks: Arc<AtomicU64>,
        shutdowns: Arc<AtomicU64>,
    }

    #[async_trait]
    impl TickHandler<TradeWindow> for CountingHandler {
        async fn on_tick(&mut self, _projection: &mut ProjectionWriter<TradeWindow>) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_shutdown(&mut self, _projection: &mut ProjectionWriter<TradeWindow>) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_channel_closure_ends_loop_after_draining() {
        let writer = ProjectionWriter::new(TradeWindow::new(2));
        let reader = writer.reader();
        let (tx, rx) = mpsc::channel(4);
        for id in 1..=3 {
            tx.send(trade(id)).await.unwrap();
        }
        drop(tx);

        let handler = CountingHandler::default();
        let ticks = Arc::clone(&handler.ticks);
        let shutdowns = Arc::clone(&handler.shutdowns);
        let (exit, stats) = run_sync_loop(
            "trades",
            writer,
            rx,
            handler,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, LoopExit::StreamClosed);
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.ticks, 0);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
        let ids: Vec<u64> = reader.view().trades.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_handler_and_cancel_runs_shutdown() {
        let handler = CountingHandler::default();
        let ticks = Arc::clone(&handler.ticks);
        let shutdowns = Arc::clone(&handler.shutdowns);
        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<Trade>(1);

        let task = tokio::spawn(run_sync_loop(
            "trades",
            ProjectionWriter::new(TradeWindow::new(5)),
            rx,
            handler,
            Duration::from_secs(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        cancel.cancel();
        let (exit, stats) = task.await.unwrap();
        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(stats.ticks, 3);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discarded_diffs_are_counted() {
        let writer = ProjectionWriter::new(OrderBook::new("BTCUSDT"));
        let reader = writer.reader();
        let (tx, rx) = mpsc::channel(4);
        let diff = |first, last| DepthUpdate {
            symbol: "BTCUSDT".to_string(),
            event_time: 0,
            first_update_id: first,
            final_update_id: last,
            bids: vec![],
            asks: vec![],
        };
        tx.send(diff(1, 3)).await.unwrap();
        tx.send(diff(5, 6)).await.unwrap();
        tx.send(diff(2, 3)).await.unwrap();
        drop(tx);

        let (_, stats) = run_sync_loop(
            "book",
            writer,
            rx,
            ViewLogger::new("book"),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.discarded, 2);
        assert_eq!(reader.view().last_update_id, 3);
        assert_eq!(reader.view().gap_count, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_candles_are_counted_as_discarded() {
        let writer = ProjectionWriter::new(CandleSeries::new("BTCUSDT", "1m", CandleEligibility::ClosedFlag));
        let reader = writer.reader();
        let (tx, rx) = mpsc::channel(4);
        tx.send(candle(60_000)).await.unwrap();
        tx.send(candle(0)).await.unwrap();
        tx.send(candle(120_000)).await.unwrap();
        drop(tx);

        let (_, stats) = run_sync_loop(
            "candles",
            writer,
            rx,
            NoopHandler,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(stats.applied, 2);
        assert_eq!(stats.discarded, 1);
        let open_times: Vec<i64> = reader.view().candles.iter().map(|c| c.open_time).collect();
        assert_eq!(open_times, vec![60_000, 120_000]);
    }

    #[tokio::test]
    async fn test_timer_fires_while_channel_stays_backlogged() {
        let handler = CountingHandler::default();
        let ticks = Arc::clone(&handler.ticks);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);

        let producer = tokio::spawn(async move {
            let mut id = 0;
            while tx.send(trade(id)).await.is_ok() {
                id += 1;
            }
        });
        let task = tokio::spawn(run_sync_loop(
            "trades",
            ProjectionWriter::new(TradeWindow::new(5)),
            rx,
            handler,
            Duration::from_millis(50),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(180)).await;
        cancel.cancel();
        let (exit, stats) = task.await.unwrap();
        producer.await.unwrap();

        assert_eq!(exit, LoopExit::Cancelled);
        assert!(stats.ticks >= 2);
        assert_eq!(ticks.load(Ordering::SeqCst), stats.ticks);
        assert!(stats.applied > 0);
    }
}
