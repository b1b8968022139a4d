// service/market_data.rs
// Wires snapshot, subscription and sync loop together for each feed.

use feedsync_common::CandleSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::errors::ServiceError;
use super::flush::CandleFlusher;
use super::supervisor::Supervisor;
use super::sync_loop::{run_sync_loop, LoopExit, TickHandler, ViewLogger};
use crate::config::SyncSettings;
use crate::exchange::{
    DepthUpdateMessage, FeedKind, FeedSpec, KlineMessage, SnapshotSource, StreamSubscriber,
    TradeMessage,
};
use crate::projection::{
    CandleSeries, OrderBook, Projection, ProjectionReader, ProjectionWriter, TradeWindow,
};

/// Read handles of the three running pipelines
#[derive(Clone)]
pub struct Pipelines {
    pub order_book: ProjectionReader<OrderBook>,
    pub trades: ProjectionReader<TradeWindow>,
    pub candles: ProjectionReader<CandleSeries>,
}

impl Pipelines {
    /// One line per projection with its current position.
    pub fn log_summary(&self) {
        let book = self.order_book.view();
        info!(
            symbol = %book.symbol,
            last_update_id = book.last_update_id,
            phase = ?book.phase,
            gaps = book.gap_count,
            spread = ?book.spread(),
            "order book"
        );
        let trades = self.trades.view();
        info!(
            held = trades.trades.len(),
            last_id = ?trades.trades.last().map(|t| t.id),
            "trade window"
        );
        let candles = self.candles.view();
        info!(
            interval = %candles.interval,
            held = candles.candles.len(),
            flushed = candles.flush_cursor,
            "candle series"
        );
    }
}

pub struct MarketDataService {
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn CandleSink>,
    subscriber: StreamSubscriber,
    settings: SyncSettings,
    supervisor: Supervisor,
}

impl MarketDataService {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        sink: Arc<dyn CandleSink>,
        subscriber: StreamSubscriber,
        settings: SyncSettings,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            source,
            sink,
            subscriber,
            settings,
            supervisor,
        }
    }

    fn flush_every(&self) -> Duration {
        Duration::from_secs(self.settings.flush_interval_secs)
    }

    /// Start all three pipelines. Any startup failure is returned as is;
    /// pipelines already running keep running until the supervisor shuts down.
    pub async fn start_all(&self) -> Result<Pipelines, ServiceError> {
        if self.supervisor.is_shutting_down() {
            return Err(ServiceError::Task("supervisor already shut down".to_string()));
        }
        let order_book = self.start_order_book().await?;
        let trades = self.start_trades().await?;
        let candles = self.start_candles().await?;
        info!(symbol = %self.settings.symbol, "all pipelines running");
        Ok(Pipelines {
            order_book,
            trades,
            candles,
        })
    }

    /// Subscribe first, then snapshot: diffs buffered in the meantime are
    /// what lets the book bridge the snapshot's update id.
    pub async fn start_order_book(&self) -> Result<ProjectionReader<OrderBook>, ServiceError> {
        let feed = FeedSpec::new(
            &self.settings.symbol,
            FeedKind::Depth,
            self.settings.depth_channel_capacity,
        );
        let cancel = self.supervisor.child_token();
        let events = self
            .subscriber
            .subscribe::<DepthUpdateMessage>(&feed, &self.supervisor, cancel.clone())
            .await?;

        self.attach_order_book(events, cancel.clone())
            .await
            .map_err(|e| {
                cancel.cancel();
                e
            })
    }

    pub async fn start_trades(&self) -> Result<ProjectionReader<TradeWindow>, ServiceError> {
        let history = self
            .source
            .recent_trades(&self.settings.symbol, self.settings.trade_limit)
            .await?;
        let feed = FeedSpec::new(
            &self.settings.symbol,
            FeedKind::Trade,
            self.settings.trade_channel_capacity,
        );
        let cancel = self.supervisor.child_token();
        let events = self
            .subscriber
            .subscribe::<TradeMessage>(&feed, &self.supervisor, cancel.clone())
            .await?;

        Ok(self.attach_trades(history, events, cancel))
    }

    pub async fn start_candles(&self) -> Result<ProjectionReader<CandleSeries>, ServiceError> {
        let interval = self.settings.kline_interval.clone();
        let history = self
            .source
            .klines(&self.settings.symbol, &interval, self.settings.kline_limit)
            .await?;
        let feed = FeedSpec::new(
            &self.settings.symbol,
            FeedKind::Kline { interval },
            self.settings.kline_channel_capacity,
        );
        let cancel = self.supervisor.child_token();
        let events = self
            .subscriber
            .subscribe::<KlineMessage>(&feed, &self.supervisor, cancel.clone())
            .await?;

        Ok(self.attach_candles(history, events, cancel))
    }

    /// Seed the book from REST and start its loop on an existing diff stream.
    pub async fn attach_order_book(
        &self,
        events: mpsc::Receiver<<OrderBook as Projection>::Event>,
        cancel: CancellationToken,
    ) -> Result<ProjectionReader<OrderBook>, ServiceError> {
        let snapshot = self
            .source
            .depth_snapshot(&self.settings.symbol, self.settings.depth_limit)
            .await?;
        info!(
            symbol = %snapshot.symbol,
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "order book snapshot loaded"
        );

        let book = OrderBook::from_snapshot(snapshot);
        Ok(self.spawn_loop("order_book", book, events, ViewLogger::new("order_book"), cancel))
    }

    pub fn attach_trades(
        &self,
        history: Vec<feedsync_common::Trade>,
        events: mpsc::Receiver<feedsync_common::Trade>,
        cancel: CancellationToken,
    ) -> ProjectionReader<TradeWindow> {
        info!(symbol = %self.settings.symbol, seeded = history.len(), "trade window seeded");
        let window = TradeWindow::from_snapshot(history, self.settings.trade_window);
        self.spawn_loop("trades", window, events, ViewLogger::new("trades"), cancel)
    }

    pub fn attach_candles(
        &self,
        history: Vec<feedsync_common::Candle>,
        events: mpsc::Receiver<feedsync_common::Candle>,
        cancel: CancellationToken,
    ) -> ProjectionReader<CandleSeries> {
        let series = CandleSeries::from_history(
            &self.settings.symbol,
            &self.settings.kline_interval,
            history,
            self.settings.candle_eligibility,
        );
        info!(
            symbol = %self.settings.symbol,
            interval = %self.settings.kline_interval,
            seeded = series.len(),
            "candle series seeded"
        );
        let flusher = CandleFlusher::new(
            Arc::clone(&self.sink),
            self.settings.truncate_on_shutdown,
        );
        self.spawn_loop("candles", series, events, flusher, cancel)
    }

    fn spawn_loop<P, H>(
        &self,
        label: &'static str,
        projection: P,
        events: mpsc::Receiver<P::Event>,
        handler: H,
        cancel: CancellationToken,
    ) -> ProjectionReader<P>
    where
        P: Projection,
        H: TickHandler<P> + 'static,
    {
        let writer = ProjectionWriter::new(projection);
        let reader = writer.reader();
        let flush_every = self.flush_every();

        self.supervisor.spawn(async move {
            let (exit, stats) =
                run_sync_loop(label, writer, events, handler, flush_every, cancel).await;
            match exit {
                LoopExit::StreamClosed => warn!(
                    pipeline = %label,
                    applied = stats.applied,
                    discarded = stats.discarded,
                    "stream ended; pipeline stopped"
                ),
                LoopExit::Cancelled => info!(
                    pipeline = %label,
                    applied = stats.applied,
                    discarded = stats.discarded,
                    ticks = stats.ticks,
                    "pipeline stopped"
                ),
            }
        });
        reader
    }
}
