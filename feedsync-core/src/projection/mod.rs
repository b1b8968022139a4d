// feedsync-core/src/projection/mod.rs
//
// A projection is mutated by exactly one task through its `ProjectionWriter`.
// Everyone else holds a `ProjectionReader`, which only hands out copies.

pub mod candles;
pub mod order_book;
pub mod trade_window;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub use candles::{CandleEligibility, CandleSeries, CandleSeriesView};
pub use order_book::{OrderBook, OrderBookView, SyncPhase};
pub use trade_window::{TradeWindow, TradeWindowView};

/// Why an event left the projection untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// `final_update_id <= last_update_id`
    Stale { final_update_id: u64, last_update_id: u64 },
    /// Still bootstrapping and the diff does not straddle `last_update_id + 1`
    AwaitingSync { first_update_id: u64, final_update_id: u64, expected: u64 },
    /// Synchronized but `first_update_id != last_update_id + 1`
    Gap { expected: u64, first_update_id: u64 },
    /// Candle older than the last one in the series
    OutOfOrder { open_time: i64, last_open_time: i64 },
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::Stale { final_update_id, last_update_id } => {
                write!(f, "stale diff (final {} <= last {})", final_update_id, last_update_id)
            }
            DiscardReason::AwaitingSync { first_update_id, final_update_id, expected } => write!(
                f,
                "diff {}..={} does not contain {} yet",
                first_update_id, final_update_id, expected
            ),
            DiscardReason::Gap { expected, first_update_id } => {
                write!(f, "sequence gap (expected {}, got {})", expected, first_update_id)
            }
            DiscardReason::OutOfOrder { open_time, last_open_time } => {
                write!(f, "candle {} older than last {}", open_time, last_open_time)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Discarded(DiscardReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// In-memory state advanced one event at a time.
pub trait Projection: Send + 'static {
    type Event: Send + 'static;
    /// Owned copy handed to readers
    type View: Send + 'static;

    fn apply(&mut self, event: Self::Event) -> ApplyOutcome;
    fn view(&self) -> Self::View;
}

/// The single mutating handle. Deliberately not `Clone`.
pub struct ProjectionWriter<P> {
    inner: Arc<Mutex<P>>,
}

/// Cloneable read-only handle.
pub struct ProjectionReader<P> {
    inner: Arc<Mutex<P>>,
}

impl<P: Projection> ProjectionWriter<P> {
    pub fn new(projection: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(projection)),
        }
    }

    pub fn apply(&mut self, event: P::Event) -> ApplyOutcome {
        self.inner.lock().apply(event)
    }

    /// Run `f` with exclusive access. Keep it short: readers wait on the same lock.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    pub fn view(&self) -> P::View {
        self.inner.lock().view()
    }

    pub fn reader(&self) -> ProjectionReader<P> {
        ProjectionReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Projection> ProjectionReader<P> {
    pub fn view(&self) -> P::View {
        self.inner.lock().view()
    }
}

impl<P> Clone for ProjectionReader<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
