// projection/order_book.rs

use feedsync_common::{DepthSnapshot, DepthUpdate, PriceLevel};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;

use super::{ApplyOutcome, DiscardReason, Projection};

/// Levels printed by the diagnostic view
const DISPLAY_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Waiting for the first diff that bridges the snapshot
    Bootstrapping,
    /// Every further diff must start at `last_update_id + 1`
    Synchronized,
}

/// Snapshot + diff reconciled book.
///
/// Both sides only ever hold strictly positive quantities; a zero quantity in
/// a diff deletes the level. Sequence gaps are counted but never repaired.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    last_update_id: u64,
    phase: SyncPhase,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    gap_count: u64,
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_update_id: 0,
            phase: SyncPhase::Bootstrapping,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            gap_count: 0,
        }
    }

    /// Seed from REST. Zero-quantity snapshot levels are dropped.
    pub fn from_snapshot(snapshot: DepthSnapshot) -> Self {
        let mut book = Self::new(&snapshot.symbol);
        book.last_update_id = snapshot.last_update_id;
        apply_levels(&mut book.bids, &snapshot.bids);
        apply_levels(&mut book.asks, &snapshot.asks);
        book
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    /// Merge one diff according to the current phase.
    pub fn update(&mut self, diff: &DepthUpdate) -> ApplyOutcome {
        if diff.final_update_id <= self.last_update_id {
            return ApplyOutcome::Discarded(DiscardReason::Stale {
                final_update_id: diff.final_update_id,
                last_update_id: self.last_update_id,
            });
        }

        let expected = self.last_update_id + 1;
        match self.phase {
            SyncPhase::Bootstrapping => {
                if diff.first_update_id > expected || diff.final_update_id < expected {
                    return ApplyOutcome::Discarded(DiscardReason::AwaitingSync {
                        first_update_id: diff.first_update_id,
                        final_update_id: diff.final_update_id,
                        expected,
                    });
                }
                self.phase = SyncPhase::Synchronized;
            }
            SyncPhase::Synchronized => {
                if diff.first_update_id != expected {
                    self.gap_count += 1;
                    return ApplyOutcome::Discarded(DiscardReason::Gap {
                        expected,
                        first_update_id: diff.first_update_id,
                    });
                }
            }
        }

        apply_levels(&mut self.bids, &diff.bids);
        apply_levels(&mut self.asks, &diff.asks);
        self.last_update_id = diff.final_update_id;
        ApplyOutcome::Applied
    }
}

fn apply_levels(side: &mut BTreeMap<Decimal, Decimal>, levels: &[PriceLevel]) {
    for level in levels {
        if level.quantity.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.quantity);
        }
    }
}

impl Projection for OrderBook {
    type Event = DepthUpdate;
    type View = OrderBookView;

    fn apply(&mut self, event: DepthUpdate) -> ApplyOutcome {
        self.update(&event)
    }

    fn view(&self) -> OrderBookView {
        OrderBookView {
            symbol: self.symbol.clone(),
            last_update_id: self.last_update_id,
            phase: self.phase,
            gap_count: self.gap_count,
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(price, qty)| PriceLevel::new(*price, *qty))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(price, qty)| PriceLevel::new(*price, *qty))
                .collect(),
        }
    }
}

/// Copy of the book; bids best-first (descending), asks best-first (ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookView {
    pub symbol: String,
    pub last_update_id: u64,
    pub phase: SyncPhase,
    pub gap_count: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookView {
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

impl fmt::Display for OrderBookView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} book @{} ({:?}, gaps {}, {} bids / {} asks)",
            self.symbol,
            self.last_update_id,
            self.phase,
            self.gap_count,
            self.bids.len(),
            self.asks.len()
        )?;
        for ask in self.asks.iter().take(DISPLAY_DEPTH).rev() {
            writeln!(f, "  ask {:>14} | {}", ask.price, ask.quantity)?;
        }
        if let Some(spread) = self.spread() {
            writeln!(f, "  ---- spread {}", spread)?;
        }
        for bid in self.bids.iter().take(DISPLAY_DEPTH) {
            writeln!(f, "  bid {:>14} | {}", bid.price, bid.quantity)?;
        }
        Ok(())
    }
}
