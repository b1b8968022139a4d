// projection/trade_window.rs

use feedsync_common::Trade;
use std::collections::VecDeque;
use std::fmt;

use super::{ApplyOutcome, Projection};

/// Fixed-capacity FIFO of the latest trades in arrival order.
#[derive(Debug, Clone)]
pub struct TradeWindow {
    capacity: usize,
    trades: VecDeque<Trade>,
}

impl TradeWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            trades: VecDeque::with_capacity(capacity),
        }
    }

    /// Seed with the newest `capacity` trades of `history` (oldest first).
    pub fn from_snapshot(history: Vec<Trade>, capacity: usize) -> Self {
        let mut window = Self::new(capacity);
        let skip = history.len().saturating_sub(window.capacity);
        window.trades.extend(history.into_iter().skip(skip));
        window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Evict the oldest entry when full, then append.
    pub fn push(&mut self, trade: Trade) {
        if self.trades.len() >= self.capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }
}

impl Projection for TradeWindow {
    type Event = Trade;
    type View = TradeWindowView;

    fn apply(&mut self, event: Trade) -> ApplyOutcome {
        self.push(event);
        ApplyOutcome::Applied
    }

    fn view(&self) -> TradeWindowView {
        TradeWindowView {
            capacity: self.capacity,
            trades: self.trades.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeWindowView {
    pub capacity: usize,
    /// Oldest first
    pub trades: Vec<Trade>,
}

impl fmt::Display for TradeWindowView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trades {}/{}", self.trades.len(), self.capacity)?;
        if let (Some(first), Some(last)) = (self.trades.first(), self.trades.last()) {
            write!(
                f,
                " | ids {}..{} | last {} x {} ({})",
                first.id,
                last.id,
                last.price,
                last.quantity,
                if last.is_buyer_maker { "sell" } else { "buy" }
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(id: u64) -> Trade {
        Trade {
            id,
            price: dec!(100) + Decimal::from(id),
            quantity: dec!(0.5),
            quote_quantity: dec!(50),
            time: 1_000 + id as i64,
            is_buyer_maker: id % 2 == 0,
            is_best_match: true,
        }
    }

    fn ids(window: &TradeWindow) -> Vec<u64> {
        window.view().trades.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_capacity_two_keeps_latest() {
        let mut window = TradeWindow::new(2);
        for id in [1, 2, 3] {
            window.apply(trade(id));
        }
        assert_eq!(ids(&window), vec![2, 3]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut window = TradeWindow::from_snapshot((1..=5).map(trade).collect(), 5);
        for id in 6..=40 {
            window.push(trade(id));
            assert!(window.len() <= window.capacity());
        }
        let view = ids(&window);
        assert!(!view.contains(&1));
        assert_eq!(view.last(), Some(&40));
    }

    #[test]
    fn test_arrival_order_is_authoritative() {
        let mut window = TradeWindow::new(3);
        window.push(trade(9));
        window.push(trade(4));
        window.push(trade(4));
        assert_eq!(ids(&window), vec![9, 4, 4]);
    }

    #[test]
    fn test_snapshot_keeps_newest() {
        let window = TradeWindow::from_snapshot((1..=10).map(trade).collect(), 3);
        assert_eq!(ids(&window), vec![8, 9, 10]);

        let short = TradeWindow::from_snapshot(vec![trade(1)], 3);
        assert_eq!(short.len(), 1);
        assert!(TradeWindow::new(0).capacity() == 1);
    }

    #[test]
    fn test_view_display() {
        let window = TradeWindow::from_snapshot(vec![trade(1), trade(2)], 4);
        assert_eq!(window.view().to_string(), "trades 2/4 | ids 1..2 | last 102 x 0.5 (sell)");
        assert_eq!(TradeWindow::new(4).view().to_string(), "trades 0/4");
    }
}
