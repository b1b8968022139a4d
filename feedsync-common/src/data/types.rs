// feedsync-common/src/data/types.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =================================================================
// Errors
// =================================================================

/// Data layer error types
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type DataResult<T> = Result<T, DataError>;

// =================================================================
// Order book records
// =================================================================

/// One (price, quantity) pair of a book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Point-in-time book fetched over REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Incremental book change covering the id range `first_update_id..=final_update_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub symbol: String,
    pub event_time: i64,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

// =================================================================
// Trades & candles
// =================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    /// Trade time in epoch milliseconds
    pub time: i64,
    pub is_buyer_maker: bool,
    pub is_best_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Epoch milliseconds, unique key within one series
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    /// Set by the exchange once the interval is over
    pub is_closed: bool,
}

impl Candle {
    /// Open, high, low, close and volume as floats, in sink column order.
    pub fn ohlcv_f64(&self) -> Option<[f64; 5]> {
        use rust_decimal::prelude::ToPrimitive;

        Some([
            self.open.to_f64()?,
            self.high.to_f64()?,
            self.low.to_f64()?,
            self.close.to_f64()?,
            self.volume.to_f64()?,
        ])
    }
}
