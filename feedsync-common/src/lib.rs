// feedsync-common/src/lib.rs
// Shared records and the persistent candle sink

pub mod data;

pub use data::types::{
    Candle, DataError, DataResult, DepthSnapshot, DepthUpdate, PriceLevel, Trade,
};
pub use data::{CandleSink, KlineRepository};
