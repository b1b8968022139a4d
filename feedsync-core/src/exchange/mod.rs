// feedsync-core/src/exchange/mod.rs

pub mod errors;
pub mod rest;
pub mod traits;
pub mod types;
pub mod utils;
pub mod ws;

pub use errors::ExchangeError;
pub use rest::BinanceRest;
pub use traits::{SnapshotSource, StreamPayload};
pub use types::{DepthUpdateMessage, KlineMessage, TradeMessage};
pub use ws::{FeedKind, FeedSpec, StreamEnd, StreamSubscriber};
