// feedsync-core/src/lib.rs
// Live market-state synchronization: REST snapshot + websocket stream
// reconciled into in-memory projections, candles flushed to SQLite.

pub mod config;
pub mod exchange;
pub mod logging;
pub mod projection;
pub mod service;

// Re-export feedsync-common for convenience
pub use feedsync_common::data;
