// feedsync-core/src/service/mod.rs

pub mod errors;
pub mod flush;
pub mod market_data;
pub mod supervisor;
pub mod sync_loop;

pub use errors::ServiceError;
pub use flush::CandleFlusher;
pub use market_data::{MarketDataService, Pipelines};
pub use supervisor::Supervisor;
pub use sync_loop::{run_sync_loop, LoopExit, LoopStats, TickHandler, ViewLogger};
