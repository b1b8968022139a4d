pub mod repository;
pub mod sink;
pub mod types;

pub use repository::KlineRepository;
pub use sink::CandleSink;
