pub mod buffer;
pub mod cache;
pub mod chain;
pub mod error;
mod flusher;
pub mod layer;
pub mod types;
pub mod write_through;

pub use cache::Cache;
pub use chain::Chain;
pub use error::{CacheError, Result};
pub use layer::{Layer, LayerRef};
pub use types::{
    CacheConfig, CacheKey, CacheValue, FlusherState, LayerStatsSnapshot, Operation, Pending,
};
pub use write_through::WriteThrough;
