pub mod config;
pub mod core;
pub mod remote;
pub mod storage;

// Re-export commonly used types
pub use config::{LayerConfig, LayerMode, ServerConfig, StorageConfig};
pub use core::{
    Cache, CacheConfig, CacheError, CacheKey, CacheValue, Chain, FlusherState, Layer, LayerRef,
    LayerStatsSnapshot, Operation, Result, WriteThrough,
};
pub use remote::{
    LayerServer, Message, MessageType, RemoteLayer, Response, TcpTransmitter, Transmitter,
};
pub use storage::{BackendStorage, DiskStorage, DiskStorageConfig, LruStorage, MemoryStorage};
