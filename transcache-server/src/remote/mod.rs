//! Remote Layer Module
//!
//! Carries the layer contract across a network boundary:
//! - `protocol`: message types and checksummed frame codec
//! - `transmitter`: client side request/response transport
//! - `layer`: `RemoteLayer`, a chain layer backed by a transmitter
//! - `server`: `LayerServer`, exposing a local layer over TCP

pub mod layer;
pub mod protocol;
pub mod server;
pub mod transmitter;

pub use layer::RemoteLayer;
pub use protocol::{MAX_FRAME_SIZE, Message, MessageType, Response};
pub use server::LayerServer;
pub use transmitter::{TcpTransmitter, Transmitter};
