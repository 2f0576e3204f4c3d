use super::protocol::{Message, Response, read_frame, write_frame};
use crate::core::error::{CacheError, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Request/response transport to a remote layer
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Send one message and wait for its response
    async fn request(&self, message: Message) -> Result<Response>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Transmitter over a single TCP connection.
///
/// Requests are serialized on the connection. A failed exchange drops the
/// connection and the next request dials again.
pub struct TcpTransmitter {
    address: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransmitter {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            error!("Failed to connect to {}: {}", self.address, e);
            CacheError::ConnectionFailed(format!("{}: {}", self.address, e))
        })?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", self.address);
        Ok(stream)
    }

    async fn exchange(stream: &mut TcpStream, message: &Message) -> Result<Response> {
        write_frame(stream, message).await?;
        match read_frame(stream).await? {
            Some(response) => Ok(response),
            None => Err(CacheError::ConnectionFailed(
                "connection closed by peer".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transmitter for TcpTransmitter {
    async fn request(&self, message: Message) -> Result<Response> {
        let mut guard = self.stream.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        match Self::exchange(&mut stream, &message).await {
            Ok(response) => {
                *guard = Some(stream);
                Ok(response)
            }
            Err(CacheError::IOError(e)) => {
                error!("Connection to {} lost: {}", self.address, e);
                Err(CacheError::ConnectionFailed(format!("{}: {}", self.address, e)))
            }
            Err(e) => Err(e),
        }
    }

    async fn start(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
            info!("Transmitter connected to {}", self.address);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.shutdown().await?;
            info!("Transmitter disconnected from {}", self.address);
        }
        Ok(())
    }
}
