use crate::core::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted in a single frame
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Header: payload length (u32 BE) followed by its CRC32 (u32 BE)
const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Set,
    Get,
    Remove,
    Sync,
}

/// Request sent to a remote layer. Key and value are bincode-encoded;
/// unused fields are left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Message {
    pub fn get(key: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Get,
            key,
            value: Vec::new(),
        }
    }

    pub fn set(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Set,
            key,
            value,
        }
    }

    pub fn remove(key: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Remove,
            key,
            value: Vec::new(),
        }
    }

    pub fn sync() -> Self {
        Self {
            message_type: MessageType::Sync,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

/// Reply to a `Message`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub value: Option<Vec<u8>>,
    pub error: Option<String>,
    /// Whether the same request may succeed when retried
    pub retryable: bool,
}

impl Response {
    pub fn success(value: Option<Vec<u8>>) -> Self {
        Self {
            value,
            error: None,
            retryable: false,
        }
    }

    /// Retryable failure
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(message.into()),
            retryable: true,
        }
    }

    /// Failure that keeps the kind of the server-side error
    pub fn from_error(error: &CacheError) -> Self {
        Self {
            value: None,
            error: Some(error.to_string()),
            retryable: error.is_transient(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Turn a retryable failure into `CacheError::Remote` and any other
    /// into `CacheError::Rejected`
    pub fn into_result(self) -> Result<Option<Vec<u8>>> {
        match self.error {
            Some(message) if self.retryable => Err(CacheError::Remote(message)),
            Some(message) => Err(CacheError::Rejected(message)),
            None => Ok(self.value),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// Write one frame: header, then payload
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CacheError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    header[4..].copy_from_slice(&crc32fast::hash(&payload).to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` when the peer closed the stream cleanly
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_SIZE];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if size > MAX_FRAME_SIZE {
        return Err(CacheError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            size, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;

    let actual = crc32fast::hash(&payload);
    if actual != checksum {
        return Err(CacheError::Protocol(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            checksum, actual
        )));
    }

    decode(&payload).map(Some)
}
