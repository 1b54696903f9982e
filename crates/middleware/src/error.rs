use thiserror::Error;

use crate::transport::SocketId;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("channel initialization failed: {0}")]
    InitFailed(String),
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("channel is not active")]
    NotActive,
    #[error("unknown socket: {0}")]
    UnknownSocket(SocketId),
    #[error("no output buffers available")]
    NoBuffers,
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("flush failed: {0}")]
    FlushFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Transient backpressure that a flush may clear
    pub fn is_no_buffers(&self) -> bool {
        matches!(self, TransportError::NoBuffers)
    }
}
