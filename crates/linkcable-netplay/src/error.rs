//! Netplay error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetplayError {
    #[error("not connected to server")]
    NotConnected,

    #[error("session already active")]
    AlreadyConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("server rejected connection (reply {0})")]
    HandshakeRejected(i32),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] linkcable_netproto::error::ProtoError),

    #[error("declared body of {0} bytes exceeds the receive limit")]
    BodyTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no pending registration for nonce {0:#010x}")]
    UnknownNonce(u32),

    #[error("unknown core {0}")]
    UnknownCore(u32),

    #[error("core {0} is already attached")]
    AlreadyAttached(u32),

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("failed to start connection worker: {0}")]
    WorkerSpawn(String),
}
