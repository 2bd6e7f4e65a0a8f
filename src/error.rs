//! Error and Result types for the cwlink crate.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("short frame: need {need} bytes, have {have}")]
    ShortFrame { need: usize, have: usize },

    #[error("bad frame length: {0}")]
    BadLength(usize),

    #[error("frame length {0} inconsistent with duration encoding")]
    TruncatedDuration(usize),

    #[error("bad key state byte: 0x{0:02X}")]
    BadKeyState(u8),

    #[error("duration {0} ms does not fit the compact datagram frame")]
    DurationOverflow(u16),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("timeout")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed relay message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
