use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WirecallError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Clean end of stream: the peer hung up between messages.
    #[error("connection closed by peer")]
    Eof,

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("json encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("unsupported codec type: {0}")]
    UnsupportedCodec(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),

    #[error("service/method request ill-formed: {0}")]
    IllFormedServiceMethod(String),

    #[error("can't find service {0}")]
    ServiceNotFound(String),

    #[error("can't find method {0}")]
    MethodNotFound(String),

    #[error("no available servers")]
    NoAvailableServers,

    #[error("connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// Error reported by the remote end in a response header.
    #[error("{0}")]
    Remote(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, WirecallError>;
