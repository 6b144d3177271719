use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::frame::FrameError;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Invalid frame size: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid sender configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection to channel at {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SenderResult<T> = Result<T, SenderError>;
