use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to bind channel listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Readiness poll failed: {0}")]
    Poll(std::io::Error),

    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
