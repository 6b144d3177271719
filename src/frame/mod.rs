//! Wire format shared by the channel and the sender.
//!
//! A data frame is a 4-byte little-endian sequence id followed by the chunk
//! payload. The channel never rewrites frames: its only outbound messages are
//! verbatim echoes of a clean frame or the fixed [`COLLISION_SIGNAL`].

pub mod error;
pub mod types;

pub use error::{FrameError, FrameResult};
pub use types::{max_payload, Frame, FrameId, Response, COLLISION_SIGNAL, HEADER_SIZE};
