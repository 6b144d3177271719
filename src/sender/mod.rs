//! Stop-and-wait frame sender with randomized binary exponential backoff.
//!
//! [`FrameSender`] segments an input stream into fixed-size frames and keeps
//! exactly one of them in flight: send, wait for the channel's echo, and on
//! anything else back off a random number of slots and resend. A frame that
//! exhausts its retries aborts the whole transfer.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod types;

pub use backoff::{BackoffPolicy, MAX_BACKOFF_EXPONENT};
pub use engine::FrameSender;
pub use error::{SenderError, SenderResult};
pub use types::{
    AbortReason, AckPolicy, FrameInFlight, Reply, SenderConfig, TransferOutcome, TransferReport,
    TransferStats, DEFAULT_MAX_RETRIES,
};
