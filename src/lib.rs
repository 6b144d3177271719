//! Slotted ALOHA over TCP.
//!
//! A single [`channel::ChannelEngine`] emulates a shared broadcast medium in
//! fixed time slots: a lone transmission is echoed to every attached station,
//! two or more in the same slot collide and everyone gets the collision
//! signal instead. [`sender::FrameSender`] pushes a file through that medium
//! one frame at a time, treating the echo of its own frame as the
//! acknowledgment and backing off a random number of slots on anything else.

pub mod channel;
pub mod frame;
pub mod metrics;
pub mod sender;

pub use channel::{ChannelConfig, ChannelEngine, ChannelError, ChannelReport, ShutdownHandle};
pub use frame::{Frame, FrameId, COLLISION_SIGNAL, HEADER_SIZE};
pub use sender::{FrameSender, SenderConfig, SenderError, TransferReport};
