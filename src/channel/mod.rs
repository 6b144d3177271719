//! Slotted shared-medium arbitration.
//!
//! The [`ChannelEngine`] owns every attached [`Station`] and runs one slot at a
//! time: accept, poll for readiness bounded by the slot duration, then either
//! echo a lone frame to everyone or discard all contenders and broadcast the
//! collision signal.

pub mod engine;
pub mod error;
pub mod station;
pub mod types;

pub use engine::{ChannelEngine, ShutdownHandle};
pub use error::{ChannelError, ChannelResult};
pub use station::{Station, StationTable};
pub use types::{
    ChannelConfig, ChannelReport, SlotOutcome, StationCounters, StationId, StationReport,
    StationSnapshot, Termination,
};
