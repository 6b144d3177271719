use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use super::error::{ChannelError, ChannelResult};

/// Default admission cap on simultaneously attached stations.
pub const DEFAULT_MAX_STATIONS: usize = 10;

/// Default receive buffer; anything longer than this in one slot is split.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub bind_addr: SocketAddr,
    pub slot_time: Duration,
    /// Connections beyond this many attached stations stay in the listen
    /// backlog until a slot frees up.
    pub max_stations: usize,
    pub buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            slot_time: Duration::from_millis(100),
            max_stations: DEFAULT_MAX_STATIONS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> ChannelResult<()> {
        if self.slot_time.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "slot time must be positive".into(),
            ));
        }
        if self.max_stations == 0 {
            return Err(ChannelError::InvalidConfig(
                "max stations must be at least 1".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ChannelError::InvalidConfig(
                "buffer size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Connection identity of a station, unique for the lifetime of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub u64);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCounters {
    /// Frames arbitrated cleanly from this station.
    pub frames_received: u64,
    /// Slots in which this station's transmission was discarded.
    pub collisions: u64,
    /// Frame bytes, header included, broadcast on this station's behalf.
    pub total_bytes: u64,
}

impl StationCounters {
    pub fn record_clean(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.total_bytes += bytes as u64;
    }

    pub fn record_collision(&mut self) {
        self.collisions += 1;
    }

    /// Average bytes per second over `elapsed`; zero for an empty interval.
    pub fn avg_bandwidth(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Final counters of a station, frozen at removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub addr: SocketAddr,
    pub counters: StationCounters,
}

/// Result of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// No stations attached; the engine slept for the slot.
    Empty,
    /// Stations attached but none transmitted.
    Idle,
    /// One station transmitted and its bytes were echoed to everyone.
    Clean {
        station: StationId,
        bytes: usize,
        /// Stations removed because the echo could not be sent to them.
        dropped: Vec<StationId>,
    },
    /// Two or more stations were ready; all data was discarded.
    Collision {
        colliders: Vec<StationId>,
        /// Ready stations that turned out to have disconnected.
        departed: Vec<StationId>,
    },
    /// The only ready station had closed its connection.
    Departed { station: StationId },
    /// The only ready station's receive failed.
    ReceiveFailed { station: StationId },
}

impl SlotOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SlotOutcome::Empty => "empty",
            SlotOutcome::Idle => "idle",
            SlotOutcome::Clean { .. } => "clean",
            SlotOutcome::Collision { .. } => "collision",
            SlotOutcome::Departed { .. } => "departed",
            SlotOutcome::ReceiveFailed { .. } => "receive_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Requested,
    PollFailed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationReport {
    pub id: StationId,
    pub addr: SocketAddr,
    pub frames_received: u64,
    pub collisions: u64,
    pub total_bytes: u64,
    /// Bytes per second over the whole channel lifetime.
    pub avg_bandwidth: f64,
    pub attached: bool,
}

impl StationReport {
    pub fn new(snapshot: &StationSnapshot, elapsed: Duration, attached: bool) -> Self {
        Self {
            id: snapshot.id,
            addr: snapshot.addr,
            frames_received: snapshot.counters.frames_received,
            collisions: snapshot.counters.collisions,
            total_bytes: snapshot.counters.total_bytes,
            avg_bandwidth: snapshot.counters.avg_bandwidth(elapsed),
            attached,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub termination: Termination,
    /// Departed stations in removal order, then attached ones in attach order.
    pub stations: Vec<StationReport>,
}

impl ChannelReport {
    pub fn station(&self, addr: SocketAddr) -> Option<&StationReport> {
        self.stations.iter().find(|s| s.addr == addr)
    }
}

impl fmt::Display for ChannelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel Statistics:")?;
        if let Termination::PollFailed { reason } = &self.termination {
            writeln!(f, "(terminated by readiness poll failure: {reason})")?;
        }
        for station in &self.stations {
            writeln!(
                f,
                "Station {} - Frames: {}, Collisions: {}, Average Bandwidth: {:.2} B/s",
                station.addr, station.frames_received, station.collisions, station.avg_bandwidth
            )?;
        }
        write!(f, "Elapsed: {:.3} s", self.elapsed_secs)
    }
}
