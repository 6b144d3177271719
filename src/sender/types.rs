use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::frame::{max_payload, Frame, FrameId, Response};
use crate::sender::error::{SenderError, SenderResult};

/// Attempts per frame before the transfer is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// How a sender decides that a response acknowledges its frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// The response's leading four bytes carry the pending frame id.
    #[default]
    Header,
    /// The response is the verbatim echo of the whole frame.
    FullFrame,
}

impl AckPolicy {
    pub fn check(self, response: &[u8], frame: &Frame) -> Reply {
        match Response::parse(response) {
            Response::Collision => Reply::Collision,
            Response::Runt(_) => Reply::Runt,
            Response::Frame { id, bytes } => {
                let acked = match self {
                    AckPolicy::Header => id == frame.id(),
                    AckPolicy::FullFrame => bytes == frame.as_bytes(),
                };
                if acked {
                    Reply::Ack
                } else {
                    Reply::Mismatch { id }
                }
            }
        }
    }
}

/// Outcome of one wait for an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Collision,
    /// Someone else's frame, or ours under a stricter policy mismatch.
    Mismatch { id: FrameId },
    Runt,
    Timeout,
    /// The channel closed the connection.
    Closed,
    ReadFailed,
}

impl Reply {
    pub fn label(&self) -> &'static str {
        match self {
            Reply::Ack => "ack",
            Reply::Collision => "collision",
            Reply::Mismatch { .. } => "mismatch",
            Reply::Runt => "runt",
            Reply::Timeout => "timeout",
            Reply::Closed => "closed",
            Reply::ReadFailed => "read_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub remote_addr: SocketAddr,
    /// Header plus payload; must exceed the header size.
    pub frame_size: usize,
    pub slot_time: Duration,
    pub seed: u64,
    /// How long each attempt waits for the echo.
    pub ack_timeout: Duration,
    pub max_retries: u32,
    pub ack_policy: AckPolicy,
}

impl SenderConfig {
    pub fn new(
        remote_addr: SocketAddr,
        frame_size: usize,
        slot_time: Duration,
        seed: u64,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            remote_addr,
            frame_size,
            slot_time,
            seed,
            ack_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            ack_policy: AckPolicy::default(),
        }
    }

    /// Check the configuration and return the payload capacity of a frame.
    pub fn validate(&self) -> SenderResult<usize> {
        let payload = max_payload(self.frame_size)?;
        if self.ack_timeout.is_zero() {
            return Err(SenderError::InvalidConfig(
                "acknowledgment timeout must be positive".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(SenderError::InvalidConfig(
                "max retries must be at least 1".into(),
            ));
        }
        Ok(payload)
    }
}

/// The single frame currently awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct FrameInFlight {
    pub frame: Frame,
    /// Failed attempts so far.
    pub attempts: u32,
    pub ack_received: bool,
}

impl FrameInFlight {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            attempts: 0,
            ack_received: false,
        }
    }

    /// Transmissions spent on this frame once it is acknowledged.
    pub fn transmissions(&self) -> u32 {
        self.attempts + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub total_frames: u64,
    pub total_bytes: u64,
    pub total_transmissions: u64,
    pub max_transmissions: u32,
}

impl TransferStats {
    pub fn record_delivery(&mut self, payload_bytes: usize, transmissions: u32) {
        self.total_frames += 1;
        self.total_bytes += payload_bytes as u64;
        self.total_transmissions += transmissions as u64;
        self.max_transmissions = self.max_transmissions.max(transmissions);
    }

    pub fn avg_transmissions(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.total_transmissions as f64 / self.total_frames as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    RetriesExhausted { attempts: u32 },
    SendFailed { error: String },
    SourceFailed { error: String },
}

impl AbortReason {
    pub fn label(&self) -> &'static str {
        match self {
            AbortReason::RetriesExhausted { .. } => "retries_exhausted",
            AbortReason::SendFailed { .. } => "send_failed",
            AbortReason::SourceFailed { .. } => "source_failed",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::RetriesExhausted { attempts } => {
                write!(f, "no acknowledgment after {attempts} attempts")
            }
            AbortReason::SendFailed { error } => write!(f, "send failed: {error}"),
            AbortReason::SourceFailed { error } => write!(f, "reading input failed: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// The input reached end-of-stream and every frame was acknowledged.
    Completed,
    /// `frame_id` was the frame that could not be delivered.
    Aborted {
        frame_id: FrameId,
        reason: AbortReason,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    pub file: String,
    pub outcome: TransferOutcome,
    pub total_frames: u64,
    pub total_bytes: u64,
    /// Every transmission, retries included.
    pub total_transmissions: u64,
    pub elapsed_ms: u64,
    pub avg_transmissions: f64,
    pub max_transmissions: u32,
    pub bandwidth_bps: f64,
}

impl TransferReport {
    pub fn new(
        file: impl Into<String>,
        outcome: TransferOutcome,
        stats: &TransferStats,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let bandwidth_bps = if secs > 0.0 {
            stats.total_bytes as f64 * 8.0 / secs
        } else {
            0.0
        };

        Self {
            file: file.into(),
            outcome,
            total_frames: stats.total_frames,
            total_bytes: stats.total_bytes,
            total_transmissions: stats.total_transmissions,
            elapsed_ms: elapsed.as_millis() as u64,
            avg_transmissions: stats.avg_transmissions(),
            max_transmissions: stats.max_transmissions,
            bandwidth_bps,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TransferOutcome::Completed
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sent file {}", self.file)?;
        match &self.outcome {
            TransferOutcome::Completed => writeln!(f, "Result: Success")?,
            TransferOutcome::Aborted { frame_id, reason } => {
                writeln!(f, "Result: Failure (frame {frame_id}: {reason})")?
            }
        }
        writeln!(
            f,
            "File size: {} Bytes ({} frames)",
            self.total_bytes, self.total_frames
        )?;
        writeln!(f, "Total transfer time: {} milliseconds", self.elapsed_ms)?;
        writeln!(
            f,
            "Transmissions/frame: average {:.2}, maximum {}",
            self.avg_transmissions, self.max_transmissions
        )?;
        write!(
            f,
            "Average bandwidth: {:.3} Mbps",
            self.bandwidth_bps / 1_000_000.0
        )
    }
}
