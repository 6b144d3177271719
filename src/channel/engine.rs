use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::select_all;
use futures::FutureExt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::channel::error::{ChannelError, ChannelResult};
use crate::channel::station::StationTable;
use crate::channel::types::{
    ChannelConfig, ChannelReport, SlotOutcome, StationId, StationReport, StationSnapshot,
    Termination,
};
use crate::frame::{FrameId, COLLISION_SIGNAL};
use crate::metrics::recorder;

/// Cloneable request to stop the channel after the current slot.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of the non-blocking receive for a station found ready this slot.
#[derive(Debug)]
enum ReadOutcome {
    Data(Bytes),
    Closed,
    Failed(io::Error),
}

/// The shared medium: one control loop, one slot at a time.
pub struct ChannelEngine {
    listener: TcpListener,
    config: ChannelConfig,
    stations: StationTable,
    buffer: Vec<u8>,
    started: Instant,
    started_at: DateTime<Utc>,
    slots: u64,
}

impl ChannelEngine {
    pub async fn bind(config: ChannelConfig) -> ChannelResult<Self> {
        config.validate()?;

        let listener =
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| ChannelError::Bind {
                    addr: config.bind_addr,
                    source,
                })?;

        recorder::init_metrics();
        info!(
            addr = %listener.local_addr()?,
            slot_ms = config.slot_time.as_millis() as u64,
            max_stations = config.max_stations,
            "Channel listening"
        );

        Ok(Self {
            listener,
            stations: StationTable::new(config.max_stations),
            buffer: vec![0u8; config.buffer_size],
            config,
            started: Instant::now(),
            started_at: Utc::now(),
            slots: 0,
        })
    }

    pub fn local_addr(&self) -> ChannelResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stations(&self) -> &StationTable {
        &self.stations
    }

    /// Number of slots run so far.
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Attach every connection already waiting in the backlog, up to capacity.
    ///
    /// Never blocks. Connections beyond capacity are left pending.
    pub fn accept_pending(&mut self) -> usize {
        let mut accepted = 0;

        while !self.stations.is_full() {
            match self.listener.accept().now_or_never() {
                Some(Ok((stream, addr))) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to disable Nagle on station socket");
                    }
                    if let Some(id) = self.stations.attach(stream, addr) {
                        info!(station = %id, %addr, "New station connected");
                        accepted += 1;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
                None => break,
            }
        }

        if accepted > 0 {
            recorder::set_attached_stations(self.stations.len());
        }
        accepted
    }

    /// Run one slot: accept, wait for readiness, arbitrate, broadcast.
    ///
    /// Only a failed readiness poll is an error; everything else is an outcome.
    pub async fn run_slot(&mut self) -> ChannelResult<SlotOutcome> {
        self.accept_pending();

        let outcome = if self.stations.is_empty() {
            // Nothing to wait on; an empty readiness set is never polled.
            sleep(self.config.slot_time).await;
            SlotOutcome::Empty
        } else {
            let mut ready = self.poll_ready().await?;
            match ready.len() {
                0 => SlotOutcome::Idle,
                1 => match ready.pop() {
                    Some((id, read)) => self.single(id, read).await,
                    None => SlotOutcome::Idle,
                },
                _ => self.collision(ready).await,
            }
        };

        self.slots += 1;
        recorder::record_slot(outcome.label());
        if matches!(outcome, SlotOutcome::Idle) {
            debug!(slot = self.slots, "Idle slot");
        }
        Ok(outcome)
    }

    /// Run slots until shutdown is requested or the readiness poll fails.
    ///
    /// Shutdown is observed between slots only.
    pub async fn run(mut self, shutdown: ShutdownHandle) -> ChannelReport {
        let termination = loop {
            if shutdown.is_triggered() {
                info!("Shutdown requested");
                break Termination::Requested;
            }
            if let Err(e) = self.run_slot().await {
                error!(error = %e, "Stopping channel");
                break Termination::PollFailed {
                    reason: e.to_string(),
                };
            }
        };

        self.report_with(termination)
    }

    /// Statistics for every station seen so far.
    pub fn report(&self) -> ChannelReport {
        self.report_with(Termination::Requested)
    }

    fn report_with(&self, termination: Termination) -> ChannelReport {
        let elapsed = self.started.elapsed();
        let stations = self
            .stations
            .all_snapshots()
            .iter()
            .map(|(snapshot, attached)| StationReport::new(snapshot, elapsed, *attached))
            .collect();

        ChannelReport {
            started_at: self.started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            termination,
            stations,
        }
    }

    /// Collect the ready set, waiting at most one slot for it to be non-empty.
    ///
    /// A readiness wake-up with nothing to read (the flag is only cleared by a
    /// `WouldBlock`) goes back to waiting for the rest of the slot.
    async fn poll_ready(&mut self) -> ChannelResult<Vec<(StationId, ReadOutcome)>> {
        let deadline = tokio::time::Instant::now() + self.config.slot_time;

        loop {
            if !self.wait_readiness(deadline).await? {
                return Ok(Vec::new());
            }
            let ready = self.receive_ready();
            if !ready.is_empty() {
                return Ok(ready);
            }
        }
    }

    /// Wait until any attached station is readable or `deadline` passes.
    async fn wait_readiness(&self, deadline: tokio::time::Instant) -> ChannelResult<bool> {
        let waits = self
            .stations
            .iter()
            .map(|station| Box::pin(station.stream().readable()));

        match timeout_at(deadline, select_all(waits)).await {
            Err(_) => Ok(false),
            Ok((Ok(()), _, _)) => Ok(true),
            Ok((Err(e), _, _)) => Err(ChannelError::Poll(e)),
        }
    }

    /// Non-blocking receive from every station; stations with nothing to
    /// read are not part of the ready set.
    fn receive_ready(&mut self) -> Vec<(StationId, ReadOutcome)> {
        let mut ready = Vec::new();

        for station in self.stations.iter() {
            let read = match station.stream().try_read(&mut self.buffer) {
                Ok(0) => ReadOutcome::Closed,
                Ok(n) => ReadOutcome::Data(Bytes::copy_from_slice(&self.buffer[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if is_disconnect(&e) => {
                    debug!(station = %station.id(), error = %e, "Peer reset connection");
                    ReadOutcome::Closed
                }
                Err(e) => ReadOutcome::Failed(e),
            };
            ready.push((station.id(), read));
        }

        ready
    }

    async fn single(&mut self, id: StationId, read: ReadOutcome) -> SlotOutcome {
        match read {
            ReadOutcome::Data(bytes) => {
                let addr = match self.stations.get_mut(id) {
                    Some(station) => {
                        station.counters_mut().record_clean(bytes.len());
                        station.addr()
                    }
                    None => return SlotOutcome::Idle,
                };

                let dropped = self.broadcast(&bytes).await;
                let receivers = self.stations.len();
                recorder::record_clean_broadcast(bytes.len(), receivers);
                info!(
                    station = %id,
                    %addr,
                    frame = ?FrameId::from_header(&bytes),
                    bytes = bytes.len(),
                    receivers,
                    "Successful transmission broadcast"
                );

                SlotOutcome::Clean {
                    station: id,
                    bytes: bytes.len(),
                    dropped,
                }
            }
            ReadOutcome::Closed => {
                self.depart(id, "disconnected");
                SlotOutcome::Departed { station: id }
            }
            ReadOutcome::Failed(e) => {
                warn!(station = %id, error = %e, "Receive failed");
                SlotOutcome::ReceiveFailed { station: id }
            }
        }
    }

    async fn collision(&mut self, ready: Vec<(StationId, ReadOutcome)>) -> SlotOutcome {
        let contenders = ready.len();
        let mut colliders = Vec::new();
        let mut departed = Vec::new();

        for (id, read) in ready {
            match read {
                ReadOutcome::Data(bytes) => {
                    if let Some(station) = self.stations.get_mut(id) {
                        station.counters_mut().record_collision();
                        info!(
                            station = %id,
                            addr = %station.addr(),
                            bytes = bytes.len(),
                            "Collision detected, frame discarded"
                        );
                        colliders.push(id);
                    }
                }
                ReadOutcome::Closed => {
                    self.depart(id, "disconnected during collision");
                    departed.push(id);
                }
                ReadOutcome::Failed(e) => {
                    warn!(station = %id, error = %e, "Receive failed during collision");
                }
            }
        }

        // A lost collision signal is not worth dropping the session over.
        for station in self.stations.iter_mut() {
            if let Err(e) = station.stream_mut().write_all(COLLISION_SIGNAL).await {
                warn!(
                    station = %station.id(),
                    addr = %station.addr(),
                    error = %e,
                    "Collision signal send failed"
                );
            }
        }

        recorder::record_collision(colliders.len());
        info!(contenders, "Collision occurred, collision signal sent to all");

        SlotOutcome::Collision {
            colliders,
            departed,
        }
    }

    /// Echo `bytes` to every attached station, the originator included.
    /// Stations that cannot be written to are removed.
    async fn broadcast(&mut self, bytes: &[u8]) -> Vec<StationId> {
        let mut failed = Vec::new();

        for station in self.stations.iter_mut() {
            if let Err(e) = station.stream_mut().write_all(bytes).await {
                warn!(
                    station = %station.id(),
                    addr = %station.addr(),
                    error = %e,
                    "Broadcast send failed"
                );
                failed.push(station.id());
            }
        }

        for id in &failed {
            self.depart(*id, "broadcast send failed");
        }
        failed
    }

    fn depart(&mut self, id: StationId, reason: &'static str) -> Option<StationSnapshot> {
        let snapshot = self.stations.remove(id)?;
        info!(
            station = %id,
            addr = %snapshot.addr,
            frames = snapshot.counters.frames_received,
            collisions = snapshot.counters.collisions,
            bytes = snapshot.counters.total_bytes,
            reason,
            "Station removed"
        );
        recorder::record_station_departed();
        recorder::set_attached_stations(self.stations.len());
        Some(snapshot)
    }
}

/// A peer that closes with unread data resets instead of sending EOF.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
