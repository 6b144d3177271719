use futures::FutureExt;
use rand::rngs::StdRng;
use rand::Rng;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::frame::{Frame, FrameId};
use crate::metrics::recorder;
use crate::sender::backoff::BackoffPolicy;
use crate::sender::error::{SenderError, SenderResult};
use crate::sender::types::{
    AbortReason, FrameInFlight, Reply, SenderConfig, TransferOutcome, TransferReport,
    TransferStats,
};

/// Sends one input stream over one channel connection, a frame at a time.
pub struct FrameSender<S, R = StdRng> {
    stream: S,
    config: SenderConfig,
    payload_size: usize,
    backoff: BackoffPolicy<R>,
    stats: TransferStats,
    recv_buf: Vec<u8>,
}

impl FrameSender<TcpStream, StdRng> {
    /// Connect to the channel named in `config`.
    pub async fn connect(config: SenderConfig) -> SenderResult<Self> {
        config.validate()?;

        let stream = TcpStream::connect(config.remote_addr)
            .await
            .map_err(|source| SenderError::Connect {
                addr: config.remote_addr,
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to disable Nagle on channel socket");
        }
        info!(addr = %config.remote_addr, "Connected to channel");

        Self::new(stream, config)
    }

    /// Local address of the connection; the channel reports this station by it.
    pub fn local_addr(&self) -> SenderResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }
}

impl<S> FrameSender<S, StdRng>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established connection, seeding backoff from the config.
    pub fn new(stream: S, config: SenderConfig) -> SenderResult<Self> {
        let backoff = BackoffPolicy::from_seed(config.seed, config.slot_time);
        Self::with_backoff(stream, config, backoff)
    }
}

impl<S, R> FrameSender<S, R>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Rng,
{
    pub fn with_backoff(
        stream: S,
        config: SenderConfig,
        backoff: BackoffPolicy<R>,
    ) -> SenderResult<Self> {
        let payload_size = config.validate()?;
        recorder::init_metrics();

        Ok(Self {
            stream,
            recv_buf: vec![0u8; config.frame_size],
            config,
            payload_size,
            backoff,
            stats: TransferStats::default(),
        })
    }

    /// Transmit all of `source`; always produces a report.
    ///
    /// `file` only labels the report.
    pub async fn transfer<I>(&mut self, source: I, file: &str) -> TransferReport
    where
        I: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let outcome = self.send_all(source).await;
        let elapsed = started.elapsed();

        match &outcome {
            TransferOutcome::Completed => {
                recorder::record_transfer_complete(elapsed);
                info!(
                    file,
                    frames = self.stats.total_frames,
                    bytes = self.stats.total_bytes,
                    "Transfer complete"
                );
            }
            TransferOutcome::Aborted { frame_id, reason } => {
                recorder::record_transfer_failed(reason.label());
                error!(file, frame = %frame_id, %reason, "Transfer aborted");
            }
        }

        TransferReport::new(file, outcome, &self.stats, elapsed)
    }

    async fn send_all<I>(&mut self, mut source: I) -> TransferOutcome
    where
        I: AsyncRead + Unpin,
    {
        let mut frame_id = FrameId(0);
        let mut chunk = vec![0u8; self.payload_size];

        loop {
            let len = match read_chunk(&mut source, &mut chunk).await {
                Ok(0) => return TransferOutcome::Completed,
                Ok(len) => len,
                Err(e) => {
                    return TransferOutcome::Aborted {
                        frame_id,
                        reason: AbortReason::SourceFailed {
                            error: e.to_string(),
                        },
                    }
                }
            };

            let frame = Frame::new(frame_id, &chunk[..len]);
            match self.deliver(FrameInFlight::new(frame)).await {
                Ok(transmissions) => {
                    self.stats.record_delivery(len, transmissions);
                    recorder::record_frame_delivered(transmissions);
                    info!(frame = %frame_id, transmissions, "Frame sent successfully");
                    frame_id = frame_id.next();
                }
                Err(reason) => return TransferOutcome::Aborted { frame_id, reason },
            }
        }
    }

    /// Send until acknowledged or out of attempts; returns transmissions used.
    async fn deliver(&mut self, mut in_flight: FrameInFlight) -> Result<u32, AbortReason> {
        let id = in_flight.frame.id();

        while !in_flight.ack_received {
            if in_flight.attempts >= self.config.max_retries {
                return Err(AbortReason::RetriesExhausted {
                    attempts: in_flight.attempts,
                });
            }

            self.discard_stale();

            if let Err(e) = self.transmit(&in_flight.frame).await {
                warn!(frame = %id, error = %e, "Send failed");
                return Err(AbortReason::SendFailed {
                    error: e.to_string(),
                });
            }

            let reply = self.await_reply(&in_flight.frame).await;
            if reply == Reply::Ack {
                in_flight.ack_received = true;
                continue;
            }

            in_flight.attempts += 1;
            if in_flight.attempts >= self.config.max_retries {
                warn!(frame = %id, attempts = in_flight.attempts, cause = reply.label(), "Giving up on frame");
                continue;
            }

            let (slots, delay) = self.backoff.next_delay(in_flight.attempts);
            recorder::record_retry(slots);
            info!(
                frame = %id,
                attempt = in_flight.attempts,
                cause = reply.label(),
                backoff_slots = slots,
                delay_ms = delay.as_millis() as u64,
                "Retrying frame after backoff"
            );
            sleep(delay).await;
        }

        Ok(in_flight.transmissions())
    }

    async fn transmit(&mut self, frame: &Frame) -> io::Result<()> {
        self.stream.write_all(frame.as_bytes()).await?;
        self.stream.flush().await
    }

    /// One bounded wait for the channel's response to `frame`.
    async fn await_reply(&mut self, frame: &Frame) -> Reply {
        let read = timeout(self.config.ack_timeout, self.stream.read(&mut self.recv_buf)).await;

        match read {
            Err(_) => Reply::Timeout,
            Ok(Ok(0)) => {
                warn!("Channel closed the connection");
                Reply::Closed
            }
            Ok(Ok(n)) => self.config.ack_policy.check(&self.recv_buf[..n], frame),
            Ok(Err(e)) => {
                warn!(error = %e, "Receive failed");
                Reply::ReadFailed
            }
        }
    }

    /// Drop responses that arrived before the next transmission; none of them
    /// can acknowledge it.
    fn discard_stale(&mut self) {
        while let Some(Ok(n)) = self.stream.read(&mut self.recv_buf).now_or_never() {
            if n == 0 {
                break;
            }
            debug!(bytes = n, "Discarding stale response");
        }
    }
}

/// Fill `buf` from `source`, stopping early only at end of input.
async fn read_chunk<I>(source: &mut I, buf: &mut [u8]) -> io::Result<usize>
where
    I: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::COLLISION_SIGNAL;
    use crate::sender::types::{AckPolicy, SenderConfig};
    use rand::rngs::mock::StepRng;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    fn config(frame_size: usize) -> SenderConfig {
        SenderConfig::new(
            "127.0.0.1:5000".parse().unwrap(),
            frame_size,
            Duration::from_millis(1),
            7,
            Duration::from_millis(50),
        )
    }

    /// Reply to every frame with `respond(frame)`; returns every frame seen.
    fn fake_channel<F>(mut end: DuplexStream, frame_size: usize, mut respond: F) -> tokio::task::JoinHandle<Vec<Vec<u8>>>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = vec![0u8; frame_size];
            loop {
                match end.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = buf[..n].to_vec();
                        if let Some(reply) = respond(&frame) {
                            if end.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                        seen.push(frame);
                    }
                }
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_read_chunk_fills_until_eof() {
        let data: Vec<u8> = (0..250u8).collect();
        let mut source = &data[..];
        let mut buf = vec![0u8; 100];

        assert_eq!(read_chunk(&mut source, &mut buf).await.unwrap(), 100);
        assert_eq!(read_chunk(&mut source, &mut buf).await.unwrap(), 100);
        assert_eq!(read_chunk(&mut source, &mut buf).await.unwrap(), 50);
        assert_eq!(read_chunk(&mut source, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_echo_acknowledges_each_frame() {
        let (ours, theirs) = duplex(4096);
        let channel = fake_channel(theirs, 104, |frame| Some(frame.to_vec()));

        let data = vec![0xAB; 1000];
        let mut sender = FrameSender::new(ours, config(104)).unwrap();
        let report = sender.transfer(&data[..], "mem").await;
        drop(sender);

        assert!(report.is_success());
        assert_eq!(report.total_frames, 10);
        assert_eq!(report.total_bytes, 1000);
        assert_eq!(report.avg_transmissions, 1.0);
        assert_eq!(report.max_transmissions, 1);

        let seen = channel.await.unwrap();
        assert_eq!(seen.len(), 10);
        for (i, frame) in seen.iter().enumerate() {
            assert_eq!(FrameId::from_header(frame), Some(FrameId(i as u32)));
            assert_eq!(frame.len(), 104);
        }
    }

    #[tokio::test]
    async fn test_collision_then_ack() {
        let (ours, theirs) = duplex(4096);
        let mut calls = 0;
        let channel = fake_channel(theirs, 16, move |frame| {
            calls += 1;
            if calls <= 2 {
                Some(COLLISION_SIGNAL.to_vec())
            } else {
                Some(frame.to_vec())
            }
        });

        let backoff = BackoffPolicy::with_rng(StepRng::new(0, 0), Duration::from_millis(1));
        let mut sender = FrameSender::with_backoff(ours, config(16), backoff).unwrap();
        let report = sender.transfer(&b"hello"[..], "mem").await;
        drop(sender);

        assert!(report.is_success());
        assert_eq!(report.total_frames, 1);
        assert_eq!(report.max_transmissions, 3);
        assert_eq!(report.avg_transmissions, 3.0);

        // Every retransmission is the identical frame.
        let seen = channel.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|f| f == &seen[0]));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_not_an_ack() {
        let (ours, theirs) = duplex(4096);
        let mut calls = 0;
        let channel = fake_channel(theirs, 16, move |frame| {
            calls += 1;
            if calls == 1 {
                // Another station's frame with a different sequence number.
                Some(Frame::new(FrameId(99), b"zz").as_bytes().to_vec())
            } else {
                Some(frame.to_vec())
            }
        });

        let mut sender = FrameSender::new(ours, config(16)).unwrap();
        let report = sender.transfer(&b"abc"[..], "mem").await;
        drop(sender);

        assert!(report.is_success());
        assert_eq!(report.max_transmissions, 2);
        assert_eq!(channel.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_aborts_after_max_retries_without_sending_more() {
        let (ours, theirs) = duplex(8192);
        // Acknowledge frames 0..=2, then go silent.
        let channel = fake_channel(theirs, 14, |frame| {
            match FrameId::from_header(frame) {
                Some(FrameId(id)) if id < 3 => Some(frame.to_vec()),
                _ => None,
            }
        });

        let data = vec![1u8; 100];
        let mut cfg = config(14);
        cfg.ack_timeout = Duration::from_millis(10);
        let backoff = BackoffPolicy::with_rng(StepRng::new(0, 0), Duration::from_millis(1));
        let mut sender = FrameSender::with_backoff(ours, cfg, backoff).unwrap();
        let report = sender.transfer(&data[..], "mem").await;
        drop(sender);

        assert!(!report.is_success());
        assert_eq!(report.total_frames, 3);
        assert_eq!(report.total_bytes, 30);
        assert_eq!(
            report.outcome,
            TransferOutcome::Aborted {
                frame_id: FrameId(3),
                reason: AbortReason::RetriesExhausted { attempts: 10 },
            }
        );

        // Three delivered frames plus exactly ten attempts at frame 3; frame 4
        // never goes out.
        let seen = channel.await.unwrap();
        assert_eq!(seen.len(), 13);
        assert!(seen[3..]
            .iter()
            .all(|f| FrameId::from_header(f) == Some(FrameId(3))));
    }

    #[tokio::test]
    async fn test_full_frame_policy_rejects_foreign_frame_with_same_id() {
        let (ours, theirs) = duplex(4096);
        let mut calls = 0;
        let channel = fake_channel(theirs, 16, move |frame| {
            calls += 1;
            if calls == 1 {
                Some(Frame::new(FrameId(0), b"other").as_bytes().to_vec())
            } else {
                Some(frame.to_vec())
            }
        });

        let mut cfg = config(16);
        cfg.ack_policy = AckPolicy::FullFrame;
        let mut sender = FrameSender::new(ours, cfg).unwrap();
        let report = sender.transfer(&b"mine"[..], "mem").await;
        drop(sender);

        assert!(report.is_success());
        assert_eq!(report.max_transmissions, 2);
        channel.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_input_completes_without_sending() {
        let (ours, theirs) = duplex(1024);
        let channel = fake_channel(theirs, 16, |frame| Some(frame.to_vec()));

        let mut sender = FrameSender::new(ours, config(16)).unwrap();
        let report = sender.transfer(&b""[..], "empty").await;
        drop(sender);

        assert!(report.is_success());
        assert_eq!(report.total_frames, 0);
        assert_eq!(report.avg_transmissions, 0.0);
        assert!(channel.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_frame_is_not_resent() {
        let (ours, theirs) = duplex(1024);
        let channel = fake_channel(theirs, 16, |frame| Some(frame.to_vec()));

        let mut sender = FrameSender::new(ours, config(16)).unwrap();
        let mut in_flight = FrameInFlight::new(Frame::new(FrameId(0), b"done"));
        in_flight.ack_received = true;
        assert_eq!(sender.deliver(in_flight).await, Ok(1));

        let fresh = FrameInFlight::new(Frame::new(FrameId(1), b"next"));
        assert_eq!(sender.deliver(fresh).await, Ok(1));
        drop(sender);

        let seen = channel.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(FrameId::from_header(&seen[0]), Some(FrameId(1)));
    }

    #[tokio::test]
    async fn test_rejects_small_frame_size() {
        let (ours, _theirs) = duplex(64);
        assert!(matches!(
            FrameSender::new(ours, config(4)),
            Err(SenderError::Frame(_))
        ));
    }
}
