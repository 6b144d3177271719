use std::net::SocketAddr;
use tokio::net::TcpStream;

use super::types::{StationCounters, StationId, StationSnapshot};

/// One sender's live connection to the channel.
#[derive(Debug)]
pub struct Station {
    id: StationId,
    addr: SocketAddr,
    stream: TcpStream,
    counters: StationCounters,
}

impl Station {
    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn counters_mut(&mut self) -> &mut StationCounters {
        &mut self.counters
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            id: self.id,
            addr: self.addr,
            counters: self.counters,
        }
    }
}

/// Every station the engine has attached, live or departed.
///
/// Only the engine mutates the table; callers get read-only access.
#[derive(Debug)]
pub struct StationTable {
    attached: Vec<Station>,
    departed: Vec<StationSnapshot>,
    capacity: usize,
    next_id: u64,
}

impl StationTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            attached: Vec::with_capacity(capacity),
            departed: Vec::new(),
            capacity,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.attached.len() >= self.capacity
    }

    /// Attached stations in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.attached.iter()
    }

    /// Snapshots of removed stations, in removal order.
    pub fn departed(&self) -> &[StationSnapshot] {
        &self.departed
    }

    /// Every station ever seen, each exactly once: departed first, then attached.
    pub fn all_snapshots(&self) -> Vec<(StationSnapshot, bool)> {
        self.departed
            .iter()
            .cloned()
            .map(|s| (s, false))
            .chain(self.attached.iter().map(|s| (s.snapshot(), true)))
            .collect()
    }

    /// Add a freshly accepted connection with zeroed counters.
    ///
    /// Returns `None` when the table is at capacity.
    pub(crate) fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> Option<StationId> {
        if self.is_full() {
            return None;
        }
        let id = StationId(self.next_id);
        self.next_id += 1;
        self.attached.push(Station {
            id,
            addr,
            stream,
            counters: StationCounters::default(),
        });
        Some(id)
    }

    pub(crate) fn get_mut(&mut self, id: StationId) -> Option<&mut Station> {
        self.attached.iter_mut().find(|s| s.id == id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Station> {
        self.attached.iter_mut()
    }

    /// Detach a station, closing its connection and freezing its counters.
    pub(crate) fn remove(&mut self, id: StationId) -> Option<StationSnapshot> {
        let index = self.attached.iter().position(|s| s.id == id)?;
        let station = self.attached.remove(index);
        let snapshot = station.snapshot();
        self.departed.push(snapshot.clone());
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn accepted_stream(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, addr) = listener.accept().await.unwrap();
        (client, server, addr)
    }

    #[tokio::test]
    async fn test_attach_respects_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut table = StationTable::new(2);
        let mut clients = Vec::new();

        for _ in 0..2 {
            let (client, server, addr) = accepted_stream(&listener).await;
            clients.push(client);
            assert!(table.attach(server, addr).is_some());
        }
        assert!(table.is_full());

        let (_client, server, addr) = accepted_stream(&listener).await;
        assert!(table.attach(server, addr).is_none());
        assert_eq!(table.len(), 2);
        let ids: Vec<StationId> = table.iter().map(Station::id).collect();
        assert_eq!(ids, vec![StationId(0), StationId(1)]);
    }

    #[tokio::test]
    async fn test_remove_preserves_snapshot_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut table = StationTable::new(4);

        let (_c1, s1, a1) = accepted_stream(&listener).await;
        let (_c2, s2, a2) = accepted_stream(&listener).await;
        let first = table.attach(s1, a1).unwrap();
        let second = table.attach(s2, a2).unwrap();

        {
            let station = table.get_mut(first).unwrap();
            station.counters_mut().record_clean(100);
            station.counters_mut().record_collision();
        }

        let snapshot = table.remove(first).unwrap();
        assert_eq!(snapshot.addr, a1);
        assert_eq!(snapshot.counters.frames_received, 1);
        assert_eq!(snapshot.counters.collisions, 1);
        assert_eq!(snapshot.counters.total_bytes, 100);

        // A second removal of the same id is a no-op.
        assert!(table.remove(first).is_none());
        assert_eq!(table.departed().len(), 1);

        let all = table.all_snapshots();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], (snapshot, false));
        assert_eq!(all[1].0.id, second);
        assert!(all[1].1);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut table = StationTable::new(1);

        let (_c1, s1, a1) = accepted_stream(&listener).await;
        let first = table.attach(s1, a1).unwrap();
        table.remove(first);

        let (_c2, s2, a2) = accepted_stream(&listener).await;
        let second = table.attach(s2, a2).unwrap();
        assert_ne!(first, second);
    }
}
