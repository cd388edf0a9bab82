//! Server-wide counters (SPEC_FULL.md §B): aggregates the atomics named
//! piecemeal across the buffer pool, queues, and per-client counters
//! behind one type, so the broadcast loop and `SERVER_STATE` packet have
//! a single place to read connection/drop counts from.

use crate::client::ClientManager;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub audio_packets_dropped: AtomicU64,
    pub video_packets_dropped: AtomicU64,
    pub decrypt_failures: AtomicU64,
    pub handshake_failures: AtomicU64,
    pub clients_accepted: AtomicU64,
    pub clients_reaped: AtomicU64,
}

pub struct StatsSnapshot {
    pub connected_count: usize,
    pub active_video_count: usize,
    pub active_audio_count: usize,
    pub audio_packets_dropped: u64,
    pub video_packets_dropped: u64,
    pub decrypt_failures: u64,
    pub handshake_failures: u64,
    pub clients_accepted: u64,
    pub clients_reaped: u64,
}

impl Stats {
    pub fn record_client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_reaped(&self) {
        self.clients_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Pull `(connected_count, active_count)` and the rest of the counters
    /// needed for a `SERVER_STATE` packet or a log line.
    pub fn snapshot(&self, manager: &ClientManager) -> StatsSnapshot {
        let clients = manager.snapshot();
        let active_video_count = clients
            .iter()
            .filter(|c| c.sending_video.load(Ordering::Relaxed))
            .count();
        let active_audio_count = clients
            .iter()
            .filter(|c| c.sending_audio.load(Ordering::Relaxed))
            .count();

        let audio_packets_dropped = self.audio_packets_dropped.load(Ordering::Relaxed)
            + clients.iter().map(|c| c.outbound_audio.stats.dropped.load(Ordering::Relaxed)).sum::<u64>();
        let video_packets_dropped = self.video_packets_dropped.load(Ordering::Relaxed)
            + clients.iter().map(|c| c.outbound_video.stats.dropped.load(Ordering::Relaxed)).sum::<u64>();

        StatsSnapshot {
            connected_count: clients.len(),
            active_video_count,
            active_audio_count,
            audio_packets_dropped,
            video_packets_dropped,
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            clients_reaped: self.clients_reaped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::info::CryptoSession;
    use crate::client::ClientInfo;
    use crate::errors::AcipError;
    use crate::protocol::PacketHeader;
    use crate::transport::{RecvFrame, TransportReader, TransportWriter};
    use std::time::Duration;

    struct NullReader;
    impl TransportReader for NullReader {
        fn recv(&mut self, _: Duration) -> Result<RecvFrame, AcipError> {
            Err(AcipError::Timeout("null transport"))
        }
        fn close(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
    }

    struct NullWriter;
    impl TransportWriter for NullWriter {
        fn send(&mut self, _: &PacketHeader, _: &[u8]) -> Result<(), AcipError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn provides_encryption(&self) -> bool {
            false
        }
    }

    #[test]
    fn snapshot_counts_connected_clients() {
        let manager = ClientManager::new(4);
        let id = manager.allocate_id();
        manager
            .insert(ClientInfo::new(id, Box::new(NullReader), Box::new(NullWriter), CryptoSession::new([0; 32], [0; 32])))
            .unwrap();

        let stats = Stats::default();
        stats.record_client_accepted();
        let snapshot = stats.snapshot(&manager);
        assert_eq!(snapshot.connected_count, 1);
        assert_eq!(snapshot.clients_accepted, 1);
    }
}
