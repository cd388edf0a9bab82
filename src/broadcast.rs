//! Fixed-cadence broadcast loop (spec §4.8): one composed video tick
//! at `1000 / target_fps` ms with no catch-up stacking, plus a
//! `SERVER_STATE` packet whenever the connected-client count changes.
//! The audio mixer runs on its own thread at a fixed 20 ms cadence
//! (spec §3.7) rather than being driven from here.

use crate::audio::Mixer;
use crate::client::ClientManager;
use crate::packet_queue::{PayloadHandle, QueuedPacket};
use crate::protocol::crc::crc32;
use crate::protocol::packet::PacketType;
use crate::protocol::PacketHeader;
use crate::stats::Stats;
use crate::video::ascii::Palette;
use crate::video::{broadcast_ascii_frame, compose_tick, CompositorConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Drive the video compositor at the configured cadence until
/// `shutdown` is set. Intended to run on its own OS thread.
pub fn run_broadcast_loop(
    manager: Arc<ClientManager>,
    stats: Arc<Stats>,
    config: CompositorConfig,
    palette: Palette,
    target_fps: u32,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    let tick_interval = Duration::from_millis(1000 / target_fps.max(1) as u64);
    let mut last_connected_count = 0usize;

    while !shutdown.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let clients = manager.snapshot();

        let payload = compose_tick(&clients, &config, &palette);
        broadcast_ascii_frame(&clients, &payload);

        let connected_count = clients.len();
        if connected_count != last_connected_count {
            broadcast_server_state(&clients, &stats, manager.as_ref());
            last_connected_count = connected_count;
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick_interval {
            std::thread::sleep(tick_interval - elapsed);
        } else {
            debug!(target: "broadcast", elapsed_ms = elapsed.as_millis() as u64, "tick ran long, firing next tick immediately");
        }
    }
}

/// Drive the audio mixer at its fixed 20 ms cadence until `shutdown`.
pub fn run_mixer_loop(manager: Arc<ClientManager>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    const MIXER_TICK: Duration = Duration::from_millis(20);
    let mut mixer = Mixer::new();

    while !shutdown.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let clients = manager.snapshot();
        mixer.tick(&clients);

        let elapsed = tick_start.elapsed();
        if elapsed < MIXER_TICK {
            std::thread::sleep(MIXER_TICK - elapsed);
        }
    }
}

fn broadcast_server_state(clients: &[crate::client::SharedClient], stats: &Stats, manager: &ClientManager) {
    let snapshot = stats.snapshot(manager);
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&(snapshot.connected_count as u32).to_be_bytes());
    let active_count = snapshot.active_video_count.max(snapshot.active_audio_count);
    payload.extend_from_slice(&(active_count as u32).to_be_bytes());

    for client in clients {
        let header = PacketHeader::new(PacketType::ServerState as u16, payload.len() as u32, crc32(&payload), 0);
        client
            .outbound_video
            .enqueue(QueuedPacket { header, payload: PayloadHandle::Owned(payload.clone()) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::info::CryptoSession;
    use crate::client::ClientInfo;
    use crate::errors::AcipError;
    use crate::transport::{RecvFrame, TransportReader, TransportWriter};

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
    fn server_state_enqueues_into_every_client_video_queue() {
        let manager = ClientManager::new(4);
        let id = manager.allocate_id();
        let client = manager
            .insert(ClientInfo::new(id, Box::new(NullReader), Box::new(NullWriter), CryptoSession::new([0; 32], [0; 32])))
            .unwrap();
        let stats = Stats::default();
        broadcast_server_state(&[client.clone()], &stats, &manager);
        assert_eq!(client.outbound_video.len(), 1);
    }
}
