//! Per-connected-client record (spec §3.5).

use crate::crypto::aead::{Direction, NonceCounter};
use crate::packet_queue::{PacketQueue, QueueKind};
use crate::ring_buffer::{
    audio_ring, AudioRingConsumer, AudioRingProducer, VideoFrameRingBuffer, VideoRingConsumer,
    VideoRingProducer, AUDIO_RING_CAPACITY,
};
use crate::transport::{TransportReader, TransportWriter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use crate::protocol::packet::{CAP_AUDIO, CAP_COLOR, CAP_STRETCH, CAP_UTF8, CAP_VIDEO};

/// Session key material plus strictly-monotonic per-direction nonce
/// counters, set once the handshake completes.
pub struct CryptoSession {
    pub c2s_key: [u8; 32],
    pub s2c_key: [u8; 32],
    pub send_counter: Mutex<NonceCounter>,
    pub recv_counter: Mutex<NonceCounter>,
}

impl CryptoSession {
    pub fn new(c2s_key: [u8; 32], s2c_key: [u8; 32]) -> Self {
        Self {
            c2s_key,
            s2c_key,
            send_counter: Mutex::new(NonceCounter::new(Direction::ServerToClient)),
            recv_counter: Mutex::new(NonceCounter::new(Direction::ClientToServer)),
        }
    }
}

#[derive(Default)]
pub struct ClientCounters {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
}

pub struct ClientInfo {
    pub id: u32,
    /// Receive half of the connection, used only by the receive task
    /// (and its idle-ping probe).
    pub reader: Mutex<Box<dyn TransportReader>>,
    /// Send half of the connection, used by the send task and by the
    /// receive task's error replies. Split from the same underlying
    /// connection as `reader` so neither task ever blocks on the
    /// other's lock (spec §4.1, §4.4).
    pub writer: Mutex<Box<dyn TransportWriter>>,
    pub display_name: Mutex<String>,
    pub connect_time: Instant,

    pub capabilities: AtomicU32,
    pub sending_video: AtomicBool,
    pub sending_audio: AtomicBool,
    pub width_cells: AtomicU16,
    pub height_cells: AtomicU16,

    pub inbound_video_producer: Mutex<VideoRingProducer>,
    pub inbound_video_consumer: Mutex<VideoRingConsumer>,
    pub inbound_audio_producer: Mutex<AudioRingProducer>,
    pub inbound_audio_consumer: Mutex<AudioRingConsumer>,

    pub outbound_audio: PacketQueue,
    pub outbound_video: PacketQueue,

    pub active: AtomicBool,
    pub shutting_down: AtomicBool,
    pub send_thread_running: AtomicBool,
    pub counters: ClientCounters,

    pub crypto: CryptoSession,
}

impl ClientInfo {
    pub fn new(id: u32, reader: Box<dyn TransportReader>, writer: Box<dyn TransportWriter>, crypto: CryptoSession) -> Self {
        let (video_prod, video_cons) = VideoFrameRingBuffer::new(4);
        let (audio_prod, audio_cons) = audio_ring(AUDIO_RING_CAPACITY);
        Self {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            display_name: Mutex::new(String::new()),
            connect_time: Instant::now(),
            capabilities: AtomicU32::new(0),
            sending_video: AtomicBool::new(false),
            sending_audio: AtomicBool::new(false),
            width_cells: AtomicU16::new(0),
            height_cells: AtomicU16::new(0),
            inbound_video_producer: Mutex::new(video_prod),
            inbound_video_consumer: Mutex::new(video_cons),
            inbound_audio_producer: Mutex::new(audio_prod),
            inbound_audio_consumer: Mutex::new(audio_cons),
            outbound_audio: PacketQueue::new(QueueKind::Audio),
            outbound_video: PacketQueue::new(QueueKind::Video),
            active: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            send_thread_running: AtomicBool::new(false),
            counters: ClientCounters::default(),
            crypto,
        }
    }

    pub fn has_cap(&self, mask: u32) -> bool {
        self.capabilities.load(Ordering::Relaxed) & mask != 0
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.outbound_audio.begin_shutdown();
        self.outbound_video.begin_shutdown();
    }
}

pub type SharedClient = Arc<ClientInfo>;
