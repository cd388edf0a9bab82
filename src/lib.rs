//! `ascii-chat-server`: real-time many-to-many terminal video-chat
//! server pipeline — packet protocol, buffer pool, ring buffers, packet
//! queue, crypto handshake + AEAD, transport abstraction, per-client
//! connection lifecycle, audio mixer, video compositor, broadcast loop.

pub mod audio;
pub mod broadcast;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod logging;
pub mod packet_queue;
pub mod protocol;
pub mod ring_buffer;
pub mod server;
pub mod stats;
pub mod transport;
pub mod video;
