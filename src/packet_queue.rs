//! Bounded MPSC outbound packet queue per client (spec §3.3, §4.3).
//!
//! Built on `crossbeam_queue::ArrayQueue`, a lock-free bounded queue.
//! `ArrayQueue` is MPMC rather than strictly MPSC, which is a superset
//! of what's needed here — multiple producers (mixer, compositor,
//! receive thread replying to pings) feed one consumer (the client's
//! send task) and nothing relies on single-consumer exclusivity.
//!
//! The two queue kinds differ only in what happens when full:
//! `Audio` drops the incoming packet (`ArrayQueue::push` fails without
//! touching the queue), `Video` evicts the oldest entry to make room
//! (`ArrayQueue::force_push`).

use crate::buffer_pool::PooledBuffer;
use crate::protocol::PacketHeader;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const AUDIO_QUEUE_CAPACITY: usize = 100;
pub const VIDEO_QUEUE_CAPACITY: usize = 30;

pub enum PayloadHandle {
    Pooled(PooledBuffer),
    Owned(Vec<u8>),
}

impl PayloadHandle {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            PayloadHandle::Pooled(b) => &b[..],
            PayloadHandle::Owned(v) => &v[..],
        }
    }
}

/// One queued outbound packet: header bytes plus its payload handle.
pub struct QueuedPacket {
    pub header: PacketHeader,
    pub payload: PayloadHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Audio,
    Video,
}

#[derive(Default)]
pub struct QueueStats {
    pub dropped: AtomicU64,
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
}

/// Bounded FIFO of outbound packets feeding one client's send task.
pub struct PacketQueue {
    kind: QueueKind,
    inner: ArrayQueue<QueuedPacket>,
    shutting_down: AtomicBool,
    pub stats: QueueStats,
}

impl PacketQueue {
    pub fn new(kind: QueueKind) -> Self {
        let capacity = match kind {
            QueueKind::Audio => AUDIO_QUEUE_CAPACITY,
            QueueKind::Video => VIDEO_QUEUE_CAPACITY,
        };
        Self {
            kind,
            inner: ArrayQueue::new(capacity),
            shutting_down: AtomicBool::new(false),
            stats: QueueStats::default(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Enqueue a packet. Fails silently (incrementing the drop counter)
    /// if shutting down or, for an `Audio` queue, if full. A full
    /// `Video` queue instead evicts its oldest entry.
    pub fn enqueue(&self, packet: QueuedPacket) {
        if self.shutting_down.load(Ordering::Acquire) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.kind {
            QueueKind::Audio => {
                if self.inner.push(packet).is_err() {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            QueueKind::Video => {
                if self.inner.force_push(packet).is_some() {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Dequeue the next packet in FIFO order, if any.
    pub fn dequeue(&self) -> Option<QueuedPacket> {
        let packet = self.inner.pop();
        if packet.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        packet
    }

    /// Mark the queue as shutting down: producers fast-fail further
    /// enqueues, but already-queued packets remain for the consumer
    /// to drain.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::CURRENT_VERSION;
    use crate::protocol::packet::PacketType;

    fn packet(sender_id: u32) -> QueuedPacket {
        QueuedPacket {
            header: PacketHeader {
                magic: crate::protocol::MAGIC,
                version: CURRENT_VERSION,
                ptype: PacketType::Ping as u16,
                payload_length: 0,
                crc32: 0,
                sender_id,
                flags: 0,
                reserved: 0,
            },
            payload: PayloadHandle::Owned(Vec::new()),
        }
    }

    #[test]
    fn audio_queue_drops_new_on_full() {
        let q = PacketQueue::new(QueueKind::Audio);
        for i in 0..AUDIO_QUEUE_CAPACITY as u32 {
            q.enqueue(packet(i));
        }
        q.enqueue(packet(999));
        assert_eq!(q.stats.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(q.len(), AUDIO_QUEUE_CAPACITY);
        let first = q.dequeue().unwrap();
        assert_eq!(first.header.sender_id, 0);
    }

    #[test]
    fn video_queue_drops_oldest_on_full() {
        let q = PacketQueue::new(QueueKind::Video);
        for i in 0..VIDEO_QUEUE_CAPACITY as u32 {
            q.enqueue(packet(i));
        }
        q.enqueue(packet(999));
        assert_eq!(q.stats.dropped.load(Ordering::Relaxed), 1);
        let first = q.dequeue().unwrap();
        assert_eq!(first.header.sender_id, 1); // 0 was evicted
    }

    #[test]
    fn shutdown_fast_fails_enqueue_but_drains_existing() {
        let q = PacketQueue::new(QueueKind::Audio);
        q.enqueue(packet(1));
        q.begin_shutdown();
        q.enqueue(packet(2));
        assert_eq!(q.stats.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(q.dequeue().unwrap().header.sender_id, 1);
        assert!(q.dequeue().is_none());
    }
}
