//! SPSC ring buffers (spec §3.4): one producer, one consumer per
//! instance, atomic head/tail, power-of-two capacity.
//!
//! `AudioRingBuffer` is a thin drop-newest-on-full wrapper around the
//! `ringbuf` crate's lock-free `HeapRb` (grounded on the AES67 input
//! stream in the audio-streaming sibling of this pack, which uses the
//! same crate the same way: `HeapRb::new(cap).split()` then
//! `push_slice`/`pop_slice` against `vacant_len`/`occupied_len`).
//!
//! `VideoFrameRingBuffer` needs the opposite policy (drop the *oldest*
//! buffered frame, not the newest, to stay fresh) which means the
//! producer must sometimes force the consumer's read position forward.
//! `ringbuf`'s split producer/consumer handles don't expose that, so
//! this is a small hand-rolled atomic ring, isolated to this module
//! exactly like the buffer pool's free-list.

use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// ~200 ms of mono 48 kHz float32 samples.
pub const AUDIO_RING_CAPACITY: usize = 48_000 / 5;

pub struct AudioRingProducer {
    inner: HeapProd<f32>,
    pub dropped: Arc<AtomicUsize>,
}

pub struct AudioRingConsumer {
    inner: HeapCons<f32>,
}

/// Construct a fresh audio ring buffer split into its producer/consumer.
pub fn audio_ring(capacity: usize) -> (AudioRingProducer, AudioRingConsumer) {
    let rb = HeapRb::<f32>::new(capacity);
    let (prod, cons) = rb.split();
    (
        AudioRingProducer {
            inner: prod,
            dropped: Arc::new(AtomicUsize::new(0)),
        },
        AudioRingConsumer { inner: cons },
    )
}

impl AudioRingProducer {
    /// Write `samples` atomically: either the whole batch fits or the
    /// whole batch is dropped (drop-newest-on-full preserves the
    /// continuity of what's already buffered).
    pub fn write(&mut self, samples: &[f32]) -> bool {
        if self.inner.vacant_len() < samples.len() {
            self.dropped.fetch_add(samples.len(), Ordering::Relaxed);
            return false;
        }
        self.inner.push_slice(samples);
        true
    }
}

impl AudioRingConsumer {
    /// Drain up to `out.len()` samples, returning how many were read.
    /// Never reads past what the producer has written.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.inner.pop_slice(out)
    }

    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }
}

/// One buffered video frame plus the metadata the compositor needs.
pub struct VideoFrameEntry {
    pub source_client_id: u32,
    pub sequence: u64,
    pub capture_ts_ns: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

struct Slot<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
}
unsafe impl<T: Send> Sync for Slot<T> {}

struct RingInner<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped_oldest: AtomicUsize,
}

impl<T> Drop for RingInner<T> {
    fn drop(&mut self) {
        let mut h = self.head.load(Ordering::Relaxed);
        let t = self.tail.load(Ordering::Relaxed);
        while h != t {
            let idx = h & self.mask;
            unsafe { (*self.slots[idx].cell.get()).assume_init_drop() };
            h = h.wrapping_add(1);
        }
    }
}

/// Drop-oldest-on-full SPSC ring of owned video frames.
pub struct VideoFrameRingBuffer {
    inner: Arc<RingInner<VideoFrameEntry>>,
}

pub struct VideoRingProducer {
    inner: Arc<RingInner<VideoFrameEntry>>,
}

pub struct VideoRingConsumer {
    inner: Arc<RingInner<VideoFrameEntry>>,
}

impl VideoFrameRingBuffer {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> (VideoRingProducer, VideoRingConsumer) {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| Slot { cell: UnsafeCell::new(MaybeUninit::uninit()) })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let inner = Arc::new(RingInner {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped_oldest: AtomicUsize::new(0),
        });
        (
            VideoRingProducer { inner: inner.clone() },
            VideoRingConsumer { inner },
        )
    }
}

impl VideoRingProducer {
    /// Push a frame. If the ring is full, the oldest unread frame is
    /// dropped in place to make room (freshness over completeness).
    pub fn push(&mut self, entry: VideoFrameEntry) {
        let cap = self.inner.mask + 1;
        loop {
            let tail = self.inner.tail.load(Ordering::Relaxed);
            let head = self.inner.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) < cap {
                let idx = tail & self.inner.mask;
                unsafe { (*self.inner.slots[idx].cell.get()).write(entry) };
                self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);
                return;
            }
            // Full: drop the oldest unread frame by advancing head past it.
            if self
                .inner
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let idx = head & self.inner.mask;
                unsafe { (*self.inner.slots[idx].cell.get()).assume_init_drop() };
                self.inner.dropped_oldest.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_oldest_count(&self) -> usize {
        self.inner.dropped_oldest.load(Ordering::Relaxed)
    }
}

impl VideoRingConsumer {
    /// Consume every buffered frame and return only the most recent one
    /// (spec §4.7.1: "peek the latest frame ... consume to avoid backlog").
    pub fn consume_latest(&mut self) -> Option<VideoFrameEntry> {
        let mut latest = None;
        loop {
            match self.try_pop() {
                Some(entry) => latest = Some(entry),
                None => break,
            }
        }
        latest
    }

    fn try_pop(&mut self) -> Option<VideoFrameEntry> {
        loop {
            let head = self.inner.head.load(Ordering::Relaxed);
            let tail = self.inner.tail.load(Ordering::Acquire);
            if head == tail {
                return None;
            }
            let idx = head & self.inner.mask;
            // The producer can concurrently drop this same slot while
            // advancing head during an overwrite; re-check ownership
            // with a CAS before reading it out.
            if self
                .inner
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let value = unsafe { (*self.inner.slots[idx].cell.get()).assume_init_read() };
                return Some(value);
            }
        }
    }

    pub fn available(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_drop_newest_on_full() {
        let (mut prod, mut cons) = audio_ring(4);
        assert!(prod.write(&[1.0, 2.0]));
        assert!(!prod.write(&[3.0, 4.0, 5.0])); // doesn't fit in remaining 2 slots
        let mut out = [0.0f32; 4];
        let n = cons.read(&mut out);
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
    }

    fn entry(seq: u64) -> VideoFrameEntry {
        VideoFrameEntry {
            source_client_id: 1,
            sequence: seq,
            capture_ts_ns: seq,
            width: 1,
            height: 1,
            data: vec![seq as u8],
        }
    }

    #[test]
    fn video_drop_oldest_on_full() {
        let (mut prod, mut cons) = VideoFrameRingBuffer::new(2);
        prod.push(entry(1));
        prod.push(entry(2));
        prod.push(entry(3)); // drops seq=1
        assert_eq!(prod.dropped_oldest_count(), 1);
        let latest = cons.consume_latest().unwrap();
        assert_eq!(latest.sequence, 3);
    }

    #[test]
    fn video_consume_latest_drains_backlog() {
        let (mut prod, mut cons) = VideoFrameRingBuffer::new(8);
        for seq in 1..=4 {
            prod.push(entry(seq));
        }
        let latest = cons.consume_latest().unwrap();
        assert_eq!(latest.sequence, 4);
        assert!(cons.consume_latest().is_none());
    }
}
