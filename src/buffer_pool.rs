//! Lock-free, size-classed buffer pool (spec §3.2, §4.2).
//!
//! This is the one module in the crate that works with raw pointers
//! directly (Design Notes §9, item 3): a Treiber stack per size class,
//! CAS'd on a tagged pointer (pointer packed with a generation counter
//! in the unused high bits of a 64-bit address) so a freed-and-reused
//! node can't be mistaken for the node a racing `pop` last observed.
//! Everything outside this module only ever sees `PooledBuffer`, which
//! is a safe handle: its `Drop` impl returns the buffer to its owning
//! pool, so "after release the caller must not touch the buffer" is
//! enforced by the borrow checker instead of by convention.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const FREE_CANARY: u32 = 0xF4EE_F4EE;
const INUSE_CANARY: u32 = 0xACE0_ACE0;

/// Size classes are powers of two from 256 B up to this ceiling; a
/// request larger than the ceiling bypasses the pool entirely.
const MIN_CLASS_SHIFT: u32 = 8; // 256 B
const MAX_CLASS_SHIFT: u32 = 22; // 4 MiB
const NUM_CLASSES: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

fn class_for(n: usize) -> Option<(usize, usize)> {
    if n == 0 {
        return Some((0, 1usize << MIN_CLASS_SHIFT));
    }
    let shift = (usize::BITS - (n - 1).leading_zeros()).max(MIN_CLASS_SHIFT);
    if shift > MAX_CLASS_SHIFT {
        return None;
    }
    let idx = (shift - MIN_CLASS_SHIFT) as usize;
    Some((idx, 1usize << shift))
}

struct Node {
    next: AtomicU64,
    canary: AtomicU32,
    capacity: usize,
    data: UnsafeCell<Vec<u8>>,
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}

/// Pointer + 16-bit generation tag packed into a u64 (assumes a 64-bit
/// address space where the top 16 bits of a real pointer are unused).
#[inline]
fn pack(ptr: *mut Node, tag: u16) -> u64 {
    (ptr as u64 & 0x0000_FFFF_FFFF_FFFF) | ((tag as u64) << 48)
}

#[inline]
fn unpack(v: u64) -> (*mut Node, u16) {
    let ptr = (v & 0x0000_FFFF_FFFF_FFFF) as *mut Node;
    let tag = (v >> 48) as u16;
    (ptr, tag)
}

struct TaggedStack {
    head: AtomicU64,
}

impl TaggedStack {
    fn new() -> Self {
        Self { head: AtomicU64::new(0) }
    }

    fn push(&self, node: *mut Node) {
        loop {
            let cur = self.head.load(Ordering::Acquire);
            let (cur_ptr, tag) = unpack(cur);
            unsafe { (*node).next.store(pack(cur_ptr, 0), Ordering::Relaxed) };
            let new = pack(node, tag.wrapping_add(1));
            if self
                .head
                .compare_exchange_weak(cur, new, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn pop(&self) -> Option<*mut Node> {
        loop {
            let cur = self.head.load(Ordering::Acquire);
            let (cur_ptr, tag) = unpack(cur);
            if cur_ptr.is_null() {
                return None;
            }
            let next = unsafe { (*cur_ptr).next.load(Ordering::Relaxed) };
            let (next_ptr, _) = unpack(next);
            let new = pack(next_ptr, tag.wrapping_add(1));
            if self
                .head
                .compare_exchange_weak(cur, new, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(cur_ptr);
            }
        }
    }
}

#[derive(Default)]
pub struct PoolStats {
    pub bytes_in_use: AtomicUsize,
    pub peak_bytes: AtomicUsize,
    pub hits: AtomicUsize,
    pub new_allocations: AtomicUsize,
    pub returns: AtomicUsize,
    pub bypass: AtomicUsize,
}

struct Inner {
    classes: [TaggedStack; NUM_CLASSES],
    census: [AtomicUsize; NUM_CLASSES],
    idle_counts: [AtomicUsize; NUM_CLASSES],
    stats: PoolStats,
    shrink_lock: parking_lot::Mutex<()>,
    high_water_idle: usize,
}

/// Lock-free size-classed buffer pool.
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_high_water(64)
    }

    pub fn with_high_water(high_water_idle: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                classes: std::array::from_fn(|_| TaggedStack::new()),
                census: std::array::from_fn(|_| AtomicUsize::new(0)),
                idle_counts: std::array::from_fn(|_| AtomicUsize::new(0)),
                stats: PoolStats::default(),
                shrink_lock: parking_lot::Mutex::new(()),
                high_water_idle,
            }),
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }

    /// Acquire a buffer with capacity >= `n`. Falls back to a plain heap
    /// allocation (not returned to any free list) when `n` exceeds the
    /// largest size class; the matching `release` (via `Drop`) notices
    /// the bypass and just frees it.
    pub fn acquire(&self, n: usize) -> PooledBuffer {
        match class_for(n) {
            Some((idx, cap)) => {
                if let Some(raw) = self.inner.classes[idx].pop() {
                    self.inner.idle_counts[idx].fetch_sub(1, Ordering::Relaxed);
                    unsafe {
                        let prev = (*raw).canary.swap(INUSE_CANARY, Ordering::AcqRel);
                        debug_assert_eq!(prev, FREE_CANARY, "buffer pool double-acquire");
                        (*raw).data.get().as_mut().unwrap().resize(n, 0);
                    }
                    self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                    self.track_acquire(cap);
                    return PooledBuffer {
                        node: raw,
                        pool: Some(self.inner.clone()),
                        class: idx,
                        requested_len: n,
                        bypass_vec: None,
                    };
                }
                let node = Box::into_raw(Box::new(Node {
                    next: AtomicU64::new(0),
                    canary: AtomicU32::new(INUSE_CANARY),
                    capacity: cap,
                    data: UnsafeCell::new(vec![0u8; n]),
                }));
                self.inner.census[idx].fetch_add(1, Ordering::Relaxed);
                self.inner.stats.new_allocations.fetch_add(1, Ordering::Relaxed);
                self.track_acquire(cap);
                PooledBuffer {
                    node,
                    pool: Some(self.inner.clone()),
                    class: idx,
                    requested_len: n,
                    bypass_vec: None,
                }
            }
            None => {
                self.inner.stats.bypass.fetch_add(1, Ordering::Relaxed);
                PooledBuffer {
                    node: ptr::null_mut(),
                    pool: None,
                    class: usize::MAX,
                    requested_len: n,
                    bypass_vec: None,
                }
                .with_bypass(n)
            }
        }
    }

    fn track_acquire(&self, cap: usize) {
        let now = self.inner.stats.bytes_in_use.fetch_add(cap, Ordering::Relaxed) + cap;
        let mut peak = self.inner.stats.peak_bytes.load(Ordering::Relaxed);
        while now > peak {
            match self.inner.stats.peak_bytes.compare_exchange_weak(
                peak,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    /// Periodic shrink policy: trims idle buffers above the high-water
    /// mark. Serialized with itself, runs concurrently with acquire/release.
    pub fn shrink(&self) {
        let _guard = self.inner.shrink_lock.lock();
        for idx in 0..NUM_CLASSES {
            while self.inner.idle_counts[idx].load(Ordering::Relaxed) > self.inner.high_water_idle
            {
                match self.inner.classes[idx].pop() {
                    Some(raw) => {
                        self.inner.idle_counts[idx].fetch_sub(1, Ordering::Relaxed);
                        self.inner.census[idx].fetch_sub(1, Ordering::Relaxed);
                        let cap = unsafe { (*raw).capacity };
                        self.inner.stats.bytes_in_use.fetch_sub(cap, Ordering::Relaxed);
                        unsafe { drop(Box::from_raw(raw)) };
                    }
                    None => break,
                }
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An acquired buffer. Returned to its owning pool's free list on drop.
/// A buffer that exceeded the largest size class instead owns its bytes
/// directly in `bypass_vec` and is simply dropped (not returned to a list).
pub struct PooledBuffer {
    node: *mut Node,
    pool: Option<Arc<Inner>>,
    class: usize,
    requested_len: usize,
    bypass_vec: Option<Vec<u8>>,
}

impl PooledBuffer {
    fn with_bypass(mut self, n: usize) -> Self {
        self.requested_len = n;
        self.bypass_vec = Some(vec![0u8; n]);
        self
    }

    pub fn len(&self) -> usize {
        self.requested_len
    }

    pub fn is_empty(&self) -> bool {
        self.requested_len == 0
    }

    pub fn capacity(&self) -> usize {
        if let Some(v) = &self.bypass_vec {
            v.capacity()
        } else {
            unsafe { (*self.node).capacity }
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        if let Some(v) = &self.bypass_vec {
            &v[..self.requested_len]
        } else {
            let v = unsafe { &*self.node.as_ref().unwrap().data.get() };
            &v[..self.requested_len]
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        if let Some(v) = self.bypass_vec.as_mut() {
            &mut v[..self.requested_len]
        } else {
            let v = unsafe { &mut *self.node.as_ref().unwrap().data.get() };
            &mut v[..self.requested_len]
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else { return };
        if self.node.is_null() {
            return;
        }
        let raw = self.node;
        let idx = self.class;
        unsafe {
            let prev = (*raw).canary.swap(FREE_CANARY, Ordering::AcqRel);
            debug_assert_eq!(prev, INUSE_CANARY, "buffer pool double-release");
        }
        let cap = unsafe { (*raw).capacity };
        pool.stats.bytes_in_use.fetch_sub(cap, Ordering::Relaxed);
        pool.stats.returns.fetch_add(1, Ordering::Relaxed);
        pool.idle_counts[idx].fetch_add(1, Ordering::Relaxed);
        pool.classes[idx].push(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn acquire_gives_requested_len() {
        let pool = BufferPool::new();
        let buf = pool.acquire(100);
        assert_eq!(buf.len(), 100);
        assert!(buf.capacity() >= 100);
    }

    #[test]
    fn zero_length_acquire_is_valid() {
        let pool = BufferPool::new();
        let buf = pool.acquire(0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn release_then_acquire_reuses_buffer() {
        let pool = BufferPool::new();
        {
            let _buf = pool.acquire(300);
        }
        assert_eq!(pool.stats().new_allocations.load(Ordering::Relaxed), 1);
        let _buf2 = pool.acquire(200);
        assert_eq!(pool.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().new_allocations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn oversize_request_bypasses_pool() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64 * 1024 * 1024);
        assert_eq!(buf.len(), 64 * 1024 * 1024);
        assert_eq!(pool.stats().bypass.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn concurrent_acquire_release_is_consistent() {
        let pool = BufferPool::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let mut buf = pool.acquire(512);
                    buf[0] = 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.stats().bytes_in_use.load(Ordering::Relaxed), 0);
    }
}
