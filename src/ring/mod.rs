// SPDX-License-Identifier: MIT OR Apache-2.0

//! A bounded, wait-free, single-producer/single-consumer ring buffer.
//!
//! Every hop in the gateway's datapath — parser → router, router → lane,
//! lane → sender, session → gap manager — is one of these. The element
//! type is usually a pointer-sized handle into the [`crate::pool`], but
//! the queue itself is generic over any `Copy` type (the gap manager
//! stores plain `i32` sequence numbers in one).
//!
//! The contract is strictly 1P/1C: exactly one thread may call `push`,
//! exactly one (possibly different) thread may call `try_pop`. The type
//! cannot enforce this at compile time without a handle-splitting API,
//! which is out of scope — misuse under that contract is a logic error,
//! not a memory-safety one, since every access still goes through an
//! atomic with the ordering below.
//!
//! Head and tail are plain indices into a power-of-two-sized buffer,
//! masked rather than carried as unbounded sequence numbers, so a slot
//! is free the moment its reader advances past it — one slot of the
//! backing array is always left empty to distinguish full from empty
//! (`usable capacity == buffer length - 1`).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Pads an atomic cursor out to its own cache line so producer and
/// consumer never false-share the line holding the other's cursor.
#[repr(align(64))]
struct CachePadded<T>(T);

pub struct RingQueue<T> {
    buffer: Box<[UnsafeCell<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    shutdown: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    name: String,
}

// SAFETY: `buffer` is only ever touched through `UnsafeCell::get()` at an
// index owned exclusively by the producer (push) or the consumer
// (try_pop) for the duration of one call, per the SPSC contract above.
// The cursors themselves are atomics with acquire/release ordering, so a
// value written by the producer is visible to the consumer before the
// consumer observes the advanced `tail`.
unsafe impl<T> Send for RingQueue<T> {}
unsafe impl<T> Sync for RingQueue<T> {}

impl<T: Copy + Default> RingQueue<T> {
    /// Rounds `capacity_hint` up so the queue can hold at least
    /// `capacity_hint` elements, minimum usable capacity of 1.
    pub fn new(capacity_hint: usize, name: impl Into<String>) -> Self {
        let usable = capacity_hint.max(1);
        let buffer_len = (usable + 1).next_power_of_two().max(2);
        let buffer = (0..buffer_len)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: buffer_len - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            name: name.into(),
        }
    }

    /// Usable capacity: one less than the backing buffer length.
    pub fn capacity(&self) -> usize {
        self.mask
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        let buffer_len = self.mask + 1;
        (tail + buffer_len - head) % buffer_len
    }

    pub fn is_empty(&self) -> bool {
        self.head.0.load(Ordering::Acquire) == self.tail.0.load(Ordering::Acquire)
    }

    /// Stores `value` at the tail. Returns `false` without storing if the
    /// queue is full or has been shut down.
    pub fn push(&self, value: T) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let tail = self.tail.0.load(Ordering::Relaxed);
        let next_tail = (tail + 1) & self.mask;
        if next_tail == self.head.0.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: `tail` is owned exclusively by the single producer.
        unsafe {
            *self.buffer[tail].get() = value;
        }
        self.tail.0.store(next_tail, Ordering::Release);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Pops the head element, or `None` if the queue is empty or has been
    /// shut down. Shutdown is checked first: once `shutdown()` is called,
    /// every subsequent `try_pop` returns `None` even if entries are still
    /// resident in the buffer.
    pub fn try_pop(&self) -> Option<T> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let head = self.head.0.load(Ordering::Relaxed);
        if head == self.tail.0.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `head` is owned exclusively by the single consumer, and
        // the Acquire load above synchronizes with the producer's Release
        // store of `tail`, so the element write is visible here.
        let value = unsafe { *self.buffer[head].get() };
        self.head.0.store((head + 1) & self.mask, Ordering::Release);
        self.popped.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Flips the shutdown flag; subsequent push/pop calls fail fast.
    /// Entries still resident in the buffer are not touched — if `T` is a
    /// pool handle, draining and deallocating them is the caller's job.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
