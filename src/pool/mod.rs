// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-capacity lock-free object pool for [`crate::message::FixMessage`].
//!
//! The pool owns a flat array of message slots for its entire lifetime
//! and hands out raw pointers into that array. A slot is either *free*
//! (reachable from `head` by following `next` links) or *in use* (a
//! pointer to it is in circulation somewhere in the gateway). There is
//! no reference counting: exactly one component owns a handle at a
//! time, and ownership moves by value through the ring queues.
//!
//! Grounded on the atomic-free-list-over-a-fixed-array shape of a
//! slab allocator, generalized from a byte-slab to a slab of typed
//! message slots, with the bitmap swapped for an intrusive linked
//! free list (`next[i]` rather than a bit per slot) since the pool
//! does not need variable-size classes.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

use crate::message::FixMessage;

const NIL: i32 = -1;

pub struct MessagePool {
    slots: Box<[UnsafeCell<FixMessage>]>,
    next: Box<[AtomicI32]>,
    head: AtomicI32,
    capacity: usize,
    in_use: AtomicUsize,
    total_allocated: AtomicU64,
    alloc_failures: AtomicU64,
    shutdown: AtomicBool,
    name: String,
}

// SAFETY: every slot is reached by exactly one thread at a time — the
// CAS on `head`/`next` hands a slot index to at most one allocator, and
// a pointer is only ever live between a successful `allocate` and the
// matching `deallocate`. The pool's own bookkeeping (`next`, `head`) is
// all atomic.
unsafe impl Send for MessagePool {}
unsafe impl Sync for MessagePool {}

impl MessagePool {
    pub fn new(capacity: usize, name: impl Into<String>) -> Self {
        assert!(capacity > 0, "message pool capacity must be >= 1");

        // Building every slot via `FixMessage::new()` up front (rather
        // than lazily on first allocation) is the prewarm: it forces the
        // backing pages resident before the pool is ever used on the hot
        // path.
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(FixMessage::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let next: Vec<AtomicI32> = (0..capacity)
            .map(|i| {
                let nxt = if i + 1 < capacity { i as i32 + 1 } else { NIL };
                AtomicI32::new(nxt)
            })
            .collect();

        Self {
            slots,
            next: next.into_boxed_slice(),
            head: AtomicI32::new(0),
            capacity,
            in_use: AtomicUsize::new(0),
            total_allocated: AtomicU64::new(0),
            alloc_failures: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            name: name.into(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Relaxed)
    }

    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures.load(Ordering::Relaxed)
    }

    /// Pops a free slot and returns a pointer to it. The slot's contents
    /// are **not** cleared — they hold whatever the previous occupant
    /// left behind, so callers must overwrite every field they read.
    pub fn allocate(&self) -> Option<*mut FixMessage> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == NIL {
                self.alloc_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let idx = head as usize;
            let next_head = self.next[idx].load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, next_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.in_use.fetch_add(1, Ordering::Relaxed);
                self.total_allocated.fetch_add(1, Ordering::Relaxed);
                return Some(self.slots[idx].get());
            }
            // Lost the race against another allocator; retry.
        }
    }

    /// Convenience constructor: allocates a slot and resets it to a
    /// known-empty state with the supplied message type and sequence
    /// number already populated in the header.
    pub fn allocate_and_init(&self, msg_type: &[u8], msg_seq_num: i32) -> Option<*mut FixMessage> {
        let ptr = self.allocate()?;
        // SAFETY: `ptr` was just allocated and is not yet visible to any
        // other thread.
        let msg = unsafe { &mut *ptr };
        msg.reset();
        msg.set_field(crate::message::TAG_MSG_TYPE, msg_type);
        msg.set_field(
            crate::message::TAG_MSG_SEQ_NUM,
            msg_seq_num.to_string().as_bytes(),
        );
        Some(ptr)
    }

    /// Returns a slot to the free list. Pointers outside the slot array,
    /// or not aligned to a slot boundary, are rejected and logged rather
    /// than causing memory corruption.
    pub fn deallocate(&self, ptr: *mut FixMessage) {
        let Some(idx) = self.slot_index_of(ptr) else {
            tracing::error!("MessagePool::deallocate: pointer is not a slot of this pool, ignoring");
            return;
        };
        loop {
            let head = self.head.load(Ordering::Acquire);
            self.next[idx].store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, idx as i32, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.in_use.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        }
    }

    fn slot_index_of(&self, ptr: *mut FixMessage) -> Option<usize> {
        if ptr.is_null() {
            return None;
        }
        let base = self.slots.as_ptr() as usize;
        let addr = ptr as usize;
        let stride = std::mem::size_of::<FixMessage>();
        if addr < base {
            return None;
        }
        let offset = addr - base;
        if offset % stride != 0 {
            return None;
        }
        let idx = offset / stride;
        (idx < self.capacity).then_some(idx)
    }

    /// Rebuilds the free list from scratch. Callers must ensure no
    /// handles from this pool are still outstanding.
    pub fn reset(&self) {
        for i in 0..self.capacity {
            let nxt = if i + 1 < self.capacity { i as i32 + 1 } else { NIL };
            self.next[i].store(nxt, Ordering::Relaxed);
        }
        self.head.store(0, Ordering::Release);
        self.in_use.store(0, Ordering::Release);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
