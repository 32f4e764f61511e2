// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gap Manager (C7): tracks inbound `MsgSeqNum` gaps, retries a
//! `ResendRequest` with backoff, and gives up after `MAX_RETRY` attempts.
//!
//! The spec's source used the SPSC `RingQueue` itself as the gap-tracking
//! structure, drained and refilled by whichever thread called
//! `resolve_gap`/`has_gap` — which is exactly the multi-producer access
//! the ring's single-producer contract forbids (see the Open Questions
//! resolution in SPEC_FULL.md §9). This implementation keeps the rotating
//! deque in a plain `Mutex<VecDeque<GapEntry>>` instead: `add_gap` and
//! `resolve_gap` are called off the gap manager's own thread (from the
//! session thread, when it detects a hole), so they need real mutual
//! exclusion, not a wait-free single-writer structure — but the lock is
//! only ever taken for a handful of entries at a time, off the message hot
//! path, which is the "small lock reserved for a non-hot-path query" the
//! spec allows.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::clock;
use crate::message::MessageFactory;
use crate::pool::MessagePool;
use crate::router::{self, PriorityQueueContainer};
use crate::session::SessionContext;

pub const GAP_QUEUE_SIZE: usize = 1024;
pub const TIMEOUT_MS: u64 = 10_000;
pub const MAX_RETRY: i32 = 5;
pub const POLL_MS: u64 = 1;
pub const WARN_THRESHOLD: usize = 50;
pub const CRITICAL_THRESHOLD: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapEntry {
    pub seq_num: i32,
    pub first_seen_ns: u64,
    pub timeout_deadline_ns: u64,
    pub retry_count: i32,
    pub resolved: bool,
}

pub struct GapManager {
    entries: Mutex<VecDeque<GapEntry>>,
    capacity: usize,
    timeout_ns: u64,
    poll_interval: Duration,
    resends_emitted: AtomicU64,
    given_up: AtomicU64,
    overflow: AtomicU64,
    running: AtomicBool,
}

impl GapManager {
    pub fn new() -> Self {
        Self::with_capacity(GAP_QUEUE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_params(capacity, Duration::from_millis(TIMEOUT_MS), Duration::from_millis(POLL_MS))
    }

    /// Builds a gap manager from the default queue size and the operator's
    /// configured `gap_timeout`/`gap_poll_interval` (§9 of SPEC_FULL.md:
    /// the module constants stay the defaults, now overridable per-config
    /// rather than hardcoded for every deployment).
    pub fn with_timeout_and_poll(timeout: Duration, poll: Duration) -> Self {
        Self::with_params(GAP_QUEUE_SIZE, timeout, poll)
    }

    pub fn with_params(capacity: usize, timeout: Duration, poll: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(GAP_QUEUE_SIZE))),
            capacity,
            timeout_ns: timeout.as_nanos() as u64,
            poll_interval: poll,
            resends_emitted: AtomicU64::new(0),
            given_up: AtomicU64::new(0),
            overflow: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }

    /// Pushes a new gap entry. Overflow (the deque already at `capacity`)
    /// is a logged warning, not an error: the tick loop will simply never
    /// see this gap and the session relies on the counterparty's own
    /// resend behaviour instead.
    pub fn add_gap(&self, seq_num: i32) {
        let now = clock::now_nanos();
        let mut entries = self.entries.lock().expect("gap manager mutex poisoned");
        if entries.iter().any(|e| e.seq_num == seq_num) {
            return;
        }
        if entries.len() >= self.capacity {
            self.overflow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(seq_num, "gap queue overflow, dropping new gap entry");
            return;
        }
        entries.push_back(GapEntry {
            seq_num,
            first_seen_ns: now,
            timeout_deadline_ns: now + self.timeout_ns,
            retry_count: 0,
            resolved: false,
        });
    }

    /// Drain-and-filter: marks the matching entry resolved so the next
    /// tick discards it instead of retrying.
    pub fn resolve_gap(&self, seq_num: i32) {
        let mut entries = self.entries.lock().expect("gap manager mutex poisoned");
        for entry in entries.iter_mut() {
            if entry.seq_num == seq_num {
                entry.resolved = true;
            }
        }
    }

    pub fn has_gap(&self, seq_num: i32) -> bool {
        let entries = self.entries.lock().expect("gap manager mutex poisoned");
        entries.iter().any(|e| e.seq_num == seq_num && !e.resolved)
    }

    pub fn count(&self) -> usize {
        let entries = self.entries.lock().expect("gap manager mutex poisoned");
        entries.iter().filter(|e| !e.resolved).count()
    }

    pub fn resends_emitted(&self) -> u64 {
        self.resends_emitted.load(Ordering::Relaxed)
    }

    pub fn given_up(&self) -> u64 {
        self.given_up.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One pass over the rotating deque: discards resolved entries,
    /// retries timed-out ones (emitting a CRITICAL-lane ResendRequest),
    /// and gives up on anything past `MAX_RETRY`. Meant to be called every
    /// `POLL_MS` from the gap manager's dedicated thread, but exposed as a
    /// plain method so tests can drive it deterministically.
    pub fn tick(&self, session: &SessionContext, lanes: &PriorityQueueContainer, pool: &MessagePool) {
        let now = clock::now_nanos();
        let mut entries = self.entries.lock().expect("gap manager mutex poisoned");
        let mut next = VecDeque::with_capacity(entries.len());
        for mut entry in entries.drain(..) {
            if entry.resolved {
                continue;
            }
            if now <= entry.timeout_deadline_ns {
                next.push_back(entry);
                continue;
            }
            if entry.retry_count >= MAX_RETRY {
                tracing::error!(seq_num = entry.seq_num, retries = entry.retry_count, "gap permanently missing, giving up");
                self.given_up.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if emit_resend_request(session, lanes, pool, entry.seq_num) {
                entry.retry_count += 1;
                entry.timeout_deadline_ns = now + self.timeout_ns;
                self.resends_emitted.fetch_add(1, Ordering::Relaxed);
            }
            // Push failed: leave retry_count/deadline untouched so the gap
            // stays visible and is retried on the very next tick.
            next.push_back(entry);
        }
        let pending = next.len();
        *entries = next;
        drop(entries);

        if pending > CRITICAL_THRESHOLD {
            tracing::error!(pending, "gap queue depth above CRITICAL_THRESHOLD");
        } else if pending > WARN_THRESHOLD {
            tracing::warn!(pending, "gap queue depth above WARN_THRESHOLD");
        }
    }

    /// The gap manager's own thread body: polls `tick` every `POLL_MS`
    /// until `shutdown()` is called.
    pub fn run(&self, session: &SessionContext, lanes: &PriorityQueueContainer, pool: &MessagePool) {
        while self.running.load(Ordering::Acquire) {
            self.tick(session, lanes, pool);
            thread::sleep(self.poll_interval);
        }
    }
}

impl Default for GapManager {
    fn default() -> Self {
        Self::new()
    }
}

fn emit_resend_request(session: &SessionContext, lanes: &PriorityQueueContainer, pool: &MessagePool, seq_num: i32) -> bool {
    let out_seq = session.next_outbound_seq();
    let Some(handle) =
        MessageFactory::resend_request(pool, &session.begin_string, out_seq, &session.sender_comp_id, &session.target_comp_id, seq_num, seq_num)
    else {
        tracing::warn!(seq_num, "pool exhausted, could not build ResendRequest this tick");
        return false;
    };
    let hint = router::RouteHint { from_gap_manager: true, ..Default::default() };
    let (_priority, ok) = router::route(lanes, pool, handle, hint);
    ok
}
