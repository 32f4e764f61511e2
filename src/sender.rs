// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound Sender (C8): one dedicated thread per priority lane, each
//! popping pooled handles off its lane, serialising them, and writing the
//! bytes to the transport.
//!
//! Grounded on the teacher's `client/client.rs` write path (`write()`
//! locking the owned write half and calling `write_all`), generalized from
//! a single per-connection writer to four independent lane threads so a
//! CRITICAL message is never stuck behind MEDIUM/LOW traffic in the same
//! queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::message::FixMessage;
use crate::pool::MessagePool;
use crate::router::{Priority, PriorityQueueContainer};
use crate::transport::Transport;

pub const SEND_RETRY: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct SenderStatsSnapshot {
    pub sent: u64,
    pub retried: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct SenderStats {
    sent: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl SenderStats {
    fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Owns the four lane threads for a single session. Construct with
/// [`OutboundSender::spawn`], stop with [`OutboundSender::shutdown`].
pub struct OutboundSender {
    handles: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<[SenderStats; 4]>,
}

impl OutboundSender {
    pub fn spawn(lanes: Arc<PriorityQueueContainer>, pool: Arc<MessagePool>, transport: Arc<dyn Transport>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let stats: Arc<[SenderStats; 4]> = Arc::new(Default::default());
        let handles = Priority::ALL
            .into_iter()
            .map(|priority| {
                let lanes = Arc::clone(&lanes);
                let pool = Arc::clone(&pool);
                let transport = Arc::clone(&transport);
                let running = Arc::clone(&running);
                let stats = Arc::clone(&stats);
                thread::Builder::new()
                    .name(format!("fix-gw-sender-{}", priority.name().to_lowercase()))
                    .spawn(move || run_lane(priority, &lanes, &pool, transport.as_ref(), &running, &stats))
                    .expect("failed to spawn outbound sender thread")
            })
            .collect();
        Self { handles, running, stats }
    }

    pub fn stats(&self, priority: Priority) -> SenderStatsSnapshot {
        self.stats[priority.index()].snapshot()
    }

    /// Stops all four lane threads. Each thread drains its lane once more
    /// before exiting; anything still queued after that drain pass is
    /// released back to the pool, not leaked.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_lane(
    priority: Priority,
    lanes: &PriorityQueueContainer,
    pool: &MessagePool,
    transport: &dyn Transport,
    running: &AtomicBool,
    stats: &[SenderStats; 4],
) {
    let lane = lanes.lane(priority);
    let mut backoff = Duration::from_micros(50);
    loop {
        match lane.try_pop() {
            Some(handle) => {
                backoff = Duration::from_micros(50);
                send_one(handle, pool, transport, &stats[priority.index()]);
            },
            None => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            },
        }
    }
    // Final drain pass: release anything left queued at shutdown.
    while let Some(handle) = lane.try_pop() {
        send_one(handle, pool, transport, &stats[priority.index()]);
    }
}

/// Serialises `handle` and writes it to `transport`, retrying up to
/// [`SEND_RETRY`] times on transport failure before dropping the message.
/// The pool slot is always returned, success or failure.
fn send_one(handle: *mut FixMessage, pool: &MessagePool, transport: &dyn Transport, stats: &SenderStats) {
    // SAFETY: the lane handed us exclusive ownership of this slot.
    let bytes = unsafe { (*handle).to_bytes() }.to_vec();

    let mut attempt = 0;
    loop {
        match transport.send(&bytes) {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                break;
            },
            Err(err) => {
                attempt += 1;
                if attempt >= SEND_RETRY {
                    tracing::error!(error = %err, attempt, "dropping outbound message after exhausting retries");
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                tracing::warn!(error = %err, attempt, "transport send failed, retrying");
                stats.retried.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_micros(100 * u64::from(attempt)));
            },
        }
    }
    pool.deallocate(handle);
}
