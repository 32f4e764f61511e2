// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classifies a parsed [`FixMessage`] by cached `MsgType` and fans it out
//! across four priority lanes.
//!
//! Grounded on the classifier/dispatch shape of
//! `other_examples/4740afab_jwilger-caxton__src-message_router-mod.rs.rs`
//! (pure function from a message kind to a destination), generalized from
//! an actor mailbox address to a [`crate::ring::RingQueue`] lane index. The
//! teacher crate has no router of its own — a single iSCSI session has one
//! stream, not a priority fan-out.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::{FixMessage, MsgType};
use crate::pool::MessagePool;
use crate::ring::RingQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

/// Extra classification context a caller passes alongside a bare `MsgType`.
/// Two `MsgType`s route differently depending on why they're being sent
/// rather than what they are (§4.5's two distinct rows for `ResendRequest`
/// and for `Heartbeat`):
/// - `from_gap_manager`: a `ResendRequest` the gap manager itself emitted is
///   CRITICAL; one received off the wire is MEDIUM.
/// - `heartbeat_reply`: a `Heartbeat` sent in direct reply to a `TestRequest`
///   is HIGH; a spontaneous one (the idle-scheduling case) is LOW.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteHint {
    pub from_gap_manager: bool,
    pub heartbeat_reply: bool,
}

/// Classifies an already-cached `MsgType` into a lane, given the extra
/// context a [`RouteHint`] carries.
pub fn classify(msg_type: MsgType, hint: RouteHint) -> Priority {
    match msg_type {
        MsgType::ExecutionReport
        | MsgType::OrderCancelReject
        | MsgType::NewOrderSingle
        | MsgType::OrderCancelRequest
        | MsgType::OrderCancelReplaceRequest
        | MsgType::OrderStatusRequest
        | MsgType::Logon
        | MsgType::Logout => Priority::Critical,
        MsgType::ResendRequest if hint.from_gap_manager => Priority::Critical,
        MsgType::Heartbeat if hint.heartbeat_reply => Priority::High,
        MsgType::MarketDataRequest
        | MsgType::MarketDataSnapshot
        | MsgType::MarketDataIncrementalRefresh
        | MsgType::MarketDataRequestReject => Priority::High,
        MsgType::TestRequest | MsgType::ResendRequest | MsgType::Reject | MsgType::SequenceReset => {
            Priority::Medium
        },
        MsgType::Heartbeat | MsgType::Unknown => Priority::Low,
    }
}

/// Default capacities from §3: CRITICAL=2048, HIGH=2048, MEDIUM=1024,
/// LOW=512.
pub const DEFAULT_CAPACITIES: [usize; 4] = [2048, 2048, 1024, 512];

/// Fixed array of four lanes, one `RingQueue` of pool-slot pointers per
/// [`Priority`]. Each lane is its own 1P/1C queue: the router is the sole
/// producer, the lane's [`crate::sender::OutboundSender`] the sole
/// consumer.
pub struct PriorityQueueContainer {
    lanes: [RingQueue<*mut FixMessage>; 4],
    dropped: [AtomicU64; 4],
}

// SAFETY: `*mut FixMessage` handles only ever point into a `MessagePool`
// slot and are moved, never dereferenced concurrently from more than one
// owner, by the same contract the pool itself relies on.
unsafe impl Send for PriorityQueueContainer {}
unsafe impl Sync for PriorityQueueContainer {}

impl PriorityQueueContainer {
    pub fn new(capacities: [usize; 4]) -> Self {
        Self {
            lanes: [
                RingQueue::new(capacities[0], "lane-critical"),
                RingQueue::new(capacities[1], "lane-high"),
                RingQueue::new(capacities[2], "lane-medium"),
                RingQueue::new(capacities[3], "lane-low"),
            ],
            dropped: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    pub fn lane(&self, priority: Priority) -> &RingQueue<*mut FixMessage> {
        &self.lanes[priority.index()]
    }

    pub fn dropped(&self, priority: Priority) -> u64 {
        self.dropped[priority.index()].load(Ordering::Relaxed)
    }

    pub fn shutdown_all(&self) {
        for lane in &self.lanes {
            lane.shutdown();
        }
    }

    /// Pushes `handle` onto `priority`'s lane. On a full lane the message is
    /// returned to `pool` (no leak), the lane's drop counter is bumped, and
    /// `false` is returned so the caller can log.
    pub fn route_to(
        &self,
        priority: Priority,
        handle: *mut FixMessage,
        pool: &MessagePool,
    ) -> bool {
        if self.lane(priority).push(handle) {
            true
        } else {
            self.dropped[priority.index()].fetch_add(1, Ordering::Relaxed);
            pool.deallocate(handle);
            false
        }
    }
}

/// Wait-free classify-then-push for an inbound/outbound message. Returns
/// the priority it was routed to and whether the push succeeded.
pub fn route(
    lanes: &PriorityQueueContainer,
    pool: &MessagePool,
    handle: *mut FixMessage,
    hint: RouteHint,
) -> (Priority, bool) {
    // SAFETY: `handle` is an exclusively-owned pool slot passed in by the
    // caller for the duration of this call.
    let msg_type = unsafe { (*handle).msg_type() };
    let priority = classify(msg_type, hint);
    let ok = lanes.route_to(priority, handle, pool);
    (priority, ok)
}
