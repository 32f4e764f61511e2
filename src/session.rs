// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session state machine (C6): Logon/Logout/Heartbeat/TestRequest/
//! ResendRequest/SequenceReset/Reject handling plus inbound sequence-number
//! continuity enforcement.
//!
//! Grounded on the `state: Option<States>` + `.take()` drive loop in the
//! teacher's `state_machine/nop_states.rs`, generalized from an async
//! per-exchange sub-state-machine (one `NopCtx` per NOP-Out/NOP-In round
//! trip, stepped by `.await`) to one long-lived synchronous state machine,
//! stepped once per inbound message by the session thread and stored behind
//! a plain `Mutex<SessionState>` rather than an `Option` slot, since the
//! session always has a current state and never needs to observe a gap
//! between "old" and "new".

use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use crate::clock;
use crate::gap::GapManager;
use crate::message::{
    FixMessage, MessageFactory, MsgType, TAG_BEGIN_SEQ_NO, TAG_END_SEQ_NO, TAG_GAP_FILL_FLAG,
    TAG_HEART_BT_INT, TAG_MSG_SEQ_NUM, TAG_NEW_SEQ_NO, TAG_POSS_DUP_FLAG, TAG_SENDER_COMP_ID,
    TAG_TARGET_COMP_ID, TAG_TEST_REQ_ID,
};
use crate::pool::MessagePool;
use crate::router::{self, PriorityQueueContainer, RouteHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LogonSent,
    LoggedOn,
    LogoutSent,
    Disconnecting,
}

/// What the caller (the session thread) should do with the handle it
/// passed in. Admin traffic is fully consumed here; anything else is
/// business-layer traffic the gateway facade forwards to its message
/// callback before returning the slot to the pool.
pub enum SessionOutcome {
    Consumed,
    Forward(*mut FixMessage),
    Rejected,
}

/// `{sender_comp_id, target_comp_id, outgoing_seq_num, expected_incoming_seq_num}`
/// per §3. `next_outbound_seq` is an atomic fetch-and-add.
pub struct SessionContext {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub begin_string: String,
    outgoing_seq_num: AtomicI32,
    expected_incoming_seq_num: AtomicI32,
}

impl SessionContext {
    pub fn new(sender_comp_id: impl Into<String>, target_comp_id: impl Into<String>, begin_string: impl Into<String>) -> Self {
        Self {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            begin_string: begin_string.into(),
            outgoing_seq_num: AtomicI32::new(1),
            expected_incoming_seq_num: AtomicI32::new(1),
        }
    }

    pub fn next_outbound_seq(&self) -> i32 {
        self.outgoing_seq_num.fetch_add(1, Ordering::AcqRel)
    }

    pub fn expected_incoming(&self) -> i32 {
        self.expected_incoming_seq_num.load(Ordering::Acquire)
    }

    pub fn set_expected_incoming(&self, value: i32) {
        self.expected_incoming_seq_num.store(value, Ordering::Release);
    }

    pub fn reset_sequence_numbers(&self) {
        self.outgoing_seq_num.store(1, Ordering::Release);
        self.expected_incoming_seq_num.store(1, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqOutcome {
    Accept,
    AcceptDuplicate,
    AcceptWithGap,
    TooLow,
}

/// Heartbeat scheduling state, driven by a dedicated 1 s timer thread
/// (`run_heartbeat_loop`). `heart_bt_int_ns` is set once at Logon.
struct HeartbeatState {
    heart_bt_int_ns: AtomicU64,
    last_sent_ns: AtomicU64,
    last_received_ns: AtomicU64,
    test_request_pending_since_ns: AtomicU64,
    test_req_id_seq: AtomicU64,
    pending_test_req_id: Mutex<Option<String>>,
}

impl HeartbeatState {
    fn new() -> Self {
        Self {
            heart_bt_int_ns: AtomicU64::new(30_000_000_000),
            last_sent_ns: AtomicU64::new(0),
            last_received_ns: AtomicU64::new(0),
            test_request_pending_since_ns: AtomicU64::new(0),
            test_req_id_seq: AtomicU64::new(0),
            pending_test_req_id: Mutex::new(None),
        }
    }

    fn note_received(&self) {
        self.last_received_ns.store(clock::now_nanos(), Ordering::Relaxed);
    }

    fn note_sent(&self) {
        self.last_sent_ns.store(clock::now_nanos(), Ordering::Relaxed);
    }
}

pub struct SessionManager {
    ctx: SessionContext,
    state: Mutex<SessionState>,
    heartbeat: HeartbeatState,
    reject_count: AtomicU64,
    /// Deadline for an acknowledging Logon while in `LogonSent`, or `0` when
    /// no Logon is outstanding. Checked once per second by the same timer
    /// thread that drives [`Self::heartbeat_tick`].
    logon_deadline_ns: AtomicU64,
}

impl SessionManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            state: Mutex::new(SessionState::Disconnected),
            heartbeat: HeartbeatState::new(),
            reject_count: AtomicU64::new(0),
            logon_deadline_ns: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    fn transition_to(&self, next: SessionState) {
        *self.state.lock().expect("session state mutex poisoned") = next;
    }

    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(Ordering::Relaxed)
    }

    /// `Disconnected -> Connecting`, builds the Logon to send. Arms the
    /// logon-acknowledgement deadline at `now + logon_timeout`; a
    /// counterparty Logon clears it, [`Self::check_logon_timeout`] enforces
    /// it.
    pub fn begin_logon(&self, pool: &MessagePool, heart_bt_int: i32, logon_timeout: Duration) -> Option<*mut FixMessage> {
        self.transition_to(SessionState::Connecting);
        self.heartbeat
            .heart_bt_int_ns
            .store(i64::from(heart_bt_int).max(1) as u64 * 1_000_000_000, Ordering::Relaxed);
        let seq = self.ctx.next_outbound_seq();
        let handle = MessageFactory::logon(
            pool,
            &self.ctx.begin_string,
            seq,
            &self.ctx.sender_comp_id,
            &self.ctx.target_comp_id,
            heart_bt_int,
            false,
        )?;
        self.logon_deadline_ns.store(clock::now_nanos() + logon_timeout.as_nanos() as u64, Ordering::Relaxed);
        self.transition_to(SessionState::LogonSent);
        self.heartbeat.note_sent();
        Some(handle)
    }

    /// `LoggedOn/LogonSent -> LogoutSent`, builds the Logout to send.
    pub fn begin_logout(&self, pool: &MessagePool, text: Option<&str>) -> Option<*mut FixMessage> {
        self.transition_to(SessionState::LogoutSent);
        let seq = self.ctx.next_outbound_seq();
        MessageFactory::logout(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, text)
    }

    pub fn on_transport_disconnect(&self) {
        self.transition_to(SessionState::Disconnected);
    }

    fn validate_sequence(&self, msg: &mut FixMessage, gap: &GapManager) -> SeqOutcome {
        let incoming = msg.get_field_i64(TAG_MSG_SEQ_NUM).unwrap_or(0) as i32;
        let expected = self.ctx.expected_incoming();
        if incoming == expected {
            self.ctx.set_expected_incoming(expected + 1);
            SeqOutcome::Accept
        } else if incoming > expected {
            for seq in expected..incoming {
                gap.add_gap(seq);
            }
            self.ctx.set_expected_incoming(incoming + 1);
            SeqOutcome::AcceptWithGap
        } else {
            let poss_dup = msg.get_field(TAG_POSS_DUP_FLAG) == Some(b"Y".as_slice());
            if poss_dup {
                gap.resolve_gap(incoming);
                SeqOutcome::AcceptDuplicate
            } else {
                SeqOutcome::TooLow
            }
        }
    }

    /// Processes one inbound message. Admin traffic is fully handled (the
    /// handle is returned to `pool` before this returns); anything else
    /// comes back as `SessionOutcome::Forward` for the caller to pass to
    /// the business-message callback.
    pub fn process_inbound(
        &self,
        handle: *mut FixMessage,
        gap: &GapManager,
        lanes: &PriorityQueueContainer,
        pool: &MessagePool,
    ) -> SessionOutcome {
        // SAFETY: caller hands over exclusive ownership of `handle` for the
        // duration of this call.
        let msg = unsafe { &mut *handle };
        self.heartbeat.note_received();

        match self.validate_sequence(msg, gap) {
            SeqOutcome::TooLow => {
                pool.deallocate(handle);
                if let Some(logout) = self.begin_logout(pool, Some("MsgSeqNum too low, expected larger")) {
                    self.transition_to(SessionState::Disconnecting);
                    route_outbound(lanes, pool, logout);
                }
                return SessionOutcome::Rejected;
            },
            SeqOutcome::Accept | SeqOutcome::AcceptWithGap | SeqOutcome::AcceptDuplicate => {},
        }

        let msg_type = msg.msg_type();
        if !msg_type.is_admin() {
            return SessionOutcome::Forward(handle);
        }

        match msg_type {
            MsgType::Logon => self.handle_logon(msg, pool, lanes),
            MsgType::Logout => self.handle_logout(msg, pool, lanes),
            MsgType::Heartbeat => self.handle_heartbeat(msg),
            MsgType::TestRequest => self.handle_test_request(msg, pool, lanes),
            MsgType::ResendRequest => self.handle_resend_request(msg, pool, lanes),
            MsgType::SequenceReset => self.handle_sequence_reset(msg),
            MsgType::Reject => {
                self.reject_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ref_seq = msg.get_field_i64(crate::message::TAG_REF_SEQ_NUM), "received Reject");
            },
            _ => unreachable!("non-admin types are forwarded above"),
        }

        pool.deallocate(handle);
        SessionOutcome::Consumed
    }

    fn handle_logon(&self, msg: &mut FixMessage, pool: &MessagePool, lanes: &PriorityQueueContainer) {
        let sender_ok = msg.get_field(TAG_SENDER_COMP_ID) == Some(self.ctx.target_comp_id.as_bytes());
        let target_ok = msg.get_field(TAG_TARGET_COMP_ID) == Some(self.ctx.sender_comp_id.as_bytes());
        if !sender_ok || !target_ok {
            tracing::warn!("Logon with mismatched CompIDs, ignoring");
            return;
        }
        let heart_bt_int = msg.get_field_i64(TAG_HEART_BT_INT).unwrap_or(30) as i32;
        self.heartbeat
            .heart_bt_int_ns
            .store(i64::from(heart_bt_int).max(1) as u64 * 1_000_000_000, Ordering::Relaxed);

        match self.state() {
            SessionState::Connecting | SessionState::LogonSent => {
                self.logon_deadline_ns.store(0, Ordering::Relaxed);
                self.transition_to(SessionState::LoggedOn);
            },
            SessionState::LoggedOn => {
                tracing::debug!("duplicate Logon while already LoggedOn, ignored");
                return;
            },
            _ => {
                let seq = self.ctx.next_outbound_seq();
                if let Some(response) =
                    MessageFactory::logon(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, heart_bt_int, false)
                {
                    self.logon_deadline_ns.store(0, Ordering::Relaxed);
                    self.transition_to(SessionState::LoggedOn);
                    self.heartbeat.note_sent();
                    route_outbound(lanes, pool, response, RouteHint::default());
                }
            },
        }
    }

    fn handle_logout(&self, _msg: &mut FixMessage, pool: &MessagePool, lanes: &PriorityQueueContainer) {
        if self.state() != SessionState::LogoutSent {
            let seq = self.ctx.next_outbound_seq();
            if let Some(response) = MessageFactory::logout(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, None) {
                route_outbound(lanes, pool, response, RouteHint::default());
            }
        }
        self.transition_to(SessionState::Disconnecting);
    }

    fn handle_heartbeat(&self, msg: &mut FixMessage) {
        if let Some(test_req_id) = msg.get_field_str(TAG_TEST_REQ_ID) {
            let mut pending = self.heartbeat.pending_test_req_id.lock().expect("heartbeat mutex poisoned");
            if pending.as_deref() == Some(test_req_id) {
                *pending = None;
                self.heartbeat.test_request_pending_since_ns.store(0, Ordering::Relaxed);
            }
        }
    }

    fn handle_test_request(&self, msg: &mut FixMessage, pool: &MessagePool, lanes: &PriorityQueueContainer) {
        let test_req_id = msg.get_field_str(TAG_TEST_REQ_ID).map(str::to_owned);
        let seq = self.ctx.next_outbound_seq();
        if let Some(response) = MessageFactory::heartbeat(
            pool,
            &self.ctx.begin_string,
            seq,
            &self.ctx.sender_comp_id,
            &self.ctx.target_comp_id,
            test_req_id.as_deref(),
        ) {
            self.heartbeat.note_sent();
            let hint = RouteHint { heartbeat_reply: true, ..Default::default() };
            route_outbound(lanes, pool, response, hint);
        }
    }

    fn handle_resend_request(&self, msg: &mut FixMessage, pool: &MessagePool, lanes: &PriorityQueueContainer) {
        let begin = msg.get_field_i64(TAG_BEGIN_SEQ_NO).unwrap_or(0) as i32;
        let end = msg.get_field_i64(TAG_END_SEQ_NO).unwrap_or(begin) as i32;
        let seq = self.ctx.next_outbound_seq();
        if let Some(response) = MessageFactory::sequence_reset(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, end + 1, true) {
            route_outbound(lanes, pool, response, RouteHint::default());
        }
        tracing::info!(begin, end, "answered ResendRequest with SequenceReset-GapFill (admin-only replay)");
    }

    fn handle_sequence_reset(&self, msg: &mut FixMessage) {
        let new_seq_no = msg.get_field_i64(TAG_NEW_SEQ_NO).unwrap_or(0) as i32;
        let gap_fill = msg.get_field(TAG_GAP_FILL_FLAG) == Some(b"Y".as_slice());
        if new_seq_no <= 0 {
            return;
        }
        if gap_fill {
            if new_seq_no > self.ctx.expected_incoming() {
                self.ctx.set_expected_incoming(new_seq_no);
            }
        } else {
            self.ctx.set_expected_incoming(new_seq_no);
        }
    }

    /// Dedicated 1 s timer thread body (§4.6): sends a Heartbeat when idle
    /// past `HeartBtInt`, escalates to a TestRequest past `1.2x`, and gives
    /// up to Logout if the TestRequest goes unanswered for a further
    /// `HeartBtInt`.
    pub fn heartbeat_tick(&self, pool: &MessagePool, lanes: &PriorityQueueContainer) {
        if self.state() != SessionState::LoggedOn {
            return;
        }
        let now = clock::now_nanos();
        let interval = self.heartbeat.heart_bt_int_ns.load(Ordering::Relaxed);
        let last_sent = self.heartbeat.last_sent_ns.load(Ordering::Relaxed);
        let last_received = self.heartbeat.last_received_ns.load(Ordering::Relaxed);

        if now.saturating_sub(last_sent) >= interval {
            let seq = self.ctx.next_outbound_seq();
            if let Some(hb) = MessageFactory::heartbeat(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, None) {
                self.heartbeat.note_sent();
                route_outbound(lanes, pool, hb, RouteHint::default());
            }
        }

        let pending_since = self.heartbeat.test_request_pending_since_ns.load(Ordering::Relaxed);
        if pending_since == 0 {
            if now.saturating_sub(last_received) >= interval + interval / 5 {
                let id = self.heartbeat.test_req_id_seq.fetch_add(1, Ordering::Relaxed);
                let test_req_id = format!("TR-{id}");
                let seq = self.ctx.next_outbound_seq();
                if let Some(tr) = MessageFactory::test_request(pool, &self.ctx.begin_string, seq, &self.ctx.sender_comp_id, &self.ctx.target_comp_id, &test_req_id) {
                    *self.heartbeat.pending_test_req_id.lock().expect("heartbeat mutex poisoned") = Some(test_req_id);
                    self.heartbeat.test_request_pending_since_ns.store(now.max(1), Ordering::Relaxed);
                    route_outbound(lanes, pool, tr, RouteHint::default());
                }
            }
        } else if now.saturating_sub(pending_since) >= interval {
            tracing::warn!("TestRequest unanswered within HeartBtInt, logging out");
            if let Some(logout) = self.begin_logout(pool, Some("TestRequest timeout")) {
                route_outbound(lanes, pool, logout, RouteHint::default());
            }
        }
    }

    /// Enforces the `LogonSent --timeout(N s)--> Disconnecting` transition:
    /// if a Logon was sent and no acknowledging Logon has arrived by the
    /// armed deadline, gives up on the session without waiting for the
    /// counterparty. Meant to be polled once a second by the same timer
    /// thread that drives [`Self::heartbeat_tick`].
    pub fn check_logon_timeout(&self) {
        if self.state() != SessionState::LogonSent {
            return;
        }
        let deadline = self.logon_deadline_ns.load(Ordering::Relaxed);
        if deadline == 0 || clock::now_nanos() < deadline {
            return;
        }
        self.logon_deadline_ns.store(0, Ordering::Relaxed);
        tracing::warn!("Logon not acknowledged within logon_timeout, giving up");
        self.transition_to(SessionState::Disconnecting);
    }
}

fn route_outbound(lanes: &PriorityQueueContainer, pool: &MessagePool, handle: *mut FixMessage, hint: RouteHint) {
    let (_priority, ok) = router::route(lanes, pool, handle, hint);
    if !ok {
        tracing::warn!("outbound session message dropped: lane full");
    }
}
