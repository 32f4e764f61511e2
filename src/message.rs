// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-place FIX message container: a tag → value map with a cached
//! `MsgType`, canonical-order serialisation, and a BodyLength/CheckSum that
//! are recomputed just in time rather than carried by hand.
//!
//! Grounded on the teacher's `models/common.rs` split between header
//! metadata and payload (`BasicHeaderSegment`), generalized from a fixed
//! binary struct to a variable tag=value map since FIX has no fixed-layout
//! header the way iSCSI's BHS does.

use std::collections::HashMap;

use chrono::Utc;

use crate::pool::MessagePool;

pub const TAG_BEGIN_STRING: u32 = 8;
pub const TAG_BODY_LENGTH: u32 = 9;
pub const TAG_CHECK_SUM: u32 = 10;
pub const TAG_BEGIN_SEQ_NO: u32 = 7;
pub const TAG_MSG_SEQ_NUM: u32 = 34;
pub const TAG_MSG_TYPE: u32 = 35;
pub const TAG_POSS_DUP_FLAG: u32 = 43;
pub const TAG_REF_SEQ_NUM: u32 = 45;
pub const TAG_SENDER_COMP_ID: u32 = 49;
pub const TAG_SENDING_TIME: u32 = 52;
pub const TAG_TEXT: u32 = 58;
pub const TAG_TARGET_COMP_ID: u32 = 56;
pub const TAG_ENCRYPT_METHOD: u32 = 98;
pub const TAG_HEART_BT_INT: u32 = 108;
pub const TAG_TEST_REQ_ID: u32 = 112;
pub const TAG_GAP_FILL_FLAG: u32 = 123;
pub const TAG_NEW_SEQ_NO: u32 = 36;
pub const TAG_END_SEQ_NO: u32 = 16;
pub const TAG_RESET_SEQ_NUM_FLAG: u32 = 141;
pub const TAG_REF_TAG_ID: u32 = 371;
pub const TAG_REF_MSG_TYPE: u32 = 372;
pub const TAG_SESSION_REJECT_REASON: u32 = 373;

/// Tags emitted right after MsgType, in this fixed order, before the
/// remaining body fields. Mirrors the common "session header" block that
/// every FIX message carries.
const SESSION_HEADER_ORDER: [u32; 4] = [
    TAG_SENDER_COMP_ID,
    TAG_TARGET_COMP_ID,
    TAG_MSG_SEQ_NUM,
    TAG_SENDING_TIME,
];

fn is_framing_tag(tag: u32) -> bool {
    matches!(tag, TAG_BEGIN_STRING | TAG_BODY_LENGTH | TAG_MSG_TYPE | TAG_CHECK_SUM)
        || SESSION_HEADER_ORDER.contains(&tag)
}

/// `MsgType` (tag 35) values the gateway's session layer and basic
/// order/execution dictionary understand. Everything else parses into
/// `Unknown` rather than failing — full dictionary coverage is a
/// non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Heartbeat,
    TestRequest,
    ResendRequest,
    Reject,
    SequenceReset,
    Logout,
    Logon,
    NewOrderSingle,
    OrderCancelRequest,
    OrderCancelReplaceRequest,
    OrderStatusRequest,
    ExecutionReport,
    OrderCancelReject,
    MarketDataRequest,
    MarketDataSnapshot,
    MarketDataIncrementalRefresh,
    MarketDataRequestReject,
    Unknown,
}

impl MsgType {
    pub fn from_bytes(raw: &[u8]) -> Self {
        match raw {
            b"0" => MsgType::Heartbeat,
            b"1" => MsgType::TestRequest,
            b"2" => MsgType::ResendRequest,
            b"3" => MsgType::Reject,
            b"4" => MsgType::SequenceReset,
            b"5" => MsgType::Logout,
            b"A" => MsgType::Logon,
            b"D" => MsgType::NewOrderSingle,
            b"F" => MsgType::OrderCancelRequest,
            b"G" => MsgType::OrderCancelReplaceRequest,
            b"H" => MsgType::OrderStatusRequest,
            b"8" => MsgType::ExecutionReport,
            b"9" => MsgType::OrderCancelReject,
            b"V" => MsgType::MarketDataRequest,
            b"W" => MsgType::MarketDataSnapshot,
            b"X" => MsgType::MarketDataIncrementalRefresh,
            b"Y" => MsgType::MarketDataRequestReject,
            _ => MsgType::Unknown,
        }
    }

    pub fn as_wire(&self) -> &'static [u8] {
        match self {
            MsgType::Heartbeat => b"0",
            MsgType::TestRequest => b"1",
            MsgType::ResendRequest => b"2",
            MsgType::Reject => b"3",
            MsgType::SequenceReset => b"4",
            MsgType::Logout => b"5",
            MsgType::Logon => b"A",
            MsgType::NewOrderSingle => b"D",
            MsgType::OrderCancelRequest => b"F",
            MsgType::OrderCancelReplaceRequest => b"G",
            MsgType::OrderStatusRequest => b"H",
            MsgType::ExecutionReport => b"8",
            MsgType::OrderCancelReject => b"9",
            MsgType::MarketDataRequest => b"V",
            MsgType::MarketDataSnapshot => b"W",
            MsgType::MarketDataIncrementalRefresh => b"X",
            MsgType::MarketDataRequestReject => b"Y",
            MsgType::Unknown => b"?",
        }
    }

    /// Session-layer (admin) message, MsgType in {0,1,2,3,4,5,A}.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            MsgType::Heartbeat
                | MsgType::TestRequest
                | MsgType::ResendRequest
                | MsgType::Reject
                | MsgType::SequenceReset
                | MsgType::Logout
                | MsgType::Logon
        )
    }
}

const REQUIRED_HEADER_TAGS: [(u32, &str); 8] = [
    (TAG_BEGIN_STRING, "BeginString"),
    (TAG_BODY_LENGTH, "BodyLength"),
    (TAG_MSG_TYPE, "MsgType"),
    (TAG_MSG_SEQ_NUM, "MsgSeqNum"),
    (TAG_SENDER_COMP_ID, "SenderCompID"),
    (TAG_TARGET_COMP_ID, "TargetCompID"),
    (TAG_SENDING_TIME, "SendingTime"),
    (TAG_CHECK_SUM, "CheckSum"),
];

/// Tag → value FIX message. Storage order is irrelevant (a `HashMap`);
/// serialisation order is fixed by `SESSION_HEADER_ORDER` and the framing
/// tags regardless of insertion order.
///
/// Instances live inside [`crate::pool::MessagePool`] slots and are reused
/// without destruction between allocations — `reset()` is the only thing
/// that clears a slot's previous contents.
#[derive(Debug)]
pub struct FixMessage {
    fields: HashMap<u32, Vec<u8>>,
    cached_msg_type: Option<MsgType>,
    serialized_cache: Option<Vec<u8>>,
    dirty: bool,
    created_at_ns: u64,
    last_modified_ns: u64,
    processing_start_ns: u64,
    processing_end_ns: u64,
}

impl FixMessage {
    pub fn new() -> Self {
        let now = crate::clock::now_nanos();
        Self {
            fields: HashMap::new(),
            cached_msg_type: None,
            serialized_cache: None,
            dirty: true,
            created_at_ns: now,
            last_modified_ns: now,
            processing_start_ns: 0,
            processing_end_ns: 0,
        }
    }

    /// Clears a reused slot back to empty. Does not touch the allocator —
    /// only the pool decides when a slot is free.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.cached_msg_type = None;
        self.serialized_cache = None;
        self.dirty = true;
        let now = crate::clock::now_nanos();
        self.created_at_ns = now;
        self.last_modified_ns = now;
        self.processing_start_ns = 0;
        self.processing_end_ns = 0;
    }

    pub fn set_field(&mut self, tag: u32, value: &[u8]) {
        self.fields.insert(tag, value.to_vec());
        if tag == TAG_MSG_TYPE {
            self.cached_msg_type = None;
        }
        self.dirty = true;
        self.serialized_cache = None;
        self.last_modified_ns = crate::clock::now_nanos();
    }

    pub fn remove_field(&mut self, tag: u32) {
        if self.fields.remove(&tag).is_some() {
            if tag == TAG_MSG_TYPE {
                self.cached_msg_type = None;
            }
            self.dirty = true;
            self.serialized_cache = None;
            self.last_modified_ns = crate::clock::now_nanos();
        }
    }

    pub fn get_field(&self, tag: u32) -> Option<&[u8]> {
        self.fields.get(&tag).map(|v| v.as_slice())
    }

    pub fn get_field_str(&self, tag: u32) -> Option<&str> {
        self.get_field(tag).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_field_i64(&self, tag: u32) -> Option<i64> {
        self.get_field_str(tag).and_then(|s| s.parse().ok())
    }

    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.contains_key(&tag)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Lazily derives `MsgType` from tag 35, table-lookup only on first
    /// read after a write to tag 35 invalidated the cache.
    pub fn msg_type(&mut self) -> MsgType {
        if let Some(mt) = self.cached_msg_type {
            return mt;
        }
        let mt = self
            .get_field(TAG_MSG_TYPE)
            .map(MsgType::from_bytes)
            .unwrap_or(MsgType::Unknown);
        self.cached_msg_type = Some(mt);
        mt
    }

    /// Reads the cached `MsgType` without deriving it, for call sites that
    /// already hold only a shared reference (e.g. a statistics dump).
    pub fn msg_type_cached(&self) -> Option<MsgType> {
        self.cached_msg_type
    }

    pub fn is_admin_message(&mut self) -> bool {
        self.msg_type().is_admin()
    }

    pub fn created_at_ns(&self) -> u64 {
        self.created_at_ns
    }

    pub fn last_modified_ns(&self) -> u64 {
        self.last_modified_ns
    }

    pub fn mark_processing_start(&mut self) {
        self.processing_start_ns = crate::clock::now_nanos();
    }

    pub fn mark_processing_end(&mut self) {
        self.processing_end_ns = crate::clock::now_nanos();
    }

    pub fn processing_latency_ns(&self) -> Option<u64> {
        if self.processing_start_ns == 0 || self.processing_end_ns == 0 {
            None
        } else {
            Some(self.processing_end_ns.saturating_sub(self.processing_start_ns))
        }
    }

    /// Builds the canonical-order byte sequence from `BeginString` through
    /// the body (everything except the trailing `CheckSum` field), plus the
    /// recomputed `BodyLength`. Pure — does not touch the cache.
    fn build_frame(&self) -> (usize, Vec<u8>) {
        let mut body = Vec::new();
        if let Some(v) = self.fields.get(&TAG_MSG_TYPE) {
            append_field(&mut body, TAG_MSG_TYPE, v);
        }
        for tag in SESSION_HEADER_ORDER {
            if let Some(v) = self.fields.get(&tag) {
                append_field(&mut body, tag, v);
            }
        }
        let mut rest: Vec<u32> = self
            .fields
            .keys()
            .copied()
            .filter(|t| !is_framing_tag(*t))
            .collect();
        rest.sort_unstable();
        for tag in rest {
            append_field(&mut body, tag, &self.fields[&tag]);
        }

        let begin_string = self
            .fields
            .get(&TAG_BEGIN_STRING)
            .cloned()
            .unwrap_or_else(|| b"FIX.4.4".to_vec());
        let body_length = body.len();

        let mut full = Vec::with_capacity(body_length + 24);
        append_field(&mut full, TAG_BEGIN_STRING, &begin_string);
        append_field(&mut full, TAG_BODY_LENGTH, body_length.to_string().as_bytes());
        full.extend_from_slice(&body);

        (body_length, full)
    }

    /// Required-field presence, BodyLength, and CheckSum checks. Returns
    /// human-readable violations; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for (tag, name) in REQUIRED_HEADER_TAGS {
            if !self.fields.contains_key(&tag) {
                violations.push(format!("missing required tag {tag} ({name})"));
            }
        }

        let (body_length, full) = self.build_frame();
        if let Some(v) = self.fields.get(&TAG_BODY_LENGTH) {
            match std::str::from_utf8(v).ok().and_then(|s| s.parse::<usize>().ok()) {
                Some(n) if n == body_length => {},
                _ => violations.push(format!(
                    "BodyLength mismatch: field={:?} recomputed={}",
                    String::from_utf8_lossy(v),
                    body_length
                )),
            }
        }

        if let Some(v) = self.fields.get(&TAG_CHECK_SUM) {
            let expected = format!("{:03}", compute_checksum(&full));
            if v.as_slice() != expected.as_bytes() {
                violations.push(format!(
                    "CheckSum mismatch: field={:?} recomputed={expected}",
                    String::from_utf8_lossy(v)
                ));
            }
        }

        violations
    }

    /// Serialises with canonical tag order, recomputing `BodyLength` and
    /// `CheckSum`, and caches the result until the next mutation.
    pub fn to_bytes(&mut self) -> &[u8] {
        if self.dirty || self.serialized_cache.is_none() {
            let (body_length, mut full) = self.build_frame();
            let checksum = compute_checksum(&full);
            let checksum_str = format!("{checksum:03}");
            append_field(&mut full, TAG_CHECK_SUM, checksum_str.as_bytes());

            self.fields.insert(TAG_BODY_LENGTH, body_length.to_string().into_bytes());
            self.fields.insert(TAG_CHECK_SUM, checksum_str.into_bytes());
            self.serialized_cache = Some(full);
            self.dirty = false;
        }
        self.serialized_cache
            .as_deref()
            .unwrap_or(&[])
    }
}

impl Default for FixMessage {
    fn default() -> Self {
        Self::new()
    }
}

fn append_field(out: &mut Vec<u8>, tag: u32, value: &[u8]) {
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(0x01);
}

/// Sum of every byte mod 256, per §6: the checksum is taken over all bytes
/// preceding `10=`, including the SOH right before it.
pub fn compute_checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| acc + *b as u32) % 256
}

fn fix_sending_time() -> String {
    Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

fn base_admin_message(
    pool: &MessagePool,
    msg_type: MsgType,
    begin_string: &str,
    seq_num: i32,
    sender_comp_id: &str,
    target_comp_id: &str,
) -> Option<*mut FixMessage> {
    let ptr = pool.allocate()?;
    // SAFETY: freshly allocated, not yet visible to any other thread.
    let msg = unsafe { &mut *ptr };
    msg.reset();
    msg.set_field(TAG_BEGIN_STRING, begin_string.as_bytes());
    msg.set_field(TAG_MSG_TYPE, msg_type.as_wire());
    msg.set_field(TAG_MSG_SEQ_NUM, seq_num.to_string().as_bytes());
    msg.set_field(TAG_SENDER_COMP_ID, sender_comp_id.as_bytes());
    msg.set_field(TAG_TARGET_COMP_ID, target_comp_id.as_bytes());
    msg.set_field(TAG_SENDING_TIME, fix_sending_time().as_bytes());
    Some(ptr)
}

/// Factory operations used by the session manager (§4.3, "Factory
/// operations") and gap manager to build pre-populated admin messages from
/// a supplied pool. Kept alongside `FixMessage` rather than in `session` or
/// `gap` because both consumers need the identical tag layout.
pub struct MessageFactory;

impl MessageFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn logon(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        heart_bt_int: i32,
        reset_seq_num: bool,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::Logon,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        let msg = unsafe { &mut *ptr };
        msg.set_field(TAG_ENCRYPT_METHOD, b"0");
        msg.set_field(TAG_HEART_BT_INT, heart_bt_int.to_string().as_bytes());
        if reset_seq_num {
            msg.set_field(TAG_RESET_SEQ_NUM_FLAG, b"Y");
        }
        Some(ptr)
    }

    pub fn logout(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        text: Option<&str>,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::Logout,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        if let Some(text) = text {
            let msg = unsafe { &mut *ptr };
            msg.set_field(TAG_TEXT, text.as_bytes());
        }
        Some(ptr)
    }

    pub fn heartbeat(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        test_req_id: Option<&str>,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::Heartbeat,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        if let Some(id) = test_req_id {
            let msg = unsafe { &mut *ptr };
            msg.set_field(TAG_TEST_REQ_ID, id.as_bytes());
        }
        Some(ptr)
    }

    pub fn test_request(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        test_req_id: &str,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::TestRequest,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        let msg = unsafe { &mut *ptr };
        msg.set_field(TAG_TEST_REQ_ID, test_req_id.as_bytes());
        Some(ptr)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resend_request(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        begin_seq_no: i32,
        end_seq_no: i32,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::ResendRequest,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        let msg = unsafe { &mut *ptr };
        msg.set_field(TAG_BEGIN_SEQ_NO, begin_seq_no.to_string().as_bytes());
        msg.set_field(TAG_END_SEQ_NO, end_seq_no.to_string().as_bytes());
        Some(ptr)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sequence_reset(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        new_seq_no: i32,
        gap_fill: bool,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::SequenceReset,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        let msg = unsafe { &mut *ptr };
        msg.set_field(TAG_NEW_SEQ_NO, new_seq_no.to_string().as_bytes());
        msg.set_field(TAG_GAP_FILL_FLAG, if gap_fill { b"Y" } else { b"N" });
        if gap_fill {
            msg.set_field(TAG_POSS_DUP_FLAG, b"Y");
        }
        Some(ptr)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reject(
        pool: &MessagePool,
        begin_string: &str,
        seq_num: i32,
        sender_comp_id: &str,
        target_comp_id: &str,
        ref_seq_num: i32,
        ref_tag_id: Option<i32>,
        ref_msg_type: Option<&str>,
        session_reject_reason: Option<i32>,
        text: &str,
    ) -> Option<*mut FixMessage> {
        let ptr = base_admin_message(
            pool,
            MsgType::Reject,
            begin_string,
            seq_num,
            sender_comp_id,
            target_comp_id,
        )?;
        let msg = unsafe { &mut *ptr };
        msg.set_field(TAG_REF_SEQ_NUM, ref_seq_num.to_string().as_bytes());
        if let Some(t) = ref_tag_id {
            msg.set_field(TAG_REF_TAG_ID, t.to_string().as_bytes());
        }
        if let Some(mt) = ref_msg_type {
            msg.set_field(TAG_REF_MSG_TYPE, mt.as_bytes());
        }
        if let Some(r) = session_reject_reason {
            msg.set_field(TAG_SESSION_REJECT_REASON, r.to_string().as_bytes());
        }
        msg.set_field(TAG_TEXT, text.as_bytes());
        Some(ptr)
    }
}
