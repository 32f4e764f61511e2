// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming FIX parser: turns successive byte chunks (possibly splitting
//! or concatenating messages) into pooled [`FixMessage`] handles.
//!
//! Grounded on the teacher's `client/client.rs::read_loop` (read into a
//! scratch buffer, determine frame length from the header, slice out the
//! complete PDU, hand the rest back for the next read) generalized from a
//! fixed-length binary header to FIX's self-describing `9=<len>` field, and
//! on `models/parse.rs`'s opcode-driven dispatch, generalized to a
//! `MsgType`-driven one. The framing state machine itself (locate
//! `8=FIX`, read `BodyLength`, verify the `CheckSum` trailer, resync on
//! garbage) has no teacher analogue — iSCSI PDUs carry their length in a
//! fixed binary field, not a self-delimited text tag — and is grounded
//! directly on §4.4 of the specification. The carry buffer is a
//! `bytes::BytesMut` rather than a `Vec<u8>` so a fully-consumed prefix is
//! dropped with a cursor bump (`Buf::advance`) instead of a memmove.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, BytesMut};

use crate::message::{self, FixMessage, MsgType, TAG_CHECK_SUM};
use crate::pool::MessagePool;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Success,
    NeedMoreData,
    InvalidFormat,
    ChecksumError,
    AllocationFailed,
    MessageTooLarge,
    UnsupportedVersion,
}

/// Result of one `parse_chunk` call: every fully-formed message extracted
/// from the buffer so far, plus a single summarising status — `Success` if
/// at least one message came out, otherwise whichever terminal condition
/// stopped the extraction loop.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub handles: Vec<*mut FixMessage>,
    pub status: Option<ParseStatus>,
}

struct SingleOutcome {
    consumed: usize,
    handle: Option<*mut FixMessage>,
    status: ParseStatus,
}

#[derive(Debug, Default)]
pub struct ParserStatsSnapshot {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub bytes_consumed: u64,
    pub garbage_bytes: u64,
    pub partial_buffers_carried: u64,
    pub mean_parse_time_ns: u64,
}

#[derive(Default)]
struct ParserStats {
    messages_parsed: AtomicU64,
    parse_errors: AtomicU64,
    bytes_consumed: AtomicU64,
    garbage_bytes: AtomicU64,
    partial_buffers_carried: AtomicU64,
    parse_time_ns_sum: AtomicU64,
    parse_time_samples: AtomicU64,
}

impl ParserStats {
    fn snapshot(&self) -> ParserStatsSnapshot {
        let samples = self.parse_time_samples.load(Ordering::Relaxed);
        let mean = if samples == 0 {
            0
        } else {
            self.parse_time_ns_sum.load(Ordering::Relaxed) / samples
        };
        ParserStatsSnapshot {
            messages_parsed: self.messages_parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            garbage_bytes: self.garbage_bytes.load(Ordering::Relaxed),
            partial_buffers_carried: self.partial_buffers_carried.load(Ordering::Relaxed),
            mean_parse_time_ns: mean,
        }
    }

    fn reset(&self) {
        self.messages_parsed.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.bytes_consumed.store(0, Ordering::Relaxed);
        self.garbage_bytes.store(0, Ordering::Relaxed);
        self.partial_buffers_carried.store(0, Ordering::Relaxed);
        self.parse_time_ns_sum.store(0, Ordering::Relaxed);
        self.parse_time_samples.store(0, Ordering::Relaxed);
    }
}

pub struct StreamParser {
    buffer: BytesMut,
    max_message_size: usize,
    validate_checksum: bool,
    strict_validation: bool,
    accepted_versions: Vec<Vec<u8>>,
    stats: ParserStats,
}

impl StreamParser {
    pub fn new(
        max_message_size: usize,
        validate_checksum: bool,
        strict_validation: bool,
        accepted_versions: &[&str],
    ) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_message_size.min(4096)),
            max_message_size,
            validate_checksum,
            strict_validation,
            accepted_versions: accepted_versions.iter().map(|v| v.as_bytes().to_vec()).collect(),
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Drops all carried partial-message state. The parser is restartable:
    /// a subsequent `parse_chunk` starts framing from scratch.
    pub fn reset_streaming_state(&mut self) {
        self.buffer.clear();
    }

    pub fn carried_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one byte chunk and extracts every fully-formed message the
    /// accumulated buffer now contains.
    pub fn parse_chunk(&mut self, pool: &MessagePool, chunk: &[u8]) -> ParseOutcome {
        let started = Instant::now();
        self.buffer.extend_from_slice(chunk);

        let mut handles = Vec::new();
        let mut last_status = None;

        loop {
            if self.buffer.is_empty() {
                last_status = Some(ParseStatus::NeedMoreData);
                break;
            }
            let outcome = self.try_parse_one(pool);
            let consumed = outcome.consumed.min(self.buffer.len());
            self.buffer.advance(consumed);
            self.stats.bytes_consumed.fetch_add(consumed as u64, Ordering::Relaxed);
            if outcome.status != ParseStatus::Success {
                self.stats.garbage_bytes.fetch_add(consumed as u64, Ordering::Relaxed);
            }

            match outcome.status {
                ParseStatus::Success => {
                    self.stats.messages_parsed.fetch_add(1, Ordering::Relaxed);
                    handles.push(outcome.handle.expect("Success outcome always carries a handle"));
                    last_status = Some(ParseStatus::Success);
                },
                ParseStatus::NeedMoreData => {
                    self.stats.partial_buffers_carried.fetch_add(1, Ordering::Relaxed);
                    last_status = Some(ParseStatus::NeedMoreData);
                    break;
                },
                ParseStatus::AllocationFailed => {
                    last_status = Some(ParseStatus::AllocationFailed);
                    break;
                },
                other => {
                    self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                    last_status = Some(other);
                },
            }
        }

        let elapsed_ns = started.elapsed().as_nanos() as u64;
        self.stats.parse_time_ns_sum.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.stats.parse_time_samples.fetch_add(1, Ordering::Relaxed);

        ParseOutcome {
            status: if handles.is_empty() { last_status } else { Some(ParseStatus::Success) },
            handles,
        }
    }

    /// Attempts to extract exactly one message from the front of the
    /// current buffer. Returns how many bytes to drop from the buffer's
    /// front regardless of outcome (garbage, a consumed message, or
    /// nothing when more data is needed).
    fn try_parse_one(&self, pool: &MessagePool) -> SingleOutcome {
        let buf = &self.buffer;

        let Some(start) = find_subsequence(buf, b"8=FIX") else {
            // Keep a short tail in case "8=FIX" straddles this chunk
            // boundary; everything before that is unambiguous garbage.
            let keep = buf.len().min(4);
            return SingleOutcome {
                consumed: buf.len() - keep,
                handle: None,
                status: ParseStatus::NeedMoreData,
            };
        };

        let Some(soh1_rel) = find_byte(&buf[start..], 0x01) else {
            if buf.len() - start > self.max_message_size {
                return self.resync(buf, start, ParseStatus::InvalidFormat);
            }
            return SingleOutcome { consumed: start, handle: None, status: ParseStatus::NeedMoreData };
        };
        let soh1 = start + soh1_rel;
        if soh1 < start + 2 {
            return self.resync(buf, start, ParseStatus::InvalidFormat);
        }
        let begin_string = &buf[start + 2..soh1];

        if !self.accepted_versions.is_empty()
            && !self.accepted_versions.iter().any(|v| v.as_slice() == begin_string)
        {
            return self.resync(buf, start, ParseStatus::UnsupportedVersion);
        }

        if buf.len() < soh1 + 3 {
            if buf.len() - start > self.max_message_size {
                return self.resync(buf, start, ParseStatus::InvalidFormat);
            }
            return SingleOutcome { consumed: start, handle: None, status: ParseStatus::NeedMoreData };
        }
        if &buf[soh1 + 1..soh1 + 3] != b"9=" {
            return self.resync(buf, start, ParseStatus::InvalidFormat);
        }

        let Some(soh2_rel) = find_byte(&buf[soh1 + 3..], 0x01) else {
            if buf.len() - start > self.max_message_size {
                return self.resync(buf, start, ParseStatus::InvalidFormat);
            }
            return SingleOutcome { consumed: start, handle: None, status: ParseStatus::NeedMoreData };
        };
        let soh2 = soh1 + 3 + soh2_rel;
        let body_length: usize = match std::str::from_utf8(&buf[soh1 + 3..soh2])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(n) => n,
            None => return self.resync(buf, start, ParseStatus::InvalidFormat),
        };

        let header_len = soh2 + 1 - start;
        let expected_total = header_len + body_length + 7;
        if expected_total > self.max_message_size {
            return self.resync(buf, start, ParseStatus::MessageTooLarge);
        }
        if buf.len() - start < expected_total {
            return SingleOutcome { consumed: start, handle: None, status: ParseStatus::NeedMoreData };
        }

        let msg_end = start + expected_total;
        let trailer = &buf[msg_end - 7..msg_end];
        let trailer_ok = trailer.len() == 7
            && &trailer[0..3] == b"10="
            && trailer[6] == 0x01
            && trailer[3..6].iter().all(u8::is_ascii_digit);
        if !trailer_ok {
            return self.resync(buf, start, ParseStatus::InvalidFormat);
        }

        if self.validate_checksum {
            let claimed: Option<u32> =
                std::str::from_utf8(&trailer[3..6]).ok().and_then(|s| s.parse().ok());
            let computed = message::compute_checksum(&buf[start..msg_end - 7]);
            if claimed != Some(computed) {
                return self.resync(buf, start, ParseStatus::ChecksumError);
            }
        }

        let Some(ptr) = pool.allocate() else {
            // Back-pressure: retain the whole message so the caller can
            // retry once the pool has freed a slot.
            return SingleOutcome { consumed: start, handle: None, status: ParseStatus::AllocationFailed };
        };
        // SAFETY: freshly allocated, exclusively owned until returned.
        let msg = unsafe { &mut *ptr };
        msg.reset();
        for field in buf[start..msg_end - 7].split(|&b| b == 0x01) {
            if field.is_empty() {
                continue;
            }
            if let Some(eq) = field.iter().position(|&b| b == b'=') {
                if let Ok(tag) = std::str::from_utf8(&field[..eq]).unwrap_or("").parse::<u32>() {
                    msg.set_field(tag, &field[eq + 1..]);
                }
            }
        }
        msg.set_field(TAG_CHECK_SUM, &trailer[3..6]);

        if self.strict_validation {
            let violations = msg.validate();
            if !violations.is_empty() {
                tracing::debug!(?violations, "strict_validation rejected a framed message");
                pool.deallocate(ptr);
                return SingleOutcome { consumed: msg_end, handle: None, status: ParseStatus::InvalidFormat };
            }
        }

        SingleOutcome { consumed: msg_end, handle: Some(ptr), status: ParseStatus::Success }
    }

    fn resync(&self, buf: &[u8], start: usize, status: ParseStatus) -> SingleOutcome {
        let consumed = find_subsequence(&buf[start + 1..], b"8=FIX")
            .map(|p| start + 1 + p)
            .unwrap_or(buf.len());
        SingleOutcome { consumed, handle: None, status }
    }
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Tag-skims a raw byte buffer for `tag` without allocating or going
/// through the pool — used by callers that only need to peek at a field
/// (e.g. a business layer deciding whether to even bother parsing).
pub fn extract_field(buf: &[u8], tag: u32) -> Option<&[u8]> {
    let mut pos = 0;
    while pos < buf.len() {
        let field_end = find_byte(&buf[pos..], 0x01).map(|p| pos + p).unwrap_or(buf.len());
        let field = &buf[pos..field_end];
        if let Some(eq) = field.iter().position(|&b| b == b'=') {
            if let Ok(t) = std::str::from_utf8(&field[..eq]).unwrap_or("").parse::<u32>() {
                if t == tag {
                    return Some(&field[eq + 1..]);
                }
            }
        }
        pos = field_end + 1;
    }
    None
}

pub fn extract_msg_type(buf: &[u8]) -> Option<MsgType> {
    extract_field(buf, message::TAG_MSG_TYPE).map(MsgType::from_bytes)
}
