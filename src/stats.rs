// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observability facade: typed snapshots of the pool and parser counters,
//! exposed through [`crate::gateway::Gateway`] so an operator can poll
//! health without reaching into internal module state.
//!
//! Grounded on the teacher's `metrics`-by-method-call convention seen on
//! `ClientConnection` (`inflight_count`, `pending_count`, …) — plain
//! snapshot getters rather than a registered metrics backend, since this
//! crate's Non-goals exclude a Prometheus/metrics-crate exporter.

use serde::Serialize;

use crate::parser::ParserStatsSnapshot;
use crate::pool::MessagePool;

#[derive(Debug, Default, Serialize)]
pub struct PoolStatsSnapshot {
    pub capacity: usize,
    pub in_use: usize,
    pub total_allocated: u64,
    pub alloc_failures: u64,
}

pub fn pool_stats(pool: &MessagePool) -> PoolStatsSnapshot {
    PoolStatsSnapshot {
        capacity: pool.capacity(),
        in_use: pool.in_use_count(),
        total_allocated: pool.total_allocated(),
        alloc_failures: pool.alloc_failures(),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct GatewayStatsSnapshot {
    pub pool: PoolStatsSnapshot,
    pub parser: ParserStatsSnapshotOwned,
}

/// `ParserStatsSnapshot` does not derive `Serialize` in `parser` (it is an
/// internal hot-path struct); this is the serialisable copy handed out at
/// the gateway boundary.
#[derive(Debug, Default, Serialize)]
pub struct ParserStatsSnapshotOwned {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub bytes_consumed: u64,
    pub garbage_bytes: u64,
    pub partial_buffers_carried: u64,
    pub mean_parse_time_ns: u64,
}

impl From<ParserStatsSnapshot> for ParserStatsSnapshotOwned {
    fn from(s: ParserStatsSnapshot) -> Self {
        Self {
            messages_parsed: s.messages_parsed,
            parse_errors: s.parse_errors,
            bytes_consumed: s.bytes_consumed,
            garbage_bytes: s.garbage_bytes,
            partial_buffers_carried: s.partial_buffers_carried,
            mean_parse_time_ns: s.mean_parse_time_ns,
        }
    }
}
