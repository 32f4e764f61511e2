// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single process-wide monotonic epoch.
//!
//! `FixMessage` timestamps (§3 DATA MODEL) are specified as "monotonic
//! nanoseconds", which `std::time::Instant` cannot hand out directly (it has
//! no stable representation as an integer). We fix one `Instant` the first
//! time it's asked for and report every later timestamp as the number of
//! nanoseconds elapsed since it — monotonic, comparable, and `Copy`.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call to any clock function in this
/// process. Always non-decreasing within a process lifetime.
pub fn now_nanos() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
