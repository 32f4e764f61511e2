use std::time::Duration;

use fix_gateway_rs::gap::{GapManager, MAX_RETRY};
use fix_gateway_rs::pool::MessagePool;
use fix_gateway_rs::router::PriorityQueueContainer;
use fix_gateway_rs::session::SessionContext;

fn session() -> SessionContext {
    SessionContext::new("CLIENT", "SERVER", "FIX.4.4")
}

fn lanes() -> PriorityQueueContainer {
    PriorityQueueContainer::new([16, 16, 16, 16])
}

#[test]
fn overflow_past_capacity_is_silently_dropped_not_queued() {
    let gap = GapManager::with_capacity(2);
    gap.add_gap(1);
    gap.add_gap(2);
    gap.add_gap(3);
    assert_eq!(gap.count(), 2);
    assert!(gap.has_gap(1));
    assert!(gap.has_gap(2));
    assert!(!gap.has_gap(3));
}

#[test]
fn with_params_overrides_the_hardcoded_timeout() {
    let pool = MessagePool::new(16, "test");
    let lanes = lanes();
    let session = session();
    // A near-zero timeout means the very first tick after add_gap should
    // already consider the entry timed out and emit a ResendRequest,
    // rather than waiting out the module's default 10s constant.
    let gap = GapManager::with_params(16, Duration::from_nanos(1), Duration::from_millis(1));
    gap.add_gap(7);
    std::thread::sleep(Duration::from_millis(2));
    gap.tick(&session, &lanes, &pool);
    assert_eq!(gap.resends_emitted(), 1);
    assert!(gap.has_gap(7), "still outstanding, just retried");
}

#[test]
fn gives_up_after_max_retry_timed_out_ticks() {
    let pool = MessagePool::new(32, "test");
    let lanes = lanes();
    let session = session();
    let gap = GapManager::with_params(16, Duration::from_nanos(1), Duration::from_millis(1));
    gap.add_gap(11);

    for _ in 0..=MAX_RETRY {
        std::thread::sleep(Duration::from_millis(2));
        gap.tick(&session, &lanes, &pool);
    }

    assert_eq!(gap.given_up(), 1);
    assert!(!gap.has_gap(11), "a given-up entry is no longer tracked");
}

#[test]
fn with_timeout_and_poll_keeps_the_default_queue_size() {
    let gap = GapManager::with_timeout_and_poll(Duration::from_secs(5), Duration::from_millis(10));
    gap.add_gap(1);
    assert_eq!(gap.count(), 1);
}
