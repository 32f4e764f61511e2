use fix_gateway_rs::message::{FixMessage, TAG_MSG_SEQ_NUM, TAG_MSG_TYPE};
use fix_gateway_rs::pool::MessagePool;

#[test]
fn allocate_and_init_populates_type_and_seq_num() {
    let pool = MessagePool::new(4, "test");
    let handle = pool.allocate_and_init(b"D", 42).expect("slot");
    // SAFETY: handle was just allocated and is not shared with anyone else.
    let msg = unsafe { &*handle };
    assert_eq!(msg.get_field(TAG_MSG_TYPE), Some(b"D".as_slice()));
    assert_eq!(msg.get_field(TAG_MSG_SEQ_NUM), Some(b"42".as_slice()));
    pool.deallocate(handle);
}

#[test]
fn allocate_and_init_resets_stale_fields_from_a_prior_occupant() {
    let pool = MessagePool::new(1, "test");
    let first = pool.allocate_and_init(b"D", 1).expect("slot");
    unsafe { (*first).set_field(11, b"STALE") };
    pool.deallocate(first);

    let second = pool.allocate_and_init(b"0", 2).expect("slot should be reused");
    let msg = unsafe { &*second };
    assert_eq!(msg.get_field(11), None, "reset() should have wiped the prior occupant's fields");
    assert_eq!(msg.get_field(TAG_MSG_TYPE), Some(b"0".as_slice()));
    pool.deallocate(second);
}

#[test]
fn allocate_and_init_returns_none_when_the_pool_is_exhausted() {
    let pool = MessagePool::new(1, "test");
    let _a = pool.allocate_and_init(b"D", 1).expect("first slot");
    assert!(pool.allocate_and_init(b"D", 2).is_none());
    assert_eq!(pool.alloc_failures(), 1);
}

#[test]
fn reset_rebuilds_the_free_list_after_handles_are_abandoned() {
    let pool = MessagePool::new(3, "test");
    for _ in 0..3 {
        pool.allocate().expect("slot");
    }
    assert!(pool.allocate().is_none());
    assert_eq!(pool.in_use_count(), 3);

    // Handles are dropped without calling deallocate(); reset() is the
    // recovery path a caller uses when it knows none of them are still
    // referenced (e.g. after tearing the gateway down).
    pool.reset();
    assert_eq!(pool.in_use_count(), 0);

    for _ in 0..3 {
        pool.allocate().expect("full capacity should be available again");
    }
    assert!(pool.allocate().is_none());
}

#[test]
fn shutdown_makes_every_subsequent_allocate_fail() {
    let pool = MessagePool::new(4, "test");
    let a = pool.allocate().expect("slot before shutdown");
    pool.shutdown();
    assert!(pool.allocate().is_none());
    assert!(pool.allocate_and_init(b"D", 1).is_none());
    // Deallocation of an already-handed-out slot still works after shutdown.
    pool.deallocate(a);
    assert_eq!(pool.in_use_count(), 0);
}

#[test]
fn foreign_stack_message_is_never_mistaken_for_a_pooled_slot() {
    let pool = MessagePool::new(2, "test");
    let mut bogus = FixMessage::new();
    let ptr = &mut bogus as *mut FixMessage;
    pool.deallocate(ptr);
    // The bogus pointer must not have been folded into the free list: the
    // pool should still only ever hand out its own 2 real slots.
    let a = pool.allocate().expect("slot 1");
    let b = pool.allocate().expect("slot 2");
    assert!(pool.allocate().is_none());
    pool.deallocate(a);
    pool.deallocate(b);
}
