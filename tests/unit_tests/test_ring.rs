use fix_gateway_rs::ring::RingQueue;

#[test]
fn wraparound_reuses_slots_after_a_full_drain() {
    let q: RingQueue<u32> = RingQueue::new(4, "test");
    let cap = q.capacity() as u32;

    // Push-pop-push several times past the buffer length so the cursors
    // wrap around the backing array more than once.
    for cycle in 0..5u32 {
        for i in 0..cap {
            assert!(q.push(cycle * 1000 + i));
        }
        assert!(!q.push(999_999), "queue should report full once at capacity");
        for i in 0..cap {
            assert_eq!(q.try_pop(), Some(cycle * 1000 + i));
        }
        assert!(q.is_empty());
    }
}

#[test]
fn len_and_is_empty_track_pending_entries() {
    let q: RingQueue<u32> = RingQueue::new(8, "test");
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);

    q.push(1);
    q.push(2);
    q.push(3);
    assert!(!q.is_empty());
    assert_eq!(q.len(), 3);

    q.try_pop();
    assert_eq!(q.len(), 2);

    q.try_pop();
    q.try_pop();
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
}

#[test]
fn pushed_popped_and_dropped_counters_are_monotonic() {
    let q: RingQueue<u32> = RingQueue::new(2, "test");
    let cap = q.capacity() as u32;
    for i in 0..cap {
        assert!(q.push(i));
    }
    assert!(!q.push(42));
    assert_eq!(q.pushed(), u64::from(cap));
    assert_eq!(q.dropped(), 1);

    for _ in 0..cap {
        q.try_pop();
    }
    assert_eq!(q.popped(), u64::from(cap));
}
