use fix_gateway_rs::message::MsgType;
use fix_gateway_rs::pool::MessagePool;
use fix_gateway_rs::router::{self, Priority, PriorityQueueContainer, RouteHint};

/// Full classification matrix: every `MsgType` against the default
/// (no-hint) context, matching the table row by row rather than sampling a
/// handful the way the in-module tests do.
#[test]
fn default_classification_matches_every_row_of_the_priority_table() {
    let hint = RouteHint::default();
    let expectations = [
        (MsgType::NewOrderSingle, Priority::Critical),
        (MsgType::OrderCancelRequest, Priority::Critical),
        (MsgType::OrderCancelReplaceRequest, Priority::Critical),
        (MsgType::OrderStatusRequest, Priority::Critical),
        (MsgType::ExecutionReport, Priority::Critical),
        (MsgType::OrderCancelReject, Priority::Critical),
        (MsgType::Logon, Priority::Critical),
        (MsgType::Logout, Priority::Critical),
        (MsgType::MarketDataRequest, Priority::High),
        (MsgType::MarketDataSnapshot, Priority::High),
        (MsgType::MarketDataIncrementalRefresh, Priority::High),
        (MsgType::MarketDataRequestReject, Priority::High),
        (MsgType::TestRequest, Priority::Medium),
        (MsgType::ResendRequest, Priority::Medium),
        (MsgType::Reject, Priority::Medium),
        (MsgType::SequenceReset, Priority::Medium),
        (MsgType::Heartbeat, Priority::Low),
        (MsgType::Unknown, Priority::Low),
    ];
    for (msg_type, expected) in expectations {
        assert_eq!(router::classify(msg_type, hint), expected, "{msg_type:?} should classify as {expected:?}");
    }
}

#[test]
fn context_hints_only_change_the_two_messages_they_apply_to() {
    let from_gap = RouteHint { from_gap_manager: true, ..Default::default() };
    let hb_reply = RouteHint { heartbeat_reply: true, ..Default::default() };

    assert_eq!(router::classify(MsgType::ResendRequest, from_gap), Priority::Critical);
    assert_eq!(router::classify(MsgType::Heartbeat, hb_reply), Priority::High);

    // The hint fields are independent: setting one does not affect the
    // other message's classification.
    assert_eq!(router::classify(MsgType::Heartbeat, from_gap), Priority::Low);
    assert_eq!(router::classify(MsgType::ResendRequest, hb_reply), Priority::Medium);
}

#[test]
fn each_lane_drops_independently_of_the_others() {
    let pool = MessagePool::new(16, "test");
    let lanes = PriorityQueueContainer::new([1, 1, 1, 1]);

    let fill = |priority: Priority| {
        let a = pool.allocate().expect("slot");
        unsafe { (*a).set_field(fix_gateway_rs::message::TAG_MSG_TYPE, priority_wire(priority)) };
        assert!(lanes.route_to(priority, a, &pool));

        let b = pool.allocate().expect("slot");
        unsafe { (*b).set_field(fix_gateway_rs::message::TAG_MSG_TYPE, priority_wire(priority)) };
        assert!(!lanes.route_to(priority, b, &pool));
    };

    fill(Priority::Critical);
    assert_eq!(lanes.dropped(Priority::Critical), 1);
    assert_eq!(lanes.dropped(Priority::High), 0);
    assert_eq!(lanes.dropped(Priority::Medium), 0);
    assert_eq!(lanes.dropped(Priority::Low), 0);

    fill(Priority::Low);
    assert_eq!(lanes.dropped(Priority::Critical), 1);
    assert_eq!(lanes.dropped(Priority::Low), 1);
}

fn priority_wire(priority: Priority) -> &'static [u8] {
    match priority {
        Priority::Critical => b"D",
        Priority::High => b"V",
        Priority::Medium => b"1",
        Priority::Low => b"0",
    }
}
