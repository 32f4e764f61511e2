// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for the black-box integration suite: every test here
//! drives a [`fix_gateway_rs::Gateway`] purely through its public facade
//! against a hand-rolled loopback counterparty, the same way the teacher's
//! own integration tests drive `ClientConnection` against a fake iSCSI
//! target rather than reaching into private state.

#![allow(dead_code)]

use std::net::TcpListener;
use std::time::Duration;

use fix_gateway_rs::cfg::config::{Config, ParserLimits, PoolLimits, QueueCapacities, RuntimeConfig, SessionIdentity, Timers};
use fix_gateway_rs::message::compute_checksum;

/// A config tuned for fast-converging tests: short timers, small pools and
/// lanes, so a test doesn't have to wait out production-scale heartbeat
/// intervals to observe a transition.
pub fn test_config(port: u16) -> Config {
    Config {
        identity: SessionIdentity {
            sender_comp_id: "CLIENT".into(),
            target_comp_id: "SERVER".into(),
            begin_string: "FIX.4.4".into(),
            accepted_versions: vec!["FIX.4.4".into()],
        },
        timers: Timers {
            heart_bt_int: Duration::from_secs(30),
            logon_timeout: Duration::from_secs(10),
            test_request_timeout: Duration::from_secs(15),
            gap_timeout: Duration::from_millis(200),
            gap_poll_interval: Duration::from_millis(5),
        },
        queues: QueueCapacities { critical: 8, high: 8, medium: 8, low: 8 },
        parser: ParserLimits { max_message_size: 8192, validate_checksum: true, strict_validation: true },
        pool: PoolLimits { message_pool_size: 64 },
        runtime: RuntimeConfig { host: "127.0.0.1".into(), port, connect_timeout: Duration::from_secs(5) },
    }
}

/// Binds an ephemeral loopback port and returns the listener plus the port
/// a `Gateway::connect` call should target.
pub fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// Builds one well-formed FIX.4.4 frame with a correct `BodyLength`/
/// `CheckSum`, the same shape `Gateway`'s own inline tests use.
pub fn frame(fields: &[(u32, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (tag, value) in fields {
        body.extend_from_slice(tag.to_string().as_bytes());
        body.push(b'=');
        body.extend_from_slice(value);
        body.push(0x01);
    }
    let mut full = b"8=FIX.4.4\x01".to_vec();
    full.extend_from_slice(format!("9={}\x01", body.len()).as_bytes());
    full.extend_from_slice(&body);
    let checksum = compute_checksum(&full);
    full.extend_from_slice(format!("10={checksum:03}\x01").as_bytes());
    full
}

pub fn logon_reply(seq_num: i32, heart_bt_int: i32) -> Vec<u8> {
    frame(&[
        (35, b"A"),
        (49, b"SERVER"),
        (56, b"CLIENT"),
        (34, seq_num.to_string().as_bytes()),
        (52, b"20231215-10:30:00"),
        (108, heart_bt_int.to_string().as_bytes()),
    ])
}

pub fn new_order_single(seq_num: i32, cl_ord_id: &str) -> Vec<u8> {
    frame(&[
        (35, b"D"),
        (49, b"SERVER"),
        (56, b"CLIENT"),
        (34, seq_num.to_string().as_bytes()),
        (52, b"20231215-10:30:01"),
        (11, cl_ord_id.as_bytes()),
        (55, b"AAPL"),
        (54, b"1"),
        (38, b"100"),
    ])
}

/// Polls `f` every 10ms until it returns `true` or `attempts` elapse,
/// returning whether it ever succeeded. Used throughout instead of a fixed
/// sleep since every state transition here crosses a background thread.
pub fn wait_until(attempts: u32, mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..attempts {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
