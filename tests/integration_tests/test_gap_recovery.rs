// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario 4: a sequence-number gap must surface as a
//! `ResendRequest` on the wire within the configured gap timeout, observed
//! black-box from the counterparty's side of the socket, and a later
//! possible-duplicate fill must resolve cleanly.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;
use fix_gateway_rs::message::FixMessage;

use super::common::{bind_loopback, frame, logon_reply, test_config, wait_until};

#[test]
fn gap_in_inbound_sequence_triggers_a_resend_request() {
    let (listener, port) = bind_loopback();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read initial logon");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");

        // Jump straight to seq 4 when the gateway expects seq 2: a gap for
        // seq 2 and seq 3 should open.
        let jump = frame(&[(35, b"0"), (49, b"SERVER"), (56, b"CLIENT"), (34, b"4"), (52, b"20231215-10:30:02")]);
        sock.write_all(&jump).expect("write out-of-sequence heartbeat");

        let mut local = [0u8; 4096];
        loop {
            match sock.read(&mut local) {
                Ok(0) | Err(_) => break,
                Ok(n) => received_clone.lock().expect("received mutex poisoned").extend_from_slice(&local[..n]),
            }
        }
    });

    let mut cfg = test_config(port);
    cfg.timers.gap_timeout = Duration::from_millis(100);
    cfg.timers.gap_poll_interval = Duration::from_millis(5);

    let gateway = Arc::new(Gateway::new(cfg).expect("valid config"));
    gateway.attach_self();
    gateway.set_message_callback(Arc::new(|_: *mut FixMessage| {}));

    assert!(gateway.connect("127.0.0.1", port));
    assert!(
        wait_until(400, || frame_contains(&received, b"35=2\x01")),
        "a ResendRequest (MsgType=2) should appear on the wire within the gap timeout"
    );

    gateway.disconnect();
    let _ = server.join();
}

fn frame_contains(buf: &Arc<Mutex<Vec<u8>>>, needle: &[u8]) -> bool {
    let data = buf.lock().expect("buffer mutex poisoned");
    data.windows(needle.len()).any(|w| w == needle)
}
