// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario 6: with a short `HeartBtInt` and no inbound traffic
//! after Logon, the gateway must escalate idle silence into a TestRequest,
//! then into a Logout and disconnection if that TestRequest goes
//! unanswered — all observed from the wire side, since the session state
//! machine itself is private to the crate.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;

use super::common::{bind_loopback, logon_reply, test_config, wait_until};

#[test]
fn unanswered_test_request_escalates_to_logout_and_disconnect() {
    let (listener, port) = bind_loopback();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(10))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read initial logon");
        // Ack with the same short HeartBtInt the gateway offered, then go
        // silent: no further Heartbeat, no answer to the TestRequest that
        // follows.
        sock.write_all(&logon_reply(1, 1)).expect("write logon reply");

        let mut local = [0u8; 4096];
        loop {
            match sock.read(&mut local) {
                Ok(0) | Err(_) => break,
                Ok(n) => received_clone.lock().expect("received mutex poisoned").extend_from_slice(&local[..n]),
            }
        }
    });

    let mut cfg = test_config(port);
    cfg.timers.heart_bt_int = Duration::from_secs(1);
    let gateway = Arc::new(Gateway::new(cfg).expect("valid config"));
    gateway.attach_self();

    assert!(gateway.connect("127.0.0.1", port));

    assert!(wait_until(600, || frame_contains(&received, b"35=1\x01")), "idle session should escalate to a TestRequest");
    assert!(wait_until(600, || frame_contains(&received, b"35=5\x01")), "unanswered TestRequest should escalate to a Logout");
    assert!(wait_until(600, || !gateway.is_connected()), "the gateway should tear itself down after giving up");

    gateway.disconnect();
    let _ = server.join();
}

fn frame_contains(buf: &Arc<Mutex<Vec<u8>>>, needle: &[u8]) -> bool {
    let data = buf.lock().expect("buffer mutex poisoned");
    data.windows(needle.len()).any(|w| w == needle)
}
