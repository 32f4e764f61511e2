// SPDX-License-Identifier: MIT OR Apache-2.0

//! A `Gateway` outlives any one connection: after a clean disconnect (or
//! an unsolicited drop from the far end), a fresh `connect()` call must
//! stand up a brand new session — new transport, new background threads,
//! a fresh Logon — without requiring a new `Gateway`.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;

use super::common::{bind_loopback, logon_reply, test_config, wait_until};

#[test]
fn gateway_can_reconnect_after_a_clean_disconnect() {
    let (listener1, port1) = bind_loopback();
    let server1 = thread::spawn(move || {
        let (mut sock, _) = listener1.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read first logon");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");
        // Drain until the gateway's graceful Logout/disconnect closes us.
        let mut local = [0u8; 256];
        while matches!(sock.read(&mut local), Ok(n) if n > 0) {}
    });

    let gateway = Arc::new(Gateway::new(test_config(port1)).expect("valid config"));
    gateway.attach_self();

    assert!(gateway.connect("127.0.0.1", port1));
    assert!(wait_until(300, || gateway.is_connected()));
    gateway.disconnect();
    assert!(!gateway.is_connected());
    server1.join().expect("first server thread panicked");

    // A second, independent listener on a different port stands in for a
    // fresh connection target; the same `Gateway` value connects to it.
    let (listener2, port2) = bind_loopback();
    let server2 = thread::spawn(move || {
        let (mut sock, _) = listener2.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        let n = sock.read(&mut buf).expect("read second logon");
        assert!(n > 0, "a fresh Logon should be sent on the second connect");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");
        thread::sleep(Duration::from_millis(150));
    });

    assert!(gateway.connect("127.0.0.1", port2));
    assert!(wait_until(300, || gateway.is_connected()), "second connect should succeed with a fresh session");

    gateway.disconnect();
    server2.join().expect("second server thread panicked");
}

#[test]
fn unsolicited_transport_drop_is_observed_as_disconnected() {
    let (listener, port) = bind_loopback();
    let server = thread::spawn(move || {
        let (sock, _) = listener.accept().expect("accept");
        // Close the socket right away without ever answering the Logon.
        drop(sock);
    });

    let gateway = Arc::new(Gateway::new(test_config(port)).expect("valid config"));
    gateway.attach_self();
    assert!(gateway.connect("127.0.0.1", port));

    assert!(
        wait_until(400, || !gateway.is_connected()),
        "an unsolicited close from the far end should be observed as a disconnect"
    );

    gateway.disconnect();
    server.join().expect("server thread panicked");
}
