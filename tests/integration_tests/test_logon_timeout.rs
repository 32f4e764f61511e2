// SPDX-License-Identifier: MIT OR Apache-2.0

//! `LogonSent -- timeout(N s) --> Disconnecting` (§4.6): a counterparty
//! that accepts the TCP connection but never answers the initial Logon
//! must cause the gateway to give up and tear itself down once
//! `logon_timeout` elapses, without waiting indefinitely.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;

use super::common::{bind_loopback, test_config, wait_until};

#[test]
fn unacknowledged_logon_gives_up_after_the_configured_timeout() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        // Accept and hold the connection open, but never write anything
        // back — the counterparty that never answers.
        let (sock, _) = listener.accept().expect("accept");
        let _keep_alive: TcpStream = sock;
        thread::sleep(Duration::from_secs(6));
    });

    let mut cfg = test_config(port);
    cfg.timers.logon_timeout = Duration::from_millis(200);
    let gateway = Arc::new(Gateway::new(cfg).expect("valid config"));
    gateway.attach_self();

    assert!(gateway.connect("127.0.0.1", port));
    assert!(gateway.is_connected(), "transport should connect even though Logon is never acked");

    assert!(
        wait_until(800, || !gateway.is_connected()),
        "gateway should give up and disconnect once logon_timeout elapses without an ack"
    );

    gateway.disconnect();
    drop(server);
}
