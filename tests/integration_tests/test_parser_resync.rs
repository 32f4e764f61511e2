// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario 3: a message with a corrupted `CheckSum` trailer
//! must be discarded and reported through the error callback, and the
//! parser must resync cleanly at the next `8=FIX` so a following valid
//! message still reaches the business callback.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;
use fix_gateway_rs::message::FixMessage;

use super::common::{bind_loopback, logon_reply, new_order_single, test_config, wait_until};

#[test]
fn checksum_error_is_reported_and_parser_resyncs_on_the_next_message() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read initial logon");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");

        let mut corrupted = new_order_single(2, "BAD-1");
        let len = corrupted.len();
        // Flip one checksum digit so `10=` no longer matches the recomputed
        // sum, without touching framing or BodyLength.
        corrupted[len - 4] = if corrupted[len - 4] == b'9' { b'8' } else { b'9' };
        sock.write_all(&corrupted).expect("write corrupted order");
        sock.write_all(&new_order_single(3, "GOOD-1")).expect("write following valid order");

        thread::sleep(Duration::from_millis(150));
    });

    let gateway = Arc::new(Gateway::new(test_config(port)).expect("valid config"));
    gateway.attach_self();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = Arc::clone(&errors);
    gateway.set_error_callback(Arc::new(move |msg: String| {
        errors_clone.lock().expect("errors mutex poisoned").push(msg);
    }));

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let delivered_clone = Arc::clone(&delivered);
    gateway.set_message_callback(Arc::new(move |handle: *mut FixMessage| {
        let msg = unsafe { &mut *handle };
        delivered_clone.lock().expect("delivered mutex poisoned").push(msg.get_field_str(11).map(str::to_owned));
    }));

    assert!(gateway.connect("127.0.0.1", port));

    assert!(
        wait_until(300, || errors.lock().expect("errors mutex poisoned").iter().any(|e| e.contains("ChecksumError"))),
        "the corrupted message should surface a ChecksumError via the error callback"
    );
    assert!(
        wait_until(300, || delivered.lock().expect("delivered mutex poisoned").iter().any(|id| id.as_deref() == Some("GOOD-1"))),
        "the following valid message should still reach the callback after resync"
    );
    assert!(
        !delivered.lock().expect("delivered mutex poisoned").iter().any(|id| id.as_deref() == Some("BAD-1")),
        "the corrupted message itself must never be delivered"
    );

    gateway.disconnect();
    server.join().expect("server thread panicked");
}
