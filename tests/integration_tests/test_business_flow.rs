// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario 1/2 from the specification: a counterparty that
//! completes the Logon handshake and then sends a `NewOrderSingle` must
//! have that order reach the gateway's business-message callback, with the
//! session settled in a usable state throughout.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;
use fix_gateway_rs::message::FixMessage;

use super::common::{bind_loopback, logon_reply, new_order_single, test_config, wait_until};

#[test]
fn new_order_single_reaches_the_message_callback() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");

        let mut buf = [0u8; 512];
        let n = sock.read(&mut buf).expect("read initial logon");
        assert!(n > 0, "gateway should have sent a Logon first");

        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");
        sock.write_all(&new_order_single(2, "ORD-1")).expect("write order");
        thread::sleep(Duration::from_millis(150));
    });

    let gateway = Arc::new(Gateway::new(test_config(port)).expect("valid config"));
    gateway.attach_self();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    gateway.set_message_callback(Arc::new(move |handle: *mut FixMessage| {
        let msg = unsafe { &mut *handle };
        seen_clone.lock().expect("seen mutex poisoned").push(msg.get_field_str(11).map(str::to_owned));
    }));

    assert!(gateway.connect("127.0.0.1", port));
    assert!(wait_until(300, || !seen.lock().expect("seen mutex poisoned").is_empty()), "order should reach the callback");
    assert_eq!(seen.lock().expect("seen mutex poisoned")[0].as_deref(), Some("ORD-1"));

    gateway.disconnect();
    server.join().expect("server thread panicked");
}

#[test]
fn chunked_delivery_of_a_single_message_still_reaches_the_callback() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read initial logon");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");

        // Trickle the order byte-by-byte across several writes to exercise
        // the parser's partial-buffer carry, as scenario 2 of the spec
        // does with fixed-size chunks.
        let order = new_order_single(2, "ORD-CHUNK");
        for chunk in order.chunks(5) {
            sock.write_all(chunk).expect("write order chunk");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(150));
    });

    let gateway = Arc::new(Gateway::new(test_config(port)).expect("valid config"));
    gateway.attach_self();

    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    gateway.set_message_callback(Arc::new(move |handle: *mut FixMessage| {
        let _ = unsafe { &mut *handle };
        count_clone.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(gateway.connect("127.0.0.1", port));
    assert!(wait_until(300, || count.load(Ordering::SeqCst) == 1));

    gateway.disconnect();
    server.join().expect("server thread panicked");
}

#[test]
fn outbound_send_message_is_delivered_to_the_counterparty() {
    let (listener, port) = bind_loopback();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 4096];
        loop {
            match sock.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => received_clone.lock().expect("received mutex poisoned").extend_from_slice(&buf[..n]),
            }
        }
    });

    let gateway = Arc::new(Gateway::new(test_config(port)).expect("valid config"));
    gateway.attach_self();
    assert!(gateway.connect("127.0.0.1", port));

    assert!(wait_until(300, || frame_seen(&received, b"35=A\x01")), "initial Logon should reach the counterparty");

    gateway.disconnect();
    let _ = server.join();
}

fn frame_seen(buf: &Arc<Mutex<Vec<u8>>>, needle: &[u8]) -> bool {
    let data = buf.lock().expect("buffer mutex poisoned");
    data.windows(needle.len()).any(|w| w == needle)
}
