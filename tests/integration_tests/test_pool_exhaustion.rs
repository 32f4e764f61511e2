// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario 5: parsing more concurrently-outstanding messages
//! than the pool has slots for must fail the extra allocations without
//! panicking, and the gateway must recover and deliver the rest once slots
//! are freed and more bytes arrive to retry on.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fix_gateway_rs::Gateway;
use fix_gateway_rs::message::FixMessage;

use super::common::{bind_loopback, logon_reply, new_order_single, test_config, wait_until};

#[test]
fn pool_exhaustion_is_recoverable_not_fatal() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        sock.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let mut buf = [0u8; 512];
        sock.read(&mut buf).expect("read initial logon");
        sock.write_all(&logon_reply(1, 30)).expect("write logon reply");

        // A single write containing many complete messages: the parser
        // will try to allocate a pool slot for every one of them inside one
        // `parse_chunk` call, before any of the earlier ones have had a
        // chance to be forwarded and freed.
        let mut burst = Vec::new();
        for i in 0..20 {
            burst.extend_from_slice(&new_order_single(2 + i, &format!("BURST-{i}")));
        }
        sock.write_all(&burst).expect("write burst");

        // Give the gateway a chance to drain some slots, then nudge the
        // parser with one more write so it resumes on the bytes it could
        // not allocate for the first time around.
        thread::sleep(Duration::from_millis(200));
        sock.write_all(&new_order_single(22, "TRIGGER")).expect("write trigger message");

        thread::sleep(Duration::from_millis(300));
    });

    let mut cfg = test_config(port);
    cfg.pool.message_pool_size = 4;
    cfg.queues.critical = 64;

    let gateway = Arc::new(Gateway::new(cfg).expect("valid config"));
    gateway.attach_self();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let delivered_clone = Arc::clone(&delivered);
    gateway.set_message_callback(Arc::new(move |handle: *mut FixMessage| {
        let msg = unsafe { &mut *handle };
        delivered_clone.lock().expect("delivered mutex poisoned").push(msg.get_field_str(11).map(str::to_owned));
    }));

    assert!(gateway.connect("127.0.0.1", port));

    assert!(
        wait_until(300, || gateway.pool_stats().alloc_failures > 0),
        "a burst bigger than the pool should exhaust it at least once"
    );
    assert!(
        wait_until(400, || delivered.lock().expect("delivered mutex poisoned").iter().any(|id| id.as_deref() == Some("TRIGGER"))),
        "the gateway should recover and keep delivering once slots free up"
    );
    assert!(
        delivered.lock().expect("delivered mutex poisoned").len() > 1,
        "more than just the trigger message should have made it through"
    );
    assert!(gateway.pool_stats().in_use <= gateway.pool_stats().capacity, "pool must never report more in-use than capacity");

    gateway.disconnect();
    let _ = server.join();
}
