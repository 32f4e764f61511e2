// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway facade (C9): wires the ring queues, pool, parser, router,
//! session manager, gap manager, and outbound sender into one externally
//! driveable object.
//!
//! Grounded on the teacher's `client/client.rs` (`ClientConnection::connect`,
//! the split between a graceful quiesce and a hard kill on shutdown) for the
//! connect/disconnect lifecycle, and on `client/pool_sessions.rs`'s
//! `Pool::attach_self` for wiring a `Weak<Gateway>` into transport callbacks
//! so an unsolicited disconnect can tear down the gateway's own background
//! threads from inside the transport's receiver thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cfg::Config;
use crate::error::GatewayError;
use crate::gap::GapManager;
use crate::message::FixMessage;
use crate::parser::StreamParser;
use crate::pool::MessagePool;
use crate::router::{self, Priority, PriorityQueueContainer, RouteHint};
use crate::sender::OutboundSender;
use crate::session::{SessionContext, SessionManager, SessionOutcome, SessionState};
use crate::stats::{self, GatewayStatsSnapshot, ParserStatsSnapshotOwned, PoolStatsSnapshot};
use crate::transport::{Transport, TcpTransport};

/// Invoked for each inbound message the session layer forwards as business
/// traffic (everything that isn't session-layer admin traffic).
pub type MessageCallback = Arc<dyn Fn(*mut FixMessage) + Send + Sync>;
/// Invoked for every recoverable error: parser framing failures, transport
/// I/O errors, and the like.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const GRACEFUL_LOGOUT_DRAIN: Duration = Duration::from_millis(200);

#[derive(Default)]
struct GatewayCallbacks {
    on_message: Mutex<Option<MessageCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl GatewayCallbacks {
    fn invoke_message(&self, handle: *mut FixMessage) {
        if let Some(cb) = self.on_message.lock().expect("message callback mutex poisoned").as_ref() {
            cb(handle);
        }
    }

    fn invoke_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "gateway reported a recoverable error");
        if let Some(cb) = self.on_error.lock().expect("error callback mutex poisoned").as_ref() {
            cb(message);
        }
    }
}

/// Everything torn down together at disconnect: the four background
/// threads and the sender's four lane threads, plus the transport they all
/// share. A fresh one is built on every successful `connect`.
struct RuntimeThreads {
    running: Arc<AtomicBool>,
    gap: Arc<GapManager>,
    session_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
    gap_handle: JoinHandle<()>,
    sender: OutboundSender,
    transport: Arc<dyn Transport>,
}

pub struct Gateway {
    config: Config,
    pool: Arc<MessagePool>,
    inbound_lanes: Arc<PriorityQueueContainer>,
    outbound_lanes: Arc<PriorityQueueContainer>,
    parser: Arc<Mutex<StreamParser>>,
    session: Arc<SessionManager>,
    callbacks: Arc<GatewayCallbacks>,
    runtime: Mutex<Option<RuntimeThreads>>,
    self_weak: Mutex<Weak<Gateway>>,
}

impl Gateway {
    /// Validates queue/pool sizing and builds every C1-C8 component.
    /// Transport and background threads are not started until
    /// [`Gateway::connect`].
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        if config.pool.message_pool_size == 0 {
            return Err(GatewayError::InvalidPoolSize(0));
        }
        for (lane, capacity) in [
            ("Critical", config.queues.critical),
            ("High", config.queues.high),
            ("Medium", config.queues.medium),
            ("Low", config.queues.low),
        ] {
            if capacity == 0 {
                return Err(GatewayError::InvalidQueueCapacity { lane, capacity });
            }
        }

        let capacities = config.queues.as_array();
        let pool = Arc::new(MessagePool::new(config.pool.message_pool_size, "gateway"));
        let inbound_lanes = Arc::new(PriorityQueueContainer::new(capacities));
        let outbound_lanes = Arc::new(PriorityQueueContainer::new(capacities));

        let accepted: Vec<&str> = config.identity.accepted_versions.iter().map(String::as_str).collect();
        let parser = Arc::new(Mutex::new(StreamParser::new(
            config.parser.max_message_size,
            config.parser.validate_checksum,
            config.parser.strict_validation,
            &accepted,
        )));

        let session = Arc::new(SessionManager::new(SessionContext::new(
            config.identity.sender_comp_id.clone(),
            config.identity.target_comp_id.clone(),
            config.identity.begin_string.clone(),
        )));

        Ok(Self {
            config,
            pool,
            inbound_lanes,
            outbound_lanes,
            parser,
            session,
            callbacks: Arc::new(GatewayCallbacks::default()),
            runtime: Mutex::new(None),
            self_weak: Mutex::new(Weak::new()),
        })
    }

    /// Records a `Weak` handle to `self` so transport callbacks (which run
    /// on the transport's own receiver thread, not on a method of
    /// `Gateway`) can reach back in. Mirrors the teacher's
    /// `Pool::attach_self` — call once, right after wrapping the gateway in
    /// an `Arc`.
    pub fn attach_self(self: &Arc<Self>) {
        *self.self_weak.lock().expect("self_weak mutex poisoned") = Arc::downgrade(self);
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.callbacks.on_message.lock().expect("message callback mutex poisoned") = Some(callback);
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.callbacks.on_error.lock().expect("error callback mutex poisoned") = Some(callback);
    }

    pub fn is_connected(&self) -> bool {
        self.runtime
            .lock()
            .expect("runtime mutex poisoned")
            .as_ref()
            .is_some_and(|rt| rt.transport.is_connected())
    }

    pub fn parser_stats(&self) -> ParserStatsSnapshotOwned {
        self.parser.lock().expect("parser mutex poisoned").stats().into()
    }

    pub fn reset_parser_stats(&self) {
        self.parser.lock().expect("parser mutex poisoned").reset_stats();
    }

    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        stats::pool_stats(&self.pool)
    }

    pub fn stats_snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot { pool: self.pool_stats(), parser: self.parser_stats() }
    }

    /// Classifies and pushes an already-built message onto the outbound
    /// lanes. `false` means the message's lane was full; the slot has
    /// already been returned to the pool.
    pub fn send_message(&self, handle: *mut FixMessage) -> bool {
        let (_priority, ok) = router::route(&self.outbound_lanes, &self.pool, handle, RouteHint::default());
        ok
    }

    /// Writes pre-serialised bytes straight to the transport, bypassing
    /// the pool and priority lanes entirely. Meant for callers that already
    /// have wire bytes in hand (e.g. replaying a captured fixture); regular
    /// application traffic should go through [`Gateway::send_message`] so it
    /// gets priority fan-out and retry-then-drop on transport failure.
    pub fn send_raw(&self, bytes: &[u8]) -> bool {
        let Some(transport) = self.runtime.lock().expect("runtime mutex poisoned").as_ref().map(|rt| Arc::clone(&rt.transport))
        else {
            self.callbacks.invoke_error("send_raw called while disconnected");
            return false;
        };
        match transport.send(bytes) {
            Ok(()) => true,
            Err(err) => {
                self.callbacks.invoke_error(format!("send_raw failed: {err}"));
                false
            },
        }
    }

    /// Connects to `host:port`, spawns the sender/session/heartbeat/gap
    /// threads, and sends the initial Logon. Returns `false` without
    /// touching existing state if already connected, or if the transport
    /// connect itself fails.
    pub fn connect(&self, host: &str, port: u16) -> bool {
        if self.is_connected() {
            return false;
        }

        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(format!("{host}:{port}")));

        let self_weak = self.self_weak.lock().expect("self_weak mutex poisoned").clone();
        {
            let self_weak = self_weak.clone();
            transport.set_on_data(Arc::new(move |bytes: &[u8]| {
                if let Some(gw) = self_weak.upgrade() {
                    gw.on_transport_data(bytes);
                }
            }));
        }
        {
            let self_weak = self_weak.clone();
            transport.set_on_error(Arc::new(move |err: &anyhow::Error| {
                if let Some(gw) = self_weak.upgrade() {
                    gw.callbacks.invoke_error(err.to_string());
                }
            }));
        }
        {
            let self_weak = self_weak.clone();
            transport.set_on_disconnect(Arc::new(move || {
                if let Some(gw) = self_weak.upgrade() {
                    gw.on_transport_disconnected();
                }
            }));
        }

        if let Err(err) = transport.connect() {
            self.callbacks.invoke_error(format!("connect failed: {err}"));
            return false;
        }

        let running = Arc::new(AtomicBool::new(true));
        // A fresh gap manager per connection: gaps are scoped to a session's
        // sequence-number epoch, and `GapManager::shutdown` has no reverse,
        // so it cannot be a gateway-lifetime singleton the way the pool and
        // lanes are. Timeout/poll come from config rather than the module's
        // own defaults, per the Open Questions resolution in SPEC_FULL.md §9.
        let gap = Arc::new(GapManager::with_timeout_and_poll(self.config.timers.gap_timeout, self.config.timers.gap_poll_interval));
        let sender = OutboundSender::spawn(Arc::clone(&self.outbound_lanes), Arc::clone(&self.pool), Arc::clone(&transport));

        let session_handle = {
            let running = Arc::clone(&running);
            let pool = Arc::clone(&self.pool);
            let inbound_lanes = Arc::clone(&self.inbound_lanes);
            let outbound_lanes = Arc::clone(&self.outbound_lanes);
            let session = Arc::clone(&self.session);
            let gap = Arc::clone(&gap);
            let callbacks = Arc::clone(&self.callbacks);
            thread::Builder::new()
                .name("fix-gw-session".into())
                .spawn(move || run_session_thread(&running, &pool, &inbound_lanes, &outbound_lanes, &session, &gap, &callbacks))
                .expect("failed to spawn session thread")
        };

        let heartbeat_handle = {
            let running = Arc::clone(&running);
            let pool = Arc::clone(&self.pool);
            let outbound_lanes = Arc::clone(&self.outbound_lanes);
            let session = Arc::clone(&self.session);
            let self_weak = self_weak.clone();
            let disconnect_triggered = Arc::new(AtomicBool::new(false));
            thread::Builder::new()
                .name("fix-gw-heartbeat".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        session.heartbeat_tick(&pool, &outbound_lanes);
                        session.check_logon_timeout();
                        // The session decided to give up (sequence-too-low,
                        // unanswered TestRequest, logon timeout); actually
                        // tear down the connection. Spawned off this thread
                        // rather than called directly: `disconnect` joins
                        // this very handle, so calling it in-line here would
                        // deadlock on its own join.
                        if session.state() == SessionState::Disconnecting
                            && !disconnect_triggered.swap(true, Ordering::AcqRel)
                            && let Some(gw) = self_weak.upgrade()
                        {
                            thread::spawn(move || gw.disconnect());
                        }
                        thread::sleep(Duration::from_secs(1));
                    }
                })
                .expect("failed to spawn heartbeat thread")
        };

        let gap_handle = {
            let pool = Arc::clone(&self.pool);
            let outbound_lanes = Arc::clone(&self.outbound_lanes);
            let session = Arc::clone(&self.session);
            let gap = Arc::clone(&gap);
            thread::Builder::new()
                .name("fix-gw-gap".into())
                .spawn(move || gap.run(session.context(), &outbound_lanes, &pool))
                .expect("failed to spawn gap manager thread")
        };

        *self.runtime.lock().expect("runtime mutex poisoned") =
            Some(RuntimeThreads { running, gap, session_handle, heartbeat_handle, gap_handle, sender, transport: Arc::clone(&transport) });

        let heart_bt_int = self.config.timers.heart_bt_int.as_secs().max(1) as i32;
        if let Some(logon) = self.session.begin_logon(&self.pool, heart_bt_int, self.config.timers.logon_timeout) {
            let (_priority, ok) = router::route(&self.outbound_lanes, &self.pool, logon, RouteHint::default());
            if !ok {
                self.callbacks.invoke_error("could not queue initial Logon: outbound lane full");
            }
        } else {
            self.callbacks.invoke_error("could not allocate initial Logon: message pool exhausted");
        }

        true
    }

    /// Graceful shutdown: attempts a Logout, gives the sender threads a
    /// short drain window, then stops every background thread and closes
    /// the transport. Idempotent — a second call is a no-op.
    pub fn disconnect(&self) {
        let Some(rt) = self.runtime.lock().expect("runtime mutex poisoned").take() else {
            return;
        };

        if matches!(self.session.state(), SessionState::LoggedOn | SessionState::LogonSent)
            && let Some(logout) = self.session.begin_logout(&self.pool, Some("local disconnect"))
        {
            let (_priority, ok) = router::route(&self.outbound_lanes, &self.pool, logout, RouteHint::default());
            if ok {
                thread::sleep(GRACEFUL_LOGOUT_DRAIN);
            }
        }

        self.teardown(rt, true);
        self.session.on_transport_disconnect();
    }

    /// Permanently retires the gateway: disconnects any active connection,
    /// then shuts down the lanes and the message pool. Unlike `disconnect`,
    /// this has no reverse — a `connect()` call afterwards will fail to
    /// allocate or route anything. Meant for process-exit cleanup, not
    /// reconnect cycles.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inbound_lanes.shutdown_all();
        self.outbound_lanes.shutdown_all();
        self.pool.shutdown();
    }

    /// Invoked from the transport's own receiver thread when the socket
    /// drops unexpectedly. Tears down everything except the transport
    /// itself — calling `transport.disconnect()` here would have the
    /// receiver thread try to join its own handle and deadlock.
    fn on_transport_disconnected(&self) {
        let Some(rt) = self.runtime.lock().expect("runtime mutex poisoned").take() else {
            return;
        };
        self.session.on_transport_disconnect();
        self.teardown(rt, false);
    }

    fn teardown(&self, rt: RuntimeThreads, disconnect_transport: bool) {
        // `inbound_lanes`/`outbound_lanes` live for the gateway's whole
        // lifetime, not just one connection — shutting them down here
        // would permanently break every subsequent `connect()`, since
        // `RingQueue::shutdown` has no reverse. Only the per-connection
        // runtime (threads, sender, transport) is torn down.
        rt.running.store(false, Ordering::Release);
        rt.gap.shutdown();
        if disconnect_transport {
            let _ = rt.transport.disconnect();
        }
        rt.sender.shutdown();
        join_with_timeout(rt.session_handle, "session", SHUTDOWN_DEADLINE);
        join_with_timeout(rt.heartbeat_handle, "heartbeat", SHUTDOWN_DEADLINE);
        join_with_timeout(rt.gap_handle, "gap", SHUTDOWN_DEADLINE);
    }

    /// The receiver role (§5): runs on the transport's own receiver
    /// thread. Frames bytes into messages and classifies each onto an
    /// inbound lane for the session thread to consume.
    fn on_transport_data(&self, bytes: &[u8]) {
        let outcome = self.parser.lock().expect("parser mutex poisoned").parse_chunk(&self.pool, bytes);

        for handle in outcome.handles {
            let (_priority, ok) = router::route(&self.inbound_lanes, &self.pool, handle, RouteHint::default());
            if !ok {
                self.callbacks.invoke_error("inbound lane full, message dropped");
            }
        }

        match outcome.status {
            Some(crate::parser::ParseStatus::Success) | Some(crate::parser::ParseStatus::NeedMoreData) | None => {},
            Some(status) => self.callbacks.invoke_error(format!("parse error: {status:?}")),
        }
    }
}

/// Session role (§5): strict-priority drain of the four inbound lanes —
/// CRITICAL is fully drained before HIGH is even polled, and so on — so a
/// burst of order traffic is never held up behind spontaneous Heartbeats.
fn run_session_thread(
    running: &AtomicBool,
    pool: &MessagePool,
    inbound_lanes: &PriorityQueueContainer,
    outbound_lanes: &PriorityQueueContainer,
    session: &SessionManager,
    gap: &GapManager,
    callbacks: &GatewayCallbacks,
) {
    let mut backoff = Duration::from_micros(50);
    const MAX_BACKOFF: Duration = Duration::from_millis(1);

    loop {
        let drained = drain_inbound_once(pool, inbound_lanes, outbound_lanes, session, gap, callbacks);
        if drained {
            backoff = Duration::from_micros(50);
            continue;
        }
        if !running.load(Ordering::Acquire) {
            break;
        }
        thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    // Final drain pass so nothing already queued is lost at shutdown.
    while drain_inbound_once(pool, inbound_lanes, outbound_lanes, session, gap, callbacks) {}
}

fn drain_inbound_once(
    pool: &MessagePool,
    inbound_lanes: &PriorityQueueContainer,
    outbound_lanes: &PriorityQueueContainer,
    session: &SessionManager,
    gap: &GapManager,
    callbacks: &GatewayCallbacks,
) -> bool {
    let mut any = false;
    for priority in Priority::ALL {
        while let Some(handle) = inbound_lanes.lane(priority).try_pop() {
            any = true;
            if let SessionOutcome::Forward(h) = session.process_inbound(handle, gap, outbound_lanes, pool) {
                callbacks.invoke_message(h);
                pool.deallocate(h);
            }
        }
    }
    any
}

/// Waits up to `timeout` for `handle` to finish. On timeout, logs and lets
/// the thread keep running detached — std gives no way to forcibly kill an
/// OS thread, so a bounded wait is the most a shutdown routine can do.
fn join_with_timeout(handle: JoinHandle<()>, name: &'static str, timeout: Duration) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(timeout).is_err() {
        tracing::error!(thread = name, "thread did not exit within the shutdown deadline");
    }
}
