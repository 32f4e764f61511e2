// SPDX-License-Identifier: MIT OR Apache-2.0

//! External transport contract (C13) and a thin, non-TLS default adapter.
//!
//! The core datapath (C1-C9) only depends on the [`Transport`] trait, never
//! on a concrete socket type, so it can be driven against a fake in tests.
//! `TcpTransport` is grounded on the teacher's `ClientConnection`: a
//! `Mutex`-protected write half plus a dedicated reader thread. Generalized
//! from async `tokio::net::TcpStream` split halves and a
//! `CancellationToken` to blocking `std::net::TcpStream` (cloned for the
//! reader thread) and a plain `AtomicBool` run flag, per §5's
//! preemptive-OS-thread model — there is no executor here to `select!`
//! against, so unblocking a blocking `recv`/`send` is done the traditional
//! way: shut down the socket out from under it.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, bail};

use crate::error::GatewayError;

pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// The byte-oriented bidirectional transport contract from §6. A concrete
/// TLS/hardware-accelerated implementation is out of scope for this crate;
/// only the contract and a plain-TCP default adapter are.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<()>;
    fn send(&self, bytes: &[u8]) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn set_on_data(&self, callback: DataCallback);
    fn set_on_error(&self, callback: ErrorCallback);
    fn set_on_disconnect(&self, callback: DisconnectCallback);
}

const READ_BUF_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct Callbacks {
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

/// State shared between `TcpTransport` and its receiver thread. Split out
/// from `TcpTransport` itself so the thread can hold a plain `Arc<Shared>`
/// without requiring `TcpTransport` to know it is always held behind an
/// `Arc` — it only needs its *fields* to outlive the call to `connect`.
struct Shared {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn on_error(&self, err: &anyhow::Error) {
        let callbacks = self.callbacks.lock().expect("transport callback mutex poisoned");
        if let Some(cb) = &callbacks.on_error {
            cb(err);
        }
    }

    fn on_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let callbacks = self.callbacks.lock().expect("transport callback mutex poisoned");
            if let Some(cb) = &callbacks.on_disconnect {
                cb();
            }
        }
    }
}

/// Blocking, non-TLS `std::net::TcpStream` adapter. One dedicated receiver
/// thread per connected stream performs blocking reads and invokes
/// `on_data`; `send` performs a blocking `write_all` guarded by a mutex so
/// concurrent sender threads don't interleave partial writes.
pub struct TcpTransport {
    shared: Arc<Shared>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                addr: addr.into(),
                stream: Mutex::new(None),
                connected: AtomicBool::new(false),
                callbacks: Mutex::new(Callbacks::default()),
            }),
            reader_handle: Mutex::new(None),
        }
    }

    fn spawn_receiver(&self, mut reader: TcpStream) {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("fix-gw-transport-rx".into())
            .spawn(move || {
                let mut buf = [0u8; READ_BUF_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            shared.on_disconnected();
                            break;
                        },
                        Ok(n) => {
                            let callbacks = shared.callbacks.lock().expect("transport callback mutex poisoned");
                            if let Some(cb) = &callbacks.on_data {
                                cb(&buf[..n]);
                            }
                        },
                        Err(e) => {
                            if shared.connected.load(Ordering::Acquire) {
                                shared.on_error(&anyhow::Error::new(e));
                            }
                            shared.on_disconnected();
                            break;
                        },
                    }
                }
            })
            .expect("failed to spawn transport receiver thread");
        *self.reader_handle.lock().expect("transport reader-handle mutex poisoned") = Some(handle);
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::Acquire) {
            return Err(GatewayError::AlreadyConnected.into());
        }
        let addrs: Vec<_> = self
            .shared
            .addr
            .to_socket_addrs()
            .with_context(|| format!("resolving transport address {}", self.shared.addr))?
            .collect();
        let Some(first) = addrs.into_iter().next() else {
            let (host, port) = split_host_port(&self.shared.addr);
            bail!(GatewayError::ConnectFailed { host, port });
        };
        let stream = TcpStream::connect(first).with_context(|| format!("connecting to {}", self.shared.addr))?;
        stream.set_nodelay(true).context("setting TCP_NODELAY")?;
        let reader = stream.try_clone().context("cloning stream for receiver thread")?;

        *self.shared.stream.lock().expect("transport stream mutex poisoned") = Some(stream);
        self.shared.connected.store(true, Ordering::Release);
        self.spawn_receiver(reader);
        Ok(())
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.shared.stream.lock().expect("transport stream mutex poisoned");
        let Some(stream) = guard.as_mut() else {
            return Err(GatewayError::NotConnected.into());
        };
        stream.write_all(bytes).context("writing to transport")?;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut guard = self.shared.stream.lock().expect("transport stream mutex poisoned");
        if let Some(stream) = guard.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        drop(guard);
        self.shared.connected.store(false, Ordering::Release);
        if let Some(handle) = self.reader_handle.lock().expect("transport reader-handle mutex poisoned").take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn set_on_data(&self, callback: DataCallback) {
        self.shared.callbacks.lock().expect("transport callback mutex poisoned").on_data = Some(callback);
    }

    fn set_on_error(&self, callback: ErrorCallback) {
        self.shared.callbacks.lock().expect("transport callback mutex poisoned").on_error = Some(callback);
    }

    fn set_on_disconnect(&self, callback: DisconnectCallback) {
        self.shared.callbacks.lock().expect("transport callback mutex poisoned").on_disconnect = Some(callback);
    }
}

fn split_host_port(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
        None => (addr.to_string(), 0),
    }
}
