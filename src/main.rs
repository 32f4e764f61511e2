// SPDX-License-Identifier: MIT OR Apache-2.0

//! `fix-gatewayd`: loads a config file, wires up a [`fix_gateway_rs::Gateway`],
//! connects it to the configured counterparty, and runs until the connection
//! is lost.
//!
//! Synchronous by design (§5 of SPEC_FULL.md mandates preemptive OS threads
//! for the datapath, not an async runtime), so this entry point has no
//! `#[tokio::main]` the way the teacher's binary does — it just blocks the
//! main thread.

use std::sync::Arc;
use std::time::Duration;
use std::{env, thread};

use anyhow::{Context, Result};
use fix_gateway_rs::cfg::cli::resolve_config_path;
use fix_gateway_rs::cfg::config::Config;
use fix_gateway_rs::cfg::logger::init_logger;
use fix_gateway_rs::message::FixMessage;
use fix_gateway_rs::Gateway;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config/gateway.yaml".to_string());
    let logger_config_path = args.next().unwrap_or_else(|| "config/logger.yaml".to_string());

    let _logger_guard = init_logger(&logger_config_path).context("failed to initialise logger")?;

    let cfg = resolve_config_path(&config_path).and_then(Config::load_from_file).context("failed to resolve or load config")?;

    let host = cfg.runtime.host.clone();
    let port = cfg.runtime.port;

    let gateway = Arc::new(Gateway::new(cfg).context("invalid gateway configuration")?);
    gateway.attach_self();

    gateway.set_message_callback(Arc::new(|handle: *mut FixMessage| {
        // SAFETY: handle comes from the session layer's Forward outcome and
        // is returned to the pool by the caller right after this callback.
        let msg = unsafe { &mut *handle };
        info!(msg_type = ?msg.msg_type_cached(), fields = msg.field_count(), "business message received");
    }));
    gateway.set_error_callback(Arc::new(|message: String| {
        warn!(%message, "gateway reported a recoverable error");
    }));

    if !gateway.connect(&host, port) {
        error!(host, port, "initial connect failed");
        anyhow::bail!("could not connect to {host}:{port}");
    }
    info!(host, port, "gateway connected, entering run loop");

    while gateway.is_connected() {
        thread::sleep(POLL_INTERVAL);
    }

    info!("connection lost, shutting down");
    gateway.shutdown();
    Ok(())
}
