// SPDX-License-Identifier: MIT OR Apache-2.0

//! Construction-time error taxonomy.
//!
//! Runtime datapath failures are reported through `anyhow::Result` or
//! through the dedicated status enums (`ParseStatus`, etc.) — they have
//! many possible causes and no caller branches on which one occurred.
//! Failures that happen once, at startup, while wiring the gateway
//! together are a small, closed set, so they get a precisely-classified
//! `thiserror` enum instead, the same split the teacher crate draws
//! between `anyhow` and `UnknownOpcode`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid message pool size: {0} (must be >= 1)")]
    InvalidPoolSize(usize),

    #[error("invalid queue capacity for {lane} lane: {capacity} (must be >= 1)")]
    InvalidQueueCapacity { lane: &'static str, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport connect failed for {host}:{port}")]
    ConnectFailed { host: String, port: u16 },

    #[error("gateway is already connected")]
    AlreadyConnected,

    #[error("gateway is not connected")]
    NotConnected,
}
