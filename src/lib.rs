// SPDX-License-Identifier: MIT OR Apache-2.0

//! A low-latency FIX protocol gateway.
//!
//! The datapath is a chain of lock-free primitives driven by a small set of
//! fixed-role OS threads (see [`gateway`]): a streaming parser turns raw
//! bytes into pooled [`message::FixMessage`] values, a [`router`] fans them
//! out across four priority lanes, and a [`session`] state machine plus
//! [`gap`] tracker keep the wire-level sequence numbers honest.

pub mod cfg;
pub mod clock;
pub mod error;
pub mod gap;
pub mod gateway;
pub mod message;
pub mod parser;
pub mod pool;
pub mod ring;
pub mod router;
pub mod session;
pub mod sender;
pub mod stats;
pub mod transport;

pub use error::GatewayError;
pub use gateway::Gateway;
