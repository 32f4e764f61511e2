//! This module handles configuration, command-line parsing, and logging.

// SPDX-License-Identifier: MIT OR Apache-2.0

/// Command-line interface parsing.
pub mod cli;
/// Configuration file parsing and management.
pub mod config;
/// Logger initialization.
pub mod logger;

pub use config::Config;
