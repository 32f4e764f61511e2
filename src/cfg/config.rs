// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::gap::{CRITICAL_THRESHOLD, MAX_RETRY, WARN_THRESHOLD};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Session counterparty identity and wire version.
    pub identity: SessionIdentity,
    /// Heartbeat/timeout scheduling, all expressed as seconds in YAML.
    pub timers: Timers,
    /// Per-lane ring capacities.
    pub queues: QueueCapacities,
    /// Streaming-parser limits.
    pub parser: ParserLimits,
    /// Message pool sizing.
    pub pool: PoolLimits,
    /// Transport host/port and connection behaviour.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionIdentity {
    #[serde(rename = "SenderCompID")]
    pub sender_comp_id: String,
    #[serde(rename = "TargetCompID")]
    pub target_comp_id: String,
    #[serde(rename = "BeginString")]
    pub begin_string: String,
    #[serde(default = "default_accepted_versions", rename = "AcceptedVersions")]
    pub accepted_versions: Vec<String>,
}

fn default_accepted_versions() -> Vec<String> {
    vec!["FIX.4.2".to_string(), "FIX.4.4".to_string()]
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Timers {
    #[serde(rename = "HeartBtInt", with = "serde_secs")]
    pub heart_bt_int: Duration,
    #[serde(rename = "LogonTimeout", with = "serde_secs")]
    pub logon_timeout: Duration,
    #[serde(rename = "TestRequestTimeout", with = "serde_secs")]
    pub test_request_timeout: Duration,
    #[serde(rename = "GapTimeout", with = "serde_secs")]
    pub gap_timeout: Duration,
    #[serde(rename = "GapPollInterval", with = "serde_millis")]
    pub gap_poll_interval: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QueueCapacities {
    #[serde(rename = "Critical")]
    pub critical: usize,
    #[serde(rename = "High")]
    pub high: usize,
    #[serde(rename = "Medium")]
    pub medium: usize,
    #[serde(rename = "Low")]
    pub low: usize,
}

impl QueueCapacities {
    pub fn as_array(&self) -> [usize; 4] {
        [self.critical, self.high, self.medium, self.low]
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParserLimits {
    #[serde(rename = "MaxMessageSize")]
    pub max_message_size: usize,
    #[serde(rename = "ValidateChecksum")]
    pub validate_checksum: bool,
    #[serde(rename = "StrictValidation")]
    pub strict_validation: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolLimits {
    #[serde(rename = "MessagePoolSize")]
    pub message_pool_size: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "ConnectTimeout", with = "serde_secs")]
    pub connect_timeout: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that the YAML form cannot express on its own.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.identity.sender_comp_id.is_empty(), "SenderCompID must not be empty");
        ensure!(!self.identity.target_comp_id.is_empty(), "TargetCompID must not be empty");
        ensure!(!self.identity.begin_string.is_empty(), "BeginString must not be empty");
        ensure!(!self.identity.accepted_versions.is_empty(), "AcceptedVersions must not be empty");
        if !self.identity.accepted_versions.contains(&self.identity.begin_string) {
            self.identity.accepted_versions.push(self.identity.begin_string.clone());
        }

        ensure!(!self.timers.heart_bt_int.is_zero(), "HeartBtInt must be > 0");
        ensure!(!self.timers.logon_timeout.is_zero(), "LogonTimeout must be > 0");
        ensure!(!self.timers.test_request_timeout.is_zero(), "TestRequestTimeout must be > 0");
        ensure!(!self.timers.gap_timeout.is_zero(), "GapTimeout must be > 0");
        ensure!(!self.timers.gap_poll_interval.is_zero(), "GapPollInterval must be > 0");

        for (name, cap) in [
            ("Critical", self.queues.critical),
            ("High", self.queues.high),
            ("Medium", self.queues.medium),
            ("Low", self.queues.low),
        ] {
            ensure!(cap > 0, "{name} queue capacity must be > 0");
        }

        ensure!(self.parser.max_message_size > 0, "MaxMessageSize must be > 0");
        ensure!(self.pool.message_pool_size > 0, "MessagePoolSize must be > 0");
        ensure!(WARN_THRESHOLD < CRITICAL_THRESHOLD, "WARN_THRESHOLD must be less than CRITICAL_THRESHOLD");
        ensure!(MAX_RETRY >= 1, "MAX_RETRY must be >= 1");
        ensure!(!self.runtime.host.is_empty(), "Host must not be empty");
        ensure!(self.runtime.port != 0, "Port must not be 0");

        Ok(())
    }
}

/// Serde helper for representing `Duration` as a whole number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Same shape as [`serde_secs`] but at millisecond granularity, for timers
/// finer than a second (the gap manager's `POLL_MS`-scale tick interval).
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
