//! Engine tunables. All durations are whole seconds; all prices are integer
//! credit units. Loadable from a JSON file, with per-field defaults so a
//! partial file only overrides what it names.

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ticket TTL: how long a submitted ticket stays WAITING.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: i64,

    /// Credit price of one ticket when the free allowance is exhausted.
    #[serde(default = "default_ticket_credit_price")]
    pub ticket_credit_price: i64,

    /// Credit per billing unit of call time.
    #[serde(default = "default_call_unit_rate")]
    pub call_unit_rate: i64,

    /// Length of one billing block; one unit is owed per completed block
    /// on top of the upfront unit.
    #[serde(default = "default_call_block_seconds")]
    pub call_block_seconds: i64,

    /// How long a call may stay RINGING before the sweeper times it out.
    #[serde(default = "default_ring_timeout_seconds")]
    pub ring_timeout_seconds: i64,

    /// Peer liveness window for heartbeat billing.
    #[serde(default = "default_heartbeat_stale_seconds")]
    pub heartbeat_stale_seconds: i64,

    /// Callee share of the captured amount, in percent (floored).
    #[serde(default = "default_earn_rate_percent")]
    pub earn_rate_percent: i64,
}

fn default_wait_seconds() -> i64 {
    30
}
fn default_ticket_credit_price() -> i64 {
    1
}
fn default_call_unit_rate() -> i64 {
    10
}
fn default_call_block_seconds() -> i64 {
    60
}
fn default_ring_timeout_seconds() -> i64 {
    60
}
fn default_heartbeat_stale_seconds() -> i64 {
    15
}
fn default_earn_rate_percent() -> i64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_seconds: default_wait_seconds(),
            ticket_credit_price: default_ticket_credit_price(),
            call_unit_rate: default_call_unit_rate(),
            call_block_seconds: default_call_block_seconds(),
            ring_timeout_seconds: default_ring_timeout_seconds(),
            heartbeat_stale_seconds: default_heartbeat_stale_seconds(),
            earn_rate_percent: default_earn_rate_percent(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.as_ref().display()))?;
        Self::from_json_str(&raw)
    }

    pub fn wait_ms(&self) -> i64 {
        self.wait_seconds * 1_000
    }

    pub fn block_ms(&self) -> i64 {
        self.call_block_seconds * 1_000
    }

    pub fn ring_timeout_ms(&self) -> i64 {
        self.ring_timeout_seconds * 1_000
    }

    pub fn heartbeat_stale_ms(&self) -> i64 {
        self.heartbeat_stale_seconds * 1_000
    }
}
