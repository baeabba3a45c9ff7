// SPDX-License-Identifier: GPL-3.0-only

//! Manager tuning knobs, loadable from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling quantum for bounded waits (loop setup, operation gate).
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Total time to wait for a freshly set up loop device to surface.
const DEFAULT_LOOP_SETUP_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    pub poll_interval_ms: u64,
    pub loop_setup_timeout_ms: u64,
    /// Override for the helper's well-known bus name, for test buses.
    pub helper_bus_name: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            loop_setup_timeout_ms: DEFAULT_LOOP_SETUP_TIMEOUT_MS,
            helper_bus_name: None,
        }
    }
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn loop_setup_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_setup_timeout_ms)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
