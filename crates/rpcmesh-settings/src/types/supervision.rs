//! Supervisor fault policy and mailbox settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Fault policy and mailbox sizing for the RPC supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisionSettings {
    /// Faults tolerated per child within the window before escalating.
    pub max_restarts: u32,
    /// Length of the fault-counting window in milliseconds.
    pub restart_window_ms: u64,
    /// Capacity of each child's mailbox.
    pub mailbox_capacity: usize,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            restart_window_ms: 60_000,
            mailbox_capacity: 1024,
        }
    }
}

impl SupervisionSettings {
    /// Fault-counting window.
    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.restart_window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "supervision.restartWindowMs must be positive".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "supervision.mailboxCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
