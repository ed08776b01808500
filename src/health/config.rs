use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds for the stall/recovery protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    /// How long a wait-for-data condition may last before it counts as a stall
    pub stall_grace_ms: u64,

    /// Stall detections inside this window after a nudge are ignored
    pub recovery_cooldown_ms: u64,

    /// Forward seek applied past a stuck position
    pub nudge_seek_secs: f64,

    /// Delay before re-attaching after a network-class fatal error
    pub reinit_delay_ms: u64,

    /// Network re-attach attempts before reporting "still preparing"
    pub max_reinit_attempts: u32,

    /// In-place media recoveries before degrading to a re-attach
    pub max_media_recoveries: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_grace_ms: 3_000,
            recovery_cooldown_ms: 2_000,
            nudge_seek_secs: 1.0,
            reinit_delay_ms: 3_000,
            max_reinit_attempts: 20,
            max_media_recoveries: 3,
        }
    }
}

impl HealthConfig {
    pub fn stall_grace(&self) -> Duration {
        Duration::from_millis(self.stall_grace_ms)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_millis(self.recovery_cooldown_ms)
    }

    pub fn reinit_delay(&self) -> Duration {
        Duration::from_millis(self.reinit_delay_ms)
    }
}
