mod config;
mod monitor;

pub use config::HealthConfig;
pub use monitor::{HealthMonitor, RecoveryAction};
