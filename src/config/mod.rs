//! Global engine configuration

use std::time::Duration;

/// Toggles consumed by the container factory and supervisor, populated
/// from the command line
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Pull component images before every create
    pub always_pull: bool,

    /// Wire components into the supervisor's PID namespace
    pub share_pids: bool,

    /// Mount the supervisor's volumes into components
    pub share_volumes: bool,

    /// Stop grace period applied when a component declares none
    pub stop_grace_period: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            always_pull: false,
            share_pids: false,
            share_volumes: false,
            stop_grace_period: Duration::from_secs(10),
        }
    }
}
