//! Bootstrap configuration - seeds a `ConnectionManager` at construction time,
//! then the manager owns the values for its lifetime.

use serde::{Deserialize, Serialize};

/// Tunables that seed a `ConnectionManager` when it is started.
///
/// None of these can be changed for a manager once `start()` has run; a new
/// manager instance (and a fresh bootstrap read) is required to pick up a
/// changed value. This mirrors the "bootstrap seeds runtime state, then
/// runtime owns it" split the rest of this crate uses for services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interval between application-level heartbeats sent while a connection
    /// is otherwise idle.
    /// Default: 15s
    #[serde(default = "RuntimeConfig::default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long a connection may go without a successful call or heartbeat
    /// before the manager marks it inactive.
    /// Default: 30s
    #[serde(default = "RuntimeConfig::default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Timeout applied to the initial connect attempt for a slot.
    /// Default: 10s
    #[serde(default = "RuntimeConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long a slot may sit idle before it is torn down and recreated on
    /// next access, bounding socket/file-descriptor lifetime.
    /// Default: 300s
    #[serde(default = "RuntimeConfig::default_connection_refresh_timeout_secs")]
    pub connection_refresh_timeout_secs: u64,

    /// Number of connection-pool slots to maintain per peer.
    /// Default: 1
    #[serde(default = "RuntimeConfig::default_pool_size")]
    pub pool_size: u32,

    /// Maximum retry attempts for a single call before it is failed as
    /// `ExhaustedRetries`.
    /// Default: 100
    #[serde(default = "RuntimeConfig::default_max_try_count")]
    pub max_try_count: u32,

    /// Build identity stamped on every outgoing request header and checked
    /// against the peer's on every inbound one.
    /// Default: "dev"
    #[serde(default = "RuntimeConfig::default_build_id")]
    pub build_id: String,
}

impl RuntimeConfig {
    fn default_heartbeat_interval_secs() -> u64 {
        15
    }

    fn default_inactivity_timeout_secs() -> u64 {
        30
    }

    fn default_connect_timeout_secs() -> u64 {
        10
    }

    fn default_connection_refresh_timeout_secs() -> u64 {
        300
    }

    fn default_pool_size() -> u32 {
        1
    }

    fn default_max_try_count() -> u32 {
        100
    }

    fn default_build_id() -> String {
        "dev".to_string()
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn inactivity_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connection_refresh_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_refresh_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: Self::default_heartbeat_interval_secs(),
            inactivity_timeout_secs: Self::default_inactivity_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            connection_refresh_timeout_secs: Self::default_connection_refresh_timeout_secs(),
            pool_size: Self::default_pool_size(),
            max_try_count: Self::default_max_try_count(),
            build_id: Self::default_build_id(),
        }
    }
}
