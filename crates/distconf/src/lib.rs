//! Minimal configuration loading for the distbuild RPC proxy.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by every distbuild crate without causing
//! circular dependency issues.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): Things that physically cannot change
//!   at runtime - paths, bind addresses, telemetry endpoints.
//!
//! - **Runtime** (`RuntimeConfig`): Values that seed a `ConnectionManager` at
//!   construction time. After `start()` runs, the manager becomes the source
//!   of truth for its own state.
//!
//! # Usage
//!
//! ```rust,no_run
//! use distconf::DistConfig;
//!
//! let config = DistConfig::load().expect("failed to load config");
//!
//! // Infrastructure (fixed)
//! println!("CAS dir: {}", config.infra.paths.cas_dir.display());
//! println!("ROUTER bind: {}", config.infra.bind.zmq_router);
//!
//! // Runtime (seeds the manager)
//! println!("heartbeat interval: {:?}", config.runtime.heartbeat_interval());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/distbuild/config.toml` (system)
//! 2. `~/.config/distbuild/config.toml` (user)
//! 3. `./distbuild.toml` (local override)
//! 4. Environment variables (`DISTBUILD_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/distbuild"
//! cas_dir = "~/.distbuild/cas"
//!
//! [bind]
//! http_port = 8082
//! zmq_router = "tcp://0.0.0.0:5580"
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [runtime]
//! heartbeat_interval_secs = 15
//! inactivity_timeout_secs = 30
//! build_id = "release-2026.07"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::RuntimeConfig;
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{ConfigSources, discover_config_files_with_override};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete distbuild configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DistConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Runtime - seeds a `ConnectionManager`.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl DistConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/distbuild/config.toml`
    /// 3. `~/.config/distbuild/config.toml`
    /// 4. `./distbuild.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./distbuild.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = DistConfig::default();

        // Load config files in order
        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        // Apply environment variable overrides
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# distbuild configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.infra.paths.state_dir.display()
        ));
        output.push_str(&format!(
            "cas_dir = \"{}\"\n",
            self.infra.paths.cas_dir.display()
        ));
        output.push_str(&format!(
            "socket_dir = \"{}\"\n",
            self.infra.paths.socket_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));
        output.push_str(&format!("zmq_router = \"{}\"\n", self.infra.bind.zmq_router));
        output.push_str(&format!("zmq_pub = \"{}\"\n", self.infra.bind.zmq_pub));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[runtime]\n");
        output.push_str(&format!(
            "heartbeat_interval_secs = {}\n",
            self.runtime.heartbeat_interval_secs
        ));
        output.push_str(&format!(
            "inactivity_timeout_secs = {}\n",
            self.runtime.inactivity_timeout_secs
        ));
        output.push_str(&format!(
            "connect_timeout_secs = {}\n",
            self.runtime.connect_timeout_secs
        ));
        output.push_str(&format!(
            "connection_refresh_timeout_secs = {}\n",
            self.runtime.connection_refresh_timeout_secs
        ));
        output.push_str(&format!("pool_size = {}\n", self.runtime.pool_size));
        output.push_str(&format!("max_try_count = {}\n", self.runtime.max_try_count));
        output.push_str(&format!("build_id = \"{}\"\n", self.runtime.build_id));

        output
    }
}
