//! Config file discovery, loading, and environment variable overlay.

use crate::{BindConfig, ConfigError, DistConfig, InfraConfig, RuntimeConfig, TelemetryConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/distbuild/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("distbuild/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("distbuild.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<DistConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<DistConfig, ConfigError> {
    // Parse as raw TOML table first to handle nested structure
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut infra = InfraConfig::default();

    if let Some(paths_table) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths_table.get("state_dir").and_then(|v| v.as_str()) {
            infra.paths.state_dir = expand_path(v);
        }
        if let Some(v) = paths_table.get("cas_dir").and_then(|v| v.as_str()) {
            infra.paths.cas_dir = expand_path(v);
        }
        if let Some(v) = paths_table.get("socket_dir").and_then(|v| v.as_str()) {
            infra.paths.socket_dir = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            infra.bind.http_port = v as u16;
        }
        if let Some(v) = bind.get("zmq_router").and_then(|v| v.as_str()) {
            infra.bind.zmq_router = v.to_string();
        }
        if let Some(v) = bind.get("zmq_pub").and_then(|v| v.as_str()) {
            infra.bind.zmq_pub = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    let mut runtime = RuntimeConfig::default();

    if let Some(rt) = table.get("runtime").and_then(|v| v.as_table()) {
        if let Some(v) = rt.get("heartbeat_interval_secs").and_then(|v| v.as_integer()) {
            runtime.heartbeat_interval_secs = v as u64;
        }
        if let Some(v) = rt.get("inactivity_timeout_secs").and_then(|v| v.as_integer()) {
            runtime.inactivity_timeout_secs = v as u64;
        }
        if let Some(v) = rt.get("connect_timeout_secs").and_then(|v| v.as_integer()) {
            runtime.connect_timeout_secs = v as u64;
        }
        if let Some(v) = rt
            .get("connection_refresh_timeout_secs")
            .and_then(|v| v.as_integer())
        {
            runtime.connection_refresh_timeout_secs = v as u64;
        }
        if let Some(v) = rt.get("pool_size").and_then(|v| v.as_integer()) {
            runtime.pool_size = v as u32;
        }
        if let Some(v) = rt.get("max_try_count").and_then(|v| v.as_integer()) {
            runtime.max_try_count = v as u32;
        }
        if let Some(v) = rt.get("build_id").and_then(|v| v.as_str()) {
            runtime.build_id = v.to_string();
        }
    }

    Ok(DistConfig { infra, runtime })
}

/// Merge two configs, with `overlay` taking precedence field-by-field
/// (a field only overrides the base when it differs from the compiled
/// default, since the TOML layer cannot otherwise distinguish "not set"
/// from "set to the default").
pub fn merge_configs(base: DistConfig, overlay: DistConfig) -> DistConfig {
    let defaults = DistConfig::default();

    DistConfig {
        infra: InfraConfig {
            paths: crate::infra::PathsConfig {
                state_dir: if overlay.infra.paths.state_dir != defaults.infra.paths.state_dir {
                    overlay.infra.paths.state_dir
                } else {
                    base.infra.paths.state_dir
                },
                cas_dir: if overlay.infra.paths.cas_dir != defaults.infra.paths.cas_dir {
                    overlay.infra.paths.cas_dir
                } else {
                    base.infra.paths.cas_dir
                },
                socket_dir: if overlay.infra.paths.socket_dir != defaults.infra.paths.socket_dir {
                    overlay.infra.paths.socket_dir
                } else {
                    base.infra.paths.socket_dir
                },
            },
            bind: BindConfig {
                http_port: if overlay.infra.bind.http_port != defaults.infra.bind.http_port {
                    overlay.infra.bind.http_port
                } else {
                    base.infra.bind.http_port
                },
                zmq_router: if overlay.infra.bind.zmq_router != defaults.infra.bind.zmq_router {
                    overlay.infra.bind.zmq_router
                } else {
                    base.infra.bind.zmq_router
                },
                zmq_pub: if overlay.infra.bind.zmq_pub != defaults.infra.bind.zmq_pub {
                    overlay.infra.bind.zmq_pub
                } else {
                    base.infra.bind.zmq_pub
                },
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: if overlay.infra.telemetry.otlp_endpoint
                    != defaults.infra.telemetry.otlp_endpoint
                {
                    overlay.infra.telemetry.otlp_endpoint
                } else {
                    base.infra.telemetry.otlp_endpoint
                },
                log_level: if overlay.infra.telemetry.log_level != defaults.infra.telemetry.log_level
                {
                    overlay.infra.telemetry.log_level
                } else {
                    base.infra.telemetry.log_level
                },
            },
        },
        runtime: RuntimeConfig {
            heartbeat_interval_secs: if overlay.runtime.heartbeat_interval_secs
                != defaults.runtime.heartbeat_interval_secs
            {
                overlay.runtime.heartbeat_interval_secs
            } else {
                base.runtime.heartbeat_interval_secs
            },
            inactivity_timeout_secs: if overlay.runtime.inactivity_timeout_secs
                != defaults.runtime.inactivity_timeout_secs
            {
                overlay.runtime.inactivity_timeout_secs
            } else {
                base.runtime.inactivity_timeout_secs
            },
            connect_timeout_secs: if overlay.runtime.connect_timeout_secs
                != defaults.runtime.connect_timeout_secs
            {
                overlay.runtime.connect_timeout_secs
            } else {
                base.runtime.connect_timeout_secs
            },
            connection_refresh_timeout_secs: if overlay.runtime.connection_refresh_timeout_secs
                != defaults.runtime.connection_refresh_timeout_secs
            {
                overlay.runtime.connection_refresh_timeout_secs
            } else {
                base.runtime.connection_refresh_timeout_secs
            },
            pool_size: if overlay.runtime.pool_size != defaults.runtime.pool_size {
                overlay.runtime.pool_size
            } else {
                base.runtime.pool_size
            },
            max_try_count: if overlay.runtime.max_try_count != defaults.runtime.max_try_count {
                overlay.runtime.max_try_count
            } else {
                base.runtime.max_try_count
            },
            build_id: if overlay.runtime.build_id != defaults.runtime.build_id {
                overlay.runtime.build_id
            } else {
                base.runtime.build_id
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut DistConfig, sources: &mut ConfigSources) {
    // Infrastructure paths
    if let Ok(v) = env::var("DISTBUILD_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("DISTBUILD_STATE_DIR".to_string());
    }
    if let Ok(v) = env::var("DISTBUILD_CAS_DIR") {
        config.infra.paths.cas_dir = expand_path(&v);
        sources.env_overrides.push("DISTBUILD_CAS_DIR".to_string());
    }
    if let Ok(v) = env::var("DISTBUILD_SOCKET_DIR") {
        config.infra.paths.socket_dir = expand_path(&v);
        sources.env_overrides.push("DISTBUILD_SOCKET_DIR".to_string());
    }

    // Bind addresses
    if let Ok(v) = env::var("DISTBUILD_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("DISTBUILD_HTTP_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_ZMQ_ROUTER") {
        config.infra.bind.zmq_router = v;
        sources.env_overrides.push("DISTBUILD_ZMQ_ROUTER".to_string());
    }
    if let Ok(v) = env::var("DISTBUILD_ZMQ_PUB") {
        config.infra.bind.zmq_pub = v;
        sources.env_overrides.push("DISTBUILD_ZMQ_PUB".to_string());
    }

    // Telemetry
    if let Ok(v) = env::var("DISTBUILD_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("DISTBUILD_OTLP_ENDPOINT".to_string());
    }
    // Also support the standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("DISTBUILD_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("DISTBUILD_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    // Runtime tunables - named exactly as spec.md's §6 external interfaces.
    if let Ok(v) = env::var("DISTBUILD_INACTIVE_TIMEOUT") {
        if let Ok(secs) = v.parse() {
            config.runtime.inactivity_timeout_secs = secs;
            sources
                .env_overrides
                .push("DISTBUILD_INACTIVE_TIMEOUT".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_CONNECT_TIMEOUT") {
        if let Ok(secs) = v.parse() {
            config.runtime.connect_timeout_secs = secs;
            sources
                .env_overrides
                .push("DISTBUILD_CONNECT_TIMEOUT".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_HEARTBEAT_INTERVAL") {
        if let Ok(secs) = v.parse() {
            config.runtime.heartbeat_interval_secs = secs;
            sources
                .env_overrides
                .push("DISTBUILD_HEARTBEAT_INTERVAL".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_POOL_SIZE") {
        if let Ok(n) = v.parse() {
            config.runtime.pool_size = n;
            sources.env_overrides.push("DISTBUILD_POOL_SIZE".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_MAX_TRY_COUNT") {
        if let Ok(n) = v.parse() {
            config.runtime.max_try_count = n;
            sources
                .env_overrides
                .push("DISTBUILD_MAX_TRY_COUNT".to_string());
        }
    }
    if let Ok(v) = env::var("DISTBUILD_BUILD_ID") {
        config.runtime.build_id = v;
        sources.env_overrides.push("DISTBUILD_BUILD_ID".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            return if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            };
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[paths]
state_dir = "/custom/state"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/custom/state"));
        // Other values should be defaults
        assert_eq!(config.infra.bind.http_port, 8082);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
state_dir = "/data/distbuild"
cas_dir = "/data/cas"

[bind]
http_port = 9000
zmq_router = "tcp://0.0.0.0:6000"

[telemetry]
log_level = "debug"

[runtime]
heartbeat_interval_secs = 5
inactivity_timeout_secs = 20
pool_size = 4
max_try_count = 10
build_id = "release-2026.07"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/data/distbuild"));
        assert_eq!(config.infra.paths.cas_dir, PathBuf::from("/data/cas"));
        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.infra.bind.zmq_router, "tcp://0.0.0.0:6000");
        assert_eq!(config.infra.telemetry.log_level, "debug");

        assert_eq!(config.runtime.heartbeat_interval_secs, 5);
        assert_eq!(config.runtime.inactivity_timeout_secs, 20);
        assert_eq!(config.runtime.pool_size, 4);
        assert_eq!(config.runtime.max_try_count, 10);
        assert_eq!(config.runtime.build_id, "release-2026.07");
    }

    #[test]
    fn test_env_override_inactive_timeout() {
        let mut config = DistConfig::default();
        let mut sources = ConfigSources::default();
        std::env::set_var("DISTBUILD_INACTIVE_TIMEOUT", "42");
        apply_env_overrides(&mut config, &mut sources);
        std::env::remove_var("DISTBUILD_INACTIVE_TIMEOUT");
        assert_eq!(config.runtime.inactivity_timeout_secs, 42);
        assert!(sources
            .env_overrides
            .contains(&"DISTBUILD_INACTIVE_TIMEOUT".to_string()));
    }
}
