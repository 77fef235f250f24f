//! Configuration Module
//!
//! Provides TOML-based configuration for vibemesh with support for:
//! - Router endpoint and hash ring settings
//! - Static or gossip cluster membership
//! - Environment variable overrides (VIBEMESH__* prefix)

use std::path::Path;

use ahash::AHashSet;
use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use cluster::{ClusterConfig, MembershipMode, StaticMember};
pub use router::RouterConfig;

mod cluster;
mod router;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Router endpoint configuration
    pub router: RouterConfig,
    /// Cluster membership configuration
    pub cluster: ClusterConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMESH__` prefix with double underscores for nesting:
    ///    - `VIBEMESH__ROUTER__BIND=0.0.0.0:9000` overrides `router.bind`
    ///    - `VIBEMESH__CLUSTER__NODE_ID=node-1` overrides `cluster.node_id`
    ///    - `VIBEMESH__CLUSTER__MODE=gossip` overrides `cluster.mode`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), without validating.
    ///
    /// For callers that apply further overrides before calling
    /// [`validate`](Self::validate).
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("router.bind", "0.0.0.0:7947")?
            .set_default("router.path", "/eventrouter")?
            .set_default("router.virtual_points", 16)?
            .set_default("router.ring_size", 65536)?
            .set_default("router.connect_timeout", "10s")?
            .set_default("cluster.mode", "static")?
            .set_default("cluster.cluster_id", "vibemesh")?
            .set_default("cluster.gossip_addr", "0.0.0.0:7946")?
            .set_default("cluster.gossip_interval", 1)?
            .set_default("cluster.dead_node_grace_period", 30)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMESH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Load configuration with environment variable overrides only (no file).
    ///
    /// Useful for containerized deployments where all config comes from env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.virtual_points == 0 {
            return Err(ConfigError::Validation(
                "router.virtual_points must be greater than 0".to_string(),
            ));
        }

        if self.router.ring_size == 0 {
            return Err(ConfigError::Validation(
                "router.ring_size must be greater than 0".to_string(),
            ));
        }

        if !self.router.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "router.path '{}' must start with '/'",
                self.router.path
            )));
        }

        if self.cluster.mode == MembershipMode::Static && !self.cluster.members.is_empty() {
            let mut ids = AHashSet::new();
            for member in &self.cluster.members {
                if !ids.insert(member.id.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "Duplicate cluster member '{}'",
                        member.id
                    )));
                }
            }

            let node_id = self.cluster.get_node_id();
            if !ids.contains(node_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Node '{}' is not listed in cluster.members",
                    node_id
                )));
            }
        }

        Ok(())
    }
}
