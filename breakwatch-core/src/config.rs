use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub discovery: DiscoveryConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
    /// Level for the per-cluster monitor and discovery targets, if it
    /// should differ from `level`
    pub ingest_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
            ingest_level: None,
        }
    }
}

/// Where cluster membership comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// `servers` entries of the form `name|url`
    Static,
    /// Remote catalogs listed in `cluster_list_urls`
    ClusterList,
    /// Both of the above, unioned
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    /// Static clusters as `name|url`
    pub servers: Vec<String>,
    /// Catalog endpoints returning `[{name, turbineStream, dashboardUrl}]`
    pub cluster_list_urls: Vec<String>,
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Static,
            servers: Vec::new(),
            cluster_list_urls: Vec::new(),
            poll_interval_secs: 10,
            fetch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// A connection with no data for this long is considered dead
    pub stall_timeout_secs: u64,
    /// Reconnect delay grows by this much per failed attempt
    pub backoff_step_secs: u64,
    /// Attempts beyond this count stop growing the delay
    pub max_backoff_steps: u32,
    /// Commands not updated for this long drop out of the rollup
    pub cache_ttl_secs: u64,
    pub sample_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: 120,
            backoff_step_secs: 10,
            max_backoff_steps: 6,
            cache_ttl_secs: 10,
            sample_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // BREAKWATCH_SERVER__HTTP_PORT etc. Lists are comma separated.
        builder = builder.add_source(
            Environment::with_prefix("BREAKWATCH")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("discovery.servers")
                .with_list_parse_key("discovery.cluster_list_urls")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration for values the services cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if let Some(ingest) = &self.logging.ingest_level {
            if !matches!(
                ingest.to_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "warning" | "error"
            ) {
                errors.push(format!("logging.ingest_level '{ingest}' is not a valid level"));
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format '{}' must be 'json' or 'pretty'",
                self.logging.format
            ));
        }
        if self.discovery.poll_interval_secs == 0 {
            errors.push("discovery.poll_interval_secs must be non-zero".to_string());
        }
        if self.discovery.fetch_timeout_secs == 0 {
            errors.push("discovery.fetch_timeout_secs must be non-zero".to_string());
        }
        if self.monitor.stall_timeout_secs == 0 {
            errors.push("monitor.stall_timeout_secs must be non-zero".to_string());
        }
        if self.monitor.backoff_step_secs == 0 {
            errors.push("monitor.backoff_step_secs must be non-zero".to_string());
        }
        if self.monitor.max_backoff_steps == 0 {
            errors.push("monitor.max_backoff_steps must be non-zero".to_string());
        }
        if self.monitor.cache_ttl_secs == 0 {
            errors.push("monitor.cache_ttl_secs must be non-zero".to_string());
        }
        if self.monitor.sample_interval_ms == 0 {
            errors.push("monitor.sample_interval_ms must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
