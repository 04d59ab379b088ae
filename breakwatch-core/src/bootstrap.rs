//! Configuration loading

use anyhow::{Context, Result};
use std::path::Path;

use crate::Config;

/// Kubernetes config mount
const MOUNTED_CONFIG_PATH: &str = "/config/config.yaml";
const LOCAL_CONFIG_PATH: &str = "config.yaml";

/// Pick the config file to load.
///
/// Search order:
/// 1. `explicit` (`--config` or `BREAKWATCH_CONFIG_PATH`), if it exists
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (Kubernetes mount path)
#[must_use]
pub fn resolve_config_path(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        if Path::new(path).exists() {
            return Some(path.to_string());
        }
        eprintln!("Config file {path} does not exist, searching default locations");
    }

    [LOCAL_CONFIG_PATH, MOUNTED_CONFIG_PATH]
        .into_iter()
        .find(|path| Path::new(path).exists())
        .map(str::to_string)
}

/// Load and validate configuration.
///
/// Falls back to environment variables only when no config file is found.
/// Runs before logging is initialised, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = match resolve_config_path(explicit) {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path).with_context(|| format!("Failed to load config from {path}"))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().context("Failed to load config from environment")?
        }
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins_when_present() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  http_port: 9100").unwrap();
        let path = file.path().to_str().unwrap();

        assert_eq!(resolve_config_path(Some(path)), Some(path.to_string()));
    }

    #[test]
    fn test_load_config_reads_and_validates_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "discovery:\n  mode: cluster_list\n  cluster_list_urls:\n    - http://catalog/clusters\nmonitor:\n  sample_interval_ms: 500"
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.discovery.cluster_list_urls, vec!["http://catalog/clusters".to_string()]);
        assert_eq!(config.monitor.sample_interval_ms, 500);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "discovery:\n  poll_interval_secs: 0").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }
}
