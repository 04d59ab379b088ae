//! Process-wide tracing setup
//!
//! Per-cluster ingestion logs live under the `breakwatch_cluster::monitor`
//! and `breakwatch_cluster::discovery` targets and can be tuned apart from
//! the rest of the service. HTTP client internals are kept at `warn`, since
//! every monitor holds a long-lived upstream connection.

use std::fs::{File, OpenOptions};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Targets that log once per cluster connection, record or poll
const INGEST_TARGETS: [&str; 2] = ["breakwatch_cluster::monitor", "breakwatch_cluster::discovery"];

/// Client-side crates that get chatty under many concurrent streams
const QUIET_TARGETS: [&str; 3] = ["hyper_util", "reqwest", "h2"];

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the configured filter entirely when set. Output is
/// JSON or pretty, to stdout or appended to `file_path`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config)?)?,
    };
    let registry = tracing_subscriber::registry().with(env_filter);
    let file = config.file_path.as_deref().map(open_log_file).transpose()?;

    if config.format == "json" {
        let layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true);
        match file {
            Some(file) => registry.with(layer.with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    } else {
        let layer = fmt::layer().pretty().with_target(true).with_file(false);
        match file {
            Some(file) => registry.with(layer.with_ansi(false).with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    }

    Ok(())
}

/// Filter string built from the configured levels
pub fn filter_directives(config: &LoggingConfig) -> anyhow::Result<String> {
    let level = parse_log_level(&config.level)?;
    let mut directives = vec![level_name(level).to_string()];

    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));

    if let Some(ingest) = &config.ingest_level {
        let ingest = level_name(parse_log_level(ingest)?);
        directives.extend(INGEST_TARGETS.iter().map(|target| format!("{target}={ingest}")));
    }

    Ok(directives.join(","))
}

fn open_log_file(path: &str) -> anyhow::Result<Arc<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("INFO").is_ok());
        assert!(parse_log_level("warning").is_ok());
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_default_directives_quiet_http_clients() {
        let directives = filter_directives(&LoggingConfig::default()).unwrap();
        assert_eq!(directives, "info,hyper_util=warn,reqwest=warn,h2=warn");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_ingest_level_targets_cluster_modules() {
        let config = LoggingConfig {
            level: "WARNING".to_string(),
            ingest_level: Some("debug".to_string()),
            ..LoggingConfig::default()
        };

        let directives = filter_directives(&config).unwrap();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("breakwatch_cluster::monitor=debug"));
        assert!(directives.contains("breakwatch_cluster::discovery=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_init_rejects_bad_level() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(filter_directives(&config).is_err());

        let config = LoggingConfig {
            ingest_level: Some("loud".to_string()),
            ..LoggingConfig::default()
        };
        assert!(filter_directives(&config).is_err());
    }
}
