//! Per-command metrics parsed from one telemetry record

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Markers that every command-level record carries.
///
/// Streams interleave thread pool and meta events with command events,
/// so records without both markers are skipped before full parsing.
const COMMAND_MARKERS: [&str; 2] = ["HystrixCommand", "latencyExecute"];

/// Cheap textual pre-check run before a record is deserialized
#[must_use]
pub fn is_command_record(raw: &str) -> bool {
    COMMAND_MARKERS.iter().all(|marker| raw.contains(marker))
}

/// Wire shape of a command record. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub name: String,
    pub reporting_hosts: u32,
    pub rolling_count_timeout: u64,
    pub rolling_count_failure: u64,
    pub rolling_count_success: u64,
    pub rolling_count_short_circuited: u64,
    pub rolling_count_thread_pool_rejected: u64,
    pub rolling_count_semaphore_rejected: u64,
    #[serde(rename = "propertyValue_metricsRollingStatisticalWindowInMilliseconds")]
    pub rolling_window_ms: f64,
}

/// Metrics for a single command, with the derived rate and error
/// percentage computed once at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetrics {
    pub name: String,
    pub success: u64,
    pub rejected: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub short_circuited: u64,
    pub requests: u64,
    pub reporting_hosts: u32,
    pub request_rate: f64,
    pub error_percentage: f64,
}

impl CommandMetrics {
    /// Parse a raw JSON record
    pub fn parse(raw: &str) -> Result<Self> {
        let record: CommandRecord = serde_json::from_str(raw)?;
        Ok(Self::from(record))
    }
}

impl From<CommandRecord> for CommandMetrics {
    fn from(record: CommandRecord) -> Self {
        // Counters come from remote hosts, so sums saturate instead of wrapping
        let rejected = record
            .rolling_count_thread_pool_rejected
            .saturating_add(record.rolling_count_semaphore_rejected);
        let error_count = record
            .rolling_count_failure
            .saturating_add(record.rolling_count_timeout)
            .saturating_add(rejected)
            .saturating_add(record.rolling_count_short_circuited);
        let requests = error_count.saturating_add(record.rolling_count_success);

        let error_percentage = if requests > 0 {
            error_count as f64 / requests as f64 * 100.0
        } else {
            0.0
        };

        // Window per reporting host, in whole milliseconds, then seconds
        let window_secs =
            (record.rolling_window_ms / f64::from(record.reporting_hosts)).floor() / 1000.0;
        let request_rate = if window_secs > 0.0 {
            requests as f64 / window_secs
        } else {
            0.0
        };

        Self {
            name: record.name,
            success: record.rolling_count_success,
            rejected,
            failed: record.rolling_count_failure,
            timed_out: record.rolling_count_timeout,
            short_circuited: record.rolling_count_short_circuited,
            requests,
            reporting_hosts: record.reporting_hosts,
            request_rate: finite_or_zero(request_rate),
            error_percentage: finite_or_zero(error_percentage),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
