//! Metrics for the ingestion pipeline
//!
//! Every metric name lives in [`MetricName`] so call sites never spell raw
//! strings. Recording functions are grouped per phase and are no-ops until
//! [`init`] installs a recorder.

use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::domain::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Runs
    RunsStarted,
    RunsCompleted,
    RunDuration,
    RunRetries,
    RunRecordsProcessed,
    RunRecordsFailed,
    CircuitBreakerTrips,
    RunsActive,

    // Credentials
    LeasesIssued,
    LeasesRefused,
    ProbesExecuted,

    // Connectors
    FetchSuccess,
    FetchError,
    FetchDuration,
    RecordsFetched,
    NormalizeErrors,

    // Rate limiter
    RateLimiterAcquired,
    RateLimiterThrottled,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "fi_runs_started_total",
            MetricName::RunsCompleted => "fi_runs_completed_total",
            MetricName::RunDuration => "fi_run_duration_seconds",
            MetricName::RunRetries => "fi_run_retries_total",
            MetricName::RunRecordsProcessed => "fi_run_records_processed_total",
            MetricName::RunRecordsFailed => "fi_run_records_failed_total",
            MetricName::CircuitBreakerTrips => "fi_circuit_breaker_trips_total",
            MetricName::RunsActive => "fi_runs_active",

            MetricName::LeasesIssued => "fi_credential_leases_issued_total",
            MetricName::LeasesRefused => "fi_credential_leases_refused_total",
            MetricName::ProbesExecuted => "fi_credential_probes_total",

            MetricName::FetchSuccess => "fi_connector_fetch_success_total",
            MetricName::FetchError => "fi_connector_fetch_error_total",
            MetricName::FetchDuration => "fi_connector_fetch_duration_seconds",
            MetricName::RecordsFetched => "fi_connector_records_fetched_total",
            MetricName::NormalizeErrors => "fi_connector_normalize_errors_total",

            MetricName::RateLimiterAcquired => "fi_rate_limiter_acquired_total",
            MetricName::RateLimiterThrottled => "fi_rate_limiter_throttled_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsStarted,
            RunsCompleted,
            RunDuration,
            RunRetries,
            RunRecordsProcessed,
            RunRecordsFailed,
            CircuitBreakerTrips,
            RunsActive,
            LeasesIssued,
            LeasesRefused,
            ProbesExecuted,
            FetchSuccess,
            FetchError,
            FetchDuration,
            RecordsFetched,
            NormalizeErrors,
            RateLimiterAcquired,
            RateLimiterThrottled,
        ]
        .into_iter()
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::RunsActive => MetricKind::Gauge,
            MetricName::RunDuration | MetricName::FetchDuration => MetricKind::Histogram,
            _ => MetricKind::Counter,
        }
    }

    /// Returns (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::RunsStarted => ("runs", "Ingestion runs started"),
            MetricName::RunsCompleted => ("runs", "Ingestion runs finished, by terminal status"),
            MetricName::RunDuration => ("runs", "Wall-clock duration of a run"),
            MetricName::RunRetries => ("runs", "Fetch retries after transient provider errors"),
            MetricName::RunRecordsProcessed => ("runs", "Records handed to the downstream processor"),
            MetricName::RunRecordsFailed => ("runs", "Records that failed normalization or processing"),
            MetricName::CircuitBreakerTrips => ("runs", "Runs aborted by consecutive record failures"),
            MetricName::RunsActive => ("runs", "Runs currently in flight"),
            MetricName::LeasesIssued => ("credentials", "Credential leases issued"),
            MetricName::LeasesRefused => ("credentials", "Role assumptions refused"),
            MetricName::ProbesExecuted => ("credentials", "Capability probes, by outcome"),
            MetricName::FetchSuccess => ("connectors", "Successful batch fetches"),
            MetricName::FetchError => ("connectors", "Failed batch fetches, by error class"),
            MetricName::FetchDuration => ("connectors", "Batch fetch duration"),
            MetricName::RecordsFetched => ("connectors", "Raw records fetched"),
            MetricName::NormalizeErrors => ("connectors", "Raw records that failed normalization"),
            MetricName::RateLimiterAcquired => ("rate_limiter", "Tokens handed out"),
            MetricName::RateLimiterThrottled => ("rate_limiter", "Acquires that had to wait"),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent.
///
/// When `FI_METRICS_ADDR` holds a socket address an HTTP scrape endpoint is
/// spawned there as well, which needs a running tokio runtime.
pub fn init() {
    if HANDLE.get().is_some() {
        return;
    }
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let listen = std::env::var("FI_METRICS_ADDR").ok().and_then(|raw| match raw.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("Ignoring invalid FI_METRICS_ADDR '{}': {}", raw, e);
            None
        }
    });

    let handle = match listen {
        Some(addr) => match builder.with_http_listener(addr).build() {
            Ok((recorder, exporter)) => {
                let handle = recorder.handle();
                if ::metrics::set_global_recorder(recorder).is_err() {
                    warn!("A global metrics recorder is already installed");
                    return;
                }
                tokio::spawn(exporter);
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                handle
            }
            Err(e) => {
                warn!("Failed to build Prometheus exporter: {}", e);
                return;
            }
        },
        None => match builder.install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                return;
            }
        },
    };

    let _ = HANDLE.set(handle);
    for name in MetricName::all_metrics() {
        let (phase, help) = name.metadata();
        let help = format!("[{}] {}", phase, help);
        match name.kind() {
            MetricKind::Counter => ::metrics::describe_counter!(name.as_str(), help),
            MetricKind::Gauge => ::metrics::describe_gauge!(name.as_str(), help),
            MetricKind::Histogram => ::metrics::describe_histogram!(name.as_str(), help),
        }
    }
    info!("Metrics recorder installed");
}

/// Render the current metrics in Prometheus text format, if a recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Runs
// ============================================================================

pub mod runs {
    use super::{MetricName, SourceType};

    pub fn started(source: SourceType) {
        ::metrics::counter!(MetricName::RunsStarted.as_str(), "source" => source.as_str()).increment(1);
        ::metrics::gauge!(MetricName::RunsActive.as_str()).increment(1.0);
    }

    pub fn completed(source: SourceType, status: &'static str, duration_secs: f64) {
        ::metrics::counter!(
            MetricName::RunsCompleted.as_str(),
            "source" => source.as_str(),
            "status" => status
        )
        .increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str(), "source" => source.as_str())
            .record(duration_secs);
        ::metrics::gauge!(MetricName::RunsActive.as_str()).decrement(1.0);
    }

    pub fn retry(source: SourceType) {
        ::metrics::counter!(MetricName::RunRetries.as_str(), "source" => source.as_str()).increment(1);
    }

    pub fn records(source: SourceType, processed: u64, failed: u64) {
        ::metrics::counter!(MetricName::RunRecordsProcessed.as_str(), "source" => source.as_str())
            .increment(processed);
        ::metrics::counter!(MetricName::RunRecordsFailed.as_str(), "source" => source.as_str())
            .increment(failed);
    }

    pub fn circuit_breaker_tripped(source: SourceType) {
        ::metrics::counter!(MetricName::CircuitBreakerTrips.as_str(), "source" => source.as_str())
            .increment(1);
    }
}

// ============================================================================
// Credentials
// ============================================================================

pub mod credentials {
    use super::MetricName;

    pub fn lease_issued() {
        ::metrics::counter!(MetricName::LeasesIssued.as_str()).increment(1);
    }

    pub fn lease_refused(reason: &'static str) {
        ::metrics::counter!(MetricName::LeasesRefused.as_str(), "reason" => reason).increment(1);
    }

    pub fn probe(outcome: &'static str) {
        ::metrics::counter!(MetricName::ProbesExecuted.as_str(), "outcome" => outcome).increment(1);
    }
}

// ============================================================================
// Connectors
// ============================================================================

pub mod connectors {
    use super::{MetricName, SourceType};

    pub fn fetch_success(source: SourceType, records: usize, duration_secs: f64) {
        ::metrics::counter!(MetricName::FetchSuccess.as_str(), "source" => source.as_str()).increment(1);
        ::metrics::counter!(MetricName::RecordsFetched.as_str(), "source" => source.as_str())
            .increment(records as u64);
        ::metrics::histogram!(MetricName::FetchDuration.as_str(), "source" => source.as_str())
            .record(duration_secs);
    }

    pub fn fetch_error(source: SourceType, error_class: &'static str) {
        ::metrics::counter!(
            MetricName::FetchError.as_str(),
            "source" => source.as_str(),
            "class" => error_class
        )
        .increment(1);
    }

    pub fn normalize_error(source: SourceType) {
        ::metrics::counter!(MetricName::NormalizeErrors.as_str(), "source" => source.as_str())
            .increment(1);
    }
}

// ============================================================================
// Rate limiter
// ============================================================================

pub mod rate_limiter {
    use super::{MetricName, SourceType};

    pub fn acquired(source: SourceType) {
        ::metrics::counter!(MetricName::RateLimiterAcquired.as_str(), "source" => source.as_str())
            .increment(1);
    }

    pub fn throttled(source: SourceType) {
        ::metrics::counter!(MetricName::RateLimiterThrottled.as_str(), "source" => source.as_str())
            .increment(1);
    }
}
