use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::apis::base::ConnectorMode;
use crate::common::error::{ProviderError, RecordError};
use crate::domain::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Cancelled,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Running => "running",
            IngestionStatus::Retrying => "retrying",
            IngestionStatus::Success => "success",
            IngestionStatus::Failed => "failed",
            IngestionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestionStatus::Success | IngestionStatus::Failed | IngestionStatus::Cancelled
        )
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag on every error or warning a run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Credential,
    Throttling,
    TransientProvider,
    Provider,
    Validation,
    Record,
    CircuitBreakerTripped,
    RetriesExhausted,
    Cancelled,
    /// Warning only: the run was served from a fixture dataset.
    FixtureMode,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Credential => "credential",
            ErrorKind::Throttling => "throttling",
            ErrorKind::TransientProvider => "transient_provider",
            ErrorKind::Provider => "provider",
            ErrorKind::Validation => "validation",
            ErrorKind::Record => "record",
            ErrorKind::CircuitBreakerTripped => "circuit_breaker_tripped",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::FixtureMode => "fixture_mode",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl From<&ProviderError> for ErrorKind {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::Throttled(_) => ErrorKind::Throttling,
            ProviderError::Transient(_) => ErrorKind::TransientProvider,
            ProviderError::AccessDenied(_) | ProviderError::NotFound(_) | ProviderError::Malformed(_) => {
                ErrorKind::Provider
            }
            ProviderError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<&RecordError> for ErrorKind {
    fn from(error: &RecordError) -> Self {
        match error {
            RecordError::Validation(_) => ErrorKind::Validation,
            RecordError::Processing(_) => ErrorKind::Record,
            RecordError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorEntry {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outcome of one ingestion run.
///
/// Only the orchestrator that owns the run mutates it; everyone else sees
/// clones (registry snapshots) or the finalized value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub run_id: String,
    pub tenant_id: String,
    pub source_type: SourceType,
    pub mode: Option<ConnectorMode>,
    pub status: IngestionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub records_successful: u64,
    pub records_failed: u64,
    pub retry_attempts: u32,
    pub errors: Vec<ErrorEntry>,
    pub warnings: Vec<ErrorEntry>,
    pub duration_ms: u64,
}

impl IngestionResult {
    pub fn new(run_id: impl Into<String>, tenant_id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            source_type,
            mode: None,
            status: IngestionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            records_processed: 0,
            records_successful: 0,
            records_failed: 0,
            retry_attempts: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &ErrorEntry> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    pub(crate) fn set_status(&mut self, status: IngestionStatus) {
        self.status = status;
    }

    pub(crate) fn set_mode(&mut self, mode: ConnectorMode) {
        self.mode = Some(mode);
    }

    pub(crate) fn record_success(&mut self) {
        self.records_processed += 1;
        self.records_successful += 1;
    }

    pub(crate) fn record_failure(&mut self, entry: ErrorEntry) {
        self.records_processed += 1;
        self.records_failed += 1;
        self.errors.push(entry);
    }

    pub(crate) fn record_retry(&mut self, entry: ErrorEntry) {
        self.retry_attempts += 1;
        self.errors.push(entry);
    }

    pub(crate) fn push_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
    }

    pub(crate) fn push_warning(&mut self, entry: ErrorEntry) {
        self.warnings.push(entry);
    }

    /// Stamp the end time and freeze the run in `status`.
    pub(crate) fn finalize(mut self, status: IngestionStatus) -> Self {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self
    }
}
