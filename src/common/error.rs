use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures obtaining or using a cross-account credential lease.
///
/// Every variant is fatal for a run: the orchestrator never retries them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("trust relationship refused for role {role}: {message}")]
    TrustRejected { role: String, message: String },

    #[error("invalid assume-role request: {0}")]
    InvalidRequest(String),

    #[error("credential lease {lease_id} expired at {expired_at}")]
    LeaseExpired {
        lease_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("credential provider error: {0}")]
    Provider(String),
}

/// Failures returned by a data source while fetching or probing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("throttled by provider: {0}")]
    Throttled(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Throttling and transient network failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Throttled(_) | ProviderError::Transient(_))
    }
}

/// Failures scoped to a single record. These never unwind past the record boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record failed validation: {0}")]
    Validation(String),

    #[error("downstream processing failed: {0}")]
    Processing(String),

    #[error("unexpected record failure: {0}")]
    Unknown(String),
}

/// Errors from the ambient parts of the crate: configuration, files, HTTP plumbing.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Fixture error: {0}")]
    Fixture(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttling_and_transient_are_retryable() {
        assert!(ProviderError::Throttled("rate".into()).is_retryable());
        assert!(ProviderError::Transient("reset".into()).is_retryable());
        assert!(!ProviderError::AccessDenied("no".into()).is_retryable());
        assert!(!ProviderError::NotFound("none".into()).is_retryable());
        assert!(!ProviderError::Malformed("bad".into()).is_retryable());
        assert!(!ProviderError::Unknown("?".into()).is_retryable());
    }
}
