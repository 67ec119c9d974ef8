use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::apis::base::Connector;
use crate::common::error::{CredentialError, ProviderError, RecordError};
use crate::credentials::lease::CredentialLease;
use crate::domain::{CanonicalFinding, Severity, SourceType};
use crate::pipeline::ingestion::rate_limiter::RateLimiter;

// Credential-side ports

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssumeRoleRequest {
    pub customer_account_id: String,
    pub role_identifier: String,
    pub external_id: String,
    pub session_name: String,
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct IssuedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Exchanges a trust relationship for temporary credentials.
#[async_trait]
pub trait AssumeRolePort: Send + Sync {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<IssuedCredentials, CredentialError>;
}

// Source-side ports

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListFindingsRequest {
    pub source: SourceType,
    pub region: String,
    pub max_results: usize,
    pub severities: Vec<Severity>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingsPage {
    pub records: Vec<Value>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// The real provider APIs behind live connectors and capability probes.
#[async_trait]
pub trait ProviderApiPort: Send + Sync {
    async fn list_findings(
        &self,
        lease: &CredentialLease,
        request: &ListFindingsRequest,
    ) -> Result<FindingsPage, ProviderError>;

    /// Issue the smallest read-only call that exercises `action`.
    async fn probe(
        &self,
        lease: &CredentialLease,
        source: SourceType,
        region: &str,
        action: &str,
    ) -> Result<(), ProviderError>;
}

// Downstream port

/// Receives normalized findings. The investigation pipeline behind it is
/// outside this crate.
#[async_trait]
pub trait FindingProcessorPort: Send + Sync {
    async fn process(&self, finding: &CanonicalFinding) -> Result<(), RecordError>;
}

// Connector construction

/// Builds the connector for one run once its mode is decided.
pub trait ConnectorFactory: Send + Sync {
    /// The connector takes ownership of `lease`.
    fn live(&self, source: SourceType, lease: CredentialLease, limiter: Arc<RateLimiter>) -> Box<dyn Connector>;

    fn fixture(&self, source: SourceType, records: Arc<Vec<Value>>, limiter: Arc<RateLimiter>) -> Box<dyn Connector>;
}
