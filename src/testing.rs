// Shared fakes for unit tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::app::ports::{
    AssumeRolePort, AssumeRoleRequest, FindingProcessorPort, FindingsPage, IssuedCredentials, ListFindingsRequest,
    ProviderApiPort,
};
use crate::common::error::{CredentialError, ProviderError, RecordError};
use crate::credentials::lease::{CredentialLease, LeaseSecret};
use crate::domain::{CanonicalFinding, SourceType};

pub const ACCOUNT: &str = "123456789012";
pub const ROLE: &str = "arn:aws:iam::123456789012:role/FindingIngestReadOnly";
pub const EXTERNAL_ID: &str = "ext-0123456789abcdef";

pub fn lease_expiring_in(secs: i64) -> CredentialLease {
    CredentialLease::new(
        ACCOUNT,
        ROLE,
        "ASIATESTKEY",
        LeaseSecret::new("very-secret".to_string(), "session-token".to_string()),
        Utc::now() + Duration::seconds(secs),
    )
}

pub fn guardduty_finding(id: &str, severity: f64) -> Value {
    json!({
        "Id": id,
        "CreatedAt": "2024-05-01T12:00:00Z",
        "UpdatedAt": "2024-05-01T12:30:00Z",
        "Severity": severity,
        "Confidence": 5,
        "Service": {"Count": 3}
    })
}

/// Issues credentials only when the external id matches.
pub struct MockAssumeRole {
    expected_external_id: String,
    requests: Arc<Mutex<Vec<AssumeRoleRequest>>>,
}

impl MockAssumeRole {
    pub fn trusting(external_id: &str) -> Self {
        Self {
            expected_external_id: external_id.to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn requests(&self) -> Vec<AssumeRoleRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl AssumeRolePort for MockAssumeRole {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<IssuedCredentials, CredentialError> {
        self.requests.lock().await.push(request.clone());
        if request.external_id != self.expected_external_id {
            return Err(CredentialError::TrustRejected {
                role: request.role_identifier.clone(),
                message: "external id mismatch".to_string(),
            });
        }
        Ok(IssuedCredentials {
            access_key_id: "ASIAMOCK".to_string(),
            secret_access_key: "mock-secret".to_string(),
            session_token: "mock-token".to_string(),
            expires_at: Utc::now() + Duration::seconds(request.duration_secs as i64),
        })
    }
}

/// Provider API fake.
///
/// `list_findings` first drains the script, one entry per call, then serves
/// `pages` by continuation token. Probes pass unless overridden.
#[derive(Default)]
pub struct MockProviderApi {
    probes: HashMap<String, Result<(), ProviderError>>,
    pages: Vec<Vec<Value>>,
    script: Mutex<VecDeque<Result<Vec<Value>, ProviderError>>>,
    cancel_on_list: Option<CancellationToken>,
    list_calls: Mutex<usize>,
    probe_calls: Mutex<Vec<String>>,
}

impl MockProviderApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, action: &str, outcome: Result<(), ProviderError>) -> Self {
        self.probes.insert(action.to_string(), outcome);
        self
    }

    pub fn with_pages(mut self, pages: Vec<Vec<Value>>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_script(self, script: Vec<Result<Vec<Value>, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..self
        }
    }

    /// Cancel `token` from inside every list call.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_list = Some(token);
        self
    }

    pub async fn list_calls(&self) -> usize {
        *self.list_calls.lock().await
    }

    pub async fn probe_calls(&self) -> Vec<String> {
        self.probe_calls.lock().await.clone()
    }
}

#[async_trait]
impl ProviderApiPort for MockProviderApi {
    async fn list_findings(
        &self,
        _lease: &CredentialLease,
        request: &ListFindingsRequest,
    ) -> Result<FindingsPage, ProviderError> {
        *self.list_calls.lock().await += 1;
        if let Some(token) = &self.cancel_on_list {
            token.cancel();
        }
        if let Some(step) = self.script.lock().await.pop_front() {
            return step.map(|records| FindingsPage {
                records,
                next_token: None,
            });
        }

        let index: usize = request
            .next_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let records = self.pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(FindingsPage { records, next_token })
    }

    async fn probe(
        &self,
        _lease: &CredentialLease,
        _source: SourceType,
        _region: &str,
        action: &str,
    ) -> Result<(), ProviderError> {
        self.probe_calls.lock().await.push(action.to_string());
        self.probes.get(action).cloned().unwrap_or(Ok(()))
    }
}

/// Downstream sink that remembers what it saw and rejects chosen ids.
#[derive(Default)]
pub struct RecordingProcessor {
    reject: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl FindingProcessorPort for RecordingProcessor {
    async fn process(&self, finding: &CanonicalFinding) -> Result<(), RecordError> {
        self.seen.lock().await.push(finding.id.clone());
        if self.reject.contains(&finding.id) {
            return Err(RecordError::Processing(format!("rejected {}", finding.id)));
        }
        Ok(())
    }
}
