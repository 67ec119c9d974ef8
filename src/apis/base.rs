use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::{ListFindingsRequest, ProviderApiPort};
use crate::apis::scoring::SignalWeight;
use crate::common::error::{CredentialError, ProviderError, RecordError};
use crate::credentials::lease::CredentialLease;
use crate::domain::{CanonicalFinding, RawRecord, Severity, SourceType};
use crate::observability::metrics;
use crate::pipeline::ingestion::rate_limiter::RateLimiter;

/// Upper bound on provider pages per batch, in case a provider keeps
/// returning continuation tokens with empty pages.
const MAX_PAGES_PER_BATCH: usize = 50;

/// Where a connector gets its records from. Chosen once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorMode {
    Live,
    Fixture,
}

impl ConnectorMode {
    /// Live only with a lease that is still usable.
    pub fn select(lease: Option<&CredentialLease>) -> Self {
        match lease {
            Some(lease) if !lease.is_expired() => ConnectorMode::Live,
            _ => ConnectorMode::Fixture,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCriteria {
    pub region: String,
    pub batch_size: usize,
    /// Empty keeps every severity.
    pub severities: Vec<Severity>,
}

impl FetchCriteria {
    pub fn accepts(&self, severity: Severity) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }
}

/// Source-specific knowledge: record shape, fixture layout and scoring weights.
pub trait SourceProfile: Send + Sync {
    fn source(&self) -> SourceType;

    /// Key under which a fixture file may wrap its record list.
    fn fixture_key(&self) -> &'static str;

    fn weights(&self) -> &'static [SignalWeight];

    fn record_id(&self, payload: &Value) -> Option<String>;

    /// Deterministic: the same payload always yields the same finding.
    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalFinding, RecordError>;
}

/// A data source adapter driven by the orchestrator.
#[async_trait]
pub trait Connector: Send + Sync {
    fn source(&self) -> SourceType;

    fn mode(&self) -> ConnectorMode;

    /// Fetch one batch. Acquires one rate-limiter token per outbound call.
    async fn fetch_batch(&self, criteria: &FetchCriteria) -> Result<Vec<RawRecord>, ProviderError>;

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalFinding, RecordError>;

    /// Best-effort identifier for error context.
    fn record_id(&self, raw: &RawRecord) -> Option<String>;

    /// Errors when the connector's credentials must no longer be used.
    fn ensure_credentials(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}

/// Accept both fixture layouts: a bare list, or an object holding the list under `key`.
pub fn records_from_fixture(value: Value, key: &str) -> Result<Vec<Value>, RecordError> {
    match value {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(records)) => Ok(records),
            Some(_) => Err(RecordError::Validation(format!("fixture key '{}' is not a list", key))),
            None => Err(RecordError::Validation(format!("fixture has no '{}' list", key))),
        },
        _ => Err(RecordError::Validation("fixture is neither a list nor an object".into())),
    }
}

enum Backend {
    Live {
        api: Arc<dyn ProviderApiPort>,
        lease: CredentialLease,
    },
    Fixture {
        records: Arc<Vec<Value>>,
    },
}

/// The one `Connector` implementation; sources differ only in their profile.
pub struct SourceConnector {
    profile: Box<dyn SourceProfile>,
    backend: Backend,
    limiter: Arc<RateLimiter>,
}

impl SourceConnector {
    /// Connector that calls the provider with `lease`, which it now owns.
    pub fn live(
        profile: Box<dyn SourceProfile>,
        api: Arc<dyn ProviderApiPort>,
        lease: CredentialLease,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            profile,
            backend: Backend::Live { api, lease },
            limiter,
        }
    }

    /// Connector that serves a canned dataset.
    pub fn fixture(profile: Box<dyn SourceProfile>, records: Arc<Vec<Value>>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            profile,
            backend: Backend::Fixture { records },
            limiter,
        }
    }

    async fn fetch_live(
        &self,
        api: &Arc<dyn ProviderApiPort>,
        lease: &CredentialLease,
        criteria: &FetchCriteria,
    ) -> Result<Vec<RawRecord>, ProviderError> {
        let source = self.profile.source();
        let mut out = Vec::with_capacity(criteria.batch_size);
        let mut next_token = None;

        for page_no in 0..MAX_PAGES_PER_BATCH {
            self.limiter.acquire().await;
            let request = ListFindingsRequest {
                source,
                region: criteria.region.clone(),
                max_results: criteria.batch_size - out.len(),
                severities: criteria.severities.clone(),
                next_token: next_token.take(),
            };
            let page = api.list_findings(lease, &request).await?;
            debug!(page = page_no, records = page.records.len(), "fetched page");
            out.extend(page.records.into_iter().map(|p| RawRecord::new(source, p)));

            if out.len() >= criteria.batch_size {
                out.truncate(criteria.batch_size);
                break;
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    fn fetch_fixture(&self, records: &[Value], criteria: &FetchCriteria) -> Vec<RawRecord> {
        let source = self.profile.source();
        records
            .iter()
            .map(|payload| RawRecord::new(source, payload.clone()))
            .filter(|raw| match self.profile.normalize(raw) {
                Ok(finding) => criteria.accepts(finding.severity),
                // keep broken records so they surface as record failures
                Err(_) => true,
            })
            .take(criteria.batch_size)
            .collect()
    }
}

#[async_trait]
impl Connector for SourceConnector {
    fn source(&self) -> SourceType {
        self.profile.source()
    }

    fn mode(&self) -> ConnectorMode {
        match self.backend {
            Backend::Live { .. } => ConnectorMode::Live,
            Backend::Fixture { .. } => ConnectorMode::Fixture,
        }
    }

    #[instrument(skip(self, criteria), fields(source = %self.profile.source(), mode = ?self.mode()))]
    async fn fetch_batch(&self, criteria: &FetchCriteria) -> Result<Vec<RawRecord>, ProviderError> {
        let started = Instant::now();
        let source = self.profile.source();
        let result = match &self.backend {
            Backend::Live { api, lease } => self.fetch_live(api, lease, criteria).await,
            Backend::Fixture { records } => Ok(self.fetch_fixture(records, criteria)),
        };

        match &result {
            Ok(records) => {
                metrics::connectors::fetch_success(source, records.len(), started.elapsed().as_secs_f64());
                info!("Fetched {} records from {}", records.len(), source);
            }
            Err(e) => {
                metrics::connectors::fetch_error(source, provider_error_class(e));
                warn!("Fetch from {} failed: {}", source, e);
            }
        }
        result
    }

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalFinding, RecordError> {
        if raw.source != self.profile.source() {
            return Err(RecordError::Validation(format!(
                "record from {} handed to {} connector",
                raw.source,
                self.profile.source()
            )));
        }
        let result = self.profile.normalize(raw);
        if result.is_err() {
            metrics::connectors::normalize_error(raw.source);
        }
        result
    }

    fn record_id(&self, raw: &RawRecord) -> Option<String> {
        self.profile.record_id(&raw.payload)
    }

    fn ensure_credentials(&self) -> Result<(), CredentialError> {
        match &self.backend {
            Backend::Live { lease, .. } => lease.ensure_valid(),
            Backend::Fixture { .. } => Ok(()),
        }
    }
}

pub(crate) fn provider_error_class(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Throttled(_) => "throttled",
        ProviderError::Transient(_) => "transient",
        ProviderError::AccessDenied(_) => "access_denied",
        ProviderError::NotFound(_) => "not_found",
        ProviderError::Malformed(_) => "malformed",
        ProviderError::Unknown(_) => "unknown",
    }
}
