use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::ports::ProviderApiPort;
use crate::common::error::ProviderError;
use crate::credentials::lease::CredentialLease;
use crate::credentials::permissions::probed_permissions;
use crate::domain::SourceType;
use crate::observability::metrics;

/// How a single capability probe turned out.
///
/// `EmptyButReachable` and `AccessDenied` must stay distinct: an account
/// with no findings yet is healthy, one that refuses the call is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Passed,
    AccessDenied,
    EmptyButReachable,
    Unknown,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Passed => "passed",
            ProbeStatus::AccessDenied => "access_denied",
            ProbeStatus::EmptyButReachable => "empty_but_reachable",
            ProbeStatus::Unknown => "unknown",
        }
    }
}

pub fn classify(outcome: &Result<(), ProviderError>) -> ProbeStatus {
    match outcome {
        Ok(()) => ProbeStatus::Passed,
        Err(ProviderError::AccessDenied(_)) => ProbeStatus::AccessDenied,
        Err(ProviderError::NotFound(_)) => ProbeStatus::EmptyButReachable,
        Err(_) => ProbeStatus::Unknown,
    }
}

/// A minimal read-only call proving one permission works.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, lease: &CredentialLease) -> Result<(), ProviderError>;
}

/// Probe backed by the provider API, one per probed catalog permission.
pub struct ApiProbe {
    api: Arc<dyn ProviderApiPort>,
    source: SourceType,
    region: String,
    action: &'static str,
}

impl ApiProbe {
    pub fn new(api: Arc<dyn ProviderApiPort>, source: SourceType, region: &str, action: &'static str) -> Self {
        Self {
            api,
            source,
            region: region.to_string(),
            action,
        }
    }
}

#[async_trait]
impl CapabilityProbe for ApiProbe {
    fn name(&self) -> &str {
        self.action
    }

    async fn run(&self, lease: &CredentialLease) -> Result<(), ProviderError> {
        self.api.probe(lease, self.source, &self.region, self.action).await
    }
}

/// Probes for every permission the catalog flags as probed for `source`.
pub fn probes_for(source: SourceType, region: &str, api: Arc<dyn ProviderApiPort>) -> Vec<Box<dyn CapabilityProbe>> {
    probed_permissions(source)
        .map(|p| Box::new(ApiProbe::new(api.clone(), source, region, p.action)) as Box<dyn CapabilityProbe>)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub results: Vec<ProbeResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn status_of(&self, name: &str) -> Option<ProbeStatus> {
        self.results.iter().find(|r| r.name == name).map(|r| r.status)
    }

    pub(crate) fn with_error(message: String) -> Self {
        Self {
            errors: vec![message],
            ..Self::default()
        }
    }
}

/// Run each probe once, sequentially, and classify the outcomes.
pub async fn run_probes(lease: &CredentialLease, probes: &[Box<dyn CapabilityProbe>]) -> ValidationReport {
    if let Err(e) = lease.ensure_valid() {
        return ValidationReport::with_error(e.to_string());
    }

    let mut report = ValidationReport::default();
    for probe in probes {
        let outcome = probe.run(lease).await;
        let status = classify(&outcome);
        let detail = outcome.err().map(|e| e.to_string());
        metrics::credentials::probe(status.as_str());

        match status {
            ProbeStatus::Passed => debug!(probe = probe.name(), "capability probe passed"),
            ProbeStatus::AccessDenied => {
                warn!(probe = probe.name(), "capability probe denied");
                report.errors.push(format!(
                    "{}: access denied ({})",
                    probe.name(),
                    detail.as_deref().unwrap_or_default()
                ));
            }
            ProbeStatus::EmptyButReachable => report.warnings.push(format!(
                "{}: reachable but returned no resources",
                probe.name()
            )),
            ProbeStatus::Unknown => report.warnings.push(format!(
                "{}: could not be confirmed ({})",
                probe.name(),
                detail.as_deref().unwrap_or_default()
            )),
        }

        report.results.push(ProbeResult {
            name: probe.name().to_string(),
            status,
            detail,
        });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lease_expiring_in, MockProviderApi};

    #[test]
    fn classification_separates_denied_from_empty() {
        assert_eq!(classify(&Ok(())), ProbeStatus::Passed);
        assert_eq!(
            classify(&Err(ProviderError::AccessDenied("no".into()))),
            ProbeStatus::AccessDenied
        );
        assert_eq!(
            classify(&Err(ProviderError::NotFound("no detector".into()))),
            ProbeStatus::EmptyButReachable
        );
        assert_eq!(
            classify(&Err(ProviderError::Throttled("slow".into()))),
            ProbeStatus::Unknown
        );
    }

    #[tokio::test]
    async fn denied_probe_is_an_error_and_empty_probe_a_warning() {
        let api = Arc::new(
            MockProviderApi::new()
                .with_probe("guardduty:ListDetectors", Err(ProviderError::NotFound("no detectors".into())))
                .with_probe("guardduty:ListFindings", Err(ProviderError::AccessDenied("denied".into()))),
        );
        let lease = lease_expiring_in(900);
        let probes = probes_for(SourceType::GuardDuty, "us-east-1", api.clone());
        let report = run_probes(&lease, &probes).await;

        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.status_of("guardduty:ListDetectors"),
            Some(ProbeStatus::EmptyButReachable)
        );
        assert_eq!(
            report.status_of("guardduty:ListFindings"),
            Some(ProbeStatus::AccessDenied)
        );
        assert_eq!(api.probe_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn all_passing_probes_validate() {
        let api = Arc::new(MockProviderApi::new());
        let lease = lease_expiring_in(900);
        let report = run_probes(&lease, &probes_for(SourceType::CloudTrail, "eu-west-1", api)).await;
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
        assert!(report.results.iter().all(|r| r.status == ProbeStatus::Passed));
    }

    #[tokio::test]
    async fn expired_lease_runs_no_probes() {
        let api = Arc::new(MockProviderApi::new());
        let lease = lease_expiring_in(-5);
        let report = run_probes(&lease, &probes_for(SourceType::SecurityHub, "us-east-1", api.clone())).await;
        assert!(!report.is_valid());
        assert!(report.results.is_empty());
        assert!(api.probe_calls().await.is_empty());
    }
}
