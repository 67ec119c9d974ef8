use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::app::ports::{AssumeRolePort, AssumeRoleRequest, ProviderApiPort};
use crate::common::constants::{MAX_LEASE_SECS, MIN_LEASE_SECS, SESSION_NAME_PREFIX};
use crate::common::error::CredentialError;
use crate::config::BrokerConfig;
use crate::credentials::lease::{CredentialLease, LeaseSecret};
use crate::credentials::validator::{probes_for, run_probes, CapabilityProbe, ValidationReport};
use crate::domain::SourceType;
use crate::observability::metrics;

/// Issues short-lived scoped leases for customer accounts and checks that
/// they carry the permissions a source needs.
pub struct CredentialBroker {
    sts: Arc<dyn AssumeRolePort>,
    config: BrokerConfig,
}

impl CredentialBroker {
    pub fn new(sts: Arc<dyn AssumeRolePort>, config: BrokerConfig) -> Self {
        Self { sts, config }
    }

    pub fn validation_lease_duration(&self) -> Duration {
        Duration::from_secs(self.config.validation_lease_secs)
    }

    pub fn ingestion_lease_duration(&self) -> Duration {
        Duration::from_secs(self.config.ingestion_lease_secs)
    }

    /// Exchange the trust relationship for a lease.
    ///
    /// No retries: a refused trust relationship will be refused again.
    #[instrument(skip(self, external_id), fields(duration_secs = duration.as_secs()))]
    pub async fn assume_role(
        &self,
        customer_account_id: &str,
        role_identifier: &str,
        external_id: &str,
        duration: Duration,
    ) -> Result<CredentialLease, CredentialError> {
        let request = match build_request(customer_account_id, role_identifier, external_id, duration) {
            Ok(request) => request,
            Err(e) => {
                metrics::credentials::lease_refused("invalid_request");
                return Err(e);
            }
        };

        let issued = match self.sts.assume_role(&request).await {
            Ok(issued) => issued,
            Err(e) => {
                warn!("role assumption refused: {}", e);
                metrics::credentials::lease_refused(match e {
                    CredentialError::TrustRejected { .. } => "trust_rejected",
                    _ => "provider",
                });
                return Err(e);
            }
        };

        if issued.expires_at <= Utc::now() {
            metrics::credentials::lease_refused("already_expired");
            return Err(CredentialError::Provider(format!(
                "credentials issued for {} were already expired at {}",
                role_identifier, issued.expires_at
            )));
        }

        let lease = CredentialLease::new(
            customer_account_id,
            role_identifier,
            issued.access_key_id.clone(),
            LeaseSecret::new(issued.secret_access_key.clone(), issued.session_token.clone()),
            issued.expires_at,
        );
        metrics::credentials::lease_issued();
        info!(
            lease_id = lease.lease_id(),
            expires_at = %lease.expires_at(),
            "issued credential lease"
        );
        Ok(lease)
    }

    /// Run the given probes against an existing lease.
    pub async fn validate_capability(
        &self,
        lease: &CredentialLease,
        probes: &[Box<dyn CapabilityProbe>],
    ) -> ValidationReport {
        run_probes(lease, probes).await
    }

    /// Assume a short validation lease and probe every catalog permission
    /// flagged for `source`. The lease is dropped before returning.
    pub async fn validate_source(
        &self,
        api: Arc<dyn ProviderApiPort>,
        source: SourceType,
        region: &str,
        customer_account_id: &str,
        role_identifier: &str,
        external_id: &str,
    ) -> ValidationReport {
        let lease = match self
            .assume_role(
                customer_account_id,
                role_identifier,
                external_id,
                self.validation_lease_duration(),
            )
            .await
        {
            Ok(lease) => lease,
            Err(e) => return ValidationReport::with_error(e.to_string()),
        };
        let probes = probes_for(source, region, api);
        self.validate_capability(&lease, &probes).await
    }
}

fn build_request(
    customer_account_id: &str,
    role_identifier: &str,
    external_id: &str,
    duration: Duration,
) -> Result<AssumeRoleRequest, CredentialError> {
    if customer_account_id.len() != 12 || !customer_account_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(CredentialError::InvalidRequest(format!(
            "customer account id '{}' is not a 12-digit account number",
            customer_account_id
        )));
    }
    if role_identifier.trim().is_empty() {
        return Err(CredentialError::InvalidRequest("role identifier is empty".into()));
    }
    if external_id.trim().is_empty() {
        return Err(CredentialError::InvalidRequest("external id is empty".into()));
    }
    let duration_secs = duration.as_secs();
    if !(MIN_LEASE_SECS..=MAX_LEASE_SECS).contains(&duration_secs) {
        return Err(CredentialError::InvalidRequest(format!(
            "lease duration {}s outside [{}, {}]",
            duration_secs, MIN_LEASE_SECS, MAX_LEASE_SECS
        )));
    }

    let session_suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(AssumeRoleRequest {
        customer_account_id: customer_account_id.to_string(),
        role_identifier: role_identifier.to_string(),
        external_id: external_id.to_string(),
        session_name: format!("{}-{}", SESSION_NAME_PREFIX, &session_suffix[..16]),
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::validator::ProbeStatus;
    use crate::testing::{MockAssumeRole, MockProviderApi, ACCOUNT, EXTERNAL_ID, ROLE};
    use crate::common::error::ProviderError;

    fn broker(sts: Arc<MockAssumeRole>) -> CredentialBroker {
        CredentialBroker::new(sts, BrokerConfig::default())
    }

    #[tokio::test]
    async fn issues_lease_when_external_id_matches() {
        let sts = Arc::new(MockAssumeRole::trusting(EXTERNAL_ID));
        let lease = broker(sts.clone())
            .assume_role(ACCOUNT, ROLE, EXTERNAL_ID, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(lease.customer_account_id(), ACCOUNT);
        assert!(!lease.is_expired());

        let requests = sts.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].external_id, EXTERNAL_ID);
        assert!(requests[0].session_name.starts_with(SESSION_NAME_PREFIX));
        assert!(requests[0].session_name.len() <= 64);
    }

    #[tokio::test]
    async fn refused_trust_is_not_retried() {
        let sts = Arc::new(MockAssumeRole::trusting(EXTERNAL_ID));
        let err = broker(sts.clone())
            .assume_role(ACCOUNT, ROLE, "wrong", Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::TrustRejected { .. }));
        assert_eq!(sts.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_requests_never_reach_the_provider() {
        let sts = Arc::new(MockAssumeRole::trusting(EXTERNAL_ID));
        let b = broker(sts.clone());
        assert!(matches!(
            b.assume_role("12345", ROLE, EXTERNAL_ID, Duration::from_secs(3600)).await,
            Err(CredentialError::InvalidRequest(_))
        ));
        assert!(matches!(
            b.assume_role(ACCOUNT, ROLE, EXTERNAL_ID, Duration::from_secs(60)).await,
            Err(CredentialError::InvalidRequest(_))
        ));
        assert!(matches!(
            b.assume_role(ACCOUNT, "", EXTERNAL_ID, Duration::from_secs(3600)).await,
            Err(CredentialError::InvalidRequest(_))
        ));
        assert!(sts.requests().await.is_empty());
    }

    #[tokio::test]
    async fn validate_source_uses_short_lease_and_catalog_probes() {
        let sts = Arc::new(MockAssumeRole::trusting(EXTERNAL_ID));
        let api = Arc::new(
            MockProviderApi::new()
                .with_probe("securityhub:GetFindings", Err(ProviderError::NotFound("no findings".into()))),
        );
        let report = broker(sts.clone())
            .validate_source(api.clone(), SourceType::SecurityHub, "us-east-1", ACCOUNT, ROLE, EXTERNAL_ID)
            .await;

        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.status_of("securityhub:DescribeHub"), Some(ProbeStatus::Passed));
        assert_eq!(sts.requests().await[0].duration_secs, 900);
        assert_eq!(
            api.probe_calls().await,
            vec!["securityhub:DescribeHub".to_string(), "securityhub:GetFindings".to_string()]
        );
    }

    #[tokio::test]
    async fn validate_source_reports_refused_trust() {
        let sts = Arc::new(MockAssumeRole::trusting(EXTERNAL_ID));
        let api = Arc::new(MockProviderApi::new());
        let report = broker(sts)
            .validate_source(api.clone(), SourceType::GuardDuty, "us-east-1", ACCOUNT, ROLE, "nope")
            .await;
        assert!(!report.is_valid());
        assert!(report.results.is_empty());
        assert!(api.probe_calls().await.is_empty());
    }
}
