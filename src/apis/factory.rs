use serde_json::Value;
use std::sync::Arc;

use crate::apis::base::{Connector, SourceConnector, SourceProfile};
use crate::apis::cloudtrail::CloudTrailProfile;
use crate::apis::guardduty::GuardDutyProfile;
use crate::apis::security_hub::SecurityHubProfile;
use crate::app::ports::{ConnectorFactory, ProviderApiPort};
use crate::credentials::lease::CredentialLease;
use crate::domain::SourceType;
use crate::pipeline::ingestion::rate_limiter::RateLimiter;

pub fn create_profile(source: SourceType) -> Box<dyn SourceProfile> {
    match source {
        SourceType::GuardDuty => Box::new(GuardDutyProfile),
        SourceType::SecurityHub => Box::new(SecurityHubProfile),
        SourceType::CloudTrail => Box::new(CloudTrailProfile),
    }
}

/// Builds `SourceConnector`s over one provider API.
pub struct DefaultConnectorFactory {
    api: Arc<dyn ProviderApiPort>,
}

impl DefaultConnectorFactory {
    pub fn new(api: Arc<dyn ProviderApiPort>) -> Self {
        Self { api }
    }
}

impl ConnectorFactory for DefaultConnectorFactory {
    fn live(&self, source: SourceType, lease: CredentialLease, limiter: Arc<RateLimiter>) -> Box<dyn Connector> {
        Box::new(SourceConnector::live(create_profile(source), self.api.clone(), lease, limiter))
    }

    fn fixture(&self, source: SourceType, records: Arc<Vec<Value>>, limiter: Arc<RateLimiter>) -> Box<dyn Connector> {
        Box::new(SourceConnector::fixture(create_profile(source), records, limiter))
    }
}
