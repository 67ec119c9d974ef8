use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::constants::{INGESTION_LEASE_SECS, MAX_RETRY_DELAY_SECS, VALIDATION_LEASE_SECS};
use crate::common::error::{IngestError, Result};
use crate::domain::{Severity, SourceType};

/// Parameters of a single ingestion run. Frozen once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub source_type: SourceType,
    pub tenant_id: String,
    pub customer_account_id: String,
    /// Role to assume in the customer account. Empty means "no trust
    /// relationship configured", which is only accepted by orchestrators
    /// built with a fixture store.
    #[serde(default)]
    pub role_identifier: String,
    #[serde(default)]
    pub external_id: String,
    pub region: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: f64,
    /// Severities to keep. Empty keeps everything.
    #[serde(default)]
    pub severity_filter: Vec<Severity>,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_retry_delay_secs() -> f64 {
    1.0
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_delay_secs() -> f64 {
    60.0
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_continue_on_error() -> bool {
    true
}

impl IngestionConfig {
    /// A config with the default tuning values for the given tenant and source.
    pub fn new(
        source_type: SourceType,
        tenant_id: impl Into<String>,
        customer_account_id: impl Into<String>,
        role_identifier: impl Into<String>,
        external_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            source_type,
            tenant_id: tenant_id.into(),
            customer_account_id: customer_account_id.into(),
            role_identifier: role_identifier.into(),
            external_id: external_id.into(),
            region: region.into(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            severity_filter: Vec::new(),
            max_consecutive_errors: default_max_consecutive_errors(),
            continue_on_error: default_continue_on_error(),
        }
    }

    pub fn has_trust_relationship(&self) -> bool {
        !self.role_identifier.trim().is_empty()
    }

    pub fn initial_retry_delay(&self) -> Duration {
        delay_from_secs(self.initial_retry_delay_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        delay_from_secs(self.max_retry_delay_secs)
    }

    /// Reject configurations that would make the run loop meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(IngestError::MissingField("tenant_id".into()));
        }
        if self.customer_account_id.trim().is_empty() {
            return Err(IngestError::MissingField("customer_account_id".into()));
        }
        if self.region.trim().is_empty() {
            return Err(IngestError::MissingField("region".into()));
        }
        if self.has_trust_relationship() && self.external_id.trim().is_empty() {
            return Err(IngestError::MissingField("external_id".into()));
        }
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be at least 1".into()));
        }
        if self.max_consecutive_errors == 0 {
            return Err(IngestError::Config(
                "max_consecutive_errors must be at least 1".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(IngestError::Config(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !self.initial_retry_delay_secs.is_finite()
            || !self.max_retry_delay_secs.is_finite()
            || self.initial_retry_delay_secs < 0.0
            || self.initial_retry_delay_secs > self.max_retry_delay_secs
            || self.max_retry_delay_secs > MAX_RETRY_DELAY_SECS
        {
            return Err(IngestError::Config(format!(
                "retry delays must satisfy 0 <= initial ({}) <= max ({}) <= {}",
                self.initial_retry_delay_secs, self.max_retry_delay_secs, MAX_RETRY_DELAY_SECS
            )));
        }
        Ok(())
    }
}

// NaN and out-of-range values saturate into [0, MAX_RETRY_DELAY_SECS].
fn delay_from_secs(secs: f64) -> Duration {
    let cap = Duration::from_secs_f64(MAX_RETRY_DELAY_SECS);
    if secs.is_nan() {
        return cap;
    }
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_RETRY_DELAY_SECS)).unwrap_or(cap)
}

/// Token bucket settings for one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub capacity: u32,
    pub refill_rate_per_sec: f64,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the role-assumption gateway.
    pub endpoint: String,
    pub timeout_secs: u64,
    pub validation_lease_secs: u64,
    pub ingestion_lease_secs: u64,
    /// Principal customers trust in their role's trust policy.
    pub trusted_principal: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700".to_string(),
            timeout_secs: 10,
            validation_lease_secs: VALIDATION_LEASE_SECS,
            ingestion_lease_secs: INGESTION_LEASE_SECS,
            trusted_principal: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the findings gateway used by live connectors.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8701".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Process-wide settings shared by every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Keyed by source type name, e.g. `[rate_limits.guardduty]`.
    pub rate_limits: HashMap<String, RateLimitSpec>,
    pub broker: BrokerConfig,
    pub provider: ProviderConfig,
    /// Directory holding `<source>.json` fixture datasets.
    pub fixture_dir: Option<PathBuf>,
    /// Directory the NDJSON finding sink writes into.
    pub output_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn rate_limit_for(&self, source: SourceType) -> RateLimitSpec {
        self.rate_limits
            .get(source.as_str())
            .copied()
            .unwrap_or_default()
    }
}

/// A file of `[[runs]]` tables, one per ingestion run to start.
#[derive(Debug, Clone, Deserialize)]
pub struct RunsFile {
    pub runs: Vec<IngestionConfig>,
}

impl RunsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let runs: RunsFile = toml::from_str(&content)?;
        for run in &runs.runs {
            run.validate()?;
        }
        Ok(runs)
    }
}
