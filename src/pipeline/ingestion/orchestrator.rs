use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::apis::base::{Connector, ConnectorMode, FetchCriteria};
use crate::app::ports::{ConnectorFactory, FindingProcessorPort};
use crate::common::error::RecordError;
use crate::config::{IngestionConfig, RateLimitSpec};
use crate::credentials::broker::CredentialBroker;
use crate::domain::RawRecord;
use crate::infra::fixture_store::FixtureStore;
use crate::observability::metrics;
use crate::pipeline::ingestion::backoff::BackoffPolicy;
use crate::pipeline::ingestion::rate_limiter::{RateLimiter, RateLimiters};
use crate::pipeline::ingestion::result::{ErrorEntry, ErrorKind, IngestionResult, IngestionStatus};

/// Receives a snapshot every time a run changes status.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn update(&self, snapshot: &IngestionResult);
}

pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn update(&self, _snapshot: &IngestionResult) {}
}

/// Drives single ingestion runs from lease to finalized result.
pub struct IngestionOrchestrator {
    broker: Arc<CredentialBroker>,
    connectors: Arc<dyn ConnectorFactory>,
    processor: Arc<dyn FindingProcessorPort>,
    limiters: RateLimiters,
    fixtures: Option<Arc<FixtureStore>>,
    backoff: Option<BackoffPolicy>,
}

impl IngestionOrchestrator {
    pub fn new(
        broker: Arc<CredentialBroker>,
        connectors: Arc<dyn ConnectorFactory>,
        processor: Arc<dyn FindingProcessorPort>,
        limiters: RateLimiters,
    ) -> Self {
        Self {
            broker,
            connectors,
            processor,
            limiters,
            fixtures: None,
            backoff: None,
        }
    }

    /// Runs without a role identifier are served from `store`.
    pub fn with_fixtures(mut self, store: Arc<FixtureStore>) -> Self {
        self.fixtures = Some(store);
        self
    }

    /// Use `policy` for every run instead of deriving one from each config.
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    /// Run to completion with a fresh run id and no cancellation.
    pub async fn execute(&self, config: IngestionConfig) -> IngestionResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run(Arc::new(config), &run_id, CancellationToken::new(), &NoopReporter)
            .await
    }

    /// Drive one run. Never fails: every outcome ends up in the result.
    #[instrument(
        skip(self, config, cancel, reporter),
        fields(source = %config.source_type, tenant = %config.tenant_id)
    )]
    pub async fn run(
        &self,
        config: Arc<IngestionConfig>,
        run_id: &str,
        cancel: CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> IngestionResult {
        let source = config.source_type;
        let mut result = IngestionResult::new(run_id, config.tenant_id.clone(), source);
        metrics::runs::started(source);
        info!("Starting ingestion run {} for tenant {}", run_id, config.tenant_id);

        if let Err(e) = config.validate() {
            result.push_error(ErrorEntry::new(ErrorKind::Validation, e.to_string()));
            return self.finish(result, IngestionStatus::Failed, reporter).await;
        }

        result.set_status(IngestionStatus::Running);
        reporter.update(&result).await;

        if cancel.is_cancelled() {
            result.push_error(ErrorEntry::new(ErrorKind::Cancelled, "cancelled before start"));
            return self.finish(result, IngestionStatus::Cancelled, reporter).await;
        }

        let connector = match self.build_connector(&config).await {
            Ok(connector) => connector,
            Err(entry) => {
                error!("Run {} could not obtain a connector: {}", run_id, entry.message);
                result.push_error(entry);
                return self.finish(result, IngestionStatus::Failed, reporter).await;
            }
        };
        result.set_mode(connector.mode());
        if connector.mode() == ConnectorMode::Fixture {
            result.push_warning(ErrorEntry::new(
                ErrorKind::FixtureMode,
                "no trust relationship configured, serving fixture data",
            ));
        }

        let status = self
            .attempt_loop(connector.as_ref(), &config, &cancel, &mut result, reporter)
            .await;
        self.finish(result, status, reporter).await
    }

    async fn build_connector(&self, config: &IngestionConfig) -> Result<Box<dyn Connector>, ErrorEntry> {
        let source = config.source_type;
        let limiter = self.limiter_for(source);

        let lease = match (&self.fixtures, config.has_trust_relationship()) {
            (Some(_), false) => None,
            _ => Some(
                self.broker
                    .assume_role(
                        &config.customer_account_id,
                        &config.role_identifier,
                        &config.external_id,
                        self.broker.ingestion_lease_duration(),
                    )
                    .await
                    .map_err(|e| {
                        ErrorEntry::new(ErrorKind::Credential, e.to_string())
                            .with_context("customer_account_id", &config.customer_account_id)
                            .with_context("role_identifier", &config.role_identifier)
                    })?,
            ),
        };

        match (ConnectorMode::select(lease.as_ref()), lease) {
            (ConnectorMode::Live, Some(lease)) => Ok(self.connectors.live(source, lease, limiter)),
            (_, Some(lease)) => Err(ErrorEntry::new(
                ErrorKind::Credential,
                format!("lease {} expired before the run started", lease.lease_id()),
            )),
            (_, None) => {
                let records = self
                    .fixtures
                    .as_ref()
                    .and_then(|store| store.records(source))
                    .ok_or_else(|| {
                        ErrorEntry::new(ErrorKind::Validation, format!("no fixture dataset for {}", source))
                    })?;
                Ok(self.connectors.fixture(source, records, limiter))
            }
        }
    }

    fn limiter_for(&self, source: crate::domain::SourceType) -> Arc<RateLimiter> {
        self.limiters
            .get(source)
            .unwrap_or_else(|| Arc::new(RateLimiter::new(source, RateLimitSpec::default())))
    }

    async fn attempt_loop(
        &self,
        connector: &dyn Connector,
        config: &IngestionConfig,
        cancel: &CancellationToken,
        result: &mut IngestionResult,
        reporter: &dyn ProgressReporter,
    ) -> IngestionStatus {
        let source = config.source_type;
        let backoff = self.backoff.unwrap_or_else(|| BackoffPolicy::from_config(config));
        let criteria = FetchCriteria {
            region: config.region.clone(),
            batch_size: config.batch_size,
            severities: config.severity_filter.clone(),
        };
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                result.push_error(
                    ErrorEntry::new(ErrorKind::Cancelled, "cancelled before fetch").with_context("attempt", attempt),
                );
                return IngestionStatus::Cancelled;
            }
            if let Err(e) = connector.ensure_credentials() {
                result.push_error(ErrorEntry::new(ErrorKind::Credential, e.to_string()));
                return IngestionStatus::Failed;
            }

            let error = match connector.fetch_batch(&criteria).await {
                Ok(records) => return self.process_batch(connector, config, &criteria, records, result).await,
                Err(e) => e,
            };

            if !error.is_retryable() {
                error!("Fetch from {} failed permanently: {}", source, error);
                result.push_error(ErrorEntry::new(ErrorKind::from(&error), error.to_string()).with_context("attempt", attempt));
                return IngestionStatus::Failed;
            }
            if attempt >= config.max_retries {
                error!("Giving up on {} after {} retries: {}", source, attempt, error);
                result.push_error(
                    ErrorEntry::new(ErrorKind::RetriesExhausted, error.to_string())
                        .with_context("retries", attempt)
                        .with_context("last_error", ErrorKind::from(&error).as_str()),
                );
                return IngestionStatus::Failed;
            }

            attempt += 1;
            let delay = backoff.delay_for_retry(attempt);
            warn!(
                "Fetch from {} failed ({}), retry {}/{} in {:?}",
                source, error, attempt, config.max_retries, delay
            );
            metrics::runs::retry(source);
            result.record_retry(
                ErrorEntry::new(ErrorKind::from(&error), error.to_string())
                    .with_context("attempt", attempt)
                    .with_context("delay_ms", delay.as_millis()),
            );
            result.set_status(IngestionStatus::Retrying);
            reporter.update(result).await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    result.push_error(
                        ErrorEntry::new(ErrorKind::Cancelled, "cancelled during backoff").with_context("attempt", attempt),
                    );
                    return IngestionStatus::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            result.set_status(IngestionStatus::Running);
            reporter.update(result).await;
        }
    }

    async fn process_batch(
        &self,
        connector: &dyn Connector,
        config: &IngestionConfig,
        criteria: &FetchCriteria,
        records: Vec<RawRecord>,
        result: &mut IngestionResult,
    ) -> IngestionStatus {
        let source = config.source_type;
        let mut consecutive_errors: u32 = 0;

        // cancellation is not checked here: a fetched batch is always worked through
        for (index, raw) in records.iter().enumerate() {
            let outcome = match connector.normalize(raw) {
                Ok(finding) if !criteria.accepts(finding.severity) => {
                    debug!(finding = %finding.id, severity = %finding.severity, "filtered by severity");
                    continue;
                }
                Ok(finding) => self.processor.process(&finding).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    result.record_success();
                    consecutive_errors = 0;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    result.record_failure(record_error_entry(connector, raw, index, &e));
                    debug!("Record {} of {} failed: {}", index, source, e);

                    if consecutive_errors >= config.max_consecutive_errors {
                        error!(
                            "Circuit breaker tripped for {} after {} consecutive errors",
                            source, consecutive_errors
                        );
                        metrics::runs::circuit_breaker_tripped(source);
                        result.push_error(
                            ErrorEntry::new(
                                ErrorKind::CircuitBreakerTripped,
                                format!("{} consecutive record failures", consecutive_errors),
                            )
                            .with_context("index", index)
                            .with_context("threshold", config.max_consecutive_errors),
                        );
                        return IngestionStatus::Failed;
                    }
                    if !config.continue_on_error {
                        warn!("Stopping {} batch at record {}: continue_on_error is off", source, index);
                        return IngestionStatus::Failed;
                    }
                }
            }
        }
        IngestionStatus::Success
    }

    async fn finish(
        &self,
        result: IngestionResult,
        status: IngestionStatus,
        reporter: &dyn ProgressReporter,
    ) -> IngestionResult {
        let result = result.finalize(status);
        metrics::runs::records(result.source_type, result.records_processed, result.records_failed);
        metrics::runs::completed(result.source_type, status.as_str(), result.duration_ms as f64 / 1000.0);
        info!(
            "Run {} finished {}: {} processed, {} failed, {} retries in {}ms",
            result.run_id,
            status,
            result.records_processed,
            result.records_failed,
            result.retry_attempts,
            result.duration_ms
        );
        reporter.update(&result).await;
        result
    }
}

fn record_error_entry(connector: &dyn Connector, raw: &RawRecord, index: usize, error: &RecordError) -> ErrorEntry {
    let entry = ErrorEntry::new(ErrorKind::from(error), error.to_string()).with_context("index", index);
    match connector.record_id(raw) {
        Some(id) => entry.with_context("record_id", id),
        None => entry,
    }
}
