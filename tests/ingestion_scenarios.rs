use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use finding_ingest::apis::{create_profile, DefaultConnectorFactory};
use finding_ingest::app::ports::{
    AssumeRolePort, AssumeRoleRequest, FindingProcessorPort, FindingsPage, IssuedCredentials, ListFindingsRequest,
    ProviderApiPort,
};
use finding_ingest::common::error::{CredentialError, ProviderError, RecordError};
use finding_ingest::config::{AppConfig, BrokerConfig, IngestionConfig};
use finding_ingest::credentials::{CredentialBroker, CredentialLease};
use finding_ingest::domain::{CanonicalFinding, RawRecord, SourceType};
use finding_ingest::infra::{FixtureStore, NdjsonFindingSink};
use finding_ingest::pipeline::ingestion::{
    BackoffPolicy, ErrorKind, IngestionOrchestrator, IngestionResult, IngestionStatus, NoopReporter, RateLimiters,
};

const ACCOUNT: &str = "210987654321";
const ROLE: &str = "arn:aws:iam::210987654321:role/SecurityFindingsReader";
const EXTERNAL_ID: &str = "tenant-b-9f2c1e";

struct TrustingSts;

#[async_trait]
impl AssumeRolePort for TrustingSts {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<IssuedCredentials, CredentialError> {
        if request.external_id != EXTERNAL_ID {
            return Err(CredentialError::TrustRejected {
                role: request.role_identifier.clone(),
                message: "external id mismatch".into(),
            });
        }
        Ok(IssuedCredentials {
            access_key_id: "ASIASCENARIO".into(),
            secret_access_key: "scenario-secret".into(),
            session_token: "scenario-token".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(request.duration_secs as i64),
        })
    }
}

/// Each list call pops the next scripted outcome; an exhausted script returns empty pages.
struct ScriptedApi {
    script: Mutex<VecDeque<Result<Vec<Value>, ProviderError>>>,
    calls: Mutex<usize>,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedApi {
    fn new(script: Vec<Result<Vec<Value>, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
            cancel_on_call: None,
        }
    }

    fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl ProviderApiPort for ScriptedApi {
    async fn list_findings(
        &self,
        _lease: &CredentialLease,
        _request: &ListFindingsRequest,
    ) -> Result<FindingsPage, ProviderError> {
        *self.calls.lock().await += 1;
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        let step = self.script.lock().await.pop_front().unwrap_or_else(|| Ok(Vec::new()));
        step.map(|records| FindingsPage {
            records,
            next_token: None,
        })
    }

    async fn probe(&self, _: &CredentialLease, _: SourceType, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingSink {
    findings: Mutex<Vec<CanonicalFinding>>,
}

#[async_trait]
impl FindingProcessorPort for CollectingSink {
    async fn process(&self, finding: &CanonicalFinding) -> Result<(), RecordError> {
        self.findings.lock().await.push(finding.clone());
        Ok(())
    }
}

fn orchestrator(api: Arc<ScriptedApi>, sink: Arc<CollectingSink>) -> IngestionOrchestrator {
    let broker = Arc::new(CredentialBroker::new(Arc::new(TrustingSts), BrokerConfig::default()));
    IngestionOrchestrator::new(
        broker,
        Arc::new(DefaultConnectorFactory::new(api)),
        sink,
        RateLimiters::from_config(&AppConfig::default()),
    )
    .with_backoff(BackoffPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(40)))
}

fn guardduty(id: &str) -> Value {
    json!({
        "Id": id,
        "CreatedAt": "2024-06-01T08:00:00Z",
        "Severity": 6.5,
        "Confidence": 7,
        "Service": {
            "Count": 12,
            "Action": {"NetworkConnectionAction": {"RemoteIpDetails": {"IpAddressV4": "8.8.8.8"}}}
        }
    })
}

fn malformed(id: &str) -> Value {
    json!({"Id": id, "CreatedAt": "2024-06-01T08:00:00Z"})
}

fn config() -> IngestionConfig {
    IngestionConfig::new(SourceType::GuardDuty, "tenant-b", ACCOUNT, ROLE, EXTERNAL_ID, "eu-west-1")
}

fn assert_invariants(result: &IngestionResult, max_retries: u32) {
    assert_eq!(result.records_processed, result.records_successful + result.records_failed);
    assert!(result.retry_attempts <= max_retries);
    assert!(result.status.is_terminal());
    assert!(result.completed_at.is_some());
}

#[tokio::test]
async fn scenario_a_circuit_breaker_trips_on_consecutive_failures() {
    let records: Vec<Value> = (1..=10)
        .map(|n| {
            let id = format!("gd-{}", n);
            if (3..=7).contains(&n) {
                malformed(&id)
            } else {
                guardduty(&id)
            }
        })
        .collect();
    let api = Arc::new(ScriptedApi::new(vec![Ok(records)]));
    let sink = Arc::new(CollectingSink::default());
    let mut c = config();
    c.max_consecutive_errors = 5;

    let result = orchestrator(api, sink.clone()).execute(c).await;

    assert_invariants(&result, 3);
    assert_eq!(result.status, IngestionStatus::Failed);
    assert_eq!(result.records_processed, 7);
    assert_eq!(result.records_successful, 2);
    assert_eq!(result.records_failed, 5);
    assert_eq!(result.errors_of(ErrorKind::CircuitBreakerTripped).count(), 1);
    assert_eq!(sink.findings.lock().await.len(), 2);
}

#[tokio::test]
async fn scenario_b_throttling_is_retried_with_backoff() {
    let good: Vec<Value> = (1..=5).map(|n| guardduty(&format!("gd-{}", n))).collect();
    let api = Arc::new(ScriptedApi::new(vec![
        Err(ProviderError::Throttled("Rate exceeded".into())),
        Err(ProviderError::Throttled("Rate exceeded".into())),
        Ok(good),
    ]));
    let sink = Arc::new(CollectingSink::default());
    let mut c = config();
    c.max_retries = 2;

    let started = std::time::Instant::now();
    let result = orchestrator(api.clone(), sink.clone()).execute(c).await;

    assert_invariants(&result, 2);
    assert_eq!(result.status, IngestionStatus::Success);
    assert_eq!(result.retry_attempts, 2);
    assert_eq!(result.records_processed, 5);
    assert_eq!(result.errors_of(ErrorKind::Throttling).count(), 2);
    assert_eq!(api.calls().await, 3);
    // 10ms then 20ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(30));

    for finding in sink.findings.lock().await.iter() {
        assert!(finding.raw_ref.starts_with("sha256:"));
        assert!((0.0..=1.0).contains(&finding.risk_score));
    }
}

#[tokio::test]
async fn scenario_c_refused_trust_fails_without_retries() {
    let api = Arc::new(ScriptedApi::new(vec![Ok(vec![guardduty("gd-1")])]));
    let mut c = config();
    c.external_id = "stolen-external-id".into();

    let result = orchestrator(api.clone(), Arc::new(CollectingSink::default())).execute(c).await;

    assert_invariants(&result, 3);
    assert_eq!(result.status, IngestionStatus::Failed);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::Credential);
    assert_eq!(result.records_processed, 0);
    assert_eq!(result.retry_attempts, 0);
    assert_eq!(result.mode, None);
    assert_eq!(api.calls().await, 0);
}

#[tokio::test]
async fn scenario_d_cancellation_between_attempts() {
    let token = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(vec![
            Err(ProviderError::Throttled("Rate exceeded".into())),
            Ok(vec![guardduty("gd-1")]),
        ])
        .cancelling(token.clone()),
    );
    let sink = Arc::new(CollectingSink::default());

    let result = orchestrator(api.clone(), sink.clone())
        .run(Arc::new(config()), "run-d", token, &NoopReporter)
        .await;

    assert_invariants(&result, 3);
    assert_eq!(result.status, IngestionStatus::Cancelled);
    assert_eq!(api.calls().await, 1);
    assert_eq!(result.records_processed, 0);
    assert_eq!(result.errors_of(ErrorKind::Cancelled).count(), 1);
    assert!(sink.findings.lock().await.is_empty());
}

#[test]
fn backoff_sequence_is_capped() {
    let policy = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(60));
    let secs: Vec<u64> = (1..=9).map(|n| policy.delay_for_retry(n).as_secs()).collect();
    assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
}

#[test]
fn risk_scores_stay_in_unit_interval_for_hostile_payloads() {
    let hostile = [
        json!({"Id": "a", "CreatedAt": "2024-06-01T08:00:00Z", "Severity": 1e300, "Confidence": -50,
               "Service": {"Count": 1e18}}),
        json!({"Id": "b", "CreatedAt": "2024-06-01T08:00:00Z", "Severity": -4, "Confidence": "9"}),
        json!({"Id": "c", "UpdatedAt": "2024-06-01T08:00:00Z", "Severity": {"Label": "CRITICAL"},
               "Confidence": 10_000, "Criticality": 10_000}),
        json!({"eventID": "d", "eventTime": "2024-06-01T08:00:00Z", "eventName": "StopLogging",
               "errorCode": "AccessDenied", "sourceIPAddress": "1.1.1.1", "userIdentity": {"type": "Root"}}),
    ];
    for source in SourceType::all() {
        let profile = create_profile(source);
        for payload in &hostile {
            if let Ok(finding) = profile.normalize(&RawRecord::new(source, payload.clone())) {
                assert!(
                    (0.0..=1.0).contains(&finding.risk_score),
                    "{} scored {} for {}",
                    source,
                    finding.risk_score,
                    payload
                );
            }
        }
    }
}

#[tokio::test]
async fn fixture_run_writes_ndjson_without_credentials() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("cloudtrail.json"),
        json!({"Records": [
            {"eventID": "e-1", "eventTime": "2024-06-01T08:00:00Z", "eventName": "ConsoleLogin",
             "sourceIPAddress": "8.8.8.8", "userIdentity": {"type": "Root"}},
            {"eventID": "e-2", "eventTime": "2024-06-01T08:01:00Z", "eventName": "DescribeInstances",
             "sourceIPAddress": "10.0.0.4", "userIdentity": {"type": "AssumedRole"}}
        ]})
        .to_string(),
    )
    .unwrap();

    let store = FixtureStore::load_dir(dir.path()).unwrap();
    let sink = Arc::new(NdjsonFindingSink::create(&dir.path().join("out"), "findings.ndjson").await.unwrap());
    let broker = Arc::new(CredentialBroker::new(Arc::new(TrustingSts), BrokerConfig::default()));
    let orchestrator = IngestionOrchestrator::new(
        broker,
        Arc::new(DefaultConnectorFactory::new(Arc::new(ScriptedApi::new(Vec::new())))),
        sink.clone(),
        RateLimiters::from_config(&AppConfig::default()),
    )
    .with_fixtures(Arc::new(store));

    let mut c = IngestionConfig::new(SourceType::CloudTrail, "demo-tenant", ACCOUNT, "", "", "us-east-1");
    c.batch_size = 10;
    let result = orchestrator.execute(c).await;

    assert_eq!(result.status, IngestionStatus::Success);
    assert_eq!(result.records_processed, 2);
    let written = std::fs::read_to_string(sink.path()).unwrap();
    let ids: Vec<String> = written
        .lines()
        .map(|line| serde_json::from_str::<CanonicalFinding>(line).unwrap().id)
        .collect();
    assert_eq!(ids, vec!["e-1", "e-2"]);
}
