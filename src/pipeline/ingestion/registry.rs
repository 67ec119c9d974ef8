use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::IngestionConfig;
use crate::observability::metrics;
use crate::pipeline::ingestion::orchestrator::{IngestionOrchestrator, ProgressReporter};
use crate::pipeline::ingestion::result::{ErrorEntry, ErrorKind, IngestionResult, IngestionStatus};

pub type RunId = String;

/// Finished results kept for late `wait` calls; older ones are dropped first.
const RETAINED_RESULTS: usize = 256;

struct RunEntry {
    snapshot: IngestionResult,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<RunId, RunEntry>,
    // only runs still in flight keep their task handle
    handles: HashMap<RunId, JoinHandle<IngestionResult>>,
    finished: HashMap<RunId, IngestionResult>,
    finished_order: VecDeque<RunId>,
    completed: BTreeMap<IngestionStatus, u64>,
}

impl RegistryState {
    /// Move a run from the active set to the finished results. No-op when
    /// the run was already retired.
    fn retire(&mut self, result: &IngestionResult) {
        if self.active.remove(&result.run_id).is_none() {
            return;
        }
        *self.completed.entry(result.status).or_insert(0) += 1;
        self.handles.remove(&result.run_id);
        self.finished.insert(result.run_id.clone(), result.clone());
        self.finished_order.push_back(result.run_id.clone());
        while self.finished_order.len() > RETAINED_RESULTS {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    /// Fail a run whose task died before reporting a terminal status.
    fn abandon(&mut self, run_id: &str, reason: String) -> Option<IngestionResult> {
        let mut result = self.active.get(run_id)?.snapshot.clone();
        result.push_error(ErrorEntry::new(ErrorKind::Unknown, reason));
        let result = result.finalize(IngestionStatus::Failed);
        metrics::runs::completed(result.source_type, IngestionStatus::Failed.as_str(), result.duration_ms as f64 / 1000.0);
        self.retire(&result);
        Some(result)
    }

    fn take_finished(&mut self, run_id: &str) -> Option<IngestionResult> {
        let result = self.finished.remove(run_id)?;
        self.finished_order.retain(|id| id != run_id);
        Some(result)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryMetrics {
    pub active_count: usize,
    /// Current status of in-flight runs.
    pub status_histogram: BTreeMap<IngestionStatus, usize>,
    /// Terminal outcomes since the registry was created.
    pub completed_histogram: BTreeMap<IngestionStatus, u64>,
}

/// Tracks in-flight runs. Each run is its own tokio task; the registry only
/// holds snapshots and cancellation tokens, all behind one lock.
pub struct IngestionRegistry {
    orchestrator: Arc<IngestionOrchestrator>,
    state: Arc<Mutex<RegistryState>>,
}

#[derive(Clone)]
struct RegistryReporter {
    run_id: RunId,
    state: Arc<Mutex<RegistryState>>,
}

#[async_trait]
impl ProgressReporter for RegistryReporter {
    async fn update(&self, snapshot: &IngestionResult) {
        let mut state = self.state.lock().await;
        if snapshot.status.is_terminal() {
            state.retire(snapshot);
        } else if let Some(entry) = state.active.get_mut(&self.run_id) {
            entry.snapshot = snapshot.clone();
        }
    }
}

impl IngestionRegistry {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>) -> Self {
        Self {
            orchestrator,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// Spawn a run and return its id immediately.
    pub async fn start(&self, config: IngestionConfig) -> RunId {
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let snapshot = IngestionResult::new(run_id.clone(), config.tenant_id.clone(), config.source_type);

        // the entry must exist before the task's first report
        let mut state = self.state.lock().await;
        state.active.insert(
            run_id.clone(),
            RunEntry {
                snapshot: snapshot.clone(),
                cancel: cancel.clone(),
            },
        );

        let orchestrator = self.orchestrator.clone();
        let reporter = RegistryReporter {
            run_id: run_id.clone(),
            state: self.state.clone(),
        };
        let config = Arc::new(config);
        let handle = tokio::spawn(async move {
            let run_reporter = reporter.clone();
            let task_run_id = reporter.run_id.clone();
            let run = tokio::spawn(async move {
                orchestrator
                    .run(config, &task_run_id, cancel, &run_reporter)
                    .await
            });
            match run.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Ingestion run {} task died: {}", reporter.run_id, e);
                    let mut state = reporter.state.lock().await;
                    let reason = format!("run task died: {}", e);
                    match state.abandon(&reporter.run_id, reason) {
                        Some(result) => result,
                        None => state
                            .finished
                            .get(&reporter.run_id)
                            .cloned()
                            .unwrap_or_else(|| snapshot.finalize(IngestionStatus::Failed)),
                    }
                }
            }
        });
        state.handles.insert(run_id.clone(), handle);
        info!("Registered ingestion run {}", run_id);
        run_id
    }

    /// Latest snapshot of an in-flight run.
    pub async fn get(&self, run_id: &str) -> Option<IngestionResult> {
        let state = self.state.lock().await;
        state.active.get(run_id).map(|entry| entry.snapshot.clone())
    }

    pub async fn list(&self) -> Vec<IngestionResult> {
        let state = self.state.lock().await;
        let mut runs: Vec<IngestionResult> = state.active.values().map(|e| e.snapshot.clone()).collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        runs
    }

    /// Request cooperative cancellation. False when the run is unknown or already finished.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let state = self.state.lock().await;
        match state.active.get(run_id) {
            Some(entry) => {
                info!("Cancelling ingestion run {}", run_id);
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a run to finish and take its result. Each run can be waited
    /// once; only the most recent unwaited results are kept.
    pub async fn wait(&self, run_id: &str) -> Option<IngestionResult> {
        let handle = {
            let mut state = self.state.lock().await;
            match state.handles.remove(run_id) {
                Some(handle) => handle,
                None => return state.take_finished(run_id),
            }
        };
        let joined = handle.await;

        let mut state = self.state.lock().await;
        match joined {
            Ok(result) => {
                state.take_finished(run_id);
                Some(result)
            }
            Err(e) => {
                error!("Ingestion run {} task failed: {}", run_id, e);
                state.abandon(run_id, format!("run task failed: {}", e));
                state.take_finished(run_id)
            }
        }
    }

    pub async fn metrics(&self) -> RegistryMetrics {
        let state = self.state.lock().await;
        let mut status_histogram = BTreeMap::new();
        for entry in state.active.values() {
            *status_histogram.entry(entry.snapshot.status).or_insert(0) += 1;
        }
        RegistryMetrics {
            active_count: state.active.len(),
            status_histogram,
            completed_histogram: state.completed.clone(),
        }
    }
}
