// Ingestion runs: rate limiting, backoff, the run state machine and the registry of in-flight runs.

pub mod backoff;
pub mod orchestrator;
pub mod rate_limiter;
pub mod registry;
pub mod result;

pub use backoff::BackoffPolicy;
pub use orchestrator::{IngestionOrchestrator, NoopReporter, ProgressReporter};
pub use rate_limiter::{RateLimiter, RateLimiters};
pub use registry::{IngestionRegistry, RegistryMetrics, RunId};
pub use result::{ErrorEntry, ErrorKind, IngestionResult, IngestionStatus};
