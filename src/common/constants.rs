/// Source type names (used in config files, CLI flags and metric labels)
pub const GUARDDUTY_SOURCE: &str = "guardduty";
pub const SECURITY_HUB_SOURCE: &str = "security_hub";
pub const CLOUDTRAIL_SOURCE: &str = "cloudtrail";

// Keys under which each source wraps its record list in a fixture file
pub const GUARDDUTY_FIXTURE_KEY: &str = "findings";
pub const SECURITY_HUB_FIXTURE_KEY: &str = "Findings";
pub const CLOUDTRAIL_FIXTURE_KEY: &str = "Records";

/// Lease duration for capability probes.
pub const VALIDATION_LEASE_SECS: u64 = 900;
/// Lease duration for full ingestion runs.
pub const INGESTION_LEASE_SECS: u64 = 3600;

// Bounds accepted by the role-assumption endpoint
pub const MIN_LEASE_SECS: u64 = 900;
pub const MAX_LEASE_SECS: u64 = 43_200;

/// Prefix for role session names so tenants can audit our sessions.
pub const SESSION_NAME_PREFIX: &str = "finding-ingest";

/// Length of generated external ids.
pub const EXTERNAL_ID_LEN: usize = 32;

/// Upper bound for any backoff delay, in seconds.
pub const MAX_RETRY_DELAY_SECS: f64 = 86_400.0;

/// Slowest refill rate a rate limiter accepts, in tokens per second.
pub const MIN_REFILL_RATE_PER_SEC: f64 = 1e-3;
