// Cross-account credentials: leases, the broker that issues them, capability
// probes and the permission catalog both are derived from.

pub mod broker;
pub mod lease;
pub mod permissions;
pub mod validator;

pub use broker::CredentialBroker;
pub use lease::{CredentialLease, LeaseSecret};
pub use validator::{CapabilityProbe, ProbeStatus, ValidationReport};
