// Source connectors: the shared connector, per-source profiles and scoring.

pub mod base;
pub mod cloudtrail;
pub mod factory;
pub mod guardduty;
pub mod scoring;
pub mod security_hub;

pub use base::{Connector, ConnectorMode, FetchCriteria, SourceConnector, SourceProfile};
pub use factory::{create_profile, DefaultConnectorFactory};
