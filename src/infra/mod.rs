// Adapters behind the app ports: HTTP gateways, fixtures and finding sinks.

pub mod finding_output_adapter;
pub mod fixture_store;
pub mod http_client;

pub use finding_output_adapter::{DiscardingSink, NdjsonFindingSink};
pub use fixture_store::FixtureStore;
pub use http_client::{HttpAssumeRoleClient, HttpProviderApi};
