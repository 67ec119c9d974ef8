pub mod apis;
pub mod app;
pub mod common;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod infra;
pub mod observability;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use common::error::{IngestError, Result};
