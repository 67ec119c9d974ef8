use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::apis::base::records_from_fixture;
use crate::apis::factory::create_profile;
use crate::common::error::{IngestError, Result};
use crate::domain::SourceType;

/// Canned datasets for fixture-mode runs, one per source.
#[derive(Debug, Clone, Default)]
pub struct FixtureStore {
    datasets: HashMap<SourceType, Arc<Vec<Value>>>,
}

impl FixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<source>.json` present in `dir`. Missing files are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        for source in SourceType::all() {
            let path = dir.join(format!("{}.json", source.as_str()));
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&content)?;
            let records = records_from_fixture(value, create_profile(source).fixture_key())
                .map_err(|e| IngestError::Fixture(format!("{}: {}", path.display(), e)))?;
            info!("Loaded {} {} fixture records from {}", records.len(), source, path.display());
            store.datasets.insert(source, Arc::new(records));
        }
        if store.datasets.is_empty() {
            warn!("No fixture datasets found in {}", dir.display());
        }
        Ok(store)
    }

    pub fn with_dataset(mut self, source: SourceType, records: Vec<Value>) -> Self {
        self.datasets.insert(source, Arc::new(records));
        self
    }

    pub fn records(&self, source: SourceType) -> Option<Arc<Vec<Value>>> {
        self.datasets.get(&source).cloned()
    }
}
