//! Registry of managed process records.

use std::sync::Arc;

use dashmap::DashMap;

use crate::record::ProcessRecord;

/// Concurrent id → record map. Owned by a supervisor instance, never global;
/// tests construct as many independent registries as they need.
pub struct Registry {
    records: DashMap<String, Arc<ProcessRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn insert(&self, record: Arc<ProcessRecord>) {
        self.records.insert(record.id.0.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProcessRecord>> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ProcessRecord>> {
        self.records.remove(id).map(|(_, record)| record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Point-in-time snapshot of every record.
    pub fn snapshot(&self) -> Vec<Arc<ProcessRecord>> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
