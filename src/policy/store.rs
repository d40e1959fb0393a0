use std::collections::HashMap;

use async_trait::async_trait;

use crate::policy::errors::StoreError;
use crate::policy::types::Snapshot;

/// Read-only fetch-by-path capability backed by the external document store.
/// The evaluator depends on this contract and never owns a concrete client.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Snapshot>, StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.get(path).await?.is_some())
    }
}

/// In-memory store for tests and local seeding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: HashMap<String, Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, doc: Snapshot) {
        self.docs.insert(path.into(), doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.docs.get(path).cloned())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.docs.contains_key(path))
    }
}
