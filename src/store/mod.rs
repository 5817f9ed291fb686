//! Hierarchical key-path document store.

mod firebase;
mod memory;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::StoreError;

/// The three primitives the pipelines need from the remote tree.
///
/// Paths are `/`-delimited and must already be sanitized (see [`crate::path`]).
/// An empty path addresses the root.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Value at `path`, or `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`.
    async fn write(&self, path: &str, value: &Value) -> Result<(), StoreError>;

    /// Apply every `path -> value` pair relative to the root as one operation.
    async fn multi_update(&self, updates: &Map<String, Value>) -> Result<(), StoreError>;
}

/// One-time holder for the process' store handle.
///
/// The handle is created on first use and reused afterwards; a second
/// initialisation attempt gets the existing handle back.
#[derive(Default)]
pub struct StoreSlot {
    cell: OnceLock<Arc<dyn TreeStore>>,
}

impl StoreSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn TreeStore>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get_or_try_init<E>(
        &self,
        init: impl FnOnce() -> Result<Arc<dyn TreeStore>, E>,
    ) -> Result<Arc<dyn TreeStore>, E> {
        if let Some(existing) = self.cell.get() {
            debug!("Store already initialized; reusing existing handle");
            return Ok(existing.clone());
        }
        let store = init()?;
        // Single-threaded callers never race here; keep whichever handle won.
        Ok(self.cell.get_or_init(|| store).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_initializes_once() {
        let slot = StoreSlot::new();
        assert!(!slot.is_initialized());

        let first = slot
            .get_or_try_init::<()>(|| Ok(Arc::new(MemoryStore::new())))
            .unwrap();
        let mut called = false;
        let second = slot
            .get_or_try_init::<()>(|| {
                called = true;
                Ok(Arc::new(MemoryStore::new()))
            })
            .unwrap();

        assert!(!called);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn failed_init_leaves_slot_empty() {
        let slot = StoreSlot::new();
        let res = slot.get_or_try_init(|| Err("no credentials"));
        assert!(res.is_err());
        assert!(slot.get().is_none());
    }
}
