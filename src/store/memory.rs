use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::TreeStore;
use crate::error::StoreError;

/// In-process tree with the same last-write-wins semantics as the remote store.
///
/// Writing `null` removes a node; parents left empty are pruned, as the
/// remote store never keeps empty objects.
pub struct MemoryStore {
    root: Mutex<Value>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `write` + `multi_update` calls received.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Clone of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.root.lock().map(|r| r.clone()).unwrap_or(Value::Null)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Value>, StoreError> {
        self.root
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn get<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |node, seg| node.as_object()?.get(*seg))
}

fn set(root: &mut Value, segs: &[&str], value: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *root = if value.is_null() { Value::Object(Map::new()) } else { value };
        return;
    };
    if !root.is_object() {
        if value.is_null() {
            return;
        }
        *root = Value::Object(Map::new());
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert((*first).to_string(), value);
        }
        return;
    }

    if value.is_null() && !map.contains_key(*first) {
        return;
    }
    let child = map
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set(child, rest, value);
    if child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(*first);
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let root = self.lock()?;
        Ok(get(&root, &segments(path))
            .filter(|v| !v.is_null())
            .filter(|v| v.as_object().map_or(true, |m| !m.is_empty()))
            .cloned())
    }

    async fn write(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut root = self.lock()?;
        set(&mut root, &segments(path), value.clone());
        Ok(())
    }

    async fn multi_update(&self, updates: &Map<String, Value>) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut root = self.lock()?;
        for (path, value) in updates {
            set(&mut root, &segments(path), value.clone());
        }
        Ok(())
    }
}
