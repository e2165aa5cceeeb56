// Abstract key-value storage collaborator and the in-memory implementation.
// Records are JSON objects keyed by a storage-assigned numeric id, one secondary
// index per foreign key. The browser host backs this with IndexedDB.

use std::cell::RefCell;
use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::types::RecordId;

/// Logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreName {
    Highlights,
    PracticePlans,
    PracticePlanHighlights,
}

impl StoreName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::Highlights => "highlights",
            StoreName::PracticePlans => "practicePlans",
            StoreName::PracticePlanHighlights => "practicePlanHighlights",
        }
    }

    /// Secondary indexes, named after the record field they index.
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            StoreName::Highlights => &["documentId"],
            StoreName::PracticePlans => &["scoreId"],
            StoreName::PracticePlanHighlights => &["planId", "highlightId"],
        }
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indexes().contains(&index)
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    Put { store: StoreName, value: Value },
    Delete { store: StoreName, id: RecordId },
    DeleteByIndex { store: StoreName, index: String, key: Value },
}

/// Storage collaborator contract.
///
/// Methods take `&self`: the engine is single-threaded and implementations use
/// interior mutability, so one store can be shared by every component.
pub trait Storage {
    /// Insert or replace. A missing `id` field gets a fresh id, which is written into the record.
    fn put(&self, store: StoreName, value: Value) -> Result<RecordId>;

    fn get(&self, store: StoreName, id: RecordId) -> Result<Option<Value>>;

    fn get_all(&self, store: StoreName) -> Result<Vec<Value>>;

    fn get_by_index(&self, store: StoreName, index: &str, key: &Value) -> Result<Vec<Value>>;

    /// Deleting a missing id is not an error.
    fn delete(&self, store: StoreName, id: RecordId) -> Result<()>;

    /// Apply every op or none. Returns the number of records each op touched.
    fn apply_atomic(&self, ops: &[StorageOp]) -> Result<Vec<usize>>;
}

/// Read the `id` field of a stored record.
pub fn record_id_of(value: &Value) -> Option<RecordId> {
    value.get("id").and_then(Value::as_u64).map(RecordId::new)
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    stores: BTreeMap<StoreName, BTreeMap<u64, Value>>,
    next_id: BTreeMap<StoreName, u64>,
}

impl MemoryState {
    fn put(&mut self, store: StoreName, mut value: Value) -> Result<RecordId> {
        let object = value.as_object_mut().ok_or_else(|| {
            EngineError::Validation(format!("{} records must be objects", store.as_str()))
        })?;

        let next = self.next_id.entry(store).or_insert(1);
        let id = match object.get("id").and_then(Value::as_u64) {
            Some(existing) => {
                if existing >= *next {
                    *next = existing + 1;
                }
                existing
            }
            None => {
                let fresh = *next;
                *next += 1;
                object.insert("id".into(), Value::from(fresh));
                fresh
            }
        };

        self.stores.entry(store).or_default().insert(id, value);
        Ok(RecordId::new(id))
    }

    fn delete(&mut self, store: StoreName, id: RecordId) -> usize {
        self.stores
            .get_mut(&store)
            .and_then(|records| records.remove(&id.as_u64()))
            .map_or(0, |_| 1)
    }

    fn matching_ids(&self, store: StoreName, index: &str, key: &Value) -> Result<Vec<u64>> {
        if !store.has_index(index) {
            return Err(EngineError::Storage(format!(
                "store '{}' has no index '{}'",
                store.as_str(),
                index
            )));
        }
        Ok(self
            .stores
            .get(&store)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, value)| value.get(index) == Some(key))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply(&mut self, op: &StorageOp) -> Result<usize> {
        match op {
            StorageOp::Put { store, value } => self.put(*store, value.clone()).map(|_| 1),
            StorageOp::Delete { store, id } => Ok(self.delete(*store, *id)),
            StorageOp::DeleteByIndex { store, index, key } => {
                let ids = self.matching_ids(*store, index, key)?;
                for id in &ids {
                    self.delete(*store, RecordId::new(*id));
                }
                Ok(ids.len())
            }
        }
    }
}

/// In-memory storage. Used natively and as the default when no host store is attached.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RefCell<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, store: StoreName) -> usize {
        self.state
            .borrow()
            .stores
            .get(&store)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, store: StoreName) -> bool {
        self.len(store) == 0
    }
}

impl Storage for MemoryStorage {
    fn put(&self, store: StoreName, value: Value) -> Result<RecordId> {
        self.state.borrow_mut().put(store, value)
    }

    fn get(&self, store: StoreName, id: RecordId) -> Result<Option<Value>> {
        Ok(self
            .state
            .borrow()
            .stores
            .get(&store)
            .and_then(|records| records.get(&id.as_u64()))
            .cloned())
    }

    fn get_all(&self, store: StoreName) -> Result<Vec<Value>> {
        Ok(self
            .state
            .borrow()
            .stores
            .get(&store)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get_by_index(&self, store: StoreName, index: &str, key: &Value) -> Result<Vec<Value>> {
        let state = self.state.borrow();
        let ids = state.matching_ids(store, index, key)?;
        let records = state.stores.get(&store);
        Ok(ids
            .into_iter()
            .filter_map(|id| records.and_then(|r| r.get(&id)).cloned())
            .collect())
    }

    fn delete(&self, store: StoreName, id: RecordId) -> Result<()> {
        self.state.borrow_mut().delete(store, id);
        Ok(())
    }

    fn apply_atomic(&self, ops: &[StorageOp]) -> Result<Vec<usize>> {
        // Work on a copy; the live state is only replaced when every op succeeded.
        let mut staged = self.state.borrow().clone();
        let mut counts = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match staged.apply(op) {
                Ok(count) => counts.push(count),
                Err(err) => {
                    debug!("atomic batch aborted at op {index}: {err}");
                    return Err(err);
                }
            }
        }
        *self.state.borrow_mut() = staged;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_assigns_sequential_ids() {
        let storage = MemoryStorage::new();
        let a = storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();
        let b = storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();
        assert_eq!(a.as_u64(), 1);
        assert_eq!(b.as_u64(), 2);

        let stored = storage.get(StoreName::Highlights, a).unwrap().unwrap();
        assert_eq!(stored["id"], 1);
    }

    #[test]
    fn put_with_id_replaces() {
        let storage = MemoryStorage::new();
        let id = storage.put(StoreName::Highlights, json!({"page": 1})).unwrap();
        storage
            .put(StoreName::Highlights, json!({"id": id.as_u64(), "page": 4}))
            .unwrap();
        assert_eq!(storage.len(StoreName::Highlights), 1);
        let stored = storage.get(StoreName::Highlights, id).unwrap().unwrap();
        assert_eq!(stored["page"], 4);
    }

    #[test]
    fn rejects_non_object_records() {
        let storage = MemoryStorage::new();
        assert!(storage.put(StoreName::Highlights, json!(3)).is_err());
    }

    #[test]
    fn index_lookup_filters_by_field() {
        let storage = MemoryStorage::new();
        storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();
        storage.put(StoreName::Highlights, json!({"documentId": "b"})).unwrap();
        storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();

        let found = storage
            .get_by_index(StoreName::Highlights, "documentId", &json!("a"))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(storage
            .get_by_index(StoreName::Highlights, "color", &json!("red"))
            .is_err());
    }

    #[test]
    fn delete_is_idempotent() {
        let storage = MemoryStorage::new();
        let id = storage.put(StoreName::Highlights, json!({})).unwrap();
        storage.delete(StoreName::Highlights, id).unwrap();
        storage.delete(StoreName::Highlights, id).unwrap();
        assert!(storage.is_empty(StoreName::Highlights));
    }

    #[test]
    fn atomic_batch_rolls_back_on_failure() {
        let storage = MemoryStorage::new();
        let highlight = storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();
        storage
            .put(
                StoreName::PracticePlanHighlights,
                json!({"planId": 9, "highlightId": highlight.as_u64()}),
            )
            .unwrap();

        let ops = vec![
            StorageOp::Delete {
                store: StoreName::Highlights,
                id: highlight,
            },
            StorageOp::DeleteByIndex {
                store: StoreName::PracticePlanHighlights,
                index: "noSuchIndex".into(),
                key: json!(9),
            },
        ];
        assert!(storage.apply_atomic(&ops).is_err());
        assert_eq!(storage.len(StoreName::Highlights), 1);
        assert_eq!(storage.len(StoreName::PracticePlanHighlights), 1);
    }

    #[test]
    fn atomic_batch_applies_all_ops() {
        let storage = MemoryStorage::new();
        let highlight = storage.put(StoreName::Highlights, json!({"documentId": "a"})).unwrap();
        storage
            .put(StoreName::PracticePlanHighlights, json!({"planId": 9, "highlightId": 1}))
            .unwrap();
        storage
            .put(StoreName::PracticePlanHighlights, json!({"planId": 9, "highlightId": 2}))
            .unwrap();

        let counts = storage
            .apply_atomic(&[
                StorageOp::Delete {
                    store: StoreName::Highlights,
                    id: highlight,
                },
                StorageOp::DeleteByIndex {
                    store: StoreName::PracticePlanHighlights,
                    index: "planId".into(),
                    key: json!(9),
                },
            ])
            .unwrap();
        assert_eq!(counts, vec![1, 2]);
        assert!(storage.is_empty(StoreName::Highlights));
        assert!(storage.is_empty(StoreName::PracticePlanHighlights));
    }
}
