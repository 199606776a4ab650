use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DataSet, Fields, Filter, MutableDataSet, MutableRecord, Record, no_match};
use crate::error::{Error, Result};

/// Name of the key field [`MemorySet`] assigns to every record.
pub const KEY: &str = "id";

#[derive(Debug, Default)]
struct Store {
    last_id: i64,
    rows: BTreeMap<i64, Fields>,
}

/// A thread-safe, in-memory mutable data set.
///
/// Records are keyed by an integer `id` assigned on [`add`](MutableDataSet::add)
/// and iterate in key order. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemorySet {
    store: Arc<RwLock<Store>>,
}

impl MemorySet {
    pub fn new() -> Self { Self::default() }

    /// A handle on the record with key `id`. The record is read lazily, so
    /// the handle may name a record that doesn't exist (yet).
    pub fn record(&self, id: i64) -> MemoryRecord {
        MemoryRecord { store: Arc::clone(&self.store), id }
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DataSet for MemorySet {
    async fn records(&self) -> Result<Vec<Fields>> {
        Ok(self.store.read().await.rows.values().cloned().collect())
    }
}

#[async_trait]
impl MutableDataSet for MemorySet {
    async fn add(&self, mut fields: Fields) -> Result<Fields> {
        let mut store = self.store.write().await;
        store.last_id += 1;
        let id = store.last_id;
        fields.insert(KEY.to_owned(), Value::from(id));
        store.rows.insert(id, fields);

        let mut key = Fields::new();
        key.insert(KEY.to_owned(), Value::from(id));
        Ok(key)
    }

    async fn fetch_mut(&self, filter: &Filter) -> Result<Box<dyn MutableRecord>> {
        let store = self.store.read().await;
        let id = store
            .rows
            .iter()
            .find(|(_, fields)| filter.check(fields))
            .map(|(id, _)| *id)
            .ok_or_else(no_match)?;
        Ok(Box::new(self.record(id)))
    }
}

/// A record of a [`MemorySet`].
#[derive(Clone, Debug)]
pub struct MemoryRecord {
    store: Arc<RwLock<Store>>,
    id: i64,
}

impl MemoryRecord {
    pub fn id(&self) -> i64 { self.id }

    fn gone(&self) -> Error {
        Error::Lookup(format!("record {} does not exist", self.id))
    }
}

#[async_trait]
impl Record for MemoryRecord {
    async fn read(&self) -> Result<Fields> {
        let store = self.store.read().await;
        store.rows.get(&self.id).cloned().ok_or_else(|| self.gone())
    }
}

#[async_trait]
impl MutableRecord for MemoryRecord {
    /// The key field survives every patch, replacing ones included.
    async fn patch(&self, add: Fields, remove: &[String], replace: bool) -> Result<()> {
        let mut store = self.store.write().await;
        let row = store.rows.get_mut(&self.id).ok_or_else(|| self.gone())?;
        if replace {
            row.clear();
        }
        for name in remove {
            row.remove(name);
        }
        row.extend(add);
        row.insert(KEY.to_owned(), Value::from(self.id));
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let mut store = self.store.write().await;
        store.rows.remove(&self.id).map(drop).ok_or_else(|| self.gone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn add_assigns_increasing_keys() {
        let set = MemorySet::new();
        assert_eq!(set.add(fields(json!({"title": "a"}))).await.unwrap(), fields(json!({"id": 1})));
        assert_eq!(set.add(fields(json!({"title": "b", "id": 99}))).await.unwrap(), fields(json!({"id": 2})));
        assert_eq!(set.read_all().await.unwrap(), json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]));
    }

    #[tokio::test]
    async fn patch_keeps_key() {
        let set = MemorySet::new();
        set.add(fields(json!({"title": "a", "done": false}))).await.unwrap();
        let record = set.fetch_mut(&Filter::new().eq("id", 1)).await.unwrap();

        record.update(fields(json!({"done": true}))).await.unwrap();
        assert_eq!(record.read().await.unwrap(), fields(json!({"id": 1, "title": "a", "done": true})));

        record.patch(fields(json!({"title": "b"})), &[], true).await.unwrap();
        assert_eq!(record.read().await.unwrap(), fields(json!({"id": 1, "title": "b"})));

        record.remove_field("title").await.unwrap();
        assert_eq!(record.read().await.unwrap(), fields(json!({"id": 1})));
    }

    #[tokio::test]
    async fn deleted_record_is_gone() {
        let set = MemorySet::new();
        set.add(Fields::new()).await.unwrap();
        let record = set.record(1);
        record.delete().await.unwrap();
        assert!(matches!(record.read().await, Err(Error::Lookup(_))));
        assert!(matches!(record.delete().await, Err(Error::Lookup(_))));
        assert!(set.is_empty().await);
    }
}
