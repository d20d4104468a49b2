//! 🧠 In-memory store — a document database that fits in a `BTreeMap` and forgets on drop.
//!
//! 🎬 *[INT. HEAP — NIGHT. A Vec of documents waits patiently for a unique index to judge it.]*
//!
//! `InMemoryStore` implements the full [`DocumentStore`] contract: ordered batch inserts,
//! upserts with `$set` semantics, and unique indexes that actually reject duplicates.
//! Every attempted call is appended to an operation log, so tests can count writes
//! instead of guessing. ⚠️ Not for production. For tests, dry runs, and the `FileStore`
//! which borrows its brain from here.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use super::{DocumentStore, Namespace, StoreError};
use crate::record::{FieldValue, Record};

/// 📜 One attempted store call, exactly as the pipeline issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp<V> {
    InsertOne {
        namespace: Namespace,
        record: Record<V>,
    },
    InsertMany {
        namespace: Namespace,
        records: Vec<Record<V>>,
    },
    UpsertOne {
        namespace: Namespace,
        filter: Record<V>,
        update: Record<V>,
    },
    CreateUniqueIndex {
        namespace: Namespace,
        fields: Vec<String>,
    },
}

#[derive(Debug)]
struct Collection<V> {
    documents: Vec<Record<V>>,
    unique_indexes: Vec<Vec<String>>,
}

impl<V> Default for Collection<V> {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            unique_indexes: Vec::new(),
        }
    }
}

impl<V: FieldValue> Collection<V> {
    /// 🔍 The first unique index `candidate` would violate, skipping the document at `ignore`
    /// (the one being updated in place, which can't collide with itself).
    fn violated_index(&self, candidate: &Record<V>, ignore: Option<usize>) -> Option<&[String]> {
        self.unique_indexes
            .iter()
            .find(|fields| {
                self.documents
                    .iter()
                    .enumerate()
                    .filter(|(position, _)| Some(*position) != ignore)
                    .any(|(_, existing)| same_key(existing, candidate, fields))
            })
            .map(Vec::as_slice)
    }
}

/// 🔑 Two documents share a key when every indexed field is equal. Missing equals missing,
/// which is how MongoDB treats absent fields under a unique index too.
fn same_key<V: FieldValue>(left: &Record<V>, right: &Record<V>, fields: &[String]) -> bool {
    fields.iter().all(|field| left.get(field) == right.get(field))
}

#[derive(Debug)]
struct State<V> {
    collections: BTreeMap<Namespace, Collection<V>>,
    ops: Vec<StoreOp<V>>,
    failure: Option<String>,
}

impl<V: FieldValue> State<V> {
    fn check_failure(&self) -> Result<(), StoreError> {
        match &self.failure {
            Some(message) => Err(StoreError::Backend(anyhow!("{message}"))),
            None => Ok(()),
        }
    }

    fn insert(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), StoreError> {
        let collection = self.collections.entry(namespace.clone()).or_default();
        if let Some(fields) = collection.violated_index(&record, None) {
            return Err(duplicate(namespace, fields));
        }
        collection.documents.push(record);
        Ok(())
    }
}

fn duplicate(namespace: &Namespace, fields: &[String]) -> StoreError {
    StoreError::DuplicateKey {
        namespace: namespace.clone(),
        detail: format!("E11000 duplicate key error, index: {}", fields.join("_1_") + "_1"),
    }
}

/// 📦 A store that never forgets, until it's dropped.
///
/// Clone-able on purpose: the `Arc` means a test can keep a clone, hand the other to the
/// pipeline, and inspect what landed afterwards. Communist data, but in a good way.
#[derive(Debug, Clone)]
pub struct InMemoryStore<V> {
    state: Arc<Mutex<State<V>>>,
}

impl<V: FieldValue> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: FieldValue> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                collections: BTreeMap::new(),
                ops: Vec::new(),
                failure: None,
            })),
        }
    }

    /// 📋 Every call attempted so far, in order, including the ones that failed.
    pub async fn ops(&self) -> Vec<StoreOp<V>> {
        self.state.lock().await.ops.clone()
    }

    /// 📄 Documents currently stored in `namespace`, in insertion order.
    pub async fn documents(&self, namespace: &Namespace) -> Vec<Record<V>> {
        self.state
            .lock()
            .await
            .collections
            .get(namespace)
            .map(|collection| collection.documents.clone())
            .unwrap_or_default()
    }

    /// 🗂️ Every namespace that has been written to or indexed.
    pub async fn namespaces(&self) -> Vec<Namespace> {
        self.state.lock().await.collections.keys().cloned().collect()
    }

    /// 🔐 Unique indexes declared on `namespace`.
    pub async fn unique_indexes(&self, namespace: &Namespace) -> Vec<Vec<String>> {
        self.state
            .lock()
            .await
            .collections
            .get(namespace)
            .map(|collection| collection.unique_indexes.clone())
            .unwrap_or_default()
    }

    /// 🔥 Make every subsequent call fail with a backend error. For testing the sad path.
    pub async fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().await.failure = Some(message.into());
    }
}

#[async_trait]
impl<V: FieldValue> DocumentStore<V> for InMemoryStore<V> {
    async fn insert_one(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ops.push(StoreOp::InsertOne {
            namespace: namespace.clone(),
            record: record.clone(),
        });
        state.check_failure()?;
        state.insert(namespace, record)?;
        trace!("📥 stored one document in {namespace}");
        Ok(())
    }

    async fn insert_many(&mut self, namespace: &Namespace, records: Vec<Record<V>>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ops.push(StoreOp::InsertMany {
            namespace: namespace.clone(),
            records: records.clone(),
        });
        state.check_failure()?;
        let count = records.len();
        // -- 🚂 ordered insert: the first duplicate stops the train, earlier cars stay parked
        for record in records {
            state.insert(namespace, record)?;
        }
        trace!("📥 stored {count} documents in {namespace}");
        Ok(())
    }

    async fn upsert_one(
        &mut self,
        namespace: &Namespace,
        filter: Record<V>,
        update: Record<V>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ops.push(StoreOp::UpsertOne {
            namespace: namespace.clone(),
            filter: filter.clone(),
            update: update.clone(),
        });
        state.check_failure()?;

        let collection = state.collections.entry(namespace.clone()).or_default();
        match collection.documents.iter().position(|document| document.matches(&filter)) {
            Some(position) => {
                let mut updated = collection.documents[position].clone();
                for (field, value) in update {
                    updated.insert(field, value);
                }
                if let Some(fields) = collection.violated_index(&updated, Some(position)) {
                    return Err(duplicate(namespace, fields));
                }
                collection.documents[position] = updated;
                trace!("🔁 upsert matched an existing document in {namespace}");
            }
            None => {
                let mut inserted = filter;
                for (field, value) in update {
                    inserted.insert(field, value);
                }
                if let Some(fields) = collection.violated_index(&inserted, None) {
                    return Err(duplicate(namespace, fields));
                }
                collection.documents.push(inserted);
                trace!("🌱 upsert inserted a fresh document in {namespace}");
            }
        }
        Ok(())
    }

    async fn create_unique_index(&mut self, namespace: &Namespace, fields: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ops.push(StoreOp::CreateUniqueIndex {
            namespace: namespace.clone(),
            fields: fields.to_vec(),
        });
        state.check_failure()?;

        let collection = state.collections.entry(namespace.clone()).or_default();
        if collection.unique_indexes.iter().any(|existing| existing == fields) {
            return Ok(());
        }
        // -- 🕵️ existing data must already honor the constraint, or the index build fails
        let documents = &collection.documents;
        for (position, document) in documents.iter().enumerate() {
            if documents[..position]
                .iter()
                .any(|earlier| same_key(earlier, document, fields))
            {
                return Err(duplicate(namespace, fields));
            }
        }
        collection.unique_indexes.push(fields.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn doc(pairs: &[(&str, Value)]) -> Record<Value> {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[tokio::test]
    async fn the_one_where_a_unique_index_actually_says_no() -> anyhow::Result<()> {
        let mut store = InMemoryStore::new();
        let ns = Namespace::new("db", "items");
        store.create_unique_index(&ns, &["url".to_string()]).await?;

        store.insert_one(&ns, doc(&[("url", json!("a"))])).await?;
        let err = store
            .insert_one(&ns, doc(&[("url", json!("a")), ("extra", json!(1))]))
            .await
            .expect_err("second insert with the same url must be rejected");

        assert!(err.is_duplicate_key());
        assert_eq!(store.documents(&ns).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_insert_many_keeps_everything_before_the_duplicate() -> anyhow::Result<()> {
        let mut store = InMemoryStore::new();
        let ns = Namespace::new("db", "items");
        store.create_unique_index(&ns, &["id".to_string()]).await?;

        let batch = vec![
            doc(&[("id", json!(1))]),
            doc(&[("id", json!(2))]),
            doc(&[("id", json!(1))]),
            doc(&[("id", json!(3))]),
        ];
        let err = store.insert_many(&ns, batch).await.expect_err("id 1 repeats");

        assert!(err.is_duplicate_key());
        assert_eq!(store.documents(&ns).await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_upsert_sets_fields_on_the_match() -> anyhow::Result<()> {
        let mut store = InMemoryStore::new();
        let ns = Namespace::new("db", "items");
        let filter = doc(&[("sku", json!("X1"))]);

        store
            .upsert_one(&ns, filter.clone(), doc(&[("sku", json!("X1")), ("price", json!(10))]))
            .await?;
        store
            .upsert_one(&ns, filter, doc(&[("sku", json!("X1")), ("price", json!(12))]))
            .await?;

        let documents = store.documents(&ns).await;
        assert_eq!(documents, vec![doc(&[("sku", json!("X1")), ("price", json!(12))])]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_index_build_trips_over_existing_duplicates() -> anyhow::Result<()> {
        let mut store = InMemoryStore::new();
        let ns = Namespace::new("db", "items");
        store.insert_one(&ns, doc(&[("k", json!(1))])).await?;
        store.insert_one(&ns, doc(&[("k", json!(1))])).await?;

        let err = store
            .create_unique_index(&ns, &["k".to_string()])
            .await
            .expect_err("existing duplicates block the index");
        assert!(err.is_duplicate_key());
        assert!(store.unique_indexes(&ns).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_broken_store_reports_a_backend_error() {
        let mut store: InMemoryStore<Value> = InMemoryStore::new();
        store.fail_with("disk on fire").await;

        let err = store
            .insert_one(&Namespace::new("db", "items"), Record::new())
            .await
            .expect_err("store is broken");
        assert!(!err.is_duplicate_key());
        assert_eq!(store.ops().await.len(), 1, "failed attempts are still logged");
    }
}
