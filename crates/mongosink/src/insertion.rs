//! 💾 Insertion engine — turns "write this" into the right store call and sorts the outcome.
//!
//! ```text
//!   insert_one ─┬─ no unique key ──► store.insert_one
//!               └─ unique key ─────► store.upsert_one(filter = key fields, $set = record)
//!
//!   insert_many ┬─ no unique key ──► store.insert_many
//!               └─ unique key ─────► ⚠️ one upsert per record (fallback, not a feature)
//!
//!   outcome ────┬─ Ok ─────────────► debug!, count it
//!               ├─ DuplicateKey ───► debug!, breaker.observe(), maybe host.stop()
//!               └─ anything else ──► PipelineError::Store (fatal)
//! ```
//!
//! Index assurance runs right before the first write to each handle. The handle remembers.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::breaker::{DUPLICATE_STOP_REASON, DuplicateBreaker, Verdict};
use crate::error::PipelineError;
use crate::host::HostControl;
use crate::index::IndexManager;
use crate::record::{FieldValue, Record};
use crate::router::CollectionHandle;
use crate::store::{DocumentStore, Namespace, StoreError};

/// 📊 Running tallies for one pipeline. Purely informational; nothing branches on these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// 📥 records handed to `submit`
    pub submitted: u64,
    /// 💾 records in writes the store acknowledged
    pub records_written: u64,
    /// 🎯 single-record insert calls
    pub single_writes: u64,
    /// 📦 batch insert calls
    pub batch_writes: u64,
    /// 🔁 upsert calls
    pub upserts: u64,
    /// 🚫 duplicate-key rejections observed
    pub duplicates: u64,
    /// 🔐 unique indexes issued
    pub indexes_ensured: u64,
    /// 🛑 true once the duplicate breaker asked the host to stop
    pub stop_requested: bool,
}

#[derive(Debug)]
pub struct Inserter<V: FieldValue, S: DocumentStore<V>> {
    store: S,
    index: IndexManager,
    breaker: DuplicateBreaker,
    host: Arc<dyn HostControl>,
    stats: PipelineStats,
    _values: PhantomData<V>,
}

impl<V, S> Inserter<V, S>
where
    V: FieldValue,
    S: DocumentStore<V>,
{
    pub fn new(store: S, index: IndexManager, breaker: DuplicateBreaker, host: Arc<dyn HostControl>) -> Self {
        Self {
            store,
            index,
            breaker,
            host,
            stats: PipelineStats::default(),
            _values: PhantomData,
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PipelineStats {
        &mut self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn upsert_mode(&self) -> bool {
        !self.index.fields().is_empty()
    }

    /// 🎯 Write one record: plain insert, or upsert-by-key when a unique key is configured.
    pub async fn insert_one(
        &mut self,
        handle: &mut CollectionHandle,
        record: Record<V>,
    ) -> Result<(), PipelineError> {
        self.prepare(handle).await?;
        if self.upsert_mode() {
            return self.upsert(handle.namespace(), record).await;
        }
        self.stats.single_writes += 1;
        let outcome = self.store.insert_one(handle.namespace(), record).await;
        self.settle(handle.namespace(), outcome, 1)
    }

    /// 📦 Write a batch in one store call. In unique-key mode this degrades to one upsert per
    /// record; a record missing its key is skipped with a warning instead of sinking the batch.
    pub async fn insert_many(
        &mut self,
        handle: &mut CollectionHandle,
        records: Vec<Record<V>>,
    ) -> Result<(), PipelineError> {
        if records.is_empty() {
            return Ok(());
        }
        self.prepare(handle).await?;

        if self.upsert_mode() {
            warn!(
                "⚠️ Buffered batch of {} conflicts with unique_key, inserting records one by one",
                records.len()
            );
            for record in records {
                match self.upsert(handle.namespace(), record).await {
                    Ok(()) => {}
                    Err(err) if !err.is_fatal() => warn!("⚠️ Skipping record in fallback: {err}"),
                    Err(err) => return Err(err),
                }
            }
            return Ok(());
        }

        self.stats.batch_writes += 1;
        let count = records.len() as u64;
        let outcome = self.store.insert_many(handle.namespace(), records).await;
        self.settle(handle.namespace(), outcome, count)
    }

    async fn prepare(&mut self, handle: &mut CollectionHandle) -> Result<(), PipelineError> {
        let issued = self
            .index
            .ensure(handle, &mut self.store)
            .await
            .map_err(|source| PipelineError::Index {
                namespace: handle.namespace().clone(),
                source,
            })?;
        if issued {
            self.stats.indexes_ensured += 1;
        }
        Ok(())
    }

    async fn upsert(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), PipelineError> {
        let filter = record
            .project(self.index.fields().iter().map(String::as_str))
            .map_err(|field| PipelineError::MissingUniqueKey {
                namespace: namespace.clone(),
                field: field.to_string(),
            })?;
        self.stats.upserts += 1;
        let outcome = self.store.upsert_one(namespace, filter, record).await;
        self.settle(namespace, outcome, 1)
    }

    /// ⚖️ Sort a store outcome into "fine", "duplicate, counted" or "fatal".
    /// Duplicates are not errors here: they are tallied and fed to the breaker.
    fn settle(
        &mut self,
        namespace: &Namespace,
        outcome: Result<(), StoreError>,
        records: u64,
    ) -> Result<(), PipelineError> {
        match outcome {
            Ok(()) => {
                self.stats.records_written += records;
                debug!("💾 Stored {records} item(s) in {namespace}");
                Ok(())
            }
            Err(StoreError::DuplicateKey { detail, .. }) => {
                self.stats.duplicates += 1;
                debug!("🔁 Duplicate key found in {namespace}: {detail}");
                if self.breaker.observe() == Verdict::Trip {
                    self.stats.stop_requested = true;
                    self.host.stop(DUPLICATE_STOP_REASON);
                }
                Ok(())
            }
            Err(source) => Err(PipelineError::Store {
                namespace: namespace.clone(),
                source,
            }),
        }
    }
}
