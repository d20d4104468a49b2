//! 🍃 The pipeline — where records come in, get shaped, maybe wait, and eventually land.
//!
//! 🎬 *[a producer hands over a record and a source name. it wants the record back, cleaned up.]*
//! *[it does not want to hear about batches, indexes, or duplicate keys. it has its own problems.]*
//!
//! ```text
//!   submit(record, source)
//!      │  shape: drop blanks, maybe stamp
//!      ▼
//!   buffer? ──no──► route(source) ─► insert_one ─┐
//!      │yes                                      │
//!      ▼                                         ▼
//!   push ── full? ──► route per source ─► insert_many ─► settle ─► breaker ─► host.stop?
//!      │not yet
//!      ▼
//!   return shaped record   (always; the write outcome is not the producer's business)
//!
//!   close() ─► flush leftovers ─► store.close()
//! ```
//!
//! 🧠 Knowledge graph:
//! - One owner, `&mut self` everywhere: buffer, breaker and index state need no locks.
//! - The config is resolved once and only read afterwards.
//! - `close()` is idempotent-ish: the second call is an error, not a second flush.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::breaker::DuplicateBreaker;
use crate::buffer::{Pending, RecordBuffer, group_by_key};
use crate::config::{self, PipelineConfig, Settings};
use crate::error::PipelineError;
use crate::host::HostControl;
use crate::index::IndexManager;
use crate::insertion::{Inserter, PipelineStats};
use crate::record::{FieldValue, Record};
use crate::router::CollectionRouter;
use crate::store::{DocumentStore, Namespace};

/// ⏱️ Field added to every record when `append_timestamp` is on.
pub const TIMESTAMP_FIELD: &str = "mongosink";

#[derive(Debug)]
pub struct Pipeline<V: FieldValue, S: DocumentStore<V>> {
    config: PipelineConfig,
    router: CollectionRouter,
    buffer: Option<RecordBuffer<V>>,
    inserter: Inserter<V, S>,
    closed: bool,
}

impl<V, S> Pipeline<V, S>
where
    V: FieldValue,
    S: DocumentStore<V>,
{
    /// 🚀 Open a pipeline from an already-resolved configuration.
    pub fn open(config: PipelineConfig, store: S, host: Arc<dyn HostControl>) -> Self {
        let router = CollectionRouter::new(
            config.database.clone(),
            config.collection.clone(),
            config.separate_collections,
        );
        let index = IndexManager::new(
            config
                .unique_key_fields()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let breaker = DuplicateBreaker::new(config.stop_on_duplicate);
        let buffer = config.buffer.map(RecordBuffer::new);

        info!(
            "🔌 Connected to {}, using database \"{}\"{}",
            config.uri,
            config.database,
            config
                .replica_set
                .as_ref()
                .map(|set| format!(" (replica set \"{set}\")"))
                .unwrap_or_default()
        );
        debug!("🔧 Pipeline configuration: {config:?}");

        Self {
            config,
            router,
            buffer,
            inserter: Inserter::new(store, index, breaker, host),
            closed: false,
        }
    }

    /// 🧮 Resolve `overrides` onto `defaults`, then open. Config errors surface before any
    /// record has a chance to move.
    pub fn from_settings(
        defaults: &PipelineConfig,
        overrides: &Settings,
        store: S,
        host: Arc<dyn HostControl>,
    ) -> Result<Self, PipelineError> {
        let config = config::resolve(defaults, overrides)?;
        Ok(Self::open(config, store, host))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        self.inserter.stats()
    }

    pub fn store(&self) -> &S {
        self.inserter.store()
    }

    /// 🪣 Records currently waiting for a batch write.
    pub fn pending(&self) -> usize {
        self.buffer.as_ref().map_or(0, RecordBuffer::len)
    }

    /// 📥 Accept one record from `source_name` and return it shaped.
    ///
    /// Duplicate-key rejections never make this fail. Fatal store errors do, and so does a
    /// record missing its unique key (that one is non-fatal, see [`PipelineError::is_fatal`]).
    pub async fn submit(&mut self, record: Record<V>, source_name: &str) -> Result<Record<V>, PipelineError> {
        if self.closed {
            return Err(PipelineError::Closed);
        }
        let shaped = self.shape(record);
        self.inserter.stats_mut().submitted += 1;

        let full_batch = match self.buffer.as_mut() {
            Some(buffer) => buffer.push(source_name, shaped.clone()),
            None => {
                let handle = self.router.route(source_name);
                self.inserter.insert_one(handle, shaped.clone()).await?;
                None
            }
        };
        if let Some(batch) = full_batch {
            self.write_batch(batch).await?;
        }

        Ok(shaped)
    }

    /// 🏁 Flush what's left in the buffer, close the store, and report the tallies.
    ///
    /// The store is closed even when the flush fails; the flush error is the one returned.
    pub async fn close(&mut self) -> Result<PipelineStats, PipelineError> {
        if self.closed {
            return Err(PipelineError::Closed);
        }
        self.closed = true;

        let leftovers = self.buffer.as_mut().map(RecordBuffer::take).unwrap_or_default();
        let flushed = if leftovers.is_empty() {
            Ok(())
        } else {
            debug!("🪣 Flushing {} buffered record(s) on close", leftovers.len());
            self.write_batch(leftovers).await
        };

        let namespace = Namespace::new(self.config.database.clone(), self.config.collection.clone());
        let store_closed = self
            .inserter
            .store_mut()
            .close()
            .await
            .map_err(|source| PipelineError::Store { namespace, source });
        if let (Err(_), Err(close_err)) = (&flushed, &store_closed) {
            warn!("⚠️ The store also failed to close after a failed flush: {close_err}");
        }
        flushed?;
        store_closed?;

        let stats = self.inserter.stats().clone();
        info!(
            "🏁 Pipeline closed: {} submitted, {} written, {} duplicate(s)",
            stats.submitted, stats.records_written, stats.duplicates
        );
        Ok(stats)
    }

    /// 🧹 Drop blank fields, then stamp if asked to.
    fn shape(&self, record: Record<V>) -> Record<V> {
        let mut shaped = record.without_blanks();
        if self.config.append_timestamp {
            shaped.insert(TIMESTAMP_FIELD, V::timestamp(SystemTime::now()));
        }
        shaped
    }

    /// 📦 One batch write per target collection. Without separate collections everything
    /// routes to the default handle, so that's a single write.
    async fn write_batch(&mut self, batch: Vec<Pending<V>>) -> Result<(), PipelineError> {
        let separate = self.config.separate_collections;
        let default_collection = &self.config.collection;
        let groups = group_by_key(batch, |pending| {
            if separate {
                pending.source_name.clone()
            } else {
                default_collection.clone()
            }
        });

        for (source_name, records) in groups {
            let handle = self.router.route(&source_name);
            self.inserter.insert_many(handle, records).await?;
        }
        Ok(())
    }
}
