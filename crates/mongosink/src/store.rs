//! 🗄️ Store — the narrow door between the pipeline and wherever documents actually live.
//!
//! 🎬 *[the pipeline knocks. the store answers with one of three moods:]*
//! *["ok", "duplicate key", or "something is on fire". the pipeline only negotiates with the first two.]*
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (`InMemoryStore`, `FileStore`) → `StoreBackend` enum
//!   that dispatches via match. Same shape as every other backend seam in this crate.
//! - The store does I/O and constraint enforcement. Batching, routing, dedup policy and
//!   the duplicate breaker all live upstream in the pipeline. Stores don't have opinions.
//! - [`StoreError::DuplicateKey`] is the one failure the pipeline recovers from.
//!   Everything else is [`StoreError::Backend`] and ends the run.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::ConnectOptions;
use crate::record::{FieldValue, Record};

mod file;
mod in_mem;

pub use file::{FileStore, FileStoreConfig};
pub use in_mem::{InMemoryStore, StoreOp};

/// 📍 One physical destination: a collection inside a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// 💀 How a store write can go wrong, sorted by whether anyone should care.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 🔁 A uniqueness constraint said no. Expected, counted, survived.
    #[error("duplicate key in {namespace}: {detail}")]
    DuplicateKey { namespace: Namespace, detail: String },

    /// 🔥 Anything else: disk, permissions, a driver having a day. Fatal to the run.
    #[error("store backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

/// 🚪 The store driver interface the pipeline writes through.
///
/// # Contract 📜
/// - Every write reports a uniqueness violation as [`StoreError::DuplicateKey`], never as
///   a generic backend error. The duplicate breaker depends on telling them apart.
/// - `insert_many` is ordered: records before the offending one are kept, the rest are not.
/// - `upsert_one` sets every field of `update` on the first document matching `filter`,
///   or inserts `filter` + `update` as a new document when nothing matches.
/// - `close` persists whatever the backend still holds. MUST be called. Skipping it is rude.
#[async_trait]
pub trait DocumentStore<V: FieldValue>: fmt::Debug + Send {
    async fn insert_one(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), StoreError>;

    async fn insert_many(&mut self, namespace: &Namespace, records: Vec<Record<V>>) -> Result<(), StoreError>;

    async fn upsert_one(
        &mut self,
        namespace: &Namespace,
        filter: Record<V>,
        update: Record<V>,
    ) -> Result<(), StoreError>;

    /// 🔐 One constraint over all `fields` jointly, in the order given.
    async fn create_unique_index(&mut self, namespace: &Namespace, fields: &[String]) -> Result<(), StoreError>;

    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 🎛️ Which store backend to open. Externally tagged so TOML reads `[store.File]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub enum StoreConfig {
    #[default]
    InMemory,
    File(FileStoreConfig),
}

/// 🎭 The many faces of a store. Dispatch by match, keep callers blissfully ignorant.
#[derive(Debug)]
pub enum StoreBackend<V: FieldValue> {
    InMemory(InMemoryStore<V>),
    File(FileStore<V>),
}

impl<V> StoreBackend<V>
where
    V: FieldValue + Serialize,
{
    /// 🔌 Open the configured backend with the pipeline's connection options.
    pub async fn open(config: &StoreConfig, options: &ConnectOptions) -> Result<Self, StoreError> {
        match config {
            StoreConfig::InMemory => {
                info!("🧠 In-memory store ready, standing in for {options}. Nothing outlives the run.");
                Ok(StoreBackend::InMemory(InMemoryStore::new()))
            }
            StoreConfig::File(file_config) => Ok(StoreBackend::File(FileStore::open(file_config.clone(), options).await?)),
        }
    }
}

#[async_trait]
impl<V> DocumentStore<V> for StoreBackend<V>
where
    V: FieldValue + Serialize,
{
    async fn insert_one(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.insert_one(namespace, record).await,
            StoreBackend::File(store) => store.insert_one(namespace, record).await,
        }
    }

    async fn insert_many(&mut self, namespace: &Namespace, records: Vec<Record<V>>) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.insert_many(namespace, records).await,
            StoreBackend::File(store) => store.insert_many(namespace, records).await,
        }
    }

    async fn upsert_one(
        &mut self,
        namespace: &Namespace,
        filter: Record<V>,
        update: Record<V>,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.upsert_one(namespace, filter, update).await,
            StoreBackend::File(store) => store.upsert_one(namespace, filter, update).await,
        }
    }

    async fn create_unique_index(&mut self, namespace: &Namespace, fields: &[String]) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.create_unique_index(namespace, fields).await,
            StoreBackend::File(store) => store.create_unique_index(namespace, fields).await,
        }
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.close().await,
            StoreBackend::File(store) => store.close().await,
        }
    }
}
