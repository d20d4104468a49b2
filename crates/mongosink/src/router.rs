//! 🧭 Collection router — "which drawer does this record go in?"
//!
//! Two modes, one question:
//! - **single collection**: every source name lands in the default collection's handle,
//!   created once at open. The source name is politely ignored.
//! - **separate collections**: each source name gets a collection named exactly like it,
//!   created on first sight and cached forever after. A source that happens to share the
//!   default collection's name gets that one handle too, never a twin.
//!
//! Handles also carry the per-collection index state, so "was the unique index ensured
//! here?" is answered by the handle itself, not by a pipeline-wide boolean. 🦆

use std::collections::HashMap;

use crate::store::Namespace;

/// 🔐 Has the uniqueness constraint been issued for this collection yet?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexState {
    #[default]
    NotEnsured,
    Ensured,
}

/// 📍 A physical destination plus its index bookkeeping. Owned by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    namespace: Namespace,
    index_state: IndexState,
}

impl CollectionHandle {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            index_state: IndexState::NotEnsured,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn index_state(&self) -> IndexState {
        self.index_state
    }

    /// ✅ One-way door: `NotEnsured → Ensured`, never back.
    pub(crate) fn mark_index_ensured(&mut self) {
        self.index_state = IndexState::Ensured;
    }
}

/// 🧭 Maps source names to cached collection handles, one handle per collection.
#[derive(Debug)]
pub struct CollectionRouter {
    database: String,
    default_collection: String,
    separate_collections: bool,
    handles: HashMap<String, CollectionHandle>,
}

impl CollectionRouter {
    pub fn new(database: impl Into<String>, default_collection: impl Into<String>, separate_collections: bool) -> Self {
        let mut router = Self {
            database: database.into(),
            default_collection: default_collection.into(),
            separate_collections,
            handles: HashMap::new(),
        };
        if !separate_collections {
            let default_collection = router.default_collection.clone();
            router.route(&default_collection);
        }
        router
    }

    /// 🎯 The handle for `source_name`. Lookups are idempotent: the same collection always
    /// gets the same handle, and a handle is created at most once.
    pub fn route(&mut self, source_name: &str) -> &mut CollectionHandle {
        let collection = if self.separate_collections {
            source_name
        } else {
            self.default_collection.as_str()
        };
        let database = &self.database;
        self.handles
            .entry(collection.to_string())
            .or_insert_with(|| CollectionHandle::new(Namespace::new(database.clone(), collection)))
    }
}
