//! 💀 Pipeline errors — the short list of ways `submit` and `close` can ruin your day.
//!
//! | variant | fatal? | what happened |
//! |---|---|---|
//! | `Config` | yes | options contradicted each other before anything ran |
//! | `Index` | yes | the store refused the unique-key constraint |
//! | `Store` | yes | a write failed for a reason other than a duplicate key |
//! | `MissingUniqueKey` | no | one record can't be upserted; the rest of the run is fine |
//! | `Closed` | yes | somebody submitted after `close()` |
//!
//! Duplicate-key rejections are NOT here. They're counted, logged, and swallowed.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::{Namespace, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not ensure the unique index on {namespace}")]
    Index {
        namespace: Namespace,
        #[source]
        source: StoreError,
    },

    #[error("write to {namespace} failed")]
    Store {
        namespace: Namespace,
        #[source]
        source: StoreError,
    },

    #[error("record has no '{field}' field, so it cannot be upserted into {namespace}")]
    MissingUniqueKey { namespace: Namespace, field: String },

    #[error("the pipeline is already closed")]
    Closed,
}

impl PipelineError {
    /// 🚦 Should the host end the run over this?
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::MissingUniqueKey { .. })
    }
}
