//! 🔐 Index manager — ensures the unique-key constraint exists, once per collection, lazily.
//!
//! Creating an index on every record would be like re-laminating your ID card every time
//! you show it. So the handle remembers, and we only knock on the store's door once.

use tracing::info;

use crate::record::FieldValue;
use crate::router::{CollectionHandle, IndexState};
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone)]
pub struct IndexManager {
    /// 🔑 Unique-key fields in order. Empty means plain-insert mode and nothing to ensure.
    fields: Vec<String>,
}

impl IndexManager {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// 🔐 Issue the constraint for `handle` if that hasn't happened yet.
    ///
    /// Returns `true` when a constraint was actually issued. On store failure the handle
    /// stays `NotEnsured`, so nothing pretends the index exists.
    pub async fn ensure<V, S>(&self, handle: &mut CollectionHandle, store: &mut S) -> Result<bool, StoreError>
    where
        V: FieldValue,
        S: DocumentStore<V> + ?Sized,
    {
        if self.fields.is_empty() || handle.index_state() == IndexState::Ensured {
            return Ok(false);
        }
        store.create_unique_index(handle.namespace(), &self.fields).await?;
        handle.mark_index_ensured();
        info!(
            "🔐 Ensuring unique index on ({}) for {}",
            self.fields.join(", "),
            handle.namespace()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Namespace, StoreOp};
    use serde_json::Value;

    #[tokio::test]
    async fn the_one_where_the_index_is_built_exactly_once() -> anyhow::Result<()> {
        let mut store: InMemoryStore<Value> = InMemoryStore::new();
        let manager = IndexManager::new(vec!["sku".into(), "url".into()]);
        let mut handle = CollectionHandle::new(Namespace::new("db", "items"));

        assert!(manager.ensure(&mut handle, &mut store).await?);
        for _ in 0..5 {
            assert!(!manager.ensure(&mut handle, &mut store).await?);
        }

        let ops = store.ops().await;
        assert_eq!(
            ops,
            vec![StoreOp::CreateUniqueIndex {
                namespace: Namespace::new("db", "items"),
                fields: vec!["sku".into(), "url".into()],
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_no_unique_key_means_no_index_business() -> anyhow::Result<()> {
        let mut store: InMemoryStore<Value> = InMemoryStore::new();
        let manager = IndexManager::new(Vec::new());
        let mut handle = CollectionHandle::new(Namespace::new("db", "items"));

        assert!(!manager.ensure(&mut handle, &mut store).await?);
        assert!(store.ops().await.is_empty());
        assert_eq!(handle.index_state(), IndexState::NotEnsured);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_build_leaves_the_door_open() {
        let mut store: InMemoryStore<Value> = InMemoryStore::new();
        store.fail_with("no index for you").await;
        let manager = IndexManager::new(vec!["sku".into()]);
        let mut handle = CollectionHandle::new(Namespace::new("db", "items"));

        assert!(manager.ensure(&mut handle, &mut store).await.is_err());
        assert_eq!(handle.index_state(), IndexState::NotEnsured);
    }
}
