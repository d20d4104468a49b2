//! 📂 File store — the in-memory brain, plus a filing cabinet of NDJSON files.
//!
//! Layout on disk, one file per collection:
//!
//! ```text
//! <root_dir>/<database>/<collection>.ndjson
//! ```
//!
//! Constraint enforcement is delegated to [`InMemoryStore`], so both backends agree on what
//! a duplicate is. Files are written as full snapshots: on `close()` for every collection,
//! and after every write to the touched collection when `fsync` is on (followed by a
//! `sync_all`, because "durable" should mean the platters heard about it). 🦆

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::in_mem::InMemoryStore;
use super::{DocumentStore, Namespace, StoreError};
use crate::config::ConnectOptions;
use crate::record::{FieldValue, Record};

/// 📂 Where the NDJSON snapshots go.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    pub root_dir: PathBuf,
}

/// 🗄️ NDJSON-on-disk document store.
#[derive(Debug)]
pub struct FileStore<V: FieldValue> {
    inner: InMemoryStore<V>,
    root_dir: PathBuf,
    fsync: bool,
}

impl<V> FileStore<V>
where
    V: FieldValue + Serialize,
{
    /// 🚀 Create the root directory (if needed) and get ready to hoard documents.
    pub async fn open(config: FileStoreConfig, options: &ConnectOptions) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root_dir).await.with_context(|| {
            format!(
                "💀 The store directory '{}' refused to exist. We asked nicely. \
                 Check the parent path and its permissions.",
                config.root_dir.display()
            )
        })?;
        info!(
            "📂 File store ready at '{}', standing in for {options}",
            config.root_dir.display()
        );
        Ok(Self {
            inner: InMemoryStore::new(),
            root_dir: config.root_dir,
            fsync: options.fsync,
        })
    }

    /// 📍 `<root_dir>/<database>/<collection>.ndjson`
    ///
    /// 💀 Names that could climb out of `root_dir` are refused, not encoded.
    pub fn collection_path(&self, namespace: &Namespace) -> Result<PathBuf, StoreError> {
        let database = path_segment(&namespace.database, "database")?;
        let collection = path_segment(&namespace.collection, "collection")?;
        Ok(self.root_dir.join(database).join(format!("{collection}.ndjson")))
    }

    async fn write_snapshot(&self, namespace: &Namespace) -> Result<(), StoreError> {
        let path = self.collection_path(namespace)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("💀 Could not create database directory '{}'", parent.display()))?;
        }
        let documents = self.inner.documents(namespace).await;
        write_ndjson(&path, &documents, self.fsync).await?;
        debug!("💾 wrote {} documents to '{}'", documents.len(), path.display());
        Ok(())
    }

    /// 🔁 Run a write, then snapshot the collection if we promised durability per write.
    /// The snapshot happens even when the write was a duplicate: an ordered batch may have
    /// stored a prefix before tripping.
    async fn durable(&self, namespace: &Namespace, outcome: Result<(), StoreError>) -> Result<(), StoreError> {
        if self.fsync {
            self.write_snapshot(namespace).await?;
        }
        outcome
    }
}

/// 🚧 One directory level, no more: no separators, no NUL, nothing hidden, no `..`.
fn path_segment<'a>(name: &'a str, what: &str) -> Result<&'a str, StoreError> {
    let sneaky = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if sneaky {
        return Err(StoreError::Backend(anyhow::anyhow!(
            "💀 The {what} name '{}' would not stay inside the store directory. Refusing to write it.",
            name.escape_debug()
        )));
    }
    Ok(name)
}

async fn write_ndjson<V: Serialize>(path: &Path, documents: &[Record<V>], sync: bool) -> anyhow::Result<()> {
    let file = File::create(path)
        .await
        .with_context(|| format!("💀 The collection file '{}' could not be conjured into existence", path.display()))?;
    let mut writer = BufWriter::new(file);
    for document in documents {
        let mut line = serde_json::to_vec(document).context("💀 A document refused to become JSON")?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }
    writer
        .flush()
        .await
        .with_context(|| format!("💀 Flushing '{}' failed. The bytes are still in memory, weeping", path.display()))?;
    if sync {
        writer.get_ref().sync_all().await?;
    }
    Ok(())
}

#[async_trait]
impl<V> DocumentStore<V> for FileStore<V>
where
    V: FieldValue + Serialize,
{
    async fn insert_one(&mut self, namespace: &Namespace, record: Record<V>) -> Result<(), StoreError> {
        self.collection_path(namespace)?;
        let outcome = self.inner.insert_one(namespace, record).await;
        self.durable(namespace, outcome).await
    }

    async fn insert_many(&mut self, namespace: &Namespace, records: Vec<Record<V>>) -> Result<(), StoreError> {
        self.collection_path(namespace)?;
        let outcome = self.inner.insert_many(namespace, records).await;
        self.durable(namespace, outcome).await
    }

    async fn upsert_one(
        &mut self,
        namespace: &Namespace,
        filter: Record<V>,
        update: Record<V>,
    ) -> Result<(), StoreError> {
        self.collection_path(namespace)?;
        let outcome = self.inner.upsert_one(namespace, filter, update).await;
        self.durable(namespace, outcome).await
    }

    async fn create_unique_index(&mut self, namespace: &Namespace, fields: &[String]) -> Result<(), StoreError> {
        self.collection_path(namespace)?;
        self.inner.create_unique_index(namespace, fields).await
    }

    /// 🗑️ Snapshot every collection. The curtain call. Without it, non-fsync runs leave nothing behind.
    async fn close(&mut self) -> Result<(), StoreError> {
        for namespace in self.inner.namespaces().await {
            self.write_snapshot(&namespace).await?;
        }
        info!("🏁 File store closed, snapshots written under '{}'", self.root_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use serde_json::{Value, json};

    fn options(fsync: bool) -> ConnectOptions {
        PipelineConfig {
            fsync,
            ..PipelineConfig::default()
        }
        .connect_options()
    }

    #[tokio::test]
    async fn the_one_where_close_leaves_an_ndjson_file_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = FileStoreConfig {
            root_dir: dir.path().to_path_buf(),
        };
        let mut store: FileStore<Value> = FileStore::open(config, &options(false)).await?;
        let ns = Namespace::new("shop", "items");

        let record: Record<Value> = [("name", json!("lamp")), ("price", json!(12))].into_iter().collect();
        store.insert_one(&ns, record).await?;
        assert!(!store.collection_path(&ns)?.exists(), "no fsync, no file until close");

        store.close().await?;
        let contents = std::fs::read_to_string(dir.path().join("shop").join("items.ndjson"))?;
        assert_eq!(contents, "{\"name\":\"lamp\",\"price\":12}\n");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_fsync_writes_after_every_single_write() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = FileStoreConfig {
            root_dir: dir.path().to_path_buf(),
        };
        let mut store: FileStore<Value> = FileStore::open(config, &options(true)).await?;
        let ns = Namespace::new("shop", "items");

        store
            .insert_many(&ns, vec![[("n", json!(1))].into_iter().collect(), [("n", json!(2))].into_iter().collect()])
            .await?;

        let contents = std::fs::read_to_string(store.collection_path(&ns)?)?;
        assert_eq!(contents.lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_sneaky_names_never_leave_the_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("root");
        let config = FileStoreConfig { root_dir: root.clone() };
        let mut store: FileStore<Value> = FileStore::open(config, &options(true)).await?;

        for ns in [
            Namespace::new("mongosink", "../../escaped"),
            Namespace::new("mongosink", "nested/escaped"),
            Namespace::new("..", "escaped"),
            Namespace::new("mongosink", ".hidden"),
        ] {
            let record: Record<Value> = [("n", json!(1))].into_iter().collect();
            let err = store
                .insert_one(&ns, record)
                .await
                .expect_err("a name with a path in it is not a collection name");
            assert!(matches!(err, StoreError::Backend(_)), "refused, not a duplicate: {err:?}");
        }
        store.close().await?;

        assert!(!dir.path().join("escaped.ndjson").exists());
        assert!(!root.join("escaped.ndjson").exists());
        assert!(!root.join("mongosink").join("nested").exists());
        Ok(())
    }
}
