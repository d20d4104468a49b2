//! 🍃 mongosink — a buffered, deduplicating insertion sink for document stores.
//!
//! The library half is the [`pipeline::Pipeline`]: hand it records, it shapes them, batches
//! them, upserts or inserts them, and pulls the alarm on the host when duplicates pile up.
//! The runner half ([`run`]) wires that pipeline between an NDJSON file and a store backend.
//!
//! 🧠 Knowledge graph:
//! ```text
//!   config ──► pipeline ──► router ──► index ──► insertion ──► store
//!                 │                                  │
//!                 └── buffer                         └── breaker ──► host
//! ```

pub mod app_config;
pub mod breaker;
pub mod buffer;
pub mod config;
pub mod error;
pub mod host;
pub mod index;
pub mod insertion;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod router;
pub mod store;
mod workers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::config::PipelineConfig;
use crate::host::StopSignal;
use crate::workers::{SinkWorker, SourceWorker, Worker};

pub use crate::config::{ConfigError, Settings};
pub use crate::error::PipelineError;
pub use crate::host::{HostControl, StopListener};
pub use crate::insertion::PipelineStats;
pub use crate::pipeline::Pipeline;
pub use crate::record::{FieldValue, Record};
pub use crate::store::{DocumentStore, StoreBackend, StoreConfig, StoreError};

/// 🧾 How a run went, start to finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records_read: u64,
    /// ⏭️ records the pipeline refused without ending the run
    pub skipped: u64,
    pub stats: PipelineStats,
    /// 🛑 set when the run ended because the pipeline asked the host to stop
    pub stop_reason: Option<String>,
    pub elapsed: Duration,
}

/// 🚀 Read the configured input, push every record through a pipeline, and report.
///
/// Returns `Ok` even when the duplicate breaker stopped the run; check
/// [`RunSummary::stop_reason`]. Configuration, I/O and store failures are `Err`.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    let started = Instant::now();

    let config = config::resolve(&PipelineConfig::default(), &app_config.mongodb)
        .context("💀 The [mongodb] settings don't agree with each other. Fix them before anything moves.")?;
    let store = StoreBackend::<Value>::open(&app_config.store, &config.connect_options())
        .await
        .context("💀 Failed to open the store backend")?;

    let (signal, listener) = StopSignal::new();
    let pipeline = Pipeline::open(config, store, Arc::new(signal));

    let (tx, rx) = async_channel::bounded(app_config.runtime.queue_capacity.max(1));
    let source = SourceWorker::open(
        app_config.input.clone(),
        tx,
        listener.clone(),
        app_config.runtime.show_progress,
    )
    .await?;
    let sink = SinkWorker::new(rx, pipeline, listener.clone());

    let (source_result, sink_result) = futures::future::try_join(source.start(), sink.start())
        .await
        .context("💀 A worker panicked. That's not an error, that's a cry for help.")?;
    let source_report = source_result.context("💀 Reading the input failed")?;
    let sink_report = sink_result.context("💀 Writing to the store failed")?;
    debug!(
        "📄 Input consumed: {} record(s) from {} byte(s)",
        source_report.records_read, source_report.bytes_read
    );

    let summary = RunSummary {
        records_read: source_report.records_read,
        skipped: sink_report.skipped,
        stats: sink_report.stats,
        stop_reason: listener.reason(),
        elapsed: started.elapsed(),
    };
    info!(
        "✅ Run finished: {} read, {} written in {:?}",
        summary.records_read, summary.stats.records_written, summary.elapsed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{InputConfig, RuntimeConfig};
    use crate::config::UniqueKey;
    use crate::store::FileStoreConfig;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn app_config(input: &NamedTempFile, store: StoreConfig, mongodb: Settings) -> AppConfig {
        AppConfig {
            input: InputConfig {
                file_name: input.path().display().to_string(),
                source_name: "default".into(),
                source_field: Some("_source".into()),
            },
            store,
            runtime: RuntimeConfig {
                queue_capacity: 2,
                show_progress: false,
            },
            mongodb,
        }
    }

    fn ndjson(lines: &[&str]) -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(file)
    }

    #[tokio::test]
    async fn the_one_where_a_file_goes_in_and_collections_come_out() -> anyhow::Result<()> {
        let input = ndjson(&[
            r#"{"_source":"books","title":"Dune","isbn":"1"}"#,
            r#"{"_source":"lamps","title":"Desk lamp","color":""}"#,
            r#"{"_source":"books","title":"Emma","isbn":"2"}"#,
        ])?;
        let out = TempDir::new()?;
        let store = StoreConfig::File(FileStoreConfig {
            root_dir: out.path().to_path_buf(),
        });
        let mongodb = Settings {
            separate_collections: Some(true),
            buffer_data: Some(2),
            ..Settings::default()
        };

        let summary = run(app_config(&input, store, mongodb)).await?;

        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.stats.records_written, 3);
        assert_eq!(summary.stop_reason, None);
        let books = std::fs::read_to_string(out.path().join("mongosink").join("books.ndjson"))?;
        assert_eq!(books.lines().count(), 2);
        let lamps = std::fs::read_to_string(out.path().join("mongosink").join("lamps.ndjson"))?;
        assert_eq!(lamps.trim(), r#"{"title":"Desk lamp"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_upserts_absorb_repeats_without_tripping() -> anyhow::Result<()> {
        let input = ndjson(&[
            r#"{"url":"a"}"#,
            r#"{"url":"a"}"#,
            r#"{"url":"a"}"#,
            r#"{"url":"b"}"#,
        ])?;
        let mongodb = Settings {
            unique_key: Some(UniqueKey::Field("url".into())),
            stop_on_duplicate: Some(1),
            ..Settings::default()
        };

        let summary = run(app_config(&input, StoreConfig::InMemory, mongodb)).await?;

        // -- upserts on the same key don't collide, so nothing trips here
        assert_eq!(summary.stop_reason, None);
        assert_eq!(summary.stats.upserts, 4);
        assert_eq!(summary.stats.duplicates, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_contradicting_settings_never_open_a_store() -> anyhow::Result<()> {
        let input = ndjson(&[r#"{"n":1}"#])?;
        let mongodb = Settings {
            unique_key: Some(UniqueKey::Field("n".into())),
            buffer_data: Some(5),
            ..Settings::default()
        };

        let err = run(app_config(&input, StoreConfig::InMemory, mongodb))
            .await
            .expect_err("buffer + unique key is illegal");
        assert!(format!("{err:#}").contains("MONGODB_BUFFER_DATA"));
        Ok(())
    }
}
