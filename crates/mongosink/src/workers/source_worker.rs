//! 📂 SourceWorker — reads an NDJSON file one line at a time and hands each record, tagged
//! with its source name, to the sink.
//!
//! Blank lines are skipped. A line that isn't a JSON object ends the run with the line
//! number in the error, because silently skipping data is how migrations lie.

use anyhow::{Context, Result};
use async_channel::Sender;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Sourced, Worker};
use crate::app_config::InputConfig;
use crate::host::StopListener;
use crate::progress::ProgressMetrics;
use crate::record::Record;

/// 📄 How far the reader got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SourceReport {
    pub records_read: u64,
    pub bytes_read: u64,
}

pub(crate) struct SourceWorker {
    reader: BufReader<File>,
    input: InputConfig,
    tx: Sender<Sourced>,
    stop: StopListener,
    progress: ProgressMetrics,
}

impl std::fmt::Debug for SourceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWorker")
            .field("input", &self.input)
            .field("progress", &self.progress)
            .finish()
    }
}

impl SourceWorker {
    /// 🚀 Open the input file. A missing file fails here, before any task is spawned.
    pub(crate) async fn open(
        input: InputConfig,
        tx: Sender<Sourced>,
        stop: StopListener,
        show_progress: bool,
    ) -> Result<Self> {
        let file = File::open(&input.file_name).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist, or the permissions \
                 might be wrong. Either way, the input file remains unopened.",
                input.file_name
            )
        })?;
        // -- 📏 size is only for the progress bar; 0 means "unknown" and that's fine
        let file_size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        let progress = ProgressMetrics::new(input.file_name.clone(), file_size, show_progress);

        Ok(Self {
            reader: BufReader::new(file),
            input,
            tx,
            stop,
            progress,
        })
    }

    /// 🏷️ Pull the per-record source name out of the record, or fall back to the default.
    fn source_of(&self, record: &mut Record<Value>) -> String {
        let from_field = self
            .input
            .source_field
            .as_deref()
            .and_then(|field| record.remove(field));
        match from_field {
            Some(Value::String(name)) if !name.is_empty() => name,
            Some(Value::Null) | Some(Value::String(_)) | None => self.input.source_name.clone(),
            Some(other) => other.to_string(),
        }
    }

    async fn read_all(&mut self) -> Result<SourceReport> {
        let mut line = String::new();
        let mut line_number = 0u64;

        loop {
            if self.stop.is_stopped() {
                info!("🛑 SourceWorker: stop requested, putting the book down");
                break;
            }

            line.clear();
            let bytes = self
                .reader
                .read_line(&mut line)
                .await
                .with_context(|| format!("💀 Failed reading '{}' after line {line_number}", self.input.file_name))?;
            if bytes == 0 {
                break;
            }
            line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                self.progress.update(bytes as u64, false);
                continue;
            }

            let mut record: Record<Value> = serde_json::from_str(trimmed).with_context(|| {
                format!(
                    "💀 Line {line_number} of '{}' is not a JSON object. We expected NDJSON and got vibes.",
                    self.input.file_name
                )
            })?;
            let source = self.source_of(&mut record);
            self.progress.update(bytes as u64, true);

            if self.tx.send((source, record)).await.is_err() {
                debug!("📪 SourceWorker: sink hung up, no one left to read to");
                break;
            }
        }

        self.progress.finish();
        Ok(SourceReport {
            records_read: self.progress.records_read(),
            bytes_read: self.progress.bytes_read(),
        })
    }
}

impl Worker for SourceWorker {
    type Output = SourceReport;

    fn start(mut self) -> JoinHandle<Result<SourceReport>> {
        tokio::spawn(async move {
            debug!("📂 SourceWorker started reading '{}'", self.input.file_name);
            // -- 🚪 `self` drops when this block ends, closing our end of the channel. That's the sink's cue.
            self.read_all().await
        })
    }
}
