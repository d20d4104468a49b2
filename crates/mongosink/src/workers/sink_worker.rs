//! 🎬 *[a channel fills with records. somewhere, a pipeline waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker — owns the pipeline, drains the channel, and closes the pipeline when
//! the records run out or somebody pulls the alarm. It is the only task that ever touches
//! pipeline state, so nothing in there needs a lock.

use anyhow::{Context, Result};
use async_channel::Receiver;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Sourced, Worker};
use crate::host::StopListener;
use crate::insertion::PipelineStats;
use crate::pipeline::Pipeline;
use crate::store::DocumentStore;

/// 🧾 What the sink has to say for itself at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SinkReport {
    pub stats: PipelineStats,
    /// ⏭️ records refused with a non-fatal error (missing unique key)
    pub skipped: u64,
}

#[derive(Debug)]
pub(crate) struct SinkWorker<S: DocumentStore<Value>> {
    rx: Receiver<Sourced>,
    pipeline: Pipeline<Value, S>,
    stop: StopListener,
}

impl<S> SinkWorker<S>
where
    S: DocumentStore<Value> + 'static,
{
    pub(crate) fn new(rx: Receiver<Sourced>, pipeline: Pipeline<Value, S>, stop: StopListener) -> Self {
        Self { rx, pipeline, stop }
    }

    async fn drain(&mut self) -> Result<u64> {
        let mut skipped = 0u64;
        while let Ok((source, record)) = self.rx.recv().await {
            match self.pipeline.submit(record, &source).await {
                Ok(_) => {}
                Err(err) if !err.is_fatal() => {
                    skipped += 1;
                    warn!("⚠️ Skipping a record from '{source}': {err}");
                }
                Err(err) => return Err(err).context("💀 SinkWorker failed to submit a record"),
            }
            if self.stop.is_stopped() {
                info!("🛑 SinkWorker: stop requested, no more records will be submitted");
                break;
            }
        }
        Ok(skipped)
    }
}

impl<S> Worker for SinkWorker<S>
where
    S: DocumentStore<Value> + 'static,
{
    type Output = SinkReport;

    fn start(mut self) -> JoinHandle<Result<SinkReport>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker started draining channel...");
            let drained = self.drain().await;
            // -- 🚪 hang up first so a reader blocked on a full channel notices right away
            self.rx.close();

            let skipped = match drained {
                Ok(skipped) => skipped,
                Err(err) => {
                    // -- 🪣 best effort: whatever is still buffered gets one shot at landing
                    if let Err(close_err) = self.pipeline.close().await {
                        warn!("⚠️ Closing the pipeline after a failure also failed: {close_err}");
                    }
                    return Err(err);
                }
            };

            debug!("🏁 SinkWorker: channel drained. Closing the pipeline.");
            let stats = self
                .pipeline
                .close()
                .await
                .context("💀 SinkWorker failed to close the pipeline")?;
            Ok(SinkReport { stats, skipped })
        })
    }
}
