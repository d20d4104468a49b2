//! 🧵 Workers: the two tasks that actually move records while `run()` takes the credit.
//!
//! ```text
//!   SourceWorker ──(source, record)──► async_channel (bounded) ──► SinkWorker ──► Pipeline
//!        ▲                                                              │
//!        └──────────────── StopListener ◄── StopSignal ◄── breaker trip ┘
//! ```
//!
//! 🧠 Knowledge graph:
//! - The channel is the only thing the two workers share. Pipeline state lives in the sink.
//! - Closing works by dropping: the source drops its sender at EOF, the sink drains and
//!   closes the pipeline. If the sink dies first, the source's next send fails and it stops.
//! - A stop request is checked between records on both sides.

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::record::Record;

mod sink_worker;
mod source_worker;

pub(crate) use sink_worker::{SinkReport, SinkWorker};
pub(crate) use source_worker::{SourceReport, SourceWorker};

/// 📬 What travels through the channel: the source name and the record it produced.
pub(crate) type Sourced = (String, Record<serde_json::Value>);

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    type Output: Send + 'static;

    /// 🚀 Spawn onto the runtime. The handle resolves when the worker is done, one way
    /// or another.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
