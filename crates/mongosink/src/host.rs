//! 📞 Host control — the one call the pipeline can make back to whoever is feeding it.
//!
//! It's a one-way street: the pipeline says "stop, and here's why", and never asks
//! whether the host listened. Fire and forget, like a smoke alarm. 🦆

use std::fmt;

use tokio::sync::watch;
use tracing::error;

/// 🛑 The host-side stop hook.
pub trait HostControl: fmt::Debug + Send + Sync {
    /// Ask the host to end the whole run. Must not block.
    fn stop(&self, reason: &str);
}

/// 📡 A [`HostControl`] backed by a `watch` channel. The first reason wins; later calls
/// are ignored so the host never sees the story change mid-shutdown.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: watch::Sender<Option<String>>,
}

/// 👂 The receiving end of a [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<Option<String>>,
}

impl StopSignal {
    pub fn new() -> (Self, StopListener) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, StopListener { rx })
    }
}

impl HostControl for StopSignal {
    fn stop(&self, reason: &str) {
        error!("🛑 Stopping the run: {reason}");
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
    }
}

impl StopListener {
    /// 🔍 The stop reason, if a stop has been requested.
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().is_some()
    }
}
