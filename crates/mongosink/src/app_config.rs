//! 🔧 App Configuration — the TOML-to-struct pipeline for the runner around the sink.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! Two env families land in the same struct:
//! - `MONGOSINK_*` for the runner itself (`MONGOSINK_INPUT__FILE_NAME`, ...)
//! - `MONGODB_*` for the pipeline overrides, re-homed under the `[mongodb]` table
//!
//! The TOML file, when given, is merged last and wins on conflicts.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::config::Settings;
use crate::store::StoreConfig;

/// 📦 Everything the runner needs to know about itself.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📄 Where records come from.
    pub input: InputConfig,
    /// 🗄️ Where records end up. Defaults to the in-memory store, i.e. a dry run.
    #[serde(default)]
    pub store: StoreConfig,
    /// 🧵 Worker plumbing.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// 🍃 Pipeline overrides, named like the `MONGODB_*` settings minus the prefix.
    #[serde(default)]
    pub mongodb: Settings,
}

/// 📄 The NDJSON input file and how to tell which source a record came from.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InputConfig {
    pub file_name: String,
    /// 🏷️ Source name for records that don't carry their own.
    #[serde(default = "default_source_name")]
    pub source_name: String,
    /// 🏷️ Optional per-record field holding the source name. Removed before submit.
    #[serde(default)]
    pub source_field: Option<String>,
}

fn default_source_name() -> String {
    "default".to_string()
}

/// 🧵 Knobs for the worker plumbing, not for the pipeline.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 📬 Records in flight between the reader and the sink.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 📊 Draw the progress bar while reading. Off is nicer in CI logs.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            show_progress: default_show_progress(),
        }
    }
}

fn default_queue_capacity() -> usize {
    10
}

fn default_show_progress() -> bool {
    true
}

/// 🚀 Load the config from env vars, plus a TOML file when one is given.
///
/// - `config_file_name` None → env vars only.
/// - `config_file_name` Some → env vars + TOML file, merged. TOML wins on conflicts.
///
/// 💀 Returns an error if the result is unparseable, with context naming what was read.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<environment only>".to_string())
    );

    let config = Figment::new()
        .merge(Env::prefixed("MONGOSINK_").split("__"))
        .merge(Env::prefixed("MONGODB_").map(|key| format!("mongodb.{key}").into()));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables \
             (MONGOSINK_*, MONGODB_*). The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (MONGOSINK_*, MONGODB_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
