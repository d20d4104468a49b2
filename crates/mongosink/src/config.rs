//! 🔧 Pipeline configuration — defaults, overrides, and the one true snapshot.
//!
//! 🎬 *[two options walk into a config. one says "let's batch". the other says "let's upsert".]*
//! *[the resolver says "not in my house" and raises a ConfigError.]*
//!
//! The flow is deliberately boring:
//!
//! ```text
//!   PipelineConfig::default()   Settings (MONGODB_* env / [mongodb] toml)
//!              │                          │
//!              └──────────► resolve ◄─────┘
//!                              │
//!                              ▼
//!                 PipelineConfig (immutable, validated)
//! ```
//!
//! 🧠 Knowledge graph:
//! - `Settings` is all `Option`s. Missing or blank means "keep the default".
//! - Deprecated host/port inputs are folded into `uri` BEFORE regular options apply,
//!   so an explicit `uri` always wins. Each deprecated input earns a `warn!`.
//! - Validation happens once, here. Everything downstream trusts the snapshot. 🦆

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// 🚪 The port MongoDB answers on when nobody says otherwise.
pub const DEFAULT_PORT: u16 = 27017;

/// 💀 Everything that can be wrong with a configuration before a single record moves.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IllegalConfig: setting both MONGODB_BUFFER_DATA and MONGODB_UNIQUE_KEY is not supported")]
    BufferWithUniqueKey,

    #[error("negative values are not allowed for MONGODB_STOP_ON_DUPLICATE (got {0})")]
    NegativeStopOnDuplicate(i64),

    #[error("negative values are not allowed for MONGODB_BUFFER_DATA (got {0})")]
    NegativeBuffer(i64),
}

/// 🔑 One field, or an ordered set of fields that are unique together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniqueKey {
    Field(String),
    Compound(Vec<String>),
}

impl UniqueKey {
    /// 📋 The key fields in declaration order, duplicates and blanks removed.
    pub fn fields(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            UniqueKey::Field(field) => vec![field.as_str()],
            UniqueKey::Compound(fields) => fields.iter().map(String::as_str).collect(),
        };
        let mut fields: Vec<&str> = Vec::with_capacity(raw.len());
        for field in raw {
            if !field.is_empty() && !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fields().join(", "))
    }
}

/// ✍️ Write acknowledgement level: a node count, or a tag like `"majority"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteConcern {
    Nodes(u32),
    Tag(String),
}

impl std::fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteConcern::Nodes(nodes) => write!(f, "w={nodes}"),
            WriteConcern::Tag(tag) => write!(f, "w={tag}"),
        }
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        WriteConcern::Nodes(0)
    }
}

/// 📖 Who to read from. Replica sets may fall back to secondaries; standalones may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
}

/// 🔌 The slice of configuration a store driver needs to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub uri: String,
    pub replica_set: Option<String>,
    pub write_concern: WriteConcern,
    pub fsync: bool,
    pub read_preference: ReadPreference,
}

/// 🪧 `uri (w=…, fsync=…, read=…)`, what a backend announces when it opens.
impl std::fmt::Display for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, fsync={}, read={:?}",
            self.uri, self.write_concern, self.fsync, self.read_preference
        )?;
        match &self.replica_set {
            Some(replica_set) => write!(f, ", replica_set={replica_set})"),
            None => write!(f, ")"),
        }
    }
}

/// 📦 The resolved, validated, never-mutated-again pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub uri: String,
    pub fsync: bool,
    pub write_concern: WriteConcern,
    pub database: String,
    pub collection: String,
    pub separate_collections: bool,
    pub replica_set: Option<String>,
    pub unique_key: Option<UniqueKey>,
    /// 📦 Records per batch write. `None` means every record is written on arrival.
    pub buffer: Option<usize>,
    pub append_timestamp: bool,
    /// 🧯 Duplicate rejections tolerated before the run is stopped. 0 = never stop.
    pub stop_on_duplicate: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            uri: format!("mongodb://localhost:{DEFAULT_PORT}"),
            fsync: false,
            write_concern: WriteConcern::default(),
            database: "mongosink".to_string(),
            collection: "items".to_string(),
            separate_collections: false,
            replica_set: None,
            unique_key: None,
            buffer: None,
            append_timestamp: false,
            stop_on_duplicate: 0,
        }
    }
}

impl PipelineConfig {
    /// 🔌 Connection knobs for the store driver. Replica sets get primary-preferred reads
    /// and the configured write concern; standalones read from the primary, period.
    pub fn connect_options(&self) -> ConnectOptions {
        let read_preference = match self.replica_set {
            Some(_) => ReadPreference::PrimaryPreferred,
            None => ReadPreference::Primary,
        };
        ConnectOptions {
            uri: self.uri.clone(),
            replica_set: self.replica_set.clone(),
            write_concern: self.write_concern.clone(),
            fsync: self.fsync,
            read_preference,
        }
    }

    /// 🔑 Unique-key fields, or an empty list in plain-insert mode.
    pub fn unique_key_fields(&self) -> Vec<&str> {
        self.unique_key
            .as_ref()
            .map(UniqueKey::fields)
            .unwrap_or_default()
    }
}

/// 🎛️ Externally supplied overrides. Every field optional, every blank ignored.
///
/// Field names are the `MONGODB_*` setting names without the prefix, so
/// `Env::prefixed("MONGODB_")` lands on them directly. The aliases exist for humans
/// writing TOML who would rather type `buffer` than `buffer_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(deserialize_with = "blank_is_unset")]
    pub uri: Option<String>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub fsync: Option<bool>,
    #[serde(alias = "write_concern", deserialize_with = "blank_is_unset")]
    pub replica_set_w: Option<WriteConcern>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub database: Option<String>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub collection: Option<String>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub separate_collections: Option<bool>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub replica_set: Option<String>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub unique_key: Option<UniqueKey>,
    #[serde(alias = "buffer", deserialize_with = "blank_is_unset")]
    pub buffer_data: Option<i64>,
    #[serde(alias = "append_timestamp", deserialize_with = "blank_is_unset")]
    pub add_timestamp: Option<bool>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub stop_on_duplicate: Option<i64>,

    // -- 🏚️ deprecated, still honored, always complained about
    #[serde(deserialize_with = "blank_is_unset")]
    pub host: Option<String>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub port: Option<u16>,
    #[serde(deserialize_with = "blank_is_unset")]
    pub replica_set_hosts: Option<String>,
}

/// 🕳️ Missing, null, or blank → `None`. Anything else must parse as `T`.
///
/// Environment values arrive pre-guessed by figment ("10" is a number, "true" a bool),
/// and sometimes guessed wrong for us ("123" as a database name). So: try the value as-is,
/// then its string form, then a JSON parse of the string. Three strikes, then an error.
fn blank_is_unset<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    use serde_json::Value;

    let raw = Option::<Value>::deserialize(deserializer)?;
    let value = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(value) => value,
    };

    if let Ok(parsed) = serde_json::from_value::<T>(value.clone()) {
        return Ok(Some(parsed));
    }
    match value {
        Value::String(s) => serde_json::from_str::<T>(&s)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("could not parse '{s}': {e}"))),
        Value::Number(_) | Value::Bool(_) => {
            serde_json::from_value::<T>(Value::String(value.to_string()))
                .map(Some)
                .map_err(D::Error::custom)
        }
        other => serde_json::from_value::<T>(other)
            .map(Some)
            .map_err(D::Error::custom),
    }
}

/// 🧮 Merge `overrides` onto `defaults` and validate the result.
///
/// Logs a warning for each deprecated input used, and an error right before
/// returning any [`ConfigError`] so it shows up loudly even if the caller swallows it.
pub fn resolve(defaults: &PipelineConfig, overrides: &Settings) -> Result<PipelineConfig, ConfigError> {
    let mut config = defaults.clone();

    // 🏚️ Deprecated inputs first. An explicit `uri` further down gets the last word.
    if let Some(host) = &overrides.host {
        warn!("⚠️ DeprecationWarning: MONGODB_HOST is deprecated, use MONGODB_URI");
        let port = match overrides.port {
            Some(port) => {
                warn!("⚠️ DeprecationWarning: MONGODB_PORT is deprecated, use MONGODB_URI");
                port
            }
            None => DEFAULT_PORT,
        };
        config.uri = format!("mongodb://{host}:{port}");
    }
    if overrides.replica_set.is_some() {
        if let Some(hosts) = &overrides.replica_set_hosts {
            warn!("⚠️ DeprecationWarning: MONGODB_REPLICA_SET_HOSTS is deprecated, use MONGODB_URI");
            config.uri = format!("mongodb://{hosts}");
        }
    }

    // 🔧 Regular options: set means set, unset means the default stays put.
    if let Some(uri) = &overrides.uri {
        config.uri = uri.clone();
    }
    if let Some(fsync) = overrides.fsync {
        config.fsync = fsync;
    }
    if let Some(write_concern) = &overrides.replica_set_w {
        config.write_concern = write_concern.clone();
    }
    if let Some(database) = &overrides.database {
        config.database = database.clone();
    }
    if let Some(collection) = &overrides.collection {
        config.collection = collection.clone();
    }
    if let Some(separate) = overrides.separate_collections {
        config.separate_collections = separate;
    }
    if let Some(replica_set) = &overrides.replica_set {
        config.replica_set = Some(replica_set.clone());
    }
    if let Some(unique_key) = &overrides.unique_key {
        config.unique_key = Some(unique_key.clone());
    }
    if let Some(buffer) = overrides.buffer_data {
        let buffer = usize::try_from(buffer).map_err(|_| loudly(ConfigError::NegativeBuffer(buffer)))?;
        config.buffer = Some(buffer);
    }
    if let Some(append) = overrides.add_timestamp {
        config.append_timestamp = append;
    }
    if let Some(threshold) = overrides.stop_on_duplicate {
        config.stop_on_duplicate =
            u64::try_from(threshold).map_err(|_| loudly(ConfigError::NegativeStopOnDuplicate(threshold)))?;
    }

    // 🧹 Normalize the "technically set but means nothing" cases.
    if config.buffer == Some(0) {
        config.buffer = None;
    }
    if config.unique_key.as_ref().is_some_and(|key| key.fields().is_empty()) {
        config.unique_key = None;
    }

    if config.buffer.is_some() && config.unique_key.is_some() {
        return Err(loudly(ConfigError::BufferWithUniqueKey));
    }

    Ok(config)
}

fn loudly(err: ConfigError) -> ConfigError {
    error!("💀 {err}");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Format, Toml},
    };

    fn settings_from_toml(toml: &str) -> Settings {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("💀 test TOML should parse into Settings")
    }

    #[test]
    fn the_one_where_nothing_is_overridden_and_defaults_hold_the_line() {
        let config = resolve(&PipelineConfig::default(), &Settings::default())
            .expect("defaults are always legal");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.uri, "mongodb://localhost:27017");
        assert_eq!(config.collection, "items");
    }

    #[test]
    fn the_one_where_batching_and_upserting_cannot_share_a_room() {
        let overrides = Settings {
            buffer_data: Some(10),
            unique_key: Some(UniqueKey::Field("url".into())),
            ..Settings::default()
        };
        assert_eq!(
            resolve(&PipelineConfig::default(), &overrides),
            Err(ConfigError::BufferWithUniqueKey)
        );
    }

    #[test]
    fn the_one_where_a_negative_threshold_is_rejected() {
        let overrides = Settings {
            stop_on_duplicate: Some(-1),
            ..Settings::default()
        };
        assert_eq!(
            resolve(&PipelineConfig::default(), &overrides),
            Err(ConfigError::NegativeStopOnDuplicate(-1))
        );
    }

    #[test]
    fn the_one_where_deprecated_host_and_port_become_a_uri() {
        let overrides = Settings {
            host: Some("db.internal".into()),
            port: Some(27018),
            ..Settings::default()
        };
        let config = resolve(&PipelineConfig::default(), &overrides).expect("legal");
        assert_eq!(config.uri, "mongodb://db.internal:27018");

        let host_only = Settings {
            host: Some("db.internal".into()),
            ..Settings::default()
        };
        let config = resolve(&PipelineConfig::default(), &host_only).expect("legal");
        assert_eq!(config.uri, "mongodb://db.internal:27017");
    }

    #[test]
    fn the_one_where_an_explicit_uri_outranks_the_old_timers() {
        let overrides = Settings {
            host: Some("old-host".into()),
            replica_set: Some("rs0".into()),
            replica_set_hosts: Some("a:1,b:2".into()),
            uri: Some("mongodb://new-host:1234".into()),
            ..Settings::default()
        };
        let config = resolve(&PipelineConfig::default(), &overrides).expect("legal");
        assert_eq!(config.uri, "mongodb://new-host:1234");
        assert_eq!(config.replica_set.as_deref(), Some("rs0"));
        assert_eq!(config.connect_options().read_preference, ReadPreference::PrimaryPreferred);
    }

    #[test]
    fn the_one_where_replica_set_hosts_only_count_with_a_replica_set() {
        let without_set = Settings {
            replica_set_hosts: Some("a:1,b:2".into()),
            ..Settings::default()
        };
        let config = resolve(&PipelineConfig::default(), &without_set).expect("legal");
        assert_eq!(config.uri, PipelineConfig::default().uri);

        let with_set = Settings {
            replica_set: Some("rs0".into()),
            ..without_set
        };
        let config = resolve(&PipelineConfig::default(), &with_set).expect("legal");
        assert_eq!(config.uri, "mongodb://a:1,b:2");
    }

    #[test]
    fn the_one_where_blank_overrides_are_politely_ignored() {
        let settings = settings_from_toml(
            r#"
            database = ""
            collection = "scraped"
            buffer = 0
            "#,
        );
        let config = resolve(&PipelineConfig::default(), &settings).expect("legal");
        assert_eq!(config.database, "mongosink");
        assert_eq!(config.collection, "scraped");
        assert_eq!(config.buffer, None, "a zero buffer means no buffer");
    }

    #[test]
    fn the_one_where_stringly_typed_env_values_still_parse() {
        let settings = settings_from_toml(
            r#"
            buffer_data = "25"
            stop_on_duplicate = "3"
            replica_set_w = "majority"
            database = 123
            unique_key = ["sku", "url", "sku"]
            "#,
        );
        assert_eq!(settings.buffer_data, Some(25));
        assert_eq!(settings.stop_on_duplicate, Some(3));
        assert_eq!(settings.replica_set_w, Some(WriteConcern::Tag("majority".into())));
        assert_eq!(settings.database.as_deref(), Some("123"));
        assert_eq!(settings.unique_key.as_ref().map(UniqueKey::fields), Some(vec!["sku", "url"]));
    }

    #[test]
    fn the_one_where_connect_options_announce_the_write_concern() {
        let settings = settings_from_toml(
            r#"
            replica_set = "rs0"
            replica_set_w = "majority"
            fsync = true
            "#,
        );
        let options = resolve(&PipelineConfig::default(), &settings)
            .expect("legal")
            .connect_options();
        assert_eq!(
            options.to_string(),
            "mongodb://localhost:27017 (w=majority, fsync=true, read=PrimaryPreferred, replica_set=rs0)"
        );

        let standalone = PipelineConfig::default().connect_options();
        assert_eq!(
            standalone.to_string(),
            "mongodb://localhost:27017 (w=0, fsync=false, read=Primary)"
        );
    }
}
