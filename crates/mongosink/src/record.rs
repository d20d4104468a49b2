//! 📦 Records — the ordered bags of fields that ride the pipeline into the store.
//!
//! 🎬 *[a scraper hands over a dict. the dict has opinions about key order.]*
//! *[nobody else does. except the humans reading the documents later. they care a lot.]*
//!
//! A [`Record`] is an insertion-ordered mapping from field name to an opaque value `V`.
//! The pipeline never looks inside `V` except through [`FieldValue`]: "are you blank?"
//! and "please become a timestamp". Everything else is the store's problem. 🦆
//!
//! 🧠 Knowledge graph:
//! - `Record<V>` is a `Vec<(String, V)>` wearing a map costume. Lookups are linear,
//!   which is fine for documents with a handful of fields and faster than hashing them.
//! - Re-inserting an existing key replaces the value IN PLACE. Position is sticky.
//! - Serializes as a JSON object, deserializes from one while keeping the source order.

use std::fmt;
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 🧬 What the pipeline needs to know about a field value. Not much, honestly.
///
/// `Clone` because shaped records are handed back to the producer AND to the store.
/// `PartialEq` because unique keys are compared by value. The rest is thread-safety paperwork.
pub trait FieldValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// 🕳️ Empty string or null: the values that get dropped before persistence.
    fn is_blank(&self) -> bool;

    /// ⏱️ The value stored under the timestamp field when stamping is enabled.
    fn timestamp(at: SystemTime) -> Self;
}

impl FieldValue for serde_json::Value {
    fn is_blank(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn timestamp(at: SystemTime) -> Self {
        // -- 🕰️ clocks before 1970 get clamped to the epoch. time travelers, file a bug.
        let millis = at
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_millis())
            .unwrap_or_default();
        // -- 📅 extended JSON date, so a mongoimport of the output yields a real Date
        serde_json::json!({ "ts": { "$date": { "$numberLong": millis.to_string() } } })
    }
}

/// 📦 An ordered field → value mapping. One scraped item, one future document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<V> {
    fields: Vec<(String, V)>,
}

impl<V> Default for Record<V> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<V> Record<V> {
    /// 🚀 An empty record. Full of potential. Empty of fields.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 🔍 Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// ✏️ Set a field. Existing fields keep their position and lose their old value.
    /// Returns the value that was evicted, if any. Like a landlord, but with a receipt.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// 🗑️ Remove a field, closing the gap so the remaining order is untouched.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let position = self.fields.iter().position(|(field, _)| field == name)?;
        Some(self.fields.remove(position).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(field, _)| field.as_str())
    }
}

impl<V: FieldValue> Record<V> {
    /// 🧹 Drop every field whose value is blank. Order of the survivors is preserved.
    pub fn without_blanks(mut self) -> Self {
        self.fields.retain(|(_, value)| !value.is_blank());
        self
    }

    /// 🔑 Project the record onto `names`, in the order given.
    /// Returns the first missing name as the error. An upsert filter with holes is no filter.
    pub fn project<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Self, &'a str> {
        let mut projection = Self::new();
        for name in names {
            let value = self.get(name).ok_or(name)?;
            projection.insert(name, value.clone());
        }
        Ok(projection)
    }

    /// 🤝 True when every field of `filter` is present here with an equal value.
    pub fn matches(&self, filter: &Self) -> bool {
        filter
            .fields
            .iter()
            .all(|(name, expected)| self.get(name) == Some(expected))
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for Record<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl<V> IntoIterator for Record<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<V: Serialize> Serialize for Record<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Record<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // -- 🗺️ a visitor that walks the map in document order and writes it all down
        struct RecordVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for RecordVisitor<V> {
            type Value = Record<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut record = Record {
                    fields: Vec::with_capacity(access.size_hint().unwrap_or(0)),
                };
                while let Some((name, value)) = access.next_entry::<String, V>()? {
                    record.insert(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn the_one_where_field_order_survives_the_round_trip() -> anyhow::Result<()> {
        let record: Record<Value> = serde_json::from_str(r#"{"zeta":1,"alpha":2,"mid":3}"#)?;
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(serde_json::to_string(&record)?, r#"{"zeta":1,"alpha":2,"mid":3}"#);
        Ok(())
    }

    #[test]
    fn the_one_where_reinserting_a_key_keeps_its_seat() {
        let mut record: Record<Value> = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        let evicted = record.insert("a", json!(99));

        assert_eq!(evicted, Some(json!(1)));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&json!(99)));
    }

    #[test]
    fn the_one_where_blank_fields_get_shown_the_door() {
        let record: Record<Value> = [
            ("title", json!("The Item")),
            ("empty", json!("")),
            ("nothing", Value::Null),
            ("zero", json!(0)),
            ("falsy", json!(false)),
        ]
        .into_iter()
        .collect();
        let record = record.without_blanks();

        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["title", "zero", "falsy"]);
    }

    #[test]
    fn the_one_where_projection_reports_the_missing_key() {
        let record: Record<Value> = [("url", json!("https://x")), ("sku", json!(7))]
            .into_iter()
            .collect();

        let filter = record.project(["sku", "url"]).expect("both keys exist");
        assert_eq!(filter.keys().collect::<Vec<_>>(), vec!["sku", "url"]);
        assert!(record.matches(&filter));

        assert_eq!(record.project(["url", "nope"]), Err("nope"));
    }

    #[test]
    fn the_one_where_the_timestamp_speaks_extended_json() {
        let at = UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_123);
        let stamp = Value::timestamp(at);
        assert_eq!(stamp["ts"]["$date"]["$numberLong"], json!("1700000000123"));
    }
}
