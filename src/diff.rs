//! Structural drift detection between two resolved snapshots.
//!
//! Instances are matched by id. Only the raw config map feeds the
//! structural hash, so identity fields and derived layouts never register
//! as changes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::item::Value;
use crate::monitor::{MonitorConfig, MonitorError, MonitorItems, parse_monitor};
use crate::topology::{DeployConfig, DeployItems, TopologyError, parse_topology};

/// Instances that can be compared across snapshots.
pub trait Identified {
    /// Stable identity used as the diff key.
    fn id(&self) -> &str;

    /// Raw config map whose structure is compared.
    fn raw_config(&self) -> &BTreeMap<String, Value>;
}

impl Identified for DeployConfig {
    fn id(&self) -> &str {
        Self::id(self)
    }

    fn raw_config(&self) -> &BTreeMap<String, Value> {
        self.config()
    }
}

impl Identified for MonitorConfig {
    fn id(&self) -> &str {
        Self::id(self)
    }

    fn raw_config(&self) -> &BTreeMap<String, Value> {
        self.config()
    }
}

/// Classification of one instance between two snapshots.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffType {
    /// Present only in the new snapshot.
    Add,
    /// Present only in the old snapshot.
    Delete,
    /// Present in both with a different raw config.
    Change,
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Change => "CHANGE",
        })
    }
}

/// One classified instance.
#[derive(Clone, Debug)]
pub struct DiffRecord<T> {
    /// Classification.
    pub diff_type: DiffType,
    /// Old instance for deletes, new instance otherwise.
    pub config: T,
}

/// Order-independent hash of a raw config map, stable across runs.
#[must_use]
pub fn structural_hash(config: &BTreeMap<String, Value>) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hash_map(&mut hasher, config);
    hasher.finalize()
}

fn hash_map(hasher: &mut blake3::Hasher, map: &BTreeMap<String, Value>) {
    hasher.update(format!("m{}{{", map.len()).as_bytes());
    for (key, value) in map {
        hash_text(hasher, key);
        hash_value(hasher, value);
    }
    hasher.update(b"}");
}

fn hash_text(hasher: &mut blake3::Hasher, text: &str) {
    hasher.update(format!("s{}:", text.len()).as_bytes());
    hasher.update(text.as_bytes());
}

fn hash_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Bool(flag) => {
            hasher.update(if *flag { b"b1;" } else { b"b0;" });
        }
        Value::Int(number) => {
            hasher.update(format!("i{number};").as_bytes());
        }
        Value::String(text) => hash_text(hasher, text),
        Value::Map(map) => hash_map(hasher, map),
    }
}

/// Classifies instances of two resolved snapshots.
///
/// Deletes come first in old order, then adds and changes in new order.
#[must_use]
pub fn diff_configs<T: Identified + Clone>(old: &[T], new: &[T]) -> Vec<DiffRecord<T>> {
    let old_by_id: HashMap<&str, &T> = old.iter().map(|config| (config.id(), config)).collect();
    let new_ids: HashSet<&str> = new.iter().map(Identified::id).collect();

    let mut records: Vec<DiffRecord<T>> = old
        .iter()
        .filter(|config| !new_ids.contains(config.id()))
        .map(|config| DiffRecord {
            diff_type: DiffType::Delete,
            config: config.clone(),
        })
        .collect();

    for config in new {
        match old_by_id.get(config.id()) {
            None => records.push(DiffRecord {
                diff_type: DiffType::Add,
                config: config.clone(),
            }),
            Some(previous)
                if structural_hash(previous.raw_config()) != structural_hash(config.raw_config()) =>
            {
                records.push(DiffRecord {
                    diff_type: DiffType::Change,
                    config: config.clone(),
                });
            }
            Some(_) => {}
        }
    }

    debug_assert!(
        {
            let deleted: HashSet<&str> = records
                .iter()
                .filter(|record| record.diff_type == DiffType::Delete)
                .map(|record| record.config.id())
                .collect();
            records
                .iter()
                .filter(|record| record.diff_type == DiffType::Add)
                .all(|record| !deleted.contains(record.config.id()))
        },
        "an id was classified as both added and deleted"
    );
    debug!(records = records.len(), "computed diff");
    records
}

/// Resolves two topology documents and classifies their services.
///
/// # Errors
///
/// Returns [`TopologyError::Empty`] when either document is blank,
/// [`TopologyError::NoServices`] when the old document declares nothing, and
/// any resolution error of either document.
pub fn diff_topology(
    old_document: &str,
    new_document: &str,
    context: &Context,
    items: &Arc<DeployItems>,
) -> Result<Vec<DiffRecord<DeployConfig>>, TopologyError> {
    let old = parse_topology(old_document, context, items)?;
    if old.is_empty() {
        return Err(TopologyError::NoServices);
    }
    let new = parse_topology(new_document, context, items)?;
    Ok(diff_configs(&old, &new))
}

/// Resolves two monitor documents against the same storage services and
/// classifies their monitoring services.
///
/// # Errors
///
/// Returns [`MonitorError::EmptyTopology`] when either document is blank,
/// [`MonitorError::NoServices`] when the old document yields no monitors,
/// and any resolution error of either document.
pub fn diff_monitor(
    old_document: &str,
    new_document: &str,
    services: &[DeployConfig],
    context: &Context,
    items: &Arc<MonitorItems>,
) -> Result<Vec<DiffRecord<MonitorConfig>>, MonitorError> {
    let old = parse_monitor(old_document, services, context, items)?;
    if old.is_empty() {
        return Err(MonitorError::NoServices);
    }
    let new = parse_monitor(new_document, services, context, items)?;
    Ok(diff_configs(&old, &new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Clone, Debug)]
    struct Fake {
        id: &'static str,
        config: BTreeMap<String, Value>,
    }

    impl Identified for Fake {
        fn id(&self) -> &str {
            self.id
        }

        fn raw_config(&self) -> &BTreeMap<String, Value> {
            &self.config
        }
    }

    fn fake(id: &'static str, port: i64) -> Fake {
        let mut config = BTreeMap::new();
        config.insert(String::from("listen.port"), Value::Int(port));
        Fake { id, config }
    }

    #[test]
    fn classifies_adds_deletes_and_changes() {
        let old = [fake("a", 1), fake("b", 2), fake("c", 3)];
        let new = [fake("d", 4), fake("b", 20), fake("c", 3)];
        let records = diff_configs(&old, &new);
        let summary: Vec<_> = records
            .iter()
            .map(|record| (record.diff_type, record.config.id))
            .collect();
        assert_eq!(
            summary,
            [
                (DiffType::Delete, "a"),
                (DiffType::Add, "d"),
                (DiffType::Change, "b")
            ]
        );
    }

    #[rstest]
    #[case(Value::Int(1), Value::from("1"))]
    #[case(Value::Bool(false), Value::Int(0))]
    #[case(Value::from("ab"), Value::from("a"))]
    fn hash_distinguishes_kinds_and_content(#[case] left: Value, #[case] right: Value) {
        let mut first = BTreeMap::new();
        first.insert(String::from("key"), left);
        let mut second = BTreeMap::new();
        second.insert(String::from("key"), right);
        assert_ne!(structural_hash(&first), structural_hash(&second));
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let mut first = BTreeMap::new();
        first.insert(String::from("a"), Value::Int(1));
        first.insert(String::from("b"), Value::from("x"));
        let mut second = BTreeMap::new();
        second.insert(String::from("b"), Value::from("x"));
        second.insert(String::from("a"), Value::Int(1));
        assert_eq!(structural_hash(&first), structural_hash(&second));
    }

    #[test]
    fn diff_type_serialises_uppercase() {
        let encoded = serde_json::to_string(&DiffType::Change)
            .unwrap_or_else(|err| panic!("encode: {err}"));
        assert_eq!(encoded, "\"CHANGE\"");
        assert_eq!(DiffType::Delete.to_string(), "DELETE");
    }
}
