//! Tagged configuration values decoded once at the document boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A configuration value taken from a topology or monitor document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Free-form string, possibly containing `${name}` placeholders.
    String(String),
    /// Nested map.
    Map(BTreeMap<String, Value>),
}

/// Expected shape of an item's value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// See [`Value::String`].
    String,
    /// See [`Value::Int`]. Integer-looking strings are accepted.
    Int,
    /// See [`Value::Bool`].
    Bool,
    /// See [`Value::Map`].
    Map,
}

/// Raised when a YAML node cannot become a [`Value`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid value for {key}: {message}")]
pub struct ValueError {
    /// Dotted key whose value was rejected.
    pub key: String,
    /// Reason for the rejection.
    pub message: String,
}

impl ValueError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_owned(),
            message: message.into(),
        }
    }
}

impl Value {
    /// Converts a YAML node found under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] for nulls, floats, sequences, tagged nodes, and
    /// maps with non-scalar keys.
    pub fn from_yaml(key: &str, node: &serde_yaml::Value) -> Result<Self, ValueError> {
        match node {
            serde_yaml::Value::Bool(flag) => Ok(Self::Bool(*flag)),
            serde_yaml::Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| ValueError::new(key, format!("{number} is not an integer"))),
            serde_yaml::Value::String(text) => Ok(Self::String(text.clone())),
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (raw_key, raw_value) in mapping {
                    let name = scalar_key(key, raw_key)?;
                    let nested = format!("{key}.{name}");
                    map.insert(name, Self::from_yaml(&nested, raw_value)?);
                }
                Ok(Self::Map(map))
            }
            serde_yaml::Value::Null => Err(ValueError::new(key, "value is empty")),
            serde_yaml::Value::Sequence(_) => Err(ValueError::new(key, "lists are not supported")),
            serde_yaml::Value::Tagged(_) => {
                Err(ValueError::new(key, "tagged values are not supported"))
            }
        }
    }

    /// Reports the kind of this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::String(_) => ValueKind::String,
            Self::Map(_) => ValueKind::Map,
        }
    }

    /// Returns `true` for the zero value of each kind.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Bool(flag) => !flag,
            Self::Int(number) => *number == 0,
            Self::String(text) => text.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }
}

/// Converts a YAML mapping key into a lower-cased string key.
///
/// # Errors
///
/// Returns [`ValueError`] when the key is not a string, number or boolean.
pub fn scalar_key(parent: &str, raw: &serde_yaml::Value) -> Result<String, ValueError> {
    match raw {
        serde_yaml::Value::String(text) => Ok(text.to_lowercase()),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        serde_yaml::Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(ValueError::new(parent, "map keys must be scalars")),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(number) => write!(f, "{number}"),
            Self::String(text) => f.write_str(text),
            Self::Map(map) => {
                f.write_str("{")?;
                for (position, (key, value)) in map.iter().enumerate() {
                    if position > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Map => "map",
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn yaml(text: &str) -> serde_yaml::Value {
        serde_yaml::from_str(text).unwrap_or_else(|err| panic!("yaml {text}: {err}"))
    }

    #[rstest]
    #[case("true", Value::Bool(true))]
    #[case("6700", Value::Int(6700))]
    #[case("\"6700\"", Value::String(String::from("6700")))]
    #[case("/data/${service_role}", Value::String(String::from("/data/${service_role}")))]
    fn decodes_scalars(#[case] text: &str, #[case] expected: Value) {
        let decoded = Value::from_yaml("key", &yaml(text)).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(decoded, expected);
    }

    #[test]
    fn decodes_nested_maps_with_lowercase_keys() {
        let decoded = Value::from_yaml("env", &yaml("{ LANG: C, 8: true }"))
            .unwrap_or_else(|err| panic!("{err}"));
        let Value::Map(map) = decoded else {
            panic!("expected map");
        };
        assert_eq!(map.get("lang"), Some(&Value::from("C")));
        assert_eq!(map.get("8"), Some(&Value::Bool(true)));
    }

    #[rstest]
    #[case("1.5", "not an integer")]
    #[case("~", "empty")]
    #[case("[a, b]", "lists")]
    fn rejects_unsupported_nodes(#[case] text: &str, #[case] fragment: &str) {
        let err = Value::from_yaml("listen.port", &yaml(text)).expect_err("should reject");
        assert_eq!(err.key, "listen.port");
        assert!(err.message.contains(fragment), "message: {}", err.message);
    }

    #[test]
    fn display_renders_maps_in_key_order() {
        let mut map = BTreeMap::new();
        map.insert(String::from("b"), Value::Int(2));
        map.insert(String::from("a"), Value::from("x"));
        assert_eq!(Value::Map(map).to_string(), "{a: x, b: 2}");
    }
}
