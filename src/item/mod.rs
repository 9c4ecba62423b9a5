//! Declarative schema of recognised configuration keys.
//!
//! An [`ItemSet`] is built once by an explicit constructor (see
//! [`crate::topology::DeployItems`] and [`crate::monitor::MonitorItems`]) and
//! shared read-only afterwards. Values resolve in two steps: an explicit raw
//! value wins, otherwise the item's default applies. Computed defaults
//! receive a [`Resolver`], a read-only view of the owning instance that
//! tracks how deep the default chain has gone.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use thiserror::Error;

mod value;

pub use value::{Value, ValueError, ValueKind, scalar_key};

/// Deepest chain of computed defaults that may be evaluated.
pub const MAX_RESOLVE_DEPTH: usize = 8;

/// Errors raised while resolving an item's value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// Raised when a value has a different kind than the accessor expects.
    #[error("{key} must be a {expected}, found {found}")]
    WrongType {
        /// Item key.
        key: String,
        /// Kind requested by the accessor.
        expected: ValueKind,
        /// Kind actually stored.
        found: ValueKind,
    },
    /// Raised when a string value for an integer item does not parse.
    #[error("{key} must be an integer, found {value:?}")]
    NotInteger {
        /// Item key.
        key: String,
        /// Offending raw text.
        value: String,
    },
    /// Raised when an integer does not fit the requested range.
    #[error("{key} value {value} is out of range")]
    OutOfRange {
        /// Item key.
        key: String,
        /// Offending value.
        value: i64,
    },
    /// Raised when computed defaults recurse beyond [`MAX_RESOLVE_DEPTH`].
    #[error("resolving {key} exceeded the maximum default depth of {MAX_RESOLVE_DEPTH}")]
    DepthExceeded {
        /// Item whose default would have gone one level too deep.
        key: String,
    },
    /// Raised when a handle does not belong to the instance's item set.
    #[error("item handle {index} is not registered")]
    UnknownHandle {
        /// Raw handle index.
        index: usize,
    },
    /// Raised when a default cannot be computed from the instance.
    #[error("cannot resolve {key}: {message}")]
    Invalid {
        /// Item key.
        key: String,
        /// Reason.
        message: String,
    },
}

/// Product family an item applies to; informational only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Applies to every deployed service.
    Common,
    /// Filesystem family services only.
    Filesystem,
    /// Store family services only.
    Store,
    /// Monitoring services.
    Monitor,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Common => "common",
            Self::Filesystem => "filesystem",
            Self::Store => "store",
            Self::Monitor => "monitor",
        })
    }
}

/// Signature of a computed default. `Ok(None)` means "absent".
pub type ComputeFn<T> = fn(&Resolver<'_, T>) -> Result<Option<Value>, ResolveError>;

/// Default applied when an instance carries no explicit value.
pub enum ItemDefault<T> {
    /// No default; accessors return the kind's zero value.
    None,
    /// Fixed value.
    Literal(Value),
    /// Value derived from the owning instance.
    Computed {
        /// Human-readable summary used by reference listings.
        describe: &'static str,
        /// Derivation function.
        compute: ComputeFn<T>,
    },
}

impl<T> ItemDefault<T> {
    /// Builds a literal default.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Builds a computed default.
    #[must_use]
    pub const fn computed(describe: &'static str, compute: ComputeFn<T>) -> Self {
        Self::Computed { describe, compute }
    }

    /// Summarises the default for reference output.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::None => String::from("-"),
            Self::Literal(value) => value.to_string(),
            Self::Computed { describe, .. } => (*describe).to_owned(),
        }
    }
}

impl<T> fmt::Debug for ItemDefault<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Computed { describe, .. } => f
                .debug_struct("Computed")
                .field("describe", describe)
                .finish_non_exhaustive(),
        }
    }
}

/// One immutable schema entry.
#[derive(Debug)]
pub struct Item<T> {
    scope: Scope,
    key: &'static str,
    kind: ValueKind,
    excluded: bool,
    default: ItemDefault<T>,
}

impl<T> Item<T> {
    /// Product family tag.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Lower-case dotted key.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Expected value kind.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether the key is left out of rendered service config files.
    #[must_use]
    pub const fn excluded(&self) -> bool {
        self.excluded
    }

    /// Default applied when no explicit value exists.
    #[must_use]
    pub const fn default_value(&self) -> &ItemDefault<T> {
        &self.default
    }

    /// Checks and normalises a raw value for this item.
    ///
    /// Integer items accept strings that parse as integers and convert them.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong kind.
    pub fn coerce(&self, value: Value) -> Result<Value, ResolveError> {
        match (self.kind, value) {
            (ValueKind::Int, Value::String(text)) => parse_int(self.key, &text).map(Value::Int),
            (expected, other) if other.kind() == expected => Ok(other),
            (expected, other) => Err(ResolveError::WrongType {
                key: self.key.to_owned(),
                expected,
                found: other.kind(),
            }),
        }
    }
}

/// Opaque reference to an item registered in an [`ItemSet`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ItemHandle(usize);

/// Ordered collection of items with a key index.
#[derive(Debug)]
pub struct ItemSet<T> {
    items: Vec<Item<T>>,
    index: HashMap<&'static str, usize>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> ItemSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new item and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics when `key` is already registered; item sets are built by
    /// static code, so a duplicate is a programming error.
    pub fn register(
        &mut self,
        scope: Scope,
        key: &'static str,
        kind: ValueKind,
        excluded: bool,
        default: ItemDefault<T>,
    ) -> ItemHandle {
        assert!(
            !self.index.contains_key(key),
            "configuration item {key} registered twice"
        );
        let position = self.items.len();
        self.items.push(Item {
            scope,
            key,
            kind,
            excluded,
            default,
        });
        self.index.insert(key, position);
        ItemHandle(position)
    }

    /// Returns the item behind `handle`.
    #[must_use]
    pub fn get(&self, handle: ItemHandle) -> Option<&Item<T>> {
        self.items.get(handle.0)
    }

    /// Finds an item by key.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&Item<T>> {
        self.index
            .get(key)
            .and_then(|position| self.items.get(*position))
    }

    /// Iterates over items in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Item<T>> {
        self.items.iter()
    }

    /// Iterates over `(handle, item)` pairs in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (ItemHandle, &Item<T>)> {
        self.items
            .iter()
            .enumerate()
            .map(|(position, item)| (ItemHandle(position), item))
    }

    /// Number of registered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lists every item in registration order.
    #[must_use]
    pub fn reference(&self) -> Vec<ItemReference> {
        self.items
            .iter()
            .map(|item| ItemReference {
                scope: item.scope,
                key: item.key,
                kind: item.kind,
                excluded: item.excluded,
                default: item.default.describe(),
            })
            .collect()
    }
}

/// Serialisable row of a reference listing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ItemReference {
    /// Product family tag.
    pub scope: Scope,
    /// Lower-case dotted key.
    pub key: &'static str,
    /// Expected value kind.
    pub kind: ValueKind,
    /// Whether the key is left out of rendered config files.
    pub excluded: bool,
    /// Summary of the default.
    pub default: String,
}

/// Instances that resolve values through an [`ItemSet`].
pub trait Configured: Sized {
    /// Item set describing the recognised keys.
    fn item_set(&self) -> &ItemSet<Self>;

    /// Explicit value for `key`, if the document provided one.
    fn raw_value(&self, key: &str) -> Option<&Value>;
}

/// Read-only view used to resolve item values with a depth guard.
#[derive(Debug)]
pub struct Resolver<'a, T> {
    instance: &'a T,
    depth: usize,
}

impl<'a, T: Configured> Resolver<'a, T> {
    /// Starts a resolution chain at depth zero.
    #[must_use]
    pub const fn new(instance: &'a T) -> Self {
        Self { instance, depth: 0 }
    }

    /// Instance being resolved.
    #[must_use]
    pub const fn instance(&self) -> &'a T {
        self.instance
    }

    /// Current depth of the default chain.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Resolves the raw value for `handle`; `None` means absent.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the handle is foreign, the depth guard
    /// trips, or a computed default fails.
    pub fn value(&self, handle: ItemHandle) -> Result<Option<Value>, ResolveError> {
        let item = self
            .instance
            .item_set()
            .get(handle)
            .ok_or(ResolveError::UnknownHandle { index: handle.0 })?;

        if let Some(explicit) = self.instance.raw_value(item.key) {
            return Ok(Some(explicit.clone()));
        }

        match &item.default {
            ItemDefault::None => Ok(None),
            ItemDefault::Literal(value) => Ok(Some(value.clone())),
            ItemDefault::Computed { compute, .. } => {
                if self.depth >= MAX_RESOLVE_DEPTH {
                    return Err(ResolveError::DepthExceeded {
                        key: item.key.to_owned(),
                    });
                }
                let nested = Self {
                    instance: self.instance,
                    depth: self.depth + 1,
                };
                compute(&nested)
            }
        }
    }

    /// Resolves a string item; absent yields `""`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::WrongType`] for non-string values.
    pub fn string(&self, handle: ItemHandle) -> Result<String, ResolveError> {
        match self.value(handle)? {
            None => Ok(String::new()),
            Some(Value::String(text)) => Ok(text),
            Some(other) => Err(self.wrong_type(handle, ValueKind::String, &other)),
        }
    }

    /// Resolves an integer item; absent yields `0`. Integer-looking strings
    /// are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] for non-integer values.
    pub fn int(&self, handle: ItemHandle) -> Result<i64, ResolveError> {
        match self.value(handle)? {
            None => Ok(0),
            Some(Value::Int(number)) => Ok(number),
            Some(Value::String(text)) => parse_int(self.key(handle), &text),
            Some(other) => Err(self.wrong_type(handle, ValueKind::Int, &other)),
        }
    }

    /// Resolves a boolean item; absent yields `false`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::WrongType`] for non-boolean values.
    pub fn bool(&self, handle: ItemHandle) -> Result<bool, ResolveError> {
        match self.value(handle)? {
            None => Ok(false),
            Some(Value::Bool(flag)) => Ok(flag),
            Some(other) => Err(self.wrong_type(handle, ValueKind::Bool, &other)),
        }
    }

    /// Resolves a map item; absent yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::WrongType`] for non-map values.
    pub fn map(&self, handle: ItemHandle) -> Result<BTreeMap<String, Value>, ResolveError> {
        match self.value(handle)? {
            None => Ok(BTreeMap::new()),
            Some(Value::Map(map)) => Ok(map),
            Some(other) => Err(self.wrong_type(handle, ValueKind::Map, &other)),
        }
    }

    /// Resolves an integer item that must fit a TCP port; absent yields `0`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::OutOfRange`] when the value is not a valid
    /// port number.
    pub fn port(&self, handle: ItemHandle) -> Result<u16, ResolveError> {
        let number = self.int(handle)?;
        u16::try_from(number).map_err(|_| ResolveError::OutOfRange {
            key: self.key(handle).to_owned(),
            value: number,
        })
    }

    fn key(&self, handle: ItemHandle) -> &'static str {
        self.instance
            .item_set()
            .get(handle)
            .map_or("<unknown>", Item::key)
    }

    fn wrong_type(&self, handle: ItemHandle, expected: ValueKind, found: &Value) -> ResolveError {
        ResolveError::WrongType {
            key: self.key(handle).to_owned(),
            expected,
            found: found.kind(),
        }
    }
}

fn parse_int(key: &str, text: &str) -> Result<i64, ResolveError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| ResolveError::NotInteger {
            key: key.to_owned(),
            value: text.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    struct Fixture {
        items: ItemSet<Fixture>,
        raw: BTreeMap<String, Value>,
        handles: Handles,
    }

    #[derive(Clone, Copy)]
    struct Handles {
        port: ItemHandle,
        external_port: ItemHandle,
        image: ItemHandle,
        flag: ItemHandle,
        unset: ItemHandle,
        looping: ItemHandle,
    }

    impl Configured for Fixture {
        fn item_set(&self) -> &ItemSet<Self> {
            &self.items
        }

        fn raw_value(&self, key: &str) -> Option<&Value> {
            self.raw.get(key)
        }
    }

    fn external_port(resolver: &Resolver<'_, Fixture>) -> Result<Option<Value>, ResolveError> {
        let port = resolver.int(resolver.instance().handles.port)?;
        Ok(Some(Value::Int(port)))
    }

    fn looping(resolver: &Resolver<'_, Fixture>) -> Result<Option<Value>, ResolveError> {
        resolver.value(resolver.instance().handles.looping)
    }

    #[fixture]
    fn fixture() -> Fixture {
        let mut items = ItemSet::new();
        let port = items.register(
            Scope::Common,
            "listen.port",
            ValueKind::Int,
            false,
            ItemDefault::literal(6700_i64),
        );
        let external_port = items.register(
            Scope::Common,
            "listen.external_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("listen.port", external_port),
        );
        let image = items.register(
            Scope::Common,
            "container_image",
            ValueKind::String,
            true,
            ItemDefault::None,
        );
        let flag = items.register(
            Scope::Common,
            "enable",
            ValueKind::Bool,
            false,
            ItemDefault::literal(true),
        );
        let unset = items.register(
            Scope::Common,
            "copysets",
            ValueKind::Int,
            false,
            ItemDefault::None,
        );
        let looping_handle = items.register(
            Scope::Common,
            "looping",
            ValueKind::String,
            false,
            ItemDefault::computed("itself", looping),
        );
        Fixture {
            items,
            raw: BTreeMap::new(),
            handles: Handles {
                port,
                external_port,
                image,
                flag,
                unset,
                looping: looping_handle,
            },
        }
    }

    #[rstest]
    fn reference_lists_items_in_registration_order(fixture: Fixture) {
        let rows = fixture.items.reference();
        let keys: Vec<_> = rows.iter().map(|row| row.key).collect();
        assert_eq!(
            keys,
            [
                "listen.port",
                "listen.external_port",
                "container_image",
                "enable",
                "copysets",
                "looping"
            ]
        );
        let image = rows.get(2).expect("image row");
        assert!(image.excluded);
        assert_eq!(image.kind, ValueKind::String);
    }

    #[rstest]
    fn literal_default_applies_without_explicit_value(fixture: Fixture) {
        let resolver = Resolver::new(&fixture);
        assert_eq!(resolver.int(fixture.handles.port), Ok(6700));
        assert_eq!(resolver.bool(fixture.handles.flag), Ok(true));
    }

    #[rstest]
    fn explicit_value_wins(mut fixture: Fixture) {
        fixture
            .raw
            .insert(String::from("listen.port"), Value::from("6800"));
        let resolver = Resolver::new(&fixture);
        assert_eq!(resolver.int(fixture.handles.port), Ok(6800));
        assert_eq!(resolver.int(fixture.handles.external_port), Ok(6800));
    }

    #[rstest]
    fn computed_default_is_repeatable(fixture: Fixture) {
        let resolver = Resolver::new(&fixture);
        let first = resolver.int(fixture.handles.external_port);
        let second = resolver.int(fixture.handles.external_port);
        assert_eq!(first, Ok(6700));
        assert_eq!(first, second);
    }

    #[rstest]
    fn absent_values_yield_zero(fixture: Fixture) {
        let resolver = Resolver::new(&fixture);
        assert_eq!(resolver.string(fixture.handles.image), Ok(String::new()));
        assert_eq!(resolver.int(fixture.handles.unset), Ok(0));
    }

    #[rstest]
    fn wrong_types_are_reported(mut fixture: Fixture) {
        fixture
            .raw
            .insert(String::from("enable"), Value::from("yes"));
        fixture
            .raw
            .insert(String::from("listen.port"), Value::from("abc"));
        let resolver = Resolver::new(&fixture);
        assert_eq!(
            resolver.bool(fixture.handles.flag),
            Err(ResolveError::WrongType {
                key: String::from("enable"),
                expected: ValueKind::Bool,
                found: ValueKind::String,
            })
        );
        assert!(matches!(
            resolver.int(fixture.handles.port),
            Err(ResolveError::NotInteger { .. })
        ));
    }

    #[rstest]
    fn cyclic_defaults_fail_loudly(fixture: Fixture) {
        let resolver = Resolver::new(&fixture);
        assert_eq!(
            resolver.string(fixture.handles.looping),
            Err(ResolveError::DepthExceeded {
                key: String::from("looping")
            })
        );
    }

    #[rstest]
    fn port_rejects_out_of_range_values(mut fixture: Fixture) {
        fixture
            .raw
            .insert(String::from("listen.port"), Value::Int(70_000));
        let resolver = Resolver::new(&fixture);
        assert!(matches!(
            resolver.port(fixture.handles.port),
            Err(ResolveError::OutOfRange { value: 70_000, .. })
        ));
    }

    #[rstest]
    fn coerce_normalises_integer_strings(fixture: Fixture) {
        let item = fixture.items.find("listen.port").expect("registered");
        assert_eq!(item.coerce(Value::from(" 42 ")), Ok(Value::Int(42)));
        assert!(item.coerce(Value::Bool(true)).is_err());
    }

    #[rstest]
    fn registration_order_is_preserved(fixture: Fixture) {
        let keys: Vec<_> = fixture.items.iter().map(Item::key).collect();
        assert_eq!(
            keys,
            [
                "listen.port",
                "listen.external_port",
                "container_image",
                "enable",
                "copysets",
                "looping"
            ]
        );
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut items: ItemSet<Fixture> = ItemSet::new();
        items.register(
            Scope::Common,
            "prefix",
            ValueKind::String,
            true,
            ItemDefault::None,
        );
        items.register(
            Scope::Common,
            "prefix",
            ValueKind::String,
            true,
            ItemDefault::None,
        );
    }
}
