//! `${name}` placeholder rendering against a flat name → value table.

use std::collections::BTreeMap;

use thiserror::Error;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Errors raised while rendering templates.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VariableError {
    /// Raised when a template references a name with no value.
    #[error("unknown variable: {name}")]
    Unknown {
        /// Name found between `${` and `}`.
        name: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Variable {
    description: String,
    value: Option<String>,
}

/// Named variables available to template rendering.
///
/// A variable may be registered before it has a value; rendering a
/// registered but unset variable fails the same way as an unregistered one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Variables {
    vars: BTreeMap<String, Variable>,
}

impl Variables {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with a description and no value.
    pub fn register(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.vars
            .entry(name.into())
            .or_insert_with(|| Variable {
                description: String::new(),
                value: None,
            })
            .description = description.into();
    }

    /// Sets the value of `name`, registering it when absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars
            .entry(name.into())
            .or_insert_with(|| Variable {
                description: String::new(),
                value: None,
            })
            .value = Some(value.into());
    }

    /// Returns the value bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::Unknown`] when the name has no value.
    pub fn get(&self, name: &str) -> Result<&str, VariableError> {
        self.vars
            .get(name)
            .and_then(|var| var.value.as_deref())
            .ok_or_else(|| VariableError::Unknown {
                name: name.to_owned(),
            })
    }

    /// Returns the description registered for `name`, if any.
    #[must_use]
    pub fn description(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|var| var.description.as_str())
    }

    /// Iterates over `(name, value)` pairs that have values, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter_map(|(name, var)| var.value.as_deref().map(|value| (name.as_str(), value)))
    }

    /// Copies every bound value from `other`, overriding existing entries.
    pub fn extend_from(&mut self, other: &Self) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    /// Replaces every `${name}` in `template` with its value.
    ///
    /// Rendering is a single pass: substituted values are not rendered
    /// again. An unterminated `${` is copied through verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::Unknown`] for the first placeholder whose
    /// name has no value.
    pub fn render(&self, template: &str) -> Result<String, VariableError> {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(OPEN) {
            let (before, tail) = rest.split_at(start);
            rendered.push_str(before);
            let body = tail.get(OPEN.len()..).unwrap_or_default();
            let Some(end) = body.find(CLOSE) else {
                rendered.push_str(tail);
                return Ok(rendered);
            };
            let (name, after) = body.split_at(end);
            rendered.push_str(self.get(name.trim())?);
            rest = after.get(1..).unwrap_or_default();
        }

        rendered.push_str(rest);
        Ok(rendered)
    }
}
