//! Ordered configuration-section tree.
//!
//! A [`ConfigSection`] holds pairs (`name = value`), bare words (a pair with
//! no value, used for module lists) and nested sections, in declaration
//! order. Sections are built from JSON documents by [`ConfigSection::from_json`]
//! or programmatically with the `with_*` builders.

use std::fmt::Display;
use std::str::FromStr;

use serde_json::Value;

use crate::error::ConfigError;

/// A single `name = value` item, or a bare word when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPair {
    name: String,
    value: Option<String>,
}

impl ConfigPair {
    /// Creates a pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the item name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the assigned value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// An entry inside a [`ConfigSection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigItem {
    /// A pair or bare word.
    Pair(ConfigPair),
    /// A nested section.
    Section(ConfigSection),
}

impl ConfigItem {
    /// Returns the item's name.
    #[must_use]
    pub const fn name(&self) -> &str {
        match self {
            Self::Pair(pair) => pair.name(),
            Self::Section(section) => section.name(),
        }
    }

    /// Returns the pair when the item is one.
    #[must_use]
    pub const fn as_pair(&self) -> Option<&ConfigPair> {
        match self {
            Self::Pair(pair) => Some(pair),
            Self::Section(_) => None,
        }
    }

    /// Returns the section when the item is one.
    #[must_use]
    pub const fn as_section(&self) -> Option<&ConfigSection> {
        match self {
            Self::Pair(_) => None,
            Self::Section(section) => Some(section),
        }
    }
}

/// A named, ordered configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSection {
    name: String,
    items: Vec<ConfigItem>,
}

impl ConfigSection {
    /// Creates an empty section.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Adds a `name = value` pair.
    #[must_use]
    pub fn with_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.items
            .push(ConfigItem::Pair(ConfigPair::new(name, Some(value.into()))));
        self
    }

    /// Adds a bare word.
    #[must_use]
    pub fn with_word(mut self, name: impl Into<String>) -> Self {
        self.items.push(ConfigItem::Pair(ConfigPair::new(name, None)));
        self
    }

    /// Adds a nested section.
    #[must_use]
    pub fn with_section(mut self, section: Self) -> Self {
        self.items.push(ConfigItem::Section(section));
        self
    }

    /// Returns the section name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns all items in declaration order.
    #[must_use]
    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    /// Iterates over the pairs and bare words of this section.
    pub fn pairs(&self) -> impl Iterator<Item = &ConfigPair> {
        self.items.iter().filter_map(ConfigItem::as_pair)
    }

    /// Iterates over the nested sections.
    pub fn subsections(&self) -> impl Iterator<Item = &Self> {
        self.items.iter().filter_map(ConfigItem::as_section)
    }

    /// Returns the value of the first pair called `name`.
    #[must_use]
    pub fn pair(&self, name: &str) -> Option<&str> {
        self.pairs()
            .find(|pair| pair.name() == name)
            .and_then(ConfigPair::value)
    }

    /// Returns the first nested section called `name`.
    #[must_use]
    pub fn subsection(&self, name: &str) -> Option<&Self> {
        self.subsections().find(|section| section.name() == name)
    }

    /// Parses a required item.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingItem`] when the item is absent and
    /// [`ConfigError::InvalidValue`] when it does not parse.
    pub fn parse_required<T>(&self, item: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self
            .pair(item)
            .ok_or_else(|| ConfigError::missing_item(self.name(), item))?;
        self.parse_value(item, value)
    }

    /// Parses an optional item, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the item is present but
    /// does not parse.
    pub fn parse_or<T>(&self, item: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.pair(item) {
            Some(value) => self.parse_value(item, value),
            None => Ok(default),
        }
    }

    /// Reads a boolean item accepting `yes`/`no`, `true`/`false`, `on`/`off`
    /// and `1`/`0`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for any other spelling.
    pub fn bool_or(&self, item: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.pair(item) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::invalid_value(
                self.name(),
                item,
                value,
                "expected yes or no",
            )),
        }
    }

    /// Resolves a dotted reference relative to this section.
    ///
    /// `.a.b` and `a.b` both name item `b` inside subsection `a`. References
    /// containing empty segments (such as `..a`) never resolve, so a
    /// reference cannot climb out of this section.
    #[must_use]
    pub fn reference(&self, path: &str) -> Option<&ConfigItem> {
        let relative = path.strip_prefix('.').unwrap_or(path);
        let mut segments = relative.split('.').peekable();
        let mut current = self;
        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return None;
            }
            let item = current.items.iter().find(|item| item.name() == segment)?;
            if segments.peek().is_none() {
                return Some(item);
            }
            current = item.as_section()?;
        }
        None
    }

    /// Converts a JSON value into a section called `name`.
    ///
    /// Objects become nested sections, arrays of strings become sections of
    /// bare words, and scalars become pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Structure`] when `value` is not an object or
    /// an array contains something other than strings.
    pub fn from_json(name: &str, value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => {
                let mut section = Self::new(name);
                for (key, entry) in map {
                    section.items.push(item_from_json(key, entry)?);
                }
                Ok(section)
            }
            Value::Array(words) => words_from_json(name, words),
            _ => Err(ConfigError::Structure {
                section: name.to_owned(),
                message: String::from("expected an object"),
            }),
        }
    }

    fn parse_value<T>(&self, item: &str, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        value
            .parse()
            .map_err(|error: T::Err| {
                ConfigError::invalid_value(self.name(), item, value, error.to_string())
            })
    }
}

fn item_from_json(key: &str, value: &Value) -> Result<ConfigItem, ConfigError> {
    let item = match value {
        Value::Object(_) | Value::Array(_) => {
            ConfigItem::Section(ConfigSection::from_json(key, value)?)
        }
        Value::String(text) => ConfigItem::Pair(ConfigPair::new(key, Some(text.clone()))),
        Value::Number(number) => ConfigItem::Pair(ConfigPair::new(key, Some(number.to_string()))),
        Value::Bool(flag) => ConfigItem::Pair(ConfigPair::new(
            key,
            Some(String::from(if *flag { "yes" } else { "no" })),
        )),
        Value::Null => ConfigItem::Pair(ConfigPair::new(key, None)),
    };
    Ok(item)
}

fn words_from_json(name: &str, words: &[Value]) -> Result<ConfigSection, ConfigError> {
    let mut section = ConfigSection::new(name);
    for word in words {
        let Value::String(text) = word else {
            return Err(ConfigError::Structure {
                section: name.to_owned(),
                message: format!("list entries must be strings, found {word}"),
            });
        };
        section = section.with_word(text.as_str());
    }
    Ok(section)
}

#[cfg(test)]
mod tests;
