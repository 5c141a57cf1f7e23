//! Locale-keyed labels and the locale-string collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Locale key used for text that applies to every locale.
pub const ANY_LOCALE: &str = "*";

/// A label or description, either inline per locale or by catalog key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

impl LocalizedText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text looked up in a [`LocaleCatalog`] under `key`.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.values.insert(locale.into(), text.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.values.is_empty()
    }

    /// Resolve for `locale`.
    ///
    /// Order: inline text for `locale`, catalog entry for `locale` (which
    /// itself falls back to the catalog's default locale), inline text for
    /// `default_locale`, then locale-independent text.
    pub fn resolve(
        &self,
        locale: &str,
        default_locale: &str,
        catalog: Option<&dyn LocaleCatalog>,
    ) -> Option<String> {
        if let Some(text) = self.values.get(locale) {
            return Some(text.clone());
        }
        if let (Some(key), Some(catalog)) = (&self.key, catalog) {
            if let Some(text) = catalog.translate(key, locale) {
                return Some(text);
            }
        }
        self.values
            .get(default_locale)
            .or_else(|| self.values.get(ANY_LOCALE))
            .cloned()
    }
}

impl From<&str> for LocalizedText {
    fn from(text: &str) -> Self {
        Self::new().with(ANY_LOCALE, text)
    }
}

impl From<String> for LocalizedText {
    fn from(text: String) -> Self {
        Self::new().with(ANY_LOCALE, text)
    }
}

/// Source of translated strings.
pub trait LocaleCatalog: Send + Sync {
    fn default_locale(&self) -> &str;

    /// Exact lookup, no fallback.
    fn lookup(&self, key: &str, locale: &str) -> Option<String>;

    /// Lookup with fallback to the default locale.
    fn translate(&self, key: &str, locale: &str) -> Option<String> {
        self.lookup(key, locale)
            .or_else(|| self.lookup(key, self.default_locale()))
    }
}

/// In-memory catalog.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    default_locale: String,
    entries: BTreeMap<(String, String), String>,
}

impl StaticCatalog {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(
        mut self,
        key: impl Into<String>,
        locale: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.entries
            .insert((key.into(), locale.into()), text.into());
        self
    }
}

impl LocaleCatalog for StaticCatalog {
    fn default_locale(&self) -> &str {
        &self.default_locale
    }

    fn lookup(&self, key: &str, locale: &str) -> Option<String> {
        self.entries
            .get(&(key.to_string(), locale.to_string()))
            .cloned()
    }
}
