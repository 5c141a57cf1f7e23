//! Search metadata fields.
//!
//! Adds `meta_title` and `meta_description` to every collection with a
//! title field and fills them from the content when a write leaves them
//! empty.

use std::sync::Arc;

use schemata_core::{FieldDeclaration, HookArgs, HookBinding, HookSignal, Result, Value};
use schemata_schema::{Extension, Plugin};

/// Plugin name.
pub const SEO: &str = "seo";

pub const META_TITLE: &str = "meta_title";
pub const META_DESCRIPTION: &str = "meta_description";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeoConfig {
    pub title_field: String,
    /// Source of the description; left empty when unset.
    pub description_field: Option<String>,
    pub title_max: usize,
    pub description_max: usize,
}

impl Default for SeoConfig {
    fn default() -> Self {
        Self {
            title_field: "title".to_string(),
            description_field: None,
            title_max: 60,
            description_max: 160,
        }
    }
}

impl SeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title_field(mut self, field: impl Into<String>) -> Self {
        self.title_field = field.into();
        self
    }

    pub fn description_field(mut self, field: impl Into<String>) -> Self {
        self.description_field = Some(field.into());
        self
    }

    pub fn limits(mut self, title_max: usize, description_max: usize) -> Self {
        self.title_max = title_max;
        self.description_max = description_max;
        self
    }
}

/// First `max` characters of `text`, trimmed.
fn truncate(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect::<String>().trim_end().to_string()
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn fill(args: &mut HookArgs, target: &str, source: &str, max: usize) {
    if !is_blank(args.get(target)) {
        return;
    }
    let value = match args.get(source) {
        Some(Value::String(text)) => truncate(text, max),
        _ => return,
    };
    if !value.is_empty() {
        args.set(target, value);
    }
}

fn fill_metadata(config: &SeoConfig, args: &mut HookArgs) -> Result<HookSignal> {
    fill(args, META_TITLE, &config.title_field, config.title_max);
    if let Some(source) = &config.description_field {
        fill(args, META_DESCRIPTION, source, config.description_max);
    }
    Ok(HookSignal::Continue)
}

/// Search metadata for the collections it is applied to.
pub fn seo(config: SeoConfig) -> Plugin {
    let config = Arc::new(config);
    Plugin::new(SEO).extend(move |draft| {
        if draft.is_auxiliary() || !draft.has_field(&config.title_field) {
            return Ok(Extension::new());
        }
        let hook_config = Arc::clone(&config);
        Ok(Extension::new()
            .field(
                META_TITLE,
                FieldDeclaration::text().option("max_length", config.title_max),
            )
            .field(
                META_DESCRIPTION,
                FieldDeclaration::text().option("max_length", config.description_max),
            )
            .hook(HookBinding::before_change("fill_metadata", move |args| {
                fill_metadata(&hook_config, args)
            })))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::{OperationContext, OperationKind, json};

    fn hook_args(data: Value, previous: Option<Value>) -> HookArgs {
        let mut args = HookArgs::new("pages", OperationKind::Update, OperationContext::new());
        if let Value::Object(map) = data {
            args.data = map;
        }
        if let Some(Value::Object(map)) = previous {
            args.previous = vec![map];
        }
        args
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("  héllo wörld ", 7), "héllo w");
        assert_eq!(truncate("abc   def", 5), "abc");
    }

    #[test]
    fn test_fills_missing_metadata() {
        let config = SeoConfig::new().description_field("body").limits(5, 8);
        let mut args = hook_args(json!({"title": "Hello world", "body": "A long body text"}), None);
        fill_metadata(&config, &mut args).unwrap();
        assert_eq!(args.data["meta_title"], json!("Hello"));
        assert_eq!(args.data["meta_description"], json!("A long b"));
    }

    #[test]
    fn test_keeps_existing_metadata() {
        let config = SeoConfig::default();
        let mut args = hook_args(
            json!({"title": "New title"}),
            Some(json!({"title": "Old", "meta_title": "Custom"})),
        );
        fill_metadata(&config, &mut args).unwrap();
        assert!(!args.data.contains_key("meta_title"));

        let mut args = hook_args(json!({"title": "Fallback", "meta_title": "  "}), None);
        fill_metadata(&config, &mut args).unwrap();
        assert_eq!(args.data["meta_title"], json!("Fallback"));
    }
}
