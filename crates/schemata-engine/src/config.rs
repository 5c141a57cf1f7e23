//! Executor configuration.

/// Configuration for the operation executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Escalate side-effect errors (cache, versioning) instead of logging
    /// and swallowing them.
    pub strict: bool,
    /// Locale used when neither the call nor its options name one.
    pub default_locale: String,
    /// Maximum nesting of operations issued from inside the pipeline
    /// (cascades, includes, auxiliary writes).
    pub max_cascade_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            default_locale: "en".to_string(),
            max_cascade_depth: 8,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    pub fn max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }
}
