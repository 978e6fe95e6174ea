use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// What `get_or` may replace with the caller's default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only exhaustion of the stack.
    MissOnly,
    /// Exhaustion, getter failures and unresolvable templates. Structural
    /// errors still surface.
    #[default]
    SoftErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineOptions {
    /// Bound on template nesting and subtree embedding per lookup.
    pub max_depth: usize,
    pub expand_templates: bool,
    pub fallback: FallbackPolicy,
    /// Applied to lookups that do not carry their own deadline.
    pub default_timeout_ms: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            expand_templates: true,
            fallback: FallbackPolicy::SoftErrors,
            default_timeout_ms: None,
        }
    }
}

impl EngineOptions {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Self = toml::from_str(content)
            .map_err(|err| Error::Config(format!("failed to parse engine options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::Config("max_depth must be at least 1".to_owned()));
        }
        if self.default_timeout_ms == Some(0) {
            return Err(Error::Config(
                "default_timeout_ms must be positive when set".to_owned(),
            ));
        }
        Ok(())
    }
}
