//! Tree Configuration

use serde::Deserialize;

use crate::TreeError;
use crate::constant_pool::DEFAULT_KEY_BYTES;
use crate::listener_map::ALWAYS_TRUE_FILTER;

/// State tree configuration options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Filter expression the client evaluates as always true.
    /// Must match the client's expression evaluator.
    pub always_true_filter: String,

    /// Digest bytes kept in constant pool ids
    pub constant_key_bytes: usize,
}

impl TreeConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let config: TreeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.always_true_filter.is_empty() {
            return Err(TreeError::InvalidArgument(
                "always_true_filter must not be empty".into(),
            ));
        }
        if !(1..=32).contains(&self.constant_key_bytes) {
            return Err(TreeError::InvalidArgument(format!(
                "constant_key_bytes must be within 1..=32, got {}",
                self.constant_key_bytes
            )));
        }
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            always_true_filter: ALWAYS_TRUE_FILTER.to_string(),
            constant_key_bytes: DEFAULT_KEY_BYTES,
        }
    }
}
