use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Engine-wide behaviour switches
///
/// # Example
/// ```ignore
/// // Defaults
/// let fields = ComputedFields::new(&record, spec);
///
/// // Builder
/// let config = EngineConfig::new()
///     .revalidate_on_quiet_update(true)
///     .backpropagate_unchanged(false);
/// let fields = ComputedFields::with_config(&record, spec, config);
///
/// // From JSON, missing keys take their defaults
/// let config = EngineConfig::from_json(r#"{ "revalidate_on_quiet_update": true }"#)?;
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run the record's validator when a quiet field stores a recomputed value.
    ///
    /// Quiet writes are silent writes, which the record does not validate by
    /// default. With this set, an invalid recomputed value is rejected and the
    /// field keeps its previous value.
    pub revalidate_on_quiet_update: bool,

    /// Run the setter even when the getter already yields the written value.
    ///
    /// When false, a direct write to a computed field first evaluates the
    /// getter on the current dependencies; if that reproduces the written
    /// value the dependencies are left untouched.
    pub backpropagate_unchanged: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            revalidate_on_quiet_update: false,
            backpropagate_unchanged: true,
        }
    }
}

impl EngineConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`EngineConfig::revalidate_on_quiet_update`]
    pub fn revalidate_on_quiet_update(mut self, revalidate: bool) -> Self {
        self.revalidate_on_quiet_update = revalidate;
        self
    }

    /// See [`EngineConfig::backpropagate_unchanged`]
    pub fn backpropagate_unchanged(mut self, backpropagate: bool) -> Self {
        self.backpropagate_unchanged = backpropagate;
        self
    }

    /// Parse a configuration from JSON
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }
}
