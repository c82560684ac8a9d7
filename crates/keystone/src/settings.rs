//! Deployment settings.
//!
//! Settings are a string-keyed map of loosely-typed values. The core itself
//! consults three flags — `debug_authorization`, `prevent_http_cache`, and
//! `reload_templates` — but applications are free to stash anything here and
//! read it back through [`Settings::get`].
//!
//! Boolean flags accept the usual config spellings: real booleans, non-zero
//! numbers, and the strings `true`/`yes`/`on`/`1` (case-insensitive).

use crate::config::ConfigError;
use keystone_registry::TypeTag;
use serde_json::Value;
use std::collections::HashMap;

/// Utility tag the settings map is registered under.
pub const SETTINGS: TypeTag = TypeTag("keystone.settings");

/// String-keyed deployment settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    values: HashMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = HashMap::new();
        values.insert("debug_authorization".to_string(), Value::Bool(false));
        values.insert("prevent_http_cache".to_string(), Value::Bool(false));
        values.insert("reload_templates".to_string(), Value::Bool(false));
        Settings { values }
    }
}

impl Settings {
    /// The default settings: all core flags off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from key/value pairs layered over the defaults.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            settings.set(key, value);
        }
        settings
    }

    /// Parses a YAML mapping into settings layered over the defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let parsed: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|error| ConfigError::Settings(error.to_string()))?;
        let json: Value = serde_json::to_value(parsed)
            .map_err(|error| ConfigError::Settings(error.to_string()))?;
        Self::from_object(json)
    }

    /// Parses a JSON object into settings layered over the defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let json: Value = serde_json::from_str(text)
            .map_err(|error| ConfigError::Settings(error.to_string()))?;
        Self::from_object(json)
    }

    fn from_object(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => {
                let mut settings = Settings::default();
                for (key, value) in map {
                    settings.values.insert(key, value);
                }
                Ok(settings)
            }
            other => Err(ConfigError::Settings(format!(
                "expected a mapping of settings, got {other}"
            ))),
        }
    }

    /// Sets one value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merges another settings map into this one; `other` wins on collisions.
    pub fn merge(&mut self, other: &Settings) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Fetches a raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Reads a key as a boolean flag. Missing or unrecognized values are
    /// false.
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(text)) => {
                matches!(
                    text.trim().to_ascii_lowercase().as_str(),
                    "true" | "yes" | "on" | "1"
                )
            }
            _ => false,
        }
    }

    /// Whether authorization decisions should be logged.
    pub fn debug_authorization(&self) -> bool {
        self.flag("debug_authorization")
    }

    /// Whether automatic cache-header stamping is disabled process-wide.
    pub fn prevent_http_cache(&self) -> bool {
        self.flag("prevent_http_cache")
    }

    /// Whether templates should be reloaded on change. Informational to this
    /// core; renderers consult it through [`Settings::flag`].
    pub fn reload_templates(&self) -> bool {
        self.flag("reload_templates")
    }
}
