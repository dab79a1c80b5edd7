// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Compartment configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CompartmentError, Result};

/// Default compartment name
pub const DEFAULT_NAME: &str = "compartment";

/// Default reserved export name excluded from `export *`
pub const DEFAULT_EXPORT: &str = "default";

/// Configuration for a compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompartmentConfig {
    /// Name used in diagnostics and errors
    pub name: String,

    /// Export name that `export * from` never forwards
    pub default_export: String,

    /// Maximum number of module loads in flight per `load` call (0 = unbounded)
    pub max_concurrent_loads: usize,
}

impl Default for CompartmentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            default_export: DEFAULT_EXPORT.to_string(),
            max_concurrent_loads: 0,
        }
    }
}

impl CompartmentConfig {
    /// Create a default configuration with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration overridden by `COMPARTMENT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        Ok(config)
    }

    /// Apply `COMPARTMENT_*` environment variables on top of this configuration.
    pub fn load_from_env(&mut self) -> Result<()> {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("COMPARTMENT_") {
                let config_key = config_key.to_lowercase().replace('_', "-");
                self.set(&config_key, &value)?;
            }
        }
        Ok(())
    }

    /// Set a configuration value by its dashed key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "name" => self.name = value.to_string(),
            "default-export" => self.default_export = value.to_string(),
            "max-concurrent-loads" => {
                self.max_concurrent_loads = value.parse().map_err(|_| {
                    CompartmentError::Config(format!(
                        "max-concurrent-loads must be a non-negative integer, got '{}'",
                        value
                    ))
                })?;
            }
            _ => {
                tracing::warn!("Ignoring unknown configuration key '{}'", key);
                return Ok(());
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.default_export.is_empty() {
            return Err(CompartmentError::Config(
                "default-export must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompartmentConfig::default();
        assert_eq!(config.name, "compartment");
        assert_eq!(config.default_export, "default");
        assert_eq!(config.max_concurrent_loads, 0);
    }

    #[test]
    fn test_from_json_partial() {
        let config = CompartmentConfig::from_json(r#"{"name": "app"}"#).unwrap();
        assert_eq!(config.name, "app");
        assert_eq!(config.default_export, "default");
    }

    #[test]
    fn test_from_json_invalid() {
        let err = CompartmentConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, CompartmentError::Json(_)));

        let err = CompartmentConfig::from_json(r#"{"default_export": ""}"#).unwrap_err();
        assert!(matches!(err, CompartmentError::Config(_)));
    }

    #[test]
    fn test_set() {
        let mut config = CompartmentConfig::named("a");
        config.set("max-concurrent-loads", "4").unwrap();
        config.set("default-export", "main").unwrap();
        assert_eq!(config.max_concurrent_loads, 4);
        assert_eq!(config.default_export, "main");

        assert!(config.set("max-concurrent-loads", "many").is_err());
        assert!(config.set("unknown", "x").is_ok());
    }
}
