// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Controller configuration and per-binding options.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a rebind treats previously rendered nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindMode {
    /// Patch live nodes from a tree diff.
    #[default]
    Merge,
    /// Discard and re-render; falls back to a merge while child bindings live
    /// beneath the binding.
    Overwrite,
}

impl FromStr for BindMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::InvalidMode {
                field: "mode",
                value: other.to_owned(),
            }),
        }
    }
}

/// Where a top-level binding places its nodes inside the target element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertMode {
    /// The target's previous children are removed on first bind.
    #[default]
    Replace,
    /// Rendered nodes follow the target's existing children.
    Append,
    /// Rendered nodes precede the target's existing children.
    Prepend,
}

impl FromStr for InsertMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            other => Err(ConfigError::InvalidMode {
                field: "insert",
                value: other.to_owned(),
            }),
        }
    }
}

/// Controller-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindConfig {
    /// Maximum sessions per batch.
    pub batch_size: usize,
    /// Scheduler polls between watchdog scans; `0` disables the scan.
    pub watchdog_interval: u32,
    /// Mode given to new bindings.
    pub default_mode: BindMode,
    /// Insertion mode given to new top-level bindings.
    pub default_insert: InsertMode,
    /// Attributes reconciled token by token.
    pub multi_value_attributes: Vec<String>,
    /// Attribute declaring a child region.
    pub bind_attribute: String,
    /// Maximum nesting of child bindings.
    pub max_depth: usize,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            watchdog_interval: 64,
            default_mode: BindMode::Merge,
            default_insert: InsertMode::Replace,
            multi_value_attributes: vec!["class".to_owned()],
            bind_attribute: "data-bind".to_owned(),
            max_depth: 64,
        }
    }
}

impl BindConfig {
    /// Parses a JSON config; absent fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config as pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size"));
        }
        if self.bind_attribute.is_empty() {
            return Err(ConfigError::InvalidValue("bind_attribute"));
        }
        Ok(())
    }

    /// Returns `true` if `name` is reconciled token by token.
    pub fn is_multi_value(&self, name: &str) -> bool {
        self.multi_value_attributes.iter().any(|a| a == name)
    }
}

/// Options carried by one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    /// Merge or overwrite on rebind.
    pub mode: BindMode,
    /// Placement inside the target element (top-level bindings only).
    pub insert: InsertMode,
    /// Bind child regions; when `false` regions stay empty.
    pub recursive: bool,
    /// Keep descendant events off the controller-level listeners.
    pub suppress_child_events: bool,
}

impl BindOptions {
    /// Defaults taken from `config`.
    pub fn from_config(config: &BindConfig) -> Self {
        Self {
            mode: config.default_mode,
            insert: config.default_insert,
            recursive: true,
            suppress_child_events: false,
        }
    }
}

impl Default for BindOptions {
    fn default() -> Self {
        Self::from_config(&BindConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_and_reject() {
        assert_eq!("overwrite".parse::<BindMode>().unwrap(), BindMode::Overwrite);
        assert_eq!("prepend".parse::<InsertMode>().unwrap(), InsertMode::Prepend);
        let err = "sideways".parse::<InsertMode>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMode { field: "insert", .. }));
    }

    #[test]
    fn json_fills_defaults() {
        let cfg = BindConfig::from_json(r#"{"batch_size": 4, "default_mode": "overwrite"}"#).unwrap();
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.default_mode, BindMode::Overwrite);
        assert_eq!(cfg.bind_attribute, "data-bind");
        assert!(cfg.is_multi_value("class"));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let err = BindConfig::from_json(r#"{"batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("batch_size")));
        assert!(BindConfig::from_json(r#"{"nope": 1}"#).is_err());
    }

    #[test]
    fn json_round_trips() {
        let cfg = BindConfig::default();
        assert_eq!(BindConfig::from_json(&cfg.to_json().unwrap()).unwrap(), cfg);
    }
}
