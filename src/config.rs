use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{CollectiveErr, DataSplit, PartitionInfo, Result};

pub const SPLIT_VAR: &str = "COLLECTIVE_SPLIT";
pub const FEDERATED_VAR: &str = "COLLECTIVE_FEDERATED";
pub const ENCRYPTED_VAR: &str = "COLLECTIVE_ENCRYPTED";

/// Process-wide settings of the aggregation layer, fixed for a training job.
///
/// ```json
/// { "split": "column", "federated": true, "encrypted": false }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveConfig {
    #[serde(flatten)]
    pub partition: PartitionInfo,
    /// Whether gradients must be encrypted before leaving the leader in
    /// vertical federated learning.
    #[serde(default)]
    pub encrypted: bool,
}

impl CollectiveConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reads `COLLECTIVE_SPLIT`, `COLLECTIVE_FEDERATED` and `COLLECTIVE_ENCRYPTED`,
    /// unset variables keep their default.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable lookup.
    ///
    /// # Arguments
    /// * `var` - Returns the value of a variable, `None` if unset.
    ///
    /// # Returns
    /// The config, or `CollectiveErr::Config` if a value can't be parsed.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(split) = var(SPLIT_VAR) {
            config.partition.split = parse_split(&split)?;
        }

        if let Some(federated) = var(FEDERATED_VAR) {
            config.partition.federated = parse_flag(FEDERATED_VAR, &federated)?;
        }

        if let Some(encrypted) = var(ENCRYPTED_VAR) {
            config.encrypted = parse_flag(ENCRYPTED_VAR, &encrypted)?;
        }

        Ok(config)
    }
}

fn parse_split(value: &str) -> Result<DataSplit> {
    match value.trim().to_ascii_lowercase().as_str() {
        "row" => Ok(DataSplit::Row),
        "column" | "col" => Ok(DataSplit::Column),
        other => Err(CollectiveErr::Config(format!(
            "{SPLIT_VAR} must be `row` or `column`, got `{other}`"
        ))),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(CollectiveErr::Config(format!(
            "{key} must be a boolean, got `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| map.get(key).cloned()
    }

    #[test]
    fn json_is_flat() {
        let config =
            CollectiveConfig::from_json(r#"{"split":"column","federated":true,"encrypted":true}"#)
                .unwrap();

        assert!(config.partition.is_vertical_federated());
        assert!(config.encrypted);
    }

    #[test]
    fn empty_env_is_default() {
        let config = CollectiveConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, CollectiveConfig::default());
        assert!(config.partition.is_row_split());
    }

    #[test]
    fn env_overrides() {
        let config = CollectiveConfig::from_vars(vars(&[
            (SPLIT_VAR, "Col"),
            (FEDERATED_VAR, "1"),
            (ENCRYPTED_VAR, "off"),
        ]))
        .unwrap();

        assert!(config.partition.is_vertical_federated());
        assert!(!config.encrypted);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = CollectiveConfig::from_vars(vars(&[(FEDERATED_VAR, "maybe")])).unwrap_err();
        assert!(matches!(err, CollectiveErr::Config(_)));

        let err = CollectiveConfig::from_vars(vars(&[(SPLIT_VAR, "diagonal")])).unwrap_err();
        assert!(err.to_string().contains("diagonal"));
    }
}
