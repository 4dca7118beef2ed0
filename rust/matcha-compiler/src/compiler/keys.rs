//! Registry of declared context keys.
//!
//! Keys come from JSON symbol files of the shape
//! `[{"Key": "UserId", "Idx": 1001, "Type": "string"}, ...]`, pulled in by
//! `import` statements or loaded up front by the driver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyRegistryError {
    #[error("failed to read key file {file_name:?}: {source}")]
    Io {
        file_name: String,
        source: std::io::Error,
    },
    #[error("invalid key file {file_name:?}: {source}")]
    InvalidData {
        file_name: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key: String,
    pub index: i64,
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawKeyInfo {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Idx")]
    index: i64,
    #[serde(rename = "Type", default)]
    type_name: String,
}

#[derive(Debug, Default)]
pub struct KeyRegistry {
    key_infos: HashMap<String, KeyInfo>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, index: i64, type_name: &str) {
        self.key_infos.insert(
            key.to_string(),
            KeyInfo {
                key: key.to_string(),
                index,
                type_name: type_name.to_string(),
            },
        );
    }

    pub fn lookup(&self, key: &str) -> Option<&KeyInfo> {
        self.key_infos.get(key)
    }

    pub fn lookup_index(&self, key: &str) -> Option<i64> {
        self.key_infos.get(key).map(|info| info.index)
    }

    pub fn load_keys_from_file(&mut self, file_name: &Path) -> Result<(), KeyRegistryError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| KeyRegistryError::Io {
            file_name: file_name.display().to_string(),
            source,
        })?;
        self.load_keys_from_json(&data)
            .map_err(|source| KeyRegistryError::InvalidData {
                file_name: file_name.display().to_string(),
                source,
            })
    }

    pub fn load_keys_from_json(&mut self, data: &str) -> Result<(), serde_json::Error> {
        let raw_infos: Vec<RawKeyInfo> = serde_json::from_str(data)?;
        for raw in raw_infos {
            self.key_infos.insert(
                raw.key.clone(),
                KeyInfo {
                    key: raw.key,
                    index: raw.index,
                    type_name: raw.type_name,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_keys_from_json() {
        let mut registry = KeyRegistry::new();
        registry
            .load_keys_from_json(
                r#"[
                    {"Key": "UserId", "Idx": 1001, "Type": "string"},
                    {"Key": "Country", "Idx": 1002}
                ]"#,
            )
            .unwrap();
        assert_eq!(registry.lookup_index("UserId"), Some(1001));
        let country = registry.lookup("Country").unwrap();
        assert_eq!(country.index, 1002);
        assert_eq!(country.type_name, "");
        assert!(registry.lookup("Missing").is_none());
    }

    #[test]
    fn test_later_load_overrides() {
        let mut registry = KeyRegistry::new();
        registry.insert("K", 1, "string");
        registry
            .load_keys_from_json(r#"[{"Key": "K", "Idx": 2, "Type": "int"}]"#)
            .unwrap();
        assert_eq!(registry.lookup_index("K"), Some(2));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let mut registry = KeyRegistry::new();
        assert!(registry.load_keys_from_json("{\"Key\": 1}").is_err());
    }
}
