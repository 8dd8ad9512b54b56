use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Any of these is fatal to a reduce run: an ambiguous mapping is never guessed.
#[derive(Debug, Error)]
pub enum MetadataLoadError {
    #[error("cannot read metadata {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed metadata {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("address {address} is mapped twice in {path} (to '{first}' and '{second}')")]
    DuplicateAddress {
        path: PathBuf,
        address: String,
        first: String,
        second: String,
    },

    #[error("entry {index} in {path} has an empty {field}")]
    EmptyField {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorIdentity {
    pub address: String,
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    sensors: Vec<SensorIdentity>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Stream(&'a SensorIdentity),
    Unknown,
}

/// Hardware address to stream name mapping
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_address: HashMap<String, SensorIdentity>,
}

impl IdentityMap {
    /// Load a metadata document. `.yml`/`.yaml` files are read as YAML,
    /// anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, MetadataLoadError> {
        let content = fs::read_to_string(path).map_err(|source| MetadataLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        let document: MetadataDocument = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| MetadataLoadError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| MetadataLoadError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        let map = Self::from_entries(path, document.sensors)?;
        info!(path = %path.display(), sensors = map.len(), "Metadata loaded");
        Ok(map)
    }

    fn from_entries(path: &Path, entries: Vec<SensorIdentity>) -> Result<Self, MetadataLoadError> {
        let mut by_address: HashMap<String, SensorIdentity> = HashMap::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let empty = |field| MetadataLoadError::EmptyField {
                path: path.to_path_buf(),
                index,
                field,
            };
            if entry.address.trim().is_empty() {
                return Err(empty("address"));
            }
            if entry.stream_name.trim().is_empty() {
                return Err(empty("stream_name"));
            }

            if let Some(existing) = by_address.get(&entry.address) {
                return Err(MetadataLoadError::DuplicateAddress {
                    path: path.to_path_buf(),
                    address: entry.address,
                    first: existing.stream_name.clone(),
                    second: entry.stream_name,
                });
            }
            by_address.insert(entry.address.clone(), entry);
        }

        Ok(Self { by_address })
    }

    pub fn resolve(&self, address: &str) -> Resolution<'_> {
        match self.by_address.get(address) {
            Some(identity) => Resolution::Stream(identity),
            None => Resolution::Unknown,
        }
    }

    /// Unit configured for a stream, if any address maps to it with one
    pub fn unit_for_stream(&self, stream_name: &str) -> Option<&str> {
        self.by_address
            .values()
            .filter(|s| s.stream_name == stream_name)
            .find_map(|s| s.unit.as_deref())
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_json_and_resolve() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "sensors.json",
            r#"{"sensors": [
                {"address": "28-011912588b87", "stream_name": "office_air", "unit": "degC"},
                {"address": "28-01191264a9f0", "stream_name": "garage"}
            ]}"#,
        );

        let map = IdentityMap::load(&path).unwrap();
        assert_eq!(map.len(), 2);
        match map.resolve("28-011912588b87") {
            Resolution::Stream(identity) => assert_eq!(identity.stream_name, "office_air"),
            Resolution::Unknown => panic!("expected a mapped stream"),
        }
        assert_eq!(map.resolve("28-ffffffffffff"), Resolution::Unknown);
        assert_eq!(map.unit_for_stream("office_air"), Some("degC"));
        assert_eq!(map.unit_for_stream("garage"), None);
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "sensors.yml",
            "sensors:\n  - address: 28-01\n    stream_name: boiler_out\n    label: Boiler flow\n",
        );

        let map = IdentityMap::load(&path).unwrap();
        assert!(matches!(map.resolve("28-01"), Resolution::Stream(s) if s.label.as_deref() == Some("Boiler flow")));
    }

    #[test]
    fn test_duplicate_address_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "sensors.json",
            r#"{"sensors": [
                {"address": "28-01", "stream_name": "office_air"},
                {"address": "28-01", "stream_name": "garage"}
            ]}"#,
        );

        let err = IdentityMap::load(&path).unwrap_err();
        assert!(matches!(err, MetadataLoadError::DuplicateAddress { ref address, .. } if address == "28-01"));
        assert!(err.to_string().contains("office_air"));
    }

    #[test]
    fn test_malformed_and_missing_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "sensors.json", r#"{"sensors": {"28-01": "office"}}"#);
        assert!(matches!(
            IdentityMap::load(&path),
            Err(MetadataLoadError::Malformed { .. })
        ));

        assert!(matches!(
            IdentityMap::load(&dir.path().join("absent.json")),
            Err(MetadataLoadError::Io { .. })
        ));
    }

    #[test]
    fn test_empty_stream_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "sensors.json",
            r#"{"sensors": [{"address": "28-01", "stream_name": " "}]}"#,
        );
        assert!(matches!(
            IdentityMap::load(&path),
            Err(MetadataLoadError::EmptyField { field: "stream_name", .. })
        ));
    }
}
