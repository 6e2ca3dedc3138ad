//! Agent Configuration

use crate::domain::ports::{AgentContext, KeyValueStoreRef, ProcessSupervisorRef};
use crate::error::{Error, Result};
use crate::state::keys::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the OSD agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// This node's id in the store layout
    pub node_id: String,
    /// Local configuration root; OSD data directories live below it
    pub config_dir: PathBuf,
    /// Explicit devices to use; when empty the config dir becomes an OSD
    pub devices: Vec<String>,
    /// Format devices even if they already carry partitions
    pub force_format: bool,
    /// Crush location handed to OSD initialization
    pub location: Option<String>,
    /// Store namespace all keys live under
    pub store_namespace: String,
    /// Wait after formatting before initializing, in milliseconds
    pub format_settle_ms: u64,
    /// Interval between reconciliation passes, in seconds
    pub reconcile_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: "localhost".to_string(),
            config_dir: PathBuf::from("/var/lib/rook"),
            devices: Vec::new(),
            force_format: false,
            location: None,
            store_namespace: DEFAULT_NAMESPACE.to_string(),
            format_settle_ms: 2000,
            reconcile_interval_secs: 30,
        }
    }
}

impl AgentConfig {
    /// Load from a YAML file; missing fields take their defaults
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|e| {
            Error::Configuration(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Split a comma-separated device list, dropping empty entries
    pub fn parse_devices(devices: &str) -> Vec<String> {
        devices
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn format_settle(&self) -> Duration {
        Duration::from_millis(self.format_settle_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Build the node-local context for lifecycle hooks
    pub fn context(&self, store: KeyValueStoreRef, supervisor: ProcessSupervisorRef) -> AgentContext {
        AgentContext {
            node_id: self.node_id.clone(),
            config_dir: self.config_dir.clone(),
            store,
            supervisor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::Configuration("node id must not be empty".into()));
        }
        if self.node_id.contains('/') {
            return Err(Error::Configuration(format!(
                "node id '{}' must not contain '/'",
                self.node_id
            )));
        }
        if !self.config_dir.is_absolute() {
            return Err(Error::Configuration(format!(
                "config dir {} must be absolute",
                self.config_dir.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_devices() {
        assert_eq!(AgentConfig::parse_devices("sdb, sdc,,"), vec!["sdb", "sdc"]);
        assert!(AgentConfig::parse_devices("").is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(AgentConfig::default().validate().is_ok());

        let config = AgentConfig {
            node_id: "a/b".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            config_dir: PathBuf::from("relative"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agent.yaml");
        std::fs::write(
            &path,
            "node_id: node7\ndevices: [sdb, sdc]\nforce_format: true\n",
        )
        .unwrap();

        let config = AgentConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.node_id, "node7");
        assert_eq!(config.devices, vec!["sdb", "sdc"]);
        assert!(config.force_format);
        assert_eq!(config.format_settle(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_yaml_file_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agent.yaml");
        std::fs::write(&path, "devices: 12: 3").unwrap();
        assert!(matches!(
            AgentConfig::from_yaml_file(&path),
            Err(Error::Configuration(_))
        ));
    }
}
