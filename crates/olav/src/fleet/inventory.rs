//! Inventory-of-record seam.
//!
//! The system of record (NetBox, a CMDB, a YAML file) lives outside the
//! core; [`StaticInventory`] is the file-backed reference implementation
//! used by the CLI and by tests.

use crate::error::{OlavError, Result};
use crate::fleet::device::{Device, DeviceSelector};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Devices satisfying a filter selector. Name-based selectors are
    /// resolved through [`InventoryProvider::get`] by the engine so that
    /// misses can be reported.
    async fn query(&self, selector: &DeviceSelector) -> Result<Vec<Device>>;

    /// Look up one device by name.
    async fn get(&self, name: &str) -> Result<Option<Device>>;
}

/// In-memory inventory, optionally loaded from a JSON document
/// (`[{"name": ..., "address": ..., "platform": ...}, ...]`).
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<Device>,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let devices: Vec<Device> = serde_json::from_str(&text)
            .map_err(|e| OlavError::Internal(format!("{}: {e}", path.display())))?;
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
    async fn query(&self, selector: &DeviceSelector) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| selector.filter_matches(d))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::device::test_device;

    fn inventory() -> StaticInventory {
        StaticInventory::new(vec![
            test_device("R1", "cisco_ios", &["core"]),
            test_device("R2", "cisco_ios", &["core"]),
            test_device("SW1", "arista_eos", &["access"]),
        ])
    }

    #[tokio::test]
    async fn query_by_group() {
        let devices = inventory()
            .query(&DeviceSelector::Group("core".into()))
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn query_all() {
        let devices = inventory().query(&DeviceSelector::All).await.unwrap();
        assert_eq!(devices.len(), 3);
    }

    #[tokio::test]
    async fn get_is_case_insensitive() {
        let device = inventory().get("r1").await.unwrap();
        assert_eq!(device.unwrap().name, "R1");
        assert!(inventory().get("R9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn from_file_parses_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(
            &path,
            r#"[{"name": "R1", "address": "10.0.0.1", "platform": "cisco_ios"}]"#,
        )
        .unwrap();
        let inv = StaticInventory::from_file(&path).unwrap();
        assert_eq!(inv.len(), 1);
        assert!(inv.get("R1").await.unwrap().is_some());
    }
}
