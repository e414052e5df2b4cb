//! Device description catalog.
//!
//! Flash geometry and the addresses of identity registers differ per
//! product ID, so they live in YAML description files rather than in code.
//! One file per device, named `stm32_<0xHEX>.yml`, keyed on the 12-bit id
//! returned by the GET_ID command. A missing record is not an error: the
//! session falls back to defaults and the identity queries report the
//! address as unknown.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;

use crate::Result;

/// Flash geometry of a device.
#[derive(Debug, Clone, Deserialize)]
pub struct FlashGeometry {
    /// Smallest erase unit in bytes.
    #[serde(rename = "PageSize")]
    pub page_size: u32,
}

/// A memory-mapped register location.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RegisterAddress {
    pub address: u32,
}

/// Bootloader identity block of a description file. `ID` holds the address
/// of the one-byte bootloader ID.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BootloaderId {
    #[serde(rename = "ID")]
    pub id: u32,
}

/// One device description, as loaded from a `stm32_<0xHEX>.yml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Series")]
    pub series: String,
    #[serde(rename = "CPU")]
    pub cpu: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Flash")]
    pub flash: FlashGeometry,
    /// Location of the 96-bit unique device ID, when documented.
    #[serde(rename = "UniversalID", default)]
    pub universal_id: Option<RegisterAddress>,
    /// Location of the 16-bit flash-size register, when documented.
    #[serde(rename = "FlashSize", default)]
    pub flash_size: Option<RegisterAddress>,
    #[serde(rename = "Bootloader", default)]
    pub bootloader: Option<BootloaderId>,
}

/// Parse a single YAML device description.
pub fn parse_record(yaml: &str) -> Result<DeviceRecord> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Device descriptions keyed by product ID.
#[derive(Debug, Default)]
pub struct Catalog {
    records: HashMap<u32, DeviceRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The descriptions bundled with the crate.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for yaml in [
            include_str!("../data/stm32_0x410.yml"),
            include_str!("../data/stm32_0x435.yml"),
        ] {
            catalog.insert(parse_record(yaml)?);
        }
        Ok(catalog)
    }

    /// Load every `stm32_*.yml` description found in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.starts_with("stm32_") || !name.ends_with(".yml") {
                continue;
            }
            match parse_record(&fs::read_to_string(&path)?) {
                Ok(record) => {
                    debug!("loaded device description {name}");
                    catalog.insert(record);
                }
                Err(error) => warn!("skipping {name}: {error}"),
            }
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, record: DeviceRecord) {
        self.records.insert(record.device_id, record);
    }

    /// Merge all records of `other` into this catalog, overriding duplicates.
    pub fn merge(&mut self, other: Catalog) {
        self.records.extend(other.records);
    }

    pub fn get(&self, device_id: u32) -> Option<&DeviceRecord> {
        self.records.get(&device_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_RECORD: &str = "\
DeviceID: 0x435
Name: STM32L43xxx/44xxx
Series: STM32L4
CPU: Cortex-M4
Description: Ultra-low-power
Flash:
  PageSize: 2048
FlashSize:
  address: 0x1FFF75E0
UniversalID:
  address: 0x1FFF7590
Bootloader:
  ID: 0x1FFF6FFE
";

    #[test]
    fn parses_a_full_record() {
        let record = parse_record(FULL_RECORD).unwrap();
        assert_eq!(record.device_id, 0x435);
        assert_eq!(record.flash.page_size, 2048);
        assert_eq!(record.universal_id.unwrap().address, 0x1FFF_7590);
        assert_eq!(record.flash_size.unwrap().address, 0x1FFF_75E0);
        assert_eq!(record.bootloader.unwrap().id, 0x1FFF_6FFE);
    }

    #[test]
    fn address_blocks_are_optional() {
        let yaml = "\
DeviceID: 0x999
Name: Mystery
Series: STM32X
CPU: Cortex-M0
Description: No identity registers documented
Flash:
  PageSize: 512
";
        let record = parse_record(yaml).unwrap();
        assert!(record.universal_id.is_none());
        assert!(record.flash_size.is_none());
        assert!(record.bootloader.is_none());
    }

    #[test]
    fn missing_required_fields_fail() {
        assert!(parse_record("DeviceID: 0x410\nName: incomplete\n").is_err());
    }

    #[test]
    fn builtin_catalog_resolves_known_ids() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.len() >= 2);
        assert_eq!(catalog.get(0x410).unwrap().flash.page_size, 1024);
        assert_eq!(catalog.get(0x435).unwrap().series, "STM32L4");
        assert!(catalog.get(0xFFF).is_none());
    }

    #[test]
    fn load_dir_picks_up_description_files() {
        let dir = std::env::temp_dir().join(format!("stm32boot-catalog-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stm32_0x435.yml"), FULL_RECORD).unwrap();
        fs::write(dir.join("README.txt"), "not a description").unwrap();

        let catalog = Catalog::load_dir(&dir).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get(0x435).is_some());

        fs::remove_dir_all(&dir).unwrap();
    }
}
