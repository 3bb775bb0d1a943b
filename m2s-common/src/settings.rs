// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory subsystem settings, populated from an INI file.
//!
//! ```ini
//! [Memory]
//! SafeMode = true
//! ManagerBase = 0xB0000000
//! MmuReport = mmu-report.txt
//! ```

use std::path::{Path, PathBuf};

use ini::Ini;
use log::{debug, info, warn};

use crate::types::{is_page_aligned, GuestAddr};

/// Name of the INI section holding memory settings.
pub const SECTION: &str = "Memory";

/// Default base of the heap managed by the guest allocator.
pub const DEFAULT_MANAGER_BASE: GuestAddr = 0xB000_0000;

/// Memory subsystem settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Whether new address spaces fault on unmapped or under-permissioned
    /// accesses instead of synthesizing pages.
    pub safe_mode: bool,
    /// Boundary between the allocator's sub-page heap (growing up) and its
    /// large-object region (growing down).
    pub manager_base: GuestAddr,
    /// Where to write the MMU access report, if anywhere.
    pub mmu_report: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            manager_base: DEFAULT_MANAGER_BASE,
            mmu_report: None,
        }
    }
}

impl MemoryConfig {
    /// Settings for a space that never faults.
    pub fn unsafe_mode() -> Self {
        Self {
            safe_mode: false,
            ..Self::default()
        }
    }

    /// Read the `[Memory]` section of a parsed INI document.
    ///
    /// Unknown keys are ignored; malformed values keep their defaults.
    pub fn from_ini(conf: &Ini) -> Self {
        let mut config = Self::default();

        let Some(section) = conf.section(Some(SECTION)) else {
            return config;
        };

        if let Some(value) = section.get("SafeMode") {
            match parse_bool(value) {
                Some(safe) => config.safe_mode = safe,
                None => warn!("[{SECTION}] SafeMode: invalid value '{value}'"),
            }
        }

        if let Some(value) = section.get("ManagerBase") {
            match parse_addr(value) {
                Some(base) if base != 0 && is_page_aligned(base as u64) => {
                    config.manager_base = base
                }
                _ => warn!(
                    "[{SECTION}] ManagerBase: '{value}' is not a non-zero page-aligned address"
                ),
            }
        }

        if let Some(value) = section.get("MmuReport") {
            let value = value.trim();
            if !value.is_empty() {
                config.mmu_report = Some(PathBuf::from(value));
            }
        }

        debug!("Memory config: {:?}", config);
        config
    }
}

/// Load memory settings from `path`, falling back to defaults when the file
/// is absent or cannot be parsed.
pub fn load_config(path: Option<&Path>) -> MemoryConfig {
    let Some(path) = path else {
        return MemoryConfig::default();
    };

    if !path.exists() {
        warn!("Config file not found: {}", path.display());
        return MemoryConfig::default();
    }

    info!("Loading memory config from: {}", path.display());

    match Ini::load_from_file(path) {
        Ok(conf) => MemoryConfig::from_ini(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            MemoryConfig::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_addr(value: &str) -> Option<GuestAddr> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => GuestAddr::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert!(config.safe_mode);
        assert_eq!(config.manager_base, DEFAULT_MANAGER_BASE);
        assert!(config.mmu_report.is_none());
        assert!(!MemoryConfig::unsafe_mode().safe_mode);
    }

    #[test]
    fn test_from_ini() {
        let conf = Ini::load_from_str(
            "[Memory]\nSafeMode = off\nManagerBase = 0x4000_0000\nMmuReport = report.txt\n",
        )
        .unwrap();
        let config = MemoryConfig::from_ini(&conf);
        assert!(!config.safe_mode);
        assert_eq!(config.manager_base, 0x4000_0000);
        assert_eq!(config.mmu_report, Some(PathBuf::from("report.txt")));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let conf =
            Ini::load_from_str("[Memory]\nSafeMode = maybe\nManagerBase = 0x1234\n").unwrap();
        assert_eq!(MemoryConfig::from_ini(&conf), MemoryConfig::default());
    }

    #[test]
    fn test_missing_section() {
        let conf = Ini::load_from_str("[Other]\nSafeMode = 0\n").unwrap();
        assert_eq!(MemoryConfig::from_ini(&conf), MemoryConfig::default());
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr("4096"), Some(4096));
        assert_eq!(parse_addr(" 0X1000 "), Some(0x1000));
        assert_eq!(parse_addr("0x1_0000_0000"), None);
        assert_eq!(parse_addr("banana"), None);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[Memory]\nSafeMode = 0\nManagerBase = 1073741824").unwrap();
        let config = load_config(Some(file.path()));
        assert!(!config.safe_mode);
        assert_eq!(config.manager_base, 0x4000_0000);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.ini")));
        assert_eq!(config, MemoryConfig::default());
        assert_eq!(load_config(None), MemoryConfig::default());
    }
}
