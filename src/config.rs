use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::types::{
    MAX_PAGE_SIZE, MAX_RESERVED_BYTES, MIN_PAGE_SIZE,
    error::{DatabaseError, Result},
};

const MIN_COMPRESSION_LEVEL: i32 = 1;
const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Knobs shared by backup, repair and restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Page size to assume instead of reading it from the header.
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub reserved_bytes: Option<usize>,
    /// Cells assembled between two milestones.
    #[serde(default = "default_milestone_interval")]
    pub milestone_interval: u64,
    #[serde(default = "default_page_cache_capacity")]
    pub page_cache_capacity: usize,
    /// Read the main file only, ignoring any WAL.
    #[serde(default)]
    pub skip_wal: bool,
    /// Zstd level for material bodies (1-22).
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Materials kept by the store after a backup.
    #[serde(default = "default_keep_materials")]
    pub keep_materials: usize,
}

fn default_milestone_interval() -> u64 {
    1000
}

fn default_page_cache_capacity() -> usize {
    512
}

fn default_compression_level() -> i32 {
    3
}

fn default_keep_materials() -> usize {
    2
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            reserved_bytes: None,
            milestone_interval: default_milestone_interval(),
            page_cache_capacity: default_page_cache_capacity(),
            skip_wal: false,
            compression_level: default_compression_level(),
            keep_materials: default_keep_materials(),
        }
    }
}

impl RepairConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| DatabaseError::SerializationError {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| DatabaseError::SerializationError {
            details: e.to_string(),
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(page_size) = self.page_size {
            if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
                return Err(DatabaseError::Misuse {
                    details: format!("page_size must be a power of two in 512-65536, got {}", page_size),
                });
            }
        }
        if let Some(reserved_bytes) = self.reserved_bytes {
            if reserved_bytes > MAX_RESERVED_BYTES {
                return Err(DatabaseError::Misuse {
                    details: format!("reserved_bytes must be <= 255, got {}", reserved_bytes),
                });
            }
        }
        if self.milestone_interval == 0 {
            return Err(DatabaseError::Misuse {
                details: "milestone_interval must be > 0".to_string(),
            });
        }
        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(DatabaseError::Misuse {
                details: format!(
                    "compression_level must be {}-{}, got {}",
                    MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, self.compression_level
                ),
            });
        }
        Ok(())
    }

    /// Sets one field from its textual form, as typed in the shell.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || DatabaseError::Misuse {
            details: format!("Invalid value '{}' for {}", value, key),
        };
        let optional = |value: &str| -> Result<Option<usize>> {
            if value.eq_ignore_ascii_case("none") {
                Ok(None)
            } else {
                value.parse().map(Some).map_err(|_| invalid())
            }
        };

        let mut updated = self.clone();
        match key {
            "page_size" => updated.page_size = optional(value)?,
            "reserved_bytes" => updated.reserved_bytes = optional(value)?,
            "milestone_interval" => updated.milestone_interval = value.parse().map_err(|_| invalid())?,
            "page_cache_capacity" => updated.page_cache_capacity = value.parse().map_err(|_| invalid())?,
            "skip_wal" => updated.skip_wal = value.parse().map_err(|_| invalid())?,
            "compression_level" => updated.compression_level = value.parse().map_err(|_| invalid())?,
            "keep_materials" => updated.keep_materials = value.parse().map_err(|_| invalid())?,
            _ => {
                return Err(DatabaseError::Misuse {
                    details: format!("Unknown config key: {}", key),
                });
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
