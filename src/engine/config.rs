// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fs, path::Path, time::Duration};

use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::{
    engine::{devices::CommitSettings, label::LabelType},
    storage::{StorageError, StorageResult},
};

const DEFAULT_MAX_POPULATE_PASSES: usize = 10;
const DEFAULT_COMMIT_ATTEMPTS: usize = 5;
const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 10;

/// Which existing partitions automatic partitioning removes.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClearPartType {
    /// Leave every partition in place.
    None,
    /// Remove partitions holding Linux filesystems, swap, LVM or RAID.
    Linux,
    #[default]
    All,
}

/// How a sized request picks among the free regions it fits in.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FitStrategy {
    /// The smallest region the request fits in.
    #[default]
    BestFit,
    /// The largest region the request fits in.
    LargestFit,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Disks populate skips, along with their partitions.
    pub ignored_disks: Vec<String>,
    /// Replace unreadable partition tables with empty ones rather than
    /// ignoring the disk.
    pub reinitialize_disks: bool,
    pub clear_part: ClearPartType,
    /// Drives clearing applies to; all drives when absent.
    pub clear_part_drives: Option<Vec<String>>,
    pub fit_strategy: FitStrategy,
    pub max_populate_passes: usize,
    pub commit_attempts: usize,
    pub settle_timeout_secs: u64,
    pub ext4_migrate: bool,
    /// Label written when a disk is initialized.
    pub label_type: LabelType,
}

impl Default for StorageConfig {
    fn default() -> StorageConfig {
        StorageConfig {
            ignored_disks: Vec::new(),
            reinitialize_disks: false,
            clear_part: ClearPartType::default(),
            clear_part_drives: None,
            fit_strategy: FitStrategy::default(),
            max_populate_passes: DEFAULT_MAX_POPULATE_PASSES,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
            settle_timeout_secs: DEFAULT_SETTLE_TIMEOUT_SECS,
            ext4_migrate: false,
            label_type: LabelType::default(),
        }
    }
}

impl StorageConfig {
    pub fn from_json(json: &str) -> StorageResult<StorageConfig> {
        let config = serde_json::from_str::<StorageConfig>(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. Fields the file leaves out take their
    /// defaults.
    pub fn load(path: &Path) -> StorageResult<StorageConfig> {
        let contents = fs::read_to_string(path)?;
        let config = StorageConfig::from_json(&contents).map_err(|e| {
            StorageError::Chained(
                format!("Invalid configuration in {}", path.display()),
                Box::new(e),
            )
        })?;
        info!("Loaded storage configuration from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> StorageResult<()> {
        if self.max_populate_passes == 0 {
            return Err(StorageError::Msg(
                "max_populate_passes must be at least 1".into(),
            ));
        }
        if self.commit_attempts == 0 {
            return Err(StorageError::Msg("commit_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn commit_settings(&self) -> CommitSettings {
        CommitSettings {
            attempts: self.commit_attempts,
            settle_timeout: Duration::from_secs(self.settle_timeout_secs),
        }
    }

    /// Whether clearing applies to `drive`.
    pub fn clears_drive(&self, drive: &str) -> bool {
        match &self.clear_part_drives {
            Some(drives) if !drives.is_empty() => drives.iter().any(|d| d == drive),
            _ => true,
        }
    }
}
