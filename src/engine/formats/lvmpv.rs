// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use log::info;

use crate::{
    engine::host::{execute, Host},
    storage::{FormatErrorKind, StorageError, StorageResult},
};

/// Default offset of the first physical extent, in MB.
pub const DEFAULT_PE_START: f64 = 0.1875;

/// An LVM physical volume.
#[derive(Clone, Debug, PartialEq)]
pub struct LvmPv {
    pub vg_name: Option<String>,
    pub vg_uuid: Option<String>,
    pub pe_start: f64,
}

impl Default for LvmPv {
    fn default() -> LvmPv {
        LvmPv {
            vg_name: None,
            vg_uuid: None,
            pe_start: DEFAULT_PE_START,
        }
    }
}

impl LvmPv {
    pub(super) fn create(host: &dyn Host, device: &Path) -> StorageResult<()> {
        execute(
            host,
            "lvm",
            &["pvcreate", "-ff", "-y", &device.to_string_lossy()],
        )
        .map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::PhysicalVolume,
                format!("pvcreate failed for {}", device.display()),
                e,
            )
        })?;
        info!("Created LVM physical volume on {}", device.display());
        Ok(())
    }

    pub(super) fn destroy(host: &dyn Host, device: &Path) -> StorageResult<()> {
        execute(
            host,
            "lvm",
            &["pvremove", "-ff", "-y", &device.to_string_lossy()],
        )
        .map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::PhysicalVolume,
                format!("pvremove failed for {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }
}

/// A member of a software RAID array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MdMember {
    pub md_uuid: Option<String>,
}

impl MdMember {
    pub(super) fn destroy(host: &dyn Host, device: &Path) -> StorageResult<()> {
        execute(
            host,
            "mdadm",
            &["--zero-superblock", &device.to_string_lossy()],
        )
        .map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::Destroy,
                format!("failed to zero the md superblock on {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }
}

/// A member of a firmware RAID set. The set metadata is owned by the
/// firmware, so members are never created or destroyed here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DmRaidMember {
    pub raid_set: Option<String>,
}
