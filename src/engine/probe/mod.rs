// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Block device probing. A probe returns one record per visible block
//! device; the device tree turns the records into devices.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use serde_derive::{Deserialize, Serialize};

use crate::{
    engine::host::{execute, Host},
    storage::{StorageError, StorageResult},
};

#[cfg(feature = "udev")]
pub use self::udev::UdevProbe;

#[cfg(feature = "udev")]
mod udev;

/// How the probe classified a block device.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceClass {
    Disk,
    Partition,
    DeviceMapper,
    MdRaid,
    Optical,
    Loop,
    Ram,
}

/// LVM physical volume metadata, when the device is a PV.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LvmPvInfo {
    pub vg_name: Option<String>,
    pub vg_uuid: Option<String>,
    /// Offset of the first physical extent, in MB.
    pub pe_start: Option<f64>,
    pub vg_pv_count: Option<usize>,
    /// Extent size of the volume group, in MB.
    pub vg_extent_size: Option<f64>,
    pub vg_extent_count: Option<u64>,
    pub vg_free_count: Option<u64>,
}

/// One probed block device.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlockDeviceInfo {
    /// Kernel name, e.g. "sda1" or "dm-0".
    pub name: String,
    pub devnode: Option<PathBuf>,
    pub major: u32,
    pub minor: u32,
    pub sysfs_path: String,
    pub class: DeviceClass,
    /// Size in MB.
    pub size: f64,
    pub uuid: Option<String>,
    pub label: Option<String>,
    /// The detected format type, e.g. "ext4" or "LVM2_member".
    pub format_type: Option<String>,
    /// Names of the devices this one is built on, for dm and md devices.
    #[serde(default)]
    pub slaves: Vec<String>,
    /// Device-mapper name, for dm devices.
    pub dm_name: Option<String>,
    pub dm_vg_name: Option<String>,
    pub dm_lv_name: Option<String>,
    /// Set when the device is a member of a firmware RAID set.
    pub dmraid_set: Option<String>,
    pub md_uuid: Option<String>,
    pub lvm: Option<LvmPvInfo>,
    /// For optical drives, whether a disc is loaded.
    #[serde(default)]
    pub media_present: bool,
}

impl BlockDeviceInfo {
    /// A minimal record of the given class.
    pub fn new(name: &str, class: DeviceClass, size: f64) -> BlockDeviceInfo {
        BlockDeviceInfo {
            name: name.to_string(),
            devnode: Some(PathBuf::from(format!("/dev/{name}"))),
            major: 0,
            minor: 0,
            sysfs_path: format!("/sys/class/block/{name}"),
            class,
            size,
            uuid: None,
            label: None,
            format_type: None,
            slaves: Vec::new(),
            dm_name: None,
            dm_vg_name: None,
            dm_lv_name: None,
            dmraid_set: None,
            md_uuid: None,
            lvm: None,
            media_present: false,
        }
    }

    /// A partition record, placed under its disk in sysfs.
    pub fn partition(name: &str, disk: &str, size: f64) -> BlockDeviceInfo {
        BlockDeviceInfo {
            sysfs_path: format!("/sys/block/{disk}/{name}"),
            ..BlockDeviceInfo::new(name, DeviceClass::Partition, size)
        }
    }

    /// Name of the disk a partition lives on: the last component of the
    /// parent of its sysfs path.
    pub fn parent_disk_name(&self) -> Option<String> {
        PathBuf::from(&self.sysfs_path)
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

const PVS_FIELDS: &str =
    "vg_name,vg_uuid,pe_start,pv_count,vg_extent_size,vg_extent_count,vg_free_count";

/// Read the volume group metadata of a physical volume with `lvm pvs`.
/// Fields lvm leaves blank, as it does for an orphan PV, are None.
pub fn lvm_pv_info(host: &dyn Host, devnode: &Path) -> StorageResult<LvmPvInfo> {
    let devnode = devnode.to_string_lossy();
    let stdout = execute(
        host,
        "lvm",
        &[
            "pvs",
            "--noheadings",
            "--nosuffix",
            "--units",
            "m",
            "--separator",
            ",",
            "-o",
            PVS_FIELDS,
            &devnode,
        ],
    )?;
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| StorageError::Lvm(format!("pvs reported nothing for {devnode}")))?;
    parse_pvs_line(line)
}

fn parse_pvs_line(line: &str) -> StorageResult<LvmPvInfo> {
    let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
    if fields.len() != 7 {
        return Err(StorageError::Lvm(format!(
            "unexpected pvs output \"{line}\""
        )));
    }
    let text = |i: usize| Some(fields[i]).filter(|f| !f.is_empty()).map(String::from);
    Ok(LvmPvInfo {
        vg_name: text(0),
        vg_uuid: text(1),
        pe_start: text(2).map(|f| f.parse::<f64>()).transpose()?,
        vg_pv_count: text(3).map(|f| f.parse::<usize>()).transpose()?,
        vg_extent_size: text(4).map(|f| f.parse::<f64>()).transpose()?,
        vg_extent_count: text(5).map(|f| f.parse::<u64>()).transpose()?,
        vg_free_count: text(6).map(|f| f.parse::<u64>()).transpose()?,
    })
}

pub trait BlockDeviceProbe {
    /// All block devices currently visible. Blocks until the scan is done.
    fn block_devices(&mut self) -> StorageResult<Vec<BlockDeviceInfo>>;
}

/// A probe that replays scripted scan results. Each call returns the next
/// scripted pass; once the script is exhausted the last pass repeats,
/// which is what a settled system looks like.
#[derive(Debug, Default)]
pub struct SimProbe {
    passes: VecDeque<Vec<BlockDeviceInfo>>,
    last: Vec<BlockDeviceInfo>,
    scans: usize,
}

impl SimProbe {
    pub fn new(devices: Vec<BlockDeviceInfo>) -> SimProbe {
        SimProbe {
            passes: VecDeque::from(vec![devices]),
            last: Vec::new(),
            scans: 0,
        }
    }

    /// A probe whose view grows over successive scans.
    pub fn with_passes(passes: Vec<Vec<BlockDeviceInfo>>) -> SimProbe {
        SimProbe {
            passes: passes.into(),
            last: Vec::new(),
            scans: 0,
        }
    }

    /// How many scans have been made.
    pub fn scans(&self) -> usize {
        self.scans
    }
}

impl BlockDeviceProbe for SimProbe {
    fn block_devices(&mut self) -> StorageResult<Vec<BlockDeviceInfo>> {
        self.scans += 1;
        if let Some(pass) = self.passes.pop_front() {
            self.last = pass;
        }
        Ok(self.last.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::host::SimHost;

    use super::*;

    #[test]
    fn test_parent_disk_name() {
        let mut info = BlockDeviceInfo::new("sda1", DeviceClass::Partition, 100.0);
        info.sysfs_path = "/sys/devices/pci0000:00/ata1/block/sda/sda1".into();
        assert_eq!(info.parent_disk_name().as_deref(), Some("sda"));
    }

    #[test]
    fn test_lvm_pv_info() {
        let host = SimHost::new();
        host.set_output(
            "lvm",
            "  VolGroup00,AbC-123,0.19,2,32.00,1000,10\n",
        );
        let info = lvm_pv_info(&host, Path::new("/dev/sda2")).unwrap();
        assert_eq!(info.vg_name.as_deref(), Some("VolGroup00"));
        assert_eq!(info.vg_pv_count, Some(2));
        assert_eq!(info.vg_extent_size, Some(32.0));
        assert_eq!(info.vg_free_count, Some(10));
    }

    #[test]
    /// An orphan physical volume has no volume group fields.
    fn test_orphan_pv() {
        let info = parse_pvs_line(",,0.19,,,,").unwrap();
        assert_eq!(info.vg_name, None);
        assert_eq!(info.pe_start, Some(0.19));
        assert!(parse_pvs_line("a,b").is_err());
    }

    #[test]
    fn test_sim_probe_repeats_last_pass() {
        let sda = BlockDeviceInfo::new("sda", DeviceClass::Disk, 1024.0);
        let sdb = BlockDeviceInfo::new("sdb", DeviceClass::Disk, 1024.0);
        let mut probe = SimProbe::with_passes(vec![vec![sda.clone()], vec![sda, sdb]]);
        assert_eq!(probe.block_devices().unwrap().len(), 1);
        assert_eq!(probe.block_devices().unwrap().len(), 2);
        assert_eq!(probe.block_devices().unwrap().len(), 2);
        assert_eq!(probe.scans(), 3);
    }
}
