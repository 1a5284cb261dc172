// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The device model. Every device shares one struct of common fields; the
//! kind specific part is a closed set of variants. Devices refer to each
//! other only by `DeviceId` into a `DeviceStore`.

mod lvm;
mod store;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde_derive::Serialize;

pub use self::{
    lvm::{align_to_extents, lv_device_name, DEFAULT_PE_SIZE},
    store::DeviceStore,
};

use crate::engine::{
    formats::{DeviceFormat, FormatArgs},
    label::{DiskLabel, PartType, PartitionId},
    types::DeviceId,
};

/// How partition table commits are carried out.
#[derive(Clone, Copy, Debug)]
pub struct CommitSettings {
    pub attempts: usize,
    pub settle_timeout: Duration,
}

impl Default for CommitSettings {
    fn default() -> CommitSettings {
        CommitSettings {
            attempts: 5,
            settle_timeout: Duration::from_secs(10),
        }
    }
}

/// What was asked of a partition that does not exist yet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartitionRequest {
    pub disks: Vec<String>,
    pub size: f64,
    pub max_size: Option<f64>,
    pub grow: bool,
    pub primary: bool,
    pub weight: i32,
}

#[derive(Clone, Debug)]
pub struct DiskData {
    label: Option<DiskLabel>,
    pub model: Option<String>,
}

impl DiskData {
    pub fn label(&self) -> Option<&DiskLabel> {
        self.label.as_ref()
    }

    pub fn label_mut(&mut self) -> Option<&mut DiskLabel> {
        self.label.as_mut()
    }

    pub(crate) fn set_label(&mut self, label: Option<DiskLabel>) {
        self.label = label;
    }
}

#[derive(Clone, Debug)]
pub struct PartitionData {
    /// The partition in the disk's label. None until the allocator has
    /// placed a requested partition.
    pub part_id: Option<PartitionId>,
    pub number: u32,
    pub part_type: PartType,
    pub bootable: bool,
    pub request: Option<PartitionRequest>,
}

#[derive(Clone, Debug)]
pub struct VgData {
    /// Extent size in MB.
    pub pe_size: f64,
    /// Number of physical volumes the group's metadata names.
    pub pv_count: usize,
    /// Logical volumes of this group. Maintained by the store.
    lvs: Vec<DeviceId>,
    active: bool,
}

impl VgData {
    pub fn lvs(&self) -> &[DeviceId] {
        &self.lvs
    }
}

#[derive(Clone, Debug)]
pub struct LvData {
    pub vg_name: String,
    pub lv_name: String,
}

#[derive(Clone, Debug)]
pub enum DeviceKind {
    Disk(DiskData),
    Partition(PartitionData),
    VolumeGroup(VgData),
    LogicalVolume(LvData),
    Optical { media_present: bool },
    Loopback { backing_file: PathBuf },
    BindMount { source: PathBuf },
    SwapFile { path: PathBuf },
    /// A device-mapper target other than LVM, e.g. an opened LUKS volume.
    DeviceMapper { dm_name: String },
    /// A software RAID array or firmware RAID set, modeled only so that its
    /// members are left alone.
    Storage {
        md_uuid: Option<String>,
        raid_set: Option<String>,
    },
}

impl DeviceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceKind::Disk(_) => "disk",
            DeviceKind::Partition(_) => "partition",
            DeviceKind::VolumeGroup(_) => "lvmvg",
            DeviceKind::LogicalVolume(_) => "lvmlv",
            DeviceKind::Optical { .. } => "cdrom",
            DeviceKind::Loopback { .. } => "loop",
            DeviceKind::BindMount { .. } => "bind",
            DeviceKind::SwapFile { .. } => "swapfile",
            DeviceKind::DeviceMapper { .. } => "dm",
            DeviceKind::Storage { .. } => "storage",
        }
    }
}

pub trait Resizable {
    fn resizable(&self) -> bool;
}

pub trait Bootable {
    fn bootable(&self) -> bool;
}

pub trait Formattable {
    fn formattable(&self) -> bool;
}

impl Resizable for PartitionData {
    fn resizable(&self) -> bool {
        self.part_type != PartType::Extended
    }
}

impl Bootable for PartitionData {
    fn bootable(&self) -> bool {
        self.part_type == PartType::Primary
    }
}

impl Formattable for PartitionData {
    fn formattable(&self) -> bool {
        self.part_type != PartType::Extended
    }
}

impl Formattable for DiskData {
    /// A whole disk may carry a format only if it has no partition table.
    fn formattable(&self) -> bool {
        self.label.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct Device {
    name: String,
    parents: Vec<DeviceId>,
    kids: usize,
    exists: bool,
    format: DeviceFormat,
    /// Current size in MB.
    size: f64,
    /// Size after a pending resize, in MB.
    target_size: f64,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub sysfs_path: Option<String>,
    pub uuid: Option<String>,
    kind: DeviceKind,
}

impl Device {
    pub fn new(
        name: &str,
        kind: DeviceKind,
        parents: Vec<DeviceId>,
        size: f64,
        exists: bool,
    ) -> Device {
        let mut device = Device {
            name: name.to_string(),
            parents,
            kids: 0,
            exists,
            format: DeviceFormat::unknown(&FormatArgs::default()),
            size,
            target_size: size,
            major: None,
            minor: None,
            sysfs_path: None,
            uuid: None,
            kind,
        };
        device.format.set_device(Some(device.path()));
        device
    }

    pub fn disk(name: &str, label: Option<DiskLabel>, size: f64) -> Device {
        Device::new(
            name,
            DeviceKind::Disk(DiskData { label, model: None }),
            Vec::new(),
            size,
            true,
        )
    }

    pub fn partition(
        name: &str,
        disk: DeviceId,
        data: PartitionData,
        size: f64,
        exists: bool,
    ) -> Device {
        Device::new(name, DeviceKind::Partition(data), vec![disk], size, exists)
    }

    /// A volume group built on `pvs`, which must carry LVM PV formats.
    pub fn volume_group(
        name: &str,
        pvs: Vec<DeviceId>,
        pe_size: f64,
        pv_count: usize,
        exists: bool,
    ) -> Device {
        Device::new(
            name,
            DeviceKind::VolumeGroup(VgData {
                pe_size,
                pv_count,
                lvs: Vec::new(),
                active: false,
            }),
            pvs,
            0.0,
            exists,
        )
    }

    pub fn logical_volume(
        vg_name: &str,
        lv_name: &str,
        vg: DeviceId,
        size: f64,
        exists: bool,
    ) -> Device {
        Device::new(
            &format!("{vg_name}-{lv_name}"),
            DeviceKind::LogicalVolume(LvData {
                vg_name: vg_name.to_string(),
                lv_name: lv_name.to_string(),
            }),
            vec![vg],
            size,
            exists,
        )
    }

    pub fn optical(name: &str, media_present: bool) -> Device {
        Device::new(
            name,
            DeviceKind::Optical { media_present },
            Vec::new(),
            0.0,
            true,
        )
    }

    pub fn loopback(name: &str, backing_file: &Path, size: f64) -> Device {
        Device::new(
            name,
            DeviceKind::Loopback {
                backing_file: backing_file.to_path_buf(),
            },
            Vec::new(),
            size,
            false,
        )
    }

    pub fn bind_mount(source: &Path) -> Device {
        Device::new(
            &source.to_string_lossy(),
            DeviceKind::BindMount {
                source: source.to_path_buf(),
            },
            Vec::new(),
            0.0,
            true,
        )
    }

    pub fn swap_file(path: &Path, size: f64, exists: bool) -> Device {
        Device::new(
            &path.to_string_lossy(),
            DeviceKind::SwapFile {
                path: path.to_path_buf(),
            },
            Vec::new(),
            size,
            exists,
        )
    }

    pub fn device_mapper(name: &str, parents: Vec<DeviceId>, size: f64, exists: bool) -> Device {
        Device::new(
            name,
            DeviceKind::DeviceMapper {
                dm_name: name.to_string(),
            },
            parents,
            size,
            exists,
        )
    }

    pub fn storage(
        name: &str,
        parents: Vec<DeviceId>,
        size: f64,
        md_uuid: Option<String>,
        raid_set: Option<String>,
    ) -> Device {
        Device::new(
            name,
            DeviceKind::Storage { md_uuid, raid_set },
            parents,
            size,
            true,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename, keeping the format's device path in step.
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        let path = self.path();
        self.format.set_device(Some(path));
    }

    /// The device node, or the file or directory standing in for one.
    pub fn path(&self) -> PathBuf {
        match &self.kind {
            DeviceKind::DeviceMapper { .. } | DeviceKind::VolumeGroup(_) => {
                PathBuf::from(format!("/dev/mapper/{}", self.name))
            }
            DeviceKind::LogicalVolume(lv) => {
                PathBuf::from(format!("/dev/mapper/{}", lv_device_name(&lv.vg_name, &lv.lv_name)))
            }
            DeviceKind::BindMount { source } => source.clone(),
            DeviceKind::SwapFile { path } => path.clone(),
            _ => PathBuf::from(format!("/dev/{}", self.name)),
        }
    }

    pub fn parents(&self) -> &[DeviceId] {
        &self.parents
    }

    /// How many devices are built on this one.
    pub fn kids(&self) -> usize {
        self.kids
    }

    pub fn is_leaf(&self) -> bool {
        self.kids == 0
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn format(&self) -> &DeviceFormat {
        &self.format
    }

    /// Mutable access to the format's own settings. Replacing the format
    /// goes through `DeviceStore::set_format`.
    pub fn format_mut(&mut self) -> &mut DeviceFormat {
        &mut self.format
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn target_size(&self) -> f64 {
        self.target_size
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut DeviceKind {
        &mut self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn disk_data(&self) -> Option<&DiskData> {
        match &self.kind {
            DeviceKind::Disk(disk) => Some(disk),
            _ => None,
        }
    }

    pub fn partition_data(&self) -> Option<&PartitionData> {
        match &self.kind {
            DeviceKind::Partition(part) => Some(part),
            _ => None,
        }
    }

    pub fn vg_data(&self) -> Option<&VgData> {
        match &self.kind {
            DeviceKind::VolumeGroup(vg) => Some(vg),
            _ => None,
        }
    }

    pub fn lv_data(&self) -> Option<&LvData> {
        match &self.kind {
            DeviceKind::LogicalVolume(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk(_))
    }

    pub fn is_partition(&self) -> bool {
        matches!(self.kind, DeviceKind::Partition(_))
    }

    pub fn is_extended(&self) -> bool {
        self.partition_data()
            .is_some_and(|p| p.part_type == PartType::Extended)
    }

    pub fn is_logical(&self) -> bool {
        self.partition_data()
            .is_some_and(|p| p.part_type == PartType::Logical)
    }

    pub fn is_primary(&self) -> bool {
        self.partition_data()
            .is_some_and(|p| p.part_type == PartType::Primary)
    }

    /// Whether the media of an optical drive is loaded.
    pub fn media_present(&self) -> bool {
        match self.kind {
            DeviceKind::Optical { media_present } => media_present,
            _ => true,
        }
    }
}

impl Resizable for Device {
    fn resizable(&self) -> bool {
        self.exists
            && match &self.kind {
                DeviceKind::Partition(part) => part.resizable(),
                DeviceKind::LogicalVolume(_) => true,
                _ => false,
            }
    }
}

impl Bootable for Device {
    fn bootable(&self) -> bool {
        match &self.kind {
            DeviceKind::Partition(part) => part.bootable(),
            _ => false,
        }
    }
}

impl Formattable for Device {
    fn formattable(&self) -> bool {
        match &self.kind {
            DeviceKind::Disk(disk) => disk.formattable(),
            DeviceKind::Partition(part) => part.formattable(),
            DeviceKind::VolumeGroup(_) | DeviceKind::Optical { .. } => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let disk = Device::disk("sda", None, 1000.0);
        assert_eq!(disk.path(), PathBuf::from("/dev/sda"));
        assert_eq!(disk.format().device(), Some(Path::new("/dev/sda")));

        let lv = Device::logical_volume("vg-sys", "lv_root", DeviceId::new(0), 100.0, false);
        assert_eq!(lv.name(), "vg-sys-lv_root");
        assert_eq!(lv.path(), PathBuf::from("/dev/mapper/vg--sys-lv_root"));

        let bind = Device::bind_mount(Path::new("/mnt/source"));
        assert_eq!(bind.path(), PathBuf::from("/mnt/source"));
        assert_eq!(
            Device::device_mapper("luks-1", vec![], 10.0, true).path(),
            PathBuf::from("/dev/mapper/luks-1")
        );
    }

    #[test]
    fn test_capabilities() {
        let extended = PartitionData {
            part_id: None,
            number: 4,
            part_type: PartType::Extended,
            bootable: false,
            request: None,
        };
        let ext = Device::partition("sda4", DeviceId::new(0), extended, 100.0, true);
        assert!(!ext.resizable());
        assert!(!ext.formattable());
        assert!(!ext.bootable());
        assert!(ext.is_extended());

        assert!(Device::disk("sdb", None, 10.0).formattable());
        assert!(!Device::optical("sr0", false).formattable());
        assert!(!Device::optical("sr0", false).media_present());
    }
}
