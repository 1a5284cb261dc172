// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    config::{ClearPartType, FitStrategy, StorageConfig},
    devices::{
        align_to_extents, lv_device_name, Bootable, CommitSettings, Device, DeviceKind,
        DeviceStore, DiskData, Formattable, LvData, PartitionData, PartitionRequest, Resizable,
        VgData, DEFAULT_PE_SIZE,
    },
    devicetree::DeviceTree,
    formats::{
        format_by_default, fs_type, DeviceFormat, FormatArgs, FormatConstructor, FormatKind,
        FormatRegistry, Fstab, FstabEntry, FsType,
    },
    host::{execute, CommandOutput, Host, LinuxHost, MountRequest, SimHost},
    label::{
        partition_device_name, DiskGeometry, DiskLabel, DiskSet, FreeSegment, LabelType,
        PartFlag, PartType, Partition, PartitionId,
    },
    partitioning::{
        auto_create_partition_requests, best_part_type, do_auto_partition, sanity_check_mountpoint,
        swap_suggestion, Allocator, DeleteSpec, PartitionSpec, Partitions, RequestKind,
        RequestSpec, SanityReport,
    },
    probe::{lvm_pv_info, BlockDeviceInfo, BlockDeviceProbe, DeviceClass, LvmPvInfo, SimProbe},
    types::{ActionKind, DeviceAction, DeviceId, QueuedAction, Sectors, MEGABYTE},
};

#[cfg(feature = "udev")]
pub use self::probe::UdevProbe;

mod config;
mod devices;
mod devicetree;
mod formats;
mod host;
mod label;
mod partitioning;
mod probe;
mod types;
