// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Reading and writing partition tables with sfdisk. Tables are read from
// sfdisk's JSON dump and written back as a complete sfdisk script.

use std::{collections::BTreeSet, path::Path, time::Duration};

use log::{debug, info, warn};
use regex::Regex;
use retry::{delay::Fixed, retry_with_index};
use serde_derive::Deserialize;

use crate::{
    engine::{
        host::{execute, execute_with_input, Host},
        label::{
            DiskGeometry, DiskLabel, LabelType, PartFlag, PartType, Partition, PartitionId,
        },
        types::Sectors,
    },
    storage::{StorageError, StorageResult},
};

const GPT_LINUX: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
const GPT_SWAP: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";
const GPT_LVM: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
const GPT_RAID: &str = "A19D880F-05FC-4D3B-A006-743F0F84911E";
const GPT_BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";

const LEGACY_BOOT_ATTR: &str = "LegacyBIOSBootable";

#[derive(Debug, Deserialize)]
struct SfdiskDump {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    label: String,
    sectorsize: Option<u64>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default)]
    bootable: bool,
    attrs: Option<String>,
}

/// Partition type, flags and format hint of an msdos type code.
fn msdos_type(code: &str, number: u32) -> (PartType, Option<PartFlag>, Option<&'static str>) {
    match code.to_lowercase().as_str() {
        "5" | "f" | "85" => (PartType::Extended, None, None),
        code => {
            let part_type = if number > 4 {
                PartType::Logical
            } else {
                PartType::Primary
            };
            match code {
                "82" => (part_type, None, Some("swap")),
                "8e" => (part_type, Some(PartFlag::Lvm), Some("lvmpv")),
                "fd" => (part_type, Some(PartFlag::Raid), Some("mdmember")),
                "b" | "c" | "e" => (part_type, None, Some("vfat")),
                "7" => (part_type, None, Some("ntfs")),
                _ => (part_type, None, None),
            }
        }
    }
}

fn gpt_type(guid: &str) -> (Option<PartFlag>, Option<&'static str>) {
    match guid.to_uppercase().as_str() {
        GPT_SWAP => (None, Some("swap")),
        GPT_LVM => (Some(PartFlag::Lvm), Some("lvmpv")),
        GPT_RAID => (Some(PartFlag::Raid), Some("mdmember")),
        GPT_BASIC_DATA => (None, Some("vfat")),
        _ => (None, None),
    }
}

fn msdos_code(part: &Partition) -> &'static str {
    if part.is_extended() {
        "5"
    } else if part.has_flag(PartFlag::Lvm) {
        "8e"
    } else if part.has_flag(PartFlag::Raid) {
        "fd"
    } else {
        match part.fs_hint.as_deref() {
            Some("swap") => "82",
            Some("vfat") => "c",
            Some("ntfs") => "7",
            _ => "83",
        }
    }
}

fn gpt_code(part: &Partition) -> &'static str {
    if part.has_flag(PartFlag::Lvm) {
        GPT_LVM
    } else if part.has_flag(PartFlag::Raid) {
        GPT_RAID
    } else {
        match part.fs_hint.as_deref() {
            Some("swap") => GPT_SWAP,
            Some("vfat") | Some("ntfs") => GPT_BASIC_DATA,
            _ => GPT_LINUX,
        }
    }
}

impl DiskLabel {
    /// Parse the JSON dump of a partition table.
    fn from_dump(
        drive: &str,
        devnode: &Path,
        size: f64,
        json: &str,
    ) -> StorageResult<DiskLabel> {
        let dump: SfdiskDump = serde_json::from_str(json)?;
        let table = dump.partitiontable;
        let label_type = match table.label.as_str() {
            "dos" => LabelType::Msdos,
            "gpt" => LabelType::Gpt,
            other => {
                return Err(StorageError::Msg(format!(
                    "Unsupported disk label type {other} on {drive}"
                )))
            }
        };
        let geometry = DiskGeometry::from_mb(size, table.sectorsize.unwrap_or(512));
        let mut label = DiskLabel::new(drive, devnode, label_type, geometry);

        let number_re = Regex::new(r"(\d+)$")?;
        for entry in table.partitions {
            let number = number_re
                .captures(&entry.node)
                .and_then(|c| c.get(1))
                .ok_or_else(|| {
                    StorageError::Msg(format!(
                        "Can not determine the partition number of {}",
                        entry.node
                    ))
                })?
                .as_str()
                .parse::<u32>()?;
            let (part_type, flag, fs_hint) = match label_type {
                LabelType::Msdos => msdos_type(&entry.part_type, number),
                LabelType::Gpt => {
                    let (flag, fs_hint) = gpt_type(&entry.part_type);
                    (PartType::Primary, flag, fs_hint)
                }
            };
            let mut flags = BTreeSet::new();
            flags.extend(flag);
            let legacy_boot = entry
                .attrs
                .as_deref()
                .is_some_and(|a| a.contains(LEGACY_BOOT_ATTR));
            if entry.bootable || legacy_boot {
                flags.insert(PartFlag::Boot);
            }

            let id = PartitionId(label.next_id);
            label.next_id += 1;
            label.partitions.push(Partition {
                id,
                number,
                start: Sectors(entry.start),
                end: Sectors(entry.start + entry.size.max(1) - 1),
                part_type,
                flags,
                fs_hint: fs_hint.map(String::from),
                is_new: false,
            });
        }
        label
            .partitions
            .sort_by_key(|p| (p.start, p.is_logical() as u8));
        Ok(label)
    }

    /// Read the partition table of the drive `drive`, whose size is `size`
    /// MB. Fails if the drive has no label sfdisk recognizes.
    pub fn read(
        host: &dyn Host,
        drive: &str,
        devnode: &Path,
        size: f64,
    ) -> StorageResult<DiskLabel> {
        let json = execute(host, "sfdisk", &["--json", &devnode.to_string_lossy()])?;
        let label = DiskLabel::from_dump(drive, devnode, size, &json)?;
        debug!(
            "Read {} label with {} partitions from {}",
            label.label_type,
            label.partitions.len(),
            drive
        );
        Ok(label)
    }

    /// The sfdisk script that recreates this table.
    pub fn script(&self) -> String {
        let mut script = String::new();
        let label = match self.label_type {
            LabelType::Msdos => "dos",
            LabelType::Gpt => "gpt",
        };
        script.push_str(&format!("label: {label}\nunit: sectors\n\n"));

        let mut parts = self.partitions.iter().collect::<Vec<_>>();
        parts.sort_by_key(|p| p.number);
        for part in parts {
            let node = Path::new("/dev").join(self.partition_name(part));
            script.push_str(&format!(
                "{} : start={}, size={}",
                node.display(),
                *part.start,
                *part.length()
            ));
            match self.label_type {
                LabelType::Msdos => {
                    script.push_str(&format!(", type={}", msdos_code(part)));
                    if part.has_flag(PartFlag::Boot) {
                        script.push_str(", bootable");
                    }
                }
                LabelType::Gpt => {
                    script.push_str(&format!(", type={}", gpt_code(part)));
                    if part.has_flag(PartFlag::Boot) {
                        script.push_str(&format!(", attrs=\"{LEGACY_BOOT_ATTR}\""));
                    }
                }
            }
            script.push('\n');
        }
        script
    }

    /// Write the table to the drive, retrying up to `attempts` times while
    /// the kernel still holds the old table busy, then wait for udev to
    /// create the partition nodes.
    pub fn commit(
        &mut self,
        host: &dyn Host,
        attempts: usize,
        settle_timeout: Duration,
    ) -> StorageResult<()> {
        let script = self.script();
        let devnode = self.devnode.to_string_lossy().into_owned();
        retry_with_index(Fixed::from_millis(100).take(attempts.saturating_sub(1)), |i| {
            debug!("Partition table commit attempt {} on {}", i, self.drive);
            execute_with_input(host, "sfdisk", &[&devnode], Some(script.as_bytes()))
        })
        .map_err(|e| {
            warn!(
                "Committing the partition table of {} failed after {} tries",
                self.drive, e.tries
            );
            StorageError::Chained(
                format!("Failed to commit the partition table of {}", self.drive),
                Box::new(e.error),
            )
        })?;
        host.settle(settle_timeout)?;

        for part in self.partitions.iter_mut() {
            part.is_new = false;
        }
        info!(
            "Committed {} label with {} partitions to {}",
            self.label_type,
            self.partitions.len(),
            self.drive
        );
        Ok(())
    }
}
