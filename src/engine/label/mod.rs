// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory model of one disk's partition table. The allocator mutates
//! these freely; nothing touches the disk until `commit`.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::{
    engine::types::{mb_to_sectors, sectors_to_mb, Sectors},
    storage::{StorageError, StorageResult},
};

mod sfdisk;

const DEFAULT_HEADS: u64 = 255;
const DEFAULT_SECTORS_PER_TRACK: u64 = 63;

const MSDOS_MAX_PRIMARY: u32 = 4;
const GPT_MAX_PRIMARY: u32 = 128;
const FIRST_LOGICAL: u32 = 5;

// GPT keeps a protective MBR, the header and 32 sectors of entries at the
// start of the disk and a backup of the header and entries at the end.
const GPT_HEAD_SECTORS: u64 = 34;
const GPT_TAIL_SECTORS: u64 = 33;

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
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LabelType {
    #[default]
    Msdos,
    Gpt,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PartType {
    Primary,
    Logical,
    Extended,
}

#[derive(
    Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum PartFlag {
    Boot,
    Lvm,
    Raid,
}

/// Stable handle of a partition within one label. Partition numbers change
/// as logical partitions come and go; ids do not.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PartitionId(u64);

impl Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// The CHS translation of a disk together with its length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DiskGeometry {
    pub length: Sectors,
    pub sector_size: u64,
    pub heads: u64,
    pub sectors_per_track: u64,
}

impl DiskGeometry {
    pub fn new(length: Sectors, sector_size: u64) -> DiskGeometry {
        DiskGeometry {
            length,
            sector_size,
            heads: DEFAULT_HEADS,
            sectors_per_track: DEFAULT_SECTORS_PER_TRACK,
        }
    }

    /// Geometry of a disk of `size` MB.
    pub fn from_mb(size: f64, sector_size: u64) -> DiskGeometry {
        DiskGeometry::new(mb_to_sectors(size, sector_size), sector_size)
    }

    pub fn track_sectors(&self) -> Sectors {
        Sectors(self.sectors_per_track)
    }

    pub fn cylinder_sectors(&self) -> Sectors {
        Sectors(self.heads * self.sectors_per_track)
    }

    pub fn cylinders(&self) -> u64 {
        *self.length / *self.cylinder_sectors()
    }

    /// First sector of a cylinder. Cylinders are numbered from 1.
    pub fn start_cyl_to_sector(&self, cyl: u64) -> Sectors {
        self.cylinder_sectors() * cyl.saturating_sub(1)
    }

    /// Last sector of a cylinder.
    pub fn end_cyl_to_sector(&self, cyl: u64) -> Sectors {
        Sectors((*self.cylinder_sectors() * cyl).saturating_sub(1))
    }

    pub fn start_sector_to_cyl(&self, sector: Sectors) -> u64 {
        *sector / *self.cylinder_sectors() + 1
    }

    pub fn end_sector_to_cyl(&self, sector: Sectors) -> u64 {
        (*sector + 1).div_ceil(*self.cylinder_sectors())
    }

    /// Round a sector count down to whole cylinders.
    pub fn round_down_to_cylinder(&self, sectors: Sectors) -> Sectors {
        let cyl = *self.cylinder_sectors();
        Sectors(*sectors / cyl * cyl)
    }

    pub fn to_mb(&self, sectors: Sectors) -> f64 {
        sectors_to_mb(sectors, self.sector_size)
    }

    pub fn to_sectors(&self, size: f64) -> Sectors {
        mb_to_sectors(size, self.sector_size)
    }

    pub fn size_mb(&self) -> f64 {
        self.to_mb(self.length)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Partition {
    id: PartitionId,
    pub number: u32,
    pub start: Sectors,
    /// Last sector, inclusive.
    pub end: Sectors,
    pub part_type: PartType,
    pub flags: BTreeSet<PartFlag>,
    /// Format type the partition type code was chosen for.
    pub fs_hint: Option<String>,
    /// Whether the partition was added after the label was read.
    pub is_new: bool,
}

impl Partition {
    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn length(&self) -> Sectors {
        self.end - self.start + Sectors(1)
    }

    pub fn is_extended(&self) -> bool {
        self.part_type == PartType::Extended
    }

    pub fn is_logical(&self) -> bool {
        self.part_type == PartType::Logical
    }

    pub fn is_primary(&self) -> bool {
        self.part_type == PartType::Primary
    }

    pub fn has_flag(&self, flag: PartFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// A run of unallocated sectors. Free space inside an extended partition
/// can only hold logical partitions; its start already leaves room for the
/// logical partition's boot record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FreeSegment {
    pub start: Sectors,
    pub end: Sectors,
    pub logical: bool,
}

impl FreeSegment {
    pub fn length(&self) -> Sectors {
        self.end - self.start + Sectors(1)
    }
}

fn overlaps(a_start: Sectors, a_end: Sectors, b_start: Sectors, b_end: Sectors) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Name of the `number`th partition of `drive`. A `p` separates the two
/// when the drive name itself ends in a digit.
pub fn partition_device_name(drive: &str, number: u32) -> String {
    if drive.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{drive}p{number}")
    } else {
        format!("{drive}{number}")
    }
}

/// The partition table of one drive.
#[derive(Clone, Debug, Serialize)]
pub struct DiskLabel {
    drive: String,
    devnode: PathBuf,
    label_type: LabelType,
    geometry: DiskGeometry,
    partitions: Vec<Partition>,
    next_id: u64,
}

impl DiskLabel {
    /// An empty label, as written when a disk is initialized.
    pub fn new(
        drive: &str,
        devnode: &Path,
        label_type: LabelType,
        geometry: DiskGeometry,
    ) -> DiskLabel {
        DiskLabel {
            drive: drive.to_string(),
            devnode: devnode.to_path_buf(),
            label_type,
            geometry,
            partitions: Vec::new(),
            next_id: 0,
        }
    }

    pub fn drive(&self) -> &str {
        &self.drive
    }

    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    pub fn label_type(&self) -> LabelType {
        self.label_type
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    /// Partitions in on-disk order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn partition_by_number(&self, number: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.number == number)
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| self.partition_name(p) == name)
    }

    pub fn partition_name(&self, part: &Partition) -> String {
        partition_device_name(&self.drive, part.number)
    }

    pub fn supports_extended(&self) -> bool {
        self.label_type == LabelType::Msdos
    }

    pub fn max_primary_partitions(&self) -> u32 {
        match self.label_type {
            LabelType::Msdos => MSDOS_MAX_PRIMARY,
            LabelType::Gpt => GPT_MAX_PRIMARY,
        }
    }

    /// The kernel limits the number of minors per drive, which caps the
    /// number of logical partitions that can be addressed.
    pub fn max_logical_partitions(&self) -> u32 {
        if !self.supports_extended() {
            0
        } else if self.drive.starts_with("hd") {
            59
        } else {
            11
        }
    }

    /// The number of partitions the label can address at all.
    pub fn max_partitions(&self) -> u32 {
        self.max_primary_partitions() + self.max_logical_partitions()
    }

    /// Primary partitions, counting the extended partition.
    pub fn primary_count(&self) -> u32 {
        self.partitions.iter().filter(|p| !p.is_logical()).count() as u32
    }

    pub fn logical_count(&self) -> u32 {
        self.partitions.iter().filter(|p| p.is_logical()).count() as u32
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.is_extended())
    }

    pub fn first_usable(&self) -> Sectors {
        match self.label_type {
            LabelType::Msdos => self.geometry.track_sectors(),
            LabelType::Gpt => Sectors(GPT_HEAD_SECTORS),
        }
    }

    pub fn last_usable(&self) -> Sectors {
        let tail = match self.label_type {
            LabelType::Msdos => 1,
            LabelType::Gpt => GPT_TAIL_SECTORS + 1,
        };
        Sectors(self.geometry.length.saturating_sub(tail))
    }

    /// Unallocated space, in on-disk order.
    pub fn free_segments(&self) -> Vec<FreeSegment> {
        let mut segments = Vec::new();
        let track = self.geometry.track_sectors();

        let mut cursor = self.first_usable();
        for part in self.partitions.iter().filter(|p| !p.is_logical()) {
            if part.start > cursor {
                segments.push(FreeSegment {
                    start: cursor,
                    end: part.start - Sectors(1),
                    logical: false,
                });
            }
            cursor = cursor.max(part.end + Sectors(1));

            if part.is_extended() {
                let mut inner = part.start;
                for logical in self.partitions.iter().filter(|p| p.is_logical()) {
                    let usable = inner + track;
                    if logical.start >= usable + track + Sectors(1) {
                        segments.push(FreeSegment {
                            start: usable,
                            end: logical.start - track - Sectors(1),
                            logical: true,
                        });
                    }
                    inner = inner.max(logical.end + Sectors(1));
                }
                if inner + track <= part.end {
                    segments.push(FreeSegment {
                        start: inner + track,
                        end: part.end,
                        logical: true,
                    });
                }
            }
        }
        let last = self.last_usable();
        if cursor <= last {
            segments.push(FreeSegment {
                start: cursor,
                end: last,
                logical: false,
            });
        }
        segments
    }

    fn check_placement(
        &self,
        part_type: PartType,
        start: Sectors,
        end: Sectors,
        ignore: Option<PartitionId>,
    ) -> StorageResult<()> {
        if start > end {
            return Err(StorageError::Partitioning(format!(
                "partition on {} would start at sector {} after its end {}",
                self.drive, *start, *end
            )));
        }
        if end > self.last_usable() {
            return Err(StorageError::Partitioning(format!(
                "partition ending at sector {} extends beyond the end of {}",
                *end, self.drive
            )));
        }
        let others = move || {
            self.partitions
                .iter()
                .filter(move |p| Some(p.id) != ignore)
        };
        let track = self.geometry.track_sectors();

        match part_type {
            PartType::Primary | PartType::Extended => {
                if start < self.first_usable() {
                    return Err(StorageError::Partitioning(format!(
                        "partition on {} may not start before sector {}",
                        self.drive,
                        *self.first_usable()
                    )));
                }
                if let Some(other) =
                    others().find(|p| !p.is_logical() && overlaps(start, end, p.start, p.end))
                {
                    return Err(StorageError::Partitioning(format!(
                        "partition at sectors {}-{} overlaps {}",
                        *start,
                        *end,
                        self.partition_name(other)
                    )));
                }
            }
            PartType::Logical => {
                let extended = others().find(|p| p.is_extended()).ok_or_else(|| {
                    StorageError::Partitioning(format!(
                        "{} has no extended partition to hold a logical partition",
                        self.drive
                    ))
                })?;
                if start < extended.start + track || end > extended.end {
                    return Err(StorageError::Partitioning(format!(
                        "logical partition at sectors {}-{} does not fit in the extended partition of {}",
                        *start, *end, self.drive
                    )));
                }
                if let Some(other) = others().find(|p| {
                    p.is_logical() && overlaps(start - track, end, p.start - track, p.end)
                }) {
                    return Err(StorageError::Partitioning(format!(
                        "logical partition at sectors {}-{} overlaps {}",
                        *start,
                        *end,
                        self.partition_name(other)
                    )));
                }
            }
        }
        Ok(())
    }

    fn lowest_free_primary_number(&self) -> Option<u32> {
        (1..=self.max_primary_partitions()).find(|n| {
            !self
                .partitions
                .iter()
                .any(|p| !p.is_logical() && p.number == *n)
        })
    }

    /// Keep partitions in on-disk order and logical numbers contiguous.
    fn renumber(&mut self) {
        self.partitions
            .sort_by_key(|p| (p.start, p.is_logical() as u8));
        let mut next = FIRST_LOGICAL;
        for part in self.partitions.iter_mut().filter(|p| p.is_logical()) {
            part.number = next;
            next += 1;
        }
    }

    /// Add a partition occupying sectors `start` through `end`.
    pub fn add_partition(
        &mut self,
        part_type: PartType,
        start: Sectors,
        end: Sectors,
        fs_hint: Option<&str>,
    ) -> StorageResult<PartitionId> {
        let number = match part_type {
            PartType::Primary | PartType::Extended => {
                if part_type == PartType::Extended {
                    if !self.supports_extended() {
                        return Err(StorageError::Partitioning(format!(
                            "{} labels do not support extended partitions",
                            self.label_type
                        )));
                    }
                    if self.extended().is_some() {
                        return Err(StorageError::Partitioning(format!(
                            "{} already has an extended partition",
                            self.drive
                        )));
                    }
                }
                self.lowest_free_primary_number().ok_or_else(|| {
                    StorageError::Partitioning(format!(
                        "Unable to create additional primary partitions on {}",
                        self.drive
                    ))
                })?
            }
            PartType::Logical => {
                if self.logical_count() >= self.max_logical_partitions() {
                    return Err(StorageError::Partitioning(format!(
                        "Unable to create additional logical partitions on {}",
                        self.drive
                    )));
                }
                // assigned by renumber
                0
            }
        };
        self.check_placement(part_type, start, end, None)?;

        let id = PartitionId(self.next_id);
        self.next_id += 1;
        self.partitions.push(Partition {
            id,
            number,
            start,
            end,
            part_type,
            flags: BTreeSet::new(),
            fs_hint: fs_hint.map(String::from),
            is_new: true,
        });
        self.renumber();
        debug!(
            "Added {} partition {} on {} at sectors {}-{}",
            part_type, id, self.drive, *start, *end
        );
        Ok(id)
    }

    fn index_of(&self, id: PartitionId) -> StorageResult<usize> {
        self.partitions
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| {
                StorageError::Partitioning(format!("no partition {} on {}", id, self.drive))
            })
    }

    /// Remove a partition. Removing the extended partition removes every
    /// logical partition with it.
    pub fn delete_partition(&mut self, id: PartitionId) -> StorageResult<()> {
        let index = self.index_of(id)?;
        let removed = self.partitions.remove(index);
        if removed.is_extended() {
            self.partitions.retain(|p| !p.is_logical());
        }
        self.renumber();
        debug!(
            "Deleted partition {} from {}",
            partition_device_name(&self.drive, removed.number),
            self.drive
        );
        Ok(())
    }

    /// Delete every partition added since the label was read.
    pub fn remove_new_partitions(&mut self) {
        let new_extended = self.extended().is_some_and(|p| p.is_new);
        self.partitions
            .retain(|p| !p.is_new && !(new_extended && p.is_logical()));
        self.renumber();
    }

    /// Move a partition to sectors `start` through `end`. An extended
    /// partition must still hold all of its logical partitions.
    pub fn set_partition_geometry(
        &mut self,
        id: PartitionId,
        start: Sectors,
        end: Sectors,
    ) -> StorageResult<()> {
        let index = self.index_of(id)?;
        let part_type = self.partitions[index].part_type;
        self.check_placement(part_type, start, end, Some(id))?;
        if part_type == PartType::Extended {
            let track = self.geometry.track_sectors();
            if self
                .partitions
                .iter()
                .filter(|p| p.is_logical())
                .any(|p| p.start < start + track || p.end > end)
            {
                return Err(StorageError::Partitioning(format!(
                    "extended partition on {} would no longer hold its logical partitions",
                    self.drive
                )));
            }
        }
        let part = &mut self.partitions[index];
        part.start = start;
        part.end = end;
        self.renumber();
        Ok(())
    }

    /// Grow a partition to fill the free space around it.
    pub fn maximize_partition(&mut self, id: PartitionId) -> StorageResult<()> {
        let index = self.index_of(id)?;
        let part = self.partitions[index].clone();
        let track = self.geometry.track_sectors();

        let (mut start, mut end) = if part.is_logical() {
            let extended = self.extended().ok_or_else(|| {
                StorageError::Partitioning(format!("{} has no extended partition", self.drive))
            })?;
            (extended.start + track, extended.end)
        } else {
            (self.first_usable(), self.last_usable())
        };
        for other in self
            .partitions
            .iter()
            .filter(|p| p.id != id && p.is_logical() == part.is_logical())
        {
            if other.end < part.start {
                let floor = if part.is_logical() {
                    other.end + track + Sectors(1)
                } else {
                    other.end + Sectors(1)
                };
                start = start.max(floor);
            } else if other.start > part.end {
                let ceiling = if part.is_logical() {
                    other.start - track - Sectors(1)
                } else {
                    other.start - Sectors(1)
                };
                end = end.min(ceiling);
            }
        }
        self.set_partition_geometry(id, start.min(part.start), end.max(part.end))
    }

    pub fn set_flag(&mut self, id: PartitionId, flag: PartFlag, on: bool) -> StorageResult<()> {
        let index = self.index_of(id)?;
        let flags = &mut self.partitions[index].flags;
        if on {
            flags.insert(flag);
        } else {
            flags.remove(&flag);
        }
        Ok(())
    }

    pub fn set_fs_hint(&mut self, id: PartitionId, fs_hint: Option<&str>) -> StorageResult<()> {
        let index = self.index_of(id)?;
        self.partitions[index].fs_hint = fs_hint.map(String::from);
        Ok(())
    }

    /// Drop every partition and switch to a fresh label of `label_type`.
    pub fn reinitialize(&mut self, label_type: LabelType) {
        self.label_type = label_type;
        self.partitions.clear();
    }
}

/// The labels of every drive the allocator may use, by drive name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskSet {
    disks: BTreeMap<String, DiskLabel>,
}

impl DiskSet {
    pub fn new() -> DiskSet {
        DiskSet::default()
    }

    pub fn insert(&mut self, label: DiskLabel) {
        self.disks.insert(label.drive.clone(), label);
    }

    pub fn get(&self, drive: &str) -> Option<&DiskLabel> {
        self.disks.get(drive)
    }

    pub fn get_mut(&mut self, drive: &str) -> Option<&mut DiskLabel> {
        self.disks.get_mut(drive)
    }

    pub fn remove(&mut self, drive: &str) -> Option<DiskLabel> {
        self.disks.remove(drive)
    }

    /// Drive names in sorted order.
    pub fn drives(&self) -> Vec<String> {
        self.disks.keys().cloned().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, DiskLabel> {
        self.disks.iter()
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Find a partition by its device name on any drive.
    pub fn partition_by_name(&self, name: &str) -> Option<(&DiskLabel, &Partition)> {
        self.disks
            .values()
            .find_map(|label| label.partition_by_name(name).map(|part| (label, part)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn msdos_label(drive: &str, size: f64) -> DiskLabel {
        DiskLabel::new(
            drive,
            &PathBuf::from(format!("/dev/{drive}")),
            LabelType::Msdos,
            DiskGeometry::from_mb(size, 512),
        )
    }

    #[test]
    fn test_cylinder_conversions() {
        let geometry = DiskGeometry::from_mb(10240.0, 512);
        assert_eq!(geometry.cylinder_sectors(), Sectors(16065));
        assert_eq!(geometry.start_cyl_to_sector(1), Sectors(0));
        assert_eq!(geometry.end_cyl_to_sector(1), Sectors(16064));
        assert_eq!(geometry.start_sector_to_cyl(Sectors(16065)), 2);
        assert_eq!(geometry.end_sector_to_cyl(Sectors(16064)), 1);
        assert_eq!(
            geometry.round_down_to_cylinder(Sectors(16065 * 3 + 5)),
            Sectors(16065 * 3)
        );
    }

    #[test]
    fn test_partition_names() {
        assert_eq!(partition_device_name("sda", 1), "sda1");
        assert_eq!(partition_device_name("nvme0n1", 2), "nvme0n1p2");
    }

    #[test]
    /// An empty msdos label has all but the first track free.
    fn test_empty_label_free_space() {
        let label = msdos_label("sda", 100.0);
        let free = label.free_segments();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].start, Sectors(63));
        assert_eq!(free[0].end, Sectors(204_799));
        assert!(!free[0].logical);
    }

    #[test]
    fn test_primary_numbering_uses_lowest_free_slot() {
        let mut label = msdos_label("sda", 100.0);
        let p1 = label
            .add_partition(PartType::Primary, Sectors(63), Sectors(1000), None)
            .unwrap();
        label
            .add_partition(PartType::Primary, Sectors(1001), Sectors(2000), None)
            .unwrap();
        label.delete_partition(p1).unwrap();
        let p = label
            .add_partition(PartType::Primary, Sectors(3000), Sectors(4000), None)
            .unwrap();
        assert_eq!(label.partition(p).unwrap().number, 1);
        assert_matches!(
            label.add_partition(PartType::Primary, Sectors(1500), Sectors(2500), None),
            Err(StorageError::Partitioning(_))
        );
    }

    #[test]
    /// Logical partitions are numbered from 5 in disk order and close gaps
    /// when one is deleted; deleting the extended partition takes all of
    /// them.
    fn test_logical_partitions() {
        let mut label = msdos_label("sda", 100.0);
        let ext = label
            .add_partition(PartType::Extended, Sectors(63), Sectors(100_000), None)
            .unwrap();
        let free = label.free_segments();
        assert!(free.iter().any(|s| s.logical && s.start == Sectors(126)));

        let l1 = label
            .add_partition(PartType::Logical, Sectors(126), Sectors(10_000), None)
            .unwrap();
        let l2 = label
            .add_partition(PartType::Logical, Sectors(10_064), Sectors(20_000), None)
            .unwrap();
        // no room for the boot record of a logical starting right after l1
        assert_matches!(
            label.add_partition(PartType::Logical, Sectors(10_001), Sectors(10_020), None),
            Err(StorageError::Partitioning(_))
        );
        assert_eq!(label.partition(l2).unwrap().number, 6);
        label.delete_partition(l1).unwrap();
        assert_eq!(label.partition(l2).unwrap().number, 5);
        assert_eq!(label.logical_count(), 1);

        label.delete_partition(ext).unwrap();
        assert!(label.partitions().is_empty());
    }

    #[test]
    fn test_maximize_extended() {
        let mut label = msdos_label("sda", 100.0);
        label
            .add_partition(PartType::Primary, Sectors(63), Sectors(1000), None)
            .unwrap();
        let ext = label
            .add_partition(PartType::Extended, Sectors(5000), Sectors(6000), None)
            .unwrap();
        label.maximize_partition(ext).unwrap();
        let ext = label.partition(ext).unwrap();
        assert_eq!(ext.start, Sectors(1001));
        assert_eq!(ext.end, Sectors(204_799));
    }

    #[test]
    fn test_remove_new_partitions_keeps_existing() {
        let mut label = msdos_label("sda", 100.0);
        label
            .add_partition(PartType::Primary, Sectors(63), Sectors(1000), None)
            .unwrap();
        label.partitions[0].is_new = false;
        label
            .add_partition(PartType::Extended, Sectors(1001), Sectors(100_000), None)
            .unwrap();
        label
            .add_partition(PartType::Logical, Sectors(1064), Sectors(5000), None)
            .unwrap();
        label.remove_new_partitions();
        assert_eq!(label.partitions().len(), 1);
        assert_eq!(label.partitions()[0].number, 1);
    }

    #[test]
    fn test_gpt_has_no_extended() {
        let mut label = DiskLabel::new(
            "sdb",
            Path::new("/dev/sdb"),
            LabelType::Gpt,
            DiskGeometry::from_mb(100.0, 512),
        );
        assert_eq!(label.max_logical_partitions(), 0);
        assert_eq!(label.max_partitions(), 128);
        assert_matches!(
            label.add_partition(PartType::Extended, Sectors(34), Sectors(1000), None),
            Err(StorageError::Partitioning(_))
        );
        let free = label.free_segments();
        assert_eq!(free[0].start, Sectors(34));
        assert_eq!(free[0].end, Sectors(204_800 - 34));
    }
}
