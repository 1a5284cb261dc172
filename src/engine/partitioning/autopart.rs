// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The allocator. Requests are placed in stages: requests pinned to
//! cylinders first, then requests that only have a size, then growable
//! requests are expanded into whatever space is left. Every stage works
//! on a `DiskSet` and never touches a disk.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};

use crate::{
    engine::{
        config::{ClearPartType, FitStrategy, StorageConfig},
        devicetree::DeviceTree,
        formats::FormatRegistry,
        host::Host,
        label::{DiskLabel, DiskSet, FreeSegment, LabelType, PartFlag, PartType, PartitionId},
        partitioning::{
            requests::{DeleteSpec, PartitionSpec, Partitions},
            sanity::{rounded_mem_mb, SanityReport},
        },
        types::Sectors,
    },
    storage::{StorageError, StorageResult},
};

const MAX_GROW_PASSES: usize = 20;
const MAX_GROW_ITERATIONS: usize = 2000;

/// Cylinder at or beyond which some firmware can not load a boot loader.
const BOOT_CYLINDER_LIMIT: u64 = 1024;

/// Drives with less free space than this, in MB, get no automatic
/// requests.
const MIN_AUTOPART_FREE: f64 = 10.0;

const DEFAULT_ROOT_SIZE: f64 = 1024.0;
const DEFAULT_BOOT_SIZE: f64 = 100.0;

/// Recommended (minimum, maximum) swap in MB for `mem_kib` KiB of memory.
pub fn swap_suggestion(mem_kib: u64) -> (f64, f64) {
    let mem = rounded_mem_mb(mem_kib) as f64;
    if mem <= 256.0 {
        (256.0, 512.0)
    } else if mem > 1000.0 {
        (1000.0, 2000.0)
    } else {
        (mem, mem * 2.0)
    }
}

/// The partition type a new request in primary space of `label` gets. The
/// last primary slot becomes an extended partition when the label allows
/// one and the request does not insist on a primary.
pub fn best_part_type(label: &DiskLabel, primary: bool) -> StorageResult<PartType> {
    let max_primary = label.max_primary_partitions();
    let num_primary = label.primary_count();
    if num_primary >= max_primary {
        return Err(StorageError::Partitioning(format!(
            "Unable to create additional primary partitions on {}",
            label.drive()
        )));
    }
    if primary || !label.supports_extended() || label.extended().is_some() {
        return Ok(PartType::Primary);
    }
    if num_primary == max_primary - 1 {
        Ok(PartType::Extended)
    } else {
        Ok(PartType::Primary)
    }
}

/// The requests automatic partitioning adds: a growable root, a small
/// boot partition and swap sized from the installed memory.
pub fn auto_create_partition_requests(registry: &FormatRegistry, mem_kib: u64) -> Vec<PartitionSpec> {
    let mut root = PartitionSpec::new(
        Some(registry.default_filesystem_type(false)),
        DEFAULT_ROOT_SIZE,
        Some("/"),
    );
    root.grow = true;

    let boot = PartitionSpec::new(
        Some(registry.default_filesystem_type(true)),
        DEFAULT_BOOT_SIZE,
        Some("/boot"),
    );

    let (min_swap, max_swap) = swap_suggestion(mem_kib);
    let mut swap = PartitionSpec::new(Some("swap"), min_swap, None);
    swap.grow = true;
    swap.max_size = Some(max_swap);

    let mut requests = vec![root, boot, swap];
    for request in &mut requests {
        request.base.format = true;
    }
    requests
}

/// Wrap an allocation failure with context, passing other errors through.
fn context(err: StorageError, what: &str) -> StorageError {
    match err {
        StorageError::Partitioning(msg) => StorageError::Partitioning(format!("{what}: {msg}")),
        err => err,
    }
}

/// Free space per drive: (total, largest segment). Drives without any
/// free space are left out.
fn free_space(disk_set: &DiskSet) -> BTreeMap<String, (Sectors, Sectors)> {
    disk_set
        .iter()
        .filter_map(|(drive, label)| {
            let segments = label.free_segments();
            let largest = segments.iter().map(|s| s.length()).max()?;
            let total = segments.iter().map(|s| s.length()).sum();
            Some((drive.clone(), (total, largest)))
        })
        .collect()
}

/// Places requests on the drives of a `DiskSet`.
pub struct Allocator<'a> {
    registry: &'a FormatRegistry,
    strategy: FitStrategy,
    mem_kib: u64,
}

impl<'a> Allocator<'a> {
    pub fn new(registry: &'a FormatRegistry, strategy: FitStrategy, mem_kib: u64) -> Allocator<'a> {
        Allocator {
            registry,
            strategy,
            mem_kib,
        }
    }

    fn is_boot(boot: Option<u32>, request: &PartitionSpec) -> bool {
        request.bootable || (request.unique_id().is_some() && request.unique_id() == boot)
    }

    /// The drives a sized request may go on, in name order.
    fn drive_list(request: &PartitionSpec, disk_set: &DiskSet) -> Vec<String> {
        if let Some(drive) = &request.current_drive {
            return vec![drive.clone()];
        }
        if request.drives.is_empty() {
            return disk_set.drives();
        }
        let mut drives = request
            .drives
            .iter()
            .filter(|d| disk_set.get(d).is_some())
            .cloned()
            .collect::<Vec<_>>();
        drives.sort();
        drives
    }

    fn set_flags(
        &self,
        label: &mut DiskLabel,
        part: PartitionId,
        request: &PartitionSpec,
        is_boot: bool,
    ) -> StorageResult<()> {
        if let Some(flag) = request.base.device_format(self.registry).partition_flag() {
            label.set_flag(part, flag, true)?;
        }
        if is_boot && label.label_type() == LabelType::Msdos {
            label.set_flag(part, PartFlag::Boot, true)?;
        }
        Ok(())
    }

    /// Place every new request that names its cylinders.
    pub fn fit_constrained(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
        primary_only: bool,
    ) -> StorageResult<()> {
        let boot = partitions.bootable_request();
        for index in 0..partitions.requests.len() {
            let request = partitions.requests[index].clone();
            if !request.is_new() || request.part.is_some() || !request.is_constrained() {
                continue;
            }
            let is_boot = Allocator::is_boot(boot, &request);
            if primary_only && !request.primary && !is_boot {
                continue;
            }

            let drive = request.drives.first().ok_or_else(|| {
                StorageError::Partitioning(
                    "Tried to create a constrained partition without a drive.".into(),
                )
            })?;
            let label = disk_set.get_mut(drive).ok_or_else(|| {
                StorageError::Partitioning(format!("Drive {drive} is not available."))
            })?;
            let geometry = *label.geometry();
            let track = geometry.track_sectors();

            let mut start = geometry
                .start_cyl_to_sector(request.start.unwrap_or(1))
                .max(label.first_usable());
            let end_cyl = match request.end {
                Some(end) => end,
                None => {
                    if request.request_size <= 0.0 {
                        return Err(StorageError::Partitioning(
                            "Tried to create a constrained partition without a size or end."
                                .into(),
                        ));
                    }
                    geometry.end_sector_to_cyl(start + geometry.to_sectors(request.request_size))
                }
            };
            let end = geometry.end_cyl_to_sector(end_cyl);
            if end >= geometry.length {
                return Err(StorageError::Partitioning(
                    "Unable to create partition which extends beyond the end of the disk."
                        .into(),
                ));
            }
            let end = end.min(label.last_usable());

            let extended = label.extended().map(|p| (p.start, p.end));
            let part_type = match extended {
                Some((ext_start, ext_end)) if ext_start < start && ext_end >= end => {
                    if request.primary {
                        return Err(StorageError::Partitioning(format!(
                            "A primary partition can not be placed at cylinder {} of {drive}, \
                             inside the extended partition.",
                            request.start.unwrap_or(1)
                        )));
                    }
                    start = start.max(ext_start + track);
                    PartType::Logical
                }
                _ => match best_part_type(label, request.primary)? {
                    PartType::Extended => {
                        let ext = label.add_partition(PartType::Extended, start, end, None)?;
                        label.maximize_partition(ext)?;
                        let ext_start = label.partition(ext).map(|p| p.start).unwrap_or(start);
                        start = start.max(ext_start + track);
                        PartType::Logical
                    }
                    part_type => part_type,
                },
            };

            let part = label.add_partition(part_type, start, end, request.base.fstype.as_deref())?;
            self.set_flags(label, part, &request, is_boot)?;
            partitions.requests[index].bind(label, part);
            debug!(
                "Placed request {:?} at cylinders {}-{} of {}",
                request.unique_id(),
                geometry.start_sector_to_cyl(start),
                end_cyl,
                drive
            );
        }
        Ok(())
    }

    /// Find the free segment a sized request goes in, by the configured
    /// strategy. A bootable request takes the first segment it fits in.
    fn best_segment(
        &self,
        disk_set: &DiskSet,
        request: &PartitionSpec,
        is_boot: bool,
    ) -> Option<(String, FreeSegment)> {
        let mut best: Option<(String, FreeSegment, f64)> = None;
        for drive in Allocator::drive_list(request, disk_set) {
            if is_boot && best.is_some() {
                break;
            }
            let label = match disk_set.get(&drive) {
                Some(label) => label,
                None => continue,
            };
            let geometry = label.geometry();
            let num_primary = label.primary_count();
            let num_logical = label.logical_count();
            let request_sectors =
                Sectors(geometry.to_sectors(request.request_size).saturating_sub(1));
            let request_mb = geometry.to_mb(request_sectors).floor();

            for segment in label.free_segments() {
                if segment.logical {
                    if request.primary || num_logical >= label.max_logical_partitions() {
                        continue;
                    }
                } else if num_primary >= label.max_primary_partitions() {
                    continue;
                }
                let size = geometry.to_mb(segment.length());
                if size < request_mb {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((_, _, best_size)) => match self.strategy {
                        FitStrategy::BestFit => size < *best_size,
                        FitStrategy::LargestFit => size > *best_size,
                    },
                };
                if better {
                    best = Some((drive.clone(), segment, size));
                    if is_boot {
                        break;
                    }
                }
            }
        }
        best.map(|(drive, segment, _)| (drive, segment))
    }

    /// Place every new request that only gives a size. Requests are taken
    /// bootable first, then those with the fewest candidate drives.
    pub fn fit_sized(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
        primary_only: bool,
    ) -> StorageResult<()> {
        let boot = partitions.bootable_request();
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, request) in partitions.requests.iter_mut().enumerate() {
            if !request.is_new() || request.part.is_some() || request.is_constrained() {
                continue;
            }
            let is_boot = Allocator::is_boot(boot, request);
            if primary_only && !request.primary && !is_boot {
                continue;
            }
            if request.base.size == 0.0 && request.request_size == 0.0 {
                request.request_size = 1.0;
            }
            let key = if is_boot {
                0
            } else {
                Allocator::drive_list(request, disk_set).len()
            };
            groups.entry(key).or_default().push(index);
        }

        for index in groups.into_values().flatten() {
            let request = partitions.requests[index].clone();
            let is_boot = Allocator::is_boot(boot, &request);
            let (drive, segment) = match self.best_segment(disk_set, &request, is_boot) {
                Some(found) => found,
                None if request.base.size > 0.0 => {
                    return Err(StorageError::Partitioning(format!(
                        "Not enough space left to create partition for {}",
                        request
                            .base
                            .mountpoint
                            .as_deref()
                            .or(request.base.fstype.as_deref())
                            .unwrap_or("request")
                    )));
                }
                None => {
                    debug!(
                        "No room for zero sized request {:?}, leaving it unplaced",
                        request.unique_id()
                    );
                    continue;
                }
            };

            let label = disk_set.get_mut(&drive).ok_or_else(|| {
                StorageError::Partitioning(format!("Drive {drive} is not available."))
            })?;
            let track = label.geometry().track_sectors();
            let length = Sectors((*label.geometry().to_sectors(request.request_size)).max(1));
            let within = |start: Sectors| (start + length - Sectors(1)).min(segment.end);

            let (start, end, part_type) = if segment.logical {
                (segment.start, within(segment.start), PartType::Logical)
            } else {
                match best_part_type(label, request.primary)? {
                    PartType::Extended => {
                        label.add_partition(PartType::Extended, segment.start, segment.end, None)?;
                        let start = segment.start + track;
                        if start > segment.end {
                            return Err(StorageError::Partitioning(format!(
                                "No room for a logical partition on {drive}"
                            )));
                        }
                        (start, within(start), PartType::Logical)
                    }
                    part_type => (segment.start, within(segment.start), part_type),
                }
            };

            let part = label.add_partition(part_type, start, end, request.base.fstype.as_deref())?;
            self.set_flags(label, part, &request, is_boot)?;
            partitions.requests[index].bind(label, part);
        }
        Ok(())
    }

    /// Attach preexisting requests to their partitions, updating the
    /// partition type of those being reformatted as something else.
    fn set_preexist_parts(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
    ) -> StorageResult<()> {
        for request in partitions.requests.iter_mut().filter(|r| r.is_preexisting()) {
            let (drive, start, end) = match (request.drives.first(), request.start, request.end) {
                (Some(drive), Some(start), Some(end)) => (drive.clone(), start, end),
                _ => continue,
            };
            let label = match disk_set.get_mut(&drive) {
                Some(label) => label,
                None => {
                    debug!("Drive {drive} of a preexisting request is not in use");
                    continue;
                }
            };
            let part = label
                .partitions()
                .iter()
                .find(|p| *p.start == start && *p.end == end)
                .map(|p| p.id());
            match part {
                Some(part) => {
                    if request.base.format && request.base.fstype != request.base.orig_fstype {
                        label.set_fs_hint(part, request.base.fstype.as_deref())?;
                        self.set_flags(label, part, request, false)?;
                    }
                    request.bind(label, part);
                }
                None => {
                    request.unbind();
                    debug!("No partition at sectors {start}-{end} of {drive}");
                }
            }
        }
        Ok(())
    }

    /// Place every request from scratch: new partitions are dropped from
    /// the labels and the fit stages run again.
    pub fn process_partitioning(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
    ) -> StorageResult<()> {
        for drive in disk_set.drives() {
            if let Some(label) = disk_set.get_mut(&drive) {
                label.remove_new_partitions();
            }
        }
        for request in partitions.requests.iter_mut().filter(|r| r.is_new()) {
            request.unbind();
        }
        self.set_preexist_parts(disk_set, partitions)?;
        partitions.sort_requests();

        self.fit_constrained(disk_set, partitions, true)
            .map_err(|e| context(e, "Could not allocate cylinder-based partitions as primary partitions"))?;
        self.fit_sized(disk_set, partitions, true)
            .map_err(|e| context(e, "Could not allocate requested partitions as primary partitions"))?;
        self.fit_constrained(disk_set, partitions, false)
            .map_err(|e| context(e, "Could not allocate cylinder-based partitions"))?;
        self.fit_sized(disk_set, partitions, false)
            .map_err(|e| context(e, "Could not allocate requested partitions"))?;

        for request in &partitions.requests {
            if request.part.is_some() {
                continue;
            }
            let skip = if request.is_new() {
                request.base.size == 0.0
            } else {
                request
                    .current_drive
                    .as_deref()
                    .is_none_or(|d| disk_set.get(d).is_none())
            };
            if !skip {
                return Err(StorageError::Partitioning(format!(
                    "Unsatisfied partition request for {}",
                    request
                        .base
                        .mountpoint
                        .as_deref()
                        .or(request.base.fstype.as_deref())
                        .unwrap_or("an unnamed request")
                )));
            }
        }
        partitions.refresh_devices(disk_set);
        Ok(())
    }

    fn set_request_size(partitions: &mut Partitions, id: u32, size: f64) {
        if let Some(request) = partitions.request_by_id_mut(id) {
            request.request_size = size;
        }
    }

    /// The largest size in sectors `request` may grow to, and whether a
    /// limit other than its share of the free space set it.
    fn grow_ceiling(
        &self,
        label: &DiskLabel,
        request: &PartitionSpec,
        start_size: Sectors,
        growby: Sectors,
        largest_free: Sectors,
        orig_size: f64,
    ) -> (Sectors, bool) {
        let geometry = label.geometry();
        let mut ceiling = start_size + growby;
        let mut imposed = false;
        let mut limit = |limit: Sectors| {
            if ceiling > limit {
                ceiling = limit;
                imposed = true;
            }
        };

        if let Some(max_size) = request.max_size {
            limit(geometry.round_down_to_cylinder(geometry.to_sectors(max_size)));
        } else if request.base.is_swap(self.registry) {
            let (_, max_swap) = swap_suggestion(self.mem_kib);
            let max_swap = geometry.round_down_to_cylinder(geometry.to_sectors(max_swap));
            if max_swap >= geometry.to_sectors(orig_size) {
                info!("Limiting growth of swap to the suggested {} MB", geometry.to_mb(max_swap));
                limit(max_swap);
            }
        }
        if let Some(fs_max) = request.base.device_format(self.registry).max_size() {
            limit(geometry.round_down_to_cylinder(geometry.to_sectors(fs_max)));
        }
        limit(largest_free + start_size);
        (ceiling, imposed)
    }

    /// Grow every growable request into the space left on its drive.
    /// Each drive's free space is shared out in proportion to the
    /// requested sizes; each share is found by binary search, re-placing
    /// every request at each step.
    pub fn grow_parts(&self, disk_set: &mut DiskSet, partitions: &mut Partitions) -> StorageResult<()> {
        let mut growable: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut orig_sizes: HashMap<u32, f64> = HashMap::new();
        for request in partitions.requests.iter().filter(|r| r.is_new() && r.grow) {
            if let (Some(drive), Some(id), Some(_)) =
                (&request.current_drive, request.unique_id(), request.part)
            {
                growable.entry(drive.clone()).or_default().push(id);
                orig_sizes.insert(id, request.request_size);
            }
        }
        if growable.is_empty() {
            return Ok(());
        }

        let mut grown: HashSet<u32> = HashSet::new();
        let mut free = free_space(disk_set);
        for (drive, ids) in &growable {
            let mut done = false;
            let mut pass = 0;
            while !done && pass < MAX_GROW_PASSES {
                let this_free = match free.get(drive) {
                    Some((total, _)) => *total,
                    None => break,
                };
                pass += 1;
                done = true;

                let mut grow_list = ids.clone();
                grow_list.sort_by(|a, b| {
                    let size = |id: &u32| {
                        partitions
                            .request_by_id(*id)
                            .map(|r| r.base.size)
                            .unwrap_or(0.0)
                    };
                    size(b).total_cmp(&size(a)).then_with(|| a.cmp(b))
                });
                let mut grow_size: f64 = grow_list
                    .iter()
                    .filter(|id| !grown.contains(*id))
                    .filter_map(|id| orig_sizes.get(id))
                    .sum();

                for id in grow_list {
                    if grown.contains(&id) {
                        continue;
                    }
                    let largest_free = match free.get(drive) {
                        Some((_, largest)) => *largest,
                        None => {
                            done = true;
                            break;
                        }
                    };
                    done = false;

                    let request = match partitions.request_by_id(id) {
                        Some(request) => request.clone(),
                        None => continue,
                    };
                    let label = match disk_set.get(drive) {
                        Some(label) => label,
                        None => break,
                    };
                    let geometry = *label.geometry();
                    let start_size = match request.part.and_then(|p| label.partition(p)) {
                        Some(part) => part.length(),
                        None => {
                            grown.insert(id);
                            continue;
                        }
                    };
                    let orig_size = orig_sizes.get(&id).copied().unwrap_or(request.base.size);
                    let percent = if grow_size > 0.0 {
                        orig_size / grow_size
                    } else {
                        1.0
                    };
                    let growby = Sectors(
                        ((percent * *this_free as f64) as u64).max(*geometry.cylinder_sectors()),
                    );
                    let (ceiling, imposed) = self.grow_ceiling(
                        label,
                        &request,
                        start_size,
                        growby,
                        largest_free,
                        orig_size,
                    );

                    let mut min = start_size;
                    let mut max = ceiling.max(min);
                    let mut diff = max - min;
                    let mut current = max - diff / 2;
                    let mut last_diff = None;
                    let mut iterations = 0;
                    let mut failed = false;
                    while max != min && last_diff != Some(diff) && iterations < MAX_GROW_ITERATIONS
                    {
                        Allocator::set_request_size(partitions, id, geometry.to_mb(current));
                        match self.process_partitioning(disk_set, partitions) {
                            Ok(()) => min = current,
                            Err(StorageError::Partitioning(msg)) => {
                                debug!("Growing request {id} to {current} failed: {msg}");
                                failed = true;
                                max = current;
                            }
                            Err(err) => return Err(err),
                        }
                        last_diff = Some(diff);
                        diff = max - min;
                        current = max - diff / 2;
                        iterations += 1;
                    }

                    if failed {
                        Allocator::set_request_size(partitions, id, geometry.to_mb(min));
                        self.process_partitioning(disk_set, partitions)?;
                    }
                    free = free_space(disk_set);

                    if failed || (max == ceiling && imposed) {
                        grown.insert(id);
                        grow_size -= orig_size;
                    }
                }
            }
            if pass == MAX_GROW_PASSES && !done {
                warn!("Stopped growing partitions on {drive} after {MAX_GROW_PASSES} passes");
            }
        }
        partitions.refresh_devices(disk_set);
        Ok(())
    }

    /// Allocate every request. The caller's disk set and requests are
    /// replaced only if allocation succeeds. Returns warnings about the
    /// result.
    pub fn do_partitioning(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
    ) -> StorageResult<Vec<String>> {
        let mut work_disks = disk_set.clone();
        let mut work = partitions.clone();

        for request in work.requests.iter_mut().filter(|r| r.is_new()) {
            request.request_size = request.base.size;
            request.current_drive = None;
            request.unbind();
        }

        for delete in &work.deletes {
            if let Some(label) = work_disks.get_mut(&delete.drive) {
                let part = label
                    .partitions()
                    .iter()
                    .find(|p| p.start == delete.start && p.end == delete.end)
                    .map(|p| p.id());
                if let Some(part) = part {
                    label.delete_partition(part)?;
                }
            }
        }

        self.process_partitioning(&mut work_disks, &mut work)
            .map_err(|e| context(e, "Partitioning failed"))?;
        self.grow_parts(&mut work_disks, &mut work)?;

        let mut warnings = Vec::new();
        if let Some(boot) = work.bootable_request().and_then(|id| work.request_by_id(id)) {
            let placed = boot.current_drive.as_deref().and_then(|drive| {
                let label = work_disks.get(drive)?;
                label.partition(boot.part?).map(|p| (label, p))
            });
            if let Some((label, part)) = placed {
                if label.geometry().end_sector_to_cyl(part.end) >= BOOT_CYLINDER_LIMIT {
                    let msg = format!(
                        "Boot partition {} may not meet booting constraints for your \
                         architecture.",
                        label.partition_name(part)
                    );
                    warn!("{msg}");
                    warnings.push(msg);
                }
            }
        }

        *disk_set = work_disks;
        *partitions = work;
        Ok(warnings)
    }

    /// Whether `part` holds something Linux uses.
    fn is_linux_partition(&self, label: &DiskLabel, part: PartitionId, partitions: &Partitions) -> bool {
        let partition = match label.partition(part) {
            Some(p) => p,
            None => return false,
        };
        if partition.has_flag(PartFlag::Lvm) || partition.has_flag(PartFlag::Raid) {
            return true;
        }
        partitions
            .request_by_part(label.drive(), part)
            .and_then(|r| r.base.fstype.as_deref())
            .or(partition.fs_hint.as_deref())
            .map(|t| {
                self.registry
                    .get_format(Some(t), &Default::default())
                    .linux_native()
            })
            .unwrap_or(false)
    }

    /// Remove existing partitions as `clear` asks, recording a deletion for
    /// each. Protected partitions are kept, and so is any extended
    /// partition holding one. An extended partition left empty is removed
    /// too.
    pub fn do_clear_part(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
        clear: ClearPartType,
        drives: Option<&[String]>,
        reinitialize: Option<LabelType>,
    ) -> StorageResult<()> {
        if clear == ClearPartType::None {
            return Ok(());
        }
        for drive in disk_set.drives() {
            if let Some(drives) = drives {
                if !drives.is_empty() && !drives.contains(&drive) {
                    continue;
                }
            }
            let candidates = match disk_set.get(&drive) {
                Some(label) => label
                    .partitions()
                    .iter()
                    .filter(|p| !p.is_extended())
                    .filter(|p| {
                        clear == ClearPartType::All
                            || self.is_linux_partition(label, p.id(), partitions)
                    })
                    .filter(|p| !partitions.contains_protected_part(label, p.id()))
                    .map(|p| p.id())
                    .collect::<Vec<_>>(),
                None => continue,
            };
            for part in candidates {
                self.clear_partition(disk_set, partitions, &drive, part)?;
            }

            let empty_extended = disk_set.get(&drive).and_then(|label| {
                label
                    .extended()
                    .filter(|_| label.logical_count() == 0)
                    .map(|p| p.id())
            });
            if let Some(extended) = empty_extended {
                self.clear_partition(disk_set, partitions, &drive, extended)?;
            }

            if let (Some(label_type), ClearPartType::All) = (reinitialize, clear) {
                if let Some(label) = disk_set.get_mut(&drive) {
                    if label.partitions().is_empty() {
                        info!("Initializing {drive} with a new {label_type} label");
                        label.reinitialize(label_type);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear_partition(
        &self,
        disk_set: &mut DiskSet,
        partitions: &mut Partitions,
        drive: &str,
        part: PartitionId,
    ) -> StorageResult<()> {
        let label = match disk_set.get_mut(drive) {
            Some(label) => label,
            None => return Ok(()),
        };
        let (start, end, is_new, name) = match label.partition(part) {
            Some(p) => (p.start, p.end, p.is_new, label.partition_name(p)),
            None => return Ok(()),
        };
        if let Some(id) = partitions.request_by_part(drive, part).and_then(|r| r.unique_id()) {
            partitions.remove_request(id);
        }
        if !is_new {
            partitions.add_delete(DeleteSpec::new(drive, start, end));
        }
        label.delete_partition(part)?;
        info!("Clearing partition {name}");
        Ok(())
    }
}

/// Free space of `drive` in MB.
fn free_mb(disk_set: &DiskSet, drive: &str) -> f64 {
    disk_set
        .get(drive)
        .map(|label| {
            label
                .free_segments()
                .iter()
                .map(|s| label.geometry().to_mb(s.length()))
                .sum()
        })
        .unwrap_or(0.0)
}

/// Lay out the default requests on the disks of `tree`, clearing existing
/// partitions as `config` says, and queue the actions that create the
/// result. On failure neither `tree` nor `partitions` changes.
pub fn do_auto_partition(
    tree: &mut DeviceTree,
    partitions: &mut Partitions,
    registry: &FormatRegistry,
    host: &dyn Host,
    config: &StorageConfig,
) -> StorageResult<SanityReport> {
    let mem_kib = host.mem_installed_kib()?;
    let allocator = Allocator::new(registry, config.fit_strategy, mem_kib);

    let mut disk_set = tree.disk_set();
    if disk_set.is_empty() {
        return Err(StorageError::Partitioning(
            "No drives are available for partitioning.".into(),
        ));
    }

    let mut work = partitions.clone();
    if work.requests.is_empty() {
        work.set_from_disk(&disk_set);
        tree.set_request_formats(&mut work);
    }

    allocator.do_clear_part(
        &mut disk_set,
        &mut work,
        config.clear_part,
        config.clear_part_drives.as_deref(),
        config.reinitialize_disks.then_some(config.label_type),
    )?;

    let drives = match &config.clear_part_drives {
        Some(drives) if !drives.is_empty() => drives
            .iter()
            .filter(|d| free_mb(&disk_set, d) > MIN_AUTOPART_FREE)
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    for mut request in auto_create_partition_requests(registry, mem_kib) {
        if let Some(mountpoint) = request.base.mountpoint.as_deref() {
            if work.request_by_mountpoint(mountpoint).is_some() {
                debug!("Keeping the existing request for {mountpoint}");
                continue;
            }
        }
        request.drives = drives.clone();
        request.sanity_check(&work, registry, false)?;
        work.add_request(request);
    }

    let warnings = allocator.do_partitioning(&mut disk_set, &mut work)?;
    let mut report = work.sanity_check_all_requests(&disk_set, registry, mem_kib);
    report.warnings.extend(warnings);
    if !report.errors.is_empty() {
        return Err(StorageError::Partitioning(report.errors.join("\n")));
    }

    tree.apply_partitioning(host, &disk_set, &work, registry)?;
    *partitions = work;
    info!("Automatic partitioning placed {} requests", partitions.requests.len());
    Ok(report)
}
