// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Partition requests: what the user asked for, before and after the
//! allocator has placed it on a drive.

use std::path::{Path, PathBuf};

use log::debug;
use serde_derive::Serialize;

use crate::{
    engine::{
        formats::{DeviceFormat, FormatArgs, FormatRegistry},
        label::{DiskLabel, DiskSet, PartFlag, PartitionId},
        types::Sectors,
    },
    storage::{StorageError, StorageResult},
};

/// Directories that can only live on the root filesystem.
const MUST_BE_ON_ROOT: &[&str] = &[
    "/bin", "/dev", "/sbin", "/etc", "/lib", "/root", "/mnt", "lost+found", "/proc",
];

/// Directories that must stay symbolic links.
const OTHER_EXCEPT: &[&str] = &["/var/mail", "/usr/tmp"];

/// Directories that need a Linux native filesystem.
const MUST_BE_ON_LINUX_FS: &[&str] = &[
    "/", "/var", "/tmp", "/usr", "/home", "/usr/share", "/usr/lib",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, strum_macros::Display)]
pub enum RequestKind {
    /// A partition the allocator creates.
    New,
    /// A partition that is already on the disk.
    Preexisting,
}

/// Check the form of a mountpoint: absolute, no trailing slash, no spaces.
pub fn sanity_check_mountpoint(mountpoint: &str) -> StorageResult<()> {
    let valid = mountpoint.starts_with('/')
        && (mountpoint == "/" || !mountpoint.ends_with('/'))
        && !mountpoint.contains(char::is_whitespace)
        && mountpoint.chars().all(|c| !c.is_control());
    if valid {
        Ok(())
    } else {
        Err(StorageError::Partitioning(format!(
            "The mount point {mountpoint} is invalid. Mount points must start with '/' and \
             cannot end with '/', and must contain printable characters and no spaces."
        )))
    }
}

/// What every request carries, whatever kind of device it ends up on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestSpec {
    /// Format type key, resolved through the format registry.
    pub fstype: Option<String>,
    /// Requested size in MB.
    pub size: f64,
    pub mountpoint: Option<String>,
    pub format: bool,
    pub migrate: bool,
    /// Assigned when the request is added to a `Partitions`.
    pub unique_id: Option<u32>,
    pub protected: bool,
    pub fslabel: Option<String>,
    pub fsopts: Option<String>,
    /// The format type found on a preexisting device.
    pub orig_fstype: Option<String>,
}

impl RequestSpec {
    pub fn new(fstype: Option<&str>, size: f64, mountpoint: Option<&str>) -> RequestSpec {
        RequestSpec {
            fstype: fstype.map(String::from),
            size,
            mountpoint: mountpoint.map(String::from),
            format: false,
            migrate: false,
            unique_id: None,
            protected: false,
            fslabel: None,
            fsopts: None,
            orig_fstype: None,
        }
    }

    /// The format this request asks for, as the registry builds it.
    pub fn device_format(&self, registry: &FormatRegistry) -> DeviceFormat {
        registry.get_format(
            self.fstype.as_deref(),
            &FormatArgs {
                mountpoint: self.mountpoint.as_ref().map(PathBuf::from),
                label: self.fslabel.clone(),
                options: self.fsopts.clone(),
                ..Default::default()
            },
        )
    }

    pub fn is_swap(&self, registry: &FormatRegistry) -> bool {
        self.device_format(registry).is_swap()
    }

    /// Whether the format at this request's mountpoint is normally
    /// recreated.
    pub fn format_by_default(&self, registry: &FormatRegistry) -> bool {
        let format = self.device_format(registry);
        crate::engine::formats::format_by_default(
            self.mountpoint.as_deref().map(Path::new),
            &format,
        )
    }

    fn check_size(&self, registry: &FormatRegistry) -> StorageResult<()> {
        if !self.format {
            return Ok(());
        }
        match self.device_format(registry).max_size() {
            Some(max) if self.size > max => Err(StorageError::Partitioning(format!(
                "The size of the {} partition ({} MB) exceeds the maximum size of {} MB.",
                self.mountpoint.as_deref().unwrap_or("requested"),
                self.size,
                max
            ))),
            _ => Ok(()),
        }
    }

    fn check_linux_fs(&self, registry: &FormatRegistry) -> StorageResult<()> {
        let mountpoint = match self.mountpoint.as_deref() {
            Some(m) => m,
            None => return Ok(()),
        };
        if MUST_BE_ON_ROOT.contains(&mountpoint) {
            return Err(StorageError::Partitioning(format!(
                "This mount point is invalid. The {mountpoint} directory must be on the / \
                 file system."
            )));
        }
        if OTHER_EXCEPT.contains(&mountpoint) {
            return Err(StorageError::Partitioning(format!(
                "The mount point {mountpoint} cannot be used. It must be a symbolic link for \
                 proper system operation. Please select a different mount point."
            )));
        }
        if MUST_BE_ON_LINUX_FS.contains(&mountpoint) && !self.device_format(registry).linux_native()
        {
            return Err(StorageError::Partitioning(format!(
                "The mount point {mountpoint} must be on a linux file system."
            )));
        }
        Ok(())
    }

    fn check_in_use(&self, partitions: &Partitions) -> StorageResult<()> {
        let mountpoint = match self.mountpoint.as_deref() {
            Some(m) => m,
            None => return Ok(()),
        };
        if partitions.requests.iter().any(|r| {
            r.base.mountpoint.as_deref() == Some(mountpoint) && r.base.unique_id != self.unique_id
        }) {
            return Err(StorageError::Partitioning(format!(
                "The mount point \"{mountpoint}\" is already in use, please choose a different \
                 mount point."
            )));
        }
        Ok(())
    }

    /// The first problem with this request, if any. `needs_mountpoint` is
    /// whether a mountable format here must be given a mountpoint.
    pub fn sanity_check(
        &self,
        partitions: &Partitions,
        registry: &FormatRegistry,
        needs_mountpoint: bool,
        skip_mountpoint_in_use: bool,
    ) -> StorageResult<()> {
        match self.mountpoint.as_deref() {
            Some(mountpoint) => sanity_check_mountpoint(mountpoint)?,
            None => {
                if needs_mountpoint && self.device_format(registry).mountable() {
                    return Err(StorageError::Partitioning(
                        "Please specify a mount point for this partition.".into(),
                    ));
                }
            }
        }
        self.check_size(registry)?;
        self.check_linux_fs(registry)?;
        if !skip_mountpoint_in_use {
            self.check_in_use(partitions)?;
        }
        Ok(())
    }
}

/// A request for a partition, new or preexisting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartitionSpec {
    pub base: RequestSpec,
    pub kind: RequestKind,
    pub grow: bool,
    /// Upper bound on growth, in MB.
    pub max_size: Option<f64>,
    /// First cylinder of a new request, or first sector of a preexisting
    /// partition.
    pub start: Option<u64>,
    /// Last cylinder of a new request, or last sector of a preexisting
    /// partition.
    pub end: Option<u64>,
    /// Drives the request may be placed on; any drive when empty.
    pub drives: Vec<String>,
    /// Place the request only in a primary slot.
    pub primary: bool,
    /// Set the boot flag on the partition even when it holds neither
    /// /boot nor /.
    pub bootable: bool,
    /// Size the allocator is currently trying, in MB.
    pub request_size: f64,
    /// Drive the allocator placed the request on.
    pub current_drive: Option<String>,
    /// The partition in `current_drive`'s label holding this request.
    pub part: Option<PartitionId>,
    /// Device name of `part`, kept in step as logical partitions are
    /// renumbered.
    pub device: Option<String>,
}

impl PartitionSpec {
    /// A request for a new partition of `size` MB.
    pub fn new(fstype: Option<&str>, size: f64, mountpoint: Option<&str>) -> PartitionSpec {
        PartitionSpec {
            base: RequestSpec::new(fstype, size, mountpoint),
            kind: RequestKind::New,
            grow: false,
            max_size: None,
            start: None,
            end: None,
            drives: Vec::new(),
            primary: false,
            bootable: false,
            request_size: size,
            current_drive: None,
            part: None,
            device: None,
        }
    }

    /// A request describing the partition already at sectors
    /// `start`-`end` of `drive`.
    pub fn preexisting(
        fstype: Option<&str>,
        drive: &str,
        start: Sectors,
        end: Sectors,
        size: f64,
    ) -> PartitionSpec {
        let mut spec = PartitionSpec::new(fstype, size, None);
        spec.kind = RequestKind::Preexisting;
        spec.base.orig_fstype = spec.base.fstype.clone();
        spec.start = Some(*start);
        spec.end = Some(*end);
        spec.drives = vec![drive.to_string()];
        spec.current_drive = Some(drive.to_string());
        spec
    }

    pub fn is_new(&self) -> bool {
        self.kind == RequestKind::New
    }

    pub fn is_preexisting(&self) -> bool {
        self.kind == RequestKind::Preexisting
    }

    pub fn unique_id(&self) -> Option<u32> {
        self.base.unique_id
    }

    /// Whether the request is placed by cylinder rather than by size.
    pub fn is_constrained(&self) -> bool {
        self.start.is_some()
    }

    /// Attach the request to a partition of `label`.
    pub fn bind(&mut self, label: &DiskLabel, part: PartitionId) {
        self.current_drive = Some(label.drive().to_string());
        self.part = Some(part);
        self.device = label.partition(part).map(|p| label.partition_name(p));
    }

    pub fn unbind(&mut self) {
        self.part = None;
        self.device = None;
    }

    /// Size of the partition holding the request, in MB.
    pub fn actual_size(&self, disk_set: &DiskSet) -> Option<f64> {
        let label = disk_set.get(self.current_drive.as_deref()?)?;
        let part = label.partition(self.part?)?;
        Some(label.geometry().to_mb(part.length()))
    }

    /// The first problem with this request, if any.
    pub fn sanity_check(
        &self,
        partitions: &Partitions,
        registry: &FormatRegistry,
        skip_mountpoint_in_use: bool,
    ) -> StorageResult<()> {
        self.base.sanity_check(
            partitions,
            registry,
            self.is_new() || self.base.format,
            skip_mountpoint_in_use,
        )?;
        if let Some(max) = self.max_size {
            if self.base.size > max {
                return Err(StorageError::Partitioning(format!(
                    "The size of the requested partition (size = {} MB) exceeds the maximum \
                     size of {} MB.",
                    self.base.size, max
                )));
            }
        }
        if self.base.size < 0.0 {
            return Err(StorageError::Partitioning(format!(
                "The size of the requested partition is negative! (size = {} MB)",
                self.base.size
            )));
        }
        if self.is_new() {
            if self.start.is_some_and(|s| s < 1) || self.end.is_some_and(|e| e < 1) {
                return Err(StorageError::Partitioning(
                    "Partitions can't start below the first cylinder.".into(),
                ));
            }
            if let (Some(start), Some(end)) = (self.start, self.end) {
                if end < start {
                    return Err(StorageError::Partitioning(
                        "Partitions can't end before they start.".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A preexisting partition to delete, by its place on the drive.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DeleteSpec {
    pub drive: String,
    pub start: Sectors,
    pub end: Sectors,
}

impl DeleteSpec {
    pub fn new(drive: &str, start: Sectors, end: Sectors) -> DeleteSpec {
        DeleteSpec {
            drive: drive.to_string(),
            start,
            end,
        }
    }
}

/// Every partition request, with the deletions of preexisting partitions
/// they rely on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Partitions {
    pub requests: Vec<PartitionSpec>,
    pub deletes: Vec<DeleteSpec>,
    next_unique_id: u32,
}

impl Default for Partitions {
    fn default() -> Partitions {
        Partitions {
            requests: Vec::new(),
            deletes: Vec::new(),
            next_unique_id: 1,
        }
    }
}

impl Partitions {
    pub fn new() -> Partitions {
        Partitions::default()
    }

    /// Describe the partitions already on the drives of `disk_set`.
    pub fn set_from_disk(&mut self, disk_set: &DiskSet) {
        self.requests.clear();
        self.deletes.clear();
        for (_, label) in disk_set.iter() {
            for part in label.partitions() {
                let fstype = if part.is_extended() {
                    None
                } else if part.has_flag(PartFlag::Raid) {
                    Some("mdmember")
                } else if part.has_flag(PartFlag::Lvm) {
                    Some("lvmpv")
                } else {
                    part.fs_hint.as_deref()
                };
                let mut spec = PartitionSpec::preexisting(
                    fstype,
                    label.drive(),
                    part.start,
                    part.end,
                    label.geometry().to_mb(part.length()),
                );
                spec.primary = !part.is_logical();
                spec.bind(label, part.id());
                self.add_request(spec);
            }
        }
        debug!(
            "Described {} preexisting partitions on {} drives",
            self.requests.len(),
            disk_set.len()
        );
    }

    /// Add a request, assigning its unique id. Returns the id.
    pub fn add_request(&mut self, mut request: PartitionSpec) -> u32 {
        let id = match request.base.unique_id {
            Some(id) => {
                self.next_unique_id = self.next_unique_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_unique_id;
                self.next_unique_id += 1;
                id
            }
        };
        request.base.unique_id = Some(id);
        self.requests.push(request);
        id
    }

    pub fn remove_request(&mut self, unique_id: u32) -> Option<PartitionSpec> {
        let index = self
            .requests
            .iter()
            .position(|r| r.unique_id() == Some(unique_id))?;
        Some(self.requests.remove(index))
    }

    pub fn add_delete(&mut self, delete: DeleteSpec) {
        if !self.deletes.contains(&delete) {
            self.deletes.push(delete);
            self.deletes.sort();
        }
    }

    pub fn request_by_id(&self, unique_id: u32) -> Option<&PartitionSpec> {
        self.requests.iter().find(|r| r.unique_id() == Some(unique_id))
    }

    pub fn request_by_id_mut(&mut self, unique_id: u32) -> Option<&mut PartitionSpec> {
        self.requests
            .iter_mut()
            .find(|r| r.unique_id() == Some(unique_id))
    }

    pub fn request_by_mountpoint(&self, mountpoint: &str) -> Option<&PartitionSpec> {
        self.requests
            .iter()
            .find(|r| r.base.mountpoint.as_deref() == Some(mountpoint))
    }

    pub fn request_by_device(&self, device: &str) -> Option<&PartitionSpec> {
        self.requests
            .iter()
            .find(|r| r.device.as_deref() == Some(device))
    }

    /// The request held by partition `part` of `drive`.
    pub fn request_by_part(&self, drive: &str, part: PartitionId) -> Option<&PartitionSpec> {
        self.requests
            .iter()
            .find(|r| r.part == Some(part) && r.current_drive.as_deref() == Some(drive))
    }

    pub fn requests_on_drive(&self, drive: &str) -> Vec<&PartitionSpec> {
        self.requests
            .iter()
            .filter(|r| r.current_drive.as_deref() == Some(drive))
            .collect()
    }

    /// The request the boot loader reads from: /boot if there is one,
    /// otherwise /.
    pub fn bootable_request(&self) -> Option<u32> {
        self.request_by_mountpoint("/boot")
            .or_else(|| self.request_by_mountpoint("/"))
            .and_then(|r| r.unique_id())
    }

    pub fn is_bootable(&self, request: &PartitionSpec) -> bool {
        request.bootable
            || (request.unique_id().is_some() && request.unique_id() == self.bootable_request())
    }

    /// Order requests for placement: bootable requests first, then larger
    /// before smaller, then by unique id.
    pub fn sort_requests(&mut self) {
        let boot = self.bootable_request();
        self.requests.sort_by(|a, b| {
            let a_boot = a.bootable || (a.unique_id().is_some() && a.unique_id() == boot);
            let b_boot = b.bootable || (b.unique_id().is_some() && b.unique_id() == boot);
            b_boot
                .cmp(&a_boot)
                .then_with(|| b.base.size.total_cmp(&a.base.size))
                .then_with(|| a.unique_id().cmp(&b.unique_id()))
        });
    }

    /// Recompute device names after logical partitions have been
    /// renumbered.
    pub fn refresh_devices(&mut self, disk_set: &DiskSet) {
        for request in &mut self.requests {
            request.device = match (request.current_drive.as_deref(), request.part) {
                (Some(drive), Some(part)) => disk_set
                    .get(drive)
                    .and_then(|label| label.partition(part).map(|p| label.partition_name(p))),
                _ => None,
            };
        }
    }

    /// Drop the requests of every logical partition on `drive`, marking
    /// the preexisting ones for deletion.
    pub fn delete_all_logical_partitions(&mut self, label: &DiskLabel) {
        for part in label.partitions().iter().filter(|p| p.is_logical()) {
            let found = self
                .request_by_part(label.drive(), part.id())
                .and_then(|r| r.unique_id().map(|id| (id, r.is_preexisting())));
            if let Some((id, preexisting)) = found {
                self.remove_request(id);
                if preexisting {
                    self.add_delete(DeleteSpec::new(label.drive(), part.start, part.end));
                }
            }
        }
    }

    /// Whether the partition, or for an extended partition any logical
    /// partition in it, belongs to a protected request.
    pub fn contains_protected_part(&self, label: &DiskLabel, part: PartitionId) -> bool {
        let is_protected = |id: PartitionId| {
            self.request_by_part(label.drive(), id)
                .is_some_and(|r| r.base.protected)
        };
        match label.partition(part) {
            Some(p) if p.is_extended() => label
                .partitions()
                .iter()
                .filter(|l| l.is_logical())
                .any(|l| is_protected(l.id())),
            Some(_) => is_protected(part),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::engine::label::{DiskGeometry, LabelType, PartType};

    use super::*;

    fn disk_set_with_logicals() -> DiskSet {
        let geometry = DiskGeometry::from_mb(1000.0, 512);
        let cyl = *geometry.cylinder_sectors();
        let mut label = DiskLabel::new("sda", Path::new("/dev/sda"), LabelType::Msdos, geometry);
        label
            .add_partition(PartType::Primary, Sectors(63), Sectors(cyl * 10 - 1), Some("ext4"))
            .unwrap();
        label
            .add_partition(
                PartType::Extended,
                Sectors(cyl * 10),
                Sectors(cyl * 100 - 1),
                None,
            )
            .unwrap();
        label
            .add_partition(
                PartType::Logical,
                Sectors(cyl * 10 + 63),
                Sectors(cyl * 50 - 1),
                Some("swap"),
            )
            .unwrap();
        label
            .add_partition(
                PartType::Logical,
                Sectors(cyl * 50 + 63),
                Sectors(cyl * 90 - 1),
                None,
            )
            .unwrap();
        let mut disk_set = DiskSet::new();
        disk_set.insert(label);
        disk_set
    }

    #[test]
    fn test_mountpoint_form() {
        assert!(sanity_check_mountpoint("/").is_ok());
        assert!(sanity_check_mountpoint("/usr/local").is_ok());
        assert!(sanity_check_mountpoint("usr").is_err());
        assert!(sanity_check_mountpoint("/usr/").is_err());
        assert!(sanity_check_mountpoint("/my data").is_err());
    }

    #[test]
    /// Unique ids are assigned from 1 and never reused.
    fn test_unique_ids() {
        let mut partitions = Partitions::new();
        let a = partitions.add_request(PartitionSpec::new(Some("ext4"), 100.0, Some("/")));
        let b = partitions.add_request(PartitionSpec::new(Some("swap"), 100.0, None));
        assert_eq!((a, b), (1, 2));
        partitions.remove_request(b);
        let c = partitions.add_request(PartitionSpec::new(Some("ext4"), 100.0, Some("/home")));
        assert_eq!(c, 3);
        assert_eq!(partitions.bootable_request(), Some(a));
    }

    #[test]
    /// The boot request sorts first; the rest by size, larger first.
    fn test_sort_requests() {
        let mut partitions = Partitions::new();
        partitions.add_request(PartitionSpec::new(Some("ext4"), 500.0, Some("/home")));
        partitions.add_request(PartitionSpec::new(Some("ext4"), 100.0, Some("/boot")));
        partitions.add_request(PartitionSpec::new(Some("ext4"), 2000.0, Some("/")));
        partitions.add_request(PartitionSpec::new(Some("swap"), 500.0, None));
        partitions.sort_requests();
        let order = partitions
            .requests
            .iter()
            .map(|r| r.unique_id().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_request_checks() {
        let registry = FormatRegistry::new();
        let mut partitions = Partitions::new();
        partitions.add_request(PartitionSpec::new(Some("ext4"), 1000.0, Some("/")));

        let dup = PartitionSpec::new(Some("ext4"), 100.0, Some("/"));
        assert_matches!(
            dup.sanity_check(&partitions, &registry, false),
            Err(StorageError::Partitioning(_))
        );
        assert!(dup.sanity_check(&partitions, &registry, true).is_ok());

        let etc = PartitionSpec::new(Some("ext4"), 100.0, Some("/etc"));
        assert!(etc.sanity_check(&partitions, &registry, false).is_err());

        let usr = PartitionSpec::new(Some("vfat"), 100.0, Some("/usr"));
        assert!(usr.sanity_check(&partitions, &registry, false).is_err());

        let unmounted = PartitionSpec::new(Some("ext4"), 100.0, None);
        assert!(unmounted.sanity_check(&partitions, &registry, false).is_err());
        let swap = PartitionSpec::new(Some("swap"), 100.0, None);
        assert!(swap.sanity_check(&partitions, &registry, false).is_ok());

        let mut capped = PartitionSpec::new(Some("ext4"), 100.0, Some("/data"));
        capped.max_size = Some(50.0);
        assert!(capped.sanity_check(&partitions, &registry, false).is_err());

        let mut below = PartitionSpec::new(Some("ext4"), 100.0, Some("/data"));
        below.start = Some(0);
        assert!(below.sanity_check(&partitions, &registry, false).is_err());
    }

    #[test]
    /// Oversized requests are only refused when they are to be formatted.
    fn test_size_over_format_max() {
        let registry = FormatRegistry::new();
        let partitions = Partitions::new();
        let max = registry.get_format(Some("vfat"), &FormatArgs::default()).max_size();
        let size = max.map(|m| m + 1.0).unwrap_or(f64::MAX);
        let mut request = PartitionSpec::new(Some("vfat"), size, Some("/data"));
        if max.is_some() {
            request.base.format = true;
            assert!(request.sanity_check(&partitions, &registry, false).is_err());
        }
        request.base.format = false;
        assert!(request.sanity_check(&partitions, &registry, false).is_ok());
    }

    #[test]
    fn test_set_from_disk() {
        let disk_set = disk_set_with_logicals();
        let mut partitions = Partitions::new();
        partitions.set_from_disk(&disk_set);
        assert_eq!(partitions.requests.len(), 4);
        assert!(partitions.requests.iter().all(|r| r.is_preexisting()));
        assert_eq!(
            partitions.request_by_device("sda5").and_then(|r| r.base.fstype.as_deref()),
            Some("swap")
        );
        assert_eq!(partitions.requests_on_drive("sda").len(), 4);
        let size = partitions
            .request_by_device("sda1")
            .and_then(|r| r.actual_size(&disk_set))
            .unwrap();
        assert!(size > 70.0 && size < 80.0);
    }

    #[test]
    /// Dropping logical partitions records deletions for them and leaves
    /// the rest alone.
    fn test_delete_all_logical_partitions() {
        let disk_set = disk_set_with_logicals();
        let label = disk_set.get("sda").unwrap();
        let mut partitions = Partitions::new();
        partitions.set_from_disk(&disk_set);
        partitions.delete_all_logical_partitions(label);
        assert_eq!(partitions.requests.len(), 2);
        assert_eq!(partitions.deletes.len(), 2);
        assert!(partitions.deletes.iter().all(|d| d.drive == "sda"));
    }

    #[test]
    fn test_protected_extended() {
        let disk_set = disk_set_with_logicals();
        let label = disk_set.get("sda").unwrap();
        let extended = label.extended().unwrap().id();
        let mut partitions = Partitions::new();
        partitions.set_from_disk(&disk_set);
        assert!(!partitions.contains_protected_part(label, extended));
        let logical = label.partition_by_name("sda6").unwrap().id();
        let id = partitions
            .request_by_part("sda", logical)
            .and_then(|r| r.unique_id())
            .unwrap();
        partitions.request_by_id_mut(id).unwrap().base.protected = true;
        assert!(partitions.contains_protected_part(label, extended));
        assert!(partitions.contains_protected_part(label, logical));
    }
}
