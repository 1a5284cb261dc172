// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Whole-layout checks run once the allocator has placed every request.

use std::fmt;

use serde_derive::Serialize;

use crate::{
    engine::{
        formats::FormatRegistry,
        label::{DiskSet, LabelType},
        partitioning::requests::Partitions,
    },
    storage::{StorageError, StorageResult},
};

/// Smallest recommended size of some system directories, in MB.
const MIN_SIZES: &[(&str, f64)] = &[
    ("/usr", 250.0),
    ("/tmp", 50.0),
    ("/var", 384.0),
    ("/home", 100.0),
    ("/boot", 75.0),
];

const MIN_ROOT_SIZE: f64 = 250.0;

/// More swap devices than the kernel will use.
const MAX_SWAPS: usize = 32;

/// The outcome of checking a complete layout. Errors must be fixed before
/// the layout is used; warnings are for the user to accept.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SanityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Set when some drive needs a fresh partition table to hold the
    /// layout.
    pub requires_reinitialize: bool,
}

impl SanityReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// The report as a result: the errors, or failing those the warnings.
    pub fn check(&self) -> StorageResult<()> {
        if !self.errors.is_empty() {
            Err(StorageError::Partitioning(self.errors.join("\n")))
        } else if !self.warnings.is_empty() {
            Err(StorageError::PartitioningWarning(self.warnings.join("\n")))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for SanityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "error: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

/// Memory in MB rounded up to a multiple of 16, as the swap checks see it.
pub(super) fn rounded_mem_mb(mem_kib: u64) -> u64 {
    (mem_kib / 1024 / 16 + 1) * 16
}

impl Partitions {
    /// Check the whole layout on `disk_set` against the rules every
    /// installable system must meet, and the recommendations it should.
    pub fn sanity_check_all_requests(
        &self,
        disk_set: &DiskSet,
        registry: &FormatRegistry,
        mem_kib: u64,
    ) -> SanityReport {
        let mut report = SanityReport::default();
        let size_of = |mountpoint: &str| {
            self.request_by_mountpoint(mountpoint).map(|r| {
                r.actual_size(disk_set)
                    .unwrap_or(r.base.size)
            })
        };

        match size_of("/") {
            None => report.errors.push(
                "You have not defined a root partition (/), which is required for \
                 installation to continue."
                    .into(),
            ),
            Some(size) if size < MIN_ROOT_SIZE => report.warnings.push(format!(
                "Your root partition is less than {MIN_ROOT_SIZE} megabytes which is usually \
                 too small to install the system."
            )),
            Some(_) => (),
        }

        for (mountpoint, min) in MIN_SIZES {
            if let Some(size) = size_of(mountpoint) {
                if size < *min {
                    report.warnings.push(format!(
                        "Your {mountpoint} partition is less than {min} megabytes which is \
                         lower than recommended for a normal installation."
                    ));
                }
            }
        }

        if let Some(boot) = self.bootable_request().and_then(|id| self.request_by_id(id)) {
            let placed = boot.current_drive.as_deref().and_then(|drive| {
                let label = disk_set.get(drive)?;
                label.partition(boot.part?).map(|p| (label, p))
            });
            if let Some((label, part)) = placed {
                if label.label_type() == LabelType::Msdos && part.number > 4 {
                    report.errors.push(format!(
                        "Your boot partition isn't on one of the first four partitions and \
                         thus won't be bootable ({}).",
                        label.partition_name(part)
                    ));
                }
            }
            if boot.base.fstype.as_deref() == Some("xfs") {
                report
                    .errors
                    .push("Bootable partitions cannot be on an XFS filesystem.".into());
            }
        }

        for request in &self.requests {
            if let Err(err) = request.sanity_check(self, registry, true) {
                report.errors.push(err.to_string());
            }
        }

        for (drive, label) in disk_set.iter() {
            if label.partitions().len() as u32 > label.max_partitions() {
                report.errors.push(format!(
                    "The partition table of {drive} can address at most {} partitions.",
                    label.max_partitions()
                ));
                report.requires_reinitialize = true;
            }
        }

        let swaps = self
            .requests
            .iter()
            .filter(|r| r.base.is_swap(registry))
            .collect::<Vec<_>>();
        let mem = rounded_mem_mb(mem_kib);
        if swaps.is_empty() {
            if mem < 1024 {
                report.warnings.push(format!(
                    "You have not specified a swap partition. Due to the amount of memory \
                     present ({mem} MB), a swap partition is required to complete \
                     installation."
                ));
            } else {
                report.warnings.push(
                    "You have not specified a swap partition. Although not strictly \
                     required in all cases, it will significantly improve performance for \
                     most installations."
                        .into(),
                );
            }
        } else {
            if swaps.len() >= MAX_SWAPS {
                report.warnings.push(format!(
                    "You have specified more than {MAX_SWAPS} swap devices. The kernel only \
                     supports {MAX_SWAPS} swap devices."
                ));
            }
            let swap_size: f64 = swaps
                .iter()
                .map(|r| r.actual_size(disk_set).unwrap_or(r.base.size))
                .sum();
            if mem < 1024 && swap_size < mem.saturating_sub(8) as f64 {
                report.warnings.push(format!(
                    "You have allocated less swap space ({swap_size} MB) than available RAM \
                     ({mem} MB) on your system. This could negatively impact performance."
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::engine::{
        label::{DiskGeometry, DiskLabel, PartType},
        partitioning::requests::PartitionSpec,
        types::Sectors,
    };

    use super::*;

    const MEM_2G: u64 = 2 * 1024 * 1024;

    fn request(fstype: &str, size: f64, mountpoint: Option<&str>) -> PartitionSpec {
        let mut spec = PartitionSpec::new(Some(fstype), size, mountpoint);
        spec.base.format = true;
        spec
    }

    #[test]
    fn test_missing_root() {
        let registry = FormatRegistry::new();
        let mut partitions = Partitions::new();
        partitions.add_request(request("swap", 2048.0, None));
        let report = partitions.sanity_check_all_requests(&DiskSet::new(), &registry, MEM_2G);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("root partition"));
        assert!(report.check().is_err());
    }

    #[test]
    /// A small root and no swap are warnings, not errors.
    fn test_warnings() {
        let registry = FormatRegistry::new();
        let mut partitions = Partitions::new();
        partitions.add_request(request("ext4", 200.0, Some("/")));
        partitions.add_request(request("ext4", 300.0, Some("/var")));
        let report = partitions.sanity_check_all_requests(&DiskSet::new(), &registry, MEM_2G);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 3);
        assert!(!report.is_clean());
        assert!(matches!(
            report.check(),
            Err(StorageError::PartitioningWarning(_))
        ));
    }

    #[test]
    fn test_xfs_boot() {
        let registry = FormatRegistry::new();
        let mut partitions = Partitions::new();
        partitions.add_request(request("ext4", 4000.0, Some("/")));
        partitions.add_request(request("xfs", 200.0, Some("/boot")));
        partitions.add_request(request("swap", 2048.0, None));
        let report = partitions.sanity_check_all_requests(&DiskSet::new(), &registry, MEM_2G);
        assert_eq!(report.errors.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    /// With little memory, a swap smaller than memory draws a warning.
    fn test_small_swap() {
        let registry = FormatRegistry::new();
        let mut partitions = Partitions::new();
        partitions.add_request(request("ext4", 4000.0, Some("/")));
        partitions.add_request(request("swap", 128.0, None));
        let report = partitions.sanity_check_all_requests(&DiskSet::new(), &registry, 512 * 1024);
        assert_eq!(report.warnings.len(), 1);
        let report = partitions.sanity_check_all_requests(&DiskSet::new(), &registry, MEM_2G);
        assert!(report.is_clean());
    }

    #[test]
    /// A boot partition past the fourth slot of an msdos label can not be
    /// booted from.
    fn test_boot_partition_number() {
        let registry = FormatRegistry::new();
        let geometry = DiskGeometry::from_mb(2000.0, 512);
        let cyl = *geometry.cylinder_sectors();
        let mut label = DiskLabel::new("sda", Path::new("/dev/sda"), LabelType::Msdos, geometry);
        label
            .add_partition(PartType::Extended, Sectors(cyl), Sectors(cyl * 200 - 1), None)
            .unwrap();
        let boot = label
            .add_partition(
                PartType::Logical,
                Sectors(cyl + 63),
                Sectors(cyl * 20 - 1),
                Some("ext3"),
            )
            .unwrap();
        let mut disk_set = DiskSet::new();
        disk_set.insert(label);

        let mut partitions = Partitions::new();
        partitions.add_request(request("ext4", 4000.0, Some("/")));
        partitions.add_request(request("swap", 2048.0, None));
        let mut spec = request("ext3", 150.0, Some("/boot"));
        spec.bind(disk_set.get("sda").unwrap(), boot);
        partitions.add_request(spec);
        let report = partitions.sanity_check_all_requests(&disk_set, &registry, MEM_2G);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("sda5"));
    }
}
