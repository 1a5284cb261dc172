// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![cfg(feature = "engine")]

mod common;

use std::path::Path;

use proptest::prelude::*;

use installer_storage::engine::{
    do_auto_partition, ActionKind, Allocator, BlockDeviceInfo, ClearPartType, DeviceClass,
    DeviceTree, DiskGeometry, DiskLabel, DiskSet, FitStrategy, FormatRegistry, LabelType,
    PartitionSpec, Partitions, SimHost, SimProbe, StorageConfig,
};

use crate::common::{logger::init_logger, sim::empty_disks};

const MEM_2G: u64 = 2 * 1024 * 1024;

/// An msdos disk holding a vfat partition, an ext4 partition and swap.
const SDA_DUMP: &str = r#"{
   "partitiontable": {
      "label": "dos",
      "device": "/dev/sda",
      "unit": "sectors",
      "sectorsize": 512,
      "partitions": [
         {"node": "/dev/sda1", "start": 63, "size": 2048000, "type": "c"},
         {"node": "/dev/sda2", "start": 2048063, "size": 4096000, "type": "83"},
         {"node": "/dev/sda3", "start": 6144063, "size": 1024000, "type": "82"}
      ]
   }
}"#;

fn dual_boot_disk() -> (DeviceTree, SimHost, FormatRegistry) {
    let host = SimHost::new();
    host.set_mem_mb(2048);
    host.set_output("sfdisk", SDA_DUMP);
    let registry = FormatRegistry::new();

    let mut sda1 = BlockDeviceInfo::partition("sda1", "sda", 1000.0);
    sda1.format_type = Some("vfat".into());
    let mut sda2 = BlockDeviceInfo::partition("sda2", "sda", 2000.0);
    sda2.format_type = Some("ext4".into());
    let mut sda3 = BlockDeviceInfo::partition("sda3", "sda", 500.0);
    sda3.format_type = Some("swap".into());
    let records = vec![
        BlockDeviceInfo::new("sda", DeviceClass::Disk, 8000.0),
        sda1,
        sda2,
        sda3,
    ];
    for record in &records {
        host.add_node(format!("/dev/{}", record.name));
    }

    let mut tree = DeviceTree::new(&StorageConfig::default());
    tree.populate(&mut SimProbe::new(records), &host, &registry)
        .unwrap();
    (tree, host, registry)
}

#[test]
/// Automatic partitioning of blank disks yields root, /boot and swap,
/// and committing it leaves an fstab naming all three.
fn test_autopart_blank_disks() {
    init_logger();
    let config = StorageConfig::default();
    let (mut tree, host, registry) = empty_disks(&[("sda", 8000.0), ("sdb", 4000.0)], &config);

    let mut partitions = Partitions::new();
    let report = do_auto_partition(&mut tree, &mut partitions, &registry, &host, &config).unwrap();
    assert!(report.errors.is_empty());
    for mountpoint in ["/", "/boot"] {
        let request = partitions.request_by_mountpoint(mountpoint).unwrap();
        assert!(request.current_drive.is_some());
        assert!(request.part.is_some());
    }
    assert!(tree
        .actions()
        .iter()
        .all(|a| matches!(a.kind, ActionKind::CreateDevice | ActionKind::CreateFormat)));

    tree.process_actions(&host).unwrap();
    assert!(tree.actions().is_empty());
    assert!(!host.commands_for("sfdisk").is_empty());

    let fstab = tree.fstab();
    assert!(fstab.entry_by_mountpoint("/").is_some());
    assert!(fstab.entry_by_mountpoint("/boot").is_some());
    assert_eq!(
        fstab.entries.last().map(|e| e.fstype.as_str()),
        Some("swap")
    );
}

#[test]
/// Clearing only some drives keeps the automatic requests off the others.
fn test_autopart_drive_restriction() {
    init_logger();
    let config = StorageConfig {
        clear_part_drives: Some(vec!["sdb".into()]),
        ..Default::default()
    };
    let (mut tree, host, registry) = empty_disks(&[("sda", 8000.0), ("sdb", 4000.0)], &config);

    let mut partitions = Partitions::new();
    do_auto_partition(&mut tree, &mut partitions, &registry, &host, &config).unwrap();
    let new = partitions
        .requests
        .iter()
        .filter(|r| r.is_new())
        .collect::<Vec<_>>();
    assert_eq!(new.len(), 3);
    assert!(new
        .iter()
        .all(|r| r.current_drive.as_deref() == Some("sdb")));
    let sda = tree.get_device_by_name("sda").unwrap();
    assert!(tree.partitions_on(sda).is_empty());
}

#[test]
/// Disks too small for the default layout fail and leave the tree alone.
fn test_autopart_no_room() {
    init_logger();
    let config = StorageConfig::default();
    let (mut tree, host, registry) = empty_disks(&[("sda", 500.0)], &config);

    let mut partitions = Partitions::new();
    assert!(do_auto_partition(&mut tree, &mut partitions, &registry, &host, &config).is_err());
    assert!(tree.actions().is_empty());
    assert!(partitions.requests.is_empty());
}

#[test]
/// Clearing Linux partitions removes the ext4 and swap partitions, keeps
/// the vfat one, and lays the new system out beside it.
fn test_clear_linux_keeps_foreign_partition() {
    init_logger();
    let (mut tree, host, registry) = dual_boot_disk();
    let sda1 = tree.get_device_by_name("sda1").unwrap();
    let config = StorageConfig {
        clear_part: ClearPartType::Linux,
        ..Default::default()
    };

    let mut partitions = Partitions::new();
    do_auto_partition(&mut tree, &mut partitions, &registry, &host, &config).unwrap();

    let destroyed = tree
        .actions()
        .iter()
        .filter(|a| a.kind == ActionKind::DestroyDevice)
        .map(|a| a.device_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(destroyed, vec!["sda2", "sda3"]);
    assert_eq!(tree.get_device_by_name("sda1"), Some(sda1));
    assert_eq!(
        tree.device(sda1).unwrap().format().type_name(),
        Some("vfat")
    );
    assert_eq!(partitions.deletes.len(), 2);
    assert!(partitions.request_by_mountpoint("/").is_some());

    // the destroys come before anything is created in the space they free
    let first_create = tree
        .actions()
        .iter()
        .position(|a| a.kind == ActionKind::CreateDevice)
        .unwrap();
    assert!(tree.actions()[..first_create]
        .iter()
        .all(|a| matches!(a.kind, ActionKind::DestroyDevice | ActionKind::DestroyFormat)));
}

#[test]
/// A fixed /boot keeps its size while a growable root takes the rest of
/// a single free region.
fn test_boot_and_growing_root() {
    init_logger();
    let registry = FormatRegistry::new();
    let mut disk_set = blank_disk_set(&[10240.0]);
    let mut partitions = Partitions::new();
    let mut root = PartitionSpec::new(Some("ext4"), 1024.0, Some("/"));
    root.base.format = true;
    root.grow = true;
    partitions.add_request(root);
    let mut boot = PartitionSpec::new(Some("ext3"), 200.0, Some("/boot"));
    boot.base.format = true;
    partitions.add_request(boot);

    Allocator::new(&registry, FitStrategy::BestFit, MEM_2G)
        .do_partitioning(&mut disk_set, &mut partitions)
        .unwrap();

    let label = disk_set.get("sda").unwrap();
    let cylinder = label.geometry().to_mb(label.geometry().cylinder_sectors());
    let size_of = |mountpoint: &str| {
        partitions
            .request_by_mountpoint(mountpoint)
            .and_then(|r| r.actual_size(&disk_set))
            .unwrap()
    };
    assert!((size_of("/boot") - 200.0).abs() <= cylinder);
    assert!(size_of("/") > 10240.0 - 200.0 - 10.0 * cylinder);
    assert!(size_of("/") + size_of("/boot") <= 10240.0);
}

fn blank_disk_set(sizes: &[f64]) -> DiskSet {
    let mut disk_set = DiskSet::new();
    for (i, size) in sizes.iter().enumerate() {
        let drive = format!("sd{}", (b'a' + i as u8) as char);
        disk_set.insert(DiskLabel::new(
            &drive,
            &Path::new("/dev").join(&drive),
            LabelType::Msdos,
            DiskGeometry::from_mb(*size, 512),
        ));
    }
    disk_set
}

fn request_strategy() -> impl Strategy<Value = PartitionSpec> {
    (
        50.0f64..3000.0,
        any::<bool>(),
        proptest::option::of(100.0f64..4000.0),
    )
        .prop_map(|(size, grow, max_size)| {
            let mut spec = PartitionSpec::new(Some("ext4"), size, None);
            spec.base.format = true;
            spec.grow = grow;
            spec.max_size = max_size.map(|m| m.max(size));
            spec
        })
}

proptest! {
    #[test]
    /// Whatever the allocator places stays inside its disk, no two
    /// partitions overlap, and growth stops at each request's maximum.
    fn allocation_is_sound(
        sizes in proptest::collection::vec(1000.0f64..20000.0, 1..3),
        requests in proptest::collection::vec(request_strategy(), 1..6),
        largest in any::<bool>(),
    ) {
        let registry = FormatRegistry::new();
        let strategy = if largest { FitStrategy::LargestFit } else { FitStrategy::BestFit };
        let allocator = Allocator::new(&registry, strategy, MEM_2G);
        let mut disk_set = blank_disk_set(&sizes);
        let mut partitions = Partitions::new();
        for request in requests {
            partitions.add_request(request);
        }

        if allocator.do_partitioning(&mut disk_set, &mut partitions).is_ok() {
            for (_, label) in disk_set.iter() {
                let mut spans = label
                    .partitions()
                    .iter()
                    .filter(|p| !p.is_extended())
                    .map(|p| (p.start, p.end))
                    .collect::<Vec<_>>();
                spans.sort();
                for (start, end) in &spans {
                    prop_assert!(start <= end);
                    prop_assert!(*end <= label.last_usable());
                }
                for pair in spans.windows(2) {
                    prop_assert!(pair[0].1 < pair[1].0);
                }
            }
            for request in &partitions.requests {
                prop_assert!(request.current_drive.is_some());
                let label = disk_set.get(request.current_drive.as_deref().unwrap()).unwrap();
                let cylinder = label.geometry().to_mb(label.geometry().cylinder_sectors());
                if let (Some(max_size), Some(size)) =
                    (request.max_size, request.actual_size(&disk_set))
                {
                    prop_assert!(size <= max_size + cylinder);
                }
            }
        }
    }

    #[test]
    /// The same requests on the same disks always land in the same place.
    fn allocation_is_deterministic(
        sizes in proptest::collection::vec(1000.0f64..20000.0, 1..3),
        requests in proptest::collection::vec(request_strategy(), 1..6),
    ) {
        let registry = FormatRegistry::new();
        let allocator = Allocator::new(&registry, FitStrategy::BestFit, MEM_2G);
        let mut partitions = Partitions::new();
        for request in requests {
            partitions.add_request(request);
        }

        let mut first_disks = blank_disk_set(&sizes);
        let mut first = partitions.clone();
        let first_result = allocator.do_partitioning(&mut first_disks, &mut first).is_ok();
        let mut second_disks = blank_disk_set(&sizes);
        let mut second = partitions;
        let second_result = allocator.do_partitioning(&mut second_disks, &mut second).is_ok();

        prop_assert_eq!(first_result, second_result);
        let placements = |disk_set: &DiskSet, partitions: &Partitions| {
            partitions
                .requests
                .iter()
                .map(|r| (r.current_drive.clone(), r.actual_size(disk_set)))
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(
            placements(&first_disks, &first),
            placements(&second_disks, &second)
        );
    }
}
