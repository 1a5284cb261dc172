// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Mountable filesystems. Each supported type is described by a static
// descriptor naming its tools and capabilities; a single Filesystem type
// carries the per-instance state and drives the tools the descriptor names.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::{
    engine::host::{execute, Host, MountRequest},
    storage::{FormatErrorKind, StorageError, StorageResult},
};

const TIB: f64 = 1024.0 * 1024.0;

/// Capabilities and tools of one filesystem type.
#[derive(Debug, PartialEq)]
pub struct FsType {
    pub name: &'static str,
    /// Type passed to mount, if it differs from the name.
    pub mount_type: Option<&'static str>,
    pub mkfs: Option<&'static str>,
    pub mkfs_args: &'static [&'static str],
    /// Option mkfs takes a label with.
    pub mkfs_label_opt: &'static str,
    pub resize_tool: Option<&'static str>,
    pub label_tool: Option<&'static str>,
    pub label_args: &'static [&'static str],
    pub check_tool: Option<&'static str>,
    pub check_args: &'static [&'static str],
    pub migrate_tool: Option<&'static str>,
    pub migrate_args: &'static [&'static str],
    pub migration_target: Option<&'static str>,
    pub default_options: &'static str,
    /// Largest filesystem the type supports, in MB.
    pub max_size: Option<f64>,
    /// Size assumed when the resize tool can not tell, in MB.
    pub min_size: f64,
    pub formattable: bool,
    pub resizable: bool,
    pub bootable: bool,
    pub linux_native: bool,
    pub mountable: bool,
    /// Mounts something that is not a block device.
    pub nodev: bool,
    pub bind: bool,
    pub dump: bool,
    pub check: bool,
}

const BASE: FsType = FsType {
    name: "",
    mount_type: None,
    mkfs: None,
    mkfs_args: &[],
    mkfs_label_opt: "-L",
    resize_tool: None,
    label_tool: None,
    label_args: &[],
    check_tool: None,
    check_args: &[],
    migrate_tool: None,
    migrate_args: &[],
    migration_target: None,
    default_options: "defaults",
    max_size: None,
    min_size: 1.0,
    formattable: false,
    resizable: false,
    bootable: false,
    linux_native: false,
    mountable: true,
    nodev: false,
    bind: false,
    dump: false,
    check: false,
};

const EXT2: FsType = FsType {
    name: "ext2",
    mkfs: Some("mke2fs"),
    resize_tool: Some("resize2fs"),
    label_tool: Some("e2label"),
    check_tool: Some("e2fsck"),
    check_args: &["-f", "-p", "-C", "0"],
    migrate_tool: Some("tune2fs"),
    migrate_args: &["-j"],
    migration_target: Some("ext3"),
    max_size: Some(8.0 * TIB),
    formattable: true,
    resizable: true,
    bootable: true,
    linux_native: true,
    dump: true,
    check: true,
    ..BASE
};

pub static FS_TYPES: &[FsType] = &[
    EXT2,
    FsType {
        name: "ext3",
        mkfs_args: &["-t", "ext3"],
        migrate_args: &["-O", "extents"],
        migration_target: Some("ext4"),
        ..EXT2
    },
    FsType {
        name: "ext4",
        mkfs_args: &["-t", "ext4"],
        migrate_tool: None,
        migrate_args: &[],
        migration_target: None,
        max_size: Some(16.0 * TIB),
        bootable: false,
        ..EXT2
    },
    FsType {
        name: "xfs",
        mkfs: Some("mkfs.xfs"),
        mkfs_args: &["-f"],
        label_tool: Some("xfs_admin"),
        label_args: &["-L"],
        max_size: Some(16.0 * TIB),
        min_size: 16.0,
        formattable: true,
        linux_native: true,
        dump: true,
        check: true,
        ..BASE
    },
    FsType {
        name: "btrfs",
        mkfs: Some("mkfs.btrfs"),
        max_size: Some(16.0 * TIB),
        formattable: true,
        linux_native: true,
        dump: true,
        check: true,
        ..BASE
    },
    FsType {
        name: "vfat",
        mkfs: Some("mkdosfs"),
        mkfs_label_opt: "-n",
        label_tool: Some("dosfslabel"),
        check_tool: Some("dosfsck"),
        check_args: &["-n"],
        default_options: "umask=0077,shortname=winnt",
        max_size: Some(TIB),
        formattable: true,
        ..BASE
    },
    FsType {
        name: "ntfs",
        resize_tool: Some("ntfsresize"),
        check_tool: Some("ntfsresize"),
        check_args: &["-c"],
        max_size: Some(16.0 * TIB),
        resizable: true,
        ..BASE
    },
    FsType {
        name: "iso9660",
        default_options: "ro",
        ..BASE
    },
    FsType {
        name: "nfs",
        mountable: false,
        ..BASE
    },
    FsType {
        name: "nfs4",
        mountable: false,
        ..BASE
    },
    FsType {
        name: "devpts",
        default_options: "gid=5,mode=620",
        nodev: true,
        ..BASE
    },
    FsType {
        name: "proc",
        nodev: true,
        ..BASE
    },
    FsType {
        name: "sysfs",
        nodev: true,
        ..BASE
    },
    FsType {
        name: "tmpfs",
        nodev: true,
        ..BASE
    },
    FsType {
        name: "bind",
        mount_type: Some("none"),
        bind: true,
        ..BASE
    },
];

pub fn fs_type(name: &str) -> Option<&'static FsType> {
    FS_TYPES.iter().find(|fs| fs.name == name)
}

impl FsType {
    pub fn mount_type(&self) -> &'static str {
        self.mount_type.unwrap_or(self.name)
    }
}

/// A filesystem on a device, or a pseudo filesystem.
#[derive(Clone, Debug)]
pub struct Filesystem {
    fs: &'static FsType,
    pub mountpoint: Option<PathBuf>,
    pub label: Option<String>,
    /// Where the filesystem is currently mounted.
    mounted_at: Option<PathBuf>,
    migration_target: Option<&'static str>,
    migrate: bool,
    size: Option<f64>,
    target_size: Option<f64>,
}

fn failure(kind: FormatErrorKind, device: &Path, what: &str, cause: StorageError) -> StorageError {
    StorageError::format_caused(kind, format!("{what} failed on {}", device.display()), cause)
}

impl Filesystem {
    pub fn new(fs: &'static FsType) -> Filesystem {
        Filesystem {
            fs,
            mountpoint: None,
            label: None,
            mounted_at: None,
            migration_target: fs.migration_target,
            migrate: false,
            size: None,
            target_size: None,
        }
    }

    pub fn fs_type(&self) -> &'static FsType {
        self.fs
    }

    /// The type name, accounting for a pending migration.
    pub fn type_name(&self) -> &'static str {
        match (self.migrate, self.migration_target) {
            (true, Some(target)) => target,
            _ => self.fs.name,
        }
    }

    pub fn mounted_at(&self) -> Option<&Path> {
        self.mounted_at.as_deref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted_at.is_some()
    }

    pub fn migratable(&self) -> bool {
        self.fs.migrate_tool.is_some() && self.migration_target.is_some()
    }

    /// Forbid migration of this instance even though its type supports it.
    pub(super) fn disable_migration(&mut self) {
        self.migration_target = None;
    }

    pub fn migrate_requested(&self) -> bool {
        self.migrate
    }

    pub(super) fn set_migrate(&mut self, migrate: bool) {
        self.migrate = migrate;
    }

    pub fn size(&self) -> Option<f64> {
        match (self.fs.resizable, self.target_size) {
            (true, Some(target)) => Some(target),
            _ => self.size,
        }
    }

    pub(super) fn set_size(&mut self, size: Option<f64>) {
        self.size = size;
        self.target_size = size;
    }

    pub fn target_size(&self) -> Option<f64> {
        self.target_size
    }

    pub(super) fn set_target_size(&mut self, size: f64) {
        self.target_size = Some(size);
    }

    pub(super) fn create(
        &mut self,
        host: &dyn Host,
        device: &Path,
        extra_args: &[&str],
    ) -> StorageResult<()> {
        let mkfs = match self.fs.mkfs {
            Some(mkfs) => mkfs,
            None => {
                return Err(StorageError::format(
                    FormatErrorKind::Create,
                    format!("no tool to create {} filesystems", self.fs.name),
                ))
            }
        };
        let device_str = device.to_string_lossy();
        let mut args = extra_args.to_vec();
        args.extend_from_slice(self.fs.mkfs_args);
        if let Some(label) = self.label.as_deref() {
            args.push(self.fs.mkfs_label_opt);
            args.push(label);
        }
        args.push(&device_str);
        execute(host, mkfs, &args)
            .map_err(|e| failure(FormatErrorKind::Create, device, mkfs, e))?;
        info!("Created {} filesystem on {}", self.fs.name, device.display());
        Ok(())
    }

    /// Mount at `mountpoint`, or at the configured mountpoint, under `root`.
    pub(super) fn setup(
        &mut self,
        host: &dyn Host,
        device: &Path,
        options: &str,
        root: &Path,
        mountpoint: Option<&Path>,
    ) -> StorageResult<()> {
        if self.mounted_at.is_some() {
            return Ok(());
        }
        if !self.fs.mountable {
            return Err(StorageError::format(
                FormatErrorKind::Setup,
                format!("{} filesystems can not be mounted here", self.fs.name),
            ));
        }
        let mountpoint = mountpoint
            .or(self.mountpoint.as_deref())
            .ok_or_else(|| {
                StorageError::format(
                    FormatErrorKind::Setup,
                    format!("no mountpoint given for {}", device.display()),
                )
            })?;
        if !self.fs.nodev && !self.fs.bind && !host.path_exists(device) {
            return Err(StorageError::format(
                FormatErrorKind::Setup,
                format!("device {} does not exist", device.display()),
            ));
        }
        let target = root.join(mountpoint.strip_prefix("/").unwrap_or(mountpoint));
        host.mount(&MountRequest {
            source: device,
            target: &target,
            fstype: Some(self.fs.mount_type()),
            options: Some(options),
            bind: self.fs.bind,
        })
        .map_err(|e| failure(FormatErrorKind::Setup, device, "mount", e))?;
        debug!("Mounted {} on {}", device.display(), target.display());
        self.mounted_at = Some(target);
        Ok(())
    }

    pub(super) fn teardown(&mut self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        if let Some(target) = self.mounted_at.as_deref() {
            host.umount(target)
                .map_err(|e| failure(FormatErrorKind::Teardown, device, "umount", e))?;
            debug!("Unmounted {}", target.display());
            self.mounted_at = None;
        }
        Ok(())
    }

    /// Run the filesystem checker. Exit codes below 4 mean errors were
    /// found and corrected.
    pub(super) fn check(&self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        let tool = match self.fs.check_tool {
            Some(tool) => tool,
            None => return Ok(()),
        };
        let device_str = device.to_string_lossy();
        let mut args = self.fs.check_args.to_vec();
        args.push(&device_str);
        let output = host.run(tool, &args, None)?;
        match output.status {
            Some(status) if status < 4 => Ok(()),
            status => Err(StorageError::format_caused(
                FormatErrorKind::Check,
                format!("filesystem check failed on {}", device.display()),
                StorageError::Command {
                    cmd: format!("{} {}", tool, args.join(" ")),
                    status,
                    output: output.stderr,
                },
            )),
        }
    }

    /// Resize to the target size, checking the filesystem first.
    pub(super) fn resize(&mut self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        let target = match self.target_size {
            Some(target) if Some(target) != self.size => target,
            _ => return Ok(()),
        };
        let tool = self.fs.resize_tool.ok_or_else(|| {
            StorageError::format(
                FormatErrorKind::Resize,
                format!("{} filesystems can not be resized", self.fs.name),
            )
        })?;
        self.check(host, device)?;

        let device_str = device.to_string_lossy();
        let size_arg = format!("{}M", target.floor() as u64);
        let args: Vec<&str> = match self.fs.name {
            "ntfs" => vec!["-ff", "-s", size_arg.as_str(), device_str.as_ref()],
            _ => vec!["-p", device_str.as_ref(), size_arg.as_str()],
        };
        execute(host, tool, &args).map_err(|e| failure(FormatErrorKind::Resize, device, tool, e))?;
        info!(
            "Resized {} filesystem on {} to {} MB",
            self.fs.name,
            device.display(),
            target
        );
        self.size = Some(target);
        Ok(())
    }

    pub(super) fn migrate(&mut self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        let (tool, target) = match (self.fs.migrate_tool, self.migration_target) {
            (Some(tool), Some(target)) if self.migrate => (tool, target),
            _ => return Ok(()),
        };
        let device_str = device.to_string_lossy();
        if self.fs.name == "ext2" {
            let features = execute(host, "tune2fs", &["-l", &device_str])
                .map_err(|e| failure(FormatErrorKind::Migrate, device, "tune2fs -l", e))?;
            if features.contains("has_journal") {
                info!(
                    "Skipping migration of {}, it has a journal already",
                    device.display()
                );
                return Ok(());
            }
        }
        let mut args = self.fs.migrate_args.to_vec();
        args.push(&device_str);
        execute(host, tool, &args)
            .map_err(|e| failure(FormatErrorKind::Migrate, device, tool, e))?;
        info!("Migrated {} to {}", device.display(), target);
        self.fs = fs_type(target).unwrap_or(self.fs);
        self.migration_target = self.fs.migration_target;
        self.migrate = false;
        Ok(())
    }

    pub(super) fn write_label(
        &mut self,
        host: &dyn Host,
        device: &Path,
        label: &str,
    ) -> StorageResult<()> {
        let tool = self.fs.label_tool.ok_or_else(|| {
            StorageError::format(
                FormatErrorKind::Label,
                format!("no tool to label {} filesystems", self.fs.name),
            )
        })?;
        let device_str = device.to_string_lossy();
        let mut args = self.fs.label_args.to_vec();
        // xfs_admin takes the label before the device, the others after it
        if self.fs.label_args.is_empty() {
            args.push(&device_str);
            args.push(label);
        } else {
            args.push(label);
            args.push(&device_str);
        }
        execute(host, tool, &args).map_err(|e| failure(FormatErrorKind::Label, device, tool, e))?;
        self.label = Some(label.to_string());
        Ok(())
    }

    /// The smallest size the filesystem can be shrunk to, in MB.
    pub(super) fn min_size(&self, host: &dyn Host, device: &Path, exists: bool) -> f64 {
        if !exists || !host.path_exists(device) {
            return self.fs.min_size;
        }
        let device_str = device.to_string_lossy();
        let parsed = match self.fs.name {
            "ext2" | "ext3" | "ext4" => execute(host, "resize2fs", &["-P", &device_str])
                .ok()
                .and_then(|out| parse_resize2fs_min(&out)),
            "ntfs" => execute(host, "ntfsresize", &["-m", &device_str])
                .ok()
                .and_then(|out| parse_ntfsresize_min(&out)),
            _ => return self.fs.min_size,
        };
        parsed.unwrap_or_else(|| {
            warn!(
                "Failed to get the minimum size of the {} filesystem on {}",
                self.fs.name,
                device.display()
            );
            self.fs.min_size
        })
    }
}

fn parse_resize2fs_min(output: &str) -> Option<f64> {
    output
        .lines()
        .filter(|l| l.contains("minimum size of the filesystem:"))
        .filter_map(|l| l.split_once(": "))
        .filter_map(|(_, n)| n.trim().parse::<u64>().ok())
        .last()
        .map(|n| n as f64 / 1024.0)
}

fn parse_ntfsresize_min(output: &str) -> Option<f64> {
    output
        .lines()
        .filter(|l| l.starts_with("Minsize"))
        .filter_map(|l| l.split(':').nth(1))
        .filter_map(|n| n.trim().parse::<u64>().ok())
        .last()
        .map(|n| (n + 250) as f64)
}

#[cfg(test)]
mod tests {
    use crate::engine::host::SimHost;

    use super::*;

    #[test]
    fn test_descriptor_table() {
        let ext4 = fs_type("ext4").unwrap();
        assert!(!ext4.bootable);
        assert_eq!(ext4.mkfs, Some("mke2fs"));
        assert_eq!(fs_type("ext3").unwrap().migration_target, Some("ext4"));
        assert!(!fs_type("xfs").unwrap().bootable);
        assert!(fs_type("bind").unwrap().bind);
        assert_eq!(fs_type("bind").unwrap().mount_type(), "none");
        assert!(fs_type("reiserfs").is_none());
    }

    #[test]
    fn test_min_size_parsing() {
        assert_eq!(
            parse_resize2fs_min("Estimated minimum size of the filesystem: 2048\n"),
            Some(2.0)
        );
        assert_eq!(
            parse_ntfsresize_min("ntfsresize v2\nMinsize (in MB): 1000\n"),
            Some(1250.0)
        );
        assert_eq!(parse_resize2fs_min("garbage"), None);
    }

    #[test]
    fn test_min_size_falls_back() {
        let host = SimHost::new();
        let fs = Filesystem::new(fs_type("ext3").unwrap());
        let dev = Path::new("/dev/sda1");
        assert_eq!(fs.min_size(&host, dev, true), 1.0);
        host.add_node(dev);
        host.set_output("resize2fs", "Estimated minimum size of the filesystem: 10240\n");
        assert_eq!(fs.min_size(&host, dev, true), 10.0);
    }

    #[test]
    /// A check exit code of 4 or more is an uncorrected error.
    fn test_check_exit_codes() {
        let host = SimHost::new();
        let fs = Filesystem::new(fs_type("ext4").unwrap());
        let dev = Path::new("/dev/sda1");
        host.fail_command("e2fsck", 1, "errors corrected");
        assert!(fs.check(&host, dev).is_ok());
        host.fail_command("e2fsck", 4, "errors left uncorrected");
        let err = fs.check(&host, dev).unwrap_err();
        assert_eq!(err.format_kind(), Some(FormatErrorKind::Check));
        assert_eq!(err.exit_status(), Some(4));
    }

    #[test]
    fn test_resize_checks_first() {
        let host = SimHost::new();
        let mut fs = Filesystem::new(fs_type("ext3").unwrap());
        fs.set_size(Some(1000.0));
        fs.set_target_size(2000.0);
        fs.resize(&host, Path::new("/dev/sda1")).unwrap();
        assert_eq!(
            host.commands(),
            vec![
                "e2fsck -f -p -C 0 /dev/sda1".to_string(),
                "resize2fs -p /dev/sda1 2000M".to_string()
            ]
        );
        assert_eq!(fs.size(), Some(2000.0));
    }

    #[test]
    fn test_migrate_skips_journaled_ext2() {
        let host = SimHost::new();
        let mut fs = Filesystem::new(fs_type("ext2").unwrap());
        fs.set_migrate(true);
        host.set_output("tune2fs", "Filesystem features: has_journal ext_attr\n");
        fs.migrate(&host, Path::new("/dev/sda1")).unwrap();
        assert_eq!(host.commands_for("tune2fs").len(), 1);
        assert_eq!(fs.fs_type().name, "ext2");
    }
}
