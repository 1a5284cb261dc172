// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use log::{debug, warn};

use crate::engine::{
    formats::{
        fs::{fs_type, Filesystem, FsType, FS_TYPES},
        luks::Luks,
        lvmpv::{DmRaidMember, LvmPv, MdMember, DEFAULT_PE_START},
        swap::SwapSpace,
        DeviceFormat, FormatArgs, FormatKind,
    },
    host::Host,
};

pub type FormatConstructor = fn(&FormatArgs) -> DeviceFormat;

#[derive(Clone, Copy)]
enum Constructor {
    Fs(&'static FsType),
    Swap,
    Luks,
    LvmPv,
    MdMember,
    DmRaidMember,
    Custom(FormatConstructor),
}

/// Type strings reported by blkid that name a registered format.
const ALIASES: &[(&str, &str)] = &[
    ("crypto_LUKS", "luks"),
    ("LVM2_member", "lvmpv"),
    ("linux_raid_member", "mdmember"),
    ("swap", "swap"),
    ("isw_raid_member", "dmraidmember"),
    ("ddf_raid_member", "dmraidmember"),
    ("nvidia_raid_member", "dmraidmember"),
    ("promise_fasttrack_raid_member", "dmraidmember"),
    ("silicon_medley_raid_member", "dmraidmember"),
    ("via_raid_member", "dmraidmember"),
    ("jmicron_raid_member", "dmraidmember"),
    ("adaptec_raid_member", "dmraidmember"),
    ("hpt37x_raid_member", "dmraidmember"),
    ("hpt45x_raid_member", "dmraidmember"),
    ("lsi_mega_raid_member", "dmraidmember"),
];

const BOOT_FILESYSTEMS: &[&str] = &["ext3", "ext2"];
const DEFAULT_FILESYSTEMS: &[&str] = &["ext4", "ext3", "ext2"];

/// Maps format type keys to constructors. Built once and handed to the
/// device tree and the allocator.
pub struct FormatRegistry {
    constructors: HashMap<String, Constructor>,
    aliases: HashMap<String, String>,
    ext4_migrate: bool,
    kernel_filesystems: Option<Vec<String>>,
}

impl Default for FormatRegistry {
    fn default() -> FormatRegistry {
        FormatRegistry::new()
    }
}

impl FormatRegistry {
    pub fn new() -> FormatRegistry {
        let mut constructors = FS_TYPES
            .iter()
            .map(|fs| (fs.name.to_string(), Constructor::Fs(fs)))
            .collect::<HashMap<_, _>>();
        constructors.insert("swap".into(), Constructor::Swap);
        constructors.insert("luks".into(), Constructor::Luks);
        constructors.insert("lvmpv".into(), Constructor::LvmPv);
        constructors.insert("mdmember".into(), Constructor::MdMember);
        constructors.insert("dmraidmember".into(), Constructor::DmRaidMember);
        FormatRegistry {
            constructors,
            aliases: ALIASES
                .iter()
                .map(|(alias, key)| (alias.to_string(), key.to_string()))
                .collect(),
            ext4_migrate: false,
            kernel_filesystems: None,
        }
    }

    /// Allow migration of ext3 filesystems to ext4.
    pub fn with_ext4_migrate(mut self, ext4_migrate: bool) -> FormatRegistry {
        self.ext4_migrate = ext4_migrate;
        self
    }

    /// Register a constructor for `key`, replacing any existing one.
    pub fn register(&mut self, key: &str, constructor: FormatConstructor) {
        debug!("Registering format type {key}");
        self.constructors
            .insert(key.to_string(), Constructor::Custom(constructor));
    }

    pub fn add_alias(&mut self, alias: &str, key: &str) {
        self.aliases.insert(alias.to_string(), key.to_string());
    }

    fn resolve<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.aliases
            .get(type_name)
            .map(|s| s.as_str())
            .unwrap_or(type_name)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(self.resolve(type_name))
    }

    /// Construct the format for `type_name`. Unrecognized or absent types
    /// yield the unknown format, never an error.
    pub fn get_format(&self, type_name: Option<&str>, args: &FormatArgs) -> DeviceFormat {
        let constructor = match type_name.and_then(|t| self.constructors.get(self.resolve(t))) {
            Some(constructor) => *constructor,
            None => {
                if let Some(t) = type_name {
                    debug!("No format registered for type {t}");
                }
                return DeviceFormat::unknown(args);
            }
        };
        match constructor {
            Constructor::Custom(f) => f(args),
            Constructor::Fs(fs) => self.filesystem(fs, args),
            Constructor::Swap => match SwapSpace::new(args.priority, args.label.clone()) {
                Ok(swap) => DeviceFormat::new(FormatKind::Swap(swap), args),
                Err(err) => {
                    warn!("Ignoring swap priority: {err}");
                    let swap = SwapSpace::new(None, args.label.clone()).unwrap_or_default();
                    DeviceFormat::new(FormatKind::Swap(swap), args)
                }
            },
            Constructor::Luks => DeviceFormat::new(
                FormatKind::Luks(Luks::new(
                    args.cipher.as_deref(),
                    args.key_size,
                    args.key.clone(),
                    args.map_name.clone(),
                )),
                args,
            ),
            Constructor::LvmPv => DeviceFormat::new(
                FormatKind::LvmPv(LvmPv {
                    vg_name: args.vg_name.clone(),
                    vg_uuid: args.vg_uuid.clone(),
                    pe_start: args.pe_start.unwrap_or(DEFAULT_PE_START),
                }),
                args,
            ),
            Constructor::MdMember => DeviceFormat::new(
                FormatKind::MdMember(MdMember {
                    md_uuid: args.md_uuid.clone(),
                }),
                args,
            ),
            Constructor::DmRaidMember => DeviceFormat::new(
                FormatKind::DmRaidMember(DmRaidMember {
                    raid_set: args.raid_set.clone(),
                }),
                args,
            ),
        }
    }

    fn filesystem(&self, fs: &'static FsType, args: &FormatArgs) -> DeviceFormat {
        let mut filesystem = Filesystem::new(fs);
        filesystem.mountpoint = args.mountpoint.clone();
        filesystem.label = args.label.clone();
        filesystem.set_size(args.size);
        if fs.name == "ext3" && !self.ext4_migrate {
            filesystem.disable_migration();
        }
        let mut format = DeviceFormat::new(FormatKind::Fs(filesystem), args);
        // Pseudo filesystems have no backing device, only their type name.
        if fs.nodev {
            format.set_device(Some(fs.name.into()));
            format.set_exists(true);
        } else if fs.bind {
            format.set_exists(true);
        }
        format
    }

    /// Read the filesystems the running kernel supports.
    pub fn load_kernel_filesystems(&mut self, host: &dyn Host) {
        match host.kernel_filesystems() {
            Ok(filesystems) => self.kernel_filesystems = Some(filesystems),
            Err(err) => warn!("Unable to read supported filesystems: {err}"),
        }
    }

    /// Whether formats of this type can be used on this system. Until the
    /// kernel's list is loaded every registered type is supported.
    pub fn is_supported(&self, type_name: &str) -> bool {
        let key = self.resolve(type_name);
        match self.constructors.get(key) {
            Some(Constructor::Fs(fs)) if !fs.bind && !fs.nodev => self
                .kernel_filesystems
                .as_ref()
                .map(|k| k.iter().any(|n| n == fs.mount_type()))
                .unwrap_or(true),
            Some(_) => true,
            None => false,
        }
    }

    /// The filesystem type new partitions get unless told otherwise.
    pub fn default_filesystem_type(&self, boot: bool) -> &'static str {
        let candidates = if boot {
            BOOT_FILESYSTEMS
        } else {
            DEFAULT_FILESYSTEMS
        };
        candidates
            .iter()
            .copied()
            .find(|name| self.is_supported(name))
            .unwrap_or("ext2")
    }

    /// Registered type keys, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types = self.constructors.keys().map(|k| k.as_str()).collect::<Vec<_>>();
        types.sort_unstable();
        types
    }

    /// The descriptor for a filesystem type key or alias.
    pub fn fs_type(&self, type_name: &str) -> Option<&'static FsType> {
        fs_type(self.resolve(type_name))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::engine::host::SimHost;

    use super::*;

    #[test]
    /// Unknown types give the unknown sentinel rather than an error.
    fn test_unknown_type() {
        let registry = FormatRegistry::new();
        let fmt = registry.get_format(Some("bogus-type"), &FormatArgs::default());
        assert!(fmt.is_unknown());
        assert_eq!(fmt.type_name(), None);
        assert!(registry
            .get_format(None, &FormatArgs::default())
            .is_unknown());
    }

    #[test]
    fn test_aliases() {
        let registry = FormatRegistry::new();
        let args = FormatArgs::default();
        assert_eq!(
            registry.get_format(Some("crypto_LUKS"), &args).type_name(),
            Some("luks")
        );
        assert_eq!(
            registry.get_format(Some("LVM2_member"), &args).type_name(),
            Some("lvmpv")
        );
        assert_eq!(
            registry.get_format(Some("isw_raid_member"), &args).type_name(),
            Some("dmraidmember")
        );
    }

    #[test]
    fn test_ext3_migration_gated() {
        let args = FormatArgs::default();
        assert!(!FormatRegistry::new()
            .get_format(Some("ext3"), &args)
            .migratable());
        assert!(FormatRegistry::new()
            .with_ext4_migrate(true)
            .get_format(Some("ext3"), &args)
            .migratable());
        assert!(FormatRegistry::new()
            .get_format(Some("ext2"), &args)
            .migratable());
    }

    #[test]
    fn test_pseudo_filesystems() {
        let registry = FormatRegistry::new();
        let proc_fs = registry.get_format(Some("proc"), &FormatArgs::default());
        assert!(proc_fs.exists());
        assert!(!proc_fs.formattable());
        assert_eq!(proc_fs.device(), Some(PathBuf::from("proc").as_path()));

        let bind = registry.get_format(
            Some("bind"),
            &FormatArgs {
                device: Some(PathBuf::from("/mnt/source/data")),
                ..Default::default()
            },
        );
        assert!(bind.exists());
        assert_eq!(bind.device(), Some(PathBuf::from("/mnt/source/data").as_path()));
    }

    #[test]
    fn test_custom_constructor() {
        fn reiserfs(args: &FormatArgs) -> DeviceFormat {
            DeviceFormat::unknown(args)
        }
        let mut registry = FormatRegistry::new();
        assert!(!registry.is_registered("reiserfs"));
        registry.register("reiserfs", reiserfs);
        assert!(registry.is_registered("reiserfs"));
        assert!(registry.types().contains(&"reiserfs"));
    }

    #[test]
    fn test_default_filesystem_type() {
        let host = SimHost::new();
        let mut registry = FormatRegistry::new();
        registry.load_kernel_filesystems(&host);
        assert_eq!(registry.default_filesystem_type(false), "ext4");
        assert_eq!(registry.default_filesystem_type(true), "ext3");
        assert!(registry.is_supported("swap"));
        assert!(!registry.is_supported("reiserfs"));
    }
}
