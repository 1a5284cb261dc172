// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The content of a device: a filesystem, swap space, an encrypted volume,
//! an LVM physical volume or a RAID member. Formats are pure descriptions
//! until one of their lifecycle operations is invoked with a `Host`.

mod fs;
mod fstab;
mod luks;
mod lvmpv;
mod registry;
mod swap;

use std::path::{Path, PathBuf};

use log::{debug, info};
use uuid::Uuid;

pub use self::{
    fs::{fs_type, Filesystem, FsType},
    fstab::{Fstab, FstabEntry},
    luks::{Luks, LuksKey},
    lvmpv::{DmRaidMember, LvmPv, MdMember, DEFAULT_PE_START},
    registry::{FormatConstructor, FormatRegistry},
    swap::SwapSpace,
};

use crate::{
    engine::{
        host::{execute, Host},
        label::PartFlag,
    },
    storage::{FormatErrorKind, StorageError, StorageResult},
};

/// Mountpoints whose filesystems are reformatted unless the caller says
/// otherwise.
const FORMAT_BY_DEFAULT: &[&str] = &["/", "/boot", "/var", "/tmp", "/usr"];

/// Everything a format constructor may be given. Fields that do not apply
/// to the type being constructed are ignored.
#[derive(Clone, Debug, Default)]
pub struct FormatArgs {
    pub device: Option<PathBuf>,
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub exists: bool,
    pub options: Option<String>,
    pub mountpoint: Option<PathBuf>,
    pub size: Option<f64>,
    pub priority: Option<i32>,
    pub cipher: Option<String>,
    pub key_size: Option<u32>,
    pub key: Option<LuksKey>,
    pub map_name: Option<String>,
    pub vg_name: Option<String>,
    pub vg_uuid: Option<String>,
    pub pe_start: Option<f64>,
    pub md_uuid: Option<String>,
    pub raid_set: Option<String>,
}

#[derive(Clone, Debug)]
pub enum FormatKind {
    /// No recognized format. Returned for unknown type strings.
    Unknown,
    Fs(Filesystem),
    Swap(SwapSpace),
    Luks(Luks),
    LvmPv(LvmPv),
    MdMember(MdMember),
    DmRaidMember(DmRaidMember),
}

#[derive(Clone, Debug)]
pub struct DeviceFormat {
    device: Option<PathBuf>,
    pub uuid: Option<String>,
    exists: bool,
    options: Option<String>,
    kind: FormatKind,
}

fn format_error(kind: FormatErrorKind, msg: String) -> StorageError {
    StorageError::format(kind, msg)
}

impl DeviceFormat {
    pub fn new(kind: FormatKind, args: &FormatArgs) -> DeviceFormat {
        DeviceFormat {
            device: args.device.clone(),
            uuid: args.uuid.clone(),
            exists: args.exists,
            options: args.options.clone(),
            kind,
        }
    }

    pub fn unknown(args: &FormatArgs) -> DeviceFormat {
        DeviceFormat::new(FormatKind::Unknown, args)
    }

    pub fn kind(&self) -> &FormatKind {
        &self.kind
    }

    /// The registry key of this format, None for the unknown sentinel.
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.kind {
            FormatKind::Unknown => None,
            FormatKind::Fs(fs) => Some(fs.type_name()),
            FormatKind::Swap(_) => Some("swap"),
            FormatKind::Luks(_) => Some("luks"),
            FormatKind::LvmPv(_) => Some("lvmpv"),
            FormatKind::MdMember(_) => Some("mdmember"),
            FormatKind::DmRaidMember(_) => Some("dmraidmember"),
        }
    }

    /// A name for display.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            FormatKind::Unknown => "Unknown",
            FormatKind::Fs(fs) => fs.type_name(),
            FormatKind::Swap(_) => "swap",
            FormatKind::Luks(_) => "LUKS",
            FormatKind::LvmPv(_) => "physical volume (LVM)",
            FormatKind::MdMember(_) => "software RAID",
            FormatKind::DmRaidMember(_) => "dm-raid member device",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, FormatKind::Unknown)
    }

    pub fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }

    pub fn set_device(&mut self, device: Option<PathBuf>) {
        self.device = device;
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub(crate) fn set_exists(&mut self, exists: bool) {
        self.exists = exists;
    }

    /// Mount options, falling back to the type's defaults.
    pub fn options(&self) -> String {
        if let Some(options) = self.options.as_deref() {
            if !options.is_empty() {
                return options.to_string();
            }
        }
        match &self.kind {
            FormatKind::Fs(fs) => fs.fs_type().default_options.to_string(),
            FormatKind::Swap(swap) => swap.options(),
            _ => "defaults".to_string(),
        }
    }

    pub fn set_options(&mut self, options: Option<String>) -> StorageResult<()> {
        if let (FormatKind::Swap(swap), Some(options)) = (&mut self.kind, options.as_deref()) {
            swap.set_options(options)?;
        }
        self.options = options;
        Ok(())
    }

    pub fn fs(&self) -> Option<&Filesystem> {
        match &self.kind {
            FormatKind::Fs(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn fs_mut(&mut self) -> Option<&mut Filesystem> {
        match &mut self.kind {
            FormatKind::Fs(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn swap(&self) -> Option<&SwapSpace> {
        match &self.kind {
            FormatKind::Swap(swap) => Some(swap),
            _ => None,
        }
    }

    pub fn swap_mut(&mut self) -> Option<&mut SwapSpace> {
        match &mut self.kind {
            FormatKind::Swap(swap) => Some(swap),
            _ => None,
        }
    }

    pub fn luks(&self) -> Option<&Luks> {
        match &self.kind {
            FormatKind::Luks(luks) => Some(luks),
            _ => None,
        }
    }

    pub fn luks_mut(&mut self) -> Option<&mut Luks> {
        match &mut self.kind {
            FormatKind::Luks(luks) => Some(luks),
            _ => None,
        }
    }

    pub fn lvmpv(&self) -> Option<&LvmPv> {
        match &self.kind {
            FormatKind::LvmPv(pv) => Some(pv),
            _ => None,
        }
    }

    pub fn lvmpv_mut(&mut self) -> Option<&mut LvmPv> {
        match &mut self.kind {
            FormatKind::LvmPv(pv) => Some(pv),
            _ => None,
        }
    }

    pub fn md_member(&self) -> Option<&MdMember> {
        match &self.kind {
            FormatKind::MdMember(md) => Some(md),
            _ => None,
        }
    }

    pub fn dmraid_member(&self) -> Option<&DmRaidMember> {
        match &self.kind {
            FormatKind::DmRaidMember(member) => Some(member),
            _ => None,
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self.kind, FormatKind::Swap(_))
    }

    pub fn mountpoint(&self) -> Option<&Path> {
        self.fs().and_then(|fs| fs.mountpoint.as_deref())
    }

    pub fn set_mountpoint(&mut self, mountpoint: Option<PathBuf>) {
        if let Some(fs) = self.fs_mut() {
            fs.mountpoint = mountpoint;
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            FormatKind::Fs(fs) => fs.label.as_deref(),
            FormatKind::Swap(swap) => swap.label.as_deref(),
            _ => None,
        }
    }

    pub fn formattable(&self) -> bool {
        match &self.kind {
            FormatKind::Fs(fs) => fs.fs_type().formattable,
            FormatKind::Swap(_) | FormatKind::Luks(_) | FormatKind::LvmPv(_) => true,
            FormatKind::Unknown | FormatKind::MdMember(_) | FormatKind::DmRaidMember(_) => false,
        }
    }

    pub fn resizable(&self) -> bool {
        self.fs().map(|fs| fs.fs_type().resizable).unwrap_or(false)
    }

    pub fn bootable(&self) -> bool {
        self.fs().map(|fs| fs.fs_type().bootable).unwrap_or(false)
    }

    pub fn migratable(&self) -> bool {
        self.fs().map(|fs| fs.migratable()).unwrap_or(false)
    }

    pub fn linux_native(&self) -> bool {
        match &self.kind {
            FormatKind::Fs(fs) => fs.fs_type().linux_native,
            FormatKind::Swap(_) | FormatKind::LvmPv(_) | FormatKind::MdMember(_) => true,
            _ => false,
        }
    }

    pub fn mountable(&self) -> bool {
        self.fs().map(|fs| fs.fs_type().mountable).unwrap_or(false)
    }

    pub fn destroyable(&self) -> bool {
        !matches!(self.kind, FormatKind::DmRaidMember(_))
    }

    /// Whether the format has a filesystem checker and is checked at boot.
    pub fn checkable(&self) -> bool {
        self.fs().map(|fs| fs.fs_type().check).unwrap_or(false)
    }

    pub fn dump(&self) -> bool {
        self.fs().map(|fs| fs.fs_type().dump).unwrap_or(false)
    }

    /// The largest device this format can occupy, in MB.
    pub fn max_size(&self) -> Option<f64> {
        self.fs().and_then(|fs| fs.fs_type().max_size)
    }

    /// The smallest size this format can be shrunk to, in MB.
    pub fn min_size(&self, host: &dyn Host) -> f64 {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Fs(fs), Some(device)) => fs.min_size(host, device, self.exists),
            (FormatKind::Fs(fs), None) => fs.fs_type().min_size,
            _ => 0.0,
        }
    }

    pub fn size(&self) -> Option<f64> {
        self.fs().and_then(|fs| fs.size())
    }

    /// The flag a partition holding this format carries.
    pub fn partition_flag(&self) -> Option<PartFlag> {
        match &self.kind {
            FormatKind::LvmPv(_) => Some(PartFlag::Lvm),
            FormatKind::MdMember(_) => Some(PartFlag::Raid),
            _ => None,
        }
    }

    /// The device node of the set up LUKS mapping.
    pub fn luks_map_name(&self) -> Option<String> {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Luks(luks), Some(device)) => {
                Some(luks.map_name(self.uuid.as_deref(), device))
            }
            _ => None,
        }
    }

    /// Whether the format is mounted, swapped on or opened.
    pub fn status(&self, host: &dyn Host) -> bool {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Fs(fs), _) => fs.is_mounted(),
            (FormatKind::Swap(_), Some(device)) => SwapSpace::status(host, device),
            (FormatKind::Luks(_), Some(_)) => self
                .luks_map_name()
                .map(|name| Luks::status(host, &name))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn existing_device(&self, host: &dyn Host, kind: FormatErrorKind) -> StorageResult<PathBuf> {
        match self.device.as_deref() {
            Some(device) if host.path_exists(device) => Ok(device.to_path_buf()),
            Some(device) => Err(format_error(
                kind,
                format!("device {} does not exist", device.display()),
            )),
            None => Err(format_error(
                kind,
                format!("no device given for the {} format", self.name()),
            )),
        }
    }

    /// Write the format to its device.
    pub fn create(&mut self, host: &dyn Host) -> StorageResult<()> {
        if self.exists {
            return Err(format_error(
                FormatErrorKind::Create,
                format!("{} format already exists", self.name()),
            ));
        }
        if !self.formattable() {
            return Err(format_error(
                FormatErrorKind::Create,
                format!("{} formats can not be created", self.name()),
            ));
        }
        let device = self.existing_device(host, FormatErrorKind::Create)?;
        match &mut self.kind {
            FormatKind::Fs(fs) => fs.create(host, &device, &[])?,
            FormatKind::Swap(swap) => swap.create(host, &device)?,
            FormatKind::Luks(luks) => {
                let uuid = Uuid::new_v4();
                luks.create(host, &device, &uuid)?;
                self.uuid = Some(uuid.to_string());
            }
            FormatKind::LvmPv(_) => LvmPv::create(host, &device)?,
            FormatKind::Unknown | FormatKind::MdMember(_) | FormatKind::DmRaidMember(_) => {}
        }
        self.exists = true;
        Ok(())
    }

    /// Erase the format from its device. The format must not be active.
    pub fn destroy(&mut self, host: &dyn Host) -> StorageResult<()> {
        if !self.exists {
            return Err(format_error(
                FormatErrorKind::Destroy,
                format!("{} format has not been created", self.name()),
            ));
        }
        if !self.destroyable() {
            return Err(format_error(
                FormatErrorKind::Destroy,
                format!("{} formats can not be destroyed", self.name()),
            ));
        }
        if self.status(host) {
            return Err(format_error(
                FormatErrorKind::Destroy,
                format!("{} format is active", self.name()),
            ));
        }
        let device = self.existing_device(host, FormatErrorKind::Destroy)?;
        match &self.kind {
            FormatKind::LvmPv(_) => LvmPv::destroy(host, &device)?,
            FormatKind::MdMember(_) => MdMember::destroy(host, &device)?,
            _ => {
                execute(host, "wipefs", &["-a", &device.to_string_lossy()]).map_err(|e| {
                    StorageError::format_caused(
                        FormatErrorKind::Destroy,
                        format!("wipefs failed on {}", device.display()),
                        e,
                    )
                })?;
            }
        }
        info!("Destroyed {} format on {}", self.name(), device.display());
        self.exists = false;
        Ok(())
    }

    /// Activate the format: mount it under `root`, turn swap on or open the
    /// encrypted volume. A no-op if already active.
    pub fn setup(
        &mut self,
        host: &dyn Host,
        root: &Path,
        mountpoint: Option<&Path>,
    ) -> StorageResult<()> {
        if !self.exists {
            return Err(format_error(
                FormatErrorKind::Setup,
                format!("{} format has not been created", self.name()),
            ));
        }
        let options = self.options();
        let name = self.name();
        let device = self.device.clone().ok_or_else(|| {
            format_error(
                FormatErrorKind::Setup,
                format!("no device given for the {name} format"),
            )
        })?;
        match &mut self.kind {
            FormatKind::Fs(fs) => fs.setup(host, &device, &options, root, mountpoint),
            FormatKind::Swap(swap) => swap.setup(host, &device),
            FormatKind::Luks(luks) => {
                let map_name = luks.map_name(self.uuid.as_deref(), &device);
                luks.setup(host, &device, &map_name)
            }
            _ => {
                debug!("Nothing to set up for {} on {}", name, device.display());
                Ok(())
            }
        }
    }

    /// Deactivate the format. A no-op if not active.
    pub fn teardown(&mut self, host: &dyn Host) -> StorageResult<()> {
        let device = match self.device.clone() {
            Some(device) => device,
            None => return Ok(()),
        };
        let map_name = self.luks_map_name();
        match &mut self.kind {
            FormatKind::Fs(fs) => fs.teardown(host, &device),
            FormatKind::Swap(swap) => swap.teardown(host, &device),
            FormatKind::Luks(_) => match map_name {
                Some(map_name) => Luks::teardown(host, &device, &map_name),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Resize the filesystem to `new_size` MB.
    pub fn resize(&mut self, host: &dyn Host, new_size: f64) -> StorageResult<()> {
        if !self.exists {
            return Err(format_error(
                FormatErrorKind::Resize,
                format!("{} format has not been created", self.name()),
            ));
        }
        if !self.resizable() {
            return Err(format_error(
                FormatErrorKind::Resize,
                format!("{} formats can not be resized", self.name()),
            ));
        }
        let min = self.min_size(host);
        let max = self.max_size();
        if new_size < min || max.map(|max| new_size > max).unwrap_or(false) {
            return Err(StorageError::InvalidSize(format!(
                "{new_size} MB is outside the range {min} MB to {} MB for {}",
                max.map(|m| m.to_string())
                    .unwrap_or_else(|| "unlimited".to_string()),
                self.name()
            )));
        }
        let device = self.existing_device(host, FormatErrorKind::Resize)?;
        match &mut self.kind {
            FormatKind::Fs(fs) => {
                fs.set_target_size(new_size);
                fs.resize(host, &device)
            }
            _ => Ok(()),
        }
    }

    /// Request migration to the type's migration target. Migration and
    /// reformatting are exclusive, so this only applies to existing formats.
    pub fn set_migrate(&mut self, migrate: bool) -> StorageResult<()> {
        if migrate && !self.migratable() {
            return Err(format_error(
                FormatErrorKind::Migrate,
                format!("{} formats can not be migrated", self.name()),
            ));
        }
        if let Some(fs) = self.fs_mut() {
            fs.set_migrate(migrate);
        }
        Ok(())
    }

    pub fn migrate(&mut self, host: &dyn Host) -> StorageResult<()> {
        if !self.exists {
            return Err(format_error(
                FormatErrorKind::Migrate,
                format!("{} format has not been created", self.name()),
            ));
        }
        let device = self.existing_device(host, FormatErrorKind::Migrate)?;
        match &mut self.kind {
            FormatKind::Fs(fs) => fs.migrate(host, &device),
            _ => Ok(()),
        }
    }

    pub fn write_label(&mut self, host: &dyn Host, label: &str) -> StorageResult<()> {
        if !self.exists {
            return Err(format_error(
                FormatErrorKind::Label,
                format!("{} format has not been created", self.name()),
            ));
        }
        let device = self.existing_device(host, FormatErrorKind::Label)?;
        match &mut self.kind {
            FormatKind::Fs(fs) => fs.write_label(host, &device, label),
            _ => Err(format_error(
                FormatErrorKind::Label,
                format!("{} formats can not be labeled", self.name()),
            )),
        }
    }

    pub fn check(&self, host: &dyn Host) -> StorageResult<()> {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Fs(fs), Some(device)) if self.exists => fs.check(host, device),
            _ => Ok(()),
        }
    }

    pub fn add_passphrase(&self, host: &dyn Host, passphrase: &str) -> StorageResult<()> {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Luks(luks), Some(device)) if self.exists => {
                luks.add_passphrase(host, device, passphrase)
            }
            _ => Err(format_error(
                FormatErrorKind::Luks,
                "passphrases can only be added to existing LUKS volumes".to_string(),
            )),
        }
    }

    pub fn remove_passphrase(&self, host: &dyn Host, passphrase: &str) -> StorageResult<()> {
        match (&self.kind, self.device.as_deref()) {
            (FormatKind::Luks(_), Some(device)) if self.exists => {
                Luks::remove_passphrase(host, device, passphrase)
            }
            _ => Err(format_error(
                FormatErrorKind::Luks,
                "passphrases can only be removed from existing LUKS volumes".to_string(),
            )),
        }
    }
}

/// Whether a format placed at `mountpoint` is reformatted unless the caller
/// asks otherwise: swap always, linux native filesystems on system
/// directories that do not live under /home.
pub fn format_by_default(mountpoint: Option<&Path>, format: &DeviceFormat) -> bool {
    if format.is_swap() {
        return true;
    }
    if !format.linux_native() || !format.mountable() || !format.formattable() {
        return false;
    }
    let mountpoint = match mountpoint.and_then(|m| m.to_str()) {
        Some(m) => m,
        None => return false,
    };
    if mountpoint == "/home" || mountpoint.starts_with("/home/") {
        return false;
    }
    FORMAT_BY_DEFAULT.iter().any(|m| {
        mountpoint == *m || (*m != "/" && mountpoint.starts_with(&format!("{m}/")))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use crate::engine::host::{LinuxHost, SimHost};

    use super::*;

    fn ext4(device: &str, exists: bool) -> DeviceFormat {
        let registry = FormatRegistry::new();
        registry.get_format(
            Some("ext4"),
            &FormatArgs {
                device: Some(PathBuf::from(device)),
                exists,
                ..Default::default()
            },
        )
    }

    #[test]
    /// Creation fails when the device node is missing or the format is
    /// already on disk.
    fn test_create_preconditions() {
        let host = SimHost::new();
        let mut fmt = ext4("/dev/sda1", false);
        let err = fmt.create(&host).unwrap_err();
        assert_eq!(err.format_kind(), Some(FormatErrorKind::Create));
        assert!(host.commands().is_empty());

        host.add_node("/dev/sda1");
        fmt.create(&host).unwrap();
        assert!(fmt.exists());
        assert_eq!(host.commands(), vec!["mke2fs -t ext4 /dev/sda1"]);
        assert_eq!(
            fmt.create(&host).unwrap_err().format_kind(),
            Some(FormatErrorKind::Create)
        );
    }

    #[test]
    fn test_setup_is_idempotent() {
        let host = SimHost::new();
        host.add_node("/dev/sda1");
        let mut fmt = ext4("/dev/sda1", true);
        fmt.set_mountpoint(Some(PathBuf::from("/boot")));
        fmt.setup(&host, Path::new("/mnt/sysimage"), None).unwrap();
        fmt.setup(&host, Path::new("/mnt/sysimage"), None).unwrap();
        assert!(fmt.status(&host));
        assert_eq!(
            host.mounted_at(Path::new("/mnt/sysimage/boot")),
            Some(PathBuf::from("/dev/sda1"))
        );
        fmt.teardown(&host).unwrap();
        fmt.teardown(&host).unwrap();
        assert!(!fmt.status(&host));
    }

    #[test]
    /// An active format must be torn down before it is destroyed.
    fn test_destroy_requires_inactive() {
        let host = SimHost::new();
        host.add_node("/dev/sda1");
        let mut fmt = ext4("/dev/sda1", true);
        fmt.set_mountpoint(Some(PathBuf::from("/")));
        fmt.setup(&host, Path::new("/mnt"), None).unwrap();
        assert_eq!(
            fmt.destroy(&host).unwrap_err().format_kind(),
            Some(FormatErrorKind::Destroy)
        );
        fmt.teardown(&host).unwrap();
        fmt.destroy(&host).unwrap();
        assert!(!fmt.exists());
        assert_eq!(host.commands_for("wipefs"), vec!["wipefs -a /dev/sda1"]);
    }

    #[test]
    fn test_resize_bounds() {
        let host = SimHost::new();
        host.add_node("/dev/sda1");
        let mut fmt = ext4("/dev/sda1", true);
        assert_matches!(
            fmt.resize(&host, 0.5),
            Err(StorageError::InvalidSize(_))
        );
        assert_matches!(
            fmt.resize(&host, 1e12),
            Err(StorageError::InvalidSize(_))
        );
        fmt.resize(&host, 2048.0).unwrap();
        assert_eq!(fmt.size(), Some(2048.0));

        let mut xfs = FormatRegistry::new().get_format(
            Some("xfs"),
            &FormatArgs {
                device: Some(PathBuf::from("/dev/sda1")),
                exists: true,
                ..Default::default()
            },
        );
        assert_eq!(
            xfs.resize(&host, 2048.0).unwrap_err().format_kind(),
            Some(FormatErrorKind::Resize)
        );
    }

    #[test]
    fn test_partition_flags() {
        let registry = FormatRegistry::new();
        let args = FormatArgs::default();
        assert_eq!(
            registry.get_format(Some("lvmpv"), &args).partition_flag(),
            Some(PartFlag::Lvm)
        );
        assert_eq!(
            registry.get_format(Some("mdmember"), &args).partition_flag(),
            Some(PartFlag::Raid)
        );
        assert_eq!(registry.get_format(Some("ext3"), &args).partition_flag(), None);
    }

    #[test]
    fn test_format_by_default() {
        let registry = FormatRegistry::new();
        let args = FormatArgs::default();
        let ext3 = registry.get_format(Some("ext3"), &args);
        let vfat = registry.get_format(Some("vfat"), &args);
        let swap = registry.get_format(Some("swap"), &args);
        assert!(format_by_default(Some(Path::new("/")), &ext3));
        assert!(format_by_default(Some(Path::new("/usr/local")), &ext3));
        assert!(!format_by_default(Some(Path::new("/home")), &ext3));
        assert!(!format_by_default(Some(Path::new("/srv")), &ext3));
        assert!(!format_by_default(Some(Path::new("/boot")), &vfat));
        assert!(format_by_default(None, &swap));
    }

    #[test]
    fn test_luks_passphrase_handling() {
        let host = SimHost::new();
        host.add_node("/dev/sda3");
        let registry = FormatRegistry::new();
        let mut luks = registry.get_format(
            Some("luks"),
            &FormatArgs {
                device: Some(PathBuf::from("/dev/sda3")),
                key: Some(LuksKey::Passphrase("old".into())),
                ..Default::default()
            },
        );
        assert!(luks.add_passphrase(&host, "new").is_err());
        luks.create(&host).unwrap();
        let uuid = luks.uuid.clone().unwrap();
        assert!(Uuid::parse_str(&uuid).is_ok());
        assert_eq!(luks.luks_map_name(), Some(format!("luks-{uuid}")));
        luks.add_passphrase(&host, "new").unwrap();
        luks.remove_passphrase(&host, "old").unwrap();
        luks.setup(&host, Path::new("/"), None).unwrap();
        assert!(luks.status(&host));
        assert!(luks.destroy(&host).is_err());
    }

    #[test]
    /// The swap signature check reads the real device head.
    fn test_old_swap_on_file() {
        let host = LinuxHost::new();
        let page_size = host.page_size();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut page = vec![0u8; page_size];
        page[page_size - 10..].copy_from_slice(b"SWAP-SPACE");
        file.write_all(&page).unwrap();
        file.flush().unwrap();

        let mut swap = FormatRegistry::new().get_format(
            Some("swap"),
            &FormatArgs {
                device: Some(file.path().to_path_buf()),
                exists: true,
                ..Default::default()
            },
        );
        assert_matches!(
            swap.setup(&host, Path::new("/"), None),
            Err(StorageError::OldSwap(_))
        );
    }
}
