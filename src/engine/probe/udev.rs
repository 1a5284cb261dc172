// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! udev-backed block device probe

use std::{ffi::OsStr, fs, path::Path};

use log::debug;
use nix::sys::stat::{major, minor};

use crate::{
    engine::{
        host::Host,
        probe::{lvm_pv_info, BlockDeviceInfo, BlockDeviceProbe, DeviceClass},
        types::bytes_to_mb,
    },
    storage::{StorageError, StorageResult},
};

/// Make an enumerator for enumerating block devices. Return an error if there
/// was any udev-related error.
fn block_enumerator(context: &libudev::Context) -> libudev::Result<libudev::Enumerator> {
    let mut enumerator = libudev::Enumerator::new(context)?;
    enumerator.match_subsystem("block")?;
    Ok(enumerator)
}

/// Get a udev property with the given name for the given device.
/// Returns None if no udev property found for the given property name.
/// Returns an error if the value of the property can not be converted to
/// a string using the standard conversion for this OS.
fn get_udev_property<T>(device: &libudev::Device, property_name: T) -> Option<StorageResult<String>>
where
    T: AsRef<OsStr> + std::fmt::Display,
{
    device
        .property_value(&property_name)
        .map(|value| match value.to_str() {
            Some(value) => Ok(value.into()),
            None => Err(StorageError::Msg(format!(
                "Unable to convert udev property value with key {} belonging to device {} to a string",
                property_name,
                device.devnode().map_or("<unknown>".into(), |x| x.to_string_lossy().into_owned())
            ))),
        })
}

fn property(device: &libudev::Device, name: &str) -> StorageResult<Option<String>> {
    get_udev_property(device, name).transpose()
}

fn is_set(device: &libudev::Device, name: &str) -> StorageResult<bool> {
    Ok(property(device, name)?.as_deref() == Some("1"))
}

/// Names of the devices listed under the device's sysfs slaves directory.
fn slaves(syspath: &Path) -> Vec<String> {
    fs::read_dir(syspath.join("slaves"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn classify(device: &libudev::Device, name: &str) -> StorageResult<DeviceClass> {
    Ok(if name.starts_with("loop") {
        DeviceClass::Loop
    } else if name.starts_with("ram") {
        DeviceClass::Ram
    } else if property(device, "DM_NAME")?.is_some() {
        DeviceClass::DeviceMapper
    } else if name.starts_with("md") {
        DeviceClass::MdRaid
    } else if is_set(device, "ID_CDROM")? {
        DeviceClass::Optical
    } else if device.devtype() == Some(OsStr::new("partition")) {
        DeviceClass::Partition
    } else {
        DeviceClass::Disk
    })
}

/// Probes block devices through the udev database. LVM physical volume
/// metadata, which udev does not carry, is read with the lvm tools.
pub struct UdevProbe<'a> {
    host: &'a dyn Host,
}

impl<'a> UdevProbe<'a> {
    pub fn new(host: &'a dyn Host) -> UdevProbe<'a> {
        UdevProbe { host }
    }

    fn device_info(&self, device: &libudev::Device) -> StorageResult<Option<BlockDeviceInfo>> {
        let (name, syspath) = match (device.sysname(), device.syspath()) {
            (Some(name), Some(syspath)) => (name.to_string_lossy().into_owned(), syspath),
            _ => return Ok(None),
        };
        let class = classify(device, &name)?;

        // size is always given in 512 byte units
        let size = device
            .attribute_value("size")
            .and_then(|s| s.to_str())
            .map(|s| s.trim().parse::<u64>())
            .transpose()?
            .map_or(0.0, |s| bytes_to_mb(s * 512));

        let mut info = BlockDeviceInfo::new(&name, class, size);
        info.devnode = device.devnode().map(Path::to_path_buf);
        if let Some(devnum) = device.devnum() {
            info.major = major(devnum) as u32;
            info.minor = minor(devnum) as u32;
        }
        info.sysfs_path = syspath.to_string_lossy().into_owned();
        info.uuid = property(device, "ID_FS_UUID")?;
        info.label = property(device, "ID_FS_LABEL")?;
        info.format_type = property(device, "ID_FS_TYPE")?;
        info.slaves = slaves(syspath);
        info.dm_name = property(device, "DM_NAME")?;
        info.dm_vg_name = property(device, "DM_VG_NAME")?;
        info.dm_lv_name = property(device, "DM_LV_NAME")?;
        info.md_uuid = property(device, "MD_UUID")?;
        info.media_present = is_set(device, "ID_CDROM_MEDIA")?;

        match info.format_type.as_deref() {
            Some("linux_raid_member") => {
                if info.md_uuid.is_none() {
                    info.md_uuid = info.uuid.clone();
                }
            }
            Some(fmt) if fmt.ends_with("_raid_member") => {
                info.dmraid_set = info.uuid.clone().or_else(|| Some(fmt.to_string()));
            }
            Some("LVM2_member") => {
                if let Some(devnode) = info.devnode.as_deref() {
                    match lvm_pv_info(self.host, devnode) {
                        Ok(pv) => info.lvm = Some(pv),
                        Err(err) => debug!("No PV metadata for {}: {}", name, err),
                    }
                }
            }
            _ => {}
        }

        Ok(Some(info))
    }
}

impl BlockDeviceProbe for UdevProbe<'_> {
    fn block_devices(&mut self) -> StorageResult<Vec<BlockDeviceInfo>> {
        let context = libudev::Context::new()?;
        let mut enumerator = block_enumerator(&context)?;
        let mut infos = Vec::new();
        for device in enumerator.scan_devices()?.filter(|dev| dev.is_initialized()) {
            if let Some(info) = self.device_info(&device)? {
                infos.push(info);
            }
        }
        Ok(infos)
    }
}
