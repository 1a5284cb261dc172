// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume group and logical volume arithmetic and the lvm commands that
//! act on them.

use log::info;

use crate::{
    engine::{
        devices::{Device, DeviceKind, DeviceStore},
        formats::DEFAULT_PE_START,
        host::{execute, Host},
        types::DeviceId,
    },
    storage::{StorageError, StorageResult},
};

/// Default extent size of new volume groups, in MB.
pub const DEFAULT_PE_SIZE: f64 = 4.0;

/// Round `size` to a whole number of `pe_size` extents.
pub fn align_to_extents(size: f64, pe_size: f64, roundup: bool) -> f64 {
    if pe_size <= 0.0 {
        return size;
    }
    let extents = size / pe_size;
    let extents = if roundup {
        extents.ceil()
    } else {
        extents.floor()
    };
    extents * pe_size
}

/// The device-mapper name of a logical volume. Hyphens inside either name
/// are doubled so the separating hyphen stays unambiguous.
pub fn lv_device_name(vg_name: &str, lv_name: &str) -> String {
    format!("{}-{}", vg_name.replace('-', "--"), lv_name.replace('-', "--"))
}

fn lvm(host: &dyn Host, args: &[&str]) -> StorageResult<()> {
    let mut full = vec!["lvm"];
    full.extend_from_slice(args);
    execute(host, "lvm", args).map_err(|e| {
        StorageError::Chained(format!("\"{}\" failed", full.join(" ")), Box::new(e))
    })?;
    Ok(())
}

impl DeviceStore {
    fn vg(&self, vg: DeviceId) -> StorageResult<(&Device, f64, usize)> {
        let device = self.device(vg)?;
        match device.kind() {
            DeviceKind::VolumeGroup(data) => Ok((device, data.pe_size, data.pv_count)),
            _ => Err(StorageError::Lvm(format!(
                "{} is not a volume group",
                device.name()
            ))),
        }
    }

    /// Usable size of a volume group: each PV less its metadata area,
    /// rounded down to whole extents.
    pub fn vg_size(&self, vg: DeviceId) -> StorageResult<f64> {
        let (device, pe_size, _) = self.vg(vg)?;
        Ok(device
            .parents()
            .iter()
            .filter_map(|pv| self.get(*pv))
            .map(|pv| {
                let pe_start = pv
                    .format()
                    .lvmpv()
                    .map(|f| f.pe_start)
                    .unwrap_or(DEFAULT_PE_START);
                align_to_extents(pv.size() - pe_start, pe_size, false)
            })
            .sum())
    }

    /// Space not yet claimed by logical volumes, in MB.
    pub fn vg_free_space(&self, vg: DeviceId) -> StorageResult<f64> {
        self.vg_free_space_excluding(vg, None)
    }

    fn vg_free_space_excluding(&self, vg: DeviceId, exclude: Option<DeviceId>) -> StorageResult<f64> {
        let (device, pe_size, _) = self.vg(vg)?;
        let used: f64 = match device.kind() {
            DeviceKind::VolumeGroup(data) => data
                .lvs()
                .iter()
                .filter(|lv| Some(**lv) != exclude)
                .filter_map(|lv| self.get(*lv))
                .map(|lv| align_to_extents(lv.target_size(), pe_size, true))
                .sum(),
            _ => 0.0,
        };
        Ok((self.vg_size(vg)? - used).max(0.0))
    }

    pub fn vg_extents(&self, vg: DeviceId) -> StorageResult<u64> {
        let (_, pe_size, _) = self.vg(vg)?;
        Ok((self.vg_size(vg)? / pe_size).floor() as u64)
    }

    pub fn vg_free_extents(&self, vg: DeviceId) -> StorageResult<u64> {
        let (_, pe_size, _) = self.vg(vg)?;
        Ok((self.vg_free_space(vg)? / pe_size).floor() as u64)
    }

    /// Whether every physical volume the group's metadata names is present.
    pub fn vg_complete(&self, vg: DeviceId) -> StorageResult<bool> {
        let (device, _, pv_count) = self.vg(vg)?;
        Ok(device.parents().len() == pv_count)
    }

    /// Check that `lv` fits in its group at `size` MB, counting the space
    /// the LV already holds as available.
    pub(super) fn check_lv_size(&self, vg: DeviceId, lv: DeviceId, size: f64) -> StorageResult<()> {
        let available = self.vg_free_space_excluding(vg, Some(lv))?;
        if size <= 0.0 || size > available {
            return Err(StorageError::InvalidSize(format!(
                "logical volume size {size} MB exceeds the {available} MB available in {}",
                self.device(vg)?.name()
            )));
        }
        Ok(())
    }

    /// Set the size a logical volume will be resized or created at. The
    /// size is rounded down to whole extents.
    pub fn set_lv_size(&mut self, lv: DeviceId, size: f64) -> StorageResult<()> {
        let vg = {
            let device = self.device(lv)?;
            match device.kind() {
                DeviceKind::LogicalVolume(_) => device.parents()[0],
                _ => {
                    return Err(StorageError::Lvm(format!(
                        "{} is not a logical volume",
                        device.name()
                    )))
                }
            }
        };
        let (_, pe_size, _) = self.vg(vg)?;
        let size = align_to_extents(size, pe_size, false);
        self.check_lv_size(vg, lv, size)?;
        self.device_mut(lv)?.target_size = size;
        Ok(())
    }

    pub(super) fn vg_create(&self, host: &dyn Host, vg: DeviceId) -> StorageResult<()> {
        let (device, pe_size, _) = self.vg(vg)?;
        let pe = format!("{}m", pe_size);
        let pvs = device
            .parents()
            .iter()
            .filter_map(|pv| self.get(*pv))
            .map(|pv| pv.path().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let mut args = vec!["vgcreate", "-s", pe.as_str(), device.name()];
        args.extend(pvs.iter().map(|p| p.as_str()));
        lvm(host, &args)?;
        info!("Created volume group {}", device.name());
        Ok(())
    }

    pub(super) fn vg_destroy(&self, host: &dyn Host, device: &Device) -> StorageResult<()> {
        if device.parents().len()
            != device.vg_data().map(|d| d.pv_count).unwrap_or_default()
        {
            lvm(host, &["vgreduce", "--removemissing", device.name()])?;
        }
        lvm(host, &["vgremove", "-f", device.name()])
    }

    pub(super) fn vg_activate(&self, host: &dyn Host, device: &Device, on: bool) -> StorageResult<()> {
        lvm(
            host,
            &["vgchange", if on { "-ay" } else { "-an" }, device.name()],
        )
    }

    pub(super) fn lv_create(&self, host: &dyn Host, lv: DeviceId) -> StorageResult<()> {
        let device = self.device(lv)?;
        let (vg_name, lv_name) = match device.kind() {
            DeviceKind::LogicalVolume(data) => (data.vg_name.clone(), data.lv_name.clone()),
            _ => return Ok(()),
        };
        let vg = device.parents()[0];
        self.check_lv_size(vg, lv, device.target_size())?;
        let size = format!("{}m", device.target_size());
        lvm(host, &["lvcreate", "-L", &size, "-n", &lv_name, &vg_name])?;
        info!("Created logical volume {}", device.name());
        Ok(())
    }

    pub(super) fn lv_command(
        &self,
        host: &dyn Host,
        device: &Device,
        command: &str,
        extra: &[&str],
    ) -> StorageResult<()> {
        if let DeviceKind::LogicalVolume(data) = device.kind() {
            let target = format!("{}/{}", data.vg_name, data.lv_name);
            let mut args = vec![command];
            args.extend_from_slice(extra);
            args.push(&target);
            lvm(host, &args)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use crate::engine::{
        formats::{FormatArgs, FormatRegistry},
        host::SimHost,
    };

    use super::*;

    /// A store holding two 1000 MB PVs in a complete volume group.
    fn vg_store() -> (DeviceStore, DeviceId) {
        let registry = FormatRegistry::new();
        let mut store = DeviceStore::new();
        let mut pvs = Vec::new();
        for name in ["sdb", "sdc"] {
            let mut disk = Device::disk(name, None, 1000.0);
            *disk.format_mut() = registry.get_format(
                Some("lvmpv"),
                &FormatArgs {
                    device: Some(PathBuf::from(format!("/dev/{name}"))),
                    exists: true,
                    ..Default::default()
                },
            );
            pvs.push(store.add(disk).unwrap());
        }
        let vg = store
            .add(Device::volume_group("vg0", pvs, DEFAULT_PE_SIZE, 2, true))
            .unwrap();
        (store, vg)
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_to_extents(10.0, 4.0, false), 8.0);
        assert_eq!(align_to_extents(10.0, 4.0, true), 12.0);
        assert_eq!(lv_device_name("a-b", "c"), "a--b-c");
    }

    #[test]
    fn test_vg_space() {
        let (store, vg) = vg_store();
        // 1000 - 0.1875 rounds down to 996 per PV
        assert_eq!(store.vg_size(vg).unwrap(), 1992.0);
        assert_eq!(store.vg_extents(vg).unwrap(), 498);
        assert!(store.vg_complete(vg).unwrap());
    }

    #[test]
    /// An oversized LV is refused before lvm is run.
    fn test_lv_size_validated_first() {
        let host = SimHost::new();
        let (mut store, vg) = vg_store();
        let lv = store
            .add(Device::logical_volume("vg0", "big", vg, 5000.0, false))
            .unwrap();
        assert_matches!(
            store.create(&host, lv, &Default::default()),
            Err(StorageError::InvalidSize(_))
        );
        assert!(host.commands_for("lvm").is_empty());
        store.remove(lv).unwrap();

        let root = store
            .add(Device::logical_volume("vg0", "root", vg, 1000.0, false))
            .unwrap();
        assert_matches!(
            store.set_lv_size(root, 3000.0),
            Err(StorageError::InvalidSize(_))
        );
        store.set_lv_size(root, 1002.0).unwrap();
        assert_eq!(store.device(root).unwrap().target_size(), 1000.0);
    }
}
