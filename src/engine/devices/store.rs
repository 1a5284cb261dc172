// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::HashSet, path::Path};

use log::{debug, info};

use crate::{
    engine::{
        devices::{CommitSettings, Device, DeviceKind, Resizable},
        formats::DeviceFormat,
        host::{execute, Host},
        label::partition_device_name,
        types::{mb_to_sectors, DeviceId, Sectors},
    },
    storage::{StorageError, StorageResult},
};

/// Every device, indexed by `DeviceId`. Parent edges are ids, and a device
/// can only be added once all of its parents are present, so the graph is
/// acyclic by construction. Ids are never reused: removing a device leaves
/// an empty slot, so the store only grows over the life of a tree.
#[derive(Clone, Debug, Default)]
pub struct DeviceStore {
    slots: Vec<Option<Device>>,
}

fn device_error(device: &Device, msg: &str) -> StorageError {
    StorageError::Device(format!("{}: {}", device.name(), msg))
}

impl DeviceStore {
    pub fn new() -> DeviceStore {
        DeviceStore { slots: Vec::new() }
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.slots.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.slots.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub fn device(&self, id: DeviceId) -> StorageResult<&Device> {
        self.get(id)
            .ok_or_else(|| StorageError::DeviceTree(format!("no device {id} in the tree")))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> StorageResult<&mut Device> {
        self.get_mut(id)
            .ok_or_else(|| StorageError::DeviceTree(format!("no device {id} in the tree")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|d| (DeviceId::new(i), d)))
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<DeviceId> {
        self.iter().find(|(_, d)| d.name() == name).map(|(id, _)| id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<DeviceId> {
        self.iter().find(|(_, d)| d.path() == path).map(|(id, _)| id)
    }

    /// Add a device whose parents are all present already.
    pub fn add(&mut self, device: Device) -> StorageResult<DeviceId> {
        if let Some(missing) = device.parents.iter().find(|p| !self.contains(**p)) {
            return Err(StorageError::DeviceTree(format!(
                "parent {} of {} is not in the tree",
                missing,
                device.name()
            )));
        }
        let path = device.path();
        if let Some(existing) = self.find_by_path(&path) {
            return Err(StorageError::DeviceTree(format!(
                "{} duplicates the path {} of device {}",
                device.name(),
                path.display(),
                existing
            )));
        }

        let id = DeviceId::new(self.slots.len());
        for parent in device.parents.clone() {
            let parent = self.device_mut(parent)?;
            parent.kids += 1;
            if let DeviceKind::VolumeGroup(vg) = &mut parent.kind {
                vg.lvs.push(id);
            }
        }
        info!("Added {} {} to the device tree", device.type_name(), device.name());
        self.slots.push(Some(device));
        Ok(id)
    }

    /// Add `parent` to the parents of `child`, e.g. a newly seen member of
    /// an existing volume group.
    pub fn add_parent(&mut self, child: DeviceId, parent: DeviceId) -> StorageResult<()> {
        if child == parent || self.depends_on(parent, child) {
            return Err(StorageError::DeviceTree(format!(
                "making {parent} a parent of {child} would create a cycle"
            )));
        }
        if self.device(child)?.parents.contains(&parent) {
            return Ok(());
        }
        self.device_mut(parent)?.kids += 1;
        self.device_mut(child)?.parents.push(parent);
        Ok(())
    }

    /// Remove a leaf device.
    pub fn remove(&mut self, id: DeviceId) -> StorageResult<Device> {
        let device = self.device(id)?;
        if !device.is_leaf() || !self.dependents(id).is_empty() {
            return Err(device_error(device, "cannot remove a device others depend on"));
        }
        let device = self
            .slots
            .get_mut(id.index())
            .and_then(|slot| slot.take())
            .ok_or_else(|| StorageError::DeviceTree(format!("no device {id} in the tree")))?;
        for parent in &device.parents {
            if let Some(parent) = self.get_mut(*parent) {
                parent.kids = parent.kids.saturating_sub(1);
                if let DeviceKind::VolumeGroup(vg) = &mut parent.kind {
                    vg.lvs.retain(|lv| *lv != id);
                }
            }
        }
        info!("Removed {} {} from the device tree", device.type_name(), device.name());
        Ok(device)
    }

    /// The extended partition on the disk of a logical partition.
    pub fn extended_of(&self, id: DeviceId) -> Option<DeviceId> {
        let device = self.get(id)?;
        if !device.is_logical() {
            return None;
        }
        let disk = *device.parents.first()?;
        self.iter()
            .find(|(_, d)| d.is_extended() && d.parents.first() == Some(&disk))
            .map(|(id, _)| id)
    }

    /// Parents plus, for a logical partition, the extended partition that
    /// contains it.
    fn effective_parents(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut parents = self.get(id).map(|d| d.parents.clone()).unwrap_or_default();
        if let Some(extended) = self.extended_of(id) {
            parents.push(extended);
        }
        parents
    }

    /// Whether `id` is built on `other`, directly or transitively.
    pub fn depends_on(&self, id: DeviceId, other: DeviceId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = self.effective_parents(id);
        while let Some(parent) = stack.pop() {
            if parent == other {
                return true;
            }
            if seen.insert(parent) {
                stack.extend(self.effective_parents(parent));
            }
        }
        false
    }

    fn depth(&self, id: DeviceId) -> usize {
        self.effective_parents(id)
            .into_iter()
            .map(|p| self.depth(p) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Every device built on `id`, leaves first.
    pub fn dependents(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut dependents = self
            .ids()
            .into_iter()
            .filter(|d| *d != id && self.depends_on(*d, id))
            .collect::<Vec<_>>();
        dependents.sort_by_key(|d| (std::cmp::Reverse(self.depth(*d)), *d));
        dependents
    }

    /// Whether the device is active.
    pub fn status(&self, host: &dyn Host, id: DeviceId) -> bool {
        let device = match self.get(id) {
            Some(device) => device,
            None => return false,
        };
        match &device.kind {
            DeviceKind::VolumeGroup(vg) => {
                vg.active && self.vg_complete(id).unwrap_or(false)
            }
            _ => device.exists && host.path_exists(&device.path()),
        }
    }

    /// Activate a device, its parents first. A no-op if already active.
    pub fn setup(&mut self, host: &dyn Host, id: DeviceId) -> StorageResult<()> {
        let device = self.device(id)?;
        if !device.exists {
            return Err(device_error(device, "device has not been created"));
        }
        if matches!(device.kind, DeviceKind::VolumeGroup(_)) && !self.vg_complete(id)? {
            return Err(device_error(
                device,
                "volume group is missing physical volumes",
            ));
        }
        if self.status(host, id) {
            return Ok(());
        }
        for parent in device.parents.clone() {
            self.setup(host, parent)?;
        }

        let device = self.device(id)?.clone();
        match &device.kind {
            DeviceKind::Loopback { backing_file } => {
                execute(
                    host,
                    "losetup",
                    &[&device.path().to_string_lossy(), &backing_file.to_string_lossy()],
                )?;
            }
            DeviceKind::VolumeGroup(_) => {
                self.vg_activate(host, &device, true)?;
                if let DeviceKind::VolumeGroup(vg) = &mut self.device_mut(id)?.kind {
                    vg.active = true;
                }
            }
            DeviceKind::LogicalVolume(_) => self.lv_command(host, &device, "lvchange", &["-ay"])?,
            _ => {}
        }
        debug!("Set up {}", device.name());
        Ok(())
    }

    /// Deactivate a device and its format, then with `recursive` its
    /// parents. Tearing down a device that was never created is an error
    /// unless `recursive` is set.
    pub fn teardown(&mut self, host: &dyn Host, id: DeviceId, recursive: bool) -> StorageResult<()> {
        let device = self.device(id)?;
        if !device.exists && !recursive {
            return Err(device_error(device, "device has not been created"));
        }

        if device.exists {
            if device.format.status(host) {
                self.device_mut(id)?.format.teardown(host)?;
            }
            if self.status(host, id) {
                let device = self.device(id)?.clone();
                match &device.kind {
                    DeviceKind::Loopback { .. } => {
                        execute(host, "losetup", &["-d", &device.path().to_string_lossy()])?;
                    }
                    DeviceKind::VolumeGroup(_) => {
                        self.vg_activate(host, &device, false)?;
                        if let DeviceKind::VolumeGroup(vg) = &mut self.device_mut(id)?.kind {
                            vg.active = false;
                        }
                    }
                    DeviceKind::LogicalVolume(_) => {
                        self.lv_command(host, &device, "lvchange", &["-an"])?
                    }
                    _ => {}
                }
            }
        }

        if recursive {
            for parent in self.device(id)?.parents.clone() {
                self.teardown(host, parent, true)?;
            }
        }
        Ok(())
    }

    /// Eject the media of an optical drive, unmounting it first.
    pub fn eject(&mut self, host: &dyn Host, id: DeviceId) -> StorageResult<()> {
        let device = self.device(id)?;
        if !matches!(device.kind, DeviceKind::Optical { .. }) {
            return Err(device_error(device, "only optical drives can be ejected"));
        }
        if !device.media_present() {
            return Ok(());
        }
        self.teardown(host, id, false)?;
        let path = self.device(id)?.path();
        execute(host, "eject", &[&path.to_string_lossy()])?;
        if let DeviceKind::Optical { media_present } = &mut self.device_mut(id)?.kind {
            *media_present = false;
        }
        info!("Ejected {}", path.display());
        Ok(())
    }

    /// Create a device on disk: create and activate its parents, then
    /// create and activate the device itself.
    pub fn create(
        &mut self,
        host: &dyn Host,
        id: DeviceId,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        let device = self.device(id)?;
        if device.exists {
            return Err(device_error(device, "device already exists"));
        }
        for parent in device.parents.clone() {
            if !self.device(parent)?.exists {
                self.create(host, parent, settings)?;
            }
            self.setup(host, parent)?;
        }

        let device = self.device(id)?.clone();
        match &device.kind {
            DeviceKind::Partition(_) => self.create_partition(host, id, settings)?,
            DeviceKind::VolumeGroup(_) => self.vg_create(host, id)?,
            DeviceKind::LogicalVolume(_) => self.lv_create(host, id)?,
            DeviceKind::SwapFile { path } => {
                let count = format!("count={}", device.target_size.floor() as u64);
                let of = format!("of={}", path.display());
                execute(host, "dd", &["if=/dev/zero", &of, "bs=1M", &count])?;
            }
            DeviceKind::DeviceMapper { .. } => {
                // mappings appear when the format below them is opened
                for parent in device.parents.clone() {
                    let parent = self.device_mut(parent)?;
                    if parent.format.luks().is_some() {
                        parent.format.setup(host, Path::new("/"), None)?;
                    }
                }
            }
            DeviceKind::Loopback { .. } | DeviceKind::BindMount { .. } => {}
            DeviceKind::Disk(_) | DeviceKind::Optical { .. } | DeviceKind::Storage { .. } => {
                return Err(device_error(
                    &device,
                    &format!("{} devices can not be created", device.type_name()),
                ))
            }
        }

        let device = self.device_mut(id)?;
        device.exists = true;
        device.size = device.target_size;
        let path = device.path();
        device.format.set_device(Some(path));
        info!("Created {} {}", device.type_name(), device.name());
        self.setup(host, id)
    }

    /// Commit the label holding a placed partition, then pick up the number
    /// the label gave it.
    fn create_partition(
        &mut self,
        host: &dyn Host,
        id: DeviceId,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        let device = self.device(id)?;
        let part_id = device
            .partition_data()
            .and_then(|p| p.part_id)
            .ok_or_else(|| device_error(device, "partition has not been allocated"))?;
        let disk_id = device.parents[0];

        let disk = self.device_mut(disk_id)?;
        let disk_name = disk.name().to_string();
        let label = match &mut disk.kind {
            DeviceKind::Disk(data) => data.label.as_mut(),
            _ => None,
        }
        .ok_or_else(|| StorageError::Device(format!("{disk_name} has no partition table")))?;
        let (number, length, is_new) = label
            .partition(part_id)
            .map(|p| (p.number, p.length(), p.is_new))
            .ok_or_else(|| {
                StorageError::Device(format!("{disk_name} has no partition {part_id}"))
            })?;
        if is_new {
            label.commit(host, settings.attempts, settings.settle_timeout)?;
        }
        let size = label.geometry().to_mb(length);

        let device = self.device_mut(id)?;
        device.target_size = size;
        if let DeviceKind::Partition(part) = &mut device.kind {
            part.number = number;
        }
        device.set_name(&partition_device_name(&disk_name, number));
        Ok(())
    }

    /// Remove a device from disk. Only existing leaves can be destroyed.
    pub fn destroy(
        &mut self,
        host: &dyn Host,
        id: DeviceId,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        let device = self.device(id)?;
        if !device.exists {
            return Err(device_error(device, "device has not been created"));
        }
        if !device.is_leaf() || !self.dependents(id).is_empty() {
            return Err(device_error(device, "cannot destroy a non-leaf device"));
        }
        self.teardown(host, id, false)?;
        let mut device = self.device(id)?.clone();
        self.destroy_detached(host, &mut device, settings)?;
        self.device_mut(id)?.exists = false;
        Ok(())
    }

    /// Destroy a device that has already been taken out of the store. Its
    /// parents, e.g. the disk of a partition, must still be present.
    pub fn destroy_detached(
        &mut self,
        host: &dyn Host,
        device: &mut Device,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        if !device.exists {
            return Err(device_error(device, "device has not been created"));
        }
        match &device.kind {
            DeviceKind::Partition(part) => {
                let disk_id = device.parents[0];
                let disk = self.device_mut(disk_id)?;
                if let DeviceKind::Disk(data) = &mut disk.kind {
                    if let Some(label) = data.label.as_mut() {
                        if let Some(part_id) = part.part_id {
                            if label.partition(part_id).is_some() {
                                label.delete_partition(part_id)?;
                            }
                        }
                        label.commit(host, settings.attempts, settings.settle_timeout)?;
                    }
                }
            }
            DeviceKind::VolumeGroup(_) => self.vg_destroy(host, device)?,
            DeviceKind::LogicalVolume(_) => self.lv_command(host, device, "lvremove", &["-f"])?,
            DeviceKind::Loopback { .. } | DeviceKind::BindMount { .. } => {}
            DeviceKind::SwapFile { path } => {
                execute(host, "rm", &["-f", &path.to_string_lossy()])?;
            }
            _ => {
                return Err(device_error(
                    device,
                    &format!("{} devices can not be destroyed", device.type_name()),
                ))
            }
        }
        device.exists = false;
        info!("Destroyed {} {}", device.type_name(), device.name());
        Ok(())
    }

    /// Set the size a later `resize` takes the device to.
    pub fn set_target_size(&mut self, id: DeviceId, size: f64) -> StorageResult<()> {
        let device = self.device(id)?;
        if !device.resizable() {
            return Err(device_error(device, "device is not resizable"));
        }
        if matches!(device.kind, DeviceKind::LogicalVolume(_)) {
            return self.set_lv_size(id, size);
        }
        if size <= 0.0 {
            return Err(StorageError::InvalidSize(format!(
                "{size} MB is not a valid size for {}",
                device.name()
            )));
        }
        self.device_mut(id)?.target_size = size;
        Ok(())
    }

    /// Resize a device to its target size.
    pub fn resize(
        &mut self,
        host: &dyn Host,
        id: DeviceId,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        let device = self.device(id)?.clone();
        if !device.exists {
            return Err(device_error(&device, "device has not been created"));
        }
        if !device.resizable() {
            return Err(device_error(&device, "device is not resizable"));
        }
        if device.target_size == device.size {
            return Ok(());
        }
        match &device.kind {
            DeviceKind::Partition(part) => {
                let part_id = part
                    .part_id
                    .ok_or_else(|| device_error(&device, "partition is not in the label"))?;
                let disk = self.device_mut(device.parents[0])?;
                if let DeviceKind::Disk(data) = &mut disk.kind {
                    if let Some(label) = data.label.as_mut() {
                        let start = label
                            .partition(part_id)
                            .map(|p| p.start)
                            .ok_or_else(|| device_error(&device, "partition is not in the label"))?;
                        let sectors = mb_to_sectors(device.target_size, label.geometry().sector_size);
                        label.set_partition_geometry(
                            part_id,
                            start,
                            start + sectors - Sectors(1),
                        )?;
                        label.commit(host, settings.attempts, settings.settle_timeout)?;
                    }
                }
            }
            DeviceKind::LogicalVolume(_) => {
                let size = format!("{}m", device.target_size);
                self.lv_command(host, &device, "lvresize", &["-L", &size])?;
            }
            _ => return Err(device_error(&device, "device is not resizable")),
        }
        let device = self.device_mut(id)?;
        device.size = device.target_size;
        info!("Resized {} to {} MB", device.name(), device.size);
        Ok(())
    }

    /// Replace the format of a device. The current format must not be
    /// active.
    pub fn set_format(
        &mut self,
        host: &dyn Host,
        id: DeviceId,
        mut format: DeviceFormat,
    ) -> StorageResult<DeviceFormat> {
        let device = self.device(id)?;
        if device.format.status(host) {
            return Err(device_error(
                device,
                "cannot replace a format that is active",
            ));
        }
        format.set_device(Some(device.path()));
        let device = self.device_mut(id)?;
        Ok(std::mem::replace(&mut device.format, format))
    }
}
