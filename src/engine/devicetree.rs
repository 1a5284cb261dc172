// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The device tree: every storage device of the machine, built from probe
//! records, together with the queue of actions that will change it.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    engine::{
        config::StorageConfig,
        devices::{
            CommitSettings, Device, DeviceKind, DeviceStore, DiskData, Formattable,
            PartitionData, PartitionRequest, DEFAULT_PE_SIZE,
        },
        formats::{fs_type, DeviceFormat, FormatArgs, FormatRegistry, Fstab, FstabEntry},
        host::Host,
        label::{DiskGeometry, DiskLabel, DiskSet, PartFlag, PartitionId},
        partitioning::{PartitionSpec, Partitions},
        probe::{lvm_pv_info, BlockDeviceInfo, BlockDeviceProbe, DeviceClass, LvmPvInfo},
        types::{ActionKind, DeviceAction, DeviceId, QueuedAction, Sectors},
    },
    storage::{StorageError, StorageResult},
};

/// Stacking deeper than this while resolving slaves means the probe
/// records are inconsistent.
const MAX_SLAVE_DEPTH: usize = 16;

const DEFAULT_SECTOR_SIZE: u64 = 512;

/// The name a probed device is known by in the tree.
fn tree_name(info: &BlockDeviceInfo) -> String {
    match (info.class, &info.dm_vg_name, &info.dm_lv_name) {
        (DeviceClass::DeviceMapper, Some(vg), Some(lv)) => format!("{vg}-{lv}"),
        (DeviceClass::DeviceMapper, _, _) => {
            info.dm_name.clone().unwrap_or_else(|| info.name.clone())
        }
        _ => info.name.clone(),
    }
}

/// Whether `name` is a partition of `disk`, e.g. "sda1" of "sda" or
/// "nvme0n1p2" of "nvme0n1".
fn is_partition_of(name: &str, disk: &str) -> bool {
    match name.strip_prefix(disk) {
        Some(rest) => {
            let rest = match rest.strip_prefix('p') {
                Some(number) if disk.ends_with(|c: char| c.is_ascii_digit()) => number,
                _ => rest,
            };
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

pub struct DeviceTree {
    store: DeviceStore,
    actions: Vec<QueuedAction>,
    ignored: Vec<String>,
    /// Kernel names of probed devices, e.g. "dm-0", mapped to the devices
    /// they became.
    kernel_names: HashMap<String, DeviceId>,
    config: StorageConfig,
}

impl DeviceTree {
    pub fn new(config: &StorageConfig) -> DeviceTree {
        DeviceTree {
            store: DeviceStore::new(),
            actions: Vec::new(),
            ignored: config.ignored_disks.clone(),
            kernel_names: HashMap::new(),
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.store.iter()
    }

    pub fn device(&self, id: DeviceId) -> StorageResult<&Device> {
        self.store.device(id)
    }

    /// Mutable access to a device's own settings. Structural changes go
    /// through `register_action`.
    pub fn device_mut(&mut self, id: DeviceId) -> StorageResult<&mut Device> {
        self.store.device_mut(id)
    }

    pub fn actions(&self) -> &[QueuedAction] {
        &self.actions
    }

    pub fn ignored_disks(&self) -> &[String] {
        &self.ignored
    }

    pub fn get_device_by_name(&self, name: &str) -> Option<DeviceId> {
        self.store.find_by_name(name)
    }

    pub fn get_device_by_path(&self, path: &Path) -> Option<DeviceId> {
        self.store.find_by_path(path)
    }

    /// The device with `uuid`, as the device itself or its format reports
    /// it.
    pub fn get_device_by_uuid(&self, uuid: &str) -> Option<DeviceId> {
        self.store
            .iter()
            .find(|(_, d)| {
                d.uuid.as_deref() == Some(uuid) || d.format().uuid.as_deref() == Some(uuid)
            })
            .map(|(id, _)| id)
    }

    pub fn get_device_by_label(&self, label: &str) -> Option<DeviceId> {
        self.store
            .iter()
            .find(|(_, d)| d.format().label() == Some(label))
            .map(|(id, _)| id)
    }

    pub fn get_devices_by_type(&self, type_name: &str) -> Vec<DeviceId> {
        self.store
            .iter()
            .filter(|(_, d)| d.type_name() == type_name)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn leaves(&self) -> Vec<DeviceId> {
        self.store
            .iter()
            .filter(|(_, d)| d.is_leaf())
            .map(|(id, _)| id)
            .collect()
    }

    /// Devices carrying a mountable format or swap.
    pub fn filesystems(&self) -> Vec<DeviceId> {
        self.store
            .iter()
            .filter(|(_, d)| d.format().mountable() || d.format().is_swap())
            .map(|(id, _)| id)
            .collect()
    }

    /// The partitions of `disk`, extended partitions included.
    pub fn partitions_on(&self, disk: DeviceId) -> Vec<DeviceId> {
        self.store
            .iter()
            .filter(|(_, d)| d.is_partition() && d.parents().first() == Some(&disk))
            .map(|(id, _)| id)
            .collect()
    }

    /// All devices that depend on `id`, leaves first.
    pub fn dependents(&self, id: DeviceId) -> Vec<DeviceId> {
        self.store.dependents(id)
    }

    /// The partition tables of every labelled disk, for the allocator to
    /// work on.
    pub fn disk_set(&self) -> DiskSet {
        let mut disk_set = DiskSet::new();
        for (_, device) in self.store.iter() {
            if let Some(label) = device.disk_data().and_then(|d| d.label()) {
                if !self.ignored.iter().any(|i| i == device.name()) {
                    disk_set.insert(label.clone());
                }
            }
        }
        disk_set
    }

    pub fn add_ignored_disk(&mut self, name: &str) {
        if !self.ignored.iter().any(|i| i == name) {
            info!("Ignoring disk {name}");
            self.ignored.push(name.to_string());
        }
    }

    fn ignored_name(&self, name: &str) -> bool {
        self.ignored
            .iter()
            .any(|disk| disk == name || is_partition_of(name, disk))
    }

    /// Whether populate skips the record: loop and ram devices, ignored
    /// disks and their partitions, and anything built on them.
    pub fn is_ignored(&self, info: &BlockDeviceInfo) -> bool {
        if matches!(info.class, DeviceClass::Loop | DeviceClass::Ram)
            || info.name.starts_with("loop")
            || info.name.starts_with("ram")
        {
            return true;
        }
        if self.ignored_name(&info.name) {
            return true;
        }
        if let Some(set) = &info.dmraid_set {
            if self.ignored.contains(set) {
                return true;
            }
        }
        match info.class {
            DeviceClass::Partition => info
                .parent_disk_name()
                .is_some_and(|disk| self.ignored.contains(&disk)),
            DeviceClass::DeviceMapper | DeviceClass::MdRaid => {
                info.slaves.iter().any(|s| self.ignored_name(s))
                    || info
                        .dm_name
                        .as_ref()
                        .is_some_and(|name| self.ignored.contains(name))
            }
            _ => false,
        }
    }

    /// Build the tree from the probe. Scans repeat until one yields no
    /// device not seen before, or the configured number of passes runs
    /// out.
    pub fn populate(
        &mut self,
        probe: &mut dyn BlockDeviceProbe,
        host: &dyn Host,
        registry: &FormatRegistry,
    ) -> StorageResult<()> {
        let mut seen = HashSet::new();
        for pass in 1..=self.config.max_populate_passes {
            let records = probe.block_devices()?;
            let new = records
                .iter()
                .filter(|r| !seen.contains(&r.name))
                .cloned()
                .collect::<Vec<_>>();
            if new.is_empty() {
                info!(
                    "Device scan settled after {pass} passes with {} devices",
                    self.store.len()
                );
                return Ok(());
            }
            debug!("Scan pass {pass} found {} new devices", new.len());
            for record in &new {
                seen.insert(record.name.clone());
                self.add_probed_device(record, &records, host, registry, 0)?;
            }
        }
        warn!(
            "Devices were still appearing after {} scan passes; continuing with {} devices",
            self.config.max_populate_passes,
            self.store.len()
        );
        Ok(())
    }

    /// Add the device described by `info`, resolving the devices it is
    /// built on from `pass` if they are not in the tree yet. Returns None
    /// for a skipped record.
    fn add_probed_device(
        &mut self,
        info: &BlockDeviceInfo,
        pass: &[BlockDeviceInfo],
        host: &dyn Host,
        registry: &FormatRegistry,
        depth: usize,
    ) -> StorageResult<Option<DeviceId>> {
        if depth > MAX_SLAVE_DEPTH {
            return Err(StorageError::DeviceTree(format!(
                "{} is stacked more than {MAX_SLAVE_DEPTH} devices deep",
                info.name
            )));
        }
        if let Some(id) = self.kernel_names.get(&info.name) {
            return Ok(Some(*id));
        }
        if self.is_ignored(info) {
            debug!("Skipping ignored device {}", info.name);
            return Ok(None);
        }
        if let Some(id) = self.store.find_by_name(&tree_name(info)) {
            self.kernel_names.insert(info.name.clone(), id);
            return Ok(Some(id));
        }

        let id = match info.class {
            DeviceClass::DeviceMapper => self.add_dm(info, pass, host, registry, depth)?,
            DeviceClass::MdRaid => {
                let parents = self.resolve_slaves(info, pass, host, registry, depth)?;
                let mut device = Device::storage(
                    &info.name,
                    parents,
                    info.size,
                    info.md_uuid.clone(),
                    None,
                );
                device.uuid = info.md_uuid.clone();
                Some(self.store.add(device)?)
            }
            DeviceClass::Optical => {
                Some(self.store.add(Device::optical(&info.name, info.media_present))?)
            }
            DeviceClass::Disk => self.add_disk(info, host)?,
            DeviceClass::Partition => self.add_partition(info, pass, host, registry, depth)?,
            DeviceClass::Loop | DeviceClass::Ram => None,
        };

        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        {
            let device = self.store.device_mut(id)?;
            device.major = Some(info.major);
            device.minor = Some(info.minor);
            device.sysfs_path = Some(info.sysfs_path.clone());
            if device.uuid.is_none() {
                device.uuid = info.uuid.clone();
            }
        }
        self.kernel_names.insert(info.name.clone(), id);
        self.handle_format(id, info, host, registry)?;
        Ok(Some(id))
    }

    fn resolve_slaves(
        &mut self,
        info: &BlockDeviceInfo,
        pass: &[BlockDeviceInfo],
        host: &dyn Host,
        registry: &FormatRegistry,
        depth: usize,
    ) -> StorageResult<Vec<DeviceId>> {
        let mut parents = Vec::new();
        for slave in &info.slaves {
            if let Some(id) = self.kernel_names.get(slave) {
                parents.push(*id);
                continue;
            }
            match pass.iter().find(|r| &r.name == slave) {
                Some(record) => {
                    if let Some(id) =
                        self.add_probed_device(record, pass, host, registry, depth + 1)?
                    {
                        parents.push(id);
                    }
                }
                None => warn!("Slave {slave} of {} was not found", info.name),
            }
        }
        Ok(parents)
    }

    fn add_dm(
        &mut self,
        info: &BlockDeviceInfo,
        pass: &[BlockDeviceInfo],
        host: &dyn Host,
        registry: &FormatRegistry,
        depth: usize,
    ) -> StorageResult<Option<DeviceId>> {
        let parents = self.resolve_slaves(info, pass, host, registry, depth)?;
        if let (Some(vg_name), Some(lv_name)) = (&info.dm_vg_name, &info.dm_lv_name) {
            let vg = self
                .store
                .iter()
                .find(|(_, d)| d.vg_data().is_some() && d.name() == vg_name)
                .map(|(id, _)| id);
            return match vg {
                Some(vg) => {
                    let lv = Device::logical_volume(vg_name, lv_name, vg, info.size, true);
                    Ok(Some(self.store.add(lv)?))
                }
                None => {
                    warn!(
                        "Volume group {vg_name} of logical volume {lv_name} was not found"
                    );
                    Ok(None)
                }
            };
        }
        if parents.is_empty() {
            warn!("No slaves of device-mapper device {} are known", info.name);
            return Ok(None);
        }
        let name = tree_name(info);
        Ok(Some(
            self.store
                .add(Device::device_mapper(&name, parents, info.size, true))?,
        ))
    }

    fn add_disk(
        &mut self,
        info: &BlockDeviceInfo,
        host: &dyn Host,
    ) -> StorageResult<Option<DeviceId>> {
        let devnode = info
            .devnode
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/{}", info.name)));
        // a whole-disk format or a raid set member has no partition table
        let label = if info.format_type.is_some() || info.dmraid_set.is_some() {
            None
        } else {
            match DiskLabel::read(host, &info.name, &devnode, info.size) {
                Ok(label) => Some(label),
                Err(err) if self.config.reinitialize_disks => {
                    info!(
                        "Initializing {} with an empty {} label: {err}",
                        info.name, self.config.label_type
                    );
                    Some(DiskLabel::new(
                        &info.name,
                        &devnode,
                        self.config.label_type,
                        DiskGeometry::from_mb(info.size, DEFAULT_SECTOR_SIZE),
                    ))
                }
                Err(err) => {
                    warn!("Unable to read the partition table of {}: {err}", info.name);
                    self.add_ignored_disk(&info.name);
                    return Ok(None);
                }
            }
        };
        Ok(Some(self.store.add(Device::disk(&info.name, label, info.size))?))
    }

    fn add_partition(
        &mut self,
        info: &BlockDeviceInfo,
        pass: &[BlockDeviceInfo],
        host: &dyn Host,
        registry: &FormatRegistry,
        depth: usize,
    ) -> StorageResult<Option<DeviceId>> {
        let disk_name = info.parent_disk_name().ok_or_else(|| {
            StorageError::DeviceTree(format!("Unable to tell which disk {} is on", info.name))
        })?;
        let disk = match self.store.find_by_name(&disk_name) {
            Some(disk) => disk,
            None => match pass.iter().find(|r| r.name == disk_name) {
                Some(record) => {
                    match self.add_probed_device(record, pass, host, registry, depth + 1)? {
                        Some(disk) => disk,
                        None => return Ok(None),
                    }
                }
                None => {
                    warn!("Disk {disk_name} of partition {} was not found", info.name);
                    return Ok(None);
                }
            },
        };

        let label = match self.store.device(disk)?.disk_data().and_then(|d| d.label()) {
            Some(label) => label,
            None => {
                debug!("Skipping {}: {disk_name} has no partition table", info.name);
                return Ok(None);
            }
        };
        let (data, size) = match label.partition_by_name(&info.name) {
            Some(part) => (
                PartitionData {
                    part_id: Some(part.id()),
                    number: part.number,
                    part_type: part.part_type,
                    bootable: part.has_flag(PartFlag::Boot),
                    request: None,
                },
                label.geometry().to_mb(part.length()),
            ),
            None => {
                warn!(
                    "{} is not in the partition table of {disk_name}",
                    info.name
                );
                return Ok(None);
            }
        };
        Ok(Some(self.store.add(Device::partition(
            &info.name, disk, data, size, true,
        ))?))
    }

    /// Attach the format the probe found on the device.
    fn handle_format(
        &mut self,
        id: DeviceId,
        info: &BlockDeviceInfo,
        host: &dyn Host,
        registry: &FormatRegistry,
    ) -> StorageResult<()> {
        let format_type = match info.format_type.as_deref() {
            Some(format_type) if !format_type.is_empty() => format_type,
            _ => return Ok(()),
        };
        let path = self.store.device(id)?.path();
        let mut args = FormatArgs {
            device: Some(path.clone()),
            uuid: info.uuid.clone(),
            label: info.label.clone(),
            exists: true,
            size: Some(info.size),
            ..Default::default()
        };

        let mut lvm = None;
        match registry
            .get_format(Some(format_type), &FormatArgs::default())
            .type_name()
        {
            Some("luks") => match &info.uuid {
                Some(uuid) => args.map_name = Some(format!("luks-{uuid}")),
                None => debug!("No uuid for the LUKS volume on {}", info.name),
            },
            Some("lvmpv") => {
                let pv = match &info.lvm {
                    Some(pv) => Some(pv.clone()),
                    None => match lvm_pv_info(host, &path) {
                        Ok(pv) => Some(pv),
                        Err(err) => {
                            debug!("No LVM metadata for {}: {err}", info.name);
                            None
                        }
                    },
                };
                if let Some(pv) = &pv {
                    args.vg_name = pv.vg_name.clone();
                    args.vg_uuid = pv.vg_uuid.clone();
                    args.pe_start = pv.pe_start;
                }
                lvm = pv;
            }
            Some("mdmember") => args.md_uuid = info.md_uuid.clone(),
            Some("dmraidmember") => args.raid_set = info.dmraid_set.clone(),
            Some(_) => (),
            None => {
                debug!("Unrecognized format {format_type} on {}", info.name);
                return Ok(());
            }
        }

        let format = registry.get_format(Some(format_type), &args);
        self.store.set_format(host, id, format)?;

        if let Some(pv) = lvm {
            self.add_pv_to_vg(id, &pv)?;
        }
        if let Some(set) = &info.dmraid_set {
            self.add_raid_set_member(id, set, info.size)?;
        }
        Ok(())
    }

    /// Make `pv` a parent of its volume group, adding the group on its
    /// first member.
    fn add_pv_to_vg(&mut self, pv: DeviceId, info: &LvmPvInfo) -> StorageResult<()> {
        let vg_name = match &info.vg_name {
            Some(name) => name,
            None => return Ok(()),
        };
        let vg = self
            .store
            .iter()
            .find(|(_, d)| d.vg_data().is_some() && d.name() == vg_name)
            .map(|(id, _)| id);
        match vg {
            Some(vg) => self.store.add_parent(vg, pv),
            None => {
                let mut device = Device::volume_group(
                    vg_name,
                    vec![pv],
                    info.vg_extent_size.unwrap_or(DEFAULT_PE_SIZE),
                    info.vg_pv_count.unwrap_or(1),
                    true,
                );
                device.uuid = info.vg_uuid.clone();
                self.store.add(device).map(|_| ())
            }
        }
    }

    fn add_raid_set_member(
        &mut self,
        member: DeviceId,
        set: &str,
        size: f64,
    ) -> StorageResult<()> {
        match self.store.find_by_name(set) {
            Some(raid_set) => self.store.add_parent(raid_set, member),
            None => self
                .store
                .add(Device::storage(
                    set,
                    vec![member],
                    size,
                    None,
                    Some(set.to_string()),
                ))
                .map(|_| ()),
        }
    }

    fn push_action(&mut self, action: QueuedAction) {
        info!("Registered action: {action}");
        self.actions.push(action);
    }

    fn forget_actions(&mut self, id: DeviceId, kind: Option<ActionKind>) {
        self.actions
            .retain(|a| a.device != id || kind.is_some_and(|k| a.kind != k));
    }

    /// Validate an action against the tree, apply it to the tree, and
    /// queue the on-disk work for `process_actions`.
    pub fn register_action(
        &mut self,
        host: &dyn Host,
        action: DeviceAction,
    ) -> StorageResult<DeviceId> {
        match action {
            DeviceAction::CreateDevice(device) => {
                if device.exists() {
                    return Err(StorageError::DeviceTree(format!(
                        "{} already exists and can not be created",
                        device.name()
                    )));
                }
                if let Some(existing) = self.store.find_by_path(&device.path()) {
                    debug!("{} replaces the device at {}", device.name(), device.path().display());
                    self.store.remove(existing)?;
                    self.forget_actions(existing, None);
                }
                let name = device.name().to_string();
                let id = self.store.add(*device)?;
                self.push_action(QueuedAction::new(ActionKind::CreateDevice, id, &name));
                Ok(id)
            }
            DeviceAction::DestroyDevice(id) => {
                let removed = self.store.remove(id)?;
                if !removed.exists() {
                    // never created, so there is nothing to undo on disk
                    self.forget_actions(id, None);
                    return Ok(id);
                }
                let mut action = QueuedAction::new(ActionKind::DestroyDevice, id, removed.name());
                action.snapshot = Some(removed);
                self.push_action(action);
                Ok(id)
            }
            DeviceAction::CreateFormat(id, format) => {
                let device = self.store.device(id)?;
                if !device.formattable() {
                    return Err(StorageError::DeviceTree(format!(
                        "{} can not be formatted",
                        device.name()
                    )));
                }
                if let Some(mountpoint) = format.mountpoint() {
                    let used = self
                        .store
                        .iter()
                        .find(|(other, d)| *other != id && d.format().mountpoint() == Some(mountpoint));
                    if let Some((_, other)) = used {
                        return Err(StorageError::DeviceTree(format!(
                            "Mount point {} is already used by {}",
                            mountpoint.display(),
                            other.name()
                        )));
                    }
                }
                let name = device.name().to_string();
                self.forget_actions(id, Some(ActionKind::CreateFormat));
                self.store.set_format(host, id, format)?;
                self.push_action(QueuedAction::new(ActionKind::CreateFormat, id, &name));
                Ok(id)
            }
            DeviceAction::DestroyFormat(id) => {
                let device = self.store.device(id)?;
                if device.format().is_unknown() {
                    return Err(StorageError::DeviceTree(format!(
                        "{} has no format to destroy",
                        device.name()
                    )));
                }
                let name = device.name().to_string();
                let old = self
                    .store
                    .set_format(host, id, DeviceFormat::unknown(&FormatArgs::default()))?;
                if !old.exists() {
                    self.forget_actions(id, Some(ActionKind::CreateFormat));
                    return Ok(id);
                }
                let mut action = QueuedAction::new(ActionKind::DestroyFormat, id, &name);
                action.orig_format = Some(old);
                self.push_action(action);
                Ok(id)
            }
            DeviceAction::ResizeDevice(id, size) => {
                let orig = self.store.device(id)?.size();
                self.store.set_target_size(id, size)?;
                let device = self.store.device(id)?;
                let mut action = QueuedAction::new(ActionKind::ResizeDevice, id, device.name());
                action.orig_size = Some(orig);
                action.new_size = Some(device.target_size());
                self.push_action(action);
                Ok(id)
            }
            DeviceAction::ResizeFormat(id, size) => {
                let device = self.store.device(id)?;
                let format = device.format();
                if !format.exists() || !format.resizable() {
                    return Err(StorageError::DeviceTree(format!(
                        "The {} format on {} can not be resized",
                        format.name(),
                        device.name()
                    )));
                }
                if size <= 0.0 || size > device.target_size() {
                    return Err(StorageError::InvalidSize(format!(
                        "{size} MB does not fit on {}",
                        device.name()
                    )));
                }
                let mut action = QueuedAction::new(ActionKind::ResizeFormat, id, device.name());
                action.orig_size = format.size();
                action.new_size = Some(size);
                self.push_action(action);
                Ok(id)
            }
        }
    }

    /// Queue the destruction of `id` and everything built on it, leaves
    /// first. Formats on existing devices are erased before the device.
    pub fn schedule_destroy(&mut self, host: &dyn Host, id: DeviceId) -> StorageResult<()> {
        let mut targets = self.store.dependents(id);
        targets.push(id);
        for target in targets {
            if !self.store.contains(target) {
                continue;
            }
            let device = self.store.device(target)?;
            let format = device.format();
            if device.exists() && format.exists() && !format.is_unknown() && format.destroyable()
            {
                self.register_action(host, DeviceAction::DestroyFormat(target))?;
            }
            self.register_action(host, DeviceAction::DestroyDevice(target))?;
        }
        Ok(())
    }

    /// Carry out the queued actions in order. The first failure stops
    /// processing; it and the actions after it stay queued.
    pub fn process_actions(&mut self, host: &dyn Host) -> StorageResult<()> {
        let settings = self.config.commit_settings();
        let mut pending = std::mem::take(&mut self.actions).into_iter();
        info!("Processing {} actions", pending.len());
        while let Some(mut action) = pending.next() {
            info!("Executing action: {action}");
            if let Err(err) = self.execute_action(host, &mut action, &settings) {
                let msg = format!("Action \"{action}\" failed");
                self.actions = std::iter::once(action).chain(pending).collect();
                return Err(StorageError::Chained(msg, Box::new(err)));
            }
        }
        Ok(())
    }

    fn execute_action(
        &mut self,
        host: &dyn Host,
        action: &mut QueuedAction,
        settings: &CommitSettings,
    ) -> StorageResult<()> {
        let id = action.device;
        match action.kind {
            ActionKind::CreateDevice => self.store.create(host, id, settings),
            ActionKind::DestroyDevice => {
                let mut device = action.snapshot.take().ok_or_else(|| {
                    StorageError::DeviceTree(format!("No record of {} to destroy", action.device_name))
                })?;
                let result = self.store.destroy_detached(host, &mut device, settings);
                if result.is_err() {
                    action.snapshot = Some(device);
                }
                result
            }
            ActionKind::CreateFormat => {
                self.store.setup(host, id)?;
                self.store.device_mut(id)?.format_mut().create(host)
            }
            ActionKind::DestroyFormat => {
                let format = action.orig_format.as_mut().ok_or_else(|| {
                    StorageError::DeviceTree(format!(
                        "No record of the format on {} to destroy",
                        action.device_name
                    ))
                })?;
                if format.status(host) {
                    format.teardown(host)?;
                }
                format.destroy(host)
            }
            ActionKind::ResizeDevice => self.store.resize(host, id, settings),
            ActionKind::ResizeFormat => {
                let size = action.new_size.ok_or_else(|| {
                    StorageError::InvalidSize(format!("No size given to resize {}", action.device_name))
                })?;
                self.store.device_mut(id)?.format_mut().resize(host, size)
            }
        }
    }

    /// The partition device occupying exactly `start..=end` on `drive` in
    /// the tree's current label.
    fn partition_at(&self, drive: &str, start: Sectors, end: Sectors) -> Option<DeviceId> {
        let disk = self.store.find_by_name(drive)?;
        let label = self.store.get(disk)?.disk_data()?.label()?;
        let part_id = label
            .partitions()
            .iter()
            .find(|p| p.start == start && p.end == end)?
            .id();
        self.partition_with_id(disk, part_id)
    }

    fn partition_with_id(
        &self,
        disk: DeviceId,
        part_id: PartitionId,
    ) -> Option<DeviceId> {
        self.partitions_on(disk).into_iter().find(|id| {
            self.store
                .get(*id)
                .and_then(|d| d.partition_data())
                .is_some_and(|p| p.part_id == Some(part_id))
        })
    }

    fn request_format(
        request: &PartitionSpec,
        registry: &FormatRegistry,
        device: &Path,
    ) -> DeviceFormat {
        let mut format = request.base.device_format(registry);
        format.set_device(Some(device.to_path_buf()));
        format
    }

    /// Turn an allocation into queued actions: destroy the deleted
    /// partitions, install the new labels, and create and format every
    /// newly placed partition.
    pub fn apply_partitioning(
        &mut self,
        host: &dyn Host,
        disk_set: &DiskSet,
        partitions: &Partitions,
        registry: &FormatRegistry,
    ) -> StorageResult<()> {
        for delete in &partitions.deletes {
            match self.partition_at(&delete.drive, delete.start, delete.end) {
                Some(id) if self.store.contains(id) => self.schedule_destroy(host, id)?,
                _ => debug!(
                    "Nothing to delete at {}..{} on {}",
                    delete.start, delete.end, delete.drive
                ),
            }
        }

        for (drive, label) in disk_set.iter() {
            let disk = match self.store.find_by_name(drive) {
                Some(disk) => disk,
                None => {
                    warn!("Allocation names unknown drive {drive}");
                    continue;
                }
            };
            // partitions placed by an earlier allocation are placed anew
            for id in self.partitions_on(disk) {
                if self.store.contains(id) && !self.store.device(id)?.exists() {
                    self.schedule_destroy(host, id)?;
                }
            }
            if let Some(data) = disk_data_mut(&mut self.store, disk)? {
                data.set_label(Some(label.clone()));
            }
            for id in self.partitions_on(disk) {
                let placed = self
                    .store
                    .device(id)?
                    .partition_data()
                    .and_then(|p| p.part_id)
                    .and_then(|part_id| label.partition(part_id))
                    .map(|p| (p.number, label.partition_name(p)));
                if let Some((number, name)) = placed {
                    let device = self.store.device_mut(id)?;
                    if device.name() != name {
                        debug!("{} is now {name}", device.name());
                        device.set_name(&name);
                    }
                    if let DeviceKind::Partition(part) = device.kind_mut() {
                        part.number = number;
                    }
                }
            }

            for part in label.partitions().iter().filter(|p| p.is_new && p.is_extended()) {
                if self.partition_with_id(disk, part.id()).is_none() {
                    let data = PartitionData {
                        part_id: Some(part.id()),
                        number: part.number,
                        part_type: part.part_type,
                        bootable: false,
                        request: None,
                    };
                    let device = Device::partition(
                        &label.partition_name(part),
                        disk,
                        data,
                        label.geometry().to_mb(part.length()),
                        false,
                    );
                    self.register_action(host, DeviceAction::CreateDevice(Box::new(device)))?;
                }
            }
        }

        for request in partitions.requests.iter().filter(|r| r.is_new()) {
            let (drive, part_id) = match (request.current_drive.as_deref(), request.part) {
                (Some(drive), Some(part_id)) => (drive, part_id),
                _ => continue,
            };
            let (label, part) = match disk_set
                .get(drive)
                .and_then(|label| label.partition(part_id).map(|part| (label, part)))
            {
                Some(placed) => placed,
                None => continue,
            };
            let disk = self.store.find_by_name(drive).ok_or_else(|| {
                StorageError::DeviceTree(format!("Drive {drive} is not in the tree"))
            })?;
            let data = PartitionData {
                part_id: Some(part_id),
                number: part.number,
                part_type: part.part_type,
                bootable: partitions.is_bootable(request),
                request: Some(PartitionRequest {
                    disks: request.drives.clone(),
                    size: request.base.size,
                    max_size: request.max_size,
                    grow: request.grow,
                    primary: request.primary,
                    weight: 0,
                }),
            };
            let device = Device::partition(
                &label.partition_name(part),
                disk,
                data,
                label.geometry().to_mb(part.length()),
                false,
            );
            let path = device.path();
            let id = self.register_action(host, DeviceAction::CreateDevice(Box::new(device)))?;
            let format = Self::request_format(request, registry, &path);
            if !format.is_unknown() {
                self.register_action(host, DeviceAction::CreateFormat(id, format))?;
            }
        }

        for request in partitions.requests.iter().filter(|r| r.is_preexisting()) {
            let id = match request
                .device
                .as_deref()
                .and_then(|name| self.store.find_by_name(name))
            {
                Some(id) => id,
                None => continue,
            };
            if request.base.format {
                let path = self.store.device(id)?.path();
                let format = Self::request_format(request, registry, &path);
                if format.is_unknown() {
                    continue;
                }
                let current = self.store.device(id)?.format();
                if current.exists() && !current.is_unknown() {
                    self.register_action(host, DeviceAction::DestroyFormat(id))?;
                }
                self.register_action(host, DeviceAction::CreateFormat(id, format))?;
            } else {
                let device = self.store.device_mut(id)?;
                device
                    .format_mut()
                    .set_mountpoint(request.base.mountpoint.as_ref().map(PathBuf::from));
                if request.base.migrate {
                    device.format_mut().set_migrate(true)?;
                }
            }
        }
        Ok(())
    }

    /// Fill in the format type of preexisting requests from what the tree
    /// found on their partitions.
    pub fn set_request_formats(&self, partitions: &mut Partitions) {
        for request in partitions.requests.iter_mut().filter(|r| r.is_preexisting()) {
            let found = request
                .device
                .as_deref()
                .and_then(|name| self.store.find_by_name(name))
                .and_then(|id| self.store.get(id))
                .and_then(|d| d.format().type_name());
            if let Some(type_name) = found {
                request.base.orig_fstype = Some(type_name.to_string());
                if request.base.fstype.is_none() {
                    request.base.fstype = Some(type_name.to_string());
                }
            }
        }
    }

    /// Deactivate every device, leaves first. Failures are logged and the
    /// rest still torn down.
    pub fn teardown_all(&mut self, host: &dyn Host) {
        for id in self.leaves() {
            if let Err(err) = self.store.teardown(host, id, true) {
                warn!("Unable to tear down {id}: {err}");
            }
        }
    }

    /// An fstab for every mountable format with a mountpoint, and for every
    /// swap.
    pub fn fstab(&self) -> Fstab {
        let mut entries = Vec::new();
        for (_, device) in self.store.iter() {
            let format = device.format();
            let (mountpoint, fstype) = if format.is_swap() {
                ("swap".to_string(), "swap".to_string())
            } else {
                match (format.mountpoint(), format.fs()) {
                    (Some(mountpoint), Some(fs)) if format.mountable() || fs.fs_type().bind => (
                        mountpoint.to_string_lossy().into_owned(),
                        fs.fs_type().mount_type().to_string(),
                    ),
                    _ => continue,
                }
            };
            let spec = if let Some(label) = format.label() {
                format!("LABEL={label}")
            } else if let Some(uuid) = &format.uuid {
                format!("UUID={uuid}")
            } else {
                device.path().to_string_lossy().into_owned()
            };
            let passno = if mountpoint == "/" {
                1
            } else if format.checkable() {
                2
            } else {
                0
            };
            entries.push(FstabEntry {
                spec,
                mountpoint,
                fstype,
                options: format.options(),
                dump: u32::from(format.dump()),
                passno,
            });
        }
        entries.sort_by(|a, b| {
            (a.fstype == "swap", &a.mountpoint).cmp(&(b.fstype == "swap", &b.mountpoint))
        });
        Fstab { entries }
    }

    /// The mounted filesystems, one mtab line each.
    pub fn mtab(&self) -> String {
        let mut mounted = self
            .store
            .iter()
            .filter_map(|(_, d)| {
                let fs = d.format().fs()?;
                fs.mounted_at().map(|at| (at.to_path_buf(), d, fs))
            })
            .collect::<Vec<_>>();
        mounted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut mtab = String::new();
        for (at, device, fs) in mounted {
            let options = device.format().options();
            let options = if options == "defaults" || options.is_empty() {
                "rw".to_string()
            } else {
                format!("rw,{options}")
            };
            mtab.push_str(&format!(
                "{} {} {} {} 0 0\n",
                device.path().display(),
                at.display(),
                fs.fs_type().mount_type(),
                options
            ));
        }
        mtab
    }

    fn resolve_fstab_spec(&self, spec: &str) -> Option<DeviceId> {
        if let Some(uuid) = spec.strip_prefix("UUID=") {
            self.get_device_by_uuid(uuid)
        } else if let Some(label) = spec.strip_prefix("LABEL=") {
            self.get_device_by_label(label)
        } else {
            self.store.find_by_path(Path::new(spec))
        }
    }

    /// Attach the mountpoints and options of an existing fstab to the
    /// devices it names. Entries that name no device in the tree are
    /// returned.
    pub fn apply_fstab(
        &mut self,
        host: &dyn Host,
        fstab: &Fstab,
        registry: &FormatRegistry,
    ) -> StorageResult<Vec<FstabEntry>> {
        let mut unresolved = Vec::new();
        for entry in &fstab.entries {
            if fs_type(&entry.fstype).is_some_and(|fs| fs.nodev) {
                continue;
            }
            let args = FormatArgs {
                mountpoint: (entry.fstype != "swap").then(|| PathBuf::from(&entry.mountpoint)),
                options: Some(entry.options.clone()),
                exists: true,
                ..Default::default()
            };

            if entry.is_bind() {
                let source = PathBuf::from(&entry.spec);
                let id = match self.store.find_by_path(&source) {
                    Some(id) => id,
                    None => self.store.add(Device::bind_mount(&source))?,
                };
                let format = registry.get_format(Some("bind"), &args);
                self.store.set_format(host, id, format)?;
                continue;
            }

            let id = match self.resolve_fstab_spec(&entry.spec) {
                Some(id) => id,
                None if entry.fstype == "swap" && !entry.spec.starts_with("/dev/") => {
                    let path = PathBuf::from(&entry.spec);
                    let id = self.store.add(Device::swap_file(&path, 0.0, true))?;
                    self.store
                        .set_format(host, id, registry.get_format(Some("swap"), &args))?;
                    continue;
                }
                None => {
                    debug!("No device for fstab entry {}", entry.spec);
                    unresolved.push(entry.clone());
                    continue;
                }
            };

            if self.store.device(id)?.format().is_unknown() {
                if registry.is_registered(&entry.fstype) {
                    self.store
                        .set_format(host, id, registry.get_format(Some(&entry.fstype), &args))?;
                }
                continue;
            }
            let format = self.store.device_mut(id)?.format_mut();
            if !format.is_swap() {
                format.set_mountpoint(args.mountpoint.clone());
            }
            if let Err(err) = format.set_options(args.options.clone()) {
                warn!("Ignoring options of fstab entry {}: {err}", entry.spec);
            }
        }
        Ok(unresolved)
    }
}

fn disk_data_mut(
    store: &mut DeviceStore,
    disk: DeviceId,
) -> StorageResult<Option<&mut DiskData>> {
    match store.device_mut(disk)?.kind_mut() {
        DeviceKind::Disk(data) => Ok(Some(data)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::engine::{
        host::SimHost,
        label::{LabelType, PartType},
        partitioning::{Allocator, PartitionSpec},
        probe::{BlockDeviceInfo, SimProbe},
    };

    use super::*;

    const SDA_DUMP: &str = r#"{
   "partitiontable": {
      "label": "dos",
      "device": "/dev/sda",
      "unit": "sectors",
      "sectorsize": 512,
      "partitions": [
         {"node": "/dev/sda1", "start": 63, "size": 409600, "type": "83", "bootable": true},
         {"node": "/dev/sda2", "start": 409663, "size": 4000000, "type": "5"},
         {"node": "/dev/sda5", "start": 409726, "size": 1000000, "type": "82"},
         {"node": "/dev/sda6", "start": 1409789, "size": 1000000, "type": "8e"}
      ]
   }
}"#;

    fn sda_records() -> Vec<BlockDeviceInfo> {
        let mut sda1 = BlockDeviceInfo::partition("sda1", "sda", 200.0);
        sda1.format_type = Some("ext3".into());
        sda1.uuid = Some("1111".into());
        sda1.label = Some("/boot".into());
        let sda2 = BlockDeviceInfo::partition("sda2", "sda", 0.0);
        let mut sda5 = BlockDeviceInfo::partition("sda5", "sda", 488.0);
        sda5.format_type = Some("swap".into());
        let mut sda6 = BlockDeviceInfo::partition("sda6", "sda", 488.0);
        sda6.format_type = Some("LVM2_member".into());
        sda6.lvm = Some(LvmPvInfo {
            vg_name: Some("vg0".into()),
            vg_uuid: Some("vg-uuid".into()),
            pe_start: Some(0.1875),
            vg_pv_count: Some(1),
            vg_extent_size: Some(4.0),
            vg_extent_count: Some(121),
            vg_free_count: Some(0),
        });
        let mut root = BlockDeviceInfo::new("dm-0", DeviceClass::DeviceMapper, 484.0);
        root.slaves = vec!["sda6".into()];
        root.dm_name = Some("vg0-root".into());
        root.dm_vg_name = Some("vg0".into());
        root.dm_lv_name = Some("root".into());
        root.format_type = Some("ext4".into());
        root.uuid = Some("2222".into());
        // partitions before their disk, the LV before its PV
        vec![
            root,
            sda6,
            sda5,
            sda2,
            sda1,
            BlockDeviceInfo::new("sda", DeviceClass::Disk, 4000.0),
            BlockDeviceInfo::new("loop0", DeviceClass::Loop, 100.0),
        ]
    }

    fn populated() -> (DeviceTree, SimHost, FormatRegistry) {
        let host = SimHost::new();
        host.set_output("sfdisk", SDA_DUMP);
        let registry = FormatRegistry::new();
        let mut tree = DeviceTree::new(&StorageConfig::default());
        tree.populate(&mut SimProbe::new(sda_records()), &host, &registry)
            .unwrap();
        (tree, host, registry)
    }

    #[test]
    /// Devices are added in dependency order whatever order the probe
    /// reports them in.
    fn test_populate() {
        let (tree, _, _) = populated();
        assert!(tree.get_device_by_name("loop0").is_none());
        let sda = tree.get_device_by_name("sda").unwrap();
        assert_eq!(tree.partitions_on(sda).len(), 4);

        let sda6 = tree.get_device_by_name("sda6").unwrap();
        assert_eq!(tree.device(sda6).unwrap().format().type_name(), Some("lvmpv"));
        let vg = tree.get_device_by_name("vg0").unwrap();
        assert_eq!(tree.device(vg).unwrap().parents(), &[sda6]);
        let lv = tree.get_device_by_name("vg0-root").unwrap();
        assert_eq!(tree.device(lv).unwrap().parents(), &[vg]);
        assert_eq!(tree.get_device_by_uuid("2222"), Some(lv));
        assert_eq!(tree.get_devices_by_type("partition").len(), 4);
        assert!(tree.leaves().contains(&lv));
        assert!(tree.dependents(sda6).contains(&lv));
    }

    #[test]
    /// Scanning stops at the first pass that shows nothing new.
    fn test_populate_fixed_point() {
        let host = SimHost::new();
        host.set_output("sfdisk", SDA_DUMP);
        let registry = FormatRegistry::new();
        let records = sda_records();
        let first = records
            .iter()
            .filter(|r| r.class == DeviceClass::Disk)
            .cloned()
            .collect::<Vec<_>>();
        let mut probe = SimProbe::with_passes(vec![first, records]);
        let mut tree = DeviceTree::new(&StorageConfig::default());
        tree.populate(&mut probe, &host, &registry).unwrap();
        assert_eq!(probe.scans(), 3);
        assert!(tree.get_device_by_name("vg0-root").is_some());
    }

    #[test]
    fn test_populate_pass_limit() {
        let host = SimHost::new();
        let registry = FormatRegistry::new();
        let passes = (0..5)
            .map(|i| {
                (0..=i)
                    .map(|j| BlockDeviceInfo::new(&format!("sr{j}"), DeviceClass::Optical, 0.0))
                    .collect()
            })
            .collect();
        let mut probe = SimProbe::with_passes(passes);
        let config = StorageConfig {
            max_populate_passes: 3,
            ..Default::default()
        };
        let mut tree = DeviceTree::new(&config);
        tree.populate(&mut probe, &host, &registry).unwrap();
        assert_eq!(probe.scans(), 3);
        assert_eq!(tree.store().len(), 3);
    }

    #[test]
    /// A disk whose label can not be read is ignored along with its
    /// partitions, unless disks may be reinitialized.
    fn test_unreadable_label() {
        let host = SimHost::new();
        let registry = FormatRegistry::new();
        let records = vec![
            BlockDeviceInfo::partition("sdb1", "sdb", 100.0),
            BlockDeviceInfo::new("sdb", DeviceClass::Disk, 1000.0),
        ];

        let mut tree = DeviceTree::new(&StorageConfig::default());
        tree.populate(&mut SimProbe::new(records.clone()), &host, &registry)
            .unwrap();
        assert!(tree.store().is_empty());
        assert_eq!(tree.ignored_disks(), &["sdb".to_string()]);

        let config = StorageConfig {
            reinitialize_disks: true,
            label_type: LabelType::Gpt,
            ..Default::default()
        };
        let mut tree = DeviceTree::new(&config);
        tree.populate(&mut SimProbe::new(records), &host, &registry)
            .unwrap();
        let sdb = tree.get_device_by_name("sdb").unwrap();
        let label = tree.device(sdb).unwrap().disk_data().unwrap().label().unwrap();
        assert_eq!(label.label_type(), LabelType::Gpt);
        assert!(label.partitions().is_empty());
        assert!(tree.get_device_by_name("sdb1").is_none());
    }

    #[test]
    fn test_ignore_rules() {
        let config = StorageConfig {
            ignored_disks: vec!["sdc".into(), "nvme0n1".into()],
            ..Default::default()
        };
        let tree = DeviceTree::new(&config);
        assert!(tree.is_ignored(&BlockDeviceInfo::new("sdc", DeviceClass::Disk, 1.0)));
        assert!(tree.is_ignored(&BlockDeviceInfo::partition("sdc3", "sdc", 1.0)));
        assert!(tree.is_ignored(&BlockDeviceInfo::partition("nvme0n1p1", "nvme0n1", 1.0)));
        assert!(tree.is_ignored(&BlockDeviceInfo::new("ram0", DeviceClass::Ram, 1.0)));
        assert!(!tree.is_ignored(&BlockDeviceInfo::new("sdca", DeviceClass::Disk, 1.0)));

        let mut md = BlockDeviceInfo::new("md0", DeviceClass::MdRaid, 1.0);
        md.slaves = vec!["sdd1".into(), "sdc1".into()];
        assert!(tree.is_ignored(&md));

        let mut member = BlockDeviceInfo::new("sde", DeviceClass::Disk, 1.0);
        member.dmraid_set = Some("isw_raid".into());
        assert!(!tree.is_ignored(&member));
        let config = StorageConfig {
            ignored_disks: vec!["isw_raid".into()],
            ..Default::default()
        };
        assert!(DeviceTree::new(&config).is_ignored(&member));
    }

    #[test]
    /// Creating a device over the path of a device that was never created
    /// replaces it, queue entry included.
    fn test_create_supersedes() {
        let (mut tree, host, _) = populated();
        let sda = tree.get_device_by_name("sda").unwrap();
        let data = PartitionData {
            part_id: None,
            number: 3,
            part_type: PartType::Primary,
            bootable: false,
            request: None,
        };
        let first = tree
            .register_action(
                &host,
                DeviceAction::CreateDevice(Box::new(Device::partition(
                    "sda3",
                    sda,
                    data.clone(),
                    100.0,
                    false,
                ))),
            )
            .unwrap();
        let second = tree
            .register_action(
                &host,
                DeviceAction::CreateDevice(Box::new(Device::partition(
                    "sda3", sda, data, 200.0, false,
                ))),
            )
            .unwrap();
        assert!(tree.device(first).is_err());
        assert_eq!(tree.device(second).unwrap().size(), 200.0);
        assert_eq!(tree.actions().len(), 1);

        assert_matches!(
            tree.register_action(
                &host,
                DeviceAction::CreateDevice(Box::new(Device::disk("sdz", None, 10.0)))
            ),
            Err(StorageError::DeviceTree(_))
        );
    }

    #[test]
    fn test_mountpoint_in_use() {
        let (mut tree, host, registry) = populated();
        let sda1 = tree.get_device_by_name("sda1").unwrap();
        let lv = tree.get_device_by_name("vg0-root").unwrap();
        tree.device_mut(lv)
            .unwrap()
            .format_mut()
            .set_mountpoint(Some("/".into()));
        let format = registry.get_format(
            Some("ext4"),
            &FormatArgs {
                mountpoint: Some("/".into()),
                ..Default::default()
            },
        );
        assert_matches!(
            tree.register_action(&host, DeviceAction::CreateFormat(sda1, format)),
            Err(StorageError::DeviceTree(_))
        );
    }

    #[test]
    /// Destroying a partition takes everything stacked on it, leaves first.
    fn test_schedule_destroy() {
        let (mut tree, host, _) = populated();
        let sda6 = tree.get_device_by_name("sda6").unwrap();
        let lv = tree.get_device_by_name("vg0-root").unwrap();
        let vg = tree.get_device_by_name("vg0").unwrap();
        host.add_node("/dev/mapper/vg0-root");
        host.add_node("/dev/sda6");
        tree.schedule_destroy(&host, sda6).unwrap();
        let queued = tree
            .actions()
            .iter()
            .map(|a| (a.kind, a.device))
            .collect::<Vec<_>>();
        assert_eq!(
            queued,
            vec![
                (ActionKind::DestroyFormat, lv),
                (ActionKind::DestroyDevice, lv),
                (ActionKind::DestroyDevice, vg),
                (ActionKind::DestroyFormat, sda6),
                (ActionKind::DestroyDevice, sda6),
            ]
        );
        assert!(tree.get_device_by_name("vg0").is_none());

        tree.process_actions(&host).unwrap();
        assert!(tree.actions().is_empty());
        assert!(!host.commands_for("lvm").is_empty());
    }

    #[test]
    /// Destroying an extended partition takes its logical partitions and
    /// everything stacked on them.
    fn test_schedule_destroy_extended() {
        let (mut tree, host, _) = populated();
        let sda2 = tree.get_device_by_name("sda2").unwrap();
        let sda5 = tree.get_device_by_name("sda5").unwrap();
        let sda6 = tree.get_device_by_name("sda6").unwrap();
        for node in ["/dev/sda2", "/dev/sda5", "/dev/sda6", "/dev/mapper/vg0-root"] {
            host.add_node(node);
        }
        let dependents = tree.dependents(sda2);
        assert!(dependents.contains(&sda5));
        assert!(dependents.contains(&sda6));

        tree.schedule_destroy(&host, sda2).unwrap();
        for name in ["sda2", "sda5", "sda6", "vg0", "vg0-root"] {
            assert!(tree.get_device_by_name(name).is_none());
        }
        assert!(tree.get_device_by_name("sda1").is_some());
        assert_eq!(
            tree.actions().last().map(|a| (a.kind, a.device)),
            Some((ActionKind::DestroyDevice, sda2))
        );

        tree.process_actions(&host).unwrap();
        assert!(tree.actions().is_empty());
    }

    #[test]
    /// A failing action stops processing and stays queued with the rest.
    fn test_process_actions_stops_at_failure() {
        let (mut tree, host, _) = populated();
        let sda5 = tree.get_device_by_name("sda5").unwrap();
        host.add_node("/dev/sda5");
        tree.schedule_destroy(&host, sda5).unwrap();
        assert_eq!(tree.actions().len(), 2);
        host.fail_command("wipefs", 1, "device busy");
        assert!(tree.process_actions(&host).is_err());
        assert_eq!(tree.actions().len(), 2);
        assert_eq!(tree.actions()[0].kind, ActionKind::DestroyFormat);
    }

    #[test]
    /// Allocating on the tree's disks and applying the result queues the
    /// partition and format creation, which processing carries out.
    fn test_apply_partitioning() {
        let host = SimHost::new();
        let registry = FormatRegistry::new();
        let config = StorageConfig {
            reinitialize_disks: true,
            ..Default::default()
        };
        let mut tree = DeviceTree::new(&config);
        tree.populate(
            &mut SimProbe::new(vec![BlockDeviceInfo::new("sda", DeviceClass::Disk, 8000.0)]),
            &host,
            &registry,
        )
        .unwrap();
        host.add_node("/dev/sda");

        let mut disk_set = tree.disk_set();
        let mut partitions = Partitions::new();
        let mut root = PartitionSpec::new(Some("ext4"), 2000.0, Some("/"));
        root.base.format = true;
        partitions.add_request(root);
        let mut swap = PartitionSpec::new(Some("swap"), 512.0, None);
        swap.base.format = true;
        partitions.add_request(swap);
        Allocator::new(&registry, config.fit_strategy, 1024 * 1024)
            .do_partitioning(&mut disk_set, &mut partitions)
            .unwrap();

        tree.apply_partitioning(&host, &disk_set, &partitions, &registry)
            .unwrap();
        let kinds = tree.actions().iter().map(|a| a.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ActionKind::CreateDevice,
                ActionKind::CreateFormat,
                ActionKind::CreateDevice,
                ActionKind::CreateFormat,
            ]
        );

        tree.process_actions(&host).unwrap();
        assert!(tree.actions().is_empty());
        let fstab = tree.fstab();
        assert_eq!(fstab.entries.len(), 2);
        assert_eq!(fstab.entries[0].mountpoint, "/");
        assert_eq!(fstab.entries[0].passno, 1);
        assert_eq!(fstab.entries[1].fstype, "swap");
        assert!(!host.commands_for("mkswap").is_empty());
    }

    #[test]
    fn test_apply_fstab() {
        let (mut tree, host, registry) = populated();
        let fstab = Fstab::parse(
            "UUID=2222 / ext4 defaults 1 1\n\
             LABEL=/boot /boot ext3 defaults 1 2\n\
             /dev/sda5 swap swap defaults 0 0\n\
             /swapfile swap swap defaults 0 0\n\
             /srv/data /data none bind 0 0\n\
             proc /proc proc defaults 0 0\n\
             /dev/sdq1 /mnt ext4 defaults 0 0\n",
        );
        let unresolved = tree.apply_fstab(&host, &fstab, &registry).unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].spec, "/dev/sdq1");

        let lv = tree.get_device_by_name("vg0-root").unwrap();
        assert_eq!(
            tree.device(lv).unwrap().format().mountpoint(),
            Some(Path::new("/"))
        );
        assert!(tree.get_device_by_path(Path::new("/swapfile")).is_some());
        let bind = tree.get_device_by_path(Path::new("/srv/data")).unwrap();
        assert_eq!(
            tree.device(bind).unwrap().format().mountpoint(),
            Some(Path::new("/data"))
        );

        let written = tree.fstab();
        assert!(written.entry_by_mountpoint("/").is_some());
        assert!(written.entry_by_mountpoint("/boot").is_some());
        assert_eq!(
            written.entry_by_mountpoint("/boot").unwrap().spec,
            "LABEL=/boot"
        );
    }

    #[test]
    fn test_mtab() {
        let (mut tree, host, _) = populated();
        let sda1 = tree.get_device_by_name("sda1").unwrap();
        host.add_node("/dev/sda1");
        let format = tree.device_mut(sda1).unwrap().format_mut();
        format.set_mountpoint(Some("/boot".into()));
        format
            .setup(&host, Path::new("/mnt/sysimage"), None)
            .unwrap();
        assert_eq!(
            tree.mtab(),
            "/dev/sda1 /mnt/sysimage/boot ext3 rw 0 0\n"
        );
    }
}
