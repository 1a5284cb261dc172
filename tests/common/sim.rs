// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use installer_storage::engine::{
    BlockDeviceInfo, DeviceClass, DeviceTree, FormatRegistry, SimHost, SimProbe, StorageConfig,
};

/// A tree over empty simulated disks of the given sizes in MB. The disks
/// get fresh labels and their device nodes exist on the host.
pub fn empty_disks(
    disks: &[(&str, f64)],
    config: &StorageConfig,
) -> (DeviceTree, SimHost, FormatRegistry) {
    let config = StorageConfig {
        reinitialize_disks: true,
        ..config.clone()
    };
    let host = SimHost::new();
    host.set_mem_mb(2048);
    let registry = FormatRegistry::new();
    let records = disks
        .iter()
        .map(|(name, size)| {
            host.add_node(format!("/dev/{name}"));
            BlockDeviceInfo::new(name, DeviceClass::Disk, *size)
        })
        .collect();
    let mut tree = DeviceTree::new(&config);
    tree.populate(&mut SimProbe::new(records), &host, &registry)
        .expect("simulated disks always populate");
    (tree, host, registry)
}
