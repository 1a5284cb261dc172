// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A simulated host. Commands are recorded rather than run, and the few
//! side effects the engine depends on (device nodes appearing after a table
//! commit or volume creation, swap activation, mounts) are mimicked so that
//! whole install plans can be exercised without touching real devices.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    engine::host::{CommandOutput, Host, MountRequest},
    storage::{StorageError, StorageResult},
};

const DEFAULT_MEM_KIB: u64 = 2 * 1024 * 1024;

const SIM_FILESYSTEMS: &[&str] = &[
    "ext2", "ext3", "ext4", "xfs", "btrfs", "vfat", "iso9660", "ntfs", "nfs", "nfs4", "proc",
    "sysfs", "devpts", "tmpfs",
];

#[derive(Debug)]
pub struct SimHost {
    commands: RefCell<Vec<String>>,
    failures: RefCell<HashMap<String, (i32, String)>>,
    outputs: RefCell<HashMap<String, String>>,
    nodes: RefCell<BTreeSet<PathBuf>>,
    heads: RefCell<HashMap<PathBuf, Vec<u8>>>,
    mounts: RefCell<BTreeMap<PathBuf, PathBuf>>,
    swaps: RefCell<Vec<PathBuf>>,
    mem_kib: Cell<u64>,
}

impl Default for SimHost {
    fn default() -> SimHost {
        SimHost::new()
    }
}

impl SimHost {
    pub fn new() -> SimHost {
        SimHost {
            commands: RefCell::new(Vec::new()),
            failures: RefCell::new(HashMap::new()),
            outputs: RefCell::new(HashMap::new()),
            nodes: RefCell::new(BTreeSet::new()),
            heads: RefCell::new(HashMap::new()),
            mounts: RefCell::new(BTreeMap::new()),
            swaps: RefCell::new(Vec::new()),
            mem_kib: Cell::new(DEFAULT_MEM_KIB),
        }
    }

    /// Set the amount of installed memory.
    pub fn set_mem_mb(&self, mem_mb: u64) {
        self.mem_kib.set(mem_mb * 1024);
    }

    /// Make a device node or file visible.
    pub fn add_node(&self, path: impl Into<PathBuf>) {
        self.nodes.borrow_mut().insert(path.into());
    }

    pub fn remove_node(&self, path: &Path) {
        self.nodes.borrow_mut().remove(path);
    }

    /// Set the leading bytes of a device, as read by `read_head`.
    pub fn set_head(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        let path = path.into();
        self.add_node(path.clone());
        self.heads.borrow_mut().insert(path, bytes);
    }

    /// Make every later invocation of `program` exit with `status`.
    pub fn fail_command(&self, program: &str, status: i32, stderr: &str) {
        self.failures
            .borrow_mut()
            .insert(program.to_string(), (status, stderr.to_string()));
    }

    pub fn clear_failure(&self, program: &str) {
        self.failures.borrow_mut().remove(program);
    }

    /// Make every later invocation of `program` print `stdout`.
    pub fn set_output(&self, program: &str, stdout: &str) {
        self.outputs
            .borrow_mut()
            .insert(program.to_string(), stdout.to_string());
    }

    /// Every command run so far, as a program followed by its arguments.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    /// Commands run so far whose program is `program`.
    pub fn commands_for(&self, program: &str) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter(|c| c.split(' ').next() == Some(program))
            .cloned()
            .collect()
    }

    /// The source mounted on `target`, if any.
    pub fn mounted_at(&self, target: &Path) -> Option<PathBuf> {
        self.mounts.borrow().get(target).cloned()
    }

    /// Mimic the side effects of a successful command that later steps of
    /// an install observe through the host.
    fn simulate(&self, program: &str, args: &[&str], input: Option<&[u8]>) {
        match (program, args) {
            ("sfdisk", _) => {
                if let Some(input) = input {
                    for line in String::from_utf8_lossy(input).lines() {
                        if let Some((node, _)) = line.split_once(" : ") {
                            if node.starts_with("/dev/") {
                                self.add_node(node.trim());
                            }
                        }
                    }
                }
            }
            ("swapon", [.., dev]) => self.swaps.borrow_mut().push(PathBuf::from(dev)),
            ("swapoff", [dev]) => self.swaps.borrow_mut().retain(|s| s != Path::new(dev)),
            ("losetup", ["-d", dev]) => self.remove_node(Path::new(dev)),
            ("losetup", [dev, _file]) => self.add_node(*dev),
            ("cryptsetup", ["luksOpen", _dev, name, ..]) => {
                self.add_node(format!("/dev/mapper/{name}"));
            }
            ("cryptsetup", ["luksClose", name]) => {
                self.remove_node(&PathBuf::from(format!("/dev/mapper/{name}")));
            }
            ("lvm", ["lvcreate", .., "-n", lv, vg]) => {
                self.add_node(format!(
                    "/dev/mapper/{}-{}",
                    vg.replace('-', "--"),
                    lv.replace('-', "--")
                ));
            }
            _ => {}
        }
    }
}

impl Host for SimHost {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> StorageResult<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.commands.borrow_mut().push(line);

        if let Some((status, stderr)) = self.failures.borrow().get(program) {
            return Ok(CommandOutput {
                status: Some(*status),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }

        self.simulate(program, args, input);
        Ok(CommandOutput {
            status: Some(0),
            stdout: self
                .outputs
                .borrow()
                .get(program)
                .cloned()
                .unwrap_or_default(),
            stderr: String::new(),
        })
    }

    fn mount(&self, request: &MountRequest<'_>) -> StorageResult<()> {
        let mut mounts = self.mounts.borrow_mut();
        if mounts.contains_key(request.target) {
            return Err(StorageError::Msg(format!(
                "{} is already a mount point",
                request.target.display()
            )));
        }
        mounts.insert(request.target.to_path_buf(), request.source.to_path_buf());
        Ok(())
    }

    fn umount(&self, target: &Path) -> StorageResult<()> {
        match self.mounts.borrow_mut().remove(target) {
            Some(_) => Ok(()),
            None => Err(StorageError::Msg(format!(
                "{} is not mounted",
                target.display()
            ))),
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.nodes.borrow().contains(path)
    }

    fn read_head(&self, path: &Path, len: usize) -> StorageResult<Vec<u8>> {
        match self.heads.borrow().get(path) {
            Some(bytes) => Ok(bytes.iter().take(len).copied().collect()),
            None if self.path_exists(path) => Ok(vec![0; len]),
            None => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ))),
        }
    }

    fn active_swaps(&self) -> StorageResult<Vec<PathBuf>> {
        Ok(self.swaps.borrow().clone())
    }

    fn mem_installed_kib(&self) -> StorageResult<u64> {
        Ok(self.mem_kib.get())
    }

    fn kernel_filesystems(&self) -> StorageResult<Vec<String>> {
        Ok(SIM_FILESYSTEMS.iter().map(|s| s.to_string()).collect())
    }

    fn page_size(&self) -> usize {
        4096
    }

    fn settle(&self, timeout: Duration) -> StorageResult<()> {
        self.commands
            .borrow_mut()
            .push(format!("udevadm settle --timeout={}", timeout.as_secs()));
        Ok(())
    }
}
