// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles invoking external binaries and the other blocking calls into the
// running system. Binaries are looked up in a fixed list of directories
// rather than through PATH; the installer environment may not set PATH
// at all. The existence of the binary is checked each time a command is
// run, and an explicit error is returned if it can not be found.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use log::{debug, warn};
use nix::mount::{mount, umount, MsFlags};
use procfs::{Current, Meminfo};

use crate::{
    engine::host::{CommandOutput, Host, MountRequest},
    storage::{StorageError, StorageResult},
};

const BINARIES_PATHS: [&str; 4] = ["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

const PROC_SWAPS: &str = "/proc/swaps";
const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Find the binary with the given name by looking in likely locations.
/// Return None if no binary was found.
fn find_binary(name: &str) -> Option<PathBuf> {
    BINARIES_PATHS
        .iter()
        .map(|pre| [pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

/// Split a mount option string into the flags the kernel takes directly
/// and the filesystem specific data string.
fn mount_flags(options: Option<&str>, bind: bool) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::empty();
    if bind {
        flags |= MsFlags::MS_BIND;
    }
    let mut data = Vec::new();
    for opt in options.unwrap_or("").split(',').filter(|o| !o.is_empty()) {
        match opt {
            "defaults" | "rw" | "auto" => {}
            "bind" => flags |= MsFlags::MS_BIND,
            "ro" => flags |= MsFlags::MS_RDONLY,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "remount" => flags |= MsFlags::MS_REMOUNT,
            other => data.push(other),
        }
    }
    let data = if data.is_empty() {
        None
    } else {
        Some(data.join(","))
    };
    (flags, data)
}

/// The host the installer is actually running on.
#[derive(Debug, Default)]
pub struct LinuxHost;

impl LinuxHost {
    pub fn new() -> LinuxHost {
        LinuxHost
    }
}

impl Host for LinuxHost {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> StorageResult<CommandOutput> {
        let executable = find_binary(program).ok_or_else(|| StorageError::Command {
            cmd: program.to_string(),
            status: None,
            output: format!(
                "executable not found in any of {}",
                BINARIES_PATHS.join(", ")
            ),
        })?;

        debug!("Running {} {}", executable.display(), args.join(" "));
        let mut child = Command::new(&executable)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                StorageError::Chained(
                    format!("Failed to execute {}", executable.display()),
                    Box::new(StorageError::Io(err)),
                )
            })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input)?;
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn mount(&self, request: &MountRequest<'_>) -> StorageResult<()> {
        fs::create_dir_all(request.target)?;
        let (flags, data) = mount_flags(request.options, request.bind);
        let fstype = if flags.contains(MsFlags::MS_BIND) {
            None
        } else {
            request.fstype
        };
        mount(
            Some(request.source),
            request.target,
            fstype,
            flags,
            data.as_deref(),
        )?;
        Ok(())
    }

    fn umount(&self, target: &Path) -> StorageResult<()> {
        umount(target)?;
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_head(&self, path: &Path, len: usize) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(len);
        fs::File::open(path)?
            .take(len as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn active_swaps(&self) -> StorageResult<Vec<PathBuf>> {
        Ok(parse_swaps(&fs::read_to_string(PROC_SWAPS)?))
    }

    fn mem_installed_kib(&self) -> StorageResult<u64> {
        Ok(Meminfo::current()?.mem_total / 1024)
    }

    fn kernel_filesystems(&self) -> StorageResult<Vec<String>> {
        Ok(parse_filesystems(&fs::read_to_string(PROC_FILESYSTEMS)?))
    }

    fn page_size(&self) -> usize {
        usize::try_from(procfs::page_size()).unwrap_or(4096)
    }

    fn settle(&self, timeout: Duration) -> StorageResult<()> {
        let timeout = format!("--timeout={}", timeout.as_secs());
        let output = self.run("udevadm", &["settle", &timeout], None)?;
        if !output.success() {
            warn!("udevadm settle did not complete: {}", output.stderr.trim());
        }
        Ok(())
    }
}

/// Device paths from the contents of /proc/swaps.
fn parse_swaps(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect()
}

/// Filesystem names from the contents of /proc/filesystems.
fn parse_filesystems(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(|fs| fs.to_string())
        .collect()
}
