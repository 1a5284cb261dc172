// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The boundary between the storage engine and the operating system.
//! Everything that runs a tool, mounts a filesystem, or asks the kernel
//! about its state goes through a `Host`, so that the whole engine can be
//! driven against a simulated machine.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::storage::{StorageError, StorageResult};

pub use self::{linux::LinuxHost, sim::SimHost};

mod linux;
mod sim;

/// Captured result of running an external tool.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// Exit status; None if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Arguments to a single mount call.
#[derive(Clone, Copy, Debug)]
pub struct MountRequest<'a> {
    pub source: &'a Path,
    pub target: &'a Path,
    pub fstype: Option<&'a str>,
    pub options: Option<&'a str>,
    pub bind: bool,
}

pub trait Host {
    /// Run an external tool, optionally feeding it input on stdin.
    /// Returns an error only if the tool could not be located or spawned;
    /// a non-zero exit status is reported in the output.
    fn run(&self, program: &str, args: &[&str], input: Option<&[u8]>)
        -> StorageResult<CommandOutput>;

    fn mount(&self, request: &MountRequest<'_>) -> StorageResult<()>;

    fn umount(&self, target: &Path) -> StorageResult<()>;

    fn path_exists(&self, path: &Path) -> bool;

    /// Read up to `len` bytes from the beginning of a device or file.
    fn read_head(&self, path: &Path, len: usize) -> StorageResult<Vec<u8>>;

    /// Devices and files currently in use as swap.
    fn active_swaps(&self) -> StorageResult<Vec<PathBuf>>;

    /// Installed memory in KiB.
    fn mem_installed_kib(&self) -> StorageResult<u64>;

    /// Filesystem types the running kernel can mount.
    fn kernel_filesystems(&self) -> StorageResult<Vec<String>>;

    fn page_size(&self) -> usize;

    /// Wait for udev to finish processing events, at most `timeout`.
    fn settle(&self, timeout: Duration) -> StorageResult<()>;
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run a tool and return its standard output. A non-zero exit status is an
/// error carrying the status and the tool's diagnostic output.
pub fn execute(host: &dyn Host, program: &str, args: &[&str]) -> StorageResult<String> {
    execute_with_input(host, program, args, None)
}

/// Like `execute`, but feeds `input` to the tool on stdin.
pub fn execute_with_input(
    host: &dyn Host,
    program: &str,
    args: &[&str],
    input: Option<&[u8]>,
) -> StorageResult<String> {
    let output = host.run(program, args, input)?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(StorageError::Command {
            cmd: command_line(program, args),
            status: output.status,
            output: if output.stderr.is_empty() {
                output.stdout
            } else {
                output.stderr
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    /// A failing tool surfaces its exit status and stderr.
    fn test_execute_failure_carries_status() {
        let host = SimHost::new();
        host.fail_command("mke2fs", 8, "bad superblock");
        let err = execute(&host, "mke2fs", &["/dev/sda1"]).unwrap_err();
        assert_eq!(err.exit_status(), Some(8));
        assert_matches!(err, StorageError::Command { ref cmd, .. } if cmd == "mke2fs /dev/sda1");
    }

    #[test]
    fn test_execute_success_returns_stdout() {
        let host = SimHost::new();
        host.set_output("blkid", "ext4\n");
        assert_eq!(execute(&host, "blkid", &[]).unwrap(), "ext4\n");
        assert_eq!(host.commands(), vec!["blkid".to_string()]);
    }
}
