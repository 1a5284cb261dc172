// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, num, path::PathBuf, str};

pub type StorageResult<T> = Result<T, StorageError>;

/// The operation of a format that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
pub enum FormatErrorKind {
    Create,
    Destroy,
    Setup,
    Teardown,
    Resize,
    Migrate,
    Label,
    Check,
    Luks,
    PhysicalVolume,
    SwapSpace,
}

#[derive(Debug)]
pub enum StorageError {
    Msg(String),
    Chained(String, Box<StorageError>),

    /// A device lifecycle precondition was violated.
    Device(String),
    /// A structural invariant of the device tree was violated.
    DeviceTree(String),
    /// A format operation failed, possibly because of a failed tool.
    Format {
        kind: FormatErrorKind,
        msg: String,
        cause: Option<Box<StorageError>>,
    },
    /// The swap area uses the obsolete version 0 layout.
    OldSwap(PathBuf),
    /// The swap area holds a suspended image.
    Suspend(PathBuf),
    /// Allocation could not satisfy a hard requirement.
    Partitioning(String),
    /// Allocation succeeded but violates a recommendation.
    PartitioningWarning(String),
    /// A requested size is outside the range the device can hold.
    InvalidSize(String),
    Lvm(String),
    /// An external tool ran and failed, or could not be run at all.
    Command {
        cmd: String,
        status: Option<i32>,
        output: String,
    },

    Io(io::Error),
    Nix(nix::Error),
    Proc(procfs::ProcError),
    Serde(serde_json::Error),
    Regex(regex::Error),
    ParseInt(num::ParseIntError),
    ParseFloat(num::ParseFloatError),
    Utf8(str::Utf8Error),
    #[cfg(feature = "udev")]
    Udev(libudev::Error),
}

impl StorageError {
    /// Construct a format error without an underlying cause.
    pub fn format(kind: FormatErrorKind, msg: impl Into<String>) -> StorageError {
        StorageError::Format {
            kind,
            msg: msg.into(),
            cause: None,
        }
    }

    /// Construct a format error caused by some other error, usually a
    /// failed tool invocation.
    pub fn format_caused(
        kind: FormatErrorKind,
        msg: impl Into<String>,
        cause: StorageError,
    ) -> StorageError {
        StorageError::Format {
            kind,
            msg: msg.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The exit status of the failed tool anywhere in this error's chain.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            StorageError::Command { status, .. } => *status,
            StorageError::Chained(_, cause) => cause.exit_status(),
            StorageError::Format {
                cause: Some(cause), ..
            } => cause.exit_status(),
            _ => None,
        }
    }

    /// The format operation that failed, if this is a format error.
    pub fn format_kind(&self) -> Option<FormatErrorKind> {
        match self {
            StorageError::Format { kind, .. } => Some(*kind),
            StorageError::Chained(_, cause) => cause.format_kind(),
            _ => None,
        }
    }

    /// Whether the caller may adjust its input and try again. Device and
    /// device tree errors are caller logic errors and are never retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StorageError::Partitioning(_)
            | StorageError::PartitioningWarning(_)
            | StorageError::OldSwap(_)
            | StorageError::Suspend(_)
            | StorageError::Command { .. }
            | StorageError::Format { .. }
            | StorageError::InvalidSize(_) => true,
            StorageError::Chained(_, cause) => cause.is_recoverable(),
            _ => false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Msg(s) => write!(f, "{s}"),
            StorageError::Chained(s, cause) => write!(f, "{s}; caused by: {cause}"),
            StorageError::Device(s) => write!(f, "Device error: {s}"),
            StorageError::DeviceTree(s) => write!(f, "Device tree error: {s}"),
            StorageError::Format { kind, msg, cause } => match cause {
                Some(cause) => write!(f, "Format {kind} error: {msg}; caused by: {cause}"),
                None => write!(f, "Format {kind} error: {msg}"),
            },
            StorageError::OldSwap(path) => write!(
                f,
                "Swap space on {} uses the old version 0 format and must be reinitialized",
                path.display()
            ),
            StorageError::Suspend(path) => write!(
                f,
                "Swap space on {} holds a suspended system image",
                path.display()
            ),
            StorageError::Partitioning(s) => write!(f, "Partitioning error: {s}"),
            StorageError::PartitioningWarning(s) => write!(f, "Partitioning warning: {s}"),
            StorageError::InvalidSize(s) => write!(f, "Invalid size: {s}"),
            StorageError::Lvm(s) => write!(f, "LVM error: {s}"),
            StorageError::Command {
                cmd,
                status,
                output,
            } => match status {
                Some(status) => write!(
                    f,
                    "Command \"{cmd}\" failed with exit status {status}: {output}"
                ),
                None => write!(f, "Command \"{cmd}\" could not be executed: {output}"),
            },
            StorageError::Io(err) => write!(f, "IO error: {err}"),
            StorageError::Nix(err) => write!(f, "Nix error: {err}"),
            StorageError::Proc(err) => write!(f, "procfs error: {err}"),
            StorageError::Serde(err) => write!(f, "Serde error: {err}"),
            StorageError::Regex(err) => write!(f, "Regex error: {err}"),
            StorageError::ParseInt(err) => write!(f, "Integer parse error: {err}"),
            StorageError::ParseFloat(err) => write!(f, "Float parse error: {err}"),
            StorageError::Utf8(err) => write!(f, "Utf8 error: {err}"),
            #[cfg(feature = "udev")]
            StorageError::Udev(err) => write!(f, "Udev error: {err}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Chained(_, cause) => Some(cause.as_ref()),
            StorageError::Format {
                cause: Some(cause), ..
            } => Some(cause.as_ref()),
            StorageError::Io(err) => Some(err),
            StorageError::Nix(err) => Some(err),
            StorageError::Proc(err) => Some(err),
            StorageError::Serde(err) => Some(err),
            StorageError::Regex(err) => Some(err),
            StorageError::ParseInt(err) => Some(err),
            StorageError::ParseFloat(err) => Some(err),
            StorageError::Utf8(err) => Some(err),
            #[cfg(feature = "udev")]
            StorageError::Udev(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> StorageError {
        StorageError::Io(err)
    }
}

impl From<nix::Error> for StorageError {
    fn from(err: nix::Error) -> StorageError {
        StorageError::Nix(err)
    }
}

impl From<procfs::ProcError> for StorageError {
    fn from(err: procfs::ProcError) -> StorageError {
        StorageError::Proc(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> StorageError {
        StorageError::Serde(err)
    }
}

impl From<regex::Error> for StorageError {
    fn from(err: regex::Error) -> StorageError {
        StorageError::Regex(err)
    }
}

impl From<num::ParseIntError> for StorageError {
    fn from(err: num::ParseIntError) -> StorageError {
        StorageError::ParseInt(err)
    }
}

impl From<num::ParseFloatError> for StorageError {
    fn from(err: num::ParseFloatError) -> StorageError {
        StorageError::ParseFloat(err)
    }
}

impl From<str::Utf8Error> for StorageError {
    fn from(err: str::Utf8Error) -> StorageError {
        StorageError::Utf8(err)
    }
}

#[cfg(feature = "udev")]
impl From<libudev::Error> for StorageError {
    fn from(err: libudev::Error) -> StorageError {
        StorageError::Udev(err)
    }
}
