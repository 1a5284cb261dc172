// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contains the types which describe deferred changes to the device tree.
//! An action is validated against the tree when it is registered and
//! carried out, in registration order, when the queue is processed.

use std::fmt::{self, Display};

use crate::engine::{devices::Device, formats::DeviceFormat, types::DeviceId};

/// A change requested of one device or of its format.
#[derive(Clone, Debug)]
pub enum DeviceAction {
    /// Add a device that does not exist yet and create it when processed.
    CreateDevice(Box<Device>),
    /// Remove an existing device from the tree and destroy it when
    /// processed.
    DestroyDevice(DeviceId),
    /// Replace the format of a device and write it when processed.
    CreateFormat(DeviceId, DeviceFormat),
    /// Erase the format of a device.
    DestroyFormat(DeviceId),
    /// Resize a device to the given size in MB.
    ResizeDevice(DeviceId, f64),
    /// Resize the format of a device to the given size in MB.
    ResizeFormat(DeviceId, f64),
}

impl DeviceAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            DeviceAction::CreateDevice(_) => ActionKind::CreateDevice,
            DeviceAction::DestroyDevice(_) => ActionKind::DestroyDevice,
            DeviceAction::CreateFormat(..) => ActionKind::CreateFormat,
            DeviceAction::DestroyFormat(_) => ActionKind::DestroyFormat,
            DeviceAction::ResizeDevice(..) => ActionKind::ResizeDevice,
            DeviceAction::ResizeFormat(..) => ActionKind::ResizeFormat,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::AsRefStr)]
pub enum ActionKind {
    #[strum(serialize = "create device")]
    CreateDevice,
    #[strum(serialize = "destroy device")]
    DestroyDevice,
    #[strum(serialize = "create format")]
    CreateFormat,
    #[strum(serialize = "destroy format")]
    DestroyFormat,
    #[strum(serialize = "resize device")]
    ResizeDevice,
    #[strum(serialize = "resize format")]
    ResizeFormat,
}

impl ActionKind {
    pub fn is_create(self) -> bool {
        matches!(self, ActionKind::CreateDevice | ActionKind::CreateFormat)
    }

    pub fn is_destroy(self) -> bool {
        matches!(self, ActionKind::DestroyDevice | ActionKind::DestroyFormat)
    }

    pub fn is_resize(self) -> bool {
        matches!(self, ActionKind::ResizeDevice | ActionKind::ResizeFormat)
    }

    pub fn is_device(self) -> bool {
        matches!(
            self,
            ActionKind::CreateDevice | ActionKind::DestroyDevice | ActionKind::ResizeDevice
        )
    }

    pub fn is_format(self) -> bool {
        !self.is_device()
    }
}

/// An action as it sits in the queue after registration.
#[derive(Clone, Debug)]
pub struct QueuedAction {
    pub kind: ActionKind,
    pub device: DeviceId,
    /// Name of the device when the action was registered.
    pub device_name: String,
    /// The device itself, for a destroy; it has already left the tree.
    pub snapshot: Option<Device>,
    /// The format a format destroy erases.
    pub orig_format: Option<DeviceFormat>,
    /// Size before a resize, in MB.
    pub orig_size: Option<f64>,
    /// Size after a resize, in MB.
    pub new_size: Option<f64>,
}

impl QueuedAction {
    pub fn new(kind: ActionKind, device: DeviceId, device_name: &str) -> QueuedAction {
        QueuedAction {
            kind,
            device,
            device_name: device_name.to_string(),
            snapshot: None,
            orig_format: None,
            orig_size: None,
            new_size: None,
        }
    }
}

impl Display for QueuedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.device_name)?;
        match (self.orig_size, self.new_size) {
            (Some(orig), Some(new)) => write!(f, " ({orig} MB -> {new} MB)"),
            (None, Some(new)) => write!(f, " (to {new} MB)"),
            _ => Ok(()),
        }
    }
}
