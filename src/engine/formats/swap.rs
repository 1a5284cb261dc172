// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use log::info;

use crate::{
    engine::host::{execute, Host},
    storage::{FormatErrorKind, StorageError, StorageResult},
};

const MAX_PRIORITY: i32 = 32767;

const OLD_SWAP_SIGNATURE: &[u8] = b"SWAP-SPACE";
const SUSPEND_SIGNATURES: [&[u8]; 2] = [b"S1SUSPEND\0", b"S2SUSPEND\0"];

/// Swap space on a device or in a file.
#[derive(Clone, Debug, Default)]
pub struct SwapSpace {
    priority: Option<i32>,
    pub label: Option<String>,
}

impl SwapSpace {
    pub fn new(priority: Option<i32>, label: Option<String>) -> StorageResult<SwapSpace> {
        let mut swap = SwapSpace {
            priority: None,
            label,
        };
        swap.set_priority(priority)?;
        Ok(swap)
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Option<i32>) -> StorageResult<()> {
        if let Some(p) = priority {
            if !(0..=MAX_PRIORITY).contains(&p) {
                return Err(StorageError::format(
                    FormatErrorKind::SwapSpace,
                    format!("swap priority {p} is outside 0-{MAX_PRIORITY}"),
                ));
            }
        }
        self.priority = priority;
        Ok(())
    }

    /// Mount options recorded in fstab.
    pub fn options(&self) -> String {
        match self.priority {
            Some(p) => format!("pri={p}"),
            None => "defaults".to_string(),
        }
    }

    /// Take the priority from an fstab option string.
    pub fn set_options(&mut self, options: &str) -> StorageResult<()> {
        let priority = options
            .split(',')
            .filter_map(|o| o.strip_prefix("pri="))
            .map(|p| p.parse::<i32>())
            .last()
            .transpose()?;
        self.set_priority(priority)
    }

    pub(super) fn status(host: &dyn Host, device: &Path) -> bool {
        host.active_swaps()
            .map(|swaps| swaps.iter().any(|s| s == device))
            .unwrap_or(false)
    }

    pub(super) fn create(&self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        let device_str = device.to_string_lossy();
        let mut args: Vec<&str> = Vec::new();
        if let Some(label) = self.label.as_deref() {
            args.extend(["-L", label]);
        }
        args.push(&device_str);
        execute(host, "mkswap", &args).map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::SwapSpace,
                format!("mkswap failed for {}", device.display()),
                e,
            )
        })?;
        info!("Created swap space on {}", device.display());
        Ok(())
    }

    /// Refuse swap areas that must not be activated: the old version 0
    /// layout and areas holding a suspended system image. Both carry a
    /// ten byte signature at the end of the first page.
    fn check_signature(host: &dyn Host, device: &Path) -> StorageResult<()> {
        let page_size = host.page_size();
        let head = match host.read_head(device, page_size) {
            Ok(head) => head,
            Err(_) => return Ok(()),
        };
        if head.len() != page_size || page_size < OLD_SWAP_SIGNATURE.len() {
            return Ok(());
        }
        let signature = &head[page_size - OLD_SWAP_SIGNATURE.len()..];
        if signature == OLD_SWAP_SIGNATURE {
            return Err(StorageError::OldSwap(device.to_path_buf()));
        }
        if SUSPEND_SIGNATURES.iter().any(|s| *s == signature) {
            return Err(StorageError::Suspend(device.to_path_buf()));
        }
        Ok(())
    }

    pub(super) fn setup(&self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        if SwapSpace::status(host, device) {
            return Ok(());
        }
        SwapSpace::check_signature(host, device)?;

        let device_str = device.to_string_lossy();
        let priority = self.priority.map(|p| p.to_string());
        let mut args: Vec<&str> = Vec::new();
        if let Some(priority) = priority.as_deref() {
            args.extend(["-p", priority]);
        }
        args.push(&device_str);
        execute(host, "swapon", &args).map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::SwapSpace,
                format!("swapon failed for {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }

    pub(super) fn teardown(&self, host: &dyn Host, device: &Path) -> StorageResult<()> {
        if !SwapSpace::status(host, device) {
            return Ok(());
        }
        execute(host, "swapoff", &[&device.to_string_lossy()]).map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::SwapSpace,
                format!("swapoff failed for {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::engine::host::SimHost;

    use super::*;

    fn page_with_signature(signature: &[u8]) -> Vec<u8> {
        let mut page = vec![0u8; 4096];
        page[4096 - signature.len()..].copy_from_slice(signature);
        page
    }

    #[test]
    fn test_priority_bounds() {
        assert!(SwapSpace::new(Some(32767), None).is_ok());
        assert!(SwapSpace::new(Some(-1), None).is_err());
        assert!(SwapSpace::new(Some(40000), None).is_err());
        let mut swap = SwapSpace::default();
        swap.set_options("defaults,pri=5").unwrap();
        assert_eq!(swap.options(), "pri=5");
    }

    #[test]
    /// Old style and suspended swap areas are reported as such instead of
    /// being activated.
    fn test_signatures_refused() {
        let host = SimHost::new();
        let swap = SwapSpace::default();

        host.set_head("/dev/sda2", page_with_signature(b"SWAP-SPACE"));
        assert_matches!(
            swap.setup(&host, Path::new("/dev/sda2")),
            Err(StorageError::OldSwap(_))
        );
        host.set_head("/dev/sda3", page_with_signature(b"S2SUSPEND\0"));
        assert_matches!(
            swap.setup(&host, Path::new("/dev/sda3")),
            Err(StorageError::Suspend(_))
        );
        assert!(host.commands_for("swapon").is_empty());
    }

    #[test]
    fn test_setup_and_teardown() {
        let host = SimHost::new();
        let swap = SwapSpace::new(Some(3), None).unwrap();
        let dev = Path::new("/dev/sda2");
        host.set_head(dev, page_with_signature(b"SWAPSPACE2"));

        swap.setup(&host, dev).unwrap();
        assert!(SwapSpace::status(&host, dev));
        swap.setup(&host, dev).unwrap();
        assert_eq!(host.commands_for("swapon"), vec!["swapon -p 3 /dev/sda2"]);

        swap.teardown(&host, dev).unwrap();
        swap.teardown(&host, dev).unwrap();
        assert_eq!(host.commands_for("swapoff").len(), 1);
    }
}
