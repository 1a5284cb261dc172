// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use log::info;
use uuid::Uuid;

use crate::{
    engine::host::{execute, execute_with_input, Host},
    storage::{FormatErrorKind, StorageError, StorageResult},
};

pub const DEFAULT_CIPHER: &str = "aes-xts-plain";
pub const DEFAULT_KEY_SIZE: u32 = 512;

/// Where the key of a LUKS volume comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum LuksKey {
    Passphrase(String),
    KeyFile(PathBuf),
}

/// A LUKS encrypted volume. When set up, the plaintext device appears at
/// /dev/mapper/<map_name>.
#[derive(Clone, Debug)]
pub struct Luks {
    pub cipher: String,
    pub key_size: u32,
    key: Option<LuksKey>,
    map_name: Option<String>,
}

fn luks_error(msg: String) -> StorageError {
    StorageError::format(FormatErrorKind::Luks, msg)
}

impl Luks {
    pub fn new(
        cipher: Option<&str>,
        key_size: Option<u32>,
        key: Option<LuksKey>,
        map_name: Option<String>,
    ) -> Luks {
        Luks {
            cipher: cipher.unwrap_or(DEFAULT_CIPHER).to_string(),
            key_size: key_size.unwrap_or(DEFAULT_KEY_SIZE),
            key,
            map_name,
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn set_key(&mut self, key: Option<LuksKey>) {
        self.key = key;
    }

    /// The mapping name, `luks-<uuid>` unless one was given.
    pub fn map_name(&self, uuid: Option<&str>, device: &Path) -> String {
        match (&self.map_name, uuid) {
            (Some(name), _) => name.clone(),
            (None, Some(uuid)) => format!("luks-{uuid}"),
            (None, None) => format!(
                "luks-{}",
                device
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }

    pub fn set_map_name(&mut self, map_name: Option<String>) {
        self.map_name = map_name;
    }

    pub fn mapped_device(map_name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/mapper/{map_name}"))
    }

    /// Arguments selecting the key and the input to feed cryptsetup.
    fn key_args(&self, device: &Path) -> StorageResult<(Vec<String>, Option<Vec<u8>>)> {
        match &self.key {
            Some(LuksKey::Passphrase(p)) => Ok((
                vec!["--key-file".to_string(), "-".to_string()],
                Some(p.as_bytes().to_vec()),
            )),
            Some(LuksKey::KeyFile(f)) => Ok((
                vec!["--key-file".to_string(), f.to_string_lossy().into_owned()],
                None,
            )),
            None => Err(luks_error(format!(
                "no passphrase or key file for {}",
                device.display()
            ))),
        }
    }

    fn cryptsetup(
        host: &dyn Host,
        args: &[String],
        input: Option<&[u8]>,
        device: &Path,
        what: &str,
    ) -> StorageResult<()> {
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        execute_with_input(host, "cryptsetup", &args, input).map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::Luks,
                format!("{what} failed for {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }

    pub(super) fn status(host: &dyn Host, map_name: &str) -> bool {
        host.path_exists(&Luks::mapped_device(map_name))
    }

    pub(super) fn create(&self, host: &dyn Host, device: &Path, uuid: &Uuid) -> StorageResult<()> {
        let (key_args, input) = self.key_args(device)?;
        let mut args = vec![
            "-q".to_string(),
            "luksFormat".to_string(),
            "--cipher".to_string(),
            self.cipher.clone(),
            "--key-size".to_string(),
            self.key_size.to_string(),
            "--uuid".to_string(),
            uuid.to_string(),
        ];
        args.extend(key_args);
        args.push(device.to_string_lossy().into_owned());
        Luks::cryptsetup(host, &args, input.as_deref(), device, "luksFormat")?;
        info!("Created LUKS volume on {}", device.display());
        Ok(())
    }

    pub(super) fn setup(&self, host: &dyn Host, device: &Path, map_name: &str) -> StorageResult<()> {
        if Luks::status(host, map_name) {
            return Ok(());
        }
        let (key_args, input) = self.key_args(device)?;
        let mut args = vec![
            "luksOpen".to_string(),
            device.to_string_lossy().into_owned(),
            map_name.to_string(),
        ];
        args.extend(key_args);
        Luks::cryptsetup(host, &args, input.as_deref(), device, "luksOpen")
    }

    pub(super) fn teardown(host: &dyn Host, device: &Path, map_name: &str) -> StorageResult<()> {
        if !Luks::status(host, map_name) {
            return Ok(());
        }
        execute(host, "cryptsetup", &["luksClose", map_name]).map_err(|e| {
            StorageError::format_caused(
                FormatErrorKind::Luks,
                format!("luksClose failed for {}", device.display()),
                e,
            )
        })?;
        Ok(())
    }

    /// Add a passphrase, authorized by the current key.
    pub(super) fn add_passphrase(
        &self,
        host: &dyn Host,
        device: &Path,
        passphrase: &str,
    ) -> StorageResult<()> {
        let mut args = vec!["-q".to_string(), "luksAddKey".to_string()];
        let mut stdin = Vec::new();
        match &self.key {
            Some(LuksKey::Passphrase(old)) => {
                stdin.extend_from_slice(old.as_bytes());
                stdin.push(b'\n');
            }
            Some(LuksKey::KeyFile(f)) => {
                args.push("--key-file".to_string());
                args.push(f.to_string_lossy().into_owned());
            }
            None => {
                return Err(luks_error(format!(
                    "no passphrase or key file for {}",
                    device.display()
                )))
            }
        }
        args.push(device.to_string_lossy().into_owned());
        stdin.extend_from_slice(passphrase.as_bytes());
        stdin.push(b'\n');
        Luks::cryptsetup(host, &args, Some(&stdin), device, "luksAddKey")
    }

    pub(super) fn remove_passphrase(
        host: &dyn Host,
        device: &Path,
        passphrase: &str,
    ) -> StorageResult<()> {
        let args = vec![
            "-q".to_string(),
            "luksRemoveKey".to_string(),
            device.to_string_lossy().into_owned(),
        ];
        Luks::cryptsetup(
            host,
            &args,
            Some(passphrase.as_bytes()),
            device,
            "luksRemoveKey",
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::host::SimHost;

    use super::*;

    #[test]
    fn test_map_name() {
        let luks = Luks::new(None, None, None, None);
        let dev = Path::new("/dev/sda3");
        assert_eq!(luks.map_name(Some("abcd"), dev), "luks-abcd");
        assert_eq!(luks.map_name(None, dev), "luks-sda3");
        assert_eq!(luks.cipher, DEFAULT_CIPHER);
        assert_eq!(luks.key_size, 512);
    }

    #[test]
    fn test_missing_key_is_luks_error() {
        let host = SimHost::new();
        let luks = Luks::new(None, None, None, None);
        let err = luks.create(&host, Path::new("/dev/sda3"), &Uuid::nil()).unwrap_err();
        assert_eq!(err.format_kind(), Some(FormatErrorKind::Luks));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_open_and_close() {
        let host = SimHost::new();
        let luks = Luks::new(
            None,
            None,
            Some(LuksKey::Passphrase("secret".into())),
            None,
        );
        let dev = Path::new("/dev/sda3");
        let uuid = Uuid::parse_str("0a0d6b4c-58e1-4a3e-8f0c-2f2b1f7e9a11").unwrap();
        luks.create(&host, dev, &uuid).unwrap();
        luks.setup(&host, dev, "luks-x").unwrap();
        assert!(Luks::status(&host, "luks-x"));
        luks.setup(&host, dev, "luks-x").unwrap();
        Luks::teardown(&host, dev, "luks-x").unwrap();
        assert!(!Luks::status(&host, "luks-x"));
        assert_eq!(
            host.commands_for("cryptsetup"),
            vec![
                "cryptsetup -q luksFormat --cipher aes-xts-plain --key-size 512 \
                 --uuid 0a0d6b4c-58e1-4a3e-8f0c-2f2b1f7e9a11 --key-file - /dev/sda3",
                "cryptsetup luksOpen /dev/sda3 luks-x --key-file -",
                "cryptsetup luksClose luks-x",
            ]
        );
    }
}
