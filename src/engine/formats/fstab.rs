// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, fmt};

use log::debug;

/// One line of an fstab.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FstabEntry {
    /// A device path, `LABEL=` or `UUID=` spec, or a pseudo filesystem name.
    pub spec: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: String,
    pub dump: u32,
    pub passno: u32,
}

impl FstabEntry {
    /// Parse a single line. Comments, blank lines, malformed lines and
    /// `noauto` entries yield None.
    pub fn parse(line: &str) -> Option<FstabEntry> {
        if line.starts_with('#') {
            return None;
        }
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.len() < 4 || fields.len() > 6 {
            if !fields.is_empty() {
                debug!("Skipping malformed fstab line \"{}\"", line.trim());
            }
            return None;
        }
        if fields[3].contains("noauto") {
            return None;
        }
        let number = |i: usize| -> Option<u32> {
            match fields.get(i) {
                Some(field) => field.parse::<u32>().ok(),
                None => Some(0),
            }
        };
        Some(FstabEntry {
            spec: fields[0].to_string(),
            mountpoint: fields[1].to_string(),
            fstype: fields[2].to_string(),
            options: fields[3].to_string(),
            dump: number(4)?,
            passno: number(5)?,
        })
    }

    pub fn is_bind(&self) -> bool {
        self.options.split(',').any(|o| o == "bind")
    }

    /// The label of a `LABEL=` spec.
    pub fn label(&self) -> Option<&str> {
        self.spec.strip_prefix("LABEL=")
    }

    /// The uuid of a `UUID=` spec.
    pub fn uuid(&self) -> Option<&str> {
        self.spec.strip_prefix("UUID=")
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<23} {:<23} {:<7} {:<15} {} {}",
            self.spec, self.mountpoint, self.fstype, self.options, self.dump, self.passno
        )
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Fstab {
    pub entries: Vec<FstabEntry>,
}

impl Fstab {
    pub fn parse(contents: &str) -> Fstab {
        Fstab {
            entries: contents.lines().filter_map(FstabEntry::parse).collect(),
        }
    }

    pub fn entry_by_mountpoint(&self, mountpoint: &str) -> Option<&FstabEntry> {
        self.entries.iter().find(|e| e.mountpoint == mountpoint)
    }

    /// mountpoint -> (type, options) for every entry.
    pub fn mapping(&self) -> BTreeMap<String, (String, String)> {
        self.entries
            .iter()
            .map(|e| {
                (
                    e.mountpoint.clone(),
                    (e.fstype.clone(), e.options.clone()),
                )
            })
            .collect()
    }
}

impl fmt::Display for Fstab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_rules() {
        let fstab = Fstab::parse(
            "# comment\n\
             \n\
             /dev/sda1 /boot ext3 defaults\n\
             LABEL=/ / ext3 defaults 1\n\
             /dev/sda3 swap swap pri=3 0 0\n\
             /dev/cdrom /media iso9660 noauto,ro 0 0\n\
             too few fields\n\
             a b c d e f g\n",
        );
        assert_eq!(fstab.entries.len(), 3);
        assert_eq!(fstab.entries[0].dump, 0);
        assert_eq!(fstab.entries[0].passno, 0);
        assert_eq!(fstab.entries[1].dump, 1);
        assert_eq!(fstab.entries[1].label(), Some("/"));
        assert!(fstab.entry_by_mountpoint("/media").is_none());
    }

    #[test]
    fn test_render() {
        let entry = FstabEntry {
            spec: "UUID=1234".into(),
            mountpoint: "/".into(),
            fstype: "ext4".into(),
            options: "defaults".into(),
            dump: 1,
            passno: 1,
        };
        assert_eq!(
            entry.to_string(),
            "UUID=1234               /                       ext4    defaults        1 1"
        );
    }

    fn entry_strategy() -> impl Strategy<Value = FstabEntry> {
        (
            "/dev/[a-z]{3}[0-9]{1,2}",
            "/[a-z]{1,8}(/[a-z]{1,8})?",
            prop::sample::select(vec!["ext2", "ext3", "ext4", "xfs", "swap", "vfat"]),
            prop::sample::select(vec!["defaults", "ro", "pri=3", "umask=0077,shortname=winnt"]),
            0u32..2,
            0u32..3,
        )
            .prop_map(|(spec, mountpoint, fstype, options, dump, passno)| FstabEntry {
                spec,
                mountpoint,
                fstype: fstype.to_string(),
                options: options.to_string(),
                dump,
                passno,
            })
    }

    proptest! {
        #[test]
        /// Rendering then parsing gives back the same table, and rendering
        /// again gives the same text.
        fn fstab_round_trip(entries in prop::collection::vec(entry_strategy(), 0..8)) {
            let fstab = Fstab { entries };
            let text = fstab.to_string();
            let parsed = Fstab::parse(&text);
            prop_assert_eq!(parsed.mapping(), fstab.mapping());
            prop_assert_eq!(&parsed, &fstab);
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
