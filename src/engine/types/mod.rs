// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, AddAssign, Deref, Div, Mul, Sub, SubAssign},
};

use serde_derive::{Deserialize, Serialize};

pub use crate::engine::types::actions::{ActionKind, DeviceAction, QueuedAction};

mod actions;

/// Bytes in a megabyte, the unit all request and format sizes are given in.
pub const MEGABYTE: u64 = 1 << 20;

/// A count of logical sectors of the disk it refers to.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Sectors(pub u64);

impl Deref for Sectors {
    type Target = u64;

    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl Display for Sectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sectors", self.0)
    }
}

impl Add for Sectors {
    type Output = Sectors;

    fn add(self, rhs: Sectors) -> Sectors {
        Sectors(self.0 + rhs.0)
    }
}

impl AddAssign for Sectors {
    fn add_assign(&mut self, rhs: Sectors) {
        self.0 += rhs.0;
    }
}

impl Sub for Sectors {
    type Output = Sectors;

    fn sub(self, rhs: Sectors) -> Sectors {
        Sectors(self.0 - rhs.0)
    }
}

impl SubAssign for Sectors {
    fn sub_assign(&mut self, rhs: Sectors) {
        self.0 -= rhs.0;
    }
}

impl Mul<u64> for Sectors {
    type Output = Sectors;

    fn mul(self, rhs: u64) -> Sectors {
        Sectors(self.0 * rhs)
    }
}

impl Div<u64> for Sectors {
    type Output = Sectors;

    fn div(self, rhs: u64) -> Sectors {
        Sectors(self.0 / rhs)
    }
}

impl Sum for Sectors {
    fn sum<I: Iterator<Item = Sectors>>(iter: I) -> Sectors {
        iter.fold(Sectors(0), |acc, s| acc + s)
    }
}

/// Convert a sector count into megabytes.
pub fn sectors_to_mb(sectors: Sectors, sector_size: u64) -> f64 {
    (*sectors * sector_size) as f64 / MEGABYTE as f64
}

/// Convert megabytes into a whole number of sectors, rounding down.
/// Negative sizes convert to zero sectors.
pub fn mb_to_sectors(size: f64, sector_size: u64) -> Sectors {
    if size <= 0.0 {
        return Sectors(0);
    }
    Sectors((size * MEGABYTE as f64 / sector_size as f64).floor() as u64)
}

/// Convert a count of bytes into megabytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MEGABYTE as f64
}

/// Index of a device in a device store. Indices are never reused, so an id
/// that outlives its device simply stops resolving.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DeviceId(usize);

impl DeviceId {
    pub(crate) fn new(index: usize) -> DeviceId {
        DeviceId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
