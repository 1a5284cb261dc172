// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Partition requests and the allocator that places them.

mod autopart;
mod requests;
mod sanity;

pub use self::{
    autopart::{
        auto_create_partition_requests, best_part_type, do_auto_partition, swap_suggestion,
        Allocator,
    },
    requests::{
        sanity_check_mountpoint, DeleteSpec, PartitionSpec, Partitions, RequestKind, RequestSpec,
    },
    sanity::SanityReport,
};
