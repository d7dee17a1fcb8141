/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Shared sync vocabulary for the POS engine: the registry of synchronized
//! tables (with their dependency tiers and column metadata), the dynamic
//! record payload that crosses the wire, and the request/response DTOs spoken
//! by both the client engine and the sync server.

#![warn(rust_2018_idioms)]

mod record;
mod status;
mod table;
mod wire;

pub use record::{random_id, sql_to_wire, Record, RecordError};
pub use status::{EntryType, QueueStatus, SyncStatus};
pub use table::{Column, ColumnKind, ForeignRef, SyncTable, TIER_ORDER};
pub use wire::*;

/// For use with `#[serde(skip_serializing_if = )]`
#[inline]
pub fn is_default<T: PartialEq + Default>(v: &T) -> bool {
    *v == T::default()
}
