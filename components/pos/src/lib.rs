/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The device-side engine of the offline-first POS application: an embedded
//! sqlite store with a narrow mutation API, an append-only financial ledger,
//! and a tiered bidirectional sync pipeline against the central server.
//!
//! The UI layers sit entirely on top of [`store::Store`] (for mutations and
//! reads) and [`sync::engine::SyncEngine`] (for synchronization); nothing
//! else is expected to leak out of this crate.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod db;
pub mod error;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use store::Store;
pub use sync::engine::{SyncEngine, SyncState};
