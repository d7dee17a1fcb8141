/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The central sync server: the meeting point for every device's uploads and
//! downloads. All state lives in a single sqlite store whose tables mirror
//! the device schema, keyed by `(id, device_id)` so records from different
//! origins coexist, with a per-row `server_updated_at` driving download
//! cursors.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod routes;
pub mod schema;
pub mod store;

pub use error::{ServerError, ServerResult};
pub use store::ServerDb;
