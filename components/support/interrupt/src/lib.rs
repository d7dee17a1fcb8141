/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

// Helps manage "interruptable" things across our various crates.

#![warn(rust_2018_idioms)]

mod handle;

pub use handle::{InterruptHandle, InterruptScope};

/// Represents the state of something that may be interrupted. Decoupled from
/// the interrupt mechanics so that things which want to check if they have
/// been interrupted don't need to know who might interrupt them.
pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> std::result::Result<(), Interrupted> {
        if self.was_interrupted() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

/// A convenience implementation, should only be used in tests.
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// The error returned by err_if_interrupted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("The operation was interrupted")]
pub struct Interrupted;
