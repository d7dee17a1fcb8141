/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::{Interrupted, Interruptee};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The owning side of an interruptable operation.
///
///   - The long-running side calls `begin_interrupt_scope()` when an
///     operation starts and sprinkles `err_if_interrupted()` checks through
///     the work (loops are a particularly good place for these).
///   - Any other thread may call `interrupt()`, which flags every scope
///     created before that call. Scopes created afterwards start clean.
///
/// Checks are a single relaxed atomic load; this cannot interrupt external
/// code such as an in-flight HTTP request, only the checkpoints between them.
#[derive(Debug, Default)]
pub struct InterruptHandle {
    counter: Arc<AtomicUsize>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_interrupt_scope(&self) -> InterruptScope {
        InterruptScope {
            start_value: self.counter.load(Ordering::Relaxed),
            counter: Arc::clone(&self.counter),
        }
    }

    /// Interrupt every scope previously begun on this handle.
    pub fn interrupt(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Scope for one interruptable operation, handed to the code doing the work.
#[derive(Clone, Debug)]
pub struct InterruptScope {
    start_value: usize,
    counter: Arc<AtomicUsize>,
}

impl InterruptScope {
    #[inline]
    fn check_interrupted(&self) -> bool {
        self.counter.load(Ordering::Relaxed) != self.start_value
    }
}

impl Interruptee for InterruptScope {
    #[inline]
    fn was_interrupted(&self) -> bool {
        self.check_interrupted()
    }

    #[inline]
    fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.check_interrupted() {
            return Err(Interrupted);
        }
        Ok(())
    }
}
