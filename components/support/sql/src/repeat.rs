/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;

/// Helper type for printing repeated strings more efficiently. You should use
/// [`repeat_sql_vars`], or [`repeat_sql_values`] over this type, but it is
/// public in case it's useful for other purposes.
#[derive(Debug, Clone)]
pub struct RepeatDisplay<'a, F> {
    count: usize,
    sep: &'a str,
    fmt_one: F,
}

impl<F> fmt::Display for RepeatDisplay<'_, F>
where
    F: Fn(usize, &mut fmt::Formatter<'_>) -> fmt::Result,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.count {
            if i != 0 {
                f.write_str(self.sep)?;
            }
            (self.fmt_one)(i, f)?;
        }
        Ok(())
    }
}

/// Construct a RepeatDisplay that will repeatedly call `fmt_one` with a
/// formatter `count` times, separated by `sep`.
pub fn repeat_display<F>(count: usize, sep: &str, fmt_one: F) -> RepeatDisplay<'_, F>
where
    F: Fn(usize, &mut fmt::Formatter<'_>) -> fmt::Result,
{
    RepeatDisplay {
        count,
        sep,
        fmt_one,
    }
}

/// Returns a value that formats as `count` instances of `?` separated by
/// commas.
pub fn repeat_sql_vars(count: usize) -> impl fmt::Display {
    repeat_display(count, ",", |_, f| f.write_str("?"))
}

/// Returns a value that formats as `count` instances of `(?)` separated by
/// commas.
pub fn repeat_sql_values(count: usize) -> impl fmt::Display {
    repeat_display(count, ",", |_, f| f.write_str("(?)"))
}

/// Returns a value that formats as `num_values` instances of
/// `(?,?,?,...)` (each with `vars_per_value` vars) separated by commas.
pub fn repeat_multi_values(num_values: usize, vars_per_value: usize) -> impl fmt::Display {
    repeat_display(num_values, ",", move |_, f| {
        write!(f, "({})", repeat_sql_vars(vars_per_value))
    })
}
