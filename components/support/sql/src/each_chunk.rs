/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{self, limits::Limit, types::ToSql};

/// Returns SQLITE_LIMIT_VARIABLE_NUMBER as read from an in-memory connection
/// and cached. That means this will return the wrong value if it's set to a
/// lower value for a connection, but doing so is rare enough that we
/// explicitly don't support it (why would you want to lower this at runtime?).
pub fn default_max_variable_number() -> usize {
    lazy_static! {
        static ref MAX_VARIABLE_NUMBER: usize = {
            let conn = rusqlite::Connection::open_in_memory()
                .expect("Failed to initialize in-memory connection (out of memory?)");

            let limit = conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER).unwrap_or(0);
            assert!(
                limit > 0,
                "Illegal value for SQLITE_LIMIT_VARIABLE_NUMBER (must be > 0) {}",
                limit
            );
            limit as usize
        };
    }
    *MAX_VARIABLE_NUMBER
}

/// Helper for the case where you have a `&[impl ToSql]` of arbitrary length,
/// but need a `&[&dyn ToSql]` of no more than the connection's
/// `MAX_VARIABLE_NUMBER`. Useful when performing batched updates; the
/// `do_chunk` callback gets each bounded slice and its offset from the start.
pub fn each_chunk<'a, T, E, F>(items: &'a [T], do_chunk: F) -> Result<(), E>
where
    T: ToSql + 'a,
    F: FnMut(&[&dyn ToSql], usize) -> Result<(), E>,
{
    each_sized_chunk(items, default_max_variable_number(), do_chunk)
}

/// The low-level version of `each_chunk`, letting the caller pick the chunk
/// size. A chunk size smaller than the variable limit is needed when each
/// item binds more than one SQL variable.
pub fn each_sized_chunk<'a, T, E, F>(
    items: &'a [T],
    chunk_size: usize,
    mut do_chunk: F,
) -> Result<(), E>
where
    T: ToSql + 'a,
    F: FnMut(&[&dyn ToSql], usize) -> Result<(), E>,
{
    if items.is_empty() {
        return Ok(());
    }
    let mut vec = Vec::with_capacity(chunk_size.min(items.len()));
    let mut offset = 0;
    for chunk in items.chunks(chunk_size) {
        vec.clear();
        vec.extend(chunk.iter().map(|v| v as &dyn ToSql));
        do_chunk(&vec, offset)?;
        offset += chunk.len();
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunking() {
        let mut seen: Vec<(usize, usize)> = Vec::new();
        each_sized_chunk(&[1, 2, 3, 4, 5], 2, |chunk, offset| {
            seen.push((chunk.len(), offset));
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(seen, vec![(2, 0), (2, 2), (1, 4)]);
    }

    #[test]
    fn test_empty_chunk() {
        let items: &[i64] = &[];
        each_sized_chunk::<_, (), _>(items, 100, |_, _| {
            panic!("Should never be called");
        })
        .unwrap();
    }

    #[test]
    fn test_error_stops_iteration() {
        let e = each_sized_chunk(&[1, 2, 3, 4, 5, 6], 3, |_, offset| {
            if offset == 0 {
                Ok(())
            } else {
                Err("testing".to_string())
            }
        })
        .expect_err("Should be an error");
        assert_eq!(e, "testing");
    }
}
