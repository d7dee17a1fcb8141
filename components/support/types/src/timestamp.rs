/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Result as RusqliteResult;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Typesafe way to manage wall-clock instants. Stored as integer milliseconds
/// since the epoch; serialized on the wire as an ISO-8601 string with
/// timezone.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Returns None if `other` is later than `self` (Duration may not
    /// represent negative timespans in rust).
    #[inline]
    pub fn duration_since(self, other: Timestamp) -> Option<Duration> {
        SystemTime::from(self).duration_since(other.into()).ok()
    }

    #[inline]
    pub fn checked_sub(self, d: Duration) -> Option<Timestamp> {
        SystemTime::from(self).checked_sub(d).map(Timestamp::from)
    }

    #[inline]
    pub fn checked_add(self, d: Duration) -> Option<Timestamp> {
        SystemTime::from(self).checked_add(d).map(Timestamp::from)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_millis_i64(self) -> i64 {
        self.0 as i64
    }

    /// RFC-3339 rendering with millisecond precision, always UTC.
    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from(SystemTime::from(self)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse an ISO-8601 / RFC-3339 instant. Instants before the epoch are
    /// rejected rather than wrapped.
    pub fn from_rfc3339(s: &str) -> Option<Timestamp> {
        let dt = DateTime::parse_from_rfc3339(s).ok()?;
        let ms = dt.timestamp_millis();
        if ms < 0 {
            None
        } else {
            Some(Timestamp(ms as u64))
        }
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<SystemTime> for Timestamp {
    #[inline]
    fn from(st: SystemTime) -> Self {
        let d = st.duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp((d.as_secs()) * 1000 + u64::from(d.subsec_nanos()) / 1_000_000)
    }
}

impl From<Timestamp> for SystemTime {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        UNIX_EPOCH + Duration::from_millis(ts.into())
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(ts: u64) -> Self {
        Timestamp(ts)
    }
}

impl fmt::Display for Timestamp {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an RFC-3339 string or integer milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        Timestamp::from_rfc3339(v)
            .ok_or_else(|| E::custom(format!("invalid RFC-3339 timestamp: {:?}", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
        Ok(Timestamp(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
        if v < 0 {
            Err(E::custom("timestamp may not be negative"))
        } else {
            Ok(Timestamp(v as u64))
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> RusqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64)) // hrm - no u64 in rusqlite
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) if i >= 0 => Ok(Timestamp(i as u64)),
            ValueRef::Integer(_) => Err(FromSqlError::InvalidType),
            ValueRef::Text(_) => {
                let s = value.as_str()?;
                Timestamp::from_rfc3339(s).ok_or(FromSqlError::InvalidType)
            }
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let ts = Timestamp(1_704_103_200_123); // 2024-01-01T10:00:00.123Z
        let rendered = ts.to_rfc3339();
        assert_eq!(rendered, "2024-01-01T10:00:00.123Z");
        assert_eq!(Timestamp::from_rfc3339(&rendered), Some(ts));
    }

    #[test]
    fn test_parse_offsets() {
        // An offset form of the same instant must compare equal.
        let a = Timestamp::from_rfc3339("2024-01-01T10:00:00Z").unwrap();
        let b = Timestamp::from_rfc3339("2024-01-01T12:00:00+02:00").unwrap();
        assert_eq!(a, b);
        assert!(Timestamp::from_rfc3339("not a time").is_none());
        assert!(Timestamp::from_rfc3339("1969-12-31T23:59:59Z").is_none());
    }

    #[test]
    fn test_serde() {
        let ts = Timestamp(1_704_103_200_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01T10:00:00.000Z\"");
        assert_eq!(serde_json::from_str::<Timestamp>(&json).unwrap(), ts);
        // Lenient integer form, as stored in sqlite.
        assert_eq!(
            serde_json::from_str::<Timestamp>("1704103200000").unwrap(),
            ts
        );
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp(2) > Timestamp(1));
        let now = Timestamp::now();
        assert!(now.duration_since(Timestamp(0)).is_some());
        assert!(Timestamp(0).duration_since(now).is_none());
    }
}
