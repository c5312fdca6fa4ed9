//! Timestamps that keep their zone text.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, Utc};
use std::fmt;

/// A wall-clock timestamp with its UTC offset and zone name.
///
/// The zone is handed to the engine verbatim when the value is bound
/// (`"Asia/Tokyo"`, `"UTC"`, `"+05:30"`). If the engine does not know the
/// region, or computes a different offset for it, the bind falls back to
/// the numeric offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZonedDateTime {
    local: NaiveDateTime,
    offset: FixedOffset,
    zone: String,
}

impl ZonedDateTime {
    /// Timestamp in a named region whose offset at `local` is `offset`.
    pub fn new(local: NaiveDateTime, offset: FixedOffset, zone: impl Into<String>) -> Self {
        Self {
            local,
            offset,
            zone: zone.into(),
        }
    }

    /// Timestamp whose zone is the numeric offset itself.
    pub fn from_offset(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let zone = offset_text(offset.local_minus_utc());
        Self::new(local, offset, zone)
    }

    /// Local calendar fields.
    pub fn local(&self) -> NaiveDateTime {
        self.local
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Offset east of UTC in seconds.
    pub fn offset_seconds(&self) -> i32 {
        self.offset.local_minus_utc()
    }

    pub fn to_datetime(&self) -> DateTime<FixedOffset> {
        let utc = self.local - TimeDelta::seconds(self.offset_seconds() as i64);
        DateTime::from_naive_utc_and_offset(utc, self.offset)
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.to_datetime().with_timezone(&Utc)
    }
}

/// Render an offset in seconds as `+HH:MM` / `-HH:MM`.
pub fn offset_text(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

impl fmt::Display for ZonedDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.local.format("%Y-%m-%d %H:%M:%S%.f"), self.zone)
    }
}

impl From<DateTime<Utc>> for ZonedDateTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt.naive_utc(), Utc.fix(), "UTC")
    }
}

impl From<DateTime<FixedOffset>> for ZonedDateTime {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self::from_offset(dt.naive_local(), *dt.offset())
    }
}

impl From<NaiveDateTime> for ZonedDateTime {
    fn from(local: NaiveDateTime) -> Self {
        Self::new(local, Utc.fix(), "UTC")
    }
}
