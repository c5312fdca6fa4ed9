//! Decoders for fetch buffers, OUT bind buffers and native descriptors.
//!
//! Integer and float buffers are 8 bytes, little-endian. Character buffers
//! are UTF-8; OUT strings are NUL terminated.

use crate::error::{Error, Result};
use crate::native::{DateTimeValue, DayToSecond, YearToMonth};
use crate::types::{offset_text, ZonedDateTime};
use bytes::Buf;
use chrono::{FixedOffset, NaiveDate, TimeDelta};

const WORD: usize = 8;

fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    if data.len() < WORD {
        return Err(Error::marshal(
            index,
            format!("need {} bytes, buffer holds {}", WORD, data.len()),
        ));
    }
    Ok(&data[..WORD])
}

/// Decode an 8-byte little-endian signed integer.
pub fn decode_i64(data: &[u8], index: usize) -> Result<i64> {
    let mut buf = word(data, index)?;
    Ok(buf.get_i64_le())
}

/// Decode an 8-byte little-endian unsigned integer.
pub fn decode_u64(data: &[u8], index: usize) -> Result<u64> {
    let mut buf = word(data, index)?;
    Ok(buf.get_u64_le())
}

/// Decode an 8-byte little-endian IEEE double.
pub fn decode_f64(data: &[u8], index: usize) -> Result<f64> {
    let mut buf = word(data, index)?;
    Ok(buf.get_f64_le())
}

/// Character data; invalid UTF-8 is replaced rather than rejected.
pub fn decode_text(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Text up to the first NUL.
pub fn decode_c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    decode_text(&data[..end])
}

/// Build a zoned timestamp from descriptor fields.
pub fn decode_datetime(value: &DateTimeValue, index: usize) -> Result<ZonedDateTime> {
    let p = value.parts;
    let local = NaiveDate::from_ymd_opt(p.year as i32, p.month as u32, p.day as u32)
        .and_then(|d| {
            d.and_hms_nano_opt(p.hour as u32, p.minute as u32, p.second as u32, p.nanosecond)
        })
        .ok_or_else(|| {
            Error::marshal(
                index,
                format!(
                    "invalid timestamp {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    p.year, p.month, p.day, p.hour, p.minute, p.second
                ),
            )
        })?;
    let seconds = value.offset.seconds();
    let offset = FixedOffset::east_opt(seconds)
        .ok_or_else(|| Error::marshal(index, format!("invalid zone offset {}s", seconds)))?;
    Ok(ZonedDateTime::new(local, offset, offset_text(seconds)))
}

pub fn decode_day_second(value: &DayToSecond) -> TimeDelta {
    TimeDelta::days(value.days as i64)
        + TimeDelta::hours(value.hours as i64)
        + TimeDelta::minutes(value.minutes as i64)
        + TimeDelta::seconds(value.seconds as i64)
        + TimeDelta::nanoseconds(value.nanoseconds as i64)
}

/// Total months of a year-to-month interval.
pub fn decode_year_month(value: &YearToMonth) -> i32 {
    value.years * 12 + value.months
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{DateTimeParts, ZoneOffset};

    #[test]
    fn test_decode_i64() {
        assert_eq!(decode_i64(&(-42i64).to_le_bytes(), 0).unwrap(), -42);
        assert_eq!(decode_u64(&u64::MAX.to_le_bytes(), 0).unwrap(), u64::MAX);
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = decode_f64(&[0, 0, 0, 0], 2).unwrap_err();
        match err {
            Error::Marshal { index, .. } => assert_eq!(index, 2),
            _ => panic!("Expected Marshal error"),
        }
    }

    #[test]
    fn test_decode_c_string() {
        assert_eq!(decode_c_string(b"abc\0\0\0"), "abc");
        assert_eq!(decode_c_string(b"abc"), "abc");
        assert_eq!(decode_c_string(b"\0xyz"), "");
    }

    #[test]
    fn test_decode_text_lossy() {
        assert_eq!(decode_text("héllo".as_bytes()), "héllo");
        assert_eq!(decode_text(&[b'a', 0xFF]), "a\u{FFFD}");
    }

    #[test]
    fn test_decode_datetime() {
        let value = DateTimeValue {
            parts: DateTimeParts {
                year: 2024,
                month: 2,
                day: 29,
                hour: 23,
                minute: 59,
                second: 58,
                nanosecond: 1_000,
            },
            offset: ZoneOffset { hours: -3, minutes: -30 },
        };
        let ts = decode_datetime(&value, 0).unwrap();
        assert_eq!(ts.zone(), "-03:30");
        assert_eq!(ts.offset_seconds(), -12600);
        assert_eq!(ts.local().and_utc().timestamp_subsec_nanos(), 1_000);

        let bad = DateTimeValue {
            parts: DateTimeParts { year: 2023, month: 2, day: 29, ..Default::default() },
            offset: ZoneOffset::default(),
        };
        assert!(decode_datetime(&bad, 4).is_err());
    }

    #[test]
    fn test_decode_intervals() {
        let ds = DayToSecond { days: 1, hours: 2, minutes: 3, seconds: 4, nanoseconds: 5 };
        assert_eq!(
            decode_day_second(&ds),
            TimeDelta::seconds(86400 + 7200 + 180 + 4) + TimeDelta::nanoseconds(5)
        );
        assert_eq!(decode_year_month(&YearToMonth { years: 2, months: 3 }), 27);
        assert_eq!(decode_year_month(&YearToMonth { years: -1, months: -6 }), -18);
    }
}
