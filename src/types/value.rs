//! Values exchanged with the driver.

use super::datetime::ZonedDateTime;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;

/// An integer at its natural width.
///
/// Signed integers are bound little-endian at the width they arrive with,
/// so an `i16` occupies two bytes. The native integer type is signed, so
/// unsigned values widen to the next signed width that holds them: `u8`
/// binds as two bytes, `u16` as four and `u32` as eight. `u64` and `usize`
/// bind as eight bytes and only below `2^63`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Integer {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Usize(usize),
}

impl Integer {
    /// Signed little-endian bytes to bind, or `None` for a `u64`/`usize`
    /// with the high bit set.
    pub fn to_le_bytes(self) -> Option<Vec<u8>> {
        let bytes = match self {
            Integer::I8(v) => v.to_le_bytes().to_vec(),
            Integer::I16(v) => v.to_le_bytes().to_vec(),
            Integer::I32(v) => v.to_le_bytes().to_vec(),
            Integer::I64(v) => v.to_le_bytes().to_vec(),
            Integer::Isize(v) => v.to_le_bytes().to_vec(),
            Integer::U8(v) => i16::from(v).to_le_bytes().to_vec(),
            Integer::U16(v) => i32::from(v).to_le_bytes().to_vec(),
            Integer::U32(v) => i64::from(v).to_le_bytes().to_vec(),
            Integer::U64(v) => i64::try_from(v).ok()?.to_le_bytes().to_vec(),
            Integer::Usize(v) => i64::try_from(v).ok()?.to_le_bytes().to_vec(),
        };
        Some(bytes)
    }

    /// The value as `i64`, if it fits.
    pub fn to_i64(self) -> Option<i64> {
        match self {
            Integer::I8(v) => Some(v.into()),
            Integer::I16(v) => Some(v.into()),
            Integer::I32(v) => Some(v.into()),
            Integer::I64(v) => Some(v),
            Integer::Isize(v) => i64::try_from(v).ok(),
            Integer::U8(v) => Some(v.into()),
            Integer::U16(v) => Some(v.into()),
            Integer::U32(v) => Some(v.into()),
            Integer::U64(v) => i64::try_from(v).ok(),
            Integer::Usize(v) => i64::try_from(v).ok(),
        }
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integer::I8(v) => write!(f, "{}", v),
            Integer::I16(v) => write!(f, "{}", v),
            Integer::I32(v) => write!(f, "{}", v),
            Integer::I64(v) => write!(f, "{}", v),
            Integer::Isize(v) => write!(f, "{}", v),
            Integer::U8(v) => write!(f, "{}", v),
            Integer::U16(v) => write!(f, "{}", v),
            Integer::U32(v) => write!(f, "{}", v),
            Integer::U64(v) => write!(f, "{}", v),
            Integer::Usize(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! integer_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Integer {
                fn from(v: $ty) -> Self {
                    Integer::$variant(v)
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(Integer::$variant(v))
                }
            }
        )*
    };
}

integer_from!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => Isize,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => Usize,
);

/// A value bound as input or produced by a fetch.
#[derive(Clone)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// RAW / BLOB bytes.
    Bytes(Vec<u8>),
    /// Timestamp with zone.
    Timestamp(ZonedDateTime),
    /// Character data. Empty text binds as NULL.
    Text(String),
    Int(Integer),
    Float(f64),
    /// Widened to 8 bytes when bound.
    Float32(f32),
    /// Bound as a one-byte 0/1 integer.
    Bool(bool),
    /// INTERVAL DAY TO SECOND.
    IntervalDaySecond(TimeDelta),
    /// INTERVAL YEAR TO MONTH, in months.
    IntervalYearMonth(i32),
    /// Anything else; bound as its `Display` text.
    Other(Arc<dyn fmt::Display + Send + Sync>),
}

impl Value {
    /// Wrap an arbitrary displayable value.
    pub fn other(value: impl fmt::Display + Send + Sync + 'static) -> Self {
        Value::Other(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => i.to_i64(),
            Value::Bool(b) => Some(*b as i64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Float32(f) => Some(*f as f64),
            Value::Int(i) => i.to_i64().map(|v| v as f64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => i.to_i64().map(|v| v != 0),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&ZonedDateTime> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    pub fn as_interval(&self) -> Option<TimeDelta> {
        match self {
            Value::IntervalDaySecond(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Value::Timestamp(ts) => f.debug_tuple("Timestamp").field(ts).finish(),
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Float32(v) => f.debug_tuple("Float32").field(v).finish(),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::IntervalDaySecond(d) => f.debug_tuple("IntervalDaySecond").field(d).finish(),
            Value::IntervalYearMonth(m) => f.debug_tuple("IntervalYearMonth").field(m).finish(),
            Value::Other(v) => f.debug_tuple("Other").field(&v.to_string()).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::IntervalDaySecond(a), Value::IntervalDaySecond(b)) => a == b,
            (Value::IntervalYearMonth(a), Value::IntervalYearMonth(b)) => a == b,
            (Value::Other(a), Value::Other(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bytes(b) => write!(f, "<RAW: {} bytes>", b.len()),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::IntervalDaySecond(d) => write!(f, "{}", d),
            Value::IntervalYearMonth(m) => write!(f, "{}-{:02}", m / 12, (m % 12).abs()),
            Value::Other(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<ZonedDateTime> for Value {
    fn from(v: ZonedDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v.into())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(v.into())
    }
}

impl From<TimeDelta> for Value {
    fn from(v: TimeDelta) -> Self {
        Value::IntervalDaySecond(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_bind_width() {
        assert_eq!(Integer::I8(-1).to_le_bytes(), Some(vec![0xFF]));
        assert_eq!(Integer::I16(0x0102).to_le_bytes(), Some(vec![0x02, 0x01]));
        assert_eq!(Integer::I64(7).to_le_bytes().map(|b| b.len()), Some(8));
        // Unsigned values widen so the top bit stays clear.
        assert_eq!(Integer::U8(200).to_le_bytes(), Some(vec![200, 0]));
        assert_eq!(Integer::U16(40000).to_le_bytes(), Some(40000i32.to_le_bytes().to_vec()));
        assert_eq!(
            Integer::U32(3_000_000_000).to_le_bytes(),
            Some(3_000_000_000i64.to_le_bytes().to_vec())
        );
        assert_eq!(Integer::U64(i64::MAX as u64).to_le_bytes(), Some(i64::MAX.to_le_bytes().to_vec()));
        assert_eq!(Integer::U64(1 << 63).to_le_bytes(), None);
        assert_eq!(Integer::U64(u64::MAX).to_le_bytes(), None);
    }

    #[test]
    fn test_integer_to_i64() {
        assert_eq!(Integer::U64(u64::MAX).to_i64(), None);
        assert_eq!(Integer::U64(42).to_i64(), Some(42));
        assert_eq!(Integer::I16(-3).to_i64(), Some(-3));
    }

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("abc"), Value::Text("abc".to_string()));
        assert_eq!(Value::from(5u16), Value::Int(Integer::U16(5)));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(1.5f64)), Value::Float(1.5));
    }

    #[test]
    fn test_value_other_display() {
        let v = Value::other(std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(v.to_string(), "127.0.0.1");
        assert_eq!(v, Value::other("127.0.0.1"));
        assert_eq!(format!("{:?}", v), "Other(\"127.0.0.1\")");
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Text("12".into()).to_i64(), Some(12));
        assert_eq!(Value::Float32(0.5).to_f64(), Some(0.5));
        assert_eq!(Value::Bool(true).to_i64(), Some(1));
        assert_eq!(Value::Int(Integer::I64(0)).as_bool(), Some(false));
        assert_eq!(Value::IntervalYearMonth(14).to_string(), "1-02");
    }
}
