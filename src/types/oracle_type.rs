//! Column types as reported by describe.

use crate::native::constants::*;

/// Described column type with its type-specific attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleType {
    /// VARCHAR2 / NVARCHAR2.
    Varchar2 { max_size: u32 },
    /// CHAR / NCHAR.
    Char { max_size: u32 },
    /// NUMBER(precision, scale); FLOAT reports scale -127.
    Number { precision: i16, scale: i16 },
    BinaryInteger,
    BinaryFloat,
    BinaryDouble,
    Raw { max_size: u32 },
    Long,
    LongRaw,
    Date,
    Timestamp,
    TimestampTz,
    TimestampLtz,
    IntervalDaySecond,
    IntervalYearMonth,
    Clob,
    Blob,
    RowId,
    /// Any type the driver fetches as text.
    Other { type_num: u16, max_size: u32 },
}

impl OracleType {
    /// Create from the raw describe attributes.
    pub fn from_raw(data_type: u16, precision: i16, scale: i16, max_size: u32) -> Self {
        match data_type {
            SQLT_CHR | SQLT_VCS => OracleType::Varchar2 { max_size },
            SQLT_AFC | SQLT_AVC => OracleType::Char { max_size },
            SQLT_NUM | SQLT_VNU => OracleType::Number { precision, scale },
            SQLT_INT => OracleType::BinaryInteger,
            SQLT_BFLOAT | SQLT_IBFLOAT => OracleType::BinaryFloat,
            SQLT_BDOUBLE | SQLT_IBDOUBLE | SQLT_FLT => OracleType::BinaryDouble,
            SQLT_BIN => OracleType::Raw { max_size },
            SQLT_LNG => OracleType::Long,
            SQLT_LBI => OracleType::LongRaw,
            SQLT_DAT => OracleType::Date,
            SQLT_TIMESTAMP => OracleType::Timestamp,
            SQLT_TIMESTAMP_TZ => OracleType::TimestampTz,
            SQLT_TIMESTAMP_LTZ => OracleType::TimestampLtz,
            SQLT_INTERVAL_DS => OracleType::IntervalDaySecond,
            SQLT_INTERVAL_YM => OracleType::IntervalYearMonth,
            SQLT_CLOB => OracleType::Clob,
            SQLT_BLOB => OracleType::Blob,
            SQLT_RDD => OracleType::RowId,
            type_num => OracleType::Other { type_num, max_size },
        }
    }

    /// NUMBER columns that may hold fractions: unconstrained NUMBER,
    /// positive scale, or FLOAT.
    pub fn is_fractional_number(&self) -> bool {
        match self {
            OracleType::Number { precision, scale } => {
                (*precision == 0 && *scale == 0) || *scale > 0 || *scale == FLOAT_SCALE_MARKER
            }
            _ => false,
        }
    }

    pub fn precision(&self) -> i16 {
        match self {
            OracleType::Number { precision, .. } => *precision,
            _ => 0,
        }
    }

    pub fn scale(&self) -> i16 {
        match self {
            OracleType::Number { scale, .. } => *scale,
            _ => 0,
        }
    }

    pub fn max_size(&self) -> u32 {
        match self {
            OracleType::Varchar2 { max_size }
            | OracleType::Char { max_size }
            | OracleType::Raw { max_size }
            | OracleType::Other { max_size, .. } => *max_size,
            _ => 0,
        }
    }
}

impl std::fmt::Display for OracleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleType::Varchar2 { max_size } => write!(f, "VARCHAR2({})", max_size),
            OracleType::Char { max_size } => write!(f, "CHAR({})", max_size),
            OracleType::Number { precision, scale } => {
                if *scale == FLOAT_SCALE_MARKER {
                    write!(f, "FLOAT({})", precision)
                } else if *precision == 0 && *scale == 0 {
                    write!(f, "NUMBER")
                } else if *scale == 0 {
                    write!(f, "NUMBER({})", precision)
                } else {
                    write!(f, "NUMBER({},{})", precision, scale)
                }
            }
            OracleType::BinaryInteger => write!(f, "BINARY_INTEGER"),
            OracleType::BinaryFloat => write!(f, "BINARY_FLOAT"),
            OracleType::BinaryDouble => write!(f, "BINARY_DOUBLE"),
            OracleType::Raw { max_size } => write!(f, "RAW({})", max_size),
            OracleType::Long => write!(f, "LONG"),
            OracleType::LongRaw => write!(f, "LONG RAW"),
            OracleType::Date => write!(f, "DATE"),
            OracleType::Timestamp => write!(f, "TIMESTAMP"),
            OracleType::TimestampTz => write!(f, "TIMESTAMP WITH TIME ZONE"),
            OracleType::TimestampLtz => write!(f, "TIMESTAMP WITH LOCAL TIME ZONE"),
            OracleType::IntervalDaySecond => write!(f, "INTERVAL DAY TO SECOND"),
            OracleType::IntervalYearMonth => write!(f, "INTERVAL YEAR TO MONTH"),
            OracleType::Clob => write!(f, "CLOB"),
            OracleType::Blob => write!(f, "BLOB"),
            OracleType::RowId => write!(f, "ROWID"),
            OracleType::Other { type_num, .. } => write!(f, "TYPE({})", type_num),
        }
    }
}
