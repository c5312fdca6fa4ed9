//! Values, arguments and result-set types.

mod column;
mod datetime;
mod oracle_type;
mod param;
mod row;
mod value;

pub use column::{Column, ColumnInfo};
pub use datetime::{offset_text, ZonedDateTime};
pub use oracle_type::OracleType;
pub use param::{
    positional, Arg, DefaultConverter, NamedValue, Output, ParameterConverter, Slot,
};
pub use row::Row;
pub use value::{Integer, Value};
