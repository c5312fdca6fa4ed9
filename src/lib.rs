//! Oracle OCI statement driver for Rust
//!
//! Binds Rust values into native buffers, executes statements against an
//! OCI-style native client with cancellation, and streams result rows back
//! as typed values. The native client is reached through the
//! [`native::NativeApi`] trait; [`native::MemoryEngine`] implements it in
//! process.
//!
//! # Example
//!
//! ```
//! use oci8_rs::{Connection, ConnectionConfig, Cursor, Result, Value, positional};
//! use oci8_rs::native::MemoryEngine;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Arc::new(MemoryEngine::new());
//!     let conn = Connection::in_memory(&engine, ConnectionConfig::parse("prefetch_rows=100")?);
//!
//!     let mut stmt = conn.prepare("SELECT :1, :2 FROM dual")?;
//!     let mut rows = stmt.query(&positional([Value::from(42i64), Value::from("answer")])).await?;
//!     while let Some(row) = rows.next().await? {
//!         println!("{} {}", row.values()[0], row.values()[1]);
//!     }
//!     rows.close().await?;
//!     drop(rows);
//!
//!     stmt.close()?;
//!     Ok(())
//! }
//! ```

mod arena;
mod bind;
pub mod connection;
pub mod cursor;
mod decode;
mod define;
pub mod error;
mod execute;
pub mod native;
mod output;
pub mod statement;
pub mod types;

// Re-export main types
pub use connection::{Connection, ConnectionConfig};
pub use cursor::{Cursor, CursorStreamExt, Rows};
pub use error::{Error, Result};
pub use statement::{ExecResult, Statement};
pub use types::{
    offset_text, positional, Arg, Column, ColumnInfo, DefaultConverter, Integer, NamedValue,
    OracleType, Output, ParameterConverter, Row, Slot, Value, ZonedDateTime,
};
