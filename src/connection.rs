//! Connection context shared by statements.
//!
//! A [`Connection`] wraps an already logged-on native session (environment,
//! error and service handles) together with the options the statement
//! pipeline consumes. Session establishment, authentication and pooling
//! happen outside this crate.

use crate::cursor::Rows;
use crate::error::{Error, Result};
use crate::native::constants::*;
use crate::native::{MemoryEngine, NativeApi, ReturnCode, SessionHandles};
use crate::statement::{ExecResult, Statement};
use crate::types::{DefaultConverter, NamedValue, ParameterConverter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Options consumed by the statement pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Rows prefetched per round trip; 0 keeps the engine default.
    pub prefetch_rows: u32,
    /// Prefetch memory limit in bytes; 0 keeps the engine default.
    pub prefetch_memory: u32,
    /// Minimum size of the stream buffer used to read LOB columns.
    pub lob_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            prefetch_rows: 0,
            prefetch_memory: 0,
            lob_buffer_size: DEFAULT_LOB_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of rows prefetched by queries.
    ///
    /// # Example
    ///
    /// ```
    /// use oci8_rs::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::new()
    ///     .with_prefetch_rows(500)
    ///     .with_prefetch_memory(1 << 20);
    /// assert_eq!(config.prefetch_rows, 500);
    /// ```
    pub fn with_prefetch_rows(mut self, rows: u32) -> Self {
        self.prefetch_rows = rows;
        self
    }

    pub fn with_prefetch_memory(mut self, bytes: u32) -> Self {
        self.prefetch_memory = bytes;
        self
    }

    pub fn with_lob_buffer_size(mut self, bytes: usize) -> Self {
        self.lob_buffer_size = bytes;
        self
    }

    /// Parse DSN-style options like `"prefetch_rows=100&prefetch_memory=0"`.
    ///
    /// Keys are `prefetch_rows`, `prefetch_memory` and `lob_buffer_size`.
    /// An empty string yields the defaults.
    pub fn parse(options: &str) -> Result<Self> {
        let mut config = Self::default();
        let options = options.trim_start_matches('?');

        for pair in options.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::invalid_config(format!("Expected key=value, got '{}'", pair))
            })?;
            let value = value.trim();
            match key.trim() {
                "prefetch_rows" => config.prefetch_rows = parse_number(key, value)?,
                "prefetch_memory" => config.prefetch_memory = parse_number(key, value)?,
                "lob_buffer_size" => config.lob_buffer_size = parse_number(key, value)?,
                other => {
                    return Err(Error::invalid_config(format!("Unknown option: {}", other)));
                }
            }
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid_config(format!("Invalid value for {}: {}", key, value)))
}

/// A logged-on session.
///
/// Statements hold an `Arc<Connection>`; the native handles are shared
/// read-only, and the transaction flag is the only mutable state.
pub struct Connection {
    api: Arc<dyn NativeApi>,
    handles: SessionHandles,
    config: ConnectionConfig,
    in_transaction: AtomicBool,
    converter: Arc<dyn ParameterConverter>,
}

impl Connection {
    /// Wrap an established session.
    pub fn new(api: Arc<dyn NativeApi>, handles: SessionHandles, config: ConnectionConfig) -> Self {
        Self {
            api,
            handles,
            config,
            in_transaction: AtomicBool::new(false),
            converter: Arc::new(DefaultConverter),
        }
    }

    /// Open a session on an in-process engine.
    ///
    /// # Example
    ///
    /// ```
    /// use oci8_rs::{Connection, ConnectionConfig};
    /// use oci8_rs::native::MemoryEngine;
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(MemoryEngine::new());
    /// let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    /// assert!(!conn.in_transaction());
    /// ```
    pub fn in_memory(engine: &Arc<MemoryEngine>, config: ConnectionConfig) -> Arc<Self> {
        let handles = engine.open_session();
        let api: Arc<dyn NativeApi> = engine.clone();
        Arc::new(Self::new(api, handles, config))
    }

    /// Replace the converter applied to OUT parameters before binding.
    pub fn with_converter(mut self, converter: Arc<dyn ParameterConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn handles(&self) -> SessionHandles {
        self.handles
    }

    /// Whether statements run inside an explicit transaction. Outside one
    /// every execution commits on success.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Set by the transaction layer on begin, cleared on commit/rollback.
    pub fn set_in_transaction(&self, in_transaction: bool) {
        self.in_transaction.store(in_transaction, Ordering::Release);
    }

    pub(crate) fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    pub(crate) fn converter(&self) -> &dyn ParameterConverter {
        self.converter.as_ref()
    }

    pub(crate) fn execute_mode(&self) -> u32 {
        if self.in_transaction() {
            OCI_DEFAULT
        } else {
            OCI_DEFAULT | OCI_COMMIT_ON_SUCCESS
        }
    }

    /// Turn a failed status into an error, using the diagnostic left on
    /// the error handle when there is one.
    pub(crate) fn error(&self, rc: ReturnCode) -> Error {
        if rc == ReturnCode::INVALID_HANDLE {
            return Error::NativeStatus { status: rc.0 };
        }
        match self.api.error_get(self.handles.err) {
            Some(record) => Error::oracle(record.code, record.message.trim_end()),
            None => Error::NativeStatus { status: rc.0 },
        }
    }

    /// Interrupt whatever call is running on this session.
    pub fn interrupt(&self) -> Result<()> {
        tracing::debug!(svc = self.handles.svc.0, "issuing break");
        let rc = self.api.break_call(self.handles.svc, self.handles.err);
        if rc.is_success() {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    /// Prepare a statement.
    ///
    /// # Example
    ///
    /// ```
    /// use oci8_rs::{Connection, ConnectionConfig, Cursor, positional};
    /// use oci8_rs::native::MemoryEngine;
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let engine = Arc::new(MemoryEngine::new());
    ///     let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    ///
    ///     let mut stmt = conn.prepare("SELECT :1 FROM dual")?;
    ///     let mut rows = stmt.query(&positional(["hello"])).await?;
    ///     while let Some(row) = rows.next().await? {
    ///         println!("{:?}", row);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn prepare(self: &Arc<Self>, sql: &str) -> Result<Statement> {
        Statement::prepare(Arc::clone(self), sql)
    }

    /// Prepare and run a query. The statement is closed when the rows are.
    pub async fn query(self: &Arc<Self>, sql: &str, args: &[NamedValue]) -> Result<Rows<'static>> {
        let stmt = self.prepare(sql)?;
        stmt.into_rows(args, std::future::pending()).await
    }

    /// Prepare, execute and close a non-query statement.
    pub async fn exec(self: &Arc<Self>, sql: &str, args: &[NamedValue]) -> Result<ExecResult> {
        let mut stmt = self.prepare(sql)?;
        let result = stmt.exec(args).await?;
        stmt.close()?;
        Ok(result)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handles", &self.handles)
            .field("config", &self.config)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
