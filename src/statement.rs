//! Prepared statements.
//!
//! A [`Statement`] owns one native statement handle and runs it any number
//! of times through [`exec`](Statement::exec) or
//! [`query`](Statement::query). Each run binds its arguments, executes on
//! the blocking pool under a cancellation watch and, for queries, defines
//! the result columns before handing them to [`Rows`].
//!
//! Runs on one statement never overlap. A run whose future was dropped
//! keeps the statement busy, with its bind buffers alive, until the native
//! call returns.

use crate::bind::bind;
use crate::connection::Connection;
use crate::cursor::{Rows, StmtRef};
use crate::define::{describe, ColumnSet};
use crate::error::{Error, Result};
use crate::execute::{execute, CallGate, CancelWatch};
use crate::native::constants::OCI_STMT_SELECT;
use crate::native::{StmtAttr, StmtHandle};
use crate::output::write_back;
use crate::types::NamedValue;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of a non-query execution.
///
/// Both fields are read from the statement after execution and fail
/// independently of each other.
#[derive(Debug, Clone)]
pub struct ExecResult {
    rows_affected: Result<u64>,
    last_insert_id: Result<Option<String>>,
}

impl ExecResult {
    /// Rows processed by the execution.
    pub fn rows_affected(&self) -> Result<u64> {
        self.rows_affected.clone()
    }

    /// ROWID of the last row modified, when any row was.
    pub fn last_insert_id(&self) -> Result<Option<String>> {
        self.last_insert_id.clone()
    }
}

/// Result of executing a query, ready to be wrapped into [`Rows`].
pub(crate) struct QueryParts {
    pub columns: ColumnSet,
    pub watch: CancelWatch,
}

/// A prepared statement bound to a connection.
#[derive(Debug)]
pub struct Statement {
    conn: Arc<Connection>,
    handle: StmtHandle,
    gate: CallGate,
    closed: bool,
}

impl Statement {
    pub(crate) fn prepare(conn: Arc<Connection>, sql: &str) -> Result<Self> {
        let h = conn.handles();
        let handle = conn
            .api()
            .stmt_prepare(h.svc, h.err, sql)
            .map_err(|rc| conn.error(rc))?;
        debug!(stmt = handle.0, sql = %sql, "prepared statement");
        Ok(Self {
            conn,
            handle,
            gate: CallGate::default(),
            closed: false,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Native statement handle, for reading attributes through the
    /// native layer.
    pub fn handle(&self) -> StmtHandle {
        self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn gate(&self) -> &CallGate {
        &self.gate
    }

    /// Number of bind placeholders, or -1 if the engine cannot tell.
    pub fn num_input(&self) -> i32 {
        if self.closed {
            return -1;
        }
        let h = self.conn.handles();
        match self
            .conn
            .api()
            .stmt_attr_get(self.handle, StmtAttr::BindCount, h.err)
        {
            Ok(count) => count as i32,
            Err(_) => -1,
        }
    }

    /// Execute a DML, DDL or PL/SQL statement.
    ///
    /// # Example
    ///
    /// ```
    /// use oci8_rs::{Connection, ConnectionConfig, NamedValue, Output, Slot};
    /// use oci8_rs::native::{ExecScript, MemoryEngine, NativeCell, Script};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let engine = Arc::new(MemoryEngine::new().with_script(
    ///         "BEGIN :greeting := 'hello'; END;",
    ///         Script::exec(ExecScript::new(1).output_named("greeting", NativeCell::Text("hello".into()))),
    ///     ));
    ///     let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    ///
    ///     let greeting = Slot::new(String::new());
    ///     let mut stmt = conn.prepare("BEGIN :greeting := 'hello'; END;")?;
    ///     stmt.exec(&[NamedValue::named_out(1, "greeting", Output::text(&greeting, 20))]).await?;
    ///     assert_eq!(greeting.get(), "hello");
    ///     Ok(())
    /// }
    /// ```
    pub async fn exec(&mut self, args: &[NamedValue]) -> Result<ExecResult> {
        self.exec_with_cancel(args, std::future::pending()).await
    }

    /// Like [`exec`](Self::exec), interrupting the execution when `cancel`
    /// completes first.
    pub async fn exec_with_cancel<F>(&mut self, args: &[NamedValue], cancel: F) -> Result<ExecResult>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_open()?;
        let busy = self.gate.enter().await;
        let binds = bind(&self.conn, self.handle, args)?;
        let (rc, (binds, _busy)) = execute(&self.conn, self.handle, 1, cancel, (binds, busy)).await?;
        if !rc.is_success_with_info() {
            return Err(self.conn.error(rc));
        }

        let api = self.conn.api();
        let h = self.conn.handles();
        let rows_affected = api
            .stmt_attr_get(self.handle, StmtAttr::RowCount, h.err)
            .map(u64::from)
            .map_err(|rc| self.conn.error(rc));
        let last_insert_id = match rows_affected {
            Ok(n) if n > 0 => Ok(api.stmt_rowid(h.env, self.handle, h.err).ok()),
            _ => Ok(None),
        };

        write_back(&self.conn, &binds)?;
        trace!(
            stmt = self.handle.0,
            binds = binds.len(),
            rows_affected = rows_affected.as_ref().ok(),
            "statement executed"
        );
        Ok(ExecResult {
            rows_affected,
            last_insert_id,
        })
    }

    /// Execute a query and return its rows.
    pub async fn query(&mut self, args: &[NamedValue]) -> Result<Rows<'_>> {
        self.query_with_cancel(args, std::future::pending()).await
    }

    /// Like [`query`](Self::query). `cancel` interrupts the execution and,
    /// if it fires later, row iteration.
    pub async fn query_with_cancel<F>(&mut self, args: &[NamedValue], cancel: F) -> Result<Rows<'_>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let parts = self.run_query(args, cancel).await?;
        Ok(Rows::new(StmtRef::Borrowed(self), parts))
    }

    /// Run a query and hand the statement over to the rows, which close it
    /// once iteration ends.
    pub async fn into_rows<F>(mut self, args: &[NamedValue], cancel: F) -> Result<Rows<'static>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let parts = self.run_query(args, cancel).await?;
        Ok(Rows::new(StmtRef::Owned(self), parts))
    }

    async fn run_query<F>(&mut self, args: &[NamedValue], cancel: F) -> Result<QueryParts>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_open()?;
        let api = self.conn.api();
        let h = self.conn.handles();

        let busy = self.gate.enter().await;
        let binds = bind(&self.conn, self.handle, args)?;
        let stmt_type = api
            .stmt_attr_get(self.handle, StmtAttr::StmtType, h.err)
            .map_err(|rc| self.conn.error(rc))?;
        let iters = if stmt_type == OCI_STMT_SELECT { 0 } else { 1 };

        // One cancellation drives both the execute and the row watch.
        let cancel = cancel.boxed().shared();
        let (rc, (binds, _busy)) =
            execute(&self.conn, self.handle, iters, cancel.clone(), (binds, busy)).await?;
        if !rc.is_success() {
            return Err(self.conn.error(rc));
        }

        let config = self.conn.config();
        for (attr, value) in [
            (StmtAttr::PrefetchRows, config.prefetch_rows),
            (StmtAttr::PrefetchMemory, config.prefetch_memory),
        ] {
            if value > 0 {
                let rc = api.stmt_attr_set(self.handle, attr, value, h.err);
                if !rc.is_success() {
                    return Err(self.conn.error(rc));
                }
            }
        }

        let columns = describe(&self.conn, self.handle)?;
        drop(binds);
        let watch = CancelWatch::spawn(Arc::clone(&self.conn), cancel);
        Ok(QueryParts { columns, watch })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::StatementClosed)
        } else {
            Ok(())
        }
    }

    /// Release the native handle. Closing twice is a no-op.
    ///
    /// While an abandoned run is still executing, the handle is released
    /// once that run returns and failures are only logged.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let api = Arc::clone(self.conn.api());
        let stmt = self.handle;
        let released = self.gate.when_idle(move || {
            let rc = api.stmt_release(stmt);
            debug!(stmt = stmt.0, status = %rc, "closed statement");
            rc
        });
        match released {
            Some(rc) if !rc.is_success() => Err(self.conn.error(rc)),
            _ => Ok(()),
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(stmt = self.handle.0, error = %e, "failed to close statement");
        }
    }
}
