//! Row iteration over query results.
//!
//! The `Cursor` trait defines the common interface for iterating results;
//! [`Rows`] implements it over the define buffers of an executed query,
//! fetching one row per call. [`CursorStreamExt`] turns any cursor into a
//! `Stream`.

use crate::connection::Connection;
use crate::define::ColumnSet;
use crate::error::{Error, Result};
use crate::execute::CancelWatch;
use crate::native::ReturnCode;
use crate::statement::{QueryParts, Statement};
use crate::types::{Column, ColumnInfo, Row};
use futures::Stream;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Asynchronous, forward-only iteration over a result.
///
/// # Example
///
/// ```
/// use oci8_rs::{Connection, ConnectionConfig, Cursor, Row, positional};
/// use oci8_rs::native::MemoryEngine;
/// use std::sync::Arc;
///
/// async fn count_rows<C: Cursor<Item = Row>>(cursor: &mut C) -> oci8_rs::Result<u64> {
///     let mut count = 0;
///     while cursor.next().await?.is_some() {
///         count += 1;
///     }
///     Ok(count)
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Arc::new(MemoryEngine::new());
///     let conn = Connection::in_memory(&engine, ConnectionConfig::default());
///
///     let mut rows = conn.query("SELECT :1, :2 FROM dual", &positional([1i64, 2i64])).await?;
///     assert_eq!(count_rows(&mut rows).await?, 1);
///     Ok(())
/// }
/// ```
pub trait Cursor {
    type Item;

    /// Described columns of the result.
    fn columns(&self) -> &[Column];

    /// Rows returned by `next` so far.
    fn rowcount(&self) -> u64;

    /// Whether iteration has ended, by exhaustion, cancellation or close.
    fn is_closed(&self) -> bool;

    /// Close the cursor and release its native resources.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Fetch one item; `Ok(None)` once the result is exhausted.
    fn next(&mut self) -> impl Future<Output = Result<Option<Self::Item>>> + Send;

    /// Drain the remaining items.
    fn fetch_all(&mut self) -> impl Future<Output = Result<Vec<Self::Item>>> + Send;
}

/// Statement behind a [`Rows`]: borrowed from the caller, or owned and
/// closed when iteration ends.
#[derive(Debug)]
pub(crate) enum StmtRef<'s> {
    Borrowed(&'s mut Statement),
    Owned(Statement),
}

impl StmtRef<'_> {
    fn get(&self) -> &Statement {
        match self {
            StmtRef::Borrowed(stmt) => stmt,
            StmtRef::Owned(stmt) => stmt,
        }
    }

    fn close_owned(&mut self) -> Result<()> {
        match self {
            StmtRef::Borrowed(_) => Ok(()),
            StmtRef::Owned(stmt) => stmt.close(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Exhausted,
    Cancelled,
    Closed,
}

/// Rows of an executed query.
///
/// # Lifecycle
///
/// 1. Created by [`Statement::query`], [`Statement::query_with_cancel`] or
///    [`Connection::query`]
/// 2. Iterated via `next()`, `fetch_all()` or a stream
/// 3. Released when exhausted, when cancelled, on `close()` or on drop
///
/// # Cancellation
///
/// A fetch interrupted by the cancellation future fails with the native
/// `ORA-01013` error. When cancellation fires between fetches there is no
/// native call to interrupt, and `next` fails with [`Error::Cancelled`].
/// Either way the rows are released and every later `next` returns
/// [`Error::Cancelled`].
pub struct Rows<'s> {
    stmt: StmtRef<'s>,
    columns: ColumnSet,
    info: Arc<ColumnInfo>,
    watch: CancelWatch,
    cancelled: Arc<AtomicBool>,
    state: State,
    rowcount: u64,
}

impl<'s> Rows<'s> {
    pub(crate) fn new(stmt: StmtRef<'s>, parts: QueryParts) -> Self {
        let info = Arc::clone(parts.columns.info());
        let cancelled = parts.watch.fired_flag();
        Self {
            stmt,
            columns: parts.columns,
            info,
            watch: parts.watch,
            cancelled,
            state: State::Open,
            rowcount: 0,
        }
    }

    /// Shared column information, as attached to every [`Row`].
    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.info
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.info.column_names()
    }

    fn connection(&self) -> Arc<Connection> {
        Arc::clone(self.stmt.get().connection())
    }

    /// Free column buffers and stop the watcher. With an owned statement
    /// the statement is closed too.
    fn release(&mut self, state: State) -> Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        self.state = state;
        self.watch.signal_done();
        // An abandoned fetch may still be writing into the buffers.
        let buffers = self.columns.detach();
        self.stmt.get().gate().when_idle(move || drop(buffers));
        debug!(rows = self.rowcount, state = ?state, "released rows");
        self.stmt.close_owned()
    }

    async fn shutdown(&mut self, state: State) -> Result<()> {
        let result = self.release(state);
        self.watch.finish().await;
        result
    }

    async fn cancel(&mut self) {
        if let Err(e) = self.shutdown(State::Cancelled).await {
            warn!(error = %e, "failed to release cancelled rows");
        }
    }
}

impl Cursor for Rows<'_> {
    type Item = Row;

    fn columns(&self) -> &[Column] {
        &self.info.columns
    }

    fn rowcount(&self) -> u64 {
        self.rowcount
    }

    fn is_closed(&self) -> bool {
        self.state != State::Open
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.shutdown(State::Closed).await;
        self.state = State::Closed;
        result
    }

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        match self.state {
            State::Open => {}
            State::Exhausted => return Ok(None),
            State::Cancelled => return Err(Error::Cancelled),
            State::Closed => return Err(Error::RowsClosed),
        }
        if self.cancelled.load(Ordering::Acquire) {
            self.cancel().await;
            return Err(Error::Cancelled);
        }

        let conn = self.connection();
        let api = Arc::clone(conn.api());
        let h = conn.handles();
        let stmt = self.stmt.get().handle();
        let busy = self.stmt.get().gate().enter().await;
        let rc = tokio::task::spawn_blocking(move || {
            let rc = api.stmt_fetch(stmt, h.err, 1);
            drop(busy);
            rc
        })
        .await?;

        if rc == ReturnCode::NO_DATA {
            trace!(stmt = stmt.0, rows = self.rowcount, "rows exhausted");
            self.shutdown(State::Exhausted).await?;
            return Ok(None);
        }
        if !rc.is_success_with_info() {
            let err = conn.error(rc);
            if self.cancelled.load(Ordering::Acquire) {
                debug!(stmt = stmt.0, error = %err, "fetch interrupted");
                self.cancel().await;
            }
            return Err(err);
        }

        let values = self.columns.read_row(&conn)?;
        self.rowcount += 1;
        Ok(Some(Row::new(values, Arc::clone(&self.info))))
    }

    async fn fetch_all(&mut self) -> Result<Vec<Self::Item>> {
        let mut all_rows = Vec::new();
        while let Some(row) = self.next().await? {
            all_rows.push(row);
        }
        Ok(all_rows)
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release(State::Closed) {
            warn!(error = %e, "failed to release rows");
        }
    }
}

impl std::fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("stmt", &self.stmt.get().handle())
            .field("columns", &self.info.column_names())
            .field("state", &self.state)
            .field("rowcount", &self.rowcount)
            .finish()
    }
}

/// Adapts a [`Cursor`] into a `futures` stream.
///
/// # Example
///
/// ```
/// use oci8_rs::{Connection, ConnectionConfig, CursorStreamExt, positional};
/// use oci8_rs::native::MemoryEngine;
/// use futures::stream::TryStreamExt;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Arc::new(MemoryEngine::new());
///     let conn = Connection::in_memory(&engine, ConnectionConfig::default());
///
///     let rows = conn.query("SELECT :1 FROM dual", &positional(["alice"])).await?;
///     let names: Vec<String> = rows
///         .into_stream()
///         .map_ok(|row| row.get(0).unwrap().to_string())
///         .try_collect()
///         .await?;
///     assert_eq!(names, vec!["alice"]);
///     Ok(())
/// }
/// ```
pub trait CursorStreamExt: Cursor + Sized {
    /// Consume the cursor. The stream ends at exhaustion or right after
    /// the first error.
    fn into_stream(self) -> impl Stream<Item = Result<Self::Item>>;
}

impl<C: Cursor> CursorStreamExt for C {
    fn into_stream(self) -> impl Stream<Item = Result<Self::Item>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next().await?.map(|item| (item, cursor)))
        })
    }
}
