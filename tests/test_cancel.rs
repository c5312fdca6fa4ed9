//! Cancellation of executions and row iteration.
//!
//! Run with: cargo test --test test_cancel

use oci8_rs::native::{
    ColumnSpec, ExecScript, MemoryEngine, NativeCell, QueryScript, Script,
};
use oci8_rs::{positional, Connection, ConnectionConfig, Cursor, Error, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const SLOW_UPDATE: &str = "UPDATE accounts SET balance = balance * 2";
const SLOW_SELECT: &str = "SELECT id FROM big_table";
const SLOW_FETCH: &str = "SELECT id FROM remote_table";

fn engine() -> Arc<MemoryEngine> {
    let ids = || {
        QueryScript::new(vec![ColumnSpec::number("ID", 10, 0)])
            .row(vec![NativeCell::Int(1)])
            .row(vec![NativeCell::Int(2)])
            .row(vec![NativeCell::Int(3)])
    };
    Arc::new(
        MemoryEngine::new()
            .with_script(
                SLOW_UPDATE,
                Script::exec(ExecScript::new(10)).with_latency(Duration::from_secs(30)),
            )
            .with_script(
                SLOW_SELECT,
                Script::query(ids()).with_latency(Duration::from_secs(30)),
            )
            .with_script(
                SLOW_FETCH,
                Script::query(ids()).with_fetch_latency(Duration::from_secs(30)),
            ),
    )
}

fn after(ms: u64) -> impl std::future::Future<Output = ()> + Send + 'static {
    tokio::time::sleep(Duration::from_millis(ms))
}

fn assert_user_cancel<T>(result: oci8_rs::Result<T>) {
    match result {
        Err(Error::Oracle { code, message }) => {
            assert_eq!(code, 1013, "unexpected error: {}", message);
        }
        Err(other) => panic!("Expected ORA-01013, got {:?}", other),
        Ok(_) => panic!("Expected ORA-01013, got success"),
    }
}

#[tokio::test]
async fn test_exec_interrupted_by_cancel() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(SLOW_UPDATE).unwrap();

    let started = Instant::now();
    let result = stmt.exec_with_cancel(&[], after(50)).await;

    assert_user_cancel(result);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.break_count(), 1);

    // The statement survives the interruption.
    assert!(!stmt.is_closed());
    stmt.close().unwrap();
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_exec_with_bound_values_interrupted_without_leaks() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let sql = "UPDATE accounts SET owner = :1 WHERE id = :2";
    engine.set_script(
        sql,
        Script::exec(ExecScript::new(1)).with_latency(Duration::from_secs(30)),
    );

    let mut stmt = conn.prepare(sql).unwrap();
    let result = stmt
        .exec_with_cancel(&positional([Value::from("Ada"), Value::from(7i64)]), after(50))
        .await;
    assert_user_cancel(result);
    drop(stmt);
    assert_eq!(engine.live_allocations(), 0);
}

#[tokio::test]
async fn test_query_interrupted_during_execute() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(SLOW_SELECT).unwrap();

    let started = Instant::now();
    let result = stmt.query_with_cancel(&[], after(50)).await;
    assert_user_cancel(result);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.break_count(), 1);

    drop(stmt);
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_rows_cancelled_during_fetch() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(SLOW_FETCH).unwrap();

    let started = Instant::now();
    let mut rows = stmt.query_with_cancel(&[], after(50)).await.unwrap();

    // The interrupted fetch reports the break itself.
    assert_user_cancel(rows.next().await);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(rows.is_closed());

    // Later calls report the closed, cancelled rows.
    assert!(matches!(rows.next().await, Err(Error::Cancelled)));
    assert!(matches!(rows.fetch_all().await, Err(Error::Cancelled)));
    assert_eq!(engine.break_count(), 1);

    drop(rows);
    stmt.close().unwrap();
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_rows_cancelled_between_fetches() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let (tx, rx) = oneshot::channel::<()>();
    let cancel = async move {
        let _ = rx.await;
    };

    let mut rows = conn
        .prepare("SELECT :1 FROM dual")
        .unwrap()
        .into_rows(&positional([1i64]), cancel)
        .await
        .unwrap();

    tx.send(()).unwrap();
    // Let the watcher observe the signal.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(rows.next().await, Err(Error::Cancelled)));
    drop(rows);
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_cancel_after_completion_is_ignored() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let sql = "DELETE FROM sessions WHERE expired = 1";
    engine.set_script(sql, Script::exec(ExecScript::new(4)));

    let (tx, rx) = oneshot::channel::<()>();
    let mut stmt = conn.prepare(sql).unwrap();
    let result = stmt
        .exec_with_cancel(&[], async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
    assert_eq!(result.rows_affected().unwrap(), 4);

    // The watcher is gone; nothing receives this.
    assert!(tx.send(()).is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.break_count(), 0);

    // The statement is still usable.
    let again = stmt.exec(&[]).await.unwrap();
    assert_eq!(again.rows_affected().unwrap(), 4);
}

#[tokio::test]
async fn test_rows_complete_before_cancel() {
    let engine = engine();
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare("SELECT :1, :2 FROM dual").unwrap();
    let mut rows = stmt
        .query_with_cancel(&positional([Value::from("a"), Value::from("b")]), after(10_000))
        .await
        .unwrap();

    let all = rows.fetch_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(rows.next().await.unwrap().is_none());
    drop(rows);
    assert_eq!(engine.break_count(), 0);
}

#[tokio::test]
async fn test_timed_out_exec_keeps_binds_until_call_returns() {
    let engine = Arc::new(MemoryEngine::new());
    let sql = "UPDATE accounts SET owner = :1 WHERE id = :2";
    engine.set_script(
        sql,
        Script::exec(ExecScript::new(1)).with_latency(Duration::from_millis(300)),
    );
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(sql).unwrap();
    let args = positional([Value::from("mallory"), Value::from(7i64)]);

    let started = Instant::now();
    let timed_out = tokio::time::timeout(Duration::from_millis(50), stmt.exec(&args)).await;
    assert!(timed_out.is_err());
    // The native call is still running against its bind buffers.
    assert!(engine.live_allocations() > 0);
    assert_eq!(engine.executions().len(), 1);

    // The next run waits for the abandoned one instead of overlapping it.
    let result = stmt.exec(&args).await.unwrap();
    assert_eq!(result.rows_affected().unwrap(), 1);
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(engine.executions().len(), 2);
    assert_eq!(engine.break_count(), 0);
    assert_eq!(engine.live_allocations(), 0);
}

#[tokio::test]
async fn test_statement_dropped_during_timed_out_query() {
    let engine = Arc::new(MemoryEngine::new());
    let sql = "SELECT id FROM big_table WHERE id > :1";
    engine.set_script(
        sql,
        Script::query(
            QueryScript::new(vec![ColumnSpec::number("ID", 10, 0)]).row(vec![NativeCell::Int(1)]),
        )
        .with_latency(Duration::from_millis(300)),
    );
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(sql).unwrap();

    let args = positional([0i64]);
    assert!(tokio::time::timeout(Duration::from_millis(50), stmt.query(&args))
        .await
        .is_err());
    drop(stmt);
    // Handle and binds outlive the drop until the execution returns.
    assert_eq!(engine.live_statements(), 1);
    assert!(engine.live_allocations() > 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.live_statements(), 0);
    assert_eq!(engine.live_allocations(), 0);
}

#[tokio::test]
async fn test_rows_dropped_during_timed_out_fetch() {
    let engine = Arc::new(MemoryEngine::new());
    let sql = "SELECT id FROM remote_table";
    engine.set_script(
        sql,
        Script::query(
            QueryScript::new(vec![ColumnSpec::number("ID", 10, 0)]).row(vec![NativeCell::Int(1)]),
        )
        .with_fetch_latency(Duration::from_millis(300)),
    );
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = conn.prepare(sql).unwrap();

    let mut rows = stmt.query(&[]).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(50), rows.next())
        .await
        .is_err());
    drop(rows);
    // Define buffers stay allocated while the fetch writes into them.
    assert!(engine.live_allocations() > 0);

    // Reuse waits for the abandoned fetch.
    let mut again = stmt.query(&[]).await.unwrap();
    let row = again.next().await.unwrap().expect("Expected a row");
    assert_eq!(row.get(0), Some(&Value::from(1i64)));
    drop(again);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.live_allocations(), 0);
}
