//! Cancellable execution of blocking native calls.
//!
//! Native execute and fetch block the calling thread, so they run on the
//! blocking pool. A [`CancelWatch`] runs next to the call: when the
//! caller's cancellation future completes before the call is done, it
//! issues a break on the session so the native call returns early with
//! `ORA-01013`. The watch is always joined before control returns to the
//! caller, so no break can arrive after the call it was meant for.
//!
//! A blocking call keeps running when the future that started it is
//! dropped. Everything the call reads, such as bind buffers, moves onto the
//! blocking pool with it, and a per-statement [`CallGate`] stays locked
//! until the call returns. The next call on that statement waits for it,
//! and releases requested meanwhile are deferred until it returns.

use crate::connection::Connection;
use crate::error::Result;
use crate::native::{ReturnCode, StmtHandle};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Serializes native calls on one statement handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallGate(Arc<Mutex<()>>);

/// Held for the duration of one native call.
pub(crate) type CallGuard = OwnedMutexGuard<()>;

impl CallGate {
    /// Wait for any call still running on the statement.
    pub(crate) async fn enter(&self) -> CallGuard {
        Arc::clone(&self.0).lock_owned().await
    }

    /// Run `release` once no call is running. When idle it runs right
    /// away and its result is returned; otherwise it runs on a task that
    /// waits for the running call, and the result is discarded.
    pub(crate) fn when_idle<R, T>(&self, release: R) -> Option<T>
    where
        R: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if let Ok(_idle) = Arc::clone(&self.0).try_lock_owned() {
            return Some(release());
        }
        let gate = Arc::clone(&self.0);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                trace!("native call in flight, deferring release");
                runtime.spawn(async move {
                    let _idle = gate.lock_owned().await;
                    let _ = release();
                });
                None
            }
            // No runtime to defer to; wait for the call here.
            Err(_) => {
                let _idle = gate.blocking_lock_owned();
                Some(release())
            }
        }
    }
}

/// Background task that interrupts the session when cancellation fires.
#[derive(Debug)]
pub(crate) struct CancelWatch {
    done: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl CancelWatch {
    pub(crate) fn spawn<F>(conn: Arc<Connection>, cancel: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done, mut rx) = oneshot::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = &mut rx => {}
                _ = cancel => {
                    // The call may have completed while cancel was resolving.
                    if let Err(TryRecvError::Empty) = rx.try_recv() {
                        flag.store(true, Ordering::Release);
                        if let Err(e) = conn.interrupt() {
                            warn!(error = %e, "break request failed");
                        }
                    }
                }
            }
        });

        Self {
            done: Some(done),
            task: Some(task),
            fired,
        }
    }

    /// Tell the watcher the call it guards has returned.
    pub(crate) fn signal_done(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    /// Signal completion and wait for the watcher to exit.
    pub(crate) async fn finish(&mut self) {
        self.signal_done();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "cancel watcher failed");
            }
        }
    }

    /// Whether the watcher has interrupted the session.
    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Flag shared with the watcher task.
    pub(crate) fn fired_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fired)
    }
}

impl Drop for CancelWatch {
    fn drop(&mut self) {
        // Dropping the sender wakes the watcher; it exits without a break.
        self.done.take();
    }
}

/// Execute `stmt` on the blocking pool while watching `cancel`.
///
/// `held` travels with the native call and comes back with its raw
/// status; the caller decides which codes count as success. If the
/// returned future is dropped first, `held` is dropped only after the
/// native call has returned.
pub(crate) async fn execute<F, T>(
    conn: &Arc<Connection>,
    stmt: StmtHandle,
    iters: u32,
    cancel: F,
    held: T,
) -> Result<(ReturnCode, T)>
where
    F: Future<Output = ()> + Send + 'static,
    T: Send + 'static,
{
    let mut watch = CancelWatch::spawn(Arc::clone(conn), cancel);
    let api = Arc::clone(conn.api());
    let h = conn.handles();
    let mode = conn.execute_mode();

    let joined = tokio::task::spawn_blocking(move || {
        let rc = api.stmt_execute(h.svc, stmt, h.err, iters, mode);
        (rc, held)
    })
    .await;
    watch.finish().await;
    let (rc, held) = joined?;

    debug!(
        stmt = stmt.0,
        iters,
        mode,
        status = %rc,
        cancelled = watch.fired(),
        "executed statement"
    );
    Ok((rc, held))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::native::{ExecScript, MemoryEngine, NativeApi, Script};
    use std::time::Duration;

    #[tokio::test]
    async fn test_watch_without_cancel_never_breaks() {
        let engine = Arc::new(MemoryEngine::new());
        let conn = Connection::in_memory(&engine, ConnectionConfig::default());
        let mut watch = CancelWatch::spawn(conn, std::future::pending());
        watch.finish().await;
        assert!(!watch.fired());
        assert_eq!(engine.break_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_after_done_never_breaks() {
        let engine = Arc::new(MemoryEngine::new());
        let conn = Connection::in_memory(&engine, ConnectionConfig::default());
        let (tx, rx) = oneshot::channel::<()>();
        let mut watch = CancelWatch::spawn(conn, async move {
            let _ = rx.await;
        });
        watch.finish().await;
        let _ = tx.send(());
        tokio::task::yield_now().await;
        assert!(!watch.fired());
        assert_eq!(engine.break_count(), 0);
    }

    #[tokio::test]
    async fn test_release_waits_for_running_call() {
        let gate = CallGate::default();
        let released = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&released);
        assert_eq!(gate.when_idle(move || flag.swap(true, Ordering::AcqRel)), Some(false));
        assert!(released.swap(false, Ordering::AcqRel));

        let guard = gate.enter().await;
        let flag = Arc::clone(&released);
        assert_eq!(gate.when_idle(move || flag.store(true, Ordering::Release)), None);
        tokio::task::yield_now().await;
        assert!(!released.load(Ordering::Acquire));

        drop(guard);
        let _idle = gate.enter().await;
        assert!(released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_execute_interrupted_by_cancel() {
        let sql = "UPDATE slow SET x = 1";
        let engine = Arc::new(MemoryEngine::new().with_script(
            sql,
            Script::exec(ExecScript::new(1)).with_latency(Duration::from_secs(30)),
        ));
        let conn = Connection::in_memory(&engine, ConnectionConfig::default());
        let h = conn.handles();
        let stmt = engine.stmt_prepare(h.svc, h.err, sql).unwrap();

        let (rc, ()) = execute(&conn, stmt, 1, tokio::time::sleep(Duration::from_millis(50)), ())
            .await
            .unwrap();
        assert_eq!(rc, ReturnCode::ERROR);
        assert_eq!(conn.error(rc).code(), Some(1013));
        assert_eq!(engine.break_count(), 1);
    }
}
