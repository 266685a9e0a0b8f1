//! Runs producer callables against a [`crate::future::Future`], either on a
//! shared worker pool or on a freshly-spawned dedicated thread (§4.D).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::FutureError;
use crate::future::Future;
use crate::pool::Pool;

/// Configuration for an [`Executor`]'s pool-run mode.
///
/// Mirrors this repository's existing `api::Config`-style pattern: an
/// explicit, `Default`-derived struct passed to a constructor rather than
/// read from environment or files, since this crate is a library with no
/// process lifecycle of its own.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Worker count for the pool-run mode. `None` defaults to
    /// `std::thread::available_parallelism()`.
    pub pool_size: Option<usize>,
}

struct Shared {
    pool: Mutex<Option<Pool>>,
}

/// Runs tasks either on a small shared worker pool (`run`) or on their own
/// dedicated OS thread (`run_dedicated`, for long-lived or blocking-prone
/// producers that must not starve the pool) (§4.D).
///
/// `Executor` is cloneable and cheap to share; every clone refers to the
/// same pool.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let size = config.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        Self {
            shared: Arc::new(Shared {
                pool: Mutex::new(Some(Pool::new(size))),
            }),
        }
    }

    /// Run `task` on the shared pool. Returns a `Future<T>` immediately;
    /// `task` runs once a worker thread is free.
    pub fn run<T, F>(&self, task: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(Future<T>) + Send + 'static,
    {
        let future = new_future();
        self.run_on(future.clone(), task);
        future
    }

    /// As [`run`](Self::run), but posting work against an already-created
    /// `future` rather than allocating a new one. Used by the continuation
    /// engine, which needs the downstream future to exist (so it can be
    /// registered with the [`crate::propagation::PropagationHandler`])
    /// before the job that populates it is scheduled.
    pub(crate) fn run_on<T, F>(&self, future: Future<T>, task: F)
    where
        T: Send + 'static,
        F: FnOnce(Future<T>) + Send + 'static,
    {
        pool_post(&self.shared, move || run_task_body(future, task));
    }

    /// Run `task` on its own dedicated OS thread, bypassing the pool
    /// entirely. Use for producers expected to block for a long time or
    /// that must not be starved by other pooled work (§4.D).
    pub fn run_dedicated<T, F>(&self, task: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(Future<T>) + Send + 'static,
    {
        let future = new_future();
        let handed = future.clone();
        std::thread::Builder::new()
            .name(format!("mediatask-task-{}", handed.id()))
            .spawn(move || run_task_body(handed, task))
            .expect("failed to spawn dedicated task thread");
        future
    }

    /// Post an arbitrary job (used by [`crate::watcher::ExecutionContext::Pool`]).
    pub(crate) fn post(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        pool_post(&self.shared, job);
    }

    /// Stop accepting new pool work and join every worker thread. Does not
    /// affect tasks already running via [`run_dedicated`](Self::run_dedicated).
    pub fn shutdown(&self) {
        if let Some(pool) = self.shared.pool.lock().unwrap().take() {
            pool.shutdown();
        }
    }
}

fn pool_post(shared: &Arc<Shared>, job: Box<dyn FnOnce() + Send + 'static>) {
    match shared.pool.lock().unwrap().as_ref() {
        Some(pool) => pool.post(job),
        None => tracing::warn!("post to a shut-down executor dropped a job"),
    }
}

fn new_future<T: Send + 'static>() -> Future<T> {
    Future::new()
}

/// Shared body for both run modes: reports `started`/`running`, invokes the
/// producer callable behind `catch_unwind`, converts an escaping panic to
/// [`FutureError::Unhandled`], and always reports `finished` exactly once —
/// even if the callable itself forgot to (§4.D, §7).
fn run_task_body<T, F>(future: Future<T>, task: F)
where
    T: Send + 'static,
    F: FnOnce(Future<T>) + Send + 'static,
{
    let span = tracing::trace_span!("mediatask_task", id = future.id());
    let _enter = span.enter();

    future.report_started();
    future.report_running(true);

    let task_future = future.clone();
    let result = catch_unwind(AssertUnwindSafe(|| task(task_future)));

    if let Err(payload) = result {
        tracing::warn!(id = future.id(), "producer callable panicked");
        future.report_exception(FutureError::from_panic(payload));
    }

    future.report_running(false);
    future.report_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn pool_run_produces_a_result_and_finishes() {
        let executor = Executor::new(ExecutorConfig::default());
        let future = executor.run(|f: Future<u32>| {
            f.report_result(7);
        });
        future.wait_for_finished();
        assert_eq!(future.result_at(0).unwrap(), 7);
        executor.shutdown();
    }

    #[test]
    fn panicking_producer_reports_unhandled_and_still_finishes() {
        let executor = Executor::new(ExecutorConfig::default());
        let future = executor.run(|_f: Future<u32>| {
            panic!("boom");
        });
        future.wait_for_finished();
        assert!(future.has_exception());
        assert!(matches!(
            future.results(),
            Err(FutureError::Unhandled { .. })
        ));
        executor.shutdown();
    }

    #[test]
    fn dedicated_thread_run_does_not_use_the_pool() {
        let executor = Executor::new(ExecutorConfig {
            pool_size: Some(1),
        });
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let future = executor.run_dedicated(move |f: Future<u32>| {
            std::thread::sleep(Duration::from_millis(5));
            ran_clone.store(true, Ordering::SeqCst);
            f.report_result(1);
        });
        future.wait_for_finished();
        assert!(ran.load(Ordering::SeqCst));
        executor.shutdown();
    }
}
