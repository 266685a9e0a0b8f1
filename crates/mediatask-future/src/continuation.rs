//! The continuation engine: `then`, `tap`, `stap`, `finally` (§4.E), plus a
//! [`FutureExt`] trait providing them as methods.
//!
//! Every continuation registers its `(downstream, upstream)` pair with the
//! [`PropagationHandler`] before scheduling the job that populates the
//! downstream future, so a caller who cancels the downstream handle
//! immediately after creation can never race past the registration.

use std::sync::Arc;

use crate::error::FutureError;
use crate::executor::Executor;
use crate::future::Future;
use crate::propagation::{PropagationHandler, PropagationLink};
use crate::watcher::{ExecutionContext, WatcherBuilder};

struct CancelUpstreamLink<A, B> {
    downstream: Future<B>,
    upstream: Future<A>,
}

impl<A, B> PropagationLink for CancelUpstreamLink<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn poll(&self) {
        if self.downstream.is_canceled() && !self.upstream.is_canceled() {
            self.upstream.cancel();
        }
    }

    fn is_done(&self) -> bool {
        self.upstream.is_finished() && self.downstream.is_finished()
    }
}

fn register_cancel_propagation<A, B>(downstream: &Future<B>, upstream: &Future<A>)
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    PropagationHandler::global().register(Box::new(CancelUpstreamLink {
        downstream: downstream.clone(),
        upstream: upstream.clone(),
    }));
}

/// A link whose only job is to keep an `Arc<T>` alive until both sides of a
/// continuation have finished. Used to keep a [`stap`] watcher registered
/// for exactly as long as it can still fire, without leaking it forever.
struct KeepAliveLink<A, B, K> {
    downstream: Future<B>,
    upstream: Future<A>,
    _keep_alive: Arc<K>,
}

impl<A, B, K> PropagationLink for KeepAliveLink<A, B, K>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    K: Send + Sync + 'static,
{
    fn poll(&self) {}

    fn is_done(&self) -> bool {
        self.upstream.is_finished() && self.downstream.is_finished()
    }
}

/// Propagate `upstream`'s stored exception onto `downstream`, unless
/// `downstream` already reached a terminal state (§4.B: reports on a
/// finished future are ignored with a warning, not an error).
fn propagate_exception<A, B>(downstream: &Future<B>, upstream_error: Option<FutureError>) -> bool {
    if let Some(err) = upstream_error {
        downstream.report_exception(err);
        true
    } else {
        false
    }
}

/// Map the complete, ordered result set of `upstream` through `f` once
/// `upstream` finishes, reporting a single downstream result. If `upstream`
/// carries an exception, it is rethrown on `downstream` instead and `f`
/// never runs; if `upstream` canceled without an exception, `downstream` is
/// canceled the same way and `f` never runs either (§4.E, §7, §8).
pub fn then<A, B, F>(executor: &Executor, upstream: Future<A>, f: F) -> Future<B>
where
    A: Clone + Send + Sync + 'static,
    B: Send + Sync + 'static,
    F: FnOnce(Vec<A>) -> B + Send + 'static,
{
    let downstream: Future<B> = Future::new();
    register_cancel_propagation(&downstream, &upstream);

    executor.run_on(downstream.clone(), move |out| {
        out.report_started();
        upstream.wait_for_finished();
        if propagate_exception(&out, upstream.exception()) {
            out.report_finished();
            return;
        }
        if upstream.is_canceled() || out.is_canceled() {
            out.report_canceled();
            out.report_finished();
            return;
        }
        match upstream.results() {
            Ok(values) => {
                let mapped = f(values);
                out.report_result(mapped);
            }
            Err(err) => out.report_exception(err),
        }
        out.report_finished();
    });

    downstream
}

/// For each new result of `upstream`, as it arrives, invoke `f` on it and
/// then forward that exact value to `downstream` unchanged — `f` is invoked
/// exactly `result_count(upstream)` times if `upstream` finishes without an
/// exception, and not at all for results that never arrive because
/// `upstream` was canceled or raised one first (§4.E, §8). Dispatches
/// inline on the thread that reported the result, so `downstream` receives
/// results in the same order `upstream` produced them.
pub fn tap<A, F>(upstream: Future<A>, f: F) -> Future<A>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(&A) + Send + Sync + 'static,
{
    let downstream: Future<A> = Future::new();
    downstream.report_started();
    register_cancel_propagation(&downstream, &upstream);

    let watcher = Arc::new(
        WatcherBuilder::<A>::new(ExecutionContext::Inline)
            .on_result_ready({
                let downstream = downstream.clone();
                move |up: &Future<A>, begin, end| {
                    for index in begin..end {
                        if let Ok(value) = up.result_at(index) {
                            f(&value);
                            downstream.report_result(value);
                        }
                    }
                }
            })
            .on_finished({
                let downstream = downstream.clone();
                move |up: &Future<A>| {
                    propagate_exception(&downstream, up.exception());
                    downstream.report_finished();
                }
            })
            .build(),
    );
    watcher.set_future(&upstream);
    PropagationHandler::global().register(Box::new(KeepAliveLink {
        downstream: downstream.clone(),
        upstream: upstream.clone(),
        _keep_alive: watcher,
    }));

    downstream
}

/// The streaming counterpart to [`then`]: instead of waiting for `upstream`
/// to finish, attaches a watcher and, as each new `[begin, end)` range of
/// results arrives, gives `f` a read-only view of `upstream` and write
/// access to `downstream` so it decides what — if anything — to forward,
/// including mapping one upstream result to a different number of
/// downstream results. This is the operation `mediatask-pipeline` uses to
/// wire its scan stage directly into its loader stage, one discovered file
/// at a time.
pub fn stap<A, B, F>(upstream: Future<A>, f: F) -> Future<B>
where
    A: Clone + Send + Sync + 'static,
    B: Send + Sync + 'static,
    F: Fn(&Future<A>, usize, usize, &Future<B>) + Send + Sync + 'static,
{
    let downstream: Future<B> = Future::new();
    downstream.report_started();
    register_cancel_propagation(&downstream, &upstream);

    let watcher = Arc::new(
        WatcherBuilder::<A>::new(ExecutionContext::Inline)
            .on_result_ready({
                let downstream = downstream.clone();
                move |up: &Future<A>, begin, end| {
                    f(up, begin, end, &downstream);
                }
            })
            .on_finished({
                let downstream = downstream.clone();
                move |up: &Future<A>| {
                    propagate_exception(&downstream, up.exception());
                    downstream.report_finished();
                }
            })
            .build(),
    );
    watcher.set_future(&upstream);
    PropagationHandler::global().register(Box::new(KeepAliveLink {
        downstream: downstream.clone(),
        upstream: upstream.clone(),
        _keep_alive: watcher,
    }));

    downstream
}

/// Run `f` once `upstream` reaches a terminal state, regardless of outcome,
/// then forward that exact outcome (results, or an exception) to
/// `downstream` unchanged — the continuation-engine analogue of a `finally`
/// block.
pub fn finally<A, F>(executor: &Executor, upstream: Future<A>, f: F) -> Future<A>
where
    A: Clone + Send + Sync + 'static,
    F: FnOnce(&Future<A>) + Send + 'static,
{
    let downstream: Future<A> = Future::new();
    register_cancel_propagation(&downstream, &upstream);

    executor.run_on(downstream.clone(), move |out| {
        out.report_started();
        upstream.wait_for_finished();
        f(&upstream);
        if propagate_exception(&out, upstream.exception()) {
            out.report_finished();
            return;
        }
        match upstream.results() {
            Ok(values) => out.report_results(values),
            Err(err) => out.report_exception(err),
        }
        out.report_finished();
    });

    downstream
}

/// Method-call sugar for [`then`]/[`tap`]/[`stap`]/[`finally`], mirroring
/// the "free function + function-object parameter" redesign direction
/// recorded for the continuation engine.
pub trait FutureExt<A> {
    fn then<B, F>(self, executor: &Executor, f: F) -> Future<B>
    where
        B: Send + Sync + 'static,
        F: FnOnce(Vec<A>) -> B + Send + 'static;

    fn tap<F>(self, f: F) -> Future<A>
    where
        F: Fn(&A) + Send + Sync + 'static;

    fn stap<B, F>(self, f: F) -> Future<B>
    where
        B: Send + Sync + 'static,
        F: Fn(&Future<A>, usize, usize, &Future<B>) + Send + Sync + 'static;

    fn finally<F>(self, executor: &Executor, f: F) -> Future<A>
    where
        F: FnOnce(&Future<A>) + Send + 'static;
}

impl<A> FutureExt<A> for Future<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn then<B, F>(self, executor: &Executor, f: F) -> Future<B>
    where
        B: Send + Sync + 'static,
        F: FnOnce(Vec<A>) -> B + Send + 'static,
    {
        then(executor, self, f)
    }

    fn tap<F>(self, f: F) -> Future<A>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        tap(self, f)
    }

    fn stap<B, F>(self, f: F) -> Future<B>
    where
        B: Send + Sync + 'static,
        F: Fn(&Future<A>, usize, usize, &Future<B>) + Send + Sync + 'static,
    {
        stap(self, f)
    }

    fn finally<F>(self, executor: &Executor, f: F) -> Future<A>
    where
        F: FnOnce(&Future<A>) + Send + 'static,
    {
        finally(executor, self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn then_maps_the_final_result_set() {
        let executor = Executor::new(ExecutorConfig::default());
        let upstream = Future::ready(vec![1, 2, 3]);
        let downstream = then(&executor, upstream, |values| {
            values.into_iter().next().unwrap().iter().sum::<i32>()
        });
        downstream.wait_for_finished();
        assert_eq!(downstream.result_at(0).unwrap(), 6);
        executor.shutdown();
    }

    #[test]
    fn tap_runs_side_effect_once_per_result_and_passes_results_through() {
        let upstream: Future<u32> = Future::new();
        upstream.report_started();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let downstream = tap(upstream.clone(), move |value| {
            seen_clone.lock().unwrap().push(*value as i64);
        });

        upstream.report_result(1);
        upstream.report_result(2);
        upstream.report_result(3);
        upstream.report_finished();
        downstream.wait_for_finished();

        assert_eq!(seen.lock().unwrap().as_slice(), [1, 2, 3]);
        assert_eq!(downstream.results().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn then_rethrows_upstream_exception_without_running_f() {
        let executor = Executor::new(ExecutorConfig::default());
        let upstream: Future<u32> =
            Future::exceptional(FutureError::UnreadableInput("bad file".into()));
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let downstream = then(&executor, upstream, move |_| {
            ran_clone.store(true, Ordering::SeqCst);
            0u32
        });
        downstream.wait_for_finished();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(downstream.has_exception());
        executor.shutdown();
    }

    #[test]
    fn stap_maps_results_as_they_stream() {
        let upstream: Future<u32> = Future::new();
        upstream.report_started();
        let downstream: Future<String> = stap(upstream.clone(), |up, begin, end, down| {
            for index in begin..end {
                if let Ok(value) = up.result_at(index) {
                    down.report_result(format!("#{value}"));
                }
            }
        });

        upstream.report_result(1);
        upstream.report_result(2);
        upstream.report_finished();
        downstream.wait_for_finished();

        assert_eq!(
            downstream.results().unwrap(),
            vec!["#1".to_string(), "#2".to_string()]
        );
    }

    #[test]
    fn then_cancels_downstream_without_running_callback_when_upstream_canceled() {
        let executor = Executor::new(ExecutorConfig::default());
        let upstream: Future<u32> = Future::default();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let downstream = then(&executor, upstream, move |_| {
            ran_clone.store(true, Ordering::SeqCst);
            0u32
        });
        downstream.wait_for_finished();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(downstream.is_canceled());
        assert!(!downstream.has_exception());
        assert_eq!(downstream.result_count(), 0);
        executor.shutdown();
    }

    #[test]
    fn finally_runs_even_when_upstream_is_canceled() {
        let executor = Executor::new(ExecutorConfig::default());
        let upstream: Future<u32> = Future::new();
        upstream.report_started();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let downstream = finally(&executor, upstream.clone(), move |_| {
            ran_clone.store(true, Ordering::SeqCst);
        });
        upstream.cancel();
        upstream.report_finished();
        downstream.wait_for_finished();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ran.load(Ordering::SeqCst));
        executor.shutdown();
    }
}
