//! The value-semantic future handle (§3.2, §4.B).

use std::sync::Arc;
use std::time::Duration;

use crate::error::FutureError;
use crate::state::SharedState;
use crate::types::{status, FutureId, Progress};

/// A cloneable handle over a [`SharedState`]. Every clone refers to the same
/// underlying task; there is no "owning" clone (§3.2).
///
/// Both the producer facet (`report_*`) and the consumer facet
/// (`result_at`/`wait`/...) live on the same type, mirroring the original
/// implementation's single-class design — callers are expected to share a
/// `Future<T>` between exactly one producer and any number of consumers by
/// convention, not by the type system.
pub struct Future<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> PartialEq for Future<T> {
    /// Two handles are equal iff they share the same underlying state.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl<T> Eq for Future<T> {}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.state.id())
            .field("display_name", &self.state.display_name())
            .field("result_count", &self.state.result_count())
            .field("finished", &self.state.is_finished())
            .field("canceled", &self.state.is_canceled())
            .finish()
    }
}

impl<T> Default for Future<T> {
    /// A future that is already `Started | Canceled | Finished` with no
    /// results and no exception — the "cancelled at birth" boundary case
    /// (§8).
    fn default() -> Self {
        let state = SharedState::new();
        state.report_started();
        state.request_cancel();
        state.report_finished();
        Self { state }
    }
}

impl<T> Future<T> {
    /// Construct a fresh, unstarted future and its shared state together.
    /// The typical way to obtain one is through [`crate::executor::Executor::run`],
    /// which calls this internally.
    pub(crate) fn new() -> Self {
        Self {
            state: SharedState::new(),
        }
    }

    pub(crate) fn from_state(state: Arc<SharedState<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> Arc<SharedState<T>> {
        Arc::clone(&self.state)
    }

    pub fn id(&self) -> FutureId {
        self.state.id()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        self.state.set_display_name(name);
    }

    pub fn display_name(&self) -> Option<String> {
        self.state.display_name()
    }

    // --- producer facet ----------------------------------------------

    pub fn report_started(&self) {
        self.state.report_started();
    }

    pub fn report_running(&self, running: bool) {
        self.state.report_running(running);
    }

    pub fn report_result(&self, value: T) {
        self.state.report_result(value);
    }

    pub fn report_results(&self, values: impl IntoIterator<Item = T>) {
        self.state.report_results(values);
    }

    pub fn report_progress_range(&self, min: i64, max: i64) {
        self.state.report_progress_range(min, max);
    }

    pub fn report_progress_value(&self, value: i64) {
        self.state.report_progress_value(value);
    }

    pub fn report_progress_text(&self, text: impl Into<String>) {
        self.state.report_progress_text(Some(text.into()));
    }

    /// Report one key/value pair on the free-form progress info channel
    /// (§3.1), e.g. `("warning", "sidecar missing")`.
    pub fn report_progress_info(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.report_progress_info(key.into(), value.into());
    }

    pub fn report_exception(&self, error: FutureError) {
        self.state.report_exception(error);
    }

    /// Producer-facet spelling of [`cancel`](Self::cancel): sets `Canceled`
    /// without storing an exception (§3.1, §4.A). Identical effect, offered
    /// under both names since a producer and a consumer each reach for
    /// cancellation through their own facet even though a single shared
    /// state has only one cancellation flag.
    pub fn report_canceled(&self) {
        self.state.request_cancel();
    }

    pub fn report_paused(&self) {
        self.state.report_paused();
    }

    pub fn report_resumed(&self) {
        self.state.report_resumed();
    }

    pub fn report_finished(&self) {
        self.state.report_finished();
    }

    /// Cooperative cancellation checkpoint: blocks while paused, returns
    /// normally if cancellation was requested so the caller can check
    /// [`is_canceled`](Self::is_canceled) and wind down on its own terms
    /// (§5). Never forcibly unwinds the producer's thread.
    pub fn suspend_if_requested(&self) {
        self.state.suspend_if_requested();
    }

    // --- consumer facet ----------------------------------------------

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Synonym for [`is_finished`](Self::is_finished): once a future is
    /// ready, every result it will ever report is already visible and it
    /// stays ready (§3.2, §8).
    pub fn is_ready(&self) -> bool {
        self.state.is_finished()
    }

    pub fn has_exception(&self) -> bool {
        self.state.exception().is_some()
    }

    /// The stored exception, if any, without blocking. Used by the
    /// continuation engine and the propagation handler, which must inspect
    /// state without joining the consumer facet's blocking waits.
    pub(crate) fn exception(&self) -> Option<FutureError> {
        self.state.exception()
    }

    pub fn result_count(&self) -> usize {
        self.state.result_count()
    }

    pub fn progress(&self) -> Progress {
        self.state.progress()
    }

    /// Request cancellation of the task backing this future. Idempotent;
    /// does not block (§4.B).
    pub fn cancel(&self) {
        self.state.request_cancel();
    }

    /// Block until the `index`-th result is available, or rethrow the
    /// stored exception, or report [`FutureError::BrokenChain`] if the
    /// future finished with fewer than `index + 1` results and no
    /// exception.
    pub fn result_at(&self, index: usize) -> Result<T, FutureError>
    where
        T: Clone,
    {
        self.state.result_at(index)
    }

    /// Block until finished, returning every result reported, or rethrow
    /// the stored exception.
    pub fn results(&self) -> Result<Vec<T>, FutureError>
    where
        T: Clone,
    {
        self.state.results()
    }

    /// Block until the future reaches a terminal condition (finished or
    /// canceled), without consuming or rethrowing anything.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Block until `Finished` specifically (distinct from mere
    /// cancellation, which may precede `Finished` by an arbitrary delay if
    /// the producer hasn't wound down yet).
    pub fn wait_for_finished(&self) {
        self.state.wait_for_finished();
    }

    /// As [`wait`](Self::wait), but returns `false` instead of blocking
    /// forever past `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_timeout(timeout)
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// A future already `Started | Finished` carrying exactly one result
    /// (§4.B, "ready future" boundary scenario; grounded in the original
    /// implementation's `make_ready_future`).
    pub fn ready(value: T) -> Self {
        let state = SharedState::new();
        state.report_started();
        state.report_result(value);
        state.report_finished();
        Self { state }
    }
}

impl<T: Send + 'static> Future<T> {
    /// A future already `Started | Canceled | Finished` carrying a stored
    /// exception and no results (grounded in `make_exceptional_future`).
    pub fn exceptional(error: FutureError) -> Self {
        let state = SharedState::new();
        state.report_started();
        state.report_exception(error);
        state.report_finished();
        Self { state }
    }
}
