//! The shared, reference-counted state block behind every [`crate::future::Future`]
//! (§3.1, §4.A).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::FutureError;
use crate::types::{next_id, status, FutureId, Progress};
use crate::watcher::Event;

type Listener = Arc<dyn Fn(Event) + Send + Sync>;

struct Inner<T> {
    results: Vec<T>,
    exception: Option<FutureError>,
    progress: Progress,
    last_delivered_progress_value: Option<i64>,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            exception: None,
            progress: Progress::default(),
            last_delivered_progress_value: None,
        }
    }
}

/// The ref-counted block of state a family of [`crate::future::Future`]
/// clones shares (§3.1). Never exposed directly outside the crate; always
/// reached through `Arc<SharedState<T>>`.
pub struct SharedState<T> {
    id: FutureId,
    display_name: Mutex<Option<String>>,
    status_bits: std::sync::atomic::AtomicU8,
    result_count: AtomicUsize,
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl<T> SharedState<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            display_name: Mutex::new(None),
            status_bits: std::sync::atomic::AtomicU8::new(0),
            result_count: AtomicUsize::new(0),
            inner: Mutex::new(Inner::default()),
            cond: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> FutureId {
        self.id
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.lock().unwrap().clone()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.display_name.lock().unwrap() = Some(name.into());
    }

    fn bits(&self) -> u8 {
        self.status_bits.load(Ordering::Acquire)
    }

    fn set_bit(&self, bit: u8) -> bool {
        let prev = self.status_bits.fetch_or(bit, Ordering::AcqRel);
        prev & bit == 0
    }

    fn clear_bit(&self, bit: u8) -> bool {
        let prev = self.status_bits.fetch_and(!bit, Ordering::AcqRel);
        prev & bit != 0
    }

    pub fn is_started(&self) -> bool {
        self.bits() & status::STARTED != 0
    }

    pub fn is_running(&self) -> bool {
        self.bits() & status::RUNNING != 0
    }

    pub fn is_paused(&self) -> bool {
        self.bits() & status::PAUSED != 0
    }

    pub fn is_canceled(&self) -> bool {
        self.bits() & status::CANCELED != 0
    }

    pub fn is_finished(&self) -> bool {
        self.bits() & status::FINISHED != 0
    }

    pub fn result_count(&self) -> usize {
        self.result_count.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> Progress {
        self.inner.lock().unwrap().progress.clone()
    }

    // --- listener registry -------------------------------------------------

    /// Register a listener, returning an id usable with
    /// [`remove_listener`](Self::remove_listener). A listener attaching late
    /// still observes history it missed: if results are already available it
    /// is replayed a single catch-up `ResultReady { begin: 0, end: count }`,
    /// and if the state already reached `Canceled`/`Finished` it is replayed
    /// those too (§4.C).
    ///
    /// The result-count read here and the result-count read taken by
    /// [`report_result`]/[`report_results`] for their own live dispatch both
    /// happen while holding `inner`, with `listeners` always locked only
    /// after `inner` — so a result reported concurrently with this call is
    /// observed by exactly one of the two paths (replay here, or live
    /// dispatch there), never both and never neither.
    pub(crate) fn add_listener(&self, listener: Listener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let result_count = {
            let inner = self.inner.lock().unwrap();
            let mut listeners = self.listeners.lock().unwrap();
            listeners.push((id, Arc::clone(&listener)));
            inner.results.len()
        };

        if result_count > 0 {
            listener(Event::ResultReady {
                begin: 0,
                end: result_count,
            });
        }
        let bits = self.bits();
        if bits & status::CANCELED != 0 {
            listener(Event::Canceled);
        }
        if bits & status::FINISHED != 0 {
            listener(Event::Finished);
        }
        id
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    /// Clone of the current listener list, taken under `listeners` alone.
    /// Callers that must coordinate this snapshot with a concurrent
    /// `add_listener` (i.e. result dispatch) take it while still holding
    /// `inner`, matching `add_listener`'s lock order.
    fn listener_snapshot(&self) -> Vec<Listener> {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    fn notify(&self, event: Event) {
        for listener in self.listener_snapshot() {
            listener(event.clone());
        }
    }

    // --- producer facet ------------------------------------------------

    pub fn report_started(&self) {
        if self.is_finished() {
            tracing::warn!(id = self.id, "report_started on a finished future ignored");
            return;
        }
        if self.set_bit(status::STARTED) {
            tracing::trace!(id = self.id, "started");
        }
    }

    pub fn report_running(&self, running: bool) {
        if self.is_finished() {
            return;
        }
        if running {
            self.set_bit(status::RUNNING);
        } else {
            self.clear_bit(status::RUNNING);
        }
    }

    pub fn report_paused(&self) {
        if self.is_finished() {
            return;
        }
        if self.set_bit(status::PAUSED) {
            self.notify(Event::Paused);
        }
    }

    pub fn report_resumed(&self) {
        if self.clear_bit(status::PAUSED) {
            let _guard = self.inner.lock().unwrap();
            self.cond.notify_all();
            drop(_guard);
            self.notify(Event::Resumed);
        }
    }

    /// Block the calling (producer) thread while paused, returning once
    /// resumed or canceled (§5, "suspend_if_requested").
    pub fn suspend_if_requested(&self) {
        if !self.is_paused() {
            return;
        }
        let guard = self.inner.lock().unwrap();
        let _unused = self
            .cond
            .wait_while(guard, |_| self.is_paused() && !self.is_canceled())
            .unwrap();
    }

    pub fn report_result(&self, value: T) {
        if self.is_finished() {
            tracing::warn!(id = self.id, "report_result on a finished future ignored");
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let begin = inner.results.len();
        inner.results.push(value);
        let end = inner.results.len();
        self.result_count.store(end, Ordering::Release);
        self.cond.notify_all();
        let snapshot = self.listener_snapshot();
        drop(inner);
        for listener in snapshot {
            listener(Event::ResultReady { begin, end });
        }
    }

    pub fn report_results(&self, values: impl IntoIterator<Item = T>) {
        if self.is_finished() {
            tracing::warn!(id = self.id, "report_results on a finished future ignored");
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let begin = inner.results.len();
        inner.results.extend(values);
        let end = inner.results.len();
        self.result_count.store(end, Ordering::Release);
        self.cond.notify_all();
        if end == begin {
            return;
        }
        let snapshot = self.listener_snapshot();
        drop(inner);
        for listener in snapshot {
            listener(Event::ResultReady { begin, end });
        }
    }

    pub fn report_progress_range(&self, min: i64, max: i64) {
        if self.is_finished() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.progress.set_range(min, max);
        }
        self.notify(Event::ProgressRangeChanged { min, max });
    }

    /// Report a progress value. Coalesced (not delivered to watchers, though
    /// still stored) when it has not advanced past the last *delivered*
    /// value — a deliberate throttling policy, not an oversight (see
    /// DESIGN.md Open Question 3).
    pub fn report_progress_value(&self, value: i64) {
        if self.is_finished() {
            return;
        }
        let should_deliver = {
            let mut inner = self.inner.lock().unwrap();
            inner.progress.value = value;
            let changed = inner.last_delivered_progress_value != Some(value);
            if changed {
                inner.last_delivered_progress_value = Some(value);
            }
            changed
        };
        if should_deliver {
            self.notify(Event::ProgressValueChanged { value });
        }
    }

    pub fn report_progress_text(&self, text: Option<String>) {
        if self.is_finished() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.progress.text = text.clone();
        }
        self.notify(Event::ProgressTextChanged { text });
    }

    /// Append a key/value pair to the free-form, out-of-band info channel
    /// (§3.1) — used for structured status such as `("warning", "...")` that
    /// doesn't fit the min/max/value/text progress fields.
    pub fn report_progress_info(&self, key: String, value: String) {
        if self.is_finished() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.progress.info.push((key.clone(), value.clone()));
        }
        self.notify(Event::ProgressInfo { key, value });
    }

    /// Store an exception. Per §4.B, this also sets `CANCELED` — an
    /// exception is always a cancellation, though not every cancellation
    /// carries an exception.
    pub fn report_exception(&self, error: FutureError) {
        let mut inner = self.inner.lock().unwrap();
        if self.is_finished() {
            tracing::warn!(id = self.id, "report_exception on a finished future ignored");
            return;
        }
        if inner.exception.is_some() {
            tracing::warn!(id = self.id, "exception already stored; ignoring new one");
            return;
        }
        inner.exception = Some(error);
        drop(inner);
        if self.set_bit(status::CANCELED) {
            self.notify(Event::Canceled);
        }
        let guard = self.inner.lock().unwrap();
        self.cond.notify_all();
        drop(guard);
    }

    pub fn exception(&self) -> Option<FutureError> {
        self.inner.lock().unwrap().exception.clone()
    }

    /// Request cancellation. Idempotent; does not itself store an exception
    /// (cancellation without an exception is a valid terminal condition,
    /// §3.1).
    pub fn request_cancel(&self) {
        if self.is_finished() {
            return;
        }
        if self.set_bit(status::CANCELED) {
            let guard = self.inner.lock().unwrap();
            self.cond.notify_all();
            drop(guard);
            self.notify(Event::Canceled);
        }
    }

    /// Mark the future terminal. Idempotent; the first caller wins and
    /// fires `Finished` to watchers exactly once.
    pub fn report_finished(&self) {
        if self.set_bit(status::FINISHED) {
            self.clear_bit(status::RUNNING);
            let guard = self.inner.lock().unwrap();
            self.cond.notify_all();
            drop(guard);
            self.notify(Event::Finished);
        }
    }

    // --- consumer facet --------------------------------------------------

    pub fn result_at(&self, index: usize) -> Result<T, FutureError>
    where
        T: Clone,
    {
        let guard = self
            .cond
            .wait_while(self.inner.lock().unwrap(), |inner| {
                inner.results.len() <= index
                    && inner.exception.is_none()
                    && self.bits() & status::FINISHED == 0
            })
            .unwrap();
        if let Some(err) = &guard.exception {
            return Err(err.clone());
        }
        guard
            .results
            .get(index)
            .cloned()
            .ok_or_else(|| FutureError::BrokenChain(self.id))
    }

    pub fn results(&self) -> Result<Vec<T>, FutureError>
    where
        T: Clone,
    {
        let guard = self
            .cond
            .wait_while(self.inner.lock().unwrap(), |inner| {
                self.bits() & status::FINISHED == 0 && inner.exception.is_none()
            })
            .unwrap();
        if let Some(err) = &guard.exception {
            return Err(err.clone());
        }
        Ok(guard.results.clone())
    }

    pub fn wait(&self) {
        let _guard = self
            .cond
            .wait_while(self.inner.lock().unwrap(), |_| {
                self.bits() & (status::FINISHED | status::CANCELED) == 0
            })
            .unwrap();
    }

    pub fn wait_for_finished(&self) {
        let _guard = self
            .cond
            .wait_while(self.inner.lock().unwrap(), |_| {
                self.bits() & status::FINISHED == 0
            })
            .unwrap();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (_guard, timeout_result) = self
            .cond
            .wait_timeout_while(self.inner.lock().unwrap(), timeout, |_| {
                self.bits() & (status::FINISHED | status::CANCELED) == 0
            })
            .unwrap();
        !timeout_result.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_count_is_monotonic_under_concurrent_reporting() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let state = Arc::clone(&state);
            handles.push(std::thread::spawn(move || state.report_result(i)));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.result_count(), 8);
        state.report_finished();
        assert_eq!(state.results().unwrap().len(), 8);
    }

    #[test]
    #[tracing_test::traced_test]
    fn report_after_finished_logs_a_warning_and_is_ignored() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.report_finished();
        state.report_result(1);
        assert_eq!(state.result_count(), 0);
        assert!(tracing_test::logs_contain("ignored"));
    }

    #[test]
    fn exception_implies_canceled() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.report_exception(FutureError::UnreadableInput("boom".into()));
        assert!(state.is_canceled());
        assert!(state.exception().is_some());
    }

    #[test]
    fn cancel_is_idempotent() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.request_cancel();
        state.request_cancel();
        assert!(state.is_canceled());
    }

    #[test]
    fn finished_is_terminal_and_reports_after_are_ignored() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.report_result(1);
        state.report_finished();
        state.report_result(2);
        assert_eq!(state.result_count(), 1);
    }

    #[test]
    fn progress_value_throttles_unchanged_updates() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        let deliveries = Arc::new(AtomicUsize::new(0));
        {
            let deliveries = Arc::clone(&deliveries);
            state.add_listener(Arc::new(move |event| {
                if matches!(event, Event::ProgressValueChanged { .. }) {
                    deliveries.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        state.report_progress_value(5);
        state.report_progress_value(5);
        state.report_progress_value(6);
        assert_eq!(deliveries.load(Ordering::SeqCst), 2);
        assert_eq!(state.progress().value, 6);
    }

    #[test]
    fn progress_info_is_stored_and_delivered() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            state.add_listener(Arc::new(move |event| {
                if let Event::ProgressInfo { key, value } = event {
                    seen.lock().unwrap().push((key, value));
                }
            }));
        }
        state.report_progress_info("warning".to_string(), "sidecar missing".to_string());
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [("warning".to_string(), "sidecar missing".to_string())]
        );
        assert_eq!(state.progress().info.len(), 1);
    }

    #[test]
    fn late_attaching_listener_replays_already_reported_results() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.report_result(10);
        state.report_result(20);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        state.add_listener(Arc::new(move |event| {
            if let Event::ResultReady { begin, end } = event {
                seen_clone.lock().unwrap().push((begin, end));
            }
        }));
        assert_eq!(seen.lock().unwrap().as_slice(), [(0, 2)]);
    }

    #[test]
    fn late_attaching_listener_replays_terminal_state() {
        let state: Arc<SharedState<u32>> = SharedState::new();
        state.report_finished();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        state.add_listener(Arc::new(move |event| {
            if matches!(event, Event::Finished) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
