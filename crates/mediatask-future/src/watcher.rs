//! Watchers: observers that map [`crate::state::SharedState`] transitions to
//! callbacks dispatched on a chosen execution context (§3.3, §4.C).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::executor::Executor;
use crate::future::Future as SharedFuture;
use crate::state::SharedState;

/// One state-transition event delivered to a [`Watcher`].
///
/// `ResultReady` is level-delivered: fast producers may coalesce several
/// individual results into one `[begin, end)` range (§4.C). `Canceled` and
/// `Finished` are edge-delivered: each fires at most once per binding.
#[derive(Debug, Clone)]
pub enum Event {
    ResultReady { begin: usize, end: usize },
    ProgressRangeChanged { min: i64, max: i64 },
    ProgressValueChanged { value: i64 },
    ProgressTextChanged { text: Option<String> },
    ProgressInfo { key: String, value: String },
    Paused,
    Resumed,
    Canceled,
    Finished,
}

/// A queued unit of dispatch work: a watcher's reaction to one [`Event`].
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle to a dedicated thread with its own inbox, used as a
/// [`ExecutionContext::Thread`] target (e.g. a UI event-loop thread).
#[derive(Clone)]
pub struct ThreadSink {
    tx: crossbeam_channel::Sender<Job>,
}

impl ThreadSink {
    /// Spawn a dedicated OS thread that drains jobs posted to it until the
    /// sink is dropped. Intended for hosting something like a UI event
    /// loop's callback queue.
    pub fn spawn(name: impl Into<String>) -> (Self, std::thread::JoinHandle<()>) {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let name = name.into();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in rx.iter() {
                    job();
                }
                tracing::trace!(thread = %name, "thread sink drained and exiting");
            })
            .expect("failed to spawn dedicated thread sink");
        (Self { tx }, handle)
    }

    pub(crate) fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("post to a closed thread sink dropped");
        }
    }
}

/// Where a [`Watcher`]'s callbacks run.
#[derive(Clone)]
pub enum ExecutionContext {
    /// Invoked synchronously on whichever thread published the event.
    Inline,
    /// Posted as a task to a worker pool.
    Pool(Executor),
    /// Posted as a message to a dedicated thread's inbox.
    Thread(ThreadSink),
}

impl ExecutionContext {
    fn dispatch(&self, job: Job) {
        match self {
            ExecutionContext::Inline => job(),
            ExecutionContext::Pool(executor) => executor.post(job),
            ExecutionContext::Thread(sink) => sink.post(job),
        }
    }
}

/// The callback set bound to a [`Watcher`]. Every field is optional; an
/// unset callback is simply not invoked for its event.
struct Callbacks<T> {
    on_result_ready: Option<Box<dyn Fn(&SharedFuture<T>, usize, usize) + Send + Sync>>,
    on_progress_range_changed: Option<Box<dyn Fn(i64, i64) + Send + Sync>>,
    on_progress_value_changed: Option<Box<dyn Fn(i64) + Send + Sync>>,
    on_progress_text_changed: Option<Box<dyn Fn(Option<&str>) + Send + Sync>>,
    on_progress_info: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
    on_paused: Option<Box<dyn Fn() + Send + Sync>>,
    on_resumed: Option<Box<dyn Fn() + Send + Sync>>,
    on_canceled: Option<Box<dyn Fn() + Send + Sync>>,
    on_finished: Option<Box<dyn Fn(&SharedFuture<T>) + Send + Sync>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_result_ready: None,
            on_progress_range_changed: None,
            on_progress_value_changed: None,
            on_progress_text_changed: None,
            on_progress_info: None,
            on_paused: None,
            on_resumed: None,
            on_canceled: None,
            on_finished: None,
        }
    }
}

/// Fluent builder for a [`Watcher`], in the spirit of this crate's pipeline
/// builder: attach the callbacks you care about, then [`build`](Self::build).
pub struct WatcherBuilder<T> {
    context: ExecutionContext,
    callbacks: Callbacks<T>,
}

impl<T: Send + 'static> WatcherBuilder<T> {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            callbacks: Callbacks::default(),
        }
    }

    pub fn on_result_ready(
        mut self,
        f: impl Fn(&SharedFuture<T>, usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_result_ready = Some(Box::new(f));
        self
    }

    pub fn on_progress_range_changed(
        mut self,
        f: impl Fn(i64, i64) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_progress_range_changed = Some(Box::new(f));
        self
    }

    pub fn on_progress_value_changed(mut self, f: impl Fn(i64) + Send + Sync + 'static) -> Self {
        self.callbacks.on_progress_value_changed = Some(Box::new(f));
        self
    }

    pub fn on_progress_text_changed(
        mut self,
        f: impl Fn(Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_progress_text_changed = Some(Box::new(f));
        self
    }

    pub fn on_progress_info(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_progress_info = Some(Box::new(f));
        self
    }

    pub fn on_paused(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_paused = Some(Box::new(f));
        self
    }

    pub fn on_resumed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_resumed = Some(Box::new(f));
        self
    }

    pub fn on_canceled(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_canceled = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl Fn(&SharedFuture<T>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_finished = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Watcher<T> {
        Watcher {
            context: self.context,
            callbacks: Arc::new(self.callbacks),
            attached: Mutex::new(None),
        }
    }
}

/// Edge-delivery guards, shared into the dispatch closure so `canceled`/
/// `finished` fire at most once for the lifetime of a binding (§4.C).
#[derive(Default)]
struct EdgeGuards {
    canceled_fired: AtomicBool,
    finished_fired: AtomicBool,
}

struct Attached<T> {
    listener_id: u64,
    state: Arc<SharedState<T>>,
    #[allow(dead_code)]
    guards: Arc<EdgeGuards>,
}

/// Binds a [`crate::state::SharedState`] and a callback set, dispatching
/// callbacks on a nominated [`ExecutionContext`] (§3.3).
///
/// A `Watcher`'s lifetime is independent of the future(s) it observes: it
/// holds a strong reference to the shared state via the future passed to
/// [`set_future`](Self::set_future), and deregisters itself from the state
/// on [`detach`](Self::detach) or `Drop`, so the two never cyclically keep
/// each other alive.
pub struct Watcher<T> {
    context: ExecutionContext,
    callbacks: Arc<Callbacks<T>>,
    attached: Mutex<Option<Attached<T>>>,
}

impl<T: Send + Sync + 'static> Watcher<T> {
    /// Install this watcher as a listener on `future`'s shared state.
    /// Calling this again detaches from any previously-watched state first.
    pub fn set_future(&self, future: &SharedFuture<T>) {
        self.detach();

        let guards = Arc::new(EdgeGuards::default());
        let context = self.context.clone();
        let callbacks = Arc::clone(&self.callbacks);
        let watched = future.clone();
        let guards_for_closure = Arc::clone(&guards);

        let state = future.state();
        let listener_id = state.add_listener(Arc::new(move |event: Event| {
            let context = context.clone();
            let callbacks = Arc::clone(&callbacks);
            let watched = watched.clone();
            let guards = Arc::clone(&guards_for_closure);
            match event {
                Event::ResultReady { begin, end } => {
                    if callbacks.on_result_ready.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_result_ready {
                                cb(&watched, begin, end);
                            }
                        }));
                    }
                }
                Event::ProgressRangeChanged { min, max } => {
                    if callbacks.on_progress_range_changed.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_progress_range_changed {
                                cb(min, max);
                            }
                        }));
                    }
                }
                Event::ProgressValueChanged { value } => {
                    if callbacks.on_progress_value_changed.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_progress_value_changed {
                                cb(value);
                            }
                        }));
                    }
                }
                Event::ProgressTextChanged { text } => {
                    if callbacks.on_progress_text_changed.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_progress_text_changed {
                                cb(text.as_deref());
                            }
                        }));
                    }
                }
                Event::ProgressInfo { key, value } => {
                    if callbacks.on_progress_info.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_progress_info {
                                cb(&key, &value);
                            }
                        }));
                    }
                }
                Event::Paused => {
                    if callbacks.on_paused.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_paused {
                                cb();
                            }
                        }));
                    }
                }
                Event::Resumed => {
                    if callbacks.on_resumed.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_resumed {
                                cb();
                            }
                        }));
                    }
                }
                Event::Canceled => {
                    if guards.canceled_fired.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    if callbacks.on_canceled.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_canceled {
                                cb();
                            }
                        }));
                    }
                }
                Event::Finished => {
                    if guards.finished_fired.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    if callbacks.on_finished.is_some() {
                        context.dispatch(Box::new(move || {
                            if let Some(cb) = &callbacks.on_finished {
                                cb(&watched);
                            }
                        }));
                    }
                }
            }
        }));

        *self.attached.lock().unwrap() = Some(Attached {
            listener_id,
            state,
            guards,
        });
    }

    /// Detach from the currently-watched state, if any. Idempotent.
    pub fn detach(&self) {
        if let Some(attached) = self.attached.lock().unwrap().take() {
            attached.state.remove_listener(attached.listener_id);
        }
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.detach();
    }
}
