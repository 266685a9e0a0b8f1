//! The propagation handler: one dedicated thread relaying
//! downstream-cancel → upstream-cancel and upstream-exception →
//! downstream-exception across every registered continuation pair (§4.F).

use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

/// Configuration for a [`PropagationHandler`].
#[derive(Debug, Clone)]
pub struct PropagationHandlerConfig {
    /// Upper bound on how long a registered pair can go unpolled when no
    /// explicit wake is delivered. Default 50ms, matching the original
    /// implementation's propagation thread.
    pub poll_interval: Duration,
}

impl Default for PropagationHandlerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Type-erased link between one continuation's downstream and upstream
/// future, so a single handler thread can poll links of differing `T`.
pub(crate) trait PropagationLink: Send + Sync {
    /// Relay one direction of state in each call: cancel downstream → upstream,
    /// and exception upstream → downstream.
    fn poll(&self);
    /// Once both sides are finished there is nothing left to relay.
    fn is_done(&self) -> bool;
}

struct Registry {
    links: Mutex<Vec<Box<dyn PropagationLink>>>,
    wake: Condvar,
    wake_lock: Mutex<()>,
    shutdown: Mutex<bool>,
}

/// Owns one dedicated OS thread that periodically scans every registered
/// [`PropagationLink`] and relays cancellation downstream→upstream and
/// exceptions upstream→downstream (§4.F).
///
/// Constructible as an explicit instance (for tests or for an application
/// embedding several independent pools), or reached through the process-wide
/// [`PropagationHandler::global`] singleton — mirroring the `OnceLock`-backed
/// singleton pattern this repository's API facade already uses for its
/// runtime handle.
pub struct PropagationHandler {
    registry: Arc<Registry>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

static GLOBAL: OnceLock<PropagationHandler> = OnceLock::new();

impl PropagationHandler {
    pub fn new(config: PropagationHandlerConfig) -> Self {
        let registry = Arc::new(Registry {
            links: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            wake_lock: Mutex::new(()),
            shutdown: Mutex::new(false),
        });
        let thread = {
            let registry = Arc::clone(&registry);
            std::thread::Builder::new()
                .name("mediatask-propagation".to_string())
                .spawn(move || run_loop(registry, config.poll_interval))
                .expect("failed to spawn propagation handler thread")
        };
        Self {
            registry,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// The process-wide singleton, started lazily on first access with
    /// default configuration.
    pub fn global() -> &'static PropagationHandler {
        GLOBAL.get_or_init(|| PropagationHandler::new(PropagationHandlerConfig::default()))
    }

    /// Register a continuation pair for relaying. Per this crate's resolved
    /// Open Question on registration bypass, every continuation
    /// unconditionally registers here — there is no opt-out.
    pub(crate) fn register(&self, link: Box<dyn PropagationLink>) {
        self.registry.links.lock().unwrap().push(link);
        self.registry.wake.notify_all();
    }

    /// Signal the handler thread to stop and join it. Registered links are
    /// dropped; in-flight state is left exactly as it was (no cancellation
    /// is forced on shutdown).
    pub fn shutdown(&self) {
        *self.registry.shutdown.lock().unwrap() = true;
        self.registry.wake.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(registry: Arc<Registry>, poll_interval: Duration) {
    loop {
        {
            let mut links = registry.links.lock().unwrap();
            for link in links.iter() {
                link.poll();
            }
            links.retain(|link| !link.is_done());
        }

        let guard = registry.wake_lock.lock().unwrap();
        let (_guard, _timeout) = registry
            .wake
            .wait_timeout(guard, poll_interval)
            .unwrap();
        if *registry.shutdown.lock().unwrap() {
            break;
        }
    }
}
