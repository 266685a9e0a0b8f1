//! Internal fixed-size worker-thread pool backing [`crate::executor::Executor`]'s
//! pool-run mode (§4.D).

use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    tx: crossbeam_channel::Sender<Job>,
}

/// A small fixed-size pool of worker threads draining a shared
/// `crossbeam_channel` queue.
pub(crate) struct Pool {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl Pool {
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let shared = Arc::new(Shared { tx });
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mediatask-pool-{index}"))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })
                .expect("failed to spawn pool worker thread");
            workers.push(handle);
        }
        Self { shared, workers }
    }

    pub(crate) fn post(&self, job: Job) {
        if self.shared.tx.send(job).is_err() {
            tracing::warn!("post to a shut-down pool dropped a job");
        }
    }

    /// Stop accepting new work and join every worker. Workers finish their
    /// current job and drain whatever was already queued before exiting;
    /// this does not forcibly interrupt a running job (§4.D, cooperative
    /// cancellation only).
    pub(crate) fn shutdown(self) {
        drop(self.shared);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}
