//! A shared-future / asynchronous-task framework with a blocking consumer
//! facet: producers report results, progress, and exceptions into a shared
//! state block; consumers read, rethrow, or block on it with ordinary
//! thread-blocking calls rather than an `async fn` executor.
//!
//! ```
//! use mediatask_future::{Executor, ExecutorConfig, FutureExt};
//!
//! let executor = Executor::new(ExecutorConfig::default());
//! let future = executor.run(|f| {
//!     f.report_result(21);
//! });
//! let doubled = future.then(&executor, |values| values[0] * 2);
//! assert_eq!(doubled.result_at(0).unwrap(), 42);
//! executor.shutdown();
//! ```

mod continuation;
mod error;
mod executor;
mod future;
mod pool;
mod propagation;
mod state;
mod types;
mod watcher;

pub use continuation::{finally, stap, tap, then, FutureExt};
pub use error::FutureError;
pub use executor::{Executor, ExecutorConfig};
pub use future::Future;
pub use propagation::{PropagationHandler, PropagationHandlerConfig};
pub use types::{FutureId, Progress};
pub use watcher::{Event, ExecutionContext, ThreadSink, Watcher, WatcherBuilder};
