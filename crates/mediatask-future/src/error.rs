use std::sync::Arc;
use thiserror::Error;

/// The five failure kinds a [`crate::future::Future`] can carry in its
/// exception slot or surface from a blocking consumer call.
///
/// `FutureError` is `Clone`: once stored in a [`crate::state::SharedState`],
/// every caller that observes it (today or later) gets the same logical
/// error, satisfying the "rethrow is idempotent and repeatable" requirement.
#[derive(Debug, Clone, Error)]
pub enum FutureError {
    /// Cooperative cancellation signal. Never delivered to a continuation
    /// callback; carried only as a state flag on the future it originated
    /// on. Producers observe it via [`crate::future::Future::is_canceled`]
    /// at a `suspend_if_requested` point.
    #[error("cancellation requested")]
    CancelRequested,

    /// A [`crate::state::SharedState`] was dropped with no result and no
    /// exception ever reported — the chain was broken without a terminal
    /// state being published.
    #[error("future '{0}' was dropped with no result and no exception")]
    BrokenChain(u64),

    /// An attempt to report a value, exception, or terminal state on a
    /// future that is already `Finished`. Ignored with a warning rather
    /// than surfaced as a hard error (§4.B).
    #[error("future '{0}' is already in a terminal state; report ignored")]
    AlreadySatisfied(u64),

    /// A data-level failure from an external collaborator (unreadable file,
    /// missing tags). Never stored in a future's exception slot — carried
    /// in-band as an error-flagged result record instead (§7).
    #[error("unreadable input: {0}")]
    UnreadableInput(String),

    /// Any exception escaping a producer or continuation callback that
    /// isn't one of the above kinds.
    #[error("unhandled error: {source}")]
    Unhandled {
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl FutureError {
    /// Wrap an arbitrary error as [`FutureError::Unhandled`].
    pub fn unhandled<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FutureError::Unhandled {
            source: Arc::new(source),
        }
    }

    /// Wrap a panic payload captured via `catch_unwind` as
    /// [`FutureError::Unhandled`].
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic payload of unknown type".to_string()
        };
        FutureError::Unhandled {
            source: Arc::new(PanicError(message)),
        }
    }
}

#[derive(Debug, Error)]
#[error("panicked: {0}")]
struct PanicError(String);
