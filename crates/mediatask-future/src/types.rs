use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing identifier handed out to every
/// [`crate::state::SharedState`], used in tracing spans and `Debug` output.
pub type FutureId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next [`FutureId`].
pub(crate) fn next_id() -> FutureId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Bit set over the five states a future's status can carry (§3.1).
///
/// Status is monotonic except `PAUSED`, which toggles; `FINISHED` is
/// terminal — once set, no further bit may change.
pub mod status {
    /// Producer has called `report_started`; no work has necessarily run yet.
    pub const STARTED: u8 = 1 << 0;
    /// The producer callable is actively executing.
    pub const RUNNING: u8 = 1 << 1;
    /// The future is suspended; producers should block in
    /// `suspend_if_requested`.
    pub const PAUSED: u8 = 1 << 2;
    /// Cancellation has been requested or an exception was stored.
    pub const CANCELED: u8 = 1 << 3;
    /// Terminal. No further results, exceptions, or progress may be
    /// reported once this bit is set.
    pub const FINISHED: u8 = 1 << 4;
}

/// Integer progress triple plus optional text and free-form info channel
/// (§3.1).
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub min: i64,
    pub max: i64,
    pub value: i64,
    pub text: Option<String>,
    pub info: Vec<(String, String)>,
}

impl Progress {
    pub(crate) fn set_range(&mut self, min: i64, max: i64) {
        self.min = min;
        self.max = max;
    }
}
