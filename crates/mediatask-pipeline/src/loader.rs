//! Metadata load stage (§4.G): consumes a stream of [`LoaderTask`]s,
//! reading tags per file and reporting one [`LoaderResult`] per task.
//!
//! The tagging library itself is an external collaborator (§6) this crate
//! does not ship; [`MetadataReader`] is the contract it implements, with
//! [`FilesystemMetadataReader`] as a minimal filesystem-stat-based stand-in
//! used by tests and examples. Splitting a container file into subtracks
//! (cue-sheet releases) is approximated here well enough to exercise the
//! framework's batching — it is not a cue-sheet parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use mediatask_future::{stap, Executor, Future, FutureError};
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::scan::ScanResult;

/// Free-form tag/value map read from a file. Keyed loosely (no fixed tag
/// schema) since the real tagging library's vocabulary is out of scope here.
pub type MetadataMap = BTreeMap<String, serde_json::Value>;

/// Approximate bytes per audio frame (16-bit stereo PCM), used only to turn
/// a file's byte size into a plausible frame count for subtrack splitting.
const FRAME_SIZE_BYTES: u64 = 4;

/// One fully- or partially-populated library row (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulatedEntry {
    pub row_id: u64,
    pub path: PathBuf,
    pub metadata: MetadataMap,
    pub offset_frames: u64,
    pub length_frames: u64,
    pub error: bool,
}

impl PopulatedEntry {
    fn pending(row_id: u64, path: PathBuf) -> Self {
        Self {
            row_id,
            path,
            metadata: MetadataMap::new(),
            offset_frames: 0,
            length_frames: 0,
            error: false,
        }
    }
}

/// One unit of load work: a persistent row id assigned by the consumer
/// (not the scanner), the file it backs, and a shared handle to the library
/// entry it will populate in place (§3.4). Released to the loader stage via
/// [`assign_rows`].
#[derive(Debug, Clone)]
pub struct LoaderTask {
    pub row_id: u64,
    pub path: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub modified: SystemTime,
    pub entry: Arc<Mutex<PopulatedEntry>>,
}

/// The loader stage's output: one per [`LoaderTask`], carrying every
/// subtrack populated from that file (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderResult {
    pub row_id: u64,
    pub entries: Vec<PopulatedEntry>,
    pub count: usize,
}

/// Assigns a persistent row id to a freshly scanned file. The allocator is
/// the seam where this crate would, in a full application, consult the
/// existing library catalog instead of handing out fresh ids (§4.G:
/// "combining scan results with existing library rows").
pub trait RowAllocator: Send + Sync {
    fn allocate(&self, scan: &ScanResult) -> u64;
}

/// A [`RowAllocator`] that hands out fresh, ever-increasing row ids —
/// correct for a from-scratch scan, not for reconciling against an existing
/// catalog.
pub struct SequentialRowAllocator {
    next: AtomicU64,
}

impl SequentialRowAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialRowAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl RowAllocator for SequentialRowAllocator {
    fn allocate(&self, _scan: &ScanResult) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Combine a stream of [`ScanResult`]s with row-allocation policy into a
/// stream of [`LoaderTask`]s, one per file, as they're discovered (§4.G).
pub fn assign_rows(upstream: Future<ScanResult>, allocator: Arc<dyn RowAllocator>) -> Future<LoaderTask> {
    stap(upstream, move |up: &Future<ScanResult>, begin, end, down: &Future<LoaderTask>| {
        for index in begin..end {
            let Ok(scan) = up.result_at(index) else {
                continue;
            };
            let row_id = allocator.allocate(&scan);
            down.report_result(LoaderTask {
                row_id,
                path: scan.path.clone(),
                sidecar: scan.sidecar.clone(),
                modified: scan.modified,
                entry: Arc::new(Mutex::new(PopulatedEntry::pending(row_id, scan.path.clone()))),
            });
        }
    })
}

/// Tracks which files have already been loaded at which modification time,
/// so a rescan can skip re-reading tags for a file it has already seen
/// unchanged (§4.G: `ScanResult::modified`, carried onto `LoaderTask`).
pub trait ChangeTracker: Send + Sync {
    fn is_unchanged(&self, path: &Path, modified: SystemTime) -> bool;
    fn record(&self, path: &Path, modified: SystemTime);
}

/// A [`ChangeTracker`] that never skips — every file is (re-)read every
/// time. The correct default for a from-scratch scan, where nothing has
/// been seen before.
pub struct NoChangeTracker;

impl ChangeTracker for NoChangeTracker {
    fn is_unchanged(&self, _path: &Path, _modified: SystemTime) -> bool {
        false
    }

    fn record(&self, _path: &Path, _modified: SystemTime) {}
}

/// An in-memory [`ChangeTracker`] keyed by path, useful for a long-lived
/// process that rescans the same tree more than once.
#[derive(Default)]
pub struct InMemoryChangeTracker {
    seen: Mutex<BTreeMap<PathBuf, SystemTime>>,
}

impl ChangeTracker for InMemoryChangeTracker {
    fn is_unchanged(&self, path: &Path, modified: SystemTime) -> bool {
        self.seen.lock().unwrap().get(path) == Some(&modified)
    }

    fn record(&self, path: &Path, modified: SystemTime) {
        self.seen.lock().unwrap().insert(path.to_path_buf(), modified);
    }
}

/// Tagging library contract (§6, "Input from tagging library"): synchronous,
/// may fail with a recoverable [`MetadataError`] that the loader stage turns
/// into an error-flagged [`PopulatedEntry`] rather than a `Future` exception.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<MetadataMap, MetadataError>;
}

/// A minimal, filesystem-stat-based [`MetadataReader`] sufficient for tests
/// and examples. Deliberately not a tagging library — it reads no audio
/// frames and parses no tag containers.
pub struct FilesystemMetadataReader;

impl MetadataReader for FilesystemMetadataReader {
    fn read(&self, path: &Path) -> Result<MetadataMap, MetadataError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| MetadataError::Unreadable(format!("{}: {e}", path.display())))?;
        let mut map = MetadataMap::new();
        map.insert("size_bytes".to_string(), serde_json::json!(metadata.len()));
        if let Ok(modified) = metadata.modified() {
            if let Ok(since_epoch) = modified.duration_since(std::time::UNIX_EPOCH) {
                map.insert(
                    "modified_unix".to_string(),
                    serde_json::json!(since_epoch.as_secs()),
                );
            }
        }
        Ok(map)
    }
}

/// View-model contract (§6, "Output to view model"): exactly one call per
/// populated row, regardless of which subtrack within a batch it came from.
pub trait RowSink: Send + Sync {
    fn row_complete(&self, row_id: u64, entry: PopulatedEntry);
}

fn metadata_size(metadata: &MetadataMap) -> u64 {
    metadata.get("size_bytes").and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Number of subtracks a file splits into, inferred from a cue sidecar if
/// present. Not a cue-sheet parser: counts `TRACK` lines and falls back to
/// 1 for anything else or any read failure.
fn subtrack_count(sidecar: &Option<PathBuf>) -> usize {
    let Some(path) = sidecar else { return 1 };
    if path.extension().and_then(|e| e.to_str()) != Some("cue") {
        return 1;
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .filter(|line| line.trim_start().starts_with("TRACK"))
            .count()
            .max(1),
        Err(_) => 1,
    }
}

fn subtrack_row_id(row_id: u64, index: usize) -> u64 {
    if index == 0 {
        row_id
    } else {
        row_id * 1_000 + index as u64
    }
}

/// Read tags for one [`LoaderTask`], populate its shared entry in place, and
/// split it into 1..N subtrack entries (§4.G). Unreadable input is reported
/// in-band as `error = true`, never as a `Future` exception (§7). Returns
/// `None` if `tracker` reports the file unchanged since it was last loaded,
/// in which case the caller must not call [`RowSink::row_complete`] for it.
fn load_one(
    reader: &dyn MetadataReader,
    tracker: &dyn ChangeTracker,
    task: &LoaderTask,
) -> Option<LoaderResult> {
    if tracker.is_unchanged(&task.path, task.modified) {
        tracing::trace!(row_id = task.row_id, path = %task.path.display(), "skipping unchanged file");
        return None;
    }

    match reader.read(&task.path) {
        Ok(metadata) => {
            let frames = metadata_size(&metadata) / FRAME_SIZE_BYTES;
            let tracks = subtrack_count(&task.sidecar);
            let per_track = frames / tracks as u64;

            let mut entries = Vec::with_capacity(tracks);
            {
                let mut primary = task.entry.lock().unwrap();
                primary.metadata = metadata.clone();
                primary.offset_frames = 0;
                primary.length_frames = per_track;
                primary.error = false;
                entries.push(primary.clone());
            }
            for i in 1..tracks {
                entries.push(PopulatedEntry {
                    row_id: subtrack_row_id(task.row_id, i),
                    path: task.path.clone(),
                    metadata: metadata.clone(),
                    offset_frames: per_track * i as u64,
                    length_frames: per_track,
                    error: false,
                });
            }
            let count = entries.len();
            tracker.record(&task.path, task.modified);
            Some(LoaderResult {
                row_id: task.row_id,
                entries,
                count,
            })
        }
        Err(err) => {
            tracing::warn!(row_id = task.row_id, path = %task.path.display(), %err, "unreadable input");
            let mut primary = task.entry.lock().unwrap();
            primary.error = true;
            Some(LoaderResult {
                row_id: task.row_id,
                entries: vec![primary.clone()],
                count: 1,
            })
        }
    }
}

/// Run the loader stage on a dedicated thread (it blocks on `input`'s
/// consumer facet between tasks, so it must not occupy a pool worker, §4.D):
/// consumes `input` one task at a time as it streams in, reports one
/// [`LoaderResult`] per task, and notifies `sink` once per populated row.
///
/// Cancelling the returned future relays cooperatively to `input` at the
/// next loop iteration — the top-level future's cancellation reaching the
/// scan stage (§4.G, "Coordination") without needing direct access to the
/// process-wide propagation registry, which is private to `mediatask-future`.
pub fn load_metadata(
    executor: &Executor,
    input: Future<LoaderTask>,
    reader: Arc<dyn MetadataReader>,
    tracker: Arc<dyn ChangeTracker>,
    sink: Arc<dyn RowSink>,
) -> Future<LoaderResult> {
    executor.run_dedicated(move |future: Future<LoaderResult>| {
        let mut index = 0usize;
        loop {
            future.suspend_if_requested();
            if future.is_canceled() {
                input.cancel();
                break;
            }

            let task = match input.result_at(index) {
                Ok(task) => task,
                Err(FutureError::BrokenChain(_)) => {
                    if input.has_exception() {
                        if let Err(err) = input.results() {
                            future.report_exception(err);
                        }
                    }
                    break;
                }
                Err(err) => {
                    future.report_exception(err);
                    break;
                }
            };
            index += 1;

            let Some(result) = load_one(&*reader, &*tracker, &task) else {
                continue;
            };
            for entry in &result.entries {
                sink.row_complete(entry.row_id, entry.clone());
            }
            future.report_result(result);
            future.report_progress_value(index as i64);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediatask_future::ExecutorConfig;

    struct StubReader {
        fail: bool,
    }

    impl MetadataReader for StubReader {
        fn read(&self, path: &Path) -> Result<MetadataMap, MetadataError> {
            if self.fail {
                return Err(MetadataError::Unreadable(path.display().to_string()));
            }
            let mut map = MetadataMap::new();
            map.insert("size_bytes".to_string(), serde_json::json!(44_100u64 * 4));
            Ok(map)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        rows: Mutex<Vec<(u64, PopulatedEntry)>>,
    }

    impl RowSink for CollectingSink {
        fn row_complete(&self, row_id: u64, entry: PopulatedEntry) {
            self.rows.lock().unwrap().push((row_id, entry));
        }
    }

    fn task(row_id: u64, path: &str) -> LoaderTask {
        LoaderTask {
            row_id,
            path: PathBuf::from(path),
            sidecar: None,
            modified: SystemTime::UNIX_EPOCH,
            entry: Arc::new(Mutex::new(PopulatedEntry::pending(row_id, PathBuf::from(path)))),
        }
    }

    #[test]
    fn loads_each_task_and_notifies_the_sink_once_per_row() {
        let executor = Executor::new(ExecutorConfig::default());
        let input = executor.run(|f: Future<LoaderTask>| {
            f.report_result(task(1, "/music/a.flac"));
            f.report_result(task(2, "/music/b.flac"));
        });

        let sink = Arc::new(CollectingSink::default());
        let reader = Arc::new(StubReader { fail: false });
        let output = load_metadata(&executor, input, reader, Arc::new(NoChangeTracker), sink.clone());
        output.wait_for_finished();

        let results = output.results().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].count, 1);
        assert!(!results[0].entries[0].error);
        assert_eq!(sink.rows.lock().unwrap().len(), 2);
        executor.shutdown();
    }

    #[test]
    fn unchanged_file_is_skipped_and_not_reported_to_the_sink() {
        let executor = Executor::new(ExecutorConfig::default());
        let tracker = Arc::new(InMemoryChangeTracker::default());
        tracker.record(Path::new("/music/a.flac"), SystemTime::UNIX_EPOCH);

        let input = executor.run(|f: Future<LoaderTask>| {
            f.report_result(task(1, "/music/a.flac"));
            f.report_result(task(2, "/music/b.flac"));
        });

        let sink = Arc::new(CollectingSink::default());
        let reader = Arc::new(StubReader { fail: false });
        let output = load_metadata(&executor, input, reader, tracker, sink.clone());
        output.wait_for_finished();

        let results = output.results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].row_id, 2);
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
        executor.shutdown();
    }

    #[test]
    #[tracing_test::traced_test]
    fn load_one_logs_a_warning_for_unreadable_input() {
        let reader = StubReader { fail: true };
        let result = load_one(&reader, &NoChangeTracker, &task(1, "/music/missing.flac"));
        assert!(result.unwrap().entries[0].error);
        assert!(tracing_test::logs_contain("unreadable input"));
    }

    #[test]
    fn unreadable_file_reports_error_flagged_entry_not_an_exception() {
        let executor = Executor::new(ExecutorConfig::default());
        let input = executor.run(|f: Future<LoaderTask>| {
            f.report_result(task(1, "/music/missing.flac"));
        });

        let sink = Arc::new(CollectingSink::default());
        let reader = Arc::new(StubReader { fail: true });
        let output = load_metadata(&executor, input, reader, Arc::new(NoChangeTracker), sink);
        output.wait_for_finished();

        assert!(!output.has_exception());
        let results = output.results().unwrap();
        assert_eq!(results[0].count, 1);
        assert!(results[0].entries[0].error);
        executor.shutdown();
    }

    #[test]
    fn assign_rows_streams_one_task_per_scan_result() {
        let executor = Executor::new(ExecutorConfig::default());
        let upstream = executor.run(|f: Future<ScanResult>| {
            f.report_result(ScanResult {
                row_id: 1,
                path: PathBuf::from("/music/a.flac"),
                extension: Some("flac".to_string()),
                sidecar: None,
                size: 1024,
                modified: std::time::SystemTime::UNIX_EPOCH,
            });
        });
        let tasks = assign_rows(upstream, Arc::new(SequentialRowAllocator::default()));
        tasks.wait_for_finished();

        let results = tasks.results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].row_id, 1);
        executor.shutdown();
    }
}
