//! Coordination (§4.G): wires the scan stage into the loader stage through a
//! streaming row-assignment step, and exposes the loader's future as the
//! single top-level handle a caller holds and cancels.

use std::path::PathBuf;
use std::sync::Arc;

use mediatask_future::{Executor, Future};

use crate::loader::{
    assign_rows, load_metadata, ChangeTracker, LoaderResult, MetadataReader, NoChangeTracker,
    RowAllocator, RowSink,
};
use crate::scan::{scan_directory, DirEntrySource};

/// Everything the pipeline needs to populate a library from a directory
/// tree, bundled so callers don't have to thread five collaborators through
/// by hand. `change_tracker` defaults to [`NoChangeTracker`] via
/// [`PipelineConfig::new`] for a from-scratch scan; pass an
/// [`crate::loader::InMemoryChangeTracker`] (or another implementation) to
/// skip re-reading files a previous run already loaded unchanged.
pub struct PipelineConfig {
    pub root: PathBuf,
    pub suffixes: Vec<String>,
    pub source: Arc<dyn DirEntrySource>,
    pub row_allocator: Arc<dyn RowAllocator>,
    pub reader: Arc<dyn MetadataReader>,
    pub change_tracker: Arc<dyn ChangeTracker>,
    pub sink: Arc<dyn RowSink>,
}

impl PipelineConfig {
    /// Convenience constructor for a from-scratch scan: no prior state, so
    /// every discovered file is (re-)read.
    pub fn new(
        root: PathBuf,
        suffixes: Vec<String>,
        source: Arc<dyn DirEntrySource>,
        row_allocator: Arc<dyn RowAllocator>,
        reader: Arc<dyn MetadataReader>,
        sink: Arc<dyn RowSink>,
    ) -> Self {
        Self {
            root,
            suffixes,
            source,
            row_allocator,
            reader,
            change_tracker: Arc::new(NoChangeTracker),
            sink,
        }
    }
}

/// Run the two-stage scan → load pipeline (§4.G). The returned future is the
/// pipeline's single top-level handle: cancelling it relays, within one
/// loader loop iteration and the scan stage's next `suspend_if_requested`
/// check, all the way back to the directory walk — no backpressure is
/// implemented (by construction each scan result produces exactly one load
/// task, so the loader stage never runs far ahead of what it's already
/// consuming).
pub fn run(executor: &Executor, config: PipelineConfig) -> Future<LoaderResult> {
    let scanned = scan_directory(executor, config.source, config.root, config.suffixes);
    let tasks = assign_rows(scanned, config.row_allocator);
    load_metadata(executor, tasks, config.reader, config.change_tracker, config.sink)
}
