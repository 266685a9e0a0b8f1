//! The illustrative two-stage directory-scan → metadata-load pipeline that
//! exercises `mediatask-future`'s public API end to end (§4.G): a scan stage
//! streams discovered files, a row-assignment step turns each into a load
//! task, and a loader stage populates library rows one file at a time.
//!
//! This crate ships no tag-file parser, no playlist serializer, no GUI, and
//! no persistence layer — those are external collaborators whose contracts
//! are represented here only as the [`loader::MetadataReader`] and
//! [`loader::RowSink`] traits.

mod error;
mod loader;
mod pipeline;
mod scan;

pub use error::MetadataError;
pub use loader::{
    assign_rows, load_metadata, ChangeTracker, FilesystemMetadataReader, InMemoryChangeTracker,
    LoaderResult, LoaderTask, MetadataMap, MetadataReader, NoChangeTracker, PopulatedEntry,
    RowAllocator, RowSink, SequentialRowAllocator,
};
pub use pipeline::{run, PipelineConfig};
pub use scan::{scan_directory, DirEntryInfo, DirEntrySource, FilesystemSource, ScanResult};
