//! Directory scan stage (§4.G): walks a directory tree, reporting one
//! [`ScanResult`] per matching file as it is discovered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use mediatask_future::{Executor, Future, FutureError};
use serde::{Deserialize, Serialize};

/// One discovered file, reported incrementally by [`scan_directory`].
///
/// `modified` lets the loader stage (§4.G) skip re-reading metadata for a
/// file it has already loaded unchanged, via [`crate::loader::ChangeTracker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub row_id: u64,
    pub path: PathBuf,
    pub extension: Option<String>,
    pub sidecar: Option<PathBuf>,
    pub size: u64,
    pub modified: SystemTime,
}

/// One entry yielded by a [`DirEntrySource`] listing.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// Isolates the filesystem walk behind a trait so tests can substitute a
/// synthetic tree without touching a real filesystem (§6, External
/// Interfaces).
pub trait DirEntrySource: Send + Sync {
    fn list(&self, dir: &Path) -> std::io::Result<Vec<DirEntryInfo>>;
}

/// The default [`DirEntrySource`], backed by `std::fs::read_dir`.
pub struct FilesystemSource;

impl DirEntrySource for FilesystemSource {
    fn list(&self, dir: &Path) -> std::io::Result<Vec<DirEntryInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            out.push(DirEntryInfo {
                path: entry.path(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(out)
    }
}

fn find_sidecar(path: &Path, siblings: &[DirEntryInfo]) -> Option<PathBuf> {
    let stem = path.file_stem()?;
    siblings.iter().find_map(|sibling| {
        if sibling.is_dir || sibling.path == path {
            return None;
        }
        (sibling.path.file_stem() == Some(stem)).then(|| sibling.path.clone())
    })
}

/// Walk `root` breadth-first, reporting a [`ScanResult`] for every
/// discovered file whose extension is in `suffixes` (case-insensitive).
/// Checks [`Future::suspend_if_requested`]/cancellation between every
/// directory visited (§5).
pub fn scan_directory(
    executor: &Executor,
    source: Arc<dyn DirEntrySource>,
    root: PathBuf,
    suffixes: Vec<String>,
) -> Future<ScanResult> {
    let suffixes: Vec<String> = suffixes.into_iter().map(|s| s.to_lowercase()).collect();

    executor.run(move |future: Future<ScanResult>| {
        let mut row_id: u64 = 0;
        let mut pending_dirs = vec![root];

        while let Some(dir) = pending_dirs.pop() {
            future.suspend_if_requested();
            if future.is_canceled() {
                return;
            }

            let entries = match source.list(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    future.report_exception(FutureError::unhandled(IoErrorDisplay(err)));
                    return;
                }
            };

            for entry in &entries {
                if entry.is_dir {
                    pending_dirs.push(entry.path.clone());
                    continue;
                }
                let extension = entry
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase());
                let matches = match &extension {
                    Some(ext) => suffixes.is_empty() || suffixes.iter().any(|s| s == ext),
                    None => suffixes.is_empty(),
                };
                if !matches {
                    continue;
                }

                row_id += 1;
                future.report_result(ScanResult {
                    row_id,
                    path: entry.path.clone(),
                    extension,
                    sidecar: find_sidecar(&entry.path, &entries),
                    size: entry.size,
                    modified: entry.modified,
                });
                future.report_progress_value(row_id as i64);
            }
        }
    })
}

#[derive(Debug)]
struct IoErrorDisplay(std::io::Error);

impl std::fmt::Display for IoErrorDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoErrorDisplay {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediatask_future::ExecutorConfig;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct SyntheticTree {
        dirs: Mutex<HashMap<PathBuf, Vec<DirEntryInfo>>>,
    }

    impl DirEntrySource for SyntheticTree {
        fn list(&self, dir: &Path) -> std::io::Result<Vec<DirEntryInfo>> {
            Ok(self.dirs.lock().unwrap().get(dir).cloned().unwrap_or_default())
        }
    }

    fn file(path: &str) -> DirEntryInfo {
        DirEntryInfo {
            path: PathBuf::from(path),
            is_dir: false,
            size: 1024,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn dir(path: &str) -> DirEntryInfo {
        DirEntryInfo {
            path: PathBuf::from(path),
            is_dir: true,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn scans_nested_directories_and_filters_by_suffix() {
        let mut dirs = HashMap::new();
        dirs.insert(
            PathBuf::from("/music"),
            vec![dir("/music/album"), file("/music/readme.txt")],
        );
        dirs.insert(
            PathBuf::from("/music/album"),
            vec![file("/music/album/track1.flac"), file("/music/album/track1.cue")],
        );
        let source = Arc::new(SyntheticTree {
            dirs: Mutex::new(dirs),
        });

        let executor = Executor::new(ExecutorConfig::default());
        let future = scan_directory(
            &executor,
            source,
            PathBuf::from("/music"),
            vec!["flac".to_string()],
        );
        future.wait_for_finished();

        let results = future.results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, PathBuf::from("/music/album/track1.flac"));
        assert_eq!(
            results[0].sidecar,
            Some(PathBuf::from("/music/album/track1.cue"))
        );
        executor.shutdown();
    }
}
