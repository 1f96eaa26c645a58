//! Walking and cleaning the reference corpus.
//!
//! The corpus is laid out as `<root>/<identity>/<image>`. The identity of an image is the
//! name of the directory that directly contains it, so `root/alice/2019/a.jpg` belongs to
//! `2019`. Files directly under the root carry no identity and are reported as
//! [`ScanEntry::Unlabeled`], as are files whose directory name is not valid UTF-8 (a lossy
//! conversion could merge two distinct directories into one identity). Hidden files and directories (leading `.`) are not part of the
//! corpus and are neither scanned nor pruned.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::Serialize;
use walkdir::{DirEntry, FilterEntry, WalkDir};

use crate::error::ExtractError;
use crate::extractor::Extractor;
use crate::validator::{self, Verdict};

/// One labeled reference image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusItem {
    pub identity: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    Labeled(CorpusItem),
    Unlabeled(PathBuf),
}

impl ScanEntry {
    pub fn path(&self) -> &Path {
        match self {
            ScanEntry::Labeled(item) => &item.path,
            ScanEntry::Unlabeled(path) => path,
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Lazy walk over the corpus, sorted by file name within each directory.
pub struct Scan {
    inner: Option<FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>>,
}

impl Iterator for Scan {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<ScanEntry> {
        let inner = self.inner.as_mut()?;
        loop {
            let entry = match inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable corpus entry: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            let is_file = file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }

            if entry.depth() == 1 {
                return Some(ScanEntry::Unlabeled(entry.into_path()));
            }

            let identity = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
                .map(str::to_string);
            match identity {
                Some(identity) => {
                    return Some(ScanEntry::Labeled(CorpusItem {
                        identity,
                        path: entry.into_path(),
                    }))
                }
                None => {
                    warn!("{} has no UTF-8 identity", entry.path().display());
                    return Some(ScanEntry::Unlabeled(entry.into_path()));
                }
            }
        }
    }
}

/// Walk `root` recursively. A missing root yields nothing.
pub fn scan(root: &Path) -> Scan {
    if !root.is_dir() {
        info!("corpus {} does not exist or is not a directory", root.display());
        return Scan { inner: None };
    }
    let keep: fn(&DirEntry) -> bool = |e| !is_hidden(e);
    let inner = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep);
    Scan { inner: Some(inner) }
}

/// A file deleted (or that could not be deleted) by a maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Files looked at.
    pub examined: usize,
    pub removed: Vec<Removal>,
    /// Files judged bad whose deletion failed for a reason other than being gone already.
    pub failed: Vec<Removal>,
}

impl PruneReport {
    pub fn removed_paths(&self) -> BTreeSet<PathBuf> {
        self.removed.iter().map(|r| r.path.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.failed.is_empty()
    }
}

fn prune_where(root: &Path, mut reject: impl FnMut(&Path) -> Option<String>) -> PruneReport {
    let mut report = PruneReport::default();

    for entry in scan(root) {
        report.examined += 1;
        let path = entry.path();
        let Some(reason) = reject(path) else {
            continue;
        };

        match fs::remove_file(path) {
            Ok(()) => {
                warn!("removed {}: {}", path.display(), reason);
                report.removed.push(Removal {
                    path: path.to_path_buf(),
                    reason,
                });
            }
            // Someone else got there first
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already removed", path.display());
            }
            Err(e) => {
                error!("failed to remove {}: {}", path.display(), e);
                report.failed.push(Removal {
                    path: path.to_path_buf(),
                    reason: format!("{} (delete failed: {})", reason, e),
                });
            }
        }
    }

    info!(
        "pruned {} of {} file(s) under {}",
        report.removed.len(),
        report.examined,
        root.display()
    );
    report
}

/// Why `path` should be deleted, if the validator says so. Files in formats this build
/// cannot decode are kept.
fn corrupt_reason(path: &Path) -> Option<String> {
    match validator::validate(path) {
        Verdict::Valid => None,
        Verdict::Corrupt(reason) => Some(reason),
        Verdict::Unsupported(reason) => {
            warn!("keeping {}: {}", path.display(), reason);
            None
        }
    }
}

/// Delete every file under `root` that does not decode as an image.
///
/// Destructive and irreversible. Running it again without new damage removes nothing.
pub fn prune(root: &Path) -> PruneReport {
    prune_where(root, corrupt_reason)
}

/// Stricter [`prune`]: also deletes images in which `extractor` finds no face.
///
/// Model failures never cause a deletion.
pub fn prune_faceless<E: Extractor>(root: &Path, extractor: &mut E) -> PruneReport {
    prune_where(root, |path| {
        match validator::validate(path) {
            Verdict::Valid => {}
            Verdict::Corrupt(reason) => return Some(reason),
            Verdict::Unsupported(reason) => {
                warn!("keeping {}: {}", path.display(), reason);
                return None;
            }
        }
        match extractor.extract(path) {
            Ok(_) => None,
            Err(e @ (ExtractError::NoFace | ExtractError::Decode(_))) => Some(e.to_string()),
            Err(ExtractError::Model(reason)) => {
                warn!("keeping {}: model failure: {}", path.display(), reason);
                None
            }
        }
    })
}
