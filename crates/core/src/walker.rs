//! Lazy recursive enumeration of regular files under a root.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Iterator over regular files below a root.
///
/// Yields `Err` at most once: the first traversal error ends the walk, and
/// every later call returns `None`.
pub struct FileWalker {
    inner: walkdir::IntoIter,
    excludes: GlobSet,
    failed: bool,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_excludes(root, GlobSet::empty())
    }

    pub fn with_excludes(root: impl AsRef<Path>, excludes: GlobSet) -> Self {
        Self {
            inner: WalkDir::new(root.as_ref()).follow_links(true).into_iter(),
            excludes,
            failed: false,
        }
    }
}

impl Iterator for FileWalker {
    type Item = Result<PathBuf, walkdir::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            };
            // The root itself is never excluded.
            if entry.depth() > 0 && !self.excludes.is_empty() && self.excludes.is_match(entry.path())
            {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() {
                return Some(Ok(entry.into_path()));
            }
        }
    }
}

pub fn walk_files(root: impl AsRef<Path>) -> FileWalker {
    FileWalker::new(root)
}

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

/// Every directory under `root`, root included. Used to seed watches.
pub fn walk_dirs(root: impl AsRef<Path>) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> {
    WalkDir::new(root.as_ref())
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_dir() => Some(Ok(e.into_path())),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
}
