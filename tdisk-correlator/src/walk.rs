// SPDX-License-Identifier: GPL-3.0-only

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

/// One file or directory encountered by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub inode: u64,
}

/// Lazy depth-first walk of a directory tree.
///
/// Yields one handle per regular file and directory encountered, root
/// first. The walk holds no cross-call state: re-invoking
/// [`FileScan::new`] with the same root restarts from scratch.
/// Cancellation simply ends the sequence; unreadable entries are counted
/// and skipped, never fatal.
pub struct FileScan {
    stack: Vec<PathBuf>,
    pending: VecDeque<FileHandle>,
    cancel: Option<CancellationToken>,
    skipped_errors: u64,
}

impl FileScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            stack: vec![root.into()],
            pending: VecDeque::new(),
            cancel: None,
            skipped_errors: 0,
        }
    }

    pub fn with_cancellation(root: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::new(root)
        }
    }

    /// Entries skipped because they could not be read
    pub fn skipped_errors(&self) -> u64 {
        self.skipped_errors
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    /// Visits one directory: collects its regular files, queues its
    /// subdirectories and returns the directory's own handle.
    fn visit(&mut self, directory: PathBuf) -> Option<FileHandle> {
        let metadata = match fs::symlink_metadata(&directory) {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) | Err(_) => {
                self.skipped_errors += 1;
                return None;
            }
        };

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(_) => {
                self.skipped_errors += 1;
                return None;
            }
        };

        // Collected in reverse so popping the stack keeps lexical order
        // within one parent irrelevant but depth-first overall.
        let mut subdirs = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => {
                    self.skipped_errors += 1;
                    continue;
                }
            };

            let path = entry.path();
            let entry_metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => {
                    self.skipped_errors += 1;
                    continue;
                }
            };

            if entry_metadata.is_dir() {
                subdirs.push(path);
            } else if entry_metadata.is_file() {
                self.pending.push_back(handle(path, &entry_metadata));
            }
            // Symlinks and special files are not block-owning content.
        }

        for subdir in subdirs.into_iter().rev() {
            self.stack.push(subdir);
        }

        Some(handle(directory, &metadata))
    }
}

fn handle(path: impl AsRef<Path>, metadata: &fs::Metadata) -> FileHandle {
    FileHandle {
        path: path.as_ref().to_path_buf(),
        is_dir: metadata.is_dir(),
        size: metadata.len(),
        inode: metadata.ino(),
    }
}

impl Iterator for FileScan {
    type Item = FileHandle;

    fn next(&mut self) -> Option<FileHandle> {
        loop {
            if self.cancelled() {
                return None;
            }

            if let Some(file) = self.pending.pop_front() {
                return Some(file);
            }

            let directory = self.stack.pop()?;
            if let Some(dir_handle) = self.visit(directory) {
                return Some(dir_handle);
            }
        }
    }
}
