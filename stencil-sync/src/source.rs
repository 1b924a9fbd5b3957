//! Producer factories over the filesystem and readers.
//!
//! Read failures never abort a stream: the affected entry becomes a failed
//! [`Item`] carrying `SourceRead`.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use walkdir::WalkDir;

use stencil_core::{Item, ItemError, Producer};

use crate::error::SyncError;

/// Expand `patterns` into file paths, in declaration order, without
/// duplicates. A pattern matching nothing contributes nothing.
pub fn glob_file_names<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>, SyncError> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let entries = glob::glob(pattern).map_err(|e| SyncError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        // Unreadable entries are skipped; the file source reports the
        // paths it cannot read.
        for path in entries.flatten() {
            if path.is_file() && seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

/// Like [`glob_file_names`], but every pattern must match at least one file.
pub fn glob_required<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>, SyncError> {
    for pattern in patterns {
        if glob_file_names(std::slice::from_ref(pattern))?.is_empty() {
            return Err(SyncError::NoMatch {
                pattern: pattern.as_ref().to_string(),
            });
        }
    }
    glob_file_names(patterns)
}

/// One item per path, named by the path and read on every open.
pub fn file_source(paths: Vec<PathBuf>) -> Producer {
    let paths = Arc::new(paths);
    Producer::from_fn(move || {
        let paths = Arc::clone(&paths);
        (0..paths.len()).map(move |i| read_file(&paths[i]))
    })
}

fn read_file(path: &Path) -> Item {
    read_with(path, |path| std::fs::read_to_string(path))
}

/// Bundle files may hold arbitrary bytes; invalid UTF-8 is replaced
/// rather than failing the file.
fn read_lossy(path: &Path) -> Item {
    read_with(path, |path| {
        std::fs::read(path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn read_with<F>(path: &Path, read: F) -> Item
where
    F: FnOnce(&Path) -> std::io::Result<String>,
{
    let name = path.display().to_string();
    match read(path) {
        Ok(content) => {
            tracing::debug!(item = %name, bytes = content.len(), "read source");
            Item::new(name, content)
        }
        Err(err) => Item::failed(
            name.clone(),
            ItemError::SourceRead {
                source_name: name,
                message: err.to_string(),
            },
        ),
    }
}

/// A single item read from `reader`. The reader is consumed by the first
/// open; later opens replay the same item.
pub fn reader_source<R>(name: impl Into<String>, reader: R) -> Producer
where
    R: Read + Send + 'static,
{
    let name = name.into();
    let reader = Arc::new(Mutex::new(Some(reader)));
    let cached: Arc<OnceLock<Item>> = Arc::new(OnceLock::new());
    Producer::from_fn(move || {
        let item = cached.get_or_init(|| {
            let taken = reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            read_once(&name, taken)
        });
        std::iter::once(item.clone())
    })
}

fn read_once<R: Read>(name: &str, reader: Option<R>) -> Item {
    let mut content = String::new();
    let result = match reader {
        Some(mut reader) => reader.read_to_string(&mut content).map(|_| ()),
        None => Ok(()),
    };
    match result {
        Ok(()) => Item::new(name, content),
        Err(err) => Item::failed(
            name,
            ItemError::SourceRead {
                source_name: name.to_string(),
                message: err.to_string(),
            },
        ),
    }
}

/// Every file below `dir`, named by its `/`-separated path relative to
/// `dir`, in sorted order. Contents that are not valid UTF-8 are read
/// lossily.
pub fn dir_source(dir: impl Into<PathBuf>) -> Producer {
    let dir = Arc::new(dir.into());
    Producer::from_fn(move || walk(&dir))
}

fn walk(dir: &Path) -> Vec<Item> {
    let mut items = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let name = err
                    .path()
                    .unwrap_or(dir)
                    .display()
                    .to_string();
                items.push(Item::failed(
                    name.clone(),
                    ItemError::SourceRead {
                        source_name: name,
                        message: err.to_string(),
                    },
                ));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let item = read_lossy(entry.path());
        items.push(Item { name, ..item });
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));
    items
}
