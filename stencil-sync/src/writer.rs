//! Atomic, hash-gated file writer.
//!
//! ## `atomic_write` protocol
//!
//! 1. SHA-256 hash the rendered content.
//! 2. Hash the current file, if any, and skip when both match.
//! 3. In dry-run mode, record a unified diff and stop.
//! 4. Write to `<path>.stencil.tmp`, carrying over the current permissions.
//! 5. Rename to the final path (atomic on POSIX).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::diff::unified_diff;
use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped: it already holds exactly this content.
    Unchanged { path: PathBuf },
    /// Dry-run mode: the file *would* have been written.
    WouldWrite { path: PathBuf, diff: String },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path }
            | WriteResult::Unchanged { path }
            | WriteResult::WouldWrite { path, .. } => path,
        }
    }
}

/// Shared, append-only record of every write a run performed.
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    entries: Arc<Mutex<Vec<WriteResult>>>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: WriteResult) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    /// Snapshot of the entries recorded so far, in write order.
    pub fn entries(&self) -> Vec<WriteResult> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub dry_run: bool,
    pub log: WriteLog,
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

/// Atomically write `content` to `path` and record the outcome in
/// `options.log`.
pub fn atomic_write(path: &Path, content: &str, options: &WriteOptions) -> Result<WriteResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.stencil.tmp", path.display()));
    let result = atomic_write_with_tmp(path, content, options.dry_run, &tmp)?;
    options.log.record(result.clone());
    Ok(result)
}

fn digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}

fn read_existing(path: &Path) -> Result<Option<String>, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

fn atomic_write_with_tmp(
    path: &Path,
    content: &str,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, SyncError> {
    let existing = read_existing(path)?;
    if let Some(current) = &existing {
        if digest(current) == digest(content) {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
            diff: unified_diff(path, existing.as_deref().unwrap_or(""), content),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if existing.is_some() {
        if let Ok(meta) = std::fs::metadata(path) {
            std::fs::set_permissions(tmp, meta.permissions()).map_err(|e| io_err(tmp, e))?;
        }
    }

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}
