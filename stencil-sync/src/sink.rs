//! Sink stages: where rendered items end up.
//!
//! Every sink forwards each input item once. Failed items pass through
//! untouched; an item whose output could not be persisted leaves the sink
//! failed with `SinkWrite`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task;

use stencil_core::{sequential_apply, Item, ItemError, ItemStream, Stage};

use crate::error::SyncError;
use crate::writer::{atomic_write, WriteOptions};

fn sink_error(target: &Path, err: SyncError) -> ItemError {
    ItemError::SinkWrite {
        target: target.display().to_string(),
        message: err.to_string(),
    }
}

/// Concatenate every successful item, ordered by name, into the single
/// file at `path`. The file is written once, after the input closes, and
/// not at all when no item succeeded.
pub fn file_sink(path: impl Into<PathBuf>, options: WriteOptions) -> Stage {
    let path = Arc::new(path.into());
    Stage::new(move |mut input| {
        let path = Arc::clone(&path);
        let options = options.clone();
        let (tx, out) = ItemStream::channel();
        tokio::spawn(async move {
            let mut items = Vec::new();
            while let Some(item) = input.recv().await {
                items.push(item);
            }

            let mut ok: Vec<&Item> = items.iter().filter(|i| !i.is_failed()).collect();
            ok.sort_by(|a, b| a.name.cmp(&b.name));
            let write_error = if ok.is_empty() {
                tracing::debug!("nothing rendered, {} left untouched", path.display());
                None
            } else {
                let content: String = ok.iter().map(|i| i.content.as_str()).collect();
                let target = Arc::clone(&path);
                let written = task::spawn_blocking(move || atomic_write(&target, &content, &options)).await;
                match written {
                    Ok(Ok(_)) => None,
                    Ok(Err(err)) => Some(sink_error(&path, err)),
                    Err(err) => Some(ItemError::TaskAborted(err.to_string())),
                }
            };

            for item in items {
                let item = match &write_error {
                    Some(err) if !item.is_failed() => item.fail(err.clone()),
                    _ => item,
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        out
    })
}

/// Write each item to `dir/<basename>`, with the first matching suffix of
/// `strip_suffixes` removed from the basename.
pub fn dir_sink(dir: impl Into<PathBuf>, strip_suffixes: Vec<String>, options: WriteOptions) -> Stage {
    let dir = dir.into();
    sequential_apply(move |item: Item| {
        let target = dir.join(output_name(&item.name, &strip_suffixes));
        let result = atomic_write(&target, &item.content, &options)
            .map(|_| ())
            .map_err(|err| sink_error(&target, err));
        item.with_result(result)
    })
}

/// Basename of `name` with the first matching suffix removed. A suffix
/// that is the whole basename is left alone.
pub fn output_name(name: &str, strip_suffixes: &[String]) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|b| b.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    strip_suffixes
        .iter()
        .find_map(|suffix| {
            base.strip_suffix(suffix.as_str())
                .filter(|stem| !stem.is_empty())
        })
        .map(str::to_string)
        .unwrap_or(base)
}

/// Write each item's content to `writer` in arrival order, flushing after
/// every item. `target` names the writer in errors.
pub fn writer_sink<W>(target: impl Into<String>, writer: W) -> Stage
where
    W: Write + Send + 'static,
{
    let target = target.into();
    let writer = Arc::new(Mutex::new(writer));
    sequential_apply(move |item: Item| {
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writer
            .write_all(item.content.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|err| ItemError::SinkWrite {
                target: target.clone(),
                message: err.to_string(),
            });
        drop(writer);
        item.with_result(result)
    })
}
