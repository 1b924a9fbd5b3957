//! Producers, stages, merge operators and stage runners.
//!
//! Every stream is a tokio channel of capacity 1: a sender waits until the
//! consumer has taken the previous item. Operators spawn tasks on the
//! current runtime, so they must be called from within one.
//!
//! | Operator                   | Ordering of the output                       |
//! |----------------------------|----------------------------------------------|
//! | [`concat_merge`]           | source 1 fully, then source 2, ...           |
//! | [`interleave_merge`]       | per-source order only                        |
//! | [`sequential_apply`]       | same as input                                |
//! | [`concurrent_apply`]       | completion order                             |
//! | [`fan_out`]                | failures first, then sink 1, sink 2, ...     |

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task;

use crate::error::{Failure, ItemError, PipelineFailure};
use crate::item::Item;

const CHANNEL_CAPACITY: usize = 1;

/// Sending half of an [`ItemStream`].
pub type ItemSender = mpsc::Sender<Item>;

// ---------------------------------------------------------------------------
// ItemStream
// ---------------------------------------------------------------------------

/// Receiving end of a finite stream of [`Item`]s.
#[derive(Debug)]
pub struct ItemStream {
    rx: mpsc::Receiver<Item>,
}

impl ItemStream {
    /// A connected sender/stream pair. The stream closes once every sender
    /// clone is dropped.
    pub fn channel() -> (ItemSender, ItemStream) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (tx, ItemStream { rx })
    }

    /// An already-closed stream.
    pub fn empty() -> Self {
        let (_, stream) = Self::channel();
        stream
    }

    pub async fn recv(&mut self) -> Option<Item> {
        self.rx.recv().await
    }

    /// Blocking receive, for use on blocking-pool threads only.
    pub fn blocking_recv(&mut self) -> Option<Item> {
        self.rx.blocking_recv()
    }

    /// Drain the stream into a vector, in arrival order.
    pub async fn collect(mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

type OpenFn = dyn Fn() -> ItemStream + Send + Sync;

/// A restartable source of items: every [`open`](Producer::open) starts a
/// fresh, independent stream.
#[derive(Clone)]
pub struct Producer {
    open: Arc<OpenFn>,
}

impl Producer {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> ItemStream + Send + Sync + 'static,
    {
        Producer {
            open: Arc::new(open),
        }
    }

    /// A producer whose streams are always empty.
    pub fn empty() -> Self {
        Producer::new(ItemStream::empty)
    }

    /// A producer replaying a fixed list of items.
    pub fn from_items(items: Vec<Item>) -> Self {
        let items = Arc::new(items);
        Producer::new(move || {
            let items = Arc::clone(&items);
            let (tx, stream) = ItemStream::channel();
            tokio::spawn(async move {
                for item in items.iter() {
                    if tx.send(item.clone()).await.is_err() {
                        break;
                    }
                }
            });
            stream
        })
    }

    /// A producer backed by a (possibly blocking) iterator, built anew and
    /// consumed on the blocking pool for each opened stream.
    pub fn from_fn<F, I>(make: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Item>,
    {
        let make = Arc::new(make);
        Producer::new(move || {
            let make = Arc::clone(&make);
            let (tx, stream) = ItemStream::channel();
            task::spawn_blocking(move || {
                for item in make() {
                    if tx.blocking_send(item).is_err() {
                        break;
                    }
                }
            });
            stream
        })
    }

    pub fn open(&self) -> ItemStream {
        (self.open)()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

type StageFn = dyn Fn(ItemStream) -> ItemStream + Send + Sync;

/// A 1:1 transform from one item stream to another.
#[derive(Clone)]
pub struct Stage {
    run: Arc<StageFn>,
}

impl Stage {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(ItemStream) -> ItemStream + Send + Sync + 'static,
    {
        Stage { run: Arc::new(run) }
    }

    /// Forwards its input unchanged.
    pub fn passthrough() -> Self {
        Stage::new(|input| input)
    }

    pub fn apply(&self, input: ItemStream) -> ItemStream {
        (self.run)(input)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Merge operators
// ---------------------------------------------------------------------------

/// Combine producers so that all items of producer `n` are emitted before
/// any item of producer `n + 1`.
pub fn concat_merge(producers: Vec<Producer>) -> Producer {
    merge_with(producers, concat_streams)
}

/// Combine producers, forwarding items as soon as any source yields one.
/// Only the order within each source is preserved.
pub fn interleave_merge(producers: Vec<Producer>) -> Producer {
    merge_with(producers, interleave_streams)
}

fn merge_with(mut producers: Vec<Producer>, merge: fn(Vec<ItemStream>) -> ItemStream) -> Producer {
    match producers.len() {
        0 => Producer::empty(),
        1 => producers.remove(0),
        _ => Producer::new(move || merge(producers.iter().map(Producer::open).collect())),
    }
}

fn concat_streams(streams: Vec<ItemStream>) -> ItemStream {
    let (tx, out) = ItemStream::channel();
    tokio::spawn(async move {
        for mut stream in streams {
            while let Some(item) = stream.recv().await {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        }
    });
    out
}

fn interleave_streams(streams: Vec<ItemStream>) -> ItemStream {
    let (tx, out) = ItemStream::channel();
    for mut stream in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Stage runners
// ---------------------------------------------------------------------------

/// Apply `f` to one item at a time, in arrival order. The effects of `f` on
/// an item are complete before the next item is taken.
pub fn sequential_apply<F>(f: F) -> Stage
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Stage::new(move |mut input| {
        let f = Arc::clone(&f);
        let (tx, out) = ItemStream::channel();
        task::spawn_blocking(move || {
            while let Some(item) = input.blocking_recv() {
                let item = if item.is_failed() {
                    item
                } else {
                    let name = item.name.clone();
                    catch_unwind(AssertUnwindSafe(|| f(item))).unwrap_or_else(|_| {
                        Item::failed(name, ItemError::TaskAborted("stage function panicked".into()))
                    })
                };
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        out
    })
}

/// Apply `f` to every item in its own task; results are forwarded as they
/// complete.
pub fn concurrent_apply<F>(f: F) -> Stage
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    spawn_per_item(None, f)
}

/// Like [`concurrent_apply`], with at most `limit` invocations of `f` in
/// flight at once.
pub fn concurrent_apply_limited<F>(limit: usize, f: F) -> Stage
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    spawn_per_item(Some(limit.max(1)), f)
}

fn spawn_per_item<F>(limit: Option<usize>, f: F) -> Stage
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Stage::new(move |mut input| {
        let f = Arc::clone(&f);
        let permits = limit.map(|n| Arc::new(Semaphore::new(n)));
        let (tx, out) = ItemStream::channel();
        tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                let tx = tx.clone();
                let f = Arc::clone(&f);
                let permits = permits.clone();
                tokio::spawn(async move {
                    let item = if item.is_failed() {
                        item
                    } else {
                        let _permit = match permits {
                            Some(permits) => permits.acquire_owned().await.ok(),
                            None => None,
                        };
                        run_blocking(f, item).await
                    };
                    let _ = tx.send(item).await;
                });
            }
        });
        out
    })
}

async fn run_blocking<F>(f: Arc<F>, item: Item) -> Item
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    let name = item.name.clone();
    match task::spawn_blocking(move || f(item)).await {
        Ok(item) => item,
        Err(err) => Item::failed(name, ItemError::TaskAborted(err.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Fan-out and drain
// ---------------------------------------------------------------------------

/// Deliver every successful item to each sink and concatenate the sink
/// outputs in declaration order. Failed items skip the sinks and are
/// forwarded exactly once.
pub fn fan_out(mut sinks: Vec<Stage>) -> Stage {
    match sinks.len() {
        0 => Stage::passthrough(),
        1 => sinks.remove(0),
        _ => Stage::new(move |input| broadcast(input, &sinks)),
    }
}

fn broadcast(mut input: ItemStream, sinks: &[Stage]) -> ItemStream {
    let mut inlets = Vec::with_capacity(sinks.len());
    let mut drains = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let (tx, sink_input) = ItemStream::channel();
        inlets.push(tx);
        // Sink outputs are drained concurrently so a slow reader of one sink
        // cannot stall delivery to the others.
        drains.push(tokio::spawn(sink.apply(sink_input).collect()));
    }

    let (tx, out) = ItemStream::channel();
    tokio::spawn(async move {
        while let Some(item) = input.recv().await {
            if item.is_failed() {
                if tx.send(item).await.is_err() {
                    return;
                }
                continue;
            }
            for inlet in &inlets {
                let _ = inlet.send(item.clone()).await;
            }
        }
        drop(inlets);

        for drain in drains {
            match drain.await {
                Ok(items) => {
                    for item in items {
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => tracing::warn!("sink task did not complete: {err}"),
            }
        }
    });
    out
}

/// Drain `stream` to completion. Returns the successful items, or every
/// failure at once.
pub async fn wait_until_done(mut stream: ItemStream) -> Result<Vec<Item>, PipelineFailure> {
    let mut completed = Vec::new();
    let mut failures = Vec::new();
    while let Some(item) = stream.recv().await {
        match item {
            Item {
                name,
                error: Some(error),
                ..
            } => {
                tracing::warn!(item = %name, "{error}");
                failures.push(Failure { name, error });
            }
            item => {
                tracing::debug!(item = %item.name, "completed");
                completed.push(item);
            }
        }
    }
    if failures.is_empty() {
        Ok(completed)
    } else {
        Err(PipelineFailure { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_stream_is_closed() {
        let mut stream = ItemStream::empty();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn producer_open_is_restartable() {
        let producer = Producer::from_items(vec![Item::new("a", "1"), Item::new("b", "2")]);
        let first = producer.open().collect().await;
        let second = producer.open().collect().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn from_fn_runs_iterator_per_open() {
        let producer = Producer::from_fn(|| (0..3).map(|i| Item::new(format!("n{i}"), "")));
        let names: Vec<_> = producer.open().collect().await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["n0", "n1", "n2"]);
        assert_eq!(producer.open().collect().await.len(), 3);
    }

    #[tokio::test]
    async fn sequential_apply_recovers_from_panics() {
        let stage = sequential_apply(|item: Item| {
            if item.name == "bad" {
                panic!("boom");
            }
            item
        });
        let input = Producer::from_items(vec![Item::new("ok", ""), Item::new("bad", "")]);
        let out = stage.apply(input.open()).collect().await;
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_failed());
        assert!(matches!(out[1].error, Some(ItemError::TaskAborted(_))));
    }

    #[tokio::test]
    async fn wait_until_done_splits_failures() {
        let producer = Producer::from_items(vec![
            Item::new("ok", "x"),
            Item::failed("broken", ItemError::Merge("m".into())),
        ]);
        let err = wait_until_done(producer.open()).await.unwrap_err();
        assert_eq!(err.names(), vec!["broken"]);
    }
}
