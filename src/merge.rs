//! Fan-in of independent streams through one bounded queue.
//!
//! Each source is drained by its own task into a shared channel. The channel
//! capacity bounds memory when the consumer is slower than the producers.
//! Items from different sources arrive in no particular order.

use crate::config::LoadConfig;
use crate::core::{MirrorError, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{Level, event};

/// Holds the first error raised by any worker. Later errors are dropped.
#[derive(Debug, Default)]
pub(crate) struct FirstFailure {
    slot: Mutex<Option<MirrorError>>,
}

impl FirstFailure {
    /// Stores the error if none was stored yet. Returns true for the first one.
    pub(crate) fn record(&self, err: MirrorError) -> bool {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub(crate) fn get(&self) -> Option<MirrorError> {
        match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Merges streams into one bounded, unordered stream.
#[derive(Debug, Clone)]
pub struct ParallelMerge {
    capacity: usize,
    next_timeout: Duration,
}

impl Default for ParallelMerge {
    fn default() -> Self {
        Self::from_config(&LoadConfig::default())
    }
}

impl ParallelMerge {
    pub fn new(capacity: usize, next_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            next_timeout,
        }
    }

    pub fn from_config(config: &LoadConfig) -> Self {
        Self::new(config.merge_queue_capacity, config.merge_next_timeout())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Starts one worker per source and returns the merged stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn merge<T>(&self, sources: Vec<BoxStream<'static, Result<T>>>) -> MergedStream<T>
    where
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let (cancel, _) = watch::channel(false);
        let cancel = Arc::new(cancel);
        let failure = Arc::new(FirstFailure::default());
        let remaining = Arc::new(AtomicUsize::new(sources.len()));
        let mut workers = JoinSet::new();

        for (index, source) in sources.into_iter().enumerate() {
            workers.spawn(drain_source(
                index,
                source,
                sender.clone(),
                cancel.clone(),
                failure.clone(),
                remaining.clone(),
            ));
        }

        MergedStream {
            receiver,
            remaining,
            failure,
            cancel,
            workers,
            next_timeout: self.next_timeout,
        }
    }
}

async fn drain_source<T>(
    index: usize,
    mut source: BoxStream<'static, Result<T>>,
    sender: mpsc::Sender<T>,
    cancel: Arc<watch::Sender<bool>>,
    failure: Arc<FirstFailure>,
    remaining: Arc<AtomicUsize>,
) where
    T: Send + 'static,
{
    let mut cancelled = cancel.subscribe();
    loop {
        if *cancelled.borrow() {
            break;
        }
        let next = tokio::select! {
            _ = cancelled.changed() => break,
            next = source.next() => next,
        };
        match next {
            None => break,
            Some(Ok(item)) => {
                let sent = tokio::select! {
                    _ = cancelled.changed() => break,
                    sent = sender.send(item) => sent,
                };
                if sent.is_err() {
                    // consumer is gone
                    break;
                }
            }
            Some(Err(err)) => {
                event!(Level::ERROR, source = index, error = %err, "merge source failed");
                if failure.record(err) {
                    cancel.send_replace(true);
                }
                break;
            }
        }
    }
    remaining.fetch_sub(1, Ordering::SeqCst);
}

/// The consumer side of a [`ParallelMerge`].
///
/// Dropping it aborts any worker still running.
pub struct MergedStream<T> {
    receiver: mpsc::Receiver<T>,
    remaining: Arc<AtomicUsize>,
    failure: Arc<FirstFailure>,
    cancel: Arc<watch::Sender<bool>>,
    workers: JoinSet<()>,
    next_timeout: Duration,
}

impl<T> MergedStream<T>
where
    T: Send + 'static,
{
    /// True while any source is still being drained or items are queued.
    pub fn has_more(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) > 0 || !self.receiver.is_empty()
    }

    /// Number of sources still being drained.
    pub fn active_sources(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Pulls the next item.
    ///
    /// Raises the first worker error once one was recorded. Waiting longer than
    /// the configured timeout is an error, not an end of stream.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if let Some(err) = self.failure.get() {
            self.shutdown();
            return Err(err);
        }

        match timeout(self.next_timeout, self.receiver.recv()).await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                if let Some(err) = self.failure.get() {
                    return Err(err);
                }
                while let Some(joined) = self.workers.join_next().await {
                    joined?;
                }
                Ok(None)
            }
            Err(_) => {
                self.shutdown();
                Err(MirrorError::Timeout(format!(
                    "no merged item within {}ms",
                    self.next_timeout.as_millis()
                )))
            }
        }
    }

    /// Drains every remaining item.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapts the merge into a `Stream` that ends after yielding an error.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut merged = state?;
            match merged.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(merged))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    fn shutdown(&mut self) {
        self.cancel.send_replace(true);
        self.workers.abort_all();
    }
}
