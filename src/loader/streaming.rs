use super::{DocumentLoader, LoadStep};
use crate::collection::DocumentCollection;
use crate::config::LoadConfig;
use crate::core::{Document, Result};
use crate::merge::FirstFailure;
use crate::partition::PartitionFilter;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{Instrument, Level, event, info_span};

/// A restartable lazy load. Every [`stream`](LazyLoad::stream) call reads the
/// collection again from the start.
pub struct LazyLoad<T> {
    step: Arc<LoadStep<T>>,
    collection: Arc<dyn DocumentCollection>,
    routed: bool,
    filter: PartitionFilter<T>,
    config: LoadConfig,
}

impl<T> LazyLoad<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        step: Arc<LoadStep<T>>,
        collection: Arc<dyn DocumentCollection>,
        routed: bool,
        filter: PartitionFilter<T>,
        config: LoadConfig,
    ) -> Self {
        Self {
            step,
            collection,
            routed,
            filter,
            config,
        }
    }

    /// Starts a fresh run and returns its consumer side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stream(&self) -> LoadStream<T> {
        let (output, receiver) = mpsc::channel(self.config.output_queue_capacity.max(1));
        let failure = Arc::new(FirstFailure::default());
        let feeder = Feeder {
            step: self.step.clone(),
            collection: self.collection.clone(),
            routed: self.routed,
            filter: self.filter.clone(),
            workers: Arc::new(Semaphore::new(self.config.worker_count.max(1))),
            output,
            failure: failure.clone(),
            unsaved_patches: Arc::new(AtomicUsize::new(0)),
        };
        let span = info_span!(
            "mirror.load.streaming",
            type_name = %self.step.mirrored_type.type_name()
        );
        let handle = tokio::spawn(feeder.run().instrument(span));

        LoadStream {
            receiver,
            failure,
            peeked: None,
            poll_interval: self.config.poll_interval(),
            feeder: handle,
        }
    }
}

struct Feeder<T> {
    step: Arc<LoadStep<T>>,
    collection: Arc<dyn DocumentCollection>,
    routed: bool,
    filter: PartitionFilter<T>,
    workers: Arc<Semaphore>,
    output: mpsc::Sender<T>,
    failure: Arc<FirstFailure>,
    unsaved_patches: Arc<AtomicUsize>,
}

impl<T> Feeder<T>
where
    T: Send + Sync + 'static,
{
    async fn run(self) {
        let mut source =
            match DocumentLoader::<T>::open_source(&self.collection, self.routed, &self.filter)
                .await
            {
                Ok(source) => source,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "streaming load could not open its source");
                    self.failure.record(err);
                    return;
                }
            };

        let mut tasks = JoinSet::new();
        let mut read = 0usize;
        while let Some(raw) = source.next().await {
            if self.failure.get().is_some() {
                break;
            }
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => {
                    self.failure.record(err);
                    break;
                }
            };
            read += 1;

            // Saturated pool: convert on the feeder itself.
            match self.workers.clone().try_acquire_owned() {
                Ok(permit) => {
                    let step = self.step.clone();
                    let output = self.output.clone();
                    let failure = self.failure.clone();
                    let unsaved = self.unsaved_patches.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        convert_and_push(&step, raw, &output, &failure, &unsaved).await;
                    });
                }
                Err(_) => {
                    convert_and_push(
                        &self.step,
                        raw,
                        &self.output,
                        &self.failure,
                        &self.unsaved_patches,
                    )
                    .await;
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = joined {
                    self.failure.record(err.into());
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                self.failure.record(err.into());
            }
        }

        event!(
            Level::DEBUG,
            read,
            unsaved_patches = self.unsaved_patches.load(Ordering::Relaxed),
            failed = self.failure.get().is_some(),
            "streaming load feeder finished"
        );
    }
}

async fn convert_and_push<T>(
    step: &LoadStep<T>,
    raw: Document,
    output: &mpsc::Sender<T>,
    failure: &FirstFailure,
    unsaved_patches: &AtomicUsize,
) {
    match step.process(raw) {
        Ok(Some(loaded)) => {
            if loaded.patched.is_some() {
                unsaved_patches.fetch_add(1, Ordering::Relaxed);
            }
            // A closed channel means the consumer went away.
            let _ = output.send(loaded.object).await;
        }
        Ok(None) => {}
        Err(err) => {
            event!(Level::ERROR, error = %err, "streaming conversion failed");
            failure.record(err);
        }
    }
}

/// Consumer side of one lazy load run.
///
/// Dropping it stops the feeder and its workers.
pub struct LoadStream<T> {
    receiver: mpsc::Receiver<T>,
    failure: Arc<FirstFailure>,
    peeked: Option<T>,
    poll_interval: Duration,
    feeder: JoinHandle<()>,
}

impl<T> LoadStream<T>
where
    T: Send + 'static,
{
    /// Waits until an item is available or every producer has terminated.
    ///
    /// Raises the first recorded worker error.
    pub async fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        loop {
            if let Some(err) = self.failure.get() {
                return Err(err);
            }
            match timeout(self.poll_interval, self.receiver.recv()).await {
                Ok(Some(item)) => {
                    self.peeked = Some(item);
                    return Ok(true);
                }
                Ok(None) => {
                    return match self.failure.get() {
                        Some(err) => Err(err),
                        None => Ok(false),
                    };
                }
                Err(_) => continue,
            }
        }
    }

    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.has_next().await? {
            Ok(self.peeked.take())
        } else {
            Ok(None)
        }
    }

    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut objects = Vec::new();
        while let Some(object) = self.next().await? {
            objects.push(object);
        }
        Ok(objects)
    }

    /// Adapts the run into a `Stream` that ends after yielding an error.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut load = state?;
            match load.next().await {
                Ok(Some(object)) => Some((Ok(object), Some(load))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}

impl<T> Drop for LoadStream<T> {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}
