use super::{DocumentLoader, LazyLoad, LoadReport, LoadStep, LoadedDocument, LoadedObjects};
use crate::collection::{DocumentQuery, DocumentStream};
use crate::core::{MirrorError, Result};
use crate::partition::PartitionFilter;
use crate::patch::PatchedDocumentPair;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{Instrument, Level, event, info_span};

struct EagerOutcome<T> {
    objects: Vec<T>,
    pairs: Vec<PatchedDocumentPair>,
    read: usize,
}

impl<T> DocumentLoader<T>
where
    T: Send + Sync + 'static,
{
    /// Loads the full population of the type.
    ///
    /// Types excluded from the initial load yield nothing.
    pub async fn load_all(&self) -> Result<LoadedObjects<T>> {
        let type_name = self.mirrored_type.type_name();
        if self.mirrored_type.exclude_from_initial_load() {
            event!(Level::DEBUG, type_name = %type_name, "type excluded from initial load");
            return Ok(LoadedObjects::Materialized(Vec::new()));
        }

        let filter = self.partition_filter();
        if !self.mirrored_type.write_back_patched_documents() {
            return Ok(LoadedObjects::Streaming(LazyLoad::new(
                self.step(filter.clone()),
                self.collection.clone(),
                self.mirrored_type.load_documents_routed(),
                filter,
                self.config.clone(),
            )));
        }

        let source = Self::open_source(
            &self.collection,
            self.mirrored_type.load_documents_routed(),
            &filter,
        )
        .await?;
        let objects = self.load_eager(source, filter).await?;
        Ok(LoadedObjects::Materialized(objects))
    }

    /// Loads a single document by identity.
    ///
    /// A document that exists but is rejected by the partition filter is an error.
    pub async fn load_by_id(&self, id: &Value) -> Result<Option<T>> {
        let span = info_span!(
            "mirror.load.by_id",
            type_name = %self.mirrored_type.type_name(),
            id = %id
        );
        self.load_by_id_inner(id).instrument(span).await
    }

    async fn load_by_id_inner(&self, id: &Value) -> Result<Option<T>> {
        let stored_id = self.converter.to_document_value(id)?;
        let Some(raw) = self.collection.find_by_id(&stored_id).await? else {
            return Ok(None);
        };

        let step = self.step(self.partition_filter());
        let Some(loaded) = step.process(raw)? else {
            event!(Level::WARN, "document rejected by partition filter");
            return Err(MirrorError::IllegalArgument(format!(
                "document {} of '{}' does not belong to this partition",
                id,
                self.mirrored_type.type_name()
            )));
        };

        if let Some(pair) = loaded.patched {
            self.write_back(vec![pair]).await?;
        }
        Ok(Some(loaded.object))
    }

    /// Loads every owned document matching the template object.
    pub async fn load_by_query(&self, template: &T) -> Result<Vec<T>> {
        let query = self.converter.to_query(template)?;
        self.load_matching(&query, self.partition_filter()).await
    }

    /// Loads documents matching a query, accepted by an arbitrary filter.
    pub async fn load_matching(
        &self,
        query: &DocumentQuery,
        filter: PartitionFilter<T>,
    ) -> Result<Vec<T>> {
        let source = self.collection.find_by_query(query).await?;
        self.load_eager(source, filter).await
    }

    /// Runs the worker pool over a source, then writes back patched documents.
    ///
    /// Any failure aborts the whole load.
    pub(crate) async fn load_eager(
        &self,
        source: DocumentStream,
        filter: PartitionFilter<T>,
    ) -> Result<Vec<T>> {
        let span = info_span!(
            "mirror.load.eager",
            type_name = %self.mirrored_type.type_name()
        );
        self.load_eager_inner(source, filter).instrument(span).await
    }

    async fn load_eager_inner(
        &self,
        source: DocumentStream,
        filter: PartitionFilter<T>,
    ) -> Result<Vec<T>> {
        let type_name = self.mirrored_type.type_name().to_string();
        let started_at_unix_ms = Utc::now().timestamp_millis();
        let started = Instant::now();
        let step = self.step(filter);
        let workers = self.config.worker_count.max(1);

        let run = run_workers(step, source, workers);
        let outcome = timeout(self.config.await_termination(), run)
            .await
            .map_err(|_| {
                MirrorError::Timeout(format!(
                    "loading '{}' did not finish within {}ms",
                    type_name, self.config.await_termination_ms
                ))
            })?
            .inspect_err(|err| {
                event!(Level::ERROR, error = %err, "eager load aborted");
            })?;

        let patched = outcome.pairs.len();
        let written_back = self.write_back(outcome.pairs).await?;
        let loaded = outcome.objects.len();

        let report = LoadReport {
            type_name,
            read: outcome.read,
            loaded,
            filtered: outcome.read - loaded,
            patched,
            written_back,
            started_at_unix_ms,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        event!(
            Level::INFO,
            read = report.read,
            loaded = report.loaded,
            patched = report.patched,
            "eager load finished"
        );
        self.store_report(report);
        Ok(outcome.objects)
    }

    /// Replaces every patched document in the store.
    pub(crate) async fn write_back(&self, pairs: Vec<PatchedDocumentPair>) -> Result<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let count = pairs.len();
        let workers = self.config.worker_count.max(1);
        let collection = self.collection.clone();

        futures::stream::iter(pairs.into_iter().map(Ok))
            .try_for_each_concurrent(workers, |pair: PatchedDocumentPair| {
                let collection = collection.clone();
                async move {
                    collection
                        .replace(&pair.old_version, pair.new_version)
                        .await
                }
            })
            .await
            .inspect_err(|err| {
                event!(Level::ERROR, error = %err, "write-back of patched documents failed");
            })?;

        event!(Level::DEBUG, written_back = count, "patched documents written back");
        Ok(count)
    }
}

/// Converts the source on at most `workers` tasks at a time.
///
/// The tasks live in a `JoinSet` owned by this future: when the load times
/// out or fails, dropping it aborts every conversion still in flight.
async fn run_workers<T>(
    step: Arc<LoadStep<T>>,
    mut source: DocumentStream,
    workers: usize,
) -> Result<EagerOutcome<T>>
where
    T: Send + Sync + 'static,
{
    let mut outcome = EagerOutcome {
        objects: Vec::new(),
        pairs: Vec::new(),
        read: 0,
    };
    let mut tasks = JoinSet::new();

    while let Some(raw) = source.next().await {
        let raw = raw?;
        if tasks.len() >= workers {
            if let Some(joined) = tasks.join_next().await {
                outcome.absorb(joined??);
            }
        }
        let step = step.clone();
        tasks.spawn(async move { step.process(raw) });
    }

    while let Some(joined) = tasks.join_next().await {
        outcome.absorb(joined??);
    }
    Ok(outcome)
}

impl<T> EagerOutcome<T> {
    fn absorb(&mut self, loaded: Option<LoadedDocument<T>>) {
        self.read += 1;
        if let Some(loaded) = loaded {
            if let Some(pair) = loaded.patched {
                self.pairs.push(pair);
            }
            self.objects.push(loaded.object);
        }
    }
}
