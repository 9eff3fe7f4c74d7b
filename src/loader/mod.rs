//! Load, patch, convert and filter documents into typed objects.
//!
//! Types that write back patched documents are loaded eagerly: every document
//! goes through a worker pool, patched pairs are replaced in the store, then
//! the objects are returned. Other types are streamed lazily and the store is
//! never touched.

mod eager;
mod streaming;

pub use streaming::{LazyLoad, LoadStream};

use crate::collection::{DocumentCollection, DocumentStream};
use crate::config::LoadConfig;
use crate::convert::Converter;
use crate::core::{Document, MirrorError, Result};
use crate::mirror::MirroredType;
use crate::partition::{ClusterPartition, PartitionFilter};
use crate::patch::PatchedDocumentPair;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Read port the host store calls at startup and on demand.
#[async_trait]
pub trait Loader<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn load_all(&self) -> Result<LoadedObjects<T>>;

    async fn load_by_id(&self, id: &Value) -> Result<Option<T>>;

    async fn load_by_query(&self, template: &T) -> Result<Vec<T>>;
}

/// Outcome of a full load.
pub enum LoadedObjects<T> {
    /// Eager load; write-back already happened.
    Materialized(Vec<T>),
    /// Lazy load; each call to [`LazyLoad::stream`] restarts it.
    Streaming(LazyLoad<T>),
}

impl<T> LoadedObjects<T>
where
    T: Send + Sync + 'static,
{
    /// Pulls everything into memory.
    pub async fn collect(self) -> Result<Vec<T>> {
        match self {
            Self::Materialized(objects) => Ok(objects),
            Self::Streaming(lazy) => lazy.stream().collect().await,
        }
    }

    /// A stream over the objects, whatever the mode.
    pub fn into_stream(self) -> futures::stream::BoxStream<'static, Result<T>> {
        match self {
            Self::Materialized(objects) => futures::stream::iter(objects.into_iter().map(Ok)).boxed(),
            Self::Streaming(lazy) => lazy.stream().into_stream(),
        }
    }
}

/// One accepted object and, when patches were applied, the pair to write back.
#[derive(Debug)]
pub struct LoadedDocument<T> {
    pub object: T,
    pub patched: Option<PatchedDocumentPair>,
}

/// Counters of the last eager load of a type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub type_name: String,
    pub read: usize,
    pub loaded: usize,
    pub filtered: usize,
    pub patched: usize,
    pub written_back: usize,
    pub started_at_unix_ms: i64,
    pub elapsed_ms: u64,
}

/// The per-document work shared by every load mode.
pub(crate) struct LoadStep<T> {
    mirrored_type: Arc<MirroredType>,
    converter: Arc<dyn Converter<T>>,
    filter: PartitionFilter<T>,
}

impl<T> LoadStep<T> {
    pub(crate) fn new(
        mirrored_type: Arc<MirroredType>,
        converter: Arc<dyn Converter<T>>,
        filter: PartitionFilter<T>,
    ) -> Self {
        Self {
            mirrored_type,
            converter,
            filter,
        }
    }

    /// Patches if needed, converts, then filters. `None` means filtered out.
    pub(crate) fn process(&self, raw: Document) -> Result<Option<LoadedDocument<T>>> {
        let (document, patched) = self
            .mirrored_type
            .patch_with_pair(raw)
            .map_err(|err| self.conversion_error(err))?;
        let object = self
            .converter
            .from_document(&document)
            .map_err(|err| self.conversion_error(err))?;
        if !self.filter.accepts(&document, &object)? {
            return Ok(None);
        }
        Ok(Some(LoadedDocument { object, patched }))
    }

    fn conversion_error(&self, err: MirrorError) -> MirrorError {
        match err {
            MirrorError::UnknownDocumentVersion { .. } | MirrorError::ConversionFailed(_) => err,
            other => MirrorError::ConversionFailed(format!(
                "{}: {}",
                self.mirrored_type.type_name(),
                other
            )),
        }
    }
}

/// Loads one mirrored type out of its collection.
pub struct DocumentLoader<T> {
    mirrored_type: Arc<MirroredType>,
    collection: Arc<dyn DocumentCollection>,
    converter: Arc<dyn Converter<T>>,
    config: LoadConfig,
    partition: Option<ClusterPartition>,
    last_report: Mutex<Option<LoadReport>>,
}

impl<T> DocumentLoader<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        mirrored_type: Arc<MirroredType>,
        collection: Arc<dyn DocumentCollection>,
        converter: Arc<dyn Converter<T>>,
        config: LoadConfig,
        partition: Option<ClusterPartition>,
    ) -> Self {
        Self {
            mirrored_type,
            collection,
            converter,
            config,
            partition,
            last_report: Mutex::new(None),
        }
    }

    pub fn mirrored_type(&self) -> &Arc<MirroredType> {
        &self.mirrored_type
    }

    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    /// Counters of the most recent eager load.
    pub fn last_report(&self) -> Option<LoadReport> {
        match self.last_report.lock() {
            Ok(report) => report.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Ownership filter of this process.
    pub fn partition_filter(&self) -> PartitionFilter<T> {
        match self.partition {
            Some(partition) => {
                PartitionFilter::partition(self.mirrored_type.routing().clone(), partition)
            }
            None => PartitionFilter::accept_all(),
        }
    }

    pub(crate) fn step(&self, filter: PartitionFilter<T>) -> Arc<LoadStep<T>> {
        Arc::new(LoadStep::new(
            self.mirrored_type.clone(),
            self.converter.clone(),
            filter,
        ))
    }

    /// Opens the full read, pushed down to the store for routed types.
    pub(crate) async fn open_source(
        collection: &Arc<dyn DocumentCollection>,
        routed: bool,
        filter: &PartitionFilter<T>,
    ) -> Result<DocumentStream> {
        match filter.document_partition() {
            Some(partition) if routed => collection.find_all_in_partition(partition).await,
            _ => collection.find_all().await,
        }
    }

    fn store_report(&self, report: LoadReport) {
        match self.last_report.lock() {
            Ok(mut slot) => *slot = Some(report),
            Err(poisoned) => *poisoned.into_inner() = Some(report),
        }
    }
}

#[async_trait]
impl<T> Loader<T> for DocumentLoader<T>
where
    T: Send + Sync + 'static,
{
    async fn load_all(&self) -> Result<LoadedObjects<T>> {
        DocumentLoader::load_all(self).await
    }

    async fn load_by_id(&self, id: &Value) -> Result<Option<T>> {
        DocumentLoader::load_by_id(self, id).await
    }

    async fn load_by_query(&self, template: &T) -> Result<Vec<T>> {
        DocumentLoader::load_by_query(self, template).await
    }
}
