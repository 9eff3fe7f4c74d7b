//! Persistent document store contract.
//!
//! The loader and the synchronizer only ever talk to a [`DocumentCollection`].
//! Any implementation, a real store driver or the in-memory double, must keep
//! the identity and matching rules documented on each operation.

mod memory;

pub use memory::InMemoryDocumentCollection;

use crate::core::{Document, Result};
use crate::partition::DocumentPartition;
use async_trait::async_trait;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

/// A stream of documents read from a collection.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// Field-equality query. An empty query matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    criteria: Map<String, Value>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality criterion.
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.criteria.insert(field.into(), value);
        self
    }

    /// Builds a query from a template; null fields match anything.
    pub fn from_template(template: &Document) -> Self {
        let criteria = template
            .fields()
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        Self { criteria }
    }

    pub fn criteria(&self) -> &Map<String, Value> {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.criteria
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Collection name in the persistent store.
    fn name(&self) -> &str;

    async fn find_all(&self) -> Result<DocumentStream>;

    /// Documents owned by a partition.
    ///
    /// The default scans everything and filters client side. Stores that can
    /// evaluate the routing hash themselves should push it down.
    async fn find_all_in_partition(&self, partition: &DocumentPartition) -> Result<DocumentStream> {
        let partition = partition.clone();
        let documents = self.find_all().await?;
        Ok(documents
            .try_filter_map(move |document| {
                let owned = partition.contains(&document);
                futures::future::ready(owned.map(|owned| owned.then_some(document)))
            })
            .boxed())
    }

    async fn find_by_id(&self, id: &Value) -> Result<Option<Document>>;

    async fn find_by_query(&self, query: &DocumentQuery) -> Result<DocumentStream>;

    /// Strict insert. Assigns an identity when absent.
    ///
    /// Fails with `DuplicateDocumentKey` if the identity exists; the stored
    /// document is left untouched.
    async fn insert(&self, document: Document) -> Result<Document>;

    /// Ordered batch insert with the same per-document rules as [`insert`].
    ///
    /// [`insert`]: DocumentCollection::insert
    async fn insert_all(&self, documents: Vec<Document>) -> Result<()>;

    /// Upsert by identity.
    async fn update(&self, document: Document) -> Result<()>;

    /// Replaces a document whose identity may have changed while patching.
    ///
    /// Same identity: in-place replace. Different identity: insert `new_version`,
    /// then remove the document matching `old_version` exactly.
    async fn replace(&self, old_version: &Document, new_version: Document) -> Result<()>;

    /// Removes by identity for identity-only templates, otherwise only on an
    /// exact full-document match.
    async fn delete(&self, template: &Document) -> Result<()>;
}
