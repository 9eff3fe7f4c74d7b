use super::{DocumentCollection, DocumentQuery, DocumentStream};
use crate::core::document::id_key_of;
use crate::core::{Document, MirrorError, Result};
use crate::partition::DocumentPartition;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Document collection held in process memory.
///
/// Serves as the reference implementation of the collection contract.
pub struct InMemoryDocumentCollection {
    name: String,
    documents: RwLock<BTreeMap<String, Document>>,
}

impl InMemoryDocumentCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Snapshot of every stored document, ordered by identity.
    pub async fn documents(&self) -> Vec<Document> {
        self.documents.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn duplicate(&self, key: &str) -> MirrorError {
        MirrorError::DuplicateDocumentKey {
            collection: self.name.clone(),
            id: key.to_string(),
        }
    }

    fn require_key(&self, document: &Document) -> Result<String> {
        document.id_key().ok_or_else(|| {
            MirrorError::IllegalArgument(format!(
                "document without '_id' cannot be written to '{}'",
                self.name
            ))
        })
    }

    fn insert_locked(
        &self,
        documents: &mut BTreeMap<String, Document>,
        mut document: Document,
    ) -> Result<Document> {
        if document.id().is_none() {
            document.set_id(Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let key = self.require_key(&document)?;
        if documents.contains_key(&key) {
            return Err(self.duplicate(&key));
        }
        documents.insert(key, document.clone());
        Ok(document)
    }

    fn remove_exact_locked(documents: &mut BTreeMap<String, Document>, template: &Document) {
        match template.id_key() {
            Some(key) => {
                if documents.get(&key) == Some(template) {
                    documents.remove(&key);
                }
            }
            None => documents.retain(|_, stored| stored != template),
        }
    }
}

fn snapshot_stream(documents: Vec<Document>) -> DocumentStream {
    stream::iter(documents.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl DocumentCollection for InMemoryDocumentCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_all(&self) -> Result<DocumentStream> {
        Ok(snapshot_stream(self.documents().await))
    }

    async fn find_all_in_partition(&self, partition: &DocumentPartition) -> Result<DocumentStream> {
        let documents = self.documents.read().await;
        let mut owned = Vec::new();
        for document in documents.values() {
            if partition.contains(document)? {
                owned.push(document.clone());
            }
        }
        Ok(snapshot_stream(owned))
    }

    async fn find_by_id(&self, id: &Value) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents.get(&id_key_of(id)).cloned())
    }

    async fn find_by_query(&self, query: &DocumentQuery) -> Result<DocumentStream> {
        let documents = self.documents.read().await;
        let matching = documents
            .values()
            .filter(|document| query.matches(document))
            .cloned()
            .collect();
        Ok(snapshot_stream(matching))
    }

    async fn insert(&self, document: Document) -> Result<Document> {
        let mut documents = self.documents.write().await;
        self.insert_locked(&mut documents, document)
    }

    async fn insert_all(&self, batch: Vec<Document>) -> Result<()> {
        let mut documents = self.documents.write().await;
        for document in batch {
            self.insert_locked(&mut documents, document)?;
        }
        Ok(())
    }

    async fn update(&self, document: Document) -> Result<()> {
        let key = self.require_key(&document)?;
        self.documents.write().await.insert(key, document);
        Ok(())
    }

    async fn replace(&self, old_version: &Document, new_version: Document) -> Result<()> {
        let new_key = self.require_key(&new_version)?;
        let mut documents = self.documents.write().await;

        if old_version.id_key().as_deref() == Some(new_key.as_str()) {
            documents.insert(new_key, new_version);
            return Ok(());
        }

        if documents.contains_key(&new_key) {
            return Err(self.duplicate(&new_key));
        }
        documents.insert(new_key, new_version);
        Self::remove_exact_locked(&mut documents, old_version);
        Ok(())
    }

    async fn delete(&self, template: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        if template.is_id_only() {
            if let Some(key) = template.id_key() {
                documents.remove(&key);
            }
            return Ok(());
        }
        Self::remove_exact_locked(&mut documents, template);
        Ok(())
    }
}
