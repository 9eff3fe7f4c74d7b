#![allow(dead_code)]

use async_trait::async_trait;
use docmirror::{
    Document, DocumentCollection, DocumentQuery, DocumentStream, InMemoryDocumentCollection,
    MirrorError, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fruit {
    pub name: String,
    pub origin: Option<String>,
    #[serde(default)]
    pub organic: Option<bool>,
}

impl Fruit {
    pub fn new(name: &str, origin: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: Some(origin.to_string()),
            organic: None,
        }
    }
}

pub fn doc(value: Value) -> Document {
    Document::from_json(value).unwrap()
}

/// A store call observed by [`RecordingCollection`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    InsertAll(Vec<Value>),
    Update(Value),
    Delete(Document),
    Replace(Value, Value),
}

/// In-memory collection that records write calls and can fail on demand.
pub struct RecordingCollection {
    inner: InMemoryDocumentCollection,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<Vec<(String, MirrorError)>>,
}

impl RecordingCollection {
    pub fn new(name: &str) -> Self {
        Self {
            inner: InMemoryDocumentCollection::new(name),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next call of `operation` ("insert_all", "update", "delete", "replace") fail.
    pub fn fail_next(&self, operation: &str, err: MirrorError) {
        self.failures
            .lock()
            .unwrap()
            .push((operation.to_string(), err));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inner(&self) -> &InMemoryDocumentCollection {
        &self.inner
    }

    fn take_failure(&self, operation: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(index) = failures.iter().position(|(op, _)| op == operation) {
            let (_, err) = failures.remove(index);
            return Err(err);
        }
        Ok(())
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn id_of(document: &Document) -> Value {
    document.id().cloned().unwrap_or(Value::Null)
}

#[async_trait]
impl DocumentCollection for RecordingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_all(&self) -> Result<DocumentStream> {
        self.inner.find_all().await
    }

    async fn find_by_id(&self, id: &Value) -> Result<Option<Document>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_query(&self, query: &DocumentQuery) -> Result<DocumentStream> {
        self.inner.find_by_query(query).await
    }

    async fn insert(&self, document: Document) -> Result<Document> {
        self.inner.insert(document).await
    }

    async fn insert_all(&self, documents: Vec<Document>) -> Result<()> {
        self.record(StoreCall::InsertAll(documents.iter().map(id_of).collect()));
        self.take_failure("insert_all")?;
        self.inner.insert_all(documents).await
    }

    async fn update(&self, document: Document) -> Result<()> {
        self.record(StoreCall::Update(id_of(&document)));
        self.take_failure("update")?;
        self.inner.update(document).await
    }

    async fn replace(&self, old_version: &Document, new_version: Document) -> Result<()> {
        self.record(StoreCall::Replace(id_of(old_version), id_of(&new_version)));
        self.take_failure("replace")?;
        self.inner.replace(old_version, new_version).await
    }

    async fn delete(&self, template: &Document) -> Result<()> {
        self.record(StoreCall::Delete(template.clone()));
        self.take_failure("delete")?;
        self.inner.delete(template).await
    }
}
