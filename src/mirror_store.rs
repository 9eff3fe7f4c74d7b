use crate::binding::MirrorBinding;
use crate::collection::DocumentCollection;
use crate::config::MirrorConfig;
use crate::convert::{Converter, JsonConverter};
use crate::core::{MirrorError, Result};
use crate::loader::{DocumentLoader, LoadReport, LoadedObjects};
use crate::merge::{MergedStream, ParallelMerge};
use crate::mirror::{MirroredType, MirroredTypeRegistry};
use crate::sync::{BulkSynchronizer, ExceptionPolicy, MutationIntent, SyncExceptionHandler, SyncReport};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event};

/// Keeps a set of mirrored types consistent between an object store and a document store.
///
/// The host calls the read side at startup or reload time and feeds its
/// mutation log into [`synchronize`](DocumentMirror::synchronize).
pub struct DocumentMirror<T> {
    registry: MirroredTypeRegistry,
    loaders: HashMap<String, Arc<DocumentLoader<T>>>,
    synchronizer: BulkSynchronizer<T>,
    handler: Arc<SyncExceptionHandler>,
    config: MirrorConfig,
}

/// Collects the type declarations of a [`DocumentMirror`].
pub struct DocumentMirrorBuilder<T> {
    config: MirrorConfig,
    declarations: Vec<(
        MirroredType,
        Arc<dyn DocumentCollection>,
        Arc<dyn Converter<T>>,
    )>,
}

impl<T> DocumentMirrorBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Declares a type with an explicit converter.
    pub fn register(
        mut self,
        mirrored_type: MirroredType,
        collection: Arc<dyn DocumentCollection>,
        converter: Arc<dyn Converter<T>>,
    ) -> Self {
        self.declarations
            .push((mirrored_type, collection, converter));
        self
    }

    /// Resolves the declarations. Nothing is registered if any of them is invalid.
    pub fn build(self) -> Result<DocumentMirror<T>> {
        self.config.validate()?;

        for (mirrored_type, collection, _) in &self.declarations {
            if mirrored_type.collection_name() != collection.name() {
                return Err(MirrorError::IllegalArgument(format!(
                    "'{}' maps to collection '{}' but was bound to '{}'",
                    mirrored_type.type_name(),
                    mirrored_type.collection_name(),
                    collection.name()
                )));
            }
        }

        let (types, bindings): (Vec<_>, Vec<_>) = self
            .declarations
            .into_iter()
            .map(|(mirrored_type, collection, converter)| {
                let type_name = mirrored_type.type_name().to_string();
                (mirrored_type, (type_name, collection, converter))
            })
            .unzip();
        let registry = MirroredTypeRegistry::new(types)?;

        let mut loaders = HashMap::new();
        let mut sync_bindings = Vec::new();
        for (type_name, collection, converter) in bindings {
            let mirrored_type = registry.get(&type_name)?;
            let binding = MirrorBinding::new(mirrored_type.clone(), collection.clone(), converter.clone());
            loaders.insert(
                type_name,
                Arc::new(DocumentLoader::new(
                    mirrored_type,
                    collection,
                    converter,
                    self.config.load.clone(),
                    self.config.partition,
                )),
            );
            sync_bindings.push(binding);
        }

        let handler = Arc::new(SyncExceptionHandler::from_config(&self.config.sync)?);
        let synchronizer = BulkSynchronizer::new(sync_bindings, handler.clone());

        event!(
            Level::INFO,
            types = registry.len(),
            partition = ?self.config.partition,
            "document mirror ready"
        );

        Ok(DocumentMirror {
            registry,
            loaders,
            synchronizer,
            handler,
            config: self.config,
        })
    }
}

impl<T> DocumentMirrorBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Declares a type marshalled with [`JsonConverter`].
    pub fn register_json(
        self,
        mirrored_type: MirroredType,
        collection: Arc<dyn DocumentCollection>,
    ) -> Self {
        let converter: Arc<dyn Converter<T>> = Arc::new(JsonConverter::for_type(&mirrored_type));
        self.register(mirrored_type, collection, converter)
    }
}

impl<T> DocumentMirror<T>
where
    T: Send + Sync + 'static,
{
    pub fn builder(config: MirrorConfig) -> DocumentMirrorBuilder<T> {
        DocumentMirrorBuilder {
            config,
            declarations: Vec::new(),
        }
    }

    pub fn registry(&self) -> &MirroredTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn loader(&self, type_name: &str) -> Result<&Arc<DocumentLoader<T>>> {
        self.loaders
            .get(type_name)
            .ok_or_else(|| MirrorError::UnknownMirroredType(type_name.to_string()))
    }

    pub async fn load_all(&self, type_name: &str) -> Result<LoadedObjects<T>> {
        self.loader(type_name)?.load_all().await
    }

    pub async fn load_by_id(&self, type_name: &str, id: &Value) -> Result<Option<T>> {
        self.loader(type_name)?.load_by_id(id).await
    }

    pub async fn load_by_query(&self, type_name: &str, template: &T) -> Result<Vec<T>> {
        self.loader(type_name)?.load_by_query(template).await
    }

    /// Loads every type not excluded from the initial load, fanned in through
    /// one bounded merge. Objects of different types interleave freely.
    pub fn initial_load(&self) -> MergedStream<T> {
        let sources = self
            .registry
            .iter()
            .filter(|mirrored_type| !mirrored_type.exclude_from_initial_load())
            .filter_map(|mirrored_type| self.loaders.get(mirrored_type.type_name()).cloned())
            .map(|loader| {
                futures::stream::once(async move { loader.load_all().await })
                    .map_ok(LoadedObjects::into_stream)
                    .try_flatten()
                    .boxed()
            })
            .collect();

        ParallelMerge::from_config(&self.config.load).merge(sources)
    }

    pub async fn synchronize(&self, batch: Vec<MutationIntent<T>>) -> Result<SyncReport> {
        self.synchronizer.synchronize(batch).await
    }

    pub fn exception_policy(&self) -> ExceptionPolicy {
        self.handler.policy()
    }

    /// Operator toggle between rethrowing transient failures and absorbing everything.
    pub fn set_exception_policy(&self, policy: ExceptionPolicy) {
        self.handler.set_policy(policy);
    }

    pub fn last_load_report(&self, type_name: &str) -> Option<LoadReport> {
        self.loaders
            .get(type_name)
            .and_then(|loader| loader.last_report())
    }
}
