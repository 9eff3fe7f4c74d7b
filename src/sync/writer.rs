use super::{MutationIntent, MutationKind, SyncExceptionHandler, SyncReport, Synchronizer};
use crate::binding::MirrorBinding;
use crate::core::{Document, MirrorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Consecutive inserts waiting to be flushed, grouped by collection in
/// first-seen order.
struct PendingInserts<T> {
    groups: Vec<(MirrorBinding<T>, Vec<Document>)>,
}

impl<T> PendingInserts<T> {
    fn new() -> Self {
        Self { groups: Vec::new() }
    }

    fn push(&mut self, binding: &MirrorBinding<T>, document: Document) {
        let collection = binding.collection_name();
        match self
            .groups
            .iter_mut()
            .find(|(existing, _)| existing.collection_name() == collection)
        {
            Some((_, documents)) => documents.push(document),
            None => self.groups.push((binding.clone(), vec![document])),
        }
    }

    fn take(&mut self) -> Vec<(MirrorBinding<T>, Vec<Document>)> {
        std::mem::take(&mut self.groups)
    }
}

/// Applies mutation batches to the document store.
///
/// Inserts are coalesced per collection until an update or remove arrives;
/// the order of everything else is preserved. Each store call is guarded by
/// the exception handler on its own.
pub struct BulkSynchronizer<T> {
    bindings: HashMap<String, MirrorBinding<T>>,
    handler: Arc<SyncExceptionHandler>,
}

impl<T> BulkSynchronizer<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<I>(bindings: I, handler: Arc<SyncExceptionHandler>) -> Self
    where
        I: IntoIterator<Item = MirrorBinding<T>>,
    {
        let bindings = bindings
            .into_iter()
            .map(|binding| (binding.type_name().to_string(), binding))
            .collect();
        Self { bindings, handler }
    }

    pub fn handler(&self) -> &Arc<SyncExceptionHandler> {
        &self.handler
    }

    fn binding(&self, type_name: &str) -> Result<&MirrorBinding<T>> {
        self.bindings
            .get(type_name)
            .ok_or_else(|| MirrorError::UnknownMirroredType(type_name.to_string()))
    }

    /// Applies one batch.
    ///
    /// Fails before writing anything when an intent names an unknown type, and
    /// midway with `TransientWrite` when the handler escalates a failure.
    pub async fn synchronize(&self, batch: Vec<MutationIntent<T>>) -> Result<SyncReport> {
        let span = info_span!("mirror.sync", intents = batch.len());
        self.synchronize_inner(batch).instrument(span).await
    }

    async fn synchronize_inner(&self, batch: Vec<MutationIntent<T>>) -> Result<SyncReport> {
        for intent in &batch {
            self.binding(&intent.type_name)?;
        }

        let mut report = SyncReport::default();
        let mut pending = PendingInserts::new();

        for intent in batch {
            if intent.is_reload_echo() {
                report.skipped_reloaded += 1;
                continue;
            }
            let binding = self.binding(&intent.type_name)?;
            if intent.kind == MutationKind::Remove
                && binding.mirrored_type.keep_persistent_on_remove()
            {
                report.skipped_keep_persistent += 1;
                continue;
            }

            match intent.kind {
                MutationKind::Insert => {
                    if let Some(document) =
                        self.to_document(binding, MutationKind::Insert, &intent.object, &mut report)?
                    {
                        pending.push(binding, document);
                    }
                }
                MutationKind::Update => {
                    self.flush_inserts(&mut pending, &mut report).await?;
                    let Some(document) =
                        self.to_document(binding, MutationKind::Update, &intent.object, &mut report)?
                    else {
                        continue;
                    };
                    let collection = binding.collection.clone();
                    let documents = vec![document.clone()];
                    if self
                        .guarded(
                            MutationKind::Update,
                            binding,
                            &documents,
                            collection.update(document),
                            &mut report,
                        )
                        .await?
                    {
                        report.updated += 1;
                    }
                }
                MutationKind::Remove => {
                    self.flush_inserts(&mut pending, &mut report).await?;
                    let Some(document) =
                        self.to_document(binding, MutationKind::Remove, &intent.object, &mut report)?
                    else {
                        continue;
                    };
                    let Some(id) = document.id().cloned() else {
                        let err = MirrorError::IllegalArgument(format!(
                            "cannot remove '{}' without identity",
                            binding.type_name()
                        ));
                        self.handler.handle(
                            MutationKind::Remove,
                            binding.collection_name(),
                            &[document],
                            err,
                        )?;
                        report.failed_operations += 1;
                        continue;
                    };
                    let template = Document::with_id(id);
                    let collection = binding.collection.clone();
                    let documents = vec![template.clone()];
                    if self
                        .guarded(
                            MutationKind::Remove,
                            binding,
                            &documents,
                            async move { collection.delete(&template).await },
                            &mut report,
                        )
                        .await?
                    {
                        report.removed += 1;
                    }
                }
            }
        }

        self.flush_inserts(&mut pending, &mut report).await?;

        event!(
            Level::DEBUG,
            inserted = report.inserted,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed_operations,
            "synchronization batch applied"
        );
        Ok(report)
    }

    /// Converts the object and stamps the current format version.
    ///
    /// A conversion failure is handed to the exception handler like a failed
    /// store call; `None` means it was absorbed.
    fn to_document(
        &self,
        binding: &MirrorBinding<T>,
        operation: MutationKind,
        object: &T,
        report: &mut SyncReport,
    ) -> Result<Option<Document>> {
        match binding.converter.to_document(object) {
            Ok(mut document) => {
                document.set_format_version(binding.mirrored_type.current_version());
                Ok(Some(document))
            }
            Err(err) => {
                self.handler
                    .handle(operation, binding.collection_name(), &[], err)?;
                report.failed_operations += 1;
                Ok(None)
            }
        }
    }

    async fn flush_inserts(
        &self,
        pending: &mut PendingInserts<T>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (binding, documents) in pending.take() {
            let count = documents.len();
            let collection = binding.collection.clone();
            let batch = documents.clone();
            if self
                .guarded(
                    MutationKind::Insert,
                    &binding,
                    &documents,
                    async move { collection.insert_all(batch).await },
                    report,
                )
                .await?
            {
                report.inserted += count;
                report.insert_batches += 1;
            }
        }
        Ok(())
    }

    /// Runs one store call; failures go through the exception handler.
    ///
    /// Returns whether the call succeeded.
    async fn guarded<F>(
        &self,
        operation: MutationKind,
        binding: &MirrorBinding<T>,
        documents: &[Document],
        call: F,
        report: &mut SyncReport,
    ) -> Result<bool>
    where
        F: Future<Output = Result<()>>,
    {
        match call.await {
            Ok(()) => Ok(true),
            Err(err) => {
                event!(
                    Level::WARN,
                    operation = %operation,
                    collection = %binding.collection_name(),
                    error = %err,
                    "store call failed"
                );
                self.handler
                    .handle(operation, binding.collection_name(), documents, err)?;
                report.failed_operations += 1;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl<T> Synchronizer<T> for BulkSynchronizer<T>
where
    T: Send + Sync + 'static,
{
    async fn synchronize(&self, batch: Vec<MutationIntent<T>>) -> Result<SyncReport> {
        BulkSynchronizer::synchronize(self, batch).await
    }
}
