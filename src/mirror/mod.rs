//! Mirrored type descriptors and document version bookkeeping.

mod registry;

pub use registry::MirroredTypeRegistry;

use crate::core::{Document, ID_FIELD, MirrorError, Result};
use crate::patch::{DocumentPatch, PatchChain, PatchedDocumentPair};
use serde_json::Value;

/// Separator inside composite identities such as `"A1^2024^7"`.
pub const COMPOSITE_ID_DELIMITER: char = '^';

/// Where the routing value of a document is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    field: String,
}

impl RoutingKey {
    /// Routes on the document identity.
    pub fn identity() -> Self {
        Self {
            field: ID_FIELD.to_string(),
        }
    }

    /// Routes on an explicit document field.
    pub fn on_field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_identity(&self) -> bool {
        self.field == ID_FIELD
    }

    /// Extracts the routing value.
    ///
    /// Composite string identities route on their leading segment only.
    pub fn extract(&self, document: &Document) -> Option<Value> {
        let raw = document.get(&self.field).filter(|value| !value.is_null())?;
        if self.is_identity() {
            if let Value::String(text) = raw {
                if let Some((head, _)) = text.split_once(COMPOSITE_ID_DELIMITER) {
                    return Some(Value::String(head.to_string()));
                }
            }
        }
        Some(raw.clone())
    }
}

/// A domain type kept consistent between the object store and the document store.
///
/// Built once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct MirroredType {
    type_name: String,
    collection_name: String,
    identity_property: String,
    routing: RoutingKey,
    patch_chain: PatchChain,
    load_documents_routed: bool,
    write_back_patched_documents: bool,
    exclude_from_initial_load: bool,
    keep_persistent_on_remove: bool,
}

/// Builder for [`MirroredType`].
#[derive(Debug)]
pub struct MirroredTypeBuilder {
    type_name: String,
    collection_name: String,
    identity_property: String,
    routing_property: Option<String>,
    patches: Vec<DocumentPatch>,
    load_documents_routed: bool,
    write_back_patched_documents: bool,
    exclude_from_initial_load: bool,
    keep_persistent_on_remove: bool,
}

impl MirroredTypeBuilder {
    /// Object property holding the identity. Stored as `_id`. Defaults to `"id"`.
    pub fn identity_property(mut self, property: impl Into<String>) -> Self {
        self.identity_property = property.into();
        self
    }

    /// Explicit routing property. Takes priority over the identity.
    pub fn routing_property(mut self, property: impl Into<String>) -> Self {
        self.routing_property = Some(property.into());
        self
    }

    pub fn patch(mut self, patch: DocumentPatch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn patches<I>(mut self, patches: I) -> Self
    where
        I: IntoIterator<Item = DocumentPatch>,
    {
        self.patches.extend(patches);
        self
    }

    pub fn load_documents_routed(mut self, enabled: bool) -> Self {
        self.load_documents_routed = enabled;
        self
    }

    pub fn write_back_patched_documents(mut self, enabled: bool) -> Self {
        self.write_back_patched_documents = enabled;
        self
    }

    pub fn exclude_from_initial_load(mut self, enabled: bool) -> Self {
        self.exclude_from_initial_load = enabled;
        self
    }

    pub fn keep_persistent_on_remove(mut self, enabled: bool) -> Self {
        self.keep_persistent_on_remove = enabled;
        self
    }

    /// Validates the patch chain and produces the descriptor.
    pub fn build(self) -> Result<MirroredType> {
        if self.type_name.trim().is_empty() {
            return Err(MirrorError::IllegalArgument(
                "mirrored type name must not be empty".to_string(),
            ));
        }
        if self.collection_name.trim().is_empty() {
            return Err(MirrorError::IllegalArgument(format!(
                "collection name of '{}' must not be empty",
                self.type_name
            )));
        }

        let patch_chain = PatchChain::new(self.patches).map_err(|err| match err {
            MirrorError::InvalidPatchChain(message) => {
                MirrorError::InvalidPatchChain(format!("{}: {}", self.type_name, message))
            }
            other => other,
        })?;

        let routing = match self.routing_property {
            Some(property) if property != self.identity_property => RoutingKey::on_field(property),
            _ => RoutingKey::identity(),
        };

        Ok(MirroredType {
            type_name: self.type_name,
            collection_name: self.collection_name,
            identity_property: self.identity_property,
            routing,
            patch_chain,
            load_documents_routed: self.load_documents_routed,
            write_back_patched_documents: self.write_back_patched_documents,
            exclude_from_initial_load: self.exclude_from_initial_load,
            keep_persistent_on_remove: self.keep_persistent_on_remove,
        })
    }
}

impl MirroredType {
    pub fn builder(
        type_name: impl Into<String>,
        collection_name: impl Into<String>,
    ) -> MirroredTypeBuilder {
        MirroredTypeBuilder {
            type_name: type_name.into(),
            collection_name: collection_name.into(),
            identity_property: "id".to_string(),
            routing_property: None,
            patches: Vec::new(),
            load_documents_routed: false,
            write_back_patched_documents: true,
            exclude_from_initial_load: false,
            keep_persistent_on_remove: false,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn identity_property(&self) -> &str {
        &self.identity_property
    }

    pub fn routing(&self) -> &RoutingKey {
        &self.routing
    }

    pub fn patch_chain(&self) -> &PatchChain {
        &self.patch_chain
    }

    pub fn load_documents_routed(&self) -> bool {
        self.load_documents_routed
    }

    pub fn write_back_patched_documents(&self) -> bool {
        self.write_back_patched_documents
    }

    pub fn exclude_from_initial_load(&self) -> bool {
        self.exclude_from_initial_load
    }

    pub fn keep_persistent_on_remove(&self) -> bool {
        self.keep_persistent_on_remove
    }

    pub fn oldest_known_patch_version(&self) -> u32 {
        self.patch_chain.oldest_known_version()
    }

    pub fn current_version(&self) -> u32 {
        self.patch_chain.current_version()
    }

    pub fn get_patch(&self, version: u32) -> Option<&DocumentPatch> {
        self.patch_chain.get_patch(version)
    }

    pub fn document_version(&self, document: &Document) -> i64 {
        document.format_version()
    }

    /// True iff the document is older than the current version.
    ///
    /// Fails when the stored version is outside the known range.
    pub fn requires_patching(&self, document: &Document) -> Result<bool> {
        let version = self.checked_version(document)?;
        Ok(version < self.current_version())
    }

    /// Applies the single patch for the document's version and bumps the version.
    pub fn patch_to_next_version(&self, document: &mut Document) -> Result<()> {
        if self.patch_chain.is_empty() {
            return Err(MirrorError::IllegalState(format!(
                "'{}' has no patches but patching was requested",
                self.type_name
            )));
        }

        let version = self.checked_version(document)?;
        let patch = self.get_patch(version).ok_or_else(|| {
            MirrorError::IllegalState(format!(
                "'{}' has no patch for version {}",
                self.type_name, version
            ))
        })?;

        patch.apply(document)?;
        document.set_format_version(version + 1);
        Ok(())
    }

    /// Upgrades the document to the current version. No-op on current documents.
    pub fn patch(&self, mut document: Document) -> Result<Document> {
        while self.requires_patching(&document)? {
            self.patch_to_next_version(&mut document)?;
        }
        Ok(document)
    }

    /// Upgrades the document, returning the pair when any patch was applied.
    pub fn patch_with_pair(
        &self,
        document: Document,
    ) -> Result<(Document, Option<PatchedDocumentPair>)> {
        if !self.requires_patching(&document)? {
            return Ok((document, None));
        }
        let patched = self.patch(document.clone())?;
        let pair = PatchedDocumentPair::new(document, patched.clone());
        Ok((patched, Some(pair)))
    }

    fn checked_version(&self, document: &Document) -> Result<u32> {
        let version = self.document_version(document);
        let oldest = self.oldest_known_patch_version();
        let current = self.current_version();
        if version < oldest as i64 || version > current as i64 {
            return Err(MirrorError::UnknownDocumentVersion {
                type_name: self.type_name.clone(),
                version,
                oldest,
                current,
            });
        }
        Ok(version as u32)
    }
}
