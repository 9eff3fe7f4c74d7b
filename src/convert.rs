//! Object ⇄ document marshalling seam.

use crate::collection::DocumentQuery;
use crate::core::{Document, FORMAT_VERSION_FIELD, ID_FIELD, MirrorError, Result};
use crate::mirror::MirroredType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Converts between typed objects and stored documents.
pub trait Converter<T>: Send + Sync {
    fn to_document(&self, object: &T) -> Result<Document>;

    fn from_document(&self, document: &Document) -> Result<T>;

    /// Converts a loose value (an identity passed by a caller, say) to its stored form.
    fn to_document_value(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    /// Builds a query from a template object; null fields match anything.
    fn to_query(&self, template: &T) -> Result<DocumentQuery> {
        let document = self.to_document(template)?;
        Ok(DocumentQuery::from_template(&document))
    }
}

/// Serde-backed converter.
///
/// The identity property is stored as `_id`; every other property keeps its name.
pub struct JsonConverter<T> {
    identity_property: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    pub fn new(identity_property: impl Into<String>) -> Self {
        Self {
            identity_property: identity_property.into(),
            _marker: PhantomData,
        }
    }

    pub fn for_type(mirrored_type: &MirroredType) -> Self {
        Self::new(mirrored_type.identity_property())
    }

    pub fn identity_property(&self) -> &str {
        &self.identity_property
    }
}

impl<T> Converter<T> for JsonConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_document(&self, object: &T) -> Result<Document> {
        let value = serde_json::to_value(object)
            .map_err(|err| MirrorError::ConversionFailed(err.to_string()))?;
        let mut document = Document::from_json(value)?;
        if self.identity_property != ID_FIELD {
            if let Some(id) = document.remove(&self.identity_property) {
                document.set_id(id);
            }
        }
        Ok(document)
    }

    fn from_document(&self, document: &Document) -> Result<T> {
        let mut fields = document.fields().clone();
        fields.remove(FORMAT_VERSION_FIELD);
        if self.identity_property != ID_FIELD {
            if let Some(id) = fields.remove(ID_FIELD) {
                fields.insert(self.identity_property.clone(), id);
            }
        }
        serde_json::from_value(Value::Object(fields)).map_err(|err| {
            MirrorError::ConversionFailed(format!("document {:?}: {}", document.id(), err))
        })
    }
}
