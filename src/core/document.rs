use super::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved identity field of every stored document.
pub const ID_FIELD: &str = "_id";

/// Reserved field carrying the stored shape version. Absent means version 1.
pub const FORMAT_VERSION_FIELD: &str = "_formatVersion";

/// A generic key/value document as held by the persistent store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from a JSON value. Only objects are accepted.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(MirrorError::IllegalArgument(format!(
                "document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builds an identity-only template, as used for removal by id.
    pub fn with_id(id: Value) -> Self {
        let mut document = Self::new();
        document.set_id(id);
        document
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD).filter(|id| !id.is_null())
    }

    pub fn set_id(&mut self, id: Value) {
        self.fields.insert(ID_FIELD.to_string(), id);
    }

    /// Canonical string form of the identity, usable as a map key.
    pub fn id_key(&self) -> Option<String> {
        self.id().map(id_key_of)
    }

    /// True when the identity is the only field present.
    pub fn is_id_only(&self) -> bool {
        self.fields.len() == 1 && self.id().is_some()
    }

    /// Stored shape version.
    ///
    /// An absent field means version 1. Stores that keep numbers as doubles
    /// write whole versions like `2.0`; those read as the integer. Anything
    /// else non-integral yields 0, which no patch chain accepts.
    pub fn format_version(&self) -> i64 {
        match self.fields.get(FORMAT_VERSION_FIELD) {
            None | Some(Value::Null) => 1,
            Some(Value::Number(number)) => {
                if let Some(version) = number.as_i64() {
                    version
                } else if let Some(version) = number.as_u64() {
                    i64::try_from(version).unwrap_or(0)
                } else {
                    match number.as_f64() {
                        Some(version)
                            if version.fract() == 0.0
                                && version >= i64::MIN as f64
                                && version < i64::MAX as f64 =>
                        {
                            version as i64
                        }
                        _ => 0,
                    }
                }
            }
            Some(_) => 0,
        }
    }

    pub fn set_format_version(&mut self, version: u32) {
        self.fields
            .insert(FORMAT_VERSION_FIELD.to_string(), Value::from(version));
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Document {
    type Error = MirrorError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}

/// Canonical string form of an identity value.
///
/// Uses the JSON rendering so that `"1"` and `1` stay distinct.
pub fn id_key_of(id: &Value) -> String {
    id.to_string()
}
