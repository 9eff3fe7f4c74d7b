use super::MirroredType;
use crate::core::{MirrorError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// All mirrored types, resolved once from the startup declaration list.
#[derive(Debug, Clone, Default)]
pub struct MirroredTypeRegistry {
    types: Vec<Arc<MirroredType>>,
    by_name: HashMap<String, usize>,
    by_collection: HashMap<String, usize>,
}

impl MirroredTypeRegistry {
    /// Registers every declaration or none of them.
    ///
    /// Type names and collection names must be unique.
    pub fn new<I>(declarations: I) -> Result<Self>
    where
        I: IntoIterator<Item = MirroredType>,
    {
        let mut registry = Self::default();
        for mirrored_type in declarations {
            let index = registry.types.len();
            if registry
                .by_name
                .insert(mirrored_type.type_name().to_string(), index)
                .is_some()
            {
                return Err(MirrorError::IllegalArgument(format!(
                    "mirrored type '{}' declared twice",
                    mirrored_type.type_name()
                )));
            }
            if let Some(previous) = registry
                .by_collection
                .insert(mirrored_type.collection_name().to_string(), index)
            {
                return Err(MirrorError::IllegalArgument(format!(
                    "collection '{}' is mapped by both '{}' and '{}'",
                    mirrored_type.collection_name(),
                    registry.types[previous].type_name(),
                    mirrored_type.type_name()
                )));
            }
            registry.types.push(Arc::new(mirrored_type));
        }
        Ok(registry)
    }

    pub fn get(&self, type_name: &str) -> Result<Arc<MirroredType>> {
        self.by_name
            .get(type_name)
            .map(|index| self.types[*index].clone())
            .ok_or_else(|| MirrorError::UnknownMirroredType(type_name.to_string()))
    }

    pub fn by_collection(&self, collection_name: &str) -> Option<Arc<MirroredType>> {
        self.by_collection
            .get(collection_name)
            .map(|index| self.types[*index].clone())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MirroredType>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
