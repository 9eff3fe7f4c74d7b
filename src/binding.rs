use crate::collection::DocumentCollection;
use crate::convert::Converter;
use crate::mirror::MirroredType;
use std::sync::Arc;

/// Everything needed to move one mirrored type between object and document form.
pub struct MirrorBinding<T> {
    pub mirrored_type: Arc<MirroredType>,
    pub collection: Arc<dyn DocumentCollection>,
    pub converter: Arc<dyn Converter<T>>,
}

impl<T> Clone for MirrorBinding<T> {
    fn clone(&self) -> Self {
        Self {
            mirrored_type: self.mirrored_type.clone(),
            collection: self.collection.clone(),
            converter: self.converter.clone(),
        }
    }
}

impl<T> MirrorBinding<T> {
    pub fn new(
        mirrored_type: Arc<MirroredType>,
        collection: Arc<dyn DocumentCollection>,
        converter: Arc<dyn Converter<T>>,
    ) -> Self {
        Self {
            mirrored_type,
            collection,
            converter,
        }
    }

    pub fn type_name(&self) -> &str {
        self.mirrored_type.type_name()
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }
}
