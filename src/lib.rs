// ============================================================================
// docmirror Library
// ============================================================================
//
// Keeps an in-memory object store and a persistent document store
// consistent while the shape of stored documents evolves:
//
// - `patch` / `mirror`: versioned, gap-free patch chains per mirrored type
// - `loader`: concurrent load, patch, convert and partition filtering
// - `merge`: bounded fan-in of independent document streams
// - `sync`: bulk write-through of object-store mutations

pub mod binding;
pub mod collection;
pub mod config;
pub mod convert;
pub mod core;
pub mod loader;
pub mod merge;
pub mod mirror;
pub mod mirror_store;
pub mod partition;
pub mod patch;
pub mod sync;

// Re-export main types for convenience
pub use binding::MirrorBinding;
pub use collection::{DocumentCollection, DocumentQuery, DocumentStream, InMemoryDocumentCollection};
pub use config::{LoadConfig, MirrorConfig, SyncConfig};
pub use convert::{Converter, JsonConverter};
pub use crate::core::{Document, FORMAT_VERSION_FIELD, ID_FIELD, MirrorError, Result};
pub use loader::{
    DocumentLoader, LazyLoad, LoadReport, LoadStream, LoadedDocument, LoadedObjects, Loader,
};
pub use merge::{MergedStream, ParallelMerge};
pub use mirror::{MirroredType, MirroredTypeBuilder, MirroredTypeRegistry, RoutingKey};
pub use mirror_store::{DocumentMirror, DocumentMirrorBuilder};
pub use partition::{ClusterPartition, DocumentPartition, PartitionFilter};
pub use patch::{DocumentPatch, OLDEST_KNOWN_PATCH_VERSION, PatchChain, PatchedDocumentPair};
pub use sync::{
    BulkSynchronizer, ExceptionPolicy, MutationIntent, MutationKind, SyncExceptionHandler,
    SyncReport, Synchronizer,
};
