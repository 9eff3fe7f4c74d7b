//! Applies batches of object-store mutations to the document store.

mod handler;
mod writer;

pub use handler::{ExceptionPolicy, SyncExceptionHandler};
pub use writer::BulkSynchronizer;

use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Write port the host store drains its mutation log into.
#[async_trait]
pub trait Synchronizer<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn synchronize(&self, batch: Vec<MutationIntent<T>>) -> Result<SyncReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Insert,
    Update,
    Remove,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// One change from the object store's log, tagged with its mirrored type.
#[derive(Debug, Clone)]
pub struct MutationIntent<T> {
    pub kind: MutationKind,
    pub type_name: String,
    pub object: T,
    /// Version of the object in the object store.
    pub version: Option<u64>,
    /// Set by the object store when it wrote the object while reloading it.
    pub reload_marker: Option<u64>,
}

impl<T> MutationIntent<T> {
    pub fn new(kind: MutationKind, type_name: impl Into<String>, object: T) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            object,
            version: None,
            reload_marker: None,
        }
    }

    pub fn insert(type_name: impl Into<String>, object: T) -> Self {
        Self::new(MutationKind::Insert, type_name, object)
    }

    pub fn update(type_name: impl Into<String>, object: T) -> Self {
        Self::new(MutationKind::Update, type_name, object)
    }

    pub fn remove(type_name: impl Into<String>, object: T) -> Self {
        Self::new(MutationKind::Remove, type_name, object)
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_reload_marker(mut self, marker: u64) -> Self {
        self.reload_marker = Some(marker);
        self
    }

    /// True when the object store is replaying data it just loaded.
    ///
    /// Such writes carry a reload marker equal to their own version and must
    /// not be persisted again.
    pub fn is_reload_echo(&self) -> bool {
        matches!(
            (self.kind, self.version, self.reload_marker),
            (MutationKind::Insert | MutationKind::Update, Some(version), Some(marker)) if version == marker
        )
    }
}

/// What one synchronization batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub insert_batches: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped_reloaded: usize,
    pub skipped_keep_persistent: usize,
    pub failed_operations: usize,
}
