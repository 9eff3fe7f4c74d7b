use crate::core::{Document, MirrorError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// The oldest stored shape version any patch chain understands.
pub const OLDEST_KNOWN_PATCH_VERSION: u32 = 1;

/// A function upgrading a document in place by exactly one version.
pub type PatchFn = Arc<dyn Fn(&mut Document) -> Result<()> + Send + Sync>;

/// A single upgrade step from `patched_version` to `patched_version + 1`.
#[derive(Clone)]
pub struct DocumentPatch {
    patched_version: u32,
    description: Option<String>,
    apply: PatchFn,
}

/// The document as read from the store and its fully upgraded form.
///
/// Produced whenever a read applies patches; consumed by write-back.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedDocumentPair {
    pub old_version: Document,
    pub new_version: Document,
}

impl PatchedDocumentPair {
    pub fn new(old_version: Document, new_version: Document) -> Self {
        Self {
            old_version,
            new_version,
        }
    }

    /// True when patching rewrote the identity field.
    pub fn identity_changed(&self) -> bool {
        self.old_version.id() != self.new_version.id()
    }
}

/// Ordered, gap-free sequence of patches for one mirrored type.
#[derive(Clone, Default)]
pub struct PatchChain {
    patches: Vec<DocumentPatch>,
}

// Patch construction and chain validation live in separate files.
include!("patch/step.rs");
include!("patch/chain.rs");
