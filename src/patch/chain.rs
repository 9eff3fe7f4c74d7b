impl std::fmt::Debug for PatchChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchChain")
            .field("versions", &self.versions())
            .field("current_version", &self.current_version())
            .finish()
    }
}

impl PatchChain {
    /// A chain with no patches; documents stay at version 1.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sorts the patches by version and validates the chain.
    ///
    /// Fails on duplicates, on gaps, and when the run does not start at
    /// [`OLDEST_KNOWN_PATCH_VERSION`]. Nothing is built on failure.
    pub fn new(mut patches: Vec<DocumentPatch>) -> Result<Self> {
        patches.sort_by_key(|patch| patch.patched_version);

        let mut seen = HashSet::<u32>::new();
        for patch in &patches {
            if !seen.insert(patch.patched_version) {
                return Err(MirrorError::InvalidPatchChain(format!(
                    "duplicate patch for version {}",
                    patch.patched_version
                )));
            }
        }

        let mut expected = OLDEST_KNOWN_PATCH_VERSION;
        for patch in &patches {
            if patch.patched_version != expected {
                return Err(MirrorError::InvalidPatchChain(format!(
                    "expected patch for version {} but found {}",
                    expected, patch.patched_version
                )));
            }
            expected += 1;
        }

        Ok(Self { patches })
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn patches(&self) -> &[DocumentPatch] {
        &self.patches
    }

    pub fn versions(&self) -> Vec<u32> {
        self.patches.iter().map(|p| p.patched_version).collect()
    }

    pub fn oldest_known_version(&self) -> u32 {
        OLDEST_KNOWN_PATCH_VERSION
    }

    pub fn max_patch_version(&self) -> Option<u32> {
        self.patches.last().map(|p| p.patched_version)
    }

    /// Version every document is upgraded to.
    pub fn current_version(&self) -> u32 {
        match self.max_patch_version() {
            Some(max) => max + 1,
            None => self.oldest_known_version(),
        }
    }

    /// Returns the unique patch upgrading from `version`.
    pub fn get_patch(&self, version: u32) -> Option<&DocumentPatch> {
        let index = version.checked_sub(OLDEST_KNOWN_PATCH_VERSION)? as usize;
        self.patches.get(index)
    }
}
