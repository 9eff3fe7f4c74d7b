impl std::fmt::Debug for DocumentPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPatch")
            .field("patched_version", &self.patched_version)
            .field("description", &self.description)
            .finish()
    }
}

impl DocumentPatch {
    /// Creates a patch upgrading documents stored at `patched_version`.
    pub fn new<F>(patched_version: u32, apply: F) -> Self
    where
        F: Fn(&mut Document) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            patched_version,
            description: None,
            apply: Arc::new(apply),
        }
    }

    /// Attaches a human readable description, reported in logs.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The version this patch upgrades from.
    pub fn patched_version(&self) -> u32 {
        self.patched_version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Applies the patch body. Does not touch the version field.
    pub fn apply(&self, document: &mut Document) -> Result<()> {
        (self.apply)(document)
    }
}
