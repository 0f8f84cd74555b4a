//! # Storage Configuration
//!
//! Storage settings accumulated on the builder and applied during the Configure
//! phase, strictly before the contract registry is frozen: storage-backed
//! features get a chance to see and extend the registration set while it is
//! still open.

use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::registry::ComponentRegistry;

/// Resolved storage settings, registered into the scope for any process that
/// needs a durable root (document stores, dead-letter folders).
#[derive(Debug, Clone, Default)]
pub struct StorageAccount {
    document_root: Option<PathBuf>,
}

impl StorageAccount {
    pub fn document_root(&self) -> Option<&Path> {
        self.document_root.as_deref()
    }
}

/// Configuration-time accumulator for storage settings.
#[derive(Debug, Default)]
pub struct StorageModule {
    document_root: Option<PathBuf>,
}

impl StorageModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root folder for document-style storage.
    pub fn document_root(&mut self, root: impl AsRef<Path>) -> &mut Self {
        self.document_root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Applies the accumulated settings to the registration set.
    pub fn configure(self, registry: &mut ComponentRegistry) -> Result<(), EngineError> {
        registry.register_instance(StorageAccount {
            document_root: self.document_root,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_root_is_resolvable_from_the_scope() {
        let mut module = StorageModule::new();
        module.document_root("/tmp/docs");

        let mut registry = ComponentRegistry::new();
        module.configure(&mut registry).unwrap();

        let account = registry.snapshot().resolve::<StorageAccount>().unwrap();
        assert_eq!(account.document_root(), Some(Path::new("/tmp/docs")));
    }
}
