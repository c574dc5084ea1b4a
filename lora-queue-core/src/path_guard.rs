//! Containment checks against the LoRA root.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// `root` must already be canonical, as produced by [`crate::CatalogConfig::new`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (relative paths against the root) to its canonical form
    /// and returns it only if it is the root or lies beneath it.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        joined
            .canonicalize()
            .ok()
            .filter(|resolved| resolved.starts_with(&self.root))
    }

    pub fn is_allowed(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_some()
    }

    pub fn check(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        self.resolve(path)
            .ok_or_else(|| Error::PathViolation(path.to_path_buf()))
    }
}
