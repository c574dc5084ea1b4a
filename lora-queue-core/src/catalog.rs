//! LoRA catalog
//!
//! Discovers directories holding model files beneath a base directory and
//! lists the models inside a chosen set of them. Every directory is checked
//! against the [`PathGuard`] before it is read.
//!
//! Entries are sorted by file name at every level so that job order does
//! not depend on how the platform enumerates directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::path_guard::PathGuard;

/// Directory token standing for the base directory itself.
pub const BASE_DIR_TOKEN: &str = "/";

/// A model file found during one listing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub path: PathBuf,
    pub stem: String,
    /// Sidecar with the same stem, if present and inside the root.
    pub sidecar: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoraCatalog {
    guard: PathGuard,
    model_extension: String,
    sidecar_extension: String,
}

impl LoraCatalog {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            guard: PathGuard::new(config.root()),
            model_extension: config.model_extension.clone(),
            sidecar_extension: config.sidecar_extension.clone(),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Base directory for an optional custom subdirectory of the root.
    pub fn base_path(&self, base_dir: Option<&str>) -> PathBuf {
        match base_dir.map(str::trim) {
            Some(dir) if !dir.is_empty() => self.guard.root().join(dir.trim_start_matches('/')),
            _ => self.guard.root().to_path_buf(),
        }
    }

    /// Directories under `base` that directly contain a model file, relative
    /// to `base` and joined with `/`. The base itself is never listed.
    pub fn list_directories(&self, base: &Path) -> Vec<String> {
        let mut found = Vec::new();
        let Some(base) = self.guard.resolve(base) else {
            debug!("Base directory {} is not available", base.display());
            return found;
        };

        let mut visited = HashSet::from([base.clone()]);
        let mut pending: Vec<(Vec<String>, PathBuf)> = vec![(Vec::new(), base)];

        while let Some((relative, dir)) = pending.pop() {
            let entries = match sorted_entries(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("{}", err);
                    continue;
                }
            };

            let mut has_model = false;
            let mut children = Vec::new();
            for (name, path) in entries {
                if path.is_dir() {
                    match self.guard.resolve(&path) {
                        Some(resolved) if visited.insert(resolved.clone()) => {
                            let mut child = relative.clone();
                            child.push(name);
                            children.push((child, resolved));
                        }
                        Some(_) => debug!("Already visited {}", path.display()),
                        None => debug!("Skipping {} outside the root", path.display()),
                    }
                } else if self.is_usable_model(&path) {
                    has_model = true;
                }
            }

            if has_model && !relative.is_empty() {
                found.push(relative.join("/"));
            }
            // Reversed so the stack pops children in name order.
            pending.extend(children.into_iter().rev());
        }

        found
    }

    /// Choices offered to a user: the base token followed by every model directory.
    pub fn directory_choices(&self, base: &Path) -> Vec<String> {
        let mut choices = vec![BASE_DIR_TOKEN.to_string()];
        choices.extend(self.list_directories(base));
        choices
    }

    /// The chosen directories, or every choice when nothing is chosen yet.
    pub fn select_all(&self, base: &Path, chosen: &[String]) -> Vec<String> {
        if chosen.is_empty() {
            self.directory_choices(base)
        } else {
            chosen.to_vec()
        }
    }

    /// Model stems in every listed directory, in token order.
    pub fn list_models(&self, base: &Path, directories: &[String]) -> Vec<String> {
        directories
            .iter()
            .flat_map(|token| match self.model_entries(base, token) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("Skipping directory {:?}: {}", token, err);
                    Vec::new()
                }
            })
            .map(|entry| entry.stem)
            .collect()
    }

    /// Like [`Self::list_models`], with each stem listed once.
    pub fn model_choices(&self, base: &Path, directories: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        self.list_models(base, directories)
            .into_iter()
            .filter(|stem| seen.insert(stem.clone()))
            .collect()
    }

    /// Model files directly inside one directory token.
    pub fn model_entries(&self, base: &Path, token: &str) -> Result<Vec<ModelEntry>> {
        let dir = self.guard.check(resolve_token(base, token))?;

        let entries = sorted_entries(&dir)?
            .into_iter()
            .filter(|(_, path)| self.is_usable_model(path))
            .filter_map(|(_, path)| {
                let stem = path.file_stem()?.to_string_lossy().into_owned();
                let sidecar = path.with_extension(&self.sidecar_extension);
                let sidecar = (sidecar.is_file() && self.guard.is_allowed(&sidecar)).then_some(sidecar);
                Some(ModelEntry {
                    path,
                    stem,
                    sidecar,
                })
            })
            .collect();

        Ok(entries)
    }

    fn is_model_file(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.to_string_lossy() == self.model_extension)
    }

    /// A model file that resolves inside the root.
    fn is_usable_model(&self, path: &Path) -> bool {
        path.is_file() && self.is_model_file(path) && self.guard.is_allowed(path)
    }
}

fn resolve_token(base: &Path, token: &str) -> PathBuf {
    let token = token.trim().trim_start_matches('/');
    if token.is_empty() {
        base.to_path_buf()
    } else {
        base.join(token)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let missing = |source| Error::MissingDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(missing)? {
        let entry = entry.map_err(missing)?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"not a real model").unwrap();
    }

    /// root/
    ///   top.safetensors
    ///   anime/
    ///     chars/a.safetensors
    ///     chars/b.safetensors
    ///     chars/b.json
    ///   empty/
    ///   styles/s.safetensors
    ///   styles/notes.txt
    fn catalog() -> (tempfile::TempDir, CatalogConfig, LoraCatalog) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("loras");
        touch(&root.join("top.safetensors"));
        touch(&root.join("anime/chars/a.safetensors"));
        touch(&root.join("anime/chars/b.safetensors"));
        fs::write(root.join("anime/chars/b.json"), "{}").unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        touch(&root.join("styles/s.safetensors"));
        touch(&root.join("styles/notes.txt"));

        let config = CatalogConfig::new(&root).unwrap();
        let catalog = LoraCatalog::new(&config);
        (tmp, config, catalog)
    }

    #[test]
    fn test_list_directories_skips_parents_without_models() {
        let (_tmp, config, catalog) = catalog();
        let dirs = catalog.list_directories(config.root());
        assert_eq!(dirs, vec!["anime/chars", "styles"]);
    }

    #[test]
    fn test_directory_choices_prepend_base_token() {
        let (_tmp, config, catalog) = catalog();
        let choices = catalog.directory_choices(config.root());
        assert_eq!(choices, vec!["/", "anime/chars", "styles"]);
    }

    #[test]
    fn test_missing_base_yields_only_base_token() {
        let (_tmp, config, catalog) = catalog();
        let base = config.root().join("nope");
        assert!(catalog.list_directories(&base).is_empty());
        assert_eq!(catalog.directory_choices(&base), vec!["/"]);
    }

    #[test]
    fn test_base_outside_root_lists_nothing() {
        let (_tmp, config, catalog) = catalog();
        let base = config.root().join("..");
        assert!(catalog.list_directories(&base).is_empty());
        assert!(catalog
            .list_models(&base, &["/".to_string()])
            .is_empty());
    }

    #[test]
    fn test_list_models_in_token_order() {
        let (_tmp, config, catalog) = catalog();
        let dirs = vec![
            "styles".to_string(),
            "/".to_string(),
            "anime/chars".to_string(),
        ];
        let models = catalog.list_models(config.root(), &dirs);
        assert_eq!(models, vec!["s", "top", "a", "b"]);
    }

    #[test]
    fn test_list_models_skips_escaping_tokens() {
        let (_tmp, config, catalog) = catalog();
        let dirs = vec!["../".to_string(), "missing".to_string(), "styles".to_string()];
        assert_eq!(catalog.list_models(config.root(), &dirs), vec!["s"]);
    }

    #[test]
    fn test_model_entries_find_sidecars() {
        let (_tmp, config, catalog) = catalog();
        let entries = catalog.model_entries(config.root(), "anime/chars").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stem, "a");
        assert!(entries[0].sidecar.is_none());
        assert_eq!(entries[1].stem, "b");
        assert!(entries[1].sidecar.as_ref().unwrap().ends_with("b.json"));
    }

    #[test]
    fn test_model_choices_deduplicate() {
        let (_tmp, config, catalog) = catalog();
        touch(&config.root().join("styles/a.safetensors"));
        let dirs = vec!["anime/chars".to_string(), "styles".to_string()];

        assert_eq!(catalog.list_models(config.root(), &dirs), vec!["a", "b", "a", "s"]);
        assert_eq!(catalog.model_choices(config.root(), &dirs), vec!["a", "b", "s"]);
    }

    #[test]
    fn test_custom_base_dir() {
        let (_tmp, config, catalog) = catalog();
        let base = catalog.base_path(Some("anime"));
        assert_eq!(base, config.root().join("anime"));
        assert_eq!(catalog.list_directories(&base), vec!["chars"]);
        assert_eq!(catalog.base_path(Some("  ")), config.root());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_outside_root_are_not_walked() {
        let (tmp, config, catalog) = catalog();
        let outside = tmp.path().join("outside");
        touch(&outside.join("x.safetensors"));
        std::os::unix::fs::symlink(&outside, config.root().join("linked")).unwrap();
        std::os::unix::fs::symlink(config.root(), config.root().join("styles/loop")).unwrap();

        let dirs = catalog.list_directories(config.root());
        assert_eq!(dirs, vec!["anime/chars", "styles"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_with_only_escaping_model_link_is_not_listed() {
        let (tmp, config, catalog) = catalog();
        let secret = tmp.path().join("secret.safetensors");
        touch(&secret);
        fs::create_dir_all(config.root().join("linked")).unwrap();
        std::os::unix::fs::symlink(&secret, config.root().join("linked/secret.safetensors")).unwrap();

        let dirs = catalog.list_directories(config.root());
        assert_eq!(dirs, vec!["anime/chars", "styles"]);
        assert!(catalog.model_entries(config.root(), "linked").unwrap().is_empty());
    }

    #[test]
    fn test_select_all_directories() {
        let (_tmp, config, catalog) = catalog();
        assert_eq!(
            catalog.select_all(config.root(), &[]),
            vec!["/", "anime/chars", "styles"]
        );
        let chosen = vec!["styles".to_string()];
        assert_eq!(catalog.select_all(config.root(), &chosen), chosen);
    }
}
