use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Process-wide catalog settings, fixed once the root has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    root: PathBuf,
    /// Model file extension, without the leading dot.
    pub model_extension: String,
    /// Sidecar file extension, without the leading dot.
    pub sidecar_extension: String,
    /// Use the file stem as display name instead of the embedded metadata.
    pub prefer_filename: bool,
    /// Embedded metadata key holding the preferred display name.
    pub name_field: String,
}

impl CatalogConfig {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| Error::MissingDirectory {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(Self {
            root,
            model_extension: "safetensors".to_string(),
            sidecar_extension: "json".to_string(),
            prefer_filename: false,
            name_field: "ss_output_name".to_string(),
        })
    }

    pub fn with_prefer_filename(mut self, prefer_filename: bool) -> Self {
        self.prefer_filename = prefer_filename;
        self
    }

    /// Canonical root every path is checked against.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// How the random seed evolves across the jobs of one batch.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Each job keeps the request's seed; a random seed stays random per job.
    #[default]
    Off,
    /// Fix one seed and advance it by `batch_size * n_iter` after every job.
    Consecutive,
    /// Fix one seed and reuse it for every job.
    Same,
}

serde_plain::derive_display_from_serialize!(SeedMode);
serde_plain::derive_fromstr_from_deserialize!(SeedMode);

/// Where a model's fragment goes relative to the base prompt.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    Prepend,
    Append,
}

serde_plain::derive_display_from_serialize!(Placement);
serde_plain::derive_fromstr_from_deserialize!(Placement);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowPolicy {
    #[default]
    Auto,
    Fixed(usize),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TextOverlay {
    pub enabled: bool,
    /// Font file relative to the root; the renderer's default font is used when unset.
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub text_color: [u8; 4],
    pub stroke_color: [u8; 4],
    pub stroke_width: u32,
}

impl Default for TextOverlay {
    fn default() -> Self {
        Self {
            enabled: true,
            font_path: None,
            font_size: 32.0,
            text_color: [255, 255, 255, 255],
            stroke_color: [0, 0, 0, 255],
            stroke_width: 2,
        }
    }
}

/// Everything a user can choose for one batch.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BatchOptions {
    /// Subdirectory of the root to browse; `None` browses the root itself.
    pub base_dir: Option<String>,
    /// Directory tokens relative to the base, `"/"` being the base itself.
    /// Empty selects every directory choice.
    pub directories: Vec<String>,
    /// Selected model stems; `None` selects every model in `directories`.
    /// An empty list runs the request unchanged.
    pub models: Option<Vec<String>>,
    pub seed_mode: SeedMode,
    pub save_grid: bool,
    pub rows: RowPolicy,
    pub overlay: TextOverlay,
    pub placement: Placement,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            directories: Vec::new(),
            models: None,
            seed_mode: SeedMode::default(),
            save_grid: true,
            rows: RowPolicy::default(),
            overlay: TextOverlay::default(),
            placement: Placement::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_options_from_partial_json() {
        let options: BatchOptions = serde_json::from_str(
            r#"{"models": ["styleA"], "seed_mode": "consecutive", "rows": {"fixed": 2}}"#,
        )
        .unwrap();

        assert_eq!(options.models, Some(vec!["styleA".to_string()]));
        assert_eq!(options.seed_mode, SeedMode::Consecutive);
        assert_eq!(options.rows, RowPolicy::Fixed(2));
        assert!(options.directories.is_empty());
        assert!(options.save_grid);
        assert_eq!(options.placement, Placement::Prepend);
    }

    #[test]
    fn test_enum_names_round_trip_through_strings() {
        assert_eq!(SeedMode::Same.to_string(), "same");
        assert_eq!("append".parse::<Placement>().unwrap(), Placement::Append);
        assert!("sideways".parse::<Placement>().is_err());
    }

    #[test]
    fn test_catalog_config_requires_existing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CatalogConfig::new(tmp.path()).unwrap();
        assert_eq!(config.root(), tmp.path().canonicalize().unwrap());
        assert_eq!(config.model_extension, "safetensors");

        assert!(CatalogConfig::new(tmp.path().join("missing")).is_err());
    }
}
