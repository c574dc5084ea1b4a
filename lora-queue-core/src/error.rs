use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("path is outside the LoRA root: {}", .0.display())]
    PathViolation(PathBuf),

    #[error("cannot read directory {}: {source}", path.display())]
    MissingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad metadata for {}: {reason}", path.display())]
    MetadataParse { path: PathBuf, reason: String },

    #[error("cannot load font {}: {reason}", path.display())]
    FontLoad { path: PathBuf, reason: String },

    #[error("generation failed: {0:#}")]
    Engine(#[source] anyhow::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn metadata(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::MetadataParse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
