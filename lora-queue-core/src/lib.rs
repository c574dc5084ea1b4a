pub mod catalog;
pub mod config;
pub mod error;
pub mod expander;
pub mod grid;
pub mod metadata;
pub mod path_guard;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod sink;
mod util;

pub use catalog::{LoraCatalog, ModelEntry, BASE_DIR_TOKEN};
pub use config::{BatchOptions, CatalogConfig, Placement, RowPolicy, SeedMode, TextOverlay};
pub use error::{Error, Result};
pub use expander::{JobExpander, JobSpec};
pub use grid::{GridComposer, GridImage, GridLayout, TextRenderer};
pub use metadata::{MetadataReader, MetadataResolver, ModelMetadata, SafetensorsMetadata};
pub use path_guard::PathGuard;
pub use progress::{progress_label, ProgressReporter, SilentReporter, TracingReporter};
pub use queue::{BatchOutcome, LoraQueue};
pub use runner::{JobResult, JobRunner};
pub use sink::{DiskSink, ImageSink};
pub use util::*;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

fn one() -> usize {
    1
}

// Define the request/response types.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub guidance: Option<f64>,
    /// `None` asks the engine for a random seed.
    pub seed: Option<u64>,
    #[serde(default = "one")]
    pub batch_size: usize,
    #[serde(default = "one")]
    pub n_iter: usize,
    /// Tells the engine not to build a grid of its own.
    #[serde(default)]
    pub do_not_save_grid: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            width: None,
            height: None,
            steps: None,
            guidance: None,
            seed: None,
            batch_size: 1,
            n_iter: 1,
            do_not_save_grid: false,
        }
    }

    /// A copy of this request with every set field of `overrides` applied.
    pub fn with_overrides(&self, overrides: &JobOverrides) -> Self {
        let mut request = self.clone();
        if let Some(prompt) = &overrides.prompt {
            request.prompt = prompt.clone();
        }
        if let Some(seed) = overrides.seed {
            request.seed = Some(seed);
        }
        if let Some(n_iter) = overrides.n_iter {
            request.n_iter = n_iter;
        }
        if let Some(steps) = overrides.steps {
            request.steps = Some(steps);
        }
        if let Some(guidance) = overrides.guidance {
            request.guidance = Some(guidance);
        }
        if let Some(width) = overrides.width {
            request.width = Some(width);
        }
        if let Some(height) = overrides.height {
            request.height = Some(height);
        }
        request
    }

    /// Images one run of this request produces.
    pub fn image_count(&self) -> usize {
        self.batch_size.max(1) * self.n_iter.max(1)
    }
}

/// Fields a job may change on the base request.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct JobOverrides {
    pub prompt: Option<String>,
    pub seed: Option<u64>,
    pub n_iter: Option<usize>,
    pub steps: Option<usize>,
    pub guidance: Option<f64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
}

/// What one engine call produced, in matching order.
#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub images: Vec<DynamicImage>,
    pub prompts: Vec<String>,
    pub infotexts: Vec<String>,
}

/// The image generation engine. Calls are made one at a time.
pub trait ModelLike: Send {
    fn run(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed>;
}
