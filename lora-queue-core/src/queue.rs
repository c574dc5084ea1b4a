//! One batch from request to combined result.

use std::path::PathBuf;

use image::DynamicImage;
use tracing::{info, warn};

use crate::catalog::LoraCatalog;
use crate::config::{BatchOptions, CatalogConfig};
use crate::error::Result;
use crate::expander::{JobExpander, JobSpec};
use crate::grid::{GridComposer, TextRenderer};
use crate::metadata::{MetadataReader, MetadataResolver, SafetensorsMetadata};
use crate::progress::ProgressReporter;
use crate::runner::{JobResult, JobRunner};
use crate::sink::ImageSink;
use crate::{GenerationRequest, ModelLike};

/// Combined result of a batch. When a grid was composed it comes first,
/// paired with an empty prompt and the batch summary as its info text.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub images: Vec<DynamicImage>,
    pub prompts: Vec<String>,
    pub infotexts: Vec<String>,
    pub seed: Option<u64>,
    /// Info text of the grid if there is one, else of the first image.
    pub info: String,
    pub grid_rows: Option<usize>,
    pub saved: Vec<PathBuf>,
    pub interrupted: bool,
}

pub struct LoraQueue<R = SafetensorsMetadata> {
    catalog: LoraCatalog,
    resolver: MetadataResolver<R>,
}

impl LoraQueue<SafetensorsMetadata> {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::with_reader(config, SafetensorsMetadata)
    }
}

impl<R: MetadataReader> LoraQueue<R> {
    pub fn with_reader(config: &CatalogConfig, reader: R) -> Self {
        Self {
            catalog: LoraCatalog::new(config),
            resolver: MetadataResolver::with_reader(config, reader),
        }
    }

    pub fn catalog(&self) -> &LoraCatalog {
        &self.catalog
    }

    pub fn directory_choices(&self, base_dir: Option<&str>) -> Vec<String> {
        self.catalog
            .directory_choices(&self.catalog.base_path(base_dir))
    }

    /// Model choices in `directories`, or in every directory when it is empty.
    pub fn model_choices(&self, base_dir: Option<&str>, directories: &[String]) -> Vec<String> {
        let base = self.catalog.base_path(base_dir);
        let directories = self.catalog.select_all(&base, directories);
        self.catalog.model_choices(&base, &directories)
    }

    /// Directories and model stems a batch will use, with empty directory
    /// lists and omitted models widened to every choice.
    pub fn selection(&self, options: &BatchOptions) -> (Vec<String>, Vec<String>) {
        let base = self.catalog.base_path(options.base_dir.as_deref());
        let directories = self.catalog.select_all(&base, &options.directories);
        let models = match &options.models {
            Some(models) => models.clone(),
            None => self.catalog.model_choices(&base, &directories),
        };
        (directories, models)
    }

    pub fn expand(&self, request: &GenerationRequest, options: &BatchOptions) -> Vec<JobSpec> {
        let (directories, models) = self.selection(options);
        self.expand_selection(request, options, &directories, &models)
    }

    fn expand_selection(
        &self,
        request: &GenerationRequest,
        options: &BatchOptions,
        directories: &[String],
        models: &[String],
    ) -> Vec<JobSpec> {
        let base = self.catalog.base_path(options.base_dir.as_deref());
        JobExpander::new(&self.catalog, &self.resolver).expand(
            request,
            &base,
            directories,
            models,
            options.placement,
        )
    }

    /// Expands, runs, saves and composes one batch. Only engine failures
    /// are returned as errors.
    pub fn run<T: TextRenderer>(
        &self,
        request: &GenerationRequest,
        options: &BatchOptions,
        engine: &mut dyn ModelLike,
        renderer: &T,
        mut sink: Option<&mut dyn ImageSink>,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchOutcome> {
        let mut base = request.clone();
        base.do_not_save_grid = !options.save_grid;

        let (directories, models) = self.selection(options);
        let jobs = self.expand_selection(&base, options, &directories, &models);
        info!(
            "Expanded request into {} jobs ({} placement, seed mode {})",
            jobs.len(),
            options.placement,
            options.seed_mode
        );

        let JobResult {
            mut images,
            mut prompts,
            mut infotexts,
            model_names,
            seeds,
            seed,
            interrupted,
            ..
        } = JobRunner::new(engine, reporter).run_all(&base, &jobs, options.seed_mode)?;

        let mut saved = Vec::new();
        if let Some(sink) = sink.as_deref_mut() {
            for ((image, name), seed) in images.iter().zip(&model_names).zip(&seeds) {
                saved.extend(save_or_warn(sink, image, name, *seed));
            }
        }

        let mut info = infotexts.first().cloned().unwrap_or_default();
        let mut grid_rows = None;

        let wants_grid = options.save_grid && !models.is_empty();
        if wants_grid {
            let composer = GridComposer::new(renderer, self.catalog.guard());
            if let Some(grid) =
                composer.compose(&images, &model_names, options.rows, &options.overlay)
            {
                info = format!("{}\n{}", base.prompt, models.join("\n"));
                if let Some(sink) = sink.as_deref_mut() {
                    let grid_seed = seeds.first().copied().flatten();
                    saved.extend(save_or_warn(sink, &grid.image, "grid", grid_seed));
                }

                grid_rows = Some(grid.layout.rows);
                images.insert(0, grid.image);
                prompts.insert(0, String::new());
                infotexts.insert(0, info.clone());
            }
        }

        Ok(BatchOutcome {
            images,
            prompts,
            infotexts,
            seed,
            info,
            grid_rows,
            saved,
            interrupted,
        })
    }
}

fn save_or_warn(
    sink: &mut dyn ImageSink,
    image: &DynamicImage,
    tag: &str,
    seed: Option<u64>,
) -> Option<PathBuf> {
    let tag = if tag.is_empty() { "image" } else { tag };
    sink.save(image, tag, seed)
        .map_err(|err| warn!("Could not save {} image: {}", tag, err))
        .ok()
}
