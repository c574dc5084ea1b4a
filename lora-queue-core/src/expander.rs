//! Expansion of one request into a job per selected model.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::catalog::LoraCatalog;
use crate::config::Placement;
use crate::metadata::{MetadataReader, MetadataResolver, ModelMetadata};
use crate::{GenerationRequest, JobOverrides};

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub prompt: String,
    /// Empty for the pass-through job.
    pub model_name: String,
}

impl JobSpec {
    pub fn passthrough(request: &GenerationRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            model_name: String::new(),
        }
    }

    pub fn overrides(&self) -> JobOverrides {
        JobOverrides {
            prompt: Some(self.prompt.clone()),
            ..Default::default()
        }
    }
}

/// Places `fragment` before or after `base_prompt`.
pub fn place_fragment(base_prompt: &str, fragment: &str, placement: Placement) -> String {
    if base_prompt.is_empty() {
        return fragment.to_string();
    }

    match placement {
        Placement::Prepend => format!("{}, {}", fragment, base_prompt),
        Placement::Append if base_prompt.ends_with(',') => format!("{} {}", base_prompt, fragment),
        Placement::Append => format!("{}, {}", base_prompt, fragment),
    }
}

pub struct JobExpander<'a, R> {
    catalog: &'a LoraCatalog,
    resolver: &'a MetadataResolver<R>,
}

impl<'a, R: MetadataReader> JobExpander<'a, R> {
    pub fn new(catalog: &'a LoraCatalog, resolver: &'a MetadataResolver<R>) -> Self {
        Self { catalog, resolver }
    }

    /// Jobs in directory order, then file order within each directory.
    /// An empty selection yields the request itself as the only job.
    pub fn expand(
        &self,
        request: &GenerationRequest,
        base: &Path,
        directories: &[String],
        selected: &[String],
        placement: Placement,
    ) -> Vec<JobSpec> {
        if selected.is_empty() {
            return vec![JobSpec::passthrough(request)];
        }

        let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let mut jobs = Vec::new();

        for token in directories {
            let entries = match self.catalog.model_entries(base, token) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("Skipping directory {:?}: {}", token, err);
                    continue;
                }
            };

            for entry in entries {
                if !selected.contains(entry.stem.as_str()) {
                    continue;
                }

                let metadata = self
                    .resolver
                    .resolve(&entry.path, entry.sidecar.as_deref())
                    .unwrap_or_else(|err| {
                        warn!("Using filename for {}: {}", entry.stem, err);
                        ModelMetadata::fallback(&entry.stem)
                    });
                debug!("{} -> {}", entry.stem, metadata.prompt_fragment);

                jobs.push(JobSpec {
                    prompt: place_fragment(&request.prompt, &metadata.prompt_fragment, placement),
                    model_name: metadata.display_name,
                });
            }
        }

        jobs
    }
}
