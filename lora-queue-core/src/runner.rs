//! Sequential execution of expanded jobs against the engine.

use image::DynamicImage;
use rand::Rng;
use tracing::info;

use crate::config::SeedMode;
use crate::error::{Error, Result};
use crate::expander::JobSpec;
use crate::progress::ProgressReporter;
use crate::{GenerationRequest, JobOverrides, ModelLike};

/// Exclusive upper bound for a drawn seed, so seeds fall in `[0, 2^32 - 2]`.
const RANDOM_SEED_BOUND: u64 = u32::MAX as u64;

/// Accumulated output of a batch, in job order.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub images: Vec<DynamicImage>,
    pub prompts: Vec<String>,
    pub infotexts: Vec<String>,
    /// Model name of the job that produced each image.
    pub model_names: Vec<String>,
    /// Seed each image was generated with, when known.
    pub seeds: Vec<Option<u64>>,
    /// Seed after the last job ran.
    pub seed: Option<u64>,
    pub completed_jobs: usize,
    pub interrupted: bool,
}

/// The seed the batch starts from. A random seed is fixed up front when
/// the mode needs a reproducible sequence.
pub fn batch_seed(seed: Option<u64>, mode: SeedMode, rng: &mut impl Rng) -> Option<u64> {
    match (seed, mode) {
        (None, SeedMode::Consecutive | SeedMode::Same) => Some(rng.gen_range(0..RANDOM_SEED_BOUND)),
        (seed, _) => seed,
    }
}

pub struct JobRunner<'a> {
    engine: &'a mut dyn ModelLike,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> JobRunner<'a> {
    pub fn new(engine: &'a mut dyn ModelLike, reporter: &'a dyn ProgressReporter) -> Self {
        Self { engine, reporter }
    }

    pub fn run_all(
        &mut self,
        base: &GenerationRequest,
        jobs: &[JobSpec],
        seed_mode: SeedMode,
    ) -> Result<JobResult> {
        self.run_all_with_rng(base, jobs, seed_mode, &mut rand::thread_rng())
    }

    /// Runs every job in order. Engine failures abort the batch; an
    /// interrupt stops it early and keeps what has been produced.
    pub fn run_all_with_rng(
        &mut self,
        base: &GenerationRequest,
        jobs: &[JobSpec],
        seed_mode: SeedMode,
        rng: &mut impl Rng,
    ) -> Result<JobResult> {
        let mut seed = batch_seed(base.seed, seed_mode, rng);
        let job_count: usize = jobs
            .iter()
            .map(|job| job.overrides().n_iter.unwrap_or(base.n_iter).max(1))
            .sum();

        let mut result = JobResult::default();
        let mut job_no = 0;
        self.reporter.on_batch_start(job_count);

        for job in jobs {
            if self.reporter.interrupted() {
                info!(
                    "Batch interrupted after {} of {} jobs",
                    result.completed_jobs,
                    jobs.len()
                );
                result.interrupted = true;
                break;
            }

            let request = base.with_overrides(&JobOverrides {
                seed,
                ..job.overrides()
            });
            self.reporter
                .on_job_start(job_no + 1, job_count, &job.model_name);

            let processed = self.engine.run(&request).map_err(Error::Engine)?;
            let produced = processed.images.len();

            result.images.extend(processed.images);
            result.prompts.extend(processed.prompts);
            result.infotexts.extend(processed.infotexts);
            for offset in 0..produced {
                result.model_names.push(job.model_name.clone());
                result
                    .seeds
                    .push(request.seed.map(|seed| seed.wrapping_add(offset as u64)));
            }

            job_no += request.n_iter.max(1);
            result.completed_jobs += 1;
            self.reporter.on_job_complete(job_no, produced);

            if seed_mode == SeedMode::Consecutive {
                seed = seed.map(|seed| seed.wrapping_add(request.image_count() as u64));
            }
        }

        result.seed = seed;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Processed, SilentReporter};
    use image::RgbaImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one image per `batch_size * n_iter`, sized by call number.
    #[derive(Default)]
    struct RecordingEngine {
        requests: Vec<GenerationRequest>,
        fail_on: Option<usize>,
    }

    impl ModelLike for RecordingEngine {
        fn run(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
            let call = self.requests.len();
            self.requests.push(request.clone());
            if self.fail_on == Some(call) {
                anyhow::bail!("out of memory");
            }

            let count = request.image_count();
            Ok(Processed {
                images: (0..count)
                    .map(|_| DynamicImage::ImageRgba8(RgbaImage::new(call as u32 + 1, 1)))
                    .collect(),
                prompts: vec![request.prompt.clone(); count],
                infotexts: vec![format!("info {}", call); count],
            })
        }
    }

    fn jobs(names: &[&str]) -> Vec<JobSpec> {
        names
            .iter()
            .map(|name| JobSpec {
                prompt: format!("<lora:{}:1>, portrait", name),
                model_name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_results_follow_job_order() {
        let mut engine = RecordingEngine::default();
        let mut base = GenerationRequest::new("portrait");
        base.batch_size = 2;

        let result = JobRunner::new(&mut engine, &SilentReporter)
            .run_all(&base, &jobs(&["a", "b", "c"]), SeedMode::Off)
            .unwrap();

        assert_eq!(result.images.len(), 6);
        assert_eq!(result.prompts[0], "<lora:a:1>, portrait");
        assert_eq!(result.prompts[2], "<lora:b:1>, portrait");
        assert_eq!(result.prompts[5], "<lora:c:1>, portrait");
        assert_eq!(result.infotexts[3], "info 1");
        assert_eq!(result.images[4].width(), 3);
        assert_eq!(result.model_names, vec!["a", "a", "b", "b", "c", "c"]);
        assert_eq!(result.completed_jobs, 3);
        assert!(!result.interrupted);
    }

    #[test]
    fn test_consecutive_seed_advances_by_images_per_job() {
        let mut engine = RecordingEngine::default();
        let mut base = GenerationRequest::new("portrait");
        base.seed = Some(100);
        base.batch_size = 2;
        base.n_iter = 3;

        let result = JobRunner::new(&mut engine, &SilentReporter)
            .run_all(&base, &jobs(&["a", "b", "c"]), SeedMode::Consecutive)
            .unwrap();

        let seeds: Vec<_> = engine.requests.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![Some(100), Some(106), Some(112)]);
        assert_eq!(result.seed, Some(118));
        assert_eq!(result.seeds[0], Some(100));
        assert_eq!(result.seeds[5], Some(105));
        assert_eq!(result.seeds[6], Some(106));
    }

    #[test]
    fn test_same_seed_fixes_a_random_seed_for_every_job() {
        let mut engine = RecordingEngine::default();
        let base = GenerationRequest::new("portrait");
        let mut rng = StdRng::seed_from_u64(42);

        JobRunner::new(&mut engine, &SilentReporter)
            .run_all_with_rng(&base, &jobs(&["a", "b"]), SeedMode::Same, &mut rng)
            .unwrap();

        let first = engine.requests[0].seed.unwrap();
        assert!(first < u32::MAX as u64);
        assert_eq!(engine.requests[1].seed, Some(first));
    }

    #[test]
    fn test_random_seed_stays_random_when_mode_is_off() {
        let mut engine = RecordingEngine::default();
        let base = GenerationRequest::new("portrait");

        let result = JobRunner::new(&mut engine, &SilentReporter)
            .run_all(&base, &jobs(&["a", "b"]), SeedMode::Off)
            .unwrap();

        assert!(engine.requests.iter().all(|r| r.seed.is_none()));
        assert_eq!(result.seed, None);
    }

    #[test]
    fn test_engine_failure_aborts_batch() {
        let mut engine = RecordingEngine {
            fail_on: Some(1),
            ..Default::default()
        };
        let base = GenerationRequest::new("portrait");

        let err = JobRunner::new(&mut engine, &SilentReporter)
            .run_all(&base, &jobs(&["a", "b", "c"]), SeedMode::Off)
            .unwrap_err();

        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(engine.requests.len(), 2);
    }

    struct StopAfter {
        started: AtomicUsize,
        limit: usize,
        totals: AtomicUsize,
    }

    impl ProgressReporter for StopAfter {
        fn on_batch_start(&self, job_count: usize) {
            self.totals.store(job_count, Ordering::SeqCst);
        }

        fn on_job_start(&self, _job_no: usize, _job_count: usize, _model_name: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn interrupted(&self) -> bool {
            self.started.load(Ordering::SeqCst) >= self.limit
        }
    }

    #[test]
    fn test_interrupt_keeps_partial_results() {
        let mut engine = RecordingEngine::default();
        let mut base = GenerationRequest::new("portrait");
        base.n_iter = 2;
        let reporter = StopAfter {
            started: AtomicUsize::new(0),
            limit: 2,
            totals: AtomicUsize::new(0),
        };

        let result = JobRunner::new(&mut engine, &reporter)
            .run_all(&base, &jobs(&["a", "b", "c", "d"]), SeedMode::Off)
            .unwrap();

        assert_eq!(reporter.totals.load(Ordering::SeqCst), 8);
        assert!(result.interrupted);
        assert_eq!(result.completed_jobs, 2);
        assert_eq!(result.images.len(), 4);
    }
}
