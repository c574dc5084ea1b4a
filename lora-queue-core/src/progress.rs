use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Trait for reporting batch progress.
///
/// Called between engine invocations; `interrupted` is polled before each
/// job and stops the batch when it returns true.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_batch_start(&self, _job_count: usize) {}
    fn on_job_start(&self, _job_no: usize, _job_count: usize, _model_name: &str) {}
    fn on_job_complete(&self, _job_no: usize, _images: usize) {}
    fn interrupted(&self) -> bool {
        false
    }
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Human readable position, e.g. `"3 out of 12"`.
pub fn progress_label(job_no: usize, job_count: usize) -> String {
    format!("{} out of {}", job_no, job_count)
}

/// Logs progress through tracing and carries an interrupt flag another
/// thread can raise.
#[derive(Debug, Default)]
pub struct TracingReporter {
    interrupt: AtomicBool,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }
}

impl ProgressReporter for TracingReporter {
    fn on_batch_start(&self, job_count: usize) {
        info!("Starting batch of {} jobs", job_count);
    }

    fn on_job_start(&self, job_no: usize, job_count: usize, model_name: &str) {
        info!("Job {} ({})", progress_label(job_no, job_count), model_name);
    }

    fn on_job_complete(&self, job_no: usize, images: usize) {
        info!("Job {} produced {} images", job_no, images);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}
