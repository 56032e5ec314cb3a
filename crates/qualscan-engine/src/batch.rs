//! Batch execution over file collections
//!
//! Enumerates inputs under a root by glob pattern, feeds each through
//! the image or video pipeline, and tallies per-item outcomes into the
//! enclosing execution record. Per-item errors are absorbed into the
//! error count; only setup problems (bad pattern, unreadable root) fail
//! the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use walkdir::WalkDir;

use qualscan_core::config::{DetectionOptions, SampleOptions};
use qualscan_core::task::{Execution, Task, TaskType};
use qualscan_core::{ImageVerdict, QualscanError, Result};

use crate::pipeline::ImagePipeline;
use crate::scheduler::TaskRunner;
use crate::source::{load_image_path, FrameSource, ImageSequenceSource};
use crate::video::VideoPipeline;

/// Frame rate assumed for image-sequence directories run as video tasks
const SEQUENCE_FPS: f64 = 1.0;

/// Enumerate files under `root` whose names match `pattern`
pub fn enumerate_inputs(root: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(QualscanError::NotFound(format!(
            "input path not found: {}",
            root.display()
        )));
    }
    let matcher: GlobMatcher = Glob::new(pattern)
        .map_err(|e| QualscanError::Config(format!("bad glob {:?}: {}", pattern, e)))?
        .compile_matcher();
    let depth = if recursive { usize::MAX } else { 1 };
    let mut out: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| matcher.is_match(e.file_name()))
        .map(|e| e.into_path())
        .collect();
    out.sort();
    Ok(out)
}

/// One input's outcome inside a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ImageVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchSummary {
    pub total: u64,
    pub normal: u64,
    pub abnormal: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

/// Run the image pipeline over a list of files
pub fn diagnose_image_batch(
    image: &ImagePipeline,
    inputs: &[PathBuf],
    opts: &DetectionOptions,
) -> BatchReport {
    let mut items = Vec::with_capacity(inputs.len());
    let mut summary = BatchSummary {
        total: inputs.len() as u64,
        ..Default::default()
    };
    for path in inputs {
        match load_image_path(path).and_then(|frame| image.run(Arc::new(frame), opts)) {
            Ok(verdict) => {
                if verdict.is_abnormal {
                    summary.abnormal += 1;
                } else {
                    summary.normal += 1;
                }
                items.push(BatchItem {
                    input: path.display().to_string(),
                    verdict: Some(verdict),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(input = %path.display(), error = %e, "batch item failed");
                summary.errors += 1;
                items.push(BatchItem {
                    input: path.display().to_string(),
                    verdict: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    BatchReport { items, summary }
}

/// Exit code for a finished batch: 0 clean, 4 all failed, 5 partial
pub fn batch_exit_code(summary: &BatchSummary) -> i32 {
    if summary.total == 0 {
        3
    } else if summary.errors == 0 {
        0
    } else if summary.errors == summary.total {
        4
    } else {
        5
    }
}

/// Exit code for a single-operation failure
pub fn error_exit_code(error: &QualscanError) -> i32 {
    match error {
        QualscanError::NotFound(_) | QualscanError::EmptySource(_) => 3,
        QualscanError::Config(_) | QualscanError::Input(_) | QualscanError::UnknownDetector(_) => 2,
        _ => 1,
    }
}

/// The production task runner: executes scheduler tasks against the
/// real pipelines
pub struct BatchRunner {
    image: Arc<ImagePipeline>,
    video: Arc<VideoPipeline>,
}

impl BatchRunner {
    pub fn new(image: Arc<ImagePipeline>, video: Arc<VideoPipeline>) -> Self {
        Self { image, video }
    }

    fn run_image_task(
        &self,
        task: &Task,
        execution: &mut Execution,
        inputs: Vec<PathBuf>,
        opts: &DetectionOptions,
    ) {
        let report = diagnose_image_batch(&self.image, &inputs, opts);
        execution.items_processed = report.summary.normal + report.summary.abnormal;
        execution.normal_count = report.summary.normal;
        execution.abnormal_count = report.summary.abnormal;
        execution.error_count = report.summary.errors;
        if let Some(path) = write_report(task, execution, &report) {
            execution.report_path = Some(path);
        }
    }

    fn run_video_task(
        &self,
        execution: &mut Execution,
        inputs: Vec<PathBuf>,
        opts: &DetectionOptions,
        sampling: &SampleOptions,
    ) {
        for path in inputs {
            let outcome = self
                .open_video(&path)
                .and_then(|source| self.video.run(source, opts, sampling));
            match outcome {
                Ok(verdict) => {
                    execution.items_processed += 1;
                    if verdict.is_abnormal {
                        execution.abnormal_count += 1;
                    } else {
                        execution.normal_count += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(input = %path.display(), error = %e, "video item failed");
                    execution.error_count += 1;
                }
            }
        }
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        if path.is_dir() {
            return Ok(Box::new(ImageSequenceSource::from_dir(path, SEQUENCE_FPS)?));
        }
        Err(QualscanError::UnsupportedFormat(format!(
            "no video decoder for {}; supply an image-sequence directory",
            path.display()
        )))
    }
}

/// Write the JSON report when the task asks for one
fn write_report(task: &Task, execution: &Execution, report: &BatchReport) -> Option<String> {
    let dir = task.output.directory.as_deref()?;
    if !task.output.formats.iter().any(|f| f == "json") && !task.output.formats.is_empty() {
        tracing::warn!(formats = ?task.output.formats, "only json reports are supported");
        return None;
    }
    let dir = Path::new(dir);
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(error = %e, "report directory not writable");
        return None;
    }
    let path = dir.join(format!("{}.json", execution.execution_id));
    match serde_json::to_vec_pretty(report)
        .map_err(QualscanError::from)
        .and_then(|bytes| std::fs::write(&path, bytes).map_err(QualscanError::from))
    {
        Ok(()) => Some(path.display().to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "report not written");
            None
        }
    }
}

impl TaskRunner for BatchRunner {
    fn run(&self, task: &Task, execution: &mut Execution) -> Result<()> {
        let config = &task.config;
        let mut inputs = enumerate_inputs(
            Path::new(&config.input_path),
            &config.pattern,
            config.recursive,
        )?;

        // video tasks accept frame directories as inputs as well
        if task.task_type == TaskType::Video && inputs.is_empty() {
            inputs = vec![PathBuf::from(&config.input_path)];
        }

        if task.task_type == TaskType::SampleImage {
            let rate = config.sample_rate.clamp(0.0, 1.0);
            let keep = ((inputs.len() as f64 * rate).ceil() as usize).min(inputs.len());
            // seeded by execution id so a rerun of the same record is
            // reproducible
            let seed = execution
                .execution_id
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            inputs.shuffle(&mut rng);
            inputs.truncate(keep);
            inputs.sort();
        }

        match task.task_type {
            TaskType::BatchImage | TaskType::SampleImage => {
                self.run_image_task(task, execution, inputs, &config.detection);
            }
            TaskType::Video => {
                self.run_video_task(execution, inputs, &config.detection, &config.sampling);
            }
        }
        Ok(())
    }
}
