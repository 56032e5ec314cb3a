//! Application context and in-process operations
//!
//! The outer surfaces (HTTP handlers, CLI) call these methods; nothing
//! in here knows about request parsing or response envelopes.
//! Construction order is fixed: detector registries, then profiles, then
//! pipelines, then the scheduler and stream manager that dispatch into
//! them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use qualscan_core::config::{DetectionOptions, SampleOptions, StreamOptions};
use qualscan_core::profile::{ProfileSet, ProfileStore};
use qualscan_core::task::{Execution, Task};
use qualscan_core::{
    DetectionLevel, ImageVerdict, IssueType, Result, StreamDescriptor, VideoVerdict,
};
use qualscan_detect::video::VideoDetectorRegistry;
use qualscan_detect::{DetectorDescriptor, DetectorRegistry};

use crate::batch::{diagnose_image_batch, BatchReport, BatchRunner};
use crate::pipeline::ImagePipeline;
use crate::scheduler::{Dispatch, Scheduler, SystemClock};
use crate::source::{
    decode_image_bytes, load_image_path, FrameSource, ImageSequenceSource, StreamConnector,
};
use crate::store::{ExecutionStore, TaskStore};
use crate::stream::{StreamManager, StreamResult};
use crate::video::VideoPipeline;

/// Process-level settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root for tasks/, executions/ and profiles.yaml
    pub data_root: PathBuf,
    /// Detection worker threads; 0 derives from the machine
    pub workers: usize,
    pub scheduler_tick: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./qualscan-data"),
            workers: 0,
            scheduler_tick: Duration::from_secs(10),
        }
    }
}

/// Reportable detector capability row
#[derive(Debug, Clone, Serialize)]
pub struct DetectorInfo {
    pub name: String,
    pub display_name: String,
    pub issue_type: IssueType,
    pub levels: Vec<DetectionLevel>,
    pub priority: u32,
    pub suppresses: Vec<String>,
}

impl From<&DetectorDescriptor> for DetectorInfo {
    fn from(d: &DetectorDescriptor) -> Self {
        Self {
            name: d.name.to_string(),
            display_name: d.display_name.to_string(),
            issue_type: d.issue_type,
            levels: d.levels.to_vec(),
            priority: d.priority,
            suppresses: d.suppresses.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct AppContext {
    config: AppConfig,
    registry: Arc<DetectorRegistry>,
    video_registry: Arc<VideoDetectorRegistry>,
    profiles: Arc<ProfileStore>,
    image: Arc<ImagePipeline>,
    video: Arc<VideoPipeline>,
    scheduler: Arc<Scheduler>,
    streams: StreamManager,
}

impl AppContext {
    pub fn init(config: AppConfig, connector: Arc<dyn StreamConnector>) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_root).map_err(|source| {
            qualscan_core::QualscanError::IoAt {
                path: config.data_root.clone(),
                source,
            }
        })?;

        let registry = Arc::new(DetectorRegistry::with_builtins());
        let video_registry = Arc::new(VideoDetectorRegistry::with_builtins());

        let profiles_path = config.data_root.join("profiles.yaml");
        let profile_set = if profiles_path.exists() {
            ProfileSet::load(&profiles_path)?
        } else {
            ProfileSet::builtin()
        };
        let profiles = Arc::new(ProfileStore::new(profile_set));

        let image = Arc::new(ImagePipeline::new(
            Arc::clone(&registry),
            Arc::clone(&profiles),
            config.workers,
        )?);
        let video = Arc::new(VideoPipeline::new(
            Arc::clone(&image),
            Arc::clone(&video_registry),
        ));

        let tasks = Arc::new(TaskStore::open(&config.data_root)?);
        let executions = Arc::new(ExecutionStore::open(&config.data_root)?);
        let runner = Arc::new(BatchRunner::new(Arc::clone(&image), Arc::clone(&video)));
        let scheduler = Scheduler::new(tasks, executions, runner, Arc::new(SystemClock))?;
        scheduler.start(config.scheduler_tick)?;

        let streams = StreamManager::new(connector, Arc::clone(&image), Arc::clone(&video));

        tracing::info!(root = %config.data_root.display(), "application context ready");
        Ok(Arc::new(Self {
            config,
            registry,
            video_registry,
            profiles,
            image,
            video,
            scheduler,
            streams,
        }))
    }

    /// Stop background services; safe to call once at process exit
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.streams.shutdown();
    }

    // ------------------------------------------------------------------
    // Diagnosis
    // ------------------------------------------------------------------

    pub fn diagnose_image_path(&self, path: &Path, opts: &DetectionOptions) -> Result<ImageVerdict> {
        let frame = load_image_path(path)?;
        self.image.run(Arc::new(frame), opts)
    }

    pub fn diagnose_image_bytes(&self, bytes: &[u8], opts: &DetectionOptions) -> Result<ImageVerdict> {
        let frame = decode_image_bytes(bytes)?;
        self.image.run(Arc::new(frame), opts)
    }

    pub fn diagnose_batch(&self, inputs: &[PathBuf], opts: &DetectionOptions) -> BatchReport {
        diagnose_image_batch(&self.image, inputs, opts)
    }

    pub fn diagnose_video(
        &self,
        source: Box<dyn FrameSource>,
        detection: &DetectionOptions,
        sampling: &SampleOptions,
    ) -> Result<VideoVerdict> {
        self.video.run(source, detection, sampling)
    }

    /// Video diagnosis over a directory of frames (the built-in decoded
    /// frame provider)
    pub fn diagnose_video_frames_dir(
        &self,
        dir: &Path,
        fps: f64,
        detection: &DetectionOptions,
        sampling: &SampleOptions,
    ) -> Result<VideoVerdict> {
        let source = ImageSequenceSource::from_dir(dir, fps)?;
        self.video.run(Box::new(source), detection, sampling)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn list_detectors(&self) -> Vec<DetectorInfo> {
        self.registry.list().into_iter().map(DetectorInfo::from).collect()
    }

    pub fn list_video_detectors(&self) -> Vec<DetectorInfo> {
        self.video_registry
            .list()
            .into_iter()
            .map(DetectorInfo::from)
            .collect()
    }

    /// Re-read profiles.yaml and swap the active snapshot atomically
    pub fn reload_profiles(&self) -> Result<()> {
        let path = self.config.data_root.join("profiles.yaml");
        let set = if path.exists() {
            ProfileSet::load(&path)?
        } else {
            ProfileSet::builtin()
        };
        self.profiles.replace(set);
        tracing::info!("profiles reloaded");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    pub fn start_stream(&self, url: &str, opts: StreamOptions) -> Result<StreamDescriptor> {
        self.streams.start(url, opts)
    }

    pub fn stop_stream(&self, stream_id: &str) -> Result<StreamDescriptor> {
        self.streams.stop(stream_id)
    }

    pub fn stream_status(&self, stream_id: &str) -> Result<StreamDescriptor> {
        self.streams.status(stream_id)
    }

    pub fn stream_results(
        &self,
        stream_id: &str,
        limit: usize,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<StreamResult>> {
        self.streams.results(stream_id, limit, since)
    }

    pub fn list_streams(&self) -> Vec<StreamDescriptor> {
        self.streams.list()
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub fn create_task(&self, task: Task) -> Result<Task> {
        self.scheduler.create_task(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.scheduler.get_task(task_id)
    }

    pub fn update_task(&self, task: Task) -> Result<Task> {
        self.scheduler.update_task(task)
    }

    pub fn delete_task(&self, task_id: &str) -> Result<Task> {
        self.scheduler.delete_task(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.scheduler.list_tasks()
    }

    pub fn set_task_enabled(&self, task_id: &str, enabled: bool) -> Result<Task> {
        self.scheduler.set_enabled(task_id, enabled)
    }

    pub fn run_task(&self, task_id: &str) -> Result<Dispatch> {
        self.scheduler.run_now(task_id)
    }

    pub fn list_executions(&self, task_id: Option<&str>, limit: usize) -> Result<Vec<Execution>> {
        self.scheduler.list_executions(task_id, limit)
    }
}
