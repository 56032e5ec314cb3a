//! Caller-facing option structs with validation
//!
//! These travel from the ops layer into the pipelines, stream workers and
//! scheduler. All fields have conservative defaults; `validate()` enforces
//! the documented ranges before any work starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{QualscanError, Result};
use crate::limits;
use crate::profile::PROFILE_NORMAL;
use crate::types::{DetectionLevel, StreamKind};

/// Options for one image-pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOptions {
    pub profile: String,
    pub level: DetectionLevel,
    pub parallel_detection: bool,
    /// 0 means "derive from the machine" (num_cpus)
    pub max_workers: usize,
    /// Numeric overrides on top of the profile, keyed `detector.key`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_thresholds: BTreeMap<String, f64>,
    /// Restrict to these detector names when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detectors: Option<Vec<String>>,
    /// Soft deadline for the whole pipeline call, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            profile: PROFILE_NORMAL.to_string(),
            level: DetectionLevel::Standard,
            parallel_detection: true,
            max_workers: 0,
            custom_thresholds: BTreeMap::new(),
            detectors: None,
            deadline_ms: None,
        }
    }
}

impl DetectionOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers != 0 {
            limits::validate_worker_count(self.max_workers)?;
        }
        if self.profile.is_empty() {
            return Err(QualscanError::Config("empty profile name".to_string()));
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.max_workers != 0 {
            self.max_workers
        } else {
            num_workers_default()
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

fn num_workers_default() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(limits::MAX_WORKER_THREADS)
}

/// Which decoded frames get fed to detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleStrategy {
    #[default]
    Interval,
    Scene,
    Hybrid,
}

/// Options for video sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOptions {
    pub strategy: SampleStrategy,
    /// Seconds between interval samples
    pub sample_interval: f64,
    pub max_frames: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            strategy: SampleStrategy::Interval,
            sample_interval: 1.0,
            max_frames: 300,
        }
    }
}

impl SampleOptions {
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval < 0.1 {
            return Err(QualscanError::Config(format!(
                "sample_interval {} below minimum 0.1 s",
                self.sample_interval
            )));
        }
        if self.max_frames == 0 {
            return Err(QualscanError::Config("max_frames must be positive".to_string()));
        }
        if self.max_frames > limits::MAX_SAMPLED_FRAMES {
            return Err(QualscanError::Config(format!(
                "max_frames {} exceeds cap {}",
                self.max_frames,
                limits::MAX_SAMPLED_FRAMES
            )));
        }
        Ok(())
    }
}

/// Options for one live-stream worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub kind: StreamKind,
    /// Seconds between frames pushed into the sample ring
    pub sample_interval: f64,
    /// Seconds between detection rounds
    pub detection_interval: f64,
    /// Frames per detection snapshot; above 1 enables the temporal
    /// detectors on the snapshot
    pub snapshot_frames: usize,
    pub grace_seconds: u64,
    pub max_consecutive_errors: u64,
    pub reconnect_backoff_cap_secs: u64,
    pub detection: DetectionOptions,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            kind: StreamKind::Rtsp,
            sample_interval: 1.0,
            detection_interval: 10.0,
            snapshot_frames: 1,
            grace_seconds: 5,
            max_consecutive_errors: 10,
            reconnect_backoff_cap_secs: limits::BACKOFF_CAP_MS / 1000,
            detection: DetectionOptions::default(),
        }
    }
}

impl StreamOptions {
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval < 0.1 {
            return Err(QualscanError::Config(format!(
                "sample_interval {} below minimum 0.1 s",
                self.sample_interval
            )));
        }
        if self.detection_interval < 1.0 {
            return Err(QualscanError::Config(format!(
                "detection_interval {} below minimum 1 s",
                self.detection_interval
            )));
        }
        if self.snapshot_frames == 0 || self.snapshot_frames > limits::SAMPLE_RING_CAPACITY {
            return Err(QualscanError::Config(format!(
                "snapshot_frames {} outside 1..={}",
                self.snapshot_frames,
                limits::SAMPLE_RING_CAPACITY
            )));
        }
        if self.max_consecutive_errors == 0 {
            return Err(QualscanError::Config(
                "max_consecutive_errors must be positive".to_string(),
            ));
        }
        self.detection.validate()
    }
}
