//! Temporal detectors over a window of sampled frames
//!
//! Video detectors see the whole sampled window at once as a slice of
//! [`PreviewFrame`]s (decimated copies kept by the video pipeline) and
//! emit a [`VideoFinding`] whose segments are synthesized from flagged
//! adjacent pairs. A finding with no segments means the clip is clean for
//! that issue.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{Frame, QualscanError, Result, Segment, VideoFinding};

use crate::descriptor::DetectorDescriptor;

mod freeze;
mod scene;
mod shake;

pub use freeze::FreezeDetector;
pub use scene::SceneChangeDetector;
pub use shake::ShakeDetector;

/// One sampled frame as the temporal detectors see it
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    /// Index in the source stream, not the sample sequence
    pub frame_index: u64,
    pub timestamp: f64,
    /// Decimated luminance plane
    pub gray: Frame,
    /// Decimated color copy when the source carries color
    pub color: Option<Frame>,
}

/// A pure scoring function over a sampled window
pub trait VideoDetector: Send + Sync {
    fn descriptor(&self) -> &'static DetectorDescriptor;

    fn detect(&self, window: &[PreviewFrame], cfg: &DetectorConfig) -> Result<VideoFinding>;
}

pub type VideoDetectorFactory = fn() -> Result<Box<dyn VideoDetector>>;

/// Registry of temporal detectors, immutable after startup
pub struct VideoDetectorRegistry {
    entries: Vec<(&'static DetectorDescriptor, VideoDetectorFactory)>,
}

impl VideoDetectorRegistry {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&'static DetectorDescriptor, VideoDetectorFactory); 3] = [
            (FreezeDetector::descriptor_static(), FreezeDetector::boxed),
            (SceneChangeDetector::descriptor_static(), SceneChangeDetector::boxed),
            (ShakeDetector::descriptor_static(), ShakeDetector::boxed),
        ];
        for (descriptor, factory) in builtins {
            registry
                .register(descriptor, factory)
                .expect("built-in video detector names are unique");
        }
        registry
    }

    pub fn register(
        &mut self,
        descriptor: &'static DetectorDescriptor,
        factory: VideoDetectorFactory,
    ) -> Result<()> {
        if self.entries.iter().any(|(d, _)| d.name == descriptor.name) {
            return Err(QualscanError::Conflict(format!(
                "video detector {} already registered",
                descriptor.name
            )));
        }
        self.entries.push((descriptor, factory));
        Ok(())
    }

    pub fn list(&self) -> Vec<&'static DetectorDescriptor> {
        let mut out: Vec<_> = self.entries.iter().map(|(d, _)| *d).collect();
        out.sort_by_key(|d| (d.priority, d.name));
        out
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn VideoDetector>> {
        let (_, factory) = self
            .entries
            .iter()
            .find(|(d, _)| d.name == name)
            .ok_or_else(|| QualscanError::UnknownDetector(name.to_string()))?;
        factory().map_err(|e| QualscanError::DetectorConstruction {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Coalesce flagged adjacent pairs into time segments
///
/// `flagged[i]` refers to the pair (window[i], window[i+1]). A run of
/// consecutive flagged pairs becomes one segment spanning from the first
/// frame of the first pair to the second frame of the last pair. Runs
/// shorter than `min_duration` seconds are dropped as noise.
pub fn segments_from_flagged_pairs(
    window: &[PreviewFrame],
    flagged: &[bool],
    min_duration: f64,
) -> Vec<Segment> {
    debug_assert_eq!(flagged.len() + 1, window.len().max(1));
    let mut segments = Vec::new();
    let mut run_start: Option<usize> = None;
    for i in 0..=flagged.len() {
        let on = i < flagged.len() && flagged[i];
        match (run_start, on) {
            (None, true) => run_start = Some(i),
            (Some(start), false) => {
                let seg = Segment {
                    start_time: window[start].timestamp,
                    end_time: window[i].timestamp,
                    start_frame: window[start].frame_index,
                    end_frame: window[i].frame_index,
                };
                if seg.duration() >= min_duration {
                    segments.push(seg);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    segments
}

#[cfg(test)]
pub(crate) fn preview_window(frames: Vec<Frame>, interval: f64) -> Vec<PreviewFrame> {
    frames
        .into_iter()
        .enumerate()
        .map(|(i, gray)| PreviewFrame {
            frame_index: i as u64,
            timestamp: i as f64 * interval,
            gray,
            color: None,
        })
        .collect()
}
