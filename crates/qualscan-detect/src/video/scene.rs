//! Scene-change detector
//!
//! A cut shows as a simultaneous jump in the coarse color histogram and
//! the edge-density between adjacent samples. Events are point-in-time
//! (zero-duration segments at the later sample); events closer together
//! than `min_gap` merge into the first one.

use std::collections::BTreeMap;

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, IssueType, Result, Segment, Severity, VideoFinding};
use qualscan_metrics::histogram::{edge_density, gray_histogram, histogram_diff, hsv_histogram};

use crate::descriptor::DetectorDescriptor;
use crate::video::{PreviewFrame, VideoDetector};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "scene_change",
    display_name: "Scene change",
    issue_type: IssueType::SceneChange,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 90,
    suppresses: &[],
};

pub struct SceneChangeDetector;

impl SceneChangeDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn VideoDetector>> {
        Ok(Box::new(Self))
    }
}

/// Histogram of one preview: 3-D HSV when color is available, 32-bin
/// gray otherwise
fn preview_histogram(frame: &PreviewFrame) -> Result<Vec<f64>> {
    match &frame.color {
        Some(color) => hsv_histogram(color, 8, 4, 4),
        None => gray_histogram(frame.gray.data(), 32),
    }
}

impl VideoDetector for SceneChangeDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, window: &[PreviewFrame], cfg: &DetectorConfig) -> Result<VideoFinding> {
        let min_hist_diff = cfg.threshold("min_hist_diff")?;
        let min_edge_jump = cfg.threshold("min_edge_jump")?;
        let min_gap = cfg.threshold("min_gap")?;

        let mut events: Vec<(f64, u64, f64)> = Vec::new(); // (time, frame, diff)
        let mut max_diff = 0.0f64;
        let mut prev_hist: Option<Vec<f64>> = None;
        let mut prev_edges: Option<f64> = None;

        for frame in window {
            let hist = preview_histogram(frame)?;
            let edges = edge_density(
                frame.gray.data(),
                frame.gray.width() as usize,
                frame.gray.height() as usize,
                100.0,
            )?;
            if let (Some(ph), Some(pe)) = (&prev_hist, prev_edges) {
                let diff = histogram_diff(ph, &hist)?;
                let edge_jump = (edges - pe).abs();
                max_diff = max_diff.max(diff);
                if diff > min_hist_diff || edge_jump > min_edge_jump {
                    // merge with the previous event when within min_gap
                    let merged = events
                        .last()
                        .map(|(t, _, _)| frame.timestamp - t < min_gap)
                        .unwrap_or(false);
                    if !merged {
                        events.push((frame.timestamp, frame.frame_index, diff.max(edge_jump)));
                    }
                }
            }
            prev_hist = Some(hist);
            prev_edges = Some(edges);
        }

        let segments: Vec<Segment> = events
            .iter()
            .map(|&(t, idx, _)| Segment {
                start_time: t,
                end_time: t,
                start_frame: idx,
                end_frame: idx,
            })
            .collect();

        let mut stats = BTreeMap::new();
        stats.insert("events".to_string(), events.len() as f64);
        stats.insert("max_hist_diff".to_string(), max_diff);

        Ok(VideoFinding {
            issue_type: IssueType::SceneChange,
            severity: if segments.is_empty() { Severity::Normal } else { Severity::Info },
            explanation: if segments.is_empty() {
                "no scene changes detected".to_string()
            } else {
                format!("{} scene change(s) detected", segments.len())
            },
            segments,
            stats,
        })
    }
}
