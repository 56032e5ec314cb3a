//! Freeze detector
//!
//! A frozen feed replays one frame: adjacent sampled pairs come out
//! structurally identical (SSIM above `min_ssim`) with almost no pixel
//! movement (MAD below `max_mad`). Consecutive frozen pairs shorter than
//! `min_freeze_duration` are treated as stillness, not a freeze.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{IssueType, QualscanError, Result, Severity, VideoFinding};
use qualscan_metrics::{mad, ssim};

use crate::descriptor::DetectorDescriptor;
use crate::video::{segments_from_flagged_pairs, PreviewFrame, VideoDetector};
use qualscan_core::DetectionLevel;

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "freeze",
    display_name: "Frozen picture",
    issue_type: IssueType::Freeze,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 15,
    suppresses: &[],
};

pub struct FreezeDetector;

impl FreezeDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn VideoDetector>> {
        Ok(Box::new(Self))
    }
}

impl VideoDetector for FreezeDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, window: &[PreviewFrame], cfg: &DetectorConfig) -> Result<VideoFinding> {
        let min_ssim = cfg.threshold("min_ssim")?;
        let max_mad = cfg.threshold("max_mad")?;
        let min_duration = cfg.threshold("min_freeze_duration")?;

        let mut flagged = Vec::new();
        let mut min_pair_ssim = 1.0f64;
        for pair in window.windows(2) {
            let (a, b) = (&pair[0].gray, &pair[1].gray);
            if a.width() != b.width() || a.height() != b.height() {
                return Err(QualscanError::Input(format!(
                    "preview dimensions changed mid-window: {}x{} vs {}x{}",
                    a.width(),
                    a.height(),
                    b.width(),
                    b.height()
                )));
            }
            let (w, h) = (a.width() as usize, a.height() as usize);
            let s = ssim(a.data(), b.data(), w, h)?;
            let m = mad(a.data(), b.data(), w, h)?;
            flagged.push(s > min_ssim && m < max_mad);
            min_pair_ssim = min_pair_ssim.min(s);
        }

        let segments = segments_from_flagged_pairs(window, &flagged, min_duration);
        let frozen: f64 = segments.iter().map(|s| s.duration()).sum();
        let span = match (window.first(), window.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(f64::EPSILON),
            _ => f64::EPSILON,
        };

        let severity = if segments.is_empty() {
            Severity::Normal
        } else if frozen / span > 0.5 {
            Severity::Error
        } else {
            Severity::Warning
        };

        let mut stats = std::collections::BTreeMap::new();
        stats.insert(
            "frozen_pairs".to_string(),
            flagged.iter().filter(|&&f| f).count() as f64,
        );
        stats.insert("frozen_seconds".to_string(), frozen);
        stats.insert("min_pair_ssim".to_string(), min_pair_ssim);

        Ok(VideoFinding {
            issue_type: IssueType::Freeze,
            severity,
            explanation: if segments.is_empty() {
                "no frozen spans detected".to_string()
            } else {
                format!(
                    "picture frozen for {:.1} s across {} span(s)",
                    frozen,
                    segments.len()
                )
            },
            segments,
            stats,
        })
    }
}
