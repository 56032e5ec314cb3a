//! Shake detector
//!
//! Block-matching flow magnitude between adjacent samples, evaluated over
//! a sliding window: the clip shakes where at least `min_hits` of the
//! last `window` pairs moved more than `max_flow` pixels. The windowing
//! keeps a single pan or cut from reading as shake.

use std::collections::BTreeMap;

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, IssueType, Result, Severity, VideoFinding};
use qualscan_metrics::flow::{block_flow_magnitude, BLOCK_SIZE, SEARCH_RADIUS};

use crate::descriptor::DetectorDescriptor;
use crate::video::{segments_from_flagged_pairs, PreviewFrame, VideoDetector};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "shake",
    display_name: "Camera shake",
    issue_type: IssueType::Shake,
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 35,
    suppresses: &[],
};

pub struct ShakeDetector;

impl ShakeDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn VideoDetector>> {
        Ok(Box::new(Self))
    }
}

impl VideoDetector for ShakeDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, window: &[PreviewFrame], cfg: &DetectorConfig) -> Result<VideoFinding> {
        let max_flow = cfg.threshold("max_flow")?;
        let win_len = (cfg.threshold("window")? as usize).max(1);
        let min_hits = (cfg.threshold("min_hits")? as usize).max(1);

        let mut magnitudes = Vec::new();
        for pair in window.windows(2) {
            let (a, b) = (&pair[0].gray, &pair[1].gray);
            let mag = block_flow_magnitude(
                a.data(),
                b.data(),
                a.width() as usize,
                a.height() as usize,
                BLOCK_SIZE,
                SEARCH_RADIUS,
            )?;
            magnitudes.push(mag);
        }

        let moving: Vec<bool> = magnitudes.iter().map(|&m| m > max_flow).collect();
        // a pair counts as shaking when it moved and sits in a window
        // with enough other moving pairs
        let mut flagged = vec![false; moving.len()];
        if moving.len() >= win_len {
            for start in 0..=moving.len() - win_len {
                let hits = moving[start..start + win_len].iter().filter(|&&m| m).count();
                if hits >= min_hits {
                    for (i, &m) in moving.iter().enumerate().take(start + win_len).skip(start) {
                        flagged[i] = m;
                    }
                }
            }
        }

        let segments = segments_from_flagged_pairs(window, &flagged, 0.0);
        let mean_flow = if magnitudes.is_empty() {
            0.0
        } else {
            magnitudes.iter().sum::<f64>() / magnitudes.len() as f64
        };
        let peak_flow = magnitudes.iter().cloned().fold(0.0f64, f64::max);

        let mut stats = BTreeMap::new();
        stats.insert("mean_flow".to_string(), mean_flow);
        stats.insert("peak_flow".to_string(), peak_flow);

        Ok(VideoFinding {
            issue_type: IssueType::Shake,
            severity: if segments.is_empty() { Severity::Normal } else { Severity::Warning },
            explanation: if segments.is_empty() {
                "no sustained camera shake".to_string()
            } else {
                format!(
                    "camera shake: mean motion {:.1} px over {} span(s)",
                    mean_flow,
                    segments.len()
                )
            },
            segments,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::preview_window;
    use qualscan_core::profile::{ProfileSet, PROFILE_NORMAL};
    use qualscan_core::synth;
    use qualscan_core::Frame;

    fn cfg() -> DetectorConfig {
        let set = ProfileSet::builtin();
        DetectorConfig::resolve(
            set.get(PROFILE_NORMAL).unwrap(),
            "shake",
            &Default::default(),
            DetectionLevel::Standard,
        )
    }

    fn shifted(frame: &Frame, dx: usize) -> Frame {
        let w = frame.width() as usize;
        let h = frame.height() as usize;
        let src = frame.data();
        let mut out = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let sx = (x + dx) % w;
                out[y * w + x] = src[y * w + sx];
            }
        }
        Frame::gray(frame.width(), frame.height(), out).unwrap()
    }

    #[test]
    fn test_oscillating_frames_flagged() {
        let base = synth::checkerboard(96, 96, 16);
        let moved = shifted(&base, 6);
        let frames: Vec<_> = (0..8)
            .map(|i| if i % 2 == 0 { base.clone() } else { moved.clone() })
            .collect();
        let window = preview_window(frames, 0.5);
        let finding = ShakeDetector.detect(&window, &cfg()).unwrap();
        assert!(!finding.segments.is_empty());
        assert_eq!(finding.severity, Severity::Warning);
        assert!(finding.stats["mean_flow"] > 4.0);
    }

    #[test]
    fn test_static_clip_clean() {
        let base = synth::checkerboard(96, 96, 16);
        let frames: Vec<_> = (0..8).map(|_| base.clone()).collect();
        let window = preview_window(frames, 0.5);
        let finding = ShakeDetector.detect(&window, &cfg()).unwrap();
        assert!(finding.segments.is_empty());
    }

    #[test]
    fn test_isolated_jump_not_shake() {
        // one cut-like displacement in an otherwise static clip
        let base = synth::checkerboard(96, 96, 16);
        let moved = shifted(&base, 6);
        let mut frames: Vec<_> = (0..8).map(|_| base.clone()).collect();
        frames[4] = moved;
        let window = preview_window(frames, 0.5);
        let finding = ShakeDetector.detect(&window, &cfg()).unwrap();
        // two moving pairs (into and out of the jump) stay under min_hits
        assert!(finding.segments.is_empty());
    }
}
