//! Contrast detector: luminance spread and percentile dynamic range

use qualscan_core::limits::FAST_LEVEL_MAX_SIDE;
use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::{dynamic_range, luma_stats};

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "contrast",
    display_name: "Low contrast",
    issue_type: IssueType::Contrast,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 60,
    suppresses: &[],
};

pub struct ContrastDetector;

impl ContrastDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for ContrastDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        let working = if cfg.level == DetectionLevel::Fast {
            frame.downsample(FAST_LEVEL_MAX_SIDE)
        } else {
            frame.clone()
        };
        let gray = working.to_gray();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stats = luma_stats(gray.data(), w, h)?;
        let range = dynamic_range(gray.data(), w, h, 0.01, 0.99)?;

        let min_stddev = cfg.threshold("min_stddev")?;
        let min_range = cfg.threshold("min_dynamic_range")?;
        let score = stats.stddev;

        let mut finding = if score < min_stddev || range < min_range {
            Finding {
                detector: DESCRIPTOR.name.to_string(),
                issue_type: IssueType::Contrast,
                sub_issue: Some("low_contrast".to_string()),
                is_abnormal: true,
                score,
                threshold: min_stddev,
                confidence: boundary_confidence(score, min_stddev, min_stddev * 0.5)
                    .max(boundary_confidence(range, min_range, min_range * 0.5)),
                severity: Severity::Warning,
                explanation: format!(
                    "image is flat: luminance stddev {:.1} (min {:.1}), dynamic range {:.0} (min {:.0})",
                    score, min_stddev, range, min_range
                ),
                causes: vec![
                    "fog, haze or a dirty dome".to_string(),
                    "washed-out exposure".to_string(),
                    "incorrect gamma or contrast settings".to_string(),
                ],
                suggestions: vec![
                    "clean the housing and lens".to_string(),
                    "adjust contrast or enable defog mode".to_string(),
                    "verify exposure configuration".to_string(),
                ],
                evidence: Default::default(),
            }
        } else {
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::Contrast,
                score,
                min_stddev,
                boundary_confidence(score, min_stddev, min_stddev * 0.5),
                format!("luminance stddev {:.1} above minimum {:.1}", score, min_stddev),
            )
        };
        finding.evidence.insert("stddev".to_string(), stats.stddev);
        finding.evidence.insert("dynamic_range".to_string(), range);
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualscan_core::profile::{ProfileSet, PROFILE_NORMAL};
    use qualscan_core::synth;
    use std::collections::BTreeMap;

    fn cfg() -> DetectorConfig {
        let set = ProfileSet::builtin();
        DetectorConfig::resolve(
            set.get(PROFILE_NORMAL).unwrap(),
            "contrast",
            &BTreeMap::new(),
            DetectionLevel::Standard,
        )
    }

    #[test]
    fn test_flat_frame_fires() {
        let frame = synth::gray_solid(64, 64, 120);
        let f = ContrastDetector.detect(&frame, &cfg()).unwrap();
        assert!(f.is_abnormal);
        assert_eq!(f.sub_issue.as_deref(), Some("low_contrast"));
    }

    #[test]
    fn test_full_range_normal() {
        let frame = synth::checkerboard(64, 64, 8);
        let f = ContrastDetector.detect(&frame, &cfg()).unwrap();
        assert!(!f.is_abnormal);
        assert!(f.evidence["dynamic_range"] > 150.0);
    }
}
