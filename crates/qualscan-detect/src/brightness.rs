//! Brightness detector: mean luminance against a [min, max] band

use qualscan_core::limits::FAST_LEVEL_MAX_SIDE;
use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::luma_stats;

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "brightness",
    display_name: "Brightness anomaly",
    issue_type: IssueType::Brightness,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 50,
    suppresses: &[],
};

pub struct BrightnessDetector;

impl BrightnessDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for BrightnessDetector {
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
        let stats = luma_stats(gray.data(), gray.width() as usize, gray.height() as usize)?;
        let min_mean = cfg.threshold("min_mean")?;
        let max_mean = cfg.threshold("max_mean")?;
        let score = stats.mean;

        let mut finding = if score > max_mean {
            over_under(score, max_mean, "over_bright", format!(
                "image is over-bright: mean luminance {:.1} above maximum {:.1}",
                score, max_mean
            ), vec![
                "over-exposure or backlight".to_string(),
                "iris or gain misconfiguration".to_string(),
                "light source aimed at the lens".to_string(),
            ], vec![
                "lower exposure or gain".to_string(),
                "enable backlight compensation".to_string(),
                "reposition the camera away from light sources".to_string(),
            ])
        } else if score < min_mean {
            over_under(score, min_mean, "under_bright", format!(
                "image is under-bright: mean luminance {:.1} below minimum {:.1}",
                score, min_mean
            ), vec![
                "insufficient scene lighting".to_string(),
                "under-exposure".to_string(),
                "failing IR illuminator at night".to_string(),
            ], vec![
                "raise exposure or gain".to_string(),
                "add or repair lighting".to_string(),
                "verify day/night mode switching".to_string(),
            ])
        } else {
            // confidence from the nearer band edge
            let margin = (score - min_mean).min(max_mean - score);
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::Brightness,
                score,
                max_mean,
                boundary_confidence(margin, 0.0, 25.0),
                format!("mean luminance {:.1} within [{:.0}, {:.0}]", score, min_mean, max_mean),
            )
        };
        finding.evidence.insert("mean".to_string(), stats.mean);
        finding.evidence.insert("stddev".to_string(), stats.stddev);
        Ok(finding)
    }
}

fn over_under(
    score: f64,
    threshold: f64,
    sub_issue: &str,
    explanation: String,
    causes: Vec<String>,
    suggestions: Vec<String>,
) -> Finding {
    Finding {
        detector: DESCRIPTOR.name.to_string(),
        issue_type: IssueType::Brightness,
        sub_issue: Some(sub_issue.to_string()),
        is_abnormal: true,
        score,
        threshold,
        confidence: boundary_confidence(score, threshold, 25.0),
        severity: Severity::Warning,
        explanation,
        causes,
        suggestions,
        evidence: Default::default(),
    }
}
