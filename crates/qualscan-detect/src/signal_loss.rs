//! Signal-loss detector
//!
//! A dead input shows up as a nearly uniform frame: black (no signal),
//! white (saturated input) or a solid color (test card, blue screen).
//! Uniformity alone is not enough; the mean must also match one of those
//! patterns, so a uniform mid-gray wall does not trip it.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, PixelFormat, Result, Severity};
use qualscan_metrics::histogram::saturation_mean;
use qualscan_metrics::luma_stats;

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "signal_loss",
    display_name: "Signal loss",
    issue_type: IssueType::SignalLoss,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 10,
    suppresses: &["blur", "brightness", "contrast", "color", "noise", "occlusion", "stripe"],
};

/// Mean luminance at or below this is a black screen
const BLACK_MEAN_MAX: f64 = 35.0;

/// Mean luminance at or above this is a white screen
const WHITE_MEAN_MIN: f64 = 252.0;

/// Mean saturation above this on a uniform frame is a solid color
const SOLID_SATURATION_MIN: f64 = 0.5;

pub struct SignalLossDetector;

impl SignalLossDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for SignalLossDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        let gray = frame.to_gray();
        let stats = luma_stats(gray.data(), gray.width() as usize, gray.height() as usize)?;
        // spread over half the 8-bit range maps to uniformity 0
        let uniformity = (1.0 - stats.stddev / 128.0).clamp(0.0, 1.0);
        let threshold = cfg.threshold("min_uniformity")?;
        let saturation = if frame.format() == PixelFormat::Bgr {
            saturation_mean(frame)?
        } else {
            0.0
        };

        let pattern = if uniformity > threshold {
            if stats.mean <= BLACK_MEAN_MAX {
                Some(("black_screen", "input shows a black screen"))
            } else if stats.mean >= WHITE_MEAN_MIN {
                Some(("white_screen", "input shows a saturated white screen"))
            } else if saturation >= SOLID_SATURATION_MIN {
                Some(("solid_color", "input shows a uniform solid color"))
            } else {
                None
            }
        } else {
            None
        };

        let confidence = boundary_confidence(uniformity, threshold, 0.01);
        let mut finding = match pattern {
            Some((sub_issue, what)) => Finding {
                detector: DESCRIPTOR.name.to_string(),
                issue_type: IssueType::SignalLoss,
                sub_issue: Some(sub_issue.to_string()),
                is_abnormal: true,
                score: uniformity,
                threshold,
                confidence,
                severity: Severity::Error,
                explanation: format!(
                    "probable signal loss: {} (uniformity {:.3}, mean {:.0})",
                    what, uniformity, stats.mean
                ),
                causes: vec![
                    "video cable disconnected or damaged".to_string(),
                    "camera power failure".to_string(),
                    "encoder channel outputting a test pattern".to_string(),
                ],
                suggestions: vec![
                    "check the video cable and connectors".to_string(),
                    "verify camera power supply".to_string(),
                    "restart the encoder channel".to_string(),
                ],
                evidence: Default::default(),
            },
            None => Finding::normal(
                DESCRIPTOR.name,
                IssueType::SignalLoss,
                uniformity,
                threshold,
                confidence,
                format!("uniformity {:.3} shows live scene content", uniformity),
            ),
        };
        finding.evidence.insert("uniformity".to_string(), uniformity);
        finding.evidence.insert("mean".to_string(), stats.mean);
        finding.evidence.insert("saturation".to_string(), saturation);
        Ok(finding)
    }
}
