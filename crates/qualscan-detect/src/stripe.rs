//! Stripe / banding detector
//!
//! Periodic interference concentrates energy in a single spectral bin of
//! the frame's axis projections. Score is the worse peak-to-mean ratio of
//! the two axes; deep level additionally scans frame halves so localized
//! banding cannot hide behind a clean global spectrum.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::spectrum::stripe_peak_ratios;

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "stripe",
    display_name: "Stripe interference",
    issue_type: IssueType::Stripe,
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 30,
    suppresses: &["noise"],
};

pub struct StripeDetector;

impl StripeDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for StripeDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        let gray = frame.to_gray();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let (row_ratio, col_ratio) = stripe_peak_ratios(gray.data(), w, h)?;
        let mut score = row_ratio.max(col_ratio);

        if cfg.level == DetectionLevel::Deep && w >= 32 && h >= 32 {
            for half in [
                half_plane(gray.data(), w, h, true),
                half_plane(gray.data(), w, h, false),
            ] {
                let (hw, hh, data) = half;
                let (r, c) = stripe_peak_ratios(&data, hw, hh)?;
                score = score.max(r).max(c);
            }
        }

        let threshold = cfg.threshold("max_peak_ratio")?;
        let confidence = boundary_confidence(score, threshold, threshold * 0.4);
        let axis = if col_ratio >= row_ratio { "vertical" } else { "horizontal" };

        let mut finding = if score > threshold {
            Finding {
                detector: DESCRIPTOR.name.to_string(),
                issue_type: IssueType::Stripe,
                sub_issue: None,
                is_abnormal: true,
                score,
                threshold,
                confidence,
                severity: if score > threshold * 2.0 { Severity::Error } else { Severity::Warning },
                explanation: format!(
                    "{} stripes detected: spectral peak ratio {:.1} above maximum {:.1}",
                    axis, score, threshold
                ),
                causes: vec![
                    "power-line interference on analog video".to_string(),
                    "ground loop between camera and recorder".to_string(),
                    "rolling shutter under flickering light".to_string(),
                ],
                suggestions: vec![
                    "route video cables away from power lines".to_string(),
                    "install a ground loop isolator".to_string(),
                    "match shutter frequency to the lighting".to_string(),
                ],
                evidence: Default::default(),
            }
        } else {
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::Stripe,
                score,
                threshold,
                confidence,
                format!("spectral peak ratio {:.1} below maximum {:.1}", score, threshold),
            )
        };
        finding.evidence.insert("row_peak_ratio".to_string(), row_ratio);
        finding.evidence.insert("col_peak_ratio".to_string(), col_ratio);
        Ok(finding)
    }
}

/// Top or bottom half of a plane
fn half_plane(data: &[u8], w: usize, h: usize, top: bool) -> (usize, usize, Vec<u8>) {
    let hh = h / 2;
    let start = if top { 0 } else { hh * w };
    (w, hh, data[start..start + hh * w].to_vec())
}
