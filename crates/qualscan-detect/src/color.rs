//! Color detector: channel cast, desaturation, blue/green dominance
//!
//! Three independent triggers, most severe first:
//! - cast ratio: strongest channel mean over the mean of the other two
//! - channel dominance: blue or green carrying an outsized share of total
//!   energy (classic failing-sensor tints)
//! - saturation collapse on a frame that should carry color
//!
//! Grayscale input yields a normal finding; there is nothing to assess.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, PixelFormat, Result, Severity};
use qualscan_metrics::histogram::{channel_means, saturation_mean};

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "color",
    display_name: "Color anomaly",
    issue_type: IssueType::ColorCast,
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 70,
    suppresses: &[],
};

pub struct ColorDetector;

impl ColorDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

const CHANNEL_NAMES: [&str; 3] = ["blue", "green", "red"];

impl Detector for ColorDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        if frame.format() != PixelFormat::Bgr {
            return Ok(Finding::normal(
                DESCRIPTOR.name,
                IssueType::ColorCast,
                0.0,
                0.0,
                1.0,
                "grayscale input, color analysis not applicable",
            ));
        }

        let means = channel_means(frame)?;
        let saturation = saturation_mean(frame)?;
        let max_cast = cfg.threshold("max_cast_ratio")?;
        let min_sat = cfg.threshold("min_saturation")?;
        let max_dom = cfg.threshold("max_channel_dominance")?;

        let (strongest, strongest_mean) = means
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f64::MIN), |acc, (i, m)| if m > acc.1 { (i, m) } else { acc });
        let others = (means[0] + means[1] + means[2] - strongest_mean) / 2.0;
        let cast_ratio = strongest_mean / others.max(1.0);
        let total: f64 = means.iter().sum::<f64>().max(1.0);
        let dominance = strongest_mean / total;

        let mut finding = if cast_ratio > max_cast {
            abnormal(
                "color_cast",
                cast_ratio,
                max_cast,
                boundary_confidence(cast_ratio, max_cast, 0.25),
                format!(
                    "{} cast: strongest channel mean is {:.2}x the others (max {:.2})",
                    CHANNEL_NAMES[strongest], cast_ratio, max_cast
                ),
                vec![
                    "white balance misconfigured".to_string(),
                    "failing image sensor or ISP".to_string(),
                    "tinted light source in the scene".to_string(),
                ],
                vec![
                    "re-run automatic white balance".to_string(),
                    "compare against a reference camera".to_string(),
                ],
            )
        } else if (strongest == 0 || strongest == 1) && dominance > max_dom {
            abnormal(
                if strongest == 0 { "blue_dominance" } else { "green_dominance" },
                dominance,
                max_dom,
                boundary_confidence(dominance, max_dom, 0.1),
                format!(
                    "{} channel carries {:.0}% of signal energy (max {:.0}%)",
                    CHANNEL_NAMES[strongest],
                    dominance * 100.0,
                    max_dom * 100.0
                ),
                vec![
                    "video matrix or cable fault".to_string(),
                    "sensor color channel failure".to_string(),
                ],
                vec![
                    "check cabling and connectors".to_string(),
                    "power-cycle the encoder".to_string(),
                ],
            )
        } else if saturation < min_sat {
            abnormal(
                "low_saturation",
                saturation,
                min_sat,
                boundary_confidence(saturation, min_sat, min_sat.max(0.01)),
                format!(
                    "color saturation {:.3} below minimum {:.3}",
                    saturation, min_sat
                ),
                vec![
                    "camera dropped to black-and-white mode".to_string(),
                    "chroma loss in transport".to_string(),
                ],
                vec![
                    "verify day/night switching".to_string(),
                    "check the video signal path".to_string(),
                ],
            )
        } else {
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::ColorCast,
                cast_ratio,
                max_cast,
                boundary_confidence(cast_ratio, max_cast, 0.25),
                format!("channel balance ratio {:.2} within limits", cast_ratio),
            )
        };
        finding.evidence.insert("mean_blue".to_string(), means[0]);
        finding.evidence.insert("mean_green".to_string(), means[1]);
        finding.evidence.insert("mean_red".to_string(), means[2]);
        finding.evidence.insert("saturation".to_string(), saturation);
        finding.evidence.insert("cast_ratio".to_string(), cast_ratio);
        Ok(finding)
    }
}

#[allow(clippy::too_many_arguments)]
fn abnormal(
    sub_issue: &str,
    score: f64,
    threshold: f64,
    confidence: f64,
    explanation: String,
    causes: Vec<String>,
    suggestions: Vec<String>,
) -> Finding {
    Finding {
        detector: DESCRIPTOR.name.to_string(),
        issue_type: IssueType::ColorCast,
        sub_issue: Some(sub_issue.to_string()),
        is_abnormal: true,
        score,
        threshold,
        confidence,
        severity: Severity::Warning,
        explanation,
        causes,
        suggestions,
        evidence: Default::default(),
    }
}
