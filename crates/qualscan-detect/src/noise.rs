//! Noise detector: median-filter residual, with a Laplacian sigma blend
//! at deep level

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::{laplacian_noise_sigma, median_residual};

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "noise",
    display_name: "Sensor noise",
    issue_type: IssueType::Noise,
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 80,
    suppresses: &[],
};

pub struct NoiseDetector;

impl NoiseDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for NoiseDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        let gray = frame.to_gray();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let residual = median_residual(gray.data(), w, h)?;
        let threshold = cfg.threshold("max_residual")?;

        let mut score = residual;
        let mut sigma = None;
        if cfg.level == DetectionLevel::Deep {
            let s = laplacian_noise_sigma(gray.data(), w, h)?;
            // residual underestimates structured noise; sigma overestimates
            // on busy texture, so blend rather than trust either alone
            score = 0.6 * residual + 0.4 * s;
            sigma = Some(s);
        }

        let confidence = boundary_confidence(score, threshold, threshold.max(0.5) * 0.5);
        let mut finding = if score > threshold {
            Finding {
                detector: DESCRIPTOR.name.to_string(),
                issue_type: IssueType::Noise,
                sub_issue: None,
                is_abnormal: true,
                score,
                threshold,
                confidence,
                severity: if score > threshold * 2.0 { Severity::Error } else { Severity::Warning },
                explanation: format!(
                    "image is noisy: residual level {:.2} above maximum {:.2}",
                    score, threshold
                ),
                causes: vec![
                    "high sensor gain in low light".to_string(),
                    "electromagnetic interference on the cable".to_string(),
                    "failing sensor".to_string(),
                ],
                suggestions: vec![
                    "add scene lighting to lower the gain".to_string(),
                    "check cable shielding and grounding".to_string(),
                    "enable camera noise reduction".to_string(),
                ],
                evidence: Default::default(),
            }
        } else {
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::Noise,
                score,
                threshold,
                confidence,
                format!("noise residual {:.2} below maximum {:.2}", score, threshold),
            )
        };
        finding.evidence.insert("median_residual".to_string(), residual);
        if let Some(s) = sigma {
            finding.evidence.insert("laplacian_sigma".to_string(), s);
        }
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualscan_core::profile::{ProfileSet, PROFILE_NORMAL};
    use qualscan_core::synth;
    use std::collections::BTreeMap;

    fn cfg(level: DetectionLevel) -> DetectorConfig {
        let set = ProfileSet::builtin();
        DetectorConfig::resolve(set.get(PROFILE_NORMAL).unwrap(), "noise", &BTreeMap::new(), level)
    }

    #[test]
    fn test_noisy_frame_fires() {
        let frame = synth::add_gaussian_noise(&synth::gray_solid(128, 128, 128), 15.0, 1);
        let f = NoiseDetector
            .detect(&frame, &cfg(DetectionLevel::Standard))
            .unwrap();
        assert!(f.is_abnormal);
        assert!(f.score > f.threshold);
    }

    #[test]
    fn test_clean_frame_normal() {
        let frame = synth::gray_gradient(128, 128);
        let f = NoiseDetector
            .detect(&frame, &cfg(DetectionLevel::Standard))
            .unwrap();
        assert!(!f.is_abnormal);
    }

    #[test]
    fn test_deep_level_blends_sigma() {
        let frame = synth::add_gaussian_noise(&synth::gray_solid(128, 128, 128), 15.0, 2);
        let f = NoiseDetector.detect(&frame, &cfg(DetectionLevel::Deep)).unwrap();
        assert!(f.is_abnormal);
        assert!(f.evidence.contains_key("laplacian_sigma"));
    }
}
