//! Blur / focus-loss detector
//!
//! Score is the Laplacian-response variance of a denoised, half-size
//! luminance plane (sensor noise would otherwise read as detail); deep
//! level blends in Sobel and Brenner gradients so motion smear that
//! flattens the Laplacian but leaves directional edges is still caught.
//! Fires when the blended sharpness drops below `min_sharpness`.

use qualscan_core::limits::FAST_LEVEL_MAX_SIDE;
use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::{
    brenner_gradient, denoise_decimate, laplacian_variance, luma_stats, sobel_mean_gradient,
};

use crate::descriptor::{Detector, DetectorDescriptor};
use crate::boundary_confidence;

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "blur",
    display_name: "Blur / focus loss",
    issue_type: IssueType::Blur,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 40,
    suppresses: &["noise"],
};

/// Below this luminance spread a frame carries no texture to focus on;
/// sharpness is undefined and flat-frame causes (exposure, signal loss)
/// own the diagnosis
const MIN_ASSESSABLE_STDDEV: f64 = 10.0;

pub struct BlurDetector;

impl BlurDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

impl Detector for BlurDetector {
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
        if stats.stddev < MIN_ASSESSABLE_STDDEV {
            let mut finding = Finding::normal(
                DESCRIPTOR.name,
                IssueType::Blur,
                0.0,
                cfg.threshold("min_sharpness")?,
                0.0,
                "frame has too little texture to assess focus",
            );
            finding.evidence.insert("stddev".to_string(), stats.stddev);
            return Ok(finding);
        }
        let (plane, w, h) =
            denoise_decimate(gray.data(), gray.width() as usize, gray.height() as usize)?;

        let lap = laplacian_variance(&plane, w, h)?;
        let mut score = lap;
        let mut finding;

        let threshold = cfg.threshold("min_sharpness")?;

        if cfg.level == DetectionLevel::Deep {
            let sobel = sobel_mean_gradient(&plane, w, h)?;
            let brenner = brenner_gradient(&plane, w, h)?;
            // gradients rescaled into Laplacian-variance units
            score = 0.6 * lap + 0.3 * sobel * sobel + 0.1 * brenner;
            finding = build(score, threshold);
            finding.evidence.insert("sobel_mean_gradient".to_string(), sobel);
            finding.evidence.insert("brenner_gradient".to_string(), brenner);
        } else {
            finding = build(score, threshold);
        }
        finding.evidence.insert("laplacian_variance".to_string(), lap);
        Ok(finding)
    }
}

fn build(score: f64, threshold: f64) -> Finding {
    let confidence = boundary_confidence(score, threshold, threshold.max(1.0) * 0.5);
    if score < threshold {
        let ratio = score / threshold.max(f64::EPSILON);
        Finding {
            detector: DESCRIPTOR.name.to_string(),
            issue_type: IssueType::Blur,
            sub_issue: None,
            is_abnormal: true,
            score,
            threshold,
            confidence,
            severity: if ratio < 0.3 { Severity::Error } else { Severity::Warning },
            explanation: format!(
                "image is blurred: sharpness {:.1} below minimum {:.1}",
                score, threshold
            ),
            causes: vec![
                "lens out of focus".to_string(),
                "condensation or grease on the lens".to_string(),
                "camera or subject motion during exposure".to_string(),
            ],
            suggestions: vec![
                "refocus the camera".to_string(),
                "clean the lens surface".to_string(),
                "check the mount for vibration".to_string(),
            ],
            evidence: Default::default(),
        }
    } else {
        Finding::normal(
            DESCRIPTOR.name,
            IssueType::Blur,
            score,
            threshold,
            confidence,
            format!("sharpness {:.1} above minimum {:.1}", score, threshold),
        )
    }
}
