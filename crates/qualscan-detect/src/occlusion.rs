//! Occlusion detector: tile-wise texture survey
//!
//! A covered lens leaves large regions that are both dark and free of
//! local texture. The frame is cut into a grid whose dimensions derive
//! from the frame size; tiles below `min_tile_variance` AND the darkness
//! ceiling count as dead, and the dead fraction is the score. The
//! darkness condition keeps flat-but-bright scenes (sky, white walls,
//! over-exposure) in brightness territory.

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result, Severity};
use qualscan_metrics::tile_stats;

use crate::boundary_confidence;
use crate::descriptor::{Detector, DetectorDescriptor};

static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "occlusion",
    display_name: "Lens occlusion",
    issue_type: IssueType::Occlusion,
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 20,
    suppresses: &["blur", "contrast"],
};

pub struct OcclusionDetector;

impl OcclusionDetector {
    pub fn descriptor_static() -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    pub fn boxed() -> Result<Box<dyn Detector>> {
        Ok(Box::new(Self))
    }
}

/// Tiles brighter than this cannot be a physical occlusion
const DARK_TILE_MAX_LUMA: f64 = 60.0;

/// Tile grid derived from frame size; deep level partitions twice as fine
fn tile_grid(width: usize, height: usize, level: DetectionLevel) -> (usize, usize) {
    let base = if level == DetectionLevel::Deep { 40 } else { 80 };
    let tx = (width / base).clamp(4, 16).min(width);
    let ty = (height / base).clamp(4, 12).min(height);
    (tx, ty)
}

impl Detector for OcclusionDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding> {
        let gray = frame.to_gray();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let (tx, ty) = tile_grid(w, h, cfg.level);
        let min_var = cfg.threshold("min_tile_variance")?;
        let threshold = cfg.threshold("max_dark_tile_ratio")?;

        let tiles = tile_stats(gray.data(), w, h, tx, ty)?;
        let dead = tiles
            .iter()
            .filter(|t| t.variance < min_var && t.mean < DARK_TILE_MAX_LUMA)
            .count();
        let score = dead as f64 / tiles.len() as f64;
        let confidence = boundary_confidence(score, threshold, 0.15);

        let mut finding = if score > threshold {
            Finding {
                detector: DESCRIPTOR.name.to_string(),
                issue_type: IssueType::Occlusion,
                sub_issue: None,
                is_abnormal: true,
                score,
                threshold,
                confidence,
                severity: if score > 0.7 { Severity::Error } else { Severity::Warning },
                explanation: format!(
                    "possible occlusion: {:.0}% of tiles have no texture (max {:.0}%)",
                    score * 100.0,
                    threshold * 100.0
                ),
                causes: vec![
                    "object covering the lens".to_string(),
                    "paint, tape or a sticker on the dome".to_string(),
                    "camera pointed at a wall".to_string(),
                ],
                suggestions: vec![
                    "inspect the camera housing".to_string(),
                    "verify the field of view on site".to_string(),
                ],
                evidence: Default::default(),
            }
        } else {
            Finding::normal(
                DESCRIPTOR.name,
                IssueType::Occlusion,
                score,
                threshold,
                confidence,
                format!(
                    "{:.0}% of tiles without texture, below maximum {:.0}%",
                    score * 100.0,
                    threshold * 100.0
                ),
            )
        };
        finding.evidence.insert("dead_tiles".to_string(), dead as f64);
        finding.evidence.insert("total_tiles".to_string(), tiles.len() as f64);
        finding.evidence.insert("tiles_x".to_string(), tx as f64);
        finding.evidence.insert("tiles_y".to_string(), ty as f64);
        Ok(finding)
    }
}
