//! Detector contract and capability descriptors

use qualscan_core::profile::DetectorConfig;
use qualscan_core::{DetectionLevel, Finding, Frame, IssueType, Result};

/// Static capabilities of one detector
///
/// `priority` orders findings and breaks primary-issue ties: lower wins.
/// `suppresses` lists detector names whose findings are silenced when
/// this detector's finding is abnormal.
#[derive(Debug, Clone, Copy)]
pub struct DetectorDescriptor {
    pub name: &'static str,
    pub display_name: &'static str,
    pub issue_type: IssueType,
    pub levels: &'static [DetectionLevel],
    pub priority: u32,
    pub suppresses: &'static [&'static str],
}

impl DetectorDescriptor {
    pub fn supports(&self, level: DetectionLevel) -> bool {
        self.levels.contains(&level)
    }
}

/// A pure scoring function over one frame
///
/// Implementations are CPU-bound, never block, and emit a [`Finding`]
/// even when the frame is normal so callers can report normal-state
/// scores. Errors are absorbed by the pipeline into synthetic findings.
pub trait Detector: Send + Sync {
    fn descriptor(&self) -> &'static DetectorDescriptor;

    fn detect(&self, frame: &Frame, cfg: &DetectorConfig) -> Result<Finding>;
}

#[cfg(test)]
mod tests {
    use super::*;

    static D: DetectorDescriptor = DetectorDescriptor {
        name: "x",
        display_name: "X",
        issue_type: IssueType::Blur,
        levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
        priority: 1,
        suppresses: &[],
    };

    #[test]
    fn test_level_support() {
        assert!(!D.supports(DetectionLevel::Fast));
        assert!(D.supports(DetectionLevel::Standard));
        assert!(D.supports(DetectionLevel::Deep));
    }
}
