//! Findings, verdicts and the enums shared across the workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::QualscanError;

/// Severity of a finding or verdict, ordered weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute budget tier gating which detectors and feature blends run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionLevel {
    Fast,
    #[default]
    Standard,
    Deep,
}

impl DetectionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionLevel::Fast => "fast",
            DetectionLevel::Standard => "standard",
            DetectionLevel::Deep => "deep",
        }
    }
}

impl FromStr for DetectionLevel {
    type Err = QualscanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(DetectionLevel::Fast),
            "standard" => Ok(DetectionLevel::Standard),
            "deep" => Ok(DetectionLevel::Deep),
            other => Err(QualscanError::Config(format!(
                "unknown detection level: {}",
                other
            ))),
        }
    }
}

/// Issue category a detector reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Blur,
    Brightness,
    Contrast,
    ColorCast,
    Noise,
    Stripe,
    Occlusion,
    SignalLoss,
    Freeze,
    SceneChange,
    Shake,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::Blur => "blur",
            IssueType::Brightness => "brightness",
            IssueType::Contrast => "contrast",
            IssueType::ColorCast => "color_cast",
            IssueType::Noise => "noise",
            IssueType::Stripe => "stripe",
            IssueType::Occlusion => "occlusion",
            IssueType::SignalLoss => "signal_loss",
            IssueType::Freeze => "freeze",
            IssueType::SceneChange => "scene_change",
            IssueType::Shake => "shake",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one detector on one frame
///
/// Emitted even when the frame is normal so callers can report
/// normal-state scores. `score` stays in the detector's native scale next
/// to the applied `threshold`; `confidence` is the logistic-normalized
/// distance from that boundary in [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub detector: String,
    pub issue_type: IssueType,
    /// Refined kind when the detector distinguishes one (e.g.
    /// `over_bright` vs `under_bright`, `black_screen` vs `solid_color`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_issue: Option<String>,
    pub is_abnormal: bool,
    pub score: f64,
    pub threshold: f64,
    pub confidence: f64,
    pub severity: Severity,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Diagnostic numbers for UI overlays
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, f64>,
}

impl Finding {
    /// A normal-state finding with empty advice
    pub fn normal(
        detector: &str,
        issue_type: IssueType,
        score: f64,
        threshold: f64,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            detector: detector.to_string(),
            issue_type,
            sub_issue: None,
            is_abnormal: false,
            score,
            threshold,
            confidence,
            severity: Severity::Normal,
            explanation: explanation.into(),
            causes: Vec::new(),
            suggestions: Vec::new(),
            evidence: BTreeMap::new(),
        }
    }

    /// Synthetic finding for an absorbed failure or timeout; never
    /// abnormal, never selected as primary issue.
    pub fn synthetic(detector: &str, issue_type: IssueType, explanation: impl Into<String>) -> Self {
        Self {
            detector: detector.to_string(),
            issue_type,
            sub_issue: None,
            is_abnormal: false,
            score: 0.0,
            threshold: 0.0,
            confidence: 0.0,
            severity: Severity::Info,
            explanation: explanation.into(),
            causes: Vec::new(),
            suggestions: Vec::new(),
            evidence: BTreeMap::new(),
        }
    }

    /// Label used for primary-issue selection: the sub-issue when the
    /// detector refined one, the issue type otherwise.
    pub fn primary_label(&self) -> &str {
        self.sub_issue.as_deref().unwrap_or(self.issue_type.as_str())
    }

    /// score / threshold, used as a tie-breaker when priorities and
    /// confidences are equal
    pub fn threshold_ratio(&self) -> f64 {
        if self.threshold.abs() > f64::EPSILON {
            self.score / self.threshold
        } else {
            0.0
        }
    }
}

/// Rollup for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVerdict {
    /// Stable order: descriptor priority ascending, then detector name
    pub findings: Vec<Finding>,
    pub is_abnormal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_issue: Option<String>,
    pub severity: Severity,
    /// Detectors whose findings were silenced by an abnormal suppressor
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub suppressed: BTreeSet<String>,
}

impl ImageVerdict {
    pub fn finding(&self, detector: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.detector == detector)
    }
}

/// Contiguous time span during which a video issue is active
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: f64,
    pub end_time: f64,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// One video detector's output over a window of sampled frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFinding {
    pub issue_type: IssueType,
    pub severity: Severity,
    /// Ordered by start_time, non-overlapping
    pub segments: Vec<Segment>,
    pub explanation: String,
    /// Numeric summary (detector-specific keys)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stats: BTreeMap<String, f64>,
}

/// Per-issue rollup inside a VideoVerdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub segments: Vec<Segment>,
    /// Sum of segment durations in seconds
    pub abnormal_duration: f64,
    pub explanation: String,
}

/// Source-level facts reported with every video verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub total_frames: u64,
    pub sampled_frames: u64,
}

/// Aggregated decision for one video input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoVerdict {
    pub metadata: VideoMetadata,
    pub issues: Vec<VideoIssue>,
    pub is_abnormal: bool,
    pub severity: Severity,
    /// 1 - abnormal_duration/duration over the union of issue segments,
    /// clamped to [0,1]
    pub overall_score: f64,
    /// Set when the run ended early (decoder error, deadline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_note: Option<String>,
}

/// Stream protocol kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Rtsp,
    Rtmp,
}

impl FromStr for StreamKind {
    type Err = QualscanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtsp" => Ok(StreamKind::Rtsp),
            "rtmp" => Ok(StreamKind::Rtmp),
            other => Err(QualscanError::Config(format!(
                "unknown stream type: {}",
                other
            ))),
        }
    }
}

/// Lifecycle state of a stream worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Starting,
    Running,
    /// Connected at least once, currently reconnecting
    Degraded,
    Stopping,
    Stopped,
    Error,
}

/// Reportable snapshot of one live stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_id: String,
    pub url: String,
    pub kind: StreamKind,
    pub sample_interval: f64,
    pub detection_interval: f64,
    pub status: StreamStatus,
    pub frames_received: u64,
    pub frames_detected: u64,
    pub connection_errors: u64,
    pub reconnect_count: u64,
    /// Exponential moving average of decoded frames per second
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_detection_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Normal < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_primary_label_prefers_sub_issue() {
        let mut f = Finding::normal("brightness", IssueType::Brightness, 220.0, 190.0, 0.9, "x");
        assert_eq!(f.primary_label(), "brightness");
        f.sub_issue = Some("over_bright".to_string());
        assert_eq!(f.primary_label(), "over_bright");
    }

    #[test]
    fn test_threshold_ratio_zero_threshold() {
        let f = Finding::synthetic("blur", IssueType::Blur, "timed out");
        assert_eq!(f.threshold_ratio(), 0.0);
    }

    #[test]
    fn test_issue_type_snake_case_serde() {
        let s = serde_json::to_string(&IssueType::SignalLoss).unwrap();
        assert_eq!(s, "\"signal_loss\"");
        let back: IssueType = serde_json::from_str(&s).unwrap();
        assert_eq!(back, IssueType::SignalLoss);
    }

    #[test]
    fn test_segment_duration_clamps() {
        let s = Segment {
            start_time: 5.0,
            end_time: 2.0,
            start_frame: 5,
            end_frame: 2,
        };
        assert_eq!(s.duration(), 0.0);
    }
}
