// Image pipeline tests: end-to-end fixtures, determinism, suppression
// fix-point, failure and deadline absorption.

use super::*;
use qualscan_core::config::DetectionOptions;
use qualscan_core::profile::ProfileStore;
use qualscan_core::synth;
use qualscan_core::{DetectionLevel, IssueType};

// ============================================================================
// Fixtures
// ============================================================================

fn pipeline() -> ImagePipeline {
    ImagePipeline::new(
        Arc::new(DetectorRegistry::with_builtins()),
        Arc::new(ProfileStore::default()),
        2,
    )
    .unwrap()
}

fn opts() -> DetectionOptions {
    DetectionOptions::default()
}

static SLOW: DetectorDescriptor = DetectorDescriptor {
    name: "slow",
    display_name: "Slow",
    issue_type: IssueType::Noise,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 98,
    suppresses: &[],
};

struct SlowDetector;

impl Detector for SlowDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &SLOW
    }

    fn detect(&self, _frame: &Frame, _cfg: &DetectorConfig) -> Result<Finding> {
        std::thread::sleep(std::time::Duration::from_millis(300));
        Ok(Finding::normal(SLOW.name, SLOW.issue_type, 1.0, 0.0, 1.0, "done"))
    }
}

fn slow_boxed() -> Result<Box<dyn Detector>> {
    Ok(Box::new(SlowDetector))
}

static FAILING: DetectorDescriptor = DetectorDescriptor {
    name: "failing",
    display_name: "Failing",
    issue_type: IssueType::Noise,
    levels: &[DetectionLevel::Fast, DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 99,
    suppresses: &[],
};

struct FailingDetector;

impl Detector for FailingDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &FAILING
    }

    fn detect(&self, _frame: &Frame, _cfg: &DetectorConfig) -> Result<Finding> {
        Err(QualscanError::Internal("synthetic detector crash".to_string()))
    }
}

fn failing_boxed() -> Result<Box<dyn Detector>> {
    Ok(Box::new(FailingDetector))
}

// ============================================================================
// End-to-end fixtures
// ============================================================================

#[test]
fn test_blur_wins_over_noise() {
    // gray gradient, blurred sigma=5, noise sigma=10
    let base = synth::gray_gradient(640, 480);
    let frame = synth::add_gaussian_noise(&synth::gaussian_blur(&base, 5.0), 10.0, 42);

    let verdict = pipeline().run(Arc::new(frame), &opts()).unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("blur"));
    assert!(verdict.suppressed.contains("noise"));
    assert!(verdict.finding("noise").is_none(), "suppressed findings are not listed");
    assert!(verdict.finding("blur").unwrap().is_abnormal);
}

#[test]
fn test_over_bright_solid() {
    let frame = synth::bgr_solid(320, 240, [250, 250, 250]);

    let verdict = pipeline().run(Arc::new(frame), &opts()).unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("over_bright"));
    assert_eq!(verdict.severity, qualscan_core::Severity::Warning);
    let brightness = verdict.finding("brightness").unwrap();
    assert_eq!(brightness.sub_issue.as_deref(), Some("over_bright"));
}

#[test]
fn test_signal_loss_dominates_black_frame() {
    let frame = synth::bgr_solid(1920, 1080, [0, 0, 0]);

    let verdict = pipeline().run(Arc::new(frame), &opts()).unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("black_screen"));
    assert_eq!(verdict.severity, qualscan_core::Severity::Error);
    assert!(verdict.suppressed.contains("blur"));
    assert!(verdict.suppressed.contains("brightness"));
    // only the suppressor's finding survives abnormal
    assert_eq!(
        verdict.findings.iter().filter(|f| f.is_abnormal).count(),
        1
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_determinism_repeated_runs() {
    let frame = Arc::new(synth::add_gaussian_noise(
        &synth::gray_gradient(320, 240),
        6.0,
        7,
    ));
    let pipeline = pipeline();
    let a = pipeline.run(Arc::clone(&frame), &opts()).unwrap();
    let b = pipeline.run(Arc::clone(&frame), &opts()).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_findings_ordered_by_priority_then_name() {
    let frame = Arc::new(synth::gray_gradient(320, 240));
    let verdict = pipeline().run(frame, &opts()).unwrap();
    let registry = DetectorRegistry::with_builtins();
    let priorities: Vec<u32> = verdict
        .findings
        .iter()
        .map(|f| registry.descriptor(&f.detector).unwrap().priority)
        .collect();
    let mut sorted = priorities.clone();
    sorted.sort_unstable();
    assert_eq!(priorities, sorted);
}

#[test]
fn test_suppression_fix_point_idempotent() {
    let mut findings: BTreeMap<&'static str, Finding> = BTreeMap::new();
    for name in ["signal_loss", "occlusion", "blur", "noise", "contrast"] {
        let mut f = Finding::normal(name, IssueType::Blur, 0.0, 1.0, 0.9, "x");
        f.is_abnormal = true;
        findings.insert(name, f);
    }
    let registry = DetectorRegistry::with_builtins();
    let graph = registry.suppression_graph();

    let once = apply_suppression(&findings, &graph);
    // signal_loss silences every other abnormal detector, including the
    // chained occlusion -> blur and blur -> noise edges
    assert_eq!(
        once.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["blur", "contrast", "noise", "occlusion"]
    );

    // applying suppression to the surviving set changes nothing
    let survivors: BTreeMap<&'static str, Finding> = findings
        .iter()
        .filter(|(name, _)| !once.contains(**name))
        .map(|(name, f)| (*name, f.clone()))
        .collect();
    assert!(apply_suppression(&survivors, &graph).is_empty());
}

#[test]
fn test_suppressed_suppressor_still_counts_in_fix_point() {
    // occlusion is suppressed by signal_loss but was abnormal at scan
    // start, so its blur edge still applies; blur's noise edge chains
    let mut findings: BTreeMap<&'static str, Finding> = BTreeMap::new();
    for name in ["occlusion", "blur", "noise"] {
        let mut f = Finding::normal(name, IssueType::Blur, 0.0, 1.0, 0.9, "x");
        f.is_abnormal = true;
        findings.insert(name, f);
    }
    let registry = DetectorRegistry::with_builtins();
    let graph = registry.suppression_graph();
    let suppressed = apply_suppression(&findings, &graph);
    assert!(suppressed.contains("blur"));
    assert!(suppressed.contains("noise"));
    assert!(!suppressed.contains("occlusion"));
}

// ============================================================================
// Failure semantics
// ============================================================================

#[test]
fn test_detector_failure_absorbed() {
    let mut registry = DetectorRegistry::with_builtins();
    registry.register(&FAILING, failing_boxed).unwrap();
    let pipeline =
        ImagePipeline::new(Arc::new(registry), Arc::new(ProfileStore::default()), 2).unwrap();

    let verdict = pipeline
        .run(Arc::new(synth::gray_gradient(160, 120)), &opts())
        .unwrap();

    let failing = verdict.finding("failing").unwrap();
    assert!(!failing.is_abnormal);
    assert_eq!(failing.severity, qualscan_core::Severity::Info);
    assert!(failing.explanation.contains("detector failed"));
}

#[test]
fn test_verdict_even_when_every_detector_fails() {
    let mut registry = DetectorRegistry::empty();
    registry.register(&FAILING, failing_boxed).unwrap();
    let pipeline =
        ImagePipeline::new(Arc::new(registry), Arc::new(ProfileStore::default()), 2).unwrap();

    let verdict = pipeline
        .run(Arc::new(synth::gray_solid(32, 32, 100)), &opts())
        .unwrap();

    assert!(!verdict.is_abnormal);
    assert!(verdict.primary_issue.is_none());
    assert_eq!(verdict.severity, qualscan_core::Severity::Normal);
    assert_eq!(verdict.findings.len(), 1);
}

#[test]
fn test_deadline_produces_timeout_findings() {
    let mut registry = DetectorRegistry::empty();
    registry.register(&SLOW, slow_boxed).unwrap();
    registry.register(&FAILING, failing_boxed).unwrap();
    let pipeline =
        ImagePipeline::new(Arc::new(registry), Arc::new(ProfileStore::default()), 2).unwrap();

    let mut options = opts();
    options.deadline_ms = Some(30);
    let verdict = pipeline
        .run(Arc::new(synth::gray_solid(32, 32, 100)), &options)
        .unwrap();

    let slow = verdict.finding("slow").unwrap();
    assert!(!slow.is_abnormal);
    assert_eq!(slow.explanation, "timed out");
    assert_eq!(slow.severity, qualscan_core::Severity::Info);
}

#[test]
fn test_no_timeout_findings_within_budget() {
    let frame = Arc::new(synth::gray_solid(64, 64, 128));
    let mut options = opts();
    options.deadline_ms = Some(60_000);
    let verdict = pipeline().run(frame, &options).unwrap();
    assert!(verdict.findings.iter().all(|f| f.explanation != "timed out"));
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn test_unknown_profile_rejected() {
    let mut options = opts();
    options.profile = "paranoid".to_string();
    let err = pipeline()
        .run(Arc::new(synth::gray_solid(16, 16, 0)), &options)
        .unwrap_err();
    assert!(matches!(err, QualscanError::Config(_)));
}

#[test]
fn test_unknown_allowlist_detector_rejected() {
    let mut options = opts();
    options.detectors = Some(vec!["blur".to_string(), "nope".to_string()]);
    let err = pipeline()
        .run(Arc::new(synth::gray_solid(16, 16, 0)), &options)
        .unwrap_err();
    assert!(matches!(err, QualscanError::UnknownDetector(_)));
}

#[test]
fn test_allowlist_restricts_detectors() {
    let mut options = opts();
    options.detectors = Some(vec!["brightness".to_string()]);
    let verdict = pipeline()
        .run(Arc::new(synth::gray_solid(64, 64, 128)), &options)
        .unwrap();
    assert_eq!(verdict.findings.len(), 1);
    assert_eq!(verdict.findings[0].detector, "brightness");
}

#[test]
fn test_sequential_mode_matches_parallel() {
    let frame = Arc::new(synth::bgr_solid(160, 120, [250, 250, 250]));
    let pipeline = pipeline();
    let parallel = pipeline.run(Arc::clone(&frame), &opts()).unwrap();
    let mut seq_opts = opts();
    seq_opts.parallel_detection = false;
    let sequential = pipeline.run(frame, &seq_opts).unwrap();
    assert_eq!(
        serde_json::to_string(&parallel).unwrap(),
        serde_json::to_string(&sequential).unwrap()
    );
}

#[test]
fn test_fast_level_gates_detector_set() {
    let mut options = opts();
    options.level = DetectionLevel::Fast;
    let verdict = pipeline()
        .run(Arc::new(synth::gray_solid(64, 64, 128)), &options)
        .unwrap();
    let names: Vec<&str> = verdict.findings.iter().map(|f| f.detector.as_str()).collect();
    assert!(names.contains(&"blur"));
    assert!(!names.contains(&"noise"), "noise is not a fast detector");
    assert!(!names.contains(&"stripe"));
}
