// Video pipeline tests: freeze scenario, sampling floor/bound, partial
// verdicts on decoder failure.

use super::*;
use crate::source::MemorySource;
use qualscan_core::profile::ProfileStore;
use qualscan_core::synth;
use qualscan_core::Frame;
use qualscan_detect::DetectorRegistry;

// ============================================================================
// Fixtures
// ============================================================================

fn video_pipeline() -> VideoPipeline {
    let image = Arc::new(
        ImagePipeline::new(
            Arc::new(DetectorRegistry::with_builtins()),
            Arc::new(ProfileStore::default()),
            2,
        )
        .unwrap(),
    );
    VideoPipeline::new(image, Arc::new(VideoDetectorRegistry::with_builtins()))
}

fn detection() -> DetectionOptions {
    DetectionOptions::default()
}

fn sampling(interval: f64, max_frames: usize) -> SampleOptions {
    SampleOptions {
        strategy: qualscan_core::config::SampleStrategy::Interval,
        sample_interval: interval,
        max_frames,
    }
}

/// Clean textured frame displaced horizontally by `dx` pixels
fn shifted(base: &Frame, dx: usize) -> Frame {
    let w = base.width() as usize;
    let h = base.height() as usize;
    let src = base.data();
    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = src[y * w + (x + dx) % w];
        }
    }
    Frame::gray(base.width(), base.height(), out).unwrap()
}

// ============================================================================
// Freeze segment
// ============================================================================

#[test]
fn test_freeze_segment_scenario() {
    // 10 s clip at 1 fps, identical frames from t=2 to t=5, gentle
    // motion elsewhere
    let base = synth::checkerboard(96, 96, 16);
    let frames: Vec<Frame> = (0..10u64)
        .map(|i| {
            if (2..=5).contains(&i) {
                base.clone()
            } else {
                shifted(&base, 1 + (i as usize % 2))
            }
        })
        .collect();
    let source = MemorySource::new(frames, 1.0).unwrap();

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 300))
        .unwrap();

    let freeze = verdict
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::Freeze)
        .expect("freeze issue present");
    assert_eq!(freeze.segments.len(), 1);
    assert_eq!(freeze.segments[0].start_time, 2.0);
    assert_eq!(freeze.segments[0].end_time, 5.0);
    assert_eq!(freeze.abnormal_duration, 3.0);

    assert!(verdict.is_abnormal);
    assert!((verdict.overall_score - (1.0 - 3.0 / 10.0)).abs() < 1e-9);
    assert_eq!(verdict.metadata.sampled_frames, 10);
    assert!(verdict.error_note.is_none());
}

// ============================================================================
// Sampling properties
// ============================================================================

#[test]
fn test_sampled_frames_bounded_by_max() {
    let frames: Vec<Frame> = (0..100)
        .map(|i| synth::gray_solid(32, 32, (i % 250) as u8))
        .collect();
    let source = MemorySource::new(frames, 10.0).unwrap();

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(0.1, 7))
        .unwrap();

    assert!(verdict.metadata.sampled_frames <= 7);
}

#[test]
fn test_short_source_samples_first_and_last() {
    // 3 frames at 1 fps with a 60 s sample interval: only frame 0 hits
    // the stride, so the pipeline forces the final frame
    let frames: Vec<Frame> = (0..3)
        .map(|i| synth::gray_solid(32, 32, 100 + i * 10))
        .collect();
    let source = MemorySource::new(frames, 1.0).unwrap();

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(60.0, 10))
        .unwrap();

    assert_eq!(verdict.metadata.sampled_frames, 2);
}

#[test]
fn test_single_frame_source() {
    let source = MemorySource::new(vec![synth::gray_gradient(64, 64)], 25.0).unwrap();
    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 10))
        .unwrap();
    assert_eq!(verdict.metadata.sampled_frames, 1);
}

// ============================================================================
// Failure semantics
// ============================================================================

#[test]
fn test_decoder_error_yields_partial_verdict() {
    let frames: Vec<Frame> = (0..10)
        .map(|_| synth::gray_gradient(64, 64))
        .collect();
    let source = MemorySource::new(frames, 1.0).unwrap().failing_at(5);

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 100))
        .unwrap();

    assert_eq!(verdict.metadata.sampled_frames, 5);
    assert!(verdict.error_note.is_some());
    assert!(verdict.severity >= Severity::Warning);
}

#[test]
fn test_failure_before_first_frame_surfaces() {
    let frames = vec![synth::gray_solid(16, 16, 0); 3];
    let source = MemorySource::new(frames, 1.0).unwrap().failing_at(0);

    let err = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 10))
        .unwrap_err();
    assert!(matches!(err, QualscanError::SourceUnavailable(_)));
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_image_issue_segments_merge_across_frames() {
    // dark frames from t=3 to t=7 trigger under_bright on each sample;
    // adjacent hits merge into one brightness segment
    let frames: Vec<Frame> = (0..10u64)
        .map(|i| {
            if (3..=7).contains(&i) {
                synth::add_gaussian_noise(&synth::gray_solid(96, 96, 20), 3.0, i)
            } else {
                synth::add_gaussian_noise(&synth::gray_solid(96, 96, 128), 3.0, i)
            }
        })
        .collect();
    let source = MemorySource::new(frames, 1.0).unwrap();

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 100))
        .unwrap();

    let brightness = verdict
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::Brightness)
        .expect("brightness issue aggregated");
    assert_eq!(brightness.segments.len(), 1);
    assert_eq!(brightness.segments[0].start_time, 3.0);
    assert_eq!(brightness.segments[0].end_time, 7.0);
    assert!(verdict.overall_score < 1.0);
}

#[test]
fn test_segments_monotonic_within_issue() {
    // two separated dark spans
    let frames: Vec<Frame> = (0..12u64)
        .map(|i| {
            let dark = (2..=3).contains(&i) || (8..=9).contains(&i);
            let level = if dark { 15 } else { 128 };
            synth::add_gaussian_noise(&synth::gray_solid(96, 96, level), 3.0, i)
        })
        .collect();
    let source = MemorySource::new(frames, 1.0).unwrap();

    let verdict = video_pipeline()
        .run(Box::new(source), &detection(), &sampling(1.0, 100))
        .unwrap();

    for issue in &verdict.issues {
        for pair in issue.segments.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }
}
