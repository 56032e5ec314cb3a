//! Video pipeline: sample, fan out per frame, aggregate over time
//!
//! A decoder thread walks the source through the [`Sampler`] and pushes
//! admitted frames into the bounded buffer; the pipeline thread pops
//! them, runs the image pipeline on each, and keeps a decimated preview
//! per sample. Once the stream ends the temporal detectors run over the
//! preview window and the per-frame image findings are merged into
//! time segments.
//!
//! A decoder error mid-stream degrades the run instead of failing it:
//! whatever was sampled still produces a verdict, flagged with a warning
//! severity floor and an error note. The soft deadline only aborts
//! sampling; processed frames are never discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use qualscan_core::config::{DetectionOptions, SampleOptions};
use qualscan_core::limits::{MAX_FRAME_BYTES, PREVIEW_MAX_SIDE};
use qualscan_core::profile::DetectorConfig;
use qualscan_core::{
    ImageVerdict, IssueType, PixelFormat, QualscanError, Result, Segment, Severity, VideoIssue,
    VideoVerdict,
};
use qualscan_detect::video::{PreviewFrame, VideoDetectorRegistry};

use crate::frame_buffer::{buffer_capacity, frame_buffer, SampledFrame};
use crate::pipeline::ImagePipeline;
use crate::sampler::Sampler;
use crate::source::FrameSource;

/// Memory ceiling for the decode buffer
const BUFFER_MEMORY_CEILING: usize = 512 * 1024 * 1024;

/// One sampled frame after image diagnosis
struct DiagnosedFrame {
    timestamp: f64,
    verdict: ImageVerdict,
    preview: PreviewFrame,
}

pub struct VideoPipeline {
    image: Arc<ImagePipeline>,
    video_registry: Arc<VideoDetectorRegistry>,
}

impl VideoPipeline {
    pub fn new(image: Arc<ImagePipeline>, video_registry: Arc<VideoDetectorRegistry>) -> Self {
        Self {
            image,
            video_registry,
        }
    }

    pub fn video_registry(&self) -> Arc<VideoDetectorRegistry> {
        Arc::clone(&self.video_registry)
    }

    /// Diagnose a whole video source
    pub fn run(
        &self,
        mut source: Box<dyn FrameSource>,
        detection: &DetectionOptions,
        sampling: &SampleOptions,
    ) -> Result<VideoVerdict> {
        detection.validate()?;
        sampling.validate()?;
        let info = source.info();

        // the caller's deadline bounds sampling for the whole video, not
        // each frame
        let deadline = detection.deadline().map(|d| Instant::now() + d);
        let mut frame_opts = detection.clone();
        frame_opts.deadline_ms = None;

        let capacity = buffer_capacity(frame_opts.effective_workers(), BUFFER_MEMORY_CEILING);
        let (producer, consumer) = frame_buffer(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let decode_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let decoder = {
            let mut sampler = Sampler::new(sampling, info.fps);
            let stop = Arc::clone(&stop);
            let decode_error = Arc::clone(&decode_error);
            let fps = if info.fps > 0.0 { info.fps } else { 25.0 };
            std::thread::Builder::new()
                .name("qs-decode".to_string())
                .spawn(move || {
                    let mut index = 0u64;
                    let mut last: Option<(u64, f64, Arc<qualscan_core::Frame>)> = None;
                    let mut last_admitted = None;
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        match source.next_frame() {
                            Ok(Some(frame)) => {
                                if frame.memory_bytes() > MAX_FRAME_BYTES {
                                    *decode_error.lock() =
                                        Some("frame exceeds memory limit".to_string());
                                    break;
                                }
                                let timestamp =
                                    frame.timestamp().unwrap_or(index as f64 / fps);
                                let shared = Arc::new(frame);
                                last = Some((index, timestamp, Arc::clone(&shared)));
                                if sampler.admit(index, &shared) {
                                    last_admitted = Some(index);
                                    if !producer.push(SampledFrame {
                                        index,
                                        timestamp,
                                        frame: shared,
                                    }) {
                                        break;
                                    }
                                }
                                index += 1;
                            }
                            Ok(None) => {
                                // short-source floor: close with the last
                                // frame so even a clip shorter than the
                                // sample interval yields first + last
                                if let Some((idx, ts, frame)) = last.take() {
                                    if sampler.taken() < 2
                                        && last_admitted != Some(idx)
                                        && sampler.force()
                                    {
                                        producer.push(SampledFrame {
                                            index: idx,
                                            timestamp: ts,
                                            frame,
                                        });
                                    }
                                }
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "decoder failed mid-stream");
                                *decode_error.lock() = Some(e.to_string());
                                break;
                            }
                        }
                    }
                })
                .map_err(|e| QualscanError::Internal(format!("decoder thread: {}", e)))?
        };

        let mut diagnosed: Vec<DiagnosedFrame> = Vec::new();
        let mut deadline_hit = false;
        while let Some(sampled) = consumer.pop() {
            if deadline.map(|dl| Instant::now() >= dl).unwrap_or(false) {
                deadline_hit = true;
                stop.store(true, Ordering::Relaxed);
                // drain without processing so the producer unblocks
                while consumer.pop().is_some() {}
                break;
            }
            let verdict = self.image.run(Arc::clone(&sampled.frame), &frame_opts)?;
            diagnosed.push(DiagnosedFrame {
                timestamp: sampled.timestamp,
                verdict,
                preview: make_preview(&sampled),
            });
        }
        decoder
            .join()
            .map_err(|_| QualscanError::Internal("decoder thread panicked".to_string()))?;

        let mut error_note = decode_error.lock().take();
        if deadline_hit && error_note.is_none() {
            error_note = Some("sampling aborted by deadline".to_string());
        }

        if diagnosed.is_empty() {
            return match error_note {
                Some(note) => Err(QualscanError::SourceUnavailable(note)),
                None => Err(QualscanError::EmptySource(
                    "no frames decoded".to_string(),
                )),
            };
        }

        self.assemble(&info, detection, diagnosed, error_note)
    }

    fn assemble(
        &self,
        info: &crate::source::SourceInfo,
        detection: &DetectionOptions,
        diagnosed: Vec<DiagnosedFrame>,
        error_note: Option<String>,
    ) -> Result<VideoVerdict> {
        let snapshot = self.image.profiles().snapshot();
        let profile = snapshot.get(&detection.profile)?;
        let min_event_duration = DetectorConfig::resolve(
            profile,
            "video",
            &detection.custom_thresholds,
            detection.level,
        )
        .threshold_or("min_event_duration", 0.5);

        let previews: Vec<PreviewFrame> =
            diagnosed.iter().map(|d| d.preview.clone()).collect();

        let mut issues: Vec<VideoIssue> = Vec::new();

        // temporal detectors over the sampled window
        for descriptor in self.video_registry.list() {
            if !descriptor.supports(detection.level) {
                continue;
            }
            let cfg = DetectorConfig::resolve(
                profile,
                descriptor.name,
                &detection.custom_thresholds,
                detection.level,
            );
            let finding = match self
                .video_registry
                .instantiate(descriptor.name)
                .and_then(|d| d.detect(&previews, &cfg))
            {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(detector = descriptor.name, error = %e, "video detector failed");
                    continue;
                }
            };
            if finding.segments.is_empty() {
                continue;
            }
            issues.push(VideoIssue {
                issue_type: finding.issue_type,
                severity: finding.severity,
                abnormal_duration: finding.segments.iter().map(Segment::duration).sum(),
                segments: finding.segments,
                explanation: finding.explanation,
            });
        }

        // image findings merged into per-issue time segments
        issues.extend(aggregate_image_issues(&diagnosed, min_event_duration));
        issues.sort_by_key(|i| i.issue_type);

        let duration = if info.duration > 0.0 {
            info.duration
        } else {
            previews.last().map(|p| p.timestamp).unwrap_or(0.0)
        };
        let abnormal_total = union_duration(
            issues
                .iter()
                .filter(|i| i.severity >= Severity::Warning)
                .flat_map(|i| i.segments.iter().copied()),
        );
        let overall_score = if duration > 0.0 {
            (1.0 - abnormal_total / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let mut severity = issues.iter().map(|i| i.severity).max().unwrap_or(Severity::Normal);
        if error_note.is_some() {
            severity = severity.max(Severity::Warning);
        }

        Ok(VideoVerdict {
            metadata: info.into_metadata(diagnosed.len() as u64),
            is_abnormal: issues.iter().any(|i| i.severity >= Severity::Warning),
            severity,
            overall_score,
            issues,
            error_note,
        })
    }
}

fn make_preview(sampled: &SampledFrame) -> PreviewFrame {
    let small = sampled.frame.downsample(PREVIEW_MAX_SIDE);
    let color = (small.format() == PixelFormat::Bgr).then(|| small.clone());
    PreviewFrame {
        frame_index: sampled.index,
        timestamp: sampled.timestamp,
        gray: small.to_gray(),
        color,
    }
}

/// Merge per-frame image findings into per-issue segments
///
/// Runs of consecutive sampled frames with the same issue abnormal
/// coalesce; isolated hits shorter than `min_event_duration` drop out as
/// noise.
fn aggregate_image_issues(diagnosed: &[DiagnosedFrame], min_event_duration: f64) -> Vec<VideoIssue> {
    let mut present: Vec<IssueType> = diagnosed
        .iter()
        .flat_map(|d| d.verdict.findings.iter())
        .filter(|f| f.is_abnormal)
        .map(|f| f.issue_type)
        .collect();
    present.sort_unstable();
    present.dedup();

    let mut issues = Vec::new();
    for issue_type in present {
        let mut segments: Vec<Segment> = Vec::new();
        let mut severity = Severity::Normal;
        let mut hits = 0usize;
        let mut run_start: Option<usize> = None;

        for (i, frame) in diagnosed.iter().enumerate() {
            let abnormal = frame
                .verdict
                .findings
                .iter()
                .any(|f| f.is_abnormal && f.issue_type == issue_type);
            if abnormal {
                hits += 1;
                severity = severity.max(
                    frame
                        .verdict
                        .findings
                        .iter()
                        .filter(|f| f.is_abnormal && f.issue_type == issue_type)
                        .map(|f| f.severity)
                        .max()
                        .unwrap_or(Severity::Normal),
                );
                if run_start.is_none() {
                    run_start = Some(i);
                }
            }
            let run_ends = !abnormal || i + 1 == diagnosed.len();
            if run_ends {
                if let Some(start) = run_start.take() {
                    let end = if abnormal { i } else { i - 1 };
                    let segment = Segment {
                        start_time: diagnosed[start].timestamp,
                        end_time: diagnosed[end].timestamp,
                        start_frame: diagnosed[start].preview.frame_index,
                        end_frame: diagnosed[end].preview.frame_index,
                    };
                    if segment.duration() >= min_event_duration {
                        segments.push(segment);
                    }
                }
            }
        }

        if segments.is_empty() {
            continue;
        }
        let abnormal_duration = segments.iter().map(Segment::duration).sum();
        issues.push(VideoIssue {
            issue_type,
            severity,
            explanation: format!(
                "{} abnormal in {} of {} sampled frames",
                issue_type,
                hits,
                diagnosed.len()
            ),
            segments,
            abnormal_duration,
        });
    }
    issues
}

/// Total covered seconds of a segment set, overlaps counted once
fn union_duration(segments: impl Iterator<Item = Segment>) -> f64 {
    let mut spans: Vec<(f64, f64)> = segments.map(|s| (s.start_time, s.end_time)).collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut total = 0.0;
    let mut current: Option<(f64, f64)> = None;
    for (start, end) in spans {
        match current {
            Some((cs, ce)) if start <= ce => current = Some((cs, ce.max(end))),
            Some((cs, ce)) => {
                total += ce - cs;
                current = Some((start, end));
            }
            None => current = Some((start, end)),
        }
    }
    if let Some((cs, ce)) = current {
        total += ce - cs;
    }
    total
}
