//! Image pipeline: parallel dispatch, suppression, primary-issue rollup
//!
//! One call runs every level-eligible detector against the same shared
//! frame, absorbs individual failures and overruns into synthetic
//! findings, applies the suppression graph to a fix-point, and rolls the
//! survivors up into an [`ImageVerdict`]. The pipeline itself only fails
//! on configuration problems (unknown profile, unknown detector name,
//! invalid options); detector trouble never aborts it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, RecvTimeoutError};

use qualscan_core::config::DetectionOptions;
use qualscan_core::limits;
use qualscan_core::profile::{DetectorConfig, ProfileStore};
use qualscan_core::{Finding, Frame, ImageVerdict, QualscanError, Result, Severity};
use qualscan_detect::{Detector, DetectorDescriptor, DetectorRegistry};

pub struct ImagePipeline {
    registry: Arc<DetectorRegistry>,
    profiles: Arc<ProfileStore>,
    pool: rayon::ThreadPool,
}

impl ImagePipeline {
    pub fn new(
        registry: Arc<DetectorRegistry>,
        profiles: Arc<ProfileStore>,
        workers: usize,
    ) -> Result<Self> {
        let workers = if workers == 0 {
            num_cpus::get().min(limits::MAX_WORKER_THREADS)
        } else {
            workers
        };
        limits::validate_worker_count(workers)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("qs-detect-{}", i))
            .build()
            .map_err(|e| QualscanError::Internal(format!("worker pool: {}", e)))?;
        Ok(Self {
            registry,
            profiles,
            pool,
        })
    }

    pub fn registry(&self) -> Arc<DetectorRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn profiles(&self) -> Arc<ProfileStore> {
        Arc::clone(&self.profiles)
    }

    /// Diagnose one frame
    pub fn run(&self, frame: Arc<Frame>, opts: &DetectionOptions) -> Result<ImageVerdict> {
        opts.validate()?;
        let snapshot = self.profiles.snapshot();
        let profile = snapshot.get(&opts.profile)?;

        let mut active: Vec<&'static DetectorDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter(|d| d.supports(opts.level))
            .collect();
        if let Some(allow) = &opts.detectors {
            for name in allow {
                self.registry.descriptor(name)?;
            }
            active.retain(|d| allow.iter().any(|n| n == d.name));
        }

        let deadline = opts.deadline().map(|d| Instant::now() + d);
        let mut results: BTreeMap<&'static str, Finding> = BTreeMap::new();

        if opts.parallel_detection && active.len() > 1 {
            self.dispatch_parallel(&active, profile, opts, &frame, deadline, &mut results);
        } else {
            self.dispatch_sequential(&active, profile, opts, &frame, deadline, &mut results);
        }

        // detectors that never reported hit the soft deadline
        for descriptor in &active {
            results.entry(descriptor.name).or_insert_with(|| {
                tracing::warn!(detector = descriptor.name, "detector timed out");
                Finding::synthetic(descriptor.name, descriptor.issue_type, "timed out")
            });
        }

        Ok(assemble_verdict(&self.registry, &active, results))
    }

    fn dispatch_parallel(
        &self,
        active: &[&'static DetectorDescriptor],
        profile: &qualscan_core::profile::Profile,
        opts: &DetectionOptions,
        frame: &Arc<Frame>,
        deadline: Option<Instant>,
        results: &mut BTreeMap<&'static str, Finding>,
    ) {
        let (tx, rx) = bounded::<(&'static str, Result<Finding>)>(active.len());
        let mut dispatched = 0usize;
        for descriptor in active {
            let detector: Box<dyn Detector> = match self.registry.instantiate(descriptor.name) {
                Ok(d) => d,
                Err(e) => {
                    results.insert(descriptor.name, failure_finding(descriptor, &e));
                    continue;
                }
            };
            let cfg =
                DetectorConfig::resolve(profile, descriptor.name, &opts.custom_thresholds, opts.level);
            let tx = tx.clone();
            let frame = Arc::clone(frame);
            let name = descriptor.name;
            self.pool.spawn(move || {
                let outcome = detector.detect(&frame, &cfg);
                // receiver may be gone after a deadline; late results are
                // dropped on the floor
                let _ = tx.send((name, outcome));
            });
            dispatched += 1;
        }
        drop(tx);

        for _ in 0..dispatched {
            let message = match deadline {
                Some(dl) => match rx.recv_deadline(dl) {
                    Ok(m) => Some(m),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
                },
                None => rx.recv().ok(),
            };
            match message {
                Some((name, Ok(finding))) => {
                    results.insert(name, finding);
                }
                Some((name, Err(e))) => {
                    let descriptor = active.iter().find(|d| d.name == name).expect("dispatched");
                    results.insert(name, failure_finding(descriptor, &e));
                }
                None => break,
            }
        }
    }

    fn dispatch_sequential(
        &self,
        active: &[&'static DetectorDescriptor],
        profile: &qualscan_core::profile::Profile,
        opts: &DetectionOptions,
        frame: &Arc<Frame>,
        deadline: Option<Instant>,
        results: &mut BTreeMap<&'static str, Finding>,
    ) {
        for descriptor in active {
            if deadline.map(|dl| Instant::now() >= dl).unwrap_or(false) {
                break;
            }
            let finding = self
                .registry
                .instantiate(descriptor.name)
                .and_then(|d| d.detect(frame, &DetectorConfig::resolve(
                    profile,
                    descriptor.name,
                    &opts.custom_thresholds,
                    opts.level,
                )))
                .unwrap_or_else(|e| failure_finding(descriptor, &e));
            results.insert(descriptor.name, finding);
        }
    }
}

/// Synthetic replacement for a detector that errored; absorbed, never
/// abnormal
fn failure_finding(descriptor: &DetectorDescriptor, error: &QualscanError) -> Finding {
    tracing::warn!(detector = descriptor.name, error = %error, "detector failed");
    Finding::synthetic(
        descriptor.name,
        descriptor.issue_type,
        format!("detector failed: {}", error),
    )
}

/// Fix-point suppression: abnormal, not-yet-suppressed detectors silence
/// their targets until the set stops growing. Each scan collects
/// additions against the set as it stood when the scan began, so the
/// result does not depend on detector iteration order.
pub(crate) fn apply_suppression(
    findings: &BTreeMap<&'static str, Finding>,
    graph: &BTreeMap<&'static str, BTreeSet<&'static str>>,
) -> BTreeSet<String> {
    let mut suppressed: BTreeSet<String> = BTreeSet::new();
    loop {
        let mut additions: Vec<String> = Vec::new();
        for (name, finding) in findings {
            if !finding.is_abnormal || suppressed.contains(*name) {
                continue;
            }
            if let Some(targets) = graph.get(name) {
                for target in targets {
                    if findings.contains_key(target) && !suppressed.contains(*target) {
                        additions.push((*target).to_string());
                    }
                }
            }
        }
        let before = suppressed.len();
        suppressed.extend(additions);
        if suppressed.len() == before {
            break;
        }
    }
    suppressed
}

fn assemble_verdict(
    registry: &DetectorRegistry,
    active: &[&'static DetectorDescriptor],
    results: BTreeMap<&'static str, Finding>,
) -> ImageVerdict {
    let graph = registry.suppression_graph();
    let suppressed = apply_suppression(&results, &graph);

    let priority_of = |name: &str| {
        active
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.priority)
            .unwrap_or(u32::MAX)
    };

    let mut findings: Vec<Finding> = results
        .into_values()
        .filter(|f| !suppressed.contains(&f.detector))
        .collect();
    findings.sort_by(|a, b| {
        (priority_of(&a.detector), a.detector.as_str())
            .cmp(&(priority_of(&b.detector), b.detector.as_str()))
    });

    let primary = findings
        .iter()
        .filter(|f| f.is_abnormal)
        .min_by(|a, b| {
            priority_of(&a.detector)
                .cmp(&priority_of(&b.detector))
                .then(b.confidence.total_cmp(&a.confidence))
                .then(b.threshold_ratio().total_cmp(&a.threshold_ratio()))
                .then(a.detector.cmp(&b.detector))
        })
        .map(|f| f.primary_label().to_string());

    let severity = findings
        .iter()
        .filter(|f| f.is_abnormal)
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Normal);
    let is_abnormal = findings.iter().any(|f| f.is_abnormal);

    tracing::debug!(
        findings = findings.len(),
        suppressed = suppressed.len(),
        primary = primary.as_deref().unwrap_or("-"),
        "image verdict assembled"
    );

    ImageVerdict {
        findings,
        is_abnormal,
        primary_issue: primary,
        severity,
        suppressed,
    }
}

#[cfg(test)]
mod tests {
    include!("pipeline_test.rs");
}
