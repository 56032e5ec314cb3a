//! Frame sampling policies
//!
//! The sampler is a deterministic filter over the decoded frame
//! sequence; given the same frames and options it admits the same
//! indices. Strategies:
//!
//! - `Interval`: every ceil(fps x interval) frames.
//! - `Scene`: forced samples at detected cuts, plus a sparse keepalive
//!   every five intervals so an uneventful source still gets coverage.
//! - `Hybrid`: the full interval baseline unioned with the cut samples.
//!
//! Cut detection runs on a decimated gray preview so it stays cheap
//! enough to evaluate on every decoded frame. Admissions stop at
//! `max_frames` no matter the strategy.

use qualscan_core::config::{SampleOptions, SampleStrategy};
use qualscan_core::Frame;
use qualscan_metrics::histogram::{gray_histogram, histogram_diff};

/// Preview size for cut detection
const CUT_PREVIEW_SIDE: u32 = 128;

/// Histogram distance above which adjacent frames are a cut
const CUT_THRESHOLD: f64 = 0.4;

/// Keepalive factor for the scene strategy's sparse baseline
const SCENE_KEEPALIVE_STRIDES: u64 = 5;

pub struct Sampler {
    strategy: SampleStrategy,
    stride: u64,
    max_frames: usize,
    taken: usize,
    prev_hist: Option<Vec<f64>>,
}

impl Sampler {
    pub fn new(opts: &SampleOptions, fps: f64) -> Self {
        let fps = if fps > 0.0 { fps } else { 25.0 };
        let stride = ((fps * opts.sample_interval).ceil() as u64).max(1);
        Self {
            strategy: opts.strategy,
            stride,
            max_frames: opts.max_frames,
            taken: 0,
            prev_hist: None,
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn taken(&self) -> usize {
        self.taken
    }

    pub fn exhausted(&self) -> bool {
        self.taken >= self.max_frames
    }

    /// Decide whether this decoded frame gets fed to the detectors.
    ///
    /// Must be called for every decoded frame in order; cut detection
    /// compares against the previously seen frame either way.
    pub fn admit(&mut self, index: u64, frame: &Frame) -> bool {
        let cut = match self.strategy {
            SampleStrategy::Interval => {
                // no preview work on the pure-interval path
                false
            }
            SampleStrategy::Scene | SampleStrategy::Hybrid => self.is_cut(frame),
        };

        if self.exhausted() {
            return false;
        }

        let interval_hit = index % self.stride == 0;
        let admit = match self.strategy {
            SampleStrategy::Interval => interval_hit,
            SampleStrategy::Scene => cut || index % (self.stride * SCENE_KEEPALIVE_STRIDES) == 0,
            SampleStrategy::Hybrid => interval_hit || cut,
        };
        if admit {
            self.taken += 1;
        }
        admit
    }

    /// Force-admit (first/last-frame floor); still respects max_frames
    pub fn force(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.taken += 1;
        true
    }

    fn is_cut(&mut self, frame: &Frame) -> bool {
        let preview = frame.downsample(CUT_PREVIEW_SIDE).to_gray();
        let hist = match gray_histogram(preview.data(), 32) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let cut = match &self.prev_hist {
            Some(prev) => histogram_diff(prev, &hist).map(|d| d > CUT_THRESHOLD).unwrap_or(false),
            None => false,
        };
        self.prev_hist = Some(hist);
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualscan_core::synth;

    fn opts(strategy: SampleStrategy, interval: f64, max_frames: usize) -> SampleOptions {
        SampleOptions {
            strategy,
            sample_interval: interval,
            max_frames,
        }
    }

    fn run(sampler: &mut Sampler, frames: &[Frame]) -> Vec<u64> {
        frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| sampler.admit(i as u64, f).then_some(i as u64))
            .collect()
    }

    #[test]
    fn test_interval_stride() {
        let mut sampler = Sampler::new(&opts(SampleStrategy::Interval, 1.0, 100), 25.0);
        assert_eq!(sampler.stride(), 25);
        let frames: Vec<_> = (0..80).map(|_| synth::gray_solid(16, 16, 50)).collect();
        assert_eq!(run(&mut sampler, &frames), vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_max_frames_bound_all_strategies() {
        for strategy in [SampleStrategy::Interval, SampleStrategy::Scene, SampleStrategy::Hybrid] {
            let mut sampler = Sampler::new(&opts(strategy, 0.1, 5), 30.0);
            let frames: Vec<_> = (0..200)
                .map(|i| synth::gray_solid(16, 16, (i % 256) as u8))
                .collect();
            let admitted = run(&mut sampler, &frames);
            assert!(admitted.len() <= 5, "{:?}: {}", strategy, admitted.len());
            assert!(sampler.exhausted());
            assert!(!sampler.force());
        }
    }

    #[test]
    fn test_scene_strategy_forces_cut_samples() {
        // cut at frame 10: dark scene becomes bright
        let frames: Vec<_> = (0..30)
            .map(|i| synth::gray_solid(64, 64, if i < 10 { 20 } else { 230 }))
            .collect();
        let mut sampler = Sampler::new(&opts(SampleStrategy::Scene, 1.0, 100), 5.0);
        let admitted = run(&mut sampler, &frames);
        assert!(admitted.contains(&0), "keepalive baseline: {:?}", admitted);
        assert!(admitted.contains(&10), "forced cut sample: {:?}", admitted);
        // nothing else forced in static spans except the sparse keepalive
        assert!(admitted.len() <= 3, "{:?}", admitted);
    }

    #[test]
    fn test_hybrid_unions_interval_and_cuts() {
        let frames: Vec<_> = (0..30)
            .map(|i| synth::gray_solid(64, 64, if i < 13 { 20 } else { 230 }))
            .collect();
        let mut sampler = Sampler::new(&opts(SampleStrategy::Hybrid, 1.0, 100), 5.0);
        let admitted = run(&mut sampler, &frames);
        // interval baseline (stride 5) plus the forced cut at 13
        assert!(admitted.contains(&0));
        assert!(admitted.contains(&5));
        assert!(admitted.contains(&13));
    }

    #[test]
    fn test_sampler_is_deterministic() {
        let frames: Vec<_> = (0..60)
            .map(|i| synth::add_gaussian_noise(&synth::gray_solid(32, 32, 100), 8.0, i))
            .collect();
        let sample = |frames: &[Frame]| {
            let mut sampler = Sampler::new(&opts(SampleStrategy::Hybrid, 0.5, 20), 10.0);
            run(&mut sampler, frames)
        };
        assert_eq!(sample(&frames), sample(&frames));
    }
}
