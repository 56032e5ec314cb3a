//! qualscan-detect: Detector contract, registry and built-ins
//!
//! A detector is a pure function over a frame plus resolved thresholds:
//! `detect(frame, cfg) -> Finding`. Every detector declares a static
//! [`DetectorDescriptor`] (identity, issue category, supported levels,
//! priority, suppression edges) and registers a factory with the
//! [`DetectorRegistry`] at process start. The registry is immutable after
//! that; pipelines only read it.
//!
//! Image detectors live at the crate root, temporal detectors under
//! [`video`].

pub mod descriptor;
pub mod registry;
pub mod video;

mod blur;
mod brightness;
mod color;
mod contrast;
mod noise;
mod occlusion;
mod signal_loss;
mod stripe;

pub use blur::BlurDetector;
pub use brightness::BrightnessDetector;
pub use color::ColorDetector;
pub use contrast::ContrastDetector;
pub use descriptor::{Detector, DetectorDescriptor};
pub use noise::NoiseDetector;
pub use occlusion::OcclusionDetector;
pub use registry::DetectorRegistry;
pub use signal_loss::SignalLossDetector;
pub use stripe::StripeDetector;

/// Confidence from the distance between a score and its decision
/// boundary, squashed into [0,1].
///
/// Zero distance (exactly on the boundary) maps to 0; `scale` sets how
/// fast certainty saturates in the detector's native units.
pub(crate) fn boundary_confidence(score: f64, threshold: f64, scale: f64) -> f64 {
    let scale = scale.abs().max(f64::EPSILON);
    let d = (score - threshold).abs() / scale;
    2.0 / (1.0 + (-d).exp()) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_range_and_monotonicity() {
        let at = boundary_confidence(100.0, 100.0, 10.0);
        let near = boundary_confidence(105.0, 100.0, 10.0);
        let far = boundary_confidence(200.0, 100.0, 10.0);
        assert_eq!(at, 0.0);
        assert!(near > at && far > near);
        assert!(far <= 1.0);
        // symmetric around the boundary
        assert_eq!(near, boundary_confidence(95.0, 100.0, 10.0));
    }
}
