//! Resource limits shared across the workspace
//!
//! These limits keep the system responsive when fed untrusted or
//! pathological input: oversized frames, endless streams, runaway thread
//! counts.

use crate::error::{QualscanError, Result};

/// Maximum frame dimension in either axis (16K class displays)
pub const MAX_FRAME_DIMENSION: u32 = 15360;

/// Maximum bytes for a single decoded frame
///
/// A 4K BGR frame is ~25 MB; 64 MB leaves headroom for 8K grayscale while
/// still bounding the frame buffer's memory ceiling.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Maximum number of worker threads for parallel detection
pub const MAX_WORKER_THREADS: usize = 32;

/// Minimum number of worker threads (must be at least 1)
pub const MIN_WORKER_THREADS: usize = 1;

/// Hard cap on sampled frames per video regardless of caller's max_frames
pub const MAX_SAMPLED_FRAMES: usize = 10_000;

/// Frame buffer floor; the effective capacity is max(this, 2 x workers)
pub const FRAME_BUFFER_MIN: usize = 8;

/// Stream sample ring size (most recent frames kept for detection)
pub const SAMPLE_RING_CAPACITY: usize = 32;

/// Stream results ring size (oldest evicted)
pub const RESULT_RING_CAPACITY: usize = 256;

/// Minimum execution history entries retained per task
pub const MIN_HISTORY_RETENTION: usize = 1000;

/// Working resolution (longest side) for fast-level detection
pub const FAST_LEVEL_MAX_SIDE: u32 = 480;

/// Preview resolution (longest side) for scene-cut sampling and temporal
/// detectors
pub const PREVIEW_MAX_SIDE: u32 = 320;

/// Reconnect backoff base in milliseconds
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Reconnect backoff cap in milliseconds
pub const BACKOFF_CAP_MS: u64 = 30_000;

/// Reconnect backoff jitter fraction (plus or minus)
pub const BACKOFF_JITTER: f64 = 0.25;

/// Validate a requested worker count
pub fn validate_worker_count(workers: usize) -> Result<()> {
    if workers < MIN_WORKER_THREADS {
        return Err(QualscanError::Config(format!(
            "worker count {} is below minimum {}",
            workers, MIN_WORKER_THREADS
        )));
    }
    if workers > MAX_WORKER_THREADS {
        return Err(QualscanError::Config(format!(
            "worker count {} exceeds maximum {}",
            workers, MAX_WORKER_THREADS
        )));
    }
    Ok(())
}

/// Validate frame dimensions against the global caps
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(QualscanError::Input(format!(
            "zero frame dimension: {}x{}",
            width, height
        )));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(QualscanError::Input(format!(
            "frame dimensions {}x{} exceed maximum {}",
            width, height, MAX_FRAME_DIMENSION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        assert!(validate_worker_count(0).is_err());
        assert!(validate_worker_count(1).is_ok());
        assert!(validate_worker_count(MAX_WORKER_THREADS).is_ok());
        assert!(validate_worker_count(MAX_WORKER_THREADS + 1).is_err());
    }

    #[test]
    fn test_dimension_bounds() {
        assert!(validate_dimensions(0, 480).is_err());
        assert!(validate_dimensions(640, 0).is_err());
        assert!(validate_dimensions(640, 480).is_ok());
        assert!(validate_dimensions(MAX_FRAME_DIMENSION + 1, 1).is_err());
    }
}
