//! Sparse block-matching motion estimation
//!
//! Good enough for shake scoring on preview-size frames: the frame is cut
//! into blocks, each block searches a small neighborhood in the next
//! frame for its best SAD match, and the mean displacement magnitude is
//! the motion score. Textureless blocks are skipped so a static scene
//! with sensor noise does not read as motion.

use qualscan_core::{QualscanError, Result};

/// Default block edge in pixels
pub const BLOCK_SIZE: usize = 16;

/// Default search radius in pixels
pub const SEARCH_RADIUS: usize = 7;

/// Variance floor below which a block is too flat to track
const MIN_BLOCK_VARIANCE: f64 = 20.0;

/// Mean motion magnitude between two frames via block matching
///
/// Returns 0 when nothing trackable moved (or nothing was trackable).
pub fn block_flow_magnitude(
    prev: &[u8],
    curr: &[u8],
    width: usize,
    height: usize,
    block: usize,
    radius: usize,
) -> Result<f64> {
    let expected = width.checked_mul(height).ok_or_else(|| {
        QualscanError::Input(format!("width * height overflow: {} * {}", width, height))
    })?;
    if prev.len() != expected || curr.len() != expected || expected == 0 {
        return Err(QualscanError::Input(format!(
            "plane size mismatch: expected {}, got {} and {}",
            expected,
            prev.len(),
            curr.len()
        )));
    }
    if block == 0 || radius == 0 {
        return Err(QualscanError::Input("zero block size or radius".to_string()));
    }
    if width < block + 2 * radius || height < block + 2 * radius {
        // frame too small to search; treat as static
        return Ok(0.0);
    }

    let mut total_mag = 0.0f64;
    let mut tracked = 0usize;

    let mut by = radius;
    while by + block + radius <= height {
        let mut bx = radius;
        while bx + block + radius <= width {
            if block_variance(prev, width, bx, by, block) >= MIN_BLOCK_VARIANCE {
                let (dx, dy) = best_match(prev, curr, width, bx, by, block, radius);
                total_mag += ((dx * dx + dy * dy) as f64).sqrt();
                tracked += 1;
            }
            bx += block;
        }
        by += block;
    }

    if tracked == 0 {
        return Ok(0.0);
    }
    Ok(total_mag / tracked as f64)
}

fn block_variance(data: &[u8], width: usize, x0: usize, y0: usize, block: usize) -> f64 {
    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    for y in y0..y0 + block {
        let row = y * width;
        for x in x0..x0 + block {
            let v = data[row + x] as u64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let n = (block * block) as f64;
    let mean = sum as f64 / n;
    (sum_sq as f64 / n - mean * mean).max(0.0)
}

/// Displacement of the best SAD match for one block
fn best_match(
    prev: &[u8],
    curr: &[u8],
    width: usize,
    x0: usize,
    y0: usize,
    block: usize,
    radius: usize,
) -> (i64, i64) {
    let mut best = u64::MAX;
    let mut best_dx = 0i64;
    let mut best_dy = 0i64;
    let r = radius as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            let sx = (x0 as i64 + dx) as usize;
            let sy = (y0 as i64 + dy) as usize;
            let mut sad = 0u64;
            for y in 0..block {
                let prow = (y0 + y) * width + x0;
                let crow = (sy + y) * width + sx;
                for x in 0..block {
                    sad += (prev[prow + x] as i64 - curr[crow + x] as i64).unsigned_abs();
                }
                if sad >= best {
                    break;
                }
            }
            // prefer the smallest displacement on ties so static scenes
            // report zero motion
            if sad < best || (sad == best && dx * dx + dy * dy < best_dx * best_dx + best_dy * best_dy)
            {
                best = sad;
                best_dx = dx;
                best_dy = dy;
            }
        }
    }
    (best_dx, best_dy)
}
