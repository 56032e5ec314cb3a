//! qualscan-metrics: Pixel-level signal operators
//!
//! Every detector's score reduces to one of the operators in this crate:
//! - Luminance statistics (mean, stddev, percentile dynamic range)
//! - Sharpness: Laplacian variance, Sobel mean gradient, Brenner gradient
//! - Noise: 3x3 median-filter residual, Laplacian noise sigma
//! - Similarity: windowed SSIM and mean absolute difference (frame pairs)
//! - Texture: per-tile variance grid
//!
//! Spectral projections live in [`spectrum`], color histograms in
//! [`histogram`], block-matching motion in [`flow`].
//!
//! All operators take a grayscale plane as `&[u8]` with explicit
//! dimensions and validate the buffer before touching it.
//!
//! # Example
//!
//! ```no_run
//! use qualscan_metrics::{laplacian_variance, ssim};
//!
//! let a = vec![128u8; 640 * 480];
//! let b = vec![130u8; 640 * 480];
//!
//! let sharpness = laplacian_variance(&a, 640, 480).unwrap();
//! let similarity = ssim(&a, &b, 640, 480).unwrap();
//! println!("sharpness {:.1}, ssim {:.4}", sharpness, similarity);
//! ```

use qualscan_core::{QualscanError, Result};

pub mod flow;
pub mod histogram;
pub mod spectrum;

use rayon::prelude::*;

/// Largest accepted plane dimension (matches the frame limit)
const MAX_DIMENSION: usize = 15360;

fn check_plane(data: &[u8], width: usize, height: usize) -> Result<usize> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(QualscanError::Input(format!(
            "plane dimensions exceed maximum: {}x{} (max {})",
            width, height, MAX_DIMENSION
        )));
    }
    let size = width.checked_mul(height).ok_or_else(|| {
        QualscanError::Input(format!("width * height overflow: {} * {}", width, height))
    })?;
    if data.len() != size {
        return Err(QualscanError::Input(format!(
            "plane size mismatch: expected {}, got {}",
            size,
            data.len()
        )));
    }
    if size == 0 {
        return Err(QualscanError::Input("empty plane".to_string()));
    }
    Ok(size)
}

fn check_pair(a: &[u8], b: &[u8], width: usize, height: usize) -> Result<usize> {
    let size = check_plane(a, width, height)?;
    if b.len() != size {
        return Err(QualscanError::Input(format!(
            "plane size mismatch: expected {}, got {}",
            size,
            b.len()
        )));
    }
    Ok(size)
}

/// First-order luminance statistics of a plane
#[derive(Debug, Clone, Copy)]
pub struct LumaStats {
    pub mean: f64,
    pub stddev: f64,
    pub min: u8,
    pub max: u8,
}

/// Mean, standard deviation and extrema in one pass
pub fn luma_stats(data: &[u8], width: usize, height: usize) -> Result<LumaStats> {
    let size = check_plane(data, width, height)? as f64;
    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for &v in data {
        sum += v as u64;
        sum_sq += (v as u64) * (v as u64);
        min = min.min(v);
        max = max.max(v);
    }
    let mean = sum as f64 / size;
    let var = (sum_sq as f64 / size - mean * mean).max(0.0);
    Ok(LumaStats {
        mean,
        stddev: var.sqrt(),
        min,
        max,
    })
}

/// Percentile-based dynamic range (robust against isolated outliers)
///
/// Returns `high_percentile - low_percentile` of the luminance histogram.
pub fn dynamic_range(data: &[u8], width: usize, height: usize, low: f64, high: f64) -> Result<f64> {
    let size = check_plane(data, width, height)?;
    let mut hist = [0u64; 256];
    for &v in data {
        hist[v as usize] += 1;
    }
    let lo_count = (size as f64 * low) as u64;
    let hi_count = (size as f64 * high) as u64;
    let mut acc = 0u64;
    let mut lo_val = 0u16;
    let mut hi_val = 255u16;
    let mut lo_set = false;
    for (value, &count) in hist.iter().enumerate() {
        acc += count;
        if !lo_set && acc > lo_count {
            lo_val = value as u16;
            lo_set = true;
        }
        if acc >= hi_count {
            hi_val = value as u16;
            break;
        }
    }
    Ok((hi_val.saturating_sub(lo_val)) as f64)
}

/// Variance of the 3x3 Laplacian response (classic focus measure)
///
/// Sharp frames produce high-variance responses; defocused or smeared
/// frames collapse toward zero.
pub fn laplacian_variance(data: &[u8], width: usize, height: usize) -> Result<f64> {
    check_plane(data, width, height)?;
    if width < 3 || height < 3 {
        return Ok(0.0);
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;
    for y in 1..height - 1 {
        let up = (y - 1) * width;
        let mid = y * width;
        let down = (y + 1) * width;
        for x in 1..width - 1 {
            let v = data[up + x] as f64
                + data[mid + x - 1] as f64
                + data[mid + x + 1] as f64
                + data[down + x] as f64
                - 4.0 * data[mid + x] as f64;
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }
    let n = count as f64;
    let mean = sum / n;
    Ok((sum_sq / n - mean * mean).max(0.0))
}

/// Mean Sobel gradient magnitude
pub fn sobel_mean_gradient(data: &[u8], width: usize, height: usize) -> Result<f64> {
    check_plane(data, width, height)?;
    if width < 3 || height < 3 {
        return Ok(0.0);
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let (gx, gy) = sobel_at(data, width, x, y);
            sum += (gx * gx + gy * gy).sqrt();
            count += 1;
        }
    }
    Ok(sum / count as f64)
}

#[inline]
fn sobel_at(data: &[u8], width: usize, x: usize, y: usize) -> (f64, f64) {
    let px = |dx: isize, dy: isize| -> f64 {
        data[(y as isize + dy) as usize * width + (x as isize + dx) as usize] as f64
    };
    let gx = px(1, -1) + 2.0 * px(1, 0) + px(1, 1) - px(-1, -1) - 2.0 * px(-1, 0) - px(-1, 1);
    let gy = px(-1, 1) + 2.0 * px(0, 1) + px(1, 1) - px(-1, -1) - 2.0 * px(0, -1) - px(1, -1);
    (gx, gy)
}

/// Brenner gradient: mean squared two-pixel horizontal difference
pub fn brenner_gradient(data: &[u8], width: usize, height: usize) -> Result<f64> {
    check_plane(data, width, height)?;
    if width < 3 {
        return Ok(0.0);
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in 0..height {
        let row = y * width;
        for x in 0..width - 2 {
            let d = data[row + x + 2] as f64 - data[row + x] as f64;
            sum += d * d;
            count += 1;
        }
    }
    Ok(sum / count as f64)
}

/// Mean absolute residual after a 3x3 median filter
///
/// Impulse and Gaussian sensor noise survives the median subtraction;
/// real structure mostly does not.
pub fn median_residual(data: &[u8], width: usize, height: usize) -> Result<f64> {
    check_plane(data, width, height)?;
    if width < 3 || height < 3 {
        return Ok(0.0);
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    let mut window = [0u8; 9];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut i = 0;
            for dy in 0..3 {
                let row = (y + dy - 1) * width;
                window[i] = data[row + x - 1];
                window[i + 1] = data[row + x];
                window[i + 2] = data[row + x + 1];
                i += 3;
            }
            window.sort_unstable();
            let median = window[4];
            sum += (data[y * width + x] as f64 - median as f64).abs();
            count += 1;
        }
    }
    Ok(sum / count as f64)
}

/// Immerkaer fast noise sigma estimate
///
/// Convolves with the difference-of-Laplacians mask and scales the mean
/// absolute response; robust against smooth structure.
pub fn laplacian_noise_sigma(data: &[u8], width: usize, height: usize) -> Result<f64> {
    check_plane(data, width, height)?;
    if width < 3 || height < 3 {
        return Ok(0.0);
    }
    let mut acc = 0.0f64;
    for y in 1..height - 1 {
        let up = (y - 1) * width;
        let mid = y * width;
        let down = (y + 1) * width;
        for x in 1..width - 1 {
            let v = data[up + x - 1] as f64 - 2.0 * data[up + x] as f64 + data[up + x + 1] as f64
                - 2.0 * data[mid + x - 1] as f64 + 4.0 * data[mid + x] as f64
                - 2.0 * data[mid + x + 1] as f64
                + data[down + x - 1] as f64 - 2.0 * data[down + x] as f64
                + data[down + x + 1] as f64;
            acc += v.abs();
        }
    }
    let n = ((width - 2) * (height - 2)) as f64;
    Ok((std::f64::consts::PI / 2.0).sqrt() * acc / (6.0 * n))
}

/// Noise-suppressing prefilter: 3x3 box smooth, then 2x2 mean decimation
///
/// Sharpness measures run on this plane so sensor noise does not
/// masquerade as detail; genuine edges survive the halving.
pub fn denoise_decimate(data: &[u8], width: usize, height: usize) -> Result<(Vec<u8>, usize, usize)> {
    check_plane(data, width, height)?;
    if width < 4 || height < 4 {
        return Ok((data.to_vec(), width, height));
    }
    // 3x3 box pass
    let mut smooth = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for dy in -1i64..=1 {
                let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as usize;
                for dx in -1i64..=1 {
                    let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as usize;
                    acc += data[sy * width + sx] as u32;
                }
            }
            smooth[y * width + x] = (acc / 9) as u8;
        }
    }
    // 2x2 mean decimation
    let out_w = width / 2;
    let out_h = height / 2;
    let mut out = Vec::with_capacity(out_w * out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let i = (y * 2) * width + x * 2;
            let acc = smooth[i] as u32
                + smooth[i + 1] as u32
                + smooth[i + width] as u32
                + smooth[i + width + 1] as u32;
            out.push((acc / 4) as u8);
        }
    }
    Ok((out, out_w, out_h))
}

/// Mean absolute pixel difference between two planes
pub fn mad(a: &[u8], b: &[u8], width: usize, height: usize) -> Result<f64> {
    let size = check_pair(a, b, width, height)?;
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .sum();
    Ok(sum / size as f64)
}

/// Structural Similarity Index over 8x8 windows
///
/// SSIM(x, y) = (2 mx my + C1)(2 cov + C2) / (mx^2 + my^2 + C1)(vx + vy + C2)
/// averaged across windows; 1.0 means structurally identical.
pub fn ssim(a: &[u8], b: &[u8], width: usize, height: usize) -> Result<f64> {
    check_pair(a, b, width, height)?;

    let k1 = 0.01;
    let k2 = 0.03;
    let l = 255.0;
    let c1 = (k1 * l) * (k1 * l);
    let c2 = (k2 * l) * (k2 * l);

    let window = 8;
    let mut ssim_sum = 0.0;
    let mut count = 0usize;

    for y in (0..height).step_by(window) {
        for x in (0..width).step_by(window) {
            let win_w = window.min(width - x);
            let win_h = window.min(height - y);
            let n = (win_w * win_h) as f64;
            if n == 0.0 {
                continue;
            }

            let mut sum_x = 0u64;
            let mut sum_y = 0u64;
            let mut sum_xx = 0u64;
            let mut sum_yy = 0u64;
            let mut sum_xy = 0u64;
            for wy in 0..win_h {
                let row = (y + wy) * width + x;
                for wx in 0..win_w {
                    let px = a[row + wx] as u64;
                    let py = b[row + wx] as u64;
                    sum_x += px;
                    sum_y += py;
                    sum_xx += px * px;
                    sum_yy += py * py;
                    sum_xy += px * py;
                }
            }

            let mean_x = sum_x as f64 / n;
            let mean_y = sum_y as f64 / n;
            let var_x = (sum_xx as f64 / n) - mean_x * mean_x;
            let var_y = (sum_yy as f64 / n) - mean_y * mean_y;
            let cov = (sum_xy as f64 / n) - mean_x * mean_y;

            let numerator = (2.0 * mean_x * mean_y + c1) * (2.0 * cov + c2);
            let denominator = (mean_x * mean_x + mean_y * mean_y + c1) * (var_x + var_y + c2);
            ssim_sum += numerator / denominator;
            count += 1;
        }
    }

    Ok(ssim_sum / count as f64)
}

/// First-order statistics of one tile
#[derive(Debug, Clone, Copy)]
pub struct TileStats {
    pub mean: f64,
    pub variance: f64,
}

/// Mean and variance of each tile in a `tiles_x` x `tiles_y` grid
///
/// Tiles cover the plane completely; edge tiles absorb the remainder.
/// Used by the occlusion detector to find dark, texture-dead regions.
pub fn tile_stats(
    data: &[u8],
    width: usize,
    height: usize,
    tiles_x: usize,
    tiles_y: usize,
) -> Result<Vec<TileStats>> {
    check_plane(data, width, height)?;
    if tiles_x == 0 || tiles_y == 0 || tiles_x > width || tiles_y > height {
        return Err(QualscanError::Input(format!(
            "tile grid {}x{} invalid for {}x{} plane",
            tiles_x, tiles_y, width, height
        )));
    }
    let mut out = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        let y0 = ty * height / tiles_y;
        let y1 = ((ty + 1) * height / tiles_y).max(y0 + 1);
        for tx in 0..tiles_x {
            let x0 = tx * width / tiles_x;
            let x1 = ((tx + 1) * width / tiles_x).max(x0 + 1);
            let mut sum = 0u64;
            let mut sum_sq = 0u64;
            let mut n = 0u64;
            for y in y0..y1 {
                let row = y * width;
                for x in x0..x1 {
                    let v = data[row + x] as u64;
                    sum += v;
                    sum_sq += v * v;
                    n += 1;
                }
            }
            let mean = sum as f64 / n as f64;
            out.push(TileStats {
                mean,
                variance: (sum_sq as f64 / n as f64 - mean * mean).max(0.0),
            });
        }
    }
    Ok(out)
}

/// SSIM over many frame pairs in parallel
pub fn batch_ssim_parallel(
    reference_frames: &[Vec<u8>],
    distorted_frames: &[Vec<u8>],
    width: usize,
    height: usize,
) -> Result<Vec<f64>> {
    if reference_frames.len() != distorted_frames.len() {
        return Err(QualscanError::Input(format!(
            "frame count mismatch: {} reference vs {} distorted",
            reference_frames.len(),
            distorted_frames.len()
        )));
    }
    reference_frames
        .par_iter()
        .zip(distorted_frames.par_iter())
        .map(|(r, d)| ssim(r, d, width, height))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualscan_core::synth;

    #[test]
    fn test_luma_stats_solid() {
        let data = vec![128u8; 100];
        let s = luma_stats(&data, 10, 10).unwrap();
        assert_eq!(s.mean, 128.0);
        assert_eq!(s.stddev, 0.0);
        assert_eq!((s.min, s.max), (128, 128));
    }

    #[test]
    fn test_plane_size_mismatch() {
        let data = vec![0u8; 50];
        assert!(luma_stats(&data, 10, 10).is_err());
        assert!(laplacian_variance(&data, 10, 10).is_err());
    }

    #[test]
    fn test_laplacian_variance_orders_sharpness() {
        let sharp = synth::checkerboard(64, 64, 4);
        let blurred = synth::gaussian_blur(&sharp, 3.0);
        let vs = laplacian_variance(sharp.data(), 64, 64).unwrap();
        let vb = laplacian_variance(blurred.data(), 64, 64).unwrap();
        assert!(vs > vb * 4.0, "sharp {} vs blurred {}", vs, vb);
    }

    #[test]
    fn test_denoise_decimate_suppresses_noise_keeps_edges() {
        let noisy = synth::add_gaussian_noise(&synth::gray_solid(128, 128, 128), 10.0, 9);
        let (plane, w, h) = denoise_decimate(noisy.data(), 128, 128).unwrap();
        assert_eq!((w, h), (64, 64));
        let residual_noise = laplacian_variance(&plane, w, h).unwrap();
        assert!(residual_noise < 100.0, "noise floor {}", residual_noise);

        let sharp = synth::checkerboard(128, 128, 8);
        let (plane, w, h) = denoise_decimate(sharp.data(), 128, 128).unwrap();
        let edge_energy = laplacian_variance(&plane, w, h).unwrap();
        assert!(edge_energy > 1000.0, "edge energy {}", edge_energy);
    }

    #[test]
    fn test_median_residual_tracks_noise() {
        let clean = synth::gray_solid(64, 64, 128);
        let noisy = synth::add_gaussian_noise(&clean, 12.0, 3);
        let rc = median_residual(clean.data(), 64, 64).unwrap();
        let rn = median_residual(noisy.data(), 64, 64).unwrap();
        assert!(rc < 0.5);
        assert!(rn > 4.0, "noisy residual {}", rn);
    }

    #[test]
    fn test_noise_sigma_estimate_close() {
        let clean = synth::gray_solid(128, 128, 128);
        let noisy = synth::add_gaussian_noise(&clean, 10.0, 5);
        let sigma = laplacian_noise_sigma(noisy.data(), 128, 128).unwrap();
        assert!((sigma - 10.0).abs() < 3.0, "estimated sigma {}", sigma);
    }

    #[test]
    fn test_ssim_identical() {
        let a = vec![128u8; 64];
        let result = ssim(&a, &a, 8, 8).unwrap();
        assert!((result - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_ssim_detects_change() {
        let a = synth::checkerboard(32, 32, 4);
        let b = synth::gaussian_blur(&a, 2.0);
        let s = ssim(a.data(), b.data(), 32, 32).unwrap();
        assert!(s < 0.95);
        assert!(s > 0.0);
    }

    #[test]
    fn test_mad_simple() {
        let a = vec![100u8; 16];
        let b = vec![104u8; 16];
        assert_eq!(mad(&a, &b, 4, 4).unwrap(), 4.0);
    }

    #[test]
    fn test_dynamic_range_gradient_vs_solid() {
        let grad = synth::gray_gradient(256, 16);
        let solid = synth::gray_solid(256, 16, 90);
        let rg = dynamic_range(grad.data(), 256, 16, 0.01, 0.99).unwrap();
        let rs = dynamic_range(solid.data(), 256, 16, 0.01, 0.99).unwrap();
        assert!(rg > 200.0);
        assert!(rs < 2.0);
    }

    #[test]
    fn test_tile_stats_spot_flat_region() {
        let textured = synth::checkerboard(64, 64, 4);
        let patched = synth::with_flat_patch(&textured, 0, 0, 32, 32, 10);
        let tiles = tile_stats(patched.data(), 64, 64, 2, 2).unwrap();
        assert_eq!(tiles.len(), 4);
        // top-left tile is the flat dark patch
        assert!(tiles[0].variance < 1.0);
        assert!((tiles[0].mean - 10.0).abs() < 0.5);
        assert!(tiles[3].variance > 100.0);
    }

    #[test]
    fn test_tile_grid_validation() {
        let data = vec![0u8; 16];
        assert!(tile_stats(&data, 4, 4, 0, 2).is_err());
        assert!(tile_stats(&data, 4, 4, 8, 2).is_err());
    }
}
