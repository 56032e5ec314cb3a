//! Synthetic frame generators
//!
//! Deterministic fixtures used by the test suites across the workspace
//! and by the CLI's self-check. Noise is seeded explicitly so repeated
//! runs score identically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::Frame;

/// Solid gray frame
pub fn gray_solid(width: u32, height: u32, value: u8) -> Frame {
    Frame::gray(width, height, vec![value; (width * height) as usize])
        .expect("synthetic frame dimensions are valid")
}

/// Solid BGR frame
pub fn bgr_solid(width: u32, height: u32, bgr: [u8; 3]) -> Frame {
    let mut data = Vec::with_capacity((width * height) as usize * 3);
    for _ in 0..width * height {
        data.extend_from_slice(&bgr);
    }
    Frame::bgr(width, height, data).expect("synthetic frame dimensions are valid")
}

/// Horizontal luminance ramp 0..255
pub fn gray_gradient(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height) as usize);
    for _y in 0..height {
        for x in 0..width {
            data.push(((x as u32 * 255) / width.max(1)) as u8);
        }
    }
    Frame::gray(width, height, data).expect("synthetic frame dimensions are valid")
}

/// Vertical stripe pattern: columns alternate between `base` and
/// `base + amplitude` every `period` pixels
pub fn vertical_stripes(width: u32, height: u32, period: u32, base: u8, amplitude: u8) -> Frame {
    let period = period.max(2);
    let mut data = Vec::with_capacity((width * height) as usize);
    for _y in 0..height {
        for x in 0..width {
            let on = (x / (period / 2)) % 2 == 1;
            data.push(if on { base.saturating_add(amplitude) } else { base });
        }
    }
    Frame::gray(width, height, data).expect("synthetic frame dimensions are valid")
}

/// Checkerboard with the given tile size, used for texture-rich fixtures
pub fn checkerboard(width: u32, height: u32, tile: u32) -> Frame {
    let tile = tile.max(1);
    let mut data = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let on = ((x / tile) + (y / tile)) % 2 == 0;
            data.push(if on { 220 } else { 35 });
        }
    }
    Frame::gray(width, height, data).expect("synthetic frame dimensions are valid")
}

/// Paint a flat patch over a region of a gray frame (occlusion fixture)
pub fn with_flat_patch(frame: &Frame, x0: u32, y0: u32, w: u32, h: u32, value: u8) -> Frame {
    let mut data = frame.data().to_vec();
    let fw = frame.width();
    for y in y0..(y0 + h).min(frame.height()) {
        for x in x0..(x0 + w).min(fw) {
            data[(y * fw + x) as usize] = value;
        }
    }
    Frame::gray(fw, frame.height(), data).expect("patched frame keeps source dimensions")
}

/// Additive Gaussian noise with the given sigma, seeded.
///
/// Uses the sum-of-uniforms approximation, which is plenty for test
/// fixtures and avoids a distribution dependency.
pub fn add_gaussian_noise(frame: &Frame, sigma: f64, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = frame
        .data()
        .iter()
        .map(|&px| {
            let mut acc = 0.0f64;
            for _ in 0..12 {
                acc += rng.gen::<f64>();
            }
            let n = (acc - 6.0) * sigma;
            (px as f64 + n).round().clamp(0.0, 255.0) as u8
        })
        .collect();
    Frame::new(frame.width(), frame.height(), frame.format(), data)
        .expect("noisy frame keeps source dimensions")
}

/// Gaussian blur approximated by three box passes
pub fn gaussian_blur(frame: &Frame, sigma: f64) -> Frame {
    let gray = frame.to_gray();
    if sigma <= 0.0 {
        return gray;
    }
    // box widths approximating a Gaussian of the requested sigma
    let n = 3.0;
    let ideal = (12.0 * sigma * sigma / n + 1.0).sqrt();
    let mut wl = ideal.floor() as i64;
    if wl % 2 == 0 {
        wl -= 1;
    }
    let wl = wl.max(1);
    let radius = (wl / 2) as i64;

    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let mut buf: Vec<f64> = gray.data().iter().map(|&v| v as f64).collect();
    for _pass in 0..3 {
        buf = box_pass_h(&buf, w, h, radius);
        buf = box_pass_v(&buf, w, h, radius);
    }
    let data = buf.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
    Frame::gray(gray.width(), gray.height(), data).expect("blurred frame keeps source dimensions")
}

fn box_pass_h(src: &[f64], w: i64, h: i64, r: i64) -> Vec<f64> {
    let mut out = vec![0.0; src.len()];
    let norm = (2 * r + 1) as f64;
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for dx in -r..=r {
                let sx = (x + dx).clamp(0, w - 1);
                acc += src[(y * w + sx) as usize];
            }
            out[(y * w + x) as usize] = acc / norm;
        }
    }
    out
}

fn box_pass_v(src: &[f64], w: i64, h: i64, r: i64) -> Vec<f64> {
    let mut out = vec![0.0; src.len()];
    let norm = (2 * r + 1) as f64;
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, h - 1);
                acc += src[(sy * w + x) as usize];
            }
            out[(y * w + x) as usize] = acc / norm;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_deterministic_per_seed() {
        let base = gray_solid(32, 32, 128);
        let a = add_gaussian_noise(&base, 10.0, 7);
        let b = add_gaussian_noise(&base, 10.0, 7);
        let c = add_gaussian_noise(&base, 10.0, 8);
        assert_eq!(a.data(), b.data());
        assert_ne!(a.data(), c.data());
    }

    #[test]
    fn test_blur_reduces_edge_energy() {
        let sharp = checkerboard(64, 64, 8);
        let blurred = gaussian_blur(&sharp, 3.0);
        let energy = |f: &Frame| -> f64 {
            f.data()
                .windows(2)
                .map(|w| (w[0] as f64 - w[1] as f64).abs())
                .sum()
        };
        assert!(energy(&blurred) < energy(&sharp) * 0.5);
    }

    #[test]
    fn test_flat_patch_is_flat() {
        let base = checkerboard(64, 64, 8);
        let patched = with_flat_patch(&base, 0, 0, 32, 32, 10);
        assert!(patched.data()[..32].iter().all(|&v| v == 10));
    }
}
