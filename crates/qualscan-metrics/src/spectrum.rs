//! Spectral analysis of row/column projections
//!
//! Periodic interference (rolling bands, fixed-pattern stripes) shows up
//! as a sharp peak in the 1-D Fourier spectrum of the frame's axis
//! projections. The peak-to-mean magnitude ratio is the stripe detector's
//! score.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use qualscan_core::{QualscanError, Result};

/// Axis along which a projection profile is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// One value per column (catches vertical stripes)
    Columns,
    /// One value per row (catches horizontal stripes)
    Rows,
}

/// Mean-luminance projection along the given axis
pub fn projection_profile(data: &[u8], width: usize, height: usize, axis: Axis) -> Result<Vec<f64>> {
    let expected = width.checked_mul(height).ok_or_else(|| {
        QualscanError::Input(format!("width * height overflow: {} * {}", width, height))
    })?;
    if data.len() != expected || expected == 0 {
        return Err(QualscanError::Input(format!(
            "plane size mismatch: expected {}, got {}",
            expected,
            data.len()
        )));
    }
    match axis {
        Axis::Columns => {
            let mut profile = vec![0.0f64; width];
            for y in 0..height {
                let row = y * width;
                for (x, slot) in profile.iter_mut().enumerate() {
                    *slot += data[row + x] as f64;
                }
            }
            for slot in profile.iter_mut() {
                *slot /= height as f64;
            }
            Ok(profile)
        }
        Axis::Rows => {
            let mut profile = vec![0.0f64; height];
            for (y, slot) in profile.iter_mut().enumerate() {
                let row = y * width;
                let sum: f64 = data[row..row + width].iter().map(|&v| v as f64).sum();
                *slot = sum / width as f64;
            }
            Ok(profile)
        }
    }
}

/// Peak-to-mean magnitude ratio of the projection's spectrum
///
/// DC and the first bin are excluded (they encode global brightness and
/// the slowest gradient, not stripes). A flat profile returns 0.
pub fn spectral_peak_ratio(profile: &[f64]) -> Result<f64> {
    if profile.len() < 8 {
        return Err(QualscanError::Input(format!(
            "projection too short for spectral analysis: {}",
            profile.len()
        )));
    }
    let n = profile.len();
    let mean: f64 = profile.iter().sum::<f64>() / n as f64;

    let mut buffer: Vec<Complex<f64>> = profile
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    // usable band: skip DC and bin 1, stop at Nyquist
    let band = &buffer[2..n / 2];
    if band.is_empty() {
        return Ok(0.0);
    }
    let mags: Vec<f64> = band.iter().map(|c| c.norm()).collect();
    let peak = mags.iter().cloned().fold(0.0f64, f64::max);
    let avg = mags.iter().sum::<f64>() / mags.len() as f64;
    if avg < 1e-9 {
        return Ok(0.0);
    }
    Ok(peak / avg)
}

/// Stripe scores for both axes: (row-profile ratio, column-profile ratio)
pub fn stripe_peak_ratios(data: &[u8], width: usize, height: usize) -> Result<(f64, f64)> {
    let rows = projection_profile(data, width, height, Axis::Rows)?;
    let cols = projection_profile(data, width, height, Axis::Columns)?;
    Ok((spectral_peak_ratio(&rows)?, spectral_peak_ratio(&cols)?))
}
