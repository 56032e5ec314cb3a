//! Color and edge histograms
//!
//! HSV conversion, coarse 3-D histograms for scene comparison, channel
//! statistics for color-cast scoring, and Sobel edge density.

use qualscan_core::{Frame, PixelFormat, QualscanError, Result};

/// HSV triple: hue in degrees [0,360), saturation and value in [0,1]
#[inline]
pub fn bgr_to_hsv(b: u8, g: u8, r: u8) -> (f64, f64, f64) {
    let (bf, gf, rf) = (b as f64 / 255.0, g as f64 / 255.0, r as f64 / 255.0);
    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let h = if delta < f64::EPSILON {
        0.0
    } else if (max - rf).abs() < f64::EPSILON {
        60.0 * (((gf - bf) / delta).rem_euclid(6.0))
    } else if (max - gf).abs() < f64::EPSILON {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let s = if max < f64::EPSILON { 0.0 } else { delta / max };
    (h, s, max)
}

fn require_bgr(frame: &Frame) -> Result<()> {
    if frame.format() != PixelFormat::Bgr {
        return Err(QualscanError::Input(
            "color histogram requires a BGR frame".to_string(),
        ));
    }
    Ok(())
}

/// Coarse 3-D HSV histogram, L1-normalized
///
/// 8 hue x 4 saturation x 4 value bins by default; coarse on purpose so
/// adjacent frames of one scene land in the same bins.
pub fn hsv_histogram(frame: &Frame, h_bins: usize, s_bins: usize, v_bins: usize) -> Result<Vec<f64>> {
    require_bgr(frame)?;
    if h_bins == 0 || s_bins == 0 || v_bins == 0 {
        return Err(QualscanError::Input("zero histogram bins".to_string()));
    }
    let mut hist = vec![0.0f64; h_bins * s_bins * v_bins];
    let total = (frame.width() as usize * frame.height() as usize) as f64;
    for px in frame.data().chunks_exact(3) {
        let (h, s, v) = bgr_to_hsv(px[0], px[1], px[2]);
        let hi = ((h / 360.0) * h_bins as f64).min(h_bins as f64 - 1.0) as usize;
        let si = (s * s_bins as f64).min(s_bins as f64 - 1.0) as usize;
        let vi = (v * v_bins as f64).min(v_bins as f64 - 1.0) as usize;
        hist[(hi * s_bins + si) * v_bins + vi] += 1.0;
    }
    for slot in hist.iter_mut() {
        *slot /= total;
    }
    Ok(hist)
}

/// Gray histogram, L1-normalized
pub fn gray_histogram(data: &[u8], bins: usize) -> Result<Vec<f64>> {
    if bins == 0 || bins > 256 {
        return Err(QualscanError::Input(format!("invalid bin count {}", bins)));
    }
    if data.is_empty() {
        return Err(QualscanError::Input("empty plane".to_string()));
    }
    let mut hist = vec![0.0f64; bins];
    for &v in data {
        hist[v as usize * bins / 256] += 1.0;
    }
    let total = data.len() as f64;
    for slot in hist.iter_mut() {
        *slot /= total;
    }
    Ok(hist)
}

/// Half the L1 distance between two normalized histograms, in [0,1]
pub fn histogram_diff(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() || a.is_empty() {
        return Err(QualscanError::Input(format!(
            "histogram length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() * 0.5)
}

/// Per-channel means of a BGR frame, ordered [blue, green, red]
pub fn channel_means(frame: &Frame) -> Result<[f64; 3]> {
    require_bgr(frame)?;
    let mut sums = [0u64; 3];
    for px in frame.data().chunks_exact(3) {
        sums[0] += px[0] as u64;
        sums[1] += px[1] as u64;
        sums[2] += px[2] as u64;
    }
    let n = (frame.width() as usize * frame.height() as usize) as f64;
    Ok([sums[0] as f64 / n, sums[1] as f64 / n, sums[2] as f64 / n])
}

/// Mean HSV saturation of a BGR frame, in [0,1]
pub fn saturation_mean(frame: &Frame) -> Result<f64> {
    require_bgr(frame)?;
    let mut acc = 0.0f64;
    for px in frame.data().chunks_exact(3) {
        acc += bgr_to_hsv(px[0], px[1], px[2]).1;
    }
    Ok(acc / (frame.width() as usize * frame.height() as usize) as f64)
}

/// Fraction of interior pixels whose Sobel magnitude exceeds `threshold`
pub fn edge_density(data: &[u8], width: usize, height: usize, threshold: f64) -> Result<f64> {
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
    if width < 3 || height < 3 {
        return Ok(0.0);
    }
    let mut edges = 0usize;
    let mut count = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let px = |dx: isize, dy: isize| -> f64 {
                data[(y as isize + dy) as usize * width + (x as isize + dx) as usize] as f64
            };
            let gx =
                px(1, -1) + 2.0 * px(1, 0) + px(1, 1) - px(-1, -1) - 2.0 * px(-1, 0) - px(-1, 1);
            let gy =
                px(-1, 1) + 2.0 * px(0, 1) + px(1, 1) - px(-1, -1) - 2.0 * px(0, -1) - px(1, -1);
            if (gx * gx + gy * gy).sqrt() > threshold {
                edges += 1;
            }
            count += 1;
        }
    }
    Ok(edges as f64 / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualscan_core::synth;

    #[test]
    fn test_hsv_primaries() {
        // pure red: hue 0, full saturation
        let (h, s, v) = bgr_to_hsv(0, 0, 255);
        assert!(h.abs() < 1.0);
        assert!((s - 1.0).abs() < 1e-9);
        assert!((v - 1.0).abs() < 1e-9);
        // pure blue: hue 240
        let (h, _, _) = bgr_to_hsv(255, 0, 0);
        assert!((h - 240.0).abs() < 1.0);
        // gray: zero saturation
        let (_, s, _) = bgr_to_hsv(128, 128, 128);
        assert!(s.abs() < 1e-9);
    }

    #[test]
    fn test_histogram_diff_extremes() {
        let red = synth::bgr_solid(16, 16, [0, 0, 255]);
        let blue = synth::bgr_solid(16, 16, [255, 0, 0]);
        let h1 = hsv_histogram(&red, 8, 4, 4).unwrap();
        let h2 = hsv_histogram(&blue, 8, 4, 4).unwrap();
        assert!(histogram_diff(&h1, &h1).unwrap() < 1e-9);
        assert!(histogram_diff(&h1, &h2).unwrap() > 0.9);
    }

    #[test]
    fn test_channel_means_order() {
        let frame = synth::bgr_solid(8, 8, [10, 20, 30]);
        let means = channel_means(&frame).unwrap();
        assert_eq!(means, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_edge_density_checkerboard_vs_solid() {
        let board = synth::checkerboard(32, 32, 4);
        let solid = synth::gray_solid(32, 32, 100);
        let eb = edge_density(board.data(), 32, 32, 100.0).unwrap();
        let es = edge_density(solid.data(), 32, 32, 100.0).unwrap();
        assert!(eb > 0.1);
        assert_eq!(es, 0.0);
    }

    #[test]
    fn test_gray_frame_rejected_for_color_ops() {
        let gray = synth::gray_solid(8, 8, 50);
        assert!(channel_means(&gray).is_err());
        assert!(saturation_mean(&gray).is_err());
        assert!(hsv_histogram(&gray, 8, 4, 4).is_err());
    }
}
