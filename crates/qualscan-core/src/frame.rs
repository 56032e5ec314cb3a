//! Decoded frame representation
//!
//! A `Frame` is an immutable decoded raster: dimensions, pixel format and
//! an owned buffer. Producers (decoders, synthetic generators) build it
//! once; the pipelines share it into detectors behind an `Arc` and every
//! detector gets a read-only view. Ownership returns to the pipeline when
//! the last detector drops its handle.

use crate::error::{QualscanError, Result};
use crate::limits;

/// Pixel layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single 8-bit luminance plane
    Gray,
    /// Interleaved 8-bit blue/green/red
    Bgr,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Bgr => 3,
        }
    }
}

/// Immutable decoded raster
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    /// Source timestamp in seconds, when the producer knows it
    timestamp: Option<f64>,
}

impl Frame {
    /// Build a frame, validating dimensions and buffer length
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        limits::validate_dimensions(width, height)?;
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or_else(|| {
                QualscanError::Input(format!("frame size overflow: {}x{}", width, height))
            })?;
        if data.len() != expected {
            return Err(QualscanError::Input(format!(
                "frame buffer length mismatch: expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                data.len()
            )));
        }
        if expected > limits::MAX_FRAME_BYTES {
            return Err(QualscanError::ResourceExhausted {
                what: format!("frame of {} bytes", expected),
                retry_after_ms: 0,
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
            timestamp: None,
        })
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelFormat::Gray, data)
    }

    pub fn bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelFormat::Bgr, data)
    }

    pub fn with_timestamp(mut self, seconds: f64) -> Self {
        self.timestamp = Some(seconds);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len()
    }

    /// One row of interleaved pixel data
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.channels();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Convert to a single luminance plane (BT.601 weights on BGR input)
    ///
    /// Gray frames come back as a cheap clone so callers can treat the
    /// result uniformly.
    pub fn to_gray(&self) -> Frame {
        match self.format {
            PixelFormat::Gray => self.clone(),
            PixelFormat::Bgr => {
                let mut luma = Vec::with_capacity(self.width as usize * self.height as usize);
                for px in self.data.chunks_exact(3) {
                    let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    // integer BT.601: 0.114 B + 0.587 G + 0.299 R
                    luma.push(((b * 29 + g * 150 + r * 77 + 128) >> 8) as u8);
                }
                Frame {
                    width: self.width,
                    height: self.height,
                    format: PixelFormat::Gray,
                    data: luma,
                    timestamp: self.timestamp,
                }
            }
        }
    }

    /// Nearest-neighbor downsample so the longest side is at most
    /// `max_side`. Returns a clone when the frame already fits.
    pub fn downsample(&self, max_side: u32) -> Frame {
        let longest = self.width.max(self.height);
        if longest <= max_side || max_side == 0 {
            return self.clone();
        }
        let scale = max_side as f64 / longest as f64;
        let out_w = ((self.width as f64 * scale).round() as u32).max(1);
        let out_h = ((self.height as f64 * scale).round() as u32).max(1);
        let ch = self.channels();
        let mut out = Vec::with_capacity(out_w as usize * out_h as usize * ch);
        for oy in 0..out_h {
            let sy = ((oy as u64 * self.height as u64) / out_h as u64) as usize;
            let row = self.row(sy as u32);
            for ox in 0..out_w {
                let sx = ((ox as u64 * self.width as u64) / out_w as u64) as usize;
                out.extend_from_slice(&row[sx * ch..sx * ch + ch]);
            }
        }
        Frame {
            width: out_w,
            height: out_h,
            format: self.format,
            data: out,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_length_is_validated() {
        assert!(Frame::gray(4, 4, vec![0u8; 16]).is_ok());
        assert!(Frame::gray(4, 4, vec![0u8; 15]).is_err());
        assert!(Frame::bgr(4, 4, vec![0u8; 48]).is_ok());
        assert!(Frame::bgr(4, 4, vec![0u8; 16]).is_err());
    }

    #[test]
    fn test_to_gray_weights() {
        // pure green pixel: luma = 150/256 * 255 ~ 149
        let f = Frame::bgr(1, 1, vec![0, 255, 0]).unwrap();
        let g = f.to_gray();
        assert_eq!(g.format(), PixelFormat::Gray);
        let v = g.data()[0];
        assert!((148..=151).contains(&v), "luma {}", v);
    }

    #[test]
    fn test_to_gray_preserves_timestamp() {
        let f = Frame::bgr(1, 1, vec![10, 20, 30]).unwrap().with_timestamp(2.5);
        assert_eq!(f.to_gray().timestamp(), Some(2.5));
    }

    #[test]
    fn test_downsample_bounds_longest_side() {
        let f = Frame::gray(640, 480, vec![128; 640 * 480]).unwrap();
        let d = f.downsample(320);
        assert_eq!(d.width(), 320);
        assert_eq!(d.height(), 240);
        assert_eq!(d.data().len(), 320 * 240);
    }

    #[test]
    fn test_downsample_noop_when_small() {
        let f = Frame::gray(100, 50, vec![7; 5000]).unwrap();
        let d = f.downsample(480);
        assert_eq!(d.width(), 100);
        assert_eq!(d.height(), 50);
    }
}
