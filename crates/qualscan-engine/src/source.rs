//! Frame sources: the decoded-frame provider seam
//!
//! Decoding proper (containers, codecs, network protocols) lives outside
//! this workspace; the engine consumes anything that can hand it decoded
//! frames in order. Still images come through the `image` crate, videos
//! and live streams through whatever implements [`FrameSource`] /
//! [`StreamConnector`]. In-memory implementations back the test suites
//! and the CLI's frame-sequence mode.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use qualscan_core::{Frame, QualscanError, Result, StreamKind, VideoMetadata};

/// Facts a source knows before decoding starts
#[derive(Debug, Clone, Copy)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub total_frames: u64,
}

impl SourceInfo {
    pub fn into_metadata(self, sampled_frames: u64) -> VideoMetadata {
        VideoMetadata {
            width: self.width,
            height: self.height,
            fps: self.fps,
            duration: self.duration,
            total_frames: self.total_frames,
            sampled_frames,
        }
    }
}

/// Ordered supplier of decoded frames
///
/// `next_frame` blocks on decoder I/O and returns `Ok(None)` at end of
/// stream. Mid-stream errors surface as `Err`; the caller decides whether
/// that aborts or degrades the run.
pub trait FrameSource: Send {
    fn info(&self) -> SourceInfo;

    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Factory seam for live stream connections (RTSP/RTMP)
///
/// Connectors are cheap handles; `connect` performs the expensive work
/// and may fail transiently, in which case the stream worker backs off
/// and retries.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: &str, kind: StreamKind) -> Result<Box<dyn FrameSource>>;
}

/// Decode a still image from bytes into a BGR frame
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| QualscanError::UnsupportedFormat(e.to_string()))?;
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width(), rgb.height());
    let mut data = Vec::with_capacity((w * h * 3) as usize);
    for px in rgb.pixels() {
        data.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    Frame::bgr(w, h, data)
}

/// Load a still image from disk into a BGR frame
pub fn load_image_path(path: &Path) -> Result<Frame> {
    if !path.exists() {
        return Err(QualscanError::NotFound(format!(
            "input not found: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path).map_err(|source| QualscanError::IoAt {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image_bytes(&bytes)
}

/// In-memory frame sequence with a fixed frame rate
///
/// Used by the tests, the stream snapshot path and the CLI's image
/// sequence mode. Timestamps are assigned `index / fps` unless a frame
/// already carries one.
pub struct MemorySource {
    info: SourceInfo,
    frames: VecDeque<Frame>,
    cursor: u64,
    /// Injected decode failure at this frame index, for error-path tests
    fail_at: Option<u64>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| QualscanError::EmptySource("no frames supplied".to_string()))?;
        let fps = if fps > 0.0 { fps } else { 25.0 };
        let info = SourceInfo {
            width: first.width(),
            height: first.height(),
            fps,
            duration: frames.len() as f64 / fps,
            total_frames: frames.len() as u64,
        };
        Ok(Self {
            info,
            frames: frames.into(),
            cursor: 0,
            fail_at: None,
        })
    }

    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if Some(self.cursor) == self.fail_at {
            return Err(QualscanError::Input(format!(
                "decode failed at frame {}",
                self.cursor
            )));
        }
        match self.frames.pop_front() {
            Some(frame) => {
                let ts = self.cursor as f64 / self.info.fps;
                self.cursor += 1;
                Ok(Some(if frame.timestamp().is_none() {
                    frame.with_timestamp(ts)
                } else {
                    frame
                }))
            }
            None => Ok(None),
        }
    }
}

/// Directory of still images replayed as a fixed-rate video
///
/// The practical decoded-frame provider for environments without a
/// video decoder: frames are the image files in the directory, sorted by
/// name, played at the given fps. Files decode lazily so memory stays
/// bounded by one frame.
pub struct ImageSequenceSource {
    paths: Vec<std::path::PathBuf>,
    info: SourceInfo,
    cursor: usize,
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

impl ImageSequenceSource {
    pub fn from_dir(dir: &Path, fps: f64) -> Result<Self> {
        if !dir.is_dir() {
            return Err(QualscanError::NotFound(format!(
                "frame directory not found: {}",
                dir.display()
            )));
        }
        let mut paths: Vec<std::path::PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| QualscanError::IoAt {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(QualscanError::EmptySource(format!(
                "no image files under {}",
                dir.display()
            )));
        }
        let fps = if fps > 0.0 { fps } else { 1.0 };
        let first = load_image_path(&paths[0])?;
        let info = SourceInfo {
            width: first.width(),
            height: first.height(),
            fps,
            duration: paths.len() as f64 / fps,
            total_frames: paths.len() as u64,
        };
        Ok(Self {
            paths,
            info,
            cursor: 0,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let frame = load_image_path(path)?;
        let ts = self.cursor as f64 / self.info.fps;
        self.cursor += 1;
        Ok(Some(frame.with_timestamp(ts)))
    }
}

/// Connector for deployments without live-stream support compiled in
pub struct NullConnector;

impl StreamConnector for NullConnector {
    fn connect(&self, url: &str, _kind: StreamKind) -> Result<Box<dyn FrameSource>> {
        Err(QualscanError::UnsupportedFormat(format!(
            "no stream connector configured for {}",
            url
        )))
    }
}

/// Scripted connector for stream-worker tests
///
/// Each connect attempt pops the next scripted outcome: either a failure
/// or a source yielding `frames_per_connection` frames before reporting
/// the connection lost. Runs out of script -> keeps succeeding.
pub struct ScriptedConnector {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    frame: Frame,
    fps: f64,
    frames_per_connection: u64,
    pub connects: AtomicU64,
}

pub enum ConnectOutcome {
    Ok,
    Fail,
}

impl ScriptedConnector {
    pub fn new(frame: Frame, fps: f64, frames_per_connection: u64, script: Vec<ConnectOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(script.into()),
            frame,
            fps,
            frames_per_connection,
            connects: AtomicU64::new(0),
        })
    }
}

impl StreamConnector for ScriptedConnector {
    fn connect(&self, url: &str, _kind: StreamKind) -> Result<Box<dyn FrameSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front().unwrap_or(ConnectOutcome::Ok);
        match outcome {
            ConnectOutcome::Fail => Err(QualscanError::SourceUnavailable(format!(
                "connection refused: {}",
                url
            ))),
            ConnectOutcome::Ok => Ok(Box::new(DrippingSource {
                frame: self.frame.clone(),
                fps: self.fps,
                remaining: self.frames_per_connection,
                emitted: 0,
            })),
        }
    }
}

/// Yields clones of one frame at a real-time-ish pace, then drops the
/// connection
struct DrippingSource {
    frame: Frame,
    fps: f64,
    remaining: u64,
    emitted: u64,
}

impl FrameSource for DrippingSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            width: self.frame.width(),
            height: self.frame.height(),
            fps: self.fps,
            duration: f64::INFINITY,
            total_frames: u64::MAX,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Err(QualscanError::ConnectionLost("stream dropped".to_string()));
        }
        self.remaining -= 1;
        self.emitted += 1;
        std::thread::sleep(std::time::Duration::from_secs_f64(1.0 / self.fps));
        Ok(Some(self.frame.clone().with_timestamp(self.emitted as f64 / self.fps)))
    }
}
