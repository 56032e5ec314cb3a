//! Live stream workers
//!
//! One background thread per stream: connect, read frames, keep a small
//! ring of recent samples, run a detection round every
//! `detection_interval` seconds, and reconnect with jittered exponential
//! backoff when the source drops. Status, counters and the results ring
//! live behind a per-stream mutex; readers always take snapshots.
//!
//! Results are ordered by detection completion time, not by frame
//! timestamp.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use qualscan_core::config::StreamOptions;
use qualscan_core::limits::{
    BACKOFF_BASE_MS, BACKOFF_JITTER, RESULT_RING_CAPACITY, SAMPLE_RING_CAPACITY,
};
use qualscan_core::{
    Frame, ImageVerdict, QualscanError, Result, StreamDescriptor, StreamStatus, VideoVerdict,
};

use crate::pipeline::ImagePipeline;
use crate::source::{MemorySource, StreamConnector};
use crate::video::VideoPipeline;

/// One detection round's output
#[derive(Debug, Clone, Serialize)]
pub struct StreamResult {
    pub completed_at: DateTime<Utc>,
    pub verdict: StreamVerdict,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamVerdict {
    Image(ImageVerdict),
    Video(VideoVerdict),
}

/// Mutable per-stream state behind the mutex
#[derive(Debug, Clone)]
struct StreamState {
    status: StreamStatus,
    frames_received: u64,
    frames_detected: u64,
    connection_errors: u64,
    reconnect_count: u64,
    fps_ema: f64,
    last_detection_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            status: StreamStatus::Starting,
            frames_received: 0,
            frames_detected: 0,
            connection_errors: 0,
            reconnect_count: 0,
            fps_ema: 0.0,
            last_detection_time: None,
            last_error: None,
        }
    }
}

struct StreamShared {
    state: Mutex<StreamState>,
    results: Mutex<VecDeque<StreamResult>>,
    stop: AtomicBool,
}

pub struct StreamWorker {
    id: String,
    url: String,
    opts: StreamOptions,
    shared: Arc<StreamShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamWorker {
    fn spawn(
        id: String,
        url: String,
        opts: StreamOptions,
        connector: Arc<dyn StreamConnector>,
        image: Arc<ImagePipeline>,
        video: Arc<VideoPipeline>,
    ) -> Result<Arc<Self>> {
        let shared = Arc::new(StreamShared {
            state: Mutex::new(StreamState::new()),
            results: Mutex::new(VecDeque::with_capacity(RESULT_RING_CAPACITY)),
            stop: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_url = url.clone();
        let loop_opts = opts.clone();
        let thread_id = id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("qs-stream-{}", &id[..8.min(id.len())]))
            .spawn(move || {
                worker_loop(thread_id, loop_url, loop_opts, loop_shared, connector, image, video)
            })
            .map_err(|e| QualscanError::Internal(format!("stream thread: {}", e)))?;

        Ok(Arc::new(Self {
            id,
            url,
            opts,
            shared,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        let state = self.shared.state.lock().clone();
        StreamDescriptor {
            stream_id: self.id.clone(),
            url: self.url.clone(),
            kind: self.opts.kind,
            sample_interval: self.opts.sample_interval,
            detection_interval: self.opts.detection_interval,
            status: state.status,
            frames_received: state.frames_received,
            frames_detected: state.frames_detected,
            connection_errors: state.connection_errors,
            reconnect_count: state.reconnect_count,
            fps: state.fps_ema,
            last_detection_time: state.last_detection_time,
            last_error: state.last_error,
        }
    }

    pub fn results(&self, limit: usize, since: Option<DateTime<Utc>>) -> Vec<StreamResult> {
        let ring = self.shared.results.lock();
        ring.iter()
            .filter(|r| since.map(|s| r.completed_at > s).unwrap_or(true))
            .rev()
            .take(limit.max(1))
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Request stop and drain for up to `grace_seconds`; a reader stuck
    /// inside the source past the grace period is abandoned.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock();
            if !matches!(state.status, StreamStatus::Stopped | StreamStatus::Error) {
                state.status = StreamStatus::Stopping;
            }
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let grace = Duration::from_secs(self.opts.grace_seconds.max(1));
            let waited_from = Instant::now();
            while !handle.is_finished() && waited_from.elapsed() < grace {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!(stream = %self.id, "worker did not drain within grace period");
            }
        }
        let mut state = self.shared.state.lock();
        if state.status != StreamStatus::Error {
            state.status = StreamStatus::Stopped;
        }
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.shared.state.lock().status,
            StreamStatus::Stopped | StreamStatus::Error
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    id: String,
    url: String,
    opts: StreamOptions,
    shared: Arc<StreamShared>,
    connector: Arc<dyn StreamConnector>,
    image: Arc<ImagePipeline>,
    video: Arc<VideoPipeline>,
) {
    let mut backoff_ms = BACKOFF_BASE_MS;
    let backoff_cap_ms = opts.reconnect_backoff_cap_secs.max(1) * 1000;
    let mut consecutive_errors = 0u64;
    let mut ever_connected = false;
    // sample ring is only touched by this thread
    let mut ring: VecDeque<Frame> = VecDeque::with_capacity(SAMPLE_RING_CAPACITY);
    let started = Instant::now();

    'outer: while !shared.stop.load(Ordering::SeqCst) {
        let mut source = match connector.connect(&url, opts.kind) {
            Ok(source) => source,
            Err(e) => {
                consecutive_errors += 1;
                {
                    let mut state = shared.state.lock();
                    state.connection_errors += 1;
                    state.last_error = Some(e.to_string());
                    if ever_connected {
                        state.status = StreamStatus::Degraded;
                    }
                }
                tracing::warn!(stream = %id, error = %e, attempt = consecutive_errors, "connect failed");
                if consecutive_errors >= opts.max_consecutive_errors {
                    shared.state.lock().status = StreamStatus::Error;
                    break 'outer;
                }
                sleep_with_jitter(&shared, backoff_ms);
                backoff_ms = (backoff_ms * 2).min(backoff_cap_ms);
                continue;
            }
        };

        {
            let mut state = shared.state.lock();
            if ever_connected {
                state.reconnect_count += 1;
            }
            state.status = StreamStatus::Running;
        }
        tracing::info!(stream = %id, reconnect = ever_connected, "stream connected");
        ever_connected = true;
        consecutive_errors = 0;
        backoff_ms = BACKOFF_BASE_MS;

        let sample_every = Duration::from_secs_f64(opts.sample_interval);
        let detect_every = Duration::from_secs_f64(opts.detection_interval);
        let mut last_sample: Option<Instant> = None;
        let mut last_detection = Instant::now();
        let mut last_frame_at: Option<Instant> = None;

        loop {
            if shared.stop.load(Ordering::SeqCst) {
                break 'outer;
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    let now = Instant::now();
                    {
                        let mut state = shared.state.lock();
                        state.frames_received += 1;
                        if let Some(prev) = last_frame_at {
                            let dt = now.duration_since(prev).as_secs_f64().max(1e-6);
                            let inst = 1.0 / dt;
                            state.fps_ema = if state.fps_ema == 0.0 {
                                inst
                            } else {
                                0.2 * inst + 0.8 * state.fps_ema
                            };
                        }
                    }
                    last_frame_at = Some(now);

                    if last_sample.map(|t| now.duration_since(t) >= sample_every).unwrap_or(true) {
                        if ring.len() == SAMPLE_RING_CAPACITY {
                            ring.pop_front();
                        }
                        ring.push_back(
                            frame.with_timestamp(started.elapsed().as_secs_f64()),
                        );
                        last_sample = Some(now);
                    }

                    if now.duration_since(last_detection) >= detect_every && !ring.is_empty() {
                        run_detection(&id, &opts, &shared, &ring, &image, &video);
                        last_detection = now;
                    }
                }
                Ok(None) => {
                    let mut state = shared.state.lock();
                    state.status = StreamStatus::Degraded;
                    state.last_error = Some("stream ended".to_string());
                    state.connection_errors += 1;
                    drop(state);
                    consecutive_errors += 1;
                    break;
                }
                Err(e) => {
                    let mut state = shared.state.lock();
                    state.status = StreamStatus::Degraded;
                    state.last_error = Some(e.to_string());
                    state.connection_errors += 1;
                    drop(state);
                    tracing::warn!(stream = %id, error = %e, "stream read failed");
                    consecutive_errors += 1;
                    if consecutive_errors >= opts.max_consecutive_errors {
                        shared.state.lock().status = StreamStatus::Error;
                        break 'outer;
                    }
                    break;
                }
            }
        }
    }

    let mut state = shared.state.lock();
    if state.status != StreamStatus::Error {
        state.status = StreamStatus::Stopped;
    }
    tracing::info!(stream = %id, status = ?state.status, "stream worker exiting");
}

/// Detection round over a snapshot of the most recent K sampled frames
fn run_detection(
    id: &str,
    opts: &StreamOptions,
    shared: &StreamShared,
    ring: &VecDeque<Frame>,
    image: &ImagePipeline,
    video: &VideoPipeline,
) {
    let k = opts.snapshot_frames.min(ring.len()).max(1);
    let snapshot: Vec<Frame> = ring.iter().rev().take(k).rev().cloned().collect();

    let verdict = if k == 1 {
        let frame = Arc::new(snapshot.into_iter().next().expect("k >= 1"));
        match image.run(frame, &opts.detection) {
            Ok(v) => StreamVerdict::Image(v),
            Err(e) => {
                tracing::warn!(stream = %id, error = %e, "detection round failed");
                return;
            }
        }
    } else {
        let fps = 1.0 / opts.sample_interval.max(0.1);
        let sampling = qualscan_core::config::SampleOptions {
            strategy: qualscan_core::config::SampleStrategy::Interval,
            sample_interval: opts.sample_interval.max(0.1),
            max_frames: k,
        };
        let source = match MemorySource::new(snapshot, fps) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(stream = %id, error = %e, "snapshot source failed");
                return;
            }
        };
        match video.run(Box::new(source), &opts.detection, &sampling) {
            Ok(v) => StreamVerdict::Video(v),
            Err(e) => {
                tracing::warn!(stream = %id, error = %e, "detection round failed");
                return;
            }
        }
    };

    {
        let mut state = shared.state.lock();
        state.frames_detected += k as u64;
        state.last_detection_time = Some(Utc::now());
    }
    let mut results = shared.results.lock();
    if results.len() == RESULT_RING_CAPACITY {
        results.pop_front();
    }
    results.push_back(StreamResult {
        completed_at: Utc::now(),
        verdict,
    });
}

/// Stop-aware sleep with +/-25% jitter
fn sleep_with_jitter(shared: &StreamShared, base_ms: u64) {
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let total = Duration::from_millis((base_ms as f64 * (1.0 + jitter)).max(1.0) as u64);
    let slept_from = Instant::now();
    while slept_from.elapsed() < total {
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Owner of all live stream workers
pub struct StreamManager {
    connector: Arc<dyn StreamConnector>,
    image: Arc<ImagePipeline>,
    video: Arc<VideoPipeline>,
    streams: RwLock<HashMap<String, Arc<StreamWorker>>>,
}

impl StreamManager {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        image: Arc<ImagePipeline>,
        video: Arc<VideoPipeline>,
    ) -> Self {
        Self {
            connector,
            image,
            video,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn start(&self, url: &str, opts: StreamOptions) -> Result<StreamDescriptor> {
        opts.validate()?;
        let mut streams = self.streams.write();
        if streams.values().any(|w| w.url == url && w.is_active()) {
            return Err(QualscanError::Conflict(format!(
                "stream already started for {}",
                url
            )));
        }
        let id = Uuid::new_v4().to_string();
        let worker = StreamWorker::spawn(
            id.clone(),
            url.to_string(),
            opts,
            Arc::clone(&self.connector),
            Arc::clone(&self.image),
            Arc::clone(&self.video),
        )?;
        let descriptor = worker.descriptor();
        streams.insert(id, worker);
        Ok(descriptor)
    }

    pub fn stop(&self, stream_id: &str) -> Result<StreamDescriptor> {
        let worker = self.get(stream_id)?;
        worker.stop();
        Ok(worker.descriptor())
    }

    pub fn status(&self, stream_id: &str) -> Result<StreamDescriptor> {
        Ok(self.get(stream_id)?.descriptor())
    }

    pub fn results(
        &self,
        stream_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StreamResult>> {
        Ok(self.get(stream_id)?.results(limit, since))
    }

    pub fn list(&self) -> Vec<StreamDescriptor> {
        let mut out: Vec<_> = self.streams.read().values().map(|w| w.descriptor()).collect();
        out.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        out
    }

    /// Stop every worker; called on process shutdown
    pub fn shutdown(&self) {
        for worker in self.streams.read().values() {
            worker.stop();
        }
    }

    fn get(&self, stream_id: &str) -> Result<Arc<StreamWorker>> {
        self.streams
            .read()
            .get(stream_id)
            .cloned()
            .ok_or_else(|| QualscanError::NotFound(format!("stream {}", stream_id)))
    }
}

#[cfg(test)]
mod tests {
    include!("stream_test.rs");
}
