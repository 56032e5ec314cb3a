// Stream worker tests against the scripted connector: reconnect
// lifecycle, terminal errors, results ring, manager bookkeeping.

use super::*;
use crate::source::{ConnectOutcome, ScriptedConnector};
use qualscan_core::profile::ProfileStore;
use qualscan_core::synth;
use qualscan_detect::video::VideoDetectorRegistry;
use qualscan_detect::DetectorRegistry;

// ============================================================================
// Fixtures
// ============================================================================

fn manager(connector: Arc<ScriptedConnector>) -> StreamManager {
    let image = Arc::new(
        ImagePipeline::new(
            Arc::new(DetectorRegistry::with_builtins()),
            Arc::new(ProfileStore::default()),
            2,
        )
        .unwrap(),
    );
    let video = Arc::new(VideoPipeline::new(
        Arc::clone(&image),
        Arc::new(VideoDetectorRegistry::with_builtins()),
    ));
    StreamManager::new(connector, image, video)
}

fn fast_opts() -> StreamOptions {
    StreamOptions {
        sample_interval: 0.1,
        detection_interval: 1.0,
        max_consecutive_errors: 3,
        reconnect_backoff_cap_secs: 1,
        grace_seconds: 2,
        ..Default::default()
    }
}

fn test_frame() -> Frame {
    synth::gray_gradient(64, 48)
}

fn wait_for<F: Fn(&StreamDescriptor) -> bool>(
    manager: &StreamManager,
    id: &str,
    what: &str,
    timeout: Duration,
    predicate: F,
) -> StreamDescriptor {
    let deadline = Instant::now() + timeout;
    loop {
        let descriptor = manager.status(id).unwrap();
        if predicate(&descriptor) {
            return descriptor;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}: {:?}",
            what,
            descriptor
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

// ============================================================================
// Reconnect lifecycle
// ============================================================================

#[test]
fn test_stream_drop_reconnect_recovers() {
    // first connection yields ~1.5 s of frames then drops; the first
    // reconnect attempt is refused, the next succeeds
    let connector = ScriptedConnector::new(
        test_frame(),
        30.0,
        45,
        vec![ConnectOutcome::Ok, ConnectOutcome::Fail, ConnectOutcome::Ok],
    );
    let manager = manager(Arc::clone(&connector));
    let descriptor = manager.start("rtsp://cam/1", fast_opts()).unwrap();
    let id = descriptor.stream_id.clone();

    wait_for(&manager, &id, "running", Duration::from_secs(5), |d| {
        d.status == StreamStatus::Running
    });
    // connection drops, refused reconnect puts the worker in backoff
    wait_for(&manager, &id, "degraded", Duration::from_secs(5), |d| {
        d.status == StreamStatus::Degraded
    });
    let recovered = wait_for(&manager, &id, "recovered", Duration::from_secs(10), |d| {
        d.status == StreamStatus::Running && d.reconnect_count >= 1
    });
    assert!(recovered.connection_errors >= 1);
    assert!(recovered.frames_received > 0);

    // detection keeps happening on the re-established connection
    let detected = wait_for(&manager, &id, "detections", Duration::from_secs(10), |d| {
        d.frames_detected > 0
    });
    assert!(detected.last_detection_time.is_some());
    assert!(detected.fps > 0.0);

    let stopped = manager.stop(&id).unwrap();
    assert_eq!(stopped.status, StreamStatus::Stopped);
}

#[test]
fn test_consecutive_failures_terminal_error() {
    let connector = ScriptedConnector::new(
        test_frame(),
        30.0,
        10,
        vec![ConnectOutcome::Fail, ConnectOutcome::Fail, ConnectOutcome::Fail],
    );
    let manager = manager(Arc::clone(&connector));
    let descriptor = manager.start("rtsp://cam/2", fast_opts()).unwrap();
    let id = descriptor.stream_id;

    let errored = wait_for(&manager, &id, "terminal error", Duration::from_secs(15), |d| {
        d.status == StreamStatus::Error
    });
    assert_eq!(errored.connection_errors, 3);
    assert_eq!(errored.reconnect_count, 0);
    assert!(errored.last_error.is_some());
}

// ============================================================================
// Results ring
// ============================================================================

#[test]
fn test_results_accumulate_and_filter() {
    let connector = ScriptedConnector::new(test_frame(), 30.0, u64::MAX / 2, vec![]);
    let manager = manager(Arc::clone(&connector));
    let descriptor = manager.start("rtsp://cam/3", fast_opts()).unwrap();
    let id = descriptor.stream_id.clone();

    wait_for(&manager, &id, "first result", Duration::from_secs(10), |d| {
        d.frames_detected >= 1
    });
    // stop first so the ring is frozen for the assertions below
    manager.stop(&id).unwrap();

    let all = manager.results(&id, 100, None).unwrap();
    assert!(!all.is_empty());
    assert!(matches!(all[0].verdict, StreamVerdict::Image(_)));

    // ordered by completion, `since` filters strictly after
    for pair in all.windows(2) {
        assert!(pair[0].completed_at <= pair[1].completed_at);
    }
    let last = all.last().unwrap().completed_at;
    assert!(manager.results(&id, 100, Some(last)).unwrap().is_empty());
    assert_eq!(manager.results(&id, 1, None).unwrap().len(), 1);
}

// ============================================================================
// Manager bookkeeping
// ============================================================================

#[test]
fn test_duplicate_url_conflict_and_unknown_id() {
    let connector = ScriptedConnector::new(test_frame(), 30.0, u64::MAX / 2, vec![]);
    let manager = manager(Arc::clone(&connector));
    let descriptor = manager.start("rtsp://cam/4", fast_opts()).unwrap();

    let err = manager.start("rtsp://cam/4", fast_opts()).unwrap_err();
    assert!(matches!(err, QualscanError::Conflict(_)));

    assert!(matches!(
        manager.status("missing"),
        Err(QualscanError::NotFound(_))
    ));
    assert!(matches!(
        manager.stop("missing"),
        Err(QualscanError::NotFound(_))
    ));

    manager.stop(&descriptor.stream_id).unwrap();
    // a stopped stream frees its URL for a fresh start
    let second = manager.start("rtsp://cam/4", fast_opts()).unwrap();
    assert_ne!(second.stream_id, descriptor.stream_id);
    manager.stop(&second.stream_id).unwrap();
}

#[test]
fn test_stream_options_validated() {
    let connector = ScriptedConnector::new(test_frame(), 30.0, 10, vec![]);
    let manager = manager(connector);
    let bad = StreamOptions {
        detection_interval: 0.2,
        ..Default::default()
    };
    assert!(matches!(
        manager.start("rtsp://cam/5", bad),
        Err(QualscanError::Config(_))
    ));
}
