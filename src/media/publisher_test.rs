// ============================================================================
// StreamPublisher Tests
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::StreamPublisher;
use crate::error::BridgeError;
use crate::media::lifecycle::PipelineState;
use crate::media::types::{Frame, PixelFormat, Region, StreamEndpoint};
use crate::mock_engine::MockEngine;
use crate::timebase::{MILLISECONDS, Rational};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn endpoint(fps: u32) -> StreamEndpoint {
    StreamEndpoint::builder("rtmp://localhost/live/test")
        .geometry(WIDTH, HEIGHT)
        .fps(fps)
        .build()
        .unwrap()
}

fn frame(seq: i64) -> Frame {
    Frame::new(
        vec![seq as u8; (WIDTH * HEIGHT * 3) as usize],
        WIDTH,
        HEIGHT,
        3,
        seq,
    )
    .unwrap()
}

fn publisher(engine: &MockEngine, fps: u32) -> StreamPublisher<MockEngine> {
    let _ = env_logger::builder().is_test(true).try_init();
    StreamPublisher::new(engine.clone(), endpoint(fps)).unwrap()
}

// ------------------------------------------------------------------------
// Construction and initialization
// ------------------------------------------------------------------------

#[test]
fn test_new_rejects_invalid_endpoint() {
    let engine = MockEngine::new();
    let mut ep = endpoint(30);
    ep.width = 0;
    let result = StreamPublisher::<MockEngine>::new(engine.clone(), ep);
    assert!(matches!(result, Err(BridgeError::Config(_))));
    assert_eq!(engine.state.ready_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_new_ensures_engine_ready() {
    let engine = MockEngine::new();
    let _a = publisher(&engine, 30);
    let _b = publisher(&engine, 30);
    assert_eq!(engine.state.ready_calls.load(Ordering::SeqCst), 2);

    engine.state.fail_ready.store(true, Ordering::SeqCst);
    let result = StreamPublisher::<MockEngine>::new(engine.clone(), endpoint(30));
    assert!(matches!(result, Err(BridgeError::EngineInit(_))));
}

#[test]
fn test_initialize_negotiates_encoder() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 25);
    publisher.initialize().unwrap();
    publisher.initialize().unwrap();

    assert_eq!(publisher.state(), PipelineState::Initialized);
    assert_eq!(engine.state.headers.load(Ordering::SeqCst), 1);
    // encoder, converter, writer
    assert_eq!(engine.state.live(), 3);

    let settings = engine.state.encoder_settings.lock().unwrap().clone().unwrap();
    assert_eq!(settings.codec, "libx264");
    assert_eq!((settings.width, settings.height), (WIDTH, HEIGHT));
    assert_eq!(settings.frame_rate, Rational::new(25, 1));
    assert_eq!(settings.gop, 30);
    assert_eq!(settings.quality, 23);
    assert_eq!(settings.layout.format, PixelFormat::Yuv420p);
}

#[test]
fn test_failed_initialize_releases_partial_resources() {
    let engine = MockEngine::new();
    engine.state.fail_writer.store(true, Ordering::SeqCst);
    let publisher = publisher(&engine, 30);

    let err = publisher.start().unwrap_err();
    assert!(matches!(err, BridgeError::EngineInit(_)));
    assert!(err.to_string().contains("open container writer"));
    assert_eq!(publisher.state(), PipelineState::Uninitialized);
    assert_eq!(engine.state.live(), 0);
    assert_eq!(engine.state.headers.load(Ordering::SeqCst), 0);

    engine.state.fail_encoder.store(true, Ordering::SeqCst);
    assert!(publisher.initialize().is_err());
    assert_eq!(engine.state.live(), 0);
}

// ------------------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------------------

#[test]
fn test_round_trip_writes_header_packets_trailer() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.start().unwrap();
    assert_eq!(publisher.state(), PipelineState::Running);

    for seq in 0..10 {
        assert!(publisher.push_frame(frame(seq)));
        thread::sleep(Duration::from_millis(40));
    }
    publisher.stop();

    let state = &engine.state;
    assert_eq!(publisher.state(), PipelineState::Stopped);
    assert_eq!(state.headers.load(Ordering::SeqCst), 1);
    assert_eq!(state.trailers.load(Ordering::SeqCst), 1);
    assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    assert_eq!(state.live(), 0);

    let stats = publisher.stats();
    assert_eq!(stats.frames_accepted, 10);
    assert!(stats.frames_encoded >= 1);
    assert_eq!(stats.frames_dropped, 0);
    // the flush at stop emits the delayed last packet
    assert_eq!(stats.packets_written, stats.frames_encoded);
    assert_eq!(state.written_count() as u64, stats.packets_written);

    // pts is a frame counter, independent of the capture timestamp
    let sent = state.sent_pts.lock().unwrap().clone();
    assert_eq!(sent, (0..stats.frames_encoded as i64).collect::<Vec<_>>());

    let encoder_tb = Rational::new(1, 30);
    for (k, packet) in state.written.lock().unwrap().iter().enumerate() {
        assert_eq!(packet.time_base, MILLISECONDS);
        assert_eq!(
            packet.pts,
            Some(Rational::rescale(k as i64, encoder_tb, MILLISECONDS))
        );
    }
}

#[test]
fn test_start_is_idempotent() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.start().unwrap();
    publisher.start().unwrap();
    publisher.start().unwrap();

    assert_eq!(publisher.state(), PipelineState::Running);
    assert_eq!(engine.state.live(), 3);
    assert_eq!(engine.state.headers.load(Ordering::SeqCst), 1);

    publisher.stop();
    assert_eq!(engine.state.live(), 0);
}

#[test]
fn test_stop_without_frames_is_bounded() {
    let engine = MockEngine::new();
    let publisher = Arc::new(publisher(&engine, 1));
    publisher.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    let (tx, rx) = mpsc::channel();
    {
        let publisher = publisher.clone();
        thread::spawn(move || {
            publisher.stop();
            let _ = tx.send(());
        });
    }

    rx.recv_timeout(Duration::from_secs(2))
        .expect("stop should join the worker promptly");
    assert_eq!(publisher.state(), PipelineState::Stopped);
    assert_eq!(engine.state.trailers.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state.written_count(), 0);
}

#[test]
fn test_stop_interrupts_pacing() {
    let engine = MockEngine::new();
    // one frame per second would pace for a full second
    let publisher = Arc::new(publisher(&engine, 1));
    publisher.start().unwrap();
    assert!(publisher.push_frame(frame(0)));
    thread::sleep(Duration::from_millis(50));

    let (tx, rx) = mpsc::channel();
    {
        let publisher = publisher.clone();
        thread::spawn(move || {
            publisher.stop();
            let _ = tx.send(());
        });
    }
    rx.recv_timeout(Duration::from_millis(500))
        .expect("stop should not wait out the frame interval");
    assert_eq!(publisher.stats().frames_encoded, 1);
    assert_eq!(engine.state.written_count(), 1);
}

#[test]
fn test_stop_is_idempotent_and_terminal() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.stop();
    publisher.stop();
    assert_eq!(publisher.state(), PipelineState::Stopped);
    assert!(matches!(publisher.start(), Err(BridgeError::Stopped)));
    assert!(matches!(publisher.initialize(), Err(BridgeError::Stopped)));
    assert_eq!(engine.state.live(), 0);
}

#[test]
fn test_stop_after_initialize_closes_writer() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.initialize().unwrap();
    publisher.stop();

    assert_eq!(engine.state.headers.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state.trailers.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state.closes.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state.live(), 0);
}

#[test]
fn test_drop_stops_running_publisher() {
    let engine = MockEngine::new();
    {
        let publisher = publisher(&engine, 30);
        publisher.start().unwrap();
        assert!(publisher.push_frame(frame(0)));
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(engine.state.trailers.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state.live(), 0);
}

// ------------------------------------------------------------------------
// Frame handoff behaviour
// ------------------------------------------------------------------------

#[test]
fn test_push_rejected_unless_running() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    assert!(!publisher.push_frame(frame(0)));

    publisher.initialize().unwrap();
    assert!(!publisher.push_frame(frame(0)));

    publisher.start().unwrap();
    assert!(publisher.push_frame(frame(1)));

    publisher.stop();
    assert!(!publisher.push_frame(frame(2)));
    assert_eq!(publisher.stats().frames_accepted, 1);
}

#[test]
fn test_push_raw_rejects_size_mismatch() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.start().unwrap();

    let short = vec![0u8; (WIDTH * HEIGHT * 3 - 1) as usize];
    let result = publisher.push_raw(&short, WIDTH, HEIGHT, 3, 0, &[]);
    assert!(matches!(result, Err(BridgeError::Config(_))));
    assert_eq!(publisher.stats().frames_accepted, 0);
    assert_eq!(publisher.state(), PipelineState::Running);

    let exact = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    assert!(publisher.push_raw(&exact, WIDTH, HEIGHT, 3, 0, &[]).unwrap());
    publisher.stop();
    assert!(!publisher.push_raw(&exact, WIDTH, HEIGHT, 3, 0, &[]).unwrap());
}

#[test]
fn test_latest_frame_wins_under_backpressure() {
    let engine = MockEngine::new();
    *engine.state.convert_delay.lock().unwrap() = Duration::from_millis(150);
    let publisher = publisher(&engine, 1000);
    publisher.start().unwrap();

    assert!(publisher.push_frame(frame(0)));
    // worker is now busy converting frame 0
    thread::sleep(Duration::from_millis(40));
    for seq in 1..=5 {
        assert!(publisher.push_frame(frame(seq)));
    }
    thread::sleep(Duration::from_millis(400));
    publisher.stop();

    assert_eq!(*engine.state.converted.lock().unwrap(), vec![0, 5]);
    let stats = publisher.stats();
    assert_eq!(stats.frames_accepted, 6);
    assert_eq!(stats.frames_overwritten, 4);
    assert_eq!(stats.frames_encoded, 2);
}

#[test]
fn test_regions_reach_encoder_unmodified() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 30);
    publisher.start().unwrap();

    // overlapping regions are passed through as-is
    let regions = [
        Region::new(10, 10, 100, 100, 18),
        Region::new(50, 50, 100, 100, 35),
        Region::new(10, 10, 100, 100, 18),
    ];
    assert!(publisher.push_frame(frame(0).with_regions(regions)));
    thread::sleep(Duration::from_millis(60));
    assert!(publisher.push_frame(frame(1)));
    publisher.stop();

    let hinted = engine.state.hinted.lock().unwrap().clone();
    assert_eq!(hinted.len(), 2);
    assert_eq!(hinted[0], regions.to_vec());
    assert!(hinted[1].is_empty());
}

// ------------------------------------------------------------------------
// Per-frame failures
// ------------------------------------------------------------------------

#[test]
fn test_write_failures_do_not_stop_the_loop() {
    let engine = MockEngine::new();
    engine.state.fail_packet_writes.store(true, Ordering::SeqCst);
    let publisher = publisher(&engine, 100);
    publisher.start().unwrap();

    for seq in 0..4 {
        assert!(publisher.push_frame(frame(seq)));
        thread::sleep(Duration::from_millis(30));
    }
    publisher.stop();

    let stats = publisher.stats();
    assert_eq!(stats.frames_encoded, 4);
    assert_eq!(stats.packets_written, 0);
    assert_eq!(stats.write_failures, 4);
    assert_eq!(engine.state.trailers.load(Ordering::SeqCst), 1);
}

#[test]
fn test_geometry_mismatch_drops_frame() {
    let engine = MockEngine::new();
    let publisher = publisher(&engine, 100);
    publisher.start().unwrap();

    let small = Frame::new(vec![0u8; 320 * 240 * 3], 320, 240, 3, 0).unwrap();
    assert!(publisher.push_frame(small));
    thread::sleep(Duration::from_millis(30));
    assert!(publisher.push_frame(frame(1)));
    thread::sleep(Duration::from_millis(30));
    publisher.stop();

    let stats = publisher.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_encoded, 1);
    // the dropped frame does not consume a pts
    assert_eq!(*engine.state.sent_pts.lock().unwrap(), vec![0]);
}

#[test]
fn test_encoder_rejection_skips_frame() {
    let engine = MockEngine::new();
    engine.state.fail_sends.store(1, Ordering::SeqCst);
    let publisher = publisher(&engine, 100);
    publisher.start().unwrap();

    for seq in 0..3 {
        assert!(publisher.push_frame(frame(seq)));
        thread::sleep(Duration::from_millis(30));
    }
    publisher.stop();

    let stats = publisher.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_encoded, 2);
    assert_eq!(stats.packets_written, 2);
    // no retry, and the rejected frame does not consume a pts
    assert_eq!(*engine.state.converted.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*engine.state.sent_pts.lock().unwrap(), vec![0, 1]);
}
