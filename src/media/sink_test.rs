// ============================================================================
// Frame Sink Tests
// ============================================================================

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;

use super::{CallbackSink, ChannelSink, FrameSink, SinkSlot};
use crate::media::types::VideoFrame;

fn video_frame(ts: i64) -> VideoFrame {
    VideoFrame {
        data: Bytes::from(vec![ts as u8; 12]),
        width: 2,
        height: 2,
        timestamp_ms: ts,
    }
}

#[test]
fn test_callback_sink_forwards_fields() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        CallbackSink::new(move |data: &[u8], w, h, ts| {
            seen.lock().unwrap().push((data.len(), w, h, ts));
        })
    };

    sink.on_frame(&video_frame(40));
    sink.on_frame(&video_frame(80));

    assert_eq!(*seen.lock().unwrap(), vec![(12, 2, 2, 40), (12, 2, 2, 80)]);
}

#[test]
fn test_sink_slot_replace_applies_to_next_frame() {
    let slot = SinkSlot::default();
    assert!(!slot.dispatch(&video_frame(0)));

    let first = Arc::new(Mutex::new(0));
    let second = Arc::new(Mutex::new(0));
    {
        let first = first.clone();
        slot.replace(Some(Arc::new(CallbackSink::new(move |_: &[u8], _, _, _| {
            *first.lock().unwrap() += 1;
        }))));
    }
    assert!(slot.dispatch(&video_frame(1)));

    {
        let second = second.clone();
        slot.replace(Some(Arc::new(CallbackSink::new(move |_: &[u8], _, _, _| {
            *second.lock().unwrap() += 1;
        }))));
    }
    assert!(slot.dispatch(&video_frame(2)));
    assert!(slot.dispatch(&video_frame(3)));

    assert_eq!(*first.lock().unwrap(), 1);
    assert_eq!(*second.lock().unwrap(), 2);

    slot.replace(None);
    assert!(!slot.dispatch(&video_frame(4)));
}

struct ReplacingSink {
    slot: Arc<SinkSlot>,
}

impl FrameSink for ReplacingSink {
    fn on_frame(&self, _frame: &VideoFrame) {
        // must not deadlock: dispatch runs outside the slot lock
        self.slot.replace(None);
    }
}

#[test]
fn test_sink_may_replace_itself() {
    let slot = Arc::new(SinkSlot::default());
    slot.replace(Some(Arc::new(ReplacingSink { slot: slot.clone() })));
    assert!(slot.dispatch(&video_frame(1)));
    assert!(slot.current().is_none());
}

#[tokio::test]
async fn test_channel_sink_stream_in_order() {
    let (sink, mut stream) = ChannelSink::with_capacity(8);
    for ts in 0..3 {
        sink.on_frame(&video_frame(ts));
    }
    drop(sink);

    let received: Vec<i64> = stream.by_ref().map(|f| f.timestamp_ms).collect().await;
    assert_eq!(received, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_channel_sink_drops_when_full() {
    let (sink, mut stream) = ChannelSink::with_capacity(2);
    for ts in 0..5 {
        sink.on_frame(&video_frame(ts));
    }
    assert_eq!(sink.dropped(), 3);

    assert_eq!(stream.recv().await.unwrap().timestamp_ms, 0);
    assert_eq!(stream.recv().await.unwrap().timestamp_ms, 1);
}
