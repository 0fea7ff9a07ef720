//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a default config, an
//! [`EventDispatcher`] with a recording listener, and a full [`AppContext`].
//! The [`TestHarness::with_server`] constructor starts the stream server on
//! a random port for HTTP-level testing, and the feed helpers play the part
//! of the encoder.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use livefeed::config::{Config, StreamConfig};
use livefeed::events::{EventDispatcher, StreamListener};
use livefeed::server::{AppContext, StreamServer};
use livefeed::streaming::{EncodedFrame, EncoderEvent, NoEncoderControl};

/// Baseline 320x240 SPS without VUI, and a matching CAVLC PPS.
pub const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x0A, 0x0F, 0xC8];
pub const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

/// 10 fps keeps frame times exact in milliseconds.
pub const FRAME: Duration = Duration::from_millis(100);

/// Listener that records every event as a string.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl StreamListener for EventLog {
    fn server_started(&self, base_url: &str) {
        self.events.lock().push(format!("started {base_url}"));
    }
    fn server_stopped(&self) {
        self.events.lock().push("stopped".to_string());
    }
    fn client_connected(&self, address: &str) {
        self.events.lock().push(format!("connected {address}"));
    }
    fn client_disconnected(&self, address: &str) {
        self.events.lock().push(format!("disconnected {address}"));
    }
    fn error_occurred(&self, description: &str) {
        self.events.lock().push(format!("error {description}"));
    }
}

/// Loopback server on a random port, 1 s segments, window 2, 3 retained.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.stream = StreamConfig {
        segment_duration_secs: 1.0,
        playlist_window: 2,
        max_segments: 3,
        frame_rate: 10.0,
        validate_segments: true,
        ..StreamConfig::realtime()
    };
    config
}

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub log: Arc<EventLog>,
}

impl TestHarness {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let events = Arc::new(EventDispatcher::new());
        let log = Arc::new(EventLog::default());
        events.subscribe(log.clone());
        let ctx = AppContext::new(config, events, Arc::new(NoEncoderControl));
        Self { ctx, log }
    }

    /// Start the stream server on a random port.
    pub async fn with_server() -> (Self, StreamServer) {
        Self::with_server_config(test_config()).await
    }

    pub async fn with_server_config(config: Config) -> (Self, StreamServer) {
        let harness = Self::with_config(config);
        let server = StreamServer::start(harness.ctx.clone())
            .await
            .expect("failed to start server");
        (harness, server)
    }

    /// Deliver the parameter sets, as the encoder does before its first frame.
    pub fn start_stream(&self) {
        self.submit(EncoderEvent::ParameterSets {
            sps: Bytes::from_static(&SPS),
            pps: Bytes::from_static(&PPS),
        });
    }

    /// Frames `from..to`, with a keyframe every `gop` frames.
    pub fn feed(&self, from: u32, to: u32, gop: u32) {
        for i in from..to {
            self.submit(EncoderEvent::VideoFrame(frame(i, i % gop == 0)));
        }
    }

    pub fn submit(&self, event: EncoderEvent) {
        assert!(
            self.ctx.session().encoder_input().submit(event),
            "encoder queue rejected an event"
        );
    }
}

/// Frame `index` at 10 fps with a tiny AVCC payload.
pub fn frame(index: u32, keyframe: bool) -> EncodedFrame {
    let nal: &[u8] = if keyframe {
        &[0x65, 0x88, 0x80, 0x40]
    } else {
        &[0x41, 0x9A, 0x00, 0x20]
    };
    let mut data = (nal.len() as u32).to_be_bytes().to_vec();
    data.extend_from_slice(nal);
    let time = FRAME * index;
    EncodedFrame {
        data: Bytes::from(data),
        presentation_time: time,
        decode_time: time,
        duration: FRAME,
        is_keyframe: keyframe,
    }
}

/// Annex-B clip: SPS, PPS, then `frames` pictures with an IDR every `gop`.
pub fn annex_b_clip(frames: u32, gop: u32) -> Vec<u8> {
    let mut units: Vec<&[u8]> = vec![&SPS, &PPS];
    for i in 0..frames {
        units.push(if i % gop == 0 {
            &[0x65, 0x88, 0x80]
        } else {
            &[0x41, 0x9A, 0x00]
        });
    }
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(unit);
    }
    out
}

/// Give the segment builder time to drain its queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Absolute URL of a file below the stream prefix.
pub fn stream_url(server: &StreamServer, file: &str) -> String {
    format!("{}{}", server.base_url(), file)
}
