//! Live HLS streaming.
//!
//! The encoder feeds a [`LiveSession`], whose builder lane cuts keyframe
//! aligned fMP4 segments into a [`SegmentStore`]. The HTTP handlers in
//! [`hls`] serve the store's playlist and segments, while the
//! [`ClientTracker`] and [`SegmentObserver`] watch who fetches what.
//!
//! # Routes
//!
//! - `GET /{prefix}/playlist.m3u8` - Live media playlist
//! - `GET /{prefix}/init.mp4` - Init segment (ftyp + moov)
//! - `GET /{prefix}/segment_{seq}.m4s` - Media segment
//! - `GET /{prefix}/status` - Stream statistics

mod clients;
mod hls;
mod observer;
mod rotation;
mod segment_store;
mod session;

pub use clients::{start_sweep_task, ClientSession, ClientTracker};
pub use hls::{stream_file, StreamStatus, PLAYLIST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE};
pub use observer::{
    ComplianceIssue, HealthReport, SegmentEvent, SegmentObserver, SegmentTrace, TraceEvent,
};
pub use rotation::{RotationDecision, RotationPhase, RotationScheduler};
pub use segment_store::{
    parse_segment_name, segment_name, AppendOutcome, Segment, SegmentLookup, SegmentStore,
    StoreError, StoreLimits, StoreSnapshot, INIT_SEGMENT_NAME, PLAYLIST_NAME,
};
pub use session::{
    EncodedFrame, EncoderControl, EncoderEvent, EncoderInput, EncoderSink, LiveSession,
    NoEncoderControl,
    SessionError, SessionState, SessionStats, SessionStatsSnapshot, AUDIO_TRACK_ID,
    VIDEO_TIMESCALE, VIDEO_TRACK_ID,
};

use crate::server::AppContext;
use axum::{routing::get, Router};

/// Create the stream router.
pub fn hls_router() -> Router<AppContext> {
    Router::new().route("/:prefix/:file", get(stream_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hls_router_creation() {
        let _router: Router<AppContext> = hls_router();
    }
}
