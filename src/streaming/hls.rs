//! HLS streaming handlers.
//!
//! Everything lives under one random path prefix:
//! - `GET /{prefix}/playlist.m3u8` - live media playlist
//! - `GET /{prefix}/init.mp4` - init segment (ftyp + moov), 404 until generated
//! - `GET /{prefix}/segment_{seq}.m4s` - media segment, 404 once evicted
//! - `GET /{prefix}/status` - JSON stream statistics
//!
//! Handlers only read the segment store; a request never waits for a segment.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use uuid::Uuid;

use super::clients::ClientSession;
use super::observer::{HealthReport, SegmentEvent};
use super::segment_store::{
    parse_segment_name, SegmentLookup, StoreSnapshot, INIT_SEGMENT_NAME, PLAYLIST_NAME,
};
use super::session::{SessionState, SessionStatsSnapshot};
use crate::config::QualityMode;
use crate::server::AppContext;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp4";
pub const STATUS_FILE: &str = "status";

const RECENT_ISSUES: usize = 20;

/// Body of the status endpoint.
#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub title: String,
    pub quality: QualityMode,
    pub store: StoreSnapshot,
    pub stats: SessionStatsSnapshot,
    pub clients: Vec<ClientSession>,
    pub health: HealthReport,
    pub recent_issues: Vec<String>,
}

/// Dispatch a request below the stream prefix.
pub async fn stream_file(
    State(ctx): State<AppContext>,
    Path((prefix, file)): Path<(String, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, StatusCode> {
    if prefix != ctx.path_prefix() {
        return Err(StatusCode::NOT_FOUND);
    }

    if file == STATUS_FILE {
        let headers = [(header::CACHE_CONTROL, "no-cache")];
        return Ok((headers, Json(status(&ctx))).into_response());
    }

    let client = connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    ctx.clients.touch(&client);

    match file.as_str() {
        PLAYLIST_NAME => media_playlist(&ctx),
        INIT_SEGMENT_NAME => init_segment(&ctx, &client),
        name => match parse_segment_name(name) {
            Some(sequence) => media_segment(&ctx, &client, name, sequence),
            None => Err(StatusCode::NOT_FOUND),
        },
    }
}

fn media_playlist(ctx: &AppContext) -> Result<Response, StatusCode> {
    let playlist = ctx.session().store().playlist();
    live_response(PLAYLIST_CONTENT_TYPE, Bytes::copy_from_slice(playlist.as_bytes()))
}

fn init_segment(ctx: &AppContext, client: &str) -> Result<Response, StatusCode> {
    let observer = &ctx.observer;
    observer.track(SegmentEvent::Requested, INIT_SEGMENT_NAME, None, 0);

    let Some(init) = ctx.session().store().init_segment() else {
        observer.track(SegmentEvent::NotFound, INIT_SEGMENT_NAME, None, 0);
        tracing::debug!(client = %client, "Init segment requested before stream start");
        return Err(StatusCode::NOT_FOUND);
    };

    observer.track(SegmentEvent::Served, INIT_SEGMENT_NAME, None, init.size());
    live_response(SEGMENT_CONTENT_TYPE, init.data.clone())
}

fn media_segment(
    ctx: &AppContext,
    client: &str,
    name: &str,
    sequence: u64,
) -> Result<Response, StatusCode> {
    let observer = &ctx.observer;

    match ctx.session().store().lookup(sequence) {
        SegmentLookup::Found(segment) => {
            observer.track(SegmentEvent::Requested, name, Some(sequence), 0);
            observer.track(SegmentEvent::Served, name, Some(sequence), segment.size());
            ctx.clients.record_served(client);
            live_response(SEGMENT_CONTENT_TYPE, segment.data.clone())
        }
        SegmentLookup::Evicted => {
            observer.track(SegmentEvent::Requested, name, Some(sequence), 0);
            observer.track(SegmentEvent::NotFound, name, Some(sequence), 0);
            ctx.clients.record_missed(client);
            tracing::debug!(client = %client, sequence, "Evicted segment requested");
            Err(StatusCode::NOT_FOUND)
        }
        SegmentLookup::NotYetProduced => {
            observer.track_untraced(SegmentEvent::Requested, name, Some(sequence));
            observer.track_untraced(SegmentEvent::NotFound, name, Some(sequence));
            ctx.clients.record_missed(client);
            tracing::debug!(client = %client, sequence, "Segment requested ahead of the stream");
            Err(StatusCode::NOT_FOUND)
        }
    }
}

fn status(ctx: &AppContext) -> StreamStatus {
    let session = ctx.session();
    let metadata = ctx.metadata.read().clone();
    StreamStatus {
        session_id: session.id(),
        state: session.state(),
        title: metadata.title,
        quality: metadata.quality,
        store: session.store().snapshot(),
        stats: session.stats(),
        clients: ctx.clients.list(),
        health: ctx.observer.health_report(),
        recent_issues: ctx.observer.recent_issues(RECENT_ISSUES),
    }
}

/// Response for live content: no caching, any origin, explicit length.
fn live_response(content_type: &'static str, body: Bytes) -> Result<Response, StatusCode> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventDispatcher;
    use crate::streaming::{hls_router, NoEncoderControl};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn context() -> AppContext {
        AppContext::new(
            Config::default(),
            Arc::new(EventDispatcher::new()),
            Arc::new(NoEncoderControl),
        )
    }

    async fn get(ctx: &AppContext, uri: &str) -> (StatusCode, Response) {
        let app = hls_router().with_state(ctx.clone());
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response)
    }

    #[tokio::test]
    async fn test_wrong_prefix_not_found() {
        let ctx = context();
        let (status, _) = get(&ctx, "/nope/playlist.m3u8").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_idle_playlist_has_header_only() {
        let ctx = context();
        let (status, response) = get(&ctx, &format!("/{}/playlist.m3u8", ctx.path_prefix())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PLAYLIST_CONTENT_TYPE
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("#EXTM3U\n"));
        assert!(!text.contains("#EXTINF"));
    }

    #[tokio::test]
    async fn test_init_before_start_not_found() {
        let ctx = context();
        let (status, _) = get(&ctx, &format!("/{}/init.mp4", ctx.path_prefix())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let trace = ctx.observer.trace(INIT_SEGMENT_NAME).unwrap();
        assert_eq!(trace.not_found, 1);
    }

    #[tokio::test]
    async fn test_unknown_file_not_found() {
        let ctx = context();
        for file in ["segment_x.m4s", "index.html", "segment_0.m4s"] {
            let (status, _) = get(&ctx, &format!("/{}/{}", ctx.path_prefix(), file)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", file);
        }
    }

    #[tokio::test]
    async fn test_future_segments_leave_no_trace() {
        let ctx = context();
        for seq in 1_000..1_050 {
            let (status, _) = get(&ctx, &format!("/{}/segment_{}.m4s", ctx.path_prefix(), seq)).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        assert!(ctx.observer.trace("segment_1000.m4s").is_none());
        let health = ctx.observer.health_report();
        assert_eq!(health.requests, 50);
        assert_eq!(health.not_found, 50);
    }

    #[tokio::test]
    async fn test_status_json() {
        let ctx = context();
        ctx.set_title("Garage");
        let (status, response) = get(&ctx, &format!("/{}/status", ctx.path_prefix())).await;
        assert_eq!(status, StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["title"], "Garage");
        assert_eq!(json["state"], "idle");
        assert_eq!(json["quality"], "reliable");
        assert_eq!(json["store"]["has_init_segment"], false);
    }
}
