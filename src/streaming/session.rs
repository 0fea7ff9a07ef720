//! Live streaming session.
//!
//! The encoder pushes [`EncoderEvent`]s through a cloneable [`EncoderInput`]
//! that never blocks. A single builder task drains the queue, groups frames
//! into keyframe-aligned batches, muxes each batch into an fMP4 fragment,
//! and publishes it to the [`SegmentStore`]. HTTP handlers only read the
//! store, so segment building never waits on clients.
//!
//! ```text
//! Idle --parameter sets--> Initializing --init segment--> Active --stop--> Stopped
//!                               |
//!                               +--failure--> Idle
//! ```

use bytes::Bytes;
use livefeed_media::fmp4::validate::{validate_init_segment, validate_media_segment};
use livefeed_media::{Fmp4Muxer, Sample, TrackConfig};
use livefeed_probe::h264::{add_vui_timing, decode_pps, decode_sps, meets_hls_requirements};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::observer::{SegmentEvent, SegmentObserver};
use super::rotation::{RotationDecision, RotationScheduler};
use super::segment_store::{
    SegmentStore, StoreLimits, INIT_SEGMENT_NAME, PLAYLIST_NAME,
};
use crate::config::StreamConfig;
use crate::events::EventDispatcher;

/// Track id of the H.264 track.
pub const VIDEO_TRACK_ID: u32 = 1;
/// Track id of the AAC track.
pub const AUDIO_TRACK_ID: u32 = 2;
/// Timescale of the video track.
pub const VIDEO_TIMESCALE: u32 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Parameter sets rejected: {0}")]
    InvalidParameterSets(String),

    #[error("Could not generate the initialization segment: {0}")]
    AssetGenerationFailed(String),

    #[error("Parameter sets changed while streaming; restart the session")]
    ParameterSetsChanged,

    #[error("Encoder error: {0}")]
    Encoder(String),
}

/// One encoded access unit from the encoder.
///
/// Video payloads are AVCC framed; audio payloads are raw AAC frames.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub presentation_time: Duration,
    pub decode_time: Duration,
    pub duration: Duration,
    pub is_keyframe: bool,
}

#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// SPS and PPS NAL units without start codes.
    ParameterSets { sps: Bytes, pps: Bytes },
    AudioConfig {
        sample_rate: u32,
        channel_count: u16,
        config: Bytes,
    },
    VideoFrame(EncodedFrame),
    AudioFrame(EncodedFrame),
    EncoderError(String),
}

/// Lets the session ask the encoder for an IDR frame.
pub trait EncoderControl: Send + Sync {
    fn request_keyframe(&self);
}

/// For encoders that cannot be steered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEncoderControl;

impl EncoderControl for NoEncoderControl {
    fn request_keyframe(&self) {}
}

#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub segments_produced: AtomicU64,
    pub segments_failed: AtomicU64,
    pub bytes_produced: AtomicU64,
    pub keyframe_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub segments_produced: u64,
    pub segments_failed: u64,
    pub bytes_produced: u64,
    pub keyframe_requests: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            segments_produced: self.segments_produced.load(Ordering::Relaxed),
            segments_failed: self.segments_failed.load(Ordering::Relaxed),
            bytes_produced: self.bytes_produced.load(Ordering::Relaxed),
            keyframe_requests: self.keyframe_requests.load(Ordering::Relaxed),
        }
    }
}

/// Where an encoder delivers its output.
pub trait EncoderSink: Send + Sync {
    /// Queue an event without blocking; returns false if it was dropped.
    fn submit(&self, event: EncoderEvent) -> bool;

    /// False once the sink will never accept events again.
    fn is_accepting(&self) -> bool;

    /// Session currently receiving events. A change means the encoder must
    /// deliver its parameter sets again.
    fn session_id(&self) -> Uuid;
}

/// Non-blocking sink for encoder output, bound to one session.
#[derive(Clone)]
pub struct EncoderInput {
    session_id: Uuid,
    tx: mpsc::Sender<EncoderEvent>,
    accepting: Arc<AtomicBool>,
    overflowed: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
}

impl EncoderInput {
    /// Queue an event; returns false if it was dropped.
    ///
    /// A dropped frame breaks the GOP it belongs to, so the builder resyncs
    /// at the next keyframe and marks a discontinuity.
    pub fn submit(&self, event: EncoderEvent) -> bool {
        let is_frame = matches!(
            event,
            EncoderEvent::VideoFrame(_) | EncoderEvent::AudioFrame(_)
        );
        if is_frame {
            self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        }
        if !self.accepting.load(Ordering::Acquire) {
            if is_frame {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            return false;
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.overflowed.store(true, Ordering::Release);
                if is_frame {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                } else {
                    tracing::error!(event = ?event_kind(&event), "Encoder queue full, control event dropped");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if is_frame {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                false
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

impl<T: EncoderSink + ?Sized> EncoderSink for Arc<T> {
    fn submit(&self, event: EncoderEvent) -> bool {
        (**self).submit(event)
    }

    fn is_accepting(&self) -> bool {
        (**self).is_accepting()
    }

    fn session_id(&self) -> Uuid {
        (**self).session_id()
    }
}

impl EncoderSink for EncoderInput {
    fn submit(&self, event: EncoderEvent) -> bool {
        EncoderInput::submit(self, event)
    }

    fn is_accepting(&self) -> bool {
        EncoderInput::is_accepting(self)
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }
}

fn event_kind(event: &EncoderEvent) -> &'static str {
    match event {
        EncoderEvent::ParameterSets { .. } => "parameter_sets",
        EncoderEvent::AudioConfig { .. } => "audio_config",
        EncoderEvent::VideoFrame(_) => "video_frame",
        EncoderEvent::AudioFrame(_) => "audio_frame",
        EncoderEvent::EncoderError(_) => "encoder_error",
    }
}

struct Shared {
    state: RwLock<SessionState>,
    store: Arc<SegmentStore>,
    stats: Arc<SessionStats>,
    observer: Arc<SegmentObserver>,
    events: Arc<EventDispatcher>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Session state changed");
        }
    }
}

/// A running stream: encoder intake, segment builder, and segment store.
pub struct LiveSession {
    id: Uuid,
    config: StreamConfig,
    shared: Arc<Shared>,
    input: EncoderInput,
    control: Arc<dyn EncoderControl>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    /// Start the builder lane. Must be called inside a tokio runtime.
    pub fn spawn(
        config: StreamConfig,
        store: Arc<SegmentStore>,
        observer: Arc<SegmentObserver>,
        events: Arc<EventDispatcher>,
        control: Arc<dyn EncoderControl>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(SessionStats::default());
        let overflowed = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            state: RwLock::new(SessionState::Idle),
            store,
            stats: Arc::clone(&stats),
            observer,
            events,
        });
        let id = Uuid::new_v4();
        let input = EncoderInput {
            session_id: id,
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
            overflowed: Arc::clone(&overflowed),
            stats,
        };

        let cancel = CancellationToken::new();
        let builder = SegmentBuilder::new(
            config.clone(),
            Arc::clone(&shared),
            Arc::clone(&control),
            overflowed,
        );
        let task = tokio::spawn(builder.run(rx, cancel.clone()));

        tracing::info!(
            session_id = %id,
            quality = %config.quality,
            segment_secs = config.segment_duration_secs,
            window = config.playlist_window,
            "Live session started"
        );

        Self {
            id,
            config,
            shared,
            input,
            control,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.shared.store
    }

    pub fn observer(&self) -> &Arc<SegmentObserver> {
        &self.shared.observer
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Sink for the encoder collaborator.
    pub fn encoder_input(&self) -> EncoderInput {
        self.input.clone()
    }

    /// Stop intake, discard the partial segment, and terminate the playlist.
    ///
    /// Stored segments stay available until the session is dropped.
    pub async fn stop(&self) {
        self.input.accepting.store(false, Ordering::Release);
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.id, "Segment builder panicked: {}", e);
            }
        }

        self.shared.store.finish();
        self.shared
            .observer
            .track(SegmentEvent::PlaylistUpdated, PLAYLIST_NAME, None, 0);
        self.shared.set_state(SessionState::Stopped);
        tracing::info!(session_id = %self.id, stats = ?self.stats(), "Live session stopped");
    }

    /// Stop this session and start a fresh one with a new store, so the next
    /// parameter sets produce a new init segment.
    pub async fn restart(&self) -> LiveSession {
        self.stop().await;
        let store = Arc::new(SegmentStore::new(StoreLimits::from(&self.config)));
        LiveSession::spawn(
            self.config.clone(),
            store,
            Arc::clone(&self.shared.observer),
            Arc::clone(&self.shared.events),
            Arc::clone(&self.control),
        )
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

struct AudioParams {
    sample_rate: u32,
    channel_count: u16,
    config: Bytes,
}

/// State owned by the builder task.
struct SegmentBuilder {
    config: StreamConfig,
    shared: Arc<Shared>,
    control: Arc<dyn EncoderControl>,
    overflowed: Arc<AtomicBool>,
    muxer: Fmp4Muxer,
    scheduler: RotationScheduler,
    /// Parameter sets as received, for change detection.
    parameter_sets: Option<(Bytes, Bytes)>,
    audio: Option<AudioParams>,
    audio_enabled: bool,
    batch: Vec<Sample>,
    batch_start: Option<Duration>,
    awaiting_keyframe: bool,
    pending_discontinuity: bool,
}

impl SegmentBuilder {
    fn new(
        config: StreamConfig,
        shared: Arc<Shared>,
        control: Arc<dyn EncoderControl>,
        overflowed: Arc<AtomicBool>,
    ) -> Self {
        let scheduler = RotationScheduler::new(config.segment_duration(), config.max_keyframe_wait());
        Self {
            config,
            shared,
            control,
            overflowed,
            muxer: Fmp4Muxer::new(),
            scheduler,
            parameter_sets: None,
            audio: None,
            audio_enabled: false,
            batch: Vec::new(),
            batch_start: None,
            awaiting_keyframe: true,
            pending_discontinuity: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<EncoderEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        if !self.batch.is_empty() {
            tracing::debug!(samples = self.batch.len(), "Discarding partial segment");
        }
    }

    fn handle(&mut self, event: EncoderEvent) {
        match event {
            EncoderEvent::ParameterSets { sps, pps } => self.on_parameter_sets(sps, pps),
            EncoderEvent::AudioConfig {
                sample_rate,
                channel_count,
                config,
            } => self.on_audio_config(sample_rate, channel_count, config),
            EncoderEvent::VideoFrame(frame) => self.on_video_frame(frame),
            EncoderEvent::AudioFrame(frame) => self.on_audio_frame(frame),
            EncoderEvent::EncoderError(message) => {
                let err = SessionError::Encoder(message);
                self.shared.events.error_occurred(&err.to_string());
            }
        }
    }

    fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    fn on_parameter_sets(&mut self, sps: Bytes, pps: Bytes) {
        match self.state() {
            SessionState::Idle => {
                self.shared.set_state(SessionState::Initializing);
                match self.initialize(&sps, &pps) {
                    Ok(()) => {
                        self.parameter_sets = Some((sps, pps));
                        self.shared.set_state(SessionState::Active);
                    }
                    Err(e) => {
                        self.muxer.remove_all_tracks();
                        self.audio_enabled = false;
                        self.shared.events.error_occurred(&e.to_string());
                        self.shared.set_state(SessionState::Idle);
                    }
                }
            }
            SessionState::Active => {
                let unchanged = self
                    .parameter_sets
                    .as_ref()
                    .is_some_and(|(s, p)| *s == sps && *p == pps);
                if !unchanged {
                    let err = SessionError::ParameterSetsChanged;
                    self.shared.events.error_occurred(&err.to_string());
                }
            }
            SessionState::Initializing | SessionState::Stopped => {}
        }
    }

    /// Validate the parameter sets, configure tracks, and store the init segment.
    fn initialize(&mut self, sps: &Bytes, pps: &Bytes) -> Result<(), SessionError> {
        let sps_info = decode_sps(sps);
        let pps_info = decode_pps(pps);

        let sps = match meets_hls_requirements(&sps_info, &pps_info) {
            Ok(()) => sps.clone(),
            Err(issues) if self.config.inject_vui_timing && issues.iter().all(|i| i.is_fixable()) => {
                let patched = add_vui_timing(sps, self.config.frame_rate)
                    .map_err(|e| SessionError::InvalidParameterSets(e.to_string()))?;
                tracing::info!(
                    frame_rate = self.config.frame_rate,
                    "Injected VUI timing into SPS"
                );
                Bytes::from(patched)
            }
            Err(issues) => {
                let issues: Vec<String> = issues.iter().map(ToString::to_string).collect();
                return Err(SessionError::InvalidParameterSets(issues.join("; ")));
            }
        };

        for warning in sps_info.warnings.iter().chain(&pps_info.warnings) {
            tracing::warn!("Parameter set warning: {}", warning);
        }

        self.muxer.remove_all_tracks();
        self.muxer
            .add_track(TrackConfig::video(
                VIDEO_TRACK_ID,
                VIDEO_TIMESCALE,
                sps_info.width,
                sps_info.height,
                sps,
                pps.clone(),
            ))
            .map_err(|e| SessionError::AssetGenerationFailed(e.to_string()))?;
        if let Some(audio) = &self.audio {
            self.muxer
                .add_track(TrackConfig::audio(
                    AUDIO_TRACK_ID,
                    audio.sample_rate,
                    audio.channel_count,
                    audio.config.clone(),
                ))
                .map_err(|e| SessionError::AssetGenerationFailed(e.to_string()))?;
            self.audio_enabled = true;
        }

        let init = self
            .muxer
            .create_initialization_segment()
            .map_err(|e| SessionError::AssetGenerationFailed(e.to_string()))?;
        if self.config.validate_segments {
            let report = validate_init_segment(&init);
            if !report.is_valid {
                return Err(SessionError::AssetGenerationFailed(report.errors.join("; ")));
            }
        }

        let size = init.len();
        self.shared
            .store
            .set_init_segment(init)
            .map_err(|e| SessionError::AssetGenerationFailed(e.to_string()))?;
        self.muxer.reset_stream_start_time();

        let observer = &self.shared.observer;
        observer.track(SegmentEvent::Created, INIT_SEGMENT_NAME, None, size);
        observer.track(SegmentEvent::Stored, INIT_SEGMENT_NAME, None, size);
        observer.track(SegmentEvent::PlaylistUpdated, PLAYLIST_NAME, None, 0);

        tracing::info!(
            width = sps_info.width,
            height = sps_info.height,
            profile = sps_info.profile_name(),
            level = %sps_info.level_name(),
            audio = self.audio_enabled,
            "Initialization segment ready"
        );
        Ok(())
    }

    fn on_audio_config(&mut self, sample_rate: u32, channel_count: u16, config: Bytes) {
        if self.state() == SessionState::Active {
            if !self.audio_enabled {
                tracing::warn!("Audio configured after the init segment; audio is ignored until restart");
            }
            return;
        }
        self.audio = Some(AudioParams {
            sample_rate,
            channel_count,
            config,
        });
    }

    fn on_video_frame(&mut self, frame: EncodedFrame) {
        if self.state() != SessionState::Active {
            self.drop_frame();
            return;
        }

        if self.overflowed.swap(false, Ordering::AcqRel) {
            tracing::warn!("Encoder queue overflowed; resyncing at next keyframe");
            self.cut_segment();
            self.scheduler.reset();
            self.awaiting_keyframe = true;
            self.pending_discontinuity = true;
        }

        let now = frame.decode_time;
        if self.awaiting_keyframe {
            if !frame.is_keyframe {
                self.drop_frame();
                return;
            }
            self.awaiting_keyframe = false;
            self.begin_segment(now);
        } else {
            if self.scheduler.on_timer(now) == RotationDecision::KeyframeOverdue {
                tracing::warn!(
                    media_time_ms = now.as_millis() as u64,
                    "Keyframe overdue; requesting one from the encoder"
                );
                self.shared
                    .stats
                    .keyframe_requests
                    .fetch_add(1, Ordering::Relaxed);
                self.control.request_keyframe();
            }
            if frame.is_keyframe && self.scheduler.on_keyframe(now) == RotationDecision::Rotate {
                self.cut_segment();
                self.begin_segment(now);
            }
        }

        self.batch.push(Sample {
            data: frame.data,
            presentation_time: ticks(frame.presentation_time, VIDEO_TIMESCALE),
            decode_time: ticks(frame.decode_time, VIDEO_TIMESCALE),
            duration: ticks(frame.duration, VIDEO_TIMESCALE) as u32,
            is_sync: frame.is_keyframe,
            track_id: VIDEO_TRACK_ID,
        });
    }

    fn on_audio_frame(&mut self, frame: EncodedFrame) {
        // Audio joins the segment opened by the video keyframe
        let Some(audio) = self.audio.as_ref().filter(|_| self.audio_enabled) else {
            self.drop_frame();
            return;
        };
        if self.state() != SessionState::Active || self.batch_start.is_none() {
            self.drop_frame();
            return;
        }
        let timescale = audio.sample_rate;
        self.batch.push(Sample {
            data: frame.data,
            presentation_time: ticks(frame.presentation_time, timescale),
            decode_time: ticks(frame.decode_time, timescale),
            duration: ticks(frame.duration, timescale) as u32,
            is_sync: true,
            track_id: AUDIO_TRACK_ID,
        });
    }

    fn drop_frame(&self) {
        self.shared
            .stats
            .frames_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    fn begin_segment(&mut self, now: Duration) {
        self.scheduler.segment_started(now);
        self.batch_start = Some(now);
    }

    /// Mux the current batch and publish it. Failures skip the segment.
    fn cut_segment(&mut self) {
        let Some(start) = self.batch_start.take() else {
            return;
        };
        let samples = std::mem::take(&mut self.batch);
        if samples.is_empty() {
            return;
        }

        let store = &self.shared.store;
        let observer = &self.shared.observer;
        let stats = &self.shared.stats;
        let sequence = store.next_sequence();
        // mfhd carries 32 bits
        let fragment_sequence = sequence as u32;

        let segment = match self.muxer.create_media_segment(&samples, fragment_sequence, start) {
            Ok(segment) => segment,
            Err(e) => {
                self.segment_failed(sequence, &format!("Muxing segment {} failed: {}", sequence, e));
                return;
            }
        };

        if self.config.validate_segments {
            let report = validate_media_segment(&segment.data, fragment_sequence);
            if !report.is_valid {
                self.segment_failed(
                    sequence,
                    &format!(
                        "Segment {} failed validation: {}",
                        sequence,
                        report.errors.join("; ")
                    ),
                );
                return;
            }
        }

        let size = segment.data.len();
        let discontinuity = std::mem::take(&mut self.pending_discontinuity);
        match store.append(segment.data, start, segment.duration, discontinuity) {
            Ok(outcome) => {
                let name = outcome.segment.file_name();
                observer.track(SegmentEvent::Created, &name, Some(sequence), size);
                observer.track(SegmentEvent::Stored, &name, Some(sequence), size);
                for old in &outcome.evicted {
                    observer.track(SegmentEvent::Removed, &old.file_name(), Some(old.sequence), 0);
                }
                observer.track(SegmentEvent::PlaylistUpdated, PLAYLIST_NAME, None, 0);

                stats.segments_produced.fetch_add(1, Ordering::Relaxed);
                stats.bytes_produced.fetch_add(size as u64, Ordering::Relaxed);
                tracing::debug!(
                    sequence,
                    size,
                    samples = segment.sample_count,
                    duration_ms = segment.duration.as_millis() as u64,
                    discontinuity,
                    evicted = outcome.evicted.len(),
                    "Segment published"
                );
            }
            Err(e) => {
                self.pending_discontinuity = discontinuity;
                tracing::warn!(sequence, "Segment not stored: {}", e);
            }
        }
    }

    fn segment_failed(&mut self, sequence: u64, description: &str) {
        tracing::warn!(sequence, "{}", description);
        self.shared
            .stats
            .segments_failed
            .fetch_add(1, Ordering::Relaxed);
        self.shared.observer.record_failure(description);
        self.pending_discontinuity = true;
    }
}

/// Nearest tick of `timescale` for a media time.
fn ticks(time: Duration, timescale: u32) -> u64 {
    ((time.as_nanos() * u128::from(timescale) + 500_000_000) / 1_000_000_000) as u64
}
