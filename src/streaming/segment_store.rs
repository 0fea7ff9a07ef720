//! In-memory segment store and live playlist.
//!
//! Holds the init segment and a FIFO of media segments. The advertised
//! playlist window is the newest `playlist_window` segments; up to
//! `max_segments` are retained so slow clients can still fetch segments that
//! just slid out of the playlist.
//!
//! All mutation happens under one write lock. The rendered playlist is
//! rebuilt on every change and published as an `Arc<str>`, so readers never
//! wait on rendering.

use bytes::Bytes;
use livefeed_media::hls::{MediaPlaylist, SegmentEntry};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::StreamConfig;

/// File name of the init segment.
pub const INIT_SEGMENT_NAME: &str = "init.mp4";

/// File name of the playlist.
pub const PLAYLIST_NAME: &str = "playlist.m3u8";

/// File name of the media segment with the given sequence number.
pub fn segment_name(sequence: u64) -> String {
    format!("segment_{}.m4s", sequence)
}

/// Parse a media segment file name back to its sequence number.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix("segment_")?
        .strip_suffix(".m4s")?
        .parse()
        .ok()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Initialization segment already set")]
    InitAlreadySet,

    #[error("No initialization segment; media segments cannot be stored yet")]
    NoInitSegment,

    #[error("Store is finished and accepts no more segments")]
    Finished,
}

/// Size bounds of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Segments advertised in the playlist.
    pub playlist_window: usize,
    /// Segments retained in memory; never smaller than the window.
    pub max_segments: usize,
    /// Nominal segment duration.
    pub target_duration: Duration,
}

impl StoreLimits {
    pub fn new(playlist_window: usize, max_segments: usize, target_duration: Duration) -> Self {
        let playlist_window = playlist_window.max(1);
        Self {
            playlist_window,
            max_segments: max_segments.max(playlist_window),
            target_duration,
        }
    }
}

impl From<&StreamConfig> for StoreLimits {
    fn from(config: &StreamConfig) -> Self {
        Self::new(
            config.playlist_window,
            config.max_segments,
            config.segment_duration(),
        )
    }
}

/// One stored artifact.
#[derive(Debug)]
pub struct Segment {
    /// Media sequence number; 0 for the init segment.
    pub sequence: u64,
    pub data: Bytes,
    /// Media time of the first sample.
    pub start_time: Duration,
    pub duration: Duration,
    /// A discontinuity precedes this segment.
    pub discontinuity: bool,
    pub is_init: bool,
}

impl Segment {
    pub fn file_name(&self) -> String {
        if self.is_init {
            INIT_SEGMENT_NAME.to_string()
        } else {
            segment_name(self.sequence)
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Result of [`SegmentStore::append`].
#[derive(Debug)]
pub struct AppendOutcome {
    pub segment: Arc<Segment>,
    /// Segments freed to stay within `max_segments`, oldest first.
    pub evicted: Vec<Arc<Segment>>,
}

/// Result of [`SegmentStore::lookup`].
#[derive(Debug, Clone)]
pub enum SegmentLookup {
    Found(Arc<Segment>),
    /// Produced earlier but no longer retained.
    Evicted,
    /// Not produced (yet).
    NotYetProduced,
}

/// Point-in-time summary for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub has_init_segment: bool,
    pub finished: bool,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub window_len: usize,
    pub retained: usize,
    pub retained_bytes: usize,
    pub target_duration_secs: u32,
}

struct StoreState {
    init: Option<Arc<Segment>>,
    segments: VecDeque<Arc<Segment>>,
    next_sequence: u64,
    /// Discontinuities on segments already evicted from memory.
    evicted_discontinuities: u64,
    finished: bool,
    playlist: Arc<str>,
}

/// Rolling window of segments plus the playlist describing it.
pub struct SegmentStore {
    limits: StoreLimits,
    state: RwLock<StoreState>,
}

impl SegmentStore {
    pub fn new(limits: StoreLimits) -> Self {
        let limits = StoreLimits::new(
            limits.playlist_window,
            limits.max_segments,
            limits.target_duration,
        );
        let mut state = StoreState {
            init: None,
            segments: VecDeque::with_capacity(limits.max_segments + 1),
            next_sequence: 1,
            evicted_discontinuities: 0,
            finished: false,
            playlist: Arc::from(""),
        };
        state.playlist = render(&limits, &state);
        Self {
            limits,
            state: RwLock::new(state),
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Store the init segment; it can be set once per store.
    pub fn set_init_segment(&self, data: Bytes) -> Result<Arc<Segment>, StoreError> {
        let mut state = self.state.write();
        if state.init.is_some() {
            return Err(StoreError::InitAlreadySet);
        }
        let segment = Arc::new(Segment {
            sequence: 0,
            data,
            start_time: Duration::ZERO,
            duration: Duration::ZERO,
            discontinuity: false,
            is_init: true,
        });
        state.init = Some(Arc::clone(&segment));
        state.playlist = render(&self.limits, &state);
        Ok(segment)
    }

    pub fn init_segment(&self) -> Option<Arc<Segment>> {
        self.state.read().init.clone()
    }

    /// Sequence number the next appended segment will receive.
    pub fn next_sequence(&self) -> u64 {
        self.state.read().next_sequence
    }

    /// Append a media segment, assigning the next sequence number and
    /// evicting the oldest segments beyond `max_segments`.
    pub fn append(
        &self,
        data: Bytes,
        start_time: Duration,
        duration: Duration,
        discontinuity: bool,
    ) -> Result<AppendOutcome, StoreError> {
        let mut state = self.state.write();
        if state.finished {
            return Err(StoreError::Finished);
        }
        if state.init.is_none() {
            return Err(StoreError::NoInitSegment);
        }

        let segment = Arc::new(Segment {
            sequence: state.next_sequence,
            data,
            start_time,
            duration,
            discontinuity,
            is_init: false,
        });
        state.next_sequence += 1;
        state.segments.push_back(Arc::clone(&segment));

        let mut evicted = Vec::new();
        while state.segments.len() > self.limits.max_segments {
            if let Some(old) = state.segments.pop_front() {
                if old.discontinuity {
                    state.evicted_discontinuities += 1;
                }
                evicted.push(old);
            }
        }

        state.playlist = render(&self.limits, &state);
        Ok(AppendOutcome { segment, evicted })
    }

    /// Current playlist text.
    pub fn playlist(&self) -> Arc<str> {
        Arc::clone(&self.state.read().playlist)
    }

    pub fn lookup(&self, sequence: u64) -> SegmentLookup {
        let state = self.state.read();
        let first = match state.segments.front() {
            Some(first) => first.sequence,
            None => state.next_sequence,
        };
        if sequence == 0 || sequence >= state.next_sequence {
            SegmentLookup::NotYetProduced
        } else if sequence < first {
            SegmentLookup::Evicted
        } else {
            // Retained sequence numbers are contiguous
            let index = (sequence - first) as usize;
            match state.segments.get(index) {
                Some(segment) => SegmentLookup::Found(Arc::clone(segment)),
                None => SegmentLookup::Evicted,
            }
        }
    }

    /// Segments currently advertised, oldest first.
    pub fn window(&self) -> Vec<Arc<Segment>> {
        let state = self.state.read();
        let skip = state.segments.len().saturating_sub(self.limits.playlist_window);
        state.segments.iter().skip(skip).cloned().collect()
    }

    /// Terminate the playlist; retained segments stay available.
    pub fn finish(&self) {
        let mut state = self.state.write();
        if !state.finished {
            state.finished = true;
            state.playlist = render(&self.limits, &state);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.read().finished
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        let window = Window::of(&self.limits, &state);
        StoreSnapshot {
            has_init_segment: state.init.is_some(),
            finished: state.finished,
            first_sequence: state.segments.front().map(|s| s.sequence),
            last_sequence: state.segments.back().map(|s| s.sequence),
            media_sequence: window.media_sequence,
            discontinuity_sequence: window.discontinuity_sequence,
            window_len: window.segments.len(),
            retained: state.segments.len(),
            retained_bytes: state.segments.iter().map(|s| s.size()).sum(),
            target_duration_secs: window.target_duration,
        }
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("limits", &self.limits)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// The advertised slice of the store with its derived playlist headers.
struct Window<'a> {
    segments: Vec<&'a Arc<Segment>>,
    media_sequence: u64,
    discontinuity_sequence: u64,
    target_duration: u32,
}

impl<'a> Window<'a> {
    fn of(limits: &StoreLimits, state: &'a StoreState) -> Self {
        let skip = state.segments.len().saturating_sub(limits.playlist_window);
        let hidden = state.segments.iter().take(skip);
        let segments: Vec<&Arc<Segment>> = state.segments.iter().skip(skip).collect();

        let discontinuity_sequence =
            state.evicted_discontinuities + hidden.filter(|s| s.discontinuity).count() as u64;
        let media_sequence = segments
            .first()
            .map(|s| s.sequence)
            .unwrap_or(state.next_sequence);

        // EXTINF values rounded to the nearest second may not exceed the target
        let nominal = limits.target_duration.as_secs_f64().ceil() as u32;
        let longest = segments
            .iter()
            .map(|s| s.duration.as_secs_f64().round() as u32)
            .max()
            .unwrap_or(0);

        Self {
            segments,
            media_sequence,
            discontinuity_sequence,
            target_duration: nominal.max(longest).max(1),
        }
    }
}

fn render(limits: &StoreLimits, state: &StoreState) -> Arc<str> {
    let window = Window::of(limits, state);
    let mut playlist = MediaPlaylist::live(window.target_duration);
    playlist.media_sequence = window.media_sequence;
    playlist.discontinuity_sequence = window.discontinuity_sequence;
    playlist.init_uri = state.init.as_ref().map(|_| INIT_SEGMENT_NAME.to_string());
    playlist.ended = state.finished;
    playlist.segments = window
        .segments
        .iter()
        .map(|s| SegmentEntry {
            duration: s.duration.as_secs_f64(),
            uri: s.file_name(),
            discontinuity: s.discontinuity,
        })
        .collect();
    Arc::from(playlist.render())
}
