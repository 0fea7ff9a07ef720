//! Fragmented MP4 (fMP4) muxing.
//!
//! This module generates the fMP4 structures served over HLS:
//! - Initialization segment (ftyp + moov with one trak per track)
//! - Media segments (moof + mdat) built from batches of timed samples
//!
//! Sample times are expressed in ticks of the owning track's timescale.
//! Video payloads are AVCC framed (4-byte big-endian NAL unit lengths).

mod boxes;
mod codec;
mod init;
pub mod inspect;
mod moof;
pub mod validate;

pub use codec::{build_avcc, build_esds};
pub use init::{build_ftyp, build_moov};
pub use moof::{build_mdat, build_moof, NON_SYNC_SAMPLE_FLAGS, SYNC_SAMPLE_FLAGS};

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec-specific parameters of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackParams {
    /// H.264 video; SPS and PPS are full NAL units without start codes.
    Video {
        width: u32,
        height: u32,
        sps: Bytes,
        pps: Bytes,
    },
    /// AAC audio with its AudioSpecificConfig.
    Audio {
        sample_rate: u32,
        channel_count: u16,
        audio_specific_config: Bytes,
    },
}

/// Immutable configuration of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    /// Track id, unique within a muxer.
    pub track_id: u32,
    /// Ticks per second for sample times.
    pub timescale: u32,
    pub params: TrackParams,
}

impl TrackConfig {
    /// Create an H.264 video track.
    pub fn video(track_id: u32, timescale: u32, width: u32, height: u32, sps: Bytes, pps: Bytes) -> Self {
        Self {
            track_id,
            timescale,
            params: TrackParams::Video {
                width,
                height,
                sps,
                pps,
            },
        }
    }

    /// Create an AAC audio track; the timescale is the sample rate.
    pub fn audio(track_id: u32, sample_rate: u32, channel_count: u16, audio_specific_config: Bytes) -> Self {
        Self {
            track_id,
            timescale: sample_rate,
            params: TrackParams::Audio {
                sample_rate,
                channel_count,
                audio_specific_config,
            },
        }
    }

    /// Media kind of this track.
    pub fn kind(&self) -> MediaKind {
        match self.params {
            TrackParams::Video { .. } => MediaKind::Video,
            TrackParams::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Nearest tick for a wall duration.
    pub fn ticks(&self, duration: Duration) -> u64 {
        ((duration.as_nanos() * u128::from(self.timescale) + 500_000_000) / 1_000_000_000) as u64
    }
}

/// One encoded access unit.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    /// Presentation time in track ticks.
    pub presentation_time: u64,
    /// Decode time in track ticks.
    pub decode_time: u64,
    /// Duration in track ticks.
    pub duration: u32,
    /// Keyframe / sync sample.
    pub is_sync: bool,
    pub track_id: u32,
}

impl Sample {
    /// Signed composition offset (presentation minus decode time).
    pub fn composition_offset(&self) -> i32 {
        let offset = self.presentation_time as i64 - self.decode_time as i64;
        offset.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

/// A muxed moof + mdat pair.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    pub data: Bytes,
    /// Sum of sample durations of the video track (or the first track).
    pub duration: Duration,
    pub sample_count: usize,
}

/// Samples of one track inside a fragment, in mdat order.
#[derive(Debug)]
pub struct TrackRun<'a> {
    pub track: &'a TrackConfig,
    /// tfdt value in track ticks.
    pub base_decode_time: u64,
    pub samples: Vec<&'a Sample>,
}

/// Fragmented MP4 muxer for a set of tracks.
#[derive(Debug, Default)]
pub struct Fmp4Muxer {
    tracks: BTreeMap<u32, TrackConfig>,
    stream_start: Option<Duration>,
}

impl Fmp4Muxer {
    /// Create a muxer with no tracks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track; ids must be unique.
    pub fn add_track(&mut self, track: TrackConfig) -> Result<()> {
        if self.tracks.contains_key(&track.track_id) {
            return Err(Error::DuplicateTrack(track.track_id));
        }
        self.tracks.insert(track.track_id, track);
        Ok(())
    }

    /// Remove a track, returning its configuration.
    pub fn remove_track(&mut self, track_id: u32) -> Option<TrackConfig> {
        self.tracks.remove(&track_id)
    }

    /// Remove every track.
    pub fn remove_all_tracks(&mut self) {
        self.tracks.clear();
    }

    /// Configured tracks in ascending id order.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackConfig> {
        self.tracks.values()
    }

    /// Forget the latched stream start; the next segment starts at decode time zero.
    pub fn reset_stream_start_time(&mut self) {
        self.stream_start = None;
    }

    /// Build the initialization segment (ftyp + moov).
    pub fn create_initialization_segment(&self) -> Result<Bytes> {
        if self.tracks.is_empty() {
            return Err(Error::NoTracks);
        }
        let mut buf = BytesMut::with_capacity(1024);
        buf.extend_from_slice(&build_ftyp());
        buf.extend_from_slice(&build_moov(self.tracks.values())?);
        Ok(buf.freeze())
    }

    /// Build a media segment (moof + mdat) from a batch of samples.
    ///
    /// Samples must be in decode order per track, with decode times on the
    /// same clock as `base_media_time`. The first segment after construction
    /// or reset latches `base_media_time` as the stream start, and each
    /// track's `tfdt` is its first sample's decode time relative to it.
    pub fn create_media_segment(
        &mut self,
        samples: &[Sample],
        sequence_number: u32,
        base_media_time: Duration,
    ) -> Result<MediaSegment> {
        if self.tracks.is_empty() {
            return Err(Error::NoTracks);
        }
        if samples.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if let Some(unknown) = samples.iter().find(|s| !self.tracks.contains_key(&s.track_id)) {
            return Err(Error::UnknownTrack(unknown.track_id));
        }

        let start = *self.stream_start.get_or_insert(base_media_time);

        let runs: Vec<TrackRun> = self
            .tracks
            .values()
            .filter_map(|track| {
                let track_samples: Vec<&Sample> = samples
                    .iter()
                    .filter(|s| s.track_id == track.track_id)
                    .collect();
                if track_samples.is_empty() {
                    return None;
                }
                let first_decode = track_samples[0].decode_time;
                Some(TrackRun {
                    track,
                    base_decode_time: first_decode.saturating_sub(track.ticks(start)),
                    samples: track_samples,
                })
            })
            .collect();

        let moof = build_moof(sequence_number, &runs)?;
        let mdat = build_mdat(&runs);

        let timing_run = runs
            .iter()
            .find(|r| r.track.kind() == MediaKind::Video)
            .or_else(|| runs.first());
        let duration = timing_run
            .map(|run| {
                let ticks: u64 = run.samples.iter().map(|s| u64::from(s.duration)).sum();
                ticks_to_duration(ticks, run.track.timescale)
            })
            .unwrap_or_default();

        let mut buf = BytesMut::with_capacity(moof.len() + mdat.len());
        buf.extend_from_slice(&moof);
        buf.extend_from_slice(&mdat);

        Ok(MediaSegment {
            data: buf.freeze(),
            duration,
            sample_count: samples.len(),
        })
    }

    /// Build a video-only segment from one NAL unit per frame.
    ///
    /// Each NAL unit (no start code) becomes one sample of `frame_duration`
    /// ticks on the first video track, the first one at `base_media_time`.
    pub fn create_video_segment_from_nalus(
        &mut self,
        nalus: &[Bytes],
        keyframes: &[bool],
        frame_duration: u32,
        sequence_number: u32,
        base_media_time: Duration,
    ) -> Result<MediaSegment> {
        if nalus.len() != keyframes.len() {
            return Err(Error::SampleMismatch {
                samples: nalus.len(),
                flags: keyframes.len(),
            });
        }
        let (track_id, first_tick) = self
            .tracks
            .values()
            .find(|t| t.kind() == MediaKind::Video)
            .map(|t| (t.track_id, t.ticks(base_media_time)))
            .ok_or(Error::NoTracks)?;

        let samples: Vec<Sample> = nalus
            .iter()
            .zip(keyframes)
            .enumerate()
            .map(|(i, (nalu, &is_sync))| {
                let mut data = BytesMut::with_capacity(nalu.len() + 4);
                data.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
                data.extend_from_slice(nalu);
                let time = first_tick + i as u64 * u64::from(frame_duration);
                Sample {
                    data: data.freeze(),
                    presentation_time: time,
                    decode_time: time,
                    duration: frame_duration,
                    is_sync,
                    track_id,
                }
            })
            .collect();

        self.create_media_segment(&samples, sequence_number, base_media_time)
    }
}

fn ticks_to_duration(ticks: u64, timescale: u32) -> Duration {
    if timescale == 0 {
        return Duration::ZERO;
    }
    let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(timescale);
    Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
}
