//! H.264 Annex-B elementary stream source.
//!
//! Reads a raw `.h264` file, splits it into access units, and replays them
//! in real time through an [`EncoderSink`] as if a camera encoder produced
//! them.

use bytes::Bytes;
use livefeed_probe::h264::{nal_unit_type, remove_emulation_prevention, split_annex_b, to_avcc, NalUnitType};
use livefeed_probe::BitstreamReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::streaming::{EncodedFrame, EncoderEvent, EncoderSink, VIDEO_TIMESCALE};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream has no SPS/PPS")]
    NoParameterSets,

    #[error("Stream has no coded pictures")]
    NoFrames,

    #[error("Invalid frame rate {0}")]
    InvalidFrameRate(f64),
}

/// One coded picture and the SEI preceding it.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub nal_units: Vec<Bytes>,
    pub is_keyframe: bool,
}

impl AccessUnit {
    /// Payload with 4-byte length prefixes.
    pub fn to_avcc(&self) -> Bytes {
        Bytes::from(to_avcc(self.nal_units.iter().map(|n| n.as_ref())))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedStream {
    /// First SPS and PPS in the stream.
    pub sps: Bytes,
    pub pps: Bytes,
    pub access_units: Vec<AccessUnit>,
}

/// Group the NAL units of an Annex-B stream into access units.
///
/// A new access unit starts at an AUD, SPS, PPS or SEI, or at a slice with
/// `first_mb_in_slice == 0` once the current unit holds a slice. Parameter
/// sets are kept apart; only the first of each is used.
pub fn parse_annex_b(data: &[u8]) -> Result<ParsedStream, SourceError> {
    let mut sps = None;
    let mut pps = None;
    let mut access_units = Vec::new();
    let mut current = PendingUnit::default();

    for nal in split_annex_b(data) {
        let Some(&header) = nal.first() else { continue };
        let kind = nal_unit_type(header);

        match kind {
            NalUnitType::Sps => {
                current.flush_into(&mut access_units);
                sps.get_or_insert_with(|| Bytes::copy_from_slice(nal));
            }
            NalUnitType::Pps => {
                current.flush_into(&mut access_units);
                pps.get_or_insert_with(|| Bytes::copy_from_slice(nal));
            }
            NalUnitType::Aud => current.flush_into(&mut access_units),
            NalUnitType::Sei => {
                current.flush_into(&mut access_units);
                current.nal_units.push(Bytes::copy_from_slice(nal));
            }
            kind if kind.is_vcl() => {
                if current.has_slice && first_mb_in_slice(nal) == Some(0) {
                    current.flush_into(&mut access_units);
                }
                current.has_slice = true;
                current.is_keyframe |= kind == NalUnitType::IdrSlice;
                current.nal_units.push(Bytes::copy_from_slice(nal));
            }
            // End of sequence/stream, filler and reserved types carry no picture data
            _ => {}
        }
    }
    current.flush_into(&mut access_units);

    let (Some(sps), Some(pps)) = (sps, pps) else {
        return Err(SourceError::NoParameterSets);
    };
    if access_units.is_empty() {
        return Err(SourceError::NoFrames);
    }

    Ok(ParsedStream {
        sps,
        pps,
        access_units,
    })
}

#[derive(Default)]
struct PendingUnit {
    nal_units: Vec<Bytes>,
    has_slice: bool,
    is_keyframe: bool,
}

impl PendingUnit {
    /// Emit the unit if it holds a slice; leading SEI waits for one.
    fn flush_into(&mut self, out: &mut Vec<AccessUnit>) {
        if !self.has_slice {
            return;
        }
        let unit = std::mem::take(self);
        out.push(AccessUnit {
            nal_units: unit.nal_units,
            is_keyframe: unit.is_keyframe,
        });
    }
}

fn first_mb_in_slice(nal: &[u8]) -> Option<u32> {
    // ue(v) of a 32-bit value fits in 8 bytes even with emulation prevention
    let head = &nal[1..nal.len().min(9)];
    let rbsp = remove_emulation_prevention(head);
    BitstreamReader::new(&rbsp).read_ue().ok()
}

/// Replays an Annex-B file at a fixed frame rate.
#[derive(Debug, Clone)]
pub struct AnnexBSource {
    stream: ParsedStream,
    frame_ticks: u64,
    looping: bool,
}

impl AnnexBSource {
    pub async fn open(path: &Path, frame_rate: f64) -> Result<Self, SourceError> {
        let data = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&data, frame_rate)
    }

    pub fn from_bytes(data: &[u8], frame_rate: f64) -> Result<Self, SourceError> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(SourceError::InvalidFrameRate(frame_rate));
        }
        let stream = parse_annex_b(data)?;
        let frame_ticks = (f64::from(VIDEO_TIMESCALE) / frame_rate).round().max(1.0) as u64;

        let keyframes = stream.access_units.iter().filter(|u| u.is_keyframe).count();
        if !stream.access_units[0].is_keyframe {
            tracing::warn!("Stream does not start with an IDR picture; leading frames will be dropped");
        }
        tracing::debug!(
            frames = stream.access_units.len(),
            keyframes,
            frame_ticks,
            "Parsed Annex-B stream"
        );

        Ok(Self {
            stream,
            frame_ticks,
            looping: false,
        })
    }

    /// Restart from the first frame at the end of the file.
    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn stream(&self) -> &ParsedStream {
        &self.stream
    }

    pub fn frame_count(&self) -> usize {
        self.stream.access_units.len()
    }

    /// Frame duration on the 90 kHz grid.
    pub fn frame_duration(&self) -> Duration {
        ticks_to_duration(self.frame_ticks)
    }

    pub fn parameter_sets(&self) -> EncoderEvent {
        EncoderEvent::ParameterSets {
            sps: self.stream.sps.clone(),
            pps: self.stream.pps.clone(),
        }
    }

    /// The `index`th frame delivered, counting across loops.
    pub fn frame(&self, index: u64) -> EncodedFrame {
        let units = &self.stream.access_units;
        let unit = &units[(index % units.len() as u64) as usize];
        let time = ticks_to_duration(index * self.frame_ticks);
        EncodedFrame {
            data: unit.to_avcc(),
            presentation_time: time,
            decode_time: time,
            duration: self.frame_duration(),
            is_keyframe: unit.is_keyframe,
        }
    }

    /// Deliver parameter sets, then frames paced in real time, until the
    /// file ends (unless looping) or `cancel` fires. Parameter sets are sent
    /// again whenever the sink moves to a new session. Returns frames delivered.
    pub async fn run<S: EncoderSink>(self, input: S, cancel: CancellationToken) -> u64 {
        let mut session = input.session_id();
        input.submit(self.parameter_sets());

        let mut interval = tokio::time::interval(self.frame_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let total = self.frame_count() as u64;
        let mut index = 0u64;
        loop {
            if !self.looping && index >= total {
                tracing::info!(frames = index, "End of input stream");
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let current = input.session_id();
            if current != session {
                tracing::info!(session_id = %current, "Session changed; resending parameter sets");
                session = current;
                input.submit(self.parameter_sets());
            }
            if !input.submit(EncoderEvent::VideoFrame(self.frame(index))) && !input.is_accepting() {
                break;
            }
            index += 1;
        }
        index
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos((u128::from(ticks) * 1_000_000_000 / u128::from(VIDEO_TIMESCALE)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x0A, 0x0F, 0xC8];
    const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];
    /// IDR slice, first_mb_in_slice = 0 (ue "1")
    const IDR: [u8; 3] = [0x65, 0x88, 0x80];
    /// Non-IDR slice, first_mb_in_slice = 0
    const P: [u8; 3] = [0x41, 0x9A, 0x00];
    /// Non-IDR slice, first_mb_in_slice = 1 (ue "010")
    const P_SECOND_SLICE: [u8; 3] = [0x41, 0x40, 0x00];

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn test_groups_access_units() {
        let data = annex_b(&[&[0x09, 0xF0], &SPS, &PPS, &[0x06, 0x05, 0x01], &IDR, &P, &P_SECOND_SLICE, &P]);
        let stream = parse_annex_b(&data).unwrap();

        assert_eq!(stream.sps.as_ref(), &SPS);
        assert_eq!(stream.pps.as_ref(), &PPS);
        assert_eq!(stream.access_units.len(), 3);

        let idr = &stream.access_units[0];
        assert!(idr.is_keyframe);
        // SEI travels with the picture it precedes
        assert_eq!(idr.nal_units.len(), 2);

        assert!(!stream.access_units[1].is_keyframe);
        assert_eq!(stream.access_units[1].nal_units.len(), 2);
        assert_eq!(stream.access_units[2].nal_units.len(), 1);
    }

    #[test]
    fn test_missing_parameter_sets() {
        let data = annex_b(&[&IDR, &P]);
        assert!(matches!(parse_annex_b(&data), Err(SourceError::NoParameterSets)));

        let data = annex_b(&[&SPS, &PPS]);
        assert!(matches!(parse_annex_b(&data), Err(SourceError::NoFrames)));
    }

    #[test]
    fn test_frames_on_90khz_grid() {
        let data = annex_b(&[&SPS, &PPS, &IDR, &P, &P]);
        let source = AnnexBSource::from_bytes(&data, 30.0).unwrap().with_loop(true);
        assert_eq!(source.frame_count(), 3);

        let frame = source.frame(0);
        assert!(frame.is_keyframe);
        assert_eq!(&frame.data[..4], &[0, 0, 0, 3]);

        // Looping wraps the payload but keeps time moving
        let wrapped = source.frame(3);
        assert!(wrapped.is_keyframe);
        assert_eq!(wrapped.decode_time, Duration::from_millis(100));
        assert_eq!(source.frame(30).decode_time, Duration::from_secs(1));
    }

    /// Records event kinds; moves to a new session after `switch_after` submits.
    struct SwitchingSink {
        kinds: Mutex<Vec<&'static str>>,
        session: Mutex<Uuid>,
        switch_after: usize,
    }

    impl EncoderSink for SwitchingSink {
        fn submit(&self, event: EncoderEvent) -> bool {
            let mut kinds = self.kinds.lock();
            kinds.push(match event {
                EncoderEvent::ParameterSets { .. } => "params",
                EncoderEvent::VideoFrame(_) => "video",
                _ => "other",
            });
            if kinds.len() == self.switch_after {
                *self.session.lock() = Uuid::new_v4();
            }
            true
        }

        fn is_accepting(&self) -> bool {
            true
        }

        fn session_id(&self) -> Uuid {
            *self.session.lock()
        }
    }

    #[tokio::test]
    async fn test_parameter_sets_resent_on_session_change() {
        let data = annex_b(&[&SPS, &PPS, &IDR, &P, &P]);
        let source = AnnexBSource::from_bytes(&data, 1000.0).unwrap();
        let sink = Arc::new(SwitchingSink {
            kinds: Mutex::new(Vec::new()),
            session: Mutex::new(Uuid::new_v4()),
            switch_after: 3,
        });

        let delivered = source.run(Arc::clone(&sink), CancellationToken::new()).await;
        assert_eq!(delivered, 3);
        assert_eq!(
            *sink.kinds.lock(),
            vec!["params", "video", "video", "params", "video"]
        );
    }

    #[test]
    fn test_invalid_frame_rate() {
        let data = annex_b(&[&SPS, &PPS, &IDR]);
        assert!(matches!(
            AnnexBSource::from_bytes(&data, 0.0),
            Err(SourceError::InvalidFrameRate(_))
        ));
    }
}
