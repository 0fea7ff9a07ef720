//! Structural validation of produced segments.

use super::inspect::{parse_fragment, BoxIter};

/// Outcome of validating one segment.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sample_count: usize,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Validate a moof + mdat media segment.
///
/// Checks top-level box order, the mfhd sequence number, that every trun
/// addresses bytes inside the mdat, and that each traf begins with a sync
/// sample so the segment is independently decodable.
pub fn validate_media_segment(data: &[u8], expected_sequence: u32) -> ValidationReport {
    let mut report = ValidationReport::default();

    let fragment = match parse_fragment(data) {
        Ok(fragment) => fragment,
        Err(e) => {
            report.errors.push(format!("Unparseable fragment: {}", e));
            return report.finish();
        }
    };
    report.sample_count = fragment.sample_count();

    let order: Vec<&[u8; 4]> = fragment
        .top_level
        .iter()
        .filter(|t| ![b"styp", b"sidx", b"free"].contains(t))
        .collect();
    if order != [b"moof", b"mdat"] {
        let names: Vec<String> = fragment
            .top_level
            .iter()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect();
        report
            .errors
            .push(format!("Expected moof then mdat, found [{}]", names.join(", ")));
    }

    if fragment.sequence_number != expected_sequence {
        report.errors.push(format!(
            "mfhd sequence {} does not match expected {}",
            fragment.sequence_number, expected_sequence
        ));
    }

    if fragment.trafs.is_empty() {
        report.errors.push("moof contains no traf".to_string());
    }

    let mut covered = 0u64;
    for traf in &fragment.trafs {
        let id = traf.track_id;
        if traf.base_decode_time.is_none() {
            report.warnings.push(format!("traf {} has no tfdt", id));
        }
        if traf.samples.is_empty() {
            report.warnings.push(format!("traf {} has an empty trun", id));
            continue;
        }
        if !traf.samples[0].is_sync() {
            report
                .errors
                .push(format!("traf {} does not start with a sync sample", id));
        }
        if traf.samples.iter().any(|s| s.duration == 0) {
            report
                .warnings
                .push(format!("traf {} has zero-duration samples", id));
        }

        match fragment.run_range(traf) {
            Some(range)
                if range.start >= fragment.mdat_payload.start
                    && range.end <= fragment.mdat_payload.end =>
            {
                covered += traf.payload_len();
            }
            Some(range) => report.errors.push(format!(
                "traf {} data {}..{} outside mdat payload {}..{}",
                id,
                range.start,
                range.end,
                fragment.mdat_payload.start,
                fragment.mdat_payload.end
            )),
            None => report
                .errors
                .push(format!("traf {} has no resolvable data offset", id)),
        }
    }

    let mdat_len = fragment.mdat_payload.len() as u64;
    if covered < mdat_len && report.errors.is_empty() {
        report.warnings.push(format!(
            "{} mdat bytes not referenced by any trun",
            mdat_len - covered
        ));
    }

    report.finish()
}

/// Validate an initialization segment (ftyp + moov).
pub fn validate_init_segment(data: &[u8]) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut top_level = Vec::new();
    let mut moov_payload = None;
    for item in BoxIter::new(data) {
        match item {
            Ok((header, payload)) => {
                if &header.box_type == b"moov" {
                    moov_payload = Some(payload);
                }
                top_level.push(header.box_type);
            }
            Err(e) => {
                report.errors.push(format!("Unparseable box: {}", e));
                return report.finish();
            }
        }
    }

    if top_level.first() != Some(b"ftyp") {
        report.errors.push("First box is not ftyp".to_string());
    }
    if top_level.get(1) != Some(b"moov") {
        report.errors.push("Second box is not moov".to_string());
    }
    if top_level.iter().any(|t| t == b"moof" || t == b"mdat") {
        report
            .errors
            .push("Initialization segment contains media data".to_string());
    }

    let Some(moov) = moov_payload else {
        report.errors.push("Missing moov".to_string());
        return report.finish();
    };

    let mut has_mvhd = false;
    let mut trak_ids = Vec::new();
    let mut trex_ids = Vec::new();
    for (header, payload) in BoxIter::new(moov).flatten() {
        match &header.box_type {
            b"mvhd" => has_mvhd = true,
            b"trak" => {
                if let Some(id) = trak_track_id(payload) {
                    trak_ids.push(id);
                } else {
                    report.errors.push("trak without readable tkhd".to_string());
                }
            }
            b"mvex" => {
                for (child, body) in BoxIter::new(payload).flatten() {
                    if &child.box_type == b"trex" && body.len() >= 8 {
                        trex_ids.push(u32::from_be_bytes([body[4], body[5], body[6], body[7]]));
                    }
                }
            }
            _ => {}
        }
    }

    if !has_mvhd {
        report.errors.push("moov has no mvhd".to_string());
    }
    if trak_ids.is_empty() {
        report.errors.push("moov has no trak".to_string());
    }
    for id in &trak_ids {
        if !trex_ids.contains(id) {
            report
                .errors
                .push(format!("Track {} has no trex in mvex", id));
        }
    }

    report.finish()
}

fn trak_track_id(trak: &[u8]) -> Option<u32> {
    let (_, tkhd) = BoxIter::new(trak)
        .flatten()
        .find(|(h, _)| &h.box_type == b"tkhd")?;
    // version 1 has 64-bit times before the track id
    let pos = if *tkhd.first()? == 1 { 20 } else { 12 };
    let id = tkhd.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::tests::{audio_track, video_sample, video_track};
    use crate::fmp4::Fmp4Muxer;
    use std::time::Duration;

    fn muxer() -> Fmp4Muxer {
        let mut muxer = Fmp4Muxer::new();
        muxer.add_track(video_track()).unwrap();
        muxer.add_track(audio_track()).unwrap();
        muxer
    }

    #[test]
    fn test_valid_init_segment() {
        let init = muxer().create_initialization_segment().unwrap();
        let report = validate_init_segment(&init);
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_valid_media_segment() {
        let mut muxer = muxer();
        let samples: Vec<_> = (0..5).map(|i| video_sample(i, 64, i == 0)).collect();
        let segment = muxer.create_media_segment(&samples, 3, Duration::ZERO).unwrap();

        let report = validate_media_segment(&segment.data, 3);
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.sample_count, 5);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_wrong_sequence_and_gop() {
        let mut muxer = muxer();
        let samples: Vec<_> = (0..3).map(|i| video_sample(i, 64, false)).collect();
        let segment = muxer.create_media_segment(&samples, 4, Duration::ZERO).unwrap();

        let report = validate_media_segment(&segment.data, 5);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("mfhd sequence 4")));
        assert!(report.errors.iter().any(|e| e.contains("sync sample")));
    }

    #[test]
    fn test_truncated_segment() {
        let mut muxer = muxer();
        let segment = muxer
            .create_media_segment(&[video_sample(0, 64, true)], 1, Duration::ZERO)
            .unwrap();
        let report = validate_media_segment(&segment.data[..segment.data.len() - 10], 1);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_init_without_moov() {
        let report = validate_init_segment(&crate::fmp4::build_ftyp());
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e == "Missing moov"));
    }
}
