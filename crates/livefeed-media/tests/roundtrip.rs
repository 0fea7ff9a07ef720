//! Muxer output read back through the independent box reader.

use std::time::Duration;

use bytes::Bytes;
use livefeed_media::fmp4::inspect::{box_tree, parse_fragment};
use livefeed_media::fmp4::validate::{validate_init_segment, validate_media_segment};
use livefeed_media::{Fmp4Muxer, Sample, TrackConfig};
use proptest::prelude::*;

const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x0A, 0x0F, 0xC8];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

fn video_track() -> TrackConfig {
    TrackConfig::video(
        1,
        90_000,
        320,
        240,
        Bytes::from_static(&SPS),
        Bytes::from_static(&PPS),
    )
}

fn audio_track() -> TrackConfig {
    TrackConfig::audio(2, 44_100, 1, Bytes::from_static(&[0x12, 0x08]))
}

fn sample(track_id: u32, index: u64, size: usize, duration: u32, is_sync: bool) -> Sample {
    Sample {
        data: Bytes::from(vec![(index % 251) as u8; size]),
        presentation_time: index * u64::from(duration),
        decode_time: index * u64::from(duration),
        duration,
        is_sync,
        track_id,
    }
}

#[test]
fn test_init_segment_outline() {
    let mut muxer = Fmp4Muxer::new();
    muxer.add_track(video_track()).unwrap();
    muxer.add_track(audio_track()).unwrap();

    let init = muxer.create_initialization_segment().unwrap();
    let report = validate_init_segment(&init);
    assert!(report.is_valid, "{:?}", report.errors);

    let tree = box_tree(&init);
    assert!(tree.starts_with("ftyp (36 bytes)\nmoov ("));
    for needle in ["mvhd", "avcC", "esds", "mvex", "trex", "vmhd", "smhd"] {
        assert!(tree.contains(needle), "missing {} in\n{}", needle, tree);
    }
    assert_eq!(tree.matches("trak (").count(), 2);
}

#[test]
fn test_multi_track_segment_offsets() {
    let mut muxer = Fmp4Muxer::new();
    muxer.add_track(video_track()).unwrap();
    muxer.add_track(audio_track()).unwrap();

    let mut samples: Vec<Sample> = (0..4).map(|i| sample(1, i, 200 + i as usize, 3000, i == 0)).collect();
    samples.extend((0..5).map(|i| sample(2, i, 50, 1024, false)));

    let segment = muxer
        .create_media_segment(&samples, 9, Duration::from_secs(2))
        .unwrap();
    let fragment = parse_fragment(&segment.data).unwrap();

    assert_eq!(fragment.sequence_number, 9);
    assert_eq!(fragment.trafs.len(), 2);
    assert_eq!(fragment.sample_count(), 9);

    let video = &fragment.trafs[0];
    let audio = &fragment.trafs[1];
    assert_eq!(video.track_id, 1);
    assert_eq!(audio.track_id, 2);
    let sizes: Vec<u32> = video.samples.iter().map(|s| s.size).collect();
    assert_eq!(sizes, vec![200, 201, 202, 203]);
    assert!(video.samples[0].is_sync());
    assert!(video.samples[1..].iter().all(|s| !s.is_sync()));
    assert!(audio.samples.iter().all(|s| s.is_sync()));

    let video_range = fragment.run_range(video).unwrap();
    let audio_range = fragment.run_range(audio).unwrap();
    assert_eq!(video_range.start, fragment.mdat_payload.start);
    assert_eq!(video_range.end, audio_range.start);
    assert_eq!(audio_range.end, fragment.mdat_payload.end);

    // First video byte is sample 0's fill value, first audio byte likewise
    assert_eq!(segment.data[video_range.start], 0);
    assert_eq!(segment.data[audio_range.start], 0);
    assert_eq!(segment.data[video_range.start + 200], 1);

    assert_eq!(segment.duration, Duration::from_nanos(133_333_333));
    let report = validate_media_segment(&segment.data, 9);
    assert!(report.is_valid, "{:?}", report.errors);
}

#[test]
fn test_decode_time_latches_on_first_segment() {
    // Samples at 100 s, 104 s and 500 s on the 90 kHz clock
    let mut muxer = Fmp4Muxer::new();
    muxer.add_track(video_track()).unwrap();

    let first = muxer
        .create_media_segment(&[sample(1, 3000, 10, 3000, true)], 1, Duration::from_secs(100))
        .unwrap();
    let second = muxer
        .create_media_segment(&[sample(1, 3120, 10, 3000, true)], 2, Duration::from_secs(104))
        .unwrap();

    let tfdt = |data: &Bytes| parse_fragment(data).unwrap().trafs[0].base_decode_time;
    assert_eq!(tfdt(&first.data), Some(0));
    assert_eq!(tfdt(&second.data), Some(4 * 90_000));

    muxer.reset_stream_start_time();
    let third = muxer
        .create_media_segment(&[sample(1, 15_000, 10, 3000, true)], 3, Duration::from_secs(500))
        .unwrap();
    assert_eq!(tfdt(&third.data), Some(0));
}

#[test]
fn test_composition_offsets_survive() {
    let mut muxer = Fmp4Muxer::new();
    muxer.add_track(video_track()).unwrap();

    let mut b_frame = sample(1, 1, 20, 3000, false);
    b_frame.presentation_time = 0;
    b_frame.decode_time = 3000;
    let mut reordered = sample(1, 0, 20, 3000, true);
    reordered.presentation_time = 6000;

    let segment = muxer
        .create_media_segment(&[reordered, b_frame], 1, Duration::ZERO)
        .unwrap();
    let fragment = parse_fragment(&segment.data).unwrap();
    let offsets: Vec<i32> = fragment.trafs[0]
        .samples
        .iter()
        .map(|s| s.composition_offset)
        .collect();
    assert_eq!(offsets, vec![6000, -3000]);
}

#[test]
fn test_nalus_are_length_prefixed() {
    let mut muxer = Fmp4Muxer::new();
    muxer.add_track(video_track()).unwrap();

    let nalus = [
        Bytes::from_static(&[0x65, 0x88, 0x84]),
        Bytes::from_static(&[0x41, 0x9A]),
    ];
    let segment = muxer
        .create_video_segment_from_nalus(&nalus, &[true, false], 3000, 1, Duration::ZERO)
        .unwrap();
    let fragment = parse_fragment(&segment.data).unwrap();
    let mdat = &segment.data[fragment.mdat_payload.clone()];
    assert_eq!(mdat, &[0, 0, 0, 3, 0x65, 0x88, 0x84, 0, 0, 0, 2, 0x41, 0x9A][..]);
    assert_eq!(fragment.trafs[0].samples[0].size, 7);
    assert_eq!(segment.duration, Duration::from_nanos(66_666_666));
}

proptest! {
    #[test]
    fn prop_trun_matches_samples(
        sizes in proptest::collection::vec(1usize..2048, 1..40),
        sync_every in 1usize..10,
        sequence in 1u32..1_000_000,
    ) {
        let mut muxer = Fmp4Muxer::new();
        muxer.add_track(video_track()).unwrap();

        let samples: Vec<Sample> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| sample(1, i as u64, size, 3000, i % sync_every == 0))
            .collect();
        let segment = muxer.create_media_segment(&samples, sequence, Duration::ZERO).unwrap();
        let fragment = parse_fragment(&segment.data).unwrap();

        prop_assert_eq!(fragment.sequence_number, sequence);
        prop_assert_eq!(fragment.sample_count(), sizes.len());
        let traf = &fragment.trafs[0];
        for (parsed, original) in traf.samples.iter().zip(&samples) {
            prop_assert_eq!(parsed.size as usize, original.data.len());
            prop_assert_eq!(parsed.is_sync(), original.is_sync);
            prop_assert_eq!(parsed.duration, 3000);
        }
        prop_assert_eq!(fragment.run_range(traf).unwrap(), fragment.mdat_payload.clone());
        prop_assert!(validate_media_segment(&segment.data, sequence).is_valid);
    }
}
