//! Movie fragment (moof) and media data (mdat) writing.

use bytes::{BufMut, Bytes, BytesMut};

use super::boxes::{finish_box, start_box, start_full_box};
use super::{MediaKind, TrackRun};
use crate::error::{Error, Result};

/// tfhd flags: default-base-is-moof
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

/// trun flags: data offset, sample duration, size, flags, composition offset
const TRUN_FLAGS: u32 = 0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800;

/// Sample flags: depends on nothing (sync)
pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// Sample flags: depends on others, non-sync
pub const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// Size of an mdat header for a payload of `payload_len` bytes.
pub(crate) fn mdat_header_len(payload_len: u64) -> u64 {
    if payload_len + 8 > u64::from(u32::MAX) {
        16
    } else {
        8
    }
}

/// trun data offsets are signed 32-bit.
pub(crate) fn trun_data_offset(offset: u64) -> Result<i32> {
    i32::try_from(offset).map_err(|_| {
        Error::invalid_box(format!("trun data offset {} exceeds 32 bits", offset))
    })
}

/// Build a moof box for the given runs.
///
/// Each traf's trun data offset is relative to the start of the moof and
/// points at that track's first sample inside the mdat that follows. Fails
/// when an offset does not fit the trun field.
pub fn build_moof(sequence_number: u32, runs: &[TrackRun]) -> Result<Bytes> {
    let sample_total: usize = runs.iter().map(|r| r.samples.len()).sum();
    let mut buf = BytesMut::with_capacity(64 + runs.len() * 64 + sample_total * 16);

    let moof = start_box(&mut buf, b"moof");

    let mfhd = start_full_box(&mut buf, b"mfhd", 0, 0);
    buf.put_u32(sequence_number);
    finish_box(&mut buf, mfhd);

    let mut offset_fields = Vec::with_capacity(runs.len());
    for run in runs {
        let traf = start_box(&mut buf, b"traf");

        let tfhd = start_full_box(&mut buf, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF);
        buf.put_u32(run.track.track_id);
        finish_box(&mut buf, tfhd);

        let tfdt = start_full_box(&mut buf, b"tfdt", 1, 0);
        buf.put_u64(run.base_decode_time);
        finish_box(&mut buf, tfdt);

        // Version 1: signed composition offsets
        let trun = start_full_box(&mut buf, b"trun", 1, TRUN_FLAGS);
        buf.put_u32(run.samples.len() as u32);
        offset_fields.push(buf.len());
        buf.put_i32(0); // data offset, patched below
        let audio = run.track.kind() == MediaKind::Audio;
        for sample in &run.samples {
            buf.put_u32(sample.duration);
            buf.put_u32(sample.data.len() as u32);
            buf.put_u32(if sample.is_sync || audio {
                SYNC_SAMPLE_FLAGS
            } else {
                NON_SYNC_SAMPLE_FLAGS
            });
            buf.put_i32(sample.composition_offset());
        }
        finish_box(&mut buf, trun);

        finish_box(&mut buf, traf);
    }

    finish_box(&mut buf, moof);

    let payload_len: u64 = runs
        .iter()
        .flat_map(|r| r.samples.iter())
        .map(|s| s.data.len() as u64)
        .sum();
    let mut data_offset = buf.len() as u64 + mdat_header_len(payload_len);
    for (run, pos) in runs.iter().zip(offset_fields) {
        let value = trun_data_offset(data_offset)?;
        buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
        data_offset += run.samples.iter().map(|s| s.data.len() as u64).sum::<u64>();
    }

    Ok(buf.freeze())
}

/// Build the mdat box holding every run's payload, runs in order.
pub fn build_mdat(runs: &[TrackRun]) -> Bytes {
    let payload_len: u64 = runs
        .iter()
        .flat_map(|r| r.samples.iter())
        .map(|s| s.data.len() as u64)
        .sum();
    let header_len = mdat_header_len(payload_len);

    let mut buf = BytesMut::with_capacity((payload_len + header_len) as usize);
    if header_len == 16 {
        buf.put_u32(1); // extended size follows
        buf.put_slice(b"mdat");
        buf.put_u64(payload_len + 16);
    } else {
        buf.put_u32((payload_len + 8) as u32);
        buf.put_slice(b"mdat");
    }
    for sample in runs.iter().flat_map(|r| r.samples.iter()) {
        buf.put_slice(&sample.data);
    }
    buf.freeze()
}
