//! Initialization segment (ftyp + moov) writing.

use bytes::{BufMut, Bytes, BytesMut};

use super::boxes::{finish_box, put_matrix, start_box, start_full_box};
use super::codec::{build_avcc, build_esds};
use super::{TrackConfig, TrackParams};
use crate::error::{Error, Result};

/// Movie timescale for mvhd.
const MOVIE_TIMESCALE: u32 = 1000;

/// Build the ftyp box: major brand iso6, compatible iso6/iso5/isom/avc1/mp41.
pub fn build_ftyp() -> Bytes {
    let brands: [&[u8; 4]; 5] = [b"iso6", b"iso5", b"isom", b"avc1", b"mp41"];
    let mut buf = BytesMut::with_capacity(8 + 8 + brands.len() * 4);
    let start = start_box(&mut buf, b"ftyp");
    buf.put_slice(b"iso6"); // major brand
    buf.put_u32(0); // minor version
    for brand in brands {
        buf.put_slice(brand);
    }
    finish_box(&mut buf, start);
    buf.freeze()
}

/// Build the moov box for the given tracks.
pub fn build_moov<'a>(tracks: impl IntoIterator<Item = &'a TrackConfig>) -> Result<Bytes> {
    let tracks: Vec<&TrackConfig> = tracks.into_iter().collect();
    if tracks.is_empty() {
        return Err(Error::NoTracks);
    }

    let mut buf = BytesMut::with_capacity(1024);
    let moov = start_box(&mut buf, b"moov");

    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
    write_mvhd(&mut buf, next_track_id);

    for track in &tracks {
        write_trak(&mut buf, track)?;
    }

    let mvex = start_box(&mut buf, b"mvex");
    for track in &tracks {
        write_trex(&mut buf, track.track_id);
    }
    finish_box(&mut buf, mvex);

    finish_box(&mut buf, moov);
    Ok(buf.freeze())
}

fn write_mvhd(buf: &mut BytesMut, next_track_id: u32) {
    let start = start_full_box(buf, b"mvhd", 1, 0);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(MOVIE_TIMESCALE);
    buf.put_u64(0); // duration: unknown for live
    buf.put_u32(0x0001_0000); // rate = 1.0
    buf.put_u16(0x0100); // volume = 1.0
    buf.put_u16(0); // reserved
    buf.put_u64(0); // reserved
    put_matrix(buf);
    buf.put_slice(&[0; 24]); // pre_defined
    buf.put_u32(next_track_id);
    finish_box(buf, start);
}

fn write_trak(buf: &mut BytesMut, track: &TrackConfig) -> Result<()> {
    let trak = start_box(buf, b"trak");
    write_tkhd(buf, track);

    let mdia = start_box(buf, b"mdia");
    write_mdhd(buf, track.timescale);
    match track.params {
        TrackParams::Video { .. } => write_hdlr(buf, b"vide", b"VideoHandler"),
        TrackParams::Audio { .. } => write_hdlr(buf, b"soun", b"SoundHandler"),
    }

    let minf = start_box(buf, b"minf");
    match track.params {
        TrackParams::Video { .. } => {
            let vmhd = start_full_box(buf, b"vmhd", 0, 1);
            buf.put_u16(0); // graphics mode
            buf.put_slice(&[0; 6]); // opcolor
            finish_box(buf, vmhd);
        }
        TrackParams::Audio { .. } => {
            let smhd = start_full_box(buf, b"smhd", 0, 0);
            buf.put_u16(0); // balance
            buf.put_u16(0); // reserved
            finish_box(buf, smhd);
        }
    }
    write_dinf(buf);

    let stbl = start_box(buf, b"stbl");
    write_stsd(buf, track)?;
    write_empty_sample_tables(buf);
    finish_box(buf, stbl);

    finish_box(buf, minf);
    finish_box(buf, mdia);
    finish_box(buf, trak);
    Ok(())
}

fn write_tkhd(buf: &mut BytesMut, track: &TrackConfig) {
    // flags: enabled, in_movie, in_preview
    let start = start_full_box(buf, b"tkhd", 1, 0x000007);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(track.track_id);
    buf.put_u32(0); // reserved
    buf.put_u64(0); // duration
    buf.put_u64(0); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    match track.params {
        TrackParams::Video { width, height, .. } => {
            buf.put_u16(0); // volume
            buf.put_u16(0); // reserved
            put_matrix(buf);
            buf.put_u32(width << 16);
            buf.put_u32(height << 16);
        }
        TrackParams::Audio { .. } => {
            buf.put_u16(0x0100); // volume
            buf.put_u16(0); // reserved
            put_matrix(buf);
            buf.put_u32(0);
            buf.put_u32(0);
        }
    }
    finish_box(buf, start);
}

fn write_mdhd(buf: &mut BytesMut, timescale: u32) {
    let start = start_full_box(buf, b"mdhd", 1, 0);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(timescale);
    buf.put_u64(0); // duration
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0); // pre_defined
    finish_box(buf, start);
}

fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
    let start = start_full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler);
    buf.put_slice(&[0; 12]); // reserved
    buf.put_slice(name);
    buf.put_u8(0); // null terminator
    finish_box(buf, start);
}

fn write_dinf(buf: &mut BytesMut) {
    let dinf = start_box(buf, b"dinf");
    let dref = start_full_box(buf, b"dref", 0, 0);
    buf.put_u32(1); // entry count
    let url = start_full_box(buf, b"url ", 0, 1); // self-contained
    finish_box(buf, url);
    finish_box(buf, dref);
    finish_box(buf, dinf);
}

fn write_stsd(buf: &mut BytesMut, track: &TrackConfig) -> Result<()> {
    let stsd = start_full_box(buf, b"stsd", 0, 0);
    buf.put_u32(1); // entry count

    match &track.params {
        TrackParams::Video {
            width,
            height,
            sps,
            pps,
        } => {
            let avcc = build_avcc(sps, pps).ok_or(Error::MissingParameterSets(track.track_id))?;

            let avc1 = start_box(buf, b"avc1");
            buf.put_slice(&[0; 6]); // reserved
            buf.put_u16(1); // data reference index
            buf.put_u16(0); // pre_defined
            buf.put_u16(0); // reserved
            buf.put_slice(&[0; 12]); // pre_defined
            buf.put_u16(*width as u16);
            buf.put_u16(*height as u16);
            buf.put_u32(0x0048_0000); // horiz resolution 72 dpi
            buf.put_u32(0x0048_0000); // vert resolution 72 dpi
            buf.put_u32(0); // reserved
            buf.put_u16(1); // frame count
            buf.put_slice(&[0; 32]); // compressor name
            buf.put_u16(0x0018); // depth
            buf.put_i16(-1); // pre_defined

            let avcc_box = start_box(buf, b"avcC");
            buf.put_slice(&avcc);
            finish_box(buf, avcc_box);

            finish_box(buf, avc1);
        }
        TrackParams::Audio {
            sample_rate,
            channel_count,
            audio_specific_config,
        } => {
            let mp4a = start_box(buf, b"mp4a");
            buf.put_slice(&[0; 6]); // reserved
            buf.put_u16(1); // data reference index
            buf.put_u64(0); // reserved
            buf.put_u16(*channel_count);
            buf.put_u16(16); // sample size
            buf.put_u16(0); // pre_defined
            buf.put_u16(0); // reserved
            buf.put_u32((*sample_rate).min(0xFFFF) << 16);

            let esds = start_box(buf, b"esds");
            buf.put_slice(&build_esds(track.track_id, audio_specific_config));
            finish_box(buf, esds);

            finish_box(buf, mp4a);
        }
    }

    finish_box(buf, stsd);
    Ok(())
}

fn write_empty_sample_tables(buf: &mut BytesMut) {
    for box_type in [b"stts", b"stsc", b"stco"] {
        let start = start_full_box(buf, box_type, 0, 0);
        buf.put_u32(0); // entry count
        finish_box(buf, start);
    }
    let stsz = start_full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0); // sample size
    buf.put_u32(0); // sample count
    finish_box(buf, stsz);
}

fn write_trex(buf: &mut BytesMut, track_id: u32) {
    let start = start_full_box(buf, b"trex", 0, 0);
    buf.put_u32(track_id);
    buf.put_u32(1); // default sample description index
    buf.put_u32(0); // default sample duration
    buf.put_u32(0); // default sample size
    buf.put_u32(0); // default sample flags
    finish_box(buf, start);
}
