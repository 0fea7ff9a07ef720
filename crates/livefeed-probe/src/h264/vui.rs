//! SPS rewriting to add VUI timing information
//!
//! Hardware encoders frequently emit an SPS without VUI. Some players need
//! the timing fields to establish a frame rate, so the SPS is re-encoded
//! with a minimal VUI appended after the unchanged sequence fields.

use super::nal::{add_emulation_prevention, remove_emulation_prevention};
use super::sps::decode_sps;
use crate::bitstream::{BitstreamReader, BitstreamWriter};
use crate::error::VuiError;

/// Upper bound accepted for the injected frame rate
const MAX_FRAME_RATE: f64 = 1000.0;

/// Return `sps` with VUI timing for `frame_rate` added
///
/// An SPS that already carries VUI is returned unchanged.
pub fn add_vui_timing(sps: &[u8], frame_rate: f64) -> Result<Vec<u8>, VuiError> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 || frame_rate > MAX_FRAME_RATE {
        return Err(VuiError::InvalidFrameRate(frame_rate));
    }

    let info = decode_sps(sps);
    if !info.is_valid {
        return Err(VuiError::InvalidSps(info.errors.join("; ")));
    }
    if info.vui_present {
        return Ok(sps.to_vec());
    }
    let flag_offset = info
        .vui_flag_bit_offset
        .ok_or_else(|| VuiError::InvalidSps("vui_parameters_present_flag not reached".into()))?;

    let (num_units_in_tick, time_scale) = timing_for(frame_rate);

    let rbsp = remove_emulation_prevention(sps);
    let mut reader = BitstreamReader::new(&rbsp);
    let mut writer = BitstreamWriter::new();

    let mut remaining = flag_offset;
    while remaining > 0 {
        let chunk = remaining.min(32) as u8;
        writer.write_bits(chunk, reader.read_bits(chunk)?)?;
        remaining -= u64::from(chunk);
    }

    writer.write_bit(true)?; // vui_parameters_present_flag
    writer.write_bit(false)?; // aspect_ratio_info_present_flag
    writer.write_bit(false)?; // overscan_info_present_flag
    writer.write_bit(false)?; // video_signal_type_present_flag
    writer.write_bit(false)?; // chroma_loc_info_present_flag

    writer.write_bit(true)?; // timing_info_present_flag
    writer.write_bits(32, num_units_in_tick)?;
    writer.write_bits(32, time_scale)?;
    writer.write_bit(true)?; // fixed_frame_rate_flag

    writer.write_bit(false)?; // nal_hrd_parameters_present_flag
    writer.write_bit(false)?; // vcl_hrd_parameters_present_flag
    writer.write_bit(false)?; // pic_struct_present_flag

    writer.write_bit(true)?; // bitstream_restriction_flag
    writer.write_bit(true)?; // motion_vectors_over_pic_boundaries_flag
    writer.write_ue(2)?; // max_bytes_per_pic_denom
    writer.write_ue(1)?; // max_bits_per_mb_denom
    writer.write_ue(16)?; // log2_max_mv_length_horizontal
    writer.write_ue(16)?; // log2_max_mv_length_vertical
    writer.write_ue(0)?; // max_num_reorder_frames
    writer.write_ue(info.max_num_ref_frames)?; // max_dec_frame_buffering

    writer.write_trailing_bits()?;
    let rewritten = writer.finish()?;

    Ok(add_emulation_prevention(&rewritten))
}

/// (num_units_in_tick, time_scale) such that time_scale / (2 * units) = fps
fn timing_for(frame_rate: f64) -> (u32, u32) {
    let units: u32 = if frame_rate.fract().abs() < 1e-9 { 1 } else { 1000 };
    let time_scale = (2.0 * frame_rate * f64::from(units)).round() as u32;
    (units, time_scale)
}
