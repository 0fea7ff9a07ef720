//! H.264 Sequence Parameter Set (SPS) decoding

use super::nal::{remove_emulation_prevention, NalUnitType};
use super::FieldContext;
use crate::bitstream::BitstreamReader;

/// Profiles that carry the chroma format / bit depth / scaling matrix fields
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Levels defined in Table A-1
const KNOWN_LEVELS: [u8; 20] = [
    9, 10, 11, 12, 13, 20, 21, 22, 30, 31, 32, 40, 41, 42, 50, 51, 52, 60, 61, 62,
];

/// Frame cropping offsets, in crop units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCropping {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// VUI timing information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate: bool,
}

/// Video Usability Information (Annex E)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VuiParameters {
    /// Aspect ratio indicator, 255 means explicit SAR
    pub aspect_ratio_idc: Option<u8>,
    /// Explicit sample aspect ratio (width, height)
    pub sample_aspect_ratio: Option<(u16, u16)>,
    pub video_full_range: Option<bool>,
    /// Colour primaries, transfer characteristics, matrix coefficients
    pub colour_description: Option<(u8, u8, u8)>,
    pub timing: Option<TimingInfo>,
    pub nal_hrd_present: bool,
    pub vcl_hrd_present: bool,
    pub pic_struct_present: bool,
    pub max_num_reorder_frames: Option<u32>,
    pub max_dec_frame_buffering: Option<u32>,
}

/// Decoded SPS fields plus a validation report
#[derive(Debug, Clone, Default)]
pub struct SpsInfo {
    pub profile_idc: u8,
    /// constraint_set0..5 flags in the high bits, as coded
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub scaling_matrix_present: bool,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: Option<u32>,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_allowed: bool,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub mb_adaptive_frame_field: bool,
    pub direct_8x8_inference: bool,
    pub cropping: Option<FrameCropping>,
    /// Display width in luma samples after cropping
    pub width: u32,
    /// Display height in luma samples after cropping
    pub height: u32,
    pub vui_present: bool,
    pub vui: Option<VuiParameters>,
    /// Bit offset of vui_parameters_present_flag within the unescaped NAL unit
    pub vui_flag_bit_offset: Option<u64>,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SpsInfo {
    /// Human-readable profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile_idc {
            66 if self.constraint_flags & 0x40 != 0 => "Constrained Baseline",
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4 Predictive",
            44 => "CAVLC 4:4:4 Intra",
            _ => "Unknown",
        }
    }

    /// Level as written in Table A-1 (e.g. "3.1", "1b")
    pub fn level_name(&self) -> String {
        let constraint_set3 = self.constraint_flags & 0x10 != 0;
        if self.level_idc == 11 && constraint_set3 && matches!(self.profile_idc, 66 | 77 | 88) {
            return "1b".to_string();
        }
        if self.level_idc == 9 {
            return "1b".to_string();
        }
        format!("{}.{}", self.level_idc / 10, self.level_idc % 10)
    }

    /// Frame rate derived from VUI timing (two fields per frame)
    pub fn frame_rate(&self) -> Option<f64> {
        let timing = self.vui.as_ref()?.timing?;
        if timing.num_units_in_tick == 0 || timing.time_scale == 0 {
            return None;
        }
        Some(timing.time_scale as f64 / (2.0 * timing.num_units_in_tick as f64))
    }

    /// Whether VUI timing information is present
    pub fn has_vui_timing(&self) -> bool {
        self.vui.as_ref().is_some_and(|v| v.timing.is_some())
    }

    /// ChromaArrayType: 0 for monochrome or separately coded planes
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane {
            0
        } else {
            self.chroma_format_idc
        }
    }

    fn crop_units(&self) -> (u32, u32) {
        let frame_factor = if self.frame_mbs_only { 1 } else { 2 };
        match self.chroma_array_type() {
            0 => (1, frame_factor),
            1 => (2, 2 * frame_factor),
            2 => (2, frame_factor),
            _ => (1, frame_factor),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Decode an SPS NAL unit (header byte included, emulation prevention allowed)
pub fn decode_sps(data: &[u8]) -> SpsInfo {
    let mut info = SpsInfo {
        chroma_format_idc: 1,
        bit_depth_luma: 8,
        bit_depth_chroma: 8,
        ..Default::default()
    };

    if data.len() < 4 {
        info.error(format!("SPS too short: {} bytes", data.len()));
        return info;
    }

    let rbsp = remove_emulation_prevention(data);
    let mut reader = BitstreamReader::new(&rbsp);

    if let Err(message) = parse_sps(&mut reader, &mut info) {
        info.error(message);
    }

    if info.errors.is_empty() {
        compute_dimensions(&mut info);
        check_semantics(&mut info);
    }

    info.is_valid = info.errors.is_empty();
    info
}

fn parse_sps(reader: &mut BitstreamReader, info: &mut SpsInfo) -> Result<(), String> {
    let forbidden_zero = reader.read_bit().field("forbidden_zero_bit")?;
    reader.read_bits(2).field("nal_ref_idc")?;
    let nal_type = reader.read_bits(5).field("nal_unit_type")? as u8;

    if forbidden_zero {
        info.error("forbidden_zero_bit is set");
    }
    if NalUnitType::from(nal_type) != NalUnitType::Sps {
        return Err(format!("NAL unit type {} is not an SPS", nal_type));
    }

    info.profile_idc = reader.read_bits(8).field("profile_idc")? as u8;
    info.constraint_flags = reader.read_bits(8).field("constraint_set_flags")? as u8;
    info.level_idc = reader.read_bits(8).field("level_idc")? as u8;
    info.seq_parameter_set_id = reader.read_ue().field("seq_parameter_set_id")?;

    if HIGH_PROFILES.contains(&info.profile_idc) {
        info.chroma_format_idc = reader.read_ue().field("chroma_format_idc")?;
        if info.chroma_format_idc > 3 {
            return Err(format!(
                "chroma_format_idc {} out of range",
                info.chroma_format_idc
            ));
        }
        if info.chroma_format_idc == 3 {
            info.separate_colour_plane = reader.read_bit().field("separate_colour_plane_flag")?;
        }
        let luma = reader.read_ue().field("bit_depth_luma_minus8")?;
        let chroma = reader.read_ue().field("bit_depth_chroma_minus8")?;
        info.bit_depth_luma = luma.saturating_add(8).min(u8::MAX as u32) as u8;
        info.bit_depth_chroma = chroma.saturating_add(8).min(u8::MAX as u32) as u8;
        reader
            .read_bit()
            .field("qpprime_y_zero_transform_bypass_flag")?;
        info.scaling_matrix_present = reader.read_bit().field("seq_scaling_matrix_present_flag")?;
        if info.scaling_matrix_present {
            let lists = if info.chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if reader.read_bit().field("seq_scaling_list_present_flag")? {
                    skip_scaling_list(reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let log2_max_frame_num_minus4 = reader.read_ue().field("log2_max_frame_num_minus4")?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(format!(
            "log2_max_frame_num_minus4 {} out of range",
            log2_max_frame_num_minus4
        ));
    }
    info.log2_max_frame_num = log2_max_frame_num_minus4 + 4;

    info.pic_order_cnt_type = reader.read_ue().field("pic_order_cnt_type")?;
    match info.pic_order_cnt_type {
        0 => {
            let lsb_minus4 = reader.read_ue().field("log2_max_pic_order_cnt_lsb_minus4")?;
            if lsb_minus4 > 12 {
                return Err(format!(
                    "log2_max_pic_order_cnt_lsb_minus4 {} out of range",
                    lsb_minus4
                ));
            }
            info.log2_max_pic_order_cnt_lsb = Some(lsb_minus4 + 4);
        }
        1 => {
            reader
                .read_bit()
                .field("delta_pic_order_always_zero_flag")?;
            reader.read_se().field("offset_for_non_ref_pic")?;
            reader.read_se().field("offset_for_top_to_bottom_field")?;
            let cycle = reader
                .read_ue()
                .field("num_ref_frames_in_pic_order_cnt_cycle")?;
            if cycle > 255 {
                return Err(format!(
                    "num_ref_frames_in_pic_order_cnt_cycle {} out of range",
                    cycle
                ));
            }
            for _ in 0..cycle {
                reader.read_se().field("offset_for_ref_frame")?;
            }
        }
        2 => {}
        other => return Err(format!("pic_order_cnt_type {} out of range", other)),
    }

    info.max_num_ref_frames = reader.read_ue().field("max_num_ref_frames")?;
    info.gaps_in_frame_num_allowed = reader
        .read_bit()
        .field("gaps_in_frame_num_value_allowed_flag")?;
    info.pic_width_in_mbs = reader
        .read_ue()
        .field("pic_width_in_mbs_minus1")?
        .saturating_add(1);
    info.pic_height_in_map_units = reader
        .read_ue()
        .field("pic_height_in_map_units_minus1")?
        .saturating_add(1);
    info.frame_mbs_only = reader.read_bit().field("frame_mbs_only_flag")?;
    if !info.frame_mbs_only {
        info.mb_adaptive_frame_field = reader
            .read_bit()
            .field("mb_adaptive_frame_field_flag")?;
    }
    info.direct_8x8_inference = reader.read_bit().field("direct_8x8_inference_flag")?;

    if reader.read_bit().field("frame_cropping_flag")? {
        info.cropping = Some(FrameCropping {
            left: reader.read_ue().field("frame_crop_left_offset")?,
            right: reader.read_ue().field("frame_crop_right_offset")?,
            top: reader.read_ue().field("frame_crop_top_offset")?,
            bottom: reader.read_ue().field("frame_crop_bottom_offset")?,
        });
    }

    info.vui_flag_bit_offset = Some(reader.bits_read());
    info.vui_present = reader.read_bit().field("vui_parameters_present_flag")?;
    if info.vui_present {
        info.vui = Some(parse_vui(reader)?);
    }

    Ok(())
}

fn parse_vui(reader: &mut BitstreamReader) -> Result<VuiParameters, String> {
    let mut vui = VuiParameters::default();

    if reader.read_bit().field("aspect_ratio_info_present_flag")? {
        let idc = reader.read_bits(8).field("aspect_ratio_idc")? as u8;
        vui.aspect_ratio_idc = Some(idc);
        if idc == 255 {
            let w = reader.read_bits(16).field("sar_width")? as u16;
            let h = reader.read_bits(16).field("sar_height")? as u16;
            vui.sample_aspect_ratio = Some((w, h));
        }
    }

    if reader.read_bit().field("overscan_info_present_flag")? {
        reader.read_bit().field("overscan_appropriate_flag")?;
    }

    if reader.read_bit().field("video_signal_type_present_flag")? {
        reader.read_bits(3).field("video_format")?;
        vui.video_full_range = Some(reader.read_bit().field("video_full_range_flag")?);
        if reader.read_bit().field("colour_description_present_flag")? {
            let primaries = reader.read_bits(8).field("colour_primaries")? as u8;
            let transfer = reader.read_bits(8).field("transfer_characteristics")? as u8;
            let matrix = reader.read_bits(8).field("matrix_coefficients")? as u8;
            vui.colour_description = Some((primaries, transfer, matrix));
        }
    }

    if reader.read_bit().field("chroma_loc_info_present_flag")? {
        reader.read_ue().field("chroma_sample_loc_type_top_field")?;
        reader.read_ue().field("chroma_sample_loc_type_bottom_field")?;
    }

    if reader.read_bit().field("timing_info_present_flag")? {
        vui.timing = Some(TimingInfo {
            num_units_in_tick: reader.read_bits(32).field("num_units_in_tick")?,
            time_scale: reader.read_bits(32).field("time_scale")?,
            fixed_frame_rate: reader.read_bit().field("fixed_frame_rate_flag")?,
        });
    }

    vui.nal_hrd_present = reader.read_bit().field("nal_hrd_parameters_present_flag")?;
    if vui.nal_hrd_present {
        skip_hrd_parameters(reader)?;
    }
    vui.vcl_hrd_present = reader.read_bit().field("vcl_hrd_parameters_present_flag")?;
    if vui.vcl_hrd_present {
        skip_hrd_parameters(reader)?;
    }
    if vui.nal_hrd_present || vui.vcl_hrd_present {
        reader.read_bit().field("low_delay_hrd_flag")?;
    }
    vui.pic_struct_present = reader.read_bit().field("pic_struct_present_flag")?;

    if reader.read_bit().field("bitstream_restriction_flag")? {
        reader
            .read_bit()
            .field("motion_vectors_over_pic_boundaries_flag")?;
        reader.read_ue().field("max_bytes_per_pic_denom")?;
        reader.read_ue().field("max_bits_per_mb_denom")?;
        reader.read_ue().field("log2_max_mv_length_horizontal")?;
        reader.read_ue().field("log2_max_mv_length_vertical")?;
        vui.max_num_reorder_frames = Some(reader.read_ue().field("max_num_reorder_frames")?);
        vui.max_dec_frame_buffering = Some(reader.read_ue().field("max_dec_frame_buffering")?);
    }

    Ok(vui)
}

fn skip_hrd_parameters(reader: &mut BitstreamReader) -> Result<(), String> {
    let cpb_cnt_minus1 = reader.read_ue().field("cpb_cnt_minus1")?;
    if cpb_cnt_minus1 > 31 {
        return Err(format!("cpb_cnt_minus1 {} out of range", cpb_cnt_minus1));
    }
    reader.read_bits(4).field("bit_rate_scale")?;
    reader.read_bits(4).field("cpb_size_scale")?;
    for _ in 0..=cpb_cnt_minus1 {
        reader.read_ue().field("bit_rate_value_minus1")?;
        reader.read_ue().field("cpb_size_value_minus1")?;
        reader.read_bit().field("cbr_flag")?;
    }
    // initial_cpb_removal_delay_length_minus1, cpb_removal_delay_length_minus1,
    // dpb_output_delay_length_minus1, time_offset_length
    reader.skip_bits(20).field("hrd_delay_lengths")?;
    Ok(())
}

/// Consume a scaling_list() structure (7.3.2.1.1.1)
pub(crate) fn skip_scaling_list(reader: &mut BitstreamReader, size: usize) -> Result<(), String> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = reader.read_se().field("delta_scale")?;
            if !(-128..=127).contains(&delta) {
                return Err(format!("delta_scale {} out of range", delta));
            }
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

fn compute_dimensions(info: &mut SpsInfo) {
    let (crop_x, crop_y) = info.crop_units();
    let frame_factor = if info.frame_mbs_only { 1 } else { 2 };

    let coded_width = info.pic_width_in_mbs.saturating_mul(16);
    let coded_height = info
        .pic_height_in_map_units
        .saturating_mul(16)
        .saturating_mul(frame_factor);

    let crop = info.cropping.unwrap_or_default();
    let crop_w = crop.left.saturating_add(crop.right).saturating_mul(crop_x);
    let crop_h = crop.top.saturating_add(crop.bottom).saturating_mul(crop_y);

    if crop_w >= coded_width || crop_h >= coded_height {
        info.error(format!(
            "Cropping {}x{} exceeds coded size {}x{}",
            crop_w, crop_h, coded_width, coded_height
        ));
        return;
    }

    info.width = coded_width - crop_w;
    info.height = coded_height - crop_h;
}

fn check_semantics(info: &mut SpsInfo) {
    if info.seq_parameter_set_id > 31 {
        let id = info.seq_parameter_set_id;
        info.error(format!("seq_parameter_set_id {} out of range", id));
    }
    if info.bit_depth_luma > 14 || info.bit_depth_chroma > 14 {
        let (luma, chroma) = (info.bit_depth_luma, info.bit_depth_chroma);
        info.error(format!("Bit depth {}/{} out of range", luma, chroma));
    }
    if info.profile_name() == "Unknown" {
        let profile = info.profile_idc;
        info.warning(format!("Unrecognised profile_idc {}", profile));
    }
    if !KNOWN_LEVELS.contains(&info.level_idc) {
        let level = info.level_idc;
        info.warning(format!("Unrecognised level_idc {}", level));
    }
    if info.max_num_ref_frames > 16 {
        let refs = info.max_num_ref_frames;
        info.warning(format!("max_num_ref_frames {} exceeds 16", refs));
    }
    if info.gaps_in_frame_num_allowed {
        info.warning("gaps_in_frame_num_value_allowed_flag is set");
    }
    if !info.frame_mbs_only {
        info.warning("Interlaced coding (frame_mbs_only_flag = 0)");
    }
    match &info.vui {
        None => info.warning("No VUI parameters"),
        Some(vui) if vui.timing.is_none() => info.warning("VUI present without timing info"),
        Some(_) => {
            if info.frame_rate().is_none() {
                info.warning("VUI timing has a zero num_units_in_tick or time_scale");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bitstream::BitstreamWriter;
    use crate::h264::nal::add_emulation_prevention;

    /// Parameters for synthesising an SPS in tests
    pub(crate) struct SpsBuilder {
        pub profile_idc: u8,
        pub constraint_flags: u8,
        pub level_idc: u8,
        pub chroma_format_idc: u32,
        pub width_mbs: u32,
        pub height_map_units: u32,
        pub frame_mbs_only: bool,
        pub poc_type: u32,
        pub max_num_ref_frames: u32,
        pub cropping: Option<FrameCropping>,
        /// (num_units_in_tick, time_scale)
        pub timing: Option<(u32, u32)>,
    }

    impl Default for SpsBuilder {
        fn default() -> Self {
            Self {
                profile_idc: 66,
                constraint_flags: 0xC0,
                level_idc: 30,
                chroma_format_idc: 1,
                width_mbs: 20,
                height_map_units: 15,
                frame_mbs_only: true,
                poc_type: 2,
                max_num_ref_frames: 1,
                cropping: None,
                timing: None,
            }
        }
    }

    impl SpsBuilder {
        pub(crate) fn build(&self) -> Vec<u8> {
            let mut w = BitstreamWriter::new();
            w.write_bits(8, 0x67).unwrap();
            w.write_bits(8, self.profile_idc as u32).unwrap();
            w.write_bits(8, self.constraint_flags as u32).unwrap();
            w.write_bits(8, self.level_idc as u32).unwrap();
            w.write_ue(0).unwrap();
            if HIGH_PROFILES.contains(&self.profile_idc) {
                w.write_ue(self.chroma_format_idc).unwrap();
                if self.chroma_format_idc == 3 {
                    w.write_bit(false).unwrap();
                }
                w.write_ue(0).unwrap();
                w.write_ue(0).unwrap();
                w.write_bit(false).unwrap();
                w.write_bit(false).unwrap();
            }
            w.write_ue(0).unwrap();
            w.write_ue(self.poc_type).unwrap();
            if self.poc_type == 0 {
                w.write_ue(2).unwrap();
            }
            w.write_ue(self.max_num_ref_frames).unwrap();
            w.write_bit(false).unwrap();
            w.write_ue(self.width_mbs - 1).unwrap();
            w.write_ue(self.height_map_units - 1).unwrap();
            w.write_bit(self.frame_mbs_only).unwrap();
            if !self.frame_mbs_only {
                w.write_bit(false).unwrap();
            }
            w.write_bit(true).unwrap();
            match self.cropping {
                Some(c) => {
                    w.write_bit(true).unwrap();
                    w.write_ue(c.left).unwrap();
                    w.write_ue(c.right).unwrap();
                    w.write_ue(c.top).unwrap();
                    w.write_ue(c.bottom).unwrap();
                }
                None => w.write_bit(false).unwrap(),
            }
            match self.timing {
                Some((units, scale)) => {
                    w.write_bit(true).unwrap();
                    w.write_bits(4, 0).unwrap();
                    w.write_bit(true).unwrap();
                    w.write_bits(32, units).unwrap();
                    w.write_bits(32, scale).unwrap();
                    w.write_bit(true).unwrap();
                    w.write_bits(4, 0).unwrap();
                }
                None => w.write_bit(false).unwrap(),
            }
            w.write_trailing_bits().unwrap();
            add_emulation_prevention(&w.finish().unwrap())
        }
    }

    #[test]
    fn test_decode_baseline_sps() {
        let sps = decode_sps(&SpsBuilder::default().build());
        assert!(sps.is_valid, "{:?}", sps.errors);
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.profile_name(), "Constrained Baseline");
        assert_eq!(sps.level_name(), "3.0");
        assert_eq!((sps.width, sps.height), (320, 240));
        assert!(!sps.vui_present);
        assert!(sps.warnings.iter().any(|w| w.contains("No VUI")));
    }

    #[test]
    fn test_decode_cropped_1080p() {
        let sps = decode_sps(
            &SpsBuilder {
                profile_idc: 77,
                constraint_flags: 0x40,
                level_idc: 40,
                width_mbs: 120,
                height_map_units: 68,
                poc_type: 0,
                cropping: Some(FrameCropping {
                    bottom: 4,
                    ..Default::default()
                }),
                ..Default::default()
            }
            .build(),
        );
        assert!(sps.is_valid, "{:?}", sps.errors);
        assert_eq!(sps.log2_max_pic_order_cnt_lsb, Some(6));
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn test_decode_interlaced_doubles_height() {
        let sps = decode_sps(
            &SpsBuilder {
                frame_mbs_only: false,
                height_map_units: 17,
                cropping: Some(FrameCropping {
                    bottom: 2,
                    ..Default::default()
                }),
                ..Default::default()
            }
            .build(),
        );
        assert!(sps.is_valid, "{:?}", sps.errors);
        // 17 map units * 16 * 2 fields, minus 2 crop units of 4 lines
        assert_eq!(sps.height, 544 - 8);
        assert!(sps.warnings.iter().any(|w| w.contains("Interlaced")));
    }

    #[test]
    fn test_decode_high_444_crop_units() {
        let sps = decode_sps(
            &SpsBuilder {
                profile_idc: 244,
                constraint_flags: 0,
                chroma_format_idc: 3,
                cropping: Some(FrameCropping {
                    right: 3,
                    bottom: 3,
                    ..Default::default()
                }),
                ..Default::default()
            }
            .build(),
        );
        assert!(sps.is_valid, "{:?}", sps.errors);
        assert_eq!(sps.chroma_format_idc, 3);
        assert_eq!((sps.width, sps.height), (317, 237));
    }

    #[test]
    fn test_vui_timing_frame_rate() {
        let sps = decode_sps(
            &SpsBuilder {
                timing: Some((1001, 60000)),
                ..Default::default()
            }
            .build(),
        );
        assert!(sps.is_valid, "{:?}", sps.errors);
        assert!(sps.has_vui_timing());
        let fps = sps.frame_rate().unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_truncated_sps_names_field() {
        let full = SpsBuilder::default().build();
        let sps = decode_sps(&full[..5]);
        assert!(!sps.is_valid);
        assert!(sps.errors[0].starts_with("Truncated at"), "{:?}", sps.errors);
    }

    #[test]
    fn test_not_an_sps() {
        let mut data = SpsBuilder::default().build();
        data[0] = 0x68;
        let sps = decode_sps(&data);
        assert!(!sps.is_valid);
        assert!(sps.errors[0].contains("not an SPS"));
    }

    #[test]
    fn test_excessive_cropping_is_error() {
        let sps = decode_sps(
            &SpsBuilder {
                cropping: Some(FrameCropping {
                    left: 100,
                    right: 100,
                    ..Default::default()
                }),
                ..Default::default()
            }
            .build(),
        );
        assert!(!sps.is_valid);
        assert!(sps.errors[0].contains("exceeds coded size"));
    }

    #[test]
    fn test_level_1b() {
        let sps = SpsInfo {
            profile_idc: 66,
            constraint_flags: 0x10,
            level_idc: 11,
            ..Default::default()
        };
        assert_eq!(sps.level_name(), "1b");

        let sps = SpsInfo {
            profile_idc: 100,
            constraint_flags: 0x10,
            level_idc: 11,
            ..Default::default()
        };
        assert_eq!(sps.level_name(), "1.1");
    }
}
