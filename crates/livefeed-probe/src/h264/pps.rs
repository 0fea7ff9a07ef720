//! H.264 Picture Parameter Set (PPS) decoding

use super::nal::{remove_emulation_prevention, NalUnitType};
use super::sps::skip_scaling_list;
use super::FieldContext;
use crate::bitstream::BitstreamReader;

/// Decoded PPS fields plus a validation report
#[derive(Debug, Clone, Default)]
pub struct PpsInfo {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    /// true for CABAC, false for CAVLC
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    pub num_slice_groups: u32,
    pub slice_group_map_type: Option<u32>,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp: i32,
    pub pic_init_qs: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
    pub scaling_matrix_present: bool,
    pub second_chroma_qp_index_offset: i32,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PpsInfo {
    /// Entropy coder name
    pub fn entropy_coding_name(&self) -> &'static str {
        if self.entropy_coding_mode {
            "CABAC"
        } else {
            "CAVLC"
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Decode a PPS NAL unit (header byte included, emulation prevention allowed)
///
/// The optional scaling lists of the extension are sized for non-4:4:4
/// chroma, which covers every profile accepted for HLS.
pub fn decode_pps(data: &[u8]) -> PpsInfo {
    let mut info = PpsInfo::default();

    if data.len() < 2 {
        info.error(format!("PPS too short: {} bytes", data.len()));
        return info;
    }

    let rbsp = remove_emulation_prevention(data);
    let mut reader = BitstreamReader::new(&rbsp);

    if let Err(message) = parse_pps(&mut reader, &mut info) {
        info.error(message);
    }

    if info.errors.is_empty() {
        check_semantics(&mut info);
    }

    info.is_valid = info.errors.is_empty();
    info
}

fn parse_pps(reader: &mut BitstreamReader, info: &mut PpsInfo) -> Result<(), String> {
    if reader.read_bit().field("forbidden_zero_bit")? {
        info.error("forbidden_zero_bit is set");
    }
    reader.read_bits(2).field("nal_ref_idc")?;
    let nal_type = reader.read_bits(5).field("nal_unit_type")? as u8;
    if NalUnitType::from(nal_type) != NalUnitType::Pps {
        return Err(format!("NAL unit type {} is not a PPS", nal_type));
    }

    info.pic_parameter_set_id = reader.read_ue().field("pic_parameter_set_id")?;
    info.seq_parameter_set_id = reader.read_ue().field("seq_parameter_set_id")?;
    info.entropy_coding_mode = reader.read_bit().field("entropy_coding_mode_flag")?;
    info.bottom_field_pic_order_in_frame_present = reader
        .read_bit()
        .field("bottom_field_pic_order_in_frame_present_flag")?;

    let slice_groups_minus1 = reader.read_ue().field("num_slice_groups_minus1")?;
    if slice_groups_minus1 > 7 {
        return Err(format!(
            "num_slice_groups_minus1 {} out of range",
            slice_groups_minus1
        ));
    }
    info.num_slice_groups = slice_groups_minus1 + 1;

    if slice_groups_minus1 > 0 {
        let map_type = reader.read_ue().field("slice_group_map_type")?;
        info.slice_group_map_type = Some(map_type);
        match map_type {
            0 => {
                for _ in 0..=slice_groups_minus1 {
                    reader.read_ue().field("run_length_minus1")?;
                }
            }
            2 => {
                for _ in 0..slice_groups_minus1 {
                    reader.read_ue().field("top_left")?;
                    reader.read_ue().field("bottom_right")?;
                }
            }
            3..=5 => {
                reader
                    .read_bit()
                    .field("slice_group_change_direction_flag")?;
                reader.read_ue().field("slice_group_change_rate_minus1")?;
            }
            6 => {
                let map_units = reader
                    .read_ue()
                    .field("pic_size_in_map_units_minus1")?
                    .saturating_add(1);
                let id_bits = u32::BITS - slice_groups_minus1.leading_zeros();
                reader
                    .skip_bits(u64::from(map_units) * u64::from(id_bits))
                    .field("slice_group_id")?;
            }
            1 => {}
            other => return Err(format!("slice_group_map_type {} out of range", other)),
        }
    }

    info.num_ref_idx_l0_default_active = reader
        .read_ue()
        .field("num_ref_idx_l0_default_active_minus1")?
        .saturating_add(1);
    info.num_ref_idx_l1_default_active = reader
        .read_ue()
        .field("num_ref_idx_l1_default_active_minus1")?
        .saturating_add(1);
    info.weighted_pred = reader.read_bit().field("weighted_pred_flag")?;
    info.weighted_bipred_idc = reader.read_bits(2).field("weighted_bipred_idc")? as u8;
    info.pic_init_qp = reader.read_se().field("pic_init_qp_minus26")? + 26;
    info.pic_init_qs = reader.read_se().field("pic_init_qs_minus26")? + 26;
    info.chroma_qp_index_offset = reader.read_se().field("chroma_qp_index_offset")?;
    info.deblocking_filter_control_present = reader
        .read_bit()
        .field("deblocking_filter_control_present_flag")?;
    info.constrained_intra_pred = reader.read_bit().field("constrained_intra_pred_flag")?;
    info.redundant_pic_cnt_present = reader
        .read_bit()
        .field("redundant_pic_cnt_present_flag")?;
    info.second_chroma_qp_index_offset = info.chroma_qp_index_offset;

    if reader.more_rbsp_data() {
        info.transform_8x8_mode = reader.read_bit().field("transform_8x8_mode_flag")?;
        info.scaling_matrix_present = reader
            .read_bit()
            .field("pic_scaling_matrix_present_flag")?;
        if info.scaling_matrix_present {
            let lists = 6 + if info.transform_8x8_mode { 2 } else { 0 };
            for i in 0..lists {
                if reader.read_bit().field("pic_scaling_list_present_flag")? {
                    skip_scaling_list(reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
        info.second_chroma_qp_index_offset = reader
            .read_se()
            .field("second_chroma_qp_index_offset")?;
    }

    Ok(())
}

fn check_semantics(info: &mut PpsInfo) {
    if info.pic_parameter_set_id > 255 {
        let id = info.pic_parameter_set_id;
        info.error(format!("pic_parameter_set_id {} out of range", id));
    }
    if info.seq_parameter_set_id > 31 {
        let id = info.seq_parameter_set_id;
        info.error(format!("seq_parameter_set_id {} out of range", id));
    }
    if info.num_ref_idx_l0_default_active > 32 || info.num_ref_idx_l1_default_active > 32 {
        info.error("num_ref_idx_default_active exceeds 32");
    }
    if info.weighted_bipred_idc > 2 {
        info.error("weighted_bipred_idc 3 is reserved");
    }
    if !(0..=51).contains(&info.pic_init_qp) {
        let qp = info.pic_init_qp;
        info.error(format!("pic_init_qp {} out of range", qp));
    }
    if !(0..=51).contains(&info.pic_init_qs) {
        let qs = info.pic_init_qs;
        info.error(format!("pic_init_qs {} out of range", qs));
    }
    for offset in [info.chroma_qp_index_offset, info.second_chroma_qp_index_offset] {
        if !(-12..=12).contains(&offset) {
            info.error(format!("chroma_qp_index_offset {} out of range", offset));
        }
    }
    if info.num_slice_groups > 1 {
        let groups = info.num_slice_groups;
        info.warning(format!("Flexible macroblock ordering with {} slice groups", groups));
    }
    if info.redundant_pic_cnt_present {
        info.warning("Redundant pictures enabled");
    }
}
