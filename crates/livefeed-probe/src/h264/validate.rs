//! Cross-checks between parameter sets and HLS compatibility

use std::fmt::{self, Write};

use super::pps::PpsInfo;
use super::sps::SpsInfo;

/// Profiles with broad HLS player support: Baseline, Main, Extended and the High family
pub const HLS_PROFILES: [u8; 7] = [66, 77, 88, 100, 110, 122, 244];

/// A reason an SPS/PPS pair cannot be streamed as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlsIssue {
    InvalidSps,
    InvalidPps,
    UnsupportedProfile(u8),
    MissingVuiTiming,
}

impl HlsIssue {
    /// Whether the issue can be repaired by rewriting the SPS
    pub fn is_fixable(&self) -> bool {
        matches!(self, HlsIssue::MissingVuiTiming)
    }
}

impl fmt::Display for HlsIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HlsIssue::InvalidSps => write!(f, "SPS failed validation"),
            HlsIssue::InvalidPps => write!(f, "PPS failed validation"),
            HlsIssue::UnsupportedProfile(p) => write!(f, "Profile {} is not HLS compatible", p),
            HlsIssue::MissingVuiTiming => write!(f, "SPS lacks VUI timing information"),
        }
    }
}

/// Result of checking an SPS/PPS pair against each other
#[derive(Debug, Clone, Default)]
pub struct PairReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check that a PPS refers to the SPS and uses tools the profile allows
pub fn validate_pair(sps: &SpsInfo, pps: &PpsInfo) -> PairReport {
    let mut report = PairReport::default();

    if !sps.is_valid {
        report.errors.push("SPS is invalid".to_string());
    }
    if !pps.is_valid {
        report.errors.push("PPS is invalid".to_string());
    }
    if pps.seq_parameter_set_id != sps.seq_parameter_set_id {
        report.errors.push(format!(
            "PPS references SPS {} but SPS id is {}",
            pps.seq_parameter_set_id, sps.seq_parameter_set_id
        ));
    }

    if sps.profile_idc == 66 {
        if pps.entropy_coding_mode {
            report.errors.push("CABAC is not allowed in Baseline profile".to_string());
        }
        if pps.weighted_pred || pps.weighted_bipred_idc != 0 {
            report
                .warnings
                .push("Weighted prediction signalled in Baseline profile".to_string());
        }
    } else if pps.num_slice_groups > 1 {
        report.errors.push(format!(
            "Slice groups are only allowed in Baseline/Extended, found {}",
            pps.num_slice_groups
        ));
    }

    if pps.transform_8x8_mode && !matches!(sps.profile_idc, 100 | 110 | 122 | 244) {
        report
            .warnings
            .push("transform_8x8_mode_flag set outside the High profiles".to_string());
    }

    report.is_valid = report.errors.is_empty();
    report
}

/// Check whether a parameter set pair can be served to HLS players
pub fn meets_hls_requirements(sps: &SpsInfo, pps: &PpsInfo) -> Result<(), Vec<HlsIssue>> {
    let mut issues = Vec::new();

    if !sps.is_valid {
        issues.push(HlsIssue::InvalidSps);
    }
    if !pps.is_valid {
        issues.push(HlsIssue::InvalidPps);
    }
    if sps.is_valid {
        if !HLS_PROFILES.contains(&sps.profile_idc) {
            issues.push(HlsIssue::UnsupportedProfile(sps.profile_idc));
        }
        if !sps.has_vui_timing() {
            issues.push(HlsIssue::MissingVuiTiming);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Multi-line description of a parameter set pair
pub fn detailed_report(sps: &SpsInfo, pps: &PpsInfo) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_report(&mut out, sps, pps);
    out
}

fn write_report(out: &mut String, sps: &SpsInfo, pps: &PpsInfo) -> fmt::Result {
    writeln!(out, "=== SPS ===")?;
    writeln!(
        out,
        "Profile: {} ({}), Level: {}",
        sps.profile_name(),
        sps.profile_idc,
        sps.level_name()
    )?;
    writeln!(out, "Resolution: {}x{}", sps.width, sps.height)?;
    writeln!(
        out,
        "Macroblocks: {}x{} (frame_mbs_only: {})",
        sps.pic_width_in_mbs, sps.pic_height_in_map_units, sps.frame_mbs_only
    )?;
    if let Some(crop) = sps.cropping {
        writeln!(
            out,
            "Cropping: left {} right {} top {} bottom {}",
            crop.left, crop.right, crop.top, crop.bottom
        )?;
    }
    writeln!(
        out,
        "Chroma format: {}, bit depth: {}/{}",
        sps.chroma_format_idc, sps.bit_depth_luma, sps.bit_depth_chroma
    )?;
    writeln!(
        out,
        "POC type: {}, max ref frames: {}",
        sps.pic_order_cnt_type, sps.max_num_ref_frames
    )?;
    match sps.frame_rate() {
        Some(fps) => writeln!(out, "VUI: present, frame rate {:.3}", fps)?,
        None if sps.vui_present => writeln!(out, "VUI: present, no timing")?,
        None => writeln!(out, "VUI: absent")?,
    }
    write_findings(out, sps.is_valid, &sps.errors, &sps.warnings)?;

    writeln!(out, "=== PPS ===")?;
    writeln!(
        out,
        "PPS id: {}, SPS id: {}",
        pps.pic_parameter_set_id, pps.seq_parameter_set_id
    )?;
    writeln!(
        out,
        "Entropy coding: {}, slice groups: {}",
        pps.entropy_coding_name(),
        pps.num_slice_groups
    )?;
    writeln!(
        out,
        "Ref idx defaults: L0 {} L1 {}, init QP {}",
        pps.num_ref_idx_l0_default_active, pps.num_ref_idx_l1_default_active, pps.pic_init_qp
    )?;
    writeln!(out, "Transform 8x8: {}", pps.transform_8x8_mode)?;
    write_findings(out, pps.is_valid, &pps.errors, &pps.warnings)?;

    let pair = validate_pair(sps, pps);
    writeln!(out, "=== Pair ===")?;
    write_findings(out, pair.is_valid, &pair.errors, &pair.warnings)?;

    writeln!(out, "=== HLS ===")?;
    match meets_hls_requirements(sps, pps) {
        Ok(()) => writeln!(out, "Compatible")?,
        Err(issues) => {
            for issue in issues {
                let note = if issue.is_fixable() { " (fixable)" } else { "" };
                writeln!(out, "Issue: {}{}", issue, note)?;
            }
        }
    }
    Ok(())
}

fn write_findings(
    out: &mut String,
    valid: bool,
    errors: &[String],
    warnings: &[String],
) -> fmt::Result {
    writeln!(out, "Valid: {}", valid)?;
    for e in errors {
        writeln!(out, "  error: {}", e)?;
    }
    for w in warnings {
        writeln!(out, "  warning: {}", w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h264::pps::decode_pps;
    use crate::h264::pps::tests::build_pps;
    use crate::h264::sps::decode_sps;
    use crate::h264::sps::tests::SpsBuilder;

    #[test]
    fn test_missing_timing_is_fixable() {
        let sps = decode_sps(&SpsBuilder::default().build());
        let pps = decode_pps(&build_pps(false, 1, false));

        let issues = meets_hls_requirements(&sps, &pps).unwrap_err();
        assert_eq!(issues, vec![HlsIssue::MissingVuiTiming]);
        assert!(issues.iter().all(HlsIssue::is_fixable));
    }

    #[test]
    fn test_compatible_pair() {
        let sps = decode_sps(
            &SpsBuilder {
                timing: Some((1, 60)),
                ..Default::default()
            }
            .build(),
        );
        let pps = decode_pps(&build_pps(false, 1, false));
        assert!(meets_hls_requirements(&sps, &pps).is_ok());
        assert!(validate_pair(&sps, &pps).is_valid);
    }

    #[test]
    fn test_unsupported_profile() {
        let sps = decode_sps(
            &SpsBuilder {
                profile_idc: 44,
                constraint_flags: 0,
                timing: Some((1, 60)),
                ..Default::default()
            }
            .build(),
        );
        let pps = decode_pps(&build_pps(false, 1, false));
        let issues = meets_hls_requirements(&sps, &pps).unwrap_err();
        assert_eq!(issues, vec![HlsIssue::UnsupportedProfile(44)]);
        assert!(!issues[0].is_fixable());
    }

    #[test]
    fn test_invalid_sps_blocks() {
        let sps = decode_sps(&[0x67, 0x42]);
        let pps = decode_pps(&build_pps(false, 1, false));
        let issues = meets_hls_requirements(&sps, &pps).unwrap_err();
        assert_eq!(issues, vec![HlsIssue::InvalidSps]);
    }

    #[test]
    fn test_cabac_in_baseline() {
        let sps = decode_sps(&SpsBuilder::default().build());
        let pps = decode_pps(&build_pps(true, 1, false));
        let report = validate_pair(&sps, &pps);
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("CABAC"));
    }

    #[test]
    fn test_detailed_report_sections() {
        let sps = decode_sps(&SpsBuilder::default().build());
        let pps = decode_pps(&build_pps(false, 1, false));
        let report = detailed_report(&sps, &pps);
        assert!(report.contains("Resolution: 320x240"));
        assert!(report.contains("Entropy coding: CAVLC"));
        assert!(report.contains("Issue: SPS lacks VUI timing information (fixable)"));
    }
}
