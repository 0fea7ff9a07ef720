//! H.264/AVC parameter set parsing
//!
//! Decoders never fail hard: they return a report carrying the decoded
//! fields plus lists of validation errors and warnings, and callers decide
//! whether a stream is usable.

pub mod nal;
pub mod pps;
pub mod sps;
pub mod validate;
pub mod vui;

pub use nal::{
    add_emulation_prevention, annex_b_to_avcc, nal_unit_type, remove_emulation_prevention,
    split_annex_b, split_avcc, to_avcc, NalUnitType,
};
pub use pps::{decode_pps, PpsInfo};
pub use sps::{decode_sps, FrameCropping, SpsInfo, TimingInfo, VuiParameters};
pub use validate::{detailed_report, meets_hls_requirements, validate_pair, HlsIssue, PairReport};
pub use vui::add_vui_timing;

use crate::bitstream;

/// Attach the syntax element name to a failed read
pub(crate) trait FieldContext<T> {
    fn field(self, name: &'static str) -> Result<T, String>;
}

impl<T> FieldContext<T> for bitstream::Result<T> {
    fn field(self, name: &'static str) -> Result<T, String> {
        self.map_err(|e| format!("Truncated at {}: {}", name, e))
    }
}
