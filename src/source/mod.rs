//! Frame producers standing in for a hardware encoder.

mod annexb;

pub use annexb::{parse_annex_b, AccessUnit, AnnexBSource, ParsedStream, SourceError};
