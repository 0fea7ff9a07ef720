//! # livefeed-probe
//!
//! Pure Rust H.264 parameter set analysis for live streaming.
//!
//! ## Features
//!
//! - Bit-level reading with Exp-Golomb codes ([`BitstreamReader`])
//! - SPS/PPS decoding into structured reports with validation findings
//! - HLS compatibility checks (profile, VUI timing)
//! - SPS rewriting to add VUI timing for encoders that omit it
//! - Annex B / AVCC NAL unit framing helpers
//!
//! ## Example
//!
//! ```
//! use livefeed_probe::h264::{decode_sps, meets_hls_requirements, decode_pps};
//!
//! let sps = decode_sps(&[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x0A, 0x0F, 0xC8]);
//! assert_eq!((sps.width, sps.height), (320, 240));
//!
//! let pps = decode_pps(&[0x68, 0xCE, 0x3C, 0x80]);
//! if let Err(issues) = meets_hls_requirements(&sps, &pps) {
//!     for issue in issues {
//!         println!("{} (fixable: {})", issue, issue.is_fixable());
//!     }
//! }
//! ```

pub mod bitstream;
pub mod error;
pub mod h264;

pub use bitstream::{BitstreamReader, BitstreamWriter};
pub use error::{BitstreamError, VuiError};
