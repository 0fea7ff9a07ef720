//! Livefeed-Media: fMP4 muxing and HLS playlists for live H.264 streams
//!
//! This crate turns timed, encoded samples into the byte streams an HLS
//! client fetches.
//!
//! # Modules
//!
//! - `fmp4` - Fragmented MP4 serialization (init segment, moof/mdat), plus an
//!   independent box reader and segment validator
//! - `hls` - HLS media playlist rendering (m3u8)
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bytes::Bytes;
//! use livefeed_media::{Fmp4Muxer, Sample, TrackConfig};
//!
//! let sps = Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x0A, 0x0F, 0xC8]);
//! let pps = Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]);
//!
//! let mut muxer = Fmp4Muxer::new();
//! muxer.add_track(TrackConfig::video(1, 90_000, 320, 240, sps, pps)).unwrap();
//! let init = muxer.create_initialization_segment().unwrap();
//! assert_eq!(&init[4..8], b"ftyp");
//!
//! let sample = Sample {
//!     data: Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]),
//!     presentation_time: 0,
//!     decode_time: 0,
//!     duration: 3000,
//!     is_sync: true,
//!     track_id: 1,
//! };
//! let segment = muxer.create_media_segment(&[sample], 1, Duration::ZERO).unwrap();
//! assert_eq!(segment.sample_count, 1);
//! ```

pub mod error;
pub mod fmp4;
pub mod hls;

pub use error::{Error, Result};
pub use fmp4::{Fmp4Muxer, MediaKind, MediaSegment, Sample, TrackConfig, TrackParams};
pub use hls::{MediaPlaylist, PlaylistType, SegmentEntry};
