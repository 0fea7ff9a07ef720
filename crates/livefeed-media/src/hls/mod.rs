//! HLS playlist generation.
//!
//! This module renders M3U8 media playlists for fMP4 segments.

mod playlist;

pub use playlist::{MediaPlaylist, PlaylistType, SegmentEntry};
