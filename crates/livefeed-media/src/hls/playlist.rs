//! HLS media playlist structures.

use std::fmt;

/// Protocol version: fMP4 segments with EXT-X-MAP.
pub const PLAYLIST_VERSION: u32 = 7;

/// Media playlist for a single rendition.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Sequence number of the first listed segment.
    pub media_sequence: u64,
    /// Discontinuities that have left the window.
    pub discontinuity_sequence: u64,
    /// Playlist type (VOD, EVENT, or sliding live).
    pub playlist_type: PlaylistType,
    /// Init segment URI.
    pub init_uri: Option<String>,
    /// Segment entries, oldest first.
    pub segments: Vec<SegmentEntry>,
    /// Whether this is an ended playlist.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create an empty sliding-window live playlist.
    pub fn live(target_duration: u32) -> Self {
        Self {
            target_duration,
            media_sequence: 0,
            discontinuity_sequence: 0,
            playlist_type: PlaylistType::Live,
            init_uri: None,
            segments: Vec::new(),
            ended: false,
        }
    }

    /// Create a new VOD playlist.
    pub fn vod(target_duration: u32) -> Self {
        Self {
            playlist_type: PlaylistType::Vod,
            ended: true,
            ..Self::live(target_duration)
        }
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MediaPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:{}", PLAYLIST_VERSION)?;
        writeln!(f, "#EXT-X-TARGETDURATION:{}", self.target_duration)?;
        writeln!(f, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence)?;
        if self.discontinuity_sequence > 0 {
            writeln!(
                f,
                "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
                self.discontinuity_sequence
            )?;
        }

        match self.playlist_type {
            PlaylistType::Vod => writeln!(f, "#EXT-X-PLAYLIST-TYPE:VOD")?,
            PlaylistType::Event => writeln!(f, "#EXT-X-PLAYLIST-TYPE:EVENT")?,
            PlaylistType::Live => {}
        }

        writeln!(f, "#EXT-X-INDEPENDENT-SEGMENTS")?;

        if let Some(ref init_uri) = self.init_uri {
            writeln!(f, "#EXT-X-MAP:URI=\"{}\"", init_uri)?;
        }

        for segment in &self.segments {
            if segment.discontinuity {
                writeln!(f, "#EXT-X-DISCONTINUITY")?;
            }
            writeln!(f, "#EXTINF:{:.3},", segment.duration)?;
            writeln!(f, "{}", segment.uri)?;
        }

        if self.ended {
            writeln!(f, "#EXT-X-ENDLIST")?;
        }

        Ok(())
    }
}

/// Playlist type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
    Live,
}

/// A segment entry in the playlist.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
    /// Discontinuity before this segment.
    pub discontinuity: bool,
}
