use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of requests served concurrently
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds without a request before a client counts as disconnected
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,

    /// How often idle clients are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Length of the random URL prefix the stream is served under
    #[serde(default = "default_path_length")]
    pub path_length: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> usize {
    100
}
fn default_client_timeout() -> u64 {
    30
}
fn default_sweep_interval() -> u64 {
    5
}
fn default_path_length() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            client_timeout_secs: default_client_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            path_length: default_path_length(),
        }
    }
}

impl ServerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Named quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// Long segments and a deep window; tolerates poor networks.
    #[default]
    Reliable,
    /// Short segments for low latency.
    Realtime,
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reliable => write!(f, "reliable"),
            Self::Realtime => write!(f, "realtime"),
        }
    }
}

impl std::str::FromStr for QualityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reliable" => Ok(Self::Reliable),
            "realtime" | "real-time" => Ok(Self::Realtime),
            _ => Err(format!("Unknown quality mode: {}", s)),
        }
    }
}

/// Segmenting and encoder settings for one stream.
///
/// In a config file the `quality` key picks a preset and every other key
/// overrides a single field of it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "StreamConfigFile")]
pub struct StreamConfig {
    pub quality: QualityMode,

    /// Nominal segment length in seconds
    pub segment_duration_secs: f64,

    /// Segments advertised in the playlist
    pub playlist_window: usize,

    /// Segments kept in memory (at least the window)
    pub max_segments: usize,

    /// Expected encoder frame rate, used for VUI timing
    pub frame_rate: f64,

    /// Target encoder bitrate in bits per second
    pub bitrate: u32,

    /// Extra media time to wait for a keyframe before asking the encoder for one
    pub max_keyframe_wait_secs: f64,

    /// Capacity of the encoder queue
    pub queue_capacity: usize,

    /// Rewrite SPS units that lack VUI timing
    pub inject_vui_timing: bool,

    /// Structurally validate every segment before publishing it
    pub validate_segments: bool,

    pub title: String,
}

impl StreamConfig {
    /// 4 second segments for flaky links.
    pub fn reliable() -> Self {
        Self {
            quality: QualityMode::Reliable,
            segment_duration_secs: 4.0,
            playlist_window: 6,
            max_segments: 10,
            frame_rate: 15.0,
            bitrate: 600_000,
            max_keyframe_wait_secs: 2.0,
            queue_capacity: 256,
            inject_vui_timing: true,
            validate_segments: false,
            title: default_title(),
        }
    }

    /// 1 second segments for low latency.
    pub fn realtime() -> Self {
        Self {
            quality: QualityMode::Realtime,
            segment_duration_secs: 1.0,
            playlist_window: 4,
            max_segments: 8,
            frame_rate: 30.0,
            bitrate: 1_500_000,
            max_keyframe_wait_secs: 0.5,
            queue_capacity: 256,
            inject_vui_timing: true,
            validate_segments: false,
            title: default_title(),
        }
    }

    pub fn preset(mode: QualityMode) -> Self {
        match mode {
            QualityMode::Reliable => Self::reliable(),
            QualityMode::Realtime => Self::realtime(),
        }
    }

    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs_f64(self.segment_duration_secs.max(0.0))
    }

    pub fn max_keyframe_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_keyframe_wait_secs.max(0.0))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

fn default_title() -> String {
    "Live Stream".to_string()
}

/// On-disk form of [`StreamConfig`]: a preset plus optional overrides.
#[derive(Debug, Default, Deserialize)]
struct StreamConfigFile {
    #[serde(default)]
    quality: QualityMode,
    segment_duration_secs: Option<f64>,
    playlist_window: Option<usize>,
    max_segments: Option<usize>,
    frame_rate: Option<f64>,
    bitrate: Option<u32>,
    max_keyframe_wait_secs: Option<f64>,
    queue_capacity: Option<usize>,
    inject_vui_timing: Option<bool>,
    validate_segments: Option<bool>,
    title: Option<String>,
}

impl From<StreamConfigFile> for StreamConfig {
    fn from(file: StreamConfigFile) -> Self {
        let preset = Self::preset(file.quality);
        Self {
            quality: file.quality,
            segment_duration_secs: file
                .segment_duration_secs
                .unwrap_or(preset.segment_duration_secs),
            playlist_window: file.playlist_window.unwrap_or(preset.playlist_window),
            max_segments: file.max_segments.unwrap_or(preset.max_segments),
            frame_rate: file.frame_rate.unwrap_or(preset.frame_rate),
            bitrate: file.bitrate.unwrap_or(preset.bitrate),
            max_keyframe_wait_secs: file
                .max_keyframe_wait_secs
                .unwrap_or(preset.max_keyframe_wait_secs),
            queue_capacity: file.queue_capacity.unwrap_or(preset.queue_capacity),
            inject_vui_timing: file.inject_vui_timing.unwrap_or(preset.inject_vui_timing),
            validate_segments: file.validate_segments.unwrap_or(preset.validate_segments),
            title: file.title.unwrap_or(preset.title),
        }
    }
}
