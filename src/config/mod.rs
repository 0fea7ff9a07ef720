mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./livefeed.toml",
        "~/.config/livefeed/config.toml",
        "/etc/livefeed/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.server.max_connections == 0 {
        anyhow::bail!("Server max_connections must be at least 1");
    }
    if config.server.path_length == 0 {
        anyhow::bail!("Server path_length must be at least 1");
    }

    let stream = &config.stream;
    if stream.playlist_window == 0 {
        anyhow::bail!("Stream playlist_window must be at least 1");
    }
    if stream.max_segments < stream.playlist_window {
        anyhow::bail!(
            "Stream max_segments ({}) must be at least playlist_window ({})",
            stream.max_segments,
            stream.playlist_window
        );
    }
    if !(stream.segment_duration_secs > 0.0) {
        anyhow::bail!("Stream segment_duration_secs must be positive");
    }
    if !(stream.frame_rate > 0.0) {
        anyhow::bail!("Stream frame_rate must be positive");
    }
    if stream.queue_capacity == 0 {
        anyhow::bail!("Stream queue_capacity must be at least 1");
    }
    if stream.title.chars().count() > crate::server::MAX_TITLE_CHARS {
        tracing::warn!(
            "Stream title longer than {} characters will be truncated",
            crate::server::MAX_TITLE_CHARS
        );
    }

    Ok(())
}
