mod cli;

use livefeed::{
    config::{self, Config, QualityMode, StreamConfig},
    events::{EventDispatcher, StreamListener},
    server::{self, AppContext, StreamServer},
    source::AnnexBSource,
    streaming::NoEncoderControl,
};
use livefeed_probe::h264::{decode_pps, decode_sps, detailed_report, meets_hls_requirements};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prints lifecycle events for the operator.
struct ConsoleListener;

impl StreamListener for ConsoleListener {
    fn server_started(&self, base_url: &str) {
        println!("Streaming at {}playlist.m3u8", base_url);
    }

    fn client_connected(&self, address: &str) {
        println!("Viewer connected: {}", address);
    }

    fn client_disconnected(&self, address: &str) {
        println!("Viewer left: {}", address);
    }
}

async fn serve(
    input: &Path,
    looping: bool,
    host: Option<String>,
    port: Option<u16>,
    quality: Option<QualityMode>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags override the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(quality) = quality.filter(|q| *q != config.stream.quality) {
        config.stream = StreamConfig {
            title: config.stream.title.clone(),
            ..StreamConfig::preset(quality)
        };
    }
    config::validate_config(&config)?;

    let source = AnnexBSource::open(input, config.stream.frame_rate)
        .await
        .with_context(|| format!("Failed to load input stream: {:?}", input))?
        .with_loop(looping);

    tracing::info!(
        input = %input.display(),
        frames = source.frame_count(),
        quality = %config.stream.quality,
        "Starting livefeed"
    );

    let events = Arc::new(EventDispatcher::new());
    events.subscribe(Arc::new(ConsoleListener));

    let ctx = AppContext::new(config, events, Arc::new(NoEncoderControl));
    let server = StreamServer::start(ctx.clone()).await?;

    let cancel = CancellationToken::new();
    let feeder = tokio::spawn(source.run(ctx.encoder_input(), cancel.clone()));

    server::shutdown_signal().await;

    tracing::info!("Shutting down...");
    cancel.cancel();
    match feeder.await {
        Ok(frames) => tracing::debug!(frames, "Source stopped"),
        Err(e) => tracing::warn!("Source task failed: {}", e),
    }
    server.stop().await?;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "livefeed=trace,livefeed_media=debug,livefeed_probe=debug,tower_http=debug".to_string()
        } else {
            "livefeed=info,livefeed_media=info,livefeed_probe=info,tower_http=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve {
            input,
            looping,
            host,
            port,
            quality,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(
                &input,
                looping,
                host,
                port,
                quality,
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { file } => probe_file(&file),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("livefeed {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let stream = livefeed::source::parse_annex_b(&data)
        .with_context(|| format!("Failed to parse {:?}", file))?;

    let sps = decode_sps(&stream.sps);
    let pps = decode_pps(&stream.pps);

    println!("File: {}", file.display());
    println!(
        "Access units: {} ({} keyframes)",
        stream.access_units.len(),
        stream.access_units.iter().filter(|u| u.is_keyframe).count()
    );
    println!();
    print!("{}", detailed_report(&sps, &pps));
    println!();

    match meets_hls_requirements(&sps, &pps) {
        Ok(()) => println!("✓ Stream meets HLS requirements"),
        Err(issues) => {
            println!("✗ Stream does not meet HLS requirements:");
            for issue in &issues {
                let note = if issue.is_fixable() { " (fixed at stream start)" } else { "" };
                println!("  - {}{}", issue, note);
            }
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let stream = &config.stream;
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Clients: max {}, timeout {}s",
        config.server.max_connections, config.server.client_timeout_secs
    );
    println!("  Quality: {}", stream.quality);
    println!(
        "  Segments: {}s, window {}, retained {}",
        stream.segment_duration_secs, stream.playlist_window, stream.max_segments
    );
    println!(
        "  Encoder: {} fps, {} kbps",
        stream.frame_rate,
        stream.bitrate / 1000
    );

    Ok(())
}
