use crate::config::{Config, QualityMode, StreamConfig};
use crate::events::EventDispatcher;
use crate::streaming::{
    self, start_sweep_task, ClientTracker, EncoderControl, EncoderEvent, EncoderSink, LiveSession,
    SegmentObserver, SegmentStore, StoreLimits,
};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use uuid::Uuid;

/// Longest stream title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Title and quality shown to viewers; edited independently of the media lanes.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetadata {
    pub title: String,
    pub quality: QualityMode,
}

impl StreamMetadata {
    pub fn new(title: &str, quality: QualityMode) -> Self {
        Self {
            title: truncate_title(title),
            quality,
        }
    }
}

fn truncate_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_CHARS).collect()
}

fn random_path(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub clients: ClientTracker,
    pub observer: Arc<SegmentObserver>,
    pub events: Arc<EventDispatcher>,
    /// Separate lock from the segment store
    pub metadata: Arc<RwLock<StreamMetadata>>,
    session: Arc<RwLock<Arc<LiveSession>>>,
    path_prefix: Arc<RwLock<String>>,
    control: Arc<dyn EncoderControl>,
}

impl AppContext {
    /// Build the context and spawn an idle session. Requires a tokio runtime.
    pub fn new(config: Config, events: Arc<EventDispatcher>, control: Arc<dyn EncoderControl>) -> Self {
        let observer = Arc::new(SegmentObserver::new());
        let clients = ClientTracker::new(config.server.client_timeout(), Arc::clone(&events));
        let metadata = StreamMetadata::new(&config.stream.title, config.stream.quality);
        let session = spawn_session(
            config.stream.clone(),
            Arc::clone(&observer),
            Arc::clone(&events),
            Arc::clone(&control),
        );

        Self {
            path_prefix: Arc::new(RwLock::new(random_path(config.server.path_length))),
            config: Arc::new(config),
            clients,
            observer,
            events,
            metadata: Arc::new(RwLock::new(metadata)),
            session: Arc::new(RwLock::new(Arc::new(session))),
            control,
        }
    }

    pub fn session(&self) -> Arc<LiveSession> {
        Arc::clone(&self.session.read())
    }

    /// Encoder sink that follows the current session across restarts.
    pub fn encoder_input(&self) -> SessionInput {
        SessionInput {
            session: Arc::clone(&self.session),
        }
    }

    pub fn path_prefix(&self) -> String {
        self.path_prefix.read().clone()
    }

    /// Pick a new random path prefix; old URLs stop resolving.
    pub fn regenerate_path(&self) -> String {
        let path = random_path(self.config.server.path_length);
        *self.path_prefix.write() = path.clone();
        tracing::info!(path = %path, "Stream path regenerated");
        path
    }

    pub fn set_title(&self, title: &str) {
        self.metadata.write().title = truncate_title(title);
    }

    /// Takes effect on the next [`restart_session`](Self::restart_session).
    pub fn set_quality(&self, quality: QualityMode) {
        self.metadata.write().quality = quality;
    }

    /// Stream settings for the next session, honouring a changed quality mode.
    fn next_stream_config(&self) -> StreamConfig {
        let metadata = self.metadata.read().clone();
        if metadata.quality == self.config.stream.quality {
            return self.config.stream.clone();
        }
        StreamConfig {
            title: metadata.title,
            ..StreamConfig::preset(metadata.quality)
        }
    }

    /// Stop the current session and start a new one on a fresh path.
    ///
    /// The new session waits for parameter sets and builds a new init segment.
    pub async fn restart_session(&self) -> Arc<LiveSession> {
        let current = self.session();
        let config = self.next_stream_config();

        let next = if config.quality == current.config().quality {
            current.restart().await
        } else {
            current.stop().await;
            spawn_session(
                config,
                Arc::clone(&self.observer),
                Arc::clone(&self.events),
                Arc::clone(&self.control),
            )
        };

        let next = Arc::new(next);
        *self.session.write() = Arc::clone(&next);
        self.regenerate_path();
        next
    }
}

/// Forwards encoder events to whichever session is current.
#[derive(Clone)]
pub struct SessionInput {
    session: Arc<RwLock<Arc<LiveSession>>>,
}

impl EncoderSink for SessionInput {
    fn submit(&self, event: EncoderEvent) -> bool {
        self.session.read().encoder_input().submit(event)
    }

    /// Open for as long as the context lives; a stopped session is replaced
    /// on restart.
    fn is_accepting(&self) -> bool {
        true
    }

    fn session_id(&self) -> Uuid {
        self.session.read().id()
    }
}

fn spawn_session(
    config: StreamConfig,
    observer: Arc<SegmentObserver>,
    events: Arc<EventDispatcher>,
    control: Arc<dyn EncoderControl>,
) -> LiveSession {
    let store = Arc::new(SegmentStore::new(StoreLimits::from(&config)));
    LiveSession::spawn(config, store, observer, events, control)
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let max_connections = ctx.config.server.max_connections.max(1);

    Router::new()
        .route("/health", get(health_check))
        .merge(streaming::hls_router())
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// A bound, running HTTP server.
pub struct StreamServer {
    ctx: AppContext,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    serve_task: Option<JoinHandle<std::io::Result<()>>>,
    sweep_task: JoinHandle<()>,
}

impl StreamServer {
    /// Bind the configured address and start serving.
    ///
    /// Bind failures are also reported through the error event.
    pub async fn start(ctx: AppContext) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
        let socket: SocketAddr = match addr.parse() {
            Ok(socket) => socket,
            Err(_) => {
                let err = ServerError::InvalidAddress(addr);
                ctx.events.error_occurred(&err.to_string());
                return Err(err);
            }
        };

        let listener = match tokio::net::TcpListener::bind(socket).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = ServerError::Bind { addr, source };
                ctx.events.error_occurred(&err.to_string());
                return Err(err);
            }
        };
        let local_addr = listener.local_addr()?;

        let app = create_router(ctx.clone());
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let serve_task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        });

        let sweep_task = start_sweep_task(ctx.clients.clone(), ctx.config.server.sweep_interval());

        let server = Self {
            ctx,
            local_addr,
            cancel,
            serve_task: Some(serve_task),
            sweep_task,
        };
        tracing::info!("Streaming on {}", server.playlist_url());
        server.ctx.events.server_started(&server.base_url());
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://<addr>/<prefix>/`; follows path regeneration.
    pub fn base_url(&self) -> String {
        format!("http://{}/{}/", self.local_addr, self.ctx.path_prefix())
    }

    pub fn playlist_url(&self) -> String {
        format!("{}{}", self.base_url(), streaming::PLAYLIST_NAME)
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Terminate the stream, let in-flight responses finish, then refuse new ones.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        self.ctx.session().stop().await;
        self.cancel.cancel();
        self.sweep_task.abort();

        let result = match self.serve_task.take() {
            Some(task) => match task.await {
                Ok(result) => result.map_err(ServerError::Io),
                Err(e) => Err(ServerError::Io(std::io::Error::other(e))),
            },
            None => Ok(()),
        };

        let dropped = self.ctx.clients.disconnect_all();
        tracing::info!(clients = dropped, "Server shutdown complete");
        self.ctx.events.server_stopped();
        result
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.sweep_task.abort();
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
