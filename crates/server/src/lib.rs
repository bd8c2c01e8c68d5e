//! Findr Server
//!
//! HTTP transport over a single [`SessionManager`]:
//! - JSON endpoints for session admission, pipeline initialization, and teardown
//! - `GET /stream/{id}` serves the clean frames as multipart MJPEG
//! - `GET /ws/stream/{id}` pushes one JSON message per processed frame
//! - `POST /upload_file` stores a media file for later sessions

pub mod error;
pub mod handlers;
pub mod stream;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use findr_common::config::AppConfig;
use findr_pipeline::{CapabilityRegistry, UnlinkedModelLoader};
use findr_stream_engine::{DefaultSourceOpener, EngineSettings, SessionManager};

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, upload_dir: PathBuf) -> Self {
        Self {
            manager,
            upload_dir,
        }
    }

    /// State with the built-in capabilities and the default source opener.
    pub fn from_config(config: &AppConfig) -> Self {
        let registry = CapabilityRegistry::with_builtins(Arc::new(UnlinkedModelLoader));
        let manager = SessionManager::new(
            Arc::new(registry),
            Arc::new(DefaultSourceOpener::default()),
            EngineSettings::from_config(config),
        );
        Self::new(Arc::new(manager), config.upload_dir.clone())
    }
}

/// Build the application router.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/capabilities", get(handlers::list_capabilities))
        .route("/session", get(handlers::session_status))
        .route("/session/init", post(handlers::init_session))
        .route("/session/reset", post(handlers::reset_session))
        .route(
            "/session/{id}/initialize_pipeline",
            post(handlers::initialize_pipeline),
        )
        .route("/session/{id}/end", post(handlers::end_session))
        .route("/upload_file", post(handlers::upload_file))
        .route("/stream/{id}", get(stream::mjpeg_stream))
        .route("/ws/stream/{id}", get(stream::result_socket))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serve on an already-bound listener until the process exits.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    allowed_origins: &[String],
) -> std::io::Result<()> {
    let app = build_router(state, allowed_origins);
    tracing::info!(addr = ?listener.local_addr().ok(), "Server listening");
    axum::serve(listener, app).await
}

/// Bind `addr` and serve.
pub async fn start_server(addr: &str, config: &AppConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(
        listener,
        AppState::from_config(config),
        &config.server.allowed_origins,
    )
    .await
}
