//! HTTP API over [`WidgetService`].

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, task};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::PortmeshError;
use crate::reconciler::{ReconcilerHandle, ReconcilerStats};
use crate::service::WidgetService;
use crate::types::{PortSet, PortType, Widget, WidgetConnections};

/// Network options for [`serve`].
#[derive(Clone, Debug)]
pub struct ApiOptions {
    /// Interface to bind to.
    pub host: IpAddr,
    /// Listening port.
    pub port: u16,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

impl ApiOptions {
    /// Socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}

/// Errors that stop the HTTP server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Binding or accepting failed.
    #[error("api server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type AppState = Arc<ApiState>;

struct ApiState {
    service: WidgetService,
}

/// Binds `options`, serves until Ctrl-C and then stops and flushes
/// `reconciler`.
pub async fn serve(
    options: ApiOptions,
    service: WidgetService,
    reconciler: Option<ReconcilerHandle>,
) -> Result<Option<ReconcilerStats>, ServeError> {
    let addr = options.socket_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api.listening");
    serve_on(listener, service, reconciler, shutdown_signal()).await
}

/// Serves on an already bound listener until `signal` resolves, then stops
/// `reconciler`, flushes what is still queued and returns its final counters.
pub async fn serve_on<F>(
    listener: TcpListener,
    service: WidgetService,
    reconciler: Option<ReconcilerHandle>,
    signal: F,
) -> Result<Option<ReconcilerStats>, ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let served = axum::serve(listener, router(service).into_make_service())
        .with_graceful_shutdown(signal)
        .await;
    let stats = match reconciler {
        Some(handle) => {
            let stats = handle.shutdown_and_flush().await;
            tracing::info!(?stats, "api.reconciler_stopped");
            Some(stats)
        }
        None => None,
    };
    served?;
    Ok(stats)
}

/// Builds the application router.
pub fn router(service: WidgetService) -> Router {
    let state = Arc::new(ApiState { service });
    Router::new()
        .route("/health", get(health_handler))
        .route("/widgets", post(create_widget_handler))
        .route("/widgets/associations", put(associate_handler))
        .route("/widgets/:serial/connections", get(connections_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct CreateWidgetRequest {
    name: String,
    serial_number: String,
    #[serde(default)]
    ports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssociateRequest {
    port_type: String,
    widget_serial_num: String,
    peer_widget_serial_num: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    pending_updates: usize,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    message: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let service = state.service.clone();
    let pending_updates = task::spawn_blocking(move || service.fast().pending_len()).await??;
    Ok(Json(HealthResponse {
        status: "ok",
        pending_updates,
    }))
}

async fn create_widget_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateWidgetRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Widget>), ApiError> {
    let Json(req) = payload?;
    let widget = Widget::new(req.name, req.serial_number, PortSet::from_names(&req.ports));
    let service = state.service.clone();
    let created = task::spawn_blocking(move || service.create_widget(&widget)).await??;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn associate_handler(
    State(state): State<AppState>,
    payload: Result<Json<AssociateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessagePayload>), ApiError> {
    let Json(req) = payload?;
    let port: PortType = req.port_type.parse()?;
    let service = state.service.clone();
    task::spawn_blocking(move || {
        service.create_connection(&req.widget_serial_num, port, &req.peer_widget_serial_num)
    })
    .await??;
    Ok((
        StatusCode::CREATED,
        Json(MessagePayload {
            message: "widget association updated",
        }),
    ))
}

async fn connections_handler(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<WidgetConnections>, ApiError> {
    let service = state.service.clone();
    let lookup = serial.clone();
    match task::spawn_blocking(move || service.connections(&lookup)).await?? {
        Some(conns) => Ok(Json(conns)),
        None => Err(ApiError::NotFound(format!("widget {serial}"))),
    }
}

/// Error returned by handlers; maps to a status code and a JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be decoded.
    #[error("could not parse request body: {0}")]
    Body(#[from] JsonRejection),
    /// Store or validation failure.
    #[error(transparent)]
    Store(#[from] PortmeshError),
    /// The requested resource does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// A blocking task panicked or was cancelled.
    #[error("internal task failure: {0}")]
    Join(#[from] task::JoinError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Body(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(PortmeshError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(PortmeshError::NotFound(_)) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Store(_) | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "api.request_failed");
        }
        let body = Json(ErrorPayload {
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    message: String,
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("api.shutdown_signal"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Later calls are no-ops.
pub fn install_tracing_subscriber() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).try_init();
    });
}
