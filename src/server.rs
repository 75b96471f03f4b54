use crate::config::ServerConfig;
use crate::error::TrackerError;
use crate::pipeline::IngestPipeline;
use crate::query::{QueryService, ViolationQueryParams};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
    pub pipeline: Arc<IngestPipeline>,
}

/// Error response body: `{"error": "<kind>", "message": "..."}`
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::Validation(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::RunInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(kind = self.0.kind(), "request failed: {}", self.0);
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(TrackerError::Validation(rejection.body_text()))
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "violations_tracker",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_violations(
    State(state): State<AppState>,
    query: Result<Query<ViolationQueryParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = query?;
    Ok(Json(state.query.list(&params).await?))
}

async fn get_violation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.query.get(&id).await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.query.stats().await?))
}

async fn states(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.query.states().await?))
}

#[derive(Debug, Deserialize)]
struct RunsParams {
    limit: Option<String>,
}

async fn runs(
    State(state): State<AppState>,
    query: Result<Query<RunsParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = query?;
    Ok(Json(state.query.runs(params.limit.as_deref()).await?))
}

#[derive(Debug, Default, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    full: bool,
}

/// Start a run in the background; 409 while another run holds the lease.
async fn trigger_ingest(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| TrackerError::Validation(format!("invalid ingest request: {e}")))?
    };

    let run = state.pipeline.try_begin(request.full).await?;
    let run_id = run.run_id();
    tokio::spawn(async move {
        if let Err(e) = run.execute().await {
            error!(%run_id, "background ingestion run failed: {}", e);
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id, "status": "started" })),
    )
        .into_response())
}

async fn metrics() -> Response {
    match crate::metrics::render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let static_dir: PathBuf = config.static_dir.clone();

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/violations", get(list_violations))
        .route("/api/violations/:id", get(get_violation))
        .route("/api/stats", get(stats))
        .route("/api/states", get(states))
        .route("/api/runs", get(runs))
        .route("/admin/ingest", post(trigger_ingest))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_seconds.max(1),
                )))
                .layer(cors),
        )
}

/// Serve until ctrl-c
pub async fn start_server(state: AppState, config: &ServerConfig) -> crate::error::Result<()> {
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|_| TrackerError::Config(format!("server.host '{}' is not an IP address", config.host)))?;
    let addr = SocketAddr::new(ip, config.port);
    let app = create_server(state, config);

    info!("HTTP server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    Server::try_bind(&addr)
        .map_err(|e| TrackerError::Config(format!("cannot bind {addr}: {e}")))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("could not listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await
        .map_err(|e| TrackerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(())
}
