// Studio Student Directory - Web Server
// JSON API for the admin dashboard, built with Axum

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use studio_directory::{
    monthly_status_histogram, status_counts, ChangeHub, DirectoryAggregator, DirectoryConfig,
    DirectoryError, DirectorySnapshot, Identity, MonthlyStatusCount, SessionContext,
    SqliteBackend, StatusCounts, StudentEntry, StudentStatus,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    backend: Arc<SqliteBackend>,
    hub: ChangeHub,
}

impl AppState {
    fn aggregator(&self) -> DirectoryAggregator {
        DirectoryAggregator::from_backend(self.backend.clone())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Directory response: snapshot plus the degraded-build warning, if any
#[derive(Serialize)]
struct DirectoryResponse {
    #[serde(flatten)]
    snapshot: DirectorySnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

#[derive(Deserialize)]
struct StatusChangeRequest {
    status: String,
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError(DirectoryError);

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DirectoryError::AccessDenied(_) => StatusCode::FORBIDDEN,
            DirectoryError::EntryNotFound(_) => StatusCode::NOT_FOUND,
            DirectoryError::UnsupportedForRecordOnly(_) => StatusCode::CONFLICT,
            DirectoryError::InvalidStatus(_) | DirectoryError::InvalidIdentity(_) => {
                StatusCode::BAD_REQUEST
            }
            DirectoryError::SourceUnavailable(_) | DirectoryError::SourcePartiallyUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DirectoryError::PersistenceFailed(_) => StatusCode::BAD_GATEWAY,
            DirectoryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !self.0.is_caller_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Helpers
// ============================================================================

/// Caller identity comes from the `x-user-id` header
async fn session_from(state: &AppState, headers: &HeaderMap) -> Result<SessionContext, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DirectoryError::AccessDenied("anonymous".into()))?;
    Ok(SessionContext::resolve(state.backend.as_ref(), user_id).await?)
}

async fn load_snapshot(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(DirectoryAggregator, SessionContext, DirectorySnapshot), ApiError> {
    let session = session_from(state, headers).await?;
    let aggregator = state.aggregator();
    let snapshot = aggregator.load(&session).await?;
    Ok((aggregator, session, snapshot))
}

fn entry_of(snapshot: &DirectorySnapshot, identity: &Identity) -> Result<StudentEntry, ApiError> {
    snapshot
        .get(identity)
        .cloned()
        .ok_or_else(|| ApiError(DirectoryError::EntryNotFound(identity.clone())))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/students - Merged student directory
async fn get_students(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<DirectoryResponse> {
    let (_, _, snapshot) = load_snapshot(&state, &headers).await?;
    let warning = snapshot.partial_failure().map(|w| w.to_string());
    Ok(Json(ApiResponse::ok(DirectoryResponse { snapshot, warning })))
}

/// GET /api/students/counts - Students per current status
async fn get_counts(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCounts> {
    let (_, _, snapshot) = load_snapshot(&state, &headers).await?;
    Ok(Json(ApiResponse::ok(status_counts(&snapshot.entries))))
}

/// GET /api/students/histogram - Monthly status series
async fn get_histogram(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<MonthlyStatusCount>> {
    let (_, _, snapshot) = load_snapshot(&state, &headers).await?;
    Ok(Json(ApiResponse::ok(monthly_status_histogram(&snapshot.entries))))
}

/// POST /api/students/:identity/status - Change a student's status
async fn post_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
    Json(body): Json<StatusChangeRequest>,
) -> ApiResult<StudentEntry> {
    let identity: Identity = identity.parse()?;
    let status: StudentStatus = body.status.parse()?;
    let (aggregator, session, snapshot) = load_snapshot(&state, &headers).await?;

    let next = aggregator
        .apply_status_change(&session, &snapshot, &identity, status)
        .await?;
    Ok(Json(ApiResponse::ok(entry_of(&next, &identity)?)))
}

/// POST /api/students/:identity/self-eval - Toggle self-evaluation access
async fn post_self_eval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> ApiResult<StudentEntry> {
    let identity: Identity = identity.parse()?;
    let (aggregator, session, snapshot) = load_snapshot(&state, &headers).await?;

    let next = aggregator
        .toggle_self_eval(&session, &snapshot, &identity)
        .await?;
    Ok(Json(ApiResponse::ok(entry_of(&next, &identity)?)))
}

/// GET /api/students/changes - Row-change events as Server-Sent Events
///
/// The client folds each event into its snapshot and reloads on `resync`.
/// Closing the connection drops the subscription.
async fn get_changes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    session_from(&state, &headers).await?.require_admin()?;

    let subscription = state.hub.subscribe();
    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next().await?;
        Some((SseEvent::default().json_data(&event), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("STUDIO_CONFIG").unwrap_or_else(|_| "studio.toml".into());
    let config = DirectoryConfig::load_or_default(std::path::Path::new(&config_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let hub = ChangeHub::new(config.database.event_capacity);
    let backend = SqliteBackend::open(std::path::Path::new(&config.database.path))?
        .with_change_hub(hub.clone());
    info!(path = %config.database.path, "database opened");

    let state = AppState {
        backend: Arc::new(backend),
        hub,
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/students", get(get_students))
        .route("/students/counts", get(get_counts))
        .route("/students/histogram", get(get_histogram))
        .route("/students/changes", get(get_changes))
        .route("/students/:identity/status", post(post_status))
        .route("/students/:identity/self-eval", post(post_self_eval))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
