use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::service::{DetectionService, StartError};
use crate::storage::ExportError;

#[derive(Clone)]
pub struct AppState {
    pub service: DetectionService,
}

impl AppState {
    pub fn new(service: DetectionService) -> Self {
        Self { service }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct StopResponse {
    stopped: bool,
}

#[derive(Deserialize)]
struct SessionsQuery {
    /// Comma-separated class names. Absent means every class.
    classes: Option<String>,
}

#[derive(Serialize)]
struct SessionItem {
    class: String,
    start: String,
    end: String,
    duration_secs: f64,
}

#[derive(Deserialize)]
struct ReportRequest {
    path: PathBuf,
    classes: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ReportResponse {
    path: String,
    sessions: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/start", post(start_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/events", get(events_handler))
        .route("/api/report", post(report_handler))
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

async fn start_handler(State(state): State<AppState>) -> Response {
    match state.service.start() {
        Ok(()) => message(StatusCode::ACCEPTED, "detection started"),
        Err(StartError::AlreadyRunning) => {
            message(StatusCode::CONFLICT, "detection is already running")
        }
        Err(e) => message(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StopResponse {
        stopped: state.service.stop(),
    })
}

async fn sessions_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> impl IntoResponse {
    let classes: Option<Vec<String>> = query.classes.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    });

    let sessions: Vec<SessionItem> = state
        .service
        .sessions(classes.as_deref())
        .into_iter()
        .map(|s| SessionItem {
            duration_secs: s.duration_secs(),
            start: s.start.format("%Y-%m-%d %H:%M:%S").to_string(),
            end: s.end.format("%Y-%m-%d %H:%M:%S").to_string(),
            class: s.class,
        })
        .collect();

    Json(sessions)
}

async fn events_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.events())
}

async fn report_handler(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Response {
    match state
        .service
        .export(&request.path, request.classes.as_deref())
    {
        Ok(sessions) => Json(ReportResponse {
            path: request.path.display().to_string(),
            sessions,
        })
        .into_response(),
        Err(ExportError::NoSessions) => message(
            StatusCode::NOT_FOUND,
            "no detections with the current filters to report",
        ),
        Err(e) => message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
