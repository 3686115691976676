use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::commands::CommandHandlers;
use crate::config::{AppConfig, ProbeMode};
use crate::error::CommandError;
use crate::query::{CameraFilter, FleetSummary, QueryFacade};
use crate::types::{CameraPatch, CameraRecord, NewCamera, Resolution, StreamQuality, BRAND_SUGGESTIONS};

pub struct AppState {
    pub commands: CommandHandlers,
    pub queries: QueryFacade,
    pub config: AppConfig,
}

/// Envelope shared by every successful response
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraListResponse {
    pub cameras: Vec<CameraRecord>,
    pub total_count: usize,
}

#[derive(Serialize)]
pub struct ChoiceEntry {
    pub value: String,
    pub label: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub auto_refresh: bool,
    pub probe_mode: ProbeMode,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub offline_after_failures: u32,
    pub default_resolution: Resolution,
    pub default_quality: StreamQuality,
    pub resolutions: Vec<ChoiceEntry>,
    pub qualities: Vec<ChoiceEntry>,
    pub brands: Vec<&'static str>,
}

fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    let body = ApiResponse {
        code: status.as_u16(),
        message: message.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

/// Create the router with all API endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/settings", get(get_settings))
        .route("/api/cameras", get(list_cameras).post(create_camera))
        .route("/api/cameras/summary", get(fleet_summary))
        .route(
            "/api/cameras/:camera_id",
            get(get_camera).patch(update_camera).delete(delete_camera),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_web_server(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("🔧 HTTP server stopped");
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.queries.summary().await;
    respond(StatusCode::OK, "OK", summary)
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    let config = &state.config;
    let settings = SettingsResponse {
        auto_refresh: config.auto_refresh,
        probe_mode: config.probe_mode,
        probe_interval_secs: config.probe_interval_secs,
        probe_timeout_secs: config.probe_timeout_secs,
        offline_after_failures: config.offline_after_failures,
        default_resolution: config.default_resolution,
        default_quality: config.default_quality,
        resolutions: Resolution::ALL
            .iter()
            .map(|r| ChoiceEntry {
                value: r.to_string(),
                label: r.label(),
            })
            .collect(),
        qualities: StreamQuality::ALL
            .iter()
            .map(|q| ChoiceEntry {
                value: q.as_str().to_string(),
                label: q.label(),
            })
            .collect(),
        brands: BRAND_SUGGESTIONS.to_vec(),
    };
    respond(StatusCode::OK, "OK", settings)
}

async fn list_cameras(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CameraFilter>, QueryRejection>,
) -> Result<Response, CommandError> {
    let Query(filter) = query.map_err(|e| CommandError::InvalidPayload(e.body_text()))?;
    let cameras = match (&filter.search, filter.network_type, filter.online) {
        (Some(search), None, None) => state.queries.filter(search).await,
        _ => state.queries.query(&filter).await,
    };
    let response = CameraListResponse {
        total_count: cameras.len(),
        cameras,
    };
    Ok(respond(StatusCode::OK, "OK", response))
}

async fn fleet_summary(State(state): State<Arc<AppState>>) -> Response {
    let summary: FleetSummary = state.queries.summary().await;
    respond(StatusCode::OK, "OK", summary)
}

async fn create_camera(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCamera>, JsonRejection>,
) -> Result<Response, CommandError> {
    let Json(request) = payload.map_err(|e| CommandError::InvalidPayload(e.body_text()))?;
    let record = state.commands.add_camera(request).await?;
    Ok(respond(StatusCode::CREATED, "Camera created", record))
}

async fn get_camera(
    Path(camera_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, CommandError> {
    let record = state.commands.get_camera(&camera_id).await?;
    Ok(respond(StatusCode::OK, "OK", record))
}

async fn update_camera(
    Path(camera_id): Path<String>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CameraPatch>, JsonRejection>,
) -> Result<Response, CommandError> {
    let Json(patch) = payload.map_err(|e| CommandError::InvalidPayload(e.body_text()))?;
    let record = state.commands.update_camera(&camera_id, patch).await?;
    Ok(respond(StatusCode::OK, "Camera updated", record))
}

async fn delete_camera(
    Path(camera_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, CommandError> {
    state.commands.remove_camera(&camera_id).await?;
    Ok(respond(StatusCode::OK, "Camera removed", ()))
}
