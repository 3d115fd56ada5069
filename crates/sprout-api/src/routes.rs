use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sprout_core::db::{Database, LibSqlIngestStore};
use sprout_core::ingest::IngestService;
use sprout_core::models::{SyncBatchRequest, SyncBatchResponse};
use sprout_core::sync::{DEVICE_ID_HEADER, HEALTH_PATH, SYNC_BATCH_PATH};
use sprout_core::util::fingerprint;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::admission::{AdmissionControl, AdmissionSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    ingest: Arc<IngestService<LibSqlIngestStore>>,
    admission: Arc<AdmissionControl>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Arc<Database>) -> Self {
        Self {
            ingest: Arc::new(IngestService::new(LibSqlIngestStore::new(db))),
            admission: Arc::new(AdmissionControl::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(SYNC_BATCH_PATH, post(sync_batch))
        .route("/v1/devices", post(register_device))
        .route("/v1/plants", post(register_plant))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    admission: AdmissionSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        admission: state.admission.snapshot(),
    })
}

async fn sync_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<SyncBatchRequest>,
) -> Result<Json<SyncBatchResponse>, AppError> {
    // Body wins over the header
    let body_device = request
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let header_device = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let device_id = body_device
        .or(header_device)
        .ok_or_else(|| AppError::bad_request("deviceId is required"))?;

    if request.len() > state.config.sync_batch_max_items {
        return Err(AppError::bad_request(format!(
            "batch holds {} items; at most {} are accepted",
            request.len(),
            state.config.sync_batch_max_items
        )));
    }

    state
        .admission
        .admit_batch(&device_id, request.len())
        .await?;

    request.device_id = Some(device_id);
    let response = state.ingest.ingest(&request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDeviceRequest {
    device_id: String,
    principal_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPlantRequest {
    plant_id: String,
    principal_id: String,
}

async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> Result<StatusCode, AppError> {
    state
        .admission
        .admit_registration(&request.principal_id)
        .await?;

    state
        .ingest
        .register_device(&request.device_id, &request.principal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn register_plant(
    State(state): State<AppState>,
    Json(request): Json<RegisterPlantRequest>,
) -> Result<StatusCode, AppError> {
    state
        .admission
        .admit_registration(&request.principal_id)
        .await?;

    state
        .ingest
        .register_plant(&request.plant_id, &request.principal_id)
        .await?;
    tracing::info!(
        endpoint = "register_plant",
        principal = fingerprint(&request.principal_id),
        "Registered plant"
    );
    Ok(StatusCode::NO_CONTENT)
}
