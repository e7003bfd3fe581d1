use crate::auth::{AuthenticatedUser, TokenVerifier};
use crate::collection::{CollectionService, PhotoSummary};
use crate::config::ApiConfig;
use crate::error::CollectionError;
use crate::keys::raw_photo_key;
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, FromRef, Multipart, Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Uploads are capped well above any phone photo.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub collection: Arc<CollectionService>,
    pub objects: Arc<dyn ObjectStore>,
    pub verifier: Arc<TokenVerifier>,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn server_error(code: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal server error".to_string(),
            code: code.to_string(),
        }),
    )
}

/// Outcome of a delete operation, shaped as dashboard clients expect.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<usize>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(parse_cors_origins(&config.cors_origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/photos", get(list_photos))
        .route("/api/photos", delete(delete_all_photos))
        .route("/api/photos/:photo_id", delete(delete_photo))
        .route("/api/upload", post(upload_photos))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Parse configured CORS origins, logging any entry that is not a valid
/// header value instead of dropping it silently.
fn parse_cors_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect()
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photobank"
    }))
}

/// List the caller's photo collection with fresh presigned URLs
#[instrument(skip(state, user), fields(owner_id = %user.sub))]
async fn list_photos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PhotoSummary>>, ApiError> {
    let photos = state.collection.list_photos(&user.sub).await.map_err(|e| {
        error!(error = %e, "Failed to list photos");
        server_error("LIST_ERROR")
    })?;

    Ok(Json(photos))
}

/// Accept one or more photo uploads and write them to the raw namespace.
///
/// Identifier generation for the catalog happens in the pipeline; this
/// handler only mints the object key and returns without waiting for
/// processing.
#[instrument(skip(state, user, multipart), fields(owner_id = %user.sub))]
async fn upload_photos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut uploaded = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Malformed multipart upload");
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: "Malformed multipart body".to_string(),
                        code: "BAD_UPLOAD".to_string(),
                    }),
                ));
            }
        };

        let Some(filename) = field.file_name().map(String::from) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = field.bytes().await.map_err(|e| {
            error!(error = %e, filename = %filename, "Failed to read upload body");
            server_error("UPLOAD_ERROR")
        })?;

        let photo_id = Uuid::new_v4().to_string();
        let key = raw_photo_key(&user.sub, &photo_id, extension_of(&filename));

        state
            .objects
            .put_object(&key, data.to_vec(), &content_type)
            .await
            .map_err(|e| {
                error!(error = %e, key = %key, "Failed to store upload");
                server_error("UPLOAD_ERROR")
            })?;

        metrics::counter!("photobank.photos.uploaded").increment(1);
        uploaded += 1;
    }

    info!(owner_id = %user.sub, uploaded, "Upload accepted");

    // Clients only care about the status; processing happens asynchronously.
    Ok(Json(serde_json::Value::Null))
}

/// Delete the caller's entire collection
#[instrument(skip(state, user), fields(owner_id = %user.sub))]
async fn delete_all_photos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<DeleteResponse>, ApiError> {
    let summary = state
        .collection
        .delete_all_photos(&user.sub)
        .await
        .map_err(|e| {
            error!(error = %e, "Bulk delete failed");
            server_error("DELETE_ERROR")
        })?;

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Deleted {} photos", summary.deleted_count),
        deleted_count: Some(summary.deleted_count),
    }))
}

/// Delete a single photo by id
#[instrument(skip(state, user), fields(owner_id = %user.sub))]
async fn delete_photo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(photo_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    match state.collection.delete_photo(&user.sub, &photo_id).await {
        Ok(()) => Ok(Json(DeleteResponse {
            success: true,
            message: "Photo deleted successfully".to_string(),
            deleted_count: None,
        })),
        Err(CollectionError::NotFound) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Photo not found".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )),
        Err(e) => {
            error!(error = %e, photo_id = %photo_id, "Delete failed");
            Err(server_error("DELETE_ERROR"))
        }
    }
}

/// File extension of an uploaded filename, defaulting to `jpg` when missing.
fn extension_of(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "jpg",
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
