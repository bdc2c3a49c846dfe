use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{ApiContext, ImageUpload};
use shared::{
    domain::PresentationState,
    error::{ApiError, ErrorCode},
    protocol::{
        blobs_route, image_upload_route, images_route, snapshots_route, state_route, ApiResponse,
        ImageEntry, SnapshotSummary, UploadResponse,
    },
};
use storage::Storage;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type Rejection = (StatusCode, Json<ApiResponse<()>>);
type HttpResult<T> = Result<Json<ApiResponse<T>>, Rejection>;

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let arity = settings.arity()?;
    let public_url = settings.public_url()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            error = %format!("{error:#}"),
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext {
            storage,
            arity,
            public_url,
        },
        max_upload_bytes: settings.max_upload_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, %arity, "presentation server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("presentation server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.max_upload_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route(state_route(), get(http_read_state).post(http_write_state))
        .route(
            snapshots_route(),
            get(http_get_snapshots)
                .post(http_save_snapshot)
                .delete(http_delete_snapshot),
        )
        .route(images_route(), get(http_list_images).delete(http_delete_image))
        .route(
            image_upload_route(),
            post(http_upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(&format!("{}/:name", blobs_route()), get(http_serve_blob))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reject(err: ApiError) -> Rejection {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::from(err)))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state
        .api
        .storage
        .health_check()
        .await
        .map(|()| "ok")
        .map_err(|error| {
            warn!(error = %format!("{error:#}"), "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

async fn http_read_state(State(state): State<Arc<AppState>>) -> HttpResult<PresentationState> {
    let current = server_api::read_live_state(&state.api)
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::ok(current)))
}

async fn http_write_state(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> HttpResult<PresentationState> {
    let stored = server_api::write_live_state(&state.api, &body)
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::ok(stored)))
}

async fn http_get_snapshots(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SnapshotQuery>,
) -> Result<Response, Rejection> {
    match q.id.as_deref() {
        Some(id) => {
            let snapshot = server_api::get_snapshot(&state.api, id)
                .await
                .map_err(reject)?;
            Ok(Json(ApiResponse::ok(snapshot)).into_response())
        }
        None => {
            let summaries = server_api::list_snapshots(&state.api)
                .await
                .map_err(reject)?;
            Ok(Json(ApiResponse::ok(summaries)).into_response())
        }
    }
}

async fn http_save_snapshot(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> HttpResult<SnapshotSummary> {
    let summary = server_api::save_snapshot(&state.api, &body)
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn http_delete_snapshot(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SnapshotQuery>,
) -> HttpResult<()> {
    server_api::delete_snapshot(&state.api, q.id.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::done()))
}

async fn http_list_images(State(state): State<Arc<AppState>>) -> HttpResult<Vec<ImageEntry>> {
    let images = server_api::list_images(&state.api)
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::ok(images)))
}

async fn http_delete_image(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ImageQuery>,
) -> HttpResult<()> {
    server_api::delete_image(&state.api, q.name.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::done()))
}

async fn http_upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> HttpResult<UploadResponse> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(reject_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await.map_err(reject_multipart)?;
        upload = Some(ImageUpload {
            original_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| reject(ApiError::validation("Missing file")))?;
    let stored = server_api::upload_image(&state.api, upload)
        .await
        .map_err(reject)?;
    Ok(Json(ApiResponse::ok(stored)))
}

fn reject_multipart(error: MultipartError) -> Rejection {
    let status = error.status();
    warn!(%error, %status, "rejected multipart upload");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return (status, Json(ApiResponse::failure("File too large")));
    }
    reject(ApiError::validation("Invalid multipart body"))
}

async fn http_serve_blob(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Rejection> {
    let blob = server_api::load_image(&state.api, &name)
        .await
        .map_err(reject)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    // Blob names are generated once and never reused.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    Ok((StatusCode::OK, headers, blob.bytes))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
