use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::{PresentationState, SlideArity, LIVE_STATE_KEY},
    error::ApiError,
    protocol::{blobs_route, ImageEntry, Snapshot, SnapshotSummary, UploadResponse, STATE_NOT_FOUND},
    validation::{parse_state_payload, validate_state_value},
};
use storage::{Storage, StoredBlob};
use tracing::{error, info};
use uuid::Uuid;

pub const MAX_LISTED_IMAGES: u32 = 1000;
pub const MAX_SNAPSHOT_ID_BYTES: usize = 128;
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";
const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub arity: SlideArity,
    /// Base URL prefixed to blob names when publishing image references.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ApiContext {
    pub fn blob_url(&self, name: &str) -> String {
        format!(
            "{}{}/{name}",
            self.public_url.trim_end_matches('/'),
            blobs_route()
        )
    }
}

pub async fn read_live_state(ctx: &ApiContext) -> Result<PresentationState, ApiError> {
    ctx.storage
        .load_presentation(LIVE_STATE_KEY)
        .await
        .map_err(internal("Failed to retrieve presentation state"))?
        .map(|snapshot| snapshot.state)
        .ok_or_else(|| ApiError::not_found(STATE_NOT_FOUND))
}

/// Validates then upserts the full live state, echoing what was stored.
/// A rejected payload leaves the stored state untouched.
pub async fn write_live_state(ctx: &ApiContext, body: &[u8]) -> Result<PresentationState, ApiError> {
    let state = parse_state_payload(body, ctx.arity)?;
    let stored = ctx
        .storage
        .upsert_presentation(LIVE_STATE_KEY, &state)
        .await
        .map_err(internal("Failed to update presentation state"))?;
    info!(
        slides = stored.state.slides.len(),
        current_slide_index = stored.state.current_slide_index,
        "live presentation state replaced"
    );
    Ok(stored.state)
}

pub async fn list_snapshots(ctx: &ApiContext) -> Result<Vec<SnapshotSummary>, ApiError> {
    ctx.storage
        .list_presentations(Some(LIVE_STATE_KEY))
        .await
        .map_err(internal("Failed to fetch presentations"))
}

pub async fn get_snapshot(ctx: &ApiContext, id: &str) -> Result<Snapshot, ApiError> {
    let id = checked_snapshot_id(Some(id))?;
    ctx.storage
        .load_presentation(id)
        .await
        .map_err(internal("Failed to fetch presentations"))?
        .ok_or_else(|| ApiError::not_found("Presentation not found"))
}

pub async fn save_snapshot(ctx: &ApiContext, body: &[u8]) -> Result<SnapshotSummary, ApiError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::validation("Invalid payload"))?;
    let id = checked_snapshot_id(value.get("id").and_then(Value::as_str))?;
    let state = validate_state_value(&value, ctx.arity)?;
    let stored = ctx
        .storage
        .upsert_presentation(id, &state)
        .await
        .map_err(internal("Failed to save presentation"))?;
    info!(snapshot_id = %stored.id, slides = state.slides.len(), "snapshot saved");
    Ok(stored.summary())
}

pub async fn delete_snapshot(ctx: &ApiContext, id: Option<&str>) -> Result<(), ApiError> {
    let id = checked_snapshot_id(id)?;
    let removed = ctx
        .storage
        .delete_presentation(id)
        .await
        .map_err(internal("Failed to delete presentation"))?;
    info!(snapshot_id = %id, removed, "snapshot delete requested");
    Ok(())
}

pub async fn list_images(ctx: &ApiContext) -> Result<Vec<ImageEntry>, ApiError> {
    let blobs = ctx
        .storage
        .list_blobs(MAX_LISTED_IMAGES)
        .await
        .map_err(internal("Failed to list images"))?;
    Ok(blobs
        .into_iter()
        .map(|blob| ImageEntry {
            url: ctx.blob_url(&blob.name),
            name: blob.name,
        })
        .collect())
}

pub async fn upload_image(ctx: &ApiContext, upload: ImageUpload) -> Result<UploadResponse, ApiError> {
    if upload.bytes.is_empty() {
        return Err(ApiError::validation("Missing file"));
    }

    let name = generated_blob_name(upload.original_name.as_deref());
    let content_type = upload
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_raw()
                .unwrap_or(DEFAULT_IMAGE_CONTENT_TYPE)
                .to_owned()
        });

    ctx.storage
        .store_blob(&name, &content_type, &upload.bytes)
        .await
        .map_err(internal("Failed to upload image"))?;
    info!(%name, %content_type, size_bytes = upload.bytes.len(), "image stored");
    Ok(UploadResponse {
        url: ctx.blob_url(&name),
    })
}

pub async fn delete_image(ctx: &ApiContext, name: Option<&str>) -> Result<(), ApiError> {
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::validation("Missing name"))?;
    ctx.storage
        .delete_blob(name)
        .await
        .map_err(internal("Failed to delete image"))?;
    Ok(())
}

pub async fn load_image(ctx: &ApiContext, name: &str) -> Result<StoredBlob, ApiError> {
    ctx.storage
        .load_blob(name)
        .await
        .map_err(internal("Failed to load image"))?
        .ok_or_else(|| ApiError::not_found("Image not found"))
}

fn checked_snapshot_id(id: Option<&str>) -> Result<&str, ApiError> {
    let id = id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("Missing id"))?;
    if id.len() > MAX_SNAPSHOT_ID_BYTES {
        return Err(ApiError::validation("Presentation id is too long"));
    }
    if id == LIVE_STATE_KEY {
        return Err(ApiError::validation(format!(
            "Presentation id '{LIVE_STATE_KEY}' is reserved for the live state"
        )));
    }
    Ok(id)
}

fn generated_blob_name(original_name: Option<&str>) -> String {
    let extension = original_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string());
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}.{extension}",
        Utc::now().timestamp_millis(),
        &random[..10]
    )
}

fn internal(message: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
    move |err| {
        error!(error = %format!("{err:#}"), "{message}");
        ApiError::internal(message)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
