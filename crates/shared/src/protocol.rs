use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::PresentationState, error::ApiError};

pub const STATE_NOT_FOUND: &str = "Presentation state not found";

pub fn state_route() -> &'static str {
    "/api/presentation/state"
}

pub fn snapshots_route() -> &'static str {
    "/api/presentations"
}

pub fn images_route() -> &'static str {
    "/api/images"
}

pub fn image_upload_route() -> &'static str {
    "/api/images/upload"
}

pub fn blobs_route() -> &'static str {
    "/blobs"
}

/// Envelope shared by every endpoint. `success` must be checked alongside the
/// HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

impl From<ApiError> for ApiResponse<()> {
    fn from(value: ApiError) -> Self {
        Self::failure(value.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

/// A named, independently addressable copy of a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    #[serde(flatten)]
    pub state: PresentationState,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshotRequest {
    pub id: String,
    #[serde(flatten)]
    pub state: PresentationState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}
