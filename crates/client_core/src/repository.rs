use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::PresentationState,
    protocol::{
        image_upload_route, images_route, snapshots_route, state_route, ApiResponse, ImageEntry,
        SaveSnapshotRequest, Snapshot, SnapshotSummary, UploadResponse,
    },
};
use tracing::debug;

use crate::{
    config::ClientConfig,
    error::{SyncError, SyncResult},
};

/// Read/write access to the single live presentation.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn read_state(&self) -> SyncResult<PresentationState>;

    /// Replaces the whole live state and returns the stored value.
    async fn write_state(&self, state: &PresentationState) -> SyncResult<PresentationState>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn list_snapshots(&self) -> SyncResult<Vec<SnapshotSummary>>;
    async fn get_snapshot(&self, id: &str) -> SyncResult<Snapshot>;
    async fn save_snapshot(
        &self,
        id: &str,
        state: &PresentationState,
    ) -> SyncResult<SnapshotSummary>;
    async fn delete_snapshot(&self, id: &str) -> SyncResult<()>;
}

/// HTTP+JSON implementation of both repositories plus the image library.
#[derive(Debug, Clone)]
pub struct HttpPresentationClient {
    http: Client,
    config: ClientConfig,
}

impl HttpPresentationClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn list_images(&self) -> SyncResult<Vec<ImageEntry>> {
        let response = self
            .http
            .get(self.config.endpoint(images_route()))
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }

    /// Uploads one file through the multipart `file` field and returns its public URL.
    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> SyncResult<String> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())
            .map_err(SyncError::transport)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.config.endpoint(image_upload_route()))
            .multipart(form)
            .send()
            .await
            .map_err(SyncError::transport)?;
        let uploaded: UploadResponse = expect_data(response).await?;
        Ok(uploaded.url)
    }

    pub async fn delete_image(&self, name: &str) -> SyncResult<()> {
        let response = self
            .http
            .delete(self.config.endpoint(images_route()))
            .query(&[("name", name)])
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_done(response).await
    }
}

#[async_trait]
impl StateRepository for HttpPresentationClient {
    async fn read_state(&self) -> SyncResult<PresentationState> {
        let response = self
            .http
            .get(self.config.endpoint(state_route()))
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }

    async fn write_state(&self, state: &PresentationState) -> SyncResult<PresentationState> {
        let response = self
            .http
            .post(self.config.endpoint(state_route()))
            .json(state)
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }
}

#[async_trait]
impl SnapshotRepository for HttpPresentationClient {
    async fn list_snapshots(&self) -> SyncResult<Vec<SnapshotSummary>> {
        let response = self
            .http
            .get(self.config.endpoint(snapshots_route()))
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }

    async fn get_snapshot(&self, id: &str) -> SyncResult<Snapshot> {
        let response = self
            .http
            .get(self.config.endpoint(snapshots_route()))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }

    async fn save_snapshot(
        &self,
        id: &str,
        state: &PresentationState,
    ) -> SyncResult<SnapshotSummary> {
        let request = SaveSnapshotRequest {
            id: id.to_string(),
            state: state.clone(),
        };
        let response = self
            .http
            .post(self.config.endpoint(snapshots_route()))
            .json(&request)
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_data(response).await
    }

    async fn delete_snapshot(&self, id: &str) -> SyncResult<()> {
        let response = self
            .http
            .delete(self.config.endpoint(snapshots_route()))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(SyncError::transport)?;
        expect_done(response).await
    }
}

async fn expect_data<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    let envelope: ApiResponse<T> = decode_envelope(response).await?;
    envelope.data.ok_or_else(|| SyncError::UnexpectedServer {
        status: status.as_u16(),
        message: "response carried no data".to_string(),
    })
}

async fn expect_done(response: Response) -> SyncResult<()> {
    decode_envelope::<serde_json::Value>(response)
        .await
        .map(|_| ())
}

/// Accepts a response only when the status is 2xx and the envelope reports
/// success. A 404 without an envelope is an unreachable route, not an absent
/// record.
async fn decode_envelope<T: DeserializeOwned>(response: Response) -> SyncResult<ApiResponse<T>> {
    let status = response.status();
    let body = response.bytes().await.map_err(SyncError::transport)?;
    let envelope = match serde_json::from_slice::<ApiResponse<T>>(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(%status, %error, "response body is not an api envelope");
            return Err(SyncError::UnexpectedServer {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string(),
            });
        }
    };

    if status.is_success() && envelope.success {
        return Ok(envelope);
    }
    Err(classify_failure(status, envelope))
}

fn classify_failure<T>(status: StatusCode, envelope: ApiResponse<T>) -> SyncError {
    let message = envelope.error.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    if envelope.success {
        return SyncError::UnexpectedServer {
            status: status.as_u16(),
            message,
        };
    }
    match status {
        StatusCode::BAD_REQUEST => SyncError::Validation(message),
        StatusCode::NOT_FOUND => SyncError::NotFound(message),
        _ => SyncError::UnexpectedServer {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
#[path = "tests/repository_tests.rs"]
mod tests;
