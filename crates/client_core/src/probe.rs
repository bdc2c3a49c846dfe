use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedImage {
    pub width: u32,
    pub height: u32,
}

/// Checks that an image reference can actually be shown before it replaces
/// the visible frame.
#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbedImage>;
}

/// Downloads the image and decodes it off the async runtime.
#[derive(Debug, Clone)]
pub struct HttpImageProbe {
    http: Client,
}

impl HttpImageProbe {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> Result<ProbedImage> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch image {url}"))?
            .error_for_status()?
            .bytes()
            .await?;

        tokio::task::spawn_blocking(move || decode_dimensions(&bytes))
            .await
            .map_err(|err| anyhow!("image decode task failed: {err}"))?
    }
}

pub fn decode_dimensions(bytes: &[u8]) -> Result<ProbedImage> {
    let image = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed to sniff image format")?
        .decode()
        .context("failed to decode image")?;
    Ok(ProbedImage {
        width: image.width(),
        height: image.height(),
    })
}
