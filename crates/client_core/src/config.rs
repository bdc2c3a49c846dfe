use std::time::Duration;

use anyhow::{bail, Context, Result};
use shared::domain::SlideArity;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    server_url: Url,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub arity: SlideArity,
}

impl ClientConfig {
    pub fn new(server_url: &str, arity: SlideArity) -> Result<Self> {
        let server_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            bail!(
                "server url must use http or https, got '{}'",
                server_url.scheme()
            );
        }
        Ok(Self {
            server_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            arity,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Absolute URL for a server route such as `/api/presentation/state`.
    pub fn endpoint(&self, route: &str) -> String {
        format!(
            "{}{}",
            self.server_url.as_str().trim_end_matches('/'),
            route
        )
    }
}
