use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use shared::domain::{PresentationState, ScreenIndex, SlideArity};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::{SyncError, SyncResult},
    probe::ImageProbe,
    repository::StateRepository,
};

const LOST_CONNECTION: &str = "Connection to server lost. Retrying...";
const NO_STATE_YET: &str = "Waiting for presenter... (no presentation state yet)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Loading,
    Loaded,
    Error,
}

/// What a display should be showing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayView {
    /// Terminal: the screen id does not address a slot.
    InvalidScreen { raw: String },
    /// No image for this screen. `message` is the active connection error.
    Waiting { message: Option<String> },
    Image {
        url: String,
        status: ImageStatus,
        /// Last image that loaded, kept visible while `url` is still loading.
        previous: Option<String>,
        /// Connection error overlaid on top of the image.
        warning: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedImage {
    url: String,
    status: ImageStatus,
}

/// Pure per-screen display state, fed by read results and probe results.
#[derive(Debug, Clone)]
pub struct DisplayModel {
    screen: ScreenIndex,
    state: Option<PresentationState>,
    connection_error: Option<String>,
    image: Option<TrackedImage>,
    visible: Option<String>,
}

impl DisplayModel {
    pub fn new(screen: ScreenIndex) -> Self {
        Self {
            screen,
            state: None,
            connection_error: None,
            image: None,
            visible: None,
        }
    }

    /// Resolves a 1-based external screen id, or the terminal invalid view.
    pub fn for_screen_id(raw: &str, arity: SlideArity) -> Result<Self, DisplayView> {
        ScreenIndex::from_external_id(raw, arity)
            .map(Self::new)
            .map_err(|_| DisplayView::InvalidScreen {
                raw: raw.to_string(),
            })
    }

    pub fn screen(&self) -> ScreenIndex {
        self.screen
    }

    fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    /// Applies one poll result. Returns the URL to probe when the image for
    /// this screen changed.
    pub fn apply_read(&mut self, result: SyncResult<PresentationState>) -> Option<String> {
        match result {
            Ok(state) => {
                self.state = Some(state);
                self.connection_error = None;
            }
            Err(err) => {
                // Last-known slides stay in place.
                self.connection_error = Some(connection_message(&err));
            }
        }

        let wanted = self
            .state
            .as_ref()
            .and_then(|state| state.image_for_screen(self.screen))
            .map(str::to_owned);

        match (wanted, &self.image) {
            (Some(url), Some(current)) if current.url == url => None,
            (Some(url), _) => {
                self.image = Some(TrackedImage {
                    url: url.clone(),
                    status: ImageStatus::Loading,
                });
                Some(url)
            }
            (None, _) => {
                self.image = None;
                self.visible = None;
                None
            }
        }
    }

    /// Records a probe outcome. Results for a URL that is no longer current
    /// are dropped.
    pub fn apply_probe(&mut self, url: &str, loaded: bool) {
        let Some(image) = self.image.as_mut().filter(|image| image.url == url) else {
            return;
        };
        if loaded {
            image.status = ImageStatus::Loaded;
            self.visible = Some(image.url.clone());
        } else {
            image.status = ImageStatus::Error;
        }
    }

    pub fn view(&self) -> DisplayView {
        match &self.image {
            None => DisplayView::Waiting {
                message: self.connection_error.clone(),
            },
            Some(image) => DisplayView::Image {
                url: image.url.clone(),
                status: image.status,
                previous: self.visible.clone().filter(|previous| {
                    image.status == ImageStatus::Loading && *previous != image.url
                }),
                warning: self.connection_error.clone(),
            },
        }
    }
}

fn connection_message(err: &SyncError) -> String {
    match err {
        SyncError::NotFound(_) => NO_STATE_YET.to_string(),
        SyncError::Transport(_) => LOST_CONNECTION.to_string(),
        other => match other.status() {
            Some(status) => format!("Waiting for presenter... (Status: {status})"),
            None => LOST_CONNECTION.to_string(),
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Upper bound on one read. A read that exceeds it counts as a lost connection.
    pub read_timeout: Duration,
}

impl From<&ClientConfig> for PollSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval,
            read_timeout: config.request_timeout,
        }
    }
}

/// Fixed-interval reader driving one [`DisplayModel`].
pub struct DisplayPoller {
    repo: Arc<dyn StateRepository>,
    probe: Arc<dyn ImageProbe>,
    settings: PollSettings,
    model: DisplayModel,
}

/// Running poller. Dropping the handle also stops the loop.
pub struct DisplayHandle {
    views: watch::Receiver<DisplayView>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DisplayHandle {
    pub fn views(&self) -> watch::Receiver<DisplayView> {
        self.views.clone()
    }

    /// Stops polling and waits for the loop to exit. Any read still in flight
    /// is dropped without touching the model.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "display poller task ended abnormally");
        }
    }
}

type PendingRead = BoxFuture<'static, SyncResult<PresentationState>>;
type PendingProbe = BoxFuture<'static, (String, bool)>;

impl DisplayPoller {
    pub fn new(
        repo: Arc<dyn StateRepository>,
        probe: Arc<dyn ImageProbe>,
        settings: PollSettings,
        model: DisplayModel,
    ) -> Self {
        Self {
            repo,
            probe,
            settings,
            model,
        }
    }

    pub fn spawn(self) -> DisplayHandle {
        let (view_tx, views) = watch::channel(self.model.view());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(view_tx, shutdown_rx));
        DisplayHandle {
            views,
            shutdown,
            task,
        }
    }

    async fn run(mut self, views: watch::Sender<DisplayView>, mut shutdown: watch::Receiver<bool>) {
        let screen = self.model.screen().external_id();
        info!(screen, interval_ms = self.settings.interval.as_millis() as u64, "display poller started");

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read: Option<PendingRead> = None;
        let mut probe: Option<PendingProbe> = None;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = poll_pending(&mut read), if read.is_some() => {
                    read = None;
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Some(url) = self.model.apply_read(result) {
                        debug!(screen, %url, "probing new image");
                        probe = Some(self.start_probe(url));
                    } else if !self.model.has_image() {
                        probe = None;
                    }
                    publish(&views, self.model.view());
                }
                (url, loaded) = poll_pending(&mut probe), if probe.is_some() => {
                    probe = None;
                    self.model.apply_probe(&url, loaded);
                    publish(&views, self.model.view());
                }
                _ = ticker.tick() => {
                    // One read per poller at a time; a slow read absorbs ticks.
                    if read.is_none() {
                        read = Some(self.start_read());
                    }
                }
            }
        }
        info!(screen, "display poller stopped");
    }

    fn start_read(&self) -> PendingRead {
        let repo = self.repo.clone();
        let limit = self.settings.read_timeout;
        Box::pin(async move {
            match time::timeout(limit, repo.read_state()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Transport(format!(
                    "state read timed out after {}ms",
                    limit.as_millis()
                ))),
            }
        })
    }

    fn start_probe(&self, url: String) -> PendingProbe {
        let probe = self.probe.clone();
        Box::pin(async move {
            let loaded = match probe.probe(&url).await {
                Ok(image) => {
                    debug!(%url, width = image.width, height = image.height, "image decoded");
                    true
                }
                Err(err) => {
                    warn!(%url, error = %format!("{err:#}"), "image failed to load");
                    false
                }
            };
            (url, loaded)
        })
    }
}

async fn poll_pending<T>(pending: &mut Option<BoxFuture<'static, T>>) -> T {
    match pending.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

fn publish(views: &watch::Sender<DisplayView>, view: DisplayView) {
    views.send_if_modified(|current| {
        if *current == view {
            return false;
        }
        *current = view;
        true
    });
}

#[cfg(test)]
#[path = "tests/display_tests.rs"]
mod tests;
