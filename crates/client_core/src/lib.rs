//! Client side of the presentation sync protocol: the HTTP repository, the
//! control state machine driven by the operator, and the display poller.

pub mod config;
pub mod control;
pub mod display;
pub mod error;
pub mod probe;
pub mod repository;

pub use config::ClientConfig;
pub use control::{ActionOutcome, ControlClient, ControlPhase, ControlStatus, SlideAction};
pub use display::{DisplayHandle, DisplayModel, DisplayPoller, DisplayView, ImageStatus};
pub use error::{SyncError, SyncResult};
pub use probe::{HttpImageProbe, ImageProbe};
pub use repository::{HttpPresentationClient, SnapshotRepository, StateRepository};
