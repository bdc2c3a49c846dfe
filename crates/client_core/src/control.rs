use std::sync::Arc;

use shared::{
    domain::{index_to_wire, PresentationState, Slide, SlideArity, LIVE_STATE_KEY},
    protocol::SnapshotSummary,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    error::{SyncError, SyncResult},
    repository::{SnapshotRepository, StateRepository},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPhase {
    Idle,
    Loading,
    Updating,
    Error,
}

/// An operator edit. `apply` is the pure transition used before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideAction {
    Next,
    Previous,
    GoTo(usize),
    Add,
    Delete(usize),
    UpdateImages { index: usize, images: Vec<String> },
    Reorder { from: usize, to: usize },
}

impl SlideAction {
    /// Computes the full next state, or `None` when the precondition fails.
    pub fn apply(&self, state: &PresentationState, arity: SlideArity) -> Option<PresentationState> {
        let len = state.len();
        match self {
            // An index outside the deck recovers to its nearest end.
            Self::Next => {
                let last = len.checked_sub(1)?;
                let target = match state.current_index() {
                    Some(current) => current + 1,
                    None if state.current_slide_index < 0 => 0,
                    None => return None,
                };
                (target <= last).then(|| with_index(state, target))
            }
            Self::Previous => {
                let last = len.checked_sub(1)?;
                let target = match state.current_index() {
                    Some(current) => current.checked_sub(1)?,
                    None if state.current_slide_index > 0 => last,
                    None => return None,
                };
                Some(with_index(state, target))
            }
            Self::GoTo(index) => (*index < len).then(|| with_index(state, *index)),
            Self::Add => {
                let mut slides = state.slides.clone();
                slides.push(Slide::blank(arity));
                Some(PresentationState {
                    slides,
                    current_slide_index: state.current_slide_index,
                })
            }
            Self::Delete(index) => {
                if *index >= len {
                    return None;
                }
                let mut slides = state.slides.clone();
                slides.remove(*index);
                let current = state.current_slide_index;
                let remaining = index_to_wire(slides.len());
                let deleted = index_to_wire(*index);
                let next = if current >= remaining {
                    (remaining - 1).max(0)
                } else if current > deleted {
                    current - 1
                } else {
                    current
                };
                Some(PresentationState {
                    slides,
                    current_slide_index: next,
                })
            }
            Self::UpdateImages { index, images } => {
                if *index >= len {
                    return None;
                }
                let mut slides = state.slides.clone();
                slides[*index] = Slide::new(images.clone());
                Some(PresentationState {
                    slides,
                    current_slide_index: state.current_slide_index,
                })
            }
            Self::Reorder { from, to } => {
                if from == to || *from >= len || *to >= len {
                    return None;
                }
                let mut slides = state.slides.clone();
                let moved = slides.remove(*from);
                slides.insert(*to, moved);
                let current = state.current_slide_index;
                let (from, to) = (index_to_wire(*from), index_to_wire(*to));
                let next = if current == from {
                    to
                } else if from < current && current <= to {
                    current - 1
                } else if to <= current && current < from {
                    current + 1
                } else {
                    current
                };
                Some(PresentationState {
                    slides,
                    current_slide_index: next,
                })
            }
        }
    }
}

fn with_index(state: &PresentationState, index: usize) -> PresentationState {
    PresentationState {
        slides: state.slides.clone(),
        current_slide_index: index_to_wire(index),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The write was confirmed and the computed state is now local.
    Applied,
    /// Another write was in flight or the precondition did not hold.
    Ignored,
    Failed(SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlStatus {
    pub state: PresentationState,
    pub phase: ControlPhase,
    pub last_error: Option<String>,
}

struct ControlInner {
    state: PresentationState,
    phase: ControlPhase,
    last_error: Option<String>,
}

/// Held for one load or write. If the owning future is dropped before
/// `finish`, the busy phase is cleared so later actions are not ignored.
struct WriteGuard<'a> {
    _token: MutexGuard<'a, ()>,
    inner: &'a Mutex<ControlInner>,
    finished: bool,
}

impl WriteGuard<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The writer token is released regardless, so a missed reset only
        // leaves a stale phase until the next action.
        if let Ok(mut inner) = self.inner.try_lock() {
            if matches!(inner.phase, ControlPhase::Loading | ControlPhase::Updating) {
                debug!("in-flight write abandoned");
                inner.phase = ControlPhase::Idle;
            }
        }
    }
}

/// Operator-side state machine. Every mutation follows
/// compute, then confirm with the server, then apply locally.
pub struct ControlClient {
    state_repo: Arc<dyn StateRepository>,
    snapshot_repo: Arc<dyn SnapshotRepository>,
    arity: SlideArity,
    writer: Mutex<()>,
    inner: Mutex<ControlInner>,
}

impl ControlClient {
    pub fn new(
        state_repo: Arc<dyn StateRepository>,
        snapshot_repo: Arc<dyn SnapshotRepository>,
        arity: SlideArity,
    ) -> Self {
        Self {
            state_repo,
            snapshot_repo,
            arity,
            writer: Mutex::new(()),
            inner: Mutex::new(ControlInner {
                state: PresentationState::empty(),
                phase: ControlPhase::Idle,
                last_error: None,
            }),
        }
    }

    pub async fn status(&self) -> ControlStatus {
        let inner = self.inner.lock().await;
        ControlStatus {
            state: inner.state.clone(),
            phase: inner.phase,
            last_error: inner.last_error.clone(),
        }
    }

    fn try_begin(&self) -> Option<MutexGuard<'_, ()>> {
        let token = self.writer.try_lock().ok();
        if token.is_none() {
            debug!("write already in flight; ignoring action");
        }
        token
    }

    fn guard<'a>(&'a self, token: MutexGuard<'a, ()>) -> WriteGuard<'a> {
        WriteGuard {
            _token: token,
            inner: &self.inner,
            finished: false,
        }
    }

    /// Loads the live state. A missing record is a cold start, not a failure.
    pub async fn initialize(&self) -> ActionOutcome {
        let Some(token) = self.try_begin() else {
            return ActionOutcome::Ignored;
        };
        {
            let mut inner = self.inner.lock().await;
            inner.phase = ControlPhase::Loading;
            inner.last_error = None;
        }
        let guard = self.guard(token);

        let result = self.state_repo.read_state().await;
        let mut inner = self.inner.lock().await;
        guard.finish();
        match result {
            Ok(state) => {
                info!(slides = state.len(), index = state.current_slide_index, "loaded live presentation");
                inner.state = state;
                inner.phase = ControlPhase::Idle;
                ActionOutcome::Applied
            }
            Err(SyncError::NotFound(_)) => {
                info!("no live presentation yet; starting empty");
                inner.state = PresentationState::empty();
                inner.phase = ControlPhase::Idle;
                ActionOutcome::Applied
            }
            Err(err) => {
                warn!(error = %err, "failed to load live presentation");
                inner.phase = ControlPhase::Error;
                inner.last_error = Some(err.to_string());
                ActionOutcome::Failed(err)
            }
        }
    }

    pub async fn next_slide(&self) -> ActionOutcome {
        self.perform(SlideAction::Next).await
    }

    pub async fn prev_slide(&self) -> ActionOutcome {
        self.perform(SlideAction::Previous).await
    }

    pub async fn go_to_slide(&self, index: usize) -> ActionOutcome {
        self.perform(SlideAction::GoTo(index)).await
    }

    pub async fn add_slide(&self) -> ActionOutcome {
        self.perform(SlideAction::Add).await
    }

    pub async fn delete_slide(&self, index: usize) -> ActionOutcome {
        self.perform(SlideAction::Delete(index)).await
    }

    pub async fn update_slide_images(&self, index: usize, images: Vec<String>) -> ActionOutcome {
        self.perform(SlideAction::UpdateImages { index, images })
            .await
    }

    pub async fn reorder_slides(&self, from: usize, to: usize) -> ActionOutcome {
        self.perform(SlideAction::Reorder { from, to }).await
    }

    pub async fn perform(&self, action: SlideAction) -> ActionOutcome {
        let Some(token) = self.try_begin() else {
            return ActionOutcome::Ignored;
        };
        let next = {
            let mut inner = self.inner.lock().await;
            let Some(next) = action.apply(&inner.state, self.arity) else {
                debug!(?action, "action precondition not met");
                return ActionOutcome::Ignored;
            };
            inner.phase = ControlPhase::Updating;
            inner.last_error = None;
            next
        };

        let guard = self.guard(token);
        let result = self.state_repo.write_state(&next).await;
        self.finish_write(guard, next, result, &format!("{action:?}"))
            .await
    }

    /// Overwrites the live state with a saved snapshot under the same
    /// single-writer guard as any other edit.
    pub async fn load_snapshot(&self, id: &str) -> ActionOutcome {
        let Some(token) = self.try_begin() else {
            return ActionOutcome::Ignored;
        };
        {
            let mut inner = self.inner.lock().await;
            inner.phase = ControlPhase::Updating;
            inner.last_error = None;
        }
        let guard = self.guard(token);

        let snapshot = match self.snapshot_repo.get_snapshot(id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let mut inner = self.inner.lock().await;
                guard.finish();
                warn!(%id, error = %err, "failed to fetch snapshot");
                inner.phase = ControlPhase::Error;
                inner.last_error = Some(err.to_string());
                return ActionOutcome::Failed(err);
            }
        };

        let result = self.state_repo.write_state(&snapshot.state).await;
        self.finish_write(guard, snapshot.state, result, id).await
    }

    async fn finish_write(
        &self,
        guard: WriteGuard<'_>,
        next: PresentationState,
        result: SyncResult<PresentationState>,
        what: &str,
    ) -> ActionOutcome {
        let mut inner = self.inner.lock().await;
        guard.finish();
        match result {
            Ok(_) => {
                debug!(%what, slides = next.len(), index = next.current_slide_index, "write confirmed");
                inner.state = next;
                inner.phase = ControlPhase::Idle;
                ActionOutcome::Applied
            }
            Err(err) => {
                warn!(%what, error = %err, "write rejected; local state unchanged");
                inner.phase = ControlPhase::Error;
                inner.last_error = Some(err.to_string());
                ActionOutcome::Failed(err)
            }
        }
    }

    pub async fn list_snapshots(&self) -> SyncResult<Vec<SnapshotSummary>> {
        let result = self.snapshot_repo.list_snapshots().await;
        self.remember_failure(result).await
    }

    /// Saves the current local presentation under `id`.
    pub async fn save_snapshot(&self, id: &str) -> SyncResult<SnapshotSummary> {
        let id = checked_snapshot_id(id)?;
        let state = self.inner.lock().await.state.clone();
        let result = self.snapshot_repo.save_snapshot(id, &state).await;
        self.remember_failure(result).await
    }

    pub async fn delete_snapshot(&self, id: &str) -> SyncResult<()> {
        let id = checked_snapshot_id(id)?;
        let result = self.snapshot_repo.delete_snapshot(id).await;
        self.remember_failure(result).await
    }

    async fn remember_failure<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        if let Err(err) = &result {
            self.inner.lock().await.last_error = Some(err.to_string());
        }
        result
    }
}

fn checked_snapshot_id(id: &str) -> SyncResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(SyncError::Validation("Missing id".into()));
    }
    if id == LIVE_STATE_KEY {
        return Err(SyncError::Validation(format!(
            "Presentation id '{LIVE_STATE_KEY}' is reserved for the live state"
        )));
    }
    Ok(id)
}

#[cfg(test)]
#[path = "tests/control_tests.rs"]
mod tests;
