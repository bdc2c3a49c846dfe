use super::*;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::protocol::Snapshot;

fn arity() -> SlideArity {
    SlideArity::new(3).expect("arity")
}

fn slide(images: [&str; 3]) -> Slide {
    Slide::new(images.iter().map(|s| s.to_string()).collect())
}

fn deck(len: usize, current: usize) -> PresentationState {
    let slides = (0..len)
        .map(|i| {
            let name = format!("s{i}");
            slide([name.as_str(), name.as_str(), name.as_str()])
        })
        .collect();
    PresentationState::new(slides, current)
}

fn deck_at(len: usize, current_slide_index: i64) -> PresentationState {
    PresentationState {
        current_slide_index,
        ..deck(len, 0)
    }
}

/// In-memory store that records every write and how many overlapped.
#[derive(Default)]
struct RecordingRepository {
    stored: Mutex<Option<PresentationState>>,
    writes: Mutex<Vec<PresentationState>>,
    committed: Mutex<Vec<PresentationState>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Duration,
    fail_with: Option<SyncError>,
}

impl RecordingRepository {
    fn holding(state: PresentationState) -> Self {
        Self {
            stored: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    fn failing(mut self, err: SyncError) -> Self {
        self.fail_with = Some(err);
        self
    }

    async fn stored(&self) -> Option<PresentationState> {
        self.stored.lock().await.clone()
    }

    async fn writes(&self) -> Vec<PresentationState> {
        self.writes.lock().await.clone()
    }

    async fn committed(&self) -> Vec<PresentationState> {
        self.committed.lock().await.clone()
    }
}

#[async_trait]
impl StateRepository for RecordingRepository {
    async fn read_state(&self) -> SyncResult<PresentationState> {
        self.stored
            .lock()
            .await
            .clone()
            .ok_or_else(|| SyncError::NotFound("Presentation state not found".into()))
    }

    async fn write_state(&self, state: &PresentationState) -> SyncResult<PresentationState> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.writes.lock().await.push(state.clone());
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let mut stored = self.stored.lock().await;
        *stored = Some(state.clone());
        self.committed.lock().await.push(state.clone());
        Ok(state.clone())
    }
}

#[derive(Default)]
struct MemorySnapshots {
    saved: Mutex<HashMap<String, Snapshot>>,
}

#[async_trait]
impl SnapshotRepository for MemorySnapshots {
    async fn list_snapshots(&self) -> SyncResult<Vec<SnapshotSummary>> {
        let saved = self.saved.lock().await;
        Ok(saved.values().map(Snapshot::summary).collect())
    }

    async fn get_snapshot(&self, id: &str) -> SyncResult<Snapshot> {
        self.saved
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound("Presentation not found".into()))
    }

    async fn save_snapshot(
        &self,
        id: &str,
        state: &PresentationState,
    ) -> SyncResult<SnapshotSummary> {
        let snapshot = Snapshot {
            id: id.to_string(),
            state: state.clone(),
            updated_at: Utc::now(),
        };
        let summary = snapshot.summary();
        self.saved.lock().await.insert(id.to_string(), snapshot);
        Ok(summary)
    }

    async fn delete_snapshot(&self, id: &str) -> SyncResult<()> {
        self.saved.lock().await.remove(id);
        Ok(())
    }
}

async fn client_over(repo: Arc<RecordingRepository>) -> ControlClient {
    let client = ControlClient::new(repo, Arc::new(MemorySnapshots::default()), arity());
    assert_eq!(client.initialize().await, ActionOutcome::Applied);
    client
}

#[test]
fn next_at_last_slide_has_no_successor() {
    assert_eq!(SlideAction::Next.apply(&deck(3, 2), arity()), None);
    assert_eq!(
        SlideAction::Next.apply(&deck(3, 1), arity()),
        Some(deck(3, 2))
    );
    assert_eq!(SlideAction::Previous.apply(&deck(3, 0), arity()), None);
    assert_eq!(SlideAction::Next.apply(&PresentationState::empty(), arity()), None);
}

#[test]
fn next_and_previous_recover_from_an_index_outside_the_deck() {
    assert_eq!(
        SlideAction::Next.apply(&deck_at(3, -1), arity()),
        Some(deck(3, 0))
    );
    assert_eq!(SlideAction::Previous.apply(&deck_at(3, -1), arity()), None);
    assert_eq!(
        SlideAction::Previous.apply(&deck_at(3, 7), arity()),
        Some(deck(3, 2))
    );
    assert_eq!(SlideAction::Next.apply(&deck_at(3, 7), arity()), None);
    assert_eq!(SlideAction::Next.apply(&deck_at(0, -1), arity()), None);
    assert_eq!(SlideAction::Previous.apply(&deck_at(0, 4), arity()), None);
}

#[test]
fn go_to_requires_an_existing_slide() {
    assert_eq!(SlideAction::GoTo(3).apply(&deck(3, 0), arity()), None);
    assert_eq!(
        SlideAction::GoTo(2).apply(&deck(3, 0), arity()),
        Some(deck(3, 2))
    );
}

#[test]
fn delete_before_current_shifts_index_down() {
    let next = SlideAction::Delete(0)
        .apply(&deck(4, 2), arity())
        .expect("in range");
    assert_eq!(next.len(), 3);
    assert_eq!(next.current_slide_index, 1);
    assert_eq!(next.slides[0], deck(4, 0).slides[1]);
}

#[test]
fn delete_after_current_keeps_index() {
    let next = SlideAction::Delete(3)
        .apply(&deck(4, 1), arity())
        .expect("in range");
    assert_eq!(next.current_slide_index, 1);
}

#[test]
fn delete_current_last_slide_clamps_to_new_end() {
    let next = SlideAction::Delete(3)
        .apply(&deck(4, 3), arity())
        .expect("in range");
    assert_eq!(next.current_slide_index, 2);
}

#[test]
fn deleting_only_slide_leaves_empty_presentation() {
    let next = SlideAction::Delete(0)
        .apply(&deck(1, 0), arity())
        .expect("in range");
    assert_eq!(next, PresentationState::empty());
    assert_eq!(SlideAction::Delete(0).apply(&next, arity()), None);
}

#[test]
fn reorder_keeps_slides_and_tracks_current() {
    let before = deck(5, 2);
    let cases = [
        ((2, 4), 4),
        ((0, 3), 1),
        ((0, 1), 2),
        ((4, 0), 3),
        ((4, 2), 3),
        ((3, 4), 2),
    ];
    for ((from, to), expected) in cases {
        let after = SlideAction::Reorder { from, to }
            .apply(&before, arity())
            .expect("valid move");
        assert_eq!(after.current_slide_index, expected, "move {from} -> {to}");
        assert_eq!(after.len(), before.len());
        for slide in &before.slides {
            assert!(after.slides.contains(slide));
        }
        assert_eq!(after.slides[to], before.slides[from]);
    }
    assert_eq!(SlideAction::Reorder { from: 1, to: 1 }.apply(&before, arity()), None);
    assert_eq!(SlideAction::Reorder { from: 1, to: 5 }.apply(&before, arity()), None);
}

#[test]
fn update_images_replaces_only_target_slide() {
    let next = SlideAction::UpdateImages {
        index: 1,
        images: vec!["x".into(), String::new(), "z".into()],
    }
    .apply(&deck(2, 0), arity())
    .expect("in range");
    assert_eq!(next.slides[0], deck(2, 0).slides[0]);
    assert_eq!(next.slides[1], slide(["x", "", "z"]));
    assert!(SlideAction::UpdateImages { index: 2, images: vec![] }
        .apply(&deck(2, 0), arity())
        .is_none());
}

#[tokio::test]
async fn initialize_treats_missing_state_as_empty() {
    let repo = Arc::new(RecordingRepository::default());
    let client = client_over(repo).await;
    let status = client.status().await;
    assert_eq!(status.phase, ControlPhase::Idle);
    assert_eq!(status.state, PresentationState::empty());
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn initialize_failure_keeps_message_and_allows_retry() {
    struct DownRepository;
    #[async_trait]
    impl StateRepository for DownRepository {
        async fn read_state(&self) -> SyncResult<PresentationState> {
            Err(SyncError::Transport("connection refused".into()))
        }
        async fn write_state(&self, _: &PresentationState) -> SyncResult<PresentationState> {
            Err(SyncError::Transport("connection refused".into()))
        }
    }

    let client = ControlClient::new(
        Arc::new(DownRepository),
        Arc::new(MemorySnapshots::default()),
        arity(),
    );
    assert!(matches!(
        client.initialize().await,
        ActionOutcome::Failed(SyncError::Transport(_))
    ));
    let status = client.status().await;
    assert_eq!(status.phase, ControlPhase::Error);
    assert_eq!(
        status.last_error.as_deref(),
        Some("transport error: connection refused")
    );
    assert!(status.state.is_empty());

    // The error phase does not block a retry.
    assert!(matches!(client.initialize().await, ActionOutcome::Failed(_)));
}

#[tokio::test]
async fn add_slide_appends_blank_slide_and_keeps_index() {
    let repo = Arc::new(RecordingRepository::holding(PresentationState::new(
        vec![slide(["a", "b", "c"])],
        0,
    )));
    let client = client_over(repo.clone()).await;

    assert_eq!(client.add_slide().await, ActionOutcome::Applied);

    let writes = repo.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), 2);
    assert_eq!(writes[0].current_slide_index, 0);
    assert_eq!(writes[0].slides[1], slide(["", "", ""]));
    assert_eq!(client.status().await.state, writes[0]);
}

#[tokio::test]
async fn next_at_end_issues_no_write() {
    let repo = Arc::new(RecordingRepository::holding(deck(2, 1)));
    let client = client_over(repo.clone()).await;

    assert_eq!(client.next_slide().await, ActionOutcome::Ignored);
    assert!(repo.writes().await.is_empty());
    assert_eq!(client.status().await.phase, ControlPhase::Idle);
}

#[tokio::test]
async fn only_one_write_is_in_flight_per_client() {
    let repo = Arc::new(RecordingRepository::holding(deck(3, 0)).slow(Duration::from_millis(50)));
    let client = client_over(repo.clone()).await;

    let (first, second) = futures::join!(client.next_slide(), client.add_slide());

    assert_eq!(first, ActionOutcome::Applied);
    assert_eq!(second, ActionOutcome::Ignored);
    assert_eq!(repo.writes().await.len(), 1);
    assert_eq!(repo.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(client.status().await.state, deck(3, 1));

    // Once the flag clears the next action goes through.
    assert_eq!(client.add_slide().await, ActionOutcome::Applied);
    assert_eq!(repo.writes().await.len(), 2);
}

#[tokio::test]
async fn rejected_write_leaves_local_state_unchanged() {
    let repo = Arc::new(RecordingRepository::holding(deck(2, 0)).failing(
        SyncError::Validation("Each slide must have exactly 3 images".into()),
    ));
    let client = client_over(repo.clone()).await;

    let outcome = client
        .update_slide_images(0, vec!["only-one".into()])
        .await;
    assert!(matches!(outcome, ActionOutcome::Failed(SyncError::Validation(_))));

    let status = client.status().await;
    assert_eq!(status.state, deck(2, 0));
    assert_eq!(status.phase, ControlPhase::Error);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Each slide must have exactly 3 images")
    );
    assert_eq!(repo.stored().await, Some(deck(2, 0)));
}

#[tokio::test]
async fn two_clients_last_write_wins() {
    let repo = Arc::new(RecordingRepository::holding(deck(3, 0)).slow(Duration::from_millis(10)));
    let first = client_over(repo.clone()).await;
    let second = client_over(repo.clone()).await;

    let expected_first = SlideAction::GoTo(2).apply(&deck(3, 0), arity()).expect("go to");
    let expected_second = SlideAction::Add.apply(&deck(3, 0), arity()).expect("add");

    let (a, b) = futures::join!(first.go_to_slide(2), second.add_slide());
    assert_eq!(a, ActionOutcome::Applied);
    assert_eq!(b, ActionOutcome::Applied);

    let committed = repo.committed().await;
    assert_eq!(committed.len(), 2);
    assert_ne!(committed[0], committed[1]);
    for write in &committed {
        assert!(*write == expected_first || *write == expected_second);
    }
    // No merging: the store holds exactly the write that landed last.
    assert_eq!(repo.stored().await.as_ref(), committed.last());
}

#[tokio::test]
async fn next_from_negative_index_writes_first_slide() {
    let repo = Arc::new(RecordingRepository::holding(deck_at(3, -1)));
    let client = client_over(repo.clone()).await;

    assert_eq!(client.next_slide().await, ActionOutcome::Applied);
    assert_eq!(repo.writes().await, vec![deck(3, 0)]);
    assert_eq!(client.status().await.state.current_index(), Some(0));
}

#[tokio::test]
async fn actions_can_run_on_spawned_tasks() {
    let repo = Arc::new(RecordingRepository::holding(deck(3, 0)));
    let client = Arc::new(client_over(repo.clone()).await);

    let spawned = client.clone();
    let outcome = tokio::spawn(async move { spawned.next_slide().await })
        .await
        .expect("join");
    assert_eq!(outcome, ActionOutcome::Applied);

    let spawned = client.clone();
    let outcome = tokio::spawn(async move { spawned.initialize().await })
        .await
        .expect("join");
    assert_eq!(outcome, ActionOutcome::Applied);
    assert_eq!(client.status().await.state, deck(3, 1));
}

#[tokio::test]
async fn abandoned_write_does_not_block_later_actions() {
    let repo = Arc::new(RecordingRepository::holding(deck(3, 0)).slow(Duration::from_millis(200)));
    let client = client_over(repo.clone()).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(10), client.next_slide()).await;
    assert!(abandoned.is_err());
    assert_eq!(client.status().await.phase, ControlPhase::Idle);
    assert_eq!(client.status().await.state, deck(3, 0));

    assert_eq!(client.go_to_slide(2).await, ActionOutcome::Applied);
    assert_eq!(client.status().await.state, deck(3, 2));
    assert_eq!(repo.committed().await, vec![deck(3, 2)]);
}

#[tokio::test]
async fn snapshots_round_trip_through_live_state() {
    let repo = Arc::new(RecordingRepository::holding(deck(2, 1)));
    let client = client_over(repo.clone()).await;

    client.save_snapshot("kickoff").await.expect("save");
    assert_eq!(client.delete_slide(0).await, ActionOutcome::Applied);
    assert_eq!(client.status().await.state.len(), 1);

    let listed = client.list_snapshots().await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "kickoff");

    assert_eq!(client.load_snapshot("kickoff").await, ActionOutcome::Applied);
    assert_eq!(client.status().await.state, deck(2, 1));
    assert_eq!(repo.stored().await, Some(deck(2, 1)));

    client.delete_snapshot("kickoff").await.expect("delete");
    assert!(matches!(
        client.load_snapshot("kickoff").await,
        ActionOutcome::Failed(SyncError::NotFound(_))
    ));
    assert_eq!(client.status().await.state, deck(2, 1));
}

#[tokio::test]
async fn live_key_is_not_a_snapshot_id() {
    let repo = Arc::new(RecordingRepository::holding(deck(1, 0)));
    let client = client_over(repo).await;

    assert!(matches!(
        client.save_snapshot(LIVE_STATE_KEY).await,
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        client.delete_snapshot("  ").await,
        Err(SyncError::Validation(_))
    ));
}
