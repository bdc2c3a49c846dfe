use super::*;
use shared::domain::LIVE_STATE_KEY;

fn sample_state() -> PresentationState {
    PresentationState::new(
        vec![
            Slide::new(vec!["a".into(), "b".into(), "c".into()]),
            Slide::new(vec![String::new(), "e".into(), String::new()]),
        ],
        1,
    )
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn missing_presentation_loads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let loaded = storage
        .load_presentation(LIVE_STATE_KEY)
        .await
        .expect("load");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn upsert_echoes_and_round_trips_state() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let state = sample_state();

    let stored = storage
        .upsert_presentation(LIVE_STATE_KEY, &state)
        .await
        .expect("upsert");
    assert_eq!(stored.id, LIVE_STATE_KEY);
    assert_eq!(stored.state, state);

    let loaded = storage
        .load_presentation(LIVE_STATE_KEY)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.state, state);
}

#[tokio::test]
async fn upsert_replaces_whole_state() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_presentation(LIVE_STATE_KEY, &sample_state())
        .await
        .expect("first");
    let replacement = PresentationState::empty();
    storage
        .upsert_presentation(LIVE_STATE_KEY, &replacement)
        .await
        .expect("second");

    let loaded = storage
        .load_presentation(LIVE_STATE_KEY)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.state, replacement);
}

#[tokio::test]
async fn listing_excludes_reserved_key_and_delete_removes_rows() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_presentation(LIVE_STATE_KEY, &sample_state())
        .await
        .expect("live");
    storage
        .upsert_presentation("kickoff", &sample_state())
        .await
        .expect("snapshot");

    let all = storage.list_presentations(None).await.expect("list");
    assert_eq!(all.len(), 2);

    let snapshots = storage
        .list_presentations(Some(LIVE_STATE_KEY))
        .await
        .expect("list");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, "kickoff");

    assert!(storage.delete_presentation("kickoff").await.expect("delete"));
    assert!(!storage.delete_presentation("kickoff").await.expect("delete"));
    assert!(storage
        .list_presentations(Some(LIVE_STATE_KEY))
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn stores_lists_and_deletes_blobs() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .store_blob("one.png", "image/png", b"png-bytes")
        .await
        .expect("store");

    let blob = storage
        .load_blob("one.png")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(blob.content_type, "image/png");
    assert_eq!(blob.bytes, b"png-bytes");

    let listed = storage.list_blobs(10).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size_bytes, 9);

    assert!(storage
        .store_blob("one.png", "image/png", b"other")
        .await
        .is_err());

    assert!(storage.delete_blob("one.png").await.expect("delete"));
    assert!(storage.load_blob("one.png").await.expect("load").is_none());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[test]
fn memory_urls_have_no_filesystem_path() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/app.db?mode=rwc"),
        Some(PathBuf::from("./data/app.db"))
    );
}
