mod common;

use common::fixtures::{api_capture, recording, request_action};
use common::temp_store;
use orbit_common::recording::SessionRecording;
use orbit_engine::store::StoreError;

#[tokio::test]
async fn test_save_and_load() {
    let (_dir, store) = temp_store();
    let rec = recording("s1", vec![request_action("r1", "https://app.test/api")]);

    let path = store.save(&rec).await.unwrap();
    assert!(path.ends_with("s1.json"));
    assert!(store.exists("s1").await);
    assert_eq!(store.load("s1").await.unwrap(), rec);
}

#[tokio::test]
async fn test_missing_session() {
    let (_dir, store) = temp_store();
    let err = store.load("ghost").await.unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound(id) if id == "ghost"));
    assert!(!store.exists("ghost").await);
}

#[tokio::test]
async fn test_finalized_session_is_never_overwritten() {
    let (_dir, store) = temp_store();
    store.save(&recording("s1", Vec::new())).await.unwrap();

    let err = store.save(&recording("s1", Vec::new())).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyPersisted(_)));
}

#[tokio::test]
async fn test_open_session_may_be_rewritten() {
    let (_dir, store) = temp_store();
    let mut rec = SessionRecording::new("draft", "task", 10);
    store.save(&rec).await.unwrap();

    rec.finalize(20);
    store.save(&rec).await.unwrap();
    assert!(store.load("draft").await.unwrap().is_finalized());
}

#[tokio::test]
async fn test_corrupt_session_is_invalid() {
    let (_dir, store) = temp_store();
    std::fs::create_dir_all(store.sessions_dir()).unwrap();
    std::fs::write(store.sessions_dir().join("bad.json"), "{ not json").unwrap();

    let err = store.load("bad").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecording { .. }));
}

#[tokio::test]
async fn test_list_is_sorted() {
    let (_dir, store) = temp_store();
    assert!(store.list().unwrap().is_empty());
    for id in ["charlie", "alpha", "bravo"] {
        store.save(&recording(id, Vec::new())).await.unwrap();
    }
    assert_eq!(store.list().unwrap(), vec!["alpha", "bravo", "charlie"]);
}

#[tokio::test]
async fn test_capture_by_id_and_by_path() {
    let (_dir, store) = temp_store();
    let capture = api_capture("log in");
    let path = store.save_capture("cap-1", &capture).await.unwrap();

    assert_eq!(store.load_capture("cap-1").await.unwrap(), capture);
    let by_path = store.load_capture(&path.display().to_string()).await.unwrap();
    assert_eq!(by_path, capture);
}

#[tokio::test]
async fn test_capture_errors() {
    let (dir, store) = temp_store();
    assert!(matches!(
        store.load_capture("nope").await.unwrap_err(),
        StoreError::CaptureNotFound(_)
    ));

    let junk = dir.path().join("junk.json");
    std::fs::write(&junk, "[1, 2").unwrap();
    assert!(matches!(
        store.load_capture(&junk.display().to_string()).await.unwrap_err(),
        StoreError::MalformedCapture { .. }
    ));
}
