/// Storage integration tests
/// Two stores over the same file stand in for two clients sharing a profile
use ibmi_extract::session::SessionContext;
use ibmi_extract::storage::{FileStore, KeyValueStore, MemoryStore};
use ibmi_extract::token_store::TokenStore;
use std::sync::Arc;
use std::time::Duration;

fn token_store(file: &Arc<FileStore>) -> TokenStore {
    TokenStore::new(file.clone(), Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn test_token_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile/storage.json");

    {
        let file = Arc::new(FileStore::open(&path).unwrap());
        let session = SessionContext::new(token_store(&file)).unwrap();
        session.login("persisted-token").unwrap();
    }

    let file = Arc::new(FileStore::open(&path).unwrap());
    let session = SessionContext::new(token_store(&file)).unwrap();
    assert_eq!(session.token(), "persisted-token");
}

#[tokio::test]
async fn test_legacy_file_is_migrated_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    std::fs::write(
        &path,
        r#"{"auth": "{\"access_token\": \"from-auth-object\"}", "jwt": "older"}"#,
    )
    .unwrap();

    let file = Arc::new(FileStore::open(&path).unwrap());
    let session = SessionContext::new(token_store(&file)).unwrap();

    assert_eq!(session.token(), "from-auth-object");
    assert_eq!(file.get("access_token").as_deref(), Some("from-auth-object"));
    assert_eq!(file.get("auth"), None);
    assert_eq!(file.get("jwt"), None);
}

#[tokio::test]
async fn test_login_elsewhere_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");

    let writer_file = Arc::new(FileStore::open(&path).unwrap());
    let writer = SessionContext::new(token_store(&writer_file)).unwrap();

    let reader_file = Arc::new(FileStore::open(&path).unwrap());
    let reader = Arc::new(SessionContext::new(token_store(&reader_file)).unwrap());
    let _poller = reader_file.clone().spawn_watcher(Duration::from_millis(20));
    let _watch = reader.watch_storage();
    let mut changes = reader.subscribe();

    writer.login("fresh-token").unwrap();

    tokio::time::timeout(Duration::from_secs(2), changes.wait_for(|t| t == "fresh-token"))
        .await
        .expect("token change never observed")
        .unwrap();
    assert!(reader.is_authenticated());

    writer.logout().unwrap();

    tokio::time::timeout(Duration::from_secs(2), changes.wait_for(|t| t.is_empty()))
        .await
        .expect("logout never observed")
        .unwrap();
    assert!(!reader.is_authenticated());
}

#[tokio::test]
async fn test_dropping_watch_stops_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");

    let writer_file = Arc::new(FileStore::open(&path).unwrap());
    let reader_file = Arc::new(FileStore::open(&path).unwrap());
    let reader = Arc::new(SessionContext::new(token_store(&reader_file)).unwrap());

    let watch = reader.watch_storage();
    assert!(watch.is_active());
    drop(watch);

    writer_file.set("access_token", "ignored").unwrap();
    reader_file.reload().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(reader.token(), "");
    assert_eq!(reader.store().get_token(), "ignored");
    assert!(reader.resync());
    assert_eq!(reader.token(), "ignored");
}

#[tokio::test]
async fn test_logout_clears_token_written_by_another_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");

    // Opened before the other process logs in, and never polls
    let idle_file = Arc::new(FileStore::open(&path).unwrap());
    let idle = SessionContext::new(token_store(&idle_file)).unwrap();

    let other_file = Arc::new(FileStore::open(&path).unwrap());
    let other = SessionContext::new(token_store(&other_file)).unwrap();
    other.login("other-token").unwrap();

    idle.logout().unwrap();

    let reopened = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(reopened.get("access_token"), None);
    assert_eq!(token_store(&reopened).get_token(), "");
}
