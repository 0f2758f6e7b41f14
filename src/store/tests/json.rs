use super::*;
use tempfile::TempDir;

fn json_backend(dir: &TempDir) -> JsonFilePersistence {
    JsonFilePersistence::new(dir.path().join("tasks.json"))
}

#[tokio::test]
async fn test_missing_file_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let backend = json_backend(&dir);

    assert!(backend.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_file_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let backend = json_backend(&dir);
    std::fs::write(backend.path(), "  \n").unwrap();

    assert!(backend.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_file_opens_empty_store() {
    let dir = TempDir::new().unwrap();
    let backend = json_backend(&dir);
    std::fs::write(backend.path(), "{ not json").unwrap();

    assert!(backend.load().await.is_err());

    let store = TaskStore::open(Arc::new(backend)).await;
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_save_then_reopen_restores_tasks() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(json_backend(&dir));

    {
        let store = TaskStore::open(backend.clone()).await;
        store.add(task("one")).await.unwrap();
        store
            .update(&TaskId::new("one"), |t| {
                t.status = Status::Running;
                t.progress = "42.10%".into();
            })
            .await
            .unwrap();
    }

    let store = TaskStore::open(backend).await;
    let restored = store.get(&TaskId::new("one")).await.unwrap();
    assert_eq!(restored.status, Status::Running);
    assert_eq!(restored.progress, "42.10%");
}

#[tokio::test]
async fn test_document_is_flat_object_keyed_by_id() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(json_backend(&dir));
    let store = TaskStore::open(backend.clone()).await;
    store.add(task("a1b2c3d4")).await.unwrap();

    let raw = std::fs::read_to_string(backend.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["a1b2c3d4"]["status"], "queued");
    assert!(value["a1b2c3d4"].get("thumbnail_url").is_none());
}

#[tokio::test]
async fn test_save_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let backend = json_backend(&dir);
    let mut tasks = crate::types::TaskMap::new();
    tasks.insert(TaskId::new("x"), task("x"));

    backend.save(&tasks).await.unwrap();

    assert!(backend.path().exists());
    assert!(!dir.path().join("tasks.json.tmp").exists());
}

#[tokio::test]
async fn test_stale_temp_file_does_not_affect_load() {
    let dir = TempDir::new().unwrap();
    let backend = json_backend(&dir);
    let mut tasks = crate::types::TaskMap::new();
    tasks.insert(TaskId::new("x"), task("x"));
    backend.save(&tasks).await.unwrap();

    // A crash between writing the temp file and renaming it
    std::fs::write(dir.path().join("tasks.json.tmp"), "{ half writ").unwrap();

    let loaded = backend.load().await.unwrap().unwrap();
    assert!(loaded.contains_key(&TaskId::new("x")));
}

#[tokio::test]
async fn test_save_creates_parent_directory() {
    let dir = TempDir::new().unwrap();
    let backend = JsonFilePersistence::new(dir.path().join("state/nested/tasks.json"));

    backend
        .save(&crate::types::TaskMap::new())
        .await
        .unwrap();

    assert!(backend.path().exists());
}
