//! End-to-end orchestration through the public library API

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use media_dl::{NewTask, Status, Task, TaskAction, TaskId};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn video(n: usize) -> NewTask {
    NewTask::new(format!("https://media.test/watch?v={}", n)).quality("720")
}

#[tokio::test]
async fn test_bounded_pool_drains_in_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    let engine = Arc::new(GatedEngine::new(None));
    let downloader = downloader_with(config.clone(), engine.clone()).await;

    for n in 0..6 {
        downloader.submit(video(n)).await.unwrap();
    }
    let stats = downloader.queue_stats().await;
    assert_eq!((stats.running, stats.queued), (4, 2));
    wait_for_fetches(&engine, 4).await;

    engine.release(1);
    let stats = wait_for_stats(&downloader, |s| s.completed == 1 && s.running == 4).await;
    assert_eq!(stats.queued, 1);

    engine.release(5);
    wait_for_stats(&downloader, |s| s.completed == 6).await;

    let mut files: Vec<String> = std::fs::read_dir(config.download_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files.len(), 6);
    assert!(files.contains(&"Clip 0.mp4".to_string()));
    assert_eq!(std::fs::read_dir(config.temp_dir()).unwrap().count(), 0);

    // Resolved titles replaced the URL fallback
    let titles: Vec<String> = downloader
        .list_tasks()
        .await
        .into_iter()
        .map(|v| v.task.title)
        .collect();
    assert_eq!(titles[0], "Clip 0");
    assert_eq!(titles[5], "Clip 5");

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_thumbnail_is_cached_and_removed_with_task() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thumb.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNG".to_vec()))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    let engine = Arc::new(GatedEngine::new(Some(format!("{}/thumb.png", server.uri()))));
    let downloader = downloader_with(config.clone(), engine.clone()).await;

    let task = downloader.submit(video(1)).await.unwrap();
    engine.release(1);
    wait_for_stats(&downloader, |s| s.completed == 1).await;

    let view = downloader.get_task(&task.id).await.unwrap();
    assert_eq!(view.thumbnail_url, format!("/thumbnails/{}.png", task.id));
    let thumb = config.thumbnail_dir().join(format!("{}.png", task.id));
    assert_eq!(std::fs::read(&thumb).unwrap(), b"PNG");
    let final_path = view.task.final_path.unwrap();

    downloader.control(&task.id, TaskAction::Delete).await.unwrap();

    assert!(!thumb.exists());
    assert!(final_path.exists());
    assert!(downloader.get_task(&task.id).await.is_err());
}

#[tokio::test]
async fn test_shutdown_and_restart_preserve_the_queue() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());

    let engine = Arc::new(GatedEngine::new(None));
    let downloader = downloader_with(config.clone(), engine.clone()).await;
    for n in 0..5 {
        downloader.submit(video(n)).await.unwrap();
    }
    wait_for_fetches(&engine, 4).await;
    downloader.shutdown().await.unwrap();
    assert!(downloader.submit(video(9)).await.is_err());

    // A fresh process over the same document
    let engine = Arc::new(GatedEngine::new(None));
    let restarted = downloader_with(config.clone(), engine.clone()).await;
    let stats = restarted.queue_stats().await;
    assert_eq!(stats.paused, 5);
    assert_eq!(engine.started(), 0);

    assert_eq!(restarted.resume_all().await, 5);
    let stats = restarted.queue_stats().await;
    assert_eq!((stats.running, stats.queued), (4, 1));

    engine.release(5);
    wait_for_stats(&restarted, |s| s.completed == 5).await;
    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_crash_recovery_readmits_interrupted_tasks() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    std::fs::create_dir_all(config.temp_dir()).unwrap();

    // What a process killed mid-transfer leaves behind
    let mut document: HashMap<TaskId, Task> = HashMap::new();
    for (seq, (id, status)) in [
        ("aaa", Status::Running),
        ("bbb", Status::Processing),
        ("ccc", Status::Queued),
        ("ddd", Status::Completed),
    ]
    .into_iter()
    .enumerate()
    {
        let mut task = Task::from_request(
            TaskId::new(id),
            NewTask::new(format!("https://media.test/watch?v={}", id)),
        );
        task.status = status;
        task.seq = seq as u64 + 1;
        document.insert(task.id.clone(), task);
    }
    std::fs::write(
        &config.persistence.tasks_path,
        serde_json::to_vec_pretty(&document).unwrap(),
    )
    .unwrap();
    std::fs::write(config.temp_dir().join("aaa.mp4.part"), b"partial").unwrap();

    let engine = Arc::new(GatedEngine::new(None));
    let downloader = downloader_with(config.clone(), engine.clone()).await;

    let stats = downloader.queue_stats().await;
    assert_eq!(stats.running, 3);
    assert_eq!(stats.completed, 1);
    wait_for_fetches(&engine, 3).await;

    engine.release(3);
    wait_for_stats(&downloader, |s| s.completed == 4).await;
    downloader.shutdown().await.unwrap();

    let saved: HashMap<TaskId, Task> =
        serde_json::from_slice(&std::fs::read(&config.persistence.tasks_path).unwrap()).unwrap();
    assert!(saved.values().all(|t| t.status == Status::Completed));
}
