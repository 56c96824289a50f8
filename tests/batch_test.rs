mod common;

use common::engine;
use conveyor::batch::BatchOutcome;
use conveyor::config::TransferConfig;
use conveyor::fs::{Filesystem, LocalFs};
use conveyor::store::{InMemoryStore, StoreError, StoreOp};
use conveyor::{DeleteOutcome, Payload};
use tempfile::TempDir;

fn items(keys: &[&str]) -> Vec<(Payload, String)> {
    keys.iter()
        .map(|key| (Payload::from_bytes(*key, key.as_bytes().to_vec()), key.to_string()))
        .collect()
}

#[tokio::test]
async fn test_one_failing_item_is_isolated_in_any_order() {
    let keys = ["b/1", "b/2", "b/3", "b/4", "b/5"];
    let mut reversed = keys;
    reversed.reverse();

    for order in [keys, reversed] {
        let store = InMemoryStore::new();
        store.fail_always(StoreOp::Put, "b/3", StoreError::AccessDenied("locked".to_string()));
        let (engine, logger) = engine(&store, TransferConfig::default());

        let result = engine.upload_files(items(&order)).await;

        assert_eq!(result.failed_items.len(), 1);
        assert_eq!(result.failed_items[0].identifier, "b/3");
        let mut succeeded = result.succeeded_paths.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec!["b/1", "b/2", "b/4", "b/5"]);
        assert_eq!(result.outcome(), BatchOutcome::PartialFailure);
        assert!(result.success());
        assert_eq!(logger.warning_count(), 1);
        assert_eq!(store.keys(), vec!["b/1", "b/2", "b/4", "b/5"]);
    }
}

#[tokio::test]
async fn test_exhausted_item_is_captured_not_raised() {
    let store = InMemoryStore::new();
    store.fail_always(StoreOp::Put, "flaky", StoreError::Network("reset".to_string()));
    let (engine, _) = engine(&store, TransferConfig::default());

    let result = engine.upload_files(items(&["flaky", "fine"])).await;

    assert_eq!(result.succeeded_paths, vec!["fine"]);
    assert!(result.failed_items[0].cause.is_exhausted());
    assert_eq!(result.exit_code(), conveyor::error::EXIT_PARTIAL);
}

#[tokio::test]
async fn test_delete_missing_key_reports_not_found() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, TransferConfig::default());

    let outcome = engine.delete_file("does/not/exist").await.unwrap();
    assert_eq!(outcome, DeleteOutcome::NotFound);
    assert_eq!(store.count(StoreOp::Delete), 1);
}

#[tokio::test]
async fn test_folder_round_trip() {
    let source = TempDir::new().unwrap();
    let fs = LocalFs;
    fs.write(&source.path().join("index.html"), "<html/>".into()).await.unwrap();
    fs.create_dir_all(&source.path().join("css")).await.unwrap();
    fs.write(&source.path().join("css/site.css"), "body{}".into()).await.unwrap();

    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, TransferConfig::default());

    let uploaded = engine.upload_folder(source.path(), "site").await.unwrap();
    assert_eq!(uploaded.outcome(), BatchOutcome::AllSucceeded);
    assert_eq!(store.keys(), vec!["site/css/site.css", "site/index.html"]);
    assert_eq!(store.content_type("site/index.html").as_deref(), Some("text/html"));

    let dest = TempDir::new().unwrap();
    let downloaded = engine.download_folder("site/", dest.path()).await.unwrap();
    assert_eq!(downloaded.succeeded_paths.len(), 2);

    let css = fs.read(&dest.path().join("css/site.css")).await.unwrap();
    assert_eq!(css.as_ref(), b"body{}");
    let html = fs.read(&dest.path().join("index.html")).await.unwrap();
    assert_eq!(html.as_ref(), b"<html/>");
}

#[tokio::test]
async fn test_download_folder_records_failed_object() {
    let store = InMemoryStore::new();
    store.insert("logs/a.log", "a");
    store.insert("logs/b.log", "b");
    store.fail_always(StoreOp::GetStream, "logs/b.log", StoreError::AccessDenied("no".to_string()));
    let (engine, _) = engine(&store, TransferConfig::default());

    let dest = TempDir::new().unwrap();
    let result = engine.download_folder("logs/", dest.path()).await.unwrap();

    assert_eq!(result.succeeded_paths, vec!["logs/a.log"]);
    assert_eq!(result.failed_items[0].identifier, "logs/b.log");
    assert!(dest.path().join("a.log").exists());
}
