mod common;

use common::engine;
use conveyor::config::TransferConfig;
use conveyor::store::{InMemoryStore, StoreError, StoreOp};
use conveyor::{Payload, TransferError};

fn three_attempts() -> TransferConfig {
    TransferConfig {
        max_attempts: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_success_after_max_minus_one_failures() {
    let store = InMemoryStore::new();
    store.fail_next(StoreOp::Put, 2, StoreError::Network("connection reset".to_string()));
    let (engine, logger) = engine(&store, three_attempts());

    let receipt = engine
        .upload(Payload::from_bytes("a.txt", "hello"), "a.txt")
        .await
        .unwrap();

    assert_eq!(receipt.key, "a.txt");
    assert_eq!(store.count(StoreOp::Put), 3);
    assert_eq!(logger.warning_count(), 2);
    assert_eq!(store.object("a.txt").unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn test_exhausted_after_max_attempts() {
    let store = InMemoryStore::new();
    store.fail_next(StoreOp::Put, 10, StoreError::RateLimited("slow down".to_string()));
    let (engine, logger) = engine(&store, three_attempts());

    let err = engine
        .upload(Payload::from_bytes("a.txt", "hello"), "a.txt")
        .await
        .unwrap_err();

    match err {
        TransferError::ExhaustedRetries {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(source, StoreError::RateLimited("slow down".to_string()));
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    // never a fourth call
    assert_eq!(store.count(StoreOp::Put), 3);
    assert_eq!(logger.warning_count(), 2);
    assert!(store.object("a.txt").is_none());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let store = InMemoryStore::new();
    store.fail_next(StoreOp::Put, 10, StoreError::AccessDenied("no".to_string()));
    let (engine, logger) = engine(&store, three_attempts());

    let err = engine
        .upload(Payload::from_bytes("a.txt", "hello"), "a.txt")
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Rejected { .. }));
    assert_eq!(store.count(StoreOp::Put), 1);
    assert_eq!(logger.warning_count(), 0);
}

#[tokio::test]
async fn test_missing_object_is_not_retried() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, three_attempts());

    let err = engine.download_bytes("nope").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.count(StoreOp::Head), 1);
}
