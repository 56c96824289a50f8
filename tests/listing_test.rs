mod common;

use common::engine;
use conveyor::config::TransferConfig;
use conveyor::store::{InMemoryStore, StoreError, StoreOp};
use conveyor::ListQuery;

fn five_keys_in_pages_of_two() -> InMemoryStore {
    let store = InMemoryStore::new().with_page_size(2);
    // inserted out of order on purpose
    for key in ["data/e", "data/b", "data/d", "data/a", "data/c"] {
        store.insert(key, "x");
    }
    store
}

#[tokio::test]
async fn test_three_pages_are_fetched_once_each() {
    let store = five_keys_in_pages_of_two();
    let (engine, _) = engine(&store, TransferConfig::default());

    let keys = engine.list_files("data/").await.unwrap();

    assert_eq!(keys, vec!["data/a", "data/b", "data/c", "data/d", "data/e"]);
    assert_eq!(store.count(StoreOp::List), 3);
}

#[tokio::test]
async fn test_custom_order_and_filter_span_pages() {
    let store = five_keys_in_pages_of_two();
    let (engine, _) = engine(&store, TransferConfig::default());

    let keys = engine
        .list_all(
            ListQuery::new("data/")
                .filter(|key| !key.ends_with('c'))
                .sort_by(|a, b| b.cmp(a)),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec!["data/e", "data/d", "data/b", "data/a"]);
}

#[tokio::test]
async fn test_listing_exhausts_retries_on_a_page() {
    let store = five_keys_in_pages_of_two();
    store.fail_next(StoreOp::List, 3, StoreError::Network("reset".to_string()));
    let (engine, _) = engine(&store, TransferConfig::default());

    let err = engine.list_files("data/").await.unwrap_err();
    assert!(err.is_exhausted());
}

#[tokio::test]
async fn test_grouped_listing_across_pages() {
    let store = InMemoryStore::new().with_page_size(1);
    for key in ["p/x/1", "p/x/2", "p/y/1", "p/z.txt"] {
        store.insert(key, "x");
    }
    let (engine, _) = engine(&store, TransferConfig::default());

    let folders = engine.list_folders("p/").await.unwrap();
    assert_eq!(folders, vec!["p/x/", "p/y/"]);
}
