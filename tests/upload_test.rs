mod common;

use common::{engine, pattern, threshold_mib};
use conveyor::chunk::ChunkSource;
use conveyor::config::{TransferConfig, MIB};
use conveyor::payload::PayloadContent;
use conveyor::store::{InMemoryStore, StoreError, StoreOp};
use conveyor::{Payload, TransferError, TransferStrategy};
use futures::{stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_chunk_sizes_for_many_lengths() {
    let chunk_size = 7;
    for len in [0usize, 1, 6, 7, 8, 13, 14, 15, 100] {
        let data = pattern(len);
        let mut source = ChunkSource::new(PayloadContent::Bytes(data.clone().into()), chunk_size);

        let mut sizes = Vec::new();
        let mut joined = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            sizes.push(chunk.data.len());
            joined.extend_from_slice(&chunk.data);
        }

        let expected = ChunkSource::chunk_count(len as u64, chunk_size) as usize;
        assert_eq!(sizes.len(), expected, "chunk count for {} bytes", len);
        if let Some((last, full)) = sizes.split_last() {
            assert!(full.iter().all(|&s| s == chunk_size));
            let tail = if len % chunk_size == 0 { chunk_size } else { len % chunk_size };
            assert_eq!(*last, tail);
        }
        assert_eq!(joined, data);
    }
}

#[tokio::test]
async fn test_25mib_upload_makes_three_parts() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, threshold_mib(10));
    let data = pattern(25 * MIB);

    let receipt = engine
        .upload(Payload::from_bytes("big.bin", data.clone()), "uploads/big.bin")
        .await
        .unwrap();

    assert_eq!(receipt.strategy, TransferStrategy::Multipart { parts: 3 });
    assert_eq!(receipt.bytes, (25 * MIB) as u64);
    assert_eq!(store.count(StoreOp::CreateMultipart), 1);
    assert_eq!(store.count(StoreOp::CompleteMultipart), 1);
    assert_eq!(store.count(StoreOp::Put), 0);

    let mut parts: Vec<(u32, usize)> = store
        .calls()
        .into_iter()
        .filter(|c| c.op == StoreOp::UploadPart)
        .map(|c| (c.part_number.unwrap(), c.body_len.unwrap()))
        .collect();
    parts.sort();
    assert_eq!(parts, vec![(1, 10 * MIB), (2, 10 * MIB), (3, 5 * MIB)]);

    assert_eq!(store.object("uploads/big.bin").unwrap().as_ref(), data.as_slice());
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_zero_byte_upload_is_one_empty_put() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, threshold_mib(10));

    let receipt = engine
        .upload(Payload::from_bytes("empty.txt", Vec::new()), "empty.txt")
        .await
        .unwrap();

    assert_eq!(receipt.strategy, TransferStrategy::Single);
    assert_eq!(store.count(StoreOp::Put), 1);
    assert_eq!(store.count(StoreOp::UploadPart), 0);
    assert_eq!(store.count(StoreOp::CreateMultipart), 0);
    assert_eq!(store.calls()[0].body_len, Some(0));
    assert!(store.object("empty.txt").unwrap().is_empty());
}

#[tokio::test]
async fn test_at_threshold_is_single_put() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, threshold_mib(5));

    engine
        .upload(Payload::from_bytes("edge.bin", pattern(5 * MIB)), "edge.bin")
        .await
        .unwrap();
    assert_eq!(store.count(StoreOp::Put), 1);
    assert_eq!(store.count(StoreOp::CreateMultipart), 0);

    store.clear_calls();
    engine
        .upload(Payload::from_bytes("over.bin", pattern(5 * MIB + 1)), "over.bin")
        .await
        .unwrap();
    assert_eq!(store.count(StoreOp::Put), 0);
    assert_eq!(store.count(StoreOp::CreateMultipart), 1);
    assert_eq!(store.count(StoreOp::UploadPart), 2);
    assert_eq!(store.count(StoreOp::CompleteMultipart), 1);
}

#[tokio::test]
async fn test_repeated_upload_targets_same_key() {
    let store = InMemoryStore::new();
    let (engine, _) = engine(&store, TransferConfig::default());

    let first = engine
        .upload_to_prefix(Payload::from_bytes("report.csv", "a,b\n1,2\n"), "reports/")
        .await
        .unwrap();
    let second = engine
        .upload_to_prefix(Payload::from_bytes("report.csv", "a,b\n1,2\n"), "reports/")
        .await
        .unwrap();

    assert_eq!(first.key, "reports/report.csv");
    assert_eq!(first.key, second.key);
    assert_eq!(first.etag, second.etag);
    assert_eq!(store.keys(), vec!["reports/report.csv"]);
}

#[tokio::test]
async fn test_permanent_part_failure_aborts_session() {
    let store = InMemoryStore::new();
    store.fail_part(2, u32::MAX, StoreError::AccessDenied("policy".to_string()));
    let (engine, _) = engine(&store, threshold_mib(5));

    let err = engine
        .upload(Payload::from_bytes("big.bin", pattern(12 * MIB)), "big.bin")
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Rejected { .. }), "{:?}", err);
    assert_eq!(store.count(StoreOp::AbortMultipart), 1);
    assert_eq!(store.count(StoreOp::CompleteMultipart), 0);
    assert_eq!(store.open_sessions(), 0);
    assert!(store.object("big.bin").is_none());
}

#[tokio::test]
async fn test_exhausted_part_retries_abort_session() {
    let store = InMemoryStore::new();
    store.fail_part(1, 3, StoreError::Network("reset".to_string()));
    let (engine, logger) = engine(&store, threshold_mib(5));

    let err = engine
        .upload(Payload::from_bytes("big.bin", pattern(6 * MIB)), "big.bin")
        .await
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(store.count(StoreOp::AbortMultipart), 1);
    assert_eq!(store.open_sessions(), 0);
    // two non-final failures of part 1
    assert_eq!(logger.warning_count(), 2);
}

#[tokio::test]
async fn test_transient_part_failure_is_retried() {
    let store = InMemoryStore::new();
    store.fail_part(2, 2, StoreError::Timeout("slow".to_string()));
    let (engine, _) = engine(&store, threshold_mib(5));
    let data = pattern(11 * MIB);

    let receipt = engine
        .upload(Payload::from_bytes("big.bin", data.clone()), "big.bin")
        .await
        .unwrap();

    assert_eq!(receipt.strategy, TransferStrategy::Multipart { parts: 3 });
    assert_eq!(store.count(StoreOp::UploadPart), 5);
    assert_eq!(store.object("big.bin").unwrap().as_ref(), data.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_parts_upload_concurrently_within_limit() {
    let store = InMemoryStore::new();
    store.set_latency(StoreOp::UploadPart, Duration::from_millis(50));
    let (engine, _) = engine(&store, threshold_mib(5));
    let data = pattern(40 * MIB);

    let receipt = engine
        .upload(Payload::from_bytes("big.bin", data.clone()), "big.bin")
        .await
        .unwrap();

    assert_eq!(receipt.strategy, TransferStrategy::Multipart { parts: 8 });
    let peak = store.peak_in_flight(StoreOp::UploadPart);
    assert!(peak > 1, "parts went up one at a time");
    assert!(peak <= 4, "{} parts in flight", peak);
    assert_eq!(store.object("big.bin").unwrap().as_ref(), data.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_reading_overlaps_part_uploads() {
    let store = InMemoryStore::new();
    store.set_latency(StoreOp::UploadPart, Duration::from_millis(100));
    let config = TransferConfig {
        max_concurrent_transfers: 2,
        ..threshold_mib(5)
    };
    let (engine, _) = engine(&store, config);

    // each 5 MiB chunk takes 100ms to read
    let pieces = stream::iter(0..4u8).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, std::io::Error>(bytes::Bytes::from(vec![i; 5 * MIB]))
    });

    let started = Instant::now();
    let receipt = engine
        .upload(Payload::from_stream("slow.bin", pieces), "slow.bin")
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(receipt.strategy, TransferStrategy::Multipart { parts: 4 });
    // reads strictly between upload rounds would take 600ms
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
    let stored = store.object("slow.bin").unwrap();
    assert_eq!(stored.len(), 20 * MIB);
    assert_eq!(stored[15 * MIB], 3);
}

#[tokio::test]
async fn test_reader_longer_than_its_hint_is_chunked() {
    let store = InMemoryStore::new();
    let config = TransferConfig {
        stream_buffer_threshold_bytes: MIB as u64,
        ..threshold_mib(5)
    };
    let (engine, _) = engine(&store, config);
    let data = pattern(12 * MIB);

    let reader = std::io::Cursor::new(data.clone());
    let payload = Payload::from_reader("liar.bin", reader, Some(10));
    let receipt = engine.upload(payload, "liar.bin").await.unwrap();

    assert_eq!(receipt.strategy, TransferStrategy::Multipart { parts: 3 });
    assert_eq!(receipt.bytes, (12 * MIB) as u64);
    assert_eq!(store.count(StoreOp::Put), 0);
    assert_eq!(store.object("liar.bin").unwrap().as_ref(), data.as_slice());
}
