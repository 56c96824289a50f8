//! Shared fixtures for the integration suites

#![allow(dead_code)]

use conveyor::config::{TransferConfig, MIB};
use conveyor::observability::CapturingLogger;
use conveyor::store::InMemoryStore;
use conveyor::{TransferContext, TransferOrchestrator};
use std::sync::Arc;

/// Engine over `store` with millisecond backoff and a capturing logger
pub fn engine(store: &InMemoryStore, config: TransferConfig) -> (TransferOrchestrator, CapturingLogger) {
    let logger = CapturingLogger::new();
    let config = TransferConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        ..config
    };
    let ctx = TransferContext::builder(Arc::new(store.clone()))
        .config(config)
        .logger(Arc::new(logger.clone()))
        .build();
    (TransferOrchestrator::new(ctx), logger)
}

/// Config with the given multipart threshold in MiB
pub fn threshold_mib(mib: usize) -> TransferConfig {
    TransferConfig {
        multipart_threshold_bytes: mib * MIB,
        ..Default::default()
    }
}

/// Deterministic, non-repeating-ish test data
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
