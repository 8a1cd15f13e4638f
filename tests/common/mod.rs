//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod sources;

use std::time::Duration;
use vizflow_rs::config::EngineConfig;
use vizflow_rs::dataset::Dataset;

/// Upper bound for waiting on worker threads in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Dataset with a small worker pool
pub fn test_dataset() -> Dataset {
    let mut config = EngineConfig::default();
    config.executor.worker_threads = 2;
    Dataset::new(config).expect("dataset")
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
