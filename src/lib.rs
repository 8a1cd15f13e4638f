//! # VizFlow-RS: time-parameterized data pipelines
//!
//! An evaluation and caching engine for visualization pipelines. Processing
//! stages form a reference-counted object graph; data travels between them
//! as copy-on-write trees; every stage caches its output per time interval;
//! expensive stages run on a worker pool and publish their results back to
//! the thread that owns the graph.
//!
//! ## Architecture
//!
//! - **Graph** (`graph`): nodes, owning/weak reference fields, dependents and
//!   change notification
//! - **Data** (`data`): copy-on-write `DataObject` trees shared between states
//! - **Concurrency** (`concurrent`): tasks, promises, shared futures,
//!   executors and the worker pool
//! - **Pipeline** (`pipeline`): flow states, caches, stages, modifiers and
//!   evaluation
//! - **Dataset** (`dataset`): owner of the graph and the main-context queue
//!
//! ## Configuration
//!
//! Engine settings are stored in the platform data directory under
//! `dev.hxyulin.vizflow-rs`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.vizflow-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.vizflow-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.vizflow-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vizflow_rs::{
//!     config::EngineConfig,
//!     dataset::Dataset,
//!     pipeline::{modifiers::SCALE_BUFFER_CLASS, DataSource, ScaleBufferModifier},
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut dataset = Dataset::new(EngineConfig::load_or_default())?;
//!     let source = dataset.create_source(DataSource::generator(read_frame));
//!     let scale = dataset.create_modifier(SCALE_BUFFER_CLASS, "Scale", Arc::new(ScaleBufferModifier));
//!     let applied = dataset.apply_modifier(source, scale)?;
//!     let scene = dataset.create_scene_node(applied)?;
//!
//!     let state = dataset.evaluate_blocking(scene, 0)?;
//!     println!("{}", state.status());
//!     Ok(())
//! }
//! ```

pub mod concurrent;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod undo;

// Re-export commonly used types
pub use config::EngineConfig;
pub use data::{DataObject, DataRef};
pub use dataset::Dataset;
pub use error::{CoreError, Result};
pub use graph::{RefGraph, TargetId};
pub use pipeline::{DataSource, FlowFuture, PipelineFlowState};
pub use types::{ExecutionContext, PipelineStatus, TimeInterval, TimePoint};
