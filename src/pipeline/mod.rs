//! Time-dependent data pipelines.
//!
//! A pipeline is a chain of stage nodes in the reference graph. Data enters
//! at a source, passes through modifier applications and ends at a scene
//! node:
//!
//! ```text
//! [DataSourceNode] ◄─input── [ModifierApplication] ◄─data_provider── [SceneNode]
//!                                  │
//!                                  └─modifier──► [ModifierNode]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch**: one `PipelineNode` type, three `StageKind`s.
//! - **Per-stage caches**: every stage keeps a `PipelineCache` keyed by
//!   validity interval, trimmed by change notifications from upstream.
//! - **Copy-on-write flow**: states share data trees; modifiers copy only
//!   what they change.
//! - **Main-context publishing**: asynchronous stages compute on the worker
//!   pool and hand their results back through the node's executor.

pub mod cache;
pub mod evaluator;
pub mod flow_state;
pub mod modifier;
pub mod modifiers;
pub mod node;
pub mod source;

pub use cache::{CachePolicy, CacheStatus, PipelineCache};
pub use flow_state::PipelineFlowState;
pub use modifier::{ModifierAlgorithm, ModifierNode, ModifierRequest};
pub use modifiers::{ScaleBufferModifier, SmoothingModifier, TimeAttributeModifier};
pub use node::{PipelineNode, StageKind};
pub use source::{DataSource, SourceRequest};

use crate::concurrent::SharedFuture;
use crate::graph::ClassRegistry;
use std::sync::Arc;

/// Future resolving to the output of a stage.
pub type FlowFuture = SharedFuture<PipelineFlowState>;

/// Register the stage classes and built-in modifiers.
pub fn register_builtin_classes(registry: &mut ClassRegistry) {
    registry.register(node::SOURCE_CLASS, || {
        Box::new(PipelineNode::source(DataSource::default()))
    });
    registry.register(node::APPLICATION_CLASS, || {
        Box::new(PipelineNode::modifier_application())
    });
    registry.register(node::SCENE_CLASS, || Box::new(PipelineNode::scene()));
    registry.register(modifiers::SCALE_BUFFER_CLASS, || {
        Box::new(ModifierNode::new(
            modifiers::SCALE_BUFFER_CLASS,
            "Scale buffer",
            Arc::new(ScaleBufferModifier),
        ))
    });
    registry.register(modifiers::TIME_ATTRIBUTE_CLASS, || {
        Box::new(ModifierNode::new(
            modifiers::TIME_ATTRIBUTE_CLASS,
            "Time attribute",
            Arc::new(TimeAttributeModifier),
        ))
    });
    registry.register(modifiers::SMOOTHING_CLASS, || {
        Box::new(ModifierNode::new(
            modifiers::SMOOTHING_CLASS,
            "Smoothing",
            Arc::new(SmoothingModifier),
        ))
    });
}
