//! Modifiers: reusable processing steps applied to a pipeline's data.
//!
//! A [`ModifierNode`] holds the parameters (as graph properties) and the
//! algorithm. It is applied to a pipeline by a modifier application node
//! referencing it, and one modifier may be applied in several pipelines.

use crate::concurrent::Task;
use crate::graph::{OwnedFields, PropertyDefault, PropertyFieldDescriptor, PropertyMap, RefTarget};
use crate::pipeline::flow_state::PipelineFlowState;
use crate::types::{PipelineStatus, TimeInterval, TimePoint};
use std::fmt;
use std::sync::Arc;

/// Property switching a modifier on and off.
pub const ENABLED_PROPERTY: &str = "enabled";

/// Status reported by a disabled modifier.
pub const DISABLED_STATUS: &str = "Modifier is currently turned off.";

/// Inputs of one modifier run besides the flow state.
#[derive(Debug, Clone)]
pub struct ModifierRequest {
    pub time: TimePoint,
    /// Snapshot of the modifier's properties at scheduling time.
    pub params: PropertyMap,
    /// Progress reporting and cancellation of the evaluation.
    pub progress: Task,
}

/// The computation performed by a modifier.
///
/// Asynchronous algorithms run on the worker pool and must poll
/// `request.progress.is_canceled()` while they work; a canceled run returns
/// `Err(CoreError::Canceled.into())`.
#[cfg_attr(test, mockall::automock)]
pub trait ModifierAlgorithm: Send + Sync {
    /// Run on the worker pool instead of inline.
    fn is_asynchronous(&self) -> bool {
        false
    }

    /// Parameters declared as properties of the modifier node.
    fn parameters(&self) -> Vec<PropertyFieldDescriptor> {
        Vec::new()
    }

    /// Time range over which the output for `time` stays valid, before it is
    /// intersected with the input validity.
    fn validity_interval(&self, _params: &PropertyMap, _time: TimePoint) -> TimeInterval {
        TimeInterval::infinite()
    }

    /// Narrow the interval over which an upstream change leaves the output
    /// untouched. Modifiers reading input at other times shrink it.
    fn restrict_input_validity(&self, _params: &PropertyMap, _unchanged: &mut TimeInterval) {}

    fn apply(
        &self,
        request: &ModifierRequest,
        state: &mut PipelineFlowState,
    ) -> anyhow::Result<PipelineStatus>;
}

/// Graph node carrying a modifier algorithm and its parameters.
#[derive(Clone)]
pub struct ModifierNode {
    class_name: &'static str,
    title: String,
    algorithm: Arc<dyn ModifierAlgorithm>,
}

impl ModifierNode {
    pub fn new(
        class_name: &'static str,
        title: impl Into<String>,
        algorithm: Arc<dyn ModifierAlgorithm>,
    ) -> Self {
        Self {
            class_name,
            title: title.into(),
            algorithm,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn algorithm(&self) -> Arc<dyn ModifierAlgorithm> {
        self.algorithm.clone()
    }
}

impl OwnedFields for ModifierNode {
    fn property_fields(&self) -> Vec<PropertyFieldDescriptor> {
        let mut fields = vec![PropertyFieldDescriptor::new(
            ENABLED_PROPERTY,
            PropertyDefault::Bool(true),
        )];
        fields.extend(self.algorithm.parameters());
        fields
    }
}

impl RefTarget for ModifierNode {
    fn class_name(&self) -> &'static str {
        self.class_name
    }

    fn clone_target(&self) -> Option<Box<dyn RefTarget>> {
        Some(Box::new(self.clone()))
    }
}

impl fmt::Debug for ModifierNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierNode")
            .field("class_name", &self.class_name)
            .field("title", &self.title)
            .field("asynchronous", &self.algorithm.is_asynchronous())
            .finish()
    }
}
