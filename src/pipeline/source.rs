//! Data sources feeding the head of a pipeline.

use crate::concurrent::Task;
use crate::pipeline::flow_state::PipelineFlowState;
use crate::types::TimePoint;
use std::fmt;
use std::sync::Arc;

/// What a generator receives when asked for data.
pub struct SourceRequest {
    pub time: TimePoint,
    /// Progress reporting and cancellation of the evaluation.
    pub progress: Task,
}

pub type SourceFunction =
    dyn Fn(&SourceRequest) -> anyhow::Result<PipelineFlowState> + Send + Sync;

/// Producer of the state at the head of a pipeline.
#[derive(Clone)]
pub enum DataSource {
    /// A fixed state, returned as-is for every time it is valid at.
    Static(PipelineFlowState),
    /// A function of time, e.g. a trajectory reader.
    Generator {
        function: Arc<SourceFunction>,
        asynchronous: bool,
    },
}

impl DataSource {
    pub fn fixed(state: PipelineFlowState) -> Self {
        DataSource::Static(state)
    }

    /// Generator run inline on the main context.
    pub fn generator(
        function: impl Fn(&SourceRequest) -> anyhow::Result<PipelineFlowState> + Send + Sync + 'static,
    ) -> Self {
        DataSource::Generator {
            function: Arc::new(function),
            asynchronous: false,
        }
    }

    /// Generator run on the worker pool.
    pub fn asynchronous(
        function: impl Fn(&SourceRequest) -> anyhow::Result<PipelineFlowState> + Send + Sync + 'static,
    ) -> Self {
        DataSource::Generator {
            function: Arc::new(function),
            asynchronous: true,
        }
    }

    pub fn is_asynchronous(&self) -> bool {
        matches!(
            self,
            DataSource::Generator {
                asynchronous: true,
                ..
            }
        )
    }

    pub fn produce(&self, request: &SourceRequest) -> anyhow::Result<PipelineFlowState> {
        match self {
            DataSource::Static(state) => Ok(state.clone()),
            DataSource::Generator { function, .. } => function(request),
        }
    }
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Static(PipelineFlowState::default())
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Static(state) => f.debug_tuple("Static").field(state).finish(),
            DataSource::Generator { asynchronous, .. } => f
                .debug_struct("Generator")
                .field("asynchronous", asynchronous)
                .finish_non_exhaustive(),
        }
    }
}
