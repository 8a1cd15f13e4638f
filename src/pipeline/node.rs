//! Pipeline stage nodes.
//!
//! Three stage kinds share one node type and dispatch on [`StageKind`]:
//! - **Source**: produces data from a [`DataSource`].
//! - **Modifier application**: applies the modifier referenced through
//!   `modifier` to the output of the stage referenced through `input`.
//! - **Scene**: terminal node handing the output of `data_provider` to
//!   consumers unchanged.
//!
//! Every stage owns a [`PipelineCache`]. Change notifications arriving from
//! upstream trim it to the interval the change leaves untouched; replacing
//! an upstream reference clears it. A modifier application lets its
//! modifier narrow that interval before passing the change on.

use crate::graph::{
    EventKind, OwnedFields, Ownership, PropertyMap, RefGraph, RefTarget, ReferenceChange,
    ReferenceEvent, ReferenceFieldDescriptor, TargetId,
};
use crate::pipeline::cache::{CachePolicy, PipelineCache};
use crate::pipeline::modifier::{ModifierAlgorithm, ModifierNode};
use crate::pipeline::source::DataSource;
use crate::types::PipelineStatus;
use std::sync::Arc;

pub const SOURCE_CLASS: &str = "DataSourceNode";
pub const APPLICATION_CLASS: &str = "ModifierApplication";
pub const SCENE_CLASS: &str = "SceneNode";

pub const INPUT_FIELD: &str = "input";
pub const MODIFIER_FIELD: &str = "modifier";
pub const DATA_PROVIDER_FIELD: &str = "data_provider";

const APPLICATION_FIELDS: &[ReferenceFieldDescriptor] = &[
    ReferenceFieldDescriptor::single(INPUT_FIELD, Ownership::Shared).change_notifying(),
    ReferenceFieldDescriptor::single(MODIFIER_FIELD, Ownership::Shared).change_notifying(),
];

const SCENE_FIELDS: &[ReferenceFieldDescriptor] =
    &[ReferenceFieldDescriptor::single(DATA_PROVIDER_FIELD, Ownership::Shared).change_notifying()];

/// What a stage computes.
#[derive(Debug, Clone)]
pub enum StageKind {
    Source(DataSource),
    ModifierApplication,
    Scene,
}

#[derive(Clone)]
pub struct PipelineNode {
    kind: StageKind,
    title: String,
    cache: PipelineCache,
    status: PipelineStatus,
}

impl PipelineNode {
    fn new(kind: StageKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            cache: PipelineCache::default(),
            status: PipelineStatus::success(),
        }
    }

    pub fn source(source: DataSource) -> Self {
        Self::new(StageKind::Source(source), "Data source")
    }

    pub fn modifier_application() -> Self {
        Self::new(StageKind::ModifierApplication, "Modifier application")
    }

    pub fn scene() -> Self {
        Self::new(StageKind::Scene, "Scene")
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache.set_policy(policy);
        self
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PipelineCache {
        &mut self.cache
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    /// Returns `true` if the status changed.
    pub fn set_status(&mut self, status: PipelineStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub fn data_source(&self) -> Option<&DataSource> {
        match &self.kind {
            StageKind::Source(source) => Some(source),
            _ => None,
        }
    }

    /// Replace the data source. Fails (returning the source) for non-source stages.
    pub fn set_data_source(&mut self, source: DataSource) -> Result<(), DataSource> {
        match &mut self.kind {
            StageKind::Source(current) => {
                *current = source;
                Ok(())
            }
            _ => Err(source),
        }
    }

    /// The modifier applied by this application (`id`), if `sender` is its input.
    fn input_modifier(
        &self,
        id: TargetId,
        sender: TargetId,
        graph: &RefGraph,
    ) -> Option<(Arc<dyn ModifierAlgorithm>, PropertyMap)> {
        if !matches!(self.kind, StageKind::ModifierApplication) {
            return None;
        }
        if graph.reference(id, INPUT_FIELD).ok()? != Some(sender) {
            return None;
        }
        let modifier = graph.reference(id, MODIFIER_FIELD).ok()??;
        let algorithm = graph.get::<ModifierNode>(modifier)?.algorithm();
        let params = graph.properties(modifier).ok()?;
        Some((algorithm, params))
    }

    /// Reference field naming the upstream stage, if this kind has one.
    pub fn upstream_field(&self) -> Option<&'static str> {
        match self.kind {
            StageKind::Source(_) => None,
            StageKind::ModifierApplication => Some(INPUT_FIELD),
            StageKind::Scene => Some(DATA_PROVIDER_FIELD),
        }
    }
}

impl OwnedFields for PipelineNode {
    fn reference_fields(&self) -> &'static [ReferenceFieldDescriptor] {
        match self.kind {
            StageKind::Source(_) => &[],
            StageKind::ModifierApplication => APPLICATION_FIELDS,
            StageKind::Scene => SCENE_FIELDS,
        }
    }
}

impl RefTarget for PipelineNode {
    fn class_name(&self) -> &'static str {
        match self.kind {
            StageKind::Source(_) => SOURCE_CLASS,
            StageKind::ModifierApplication => APPLICATION_CLASS,
            StageKind::Scene => SCENE_CLASS,
        }
    }

    fn forwarded_kind(&self, id: TargetId, received: &ReferenceEvent, graph: &RefGraph) -> EventKind {
        let mut kind = received.kind().clone();
        if let EventKind::TargetChanged {
            unchanged_interval, ..
        } = &mut kind
        {
            if let Some((algorithm, params)) = self.input_modifier(id, received.sender(), graph) {
                algorithm.restrict_input_validity(&params, unchanged_interval);
            }
        }
        kind
    }

    fn before_notify(&mut self, event: &ReferenceEvent) {
        if let EventKind::TargetChanged {
            unchanged_interval, ..
        } = event.kind()
        {
            self.cache.invalidate(unchanged_interval);
        }
    }

    fn reference_changed(&mut self, field: &'static str, change: ReferenceChange) {
        tracing::debug!("{} '{}' field changed: {:?}", self.title, field, change);
        self.cache.reset();
    }

    fn clone_target(&self) -> Option<Box<dyn RefTarget>> {
        Some(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataObject;
    use crate::graph::RefGraph;
    use crate::pipeline::flow_state::PipelineFlowState;
    use crate::types::TimeInterval;

    fn cached_state() -> PipelineFlowState {
        let mut state = PipelineFlowState::from_collection(DataObject::collection());
        state.set_validity(TimeInterval::new(0, 100));
        state
    }

    #[test]
    fn test_fields_follow_kind() {
        let source = PipelineNode::source(DataSource::default());
        assert!(source.reference_fields().is_empty());
        assert_eq!(source.class_name(), SOURCE_CLASS);
        assert_eq!(
            PipelineNode::modifier_application().reference_fields().len(),
            2
        );
        assert_eq!(
            PipelineNode::scene().upstream_field(),
            Some(DATA_PROVIDER_FIELD)
        );
    }

    #[test]
    fn test_upstream_change_invalidates_downstream_caches() {
        let mut graph = RefGraph::new();
        let source = graph.create(Box::new(PipelineNode::source(DataSource::default())));
        let app = graph.create(Box::new(PipelineNode::modifier_application()));
        let scene = graph.create(Box::new(PipelineNode::scene()));
        graph.pin(scene).unwrap();
        graph.set_reference(app, INPUT_FIELD, Some(source)).unwrap();
        graph
            .set_reference(scene, DATA_PROVIDER_FIELD, Some(app))
            .unwrap();

        for id in [app, scene] {
            graph
                .get_mut::<PipelineNode>(id)
                .unwrap()
                .cache_mut()
                .insert(cached_state());
        }

        graph.notify_dependents(
            source,
            EventKind::TargetChanged {
                field: None,
                unchanged_interval: TimeInterval::new(10, 20),
            },
        );

        for id in [app, scene] {
            let node = graph.get::<PipelineNode>(id).unwrap();
            assert_eq!(node.cache().intervals(), vec![TimeInterval::new(10, 20)]);
        }
    }

    #[test]
    fn test_replacing_input_resets_cache() {
        let mut graph = RefGraph::new();
        let first = graph.create(Box::new(PipelineNode::source(DataSource::default())));
        let second = graph.create(Box::new(PipelineNode::source(DataSource::default())));
        let app = graph.create(Box::new(PipelineNode::modifier_application()));
        graph.pin(app).unwrap();
        graph.pin(second).unwrap();
        graph.set_reference(app, INPUT_FIELD, Some(first)).unwrap();
        graph
            .get_mut::<PipelineNode>(app)
            .unwrap()
            .cache_mut()
            .insert(cached_state());

        graph.set_reference(app, INPUT_FIELD, Some(second)).unwrap();
        assert!(graph.get::<PipelineNode>(app).unwrap().cache().is_empty());
        assert!(!graph.contains(first));
    }

    #[test]
    fn test_status_change_detection() {
        let mut node = PipelineNode::scene();
        assert!(!node.set_status(PipelineStatus::success()));
        assert!(node.set_status(PipelineStatus::error("boom")));
        assert!(node.status().is_error());
    }
}
