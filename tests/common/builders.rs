//! Test pipeline builders

use std::sync::Arc;
use vizflow_rs::dataset::Dataset;
use vizflow_rs::graph::TargetId;
use vizflow_rs::pipeline::{DataSource, ModifierAlgorithm};

/// Node handles of a built pipeline
pub struct TestPipeline {
    pub source: TargetId,
    pub modifiers: Vec<TargetId>,
    pub applications: Vec<TargetId>,
    pub scene: Option<TargetId>,
}

impl TestPipeline {
    /// The last stage: scene if present, else the last application, else the source
    pub fn output(&self) -> TargetId {
        self.scene
            .or_else(|| self.applications.last().copied())
            .unwrap_or(self.source)
    }
}

/// Builder for source → modifiers → scene chains
pub struct PipelineBuilder {
    source: DataSource,
    modifiers: Vec<(&'static str, Arc<dyn ModifierAlgorithm>)>,
    scene: bool,
}

impl PipelineBuilder {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            modifiers: Vec::new(),
            scene: false,
        }
    }

    pub fn modifier(mut self, class_name: &'static str, algorithm: Arc<dyn ModifierAlgorithm>) -> Self {
        self.modifiers.push((class_name, algorithm));
        self
    }

    pub fn scene(mut self) -> Self {
        self.scene = true;
        self
    }

    pub fn build(self, dataset: &mut Dataset) -> TestPipeline {
        let source = dataset.create_source(self.source);
        let mut modifiers = Vec::new();
        let mut applications = Vec::new();
        let mut upstream = source;
        for (class_name, algorithm) in self.modifiers {
            let modifier = dataset.create_modifier(class_name, class_name, algorithm);
            upstream = dataset.apply_modifier(upstream, modifier).unwrap();
            modifiers.push(modifier);
            applications.push(upstream);
        }
        let scene = self
            .scene
            .then(|| dataset.create_scene_node(upstream).unwrap());
        TestPipeline {
            source,
            modifiers,
            applications,
            scene,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sources::{OffsetModifier, CountingSource};
    use crate::common::test_dataset;

    #[test]
    fn test_pipeline_builder() {
        let mut dataset = test_dataset();
        let counting = CountingSource::new();
        let (offset, _) = OffsetModifier::new(false);
        let pipeline = PipelineBuilder::new(counting.source())
            .modifier("Offset", Arc::new(offset))
            .scene()
            .build(&mut dataset);

        assert_eq!(pipeline.applications.len(), 1);
        assert_eq!(pipeline.output(), pipeline.scene.unwrap());
        assert_eq!(dataset.graph().len(), 4);
    }
}
