//! Table of node factories keyed by class name.
//!
//! A registry is an ordinary value owned by whoever builds graphs from
//! names (the [`Dataset`](crate::dataset::Dataset) holds one behind an `Arc`).
//! There is no process-global instance.

use crate::error::{CoreError, Result};
use crate::graph::target::RefTarget;
use std::collections::BTreeMap;

/// Creates a default-initialised node of one class.
pub type TargetFactory = fn() -> Box<dyn RefTarget>;

#[derive(Default, Clone)]
pub struct ClassRegistry {
    factories: BTreeMap<&'static str, TargetFactory>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, class_name: &'static str, factory: TargetFactory) {
        if self.factories.insert(class_name, factory).is_some() {
            tracing::warn!("Class '{}' registered twice, keeping the latest", class_name);
        }
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Instantiate a class by name.
    pub fn create(&self, class_name: &str) -> Result<Box<dyn RefTarget>> {
        self.factories
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| CoreError::UnknownClass(class_name.to_string()))
    }

    /// Registered names in sorted order.
    pub fn class_names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
