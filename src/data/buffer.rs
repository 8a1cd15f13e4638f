//! Numeric array payload.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Flat `f64` storage with a fixed number of components per element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBuffer {
    components: usize,
    values: Vec<f64>,
}

impl DataBuffer {
    pub fn new(components: usize) -> Self {
        Self {
            components: components.max(1),
            values: Vec::new(),
        }
    }

    pub fn from_values(components: usize, values: Vec<f64>) -> Result<Self> {
        let components = components.max(1);
        if values.len() % components != 0 {
            return Err(CoreError::Computation(format!(
                "{} values do not form whole elements of {} components",
                values.len(),
                components
            )));
        }
        Ok(Self { components, values })
    }

    pub fn components(&self) -> usize {
        self.components
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len() / self.components
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn element(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.components)?;
        self.values.get(start..start + self.components)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Resize to `elements`, filling new slots with zero.
    ///
    /// Allocation failure is reported instead of aborting.
    pub fn resize(&mut self, elements: usize) -> Result<()> {
        let target = elements
            .checked_mul(self.components)
            .ok_or_else(|| CoreError::Computation(format!("buffer size overflow ({} elements)", elements)))?;
        if target > self.values.len() {
            self.values
                .try_reserve(target - self.values.len())
                .map_err(|e| {
                    CoreError::Computation(format!("out of memory growing buffer to {} elements: {}", elements, e))
                })?;
        }
        self.values.resize(target, 0.0);
        Ok(())
    }

    /// Append one element. Missing components are zero, extra ones dropped.
    pub fn push(&mut self, element: &[f64]) {
        for i in 0..self.components {
            self.values.push(element.get(i).copied().unwrap_or(0.0));
        }
    }
}
