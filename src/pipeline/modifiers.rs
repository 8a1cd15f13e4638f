//! Built-in modifiers used by the headless runner and the tests.

use crate::data::{AttributeValue, DataBuffer};
use crate::error::CoreError;
use crate::graph::{PropertyDefault, PropertyFieldDescriptor, PropertyMap};
use crate::pipeline::flow_state::PipelineFlowState;
use crate::pipeline::modifier::{ModifierAlgorithm, ModifierRequest};
use crate::types::{PipelineStatus, TimeInterval, TimePoint};
use anyhow::{anyhow, Context};

pub const SCALE_BUFFER_CLASS: &str = "ScaleBufferModifier";
pub const TIME_ATTRIBUTE_CLASS: &str = "TimeAttributeModifier";
pub const SMOOTHING_CLASS: &str = "SmoothingModifier";

/// Elements processed between two cancellation checks.
const SMOOTHING_CHUNK: usize = 256;

fn buffer_name(params: &PropertyMap) -> &str {
    params.text_or("buffer", "Position")
}

// ── Scale ──

/// Multiplies every value of a named buffer by a constant factor.
#[derive(Debug, Default)]
pub struct ScaleBufferModifier;

impl ModifierAlgorithm for ScaleBufferModifier {
    fn parameters(&self) -> Vec<PropertyFieldDescriptor> {
        vec![
            PropertyFieldDescriptor::new("buffer", PropertyDefault::Text("Position")),
            PropertyFieldDescriptor::new("factor", PropertyDefault::Float(1.0)),
        ]
    }

    fn apply(
        &self,
        request: &ModifierRequest,
        state: &mut PipelineFlowState,
    ) -> anyhow::Result<PipelineStatus> {
        let name = buffer_name(&request.params);
        let factor = request.params.float_or("factor", 1.0);
        let buffer = state
            .mutable_data()?
            .make_mutable(name)
            .with_context(|| format!("Cannot scale buffer '{}'", name))?
            .buffer_mut()?;
        for value in buffer.values_mut() {
            *value *= factor;
        }
        Ok(PipelineStatus::success())
    }
}

// ── Time attribute ──

/// Stores the evaluation time in an attribute. The result is only valid at
/// that instant.
#[derive(Debug, Default)]
pub struct TimeAttributeModifier;

impl ModifierAlgorithm for TimeAttributeModifier {
    fn parameters(&self) -> Vec<PropertyFieldDescriptor> {
        vec![PropertyFieldDescriptor::new(
            "attribute",
            PropertyDefault::Text("Timestep"),
        )]
    }

    fn validity_interval(&self, _params: &PropertyMap, time: TimePoint) -> TimeInterval {
        TimeInterval::instant(time)
    }

    fn apply(
        &self,
        request: &ModifierRequest,
        state: &mut PipelineFlowState,
    ) -> anyhow::Result<PipelineStatus> {
        let name = request.params.text_or("attribute", "Timestep");
        state
            .mutable_data()?
            .set_attribute(name, AttributeValue::Int(request.time))?;
        Ok(PipelineStatus::success())
    }
}

// ── Smoothing ──

/// Moving average over neighbouring elements of a buffer. Runs on the
/// worker pool.
#[derive(Debug, Default)]
pub struct SmoothingModifier;

impl SmoothingModifier {
    fn smooth(
        input: &DataBuffer,
        window: usize,
        request: &ModifierRequest,
    ) -> anyhow::Result<Vec<f64>> {
        let components = input.components();
        let len = input.len();
        let values = input.values();
        let half = window / 2;
        let progress = &request.progress;
        progress.set_progress_maximum(len as u64);

        let mut output = Vec::new();
        output
            .try_reserve_exact(values.len())
            .map_err(|e| CoreError::Computation(format!("Out of memory: {}", e)))?;

        for element in 0..len {
            if element % SMOOTHING_CHUNK == 0
                && !progress.set_progress_value_intermittent(element as u64, SMOOTHING_CHUNK as u64)
            {
                return Err(CoreError::Canceled.into());
            }
            let first = element.saturating_sub(half);
            let last = (element + half).min(len - 1);
            let count = (last - first + 1) as f64;
            for component in 0..components {
                let sum: f64 = (first..=last)
                    .map(|neighbour| values[neighbour * components + component])
                    .sum();
                output.push(sum / count);
            }
        }
        if progress.is_canceled() {
            return Err(CoreError::Canceled.into());
        }
        progress.set_progress_value(len as u64);
        Ok(output)
    }
}

impl ModifierAlgorithm for SmoothingModifier {
    fn is_asynchronous(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<PropertyFieldDescriptor> {
        vec![
            PropertyFieldDescriptor::new("buffer", PropertyDefault::Text("Position")),
            PropertyFieldDescriptor::new("window", PropertyDefault::Int(3)),
        ]
    }

    fn apply(
        &self,
        request: &ModifierRequest,
        state: &mut PipelineFlowState,
    ) -> anyhow::Result<PipelineStatus> {
        let name = buffer_name(&request.params);
        let window = request.params.int_or("window", 3);
        if window < 1 {
            return Err(anyhow!("Smoothing window must be positive, got {}", window));
        }
        let window = window as usize;

        let smoothed = {
            let input = state
                .data()
                .and_then(|root| root.find(name))
                .ok_or_else(|| anyhow!("Input contains no buffer '{}'", name))?;
            let buffer = input
                .as_buffer()
                .ok_or_else(|| anyhow!("'{}' is not a buffer", name))?;
            if buffer.is_empty() {
                return Ok(PipelineStatus::warning(format!("Buffer '{}' is empty", name)));
            }
            Self::smooth(buffer, window, request)?
        };

        state
            .mutable_data()?
            .make_mutable(name)?
            .buffer_mut()?
            .values_mut()
            .copy_from_slice(&smoothed);
        Ok(PipelineStatus::success())
    }
}
