//! Instrumented data sources and modifiers

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vizflow_rs::data::{DataBuffer, DataObject, DataRef};
use vizflow_rs::error::CoreError;
use vizflow_rs::graph::{PropertyDefault, PropertyFieldDescriptor};
use vizflow_rs::pipeline::{
    DataSource, ModifierAlgorithm, ModifierRequest, PipelineFlowState,
};
use vizflow_rs::types::{PipelineStatus, TimeInterval, TimePoint};

/// Flow state with a one-component "Position" buffer
pub fn positions_state(values: &[f64]) -> PipelineFlowState {
    let mut root = DataObject::collection();
    root.add_child(DataRef::new(DataObject::buffer(
        "Position",
        DataBuffer::from_values(1, values.to_vec()).unwrap(),
    )))
    .unwrap();
    PipelineFlowState::from_collection(root)
}

/// Position values of a state produced by [`positions_state`]
pub fn positions(state: &PipelineFlowState) -> Vec<f64> {
    state
        .data()
        .and_then(|root| root.find("Position"))
        .and_then(|buffer| buffer.as_buffer())
        .map(|buffer| buffer.values().to_vec())
        .unwrap_or_default()
}

/// State for `time`, valid only at that instant
pub fn frame_state(time: TimePoint) -> PipelineFlowState {
    let mut state = positions_state(&[time as f64, time as f64 + 0.5]);
    state.set_validity(TimeInterval::instant(time));
    state
}

/// Synchronous source counting how often it produced data
pub struct CountingSource {
    calls: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn source(&self) -> DataSource {
        let calls = self.calls.clone();
        DataSource::generator(move |request| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(frame_state(request.time))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Asynchronous source whose computations block until the gate opens.
/// Blocked computations poll for cancellation.
pub struct GatedSource {
    calls: Arc<AtomicUsize>,
    gate: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl GatedSource {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: Mutex::new(Some(sender)),
            receiver,
        }
    }

    pub fn source(&self) -> DataSource {
        let calls = self.calls.clone();
        let receiver = self.receiver.clone();
        DataSource::asynchronous(move |request| {
            calls.fetch_add(1, Ordering::SeqCst);
            loop {
                if request.progress.is_canceled() {
                    return Err(CoreError::Canceled.into());
                }
                match receiver.recv_timeout(Duration::from_millis(2)) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            Ok(frame_state(request.time))
        })
    }

    /// Release every blocked and future computation.
    pub fn open(&self) {
        self.gate.lock().unwrap().take();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Drop for GatedSource {
    fn drop(&mut self) {
        self.open();
    }
}

/// Adds `offset` to every position and counts its runs
pub struct OffsetModifier {
    calls: Arc<AtomicUsize>,
    asynchronous: bool,
}

impl OffsetModifier {
    pub fn new(asynchronous: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                asynchronous,
            },
            calls,
        )
    }
}

impl ModifierAlgorithm for OffsetModifier {
    fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    fn parameters(&self) -> Vec<PropertyFieldDescriptor> {
        vec![PropertyFieldDescriptor::new(
            "offset",
            PropertyDefault::Float(1.0),
        )]
    }

    fn apply(
        &self,
        request: &ModifierRequest,
        state: &mut PipelineFlowState,
    ) -> anyhow::Result<PipelineStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset = request.params.float_or("offset", 1.0);
        let buffer = state
            .mutable_data()?
            .make_mutable("Position")?
            .buffer_mut()?;
        for value in buffer.values_mut() {
            *value += offset;
        }
        Ok(PipelineStatus::success())
    }
}
