//! The value passed between pipeline stages.

use crate::data::{DataObject, DataRef};
use crate::error::Result;
use crate::types::{PipelineStatus, TimeInterval, TimePoint};

/// A data collection snapshot together with its status and the time range
/// over which it is valid.
///
/// Cloning is cheap: the data tree is shared until someone asks for
/// [`mutable_data`](Self::mutable_data).
#[derive(Debug, Clone, Default)]
pub struct PipelineFlowState {
    data: Option<DataRef>,
    status: PipelineStatus,
    validity: TimeInterval,
}

impl PipelineFlowState {
    pub fn new(data: Option<DataRef>, status: PipelineStatus, validity: TimeInterval) -> Self {
        Self {
            data,
            status,
            validity,
        }
    }

    /// Successful state around `collection`, valid forever.
    pub fn from_collection(collection: DataObject) -> Self {
        Self::new(
            Some(DataRef::new(collection)),
            PipelineStatus::success(),
            TimeInterval::infinite(),
        )
    }

    /// Error state that keeps whatever data was last known.
    pub fn error(data: Option<DataRef>, message: impl Into<String>, time: TimePoint) -> Self {
        Self::new(
            data,
            PipelineStatus::error(message),
            TimeInterval::instant(time),
        )
    }

    pub fn data(&self) -> Option<&DataRef> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Option<DataRef>) {
        self.data = data;
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// Copy-on-write access to the root collection, creating an empty one
    /// if the state has no data yet.
    pub fn mutable_data(&mut self) -> Result<&mut DataObject> {
        let root = self
            .data
            .get_or_insert_with(|| DataRef::new(DataObject::collection()));
        root.make_mut()
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: PipelineStatus) {
        self.status = status;
    }

    pub fn validity(&self) -> TimeInterval {
        self.validity
    }

    pub fn set_validity(&mut self, validity: TimeInterval) {
        self.validity = validity;
    }

    pub fn intersect_validity(&mut self, other: &TimeInterval) {
        self.validity.intersect(other);
    }

    /// Same root object and same status. Buffers are never compared by value.
    pub fn same_content(&self, other: &PipelineFlowState) -> bool {
        let same_data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => DataRef::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_data && self.status == other.status
    }
}
