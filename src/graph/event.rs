//! Notification events broadcast from a node to its dependents.

use crate::graph::id::TargetId;
use crate::types::TimeInterval;

/// What happened to the sending node.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The sender's content changed. Data valid inside `unchanged_interval`
    /// is unaffected.
    TargetChanged {
        field: Option<&'static str>,
        unchanged_interval: TimeInterval,
    },
    ReferenceAdded {
        field: &'static str,
        target: TargetId,
        index: usize,
    },
    ReferenceRemoved {
        field: &'static str,
        target: TargetId,
        index: usize,
    },
    ReferenceReplaced {
        field: &'static str,
        old_target: Option<TargetId>,
        new_target: Option<TargetId>,
    },
    StatusChanged,
    PreliminaryStateAvailable,
    PipelineCacheUpdated,
    /// The sender is about to be freed; references to it have been severed.
    TargetDeleted,
}

impl EventKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TargetChanged { .. } => "TargetChanged",
            EventKind::ReferenceAdded { .. } => "ReferenceAdded",
            EventKind::ReferenceRemoved { .. } => "ReferenceRemoved",
            EventKind::ReferenceReplaced { .. } => "ReferenceReplaced",
            EventKind::StatusChanged => "StatusChanged",
            EventKind::PreliminaryStateAvailable => "PreliminaryStateAvailable",
            EventKind::PipelineCacheUpdated => "PipelineCacheUpdated",
            EventKind::TargetDeleted => "TargetDeleted",
        }
    }

    /// Whether a dependent may forward this event to its own dependents.
    /// All other kinds stop after one hop.
    pub fn propagates(&self) -> bool {
        matches!(
            self,
            EventKind::TargetChanged { .. } | EventKind::PreliminaryStateAvailable
        )
    }
}

/// An event together with the node that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEvent {
    sender: TargetId,
    kind: EventKind,
}

impl ReferenceEvent {
    pub fn new(sender: TargetId, kind: EventKind) -> Self {
        Self { sender, kind }
    }

    pub fn sender(&self) -> TargetId {
        self.sender
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn propagates(&self) -> bool {
        self.kind.propagates()
    }

    /// The unchanged interval of a `TargetChanged` event.
    pub fn unchanged_interval(&self) -> Option<TimeInterval> {
        match &self.kind {
            EventKind::TargetChanged {
                unchanged_interval, ..
            } => Some(*unchanged_interval),
            _ => None,
        }
    }
}
