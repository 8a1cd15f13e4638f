//! Undo recording and its suspension contract.
//!
//! Edits made through the [`Dataset`](crate::dataset::Dataset) are recorded
//! here unless recording is suspended. Work marshaled back to the main
//! context always runs suspended, so computed results never end up on the
//! undo stack.
//!
//! There is no undo or redo. The records only exist so the suspension
//! contract can be observed and tested.

use crate::graph::{PropertyValue, TargetId};

/// One recorded edit.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoRecord {
    PropertyChanged {
        target: TargetId,
        property: String,
        old: PropertyValue,
        new: PropertyValue,
    },
    ReferenceChanged {
        target: TargetId,
        field: String,
        old: Option<TargetId>,
        new: Option<TargetId>,
    },
}

#[derive(Debug, Default)]
pub struct UndoStack {
    suspend_count: usize,
    records: Vec<UndoRecord>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.suspend_count == 0
    }

    /// Suspensions nest; each must be paired with a [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        self.suspend_count += 1;
    }

    pub fn resume(&mut self) {
        if self.suspend_count == 0 {
            tracing::warn!("Undo recording resumed more often than suspended");
            return;
        }
        self.suspend_count -= 1;
    }

    /// Record an edit. Returns `false` (and drops it) while suspended.
    pub fn push(&mut self, record: UndoRecord) -> bool {
        if !self.is_recording() {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[UndoRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
