//! Observer node that forwards events of one target to a callback.

use crate::graph::event::ReferenceEvent;
use crate::graph::field::{Ownership, ReferenceFieldDescriptor};
use crate::graph::target::{OwnedFields, RefTarget};

pub type ListenerCallback = Box<dyn FnMut(&ReferenceEvent)>;

const LISTENER_FIELDS: &[ReferenceFieldDescriptor] =
    &[ReferenceFieldDescriptor::single("target", Ownership::Weak)];

/// Holds a weak reference to the observed node, so it never extends its
/// lifetime. Never forwards events further.
pub struct RefTargetListener {
    callback: ListenerCallback,
}

impl RefTargetListener {
    pub const CLASS_NAME: &'static str = "RefTargetListener";
    pub const TARGET_FIELD: &'static str = "target";

    pub fn new(callback: impl FnMut(&ReferenceEvent) + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl OwnedFields for RefTargetListener {
    fn reference_fields(&self) -> &'static [ReferenceFieldDescriptor] {
        LISTENER_FIELDS
    }
}

impl RefTarget for RefTargetListener {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn reference_event(&mut self, event: &ReferenceEvent) -> bool {
        (self.callback)(event);
        false
    }
}
