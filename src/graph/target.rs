//! Traits implemented by every node type stored in the graph.

use crate::graph::event::{EventKind, ReferenceEvent};
use crate::graph::field::{PropertyFieldDescriptor, PropertyValue, ReferenceFieldDescriptor};
use crate::graph::id::TargetId;
use crate::graph::ref_graph::RefGraph;
use std::any::Any;

/// Downcasting support for trait objects.
///
/// Call it on a `&dyn RefTarget`, never on a `Box<dyn RefTarget>`: the box
/// itself is `Any` and would shadow the vtable method.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Static field layout of a node class.
pub trait OwnedFields {
    /// Reference fields in declaration order. The graph allocates one value
    /// slot per descriptor when the node is created.
    fn reference_fields(&self) -> &'static [ReferenceFieldDescriptor] {
        &[]
    }

    /// Property fields with their defaults.
    fn property_fields(&self) -> Vec<PropertyFieldDescriptor> {
        Vec::new()
    }
}

/// A reference-field mutation as seen by the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceChange {
    Replaced {
        old: Option<TargetId>,
        new: Option<TargetId>,
    },
    Inserted {
        target: TargetId,
        index: usize,
    },
    Removed {
        target: TargetId,
        index: usize,
    },
    /// The target was deleted and the reference cleared by the graph.
    Severed { target: TargetId },
}

/// A node stored in a [`RefGraph`](crate::graph::RefGraph).
///
/// Field values live in the graph; the object holds only its own state.
/// Hooks receive at most read access to the graph, so they cannot mutate the
/// structure while an event is being delivered.
pub trait RefTarget: OwnedFields + AsAny {
    /// Stable class name, also the key used by the class registry.
    fn class_name(&self) -> &'static str;

    /// Handle an event sent by one of the targets this node references.
    ///
    /// Returning `true` forwards propagating events to this node's own
    /// dependents.
    fn reference_event(&mut self, event: &ReferenceEvent) -> bool {
        event.propagates()
    }

    /// The event this node (`id`) re-sends after accepting `received`.
    fn forwarded_kind(&self, _id: TargetId, received: &ReferenceEvent, _graph: &RefGraph) -> EventKind {
        received.kind().clone()
    }

    /// Called right before this node broadcasts `event` to its dependents,
    /// including events it forwards.
    fn before_notify(&mut self, _event: &ReferenceEvent) {}

    /// Called after one of this node's reference fields changed.
    fn reference_changed(&mut self, _field: &'static str, _change: ReferenceChange) {}

    /// Called after one of this node's properties changed.
    fn property_changed(&mut self, _name: &'static str, _value: &PropertyValue) {}

    /// Shallow copy of the node's own state. Field values are copied by the graph.
    fn clone_target(&self) -> Option<Box<dyn RefTarget>> {
        None
    }
}
