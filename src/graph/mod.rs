//! Reference-counted node graph with dependent tracking.
//!
//! Nodes declare typed reference fields (exclusive, shared or weak) and
//! property fields. The graph keeps owner counts, rejects owning cycles,
//! maintains the reverse "dependents" index and delivers change events.

pub mod event;
pub mod field;
pub mod id;
pub mod listener;
pub mod ref_graph;
pub mod registry;
pub mod target;

pub use event::{EventKind, ReferenceEvent};
pub use field::{
    Ownership, PropertyDefault, PropertyFieldDescriptor, PropertyMap, PropertyValue,
    ReferenceFieldDescriptor,
};
pub use id::TargetId;
pub use listener::RefTargetListener;
pub use ref_graph::{FieldSnapshot, GraphSnapshot, NodeSnapshot, RefGraph};
pub use registry::{ClassRegistry, TargetFactory};
pub use target::{AsAny, OwnedFields, RefTarget, ReferenceChange};
