//! Arena-backed ownership and dependency graph.
//!
//! Nodes live in generation-checked slots. Every node stores the values of
//! the reference fields declared by its class, an owner count (owning edges
//! plus external pins) and a dependent index: a multiset of the nodes whose
//! fields point at it. The dependent index never owns anything; it exists for
//! event delivery and liveness queries.
//!
//! Mutations commit first and collect garbage second. Events are delivered
//! only after both steps, so handlers always observe a consistent graph.

use crate::error::{CoreError, Result};
use crate::graph::event::{EventKind, ReferenceEvent};
use crate::graph::field::{
    Ownership, PropertyFieldDescriptor, PropertyMap, PropertyValue, ReferenceFieldDescriptor,
};
use crate::graph::id::TargetId;
use crate::graph::target::{RefTarget, ReferenceChange};
use crate::types::TimeInterval;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Single(Option<TargetId>),
    Vector(Vec<TargetId>),
}

impl FieldValue {
    fn empty(desc: &ReferenceFieldDescriptor) -> Self {
        if desc.is_vector {
            FieldValue::Vector(Vec::new())
        } else {
            FieldValue::Single(None)
        }
    }

    fn as_slice(&self) -> &[TargetId] {
        match self {
            FieldValue::Single(target) => target.as_slice(),
            FieldValue::Vector(targets) => targets.as_slice(),
        }
    }
}

struct NodeEntry {
    /// Taken out while a hook of the object runs.
    object: Option<Box<dyn RefTarget>>,
    class_name: &'static str,
    reference_fields: &'static [ReferenceFieldDescriptor],
    fields: Vec<FieldValue>,
    property_fields: Vec<PropertyFieldDescriptor>,
    properties: Vec<PropertyValue>,
    /// Holder -> number of field slots of that holder pointing here.
    dependents: BTreeMap<TargetId, u32>,
    owners: u32,
    pins: u32,
}

impl NodeEntry {
    fn strong_count(&self) -> u32 {
        self.owners + self.pins
    }
}

struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

/// Comparable, serialisable description of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: TargetId,
    pub class_name: &'static str,
    pub owners: u32,
    pub pins: u32,
    pub fields: Vec<FieldSnapshot>,
    pub properties: Vec<(&'static str, PropertyValue)>,
    pub dependents: Vec<(TargetId, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSnapshot {
    pub name: &'static str,
    pub targets: Vec<TargetId>,
}

/// The node graph.
///
/// Not thread-safe for mutation: all structural changes happen on the thread
/// that owns the [`Dataset`](crate::dataset::Dataset).
#[derive(Default)]
pub struct RefGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl RefGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.entry(id).is_some()
    }

    /// Ids of all live nodes in slot order.
    pub fn ids(&self) -> Vec<TargetId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| TargetId::new(index as u32, slot.generation))
            .collect()
    }

    fn entry(&self, id: TargetId) -> Option<&NodeEntry> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: TargetId) -> Option<&mut NodeEntry> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    fn try_entry(&self, id: TargetId) -> Result<&NodeEntry> {
        self.entry(id).ok_or(CoreError::InvalidTarget(id))
    }

    fn try_entry_mut(&mut self, id: TargetId) -> Result<&mut NodeEntry> {
        self.entry_mut(id).ok_or(CoreError::InvalidTarget(id))
    }

    // ── Creation and lifetime ──

    /// Insert a new node. It starts floating (no owners, no pins) and is
    /// collected once something has owned it and let go again.
    pub fn create(&mut self, object: Box<dyn RefTarget>) -> TargetId {
        let class_name = object.class_name();
        let reference_fields = object.reference_fields();
        let property_fields = object.property_fields();
        let entry = NodeEntry {
            class_name,
            reference_fields,
            fields: reference_fields.iter().map(FieldValue::empty).collect(),
            properties: property_fields
                .iter()
                .map(|desc| desc.default.to_value())
                .collect(),
            property_fields,
            dependents: BTreeMap::new(),
            owners: 0,
            pins: 0,
            object: Some(object),
        };

        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            TargetId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            TargetId::new(index, 0)
        };
        self.live += 1;
        tracing::trace!("Created {} {}", class_name, id);
        id
    }

    /// Add an external owner.
    pub fn pin(&mut self, id: TargetId) -> Result<()> {
        self.try_entry_mut(id)?.pins += 1;
        Ok(())
    }

    /// Drop an external owner, deleting the node if nothing else owns it.
    pub fn unpin(&mut self, id: TargetId) -> Result<()> {
        let entry = self.try_entry_mut(id)?;
        if entry.pins == 0 {
            tracing::warn!("Unpin of {} which holds no pins", id);
            return Ok(());
        }
        entry.pins -= 1;
        if entry.strong_count() == 0 {
            self.collect(vec![id]);
        }
        Ok(())
    }

    /// Owning edges plus pins.
    pub fn strong_count(&self, id: TargetId) -> Option<u32> {
        self.entry(id).map(NodeEntry::strong_count)
    }

    /// Owning reference fields pointing at `id`, pins excluded.
    pub fn owning_edge_count(&self, id: TargetId) -> Option<u32> {
        self.entry(id).map(|entry| entry.owners)
    }

    pub fn class_name(&self, id: TargetId) -> Option<&'static str> {
        self.entry(id).map(|entry| entry.class_name)
    }

    pub fn reference_fields(&self, id: TargetId) -> Option<&'static [ReferenceFieldDescriptor]> {
        self.entry(id).map(|entry| entry.reference_fields)
    }

    pub fn object(&self, id: TargetId) -> Option<&dyn RefTarget> {
        self.entry(id)?.object.as_deref()
    }

    /// Typed access to a node's own state.
    pub fn get<T: RefTarget>(&self, id: TargetId) -> Option<&T> {
        self.entry(id)?
            .object
            .as_deref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Typed mutable access to a node's own state. Emits no events.
    pub fn get_mut<T: RefTarget>(&mut self, id: TargetId) -> Option<&mut T> {
        self.entry_mut(id)?
            .object
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    // ── Reference fields ──

    fn field_slot(&self, id: TargetId, field: &str) -> Result<(usize, ReferenceFieldDescriptor)> {
        let entry = self.try_entry(id)?;
        entry
            .reference_fields
            .iter()
            .position(|desc| desc.name == field)
            .map(|slot| (slot, entry.reference_fields[slot]))
            .ok_or_else(|| CoreError::UnknownField {
                class: entry.class_name,
                field: field.to_string(),
            })
    }

    fn vector_slot(&self, id: TargetId, field: &str) -> Result<(usize, ReferenceFieldDescriptor)> {
        let (slot, desc) = self.field_slot(id, field)?;
        if !desc.is_vector {
            return Err(CoreError::FieldKind(format!(
                "'{}' is not a vector field",
                desc.name
            )));
        }
        Ok((slot, desc))
    }

    fn vector_mut(&mut self, id: TargetId, slot: usize) -> Result<&mut Vec<TargetId>> {
        match &mut self.try_entry_mut(id)?.fields[slot] {
            FieldValue::Vector(targets) => Ok(targets),
            FieldValue::Single(_) => Err(CoreError::FieldKind("expected a vector field".into())),
        }
    }

    /// Current target of a single reference field.
    pub fn reference(&self, id: TargetId, field: &str) -> Result<Option<TargetId>> {
        let (slot, desc) = self.field_slot(id, field)?;
        match &self.try_entry(id)?.fields[slot] {
            FieldValue::Single(target) => Ok(*target),
            FieldValue::Vector(_) => Err(CoreError::FieldKind(format!(
                "'{}' is a vector field",
                desc.name
            ))),
        }
    }

    /// All targets of a field, in order. Works for single and vector fields.
    pub fn references(&self, id: TargetId, field: &str) -> Result<Vec<TargetId>> {
        let (slot, _) = self.field_slot(id, field)?;
        Ok(self.try_entry(id)?.fields[slot].as_slice().to_vec())
    }

    fn check_cycle(&self, holder: TargetId, target: TargetId, ownership: Ownership) -> Result<()> {
        if ownership.is_owning()
            && (target == holder || self.is_referenced_by(holder, target, true))
        {
            tracing::warn!(
                "Rejected owning reference {} -> {}: would close a cycle",
                holder,
                target
            );
            return Err(CoreError::Cycle { holder, target });
        }
        Ok(())
    }

    fn link(&mut self, holder: TargetId, target: TargetId, ownership: Ownership) {
        if let Some(entry) = self.entry_mut(target) {
            *entry.dependents.entry(holder).or_insert(0) += 1;
            if ownership.is_owning() {
                entry.owners += 1;
            }
        }
    }

    fn unlink(
        &mut self,
        holder: TargetId,
        target: TargetId,
        ownership: Ownership,
        pending: &mut Vec<TargetId>,
    ) {
        let Some(entry) = self.entry_mut(target) else {
            return;
        };
        let remaining = match entry.dependents.get_mut(&holder) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 1,
        };
        if remaining == 0 {
            entry.dependents.remove(&holder);
        }
        if ownership.is_owning() {
            entry.owners = entry.owners.saturating_sub(1);
            if entry.strong_count() == 0 {
                pending.push(target);
            }
        }
    }

    /// Point a single reference field at `target` (or clear it).
    ///
    /// Owning assignments that would close a cycle fail with
    /// [`CoreError::Cycle`] and leave the graph untouched.
    pub fn set_reference(
        &mut self,
        holder: TargetId,
        field: &str,
        target: Option<TargetId>,
    ) -> Result<()> {
        let (slot, desc) = self.field_slot(holder, field)?;
        if desc.is_vector {
            return Err(CoreError::FieldKind(format!(
                "'{}' is a vector field",
                desc.name
            )));
        }
        if let Some(target) = target {
            self.try_entry(target)?;
            self.check_cycle(holder, target, desc.ownership)?;
        }
        let old = match &self.try_entry(holder)?.fields[slot] {
            FieldValue::Single(current) => *current,
            FieldValue::Vector(_) => None,
        };
        if old == target {
            return Ok(());
        }

        if let Some(target) = target {
            self.link(holder, target, desc.ownership);
        }
        self.try_entry_mut(holder)?.fields[slot] = FieldValue::Single(target);
        let mut pending = Vec::new();
        if let Some(old) = old {
            self.unlink(holder, old, desc.ownership, &mut pending);
        }
        self.collect(pending);

        self.reference_committed(
            holder,
            desc,
            ReferenceChange::Replaced { old, new: target },
            EventKind::ReferenceReplaced {
                field: desc.name,
                old_target: old,
                new_target: target,
            },
        );
        Ok(())
    }

    /// Insert `target` into a vector field at `index`.
    pub fn insert_reference(
        &mut self,
        holder: TargetId,
        field: &str,
        index: usize,
        target: TargetId,
    ) -> Result<()> {
        let (slot, desc) = self.vector_slot(holder, field)?;
        self.try_entry(target)?;
        self.check_cycle(holder, target, desc.ownership)?;
        let len = self.try_entry(holder)?.fields[slot].as_slice().len();
        if index > len {
            return Err(CoreError::IndexOutOfRange {
                field: desc.name.to_string(),
                index,
                len,
            });
        }

        self.link(holder, target, desc.ownership);
        self.vector_mut(holder, slot)?.insert(index, target);

        self.reference_committed(
            holder,
            desc,
            ReferenceChange::Inserted { target, index },
            EventKind::ReferenceAdded {
                field: desc.name,
                target,
                index,
            },
        );
        Ok(())
    }

    /// Append `target` to a vector field, returning its index.
    pub fn push_reference(&mut self, holder: TargetId, field: &str, target: TargetId) -> Result<usize> {
        let (slot, _) = self.vector_slot(holder, field)?;
        let index = self.try_entry(holder)?.fields[slot].as_slice().len();
        self.insert_reference(holder, field, index, target)?;
        Ok(index)
    }

    /// Remove the entry at `index` from a vector field and return it.
    pub fn remove_reference(&mut self, holder: TargetId, field: &str, index: usize) -> Result<TargetId> {
        let (slot, desc) = self.vector_slot(holder, field)?;
        let targets = self.vector_mut(holder, slot)?;
        if index >= targets.len() {
            return Err(CoreError::IndexOutOfRange {
                field: desc.name.to_string(),
                index,
                len: targets.len(),
            });
        }
        let target = targets.remove(index);

        let mut pending = Vec::new();
        self.unlink(holder, target, desc.ownership, &mut pending);
        self.collect(pending);

        self.reference_committed(
            holder,
            desc,
            ReferenceChange::Removed { target, index },
            EventKind::ReferenceRemoved {
                field: desc.name,
                target,
                index,
            },
        );
        Ok(target)
    }

    fn reference_committed(
        &mut self,
        holder: TargetId,
        desc: ReferenceFieldDescriptor,
        change: ReferenceChange,
        kind: EventKind,
    ) {
        self.with_object(holder, |object| object.reference_changed(desc.name, change));
        self.notify_dependents(holder, kind);
        if desc.notifies_change {
            self.notify_dependents(
                holder,
                EventKind::TargetChanged {
                    field: Some(desc.name),
                    unchanged_interval: TimeInterval::empty(),
                },
            );
        }
    }

    // ── Properties ──

    pub fn property(&self, id: TargetId, name: &str) -> Result<&PropertyValue> {
        let entry = self.try_entry(id)?;
        entry
            .property_fields
            .iter()
            .position(|desc| desc.name == name)
            .map(|slot| &entry.properties[slot])
            .ok_or_else(|| CoreError::UnknownProperty {
                class: entry.class_name,
                property: name.to_string(),
            })
    }

    /// Owned copy of every property of a node.
    pub fn properties(&self, id: TargetId) -> Result<PropertyMap> {
        let entry = self.try_entry(id)?;
        let mut map = PropertyMap::new();
        for (desc, value) in entry.property_fields.iter().zip(&entry.properties) {
            map.insert(desc.name, value.clone());
        }
        Ok(map)
    }

    /// Assign a property. Returns the previous value, or `None` if the value
    /// did not change (in which case no events are sent).
    pub fn set_property(
        &mut self,
        id: TargetId,
        name: &str,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>> {
        let entry = self.try_entry_mut(id)?;
        let slot = entry
            .property_fields
            .iter()
            .position(|desc| desc.name == name)
            .ok_or_else(|| CoreError::UnknownProperty {
                class: entry.class_name,
                property: name.to_string(),
            })?;
        let desc = entry.property_fields[slot];
        if !entry.properties[slot].same_kind(&value) {
            return Err(CoreError::FieldKind(format!(
                "property '{}' of {} expects a value like {:?}",
                name, entry.class_name, desc.default
            )));
        }
        if entry.properties[slot] == value {
            return Ok(None);
        }
        let old = std::mem::replace(&mut entry.properties[slot], value.clone());

        self.with_object(id, |object| object.property_changed(desc.name, &value));
        if desc.notifies_change {
            self.notify_dependents(
                id,
                EventKind::TargetChanged {
                    field: Some(desc.name),
                    unchanged_interval: TimeInterval::empty(),
                },
            );
        }
        Ok(Some(old))
    }

    // ── Events and queries ──

    /// Run `f` with the node's object temporarily taken out of its slot.
    fn with_object<R>(&mut self, id: TargetId, f: impl FnOnce(&mut dyn RefTarget) -> R) -> Option<R> {
        let mut object = self.entry_mut(id)?.object.take()?;
        let result = f(&mut *object);
        if let Some(entry) = self.entry_mut(id) {
            entry.object = Some(object);
        }
        Some(result)
    }

    /// Like [`with_object`](Self::with_object), with read access to the rest
    /// of the graph. `id` itself is not reachable through the graph meanwhile.
    fn with_object_ref<R>(
        &mut self,
        id: TargetId,
        f: impl FnOnce(&dyn RefTarget, &RefGraph) -> R,
    ) -> Option<R> {
        let object = self.entry_mut(id)?.object.take()?;
        let result = f(&*object, self);
        if let Some(entry) = self.entry_mut(id) {
            entry.object = Some(object);
        }
        Some(result)
    }

    /// Snapshot of the nodes currently holding a reference to `id`.
    pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
        self.entry(id)
            .map(|entry| entry.dependents.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Invoke `visit` once per current dependent of `id`.
    pub fn visit_dependents(&self, id: TargetId, mut visit: impl FnMut(TargetId)) {
        for dependent in self.dependents(id) {
            visit(dependent);
        }
    }

    /// Whether `other` reaches `node` through reference fields. With
    /// `strong_only` only owning edges are followed.
    pub fn is_referenced_by(&self, node: TargetId, other: TargetId, strong_only: bool) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![other];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entry) = self.entry(current) else {
                continue;
            };
            for (desc, value) in entry.reference_fields.iter().zip(&entry.fields) {
                if strong_only && !desc.ownership.is_owning() {
                    continue;
                }
                for &target in value.as_slice() {
                    if target == node {
                        return true;
                    }
                    stack.push(target);
                }
            }
        }
        false
    }

    /// Broadcast an event from `sender` to its dependents.
    ///
    /// Propagating kinds travel breadth-first through every dependent that
    /// asks to forward them; each node forwards a given broadcast at most
    /// once, so weak cycles terminate.
    pub fn notify_dependents(&mut self, sender: TargetId, kind: EventKind) {
        if !self.contains(sender) {
            return;
        }
        let event = ReferenceEvent::new(sender, kind);
        self.with_object(sender, |object| object.before_notify(&event));

        let mut forwarded = HashSet::from([sender]);
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for dependent in self.dependents(event.sender()) {
                let forward = self
                    .with_object(dependent, |object| object.reference_event(&event))
                    .unwrap_or(false);
                tracing::trace!(
                    "{} {} -> {} (forward: {})",
                    event.kind().name(),
                    event.sender(),
                    dependent,
                    forward
                );
                if forward && event.propagates() && forwarded.insert(dependent) {
                    let kind = self
                        .with_object_ref(dependent, |object, graph| {
                            object.forwarded_kind(dependent, &event, graph)
                        })
                        .unwrap_or_else(|| event.kind().clone());
                    let next = ReferenceEvent::new(dependent, kind);
                    self.with_object(dependent, |object| object.before_notify(&next));
                    queue.push_back(next);
                }
            }
        }
    }

    // ── Deletion ──

    /// Delete a node regardless of its owners. Every incoming reference is
    /// cleared first; children left without owners are deleted too.
    pub fn delete_target(&mut self, id: TargetId) -> Result<()> {
        self.try_entry(id)?;
        let mut pending = Vec::new();
        self.destroy(id, &mut pending);
        self.collect(pending);
        Ok(())
    }

    fn collect(&mut self, mut pending: Vec<TargetId>) {
        while let Some(id) = pending.pop() {
            if self.entry(id).is_some_and(|entry| entry.strong_count() == 0) {
                self.destroy(id, &mut pending);
            }
        }
    }

    fn sever(&mut self, holder: TargetId, target: TargetId) -> Vec<&'static str> {
        let Some(entry) = self.entry_mut(holder) else {
            return Vec::new();
        };
        let descriptors = entry.reference_fields;
        let mut severed = Vec::new();
        for (desc, value) in descriptors.iter().zip(entry.fields.iter_mut()) {
            match value {
                FieldValue::Single(current) if *current == Some(target) => {
                    *current = None;
                    severed.push(desc.name);
                }
                FieldValue::Vector(targets) => {
                    let before = targets.len();
                    targets.retain(|t| *t != target);
                    if targets.len() != before {
                        severed.push(desc.name);
                    }
                }
                FieldValue::Single(_) => {}
            }
        }
        severed
    }

    fn destroy(&mut self, id: TargetId, pending: &mut Vec<TargetId>) {
        let holders = self.dependents(id);
        let deleted = ReferenceEvent::new(id, EventKind::TargetDeleted);
        for holder in holders {
            if holder == id {
                continue;
            }
            for field in self.sever(holder, id) {
                self.with_object(holder, |object| {
                    object.reference_changed(field, ReferenceChange::Severed { target: id })
                });
            }
            self.with_object(holder, |object| {
                object.reference_event(&deleted);
            });
        }

        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation != id.generation() {
            return;
        }
        let Some(entry) = slot.entry.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.live -= 1;

        for (desc, value) in entry.reference_fields.iter().zip(&entry.fields) {
            for &target in value.as_slice() {
                self.unlink(id, target, desc.ownership, pending);
            }
        }
        tracing::trace!("Deleted {} {}", entry.class_name, id);
    }

    // ── Cloning and inspection ──

    fn check_cloneable(&self, id: TargetId, visited: &mut HashSet<TargetId>) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let entry = self.try_entry(id)?;
        if entry
            .object
            .as_deref()
            .and_then(|object| object.clone_target())
            .is_none()
        {
            return Err(CoreError::NotCloneable(entry.class_name));
        }
        for (desc, value) in entry.reference_fields.iter().zip(&entry.fields) {
            if desc.ownership == Ownership::Exclusive {
                for &target in value.as_slice() {
                    self.check_cloneable(target, visited)?;
                }
            }
        }
        Ok(())
    }

    /// Copy a node. Exclusively owned targets are copied recursively, shared
    /// and weak targets are referenced by the copy as they are. The copy
    /// starts floating.
    pub fn clone_target(&mut self, id: TargetId) -> Result<TargetId> {
        self.check_cloneable(id, &mut HashSet::new())?;
        let mut copies = HashMap::new();
        self.clone_recursive(id, &mut copies)
    }

    fn clone_recursive(
        &mut self,
        id: TargetId,
        copies: &mut HashMap<TargetId, TargetId>,
    ) -> Result<TargetId> {
        if let Some(&copy) = copies.get(&id) {
            return Ok(copy);
        }
        let entry = self.try_entry(id)?;
        let object = entry
            .object
            .as_deref()
            .and_then(|object| object.clone_target())
            .ok_or(CoreError::NotCloneable(entry.class_name))?;
        let properties = entry.properties.clone();
        let fields: Vec<(ReferenceFieldDescriptor, FieldValue)> = entry
            .reference_fields
            .iter()
            .copied()
            .zip(entry.fields.iter().cloned())
            .collect();

        let copy = self.create(object);
        if let Some(copied) = self.entry_mut(copy) {
            if copied.properties.len() == properties.len() {
                copied.properties = properties;
            }
        }
        copies.insert(id, copy);

        for (slot, (desc, value)) in fields.into_iter().enumerate() {
            let mut targets = Vec::with_capacity(value.as_slice().len());
            for &target in value.as_slice() {
                if desc.ownership == Ownership::Exclusive {
                    targets.push(self.clone_recursive(target, copies)?);
                } else {
                    targets.push(target);
                }
            }
            for &target in &targets {
                self.link(copy, target, desc.ownership);
            }
            let new_value = match value {
                FieldValue::Single(_) => FieldValue::Single(targets.first().copied()),
                FieldValue::Vector(_) => FieldValue::Vector(targets),
            };
            if let Some(copied) = self.entry_mut(copy) {
                if let Some(field) = copied.fields.get_mut(slot) {
                    *field = new_value;
                }
            }
        }
        tracing::debug!("Cloned {} {} as {}", self.class_name(copy).unwrap_or("?"), id, copy);
        Ok(copy)
    }

    /// Describe every live node.
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .ids()
            .into_iter()
            .filter_map(|id| {
                let entry = self.entry(id)?;
                Some(NodeSnapshot {
                    id,
                    class_name: entry.class_name,
                    owners: entry.owners,
                    pins: entry.pins,
                    fields: entry
                        .reference_fields
                        .iter()
                        .zip(&entry.fields)
                        .map(|(desc, value)| FieldSnapshot {
                            name: desc.name,
                            targets: value.as_slice().to_vec(),
                        })
                        .collect(),
                    properties: entry
                        .property_fields
                        .iter()
                        .zip(&entry.properties)
                        .map(|(desc, value)| (desc.name, value.clone()))
                        .collect(),
                    dependents: entry.dependents.iter().map(|(k, v)| (*k, *v)).collect(),
                })
            })
            .collect();
        GraphSnapshot { nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::field::PropertyDefault;
    use crate::graph::target::OwnedFields;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    const ITEM_FIELDS: &[ReferenceFieldDescriptor] = &[
        ReferenceFieldDescriptor::single("owned", Ownership::Exclusive),
        ReferenceFieldDescriptor::single("shared", Ownership::Shared).change_notifying(),
        ReferenceFieldDescriptor::single("watch", Ownership::Weak),
        ReferenceFieldDescriptor::vector("children", Ownership::Exclusive),
    ];

    struct Item {
        label: &'static str,
        log: Log,
    }

    impl Item {
        fn boxed(label: &'static str, log: &Log) -> Box<dyn RefTarget> {
            Box::new(Item {
                label,
                log: log.clone(),
            })
        }
    }

    impl OwnedFields for Item {
        fn reference_fields(&self) -> &'static [ReferenceFieldDescriptor] {
            ITEM_FIELDS
        }

        fn property_fields(&self) -> Vec<PropertyFieldDescriptor> {
            vec![
                PropertyFieldDescriptor::new("weight", PropertyDefault::Float(1.0)),
                PropertyFieldDescriptor::new("note", PropertyDefault::Text("")).silent(),
            ]
        }
    }

    impl RefTarget for Item {
        fn class_name(&self) -> &'static str {
            "Item"
        }

        fn reference_event(&mut self, event: &ReferenceEvent) -> bool {
            self.log
                .borrow_mut()
                .push(format!("{}:{}", self.label, event.kind().name()));
            event.propagates()
        }

        fn clone_target(&self) -> Option<Box<dyn RefTarget>> {
            Some(Box::new(Item {
                label: self.label,
                log: self.log.clone(),
            }))
        }
    }

    fn graph_with_log() -> (RefGraph, Log) {
        (RefGraph::new(), Rc::new(RefCell::new(Vec::new())))
    }

    #[test]
    fn test_unpin_deletes_unowned_node() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        graph.pin(a).unwrap();
        assert_eq!(graph.strong_count(a), Some(1));
        graph.unpin(a).unwrap();
        assert!(!graph.contains(a));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_shared_target_lives_as_long_as_longest_holder() {
        let (mut graph, log) = graph_with_log();
        let h1 = graph.create(Item::boxed("h1", &log));
        let h2 = graph.create(Item::boxed("h2", &log));
        let t = graph.create(Item::boxed("t", &log));
        graph.pin(h1).unwrap();
        graph.pin(h2).unwrap();

        graph.set_reference(h1, "shared", Some(t)).unwrap();
        graph.set_reference(h2, "shared", Some(t)).unwrap();
        assert_eq!(graph.owning_edge_count(t), Some(2));
        assert_eq!(graph.dependents(t), vec![h1, h2]);

        graph.set_reference(h1, "shared", None).unwrap();
        assert!(graph.contains(t));
        graph.unpin(h2).unwrap();
        assert!(!graph.contains(h2));
        assert!(!graph.contains(t));
        assert!(graph.contains(h1));
    }

    #[test]
    fn test_exclusive_children_deleted_recursively() {
        let (mut graph, log) = graph_with_log();
        let root = graph.create(Item::boxed("root", &log));
        let mid = graph.create(Item::boxed("mid", &log));
        let leaf = graph.create(Item::boxed("leaf", &log));
        graph.pin(root).unwrap();
        graph.set_reference(root, "owned", Some(mid)).unwrap();
        graph.push_reference(mid, "children", leaf).unwrap();
        assert_eq!(graph.len(), 3);

        graph.unpin(root).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        let b = graph.create(Item::boxed("b", &log));
        let c = graph.create(Item::boxed("c", &log));
        graph.pin(a).unwrap();
        graph.set_reference(a, "owned", Some(b)).unwrap();
        graph.set_reference(b, "shared", Some(c)).unwrap();

        let before = graph.snapshot();
        let err = graph.set_reference(c, "owned", Some(a)).unwrap_err();
        assert!(matches!(err, CoreError::Cycle { holder, target } if holder == c && target == a));
        assert!(matches!(
            graph.push_reference(c, "children", c),
            Err(CoreError::Cycle { .. })
        ));
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn test_weak_cycles_allowed() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        let b = graph.create(Item::boxed("b", &log));
        graph.pin(a).unwrap();
        graph.set_reference(a, "owned", Some(b)).unwrap();
        graph.set_reference(b, "watch", Some(a)).unwrap();
        graph.set_reference(a, "watch", Some(a)).unwrap();
        assert!(graph.is_referenced_by(a, b, false));
        assert!(!graph.is_referenced_by(a, b, true));
        assert_eq!(graph.strong_count(a), Some(1));

        graph.unpin(a).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_weak_holder_severed_and_told() {
        let (mut graph, log) = graph_with_log();
        let watcher = graph.create(Item::boxed("watcher", &log));
        let target = graph.create(Item::boxed("target", &log));
        graph.pin(watcher).unwrap();
        graph.pin(target).unwrap();
        graph.set_reference(watcher, "watch", Some(target)).unwrap();

        graph.unpin(target).unwrap();
        assert!(!graph.contains(target));
        assert_eq!(graph.reference(watcher, "watch").unwrap(), None);
        assert!(log
            .borrow()
            .contains(&"watcher:TargetDeleted".to_string()));
        for id in graph.ids() {
            assert!(!graph.dependents(id).contains(&target));
        }
    }

    #[test]
    fn test_forced_delete_clears_owning_holders() {
        let (mut graph, log) = graph_with_log();
        let holder = graph.create(Item::boxed("holder", &log));
        let target = graph.create(Item::boxed("target", &log));
        let child = graph.create(Item::boxed("child", &log));
        graph.pin(holder).unwrap();
        graph.push_reference(holder, "children", target).unwrap();
        graph.push_reference(holder, "children", target).unwrap();
        graph.set_reference(target, "owned", Some(child)).unwrap();

        graph.delete_target(target).unwrap();
        assert!(!graph.contains(target));
        assert!(!graph.contains(child));
        assert!(graph.references(holder, "children").unwrap().is_empty());
        assert!(matches!(
            graph.delete_target(target),
            Err(CoreError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_change_propagates_but_status_stops_after_one_hop() {
        let (mut graph, log) = graph_with_log();
        let top = graph.create(Item::boxed("top", &log));
        let mid = graph.create(Item::boxed("mid", &log));
        let bottom = graph.create(Item::boxed("bottom", &log));
        graph.pin(top).unwrap();
        graph.set_reference(top, "shared", Some(mid)).unwrap();
        graph.set_reference(mid, "shared", Some(bottom)).unwrap();
        log.borrow_mut().clear();

        graph.notify_dependents(bottom, EventKind::StatusChanged);
        assert_eq!(*log.borrow(), vec!["mid:StatusChanged".to_string()]);

        log.borrow_mut().clear();
        graph
            .set_property(bottom, "weight", PropertyValue::Float(2.0))
            .unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["mid:TargetChanged".to_string(), "top:TargetChanged".to_string()]
        );
    }

    #[test]
    fn test_property_rules() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        assert_eq!(
            graph.property(a, "weight").unwrap(),
            &PropertyValue::Float(1.0)
        );
        assert_eq!(
            graph
                .set_property(a, "weight", PropertyValue::Float(1.0))
                .unwrap(),
            None
        );
        assert!(matches!(
            graph.set_property(a, "weight", PropertyValue::Bool(true)),
            Err(CoreError::FieldKind(_))
        ));
        assert!(matches!(
            graph.set_property(a, "height", PropertyValue::Float(1.0)),
            Err(CoreError::UnknownProperty { .. })
        ));
        let old = graph
            .set_property(a, "note", PropertyValue::Text("x".into()))
            .unwrap();
        assert_eq!(old, Some(PropertyValue::Text(String::new())));
        assert_eq!(graph.properties(a).unwrap().text_or("note", ""), "x");
    }

    #[test]
    fn test_vector_field_errors() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        let b = graph.create(Item::boxed("b", &log));
        graph.pin(a).unwrap();
        assert!(matches!(
            graph.insert_reference(a, "children", 1, b),
            Err(CoreError::IndexOutOfRange { index: 1, len: 0, .. })
        ));
        assert!(matches!(
            graph.remove_reference(a, "children", 0),
            Err(CoreError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            graph.insert_reference(a, "owned", 0, b),
            Err(CoreError::FieldKind(_))
        ));
        assert!(matches!(
            graph.set_reference(a, "children", Some(b)),
            Err(CoreError::FieldKind(_))
        ));
        assert!(matches!(
            graph.set_reference(a, "nope", Some(b)),
            Err(CoreError::UnknownField { .. })
        ));

        graph.push_reference(a, "children", b).unwrap();
        assert_eq!(graph.remove_reference(a, "children", 0).unwrap(), b);
        assert!(!graph.contains(b));
    }

    #[test]
    fn test_stale_id_after_slot_reuse() {
        let (mut graph, log) = graph_with_log();
        let a = graph.create(Item::boxed("a", &log));
        graph.delete_target(a).unwrap();
        let b = graph.create(Item::boxed("b", &log));
        assert_eq!(a.index(), b.index());
        assert!(!graph.contains(a));
        assert!(matches!(graph.pin(a), Err(CoreError::InvalidTarget(_))));
        assert_eq!(graph.get::<Item>(b).map(|item| item.label), Some("b"));
    }

    #[test]
    fn test_clone_copies_exclusive_and_shares_shared() {
        let (mut graph, log) = graph_with_log();
        let root = graph.create(Item::boxed("root", &log));
        let own = graph.create(Item::boxed("own", &log));
        let common = graph.create(Item::boxed("common", &log));
        graph.pin(root).unwrap();
        graph.set_reference(root, "owned", Some(own)).unwrap();
        graph.set_reference(root, "shared", Some(common)).unwrap();
        graph
            .set_property(root, "weight", PropertyValue::Float(3.0))
            .unwrap();

        let copy = graph.clone_target(root).unwrap();
        graph.pin(copy).unwrap();
        let own_copy = graph.reference(copy, "owned").unwrap().unwrap();
        assert_ne!(own_copy, own);
        assert_eq!(graph.reference(copy, "shared").unwrap(), Some(common));
        assert_eq!(graph.owning_edge_count(common), Some(2));
        assert_eq!(
            graph.property(copy, "weight").unwrap(),
            &PropertyValue::Float(3.0)
        );
    }
}
