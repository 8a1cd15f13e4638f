//! Copy-on-write data objects.
//!
//! A `DataObject` is immutable by convention once it is reachable through a
//! [`DataRef`]. Every object carries a small shared header with its data
//! reference count (number of live `DataRef` handles) and weak links to the
//! objects that hold it as a child or as their editable proxy. The header is
//! a separate allocation, so the upward links never prevent `Arc::get_mut`
//! on the object itself.
//!
//! An object is safe to modify when at most one handle points at it and
//! every parent holding it as a child is itself safe to modify. Proxy links
//! are exempt from the upward check.

use crate::data::buffer::DataBuffer;
use crate::error::{CoreError, Result};
use crate::graph::PropertyValue;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Value of a global attribute in a data collection.
pub type AttributeValue = PropertyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Child,
    Proxy,
}

struct ParentLink {
    parent: Weak<ObjectHeader>,
    kind: EdgeKind,
}

struct ObjectHeader {
    uid: u64,
    identifier: String,
    data_refs: AtomicUsize,
    parents: Mutex<Vec<ParentLink>>,
}

impl ObjectHeader {
    fn new(identifier: String) -> Arc<Self> {
        Arc::new(Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            identifier,
            data_refs: AtomicUsize::new(0),
            parents: Mutex::new(Vec::new()),
        })
    }

    fn lock_parents(&self) -> MutexGuard<'_, Vec<ParentLink>> {
        self.parents.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Distinct live parents, optionally skipping proxy links.
    fn live_parents(&self, include_proxies: bool) -> Vec<Arc<ObjectHeader>> {
        let parents = self.lock_parents();
        let mut live: Vec<Arc<ObjectHeader>> = Vec::new();
        for link in parents.iter() {
            if link.kind == EdgeKind::Proxy && !include_proxies {
                continue;
            }
            if let Some(parent) = link.parent.upgrade() {
                if !live.iter().any(|p| Arc::ptr_eq(p, &parent)) {
                    live.push(parent);
                }
            }
        }
        live
    }

    fn is_safe_to_modify(&self, visited: &mut HashSet<u64>) -> bool {
        if self.data_refs.load(Ordering::Acquire) > 1 {
            return false;
        }
        if !visited.insert(self.uid) {
            return false;
        }
        self.live_parents(false)
            .iter()
            .all(|parent| parent.is_safe_to_modify(visited))
    }

    fn info(&self) -> ObjectInfo {
        ObjectInfo {
            uid: self.uid,
            identifier: self.identifier.clone(),
        }
    }
}

fn attach(parent: &Arc<ObjectHeader>, child: &DataObject, kind: EdgeKind) {
    child.header.lock_parents().push(ParentLink {
        parent: Arc::downgrade(parent),
        kind,
    });
}

fn detach(parent: &Arc<ObjectHeader>, child: &DataObject, kind: EdgeKind) {
    let mut parents = child.header.lock_parents();
    if let Some(pos) = parents
        .iter()
        .position(|link| link.kind == kind && std::ptr::eq(link.parent.as_ptr(), Arc::as_ptr(parent)))
    {
        parents.swap_remove(pos);
    }
}

/// Identity of an object on an ownership path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub uid: u64,
    pub identifier: String,
}

/// What an object holds besides its children.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    /// Root of a data tree flowing through a pipeline.
    Collection,
    /// Plain grouping node.
    Container,
    Buffer(DataBuffer),
    Attribute(AttributeValue),
}

impl DataPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataPayload::Collection => "Collection",
            DataPayload::Container => "Container",
            DataPayload::Buffer(_) => "Buffer",
            DataPayload::Attribute(_) => "Attribute",
        }
    }
}

/// One node of a copy-on-write data tree.
pub struct DataObject {
    header: Arc<ObjectHeader>,
    payload: DataPayload,
    children: Vec<DataRef>,
    editable_proxy: Option<DataRef>,
}

impl DataObject {
    pub fn new(identifier: impl Into<String>, payload: DataPayload) -> Self {
        Self {
            header: ObjectHeader::new(identifier.into()),
            payload,
            children: Vec::new(),
            editable_proxy: None,
        }
    }

    /// An empty data collection.
    pub fn collection() -> Self {
        Self::new("", DataPayload::Collection)
    }

    pub fn buffer(identifier: impl Into<String>, buffer: DataBuffer) -> Self {
        Self::new(identifier, DataPayload::Buffer(buffer))
    }

    pub fn attribute(identifier: impl Into<String>, value: AttributeValue) -> Self {
        Self::new(identifier, DataPayload::Attribute(value))
    }

    /// Process-unique id, fresh for every clone.
    pub fn uid(&self) -> u64 {
        self.header.uid
    }

    pub fn identifier(&self) -> &str {
        &self.header.identifier
    }

    pub fn info(&self) -> ObjectInfo {
        self.header.info()
    }

    pub fn payload(&self) -> &DataPayload {
        &self.payload
    }

    pub fn as_buffer(&self) -> Option<&DataBuffer> {
        match &self.payload {
            DataPayload::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> Option<&AttributeValue> {
        match &self.payload {
            DataPayload::Attribute(value) => Some(value),
            _ => None,
        }
    }

    /// Number of `DataRef` handles currently pointing at this object.
    pub fn data_reference_count(&self) -> usize {
        self.header.data_refs.load(Ordering::Acquire)
    }

    /// Number of distinct live objects holding this one as a child.
    pub fn parent_count(&self) -> usize {
        self.header.live_parents(false).len()
    }

    /// Evaluated on demand; sharing can change between calls.
    pub fn is_safe_to_modify(&self) -> bool {
        self.header.is_safe_to_modify(&mut HashSet::new())
    }

    fn ensure_safe(&self) -> Result<()> {
        if self.is_safe_to_modify() {
            Ok(())
        } else {
            tracing::warn!(
                "Refused in-place mutation of shared data object '{}' (#{})",
                self.identifier(),
                self.uid()
            );
            Err(CoreError::UnsafeMutation(self.identifier().to_string()))
        }
    }

    pub fn payload_mut(&mut self) -> Result<&mut DataPayload> {
        self.ensure_safe()?;
        Ok(&mut self.payload)
    }

    pub fn buffer_mut(&mut self) -> Result<&mut DataBuffer> {
        match self.payload_mut()? {
            DataPayload::Buffer(buffer) => Ok(buffer),
            other => Err(CoreError::FieldKind(format!(
                "data object holds a {} payload, not a buffer",
                other.kind_name()
            ))),
        }
    }

    // ── Children ──

    pub fn children(&self) -> &[DataRef] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&DataRef> {
        self.children.get(index)
    }

    /// First direct child with the given identifier.
    pub fn find(&self, identifier: &str) -> Option<&DataRef> {
        self.children
            .iter()
            .find(|child| child.identifier() == identifier)
    }

    /// Follow a chain of identifiers downward.
    pub fn find_path(&self, path: &[&str]) -> Option<&DataRef> {
        let (first, rest) = path.split_first()?;
        let mut current = self.find(first)?;
        for identifier in rest {
            current = current.find(identifier)?;
        }
        Some(current)
    }

    fn position_of(&self, identifier: &str) -> Result<usize> {
        self.children
            .iter()
            .position(|child| child.identifier() == identifier)
            .ok_or_else(|| {
                CoreError::Computation(format!(
                    "no data object '{}' below '{}'",
                    identifier,
                    self.identifier()
                ))
            })
    }

    fn index_error(&self, index: usize) -> CoreError {
        CoreError::IndexOutOfRange {
            field: "children".to_string(),
            index,
            len: self.children.len(),
        }
    }

    pub fn add_child(&mut self, child: DataRef) -> Result<usize> {
        self.ensure_safe()?;
        attach(&self.header, &child, EdgeKind::Child);
        self.children.push(child);
        Ok(self.children.len() - 1)
    }

    pub fn insert_child(&mut self, index: usize, child: DataRef) -> Result<()> {
        self.ensure_safe()?;
        if index > self.children.len() {
            return Err(self.index_error(index));
        }
        attach(&self.header, &child, EdgeKind::Child);
        self.children.insert(index, child);
        Ok(())
    }

    pub fn remove_child(&mut self, index: usize) -> Result<DataRef> {
        self.ensure_safe()?;
        if index >= self.children.len() {
            return Err(self.index_error(index));
        }
        let child = self.children.remove(index);
        detach(&self.header, &child, EdgeKind::Child);
        Ok(child)
    }

    /// Swap the child at `index`, returning the previous one.
    pub fn replace_child(&mut self, index: usize, child: DataRef) -> Result<DataRef> {
        self.ensure_safe()?;
        if index >= self.children.len() {
            return Err(self.index_error(index));
        }
        attach(&self.header, &child, EdgeKind::Child);
        let old = std::mem::replace(&mut self.children[index], child);
        detach(&self.header, &old, EdgeKind::Child);
        Ok(old)
    }

    /// Replace an attribute child's value, adding the attribute if missing.
    pub fn set_attribute(&mut self, identifier: &str, value: AttributeValue) -> Result<()> {
        match self.position_of(identifier) {
            Ok(index) => {
                let attribute = self.make_mutable_child(index)?;
                *attribute.payload_mut()? = DataPayload::Attribute(value);
            }
            Err(_) => {
                self.add_child(DataRef::new(DataObject::attribute(identifier, value)))?;
            }
        }
        Ok(())
    }

    /// Copy-on-write access to the child at `index`.
    ///
    /// Fails with [`CoreError::UnsafeMutation`] when this object itself is
    /// not safe to modify. If the child is shared it is replaced by a shallow
    /// copy first; the returned object is always safe to modify.
    pub fn make_mutable_child(&mut self, index: usize) -> Result<&mut DataObject> {
        self.ensure_safe()?;
        if index >= self.children.len() {
            return Err(self.index_error(index));
        }
        let header = self.header.clone();
        let slot = &mut self.children[index];
        if !slot.is_safe_to_modify() {
            let copy = DataRef::new(slot.shallow_clone());
            attach(&header, &copy, EdgeKind::Child);
            let shared = std::mem::replace(slot, copy);
            detach(&header, &shared, EdgeKind::Child);
            tracing::debug!(
                "Copy-on-write: cloned '{}' #{} -> #{}",
                shared.identifier(),
                shared.uid(),
                slot.uid()
            );
        }
        let identifier = slot.header.clone();
        slot.get_mut()
            .ok_or_else(|| CoreError::UnsafeMutation(identifier.identifier.clone()))
    }

    /// Copy-on-write access to the direct child with the given identifier.
    pub fn make_mutable(&mut self, identifier: &str) -> Result<&mut DataObject> {
        let index = self.position_of(identifier)?;
        self.make_mutable_child(index)
    }

    /// Copy-on-write access along a chain of identifiers.
    pub fn make_mutable_path(&mut self, path: &[&str]) -> Result<&mut DataObject> {
        let mut current = self;
        for identifier in path {
            current = current.make_mutable(identifier)?;
        }
        Ok(current)
    }

    // ── Editable proxy ──

    pub fn editable_proxy(&self) -> Option<&DataRef> {
        self.editable_proxy.as_ref()
    }

    /// Install the object that records user edits of this one. The proxy's
    /// safety does not depend on this object being exclusively owned.
    pub fn set_editable_proxy(&mut self, proxy: Option<DataRef>) -> Result<()> {
        self.ensure_safe()?;
        if let Some(proxy) = &proxy {
            attach(&self.header, proxy, EdgeKind::Proxy);
        }
        if let Some(old) = std::mem::replace(&mut self.editable_proxy, proxy) {
            detach(&self.header, &old, EdgeKind::Proxy);
        }
        Ok(())
    }

    // ── Sharing ──

    /// Member-wise copy with a new identity. Children are shared, not copied.
    pub fn shallow_clone(&self) -> DataObject {
        let copy = DataObject {
            header: ObjectHeader::new(self.header.identifier.clone()),
            payload: self.payload.clone(),
            children: self.children.clone(),
            editable_proxy: self.editable_proxy.clone(),
        };
        for child in &copy.children {
            attach(&copy.header, child, EdgeKind::Child);
        }
        if let Some(proxy) = &copy.editable_proxy {
            attach(&copy.header, proxy, EdgeKind::Proxy);
        }
        copy
    }

    /// The chain of objects from the root down to this one, provided every
    /// object on the way has exactly one parent. `None` when the object is
    /// shared by several parents or the chain loops.
    pub fn exclusive_path(&self) -> Option<Vec<ObjectInfo>> {
        let mut path = vec![self.info()];
        let mut visited = HashSet::from([self.uid()]);
        let mut current = self.header.clone();
        loop {
            let mut parents = current.live_parents(true);
            match parents.len() {
                0 => break,
                1 => {
                    let parent = parents.remove(0);
                    if !visited.insert(parent.uid) {
                        return None;
                    }
                    path.push(parent.info());
                    current = parent;
                }
                _ => return None,
            }
        }
        path.reverse();
        Some(path)
    }
}

impl Drop for DataObject {
    fn drop(&mut self) {
        for child in &self.children {
            detach(&self.header, child, EdgeKind::Child);
        }
        if let Some(proxy) = &self.editable_proxy {
            detach(&self.header, proxy, EdgeKind::Proxy);
        }
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataObject")
            .field("uid", &self.uid())
            .field("identifier", &self.identifier())
            .field("payload", &self.payload)
            .field("children", &self.children)
            .finish()
    }
}

/// Counted handle to an immutable data object.
pub struct DataRef(Arc<DataObject>);

impl DataRef {
    pub fn new(object: DataObject) -> Self {
        object.header.data_refs.fetch_add(1, Ordering::AcqRel);
        DataRef(Arc::new(object))
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(a: &DataRef, b: &DataRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// In-place access, only if the object is safe to modify.
    pub fn get_mut(&mut self) -> Option<&mut DataObject> {
        if !self.0.is_safe_to_modify() {
            return None;
        }
        Arc::get_mut(&mut self.0)
    }

    /// Copy-on-write access for a handle that is not itself a child slot
    /// (a flow state root, for instance): clones the object if shared.
    pub fn make_mut(&mut self) -> Result<&mut DataObject> {
        if !self.0.is_safe_to_modify() || Arc::get_mut(&mut self.0).is_none() {
            let copy = DataRef::new(self.shallow_clone());
            tracing::debug!(
                "Copy-on-write: cloned root '{}' #{} -> #{}",
                self.identifier(),
                self.uid(),
                copy.uid()
            );
            *self = copy;
        }
        let header = self.0.header.clone();
        self.get_mut()
            .ok_or_else(|| CoreError::UnsafeMutation(header.identifier.clone()))
    }
}

impl Clone for DataRef {
    fn clone(&self) -> Self {
        self.0.header.data_refs.fetch_add(1, Ordering::AcqRel);
        DataRef(self.0.clone())
    }
}

impl Drop for DataRef {
    fn drop(&mut self) {
        self.0.header.data_refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for DataRef {
    type Target = DataObject;

    fn deref(&self) -> &DataObject {
        &self.0
    }
}

impl fmt::Debug for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> DataRef {
        DataRef::new(DataObject::buffer(
            "Position",
            DataBuffer::from_values(1, vec![1.0, 2.0, 3.0]).unwrap(),
        ))
    }

    #[test]
    fn test_shared_child_is_cloned_on_write() {
        let child = positions();
        let mut first = DataObject::collection();
        let mut second = DataObject::collection();
        first.add_child(child.clone()).unwrap();
        second.add_child(child.clone()).unwrap();
        drop(child);

        assert_eq!(first.children()[0].data_reference_count(), 2);
        assert!(!first.children()[0].is_safe_to_modify());

        let original_uid = second.children()[0].uid();
        let mutable = first.make_mutable_child(0).unwrap();
        assert_ne!(mutable.uid(), original_uid);
        mutable.buffer_mut().unwrap().values_mut()[0] = 9.0;

        assert_eq!(first.children()[0].as_buffer().unwrap().values()[0], 9.0);
        assert_eq!(second.children()[0].as_buffer().unwrap().values()[0], 1.0);
        assert_eq!(second.children()[0].data_reference_count(), 1);
        assert_eq!(second.children()[0].parent_count(), 1);
    }

    #[test]
    fn test_make_mutable_twice_returns_same_object() {
        let mut collection = DataObject::collection();
        let shared = positions();
        collection.add_child(shared.clone()).unwrap();

        let first_uid = collection.make_mutable("Position").unwrap().uid();
        let second_uid = collection.make_mutable("Position").unwrap().uid();
        assert_eq!(first_uid, second_uid);
        assert_ne!(first_uid, shared.uid());
    }

    #[test]
    fn test_shared_parent_makes_child_unsafe() {
        let mut container = DataObject::new("Particles", DataPayload::Container);
        container.add_child(positions()).unwrap();
        let container = DataRef::new(container);

        let mut root = DataObject::collection();
        root.add_child(container.clone()).unwrap();
        let leaf = &root.children()[0].children()[0];
        assert_eq!(leaf.data_reference_count(), 1);
        assert!(!leaf.is_safe_to_modify());

        drop(container);
        assert!(root.children()[0].children()[0].is_safe_to_modify());
    }

    #[test]
    fn test_nested_copy_on_write_leaves_other_tree_intact() {
        let mut container = DataObject::new("Particles", DataPayload::Container);
        container.add_child(positions()).unwrap();
        let mut original = DataObject::collection();
        original.add_child(DataRef::new(container)).unwrap();
        let original = DataRef::new(original);

        let mut copy = original.clone();
        let root = copy.make_mut().unwrap();
        let leaf = root.make_mutable_path(&["Particles", "Position"]).unwrap();
        leaf.buffer_mut().unwrap().values_mut()[2] = -1.0;

        let untouched = original.find_path(&["Particles", "Position"]).unwrap();
        assert_eq!(untouched.as_buffer().unwrap().values(), &[1.0, 2.0, 3.0]);
        let edited = copy.find_path(&["Particles", "Position"]).unwrap();
        assert_eq!(edited.as_buffer().unwrap().values(), &[1.0, 2.0, -1.0]);
        assert!(!DataRef::ptr_eq(&original, &copy));
    }

    #[test]
    fn test_shared_handle_denies_in_place_access() {
        let mut container = DataObject::new("Particles", DataPayload::Container);
        container.add_child(positions()).unwrap();
        let shared = DataRef::new(container);
        let mut holder = DataObject::collection();
        holder.add_child(shared.clone()).unwrap();

        let mut other = shared.clone();
        assert!(other.get_mut().is_none());
        let mut detached = other.shallow_clone();
        drop(other);
        assert!(detached.make_mutable("Position").is_ok());
    }

    #[test]
    fn test_editable_proxy_exempt_from_parent_check() {
        let proxy = DataRef::new(DataObject::attribute("Label", PropertyValue::Text("a".into())));
        let mut owner = DataObject::new("Particles", DataPayload::Container);
        owner.set_editable_proxy(Some(proxy)).unwrap();
        let owner = DataRef::new(owner);
        let _second = owner.clone();

        assert!(!owner.is_safe_to_modify());
        assert!(owner.editable_proxy().unwrap().is_safe_to_modify());
    }

    #[test]
    fn test_exclusive_path() {
        let mut container = DataObject::new("Particles", DataPayload::Container);
        container.add_child(positions()).unwrap();
        let mut root = DataObject::collection();
        root.add_child(DataRef::new(container)).unwrap();

        let leaf = root.find_path(&["Particles", "Position"]).unwrap();
        let path: Vec<String> = leaf
            .exclusive_path()
            .unwrap()
            .into_iter()
            .map(|info| info.identifier)
            .collect();
        assert_eq!(path, vec!["", "Particles", "Position"]);

        let mut other = DataObject::collection();
        other.add_child(root.children()[0].clone()).unwrap();
        let leaf = root.find_path(&["Particles", "Position"]).unwrap();
        assert!(leaf.exclusive_path().is_none());
    }

    #[test]
    fn test_attributes_and_child_edits() {
        let mut root = DataObject::collection();
        root.set_attribute("Timestep", PropertyValue::Int(3)).unwrap();
        root.set_attribute("Timestep", PropertyValue::Int(4)).unwrap();
        assert_eq!(root.children().len(), 1);
        assert_eq!(
            root.find("Timestep").unwrap().as_attribute(),
            Some(&PropertyValue::Int(4))
        );

        let removed = root.remove_child(0).unwrap();
        assert_eq!(removed.parent_count(), 0);
        assert!(matches!(
            root.remove_child(0),
            Err(CoreError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            root.make_mutable("Missing"),
            Err(CoreError::Computation(_))
        ));
    }
}
