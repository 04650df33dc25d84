//! Reactive Stores
//!
//! A store wraps a record or a sequence so that every field is tracked on its
//! own. Stores live in an arena owned by the runtime; a [`Store`] handle is
//! just the node's id.
//!
//! # Sources
//!
//! Each store node has two kinds of sources:
//!
//! - The node id itself is the *shape* source. Enumeration (`keys`, `len`,
//!   `to_value`) tracks it. Insertions, removals and reorders fire it.
//! - Each key gets its own *field* source, allocated on first read. Writes to
//!   a key fire only that key's source.
//!
//! A write that inserts a new key fires both the field and the shape source.
//!
//! # Nesting
//!
//! Nested records and sequences are stored as plain values until first read
//! through [`Store::get`], when they are wrapped in a child node. The child id
//! is cached in the parent entry, so repeated reads return the same store.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{IdAllocator, SourceId};
use super::runtime::{Runtime, WeakRuntime};
use crate::error::ReactiveError;
use crate::graph::EdgeKind;

/// A field name or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    Record,
    Sequence,
}

/// A store entry as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredSlot {
    Value(Value),
    Store(SourceId),
}

/// A store node as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub kind: AggregateKind,
    pub entries: Vec<(Key, StoredSlot)>,
    /// Field sources allocated so far, so resumed edges keep their ids.
    pub fields: Vec<(Key, SourceId)>,
}

#[derive(Debug, Clone)]
enum Entry {
    Value(Value),
    Nested(SourceId),
}

#[derive(Debug)]
enum Entries {
    Record(IndexMap<String, Entry>),
    Sequence(Vec<Entry>),
}

#[derive(Debug)]
struct StoreNode {
    entries: Entries,
    fields: HashMap<Key, SourceId>,
}

impl StoreNode {
    fn kind(&self) -> AggregateKind {
        match self.entries {
            Entries::Record(_) => AggregateKind::Record,
            Entries::Sequence(_) => AggregateKind::Sequence,
        }
    }

    fn len(&self) -> usize {
        match &self.entries {
            Entries::Record(map) => map.len(),
            Entries::Sequence(items) => items.len(),
        }
    }

    fn keys(&self) -> Vec<Key> {
        match &self.entries {
            Entries::Record(map) => map.keys().cloned().map(Key::Field).collect(),
            Entries::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    fn entry(&self, key: &Key) -> Option<&Entry> {
        match (&self.entries, key) {
            (Entries::Record(map), Key::Field(name)) => map.get(name),
            (Entries::Sequence(items), Key::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    fn entry_mut(&mut self, key: &Key) -> Option<&mut Entry> {
        match (&mut self.entries, key) {
            (Entries::Record(map), Key::Field(name)) => map.get_mut(name),
            (Entries::Sequence(items), Key::Index(index)) => items.get_mut(*index),
            _ => None,
        }
    }

    fn accepts(&self, key: &Key) -> bool {
        matches!(
            (&self.entries, key),
            (Entries::Record(_), Key::Field(_)) | (Entries::Sequence(_), Key::Index(_))
        )
    }

    /// Existing field sources for indices at or after `from`.
    fn index_sources_from(&self, from: usize) -> Vec<SourceId> {
        let mut sources: Vec<(usize, SourceId)> = self
            .fields
            .iter()
            .filter_map(|(key, id)| match key {
                Key::Index(index) if *index >= from => Some((*index, *id)),
                _ => None,
            })
            .collect();
        sources.sort_unstable();
        sources.into_iter().map(|(_, id)| id).collect()
    }
}

/// Result of reading one key.
pub(crate) enum Slot {
    Value(Value),
    Nested(SourceId),
}

/// Sources affected by a write.
#[derive(Debug, Default)]
pub(crate) struct Change {
    /// Sources whose consumers must re-run.
    pub(crate) fired: Vec<SourceId>,
    /// Sources of nested nodes that no longer exist.
    pub(crate) released: Vec<SourceId>,
}

/// Every store node of one runtime.
#[derive(Debug, Default)]
pub(crate) struct StoreArena {
    nodes: HashMap<SourceId, StoreNode>,
}

impl StoreArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: SourceId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Wrap an aggregate in a new node. Nested aggregates stay plain values
    /// until first read.
    pub(crate) fn wrap(&mut self, value: Value, ids: &IdAllocator) -> Result<SourceId, ReactiveError> {
        let entries = match value {
            Value::Object(map) => Entries::Record(
                map.into_iter()
                    .map(|(name, value)| (name, Entry::Value(value)))
                    .collect(),
            ),
            Value::Array(items) => Entries::Sequence(items.into_iter().map(Entry::Value).collect()),
            _ => return Err(ReactiveError::NotAnAggregate),
        };

        let id = ids.next_source();
        self.nodes.insert(
            id,
            StoreNode {
                entries,
                fields: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn node(&self, id: SourceId) -> Result<&StoreNode, ReactiveError> {
        self.nodes.get(&id).ok_or(ReactiveError::UnknownSource(id))
    }

    fn node_mut(&mut self, id: SourceId) -> Result<&mut StoreNode, ReactiveError> {
        self.nodes.get_mut(&id).ok_or(ReactiveError::UnknownSource(id))
    }

    fn field_source(
        &mut self,
        store: SourceId,
        key: &Key,
        ids: &IdAllocator,
    ) -> Result<SourceId, ReactiveError> {
        let node = self.node_mut(store)?;
        if !node.accepts(key) {
            return Err(ReactiveError::InvalidKey {
                store,
                key: key.clone(),
            });
        }
        Ok(*node
            .fields
            .entry(key.clone())
            .or_insert_with(|| ids.next_source()))
    }

    /// Read one key. Returns the key's field source and its slot; a nested
    /// aggregate is wrapped on first read.
    pub(crate) fn get(
        &mut self,
        store: SourceId,
        key: &Key,
        ids: &IdAllocator,
    ) -> Result<(SourceId, Option<Slot>), ReactiveError> {
        let field = self.field_source(store, key, ids)?;

        let pending = match self.node(store)?.entry(key) {
            None => return Ok((field, None)),
            Some(Entry::Nested(child)) => return Ok((field, Some(Slot::Nested(*child)))),
            Some(Entry::Value(value)) if !is_aggregate(value) => {
                return Ok((field, Some(Slot::Value(value.clone()))))
            }
            Some(Entry::Value(value)) => value.clone(),
        };

        let child = self.wrap(pending, ids)?;
        if let Some(entry) = self.node_mut(store)?.entry_mut(key) {
            *entry = Entry::Nested(child);
        }
        Ok((field, Some(Slot::Nested(child))))
    }

    /// Write one key. Returns `None` when the value is unchanged, otherwise
    /// the sources to fire and the nested nodes the write dropped.
    pub(crate) fn set(
        &mut self,
        store: SourceId,
        key: &Key,
        value: Value,
    ) -> Result<Option<Change>, ReactiveError> {
        let (current, replaced) = match self.node(store)?.entry(key) {
            Some(Entry::Value(current)) => (Some(current.clone()), None),
            Some(Entry::Nested(child)) => (Some(self.materialize(*child)?), Some(*child)),
            None => (None, None),
        };
        if current.as_ref() == Some(&value) {
            return Ok(None);
        }

        let node = self.node_mut(store)?;
        let mut fired = Vec::new();
        let inserted = current.is_none();

        match (&mut node.entries, key) {
            (Entries::Record(map), Key::Field(name)) => {
                map.insert(name.clone(), Entry::Value(value));
            }
            (Entries::Sequence(items), Key::Index(index)) if *index < items.len() => {
                items[*index] = Entry::Value(value);
            }
            (Entries::Sequence(items), Key::Index(index)) if *index == items.len() => {
                items.push(Entry::Value(value));
            }
            _ => {
                return Err(ReactiveError::InvalidKey {
                    store,
                    key: key.clone(),
                })
            }
        }

        if let Some(field) = node.fields.get(key) {
            fired.push(*field);
        }
        if inserted {
            fired.push(store);
        }
        let released = replaced.map(|child| self.release_nested(child)).unwrap_or_default();
        Ok(Some(Change { fired, released }))
    }

    /// Remove one key. Removing from a sequence shifts later elements, so
    /// their field sources fire too.
    pub(crate) fn remove(
        &mut self,
        store: SourceId,
        key: &Key,
    ) -> Result<Option<(Value, Change)>, ReactiveError> {
        let node = self.node_mut(store)?;
        if !node.accepts(key) {
            return Err(ReactiveError::InvalidKey {
                store,
                key: key.clone(),
            });
        }

        let removed = match (&mut node.entries, key) {
            (Entries::Record(map), Key::Field(name)) => map.shift_remove(name),
            (Entries::Sequence(items), Key::Index(index)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            _ => None,
        };
        let Some(removed) = removed else {
            return Ok(None);
        };

        let mut fired = match key {
            Key::Index(index) => node.index_sources_from(*index),
            Key::Field(_) => node.fields.get(key).copied().into_iter().collect(),
        };
        fired.push(store);

        let (value, released) = match removed {
            Entry::Value(value) => (value, Vec::new()),
            Entry::Nested(child) => (self.materialize(child)?, self.release_nested(child)),
        };
        Ok(Some((value, Change { fired, released })))
    }

    pub(crate) fn insert(
        &mut self,
        store: SourceId,
        index: usize,
        value: Value,
    ) -> Result<Vec<SourceId>, ReactiveError> {
        let node = self.node_mut(store)?;
        let Entries::Sequence(items) = &mut node.entries else {
            return Err(ReactiveError::InvalidKey {
                store,
                key: Key::Index(index),
            });
        };
        if index > items.len() {
            return Err(ReactiveError::InvalidKey {
                store,
                key: Key::Index(index),
            });
        }

        items.insert(index, Entry::Value(value));
        let mut fired = node.index_sources_from(index);
        fired.push(store);
        Ok(fired)
    }

    pub(crate) fn push(&mut self, store: SourceId, value: Value) -> Result<Vec<SourceId>, ReactiveError> {
        let len = self.node(store)?.len();
        self.insert(store, len, value)
    }

    pub(crate) fn swap(
        &mut self,
        store: SourceId,
        a: usize,
        b: usize,
    ) -> Result<Vec<SourceId>, ReactiveError> {
        let node = self.node_mut(store)?;
        let Entries::Sequence(items) = &mut node.entries else {
            return Err(ReactiveError::InvalidKey {
                store,
                key: Key::Index(a),
            });
        };
        for index in [a, b] {
            if index >= items.len() {
                return Err(ReactiveError::InvalidKey {
                    store,
                    key: Key::Index(index),
                });
            }
        }
        if a == b {
            return Ok(Vec::new());
        }

        items.swap(a, b);
        let mut fired: Vec<SourceId> = [Key::Index(a), Key::Index(b)]
            .iter()
            .filter_map(|key| node.fields.get(key).copied())
            .collect();
        fired.push(store);
        Ok(fired)
    }

    pub(crate) fn keys(&self, store: SourceId) -> Result<Vec<Key>, ReactiveError> {
        Ok(self.node(store)?.keys())
    }

    pub(crate) fn size(&self, store: SourceId) -> Result<usize, ReactiveError> {
        Ok(self.node(store)?.len())
    }

    pub(crate) fn kind(&self, store: SourceId) -> Result<AggregateKind, ReactiveError> {
        Ok(self.node(store)?.kind())
    }

    /// The plain value of a node and everything under it.
    pub(crate) fn materialize(&self, store: SourceId) -> Result<Value, ReactiveError> {
        let node = self.node(store)?;
        let plain = |entry: &Entry| match entry {
            Entry::Value(value) => Ok(value.clone()),
            Entry::Nested(child) => self.materialize(*child),
        };

        Ok(match &node.entries {
            Entries::Record(map) => Value::Object(
                map.iter()
                    .map(|(name, entry)| Ok((name.clone(), plain(entry)?)))
                    .collect::<Result<_, ReactiveError>>()?,
            ),
            Entries::Sequence(items) => {
                Value::Array(items.iter().map(plain).collect::<Result<_, _>>()?)
            }
        })
    }

    /// Every source a deep read of `store` depends on: the shape and every
    /// field of each node, wrapping nested aggregates on the way.
    pub(crate) fn deep_sources(
        &mut self,
        store: SourceId,
        ids: &IdAllocator,
        out: &mut Vec<(SourceId, EdgeKind)>,
    ) -> Result<(), ReactiveError> {
        out.push((store, EdgeKind::Shape));
        for key in self.keys(store)? {
            let (field, slot) = self.get(store, &key, ids)?;
            out.push((field, EdgeKind::Value));
            if let Some(Slot::Nested(child)) = slot {
                self.deep_sources(child, ids, out)?;
            }
        }
        Ok(())
    }

    /// Drop a node and its nested nodes. Returns every source id forgotten.
    pub(crate) fn release(&mut self, store: SourceId) -> Vec<SourceId> {
        let Some(node) = self.nodes.remove(&store) else {
            return Vec::new();
        };

        let mut released: Vec<SourceId> = node.fields.values().copied().collect();
        let children: Vec<SourceId> = match &node.entries {
            Entries::Record(map) => map.values().filter_map(nested_id).collect(),
            Entries::Sequence(items) => items.iter().filter_map(nested_id).collect(),
        };
        for child in children {
            released.push(child);
            released.extend(self.release(child));
        }
        released
    }

    /// Release a nested node that its parent no longer holds. Returns the
    /// node's own id along with everything under it.
    fn release_nested(&mut self, child: SourceId) -> Vec<SourceId> {
        let mut released = vec![child];
        released.extend(self.release(child));
        released
    }

    pub(crate) fn records(&self) -> Vec<(SourceId, StoreRecord)> {
        self.nodes
            .iter()
            .map(|(id, node)| {
                let slot = |entry: &Entry| match entry {
                    Entry::Value(value) => StoredSlot::Value(value.clone()),
                    Entry::Nested(child) => StoredSlot::Store(*child),
                };
                let entries = match &node.entries {
                    Entries::Record(map) => map
                        .iter()
                        .map(|(name, entry)| (Key::Field(name.clone()), slot(entry)))
                        .collect(),
                    Entries::Sequence(items) => items
                        .iter()
                        .enumerate()
                        .map(|(index, entry)| (Key::Index(index), slot(entry)))
                        .collect(),
                };
                let mut fields: Vec<(Key, SourceId)> =
                    node.fields.iter().map(|(k, v)| (k.clone(), *v)).collect();
                fields.sort_by_key(|(_, id)| *id);

                (
                    *id,
                    StoreRecord {
                        kind: node.kind(),
                        entries,
                        fields,
                    },
                )
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, id: SourceId, record: StoreRecord) -> Result<(), ReactiveError> {
        let entry = |slot: StoredSlot| match slot {
            StoredSlot::Value(value) => Entry::Value(value),
            StoredSlot::Store(child) => Entry::Nested(child),
        };

        let entries = match record.kind {
            AggregateKind::Record => Entries::Record(
                record
                    .entries
                    .into_iter()
                    .map(|(key, slot)| match key {
                        Key::Field(name) => Ok((name, entry(slot))),
                        key @ Key::Index(_) => Err(ReactiveError::InvalidKey { store: id, key }),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            AggregateKind::Sequence => {
                Entries::Sequence(record.entries.into_iter().map(|(_, slot)| entry(slot)).collect())
            }
        };

        self.nodes.insert(
            id,
            StoreNode {
                entries,
                fields: record.fields.into_iter().collect(),
            },
        );
        Ok(())
    }
}

fn nested_id(entry: &Entry) -> Option<SourceId> {
    match entry {
        Entry::Nested(child) => Some(*child),
        Entry::Value(_) => None,
    }
}

fn encode(value: impl Serialize) -> Result<Value, ReactiveError> {
    serde_json::to_value(value).map_err(|err| ReactiveError::Encode(err.to_string()))
}

fn is_aggregate(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// What a store read returns.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Value(Value),
    Store(Store),
}

impl StoreValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            StoreValue::Value(value) => Some(value),
            StoreValue::Store(_) => None,
        }
    }

    pub fn as_store(&self) -> Option<&Store> {
        match self {
            StoreValue::Store(store) => Some(store),
            StoreValue::Value(_) => None,
        }
    }
}

/// Handle to a store node.
///
/// Two handles are equal when they refer to the same node.
#[derive(Clone)]
pub struct Store {
    id: SourceId,
    runtime: WeakRuntime,
}

impl Store {
    pub(crate) fn from_parts(id: SourceId, runtime: WeakRuntime) -> Self {
        Self { id, runtime }
    }

    /// The node id, which is also its shape source.
    pub fn id(&self) -> SourceId {
        self.id
    }

    fn runtime(&self) -> Result<Runtime, ReactiveError> {
        self.runtime.require()
    }

    /// Read one key, subscribing the executing consumer to that key only.
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<StoreValue>, ReactiveError> {
        let rt = self.runtime()?;
        let key = key.into();
        let (field, slot) = rt.inner.stores.lock().get(self.id, &key, &rt.inner.ids)?;
        rt.track(field, EdgeKind::Value);

        Ok(slot.map(|slot| match slot {
            Slot::Value(value) => StoreValue::Value(value),
            Slot::Nested(child) => StoreValue::Store(Store::from_parts(child, self.runtime.clone())),
        }))
    }

    /// Read one key and deserialize it. Nested stores are read deeply.
    pub fn get_as<T: DeserializeOwned>(&self, key: impl Into<Key>) -> Result<Option<T>, ReactiveError> {
        let value = match self.get(key)? {
            None => return Ok(None),
            Some(StoreValue::Value(value)) => value,
            Some(StoreValue::Store(store)) => store.to_value()?,
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|_| ReactiveError::TypeMismatch {
                id: self.id,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Write one key. Returns `false` if the value was unchanged.
    ///
    /// Writing a new key of a record, or the index just past the end of a
    /// sequence, inserts it.
    pub fn set(&self, key: impl Into<Key>, value: impl Serialize) -> Result<bool, ReactiveError> {
        let rt = self.runtime()?;
        let value = encode(value)?;
        let change = rt.inner.stores.lock().set(self.id, &key.into(), value)?;

        match change {
            Some(change) => {
                rt.apply_change(change);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove one key, returning its plain value.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<Value>, ReactiveError> {
        let rt = self.runtime()?;
        let removed = rt.inner.stores.lock().remove(self.id, &key.into())?;
        Ok(removed.map(|(value, change)| {
            rt.apply_change(change);
            value
        }))
    }

    pub fn push(&self, value: impl Serialize) -> Result<(), ReactiveError> {
        let rt = self.runtime()?;
        let value = encode(value)?;
        let sources = rt.inner.stores.lock().push(self.id, value)?;
        rt.trigger(&sources);
        Ok(())
    }

    pub fn insert(&self, index: usize, value: impl Serialize) -> Result<(), ReactiveError> {
        let rt = self.runtime()?;
        let value = encode(value)?;
        let sources = rt.inner.stores.lock().insert(self.id, index, value)?;
        rt.trigger(&sources);
        Ok(())
    }

    /// Swap two elements of a sequence. A reorder changes the shape.
    pub fn swap(&self, a: usize, b: usize) -> Result<(), ReactiveError> {
        let rt = self.runtime()?;
        let sources = rt.inner.stores.lock().swap(self.id, a, b)?;
        rt.trigger(&sources);
        Ok(())
    }

    /// Enumerate keys, subscribing to the shape.
    pub fn keys(&self) -> Result<Vec<Key>, ReactiveError> {
        let rt = self.runtime()?;
        let keys = rt.inner.stores.lock().keys(self.id)?;
        rt.track(self.id, EdgeKind::Shape);
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize, ReactiveError> {
        let rt = self.runtime()?;
        let len = rt.inner.stores.lock().size(self.id)?;
        rt.track(self.id, EdgeKind::Shape);
        Ok(len)
    }

    pub fn is_empty(&self) -> Result<bool, ReactiveError> {
        Ok(self.len()? == 0)
    }

    pub fn kind(&self) -> Result<AggregateKind, ReactiveError> {
        self.runtime()?.inner.stores.lock().kind(self.id)
    }

    /// The whole plain value, subscribing to every field at every depth.
    pub fn to_value(&self) -> Result<Value, ReactiveError> {
        let rt = self.runtime()?;
        let mut sources = Vec::new();
        let value = {
            let mut stores = rt.inner.stores.lock();
            stores.deep_sources(self.id, &rt.inner.ids, &mut sources)?;
            stores.materialize(self.id)?
        };
        for (source, kind) in sources {
            rt.track(source, kind);
        }
        Ok(value)
    }

    /// The whole plain value, without subscribing.
    pub fn snapshot_value(&self) -> Result<Value, ReactiveError> {
        self.runtime()?.inner.stores.lock().materialize(self.id)
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Store {}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("id", &self.id).finish()
    }
}

// ---- Tests ----
