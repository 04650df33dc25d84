//! Snapshot and Resume
//!
//! A [`Snapshot`] is the flat, id-keyed table of everything a runtime would
//! need to continue elsewhere: signal values, store nodes, registered closure
//! references, and named roots. [`Runtime::resume`] rebuilds a runtime from
//! it with identical ids before any task runs.
//!
//! Signal values are restored untyped. A restored signal takes its type the
//! first time it is looked up with [`Runtime::signal_by_id`].
//!
//! Snapshots encode as JSON or MessagePack.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::closure::ClosureRef;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::reactive::{IdAllocator, Runtime, SourceId, StoreRecord};

/// Current snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One source in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotEntry {
    Signal(serde_json::Value),
    Store(StoreRecord),
    Closure(ClosureRef),
}

/// The serialized state of a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// The next source id to allocate after resume.
    pub next_id: u64,
    pub roots: IndexMap<String, SourceId>,
    pub entries: BTreeMap<SourceId, SnapshotEntry>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, ReactiveError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, ReactiveError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ReactiveError> {
        let snapshot: Self = rmp_serde::from_slice(bytes)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    fn check_version(&self) -> Result<(), ReactiveError> {
        if self.version == SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(ReactiveError::Snapshot(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: SourceId) -> Option<&SnapshotEntry> {
        self.entries.get(&id)
    }
}

impl Runtime {
    /// Capture every live signal, store node, and registered closure.
    ///
    /// Tasks are not captured. A resumed application re-creates its tasks
    /// against the restored sources.
    pub fn snapshot(&self) -> Result<Snapshot, ReactiveError> {
        let mut entries = BTreeMap::new();

        let cells: Vec<_> = self
            .inner
            .cells
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (id, cell) in cells {
            entries.insert(id, SnapshotEntry::Signal(cell.snapshot()?));
        }
        for entry in self.inner.pending_restore.iter() {
            entries.insert(*entry.key(), SnapshotEntry::Signal(entry.value().clone()));
        }
        for (id, record) in self.inner.stores.lock().records() {
            entries.insert(id, SnapshotEntry::Store(record));
        }
        for (id, closure) in self.inner.closures.lock().iter() {
            entries.insert(*id, SnapshotEntry::Closure(closure.clone()));
        }

        tracing::debug!(entries = entries.len(), "snapshot taken");
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            next_id: self.inner.ids.peek(),
            roots: self.inner.roots.lock().clone(),
            entries,
        })
    }

    /// Build a runtime from a snapshot. Every id in the snapshot names the
    /// same source in the new runtime, and new ids never collide with them.
    pub fn resume(snapshot: Snapshot, config: RuntimeConfig) -> Result<Runtime, ReactiveError> {
        let highest = snapshot.entries.keys().next_back().map_or(0, |id| id.raw() + 1);
        let runtime = Runtime::build(config, IdAllocator::starting_at(snapshot.next_id.max(highest)));

        {
            let mut stores = runtime.inner.stores.lock();
            let mut closures = runtime.inner.closures.lock();
            for (id, entry) in snapshot.entries {
                match entry {
                    SnapshotEntry::Signal(value) => {
                        runtime.inner.pending_restore.insert(id, value);
                    }
                    SnapshotEntry::Store(record) => stores.restore(id, record)?,
                    SnapshotEntry::Closure(closure) => {
                        closures.insert(id, closure);
                    }
                }
            }
        }
        *runtime.inner.roots.lock() = snapshot.roots;

        tracing::debug!(next_id = runtime.inner.ids.peek(), "runtime resumed");
        Ok(runtime)
    }
}

// ---- Tests ----
