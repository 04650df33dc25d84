//! Subscription Graph
//!
//! A bipartite mapping between reactive sources and the consumers (tasks)
//! that read them during their most recent execution.
//!
//! Edges are rebuilt on every execution. While a consumer runs, each tracked
//! read adds an edge if it is not already present; when the consumer finishes,
//! edges that were not read this time are pruned. The graph therefore always
//! reflects each consumer's latest dependency set.
//!
//! The graph also owns the context stack, so "which consumer is executing"
//! and "what did it read" live behind the same lock.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::reactive::context::ContextStack;
use crate::reactive::{SourceId, TaskId};

/// What kind of read created an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The consumer read a value (signal or store field).
    Value,
    /// The consumer enumerated a store (keys, length, iteration).
    Shape,
}

/// Edges added and removed by one consumer execution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyDiff {
    pub added: Vec<SourceId>,
    pub removed: Vec<SourceId>,
}

impl DependencyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Sources to their consumers and back.
#[derive(Debug, Default)]
pub struct SubscriptionGraph {
    /// Source -> consumers that read it.
    subscribers: HashMap<SourceId, IndexMap<TaskId, EdgeKind>>,

    /// Consumer -> sources it read.
    dependencies: HashMap<TaskId, IndexMap<SourceId, EdgeKind>>,

    context: ContextStack,
}

impl SubscriptionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tracking frame for `task` (`None` opens an untracked scope).
    pub fn begin_tracking(&mut self, task: Option<TaskId>) {
        self.context.push(task);
    }

    /// Record a read against the innermost frame.
    ///
    /// Returns the consumer the read was attributed to, or `None` when no
    /// consumer is tracking.
    pub fn record_read(&mut self, source: SourceId, kind: EdgeKind) -> Option<TaskId> {
        let frame = self.context.current_frame_mut()?;
        let task = frame.task?;

        if frame.reads.contains_key(&source) {
            return Some(task);
        }
        frame.reads.insert(source, kind);

        let deps = self.dependencies.entry(task).or_default();
        if deps.insert(source, kind).is_none() {
            frame.fresh.push(source);
        }
        self.subscribers
            .entry(source)
            .or_default()
            .insert(task, kind);

        Some(task)
    }

    /// Close the innermost frame and prune edges not read during it.
    pub fn end_tracking(&mut self, task: Option<TaskId>) -> DependencyDiff {
        let Some(frame) = self.context.pop(task) else {
            return DependencyDiff::default();
        };
        let Some(task) = frame.task else {
            return DependencyDiff::default();
        };

        let stale: Vec<SourceId> = self
            .dependencies
            .get(&task)
            .map(|deps| {
                deps.keys()
                    .filter(|source| !frame.reads.contains_key(*source))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        for source in &stale {
            self.unlink(*source, task);
        }

        DependencyDiff {
            added: frame.fresh,
            removed: stale,
        }
    }

    /// The innermost tracking consumer.
    pub fn current(&self) -> Option<TaskId> {
        self.context.current()
    }

    /// The consumer whose run is in progress, even inside an untracked scope.
    pub fn executing(&self) -> Option<TaskId> {
        self.context.executing()
    }

    /// Whether any frame (tracked or untracked) is open.
    pub fn is_tracking(&self) -> bool {
        self.context.is_active()
    }

    /// Consumers currently subscribed to `source`.
    pub fn notify(&self, source: SourceId) -> Vec<TaskId> {
        self.subscribers
            .get(&source)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Remove and return every consumer subscribed to any of `sources`,
    /// de-duplicated, in first-subscribed order.
    ///
    /// Consumers that are executing and have not yet read the source in the
    /// current run are dropped from the result: they will read the new value.
    pub fn take_subscribers(&mut self, sources: &[SourceId]) -> IndexSet<TaskId> {
        let mut consumers = IndexSet::new();

        for source in sources {
            let Some(subs) = self.subscribers.remove(source) else {
                continue;
            };
            for task in subs.into_keys() {
                if let Some(deps) = self.dependencies.get_mut(&task) {
                    deps.shift_remove(source);
                }
                if self.context.will_observe(task, *source) {
                    continue;
                }
                consumers.insert(task);
            }
        }

        consumers
    }

    /// Forget every edge of a disposed consumer.
    pub fn remove_consumer(&mut self, task: TaskId) {
        if let Some(deps) = self.dependencies.remove(&task) {
            for source in deps.keys() {
                if let Some(subs) = self.subscribers.get_mut(source) {
                    subs.shift_remove(&task);
                    if subs.is_empty() {
                        self.subscribers.remove(source);
                    }
                }
            }
        }
    }

    /// Forget every edge of a source that no longer exists.
    pub fn remove_source(&mut self, source: SourceId) {
        if let Some(subs) = self.subscribers.remove(&source) {
            for task in subs.keys() {
                if let Some(deps) = self.dependencies.get_mut(task) {
                    deps.shift_remove(&source);
                }
            }
        }
    }

    /// The sources `task` read during its last execution.
    pub fn dependencies_of(&self, task: TaskId) -> Vec<(SourceId, EdgeKind)> {
        self.dependencies
            .get(&task)
            .map(|deps| deps.iter().map(|(s, k)| (*s, *k)).collect())
            .unwrap_or_default()
    }

    pub fn has_edge(&self, source: SourceId, task: TaskId) -> bool {
        self.subscribers
            .get(&source)
            .is_some_and(|subs| subs.contains_key(&task))
    }

    pub fn subscriber_count(&self, source: SourceId) -> usize {
        self.subscribers.get(&source).map_or(0, IndexMap::len)
    }

    pub fn edge_count(&self) -> usize {
        self.subscribers.values().map(IndexMap::len).sum()
    }

    fn unlink(&mut self, source: SourceId, task: TaskId) {
        if let Some(subs) = self.subscribers.get_mut(&source) {
            subs.shift_remove(&task);
            if subs.is_empty() {
                self.subscribers.remove(&source);
            }
        }
        if let Some(deps) = self.dependencies.get_mut(&task) {
            deps.shift_remove(&source);
        }
    }
}
