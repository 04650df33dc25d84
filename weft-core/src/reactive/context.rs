//! Reactive Context
//!
//! The reactive context tracks which consumer is currently executing. This
//! enables automatic dependency tracking: when a source is read, the runtime
//! records an edge from that source to the innermost consumer.
//!
//! # Implementation
//!
//! The stack is a plain value owned by the runtime's subscription graph, not
//! a thread-local. Entering a consumer pushes a frame; the returned guard pops
//! it, even if the consumer panics.
//!
//! Nested frames are normal: a computed pulled during a render runs in its own
//! frame, and its reads are attributed to the computed, not to the render.
//! A frame without a task is an untracked scope.

use indexmap::IndexMap;

use super::ids::{SourceId, TaskId};
use super::runtime::RuntimeInner;
use crate::graph::EdgeKind;

/// An entry in the context stack.
#[derive(Debug, Clone)]
pub(crate) struct TrackingFrame {
    /// The consumer being executed; `None` for an untracked scope.
    pub(crate) task: Option<TaskId>,
    /// Sources read during this execution, in first-read order.
    pub(crate) reads: IndexMap<SourceId, EdgeKind>,
    /// Sources that had no edge to this consumer before this execution.
    pub(crate) fresh: Vec<SourceId>,
}

/// The stack of executing consumers.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<TrackingFrame>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, task: Option<TaskId>) {
        self.frames.push(TrackingFrame {
            task,
            reads: IndexMap::new(),
            fresh: Vec::new(),
        });
    }

    pub(crate) fn pop(&mut self, task: Option<TaskId>) -> Option<TrackingFrame> {
        let frame = self.frames.pop();

        // Verify we're popping the right context.
        if let Some(frame) = &frame {
            debug_assert_eq!(
                frame.task, task,
                "context mismatch: expected {:?}, got {:?}",
                task, frame.task
            );
        }

        frame
    }

    /// The innermost consumer, if the innermost frame is tracked.
    pub(crate) fn current(&self) -> Option<TaskId> {
        self.frames.last().and_then(|frame| frame.task)
    }

    /// The innermost consumer, looking through untracked scopes.
    pub(crate) fn executing(&self) -> Option<TaskId> {
        self.frames.iter().rev().find_map(|frame| frame.task)
    }

    pub(crate) fn current_frame_mut(&mut self) -> Option<&mut TrackingFrame> {
        self.frames.last_mut()
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Whether `task` is executing and has not yet read `source` in this run.
    ///
    /// A write to such a source does not need to re-run the task: it will see
    /// the new value when it gets to the read.
    pub(crate) fn will_observe(&self, task: TaskId, source: SourceId) -> bool {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.task == Some(task))
            .is_some_and(|frame| !frame.reads.contains_key(&source))
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard that pops the tracking frame when dropped.
pub(crate) struct TrackingGuard<'a> {
    runtime: &'a RuntimeInner,
    task: Option<TaskId>,
}

impl<'a> TrackingGuard<'a> {
    /// Enter a tracking frame for `task`, or an untracked scope for `None`.
    pub(crate) fn enter(runtime: &'a RuntimeInner, task: Option<TaskId>) -> Self {
        runtime.graph.lock().begin_tracking(task);
        Self { runtime, task }
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        let diff = self.runtime.graph.lock().end_tracking(self.task);
        if let Some(task) = self.task {
            if !diff.is_empty() {
                tracing::trace!(
                    %task,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "dependencies updated"
                );
            }
        }
    }
}
