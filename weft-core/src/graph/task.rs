//! Tasks
//!
//! Every consumer in the runtime is a task: component renders, computed
//! values, and effects. A task carries its kind, its eagerness tier, its
//! position in the component tree, and the cleanups registered during its
//! last run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::closure::{Captures, ClosureRef, ResolvedClosure};
use crate::error::TaskError;
use crate::reactive::{RegionId, Runtime, TaskId};

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Render,
    Computed,
    Effect,
}

impl TaskKind {
    /// Tie-break among tasks at the same tree position: derived values are
    /// refreshed before the render that reads them, effects run last.
    pub(crate) fn rank(self) -> u8 {
        match self {
            TaskKind::Computed => 0,
            TaskKind::Render => 1,
            TaskKind::Effect => 2,
        }
    }
}

/// When a queued task may run, in increasing deferral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Eagerness {
    /// Before the triggering write returns. Internal bookkeeping only.
    Immediate,
    /// As part of the current render-commit batch.
    Render,
    /// Once the task's region is visible.
    Visible,
    /// When no higher-priority work is pending.
    Idle,
}

impl Eagerness {
    pub(crate) const TIERS: [Eagerness; 4] = [
        Eagerness::Immediate,
        Eagerness::Render,
        Eagerness::Visible,
        Eagerness::Idle,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Idle,
    Queued,
    Running,
    /// Awaiting the closure loader or async work returned by the body.
    Suspended,
    Disposed,
}

/// Path from the root component to a task's owner. Lexicographic order puts
/// every parent before its children and siblings in document order.
pub type TreePosition = SmallVec<[u32; 8]>;

/// Cleanup registered during a run; invoked before the next run or on disposal.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Asynchronous remainder of a task run.
pub type Suspension = BoxFuture<'static, Result<(), TaskError>>;

/// Result of running a task body once.
pub type TaskResult = Result<TaskOutcome, TaskError>;

/// A task body, an event handler, or a loaded symbol.
pub type TaskFn = Arc<dyn Fn(&TaskContext) -> TaskResult + Send + Sync>;

/// How a run ended.
pub enum TaskOutcome {
    Complete,
    /// The run continues asynchronously. The task stays single-flight until
    /// the future resolves.
    Suspended(Suspension),
}

impl TaskOutcome {
    pub fn suspend<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        TaskOutcome::Suspended(future.boxed())
    }
}

impl From<()> for TaskOutcome {
    fn from(_: ()) -> Self {
        TaskOutcome::Complete
    }
}

impl fmt::Debug for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Complete => f.write_str("Complete"),
            TaskOutcome::Suspended(_) => f.write_str("Suspended(..)"),
        }
    }
}

/// The code a task runs.
#[derive(Clone)]
pub enum TaskBody {
    Ready(TaskFn),
    /// Resolved through the closure loader on first run.
    Lazy(ClosureRef),
    Resolved(ResolvedClosure),
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBody::Ready(_) => f.write_str("Ready(..)"),
            TaskBody::Lazy(closure) => write!(f, "Lazy({})", closure.symbol()),
            TaskBody::Resolved(resolved) => write!(f, "Resolved({})", resolved.symbol()),
        }
    }
}

/// Static description of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub eagerness: Eagerness,
    pub position: TreePosition,
    pub region: Option<RegionId>,
}

impl TaskSpec {
    pub fn new(kind: TaskKind, eagerness: Eagerness) -> Self {
        Self {
            kind,
            eagerness,
            position: TreePosition::new(),
            region: None,
        }
    }

    pub fn render() -> Self {
        Self::new(TaskKind::Render, Eagerness::Render)
    }

    pub fn computed() -> Self {
        Self::new(TaskKind::Computed, Eagerness::Render)
    }

    pub fn effect(eagerness: Eagerness) -> Self {
        Self::new(TaskKind::Effect, eagerness)
    }

    pub fn at(mut self, position: TreePosition) -> Self {
        self.position = position;
        self
    }

    pub fn in_region(mut self, region: RegionId) -> Self {
        self.region = Some(region);
        self
    }
}

/// Handed to every task body and event handler.
pub struct TaskContext {
    runtime: Runtime,
    task: Option<TaskId>,
    captures: Option<Captures>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl TaskContext {
    pub(crate) fn new(runtime: Runtime, task: Option<TaskId>, captures: Option<Captures>) -> Self {
        Self {
            runtime,
            task,
            captures,
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The running task; `None` for a detached handler invocation.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task
    }

    /// Captured sources, when the body came from a closure reference.
    pub fn captures(&self) -> Option<&Captures> {
        self.captures.as_ref()
    }

    /// Register a cleanup to run before the next run and on disposal.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.lock().push(Box::new(cleanup));
    }

    pub(crate) fn take_cleanups(&self) -> Vec<Cleanup> {
        std::mem::take(&mut *self.cleanups.lock())
    }
}

/// A task as the scheduler stores it.
pub(crate) struct Task {
    pub(crate) spec: TaskSpec,
    pub(crate) state: TaskState,
    pub(crate) body: Option<TaskBody>,
    pub(crate) cleanups: Vec<Cleanup>,
    /// Triggered while running or suspended; run again afterwards.
    pub(crate) requeue: bool,
    /// Creation order, the final tie-break.
    pub(crate) seq: u64,
    pub(crate) last_run_version: u64,
}

impl Task {
    pub(crate) fn new(spec: TaskSpec, body: Option<TaskBody>, seq: u64) -> Self {
        Self {
            spec,
            state: TaskState::Idle,
            body,
            cleanups: Vec::new(),
            requeue: false,
            seq,
            last_run_version: 0,
        }
    }

    /// Ordering key within a tier.
    pub(crate) fn order_key(&self) -> (&TreePosition, u8, u64) {
        (&self.spec.position, self.spec.kind.rank(), self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn tiers_are_ordered_by_deferral() {
        assert!(Eagerness::Immediate < Eagerness::Render);
        assert!(Eagerness::Render < Eagerness::Visible);
        assert!(Eagerness::Visible < Eagerness::Idle);
        assert_eq!(Eagerness::Idle.index(), 3);
    }

    #[test]
    fn parent_position_sorts_before_child() {
        let parent = Task::new(TaskSpec::render().at(smallvec![0]), None, 5);
        let child = Task::new(TaskSpec::render().at(smallvec![0, 2]), None, 1);
        let sibling = Task::new(TaskSpec::render().at(smallvec![1]), None, 0);

        assert!(parent.order_key() < child.order_key());
        assert!(child.order_key() < sibling.order_key());
    }

    #[test]
    fn computed_runs_before_render_at_same_position() {
        let render = Task::new(TaskSpec::render(), None, 0);
        let computed = Task::new(TaskSpec::computed(), None, 1);
        assert!(computed.order_key() < render.order_key());
    }
}
