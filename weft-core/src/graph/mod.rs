//! Dependency Graph and Scheduling
//!
//! This module implements the two structures that connect state to work:
//!
//! - The subscription graph, a bipartite map between sources (signals, store
//!   fields, store shapes) and the consumers that read them.
//! - The task scheduler, which owns every consumer as a task and decides when
//!   each one runs.
//!
//! # Overview
//!
//! When a source changes, the runtime takes its subscribers out of the graph
//! and hands them to the scheduler. The scheduler queues each task in its
//! eagerness tier and drains the tiers in priority order, parents before
//! children. Running a task rebuilds its edges in the graph.
//!
//! # Design Decisions
//!
//! 1. Edges are cleared when a source notifies. The consumer re-subscribes when
//!    it runs again, so an edge always reflects the latest execution.
//!
//! 2. The graph and scheduler are plain data. The runtime owns them behind
//!    locks and never holds a lock while user code runs.

mod scheduler;
mod subscriptions;
mod task;

pub use scheduler::{Enqueued, FlushReport, TaskScheduler};
pub use subscriptions::{DependencyDiff, EdgeKind, SubscriptionGraph};
pub use task::{
    Cleanup, Eagerness, Suspension, TaskBody, TaskContext, TaskFn, TaskKind, TaskOutcome,
    TaskResult, TaskSpec, TaskState, TreePosition,
};

pub(crate) use scheduler::{Completion, PendingWork};
