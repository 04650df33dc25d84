//! Error Types
//!
//! Every fallible operation in the runtime returns [`ReactiveError`]. Task
//! bodies and component render functions return [`TaskError`], which the
//! scheduler converts into a reported [`ReactiveError::TaskExecution`].
//!
//! Errors raised while draining the scheduler never abort the drain. They are
//! handed to the runtime's [`ErrorBoundary`] and the rest of the tick proceeds.

use parking_lot::Mutex;
use thiserror::Error;

use crate::closure::SymbolId;
use crate::reactive::{Key, SourceId, TaskId};
use crate::render::NodeId;

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A tracked read happened with no consumer executing. The read still
    /// returns the current value; it is simply not recorded.
    #[error("read of {id} outside any tracking context")]
    TrackingViolation { id: SourceId },

    /// A task re-triggered itself within one tick, directly or through tasks
    /// its writes caused to run. The re-run was deferred to the next tick.
    #[error("task {task} re-triggered itself during tick {tick}; deferred to next tick")]
    CyclicDependency { task: TaskId, tick: u64 },

    /// The closure loader rejected a symbol, or a captured source is gone.
    #[error("failed to resolve closure `{symbol}`: {reason}")]
    ResolutionFailure { symbol: SymbolId, reason: String },

    /// A task body or render function failed.
    #[error("task {task} failed: {message}")]
    TaskExecution { task: TaskId, message: String },

    /// Sibling children carried duplicate keys.
    #[error("duplicate key `{key}` among children of {parent}; matching positionally")]
    ReconciliationInvariant { parent: NodeId, key: String },

    #[error("unknown source {0}")]
    UnknownSource(SourceId),

    #[error("source {id} does not hold a `{expected}`")]
    TypeMismatch { id: SourceId, expected: &'static str },

    /// Stores only wrap records and sequences.
    #[error("value is not a record or a sequence")]
    NotAnAggregate,

    #[error("key {key} is not valid for store {store}")]
    InvalidKey { store: SourceId, key: Key },

    #[error("closure captured {len} sources; index {index} is out of range")]
    CaptureOutOfRange { index: usize, len: usize },

    #[error("runtime has been dropped")]
    RuntimeDropped,

    #[error("no closure loader installed")]
    MissingLoader,

    /// An event handler or directly invoked closure failed.
    #[error("handler `{symbol}` failed: {message}")]
    HandlerFailed { symbol: SymbolId, message: String },

    #[error("no `{event}` handler on node {node}")]
    NoHandler { node: NodeId, event: String },

    /// A value written into a store could not be converted to plain data.
    #[error("cannot encode value: {0}")]
    Encode(String),

    #[error("invalid config: {0}")]
    Config(String),

    /// Encoding or decoding a snapshot failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ReactiveError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ReactiveError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

/// Error returned by a task body, event handler, or render function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Reactive(#[from] ReactiveError),
}

impl TaskError {
    /// Build a plain failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Receives every error the runtime reports.
///
/// There is one boundary per runtime. It decides what a failure means to the
/// host; the runtime only guarantees that the failed subtree keeps its last
/// committed output.
pub trait ErrorBoundary: Send + Sync {
    fn report(&self, error: &ReactiveError);
}

/// Default boundary: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBoundary;

impl ErrorBoundary for LogBoundary {
    fn report(&self, error: &ReactiveError) {
        match error {
            ReactiveError::TrackingViolation { .. } => tracing::debug!(%error, "untracked read"),
            ReactiveError::CyclicDependency { .. }
            | ReactiveError::ReconciliationInvariant { .. } => tracing::warn!(%error),
            _ => tracing::error!(%error),
        }
    }
}

/// Boundary that keeps every reported error for later inspection.
#[derive(Debug, Default)]
pub struct CollectingBoundary {
    errors: Mutex<Vec<ReactiveError>>,
}

impl CollectingBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the collected errors.
    pub fn take(&self) -> Vec<ReactiveError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

impl ErrorBoundary for CollectingBoundary {
    fn report(&self, error: &ReactiveError) {
        LogBoundary.report(error);
        self.errors.lock().push(error.clone());
    }
}
