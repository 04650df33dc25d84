//! Reactive Primitives
//!
//! This module implements the reactive state layer: signals, stores, and
//! computed values, plus the runtime that owns them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a consumer is executing, the runtime records that consumer as a
//! subscriber. When the value changes, every subscriber is queued.
//!
//! ## Stores
//!
//! A Store wraps a record or a sequence. Each field is an independent source,
//! and the store's shape (its set of keys) is one more. Reading one field
//! never subscribes to another.
//!
//! ## Computed Values
//!
//! A Computed is a derived value kept current by a task. Readers re-run only
//! when the derived value actually changes.
//!
//! # Implementation Notes
//!
//! There is no global state. Every source belongs to one [`Runtime`], which
//! owns the subscription graph, the scheduler, and the explicit stack of
//! executing consumers used for dependency tracking.

mod computed;
pub(crate) mod context;
mod ids;
mod runtime;
mod signal;
mod store;

pub use computed::Computed;
pub use ids::{RegionId, SourceId, TaskId};
pub use runtime::{Runtime, SourceKind, WeakRuntime};
pub use signal::{Signal, SignalValue};
pub use store::{AggregateKind, Key, Store, StoreRecord, StoreValue, StoredSlot};

pub(crate) use ids::IdAllocator;
pub(crate) use runtime::run_cleanups;
