//! Weft Core
//!
//! This crate provides the core runtime for the Weft resumable reactive UI
//! framework. It implements:
//!
//! - Reactive primitives (signals, stores, computed values)
//! - A subscription graph and a tiered task scheduler
//! - A virtual tree, a keyed differ, and a component container with hydration
//! - Serializable closure references and snapshot/resume of reactive state
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the runtime and the state it owns
//! - `graph`: subscription edges, tasks, and scheduling
//! - `render`: virtual nodes, diffing, and mounting into a concrete tree
//! - `closure`: closure references and the loader that resolves them
//! - `resume`: snapshots of reactive state and resuming from them
//! - `driver`: an optional tokio task that settles the runtime in the
//!   background
//!
//! # Example
//!
//! ```rust
//! use weft_core::{Container, ComponentDef, MemoryTree, Runtime, VNode};
//!
//! let rt = Runtime::new();
//! let count = rt.signal(1);
//!
//! let tree = MemoryTree::new("body");
//! let container = Container::new(&rt, tree.clone());
//!
//! let c = count.clone();
//! let counter = ComponentDef::new("Counter", move |_| {
//!     Ok(VNode::element("p").child(c.read().to_string().into()))
//! });
//! container.render(&VNode::component(&counter));
//! assert_eq!(tree.to_html(), "<p>1</p>");
//!
//! count.write(2);
//! rt.flush();
//! assert_eq!(tree.to_html(), "<p>2</p>");
//! ```

pub mod closure;
pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;
pub mod resume;

pub use closure::{Captures, ClosureLoader, ClosureRef, ResolvedClosure, StaticLoader, SymbolId};
pub use config::RuntimeConfig;
pub use driver::spawn_driver;
pub use error::{CollectingBoundary, ErrorBoundary, LogBoundary, ReactiveError, TaskError};
pub use graph::{Eagerness, FlushReport, TaskContext, TaskOutcome, TaskResult, TaskSpec, TaskState};
pub use reactive::{Computed, Key, RegionId, Runtime, Signal, SourceId, Store, StoreValue, TaskId};
pub use render::{
    AttrValue, ComponentDef, Container, ExternalNode, MemoryTree, Mutation, NodeId, RenderScope,
    TreeAdapter, VNode,
};
pub use resume::{Snapshot, SnapshotEntry};
