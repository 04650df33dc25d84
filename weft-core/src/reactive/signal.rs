//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and is
//! tracked as a source in the runtime's subscription graph.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a consumer is executing, the runtime records
//!    an edge from the signal to that consumer.
//!
//! 2. When a write changes the value, every subscriber is queued exactly once
//!    and its edge is cleared. Subscribers re-subscribe when they run again.
//!
//! 3. A write that leaves the value unchanged does nothing.
//!
//! # Memory Layout
//!
//! Each signal handle consists of:
//! - A source id (8 bytes), stable across snapshot and resume
//! - A shared cell holding the value behind a lock
//! - A weak reference to the runtime

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ids::SourceId;
use super::runtime::{SourceCell, WeakRuntime};
use crate::error::ReactiveError;
use crate::graph::EdgeKind;

/// Values a signal can hold.
///
/// Equality decides whether a write notifies. Serde support is what lets a
/// snapshot carry the value across a resumption boundary.
pub trait SignalValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SignalValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

pub(crate) struct SignalCell<T> {
    value: RwLock<T>,
}

impl<T: SignalValue> SignalCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }
}

impl<T: SignalValue> SourceCell for SignalCell<T> {
    fn snapshot(&self) -> Result<serde_json::Value, ReactiveError> {
        Ok(serde_json::to_value(&*self.value.read())?)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use weft_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// assert_eq!(count.read(), 0);
/// assert!(count.write(5));
/// assert!(!count.write(5));
/// ```
pub struct Signal<T: SignalValue> {
    id: SourceId,
    cell: Arc<SignalCell<T>>,
    runtime: WeakRuntime,
}

impl<T: SignalValue> Signal<T> {
    pub(crate) fn from_parts(id: SourceId, cell: Arc<SignalCell<T>>, runtime: WeakRuntime) -> Self {
        Self { id, cell, runtime }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Get the current value, subscribing the executing consumer.
    pub fn read(&self) -> T {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.id, EdgeKind::Value);
        }
        self.cell.value.read().clone()
    }

    /// Get the current value without subscribing.
    pub fn read_untracked(&self) -> T {
        self.cell.value.read().clone()
    }

    /// Borrow the current value, subscribing the executing consumer.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.id, EdgeKind::Value);
        }
        f(&self.cell.value.read())
    }

    /// Store a new value. Returns `false` (and notifies no one) when the value
    /// is unchanged.
    pub fn write(&self, value: T) -> bool {
        {
            let mut guard = self.cell.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }

        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger(&[self.id]);
        }
        true
    }

    /// Modify the value in place. Subscribers are notified only if the result
    /// differs from the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.read_untracked();
        f(&mut next);
        self.write(next)
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.id))
    }
}

impl<T: SignalValue> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: Arc::clone(&self.cell),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: SignalValue + fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.cell.value.read())
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Eagerness, TaskState};
    use crate::reactive::Runtime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn signal_basic() {
        let rt = Runtime::new();
        let signal = rt.signal(42);
        assert_eq!(signal.read(), 42);

        signal.write(100);
        assert_eq!(signal.read(), 100);
    }

    #[test]
    fn signal_update() {
        let rt = Runtime::new();
        let signal = rt.signal(vec![1, 2]);
        assert!(signal.update(|v| v.push(3)));
        assert_eq!(signal.read_untracked(), vec![1, 2, 3]);
        assert!(!signal.update(|_| {}));
    }

    #[test]
    fn signal_clone_shares_state() {
        let rt = Runtime::new();
        let signal1 = rt.signal(10);
        let signal2 = signal1.clone();

        signal1.write(20);
        assert_eq!(signal2.read(), 20);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn equal_write_does_not_notify() {
        let rt = Runtime::new();
        let signal = rt.signal(String::from("a"));
        let runs = Arc::new(AtomicUsize::new(0));

        let (s, r) = (signal.clone(), runs.clone());
        let task = rt.effect(Eagerness::Render, move |_| {
            s.with(|v| v.len());
            r.fetch_add(1, Ordering::SeqCst);
        });
        rt.flush();
        assert_eq!(signal.subscriber_count(), 1);

        assert!(!signal.write("a".into()));
        assert_eq!(rt.task_state(task), TaskState::Idle);
        rt.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_coalescing_only_final_value_matters() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (s, log) = (signal.clone(), seen.clone());
        rt.effect(Eagerness::Render, move |_| log.lock().push(s.read()));
        rt.flush();

        signal.write(1);
        signal.write(2);
        signal.write(3);
        rt.flush();

        // Back to the original value: the task is still queued from the
        // first write but observes the final value.
        signal.write(4);
        signal.write(3);
        rt.flush();

        assert_eq!(*seen.lock(), vec![0, 3, 3]);
    }

    #[test]
    fn read_after_runtime_dropped_still_returns_value() {
        let signal = {
            let rt = Runtime::new();
            rt.signal(7)
        };
        assert_eq!(signal.read(), 7);
        assert!(signal.write(8));
        assert_eq!(signal.subscriber_count(), 0);
    }
}
