//! Computed Values
//!
//! A computed value is a derived signal kept up to date by a task.
//!
//! # How Computed Values Work
//!
//! 1. On creation, the computation runs once, tracked against its own task,
//!    and the result is stored in an output signal.
//!
//! 2. When a dependency changes, the task is queued like any other consumer.
//!    When it runs, it writes the new result to the output signal. Because
//!    signal writes compare values, downstream consumers re-run only when the
//!    derived value actually changed.
//!
//! 3. Reading a computed whose task is queued recomputes it first, so a
//!    consumer never sees a stale derived value within a tick.

use std::fmt;
use std::sync::Arc;

use super::ids::TaskId;
use super::runtime::{Runtime, WeakRuntime};
use super::signal::{Signal, SignalValue};
use crate::graph::{TaskBody, TaskContext, TaskFn, TaskOutcome, TaskResult, TaskSpec, TaskState};

/// A cached derived value.
pub struct Computed<T: SignalValue> {
    output: Signal<T>,
    task: TaskId,
    runtime: WeakRuntime,
}

impl<T: SignalValue> Computed<T> {
    pub(crate) fn create<F>(runtime: &Runtime, spec: TaskSpec, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let task = runtime.reserve_task(spec);
        let initial = runtime.run_tracked(Some(task), &f);
        let output = runtime.signal(initial);

        let out = output.clone();
        let body: TaskFn = Arc::new(move |_: &TaskContext| -> TaskResult {
            out.write(f());
            Ok(TaskOutcome::Complete)
        });
        runtime.set_task_body(task, TaskBody::Ready(body));

        tracing::trace!(%task, output = %output.id(), "computed created");
        Self {
            output,
            task,
            runtime: runtime.downgrade(),
        }
    }

    /// Get the current value, subscribing the executing consumer.
    pub fn get(&self) -> T {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.refresh(self.task);
        }
        self.output.read()
    }

    pub fn get_untracked(&self) -> T {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.refresh(self.task);
        }
        self.output.read_untracked()
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// The signal holding the result.
    pub fn signal(&self) -> &Signal<T> {
        &self.output
    }

    pub fn is_stale(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.task_state(self.task) == TaskState::Queued)
    }

    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_task(self.task);
        }
    }
}

impl<T: SignalValue> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
            task: self.task,
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: SignalValue + fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("task", &self.task)
            .field("output", &self.output)
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Eagerness;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn computed_basic() {
        let rt = Runtime::new();
        let count = rt.signal(2);

        let c = count.clone();
        let doubled = rt.computed(move || c.read() * 2);
        assert_eq!(doubled.get(), 4);

        count.write(5);
        assert!(doubled.is_stale());
        assert_eq!(doubled.get(), 10, "read pulls a queued computed");
        assert!(!doubled.is_stale());
    }

    #[test]
    fn computed_caches_between_reads() {
        let rt = Runtime::new();
        let count = rt.signal(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let (c, k) = (count.clone(), calls.clone());
        let derived = rt.computed(move || {
            k.fetch_add(1, Ordering::SeqCst);
            c.read() + 1
        });

        derived.get();
        derived.get();
        rt.flush();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unchanged_result_does_not_rerun_readers() {
        let rt = Runtime::new();
        let count = rt.signal(1);

        let c = count.clone();
        let parity = rt.computed(move || c.read() % 2);

        let runs = Arc::new(AtomicUsize::new(0));
        let (p, r) = (parity.clone(), runs.clone());
        rt.effect(Eagerness::Render, move |_| {
            p.get();
            r.fetch_add(1, Ordering::SeqCst);
        });
        rt.flush();

        count.write(3);
        rt.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.write(4);
        rt.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_computed_keeps_last_value() {
        let rt = Runtime::new();
        let count = rt.signal(1);
        let c = count.clone();
        let derived = rt.computed(move || c.read() * 10);

        derived.dispose();
        count.write(2);
        rt.flush();
        assert_eq!(derived.get(), 10);
    }
}
