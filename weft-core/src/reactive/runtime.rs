//! Reactive Runtime
//!
//! The runtime is the single owner of everything reactive: the subscription
//! graph, the task scheduler, the store arena, the registry of signals and
//! closure references, the error boundary, and the closure loader.
//!
//! # How It Works
//!
//! 1. A tracked read records an edge from the source to the innermost
//!    executing consumer.
//!
//! 2. A write takes the subscribers of every changed source out of the graph
//!    and enqueues them. Writes never execute consumers, with one exception:
//!    `Immediate` tasks run before the write returns when nothing else is
//!    executing.
//!
//! 3. [`Runtime::flush`] runs one scheduling tick: queued tasks in tier and
//!    tree order, each at most once. [`Runtime::settle`] keeps ticking and
//!    awaits suspended work until nothing is left to do.
//!
//! # Locking
//!
//! Handles (signals, stores) hold a weak reference to the runtime. The
//! runtime's locks are never held while user code runs, and the graph lock is
//! never taken while the store or scheduler lock is held.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::computed::Computed;
use super::context::TrackingGuard;
use super::ids::{IdAllocator, RegionId, SourceId, TaskId};
use super::signal::{Signal, SignalCell, SignalValue};
use super::store::{Change, Store, StoreArena};
use crate::closure::{ClosureLoader, ClosureRef, ResolvedClosure};
use crate::config::RuntimeConfig;
use crate::error::{ErrorBoundary, LogBoundary, ReactiveError, TaskError};
use crate::graph::{
    Cleanup, Completion, EdgeKind, Eagerness, Enqueued, FlushReport, PendingWork,
    SubscriptionGraph, TaskBody, TaskContext, TaskFn, TaskOutcome, TaskResult, TaskScheduler,
    TaskSpec, TaskState, TreePosition,
};

/// Type-erased storage behind a signal.
pub(crate) trait SourceCell: Send + Sync {
    fn snapshot(&self) -> Result<serde_json::Value, ReactiveError>;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// What kind of source an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Signal,
    Store,
    Closure,
    /// Restored from a snapshot, not yet claimed by a typed handle.
    Restored,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) ids: IdAllocator,
    pub(crate) graph: Mutex<SubscriptionGraph>,
    pub(crate) scheduler: Mutex<TaskScheduler>,
    pub(crate) stores: Mutex<StoreArena>,
    pub(crate) cells: DashMap<SourceId, Arc<dyn SourceCell>>,
    /// Signal values from a snapshot, typed on first lookup.
    pub(crate) pending_restore: DashMap<SourceId, serde_json::Value>,
    pub(crate) closures: Mutex<IndexMap<SourceId, ClosureRef>>,
    pub(crate) roots: Mutex<IndexMap<String, SourceId>>,
    boundary: RwLock<Arc<dyn ErrorBoundary>>,
    loader: RwLock<Option<Arc<dyn ClosureLoader>>>,
    pub(crate) wake: Arc<Notify>,
    flushing: AtomicBool,
}

/// Handle to a reactive runtime. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

/// Non-owning handle held by signals, stores, and captures.
#[derive(Clone, Default)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }

    pub(crate) fn require(&self) -> Result<Runtime, ReactiveError> {
        self.upgrade().ok_or(ReactiveError::RuntimeDropped)
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

struct FlushingReset<'a>(&'a AtomicBool);

impl Drop for FlushingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::build(config, IdAllocator::starting_at(1))
    }

    pub(crate) fn build(config: RuntimeConfig, ids: IdAllocator) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                ids,
                graph: Mutex::new(SubscriptionGraph::new()),
                scheduler: Mutex::new(TaskScheduler::new()),
                stores: Mutex::new(StoreArena::new()),
                cells: DashMap::new(),
                pending_restore: DashMap::new(),
                closures: Mutex::new(IndexMap::new()),
                roots: Mutex::new(IndexMap::new()),
                boundary: RwLock::new(Arc::new(LogBoundary)),
                loader: RwLock::new(None),
                wake: Arc::new(Notify::new()),
                flushing: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- Sources ----

    /// Create a signal.
    pub fn signal<T: SignalValue>(&self, value: T) -> Signal<T> {
        let id = self.inner.ids.next_source();
        self.install_signal(id, value)
    }

    fn install_signal<T: SignalValue>(&self, id: SourceId, value: T) -> Signal<T> {
        let cell = Arc::new(SignalCell::new(value));
        self.inner.cells.insert(id, cell.clone());
        Signal::from_parts(id, cell, self.downgrade())
    }

    /// Look up a live signal by id.
    ///
    /// A signal restored from a snapshot is typed here on first lookup.
    pub fn signal_by_id<T: SignalValue>(&self, id: SourceId) -> Result<Signal<T>, ReactiveError> {
        let existing = self.inner.cells.get(&id).map(|cell| cell.value().clone());
        if let Some(cell) = existing {
            let cell = cell
                .as_any()
                .downcast::<SignalCell<T>>()
                .map_err(|_| ReactiveError::TypeMismatch {
                    id,
                    expected: std::any::type_name::<T>(),
                })?;
            return Ok(Signal::from_parts(id, cell, self.downgrade()));
        }

        let Some((_, raw)) = self.inner.pending_restore.remove(&id) else {
            return Err(ReactiveError::UnknownSource(id));
        };
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(value) => Ok(self.install_signal(id, value)),
            Err(_) => {
                self.inner.pending_restore.insert(id, raw);
                Err(ReactiveError::TypeMismatch {
                    id,
                    expected: std::any::type_name::<T>(),
                })
            }
        }
    }

    /// Wrap a record or sequence in a store.
    pub fn store(&self, value: serde_json::Value) -> Result<Store, ReactiveError> {
        let id = self.inner.stores.lock().wrap(value, &self.inner.ids)?;
        Ok(Store::from_parts(id, self.downgrade()))
    }

    pub fn store_by_id(&self, id: SourceId) -> Result<Store, ReactiveError> {
        if self.inner.stores.lock().contains(id) {
            Ok(Store::from_parts(id, self.downgrade()))
        } else {
            Err(ReactiveError::UnknownSource(id))
        }
    }

    /// Create a computed value.
    pub fn computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: SignalValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::create(self, TaskSpec::computed(), f)
    }

    /// Register a closure reference so it is included in snapshots.
    pub fn register_closure(&self, closure: ClosureRef) -> SourceId {
        let id = self.inner.ids.next_source();
        self.inner.closures.lock().insert(id, closure);
        id
    }

    pub fn closure_by_id(&self, id: SourceId) -> Result<ClosureRef, ReactiveError> {
        self.inner
            .closures
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ReactiveError::UnknownSource(id))
    }

    /// Name a source as an entry point of root state.
    pub fn set_root(&self, name: impl Into<String>, id: SourceId) {
        self.inner.roots.lock().insert(name.into(), id);
    }

    pub fn root(&self, name: &str) -> Option<SourceId> {
        self.inner.roots.lock().get(name).copied()
    }

    pub fn source_kind(&self, id: SourceId) -> Option<SourceKind> {
        if self.inner.cells.contains_key(&id) {
            Some(SourceKind::Signal)
        } else if self.inner.pending_restore.contains_key(&id) {
            Some(SourceKind::Restored)
        } else if self.inner.stores.lock().contains(id) {
            Some(SourceKind::Store)
        } else if self.inner.closures.lock().contains_key(&id) {
            Some(SourceKind::Closure)
        } else {
            None
        }
    }

    pub fn contains_source(&self, id: SourceId) -> bool {
        self.source_kind(id).is_some()
    }

    /// Forget a source and its edges. Store nodes nested under a released
    /// store are released with it.
    pub fn release(&self, id: SourceId) {
        let mut removed = vec![id];
        self.inner.cells.remove(&id);
        self.inner.pending_restore.remove(&id);
        self.inner.closures.lock().shift_remove(&id);
        removed.extend(self.inner.stores.lock().release(id));
        self.forget_sources(&removed);
    }

    fn forget_sources(&self, sources: &[SourceId]) {
        let mut graph = self.inner.graph.lock();
        for source in sources {
            graph.remove_source(*source);
        }
    }

    /// Fire the sources of a store write. Consumers of a dropped nested node
    /// re-run once, then its edges are gone.
    pub(crate) fn apply_change(&self, change: Change) {
        let mut sources = change.fired;
        sources.extend_from_slice(&change.released);
        self.trigger(&sources);
        self.forget_sources(&change.released);
    }

    /// Number of consumers subscribed to `id`.
    pub fn subscriber_count(&self, id: SourceId) -> usize {
        self.inner.graph.lock().subscriber_count(id)
    }

    /// Sources `task` read during its last run.
    pub fn dependencies_of(&self, task: TaskId) -> Vec<(SourceId, EdgeKind)> {
        self.inner.graph.lock().dependencies_of(task)
    }

    // ---- Tasks ----

    /// Add a task without queueing it.
    pub fn create_task(&self, spec: TaskSpec, body: TaskFn) -> TaskId {
        self.inner
            .scheduler
            .lock()
            .insert(spec, Some(TaskBody::Ready(body)))
    }

    pub(crate) fn reserve_task(&self, spec: TaskSpec) -> TaskId {
        self.inner.scheduler.lock().insert(spec, None)
    }

    pub(crate) fn set_task_body(&self, task: TaskId, body: TaskBody) {
        self.inner.scheduler.lock().set_body(task, body);
    }

    pub(crate) fn reposition_task(&self, task: TaskId, position: TreePosition) {
        self.inner.scheduler.lock().set_position(task, position);
    }

    /// Add a task and queue its first run.
    pub fn spawn_task(&self, spec: TaskSpec, body: TaskFn) -> TaskId {
        let id = self.create_task(spec, body);
        self.schedule(id);
        id
    }

    /// Declare an effect. It first runs on the next tick of its tier.
    pub fn effect<F>(&self, eagerness: Eagerness, f: F) -> TaskId
    where
        F: Fn(&TaskContext) + Send + Sync + 'static,
    {
        let body: TaskFn = Arc::new(move |ctx: &TaskContext| -> TaskResult {
            f(ctx);
            Ok(TaskOutcome::Complete)
        });
        self.spawn_task(TaskSpec::effect(eagerness), body)
    }

    /// Add a task whose body is loaded through the closure loader on first run.
    pub fn spawn_lazy(&self, spec: TaskSpec, closure: ClosureRef) -> TaskId {
        let id = self
            .inner
            .scheduler
            .lock()
            .insert(spec, Some(TaskBody::Lazy(closure)));
        self.schedule(id);
        id
    }

    /// Queue a task as if one of its sources changed.
    pub fn schedule(&self, task: TaskId) {
        let (outcome, run_immediate) = {
            let mut scheduler = self.inner.scheduler.lock();
            let outcome = scheduler.enqueue(task);
            (outcome, scheduler.has_immediate() && !scheduler.is_running())
        };
        if outcome == Enqueued::Queued {
            self.inner.wake.notify_one();
        }
        if run_immediate {
            self.drain_immediate();
        }
    }

    /// Dispose a task. A queued run is dropped and its cleanups run once;
    /// a running task's cleanups run when its current run ends.
    pub fn dispose_task(&self, task: TaskId) {
        let cleanups = self.inner.scheduler.lock().dispose(task);
        self.inner.graph.lock().remove_consumer(task);
        run_cleanups(cleanups);
        tracing::debug!(%task, "disposed");
    }

    pub fn task_state(&self, task: TaskId) -> TaskState {
        self.inner.scheduler.lock().state(task)
    }

    /// Mark a region visible or hidden. Visible-tier tasks in the region run
    /// once it is visible.
    pub fn set_region_visible(&self, region: RegionId, visible: bool) {
        self.inner.scheduler.lock().set_visible(region, visible);
        if visible {
            self.inner.wake.notify_one();
        }
    }

    /// Drive a region's visibility from a boolean signal.
    pub fn bind_visibility(&self, region: RegionId, visible: &Signal<bool>) -> TaskId {
        let visible = visible.clone();
        self.effect(Eagerness::Immediate, move |ctx| {
            ctx.runtime().set_region_visible(region, visible.read());
        })
    }

    pub fn has_pending_work(&self) -> bool {
        let scheduler = self.inner.scheduler.lock();
        scheduler.has_runnable() || !scheduler.suspended().is_empty()
    }

    // ---- Execution ----

    /// Run one scheduling tick.
    ///
    /// Every runnable task runs at most once. A task triggered again after it
    /// ran is deferred to the next tick. When the trigger came from the task's
    /// own run, or from work that run queued, it is also reported as a cyclic
    /// dependency. Calling `flush` from inside a task is a no-op.
    pub fn flush(&self) -> FlushReport {
        self.run_tick(false)
    }

    fn drain_immediate(&self) {
        self.run_tick(true);
    }

    fn run_tick(&self, immediate_only: bool) -> FlushReport {
        if self.inner.scheduler.lock().is_running() {
            return FlushReport::default();
        }
        if self.inner.flushing.swap(true, Ordering::AcqRel) {
            return FlushReport::default();
        }
        let _reset = FlushingReset(&self.inner.flushing);

        let tick = self.inner.scheduler.lock().next_tick();
        let span = tracing::debug_span!("flush", tick, immediate_only);
        let _enter = span.enter();

        let mut report = FlushReport::default();

        loop {
            let next = {
                let mut scheduler = self.inner.scheduler.lock();
                let next = if immediate_only {
                    scheduler.next_immediate(&mut report.deferred)
                } else {
                    scheduler.next_runnable(&mut report.deferred)
                };
                if let Some(task) = next {
                    scheduler.mark_ran(task);
                }
                next
            };
            let Some(task) = next else {
                break;
            };
            self.execute(task, &mut report);
        }

        let cycles = self.inner.scheduler.lock().end_tick();
        for task in &report.deferred {
            if cycles.contains(task) {
                self.report(ReactiveError::CyclicDependency { task: *task, tick });
            } else {
                tracing::debug!(%task, tick, "re-triggered after running; deferred");
            }
        }
        report.suspended = self.inner.scheduler.lock().suspended();

        if !report.ran.is_empty() {
            tracing::debug!(ran = report.ran.len(), deferred = report.deferred.len(), "tick done");
        }
        report
    }

    /// Run ticks and await suspended work until nothing is left to do.
    ///
    /// Ticks that only re-run deferred tasks are bounded by
    /// [`RuntimeConfig::max_ticks`].
    pub async fn settle(&self) -> FlushReport {
        let mut report = self.flush();
        let mut inflight = FuturesUnordered::new();
        let mut ticks = 1;

        loop {
            for (task, work) in self.inner.scheduler.lock().take_pending() {
                inflight.push(work.into_future(task));
            }

            if !inflight.is_empty() {
                if let Some((task, completion)) = inflight.next().await {
                    self.complete(task, completion, &mut report);
                }
                report.merge(self.flush());
                continue;
            }

            if !self.inner.scheduler.lock().has_runnable() || ticks >= self.inner.config.max_ticks {
                break;
            }
            ticks += 1;
            report.merge(self.flush());
        }

        report
    }

    fn complete(&self, task: TaskId, completion: Completion, report: &mut FlushReport) {
        match completion {
            Completion::Body(Ok(())) => {
                self.inner.scheduler.lock().resume_finished(task);
                tracing::debug!(%task, "resumed");
            }
            Completion::Body(Err(err)) => {
                self.inner.scheduler.lock().resume_finished(task);
                report.failed.push(task);
                self.report(ReactiveError::TaskExecution {
                    task,
                    message: err.to_string(),
                });
            }
            Completion::Resolve(Ok(resolved)) => {
                self.inner.scheduler.lock().resolved(task, resolved);
            }
            Completion::Resolve(Err(err)) => {
                self.inner.scheduler.lock().resolution_failed(task);
                report.failed.push(task);
                self.report(err);
            }
        }
    }

    fn execute(&self, task: TaskId, report: &mut FlushReport) {
        let ticket = self.inner.scheduler.lock().begin_run(task);
        let Some(ticket) = ticket else {
            return;
        };
        tracing::trace!(%task, version = ticket.version, "run");
        run_cleanups(ticket.cleanups);

        match ticket.body {
            Some(TaskBody::Ready(func)) => self.invoke_body(task, func, None, report),
            Some(TaskBody::Resolved(resolved)) => {
                self.invoke_body(task, resolved.func, Some(resolved.captures), report)
            }
            Some(TaskBody::Lazy(closure)) => self.resolve_lazy(task, closure, report),
            None => {
                let leftover = self.inner.scheduler.lock().finish_run(task, Vec::new());
                run_cleanups(leftover);
            }
        }
    }

    fn invoke_body(
        &self,
        task: TaskId,
        func: TaskFn,
        captures: Option<crate::closure::Captures>,
        report: &mut FlushReport,
    ) {
        let ctx = TaskContext::new(self.clone(), Some(task), captures);
        let result = {
            let _guard = TrackingGuard::enter(&self.inner, Some(task));
            self.call_guarded(|| func(&ctx))
        };
        let cleanups = ctx.take_cleanups();

        let leftover = match result {
            Ok(TaskOutcome::Complete) => {
                report.ran.push(task);
                self.inner.scheduler.lock().finish_run(task, cleanups)
            }
            Ok(TaskOutcome::Suspended(future)) => {
                report.ran.push(task);
                self.inner
                    .scheduler
                    .lock()
                    .suspend(task, cleanups, PendingWork::Body(future))
            }
            Err(err) => {
                report.failed.push(task);
                let leftover = self.inner.scheduler.lock().finish_run(task, cleanups);
                self.report(ReactiveError::TaskExecution {
                    task,
                    message: err.to_string(),
                });
                leftover
            }
        };
        run_cleanups(leftover);
    }

    fn resolve_lazy(&self, task: TaskId, closure: ClosureRef, report: &mut FlushReport) {
        let mut future = closure.resolve(self);

        match (&mut future).now_or_never() {
            Some(Ok(resolved)) => {
                self.set_task_body(task, TaskBody::Resolved(resolved.clone()));
                self.invoke_body(task, resolved.func, Some(resolved.captures), report);
            }
            Some(Err(err)) => {
                report.failed.push(task);
                let leftover = {
                    let mut scheduler = self.inner.scheduler.lock();
                    let leftover = scheduler.finish_run(task, Vec::new());
                    scheduler.resolution_failed(task);
                    leftover
                };
                run_cleanups(leftover);
                self.report(err);
            }
            None => {
                tracing::debug!(%task, symbol = %closure.symbol(), "awaiting loader");
                let leftover = self.inner.scheduler.lock().suspend(
                    task,
                    Vec::new(),
                    PendingWork::Resolve(future),
                );
                run_cleanups(leftover);
            }
        }
    }

    /// Bring a queued task up to date before its output is read.
    pub(crate) fn refresh(&self, task: TaskId) {
        if self.inner.scheduler.lock().state(task) == TaskState::Queued {
            let mut report = FlushReport::default();
            self.execute(task, &mut report);
        }
    }

    /// Run `f` tracked against `task` outside the scheduler.
    ///
    /// Writes made by `f` queue work but never execute it inline.
    pub(crate) fn run_tracked<R>(&self, task: Option<TaskId>, f: impl FnOnce() -> R) -> R {
        self.inner.scheduler.lock().enter_external();
        let result = {
            let _guard = TrackingGuard::enter(&self.inner, task);
            f()
        };
        let run_immediate = {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.exit_external();
            scheduler.has_immediate() && !scheduler.is_running()
        };
        if run_immediate {
            self.drain_immediate();
        }
        result
    }

    /// Run `f` without recording any reads.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = TrackingGuard::enter(&self.inner, None);
        f()
    }

    /// Run a user callback, converting a panic into [`TaskError::Panicked`]
    /// when panics are caught.
    pub(crate) fn call_guarded<R>(
        &self,
        f: impl FnOnce() -> Result<R, TaskError>,
    ) -> Result<R, TaskError> {
        if !self.inner.config.catch_panics {
            return f();
        }
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    // ---- Tracking ----

    pub(crate) fn track(&self, source: SourceId, kind: EdgeKind) {
        let active = {
            let mut graph = self.inner.graph.lock();
            graph.record_read(source, kind);
            graph.is_tracking()
        };
        if !active && self.inner.config.strict_tracking {
            self.report(ReactiveError::TrackingViolation { id: source });
        }
    }

    /// Queue every consumer of `sources`.
    pub(crate) fn trigger(&self, sources: &[SourceId]) {
        if sources.is_empty() {
            return;
        }
        let (consumers, writer) = {
            let mut graph = self.inner.graph.lock();
            (graph.take_subscribers(sources), graph.executing())
        };
        if consumers.is_empty() {
            return;
        }

        let (queued, run_immediate) = {
            let mut scheduler = self.inner.scheduler.lock();
            let mut queued = false;
            for task in consumers {
                scheduler.note_trigger(task, writer);
                queued |= scheduler.enqueue(task) == Enqueued::Queued;
            }
            (queued, scheduler.has_immediate() && !scheduler.is_running())
        };

        if queued {
            self.inner.wake.notify_one();
        }
        if run_immediate {
            self.drain_immediate();
        }
    }

    // ---- Collaborators ----

    pub fn set_error_boundary(&self, boundary: Arc<dyn ErrorBoundary>) {
        *self.inner.boundary.write() = boundary;
    }

    /// Hand an error to the error boundary.
    pub fn report(&self, error: ReactiveError) {
        let boundary = self.inner.boundary.read().clone();
        boundary.report(&error);
    }

    pub fn set_loader(&self, loader: Arc<dyn ClosureLoader>) {
        *self.inner.loader.write() = Some(loader);
    }

    pub(crate) fn loader(&self) -> Option<Arc<dyn ClosureLoader>> {
        self.inner.loader.read().clone()
    }

    /// Resolve a closure reference and invoke it once, outside any task.
    pub async fn invoke(&self, closure: &ClosureRef) -> Result<(), ReactiveError> {
        let resolved: ResolvedClosure = closure.resolve(self).await?;
        resolved
            .invoke(self)
            .await
            .map_err(|err| match err {
                TaskError::Reactive(err) => err,
                other => ReactiveError::HandlerFailed {
                    symbol: closure.symbol().clone(),
                    message: other.to_string(),
                },
            })
    }

    /// Notified whenever a task is queued.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.inner.wake.clone()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("signals", &self.inner.cells.len())
            .field("next_id", &self.inner.ids.peek())
            .finish()
    }
}

pub(crate) fn run_cleanups(cleanups: Vec<Cleanup>) {
    for cleanup in cleanups {
        cleanup();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---- Tests ----
