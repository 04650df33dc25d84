//! Task Scheduler
//!
//! The scheduler owns every task and decides which one runs next. It never
//! runs task bodies itself: the runtime asks for the next runnable task,
//! releases the scheduler lock, executes the body, and reports back.
//!
//! # Algorithm
//!
//! 1. A write takes the subscribers of the written sources and enqueues each
//!    one into the queue for its eagerness tier. Enqueueing a queued task is a
//!    no-op (coalescing); enqueueing a running or suspended task flags it to
//!    run again once it finishes (single-flight).
//! 2. Tiers drain in priority order: `Immediate`, `Render`, `Visible` (only
//!    tasks whose region is visible), `Idle`. The choice is re-evaluated after
//!    every run, so work enqueued by an idle task pre-empts further idle work.
//! 3. Within a tier, tasks run in tree order: parents before children,
//!    siblings in document order.
//! 4. A task may run once per tick. A task triggered again within the same
//!    tick is deferred to the next one, which breaks dependency cycles.
//!    The deferral is a cycle only when the write came from the task itself
//!    or from work it queued earlier in the tick.

use std::collections::{HashMap, HashSet};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexSet;

use super::task::{Cleanup, Eagerness, Suspension, Task, TaskBody, TaskSpec, TaskState, TreePosition};
use crate::closure::ResolvedClosure;
use crate::error::{ReactiveError, TaskError};
use crate::reactive::{RegionId, TaskId};

/// What happened when a task was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Already queued; the triggers merged into one run.
    Coalesced,
    /// Running or suspended; it will run again afterwards.
    Requeued,
    /// Disposed or unknown.
    Ignored,
}

/// Summary of one or more scheduling ticks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Tasks that ran, in order.
    pub ran: Vec<TaskId>,
    /// Tasks triggered again after they ran, deferred to a later tick.
    pub deferred: Vec<TaskId>,
    /// Tasks whose run failed or whose closure failed to resolve.
    pub failed: Vec<TaskId>,
    /// Tasks left suspended.
    pub suspended: Vec<TaskId>,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.ran.extend(other.ran);
        self.deferred.extend(other.deferred);
        self.failed.extend(other.failed);
        self.suspended = other.suspended;
    }

    pub fn ran_count(&self) -> usize {
        self.ran.len()
    }
}

/// What the runtime needs to execute a task.
pub(crate) struct RunTicket {
    pub(crate) body: Option<TaskBody>,
    /// Cleanups from the previous run, to invoke before the body.
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) version: u64,
}

/// Asynchronous work a suspended task is waiting on.
pub(crate) enum PendingWork {
    Body(Suspension),
    Resolve(BoxFuture<'static, Result<ResolvedClosure, ReactiveError>>),
}

/// A finished piece of pending work.
pub(crate) enum Completion {
    Body(Result<(), TaskError>),
    Resolve(Result<ResolvedClosure, ReactiveError>),
}

impl PendingWork {
    pub(crate) fn into_future(self, task: TaskId) -> BoxFuture<'static, (TaskId, Completion)> {
        match self {
            PendingWork::Body(fut) => fut.map(move |r| (task, Completion::Body(r))).boxed(),
            PendingWork::Resolve(fut) => fut.map(move |r| (task, Completion::Resolve(r))).boxed(),
        }
    }
}

/// Who ran and who queued whom during the current tick.
#[derive(Debug, Default)]
struct TickLog {
    ran: HashSet<TaskId>,
    /// The task whose write first queued a task this tick.
    causes: HashMap<TaskId, TaskId>,
    /// Tasks re-triggered by their own run or by work it queued.
    cycles: HashSet<TaskId>,
}

/// Tiered task queues plus task storage.
pub struct TaskScheduler {
    tasks: HashMap<TaskId, Task>,
    queues: [IndexSet<TaskId>; 4],
    visibility: HashMap<RegionId, bool>,
    pending: Vec<(TaskId, PendingWork)>,
    log: TickLog,
    /// Executions in progress (nested pulls count too).
    running: usize,
    version: u64,
    tick: u64,
    seq: u64,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            queues: Default::default(),
            visibility: HashMap::new(),
            pending: Vec::new(),
            log: TickLog::default(),
            running: 0,
            version: 0,
            tick: 0,
            seq: 0,
        }
    }

    /// Add an idle task.
    pub(crate) fn insert(&mut self, spec: TaskSpec, body: Option<TaskBody>) -> TaskId {
        let id = TaskId::new();
        self.seq += 1;
        self.tasks.insert(id, Task::new(spec, body, self.seq));
        id
    }

    pub(crate) fn set_body(&mut self, id: TaskId, body: TaskBody) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.body = Some(body);
        }
    }

    /// Move a task in tree order. Queued tasks are ordered by their current
    /// position whenever the next one is picked.
    pub(crate) fn set_position(&mut self, id: TaskId, position: TreePosition) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.spec.position = position;
        }
    }

    /// Unknown ids report `Disposed`: disposed tasks are dropped from storage.
    pub fn state(&self, id: TaskId) -> TaskState {
        self.tasks.get(&id).map_or(TaskState::Disposed, |t| t.state)
    }

    pub fn spec(&self, id: TaskId) -> Option<&TaskSpec> {
        self.tasks.get(&id).map(|t| &t.spec)
    }

    pub fn last_run_version(&self, id: TaskId) -> Option<u64> {
        self.tasks.get(&id).map(|t| t.last_run_version)
    }

    pub fn enqueue(&mut self, id: TaskId) -> Enqueued {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Enqueued::Ignored;
        };

        let outcome = match task.state {
            TaskState::Idle => {
                task.state = TaskState::Queued;
                self.queues[task.spec.eagerness.index()].insert(id);
                Enqueued::Queued
            }
            TaskState::Queued => Enqueued::Coalesced,
            TaskState::Running | TaskState::Suspended => {
                task.requeue = true;
                Enqueued::Requeued
            }
            TaskState::Disposed => Enqueued::Ignored,
        };

        tracing::trace!(task = %id, ?outcome, "enqueue");
        outcome
    }

    /// Record that `writer`'s run triggered `task`.
    ///
    /// Called before `enqueue`. A task that already ran this tick and is
    /// triggered by itself, or by a task it caused to run, is a cycle.
    pub(crate) fn note_trigger(&mut self, task: TaskId, writer: Option<TaskId>) {
        let Some(writer) = writer else {
            return;
        };
        if self.log.ran.contains(&task) {
            if self.caused_by(writer, task) {
                self.log.cycles.insert(task);
            }
        } else {
            self.log.causes.entry(task).or_insert(writer);
        }
    }

    /// Whether `task` is `ancestor` or was queued, directly or not, by it.
    fn caused_by(&self, mut task: TaskId, ancestor: TaskId) -> bool {
        for _ in 0..=self.log.causes.len() {
            if task == ancestor {
                return true;
            }
            match self.log.causes.get(&task) {
                Some(cause) => task = *cause,
                None => return false,
            }
        }
        false
    }

    pub(crate) fn mark_ran(&mut self, id: TaskId) {
        self.log.ran.insert(id);
    }

    /// Pick the next task to run this tick.
    ///
    /// Tasks already run this tick are skipped and appended to `deferred`
    /// once.
    pub(crate) fn next_runnable(&self, deferred: &mut Vec<TaskId>) -> Option<TaskId> {
        self.next_in_tiers(&Eagerness::TIERS, deferred)
    }

    pub(crate) fn next_immediate(&self, deferred: &mut Vec<TaskId>) -> Option<TaskId> {
        self.next_in_tiers(&[Eagerness::Immediate], deferred)
    }

    fn next_in_tiers(&self, tiers: &[Eagerness], deferred: &mut Vec<TaskId>) -> Option<TaskId> {
        let visited = &self.log.ran;
        for tier in tiers {
            let mut best: Option<(&Task, TaskId)> = None;

            for id in &self.queues[tier.index()] {
                let Some(task) = self.tasks.get(id) else {
                    continue;
                };
                if *tier == Eagerness::Visible && !self.region_visible(task.spec.region) {
                    continue;
                }
                if visited.contains(id) {
                    if !deferred.contains(id) {
                        deferred.push(*id);
                    }
                    continue;
                }
                if best.map_or(true, |(b, _)| task.order_key() < b.order_key()) {
                    best = Some((task, *id));
                }
            }

            if let Some((_, id)) = best {
                return Some(id);
            }
        }
        None
    }

    /// Whether any queued task could run now.
    pub fn has_runnable(&self) -> bool {
        Eagerness::TIERS.iter().any(|tier| {
            self.queues[tier.index()].iter().any(|id| {
                *tier != Eagerness::Visible
                    || self
                        .tasks
                        .get(id)
                        .is_some_and(|t| self.region_visible(t.spec.region))
            })
        })
    }

    pub(crate) fn has_immediate(&self) -> bool {
        !self.queues[Eagerness::Immediate.index()].is_empty()
    }

    /// Move a queued task to `Running`.
    pub(crate) fn begin_run(&mut self, id: TaskId) -> Option<RunTicket> {
        let task = self.tasks.get_mut(&id)?;
        if task.state != TaskState::Queued {
            return None;
        }

        self.queues[task.spec.eagerness.index()].shift_remove(&id);
        self.version += 1;
        self.running += 1;
        task.state = TaskState::Running;
        task.last_run_version = self.version;

        Some(RunTicket {
            body: task.body.clone(),
            cleanups: std::mem::take(&mut task.cleanups),
            version: self.version,
        })
    }

    /// Record the end of a synchronous run.
    ///
    /// Returns cleanups that must run now because the task was disposed while
    /// it was running.
    pub(crate) fn finish_run(&mut self, id: TaskId, cleanups: Vec<Cleanup>) -> Vec<Cleanup> {
        self.running = self.running.saturating_sub(1);

        let Some(task) = self.tasks.get_mut(&id) else {
            return cleanups;
        };

        if task.state == TaskState::Disposed {
            self.tasks.remove(&id);
            return cleanups;
        }

        task.cleanups = cleanups;
        self.settle_state(id);
        Vec::new()
    }

    /// Record that a run is continuing asynchronously.
    pub(crate) fn suspend(
        &mut self,
        id: TaskId,
        cleanups: Vec<Cleanup>,
        work: PendingWork,
    ) -> Vec<Cleanup> {
        self.running = self.running.saturating_sub(1);

        let Some(task) = self.tasks.get_mut(&id) else {
            return cleanups;
        };

        if task.state == TaskState::Disposed {
            self.tasks.remove(&id);
            return cleanups;
        }

        task.state = TaskState::Suspended;
        task.cleanups = cleanups;
        self.pending.push((id, work));
        tracing::debug!(task = %id, "suspended");
        Vec::new()
    }

    /// Record that a suspended run finished.
    pub(crate) fn resume_finished(&mut self, id: TaskId) {
        match self.tasks.get(&id).map(|t| t.state) {
            Some(TaskState::Disposed) => {
                self.tasks.remove(&id);
            }
            Some(TaskState::Suspended) => self.settle_state(id),
            _ => {}
        }
    }

    /// A lazy body resolved: store it and queue the task to run.
    pub(crate) fn resolved(&mut self, id: TaskId, resolved: ResolvedClosure) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if task.state == TaskState::Disposed {
            self.tasks.remove(&id);
            return;
        }
        task.body = Some(TaskBody::Resolved(resolved));
        task.requeue = false;
        task.state = TaskState::Queued;
        self.queues[task.spec.eagerness.index()].insert(id);
    }

    /// A lazy body failed to resolve: the run is treated as failed, not run.
    pub(crate) fn resolution_failed(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if task.state == TaskState::Disposed {
            self.tasks.remove(&id);
            return;
        }
        task.requeue = false;
        task.state = TaskState::Idle;
    }

    fn settle_state(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if std::mem::take(&mut task.requeue) {
            task.state = TaskState::Queued;
            self.queues[task.spec.eagerness.index()].insert(id);
        } else {
            task.state = TaskState::Idle;
        }
    }

    /// Dispose a task. Returns the cleanups to run now; a running task hands
    /// its cleanups back when its run finishes instead.
    pub(crate) fn dispose(&mut self, id: TaskId) -> Vec<Cleanup> {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Vec::new();
        };

        self.queues[task.spec.eagerness.index()].shift_remove(&id);

        match task.state {
            TaskState::Disposed => Vec::new(),
            TaskState::Running => {
                task.state = TaskState::Disposed;
                Vec::new()
            }
            TaskState::Suspended => {
                task.state = TaskState::Disposed;
                std::mem::take(&mut task.cleanups)
            }
            TaskState::Idle | TaskState::Queued => self
                .tasks
                .remove(&id)
                .map(|t| t.cleanups)
                .unwrap_or_default(),
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<(TaskId, PendingWork)> {
        std::mem::take(&mut self.pending)
    }

    pub fn set_visible(&mut self, region: RegionId, visible: bool) {
        self.visibility.insert(region, visible);
    }

    /// Tasks without a region count as visible.
    pub fn region_visible(&self, region: Option<RegionId>) -> bool {
        region.map_or(true, |r| self.visibility.get(&r).copied().unwrap_or(false))
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub(crate) fn enter_external(&mut self) {
        self.running += 1;
    }

    pub(crate) fn exit_external(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    pub(crate) fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.log = TickLog::default();
        self.tick
    }

    /// Close the tick. Returns the deferred tasks that form a cycle.
    pub(crate) fn end_tick(&mut self) -> HashSet<TaskId> {
        std::mem::take(&mut self.log).cycles
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn queued_len(&self) -> usize {
        self.queues.iter().map(IndexSet::len).sum()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn suspended(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.state == TaskState::Suspended)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::task::TaskKind;
    use smallvec::smallvec;

    fn drain(scheduler: &mut TaskScheduler) -> Vec<TaskId> {
        let mut deferred = Vec::new();
        let mut order = Vec::new();
        while let Some(id) = scheduler.next_runnable(&mut deferred) {
            let ticket = scheduler.begin_run(id).unwrap();
            scheduler.finish_run(id, ticket.cleanups);
            order.push(id);
        }
        order
    }

    #[test]
    fn enqueue_coalesces() {
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.insert(TaskSpec::render(), None);

        assert_eq!(scheduler.enqueue(id), Enqueued::Queued);
        assert_eq!(scheduler.enqueue(id), Enqueued::Coalesced);
        assert_eq!(scheduler.queued_len(), 1);
        assert_eq!(drain(&mut scheduler), vec![id]);
        assert_eq!(scheduler.state(id), TaskState::Idle);
    }

    #[test]
    fn tiers_drain_in_priority_order() {
        let mut scheduler = TaskScheduler::new();
        let idle = scheduler.insert(TaskSpec::effect(Eagerness::Idle), None);
        let render = scheduler.insert(TaskSpec::render(), None);
        let immediate = scheduler.insert(TaskSpec::effect(Eagerness::Immediate), None);

        scheduler.enqueue(idle);
        scheduler.enqueue(render);
        scheduler.enqueue(immediate);

        assert_eq!(drain(&mut scheduler), vec![immediate, render, idle]);
    }

    #[test]
    fn parents_run_before_children() {
        let mut scheduler = TaskScheduler::new();
        let child = scheduler.insert(TaskSpec::render().at(smallvec![0, 1]), None);
        let sibling = scheduler.insert(TaskSpec::render().at(smallvec![1]), None);
        let parent = scheduler.insert(TaskSpec::render().at(smallvec![0]), None);

        scheduler.enqueue(child);
        scheduler.enqueue(sibling);
        scheduler.enqueue(parent);

        assert_eq!(drain(&mut scheduler), vec![parent, child, sibling]);
    }

    #[test]
    fn repositioned_task_runs_at_its_new_place() {
        let mut scheduler = TaskScheduler::new();
        let first = scheduler.insert(TaskSpec::render().at(smallvec![1]), None);
        let inserted = scheduler.insert(TaskSpec::render().at(smallvec![3]), None);
        scheduler.set_position(first, smallvec![2]);
        scheduler.set_position(inserted, smallvec![1]);

        scheduler.enqueue(first);
        scheduler.enqueue(inserted);

        assert_eq!(drain(&mut scheduler), vec![inserted, first]);
    }

    #[test]
    fn visible_tasks_wait_for_their_region() {
        let mut scheduler = TaskScheduler::new();
        let region = RegionId::new();
        let id = scheduler.insert(TaskSpec::effect(Eagerness::Visible).in_region(region), None);

        scheduler.enqueue(id);
        assert!(!scheduler.has_runnable());
        assert!(drain(&mut scheduler).is_empty());

        scheduler.set_visible(region, true);
        assert!(scheduler.has_runnable());
        assert_eq!(drain(&mut scheduler), vec![id]);
    }

    #[test]
    fn trigger_while_running_requeues_once() {
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.insert(TaskSpec::new(TaskKind::Effect, Eagerness::Render), None);

        scheduler.enqueue(id);
        let ticket = scheduler.begin_run(id).unwrap();
        assert_eq!(scheduler.state(id), TaskState::Running);
        assert_eq!(scheduler.enqueue(id), Enqueued::Requeued);
        assert_eq!(scheduler.enqueue(id), Enqueued::Requeued);

        scheduler.finish_run(id, ticket.cleanups);
        assert_eq!(scheduler.state(id), TaskState::Queued);
        assert_eq!(scheduler.queued_len(), 1);
    }

    #[test]
    fn tasks_run_this_tick_are_deferred() {
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.insert(TaskSpec::render(), None);
        scheduler.next_tick();
        scheduler.mark_ran(id);
        scheduler.enqueue(id);

        let mut deferred = Vec::new();
        assert_eq!(scheduler.next_runnable(&mut deferred), None);
        assert_eq!(deferred, vec![id]);

        scheduler.end_tick();
        assert_eq!(scheduler.next_runnable(&mut deferred), Some(id));
    }

    #[test]
    fn only_self_caused_retriggers_are_cycles() {
        let mut scheduler = TaskScheduler::new();
        let a = scheduler.insert(TaskSpec::render(), None);
        let b = scheduler.insert(TaskSpec::effect(Eagerness::Idle), None);
        let c = scheduler.insert(TaskSpec::effect(Eagerness::Idle), None);
        let outsider = scheduler.insert(TaskSpec::effect(Eagerness::Idle), None);
        scheduler.next_tick();

        // a runs and queues b; b runs and writes back into a.
        scheduler.mark_ran(a);
        scheduler.note_trigger(b, Some(a));
        scheduler.mark_ran(b);
        scheduler.note_trigger(a, Some(b));

        // c was queued before the tick and re-triggers b.
        scheduler.mark_ran(c);
        scheduler.note_trigger(b, Some(c));

        // outsider writes into a source c read.
        scheduler.mark_ran(outsider);
        scheduler.note_trigger(c, Some(outsider));

        let cycles = scheduler.end_tick();
        assert_eq!(cycles, [a].into_iter().collect());
    }

    #[test]
    fn dispose_returns_cleanups_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut scheduler = TaskScheduler::new();
        let id = scheduler.insert(TaskSpec::render(), None);
        let calls = Arc::new(AtomicUsize::new(0));

        scheduler.enqueue(id);
        scheduler.begin_run(id).unwrap();
        let calls_clone = calls.clone();
        scheduler.finish_run(
            id,
            vec![Box::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })],
        );

        for cleanup in scheduler.dispose(id) {
            cleanup();
        }
        assert!(scheduler.dispose(id).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(id), TaskState::Disposed);
        assert_eq!(scheduler.enqueue(id), Enqueued::Ignored);
    }

    #[test]
    fn dispose_while_running_defers_cleanups_to_finish() {
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.insert(TaskSpec::render(), None);

        scheduler.enqueue(id);
        scheduler.begin_run(id).unwrap();
        assert!(scheduler.dispose(id).is_empty());

        let leftover = scheduler.finish_run(id, vec![Box::new(|| {})]);
        assert_eq!(leftover.len(), 1);
        assert_eq!(scheduler.task_count(), 0);
    }
}
