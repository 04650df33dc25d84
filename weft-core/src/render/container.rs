//! Component Container
//!
//! A [`Container`] mounts a virtual tree into a [`TreeAdapter`] and keeps it
//! up to date.
//!
//! # Components
//!
//! Every mounted component is an instance with:
//!
//! - a props store, one field per prop, so a component re-renders only when a
//!   prop it read changes;
//! - a render task, positioned in the tree so that a parent always renders
//!   before its children within a tick;
//! - hook slots for the signals, stores, computed values and tasks it
//!   declares, matched by call order across renders;
//! - a region for its visible-tier tasks.
//!
//! A re-render runs as the instance's render task and patches only that
//! instance's output. A failing render keeps the previous output.
//!
//! # Bound Slots
//!
//! A [`VNode::bound`] slot has a render task of its own, positioned under the
//! component that produced it. When a source its binding read changes, only
//! the slot is evaluated and patched.
//!
//! # Positions
//!
//! Task positions follow document order. After every pass, the components and
//! slots below the patched scope are renumbered by a walk of the live tree, so
//! a sibling inserted before others also runs before them.
//!
//! # Locking
//!
//! The container state is locked while rendering and patching. Render
//! functions and cleanups must not call back into the same container.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::diff::{Components, InstanceId, LiveKind, LiveTree, Reconciler};
use super::mutation::{ExternalNode, Mutation, NodeId, TreeAdapter};
use super::vnode::{Binding, ComponentDef, Props, VNode};
use crate::error::{ReactiveError, TaskError};
use crate::graph::{
    Cleanup, Eagerness, FlushReport, TaskBody, TaskContext, TaskFn, TaskOutcome, TaskResult,
    TaskSpec, TreePosition,
};
use crate::reactive::{
    run_cleanups, Computed, Key, RegionId, Runtime, Signal, SignalValue, SourceId, Store, TaskId,
};

type SharedState = Arc<Mutex<ContainerState>>;

/// State a component keeps across renders.
#[derive(Default)]
struct Hooks {
    slots: Vec<Box<dyn Any + Send + Sync>>,
    cursor: usize,
    owned_tasks: Vec<TaskId>,
    owned_sources: Vec<SourceId>,
    cleanups: Vec<Cleanup>,
}

struct Instance {
    def: ComponentDef,
    node: NodeId,
    props: Store,
    render_task: TaskId,
    region: RegionId,
    position: TreePosition,
    child_seq: u32,
    hooks: Hooks,
}

/// A mounted bound slot.
struct Slot {
    binding: Binding,
    task: TaskId,
    position: TreePosition,
}

/// Everything mounted that owns tasks.
struct Table {
    instances: BTreeMap<InstanceId, Instance>,
    slots: HashMap<NodeId, Slot>,
    next_instance: u64,
    root_seq: u32,
}

struct ContainerState {
    tree: LiveTree,
    table: Table,
    adapter: Box<dyn TreeAdapter>,
}

impl ContainerState {
    /// Run one reconciliation pass, renumber positions below `scope` and
    /// apply the batch.
    fn reconcile(
        &mut self,
        weak: &Weak<Mutex<ContainerState>>,
        runtime: &Runtime,
        scope: NodeId,
        f: impl FnOnce(&mut Reconciler<'_>),
    ) -> Vec<Mutation> {
        let ContainerState { tree, table, adapter } = self;
        let mutations = {
            let mut components = Instances {
                table: &mut *table,
                runtime,
                state: weak,
            };
            let mut reconciler = Reconciler::new(&mut *tree, &mut components, runtime);
            f(&mut reconciler);
            std::mem::take(&mut reconciler.out)
        };
        table.renumber(tree, runtime, scope);

        if !mutations.is_empty() {
            adapter.apply(&mutations);
        }
        mutations
    }
}

/// Mounts a virtual tree into a target tree.
pub struct Container {
    state: SharedState,
    runtime: Runtime,
}

impl Container {
    pub fn new(runtime: &Runtime, adapter: impl TreeAdapter + 'static) -> Self {
        let root = adapter.root();
        Self {
            state: Arc::new(Mutex::new(ContainerState {
                tree: LiveTree::new(root),
                table: Table {
                    instances: BTreeMap::new(),
                    slots: HashMap::new(),
                    next_instance: 1,
                    root_seq: 0,
                },
                adapter: Box::new(adapter),
            })),
            runtime: runtime.clone(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The mount point in the target tree.
    pub fn root(&self) -> NodeId {
        self.state.lock().tree.root()
    }

    /// Render `vnode` as the container's content, patching whatever is
    /// mounted. Returns the batch that was applied.
    pub fn render(&self, vnode: &VNode) -> Vec<Mutation> {
        self.commit(|reconciler| {
            let root = reconciler.tree.root();
            reconciler.reconcile_children(root, std::slice::from_ref(vnode));
        })
    }

    /// Adopt an existing tree instead of creating one.
    ///
    /// Existing nodes that match the render are claimed as they are. Nodes
    /// that differ are patched, missing ones created, and leftovers removed.
    /// A container that already has content is patched as by
    /// [`Container::render`].
    pub fn hydrate(&self, vnode: &VNode, existing: &ExternalNode) -> Vec<Mutation> {
        let mounted = {
            let state = self.state.lock();
            !state.tree.children(state.tree.root()).is_empty()
        };
        if mounted {
            return self.render(vnode);
        }

        self.commit(|reconciler| {
            let root = reconciler.tree.root();
            if existing.id != root {
                tracing::warn!(expected = %root, found = %existing.id, "hydrating a different root");
            }
            let mut cursor = 0;
            let id = reconciler.hydrate(vnode, root, &existing.children, &mut cursor);
            reconciler.tree.push_child(root, id);
            reconciler.remove_unclaimed(root, &existing.children[cursor..]);
        })
    }

    /// Remove all content, disposing every component.
    pub fn unmount(&self) -> Vec<Mutation> {
        self.commit(|reconciler| {
            let root = reconciler.tree.root();
            reconciler.reconcile_children(root, &[]);
        })
    }

    fn commit(&self, f: impl FnOnce(&mut Reconciler<'_>)) -> Vec<Mutation> {
        let weak = Arc::downgrade(&self.state);
        let runtime = &self.runtime;

        runtime.run_tracked(None, || {
            let mut guard = self.state.lock();
            let root = guard.tree.root();
            let mutations = guard.reconcile(&weak, runtime, root, f);
            tracing::debug!(mutations = mutations.len(), "committed");
            mutations
        })
    }

    /// Deliver an event to `node`.
    ///
    /// The handler is the nearest `on:<event>` attribute at or above the
    /// node. It is resolved through the loader, invoked, and the runtime is
    /// settled.
    pub async fn dispatch(&self, node: NodeId, event: &str) -> Result<FlushReport, ReactiveError> {
        let handler = {
            let state = self.state.lock();
            state.tree.handler(node, event)
        };
        let handler = handler.ok_or_else(|| ReactiveError::NoHandler {
            node,
            event: event.to_string(),
        })?;

        tracing::debug!(%node, event, symbol = %handler.symbol(), "dispatch");
        self.runtime.invoke(&handler).await?;
        Ok(self.runtime.settle().await)
    }

    /// Number of mounted component instances.
    pub fn instance_count(&self) -> usize {
        self.state.lock().table.instances.len()
    }

    /// Number of mounted bound slots.
    pub fn slot_count(&self) -> usize {
        self.state.lock().table.slots.len()
    }

    /// The render task of every mounted instance of `component`.
    pub fn render_tasks(&self, component: &str) -> Vec<TaskId> {
        self.state
            .lock()
            .table
            .instances
            .values()
            .filter(|instance| instance.def.name() == component)
            .map(|instance| instance.render_task)
            .collect()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Container")
            .field("root", &state.tree.root())
            .field("live_nodes", &state.tree.len())
            .field("instances", &state.table.instances.len())
            .field("slots", &state.table.slots.len())
            .finish()
    }
}

impl Table {
    /// Re-derive the positions of the components and slots below `scope`
    /// from document order. `scope` is the root or a component node.
    fn renumber(&mut self, tree: &LiveTree, runtime: &Runtime, scope: NodeId) {
        let owner = match tree.get(scope).map(|node| &node.kind) {
            Some(LiveKind::Component { instance, .. }) => Some(*instance),
            _ => None,
        };
        let (scope, base) = match owner.and_then(|owner| self.instances.get(&owner)) {
            Some(instance) => (scope, instance.position.clone()),
            None => (tree.root(), TreePosition::new()),
        };

        let mut seq = 0;
        self.place_children(tree, runtime, scope, &base, &mut seq);
        match owner.and_then(|owner| self.instances.get_mut(&owner)) {
            Some(instance) => instance.child_seq = seq,
            None => self.root_seq = seq,
        }
    }

    fn place_children(
        &mut self,
        tree: &LiveTree,
        runtime: &Runtime,
        node: NodeId,
        base: &TreePosition,
        seq: &mut u32,
    ) {
        for &child in tree.children(node) {
            match tree.get(child).map(|live| &live.kind) {
                Some(LiveKind::Component { instance, .. }) => {
                    let instance = *instance;
                    let position = child_position(base, seq);
                    self.place_instance(runtime, instance, &position);
                    let mut child_seq = 0;
                    self.place_children(tree, runtime, child, &position, &mut child_seq);
                    if let Some(entry) = self.instances.get_mut(&instance) {
                        entry.child_seq = child_seq;
                    }
                }
                Some(LiveKind::Bound) => {
                    let position = child_position(base, seq);
                    self.place_slot(runtime, child, position);
                    // The slot's output still belongs to the enclosing component.
                    self.place_children(tree, runtime, child, base, seq);
                }
                _ => self.place_children(tree, runtime, child, base, seq),
            }
        }
    }

    fn place_instance(&mut self, runtime: &Runtime, id: InstanceId, position: &TreePosition) {
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        if instance.position == *position {
            return;
        }
        instance.position = position.clone();
        runtime.reposition_task(instance.render_task, position.clone());
        for task in &instance.hooks.owned_tasks {
            runtime.reposition_task(*task, position.clone());
        }
    }

    fn place_slot(&mut self, runtime: &Runtime, node: NodeId, position: TreePosition) {
        let Some(slot) = self.slots.get_mut(&node) else {
            return;
        };
        if slot.position != position {
            runtime.reposition_task(slot.task, position.clone());
            slot.position = position;
        }
    }
}

fn child_position(base: &TreePosition, seq: &mut u32) -> TreePosition {
    *seq += 1;
    let mut position = base.clone();
    position.push(*seq);
    position
}

/// Component and slot lifecycle over the container's table.
struct Instances<'a> {
    table: &'a mut Table,
    runtime: &'a Runtime,
    state: &'a Weak<Mutex<ContainerState>>,
}

impl Instances<'_> {
    /// Position for a new component or slot, after its already mounted
    /// siblings. Renumbering fixes it up once the pass is done.
    fn next_position(&mut self, owner: Option<InstanceId>) -> TreePosition {
        match owner.and_then(|owner| self.table.instances.get_mut(&owner)) {
            Some(parent) => child_position(&parent.position, &mut parent.child_seq),
            None => child_position(&TreePosition::new(), &mut self.table.root_seq),
        }
    }

    /// Evaluate a binding as its slot's task.
    fn evaluate(&self, task: TaskId, binding: &Binding) -> Option<VNode> {
        let output = self
            .runtime
            .run_tracked(Some(task), || self.runtime.call_guarded(|| binding.evaluate()));
        match output {
            Ok(vnode) => Some(vnode),
            Err(err) => {
                self.runtime.report(ReactiveError::TaskExecution {
                    task,
                    message: err.to_string(),
                });
                None
            }
        }
    }
}

impl Components for Instances<'_> {
    fn create(
        &mut self,
        node: NodeId,
        def: &ComponentDef,
        props: &Props,
        owner: Option<InstanceId>,
    ) -> Result<(InstanceId, VNode), ReactiveError> {
        let id = InstanceId(self.table.next_instance);
        self.table.next_instance += 1;
        let position = self.next_position(owner);

        let props = self.runtime.store(Value::Object(
            props.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))?;
        let render_task = self.runtime.reserve_task(TaskSpec::render().at(position.clone()));

        let state = self.state.clone();
        let body: TaskFn = Arc::new(move |ctx: &TaskContext| -> TaskResult {
            rerender(&state, ctx.runtime(), id)?;
            Ok(TaskOutcome::Complete)
        });
        self.runtime.set_task_body(render_task, TaskBody::Ready(body));

        self.table.instances.insert(
            id,
            Instance {
                def: def.clone(),
                node,
                props,
                render_task,
                region: RegionId::new(),
                position,
                child_seq: 0,
                hooks: Hooks::default(),
            },
        );
        tracing::debug!(component = def.name(), %render_task, "component created");

        let output = self
            .runtime
            .run_tracked(Some(render_task), || {
                render_instance(&mut self.table.instances, self.runtime, id, true)
            });
        match output {
            Ok(vnode) => Ok((id, vnode)),
            Err(err) => {
                self.runtime.report(ReactiveError::TaskExecution {
                    task: render_task,
                    message: err.to_string(),
                });
                Ok((id, VNode::fragment(Vec::new())))
            }
        }
    }

    fn update_props(&mut self, instance: InstanceId, props: &Props) {
        let Some(store) = self.table.instances.get(&instance).map(|i| i.props.clone()) else {
            return;
        };

        let result = self.runtime.untrack(|| -> Result<(), ReactiveError> {
            for (name, value) in props {
                store.set(name.as_str(), value)?;
            }
            for key in store.keys()? {
                if let Key::Field(name) = &key {
                    if !props.contains_key(name) {
                        store.remove(key.clone())?;
                    }
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            self.runtime.report(err);
        }
    }

    fn destroy(&mut self, instance: InstanceId) {
        let Some(instance) = self.table.instances.remove(&instance) else {
            return;
        };
        tracing::debug!(component = instance.def.name(), "component destroyed");

        self.runtime.dispose_task(instance.render_task);
        for task in instance.hooks.owned_tasks {
            self.runtime.dispose_task(task);
        }
        run_cleanups(instance.hooks.cleanups);

        self.runtime.release(instance.props.id());
        for source in instance.hooks.owned_sources {
            self.runtime.release(source);
        }
    }

    fn bind(&mut self, node: NodeId, binding: &Binding, owner: Option<InstanceId>) -> VNode {
        let position = self.next_position(owner);
        let task = self.runtime.reserve_task(TaskSpec::render().at(position.clone()));

        let state = self.state.clone();
        let body: TaskFn = Arc::new(move |ctx: &TaskContext| -> TaskResult {
            refresh_slot(&state, ctx.runtime(), node)?;
            Ok(TaskOutcome::Complete)
        });
        self.runtime.set_task_body(task, TaskBody::Ready(body));
        self.table.slots.insert(
            node,
            Slot {
                binding: binding.clone(),
                task,
                position,
            },
        );
        tracing::trace!(%node, %task, "slot bound");

        self.evaluate(task, binding)
            .unwrap_or_else(|| VNode::fragment(Vec::new()))
    }

    fn rebind(&mut self, node: NodeId, binding: &Binding) -> Option<VNode> {
        let slot = self.table.slots.get_mut(&node)?;
        if slot.binding == *binding {
            return None;
        }
        slot.binding = binding.clone();
        let task = slot.task;
        self.evaluate(task, binding)
    }

    fn unbind(&mut self, node: NodeId) {
        if let Some(slot) = self.table.slots.remove(&node) {
            self.runtime.dispose_task(slot.task);
        }
    }
}

/// Call an instance's render function with its hooks.
fn render_instance(
    map: &mut BTreeMap<InstanceId, Instance>,
    runtime: &Runtime,
    id: InstanceId,
    first_render: bool,
) -> Result<VNode, TaskError> {
    let instance = map
        .get_mut(&id)
        .ok_or_else(|| TaskError::Failed(format!("component instance {} is gone", id.0)))?;

    let render = instance.def.render_fn();
    let props = instance.props.clone();
    let position = instance.position.clone();
    let region = instance.region;
    let task = instance.render_task;
    let mut hooks = std::mem::take(&mut instance.hooks);
    hooks.cursor = 0;

    let result = {
        let mut scope = RenderScope {
            runtime,
            hooks: &mut hooks,
            props: &props,
            position: &position,
            region,
            task,
            first_render,
        };
        runtime.call_guarded(|| render(&mut scope))
    };

    if let Some(instance) = map.get_mut(&id) {
        instance.hooks = hooks;
    }
    result
}

/// Body of a render task: render the instance again and patch its output.
fn rerender(state: &Weak<Mutex<ContainerState>>, runtime: &Runtime, id: InstanceId) -> Result<(), TaskError> {
    let Some(shared) = state.upgrade() else {
        return Ok(());
    };
    let mut guard = shared.lock();

    let Some(node) = guard.table.instances.get(&id).map(|instance| instance.node) else {
        return Ok(());
    };
    let output = render_instance(&mut guard.table.instances, runtime, id, false)?;
    let Some(&current) = guard.tree.children(node).first() else {
        return Ok(());
    };

    let mutations = runtime.untrack(|| {
        guard.reconcile(state, runtime, node, |reconciler| {
            reconciler.patch(current, &output);
        })
    });
    tracing::trace!(instance = id.0, mutations = mutations.len(), "re-rendered");
    Ok(())
}

/// Body of a slot task: evaluate the binding again and patch the slot's
/// output. The owning component does not render.
fn refresh_slot(state: &Weak<Mutex<ContainerState>>, runtime: &Runtime, node: NodeId) -> Result<(), TaskError> {
    let Some(shared) = state.upgrade() else {
        return Ok(());
    };
    let mut guard = shared.lock();

    let Some(binding) = guard.table.slots.get(&node).map(|slot| slot.binding.clone()) else {
        return Ok(());
    };
    let output = runtime.call_guarded(|| binding.evaluate())?;
    let Some(&current) = guard.tree.children(node).first() else {
        return Ok(());
    };
    let scope = guard
        .tree
        .owner(node)
        .and_then(|owner| guard.table.instances.get(&owner))
        .map_or_else(|| guard.tree.root(), |owner| owner.node);

    let mutations = runtime.untrack(|| {
        guard.reconcile(state, runtime, scope, |reconciler| {
            reconciler.patch(current, &output);
        })
    });
    tracing::trace!(%node, mutations = mutations.len(), "slot refreshed");
    Ok(())
}

/// What a render function sees of its component.
pub struct RenderScope<'a> {
    runtime: &'a Runtime,
    hooks: &'a mut Hooks,
    props: &'a Store,
    position: &'a TreePosition,
    region: RegionId,
    task: TaskId,
    first_render: bool,
}

impl RenderScope<'_> {
    /// The props store. Reading a field subscribes the render to it.
    pub fn props(&self) -> &Store {
        self.props
    }

    /// Read one prop.
    pub fn prop<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ReactiveError> {
        self.props.get_as(name)
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// The component's render task.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// The component's visibility region.
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn is_first_render(&self) -> bool {
        self.first_render
    }

    fn hook<T, F>(&mut self, create: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Runtime, &mut Hooks) -> T,
    {
        let index = self.hooks.cursor;
        self.hooks.cursor += 1;

        if let Some(existing) = self
            .hooks
            .slots
            .get(index)
            .and_then(|slot| slot.downcast_ref::<T>())
        {
            return existing.clone();
        }

        let value = create(self.runtime, self.hooks);
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value.clone());
        if index < self.hooks.slots.len() {
            tracing::warn!(index, "hook order changed, slot replaced");
            self.hooks.slots[index] = boxed;
        } else {
            self.hooks.slots.push(boxed);
        }
        value
    }

    /// A signal owned by the component. `init` runs on the first render only.
    pub fn use_signal<T: SignalValue>(&mut self, init: impl FnOnce() -> T) -> Signal<T> {
        self.hook(|runtime, hooks| {
            let signal = runtime.signal(init());
            hooks.owned_sources.push(signal.id());
            signal
        })
    }

    /// A store owned by the component.
    pub fn use_store(&mut self, init: impl FnOnce() -> Value) -> Result<Store, ReactiveError> {
        let mut failure = None;
        let slot: Option<Store> = self.hook(|runtime, hooks| match runtime.store(init()) {
            Ok(store) => {
                hooks.owned_sources.push(store.id());
                Some(store)
            }
            Err(err) => {
                failure = Some(err);
                None
            }
        });
        match (slot, failure) {
            (Some(store), _) => Ok(store),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ReactiveError::NotAnAggregate),
        }
    }

    /// A computed value owned by the component.
    pub fn use_computed<T, F>(&mut self, f: F) -> Computed<T>
    where
        T: SignalValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let position = self.position.clone();
        self.hook(move |runtime, hooks| {
            let computed = Computed::create(runtime, TaskSpec::computed().at(position), f);
            hooks.owned_tasks.push(computed.task_id());
            hooks.owned_sources.push(computed.signal().id());
            computed
        })
    }

    /// A task owned by the component, first run on the next tick of its
    /// tier. Visible-tier tasks wait for the component's region.
    pub fn use_task<F>(&mut self, eagerness: Eagerness, f: F) -> TaskId
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        let spec = TaskSpec::effect(eagerness)
            .at(self.position.clone())
            .in_region(self.region);
        self.hook(move |runtime, hooks| {
            let task = runtime.spawn_task(spec, Arc::new(f));
            hooks.owned_tasks.push(task);
            task
        })
    }

    /// A task that runs once the component's region is visible.
    pub fn use_visible_task<F>(&mut self, f: F) -> TaskId
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.use_task(Eagerness::Visible, f)
    }

    /// Run `cleanup` when the component is destroyed. Registered on the
    /// first render only.
    pub fn on_cleanup(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        if self.first_render {
            self.hooks.cleanups.push(Box::new(cleanup));
        }
    }
}

impl fmt::Debug for RenderScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScope")
            .field("task", &self.task)
            .field("region", &self.region)
            .field("hooks", &self.hooks.slots.len())
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{ClosureRef, StaticLoader};
    use crate::render::MemoryTree;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn mounts_and_renders_component() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());

        let greeting = ComponentDef::new("Greeting", |scope| {
            let name: String = scope.prop("name")?.unwrap_or_default();
            Ok(VNode::element("p").child(format!("hello {name}").into()))
        });
        container.render(&VNode::component(&greeting).prop("name", "ada"));

        assert_eq!(tree.to_html(), "<p>hello ada</p>");
        assert_eq!(container.instance_count(), 1);
    }

    #[test]
    fn signal_change_rerenders_only_that_component() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let count = rt.signal(0);
        let renders = counter();

        let c = count.clone();
        let r = renders.clone();
        let view = ComponentDef::new("Count", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(VNode::element("span").child(c.read().to_string().into()))
        });
        container.render(&VNode::component(&view));
        tree.take_log();

        count.write(5);
        rt.flush();

        assert_eq!(renders.load(Ordering::SeqCst), 2);
        assert_eq!(tree.to_html(), "<span>5</span>");
        let log = tree.take_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(&log[0], Mutation::SetText { text, .. } if text == "5"));
    }

    #[test]
    fn bound_text_updates_without_rerender() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let count = rt.signal(0);
        let renders = counter();

        let c = count.clone();
        let r = renders.clone();
        let view = ComponentDef::new("Counter", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(VNode::element("p").child("Count: ".into()).child(VNode::text_of(&c)))
        });
        container.render(&VNode::component(&view));
        assert_eq!(tree.to_html(), "<p>Count: 0</p>");
        tree.take_log();

        count.write(1);
        rt.flush();
        count.write(2);
        rt.flush();

        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(tree.to_html(), "<p>Count: 2</p>");
        let log = tree.take_log();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|m| matches!(m, Mutation::SetText { .. })));

        container.unmount();
        assert_eq!(container.slot_count(), 0);
        count.write(3);
        assert!(rt.flush().ran.is_empty());
    }

    #[test]
    fn bound_slot_switches_between_text_and_elements() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let store = rt.store(serde_json::json!({ "count": 0, "show": false })).unwrap();
        let renders = counter();

        let (st, r) = (store.clone(), renders.clone());
        let view = ComponentDef::new("Toggle", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            let st = st.clone();
            Ok(VNode::element("div")
                .child(VNode::text_of_field(&st, "count"))
                .child(VNode::bound(move || {
                    let show: bool = st.get_as("show")?.unwrap_or(false);
                    Ok(if show {
                        VNode::element("b").child("on".into())
                    } else {
                        VNode::text("off")
                    })
                })))
        });
        container.render(&VNode::component(&view));
        assert_eq!(tree.to_html(), "<div>0off</div>");

        store.set("show", true).unwrap();
        store.set("count", 7).unwrap();
        rt.flush();
        assert_eq!(tree.to_html(), "<div>7<b>on</b></div>");

        store.set("show", false).unwrap();
        rt.flush();
        assert_eq!(tree.to_html(), "<div>7off</div>");
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(container.slot_count(), 2);
    }

    #[test]
    fn failed_binding_keeps_slot_output() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let boundary = Arc::new(crate::error::CollectingBoundary::new());
        rt.set_error_boundary(boundary.clone());
        let value = rt.signal(1);

        let v = value.clone();
        container.render(&VNode::element("p").child(VNode::bound(move || {
            let n = v.read();
            if n < 0 {
                return Err(TaskError::msg("negative"));
            }
            Ok(VNode::text(n.to_string()))
        })));

        value.write(-1);
        let report = rt.flush();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(tree.to_html(), "<p>1</p>");

        value.write(4);
        rt.flush();
        assert_eq!(tree.to_html(), "<p>4</p>");
    }

    #[test]
    fn inserted_sibling_renders_in_document_order() {
        let rt = Runtime::new();
        let container = Container::new(&rt, MemoryTree::new("body"));
        let tick = rt.signal(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (t, o) = (tick.clone(), order.clone());
        let item = ComponentDef::new("Item", move |scope| {
            t.read();
            let name: String = scope.prop("name")?.unwrap_or_default();
            o.lock().push(name.clone());
            Ok(VNode::element("li").child(name.into()))
        });
        let list = |names: &[&str]| {
            VNode::element("ul").children(
                names
                    .iter()
                    .map(|name| VNode::component(&item).keyed(*name).prop("name", *name)),
            )
        };

        container.render(&list(&["b", "c"]));
        container.render(&list(&["a", "b", "c"]));
        order.lock().clear();

        tick.write(1);
        rt.flush();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn hooks_keep_state_across_renders() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let view = ComponentDef::new("Local", move |scope| {
            let local = scope.use_signal(|| 10);
            s.lock().push(local.id());
            let value = local.read();
            if value == 10 {
                local.write(11);
            }
            Ok(VNode::text(value.to_string()))
        });
        container.render(&VNode::component(&view));
        rt.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(tree.to_html(), "11");
    }

    #[test]
    fn failed_rerender_keeps_previous_output() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let boundary = Arc::new(crate::error::CollectingBoundary::new());
        rt.set_error_boundary(boundary.clone());
        let fail = rt.signal(false);

        let f = fail.clone();
        let view = ComponentDef::new("Fragile", move |_| {
            if f.read() {
                return Err(TaskError::Failed("broken".into()));
            }
            Ok(VNode::text("ok"))
        });
        container.render(&VNode::component(&view));

        fail.write(true);
        let report = rt.flush();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(tree.to_html(), "ok");
        assert_eq!(boundary.len(), 1);
    }

    #[test]
    fn unmount_disposes_everything() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let cleaned = counter();

        let c = cleaned.clone();
        let view = ComponentDef::new("Owner", move |scope| {
            let local = scope.use_signal(|| 1);
            let c = c.clone();
            scope.on_cleanup(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            Ok(VNode::text(local.read().to_string()))
        });
        container.render(&VNode::component(&view));
        let task = container.render_tasks("Owner")[0];

        container.unmount();
        assert_eq!(container.instance_count(), 0);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(rt.task_state(task), crate::graph::TaskState::Disposed);
        assert_eq!(tree.to_html(), "");
    }

    #[test]
    fn visible_task_waits_for_region() {
        let rt = Runtime::new();
        let container = Container::new(&rt, MemoryTree::new("body"));
        let runs = counter();
        let region = Arc::new(Mutex::new(None));

        let (r, reg) = (runs.clone(), region.clone());
        let view = ComponentDef::new("Lazy", move |scope| {
            *reg.lock() = Some(scope.region());
            let r = r.clone();
            scope.use_visible_task(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutcome::Complete)
            });
            Ok(VNode::element("div"))
        });
        let region_id = {
            container.render(&VNode::component(&view));
            region.lock().expect("rendered")
        };
        rt.set_region_visible(region_id, false);
        rt.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        rt.set_region_visible(region_id, true);
        rt.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_bubbles_to_handler() {
        let rt = Runtime::new();
        let tree = MemoryTree::new("body");
        let container = Container::new(&rt, tree.clone());
        let count = rt.signal(0);
        rt.set_loader(Arc::new(StaticLoader::new().with("inc", |ctx: &TaskContext| -> TaskResult {
            let captures = ctx.captures().ok_or_else(|| TaskError::Failed("no captures".into()))?;
            captures.signal::<i32>(0)?.update(|n| *n += 1);
            Ok(TaskOutcome::Complete)
        })));

        let c = count.clone();
        let view = ComponentDef::new("Button", move |_| {
            Ok(VNode::element("button")
                .on("click", ClosureRef::new("inc", [c.id()]))
                .child(VNode::element("b").child(c.read().to_string().into())))
        });
        container.render(&VNode::component(&view));

        let inner = tree.find_element("b").expect("rendered");
        container.dispatch(inner, "click").await.expect("dispatched");
        assert_eq!(count.read_untracked(), 1);
        assert_eq!(tree.text_content(inner), "1");

        let err = container.dispatch(inner, "hover").await.unwrap_err();
        assert!(matches!(err, ReactiveError::NoHandler { .. }));
    }
}
