//! Differ
//!
//! The differ reconciles a new [`VNode`] against the committed live tree and
//! emits the mutations that turn one into the other.
//!
//! # Algorithm
//!
//! Per node pair:
//!
//! 1. Different types (tag, component, text vs element) replace the old
//!    subtree: the new one is mounted in its place and the old one removed,
//!    disposing every component instance inside it.
//! 2. Elements diff their attributes in place and reconcile their children.
//! 3. Text nodes update in place when the text differs.
//! 4. Components only receive their new props. Each prop is a store field, so
//!    only components that read a changed prop re-render, through their own
//!    render task.
//! 5. Bound slots take the new binding, re-evaluate it and patch their single
//!    child with the result.
//!
//! Children are matched by key, and unkeyed children by their order among
//! unkeyed siblings. Unmatched old children are removed and unmatched new ones
//! mounted. Matched children that must change position are moved, never
//! re-created: the longest run of matched children that kept their relative
//! order stays put and only the rest move.
//!
//! Duplicate keys are reported and the whole sibling group falls back to
//! positional matching.
//!
//! # Live Tree
//!
//! The live tree mirrors the committed output, including fragments and
//! component boundaries and bound slots. Only elements and text nodes are
//! physical; the physical children of the others are inserted into the nearest
//! physical ancestor.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use super::mutation::{ExternalKind, ExternalNode, Mutation, NodeId, NodeSpec};
use super::vnode::{AttrValue, Binding, ComponentDef, Props, VNode, VNodeKind};
use crate::closure::ClosureRef;
use crate::error::ReactiveError;
use crate::reactive::Runtime;

/// Identity of a mounted component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct InstanceId(pub(crate) u64);

#[derive(Debug)]
pub(crate) enum LiveKind {
    /// The mount point.
    Root,
    Element {
        tag: String,
        attrs: IndexMap<String, AttrValue>,
    },
    Text(String),
    Fragment,
    Component {
        def: ComponentDef,
        instance: InstanceId,
    },
    /// A slot kept current by its own task. Its one child is the binding's
    /// latest output.
    Bound,
}

#[derive(Debug)]
pub(crate) struct LiveNode {
    pub(crate) kind: LiveKind,
    pub(crate) key: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl LiveNode {
    fn is_physical(&self) -> bool {
        matches!(
            self.kind,
            LiveKind::Root | LiveKind::Element { .. } | LiveKind::Text(_)
        )
    }
}

/// The committed tree.
#[derive(Debug)]
pub(crate) struct LiveTree {
    nodes: HashMap<NodeId, LiveNode>,
    root: NodeId,
}

impl LiveTree {
    pub(crate) fn new(root: NodeId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            LiveNode {
                kind: LiveKind::Root,
                key: None,
                parent: None,
                children: Vec::new(),
            },
        );
        Self { nodes, root }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&LiveNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |node| node.children.as_slice())
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    fn is_physical(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(LiveNode::is_physical)
    }

    fn insert(&mut self, id: NodeId, kind: LiveKind, key: Option<String>, parent: NodeId) {
        self.nodes.insert(
            id,
            LiveNode {
                kind,
                key,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
    }

    pub(crate) fn push_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }

    fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children = children;
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            if let Some(slot) = node.children.iter_mut().find(|child| **child == old) {
                *slot = new;
            }
        }
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.retain(|child| *child != id);
            }
        }
    }

    /// The physical node that holds the physical nodes of `id`.
    pub(crate) fn physical_parent(&self, id: NodeId) -> NodeId {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.is_physical(node) {
                return node;
            }
            current = self.parent(node);
        }
        self.root
    }

    pub(crate) fn first_physical(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        if node.is_physical() {
            return Some(id);
        }
        node.children
            .iter()
            .find_map(|child| self.first_physical(*child))
    }

    /// The outermost physical nodes of `id`, in document order.
    pub(crate) fn physical_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_physical(id, &mut out);
        out
    }

    fn collect_physical(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.is_physical() {
            out.push(id);
        } else {
            for child in &node.children {
                self.collect_physical(*child, out);
            }
        }
    }

    /// The first physical node after everything `id` renders, within the same
    /// physical parent.
    fn next_physical_after(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let parent = self.parent(current)?;
            let siblings = self.children(parent);
            let index = siblings.iter().position(|child| *child == current)?;
            if let Some(found) = siblings[index + 1..]
                .iter()
                .find_map(|sibling| self.first_physical(*sibling))
            {
                return Some(found);
            }
            if self.is_physical(parent) {
                return None;
            }
            current = parent;
        }
    }

    /// The nearest component at or above `id`.
    pub(crate) fn owner(&self, id: NodeId) -> Option<InstanceId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.nodes.get(&node_id)?;
            if let LiveKind::Component { instance, .. } = node.kind {
                return Some(instance);
            }
            current = node.parent;
        }
        None
    }

    /// Drop a subtree. Returns its component instances and bound slots,
    /// parents first.
    fn remove_subtree(&mut self, id: NodeId) -> Removed {
        let mut removed = Removed::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.remove(&next) else {
                continue;
            };
            match node.kind {
                LiveKind::Component { instance, .. } => removed.instances.push(instance),
                LiveKind::Bound => removed.slots.push(next),
                _ => {}
            }
            stack.extend(node.children.iter().rev());
        }
        removed
    }

    /// The handler for `event` on `node` or its nearest ancestor that has one.
    pub(crate) fn handler(&self, node: NodeId, event: &str) -> Option<ClosureRef> {
        let name = format!("on:{event}");
        let mut current = Some(node);
        while let Some(id) = current {
            let live = self.nodes.get(&id)?;
            if let LiveKind::Element { attrs, .. } = &live.kind {
                if let Some(AttrValue::Handler(closure)) = attrs.get(&name) {
                    return Some(closure.clone());
                }
            }
            current = live.parent;
        }
        None
    }

    fn same_type(&self, id: NodeId, vnode: &VNode) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        match (&node.kind, &vnode.kind) {
            (LiveKind::Element { tag, .. }, VNodeKind::Element(new_tag)) => tag == new_tag,
            (LiveKind::Component { def, .. }, VNodeKind::Component(new_def, _)) => def == new_def,
            (LiveKind::Text(_), VNodeKind::Text(_)) => true,
            (LiveKind::Fragment, VNodeKind::Fragment) => true,
            (LiveKind::Bound, VNodeKind::Bound(_)) => true,
            _ => false,
        }
    }
}

/// What a removed subtree owned.
#[derive(Debug, Default)]
struct Removed {
    instances: Vec<InstanceId>,
    slots: Vec<NodeId>,
}

/// Component lifecycle, implemented by the container.
pub(crate) trait Components {
    /// Create an instance for the component at `node` and render it once.
    fn create(
        &mut self,
        node: NodeId,
        def: &ComponentDef,
        props: &Props,
        owner: Option<InstanceId>,
    ) -> Result<(InstanceId, VNode), ReactiveError>;

    /// Push new props into a mounted instance.
    fn update_props(&mut self, instance: InstanceId, props: &Props);

    /// Dispose an instance's tasks and state.
    fn destroy(&mut self, instance: InstanceId);

    /// Give the bound slot at `node` a task and evaluate it once. A failed
    /// evaluation renders nothing.
    fn bind(&mut self, node: NodeId, binding: &Binding, owner: Option<InstanceId>) -> VNode;

    /// Swap the binding of a mounted slot and evaluate it. `None` keeps the
    /// slot's current output.
    fn rebind(&mut self, node: NodeId, binding: &Binding) -> Option<VNode>;

    /// Dispose a slot's task.
    fn unbind(&mut self, node: NodeId);
}

/// One reconciliation pass. Mutations accumulate in `out` and are applied by
/// the caller as one batch.
pub(crate) struct Reconciler<'a> {
    pub(crate) tree: &'a mut LiveTree,
    pub(crate) components: &'a mut dyn Components,
    pub(crate) runtime: &'a Runtime,
    pub(crate) out: Vec<Mutation>,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(
        tree: &'a mut LiveTree,
        components: &'a mut dyn Components,
        runtime: &'a Runtime,
    ) -> Self {
        Self {
            tree,
            components,
            runtime,
            out: Vec::new(),
        }
    }

    /// Build a live subtree for `vnode` under `parent`. Its outermost physical
    /// nodes are left detached for the caller to insert.
    pub(crate) fn mount(&mut self, vnode: &VNode, parent: NodeId) -> NodeId {
        let id = NodeId::new();
        let key = vnode.key.clone();

        match &vnode.kind {
            VNodeKind::Element(tag) => {
                self.tree.insert(
                    id,
                    LiveKind::Element {
                        tag: tag.clone(),
                        attrs: vnode.attrs.clone(),
                    },
                    key,
                    parent,
                );
                self.out.push(Mutation::CreateNode {
                    id,
                    spec: NodeSpec::Element { tag: tag.clone() },
                });
                for (name, value) in &vnode.attrs {
                    self.out.push(Mutation::SetAttribute {
                        node: id,
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                self.check_keys(id, &vnode.children);
                for child in &vnode.children {
                    let child_id = self.mount(child, id);
                    self.tree.push_child(id, child_id);
                    self.insert_physical(child_id, None);
                }
            }
            VNodeKind::Text(text) => {
                self.tree.insert(id, LiveKind::Text(text.clone()), key, parent);
                self.out.push(Mutation::CreateNode {
                    id,
                    spec: NodeSpec::Text { text: text.clone() },
                });
            }
            VNodeKind::Fragment => {
                self.tree.insert(id, LiveKind::Fragment, key, parent);
                self.check_keys(id, &vnode.children);
                for child in &vnode.children {
                    let child_id = self.mount(child, id);
                    self.tree.push_child(id, child_id);
                }
            }
            VNodeKind::Component(def, props) => {
                let output = self.create_component(id, def, props, key, parent);
                let output_id = self.mount(&output, id);
                self.tree.push_child(id, output_id);
            }
            VNodeKind::Bound(binding) => {
                let output = self.create_slot(id, binding, key, parent);
                let output_id = self.mount(&output, id);
                self.tree.push_child(id, output_id);
            }
        }

        id
    }

    fn create_slot(&mut self, id: NodeId, binding: &Binding, key: Option<String>, parent: NodeId) -> VNode {
        let owner = self.tree.owner(parent);
        self.tree.insert(id, LiveKind::Bound, key, parent);
        self.components.bind(id, binding, owner)
    }

    fn create_component(
        &mut self,
        id: NodeId,
        def: &ComponentDef,
        props: &Props,
        key: Option<String>,
        parent: NodeId,
    ) -> VNode {
        let owner = self.tree.owner(parent);
        // Placeholder until the instance exists. A failed creation leaves an
        // empty fragment, replaced on the next patch.
        self.tree.insert(id, LiveKind::Fragment, key, parent);
        match self.components.create(id, def, props, owner) {
            Ok((instance, output)) => {
                if let Some(node) = self.tree.nodes.get_mut(&id) {
                    node.kind = LiveKind::Component {
                        def: def.clone(),
                        instance,
                    };
                }
                output
            }
            Err(err) => {
                self.runtime.report(err);
                VNode::fragment(Vec::new())
            }
        }
    }

    fn insert_physical(&mut self, id: NodeId, before: Option<NodeId>) {
        let parent = self.tree.physical_parent(id);
        for child in self.tree.physical_nodes(id) {
            self.out.push(Mutation::InsertChild {
                parent,
                child,
                before,
            });
        }
    }

    fn move_physical(&mut self, id: NodeId, before: Option<NodeId>) {
        let parent = self.tree.physical_parent(id);
        for child in self.tree.physical_nodes(id) {
            self.out.push(Mutation::MoveChild {
                parent,
                child,
                before,
            });
        }
    }

    /// Remove a subtree from the target and the live tree, disposing its
    /// component instances.
    pub(crate) fn remove(&mut self, id: NodeId) {
        let parent = self.tree.physical_parent(id);
        for child in self.tree.physical_nodes(id) {
            self.out.push(Mutation::RemoveChild { parent, child });
        }
        self.tree.detach(id);
        let removed = self.tree.remove_subtree(id);
        self.dispose(removed);
    }

    fn dispose(&mut self, removed: Removed) {
        for node in removed.slots {
            self.components.unbind(node);
        }
        for instance in removed.instances.into_iter().rev() {
            self.components.destroy(instance);
        }
    }

    /// Patch the live node `old` into `new`. Returns the id now at that
    /// position, which differs from `old` only on replacement.
    pub(crate) fn patch(&mut self, old: NodeId, new: &VNode) -> NodeId {
        if !self.tree.same_type(old, new) {
            return self.replace(old, new);
        }

        if let Some(node) = self.tree.nodes.get_mut(&old) {
            node.key = new.key.clone();
        }

        match &new.kind {
            VNodeKind::Text(text) => {
                if let Some(LiveNode {
                    kind: LiveKind::Text(current),
                    ..
                }) = self.tree.nodes.get_mut(&old)
                {
                    if current != text {
                        *current = text.clone();
                        self.out.push(Mutation::SetText {
                            node: old,
                            text: text.clone(),
                        });
                    }
                }
            }
            VNodeKind::Element(_) => {
                self.patch_attrs(old, &new.attrs);
                self.reconcile_children(old, &new.children);
            }
            VNodeKind::Fragment => self.reconcile_children(old, &new.children),
            VNodeKind::Component(_, props) => {
                if let Some(instance) = self.tree.owner(old) {
                    self.components.update_props(instance, props);
                }
            }
            VNodeKind::Bound(binding) => {
                let current = self.tree.children(old).first().copied();
                if let (Some(output), Some(current)) = (self.components.rebind(old, binding), current) {
                    self.patch(current, &output);
                }
            }
        }

        old
    }

    fn replace(&mut self, old: NodeId, new: &VNode) -> NodeId {
        let parent = self.tree.parent(old).unwrap_or(self.tree.root);
        let anchor = self
            .tree
            .first_physical(old)
            .or_else(|| self.tree.next_physical_after(old));

        let fresh = self.mount(new, parent);
        self.insert_physical(fresh, anchor);
        self.tree.replace_child(parent, old, fresh);

        // `old` is no longer among the parent's children; remove by subtree.
        let physical_parent = self.tree.physical_parent(fresh);
        for child in self.tree.physical_nodes(old) {
            self.out.push(Mutation::RemoveChild {
                parent: physical_parent,
                child,
            });
        }
        let removed = self.tree.remove_subtree(old);
        self.dispose(removed);

        fresh
    }

    fn patch_attrs(&mut self, id: NodeId, attrs: &IndexMap<String, AttrValue>) {
        let Some(LiveNode {
            kind: LiveKind::Element { attrs: current, .. },
            ..
        }) = self.tree.nodes.get_mut(&id)
        else {
            return;
        };

        for (name, value) in attrs {
            if current.get(name) != Some(value) {
                self.out.push(Mutation::SetAttribute {
                    node: id,
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }
        for name in current.keys() {
            if !attrs.contains_key(name) {
                self.out.push(Mutation::RemoveAttribute {
                    node: id,
                    name: name.clone(),
                });
            }
        }
        *current = attrs.clone();
    }

    /// Reconcile the children of live node `parent` with `new`.
    pub(crate) fn reconcile_children(&mut self, parent: NodeId, new: &[VNode]) {
        let old: Vec<NodeId> = self.tree.children(parent).to_vec();
        let mut matched = self.match_children(parent, &old, new);

        // A matched pair of different types is a replacement: unmatch it so
        // the old node is removed and the new one mounted in place.
        for (index, slot) in matched.iter_mut().enumerate() {
            if let Some(old_index) = *slot {
                if !self.tree.same_type(old[old_index], &new[index]) {
                    *slot = None;
                }
            }
        }

        let used: HashSet<usize> = matched.iter().flatten().copied().collect();
        for (old_index, id) in old.iter().enumerate() {
            if !used.contains(&old_index) {
                self.remove(*id);
            }
        }

        for (index, slot) in matched.iter().enumerate() {
            if let Some(old_index) = slot {
                self.patch(old[*old_index], &new[index]);
            }
        }

        let stable = longest_increasing_subsequence(&matched);
        let mut anchor = if self.tree.is_physical(parent) {
            None
        } else {
            self.tree.next_physical_after(parent)
        };

        let mut placed = vec![parent; new.len()];
        for index in (0..new.len()).rev() {
            let id = match matched[index] {
                Some(old_index) => {
                    let id = old[old_index];
                    if !stable.contains(&index) {
                        self.move_physical(id, anchor);
                    }
                    id
                }
                None => {
                    let id = self.mount(&new[index], parent);
                    self.insert_physical(id, anchor);
                    id
                }
            };
            if let Some(first) = self.tree.first_physical(id) {
                anchor = Some(first);
            }
            placed[index] = id;
        }

        self.tree.set_children(parent, placed);
    }

    /// Report a duplicate key among `children`. Returns whether one was found.
    fn check_keys(&self, parent: NodeId, children: &[VNode]) -> bool {
        match duplicate_key(children) {
            Some(key) => {
                self.runtime
                    .report(ReactiveError::ReconciliationInvariant { parent, key });
                true
            }
            None => false,
        }
    }

    /// For each new child, the index of the old child it reuses.
    fn match_children(&mut self, parent: NodeId, old: &[NodeId], new: &[VNode]) -> Vec<Option<usize>> {
        if self.check_keys(parent, new) {
            return (0..new.len())
                .map(|index| (index < old.len()).then_some(index))
                .collect();
        }

        let mut keyed: HashMap<&str, usize> = HashMap::new();
        let mut unkeyed = Vec::new();
        for (index, id) in old.iter().enumerate() {
            match self.tree.get(*id).and_then(|node| node.key.as_deref()) {
                Some(key) => {
                    keyed.entry(key).or_insert(index);
                }
                None => unkeyed.push(index),
            }
        }

        let mut unkeyed = unkeyed.into_iter();
        new.iter()
            .map(|child| match &child.key {
                Some(key) => keyed.remove(key.as_str()),
                None => unkeyed.next(),
            })
            .collect()
    }

    // ---- Hydration ----

    /// Mount `vnode` under `parent` by claiming existing nodes from
    /// `external`, starting at `cursor`.
    pub(crate) fn hydrate(
        &mut self,
        vnode: &VNode,
        parent: NodeId,
        external: &[ExternalNode],
        cursor: &mut usize,
    ) -> NodeId {
        let key = vnode.key.clone();

        match &vnode.kind {
            VNodeKind::Element(tag) => {
                let Some(existing) = external.get(*cursor).filter(|node| {
                    matches!(&node.kind, ExternalKind::Element { tag: t, .. } if t == tag)
                }) else {
                    return self.mount_before(vnode, parent, external.get(*cursor));
                };
                *cursor += 1;

                let id = existing.id;
                self.tree.insert(
                    id,
                    LiveKind::Element {
                        tag: tag.clone(),
                        attrs: vnode.attrs.clone(),
                    },
                    key,
                    parent,
                );
                self.claim_attrs(id, existing, &vnode.attrs);

                let mut child_cursor = 0;
                for child in &vnode.children {
                    let child_id = self.hydrate(child, id, &existing.children, &mut child_cursor);
                    self.tree.push_child(id, child_id);
                }
                self.remove_unclaimed(id, &existing.children[child_cursor..]);
                id
            }
            VNodeKind::Text(text) => {
                let Some(existing) = external
                    .get(*cursor)
                    .filter(|node| matches!(node.kind, ExternalKind::Text(_)))
                else {
                    return self.mount_before(vnode, parent, external.get(*cursor));
                };
                *cursor += 1;

                let id = existing.id;
                self.tree.insert(id, LiveKind::Text(text.clone()), key, parent);
                if existing.kind != ExternalKind::Text(text.clone()) {
                    self.out.push(Mutation::SetText {
                        node: id,
                        text: text.clone(),
                    });
                }
                id
            }
            VNodeKind::Fragment => {
                let id = NodeId::new();
                self.tree.insert(id, LiveKind::Fragment, key, parent);
                for child in &vnode.children {
                    let child_id = self.hydrate(child, id, external, cursor);
                    self.tree.push_child(id, child_id);
                }
                id
            }
            VNodeKind::Component(def, props) => {
                let id = NodeId::new();
                let output = self.create_component(id, def, props, key, parent);
                let output_id = self.hydrate(&output, id, external, cursor);
                self.tree.push_child(id, output_id);
                id
            }
            VNodeKind::Bound(binding) => {
                let id = NodeId::new();
                let output = self.create_slot(id, binding, key, parent);
                let output_id = self.hydrate(&output, id, external, cursor);
                self.tree.push_child(id, output_id);
                id
            }
        }
    }

    fn mount_before(&mut self, vnode: &VNode, parent: NodeId, before: Option<&ExternalNode>) -> NodeId {
        let id = self.mount(vnode, parent);
        self.insert_physical(id, before.map(|node| node.id));
        id
    }

    fn claim_attrs(&mut self, id: NodeId, existing: &ExternalNode, attrs: &IndexMap<String, AttrValue>) {
        for (name, value) in attrs {
            if existing.attr(name) != Some(value.to_attr_string().as_str()) {
                self.out.push(Mutation::SetAttribute {
                    node: id,
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }
        if let ExternalKind::Element { attrs: current, .. } = &existing.kind {
            for name in current.keys() {
                if !attrs.contains_key(name) {
                    self.out.push(Mutation::RemoveAttribute {
                        node: id,
                        name: name.clone(),
                    });
                }
            }
        }
    }

    /// Remove external nodes the render did not claim.
    pub(crate) fn remove_unclaimed(&mut self, parent: NodeId, leftover: &[ExternalNode]) {
        for node in leftover {
            self.out.push(Mutation::RemoveChild {
                parent,
                child: node.id,
            });
        }
    }
}

fn duplicate_key(children: &[VNode]) -> Option<String> {
    let mut seen = HashSet::new();
    children
        .iter()
        .filter_map(|child| child.key.as_deref())
        .find(|key| !seen.insert(*key))
        .map(str::to_string)
}

/// Positions (in `sequence`) of a longest strictly increasing run of the
/// `Some` values.
fn longest_increasing_subsequence(sequence: &[Option<usize>]) -> HashSet<usize> {
    // tails[k]: position of the smallest tail of an increasing run of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];

    for (position, value) in sequence.iter().enumerate() {
        let Some(value) = value else {
            continue;
        };
        let length = tails.partition_point(|tail| sequence[*tail].is_some_and(|v| v < *value));
        if length > 0 {
            previous[position] = Some(tails[length - 1]);
        }
        if length == tails.len() {
            tails.push(position);
        } else {
            tails[length] = position;
        }
    }

    let mut result = HashSet::new();
    let mut current = tails.last().copied();
    while let Some(position) = current {
        result.insert(position);
        current = previous[position];
    }
    result
}

// ---- Tests ----
