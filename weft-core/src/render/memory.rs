//! In-Memory Tree
//!
//! [`MemoryTree`] is a [`TreeAdapter`] over a plain node table. It records
//! every applied mutation, renders to markup, and can be exported as an
//! [`ExternalNode`] for hydration. Handles are cheap clones of one shared
//! tree.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::mutation::{ExternalKind, ExternalNode, Mutation, NodeId, NodeSpec, TreeAdapter};

#[derive(Debug, Clone)]
enum MemoryKind {
    Element {
        tag: String,
        attrs: IndexMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: MemoryKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct MemoryInner {
    root: NodeId,
    nodes: HashMap<NodeId, MemoryNode>,
    log: Vec<Mutation>,
}

impl MemoryInner {
    fn detach(&mut self, child: NodeId) {
        let parent = self.nodes.get_mut(&child).and_then(|node| node.parent.take());
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|id| *id != child);
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        if !self.nodes.contains_key(&child) {
            tracing::warn!(%child, "attach of unknown node");
            return;
        }
        self.detach(child);

        let Some(node) = self.nodes.get_mut(&parent) else {
            tracing::warn!(%parent, "attach to unknown parent");
            return;
        };
        let index = before
            .and_then(|before| node.children.iter().position(|id| *id == before))
            .unwrap_or(node.children.len());
        node.children.insert(index, child);

        if let Some(child) = self.nodes.get_mut(&child) {
            child.parent = Some(parent);
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children);
            }
        }
    }

    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::CreateNode { id, spec } => {
                let kind = match spec {
                    NodeSpec::Element { tag } => MemoryKind::Element {
                        tag: tag.clone(),
                        attrs: IndexMap::new(),
                    },
                    NodeSpec::Text { text } => MemoryKind::Text(text.clone()),
                };
                self.nodes.insert(
                    *id,
                    MemoryNode {
                        kind,
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
            Mutation::SetAttribute { node, name, value } => {
                if let Some(MemoryNode {
                    kind: MemoryKind::Element { attrs, .. },
                    ..
                }) = self.nodes.get_mut(node)
                {
                    attrs.insert(name.clone(), value.to_attr_string());
                }
            }
            Mutation::RemoveAttribute { node, name } => {
                if let Some(MemoryNode {
                    kind: MemoryKind::Element { attrs, .. },
                    ..
                }) = self.nodes.get_mut(node)
                {
                    attrs.shift_remove(name);
                }
            }
            Mutation::InsertChild {
                parent,
                child,
                before,
            }
            | Mutation::MoveChild {
                parent,
                child,
                before,
            } => self.attach(*parent, *child, *before),
            Mutation::RemoveChild { parent, child } => {
                if self.nodes.get(child).and_then(|node| node.parent) != Some(*parent) {
                    tracing::warn!(%parent, %child, "remove of a node that is not a child");
                }
                self.detach(*child);
                self.drop_subtree(*child);
            }
            Mutation::SetText { node, text } => {
                if let Some(MemoryNode {
                    kind: MemoryKind::Text(current),
                    ..
                }) = self.nodes.get_mut(node)
                {
                    *current = text.clone();
                }
            }
        }
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            MemoryKind::Text(text) => out.push_str(&escape(text)),
            MemoryKind::Element { tag, attrs } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{}\"", escape(value));
                }
                out.push('>');
                for child in &node.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn export(&self, id: NodeId) -> Option<ExternalNode> {
        let node = self.nodes.get(&id)?;
        let kind = match &node.kind {
            MemoryKind::Element { tag, attrs } => ExternalKind::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
            },
            MemoryKind::Text(text) => ExternalKind::Text(text.clone()),
        };
        Some(ExternalNode {
            id,
            kind,
            children: node
                .children
                .iter()
                .filter_map(|child| self.export(*child))
                .collect(),
        })
    }

    fn import(&mut self, node: &ExternalNode, parent: Option<NodeId>) {
        let kind = match &node.kind {
            ExternalKind::Element { tag, attrs } => MemoryKind::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
            },
            ExternalKind::Text(text) => MemoryKind::Text(text.clone()),
        };
        self.nodes.insert(
            node.id,
            MemoryNode {
                kind,
                parent,
                children: node.children.iter().map(|child| child.id).collect(),
            },
        );
        for child in &node.children {
            self.import(child, Some(node.id));
        }
    }

    fn walk(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Some(node) = self.nodes.get(&id) {
            for child in &node.children {
                self.walk(*child, out);
            }
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// A tree held in memory.
#[derive(Clone)]
pub struct MemoryTree {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTree {
    /// An empty tree whose root is an element with `root_tag`.
    pub fn new(root_tag: &str) -> Self {
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            MemoryNode {
                kind: MemoryKind::Element {
                    tag: root_tag.to_string(),
                    attrs: IndexMap::new(),
                },
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                root,
                nodes,
                log: Vec::new(),
            })),
        }
    }

    /// A tree holding a copy of `external`, which becomes the root.
    pub fn from_external(external: &ExternalNode) -> Self {
        let mut inner = MemoryInner {
            root: external.id,
            nodes: HashMap::new(),
            log: Vec::new(),
        };
        inner.import(external, None);
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Mutations applied since the last call.
    pub fn take_log(&self) -> Vec<Mutation> {
        std::mem::take(&mut self.inner.lock().log)
    }

    /// Markup of the root's content.
    pub fn to_html(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        if let Some(root) = inner.nodes.get(&inner.root) {
            for child in &root.children {
                inner.write_html(*child, &mut out);
            }
        }
        out
    }

    /// The whole tree, root included.
    pub fn external_tree(&self) -> ExternalNode {
        let inner = self.inner.lock();
        inner.export(inner.root).unwrap_or_else(|| ExternalNode::element(inner.root, "#root"))
    }

    /// The first element with `tag`, in document order.
    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        self.find(|kind| matches!(kind, MemoryKind::Element { tag: t, .. } if t == tag))
    }

    /// The first element whose attribute `name` equals `value`.
    pub fn find_by_attr(&self, name: &str, value: &str) -> Option<NodeId> {
        self.find(|kind| {
            matches!(kind, MemoryKind::Element { attrs, .. } if attrs.get(name).is_some_and(|v| v == value))
        })
    }

    fn find(&self, predicate: impl Fn(&MemoryKind) -> bool) -> Option<NodeId> {
        let inner = self.inner.lock();
        let mut order = Vec::new();
        inner.walk(inner.root, &mut order);
        order
            .into_iter()
            .skip(1)
            .find(|id| inner.nodes.get(id).is_some_and(|node| predicate(&node.kind)))
    }

    /// Concatenated text below `node`.
    pub fn text_content(&self, node: NodeId) -> String {
        let inner = self.inner.lock();
        let mut order = Vec::new();
        inner.walk(node, &mut order);
        order
            .iter()
            .filter_map(|id| match inner.nodes.get(id).map(|node| &node.kind) {
                Some(MemoryKind::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        match self.inner.lock().nodes.get(&node).map(|node| &node.kind) {
            Some(MemoryKind::Element { attrs, .. }) => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Nodes in the tree, root and detached nodes included.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl TreeAdapter for MemoryTree {
    fn root(&self) -> NodeId {
        self.inner.lock().root
    }

    fn apply(&mut self, mutations: &[Mutation]) {
        let mut inner = self.inner.lock();
        for mutation in mutations {
            inner.apply(mutation);
        }
        inner.log.extend_from_slice(mutations);
    }
}

impl fmt::Debug for MemoryTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryTree")
            .field("root", &inner.root)
            .field("nodes", &inner.nodes.len())
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_structure_and_renders_markup() {
        let mut tree = MemoryTree::new("body");
        let root = tree.root();
        let (div, text) = (NodeId::new(), NodeId::new());

        tree.apply(&[
            Mutation::CreateNode {
                id: div,
                spec: NodeSpec::Element { tag: "div".into() },
            },
            Mutation::SetAttribute {
                node: div,
                name: "title".into(),
                value: "a<b".into(),
            },
            Mutation::CreateNode {
                id: text,
                spec: NodeSpec::Text { text: "x & y".into() },
            },
            Mutation::InsertChild {
                parent: div,
                child: text,
                before: None,
            },
            Mutation::InsertChild {
                parent: root,
                child: div,
                before: None,
            },
        ]);

        assert_eq!(tree.to_html(), "<div title=\"a&lt;b\">x &amp; y</div>");
        assert_eq!(tree.take_log().len(), 5);
        assert!(tree.take_log().is_empty());
    }

    #[test]
    fn move_and_remove() {
        let mut tree = MemoryTree::new("ul");
        let root = tree.root();
        let ids: Vec<NodeId> = (0..3).map(|_| NodeId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            tree.apply(&[
                Mutation::CreateNode {
                    id: *id,
                    spec: NodeSpec::Text { text: i.to_string() },
                },
                Mutation::InsertChild {
                    parent: root,
                    child: *id,
                    before: None,
                },
            ]);
        }

        tree.apply(&[Mutation::MoveChild {
            parent: root,
            child: ids[2],
            before: Some(ids[0]),
        }]);
        assert_eq!(tree.to_html(), "201");

        tree.apply(&[Mutation::RemoveChild {
            parent: root,
            child: ids[0],
        }]);
        assert_eq!(tree.to_html(), "21");
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn export_and_import_round_trip() {
        let mut tree = MemoryTree::new("body");
        let root = tree.root();
        let p = NodeId::new();
        tree.apply(&[
            Mutation::CreateNode {
                id: p,
                spec: NodeSpec::Element { tag: "p".into() },
            },
            Mutation::SetAttribute {
                node: p,
                name: "class".into(),
                value: "intro".into(),
            },
            Mutation::InsertChild {
                parent: root,
                child: p,
                before: None,
            },
        ]);

        let copy = MemoryTree::from_external(&tree.external_tree());
        assert_eq!(copy.to_html(), tree.to_html());
        assert_eq!(copy.find_by_attr("class", "intro"), Some(p));
        assert_eq!(copy.attr(p, "class").as_deref(), Some("intro"));
        assert_eq!(copy.children_of(root), vec![p]);
    }
}
