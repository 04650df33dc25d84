//! Tree Mutations
//!
//! The differ never touches a concrete tree. It emits [`Mutation`]s, and a
//! [`TreeAdapter`] applies them to whatever tree is in play: a browser
//! document, a server-side buffer, or [`MemoryTree`](super::MemoryTree) in
//! tests.
//!
//! Only elements and text nodes exist in the target tree. Fragments and
//! components are flattened away.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::vnode::AttrValue;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a node in the target tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// A process-wide unique id.
    pub fn new() -> Self {
        Self(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a created node is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSpec {
    Element { tag: String },
    Text { text: String },
}

/// One change to the target tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a detached node.
    CreateNode { id: NodeId, spec: NodeSpec },
    SetAttribute {
        node: NodeId,
        name: String,
        value: AttrValue,
    },
    RemoveAttribute { node: NodeId, name: String },
    /// Attach a detached node before `before`, or at the end.
    InsertChild {
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    },
    /// Move an attached child within its parent.
    MoveChild {
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    },
    /// Detach and discard a child and its subtree.
    RemoveChild { parent: NodeId, child: NodeId },
    SetText { node: NodeId, text: String },
}

impl Mutation {
    /// Whether the mutation changes tree structure rather than updating a
    /// node in place.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Mutation::CreateNode { .. }
                | Mutation::InsertChild { .. }
                | Mutation::MoveChild { .. }
                | Mutation::RemoveChild { .. }
        )
    }
}

/// Applies mutations to a concrete tree.
pub trait TreeAdapter: Send {
    /// The mount point. Rendered content becomes its children.
    fn root(&self) -> NodeId;

    /// Apply one committed batch, in order.
    fn apply(&mut self, mutations: &[Mutation]);
}

/// An existing tree to hydrate, such as server-rendered markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNode {
    pub id: NodeId,
    pub kind: ExternalKind,
    pub children: Vec<ExternalNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalKind {
    Element {
        tag: String,
        attrs: IndexMap<String, String>,
    },
    Text(String),
}

impl ExternalNode {
    pub fn element(id: NodeId, tag: impl Into<String>) -> Self {
        Self {
            id,
            kind: ExternalKind::Element {
                tag: tag.into(),
                attrs: IndexMap::new(),
            },
            children: Vec::new(),
        }
    }

    pub fn text(id: NodeId, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: ExternalKind::Text(text.into()),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match &self.kind {
            ExternalKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            ExternalKind::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("n{}", a.raw()));
    }

    #[test]
    fn structural_classification() {
        let node = NodeId::new();
        assert!(Mutation::RemoveChild { parent: node, child: node }.is_structural());
        assert!(!Mutation::SetText {
            node,
            text: "x".into()
        }
        .is_structural());
    }
}
