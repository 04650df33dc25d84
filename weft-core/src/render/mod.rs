//! Virtual Tree and Rendering
//!
//! This module turns component output into mutations of a concrete tree.
//!
//! # Overview
//!
//! - [`VNode`] is the description a render produces: elements, text,
//!   fragments and component invocations.
//! - The differ compares a new description with the committed tree and emits
//!   [`Mutation`]s. Keyed children are moved, never re-created.
//! - A [`Container`] owns the committed tree and the component instances, and
//!   applies each batch through a [`TreeAdapter`].
//! - [`MemoryTree`] is an adapter that keeps the tree in memory.
//!
//! # Hydration
//!
//! [`Container::hydrate`] adopts an existing tree, such as one rendered on a
//! server, claiming matching nodes instead of creating them.

mod container;
mod diff;
mod memory;
mod mutation;
mod vnode;

pub use container::{Container, RenderScope};
pub use memory::MemoryTree;
pub use mutation::{ExternalKind, ExternalNode, Mutation, NodeId, NodeSpec, TreeAdapter};
pub use vnode::{AttrValue, Binding, BindingFn, ComponentDef, ComponentFn, Props, VNode, VNodeKind};
