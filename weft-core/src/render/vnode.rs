//! Virtual Nodes
//!
//! A [`VNode`] describes one node of UI for one render pass. Render functions
//! build a fresh tree every time; the differ compares it with the committed
//! tree.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::container::RenderScope;
use crate::closure::ClosureRef;
use crate::error::TaskError;
use crate::reactive::{Key, Signal, SignalValue, Store, StoreValue};

/// Props passed to a component.
pub type Props = IndexMap<String, Value>;

/// A component's render function.
pub type ComponentFn = Arc<dyn Fn(&mut RenderScope<'_>) -> Result<VNode, TaskError> + Send + Sync>;

/// A component type. Two definitions are the same component when their names
/// match.
#[derive(Clone)]
pub struct ComponentDef {
    name: Arc<str>,
    render: ComponentFn,
}

impl ComponentDef {
    pub fn new<F>(name: &str, render: F) -> Self
    where
        F: Fn(&mut RenderScope<'_>) -> Result<VNode, TaskError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            render: Arc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render_fn(&self) -> ComponentFn {
        Arc::clone(&self.render)
    }
}

impl PartialEq for ComponentDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentDef({})", self.name)
    }
}

/// The render function of a bound slot.
pub type BindingFn = Arc<dyn Fn() -> Result<VNode, TaskError> + Send + Sync>;

/// Output that follows reactive sources on its own.
///
/// A bound slot gets its own render task. When a source the binding read
/// changes, only the slot is re-evaluated and patched; the component that
/// produced it does not render again.
#[derive(Clone)]
pub struct Binding(BindingFn);

impl Binding {
    pub(crate) fn evaluate(&self) -> Result<VNode, TaskError> {
        (self.0)()
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Binding(..)")
    }
}

/// An attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Bool(bool),
    /// An event handler, stored as an `on:<event>` attribute.
    Handler(ClosureRef),
}

impl AttrValue {
    /// The attribute as it appears in markup.
    pub fn to_attr_string(&self) -> String {
        match self {
            AttrValue::Text(text) => text.clone(),
            AttrValue::Bool(flag) => flag.to_string(),
            AttrValue::Handler(closure) => closure.to_attr_string(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(text: &str) -> Self {
        AttrValue::Text(text.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(text: String) -> Self {
        AttrValue::Text(text)
    }
}

impl From<bool> for AttrValue {
    fn from(flag: bool) -> Self {
        AttrValue::Bool(flag)
    }
}

impl From<ClosureRef> for AttrValue {
    fn from(closure: ClosureRef) -> Self {
        AttrValue::Handler(closure)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VNodeKind {
    Element(String),
    Component(ComponentDef, Props),
    Text(String),
    Fragment,
    Bound(Binding),
}

/// One node of a render output.
#[derive(Debug, Clone, PartialEq)]
pub struct VNode {
    pub kind: VNodeKind,
    /// Stable identity among siblings.
    pub key: Option<String>,
    pub attrs: IndexMap<String, AttrValue>,
    pub children: Vec<VNode>,
}

impl VNode {
    fn new(kind: VNodeKind) -> Self {
        Self {
            kind,
            key: None,
            attrs: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn element(tag: impl Into<String>) -> Self {
        Self::new(VNodeKind::Element(tag.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(VNodeKind::Text(text.into()))
    }

    pub fn fragment(children: impl IntoIterator<Item = VNode>) -> Self {
        Self::new(VNodeKind::Fragment).children(children)
    }

    pub fn component(def: &ComponentDef) -> Self {
        Self::new(VNodeKind::Component(def.clone(), Props::new()))
    }

    /// A slot whose content is `render`'s output, kept current by its own task.
    pub fn bound<F>(render: F) -> Self
    where
        F: Fn() -> Result<VNode, TaskError> + Send + Sync + 'static,
    {
        Self::new(VNodeKind::Bound(Binding(Arc::new(render))))
    }

    /// Text that follows a signal.
    pub fn text_of<T: SignalValue + fmt::Display>(signal: &Signal<T>) -> Self {
        let signal = signal.clone();
        Self::bound(move || Ok(VNode::text(signal.read().to_string())))
    }

    /// Text that follows one store key. Missing keys render as empty text.
    pub fn text_of_field(store: &Store, key: impl Into<Key>) -> Self {
        let store = store.clone();
        let key = key.into();
        Self::bound(move || {
            let text = match store.get(key.clone())? {
                None => String::new(),
                Some(StoreValue::Value(Value::String(text))) => text,
                Some(StoreValue::Value(value)) => value.to_string(),
                Some(StoreValue::Store(nested)) => nested.to_value()?.to_string(),
            };
            Ok(VNode::text(text))
        })
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Attach an event handler.
    pub fn on(self, event: &str, handler: ClosureRef) -> Self {
        self.attr(format!("on:{event}"), AttrValue::Handler(handler))
    }

    /// Set a component prop. Props that fail to serialize are stored as null.
    pub fn prop(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        if let VNodeKind::Component(_, props) = &mut self.kind {
            props.insert(
                name.into(),
                serde_json::to_value(value).unwrap_or(Value::Null),
            );
        }
        self
    }

    pub fn child(mut self, child: VNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = VNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// Whether two nodes can be patched into each other rather than replaced.
    pub(crate) fn same_type(&self, other: &VNode) -> bool {
        match (&self.kind, &other.kind) {
            (VNodeKind::Element(a), VNodeKind::Element(b)) => a == b,
            (VNodeKind::Component(a, _), VNodeKind::Component(b, _)) => a == b,
            (VNodeKind::Text(_), VNodeKind::Text(_)) => true,
            (VNodeKind::Fragment, VNodeKind::Fragment) => true,
            (VNodeKind::Bound(_), VNodeKind::Bound(_)) => true,
            _ => false,
        }
    }
}

impl From<&str> for VNode {
    fn from(text: &str) -> Self {
        VNode::text(text)
    }
}

impl From<String> for VNode {
    fn from(text: String) -> Self {
        VNode::text(text)
    }
}
