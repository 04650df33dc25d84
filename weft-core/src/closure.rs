//! Closure References
//!
//! A [`ClosureRef`] stands in for a function plus the reactive sources it
//! captured. It holds only a symbol name and source ids, so it can be
//! serialized, written into markup as an attribute, and resolved later, even
//! by a different runtime resumed from a snapshot.
//!
//! Resolution asks the runtime's [`ClosureLoader`] for the function behind the
//! symbol, then binds it to the sources that currently carry the captured
//! ids. Sources are looked up again on every access through [`Captures`],
//! never held from creation time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, TaskError};
use crate::graph::{TaskContext, TaskFn, TaskOutcome, TaskResult};
use crate::reactive::{run_cleanups, Runtime, Signal, SignalValue, SourceId, Store, WeakRuntime};

/// Name of a loadable function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(String);

impl SymbolId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SymbolId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A serializable reference to a function and its captured sources.
///
/// Creating one resolves nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureRef {
    symbol: SymbolId,
    captured: Vec<SourceId>,
}

impl ClosureRef {
    pub fn new(symbol: impl Into<SymbolId>, captured: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            symbol: symbol.into(),
            captured: captured.into_iter().collect(),
        }
    }

    pub fn symbol(&self) -> &SymbolId {
        &self.symbol
    }

    pub fn captured(&self) -> &[SourceId] {
        &self.captured
    }

    /// Load the function and bind it to the live sources behind the captured
    /// ids.
    ///
    /// Fails with [`ReactiveError::ResolutionFailure`] when the loader rejects
    /// the symbol or a captured source no longer exists. Failures are not
    /// retried.
    pub fn resolve(&self, runtime: &Runtime) -> BoxFuture<'static, Result<ResolvedClosure, ReactiveError>> {
        let closure = self.clone();
        let loader = runtime.loader();
        let weak = runtime.downgrade();

        async move {
            let loader = loader.ok_or(ReactiveError::MissingLoader)?;
            let func = loader.load(&closure.symbol).await.map_err(|reason| {
                ReactiveError::ResolutionFailure {
                    symbol: closure.symbol.clone(),
                    reason,
                }
            })?;

            let runtime = weak.require()?;
            let captures = Captures::bind(&runtime, &closure.captured).map_err(|missing| {
                ReactiveError::ResolutionFailure {
                    symbol: closure.symbol.clone(),
                    reason: format!("captured source {missing} does not exist"),
                }
            })?;

            tracing::trace!(symbol = %closure.symbol, captured = closure.captured.len(), "resolved");
            Ok(ResolvedClosure {
                symbol: closure.symbol,
                func,
                captures,
            })
        }
        .boxed()
    }

    /// Encode as an attribute value: `symbol` or `symbol[1 2 3]`.
    pub fn to_attr_string(&self) -> String {
        if self.captured.is_empty() {
            return self.symbol.to_string();
        }
        let ids: Vec<String> = self.captured.iter().map(|id| id.raw().to_string()).collect();
        format!("{}[{}]", self.symbol, ids.join(" "))
    }

    pub fn parse_attr(attr: &str) -> Result<Self, ReactiveError> {
        let malformed = |reason: &str| ReactiveError::ResolutionFailure {
            symbol: SymbolId::new(attr),
            reason: reason.to_string(),
        };

        let Some(body) = attr.strip_suffix(']') else {
            if attr.is_empty() {
                return Err(malformed("empty symbol"));
            }
            return Ok(Self::new(attr, []));
        };
        let (symbol, ids) = body
            .rsplit_once('[')
            .ok_or_else(|| malformed("unbalanced capture list"))?;
        if symbol.is_empty() {
            return Err(malformed("empty symbol"));
        }

        let captured = ids
            .split_whitespace()
            .map(|raw| raw.parse::<u64>().map(SourceId::from_raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed("capture ids must be integers"))?;
        Ok(Self::new(symbol, captured))
    }
}

/// The captured sources of a resolved closure, looked up by id on access.
#[derive(Clone)]
pub struct Captures {
    ids: Vec<SourceId>,
    runtime: WeakRuntime,
}

impl Captures {
    /// Returns the first id that does not name a live source.
    pub(crate) fn bind(runtime: &Runtime, ids: &[SourceId]) -> Result<Self, SourceId> {
        if let Some(missing) = ids.iter().find(|id| !runtime.contains_source(**id)) {
            return Err(*missing);
        }
        Ok(Self {
            ids: ids.to_vec(),
            runtime: runtime.downgrade(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[SourceId] {
        &self.ids
    }

    pub fn id(&self, index: usize) -> Result<SourceId, ReactiveError> {
        self.ids
            .get(index)
            .copied()
            .ok_or(ReactiveError::CaptureOutOfRange {
                index,
                len: self.ids.len(),
            })
    }

    pub fn signal<T: SignalValue>(&self, index: usize) -> Result<Signal<T>, ReactiveError> {
        self.runtime.require()?.signal_by_id(self.id(index)?)
    }

    pub fn store(&self, index: usize) -> Result<Store, ReactiveError> {
        self.runtime.require()?.store_by_id(self.id(index)?)
    }
}

impl fmt::Debug for Captures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.ids).finish()
    }
}

/// A loaded function bound to its captures.
#[derive(Clone)]
pub struct ResolvedClosure {
    pub(crate) symbol: SymbolId,
    pub(crate) func: TaskFn,
    pub(crate) captures: Captures,
}

impl ResolvedClosure {
    pub fn symbol(&self) -> &SymbolId {
        &self.symbol
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    /// Call the function once outside any task, as an event handler.
    ///
    /// Reads are untracked. Cleanups registered by the call run as soon as it
    /// returns. A suspended result is awaited.
    pub async fn invoke(&self, runtime: &Runtime) -> Result<(), TaskError> {
        let outcome = {
            let ctx = TaskContext::new(runtime.clone(), None, Some(self.captures.clone()));
            let outcome = runtime.run_tracked(None, || runtime.call_guarded(|| (self.func)(&ctx)));
            run_cleanups(ctx.take_cleanups());
            outcome?
        };

        if let TaskOutcome::Suspended(rest) = outcome {
            rest.await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResolvedClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedClosure")
            .field("symbol", &self.symbol)
            .field("captures", &self.captures)
            .finish()
    }
}

/// Loads the function behind a symbol.
///
/// Loading may be asynchronous. Errors are reported as resolution failures;
/// retrying is up to the loader.
pub trait ClosureLoader: Send + Sync {
    fn load(&self, symbol: &SymbolId) -> BoxFuture<'static, Result<TaskFn, String>>;
}

/// A loader backed by an in-memory symbol table. Loads complete immediately.
#[derive(Default)]
pub struct StaticLoader {
    symbols: DashMap<SymbolId, TaskFn>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, symbol: impl Into<SymbolId>, f: F)
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.symbols.insert(symbol.into(), Arc::new(f));
    }

    /// Builder form of [`StaticLoader::register`].
    pub fn with<F>(self, symbol: impl Into<SymbolId>, f: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.register(symbol, f);
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl ClosureLoader for StaticLoader {
    fn load(&self, symbol: &SymbolId) -> BoxFuture<'static, Result<TaskFn, String>> {
        let found = self.symbols.get(symbol).map(|entry| entry.value().clone());
        let result = found.ok_or_else(|| format!("unknown symbol `{symbol}`"));
        future::ready(result).boxed()
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

// ---- Tests ----
