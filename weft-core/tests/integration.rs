//! Integration Tests for the Reactive UI Runtime
//!
//! These tests drive signals, stores, the scheduler, the container and the
//! snapshot boundary together, through the public API only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use weft_core::graph::TaskFn;
use weft_core::{
    ClosureLoader, ClosureRef, CollectingBoundary, ComponentDef, Container, Eagerness, MemoryTree,
    Mutation, ReactiveError, Runtime, RuntimeConfig, Signal, Snapshot, SourceId, StaticLoader, SymbolId,
    TaskContext, TaskError, TaskOutcome, TaskResult, TaskSpec, TaskState, VNode,
};

/// Route `tracing` output to the test harness. Set `RUST_LOG` to see it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn increment(ctx: &TaskContext) -> TaskResult {
    let captures = ctx
        .captures()
        .ok_or_else(|| TaskError::msg("handler needs captures"))?;
    captures.signal::<i64>(0)?.update(|n| *n += 1);
    Ok(TaskOutcome::Complete)
}

/// Writing the same store value twice yields one text update.
#[test]
fn store_count_renders_one_set_text() {
    let rt = Runtime::new();
    let state = rt.store(json!({ "count": 0 })).unwrap();
    let tree = MemoryTree::new("body");
    let container = Container::new(&rt, tree.clone());

    let s = state.clone();
    let view = ComponentDef::new("Count", move |_| {
        let count: i64 = s.get_as("count")?.unwrap_or_default();
        Ok(VNode::element("p").child(format!("Count: {count}").into()))
    });
    container.render(&VNode::component(&view));
    tree.take_log();

    assert!(state.set("count", 1).unwrap());
    assert!(!state.set("count", 1).unwrap());
    rt.flush();

    let log = tree.take_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(&log[0], Mutation::SetText { text, .. } if text == "Count: 1"));
    assert_eq!(tree.to_html(), "<p>Count: 1</p>");
}

/// Only the consumer that read `label` is scheduled by a write to it.
#[test]
fn sibling_consumers_track_separate_fields() {
    let rt = Runtime::new();
    let store = rt.store(json!({ "count": 0, "label": "a" })).unwrap();
    let (first_runs, second_runs) = (counter(), counter());

    let (s, r) = (store.clone(), first_runs.clone());
    let first = rt.effect(Eagerness::Render, move |_| {
        s.get("count").unwrap();
        r.fetch_add(1, Ordering::SeqCst);
    });
    let (s, r) = (store.clone(), second_runs.clone());
    let second = rt.effect(Eagerness::Render, move |_| {
        s.get("count").unwrap();
        s.get("label").unwrap();
        r.fetch_add(1, Ordering::SeqCst);
    });
    rt.flush();

    store.set("label", "b").unwrap();
    assert_eq!(rt.task_state(first), TaskState::Idle);
    assert_eq!(rt.task_state(second), TaskState::Queued);

    rt.flush();
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 2);
}

/// A key that was never read creates no edge.
#[test]
fn unread_keys_do_not_subscribe() {
    let rt = Runtime::new();
    let store = rt.store(json!({ "a": 1, "b": 2, "items": [1, 2, 3] })).unwrap();
    let runs = counter();

    let (s, r) = (store.clone(), runs.clone());
    let task = rt.effect(Eagerness::Render, move |_| {
        s.get("a").unwrap();
        r.fetch_add(1, Ordering::SeqCst);
    });
    rt.flush();
    assert_eq!(rt.dependencies_of(task).len(), 1);

    store.set("b", 20).unwrap();
    store.set("extra", true).unwrap();
    let items = store.get("items").unwrap().unwrap();
    items.as_store().unwrap().push(4).unwrap();
    rt.flush();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(rt.dependencies_of(task).len(), 1);
}

/// The render tier finishes before the idle tier starts.
#[test]
fn render_task_completes_before_idle_task() {
    let rt = Runtime::new();
    let signal = rt.signal(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let (s, log) = (signal.clone(), order.clone());
    rt.effect(Eagerness::Idle, move |_| {
        s.read();
        log.lock().push("idle");
    });
    let (s, log) = (signal.clone(), order.clone());
    rt.effect(Eagerness::Render, move |_| {
        s.read();
        log.lock().push("render");
    });
    rt.flush();
    order.lock().clear();

    signal.write(1);
    rt.flush();
    assert_eq!(*order.lock(), vec!["render", "idle"]);
}

/// Several writes without a read run subscribers once, on the final value.
#[test]
fn write_coalescing_keeps_final_value() {
    let rt = Runtime::new();
    let signal = rt.signal(0);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (s, log) = (signal.clone(), seen.clone());
    rt.effect(Eagerness::Render, move |_| log.lock().push(s.read()));
    rt.flush();

    for value in 1..=5 {
        signal.write(value);
    }
    rt.flush();

    signal.write(5);
    rt.flush();

    assert_eq!(*seen.lock(), vec![0, 5]);
}

fn list(item: &ComponentDef, keys: &[&str]) -> VNode {
    VNode::element("ul").children(
        keys.iter()
            .map(|key| VNode::component(item).keyed(*key).prop("label", *key)),
    )
}

/// Reordering keyed components moves nodes and keeps component state.
#[test]
fn keyed_reorder_moves_and_preserves_state() {
    init_tracing();
    let rt = Runtime::new();
    let tree = MemoryTree::new("body");
    let container = Container::new(&rt, tree.clone());
    let counters: Arc<Mutex<HashMap<String, Signal<i32>>>> = Arc::default();
    let renders = counter();

    let (registry, r) = (counters.clone(), renders.clone());
    let item = ComponentDef::new("Item", move |scope| {
        r.fetch_add(1, Ordering::SeqCst);
        let label: String = scope.prop("label")?.unwrap_or_default();
        let clicks = scope.use_signal(|| 0);
        registry.lock().insert(label.clone(), clicks.clone());
        Ok(VNode::element("li").child(format!("{label}:{}", clicks.read()).into()))
    });

    container.render(&list(&item, &["A", "B", "C"]));
    let a = counters.lock()["A"].clone();
    a.write(5);
    rt.flush();
    assert_eq!(tree.to_html(), "<ul><li>A:5</li><li>B:0</li><li>C:0</li></ul>");
    let renders_before = renders.load(Ordering::SeqCst);

    let mutations = container.render(&list(&item, &["C", "A", "B"]));

    assert!(!mutations.is_empty());
    assert!(mutations.iter().all(|m| matches!(m, Mutation::MoveChild { .. })));
    assert_eq!(tree.to_html(), "<ul><li>C:0</li><li>A:5</li><li>B:0</li></ul>");
    assert_eq!(renders.load(Ordering::SeqCst), renders_before);
    assert_eq!(container.instance_count(), 3);
    assert_eq!(counters.lock()["A"].id(), a.id());
}

/// Rendering the same tree again changes nothing.
#[test]
fn identical_render_produces_no_mutations() {
    let rt = Runtime::new();
    let container = Container::new(&rt, MemoryTree::new("body"));
    let label = ComponentDef::new("Label", |scope| {
        let text: String = scope.prop("text")?.unwrap_or_default();
        Ok(VNode::text(text))
    });
    let view = || {
        VNode::element("main")
            .attr("class", "app")
            .child(VNode::component(&label).prop("text", "hi"))
            .child(VNode::fragment([VNode::text("a"), VNode::text("b")]))
    };

    assert!(!container.render(&view()).is_empty());
    assert!(container.render(&view()).is_empty());
    assert!(rt.flush().ran.is_empty());
}

/// A parent re-render that changes a child's props does not make the child
/// render twice in one tick.
#[test]
fn parent_renders_before_child() {
    let rt = Runtime::new();
    let tree = MemoryTree::new("body");
    let container = Container::new(&rt, tree.clone());
    let n = rt.signal(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let (sig, log) = (n.clone(), order.clone());
    let child = ComponentDef::new("Child", move |scope| {
        log.lock().push("child");
        let value: i32 = scope.prop("value")?.unwrap_or_default();
        Ok(VNode::text(format!("{value}/{}", sig.read())))
    });
    let (sig, log) = (n.clone(), order.clone());
    let parent = ComponentDef::new("Parent", move |_| {
        log.lock().push("parent");
        Ok(VNode::element("div").child(VNode::component(&child).prop("value", sig.read() * 10)))
    });

    container.render(&VNode::component(&parent));
    order.lock().clear();

    n.write(2);
    rt.flush();

    assert_eq!(*order.lock(), vec!["parent", "child"]);
    assert_eq!(tree.to_html(), "<div>20/2</div>");
}

/// A failing component keeps its last output; siblings still update.
#[test]
fn failing_component_keeps_stale_output() {
    let rt = Runtime::new();
    let boundary = Arc::new(CollectingBoundary::new());
    rt.set_error_boundary(boundary.clone());
    let tree = MemoryTree::new("body");
    let container = Container::new(&rt, tree.clone());
    let n = rt.signal(0);

    let sig = n.clone();
    let fragile = ComponentDef::new("Fragile", move |_| {
        let value = sig.read();
        if value > 0 {
            panic!("cannot render {value}");
        }
        Ok(VNode::element("i").child(value.to_string().into()))
    });
    let sig = n.clone();
    let sturdy = ComponentDef::new("Sturdy", move |_| {
        Ok(VNode::element("b").child(sig.read().to_string().into()))
    });

    container.render(&VNode::fragment([
        VNode::component(&fragile),
        VNode::component(&sturdy),
    ]));
    n.write(1);
    let report = rt.flush();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.ran.len(), 1);
    assert_eq!(tree.to_html(), "<i>0</i><b>1</b>");
    assert!(matches!(
        boundary.take().as_slice(),
        [ReactiveError::TaskExecution { message, .. }] if message.contains("cannot render 1")
    ));
}

/// Reordering keys that repeat falls back to positions and is reported.
#[test]
fn duplicate_keys_are_reported() {
    let rt = Runtime::new();
    let boundary = Arc::new(CollectingBoundary::new());
    rt.set_error_boundary(boundary.clone());
    let tree = MemoryTree::new("body");
    let container = Container::new(&rt, tree.clone());

    container.render(&VNode::element("ul").children([
        VNode::element("li").keyed("x").child("1".into()),
        VNode::element("li").keyed("x").child("2".into()),
    ]));

    assert_eq!(tree.to_html(), "<ul><li>1</li><li>2</li></ul>");
    assert!(matches!(
        boundary.take().as_slice(),
        [ReactiveError::ReconciliationInvariant { key, .. }] if key == "x"
    ));
}

/// State and closures survive a snapshot, and a handler resolved after
/// resume acts on the restored signal.
#[tokio::test]
async fn snapshot_round_trip_resumes_handlers() {
    init_tracing();
    let rt = Runtime::new();
    let count = rt.signal(123_i64);
    let store = rt.store(json!({ "todos": [{ "text": "a" }], "title": "list" })).unwrap();
    let handler = rt.register_closure(ClosureRef::new("increment", [count.id()]));
    rt.set_root("count", count.id());

    let bytes = rt.snapshot().unwrap().to_msgpack().unwrap();
    let resumed = Runtime::resume(Snapshot::from_msgpack(&bytes).unwrap(), RuntimeConfig::default())
        .unwrap();
    resumed.set_loader(Arc::new(StaticLoader::new().with("increment", increment)));

    let restored = resumed
        .signal_by_id::<i64>(resumed.root("count").unwrap())
        .unwrap();
    assert_eq!(restored.read(), 123);
    assert_eq!(
        resumed.store_by_id(store.id()).unwrap().snapshot_value().unwrap(),
        store.snapshot_value().unwrap()
    );

    let closure = resumed.closure_by_id(handler).unwrap();
    resumed.invoke(&closure).await.unwrap();
    assert_eq!(restored.read(), 124);
    resumed.invoke(&closure).await.unwrap();
    assert_eq!(restored.read(), 125);

    // The original runtime is untouched.
    assert_eq!(count.read(), 123);
}

/// Server-rendered markup is hydrated without mutations and becomes
/// interactive on the resumed runtime.
#[tokio::test]
async fn hydrate_resumed_markup_and_dispatch() {
    fn counter_view(count: Signal<i64>) -> ComponentDef {
        ComponentDef::new("Counter", move |_| {
            Ok(VNode::element("button")
                .on("click", ClosureRef::new("increment", [count.id()]))
                .child(count.read().to_string().into()))
        })
    }

    init_tracing();

    // Server side.
    let server = Runtime::new();
    let count = server.signal(123_i64);
    server.set_root("count", count.id());
    let markup = MemoryTree::new("body");
    Container::new(&server, markup.clone()).render(&VNode::component(&counter_view(count)));
    let html = markup.to_html();
    let external = markup.external_tree();
    let json = server.snapshot().unwrap().to_json().unwrap();

    // Client side.
    let client = Runtime::resume(Snapshot::from_json(&json).unwrap(), RuntimeConfig::default()).unwrap();
    client.set_loader(Arc::new(StaticLoader::new().with("increment", increment)));
    let count = client
        .signal_by_id::<i64>(client.root("count").unwrap())
        .unwrap();
    let page = MemoryTree::from_external(&external);
    let container = Container::new(&client, page.clone());

    let mutations = container.hydrate(&VNode::component(&counter_view(count.clone())), &external);
    assert!(mutations.is_empty(), "unexpected mutations: {mutations:?}");
    assert_eq!(page.to_html(), html);

    let button = page.find_element("button").unwrap();
    container.dispatch(button, "click").await.unwrap();
    assert_eq!(count.read_untracked(), 124);
    let log = page.take_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(&log[0], Mutation::SetText { text, .. } if text == "124"));

    container.dispatch(button, "click").await.unwrap();
    assert_eq!(page.text_content(button), "125");
}

/// A click on resumed markup updates a bound text without rendering the
/// component again.
#[tokio::test]
async fn bound_text_updates_after_resume_without_rerender() {
    fn counter_view(count: Signal<i64>, renders: Arc<AtomicUsize>) -> ComponentDef {
        ComponentDef::new("Counter", move |_| {
            renders.fetch_add(1, Ordering::SeqCst);
            Ok(VNode::element("button")
                .on("click", ClosureRef::new("increment", [count.id()]))
                .child(VNode::text_of(&count)))
        })
    }

    init_tracing();

    let server = Runtime::new();
    let count = server.signal(7_i64);
    server.set_root("count", count.id());
    let markup = MemoryTree::new("body");
    Container::new(&server, markup.clone()).render(&VNode::component(&counter_view(count, counter())));
    let external = markup.external_tree();
    let json = server.snapshot().unwrap().to_json().unwrap();

    let client = Runtime::resume(Snapshot::from_json(&json).unwrap(), RuntimeConfig::default()).unwrap();
    client.set_loader(Arc::new(StaticLoader::new().with("increment", increment)));
    let count = client
        .signal_by_id::<i64>(client.root("count").unwrap())
        .unwrap();
    let page = MemoryTree::from_external(&external);
    let container = Container::new(&client, page.clone());
    let renders = counter();

    let view = counter_view(count, renders.clone());
    assert!(container.hydrate(&VNode::component(&view), &external).is_empty());

    let button = page.find_element("button").unwrap();
    container.dispatch(button, "click").await.unwrap();
    container.dispatch(button, "click").await.unwrap();

    assert_eq!(page.text_content(button), "9");
    assert_eq!(renders.load(Ordering::SeqCst), 1);
    let log = page.take_log();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|m| matches!(m, Mutation::SetText { .. })));
}

/// Hydration patches what differs and removes what the render lacks.
#[test]
fn hydration_repairs_mismatches() {
    init_tracing();
    let server = Runtime::new();
    let markup = MemoryTree::new("body");
    Container::new(&server, markup.clone()).render(&VNode::fragment([
        VNode::element("h1").attr("class", "old").child("Title".into()),
        VNode::element("p").child("stale".into()),
        VNode::element("footer"),
    ]));
    let external = markup.external_tree();

    let client = Runtime::new();
    let page = MemoryTree::from_external(&external);
    let container = Container::new(&client, page.clone());
    let mutations = container.hydrate(
        &VNode::fragment([
            VNode::element("h1").attr("class", "new").child("Title".into()),
            VNode::element("p").child("fresh".into()),
        ]),
        &external,
    );

    assert_eq!(mutations.len(), 3);
    assert_eq!(page.to_html(), "<h1 class=\"new\">Title</h1><p>fresh</p>");
}

/// A loader that takes a while to produce each symbol.
struct SlowLoader {
    inner: StaticLoader,
    loads: Arc<AtomicUsize>,
}

impl ClosureLoader for SlowLoader {
    fn load(&self, symbol: &SymbolId) -> BoxFuture<'static, Result<TaskFn, String>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let loaded = self.inner.load(symbol);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            loaded.await
        }
        .boxed()
    }
}

/// A lazy task waits for its body, runs once, and reruns without reloading.
#[tokio::test]
async fn lazy_task_resolves_through_async_loader() {
    init_tracing();
    let rt = Runtime::new();
    let count = rt.signal(0_i64);
    let loads = counter();
    let runs = counter();

    let r = runs.clone();
    rt.set_loader(Arc::new(SlowLoader {
        inner: StaticLoader::new().with("watch", move |ctx: &TaskContext| -> TaskResult {
            let captures = ctx.captures().ok_or_else(|| TaskError::msg("no captures"))?;
            captures.signal::<i64>(0)?.read();
            r.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::Complete)
        }),
        loads: loads.clone(),
    }));

    let task = rt.spawn_lazy(
        TaskSpec::effect(Eagerness::Render),
        ClosureRef::new("watch", [count.id()]),
    );
    let first = rt.flush();
    assert_eq!(first.suspended, vec![task]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    rt.settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(rt.task_state(task), TaskState::Idle);

    count.write(1);
    rt.settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

/// An unknown symbol fails the task without running it.
#[tokio::test]
async fn unknown_symbol_is_a_resolution_failure() {
    let rt = Runtime::new();
    let boundary = Arc::new(CollectingBoundary::new());
    rt.set_error_boundary(boundary.clone());
    rt.set_loader(Arc::new(StaticLoader::new()));

    let task = rt.spawn_lazy(TaskSpec::effect(Eagerness::Render), ClosureRef::new("missing", Vec::<SourceId>::new()));
    let report = rt.settle().await;

    assert_eq!(report.failed, vec![task]);
    assert_eq!(rt.task_state(task), TaskState::Idle);
    assert!(matches!(
        boundary.take().as_slice(),
        [ReactiveError::ResolutionFailure { .. }]
    ));
}

/// Component-owned tasks are disposed with the component.
#[test]
fn unmounting_disposes_component_tasks() {
    let rt = Runtime::new();
    let container = Container::new(&rt, MemoryTree::new("body"));
    let n = rt.signal(0);
    let runs = counter();

    let (sig, r) = (n.clone(), runs.clone());
    let view = ComponentDef::new("Watcher", move |scope| {
        let (sig, r) = (sig.clone(), r.clone());
        scope.use_task(Eagerness::Render, move |_| {
            sig.read();
            r.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::Complete)
        });
        Ok(VNode::element("span"))
    });

    container.render(&VNode::component(&view));
    rt.flush();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    container.unmount();
    n.write(1);
    rt.flush();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(n.subscriber_count(), 0);
}
