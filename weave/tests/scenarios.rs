//! End-to-end scenarios and cross-cutting runtime invariants, exercised
//! entirely through the crate's public API the way the teacher's own
//! `compiled.rs` test module drives `CompiledStateGraph` end to end
//! rather than poking at internals.
//!
//! The first block covers representative graph shapes (linear, diamond
//! fan-in, branch, streamed transform, Pregel cycle, interrupt/resume —
//! the last of those also covers checkpoint round-tripping). The second
//! block isolates one runtime guarantee per test: determinism, type
//! soundness at build time, invoke/stream adaptation equivalence, stream
//! order preservation, `process_state` total ordering, fan-in
//! completeness, branch soundness, and merge fairness.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use weave::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use weave::context::RunContext;
use weave::error::WeaveError;
use weave::graph::{CompileOptions, EdgeKind, ExecutionMode, FieldMapping, GraphBuilder, NodeSpec, TriggerMode, END, START};
use weave::interrupt::{raise, Interrupt, InterruptHandler};
use weave::runnable::{ErasedRunnable, Runnable};
use weave::stream::Stream;
use weave::value::Envelope;
use weave::config::RunOptions;

fn passthrough_i32() -> Arc<dyn ErasedRunnable<()>> {
    Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, i| async move { Ok(i) }))
}

// Two-stage linear: upper then reverse.
#[tokio::test]
async fn linear_two_stage_uppercases_then_reverses() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node(
        "upper",
        NodeSpec::new(Arc::new(Runnable::<(), String, String>::from_invoke(|_ctx, s: String| async move {
            Ok(s.to_uppercase())
        }))),
    )
    .unwrap();
    b.add_node(
        "reverse",
        NodeSpec::new(Arc::new(Runnable::<(), String, String>::from_invoke(|_ctx, s: String| async move {
            Ok(s.chars().rev().collect::<String>())
        }))),
    )
    .unwrap();
    b.add_edge(START, "upper", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("upper", "reverse", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("reverse", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let ctx = RunContext::new("s1", ());
    let out = graph
        .invoke(ctx, Envelope::from_value("hello".to_string()), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(out.as_value::<String>().unwrap(), "OLLEH");
}

#[derive(Clone, Serialize, Deserialize)]
struct Sum {
    a: i32,
    b: i32,
}

fn diamond_graph() -> weave::graph::CompiledGraph<()> {
    let mut b = GraphBuilder::<()>::new();
    b.add_node(
        "even",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, x: i32| async move { Ok(x * 2) }))),
    )
    .unwrap();
    b.add_node(
        "odd",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, x: i32| async move {
            Ok(x * 2 + 1)
        }))),
    )
    .unwrap();
    b.add_node(
        "sum",
        NodeSpec::new(Arc::new(Runnable::<(), Sum, i32>::from_invoke(|_ctx, s: Sum| async move { Ok(s.a + s.b) })))
            .with_trigger(TriggerMode::AllPredecessors),
    )
    .unwrap();
    b.add_edge(START, "even", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge(START, "odd", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("even", "sum", EdgeKind::both(), vec![FieldMapping::keyed("", "a")]).unwrap();
    b.add_edge("odd", "sum", EdgeKind::both(), vec![FieldMapping::keyed("", "b")]).unwrap();
    b.add_edge("sum", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.compile(CompileOptions::default()).unwrap()
}

// Diamond with fan-in.
#[tokio::test]
async fn diamond_fan_in_sums_both_branches() {
    let graph = diamond_graph();
    let ctx = RunContext::new("s2", ());
    let out = graph
        .invoke(ctx, Envelope::from_value(3i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(out.as_value::<i32>().unwrap(), 13);
}

// Branch by predicate.
#[tokio::test]
async fn branch_by_predicate_routes_to_declared_target() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("classify", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node(
        "high",
        NodeSpec::new(Arc::new(Runnable::<(), i32, String>::from_invoke(|_ctx, _x: i32| async move {
            Ok("big".to_string())
        }))),
    )
    .unwrap();
    b.add_node(
        "low",
        NodeSpec::new(Arc::new(Runnable::<(), i32, String>::from_invoke(|_ctx, _x: i32| async move {
            Ok("small".to_string())
        }))),
    )
    .unwrap();
    b.add_edge(START, "classify", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("classify", "high", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("classify", "low", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("high", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("low", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let allowed: HashSet<String> = ["high".to_string(), "low".to_string()].into_iter().collect();
    b.add_branch(
        "classify",
        allowed,
        Arc::new(|env: &Envelope| {
            let v = env.as_value::<i32>().unwrap();
            let target = if v >= 10 { "high" } else { "low" };
            [target.to_string()].into_iter().collect()
        }),
    )
    .unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let high_out = graph
        .invoke(RunContext::new("s3-high", ()), Envelope::from_value(15i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(high_out.as_value::<String>().unwrap(), "big");

    let low_out = graph
        .invoke(RunContext::new("s3-low", ()), Envelope::from_value(2i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(low_out.as_value::<String>().unwrap(), "small");
}

fn counting_source(values: Vec<i32>) -> Arc<dyn ErasedRunnable<()>> {
    Arc::new(Runnable::<(), (), i32>::from_stream(move |_ctx, _unit| {
        let values = values.clone();
        async move {
            let (tx, rx) = Stream::<i32>::channel();
            tokio::spawn(async move {
                for v in values {
                    tx.send(v).await;
                }
            });
            Ok(rx)
        }
    }))
}

fn elementwise_transform(f: fn(i32) -> i32) -> Arc<dyn ErasedRunnable<()>> {
    Arc::new(Runnable::<(), i32, i32>::from_transform(move |_ctx, mut input| async move {
        let (tx, out) = Stream::<i32>::channel();
        tokio::spawn(async move {
            loop {
                match input.next().await {
                    weave::stream::Next::Value(v) => {
                        tx.send(f(v)).await;
                    }
                    _ => break,
                }
            }
        });
        Ok(out)
    }))
}

// Streamed transform.
#[tokio::test]
async fn streamed_transform_doubles_each_element() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("source", NodeSpec::new(counting_source(vec![1, 2, 3]))).unwrap();
    b.add_node("double", NodeSpec::new(elementwise_transform(|x| x * 2))).unwrap();
    b.add_edge(START, "source", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("source", "double", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("double", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let ctx = RunContext::new("s4", ());
    let out = graph.stream(ctx, Envelope::from_value(()), RunOptions::default()).await.unwrap();
    let values = out.into_stream::<i32>().unwrap().drain().await.unwrap();
    assert_eq!(values, vec![2, 4, 6]);
}

// Pregel with cycle and bound.
#[tokio::test]
async fn pregel_cycle_terminates_within_bound() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node(
        "inc",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, x: i32| async move { Ok(x + 1) }))),
    )
    .unwrap();
    b.add_edge(START, "inc", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("inc", "inc", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("inc", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let allowed: HashSet<String> = ["inc".to_string(), END.to_string()].into_iter().collect();
    b.add_branch(
        "inc",
        allowed,
        Arc::new(|env: &Envelope| {
            let v = env.as_value::<i32>().unwrap();
            let target = if v < 3 { "inc" } else { END };
            [target.to_string()].into_iter().collect()
        }),
    )
    .unwrap();
    let graph = b
        .compile(CompileOptions {
            mode: ExecutionMode::Pregel,
            step_limit: 10,
        })
        .unwrap();

    let ctx = RunContext::new("s5", ());
    let out = graph
        .invoke(ctx, Envelope::from_value(0i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(out.as_value::<i32>().unwrap(), 3);
}

struct EchoInterruptHandler;

impl InterruptHandler for EchoInterruptHandler {
    fn resolve(&self, _node: &str, interrupt: &Interrupt) -> Result<serde_json::Value, WeaveError> {
        Ok(interrupt.value.clone())
    }
}

fn interrupt_resume_graph(raise_flag: Arc<AtomicBool>) -> weave::graph::CompiledGraph<()> {
    let mut b = GraphBuilder::<()>::new();
    b.add_node(
        "stepA",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, x: i32| async move { Ok(x + 1) }))),
    )
    .unwrap();
    b.add_node(
        "stepB",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(move |_ctx, x: i32| {
            let raise_flag = raise_flag.clone();
            async move {
                if raise_flag.load(Ordering::SeqCst) {
                    Err(raise(serde_json::json!(x)))
                } else {
                    Ok(x * 10)
                }
            }
        }))),
    )
    .unwrap();
    b.add_edge(START, "stepA", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("stepA", "stepB", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("stepB", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.compile(CompileOptions::default()).unwrap()
}

// Interrupt/resume, also exercising checkpoint round-tripping.
#[tokio::test]
async fn interrupt_then_resume_matches_uninterrupted_run() {
    let uninterrupted = interrupt_resume_graph(Arc::new(AtomicBool::new(false)));
    let reference = uninterrupted
        .invoke(RunContext::new("reference", ()), Envelope::from_value(5i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(reference.as_value::<i32>().unwrap(), 60);

    let raise_flag = Arc::new(AtomicBool::new(true));
    let graph = interrupt_resume_graph(raise_flag.clone());
    let store = MemoryCheckpointStore::<()>::new();

    let ctx1 = RunContext::new("run1", ()).with_checkpoint_store(store.clone());
    let options1 = RunOptions::default().with_write_to_checkpoint_id("c1");
    let err = graph
        .invoke(ctx1, Envelope::from_value(5i32), options1)
        .await
        .unwrap_err();
    assert!(matches!(err, WeaveError::Interrupted(_)));

    let checkpoint = store.get("c1").await.unwrap();
    assert!(checkpoint.pending_nodes.contains(&"stepB".to_string()));

    raise_flag.store(false, Ordering::SeqCst);
    let ctx2 = RunContext::new("run1", ())
        .with_checkpoint_store(store.clone())
        .with_interrupt_handler(Arc::new(EchoInterruptHandler));
    let options2 = RunOptions::default().with_checkpoint_id("c1");
    let out = graph
        .invoke(ctx2, Envelope::from_value(0i32), options2)
        .await
        .unwrap();
    assert_eq!(out.as_value::<i32>().unwrap(), 60);
}

// Determinism of value-only DAGs.
#[tokio::test]
async fn determinism_of_value_only_dags() {
    let graph = diamond_graph();
    let out1 = graph
        .invoke(RunContext::new("d1", ()), Envelope::from_value(3i32), RunOptions::default())
        .await
        .unwrap();
    let out2 = graph
        .invoke(RunContext::new("d2", ()), Envelope::from_value(3i32), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(out1.as_value::<i32>().unwrap(), out2.as_value::<i32>().unwrap());
}

// Type soundness is enforced at add_edge time for whole-to-whole edges.
#[test]
fn type_mismatch_is_a_build_error_not_a_runtime_one() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("a", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node(
        "b",
        NodeSpec::new(Arc::new(Runnable::<(), String, String>::from_invoke(|_ctx, s| async move { Ok(s) }))),
    )
    .unwrap();
    let err = b
        .add_edge("a", "b", EdgeKind::both(), vec![FieldMapping::whole()])
        .unwrap_err();
    assert!(matches!(err, WeaveError::TypeMismatch { .. }));
}

// Adaptation equivalence: an invoke-only node's graph-level `stream`
// yields a single element equal to its `invoke` output.
#[tokio::test]
async fn stream_of_an_invoke_only_node_matches_its_invoke_output() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node(
        "triple",
        NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, x: i32| async move { Ok(x * 3) }))),
    )
    .unwrap();
    b.add_edge(START, "triple", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("triple", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let invoked = graph
        .invoke(RunContext::new("inv3-invoke", ()), Envelope::from_value(7i32), RunOptions::default())
        .await
        .unwrap();
    let streamed = graph
        .stream(RunContext::new("inv3-stream", ()), Envelope::from_value(7i32), RunOptions::default())
        .await
        .unwrap();
    let elements = streamed.into_stream::<i32>().unwrap().drain().await.unwrap();
    assert_eq!(elements, vec![invoked.as_value::<i32>().unwrap()]);
}

// Stream preservation through a multi-stage transform chain.
#[tokio::test]
async fn element_order_survives_a_multi_stage_transform_chain() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("source", NodeSpec::new(counting_source(vec![1, 2, 3]))).unwrap();
    b.add_node("add_one", NodeSpec::new(elementwise_transform(|x| x + 1))).unwrap();
    b.add_node("double", NodeSpec::new(elementwise_transform(|x| x * 2))).unwrap();
    b.add_edge(START, "source", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("source", "add_one", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("add_one", "double", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("double", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let out = graph
        .stream(RunContext::new("inv4", ()), Envelope::from_value(()), RunOptions::default())
        .await
        .unwrap();
    let values = out.into_stream::<i32>().unwrap().drain().await.unwrap();
    assert_eq!(values, vec![4, 6, 8]);
}

// process_state calls are totally ordered; two node bodies mutating
// shared state never lose an update.
#[tokio::test]
async fn process_state_calls_are_totally_ordered() {
    let mut b = GraphBuilder::<i32>::new();
    b.add_node(
        "even",
        NodeSpec::new(Arc::new(Runnable::<i32, i32, i32>::from_invoke(|ctx, x: i32| async move {
            ctx.state.process_state(|s| *s += 1).await;
            Ok(x * 2)
        }))),
    )
    .unwrap();
    b.add_node(
        "odd",
        NodeSpec::new(Arc::new(Runnable::<i32, i32, i32>::from_invoke(|ctx, x: i32| async move {
            ctx.state.process_state(|s| *s += 1).await;
            Ok(x * 2 + 1)
        }))),
    )
    .unwrap();
    b.add_node(
        "sum",
        NodeSpec::new(Arc::new(Runnable::<i32, Sum, i32>::from_invoke(|_ctx, s: Sum| async move { Ok(s.a + s.b) }))),
    )
    .unwrap();
    b.add_edge(START, "even", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge(START, "odd", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("even", "sum", EdgeKind::both(), vec![FieldMapping::keyed("", "a")]).unwrap();
    b.add_edge("odd", "sum", EdgeKind::both(), vec![FieldMapping::keyed("", "b")]).unwrap();
    b.add_edge("sum", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let ctx = RunContext::new("inv5", 0i32);
    let probe = ctx.state.clone();
    let out = graph.invoke(ctx, Envelope::from_value(3i32), RunOptions::default()).await.unwrap();
    assert_eq!(out.as_value::<i32>().unwrap(), 13);
    assert_eq!(probe.snapshot().await, 2);
}

// Fan-in completeness: an AllPredecessors node never fires while a
// declared predecessor has delivered nothing at all (not even a skip),
// so a run that strands such a node errors rather than silently
// producing a partial result.
#[tokio::test]
async fn all_predecessors_node_never_fires_on_a_stranded_predecessor() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("router", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node("even_only", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node("odd_only", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node(
        "join",
        NodeSpec::new(Arc::new(Runnable::<(), Sum, i32>::from_invoke(|_ctx, s: Sum| async move { Ok(s.a + s.b) })))
            .with_trigger(TriggerMode::AllPredecessors),
    )
    .unwrap();
    b.add_edge(START, "router", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("router", "even_only", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("router", "odd_only", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("even_only", "join", EdgeKind::both(), vec![FieldMapping::keyed("", "a")]).unwrap();
    b.add_edge("odd_only", "join", EdgeKind::both(), vec![FieldMapping::keyed("", "b")]).unwrap();
    b.add_edge("join", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let allowed: HashSet<String> = ["even_only".to_string(), "odd_only".to_string()].into_iter().collect();
    b.add_branch(
        "router",
        allowed,
        Arc::new(|_env: &Envelope| ["even_only".to_string()].into_iter().collect()),
    )
    .unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let err = graph
        .invoke(RunContext::new("inv7", ()), Envelope::from_value(3i32), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WeaveError::Build(_)));
}

// Branch soundness: a condition that selects a target outside its
// declared set is a fatal run error, never a silent misroute.
#[tokio::test]
async fn branch_never_routes_outside_its_declared_set() {
    let mut b = GraphBuilder::<()>::new();
    b.add_node("router", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_node("only_target", NodeSpec::new(passthrough_i32())).unwrap();
    b.add_edge(START, "router", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("router", "only_target", EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    b.add_edge("only_target", END, EdgeKind::both(), vec![FieldMapping::whole()]).unwrap();
    let allowed: HashSet<String> = ["only_target".to_string()].into_iter().collect();
    b.add_branch("router", allowed, Arc::new(|_env: &Envelope| ["nowhere".to_string()].into_iter().collect()))
        .unwrap();
    let graph = b.compile(CompileOptions::default()).unwrap();

    let err = graph
        .invoke(RunContext::new("inv8", ()), Envelope::from_value(1i32), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WeaveError::UndeclaredBranchTarget { .. }));
}

// Merge fairness: every element from both inputs survives the merge even
// when one produces far more than the other.
#[tokio::test]
async fn merge_drains_every_element_from_both_inputs() {
    let (tx1, rx1) = Stream::<i32>::channel();
    let (tx2, rx2) = Stream::<i32>::channel();
    for v in 0..10 {
        tx1.send(v).await;
    }
    tx2.send(100).await;
    drop(tx1);
    drop(tx2);

    let merged = Stream::merge(vec![rx1, rx2]);
    let mut values = merged.drain().await.unwrap();
    values.sort();
    let mut expected: Vec<i32> = (0..10).collect();
    expected.push(100);
    expected.sort();
    assert_eq!(values, expected);
}
