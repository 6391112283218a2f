//! # Weave
//!
//! A composition and orchestration runtime for typed graph pipelines.
//! Nodes are type-erased [`runnable::Runnable`]s connected by
//! field-mapped, statically type-checked edges; a compiled graph runs
//! under either a [`runner::dag`] (each node at most once) or
//! [`runner::pregel`] (lockstep supersteps, cycles expected) discipline.
//!
//! ## Design principles
//!
//! - **One execution core, four adaptation modes**: every node exposes
//!   `invoke`/`stream`/`collect`/`transform`; calling one that doesn't
//!   match a runnable's native shape adapts through the others rather
//!   than requiring four separate implementations ([`value::Envelope`],
//!   [`runnable::Runnable`]).
//! - **JSON at the seams, types in the middle**: node bodies are plain
//!   typed Rust; field mapping and checkpoint persistence cross through
//!   `serde_json::Value` at the graph boundary, since Rust has no runtime
//!   reflection over arbitrary structs ([`graph::edge`]).
//! - **Type errors at compile-the-graph time, not run time**: whole-to-whole
//!   edges are checked when added; only keyed/path mappings defer to a
//!   runtime failure ([`graph::builder::GraphBuilder::add_edge`]).
//! - **Interrupts suspend, they do not fail**: a node raising
//!   [`interrupt::raise`] is checkpointed and the run halts cleanly,
//!   resumable later from the same checkpoint id ([`checkpoint`]).
//!
//! ## Main modules
//!
//! - [`stream`], [`value`]: [`stream::Stream`], [`value::Envelope`] — the
//!   value/stream duality every node input and output is wrapped in.
//! - [`runnable`]: [`runnable::Runnable`], [`runnable::ErasedRunnable`] —
//!   the four-method node contract and its type-erased form.
//! - [`graph`]: [`graph::GraphBuilder`], [`graph::CompiledGraph`],
//!   [`graph::FieldMapping`], [`graph::BranchFn`] — build and compile graphs.
//! - [`channel`]: per-node delivery aggregation and fan-in composition.
//! - [`task_manager`]: shared node execution and output routing used by
//!   both runners.
//! - [`runner`]: [`runner::dag`], [`runner::pregel`] — the two execution
//!   disciplines, dispatched by [`graph::ExecutionMode`].
//! - [`context`]: [`context::RunContext`] — cancellation, callbacks,
//!   shared state, checkpoint store, interrupt handler.
//! - [`state`]: [`state::StateManager`] — the sole `process_state` access
//!   path to a run's shared user state.
//! - [`handler`]: [`handler::Handler`] — pre/post node wrappers with
//!   synchronous state access.
//! - [`callback`]: [`callback::Callback`], [`callback::CallbackChain`] —
//!   `OnStart`/`OnEnd`/`OnError` and their streaming variants.
//! - [`concat`]: [`concat::ConcatRegistry`] — the stream→value merge
//!   contract for chunked types.
//! - [`checkpoint`]: [`checkpoint::Checkpoint`], [`checkpoint::CheckpointStore`] —
//!   suspend/resume persistence.
//! - [`interrupt`]: [`interrupt::raise`], [`interrupt::InterruptHandler`] —
//!   human-in-the-loop suspension.
//! - [`config`]: [`config::RunOptions`] — per-call run options.
//! - [`error`]: [`error::WeaveError`] — the crate-wide error type.
//! - [`logging`]: structured `tracing` call sites used across the above.

pub mod callback;
pub mod channel;
pub mod checkpoint;
pub mod concat;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod handler;
pub mod interrupt;
pub mod logging;
pub mod runnable;
pub mod runner;
pub mod state;
pub mod stream;
pub mod task_manager;
pub mod value;

pub use error::WeaveError;
