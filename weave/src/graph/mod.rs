//! Graph IR: nodes, edges, branches, and the builder that assembles them
//! into a [`CompiledGraph`].

pub mod branch;
pub mod builder;
pub mod edge;
pub mod node;

pub use branch::{BranchFn};
pub use builder::{CompileOptions, CompiledGraph, ExecutionMode, GraphBuilder, END, START};
pub use edge::{EdgeKind, FieldMapping, PathSpec, Transformer};
pub use node::{NodeSpec, SubgraphCompileOpts, TriggerMode};
