//! Control flow graph reconstruction for compiler-generated Thumb-2
//! assembler.
//!
//! A source unit is turned into one graph of basic blocks by following
//! branch and call targets from the known routine entries
//! ([`build_unit`]). The graph is then split into weakly connected
//! routines ([`partition`]), loops are found with a DFS loop-header pass
//! ([`ControlFlowGraph::analyze_loops`]), and per-block execution counts are
//! estimated over the call graph ([`estimate_iterations`]).

mod block;
mod builder;
mod callgraph;
mod error;
mod graph;
mod iterations;
mod loops;
mod partition;

pub use block::*;
pub use builder::*;
pub use callgraph::*;
pub use error::*;
pub use graph::*;
pub use iterations::*;
pub use partition::*;
