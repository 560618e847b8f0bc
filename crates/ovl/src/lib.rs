//! ovl - Thumb-2 RAM overlay placement
//!
//! Reconstructs control flow from compiler-generated assembler, estimates
//! how often each basic block runs, asks a solver which blocks to relocate
//! to a RAM overlay, and rewrites the assembler so control transfers across
//! the RAM/flash boundary still reach their targets.
//!
//! # Example
//!
//! ```ignore
//! use ovl::{OverlayConfig, Pipeline};
//!
//! let mut pipeline = Pipeline::new(OverlayConfig::default());
//! pipeline.load(&["main.s".into()])?;
//! pipeline.build()?;
//! pipeline.estimate_iterations();
//! pipeline.place_forced();
//! Pipeline::write_outputs(&pipeline.transform()?)?;
//! ```

// Re-export from sub-crates
pub use ovl_cfg::{
    BasicBlock, BlockId, BlockRef, CallEdge, CallGraph, CfgError, ControlFlowGraph, LoopLinks,
    Placement,
};
pub use ovl_emit::{
    BlockLocation, Decision, EditList, OverlayConfig, PlacementError, PlacementProblem,
    TransformError, TransformStats,
};
pub use ovl_isa::{Cost, CostError, Instruction, OracleError, SizeOracle, SourceUnit, THUMB2};
pub use ovl_size::{AssemblerOracle, CachedOracle, SizeCache, SizeError};

mod error;
mod pipeline;
mod solver;

pub use error::*;
pub use pipeline::*;
pub use solver::*;
