//! Thumb-2 instruction semantics for overlay placement.
//!
//! This crate classifies decoded assembler lines into the predicates that
//! control flow reconstruction and cost modelling depend on. Instruction
//! sets are described by tables ([`InstructionSet`]) rather than by types;
//! [`THUMB2`] is the Cortex-M3 table.

mod condition;
mod cost;
mod error;
mod instruction;
mod parse;
mod table;

pub use condition::*;
pub use cost::*;
pub use error::*;
pub use instruction::*;
pub use parse::*;
pub use table::*;
