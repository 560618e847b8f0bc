//! Overlay placement problem export and boundary instrumentation.
//!
//! [`PlacementProblem`] turns annotated control flow graphs into a GLPK
//! data section, and [`Decision`] reads the solver's answer back onto the
//! graphs. [`transform_unit`] then rewrites each source unit so that every
//! control transfer crossing the RAM/flash boundary goes through a register.
//! All rewriting is collected in an [`EditList`] and applied in one pass.

mod config;
mod edits;
mod error;
mod placement;
mod transform;

pub use config::*;
pub use edits::*;
pub use error::*;
pub use placement::*;
pub use transform::*;
