//! Instruction size oracle backends.
//!
//! [`AssemblerOracle`] sizes an instruction by assembling it with the GNU
//! ARM toolchain. [`SizeCache`] persists results across runs and
//! [`CachedOracle`] puts the two together.

mod assembler;
mod cache;
mod error;

pub use assembler::*;
pub use cache::*;
pub use error::*;
