use thiserror::Error;

/// Instruction model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsaError {
    #[error("line {line}: `{insn}` is already marked as a call, cannot mark it as a jump")]
    AlreadyForcedCall { line: usize, insn: String },
    #[error("line {line}: `{insn}` is already marked as a jump, cannot mark it as a call")]
    AlreadySuppressedCall { line: usize, insn: String },
}

/// Failure reported by a size oracle backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("size oracle failed for `{insn}`: {reason}")]
pub struct OracleError {
    pub insn: String,
    pub reason: String,
}

impl OracleError {
    pub fn new(insn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            insn: insn.into(),
            reason: reason.into(),
        }
    }
}

/// Cost model errors. Both variants are fatal for an analysis run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CostError {
    #[error("unknown cycle count for `{operator}` ({size}-byte encoding) at line {line}")]
    UnknownCycles {
        operator: String,
        size: u32,
        line: usize,
    },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}
