use ovl_isa::CostError;
use thiserror::Error;

/// Boundary instrumentation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{unit}:{line}: cannot instrument `{insn}`: {reason}")]
    Uninstrumentable {
        unit: String,
        line: usize,
        insn: String,
        reason: &'static str,
    },
}

/// Placement problem export and decision import errors.
#[derive(Error, Debug)]
pub enum PlacementError {
    #[error(transparent)]
    Cost(#[from] CostError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid block location `{0}`, expected unit:line")]
    Location(String),
    #[error("malformed placement decision line {line}: `{text}`")]
    Decision { line: usize, text: String },
}
