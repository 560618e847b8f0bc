use ovl_isa::IsaError;
use thiserror::Error;

/// CFG construction and annotation errors.
#[derive(Error, Debug)]
pub enum CfgError {
    #[error(transparent)]
    Isa(#[from] IsaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed profile line {line}: `{text}`")]
    Profile { line: usize, text: String },
}

pub type Result<T> = std::result::Result<T, CfgError>;
