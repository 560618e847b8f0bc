use thiserror::Error;

/// Overlay placement errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("CFG error: {0}")]
    Cfg(#[from] ovl_cfg::CfgError),
    #[error("cost error: {0}")]
    Cost(#[from] ovl_isa::CostError),
    #[error("size oracle error: {0}")]
    Size(#[from] ovl_size::SizeError),
    #[error("placement error: {0}")]
    Placement(#[from] ovl_emit::PlacementError),
    #[error("{0}")]
    Transform(#[from] ovl_emit::TransformError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver failed: {0}")]
    Solver(String),
    #[error("no source units loaded")]
    NoUnits,
}

pub type Result<T> = std::result::Result<T, Error>;
