use thiserror::Error;

/// Size oracle backend errors.
#[derive(Error, Debug)]
pub enum SizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt size cache: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to lock size cache: {0}")]
    Lock(nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, SizeError>;
