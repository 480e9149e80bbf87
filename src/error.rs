use std::path::PathBuf;

use thiserror::Error;

/// Every fallible operation in this crate returns this error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    BareIo(#[from] std::io::Error),

    #[error("index {index} out of range (bound {bound})")]
    OutOfRange { index: u64, bound: u64 },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("no free block available, store is full")]
    OutOfSpace,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("requested size {requested} is below the minimum of {minimum}")]
    SizeTooSmall { requested: u64, minimum: u64 },

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn out_of_range(index: u64, bound: u64) -> Self {
        Error::OutOfRange { index, bound }
    }
}
