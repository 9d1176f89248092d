//! Error types shared across the simulator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed scenario file {path} (line {line}, column {column}): {message}")]
    ScenarioParse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },
    #[error("scenario check failed: {0}")]
    ScenarioCheck(String),
    #[error("arithmetic overflow: {0}")]
    Overflow(String),
    #[error("no following elements")]
    IteratorOverflow,
    #[error("no preceding elements")]
    IteratorUnderflow,
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
