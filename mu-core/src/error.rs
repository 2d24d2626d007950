//! Error types for the Mu runtime

use thiserror::Error;

use crate::diagnostic::{CompileFailure, LoadFailure};
use crate::id::MuId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Duplicate identifier: {0} is already defined")]
    DuplicateId(MuId),

    #[error("Unknown identifier: {0} was not issued by this runtime")]
    UnknownId(MuId),

    #[error("Duplicate name in bundle: {name} is already reserved for {existing}")]
    DuplicateName { name: String, existing: MuId },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Identifier space exhausted")]
    IdSpaceExhausted,

    #[error("Bundle rejected: {0}")]
    Load(LoadFailure),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Compilation failed for {} function version(s): {}", .0.len(), CompileFailure::summary(.0))]
    Compile(Vec<CompileFailure>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
