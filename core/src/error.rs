use std::path::PathBuf;
use thiserror::Error;

/// Errors shared by every crate in the toolkit.
///
/// Numerical degeneracy during registration is deliberately absent: it is
/// reported through the diagnostics of a `RegistrationResult` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported registration method: {0}")]
    UnsupportedMethod(String),

    #[error("Resource error for {}: {reason}", path.display())]
    Resource { path: PathBuf, reason: String },

    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(String),

    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Resource error tagged with the offending path or identifier.
    pub fn resource(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Resource {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
