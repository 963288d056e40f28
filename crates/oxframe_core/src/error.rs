use std::path::PathBuf;

use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

/// Failures raised while loading or calling into a sandboxed config module.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A JavaScript value was thrown and nothing caught it.
    #[error("uncaught {0}")]
    Thrown(String),

    /// The module uses syntax outside the subset the sandbox interprets.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A branch depends on a value from outside the sandbox.
    #[error("cannot branch on unresolved value {0}")]
    UnresolvedCondition(String),

    #[error("top-level await on a promise that has not settled")]
    TopLevelAwait,

    #[error("maximum call depth of {0} exceeded")]
    CallDepthExceeded(usize),
}

impl EvalError {
    pub(crate) fn unsupported(construct: impl Into<String>) -> Self {
        EvalError::Unsupported(construct.into())
    }
}
