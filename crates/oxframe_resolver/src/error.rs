use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use oxframe_core::EvalError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolutionError>;

/// Why a config file could not be resolved to build metadata.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("{}: export is {found}, expected an object or a function", .path.display())]
    UnsupportedExportKind { path: PathBuf, found: String },

    #[error("{}: could not load config module: {source}", .path.display())]
    ModuleLoadError {
        path: PathBuf,
        #[source]
        source: EvalError,
    },

    #[error("{}: config function failed: {source}", .path.display())]
    InvocationError {
        path: PathBuf,
        #[source]
        source: EvalError,
    },

    #[error("{}: config did not resolve within {}ms", .path.display(), .timeout.as_millis())]
    ConfigResolutionTimeout { path: PathBuf, timeout: Duration },

    #[error("{}: config resolution failed: {message}", .path.display())]
    ConfigResolutionError { path: PathBuf, message: String },

    #[error("{}: `{key}` must be {expected}, found {found}", .path.display())]
    InvalidFieldType { path: PathBuf, key: String, expected: &'static str, found: String },

    #[error("{}: not a recognised framework config file", .path.display())]
    UnrecognizedConfigFile { path: PathBuf },

    #[error("{}: base config must be an object, found {found}", .path.display())]
    InvalidBaseConfig { path: PathBuf, found: String },
}

impl ResolutionError {
    /// Stable tag for machine readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::UnsupportedExportKind { .. } => "unsupported_export_kind",
            ResolutionError::ModuleLoadError { .. } => "module_load_error",
            ResolutionError::InvocationError { .. } => "invocation_error",
            ResolutionError::ConfigResolutionTimeout { .. } => "config_resolution_timeout",
            ResolutionError::ConfigResolutionError { .. } => "config_resolution_error",
            ResolutionError::InvalidFieldType { .. } => "invalid_field_type",
            ResolutionError::UnrecognizedConfigFile { .. } => "unrecognized_config_file",
            ResolutionError::InvalidBaseConfig { .. } => "invalid_base_config",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ResolutionError::UnsupportedExportKind { path, .. }
            | ResolutionError::ModuleLoadError { path, .. }
            | ResolutionError::InvocationError { path, .. }
            | ResolutionError::ConfigResolutionTimeout { path, .. }
            | ResolutionError::ConfigResolutionError { path, .. }
            | ResolutionError::InvalidFieldType { path, .. }
            | ResolutionError::UnrecognizedConfigFile { path }
            | ResolutionError::InvalidBaseConfig { path, .. } => path,
        }
    }
}

/// JSON type name used in `InvalidFieldType` and `InvalidBaseConfig` messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
