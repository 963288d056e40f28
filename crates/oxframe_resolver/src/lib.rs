//! Build output directories from JavaScript/TypeScript framework config files.
//!
//! A config file can export a plain object, a function, or an async function taking
//! `(phase, { defaultConfig })`. This crate loads the file in the `oxframe_core` sandbox,
//! classifies the export, calls it with as many arguments as it declares, waits for async
//! results with a timeout, and maps the resulting object onto normalized build fields.
//!
//! # Examples
//!
//! ```no_run
//! use oxframe_resolver::resolve_framework_config;
//! use std::{path::Path, time::Duration};
//!
//! # fn main() -> Result<(), oxframe_resolver::ResolutionError> {
//! let info = resolve_framework_config(
//!     Path::new("/path/to/project/next.config.mjs"),
//!     "phase-production-build",
//!     &serde_json::json!({ "distDir": ".next" }),
//!     Some(Duration::from_secs(5)),
//! )?;
//! println!("{} builds into {}", info.framework, info.output_dir);
//! # Ok(())
//! # }
//! ```

mod arguments;
mod batch;
mod config;
mod error;
mod evaluate;
mod extract;
mod frameworks;
mod reporter;
mod resolver;
mod settle;
mod shape;
mod types;

// Re-export public API
pub use arguments::{MAX_HELPER_ARGS, synthesize, synthesize_with};
pub use batch::{BatchReport, FileOutcome, collect_config_files, resolve_batch, scan_project};
pub use config::{Config, DEFAULT_PHASE, DEFAULT_TIMEOUT_MS, load_base_config};
pub use error::{ResolutionError, Result};
pub use evaluate::{Evaluation, evaluate};
pub use extract::extract;
pub use frameworks::{ArgumentStyle, Framework, FrameworkProfile, OutputKey};
pub use reporter::{print_json, print_report};
pub use resolver::{
    ResolveOptions, resolve, resolve_async, resolve_framework_config,
    resolve_framework_config_async,
};
pub use settle::{AsyncState, settle, settle_blocking};
pub use shape::classify;
pub use types::{
    ExportShape, FieldSource, InvocationArg, InvocationArgs, Lookup, NormalizedBuildInfo,
    Resolution, ResolvedConfig,
};
