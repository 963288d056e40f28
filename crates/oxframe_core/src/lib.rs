//! Sandboxed loading of JavaScript/TypeScript framework config modules.
//!
//! This crate provides the pieces the resolver builds on:
//! - Parsing config files with oxc and detecting their module kind
//! - A tree-walking interpreter for the subset of JavaScript config files use
//! - A Node-like global environment with no access to the host
//! - Promises settled on a virtual clock instead of an event loop
//! - Collecting config files from a project and finding its root

mod collector;
mod config;
mod constants;
mod error;
mod evaluator;
mod parser;
mod promise;
mod sandbox;
mod scope;
mod value;

// Re-export public API
pub use collector::{CollectorConfig, collect_files};
pub use config::{find_git_root, find_project_root};
pub use constants::{CONFIG_EXTENSIONS, MAX_CALL_DEPTH};
pub use error::{EvalError, EvalResult};
pub use evaluator::{LoadedModule, load_file, load_module};
pub use parser::{ModuleKind, module_kind, parse_module, read_source};
pub use promise::{Promise, Settlement};
pub use value::{Builtin, BuiltinKind, Closure, ErrorValue, JsObject, JsValue, JsonSnapshot};

// Allocator for `load_module` callers.
pub use oxc_allocator::Allocator;
