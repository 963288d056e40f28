use std::path::Path;

use log::debug;
use oxframe_core::{Allocator, JsValue, ModuleKind, Promise, Settlement, load_file};
use serde_json::{Map, Value};

use crate::{
    arguments::synthesize_with,
    error::{ResolutionError, Result},
    frameworks::Framework,
    settle::AsyncState,
    shape::classify,
    types::{ExportShape, ResolvedConfig},
};

/// A config module after loading and, for function exports, calling it.
#[derive(Debug)]
pub struct Evaluation {
    pub kind: ModuleKind,
    pub shape: ExportShape,
    pub state: AsyncState,
}

/// Load `path` in a fresh sandbox and produce its config, possibly still pending.
///
/// Function exports are called the way `framework` calls them. Everything the sandbox allocated
/// is released before this returns; only plain data escapes.
pub fn evaluate(
    path: &Path,
    framework: Framework,
    phase: &str,
    base_config: &Map<String, Value>,
) -> Result<Evaluation> {
    let allocator = Allocator::default();
    let mut module = load_file(&allocator, path)
        .map_err(|source| ResolutionError::ModuleLoadError { path: path.to_path_buf(), source })?;
    let export = module.export.clone();
    let shape = classify(path, &export)?;

    let state = match &shape {
        ExportShape::ObjectLiteral => AsyncState::Ready(to_config(path, &export)),
        ExportShape::SyncFunction { .. } | ExportShape::AsyncFunction { .. } => {
            let args = synthesize_with(framework.profile().arguments, &shape, phase, base_config);
            debug!(
                "Calling {} export of {} with {} argument(s)",
                shape.label(),
                path.display(),
                args.len()
            );
            let result = module.call(&export, args.to_js_values()).map_err(|source| {
                ResolutionError::InvocationError { path: path.to_path_buf(), source }
            })?;
            into_state(path, &result)
        }
    };

    Ok(Evaluation { kind: module.kind, shape, state })
}

/// A returned promise is waited for even when the function itself was not `async`.
fn into_state(path: &Path, value: &JsValue<'_>) -> AsyncState {
    let JsValue::Promise(promise) = value else {
        return AsyncState::Ready(to_config(path, value));
    };
    match promise.as_ref() {
        Promise::Settled(settlement) => AsyncState::Ready(settle_outcome(path, settlement)),
        Promise::Delayed { after, settlement } => {
            AsyncState::Pending { after: *after, outcome: settle_outcome(path, settlement) }
        }
        Promise::Never => AsyncState::Never,
    }
}

fn settle_outcome(path: &Path, settlement: &Settlement<'_>) -> Result<ResolvedConfig> {
    match settlement {
        Settlement::Fulfilled(value) => to_config(path, value),
        Settlement::Rejected(reason) => Err(ResolutionError::ConfigResolutionError {
            path: path.to_path_buf(),
            message: format!("rejected with {}", reason.describe()),
        }),
    }
}

fn to_config(path: &Path, value: &JsValue<'_>) -> Result<ResolvedConfig> {
    if value.as_object().is_some() {
        let snapshot = value.to_json();
        if let Value::Object(values) = snapshot.value {
            return Ok(ResolvedConfig { values, unresolved: snapshot.unresolved });
        }
    }
    Err(ResolutionError::ConfigResolutionError {
        path: path.to_path_buf(),
        message: format!("config resolved to {}, expected an object", value.kind_name()),
    })
}
