use std::path::Path;

use log::trace;
use oxframe_core::JsValue;

use crate::{
    error::{ResolutionError, Result},
    types::ExportShape,
};

/// Decide how a loaded export has to be turned into a config object.
pub fn classify(path: &Path, export: &JsValue<'_>) -> Result<ExportShape> {
    let shape = match export {
        JsValue::Object(_) => ExportShape::ObjectLiteral,
        JsValue::Function(closure) if closure.is_generator() => {
            return Err(unsupported(path, "a generator function"));
        }
        JsValue::Function(closure) => {
            let arity = closure.arity();
            let variadic = closure.is_variadic();
            let params = closure.param_names();
            if closure.is_async() {
                ExportShape::AsyncFunction { arity, variadic, params }
            } else {
                ExportShape::SyncFunction { arity, variadic, params }
            }
        }
        JsValue::Builtin(builtin) => {
            ExportShape::SyncFunction { arity: builtin.arity, variadic: false, params: Vec::new() }
        }
        JsValue::Class(_) => return Err(unsupported(path, "a class")),
        JsValue::Promise(_) => return Err(unsupported(path, "a promise")),
        other => return Err(unsupported(path, other.kind_name())),
    };
    trace!("Classified export of {} as {:?}", path.display(), shape);
    Ok(shape)
}

fn unsupported(path: &Path, found: &str) -> ResolutionError {
    ResolutionError::UnsupportedExportKind { path: path.to_path_buf(), found: found.to_string() }
}
