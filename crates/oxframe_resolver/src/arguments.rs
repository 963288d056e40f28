use log::trace;
use oxframe_core::{JsObject, JsValue};
use serde_json::{Map, Value};

use crate::{
    frameworks::ArgumentStyle,
    types::{ExportShape, InvocationArg, InvocationArgs},
};

/// Most arguments a framework ever passes to a config function: `(phase, { defaultConfig })`.
pub const MAX_HELPER_ARGS: usize = 2;

/// Build the `(phase, { defaultConfig })` call arguments for `shape`, never more than it declares.
///
/// A rest parameter accepts everything, so variadic functions get the full list.
pub fn synthesize(
    shape: &ExportShape,
    phase: &str,
    base_config: &Map<String, Value>,
) -> InvocationArgs {
    synthesize_with(ArgumentStyle::PhaseContext, shape, phase, base_config)
}

/// Like [`synthesize`], for frameworks whose config functions take something else.
pub fn synthesize_with(
    style: ArgumentStyle,
    shape: &ExportShape,
    phase: &str,
    base_config: &Map<String, Value>,
) -> InvocationArgs {
    let Some((arity, variadic)) = shape.signature() else {
        return InvocationArgs::default();
    };

    let args = match style {
        ArgumentStyle::PhaseContext => {
            let count = if variadic { MAX_HELPER_ARGS } else { arity.min(MAX_HELPER_ARGS) };
            let mut args = Vec::with_capacity(count);
            if count >= 1 {
                args.push(InvocationArg::Phase(phase.to_string()));
            }
            if count >= 2 {
                args.push(InvocationArg::Context { default_config: base_config.clone() });
            }
            args
        }
        ArgumentStyle::ConfigApi(name) if variadic || arity >= 1 => {
            vec![InvocationArg::ConfigApi(name.to_string())]
        }
        ArgumentStyle::ConfigApi(_) => Vec::new(),
    };
    trace!("Synthesized {} argument(s) for {}", args.len(), shape.label());
    InvocationArgs(args)
}

impl InvocationArgs {
    /// Fresh sandbox values for these arguments. Nothing in the result aliases caller data.
    pub fn to_js_values<'a>(&self) -> Vec<JsValue<'a>> {
        self.iter()
            .map(|arg| match arg {
                InvocationArg::Phase(phase) => JsValue::string(phase.as_str()),
                InvocationArg::Context { default_config } => {
                    let mut context = JsObject::default();
                    let default_config = Value::Object(default_config.clone());
                    context.insert("defaultConfig", JsValue::from_json(&default_config));
                    JsValue::object(context)
                }
                InvocationArg::ConfigApi(name) => JsValue::opaque(name.as_str()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function(arity: usize, variadic: bool) -> ExportShape {
        ExportShape::SyncFunction { arity, variadic, params: vec![] }
    }

    fn base() -> Map<String, Value> {
        match json!({ "reactStrictMode": true }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_arity_zero_gets_nothing() {
        assert!(synthesize(&function(0, false), "phase-production-build", &base()).is_empty());
    }

    #[test]
    fn test_arity_one_gets_phase() {
        let args = synthesize(&function(1, false), "phase-production-build", &base());
        assert_eq!(args.0, vec![InvocationArg::Phase("phase-production-build".to_string())]);
    }

    #[test]
    fn test_arity_two_and_more_gets_context() {
        for arity in [2, 3, 7] {
            let args = synthesize(&function(arity, false), "phase-development-server", &base());
            assert_eq!(args.len(), 2);
            assert_eq!(
                args.0[1],
                InvocationArg::Context { default_config: base() },
                "arity {}",
                arity
            );
        }
    }

    #[test]
    fn test_variadic_gets_all_helpers() {
        assert_eq!(synthesize(&function(0, true), "p", &base()).len(), MAX_HELPER_ARGS);
    }

    #[test]
    fn test_object_literal_gets_nothing() {
        assert!(synthesize(&ExportShape::ObjectLiteral, "p", &base()).is_empty());
    }

    #[test]
    fn test_config_api_style_passes_one_unresolved_object() {
        let style = ArgumentStyle::ConfigApi("eleventyConfig");
        let args = synthesize_with(style, &function(2, false), "p", &base());
        assert_eq!(args.0, vec![InvocationArg::ConfigApi("eleventyConfig".to_string())]);
        assert!(args.to_js_values()[0].is_opaque());

        assert!(synthesize_with(style, &function(0, false), "p", &base()).is_empty());
        assert_eq!(synthesize_with(style, &function(0, true), "p", &base()).len(), 1);
    }

    #[test]
    fn test_js_values_wrap_default_config() {
        let args = synthesize(&function(2, false), "build", &base());
        let values = args.to_js_values();
        assert_eq!(values[0].as_str(), Some("build"));
        let context = values[1].as_object().unwrap();
        let default_config = context.get("defaultConfig").unwrap().to_json().value;
        assert_eq!(default_config, json!({ "reactStrictMode": true }));
    }
}
