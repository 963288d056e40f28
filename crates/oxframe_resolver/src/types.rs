use oxframe_core::ModuleKind;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::frameworks::Framework;

/// How a config module exposes its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExportShape {
    ObjectLiteral,
    SyncFunction {
        arity: usize,
        variadic: bool,
        params: Vec<String>,
    },
    AsyncFunction {
        arity: usize,
        variadic: bool,
        params: Vec<String>,
    },
}

impl ExportShape {
    pub fn is_async(&self) -> bool {
        matches!(self, ExportShape::AsyncFunction { .. })
    }

    /// Declared arity and whether a rest parameter follows it, for function shapes.
    pub fn signature(&self) -> Option<(usize, bool)> {
        match self {
            ExportShape::ObjectLiteral => None,
            ExportShape::SyncFunction { arity, variadic, .. }
            | ExportShape::AsyncFunction { arity, variadic, .. } => Some((*arity, *variadic)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportShape::ObjectLiteral => "object",
            ExportShape::SyncFunction { .. } => "function",
            ExportShape::AsyncFunction { .. } => "async function",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationArg {
    /// The build phase token, forwarded verbatim.
    Phase(String),
    /// `{ defaultConfig }`, holding a private copy of the caller's base config.
    Context { default_config: Map<String, Value> },
    /// A framework-owned API object the sandbox cannot model, passed as an unresolved value.
    ConfigApi(String),
}

/// Arguments for a function-shaped export, already truncated to its declared arity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationArgs(pub(crate) Vec<InvocationArg>);

impl InvocationArgs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvocationArg> {
        self.0.iter()
    }
}

/// A config object after every promise has settled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    pub values: Map<String, Value>,
    /// Dotted key paths whose values came from outside the sandbox and could not be resolved.
    pub unresolved: Vec<String>,
}

impl ResolvedConfig {
    /// Look up a dotted key path such as `kit.paths.base`.
    pub fn lookup(&self, key_path: &str) -> Lookup<'_> {
        let under = |p: &String| {
            key_path == p.as_str()
                || key_path.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('.'))
        };
        if self.unresolved.iter().any(under) {
            return Lookup::Unresolved;
        }
        let mut segments = key_path.split('.');
        let Some(first) = segments.next() else { return Lookup::Missing };
        let mut current = match self.values.get(first) {
            Some(value) => value,
            None => return Lookup::Missing,
        };
        for segment in segments {
            let next = match current {
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
                _ => current.get(segment),
            };
            match next {
                Some(value) => current = value,
                None => return Lookup::Missing,
            }
        }
        Lookup::Found(current)
    }
}

#[derive(Debug, PartialEq)]
pub enum Lookup<'v> {
    Found(&'v Value),
    Missing,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Config,
    Default,
}

/// Build metadata extracted from a framework config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBuildInfo {
    pub framework: Framework,
    pub output_dir: String,
    pub output_dir_source: FieldSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
}

/// Everything learned while resolving one config file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    #[serde(flatten)]
    pub info: NormalizedBuildInfo,
    pub shape: ExportShape,
    pub module_kind: ModuleKind,
}
