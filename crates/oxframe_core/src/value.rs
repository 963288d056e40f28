use std::{
    cell::{Ref, RefCell},
    fmt,
    rc::Rc,
};

use oxc_ast::ast::{
    ArrowFunctionExpression, BindingPattern, BindingPatternKind, FormalParameters, Function,
};
use serde_json::{Map, Number, Value};

use crate::{
    promise::{Promise, Settlement},
    scope::Scope,
};

pub type ArrayRef<'a> = Rc<RefCell<Vec<JsValue<'a>>>>;
pub type ObjectRef<'a> = Rc<RefCell<JsObject<'a>>>;

/// A value produced by the sandbox.
///
/// Objects and arrays are shared by reference like in JavaScript: cloning a `JsValue` clones
/// the handle, not the tree. Values that cross into the sandbox from the host are built fresh
/// by [`JsValue::from_json`], so the host's data is never aliased.
#[derive(Clone)]
pub enum JsValue<'a> {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef<'a>),
    Object(ObjectRef<'a>),
    Function(Rc<Closure<'a>>),
    Builtin(Rc<Builtin<'a>>),
    Class(Option<String>),
    Error(ErrorValue),
    Promise(Rc<Promise<'a>>),
    /// A value from outside the sandbox (package imports, unknown calls on those).
    Opaque(String),
}

impl<'a> JsValue<'a> {
    pub fn string(s: impl Into<String>) -> Self {
        JsValue::String(s.into())
    }

    pub fn opaque(description: impl Into<String>) -> Self {
        JsValue::Opaque(description.into())
    }

    pub fn object(obj: JsObject<'a>) -> Self {
        JsValue::Object(Rc::new(RefCell::new(obj)))
    }

    pub fn array(items: Vec<JsValue<'a>>) -> Self {
        JsValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn promise(promise: Promise<'a>) -> Self {
        JsValue::Promise(Rc::new(promise))
    }

    pub fn builtin(name: &'static str, arity: usize, kind: BuiltinKind<'a>) -> Self {
        JsValue::Builtin(Rc::new(Builtin { name, arity, kind }))
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        JsValue::Error(ErrorValue { name: name.to_string(), message: message.into() })
    }

    /// Short name of the value's kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Array(_) => "array",
            JsValue::Object(_) => "object",
            JsValue::Function(c) if c.is_generator() => "generator function",
            JsValue::Function(c) if c.is_async() => "async function",
            JsValue::Function(_) | JsValue::Builtin(_) => "function",
            JsValue::Class(_) => "class",
            JsValue::Error(_) => "error",
            JsValue::Promise(_) => "promise",
            JsValue::Opaque(_) => "unresolved value",
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Function(_) | JsValue::Builtin(_) | JsValue::Class(_) => "function",
            JsValue::Null
            | JsValue::Array(_)
            | JsValue::Object(_)
            | JsValue::Error(_)
            | JsValue::Promise(_)
            | JsValue::Opaque(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_object(&self) -> Option<Ref<'_, JsObject<'a>>> {
        match self {
            JsValue::Object(obj) => Some(obj.borrow()),
            _ => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, JsValue::Opaque(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// JavaScript `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Bool(b) => f64::from(u8::from(*b)),
            JsValue::Number(n) => *n,
            JsValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() { 0.0 } else { trimmed.parse().unwrap_or(f64::NAN) }
            }
            JsValue::Array(_) => JsValue::String(self.to_js_string()).to_number(),
            _ => f64::NAN,
        }
    }

    /// JavaScript `ToString`. Opaque values render as a placeholder, so callers producing config
    /// data must check [`JsValue::is_opaque`] first.
    pub fn to_js_string(&self) -> String {
        self.render(&mut Vec::new())
    }

    fn render(&self, seen: &mut Vec<*const ()>) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Number(n) => number_to_string(*n),
            JsValue::String(s) => s.clone(),
            JsValue::Array(items) => {
                let ptr = Rc::as_ptr(items).cast::<()>();
                if seen.contains(&ptr) {
                    return String::new();
                }
                seen.push(ptr);
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.render(seen) })
                    .collect::<Vec<_>>()
                    .join(",");
                seen.pop();
                joined
            }
            JsValue::Object(_) => "[object Object]".to_string(),
            JsValue::Function(c) => format!("function {}", c.name().unwrap_or("anonymous")),
            JsValue::Builtin(b) => format!("function {}() {{ [native code] }}", b.name),
            JsValue::Class(name) => format!("class {}", name.as_deref().unwrap_or("anonymous")),
            JsValue::Error(e) => e.to_string(),
            JsValue::Promise(_) => "[object Promise]".to_string(),
            JsValue::Opaque(desc) => format!("[unresolved {}]", desc),
        }
    }

    /// Human readable rendering of a thrown or rejected value.
    pub fn describe(&self) -> String {
        match self {
            JsValue::String(s) => format!("'{}'", s),
            JsValue::Object(_) | JsValue::Array(_) => {
                let snapshot = self.to_json();
                serde_json::to_string(&snapshot.value).unwrap_or_else(|_| self.to_js_string())
            }
            other => other.to_js_string(),
        }
    }

    /// Convert to JSON the way `JSON.stringify` would, recording key paths that held values
    /// the sandbox could not resolve. A circular reference is recorded as unresolved.
    pub fn to_json(&self) -> JsonSnapshot {
        let mut walk = JsonWalk::default();
        let value = self.json_at(&mut walk).unwrap_or(Value::Null);
        JsonSnapshot { value, unresolved: walk.unresolved }
    }

    fn json_at(&self, walk: &mut JsonWalk) -> Option<Value> {
        if let Some(ptr) = self.heap_ptr() {
            if walk.ancestors.contains(&ptr) {
                walk.unresolved.push(walk.path.join("."));
                return None;
            }
            walk.ancestors.push(ptr);
        }
        let value = self.json_inner(walk);
        if self.heap_ptr().is_some() {
            walk.ancestors.pop();
        }
        value
    }

    fn heap_ptr(&self) -> Option<*const ()> {
        match self {
            JsValue::Array(items) => Some(Rc::as_ptr(items).cast()),
            JsValue::Object(obj) => Some(Rc::as_ptr(obj).cast()),
            _ => None,
        }
    }

    fn json_inner(&self, walk: &mut JsonWalk) -> Option<Value> {
        match self {
            JsValue::Undefined
            | JsValue::Function(_)
            | JsValue::Builtin(_)
            | JsValue::Class(_) => None,
            JsValue::Null => Some(Value::Null),
            JsValue::Bool(b) => Some(Value::Bool(*b)),
            JsValue::Number(n) => Some(number_to_json(*n)),
            JsValue::String(s) => Some(Value::String(s.clone())),
            JsValue::Array(items) => {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    walk.path.push(idx.to_string());
                    out.push(item.json_at(walk).unwrap_or(Value::Null));
                    walk.path.pop();
                }
                Some(Value::Array(out))
            }
            JsValue::Object(obj) => {
                let obj = obj.borrow();
                let mut out = Map::new();
                for (key, value) in obj.iter() {
                    walk.path.push(key.clone());
                    if let Some(v) = value.json_at(walk) {
                        out.insert(key.clone(), v);
                    }
                    walk.path.pop();
                }
                Some(Value::Object(out))
            }
            JsValue::Error(_) => Some(Value::Object(Map::new())),
            JsValue::Promise(_) | JsValue::Opaque(_) => {
                walk.unresolved.push(walk.path.join("."));
                None
            }
        }
    }

    /// Build a fresh sandbox value from JSON. The result shares nothing with `value`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => JsValue::Null,
            Value::Bool(b) => JsValue::Bool(*b),
            Value::Number(n) => JsValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => JsValue::String(s.clone()),
            Value::Array(items) => JsValue::array(items.iter().map(JsValue::from_json).collect()),
            Value::Object(map) => {
                let mut obj = JsObject::default();
                for (key, v) in map {
                    obj.insert(key.clone(), JsValue::from_json(v));
                }
                JsValue::object(obj)
            }
        }
    }
}

impl fmt::Debug for JsValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::String(s) => write!(f, "{:?}", s),
            JsValue::Object(_) | JsValue::Array(_) => write!(f, "{}", self.describe()),
            other => write!(f, "{}", other.to_js_string()),
        }
    }
}

#[derive(Default)]
struct JsonWalk {
    path: Vec<String>,
    ancestors: Vec<*const ()>,
    unresolved: Vec<String>,
}

/// JSON form of a sandbox value.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSnapshot {
    pub value: Value,
    /// Dotted key paths whose values were unresolved and therefore left out of `value`.
    pub unresolved: Vec<String>,
}

/// Insertion-ordered property map.
#[derive(Clone, Default)]
pub struct JsObject<'a> {
    entries: Vec<(String, JsValue<'a>)>,
}

impl<'a> JsObject<'a> {
    pub fn get(&self, key: &str) -> Option<&JsValue<'a>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut JsValue<'a>> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite in place, keeping the original key position.
    pub fn insert(&mut self, key: impl Into<String>, value: JsValue<'a>) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<JsValue<'a>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsValue<'a>)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(String, JsValue<'a>)> for JsObject<'a> {
    fn from_iter<I: IntoIterator<Item = (String, JsValue<'a>)>>(iter: I) -> Self {
        let mut obj = JsObject::default();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

/// The AST node behind a user-defined function.
#[derive(Clone, Copy)]
pub enum FunctionNode<'a> {
    Function(&'a Function<'a>),
    Arrow(&'a ArrowFunctionExpression<'a>),
}

/// A user-defined function together with the scope it closed over.
pub struct Closure<'a> {
    pub(crate) node: FunctionNode<'a>,
    pub(crate) scope: Scope<'a>,
    pub(crate) name: Option<String>,
}

impl<'a> Closure<'a> {
    pub fn is_async(&self) -> bool {
        match self.node {
            FunctionNode::Function(f) => f.r#async,
            FunctionNode::Arrow(a) => a.r#async,
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self.node, FunctionNode::Function(f) if f.generator)
    }

    pub fn is_arrow(&self) -> bool {
        matches!(self.node, FunctionNode::Arrow(_))
    }

    /// Number of declared formal parameters, not counting a rest parameter.
    pub fn arity(&self) -> usize {
        self.params().items.len()
    }

    /// Whether the parameter list ends in `...rest`.
    pub fn is_variadic(&self) -> bool {
        self.params().rest.is_some()
    }

    /// Declared parameter names. Destructured parameters render as `{..}` or `[..]`.
    pub fn param_names(&self) -> Vec<String> {
        self.params().items.iter().map(|param| pattern_name(&param.pattern)).collect()
    }

    fn params(&self) -> &'a FormalParameters<'a> {
        match self.node {
            FunctionNode::Function(f) => &f.params,
            FunctionNode::Arrow(a) => &a.params,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn pattern_name(pattern: &BindingPattern<'_>) -> String {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(id) => id.name.to_string(),
        BindingPatternKind::ObjectPattern(_) => "{..}".to_string(),
        BindingPatternKind::ArrayPattern(_) => "[..]".to_string(),
        BindingPatternKind::AssignmentPattern(assign) => pattern_name(&assign.left),
    }
}

/// A native function provided by the sandbox.
pub struct Builtin<'a> {
    pub name: &'static str,
    pub arity: usize,
    pub kind: BuiltinKind<'a>,
}

#[derive(Clone)]
pub enum BuiltinKind<'a> {
    Identity,
    Require,
    ErrorConstructor,
    Console,
    ProcessCwd,
    SetTimeout,
    PromiseConstructor,
    PromiseResolve,
    PromiseReject,
    PromiseAll,
    ObjectAssign,
    ObjectFreeze,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectFromEntries,
    JsonStringify,
    JsonParse,
    ToStringFn,
    ToNumberFn,
    ToBooleanFn,
    PathJoin,
    PathResolve,
    PathDirname,
    PathBasename,
    PathExtname,
    /// The `resolve`/`reject` pair handed to a promise executor.
    Settle { slot: Rc<RefCell<Option<Settlement<'a>>>>, fulfil: bool },
    /// An array or string method bound to its receiver.
    Method { receiver: Box<JsValue<'a>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n == n.trunc() && n.abs() < 9.007_199_254_740_992e15 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}
