//! The global environment a config module sees.
//!
//! Nothing here touches the host: `process.env` is empty, `require` only knows `path` and
//! `next/constants`, and `console` output goes to the `log` facade at trace level.

use log::trace;
use path_clean::clean;
use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use crate::{
    constants::{IDENTITY_HELPERS, NEXT_CONSTANTS_MODULES, NEXT_PHASES, PATH_MODULES},
    evaluator::{
        Abrupt, Flow, Interpreter, is_callable, settle_once, strict_equals, truthy, type_error,
    },
    promise::{Promise, Settlement},
    value::{ArrayRef, Builtin, BuiltinKind, JsObject, JsValue},
};

const ARRAY_METHODS: &[&str] = &[
    "map", "filter", "find", "some", "every", "forEach", "concat", "includes", "indexOf", "join",
    "slice", "push",
];

const STRING_METHODS: &[&str] = &[
    "startsWith",
    "endsWith",
    "includes",
    "indexOf",
    "toLowerCase",
    "toUpperCase",
    "trim",
    "split",
    "replace",
    "slice",
];

const ERROR_CONSTRUCTORS: &[&str] =
    &["Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError"];

fn object<'a>(entries: impl IntoIterator<Item = (&'static str, JsValue<'a>)>) -> JsValue<'a> {
    JsValue::object(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

impl<'a> Interpreter<'a> {
    pub(crate) fn install_globals(&mut self) {
        let global = self.global.clone();
        let file = self.path.to_string_lossy().into_owned();
        let dir = self.dir.to_string_lossy().into_owned();

        global.declare("undefined", JsValue::Undefined, false);
        global.declare("NaN", JsValue::Number(f64::NAN), false);
        global.declare("Infinity", JsValue::Number(f64::INFINITY), false);
        global.declare("__filename", JsValue::String(file), false);
        global.declare("__dirname", JsValue::String(dir), false);
        let exports = self.exports.clone();
        global.declare("exports", exports.clone(), true);
        global.declare("module", object([("exports", exports)]), true);
        global.declare("require", JsValue::builtin("require", 1, BuiltinKind::Require), false);
        global.declare(
            "process",
            object([
                ("env", JsValue::object(JsObject::default())),
                ("cwd", JsValue::builtin("cwd", 0, BuiltinKind::ProcessCwd)),
            ]),
            false,
        );
        global.declare(
            "console",
            object(
                ["log", "info", "warn", "error", "debug"]
                    .map(|name| (name, JsValue::builtin(name, 0, BuiltinKind::Console))),
            ),
            false,
        );
        let promise = JsValue::builtin("Promise", 1, BuiltinKind::PromiseConstructor);
        global.declare("Promise", promise, false);
        global.declare(
            "Object",
            object([
                ("assign", JsValue::builtin("assign", 2, BuiltinKind::ObjectAssign)),
                ("freeze", JsValue::builtin("freeze", 1, BuiltinKind::ObjectFreeze)),
                ("keys", JsValue::builtin("keys", 1, BuiltinKind::ObjectKeys)),
                ("values", JsValue::builtin("values", 1, BuiltinKind::ObjectValues)),
                ("entries", JsValue::builtin("entries", 1, BuiltinKind::ObjectEntries)),
                ("fromEntries", JsValue::builtin("fromEntries", 1, BuiltinKind::ObjectFromEntries)),
            ]),
            false,
        );
        global.declare(
            "JSON",
            object([
                ("stringify", JsValue::builtin("stringify", 3, BuiltinKind::JsonStringify)),
                ("parse", JsValue::builtin("parse", 2, BuiltinKind::JsonParse)),
            ]),
            false,
        );
        let set_timeout = JsValue::builtin("setTimeout", 2, BuiltinKind::SetTimeout);
        global.declare("setTimeout", set_timeout, false);
        global.declare("String", JsValue::builtin("String", 1, BuiltinKind::ToStringFn), false);
        global.declare("Number", JsValue::builtin("Number", 1, BuiltinKind::ToNumberFn), false);
        global.declare("Boolean", JsValue::builtin("Boolean", 1, BuiltinKind::ToBooleanFn), false);
        for &name in ERROR_CONSTRUCTORS {
            global.declare(name, JsValue::builtin(name, 1, BuiltinKind::ErrorConstructor), false);
        }
        for &name in IDENTITY_HELPERS {
            global.declare(name, JsValue::builtin(name, 1, BuiltinKind::Identity), false);
        }
    }

    /// What `require(request)` or `import ... from request` evaluates to.
    pub(crate) fn module_for(&self, request: &str) -> JsValue<'a> {
        if PATH_MODULES.contains(&request) {
            return self.path_module();
        }
        if NEXT_CONSTANTS_MODULES.contains(&request) {
            return object(NEXT_PHASES.iter().map(|&(name, phase)| (name, JsValue::string(phase))));
        }
        trace!("Import of '{}' is unresolved inside the sandbox", request);
        JsValue::opaque(format!("'{}'", request))
    }

    fn path_module(&self) -> JsValue<'a> {
        object([
            ("join", JsValue::builtin("join", 0, BuiltinKind::PathJoin)),
            ("resolve", JsValue::builtin("resolve", 0, BuiltinKind::PathResolve)),
            ("dirname", JsValue::builtin("dirname", 1, BuiltinKind::PathDirname)),
            ("basename", JsValue::builtin("basename", 2, BuiltinKind::PathBasename)),
            ("extname", JsValue::builtin("extname", 1, BuiltinKind::PathExtname)),
            ("sep", JsValue::string("/")),
            ("delimiter", JsValue::string(":")),
        ])
    }

    pub(crate) fn import_meta(&self) -> JsValue<'a> {
        object([
            ("url", JsValue::String(format!("file://{}", self.path.to_string_lossy()))),
            ("filename", JsValue::String(self.path.to_string_lossy().into_owned())),
            ("dirname", JsValue::String(self.dir.to_string_lossy().into_owned())),
        ])
    }

    pub(crate) fn builtin_static(&self, builtin: &Builtin<'a>, key: &str) -> JsValue<'a> {
        match (&builtin.kind, key) {
            (_, "name") => JsValue::string(builtin.name),
            (_, "length") => JsValue::Number(builtin.arity as f64),
            (BuiltinKind::PromiseConstructor, "resolve") => {
                JsValue::builtin("resolve", 1, BuiltinKind::PromiseResolve)
            }
            (BuiltinKind::PromiseConstructor, "reject") => {
                JsValue::builtin("reject", 1, BuiltinKind::PromiseReject)
            }
            (BuiltinKind::PromiseConstructor, "all") => {
                JsValue::builtin("all", 1, BuiltinKind::PromiseAll)
            }
            _ => JsValue::Undefined,
        }
    }

    pub(crate) fn array_method(&self, receiver: &JsValue<'a>, key: &str) -> JsValue<'a> {
        bound_method(ARRAY_METHODS, receiver, key)
    }

    pub(crate) fn string_method(&self, receiver: &JsValue<'a>, key: &str) -> JsValue<'a> {
        bound_method(STRING_METHODS, receiver, key)
    }

    pub(crate) fn call_builtin(
        &mut self,
        builtin: Rc<Builtin<'a>>,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        let first = args.first().cloned().unwrap_or(JsValue::Undefined);
        match &builtin.kind {
            BuiltinKind::Identity | BuiltinKind::ObjectFreeze => Ok(first),
            BuiltinKind::Require => Ok(self.module_for(&first.to_js_string())),
            BuiltinKind::ErrorConstructor => {
                let message = match &first {
                    JsValue::Undefined => String::new(),
                    other => other.to_js_string(),
                };
                Ok(JsValue::error(builtin.name, message))
            }
            BuiltinKind::Console => {
                let message = args.iter().map(JsValue::to_js_string).collect::<Vec<_>>().join(" ");
                trace!("console.{}: {}", builtin.name, message);
                Ok(JsValue::Undefined)
            }
            BuiltinKind::ProcessCwd => Ok(JsValue::String(self.dir.to_string_lossy().into_owned())),
            BuiltinKind::SetTimeout => {
                let mut args = args.into_iter();
                let callback = args.next().unwrap_or(JsValue::Undefined);
                if !is_callable(&callback) {
                    return Err(type_error("The \"callback\" argument must be of type function"));
                }
                let ms = args.next().map(|v| v.to_number()).unwrap_or(0.0);
                let delay = if ms.is_finite() && ms > 0.0 {
                    Duration::from_millis(ms as u64)
                } else {
                    Duration::ZERO
                };
                let id = self.timers.schedule(delay, callback, args.collect());
                Ok(JsValue::Number(id as f64))
            }
            BuiltinKind::PromiseConstructor => {
                Err(type_error("Promise constructor cannot be invoked without 'new'"))
            }
            BuiltinKind::PromiseResolve => Ok(match first {
                JsValue::Promise(promise) => JsValue::Promise(promise),
                value => JsValue::promise(Promise::fulfilled(value)),
            }),
            BuiltinKind::PromiseReject => Ok(JsValue::promise(Promise::rejected(first))),
            BuiltinKind::PromiseAll => self.promise_all(first),
            BuiltinKind::ObjectAssign => {
                let mut sources = args.into_iter();
                let target = sources.next().unwrap_or(JsValue::Undefined);
                let JsValue::Object(obj) = &target else {
                    if target.is_nullish() {
                        return Err(type_error("Cannot convert undefined or null to object"));
                    }
                    return Ok(target);
                };
                for source in sources.filter(|source| !source.is_nullish()) {
                    for (key, value) in own_entries(&source)? {
                        obj.borrow_mut().insert(key, value);
                    }
                }
                Ok(target)
            }
            BuiltinKind::ObjectKeys | BuiltinKind::ObjectValues | BuiltinKind::ObjectEntries => {
                if let JsValue::Opaque(desc) = &first {
                    return Ok(JsValue::opaque(format!("Object.{}({})", builtin.name, desc)));
                }
                let entries = own_entries(&first)?;
                Ok(JsValue::array(
                    entries
                        .into_iter()
                        .map(|(key, value)| match builtin.kind {
                            BuiltinKind::ObjectKeys => JsValue::String(key),
                            BuiltinKind::ObjectValues => value,
                            _ => JsValue::array(vec![JsValue::String(key), value]),
                        })
                        .collect(),
                ))
            }
            BuiltinKind::ObjectFromEntries => {
                let mut out = JsObject::default();
                for entry in self.spread_items(first)? {
                    let pair = self.spread_items(entry)?;
                    let key = pair
                        .first()
                        .map(JsValue::to_js_string)
                        .unwrap_or_else(|| "undefined".to_string());
                    out.insert(key, pair.get(1).cloned().unwrap_or(JsValue::Undefined));
                }
                Ok(JsValue::object(out))
            }
            BuiltinKind::JsonStringify => json_stringify(&first, args.get(2)),
            BuiltinKind::JsonParse => {
                let text = first.to_js_string();
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(|value| JsValue::from_json(&value))
                    .map_err(|e| Abrupt::Throw(JsValue::error("SyntaxError", e.to_string())))
            }
            BuiltinKind::ToStringFn | BuiltinKind::ToNumberFn | BuiltinKind::ToBooleanFn
                if first.is_opaque() =>
            {
                Ok(JsValue::opaque(format!("{}({})", builtin.name, first.to_js_string())))
            }
            BuiltinKind::ToStringFn => {
                Ok(JsValue::String(args.first().map(JsValue::to_js_string).unwrap_or_default()))
            }
            BuiltinKind::ToNumberFn => {
                Ok(JsValue::Number(args.first().map_or(0.0, JsValue::to_number)))
            }
            BuiltinKind::ToBooleanFn => Ok(JsValue::Bool(first.is_truthy())),
            BuiltinKind::PathJoin
            | BuiltinKind::PathResolve
            | BuiltinKind::PathDirname
            | BuiltinKind::PathBasename
            | BuiltinKind::PathExtname => {
                if args.iter().any(JsValue::is_opaque) {
                    return Ok(JsValue::opaque(format!("path.{}(...)", builtin.name)));
                }
                self.call_path(&builtin.kind, &args)
            }
            BuiltinKind::Settle { slot, fulfil } => {
                let settlement = if *fulfil {
                    Settlement::Fulfilled(first)
                } else {
                    Settlement::Rejected(first)
                };
                settle_once(slot, settlement);
                Ok(JsValue::Undefined)
            }
            BuiltinKind::Method { receiver } => match &**receiver {
                JsValue::Array(items) => self.call_array_method(items, builtin.name, args),
                JsValue::String(_) if args.iter().any(JsValue::is_opaque) => {
                    Ok(JsValue::opaque(format!("string.{}(...)", builtin.name)))
                }
                JsValue::String(s) => call_string_method(s, builtin.name, &args),
                other => {
                    let kind = other.kind_name();
                    Err(type_error(format!("{}.{} is not a function", kind, builtin.name)))
                }
            },
        }
    }

    fn promise_all(&self, iterable: JsValue<'a>) -> Flow<'a, JsValue<'a>> {
        let mut values = Vec::new();
        let mut latest = Duration::ZERO;
        let mut never = false;
        let mut rejection: Option<(Duration, JsValue<'a>)> = None;

        for item in self.spread_items(iterable)? {
            let (after, settlement) = match item {
                JsValue::Promise(promise) => match &*promise {
                    Promise::Settled(settlement) => (Duration::ZERO, settlement.clone()),
                    Promise::Delayed { after, settlement } => (*after, settlement.clone()),
                    Promise::Never => {
                        never = true;
                        continue;
                    }
                },
                value => (Duration::ZERO, Settlement::Fulfilled(value)),
            };
            match settlement {
                Settlement::Fulfilled(value) => {
                    latest = latest.max(after);
                    values.push(value);
                }
                Settlement::Rejected(reason) => {
                    if rejection.as_ref().is_none_or(|(at, _)| after < *at) {
                        rejection = Some((after, reason));
                    }
                }
            }
        }

        let promise = match rejection {
            Some((after, reason)) => Promise::after(after, Settlement::Rejected(reason)),
            None if never => Promise::Never,
            None => Promise::after(latest, Settlement::Fulfilled(JsValue::array(values))),
        };
        Ok(JsValue::promise(promise))
    }

    fn call_array_method(
        &mut self,
        array: &ArrayRef<'a>,
        name: &str,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        if name == "push" {
            let mut items = array.borrow_mut();
            items.extend(args);
            return Ok(JsValue::Number(items.len() as f64));
        }
        // Callbacks may write to the array, so iterate over a snapshot.
        let items = array.borrow().clone();
        let first = args.first().cloned().unwrap_or(JsValue::Undefined);
        match name {
            "map" | "filter" | "find" | "some" | "every" | "forEach" => {
                if !is_callable(&first) {
                    return Err(type_error(format!("{} is not a function", first.to_js_string())));
                }
                let mut out = Vec::new();
                for (idx, item) in items.iter().enumerate() {
                    let result =
                        self.call_value(&first, vec![item.clone(), JsValue::Number(idx as f64)])?;
                    match name {
                        "map" => out.push(result),
                        "filter" if truthy(&result)? => out.push(item.clone()),
                        "find" if truthy(&result)? => return Ok(item.clone()),
                        "some" if truthy(&result)? => return Ok(JsValue::Bool(true)),
                        "every" if !truthy(&result)? => return Ok(JsValue::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name {
                    "map" | "filter" => JsValue::array(out),
                    "some" => JsValue::Bool(false),
                    "every" => JsValue::Bool(true),
                    _ => JsValue::Undefined,
                })
            }
            "concat" => {
                let mut out = items;
                for arg in args {
                    match arg {
                        JsValue::Array(more) => out.extend(more.borrow().iter().cloned()),
                        other => out.push(other),
                    }
                }
                Ok(JsValue::array(out))
            }
            "includes" | "indexOf" if first.is_opaque() => {
                Ok(JsValue::opaque(format!("array.{}({})", name, first.to_js_string())))
            }
            "includes" => Ok(JsValue::Bool(items.iter().any(|item| same_value_zero(item, &first)))),
            "indexOf" => Ok(JsValue::Number(
                items
                    .iter()
                    .position(|item| strict_equals(item, &first))
                    .map_or(-1.0, |i| i as f64),
            )),
            "join" => {
                if first.is_opaque() || items.iter().any(JsValue::is_opaque) {
                    return Ok(JsValue::opaque("array.join(...)"));
                }
                let sep = match &first {
                    JsValue::Undefined => ",".to_string(),
                    other => other.to_js_string(),
                };
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect();
                Ok(JsValue::String(parts.join(&sep)))
            }
            "slice" => {
                let (start, end) = slice_bounds(&args, items.len());
                Ok(JsValue::array(items.get(start..end).map(<[_]>::to_vec).unwrap_or_default()))
            }
            other => Err(type_error(format!("array.{} is not a function", other))),
        }
    }

    fn call_path(&self, kind: &BuiltinKind<'a>, args: &[JsValue<'a>]) -> Flow<'a, JsValue<'a>> {
        let parts = args
            .iter()
            .map(|arg| {
                arg.as_str().ok_or_else(|| {
                    type_error(format!(
                        "The \"path\" argument must be of type string. Received {}",
                        arg.kind_name()
                    ))
                })
            })
            .collect::<Result<Vec<&str>, _>>()?;
        let first = parts.first().copied().unwrap_or_default();

        let result = match kind {
            BuiltinKind::PathJoin => {
                let joined =
                    parts.iter().filter(|p| !p.is_empty()).copied().collect::<Vec<_>>().join("/");
                if joined.is_empty() { ".".to_string() } else { normalize(&joined) }
            }
            BuiltinKind::PathResolve => {
                let mut resolved = self.dir.clone();
                for part in parts.iter().filter(|p| !p.is_empty()) {
                    resolved = if Path::new(part).is_absolute() {
                        PathBuf::from(part)
                    } else {
                        resolved.join(part)
                    };
                }
                normalize(&resolved.to_string_lossy())
            }
            BuiltinKind::PathDirname => match Path::new(first).parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    parent.to_string_lossy().into_owned()
                }
                _ if first.starts_with('/') => "/".to_string(),
                _ => ".".to_string(),
            },
            BuiltinKind::PathBasename => {
                let base = Path::new(first)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match parts.get(1) {
                    Some(ext) if !ext.is_empty() && base != *ext => {
                        base.strip_suffix(ext).map(str::to_string).unwrap_or(base)
                    }
                    _ => base,
                }
            }
            _ => Path::new(first)
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default(),
        };
        Ok(JsValue::String(result))
    }
}

fn bound_method<'a>(methods: &[&'static str], receiver: &JsValue<'a>, key: &str) -> JsValue<'a> {
    match methods.iter().copied().find(|m| *m == key) {
        Some(name) => {
            JsValue::builtin(name, 1, BuiltinKind::Method { receiver: Box::new(receiver.clone()) })
        }
        None => JsValue::Undefined,
    }
}

fn normalize(path: &str) -> String {
    Path::new(&clean(path)).to_string_lossy().into_owned()
}

fn own_entries<'a>(value: &JsValue<'a>) -> Flow<'a, Vec<(String, JsValue<'a>)>> {
    Ok(match value {
        JsValue::Object(obj) => obj.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        JsValue::Array(items) => {
            items.borrow().iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect()
        }
        JsValue::String(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), JsValue::String(c.to_string())))
            .collect(),
        JsValue::Undefined | JsValue::Null => {
            return Err(type_error("Cannot convert undefined or null to object"));
        }
        _ => Vec::new(),
    })
}

fn json_stringify<'a>(value: &JsValue<'a>, indent: Option<&JsValue<'a>>) -> Flow<'a, JsValue<'a>> {
    if matches!(
        value,
        JsValue::Undefined | JsValue::Function(_) | JsValue::Builtin(_) | JsValue::Class(_)
    ) {
        return Ok(JsValue::Undefined);
    }
    let snapshot = value.to_json();
    if !snapshot.unresolved.is_empty() {
        return Ok(JsValue::opaque("JSON.stringify(...)"));
    }
    let pretty = indent.is_some_and(|i| match i {
        JsValue::Number(n) => *n >= 1.0,
        JsValue::String(s) => !s.is_empty(),
        _ => false,
    });
    let text = if pretty {
        serde_json::to_string_pretty(&snapshot.value)
    } else {
        serde_json::to_string(&snapshot.value)
    };
    text.map(JsValue::String).map_err(|e| type_error(e.to_string()))
}

fn same_value_zero<'a>(a: &JsValue<'a>, b: &JsValue<'a>) -> bool {
    match (a, b) {
        (JsValue::Number(x), JsValue::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// Resolve `slice(start, end)` arguments against a sequence of `len` items.
fn slice_bounds(args: &[JsValue<'_>], len: usize) -> (usize, usize) {
    let relative = |arg: Option<&JsValue<'_>>, default: usize| -> usize {
        match arg {
            None | Some(JsValue::Undefined) => default,
            Some(value) => {
                let n = value.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    (len as f64 + n.trunc()).max(0.0) as usize
                } else {
                    (n.trunc() as usize).min(len)
                }
            }
        }
    };
    let start = relative(args.first(), 0);
    let end = relative(args.get(1), len);
    (start, end.max(start))
}

fn call_string_method<'a>(s: &str, name: &str, args: &[JsValue<'a>]) -> Flow<'a, JsValue<'a>> {
    let arg = |idx: usize| {
        args.get(idx).map(JsValue::to_js_string).unwrap_or_else(|| "undefined".to_string())
    };
    let value = match name {
        "startsWith" => JsValue::Bool(s.starts_with(arg(0).as_str())),
        "endsWith" => JsValue::Bool(s.ends_with(arg(0).as_str())),
        "includes" => JsValue::Bool(s.contains(arg(0).as_str())),
        "indexOf" => JsValue::Number(
            s.find(arg(0).as_str()).map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "toLowerCase" => JsValue::String(s.to_lowercase()),
        "toUpperCase" => JsValue::String(s.to_uppercase()),
        "trim" => JsValue::string(s.trim()),
        "split" => match args.first() {
            None | Some(JsValue::Undefined) => JsValue::array(vec![JsValue::string(s)]),
            Some(sep) => {
                let sep = sep.to_js_string();
                if sep.is_empty() {
                    JsValue::array(s.chars().map(|c| JsValue::String(c.to_string())).collect())
                } else {
                    JsValue::array(s.split(sep.as_str()).map(JsValue::string).collect())
                }
            }
        },
        "replace" => JsValue::String(s.replacen(arg(0).as_str(), arg(1).as_str(), 1)),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(args, chars.len());
            JsValue::String(chars[start..end].iter().collect())
        }
        other => return Err(type_error(format!("string.{} is not a function", other))),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use crate::{evaluator::load_module, value::JsValue};
    use oxc_allocator::Allocator;
    use serde_json::json;
    use std::path::Path;

    fn export_json(src: &str) -> serde_json::Value {
        let allocator = Allocator::default();
        let module = load_module(&allocator, Path::new("/project/site/astro.config.mjs"), src).unwrap();
        module.export.to_json().value
    }

    #[test]
    fn test_path_module_functions() {
        let src = "import path from 'node:path';\nexport default {\n  join: path.join('a', './b', '../c'),\n  resolve: path.resolve('dist'),\n  abs: path.resolve('ignored', '/srv', 'out'),\n  dir: path.dirname('/a/b/c.js'),\n  base: path.basename('/a/b/c.js', '.js'),\n  ext: path.extname('next.config.mjs'),\n};";
        assert_eq!(
            export_json(src),
            json!({
                "join": "a/c",
                "resolve": "/project/site/dist",
                "abs": "/srv/out",
                "dir": "/a/b",
                "base": "c",
                "ext": ".mjs",
            })
        );
    }

    #[test]
    fn test_require_path_and_dirname() {
        let src = "const { join } = require('path');\nmodule.exports = { outDir: join(__dirname, 'build'), cwd: process.cwd() };";
        assert_eq!(export_json(src), json!({ "outDir": "/project/site/build", "cwd": "/project/site" }));
    }

    #[test]
    fn test_import_meta_url() {
        let src = "export default { url: import.meta.url };";
        assert_eq!(export_json(src), json!({ "url": "file:///project/site/astro.config.mjs" }));
    }

    #[test]
    fn test_identity_helpers() {
        let src = "export default defineConfig({ outDir: './public' });";
        assert_eq!(export_json(src), json!({ "outDir": "./public" }));
    }

    #[test]
    fn test_array_and_string_methods() {
        let src = "const xs = [1, 2, 3];\nexport default {\n  doubled: xs.map((x) => x * 2),\n  odd: xs.filter((x) => x % 2 === 1),\n  found: xs.find((x) => x > 1),\n  joined: ['a', 'b'].concat(['c']).join('-'),\n  has: xs.includes(2),\n  tail: xs.slice(-2),\n  upper: 'docs'.toUpperCase(),\n  parts: 'a/b/c'.split('/'),\n  swapped: 'out-dir'.replace('-', '_'),\n  prefixed: '/base'.startsWith('/'),\n};";
        assert_eq!(
            export_json(src),
            json!({
                "doubled": [2, 4, 6],
                "odd": [1, 3],
                "found": 2,
                "joined": "a-b-c",
                "has": true,
                "tail": [2, 3],
                "upper": "DOCS",
                "parts": ["a", "b", "c"],
                "swapped": "out_dir",
                "prefixed": true,
            })
        );
    }

    #[test]
    fn test_object_and_json_helpers() {
        let src = "const base = { a: 1, b: 2 };\nexport default {\n  keys: Object.keys(base),\n  entries: Object.entries({ x: 'y' }),\n  merged: Object.assign({}, base, { b: 3 }),\n  text: JSON.stringify({ n: 1 }),\n  parsed: JSON.parse('{\"distDir\":\"json\"}').distDir,\n  fromEntries: Object.fromEntries([['k', 'v']]),\n};";
        assert_eq!(
            export_json(src),
            json!({
                "keys": ["a", "b"],
                "entries": [["x", "y"]],
                "merged": { "a": 1, "b": 3 },
                "text": "{\"n\":1}",
                "parsed": "json",
                "fromEntries": { "k": "v" },
            })
        );
    }

    #[test]
    fn test_promise_all_waits_for_slowest() {
        let allocator = Allocator::default();
        let src = "const wait = (ms, v) => new Promise((resolve) => setTimeout(() => resolve(v), ms));\nexport default async () => {\n  const [a, b] = await Promise.all([wait(30, 'a'), wait(10, 'b'), 'c']);\n  return { outDir: a + b };\n};";
        let mut module = load_module(&allocator, Path::new("/project/astro.config.mjs"), src).unwrap();
        let export = module.export.clone();
        let result = module.call(&export, vec![]).unwrap();
        let JsValue::Promise(promise) = result else { panic!("expected a promise") };
        match &*promise {
            crate::promise::Promise::Delayed { after, settlement: crate::promise::Settlement::Fulfilled(v) } => {
                assert_eq!(*after, std::time::Duration::from_millis(30));
                assert_eq!(v.to_json().value, json!({ "outDir": "ab" }));
            }
            _ => panic!("expected a delayed fulfilled promise"),
        }
    }

    #[test]
    fn test_process_env_is_empty() {
        let src = "export default { mode: process.env.NODE_ENV || 'production' };";
        assert_eq!(export_json(src), json!({ "mode": "production" }));
    }

    #[test]
    fn test_console_does_not_affect_result() {
        let src = "console.log('loading config', 1);\nexport default { outDir: 'dist' };";
        assert_eq!(export_json(src), json!({ "outDir": "dist" }));
    }

    #[test]
    fn test_next_constants_module() {
        let allocator = Allocator::default();
        let src = "const { PHASE_DEVELOPMENT_SERVER } = require('next/constants');\nmodule.exports = (phase) => {\n  if (phase === PHASE_DEVELOPMENT_SERVER) {\n    return { distDir: '.next-dev' };\n  }\n  return { distDir: '.next-prod' };\n};";
        let mut module = load_module(&allocator, Path::new("/project/next.config.js"), src).unwrap();
        let export = module.export.clone();
        let dev = module.call(&export, vec![JsValue::string("phase-development-server")]).unwrap();
        assert_eq!(dev.to_json().value, json!({ "distDir": ".next-dev" }));
        let build = module.call(&export, vec![JsValue::string("phase-production-build")]).unwrap();
        assert_eq!(build.to_json().value, json!({ "distDir": ".next-prod" }));
    }

    #[test]
    fn test_esm_import_of_next_constants() {
        let src = "import { PHASE_EXPORT, PHASE_TEST } from 'next/constants';\nexport default { a: PHASE_EXPORT, b: PHASE_TEST };";
        assert_eq!(export_json(src), json!({ "a": "phase-export", "b": "phase-test" }));
    }

    #[test]
    fn test_builtins_keep_unresolved_arguments_unresolved() {
        let allocator = Allocator::default();
        let src = "import path from 'path';\nimport { root } from './paths.mjs';\nexport default {\n  outDir: path.join(root, 'dist'),\n  text: String(root),\n  joined: ['a', root].join('/'),\n  keys: Object.keys(root),\n  json: JSON.stringify({ root }),\n  plain: path.join('a', 'b'),\n};";
        let module = load_module(&allocator, Path::new("/project/astro.config.mjs"), src).unwrap();
        let snapshot = module.export.to_json();
        assert_eq!(snapshot.value, json!({ "plain": "a/b" }));
        assert_eq!(snapshot.unresolved, ["outDir", "text", "joined", "keys", "json"]);
    }

    #[test]
    fn test_filter_on_unresolved_predicate_fails() {
        let allocator = Allocator::default();
        let src = "import { enabled } from 'pkg';\nexport default { plugins: ['a', 'b'].filter(() => enabled) };";
        let err = load_module(&allocator, Path::new("/project/astro.config.mjs"), src).err().unwrap();
        assert!(matches!(err, crate::error::EvalError::UnresolvedCondition(_)), "{err}");
    }
}
