//! Tree-walking interpreter over the oxc AST.
//!
//! Only the subset of JavaScript that framework config files use in practice is interpreted.
//! Anything outside it stops evaluation with [`EvalError::Unsupported`] instead of guessing.

use log::{debug, trace, warn};
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_span::{GetSpan, Span};
use oxc_syntax::operator::{AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator};
use std::{
    cell::RefCell,
    collections::HashSet,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use crate::{
    constants::{MAX_CALL_DEPTH, MAX_TIMER_TICKS},
    error::{EvalError, EvalResult},
    parser::{ModuleKind, module_kind, parse_module, read_source},
    promise::{Promise, Settlement, TimerQueue},
    scope::{AssignOutcome, Scope},
    value::{BuiltinKind, Closure, FunctionNode, JsObject, JsValue},
};

/// Non-local exits from evaluation.
pub(crate) enum Abrupt<'a> {
    /// A JavaScript exception.
    Throw(JsValue<'a>),
    /// An `await` on a promise that never settles; unwinds the enclosing async function.
    Suspend,
    Fatal(EvalError),
}

impl From<EvalError> for Abrupt<'_> {
    fn from(err: EvalError) -> Self {
        Abrupt::Fatal(err)
    }
}

impl Abrupt<'_> {
    fn into_error(self) -> EvalError {
        match self {
            Abrupt::Throw(value) => EvalError::Thrown(value.describe()),
            Abrupt::Suspend => EvalError::TopLevelAwait,
            Abrupt::Fatal(err) => err,
        }
    }
}

pub(crate) type Flow<'a, T> = Result<T, Abrupt<'a>>;

pub(crate) fn type_error<'a>(message: impl Into<String>) -> Abrupt<'a> {
    Abrupt::Throw(JsValue::error("TypeError", message))
}

pub(crate) fn reference_error<'a>(message: impl Into<String>) -> Abrupt<'a> {
    Abrupt::Throw(JsValue::error("ReferenceError", message))
}

enum Completion<'a> {
    Normal,
    Return(JsValue<'a>),
}

/// Where an assignment writes.
enum Place<'a> {
    Binding(String),
    Member(JsValue<'a>, String),
}

/// A config module after its top-level code has run.
pub struct LoadedModule<'a> {
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// The module's export: `export default`, `export =`, or `module.exports`.
    pub export: JsValue<'a>,
    interpreter: Interpreter<'a>,
}

impl<'a> LoadedModule<'a> {
    /// Call a function value produced by this module with exactly `args`.
    pub fn call(
        &mut self,
        callee: &JsValue<'a>,
        args: Vec<JsValue<'a>>,
    ) -> EvalResult<JsValue<'a>> {
        trace!("Calling {} with {} argument(s)", callee.kind_name(), args.len());
        self.interpreter.call_value(callee, args).map_err(Abrupt::into_error)
    }
}

/// Read, parse and evaluate the config module at `path`.
pub fn load_file<'a>(allocator: &'a Allocator, path: &Path) -> EvalResult<LoadedModule<'a>> {
    let source = read_source(path)?;
    let source: &'a str = allocator.alloc_str(&source);
    load_module(allocator, path, source)
}

/// Parse and evaluate `source` as the config module at `path`.
pub fn load_module<'a>(
    allocator: &'a Allocator,
    path: &Path,
    source: &'a str,
) -> EvalResult<LoadedModule<'a>> {
    let program = parse_module(allocator, path, source)?;
    let kind = module_kind(program);

    let mut interpreter = Interpreter::new(path, source);
    interpreter.run_program(program).map_err(Abrupt::into_error)?;
    let export = interpreter.export_value();
    debug!("Loaded {} as {:?}, export is {}", path.display(), kind, export.kind_name());

    Ok(LoadedModule { path: path.to_path_buf(), kind, export, interpreter })
}

pub(crate) struct Interpreter<'a> {
    pub(crate) path: PathBuf,
    pub(crate) dir: PathBuf,
    source: &'a str,
    pub(crate) global: Scope<'a>,
    /// Frames captured by closures, cleared on teardown to break reference cycles.
    scopes: Vec<Scope<'a>>,
    captured: HashSet<*const ()>,
    pub(crate) timers: TimerQueue<'a>,
    async_frames: Vec<Duration>,
    call_depth: usize,
    default_export: Option<JsValue<'a>>,
    export_assignment: Option<JsValue<'a>>,
    /// The object `module.exports` and `exports` start out as.
    pub(crate) exports: JsValue<'a>,
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        for scope in &self.scopes {
            scope.clear();
        }
        self.global.clear();
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(path: &Path, source: &'a str) -> Self {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let mut interpreter = Interpreter {
            path: path.to_path_buf(),
            dir,
            source,
            global: Scope::root(),
            scopes: Vec::new(),
            captured: HashSet::new(),
            timers: TimerQueue::default(),
            async_frames: Vec::new(),
            call_depth: 0,
            default_export: None,
            export_assignment: None,
            exports: JsValue::object(JsObject::default()),
        };
        interpreter.install_globals();
        interpreter
    }

    fn run_program(&mut self, program: &'a Program<'a>) -> Flow<'a, ()> {
        let global = self.global.clone();
        self.exec_statements(&program.body, &global)?;
        Ok(())
    }

    fn export_value(&self) -> JsValue<'a> {
        if let Some(value) = &self.default_export {
            return value.clone();
        }
        if let Some(value) = &self.export_assignment {
            return value.clone();
        }
        let exports = match self.global.lookup("module") {
            Some(module) => self.get_member(&module, "exports").unwrap_or(JsValue::Undefined),
            None => JsValue::Undefined,
        };
        let populated = exports.as_object().is_some_and(|obj| !obj.is_empty());
        if populated || !strict_equals(&exports, &self.exports) {
            exports
        } else {
            JsValue::Undefined
        }
    }

    fn snippet(&self, span: Span) -> String {
        let text = self.source.get(span.start as usize..span.end as usize).unwrap_or("?");
        let line = text.lines().next().unwrap_or_default();
        if line.chars().count() > 60 {
            format!("{}...", line.chars().take(60).collect::<String>())
        } else {
            line.to_string()
        }
    }

    fn unsupported(&self, span: Span) -> Abrupt<'a> {
        Abrupt::Fatal(EvalError::unsupported(format!("`{}`", self.snippet(span))))
    }

    fn make_closure(
        &mut self,
        node: FunctionNode<'a>,
        scope: &Scope<'a>,
        name: Option<String>,
    ) -> JsValue<'a> {
        self.capture(scope);
        JsValue::Function(Rc::new(Closure { node, scope: scope.clone(), name }))
    }

    /// Track `scope` and its ancestors. Frames no closure captured are freed when the call
    /// that created them returns.
    fn capture(&mut self, scope: &Scope<'a>) {
        let global = self.global.id();
        let mut frame = Some(scope);
        while let Some(current) = frame {
            if current.id() == global || !self.captured.insert(current.id()) {
                break;
            }
            self.scopes.push(current.clone());
            frame = current.parent();
        }
    }

    // Statements

    fn exec_statements(
        &mut self,
        stmts: &'a [Statement<'a>],
        scope: &Scope<'a>,
    ) -> Flow<'a, Completion<'a>> {
        self.hoist_functions(stmts, scope);
        for stmt in stmts {
            if let Completion::Return(value) = self.exec_statement(stmt, scope)? {
                return Ok(Completion::Return(value));
            }
        }
        Ok(Completion::Normal)
    }

    fn hoist_functions(&mut self, stmts: &'a [Statement<'a>], scope: &Scope<'a>) {
        for stmt in stmts {
            let func = match stmt {
                Statement::FunctionDeclaration(func) => func,
                Statement::ExportNamedDeclaration(decl) => match &decl.declaration {
                    Some(Declaration::FunctionDeclaration(func)) => func,
                    _ => continue,
                },
                _ => continue,
            };
            if let (Some(id), Some(_)) = (&func.id, &func.body) {
                let name = id.name.to_string();
                let closure =
                    self.make_closure(FunctionNode::Function(func), scope, Some(name.clone()));
                scope.declare(&name, closure, true);
            }
        }
    }

    fn exec_statement(
        &mut self,
        stmt: &'a Statement<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Completion<'a>> {
        match stmt {
            Statement::EmptyStatement(_)
            | Statement::FunctionDeclaration(_)
            | Statement::TSTypeAliasDeclaration(_)
            | Statement::TSInterfaceDeclaration(_)
            | Statement::TSModuleDeclaration(_)
            | Statement::TSNamespaceExportDeclaration(_)
            | Statement::ExportAllDeclaration(_) => {}
            Statement::ExpressionStatement(es) => {
                self.eval(&es.expression, scope)?;
            }
            Statement::VariableDeclaration(decl) => self.exec_variable_declaration(decl, scope)?,
            Statement::ClassDeclaration(class) => self.declare_class(class, scope),
            Statement::ReturnStatement(ret) => {
                let value = match &ret.argument {
                    Some(arg) => self.eval(arg, scope)?,
                    None => JsValue::Undefined,
                };
                return Ok(Completion::Return(value));
            }
            Statement::IfStatement(stmt) => {
                if truthy(&self.eval(&stmt.test, scope)?)? {
                    return self.exec_statement(&stmt.consequent, scope);
                } else if let Some(alternate) = &stmt.alternate {
                    return self.exec_statement(alternate, scope);
                }
            }
            Statement::BlockStatement(block) => {
                let inner = scope.child();
                return self.exec_statements(&block.body, &inner);
            }
            Statement::ThrowStatement(stmt) => {
                let value = self.eval(&stmt.argument, scope)?;
                return Err(Abrupt::Throw(value));
            }
            Statement::TryStatement(stmt) => return self.exec_try(stmt, scope),
            Statement::ImportDeclaration(decl) => self.exec_import(decl, scope),
            Statement::ExportDefaultDeclaration(decl) => self.exec_export_default(decl, scope)?,
            Statement::ExportNamedDeclaration(decl) => self.exec_export_named(decl, scope)?,
            Statement::TSExportAssignment(assign) => {
                let value = self.eval(&assign.expression, scope)?;
                self.export_assignment = Some(value);
            }
            other => return Err(self.unsupported(other.span())),
        }
        Ok(Completion::Normal)
    }

    fn exec_variable_declaration(
        &mut self,
        decl: &'a VariableDeclaration<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, ()> {
        if decl.declare {
            return Ok(());
        }
        let mutable = !matches!(decl.kind, VariableDeclarationKind::Const);
        for declarator in &decl.declarations {
            let value = match (&declarator.init, &declarator.id.kind) {
                (
                    Some(Expression::ArrowFunctionExpression(arrow)),
                    BindingPatternKind::BindingIdentifier(id),
                ) => {
                    self.make_closure(FunctionNode::Arrow(arrow), scope, Some(id.name.to_string()))
                }
                (Some(init), _) => self.eval(init, scope)?,
                (None, _) => JsValue::Undefined,
            };
            self.bind_pattern(&declarator.id, value, scope, mutable)?;
        }
        Ok(())
    }

    fn declare_class(&mut self, class: &'a Class<'a>, scope: &Scope<'a>) {
        if let Some(id) = &class.id {
            scope.declare(id.name.as_str(), JsValue::Class(Some(id.name.to_string())), true);
        }
    }

    fn exec_try(
        &mut self,
        stmt: &'a TryStatement<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Completion<'a>> {
        let inner = scope.child();
        let result = match (self.exec_statements(&stmt.block.body, &inner), &stmt.handler) {
            (Err(Abrupt::Throw(reason)), Some(handler)) => self.exec_catch(handler, reason, scope),
            (result, _) => result,
        };

        let Some(finalizer) = &stmt.finalizer else {
            return result;
        };
        if matches!(result, Err(Abrupt::Suspend) | Err(Abrupt::Fatal(_))) {
            return result;
        }
        let fin_scope = scope.child();
        if let Completion::Return(value) = self.exec_statements(&finalizer.body, &fin_scope)? {
            return Ok(Completion::Return(value));
        }
        result
    }

    fn exec_catch(
        &mut self,
        handler: &'a CatchClause<'a>,
        reason: JsValue<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Completion<'a>> {
        trace!("Caught {}", reason.describe());
        let catch_scope = scope.child();
        if let Some(param) = &handler.param {
            self.bind_pattern(&param.pattern, reason, &catch_scope, true)?;
        }
        self.exec_statements(&handler.body.body, &catch_scope)
    }

    fn exec_import(&mut self, decl: &'a ImportDeclaration<'a>, scope: &Scope<'a>) {
        if decl.import_kind.is_type() {
            return;
        }
        let request = decl.source.value.as_str();
        let module = self.module_for(request);
        let Some(specifiers) = &decl.specifiers else {
            trace!("Ignoring side-effect import '{}'", request);
            return;
        };

        for spec in specifiers {
            match spec {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    scope.declare(s.local.name.as_str(), module.clone(), false);
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    scope.declare(s.local.name.as_str(), module.clone(), false);
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    if s.import_kind.is_type() {
                        continue;
                    }
                    let imported = s.imported.name();
                    let value = match &module {
                        JsValue::Object(obj) => {
                            let obj = obj.borrow();
                            obj.get(imported.as_str()).cloned().unwrap_or(JsValue::Undefined)
                        }
                        _ => JsValue::opaque(format!("{} from '{}'", imported, request)),
                    };
                    scope.declare(s.local.name.as_str(), value, false);
                }
            }
        }
    }

    fn exec_export_default(
        &mut self,
        decl: &'a ExportDefaultDeclaration<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, ()> {
        let value = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                let name = func.id.as_ref().map(|id| id.name.to_string());
                let closure = self.make_closure(FunctionNode::Function(func), scope, name.clone());
                if let Some(name) = name {
                    scope.declare(&name, closure.clone(), true);
                }
                closure
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                self.declare_class(class, scope);
                JsValue::Class(class.id.as_ref().map(|id| id.name.to_string()))
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => return Ok(()),
            other => match other.as_expression() {
                Some(expr) => self.eval(expr, scope)?,
                None => return Err(self.unsupported(decl.span)),
            },
        };
        self.default_export = Some(value);
        Ok(())
    }

    fn exec_export_named(
        &mut self,
        decl: &'a ExportNamedDeclaration<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, ()> {
        if decl.export_kind.is_type() {
            return Ok(());
        }
        match &decl.declaration {
            Some(Declaration::VariableDeclaration(var)) => {
                self.exec_variable_declaration(var, scope)?
            }
            Some(Declaration::ClassDeclaration(class)) => self.declare_class(class, scope),
            _ => {}
        }

        for spec in &decl.specifiers {
            if spec.exported.name().as_str() != "default" {
                continue;
            }
            let local = spec.local.name();
            let value = match &decl.source {
                Some(source) => JsValue::opaque(format!("{} from '{}'", local, source.value)),
                None => self.eval_identifier(local.as_str(), scope)?,
            };
            self.default_export = Some(value);
        }
        Ok(())
    }

    // Bindings

    fn bind_pattern(
        &mut self,
        pattern: &'a BindingPattern<'a>,
        value: JsValue<'a>,
        scope: &Scope<'a>,
        mutable: bool,
    ) -> Flow<'a, ()> {
        match &pattern.kind {
            BindingPatternKind::BindingIdentifier(id) => {
                scope.declare(id.name.as_str(), value, mutable);
            }
            BindingPatternKind::AssignmentPattern(assign) => {
                let value = match value {
                    JsValue::Undefined => self.eval(&assign.right, scope)?,
                    other => other,
                };
                self.bind_pattern(&assign.left, value, scope, mutable)?;
            }
            BindingPatternKind::ObjectPattern(obj) => {
                if value.is_nullish() {
                    return Err(type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.kind_name()
                    )));
                }
                let mut taken = Vec::with_capacity(obj.properties.len());
                for prop in &obj.properties {
                    let key = self.property_key(&prop.key, prop.computed, scope)?;
                    let item = self.get_member(&value, &key)?;
                    self.bind_pattern(&prop.value, item, scope, mutable)?;
                    taken.push(key);
                }
                if let Some(rest) = &obj.rest {
                    let remaining = match &value {
                        JsValue::Object(source) => source
                            .borrow()
                            .iter()
                            .filter(|(k, _)| !taken.contains(k))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                        _ => JsObject::default(),
                    };
                    self.bind_pattern(&rest.argument, JsValue::object(remaining), scope, mutable)?;
                }
            }
            BindingPatternKind::ArrayPattern(arr) => {
                let items = self.spread_items(value)?;
                for (idx, element) in arr.elements.iter().enumerate() {
                    if let Some(element) = element {
                        let item = items.get(idx).cloned().unwrap_or(JsValue::Undefined);
                        self.bind_pattern(element, item, scope, mutable)?;
                    }
                }
                if let Some(rest) = &arr.rest {
                    let tail =
                        items.get(arr.elements.len()..).map(<[_]>::to_vec).unwrap_or_default();
                    self.bind_pattern(&rest.argument, JsValue::array(tail), scope, mutable)?;
                }
            }
        }
        Ok(())
    }

    fn bind_params(
        &mut self,
        params: &'a FormalParameters<'a>,
        args: &[JsValue<'a>],
        scope: &Scope<'a>,
    ) -> Flow<'a, ()> {
        for (idx, param) in params.items.iter().enumerate() {
            let value = args.get(idx).cloned().unwrap_or(JsValue::Undefined);
            self.bind_pattern(&param.pattern, value, scope, true)?;
        }
        if let Some(rest) = &params.rest {
            let extra = args.get(params.items.len()..).map(<[_]>::to_vec).unwrap_or_default();
            self.bind_pattern(&rest.argument, JsValue::array(extra), scope, true)?;
        }
        Ok(())
    }

    // Calls

    pub(crate) fn call_value(
        &mut self,
        callee: &JsValue<'a>,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        match callee {
            JsValue::Function(closure) => self.call_closure(closure.clone(), args),
            JsValue::Builtin(builtin) => self.call_builtin(builtin.clone(), args),
            JsValue::Opaque(desc) => Ok(JsValue::opaque(format!("{}(...)", desc))),
            JsValue::Class(name) => Err(type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                name.as_deref().unwrap_or("anonymous")
            ))),
            other => Err(type_error(format!("{} is not a function", other.kind_name()))),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<Closure<'a>>,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        if closure.is_generator() {
            return Err(EvalError::unsupported("generator function").into());
        }
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallDepthExceeded(MAX_CALL_DEPTH).into());
        }
        self.call_depth += 1;
        let result = if closure.is_async() {
            self.run_async(&closure, args)
        } else {
            self.run_body(&closure, args)
        };
        self.call_depth -= 1;
        result
    }

    fn run_body(
        &mut self,
        closure: &Rc<Closure<'a>>,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        let scope = closure.scope.child();
        let (params, body, concise) = match closure.node {
            FunctionNode::Function(func) => {
                if let Some(id) = &func.id {
                    scope.declare(id.name.as_str(), JsValue::Function(closure.clone()), true);
                }
                (&*func.params, func.body.as_deref(), false)
            }
            FunctionNode::Arrow(arrow) => (&*arrow.params, Some(&*arrow.body), arrow.expression),
        };

        if !closure.is_arrow() {
            scope.declare("arguments", JsValue::array(args.clone()), true);
        }
        self.bind_params(params, &args, &scope)?;

        let Some(body) = body else {
            return Ok(JsValue::Undefined);
        };
        if concise {
            if let Some(Statement::ExpressionStatement(es)) = body.statements.first() {
                return self.eval(&es.expression, &scope);
            }
        }
        match self.exec_statements(&body.statements, &scope)? {
            Completion::Return(value) => Ok(value),
            Completion::Normal => Ok(JsValue::Undefined),
        }
    }

    /// Run an async function to completion on the virtual clock and wrap the outcome.
    fn run_async(
        &mut self,
        closure: &Rc<Closure<'a>>,
        args: Vec<JsValue<'a>>,
    ) -> Flow<'a, JsValue<'a>> {
        self.async_frames.push(Duration::ZERO);
        let outcome = self.run_body(closure, args);
        let elapsed = self.async_frames.pop().unwrap_or_default();

        let promise = match outcome {
            Ok(JsValue::Promise(inner)) => (*inner).clone().delayed_by(elapsed),
            Ok(value) => Promise::after(elapsed, Settlement::Fulfilled(value)),
            Err(Abrupt::Throw(reason)) => Promise::after(elapsed, Settlement::Rejected(reason)),
            Err(Abrupt::Suspend) => {
                trace!("Async function suspended on a promise that never settles");
                Promise::Never
            }
            Err(fatal) => return Err(fatal),
        };
        Ok(JsValue::promise(promise))
    }

    fn await_value(&mut self, value: JsValue<'a>) -> Flow<'a, JsValue<'a>> {
        let JsValue::Promise(promise) = value else {
            return Ok(value);
        };
        let settlement = match &*promise {
            Promise::Settled(settlement) => settlement.clone(),
            Promise::Delayed { after, settlement } => match self.async_frames.last_mut() {
                Some(elapsed) => {
                    *elapsed += *after;
                    settlement.clone()
                }
                None => return Err(EvalError::TopLevelAwait.into()),
            },
            Promise::Never if self.async_frames.is_empty() => {
                return Err(EvalError::TopLevelAwait.into());
            }
            Promise::Never => return Err(Abrupt::Suspend),
        };
        match settlement {
            Settlement::Fulfilled(value) => Ok(value),
            Settlement::Rejected(reason) => Err(Abrupt::Throw(reason)),
        }
    }

    /// `new Promise(executor)`: run the executor, then fire virtual timers until it settles.
    pub(crate) fn construct_promise(&mut self, executor: JsValue<'a>) -> Flow<'a, JsValue<'a>> {
        if !is_callable(&executor) {
            return Err(type_error(format!(
                "Promise resolver {} is not a function",
                executor.to_js_string()
            )));
        }
        let slot: Rc<RefCell<Option<Settlement<'a>>>> = Rc::new(RefCell::new(None));
        let settle = |fulfil| BuiltinKind::Settle { slot: slot.clone(), fulfil };
        let resolve = JsValue::builtin("resolve", 1, settle(true));
        let reject = JsValue::builtin("reject", 1, settle(false));

        let outer = std::mem::take(&mut self.timers);
        let drained = match self.call_value(&executor, vec![resolve, reject]) {
            Ok(_) => self.drain_timers(&slot),
            Err(Abrupt::Throw(reason)) => {
                settle_once(&slot, Settlement::Rejected(reason));
                Ok(Duration::ZERO)
            }
            Err(other) => Err(other),
        };
        self.timers = outer;
        let after = drained?;

        let settled = slot.borrow_mut().take();
        let promise = match settled {
            Some(Settlement::Fulfilled(JsValue::Promise(inner))) => {
                (*inner).clone().delayed_by(after)
            }
            Some(settlement) => Promise::after(after, settlement),
            None => {
                trace!("Promise executor never settled");
                Promise::Never
            }
        };
        Ok(JsValue::promise(promise))
    }

    fn drain_timers(&mut self, slot: &Rc<RefCell<Option<Settlement<'a>>>>) -> Flow<'a, Duration> {
        let mut ticks = 0;
        while slot.borrow().is_none() {
            let Some(timer) = self.timers.pop_next() else {
                break;
            };
            ticks += 1;
            if ticks > MAX_TIMER_TICKS {
                warn!("Giving up on a promise after {} timer callbacks", MAX_TIMER_TICKS);
                break;
            }
            trace!("Firing virtual timer at {:?}", timer.deadline);
            match self.call_value(&timer.callback, timer.args) {
                Ok(_) => {}
                Err(Abrupt::Throw(reason)) => {
                    debug!("Uncaught exception in timer callback: {}", reason.describe());
                }
                Err(other) => return Err(other),
            }
        }
        Ok(self.timers.now())
    }

    // Expressions

    pub(crate) fn eval(
        &mut self,
        expr: &'a Expression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        match expr {
            Expression::BooleanLiteral(lit) => Ok(JsValue::Bool(lit.value)),
            Expression::NullLiteral(_) => Ok(JsValue::Null),
            Expression::NumericLiteral(lit) => Ok(JsValue::Number(lit.value)),
            Expression::StringLiteral(lit) => Ok(JsValue::string(lit.value.as_str())),
            Expression::TemplateLiteral(tpl) => self.eval_template(tpl, scope),
            Expression::Identifier(id) => self.eval_identifier(id.name.as_str(), scope),
            Expression::ThisExpression(_) => Ok(JsValue::Undefined),
            Expression::MetaProperty(meta) => {
                if meta.meta.name.as_str() == "import" && meta.property.name.as_str() == "meta" {
                    Ok(self.import_meta())
                } else {
                    Err(self.unsupported(meta.span))
                }
            }
            Expression::ArrayExpression(arr) => self.eval_array(arr, scope),
            Expression::ObjectExpression(obj) => self.eval_object(obj, scope),
            Expression::ArrowFunctionExpression(arrow) => {
                Ok(self.make_closure(FunctionNode::Arrow(arrow), scope, None))
            }
            Expression::FunctionExpression(func) => {
                let name = func.id.as_ref().map(|id| id.name.to_string());
                Ok(self.make_closure(FunctionNode::Function(func), scope, name))
            }
            Expression::ClassExpression(class) => {
                Ok(JsValue::Class(class.id.as_ref().map(|id| id.name.to_string())))
            }
            Expression::UnaryExpression(unary) => self.eval_unary(unary, scope),
            Expression::BinaryExpression(bin) => {
                let left = self.eval(&bin.left, scope)?;
                let right = self.eval(&bin.right, scope)?;
                binary(bin.operator, left, right)
            }
            Expression::LogicalExpression(logical) => {
                let left = self.eval(&logical.left, scope)?;
                if left.is_opaque() {
                    return Ok(JsValue::opaque(self.snippet(logical.span)));
                }
                let short_circuit = match logical.operator {
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::And => !left.is_truthy(),
                    LogicalOperator::Coalesce => !left.is_nullish(),
                };
                if short_circuit { Ok(left) } else { self.eval(&logical.right, scope) }
            }
            Expression::ConditionalExpression(cond) => match self.eval(&cond.test, scope)? {
                JsValue::Opaque(_) => Ok(JsValue::opaque(self.snippet(cond.span))),
                test if test.is_truthy() => self.eval(&cond.consequent, scope),
                _ => self.eval(&cond.alternate, scope),
            },
            Expression::SequenceExpression(seq) => {
                let mut last = JsValue::Undefined;
                for expr in &seq.expressions {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
            Expression::ParenthesizedExpression(paren) => self.eval(&paren.expression, scope),
            Expression::AssignmentExpression(assign) => self.eval_assignment(assign, scope),
            Expression::AwaitExpression(await_expr) => {
                let value = self.eval(&await_expr.argument, scope)?;
                self.await_value(value)
            }
            Expression::NewExpression(new) => self.eval_new(new, scope),
            Expression::CallExpression(call) => {
                Ok(self.eval_call(call, scope)?.unwrap_or(JsValue::Undefined))
            }
            Expression::StaticMemberExpression(member) => {
                Ok(self.eval_static_member(member, scope)?.unwrap_or(JsValue::Undefined))
            }
            Expression::ComputedMemberExpression(member) => {
                Ok(self.eval_computed_member(member, scope)?.unwrap_or(JsValue::Undefined))
            }
            Expression::ChainExpression(chain) => {
                let value = match &chain.expression {
                    ChainElement::CallExpression(call) => self.eval_call(call, scope)?,
                    ChainElement::StaticMemberExpression(member) => {
                        self.eval_static_member(member, scope)?
                    }
                    ChainElement::ComputedMemberExpression(member) => {
                        self.eval_computed_member(member, scope)?
                    }
                    ChainElement::TSNonNullExpression(e) => {
                        self.eval_optional(&e.expression, scope)?
                    }
                    other => return Err(self.unsupported(other.span())),
                };
                Ok(value.unwrap_or(JsValue::Undefined))
            }
            Expression::TSAsExpression(e) => self.eval(&e.expression, scope),
            Expression::TSSatisfiesExpression(e) => self.eval(&e.expression, scope),
            Expression::TSNonNullExpression(e) => self.eval(&e.expression, scope),
            Expression::TSTypeAssertion(e) => self.eval(&e.expression, scope),
            Expression::TSInstantiationExpression(e) => self.eval(&e.expression, scope),
            other => Err(self.unsupported(other.span())),
        }
    }

    /// Evaluate a link of an optional chain. `None` means the chain short-circuited.
    fn eval_optional(
        &mut self,
        expr: &'a Expression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Option<JsValue<'a>>> {
        match expr {
            Expression::StaticMemberExpression(member) => self.eval_static_member(member, scope),
            Expression::ComputedMemberExpression(member) => {
                self.eval_computed_member(member, scope)
            }
            Expression::CallExpression(call) => self.eval_call(call, scope),
            Expression::TSNonNullExpression(e) => self.eval_optional(&e.expression, scope),
            other => self.eval(other, scope).map(Some),
        }
    }

    fn eval_static_member(
        &mut self,
        member: &'a StaticMemberExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Option<JsValue<'a>>> {
        let Some(object) = self.eval_optional(&member.object, scope)? else {
            return Ok(None);
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        self.get_member(&object, member.property.name.as_str()).map(Some)
    }

    fn eval_computed_member(
        &mut self,
        member: &'a ComputedMemberExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Option<JsValue<'a>>> {
        let Some(object) = self.eval_optional(&member.object, scope)? else {
            return Ok(None);
        };
        if member.optional && object.is_nullish() {
            return Ok(None);
        }
        let key = self.eval(&member.expression, scope)?;
        if key.is_opaque() {
            return Ok(Some(JsValue::opaque(self.snippet(member.span))));
        }
        self.get_member(&object, &key.to_js_string()).map(Some)
    }

    fn eval_call(
        &mut self,
        call: &'a CallExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, Option<JsValue<'a>>> {
        let Some(callee) = self.eval_optional(&call.callee, scope)? else {
            return Ok(None);
        };
        if call.optional && callee.is_nullish() {
            return Ok(None);
        }
        let args = self.eval_arguments(&call.arguments, scope)?;
        if !is_callable(&callee) && !matches!(callee, JsValue::Class(_)) {
            let callee = self.snippet(call.callee.span());
            return Err(type_error(format!("{} is not a function", callee)));
        }
        self.call_value(&callee, args).map(Some)
    }

    fn eval_new(&mut self, new: &'a NewExpression<'a>, scope: &Scope<'a>) -> Flow<'a, JsValue<'a>> {
        let callee = self.eval(&new.callee, scope)?;
        let args = self.eval_arguments(&new.arguments, scope)?;
        match &callee {
            JsValue::Builtin(builtin) => match builtin.kind {
                BuiltinKind::PromiseConstructor => {
                    self.construct_promise(args.into_iter().next().unwrap_or(JsValue::Undefined))
                }
                BuiltinKind::ErrorConstructor
                | BuiltinKind::ToStringFn
                | BuiltinKind::ToNumberFn
                | BuiltinKind::ToBooleanFn => self.call_builtin(builtin.clone(), args),
                _ => Err(type_error(format!("{} is not a constructor", builtin.name))),
            },
            JsValue::Opaque(desc) => Ok(JsValue::opaque(format!("new {}(...)", desc))),
            JsValue::Function(_) | JsValue::Class(_) => Err(self.unsupported(new.span)),
            _ => {
                let callee = self.snippet(new.callee.span());
                Err(type_error(format!("{} is not a constructor", callee)))
            }
        }
    }

    fn eval_arguments(
        &mut self,
        args: &'a [Argument<'a>],
        scope: &Scope<'a>,
    ) -> Flow<'a, Vec<JsValue<'a>>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Argument::SpreadElement(spread) => {
                    let value = self.eval(&spread.argument, scope)?;
                    out.extend(self.spread_items(value)?);
                }
                other => match other.as_expression() {
                    Some(expr) => out.push(self.eval(expr, scope)?),
                    None => return Err(self.unsupported(other.span())),
                },
            }
        }
        Ok(out)
    }

    pub(crate) fn spread_items(&self, value: JsValue<'a>) -> Flow<'a, Vec<JsValue<'a>>> {
        match value {
            JsValue::Array(items) => Ok(items.borrow().clone()),
            JsValue::String(s) => Ok(s.chars().map(|c| JsValue::String(c.to_string())).collect()),
            other => Err(type_error(format!("{} is not iterable", other.kind_name()))),
        }
    }

    fn eval_identifier(&self, name: &str, scope: &Scope<'a>) -> Flow<'a, JsValue<'a>> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        Err(reference_error(format!("{} is not defined", name)))
    }

    fn eval_template(
        &mut self,
        tpl: &'a TemplateLiteral<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        let mut out = String::new();
        let mut unresolved = false;
        for (idx, quasi) in tpl.quasis.iter().enumerate() {
            out.push_str(quasi.value.cooked.as_ref().unwrap_or(&quasi.value.raw).as_str());
            if let Some(expr) = tpl.expressions.get(idx) {
                let value = self.eval(expr, scope)?;
                unresolved |= value.is_opaque();
                out.push_str(&value.to_js_string());
            }
        }
        if unresolved {
            return Ok(JsValue::opaque(self.snippet(tpl.span)));
        }
        Ok(JsValue::String(out))
    }

    fn eval_array(
        &mut self,
        arr: &'a ArrayExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        let mut items = Vec::with_capacity(arr.elements.len());
        for element in &arr.elements {
            match element {
                ArrayExpressionElement::SpreadElement(spread) => {
                    let value = self.eval(&spread.argument, scope)?;
                    items.extend(self.spread_items(value)?);
                }
                ArrayExpressionElement::Elision(_) => items.push(JsValue::Undefined),
                other => match other.as_expression() {
                    Some(expr) => items.push(self.eval(expr, scope)?),
                    None => return Err(self.unsupported(other.span())),
                },
            }
        }
        Ok(JsValue::array(items))
    }

    fn eval_object(
        &mut self,
        obj: &'a ObjectExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        let mut out = JsObject::default();
        for prop in &obj.properties {
            match prop {
                ObjectPropertyKind::SpreadProperty(spread) => {
                    match self.eval(&spread.argument, scope)? {
                        JsValue::Object(source) => {
                            for (key, value) in source.borrow().iter() {
                                out.insert(key.clone(), value.clone());
                            }
                        }
                        JsValue::Array(items) => {
                            for (idx, value) in items.borrow().iter().enumerate() {
                                out.insert(idx.to_string(), value.clone());
                            }
                        }
                        JsValue::Opaque(desc) => {
                            debug!("Spreading unresolved value {} contributes no keys", desc);
                        }
                        _ => {}
                    }
                }
                ObjectPropertyKind::ObjectProperty(p) => {
                    if matches!(p.kind, PropertyKind::Get | PropertyKind::Set) {
                        trace!("Skipping accessor property");
                        continue;
                    }
                    let key = self.property_key(&p.key, p.computed, scope)?;
                    let value = match &p.value {
                        Expression::FunctionExpression(func) if func.id.is_none() => {
                            let name = Some(key.clone());
                            self.make_closure(FunctionNode::Function(func), scope, name)
                        }
                        Expression::ArrowFunctionExpression(arrow) => {
                            self.make_closure(FunctionNode::Arrow(arrow), scope, Some(key.clone()))
                        }
                        value => self.eval(value, scope)?,
                    };
                    out.insert(key, value);
                }
            }
        }
        Ok(JsValue::object(out))
    }

    fn property_key(
        &mut self,
        key: &'a PropertyKey<'a>,
        computed: bool,
        scope: &Scope<'a>,
    ) -> Flow<'a, String> {
        if !computed {
            if let Some(name) = key.static_name() {
                return Ok(name.into_owned());
            }
        }
        match key.as_expression() {
            Some(expr) => Ok(self.eval(expr, scope)?.to_js_string()),
            None => Err(self.unsupported(key.span())),
        }
    }

    fn eval_unary(
        &mut self,
        unary: &'a UnaryExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        match unary.operator {
            UnaryOperator::Typeof => {
                if let Expression::Identifier(id) = &unary.argument {
                    if !scope.has(id.name.as_str()) {
                        return Ok(JsValue::string("undefined"));
                    }
                }
                match self.eval(&unary.argument, scope)? {
                    JsValue::Opaque(_) => Ok(JsValue::opaque(self.snippet(unary.span))),
                    value => Ok(JsValue::string(value.type_of())),
                }
            }
            UnaryOperator::Delete => {
                let (object, key) = match &unary.argument {
                    Expression::StaticMemberExpression(member) => {
                        (self.eval(&member.object, scope)?, member.property.name.to_string())
                    }
                    Expression::ComputedMemberExpression(member) => {
                        let object = self.eval(&member.object, scope)?;
                        (object, self.eval(&member.expression, scope)?.to_js_string())
                    }
                    _ => return Ok(JsValue::Bool(true)),
                };
                delete_member(&object, &key)?;
                Ok(JsValue::Bool(true))
            }
            op => {
                let value = self.eval(&unary.argument, scope)?;
                if value.is_opaque() && !matches!(op, UnaryOperator::Void) {
                    return Ok(JsValue::opaque(self.snippet(unary.span)));
                }
                Ok(match op {
                    UnaryOperator::LogicalNot => JsValue::Bool(!value.is_truthy()),
                    UnaryOperator::UnaryNegation => JsValue::Number(-value.to_number()),
                    UnaryOperator::UnaryPlus => JsValue::Number(value.to_number()),
                    UnaryOperator::BitwiseNot => {
                        JsValue::Number(f64::from(!to_int32(value.to_number())))
                    }
                    _ => JsValue::Undefined,
                })
            }
        }
    }

    fn eval_assignment(
        &mut self,
        assign: &'a AssignmentExpression<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, JsValue<'a>> {
        let place = match &assign.left {
            AssignmentTarget::AssignmentTargetIdentifier(id) => Place::Binding(id.name.to_string()),
            AssignmentTarget::StaticMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                Place::Member(object, member.property.name.to_string())
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.eval(&member.object, scope)?;
                let key = self.eval(&member.expression, scope)?.to_js_string();
                Place::Member(object, key)
            }
            other => return Err(self.unsupported(other.span())),
        };

        let value = match assign.operator {
            AssignmentOperator::Assign => self.eval(&assign.right, scope)?,
            AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalNullish => {
                let current = self.read_place(&place, scope)?;
                if current.is_opaque() {
                    JsValue::opaque(self.snippet(assign.span))
                } else {
                    let keep = match assign.operator {
                        AssignmentOperator::LogicalOr => current.is_truthy(),
                        AssignmentOperator::LogicalAnd => !current.is_truthy(),
                        _ => !current.is_nullish(),
                    };
                    if keep {
                        return Ok(current);
                    }
                    self.eval(&assign.right, scope)?
                }
            }
            op => {
                let Some(bin) = compound_operator(op) else {
                    return Err(self.unsupported(assign.span));
                };
                let current = self.read_place(&place, scope)?;
                let rhs = self.eval(&assign.right, scope)?;
                binary(bin, current, rhs)?
            }
        };

        self.write_place(&place, value.clone(), scope)?;
        Ok(value)
    }

    fn read_place(&self, place: &Place<'a>, scope: &Scope<'a>) -> Flow<'a, JsValue<'a>> {
        match place {
            Place::Binding(name) => self.eval_identifier(name, scope),
            Place::Member(object, key) => self.get_member(object, key),
        }
    }

    fn write_place(
        &self,
        place: &Place<'a>,
        value: JsValue<'a>,
        scope: &Scope<'a>,
    ) -> Flow<'a, ()> {
        match place {
            Place::Binding(name) => match scope.assign(name, value) {
                AssignOutcome::Assigned => Ok(()),
                AssignOutcome::Constant => Err(type_error("Assignment to constant variable.")),
                AssignOutcome::Undeclared => {
                    Err(reference_error(format!("{} is not defined", name)))
                }
            },
            Place::Member(object, key) => set_member(object, key, value),
        }
    }

    pub(crate) fn get_member(&self, object: &JsValue<'a>, key: &str) -> Flow<'a, JsValue<'a>> {
        let value = match object {
            JsValue::Undefined | JsValue::Null => {
                return Err(type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_js_string(),
                    key
                )));
            }
            JsValue::Object(obj) => obj.borrow().get(key).cloned().unwrap_or(JsValue::Undefined),
            JsValue::Array(items) => match key.parse::<usize>() {
                Ok(idx) => items.borrow().get(idx).cloned().unwrap_or(JsValue::Undefined),
                Err(_) if key == "length" => JsValue::Number(items.borrow().len() as f64),
                Err(_) => self.array_method(object, key),
            },
            JsValue::String(s) => match key.parse::<usize>() {
                Ok(idx) => s
                    .chars()
                    .nth(idx)
                    .map(|c| JsValue::String(c.to_string()))
                    .unwrap_or(JsValue::Undefined),
                Err(_) if key == "length" => JsValue::Number(s.encode_utf16().count() as f64),
                Err(_) => self.string_method(object, key),
            },
            JsValue::Error(err) => match key {
                "name" => JsValue::string(err.name.as_str()),
                "message" => JsValue::string(err.message.as_str()),
                _ => JsValue::Undefined,
            },
            JsValue::Builtin(builtin) => self.builtin_static(builtin, key),
            JsValue::Function(closure) => match key {
                "name" => JsValue::string(closure.name().unwrap_or_default()),
                "length" => JsValue::Number(closure.arity() as f64),
                _ => JsValue::Undefined,
            },
            JsValue::Opaque(desc) => JsValue::opaque(format!("{}.{}", desc, key)),
            _ => JsValue::Undefined,
        };
        Ok(value)
    }
}

pub(crate) fn is_callable(value: &JsValue<'_>) -> bool {
    matches!(value, JsValue::Function(_) | JsValue::Builtin(_) | JsValue::Opaque(_))
}

pub(crate) fn settle_once<'a>(
    slot: &Rc<RefCell<Option<Settlement<'a>>>>,
    settlement: Settlement<'a>,
) {
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(settlement);
    }
}

/// Decide a branch. An unresolved value could go either way, so evaluation stops instead.
pub(crate) fn truthy<'a>(value: &JsValue<'a>) -> Flow<'a, bool> {
    match value {
        JsValue::Opaque(desc) => Err(EvalError::UnresolvedCondition(desc.clone()).into()),
        other => Ok(other.is_truthy()),
    }
}

/// `object[key] = value`. Every holder of `object` sees the write.
fn set_member<'a>(object: &JsValue<'a>, key: &str, value: JsValue<'a>) -> Flow<'a, ()> {
    match object {
        JsValue::Object(obj) => obj.borrow_mut().insert(key, value),
        JsValue::Array(items) => {
            let length = (key == "length").then(|| value.to_number().max(0.0) as usize);
            let mut items = items.borrow_mut();
            if let Ok(idx) = key.parse::<usize>() {
                if idx >= items.len() {
                    items.resize(idx + 1, JsValue::Undefined);
                }
                items[idx] = value;
            } else if let Some(length) = length {
                items.resize(length, JsValue::Undefined);
            }
        }
        JsValue::Undefined | JsValue::Null => {
            return Err(type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                object.to_js_string(),
                key
            )));
        }
        JsValue::Opaque(desc) => trace!("Ignoring write of '{}' on unresolved {}", key, desc),
        _ => {}
    }
    Ok(())
}

fn delete_member<'a>(object: &JsValue<'a>, key: &str) -> Flow<'a, ()> {
    match object {
        JsValue::Object(obj) => {
            obj.borrow_mut().remove(key);
        }
        JsValue::Array(items) => {
            if let Ok(idx) = key.parse::<usize>() {
                if let Some(slot) = items.borrow_mut().get_mut(idx) {
                    *slot = JsValue::Undefined;
                }
            }
        }
        JsValue::Undefined | JsValue::Null => {
            return Err(type_error("Cannot convert undefined or null to object"));
        }
        _ => {}
    }
    Ok(())
}

fn compound_operator(op: AssignmentOperator) -> Option<BinaryOperator> {
    Some(match op {
        AssignmentOperator::Addition => BinaryOperator::Addition,
        AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
        AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
        AssignmentOperator::Division => BinaryOperator::Division,
        AssignmentOperator::Remainder => BinaryOperator::Remainder,
        AssignmentOperator::Exponential => BinaryOperator::Exponential,
        AssignmentOperator::ShiftLeft => BinaryOperator::ShiftLeft,
        AssignmentOperator::ShiftRight => BinaryOperator::ShiftRight,
        AssignmentOperator::ShiftRightZeroFill => BinaryOperator::ShiftRightZeroFill,
        AssignmentOperator::BitwiseOR => BinaryOperator::BitwiseOR,
        AssignmentOperator::BitwiseXOR => BinaryOperator::BitwiseXOR,
        AssignmentOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
        _ => return None,
    })
}

fn binary<'a>(op: BinaryOperator, left: JsValue<'a>, right: JsValue<'a>) -> Flow<'a, JsValue<'a>> {
    if left.is_opaque() || right.is_opaque() {
        let operand = |value: &JsValue<'a>| match value {
            JsValue::Opaque(desc) => desc.clone(),
            other => other.describe(),
        };
        let desc = format!("{} {} {}", operand(&left), op.as_str(), operand(&right));
        return Ok(JsValue::opaque(desc));
    }
    let value = match op {
        BinaryOperator::Addition => {
            if is_numeric_primitive(&left) && is_numeric_primitive(&right) {
                JsValue::Number(left.to_number() + right.to_number())
            } else {
                JsValue::String(left.to_js_string() + &right.to_js_string())
            }
        }
        BinaryOperator::Subtraction => JsValue::Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiplication => JsValue::Number(left.to_number() * right.to_number()),
        BinaryOperator::Division => JsValue::Number(left.to_number() / right.to_number()),
        BinaryOperator::Remainder => JsValue::Number(left.to_number() % right.to_number()),
        BinaryOperator::Exponential => JsValue::Number(left.to_number().powf(right.to_number())),
        BinaryOperator::Equality => JsValue::Bool(loose_equals(&left, &right)),
        BinaryOperator::Inequality => JsValue::Bool(!loose_equals(&left, &right)),
        BinaryOperator::StrictEquality => JsValue::Bool(strict_equals(&left, &right)),
        BinaryOperator::StrictInequality => JsValue::Bool(!strict_equals(&left, &right)),
        BinaryOperator::LessThan
        | BinaryOperator::LessEqualThan
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqualThan => JsValue::Bool(compare(op, &left, &right)),
        BinaryOperator::BitwiseAnd => int_op(&left, &right, |a, b| a & b),
        BinaryOperator::BitwiseOR => int_op(&left, &right, |a, b| a | b),
        BinaryOperator::BitwiseXOR => int_op(&left, &right, |a, b| a ^ b),
        BinaryOperator::ShiftLeft => int_op(&left, &right, |a, b| a.wrapping_shl(b as u32 & 31)),
        BinaryOperator::ShiftRight => int_op(&left, &right, |a, b| a.wrapping_shr(b as u32 & 31)),
        BinaryOperator::ShiftRightZeroFill => {
            let a = to_int32(left.to_number()) as u32;
            let b = to_int32(right.to_number()) as u32 & 31;
            JsValue::Number(f64::from(a >> b))
        }
        BinaryOperator::In => {
            let key = left.to_js_string();
            match &right {
                JsValue::Object(obj) => JsValue::Bool(obj.borrow().contains_key(&key)),
                JsValue::Array(items) => {
                    let len = items.borrow().len();
                    let in_bounds = key.parse::<usize>().is_ok_and(|i| i < len);
                    JsValue::Bool(key == "length" || in_bounds)
                }
                JsValue::Function(_) | JsValue::Builtin(_) => JsValue::Bool(false),
                other => {
                    return Err(type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        other.to_js_string()
                    )));
                }
            }
        }
        BinaryOperator::Instanceof => JsValue::Bool(match (&left, &right) {
            (JsValue::Error(err), JsValue::Builtin(ctor)) => {
                matches!(ctor.kind, BuiltinKind::ErrorConstructor)
                    && (ctor.name == "Error" || ctor.name == err.name)
            }
            _ => false,
        }),
    };
    Ok(value)
}

fn is_numeric_primitive(value: &JsValue<'_>) -> bool {
    matches!(value, JsValue::Undefined | JsValue::Null | JsValue::Bool(_) | JsValue::Number(_))
}

pub(crate) fn strict_equals<'a>(left: &JsValue<'a>, right: &JsValue<'a>) -> bool {
    match (left, right) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
        (JsValue::Number(a), JsValue::Number(b)) => a == b,
        (JsValue::String(a), JsValue::String(b)) => a == b,
        (JsValue::Array(a), JsValue::Array(b)) => Rc::ptr_eq(a, b),
        (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
        (JsValue::Function(a), JsValue::Function(b)) => Rc::ptr_eq(a, b),
        (JsValue::Builtin(a), JsValue::Builtin(b)) => Rc::ptr_eq(a, b),
        (JsValue::Promise(a), JsValue::Promise(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn loose_equals<'a>(left: &JsValue<'a>, right: &JsValue<'a>) -> bool {
    if left.is_nullish() || right.is_nullish() {
        return left.is_nullish() && right.is_nullish();
    }
    if std::mem::discriminant(left) == std::mem::discriminant(right) {
        return strict_equals(left, right);
    }
    let is_primitive =
        |v: &JsValue<'a>| matches!(v, JsValue::Bool(_) | JsValue::Number(_) | JsValue::String(_));
    if is_primitive(left) && is_primitive(right) {
        return left.to_number() == right.to_number();
    }
    false
}

fn compare<'a>(op: BinaryOperator, left: &JsValue<'a>, right: &JsValue<'a>) -> bool {
    let ordering = match (left, right) {
        (JsValue::String(a), JsValue::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOperator::LessThan => ordering.is_lt(),
        BinaryOperator::LessEqualThan => ordering.is_le(),
        BinaryOperator::GreaterThan => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() as i64) as u32 as i32
}

fn int_op<'a>(left: &JsValue<'a>, right: &JsValue<'a>, f: impl Fn(i32, i32) -> i32) -> JsValue<'a> {
    JsValue::Number(f64::from(f(to_int32(left.to_number()), to_int32(right.to_number()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_PATH: &str = "/project/next.config.mjs";

    fn load<'a>(allocator: &'a Allocator, src: &'a str) -> EvalResult<LoadedModule<'a>> {
        load_module(allocator, Path::new(CONFIG_PATH), src)
    }

    fn export_json(src: &str) -> serde_json::Value {
        let allocator = Allocator::default();
        let module = load(&allocator, src).unwrap();
        module.export.to_json().value
    }

    fn settled_json(promise: &JsValue<'_>) -> serde_json::Value {
        match promise {
            JsValue::Promise(p) => match &**p {
                Promise::Settled(Settlement::Fulfilled(v)) => v.to_json().value,
                _ => panic!("promise is not fulfilled"),
            },
            other => panic!("expected a promise, got {}", other.kind_name()),
        }
    }

    #[test]
    fn test_export_default_object() {
        let value = export_json("export default { distDir: 'out', images: { unoptimized: true } };");
        assert_eq!(value, serde_json::json!({ "distDir": "out", "images": { "unoptimized": true } }));
    }

    #[test]
    fn test_module_exports_and_exports_alias() {
        assert_eq!(export_json("module.exports = { distDir: 'out' };"), serde_json::json!({ "distDir": "out" }));
        assert_eq!(
            export_json("exports.distDir = 'dist'; module.exports.basePath = '/docs';"),
            serde_json::json!({ "distDir": "dist", "basePath": "/docs" })
        );
    }

    #[test]
    fn test_module_without_export_is_undefined() {
        let allocator = Allocator::default();
        let module = load(&allocator, "const config = { distDir: 'out' };").unwrap();
        assert!(matches!(module.export, JsValue::Undefined));
    }

    #[test]
    fn test_export_named_as_default() {
        let value = export_json("const config = { distDir: 'x' }; export { config as default };");
        assert_eq!(value, serde_json::json!({ "distDir": "x" }));
    }

    #[test]
    fn test_async_function_with_destructured_context() {
        let allocator = Allocator::default();
        let src = "export default async (phase, { defaultConfig }) => {\n  return { ...defaultConfig, distDir: phase === 'build' ? 'build' : 'dev' };\n};";
        let mut module = load(&allocator, src).unwrap();
        let export = module.export.clone();
        let JsValue::Function(closure) = &export else { panic!("expected a function") };
        assert!(closure.is_async());
        assert_eq!(closure.arity(), 2);
        assert_eq!(closure.param_names(), ["phase", "{..}"]);

        let mut helper = JsObject::default();
        helper.insert("defaultConfig", JsValue::from_json(&serde_json::json!({ "trailingSlash": false })));
        let result = module.call(&export, vec![JsValue::string("build"), JsValue::object(helper)]).unwrap();
        assert_eq!(settled_json(&result), serde_json::json!({ "trailingSlash": false, "distDir": "build" }));
    }

    #[test]
    fn test_arguments_length_reflects_supplied_args() {
        let allocator = Allocator::default();
        let src = "module.exports = function () { return { count: arguments.length }; };";
        let mut module = load(&allocator, src).unwrap();
        let export = module.export.clone();
        let result = module.call(&export, vec![]).unwrap();
        assert_eq!(result.to_json().value, serde_json::json!({ "count": 0 }));
        let result = module.call(&export, vec![JsValue::Null, JsValue::Null]).unwrap();
        assert_eq!(result.to_json().value, serde_json::json!({ "count": 2 }));
    }

    #[test]
    fn test_sync_throw_surfaces_as_thrown() {
        let allocator = Allocator::default();
        let mut module = load(&allocator, "export default () => { throw new Error('boom'); };").unwrap();
        let export = module.export.clone();
        let err = module.call(&export, vec![]).unwrap_err();
        assert!(matches!(&err, EvalError::Thrown(msg) if msg.contains("boom")), "{err}");
    }

    #[test]
    fn test_async_throw_rejects() {
        let allocator = Allocator::default();
        let mut module = load(&allocator, "export default async () => { throw new TypeError('bad'); };").unwrap();
        let export = module.export.clone();
        let result = module.call(&export, vec![]).unwrap();
        let JsValue::Promise(p) = result else { panic!("expected a promise") };
        assert!(matches!(&*p, Promise::Settled(Settlement::Rejected(JsValue::Error(e))) if e.name == "TypeError"));
    }

    #[test]
    fn test_unsupported_loop_at_top_level() {
        let allocator = Allocator::default();
        let err = load(&allocator, "for (;;) {}\nexport default {};").err().unwrap();
        assert!(matches!(&err, EvalError::Unsupported(msg) if msg.contains("for")), "{err}");
    }

    #[test]
    fn test_unknown_global_is_reference_error() {
        let allocator = Allocator::default();
        let err = load(&allocator, "export default { distDir: missingValue };").err().unwrap();
        assert!(matches!(&err, EvalError::Thrown(msg) if msg.contains("ReferenceError")), "{err}");
    }

    #[test]
    fn test_timer_promise_is_delayed() {
        let allocator = Allocator::default();
        let src = "export default async () => {\n  await new Promise((resolve) => setTimeout(resolve, 50));\n  return { distDir: 'late' };\n};";
        let mut module = load(&allocator, src).unwrap();
        let export = module.export.clone();
        let JsValue::Promise(p) = module.call(&export, vec![]).unwrap() else { panic!("expected a promise") };
        match &*p {
            Promise::Delayed { after, settlement: Settlement::Fulfilled(v) } => {
                assert_eq!(*after, Duration::from_millis(50));
                assert_eq!(v.to_json().value, serde_json::json!({ "distDir": "late" }));
            }
            _ => panic!("expected a delayed promise"),
        }
    }

    #[test]
    fn test_never_settling_promise() {
        let allocator = Allocator::default();
        let src = "export default async () => { await new Promise(() => {}); return {}; };";
        let mut module = load(&allocator, src).unwrap();
        let export = module.export.clone();
        let JsValue::Promise(p) = module.call(&export, vec![]).unwrap() else { panic!("expected a promise") };
        assert!(matches!(&*p, Promise::Never));
    }

    #[test]
    fn test_top_level_await() {
        let value = export_json("const dir = await Promise.resolve('out'); export default { distDir: dir };");
        assert_eq!(value, serde_json::json!({ "distDir": "out" }));

        let allocator = Allocator::default();
        let err = load(&allocator, "await new Promise(() => {}); export default {};").err().unwrap();
        assert!(matches!(err, EvalError::TopLevelAwait));
    }

    #[test]
    fn test_runaway_recursion_is_bounded() {
        let allocator = Allocator::default();
        let err = load(&allocator, "function f() { return f(); }\nexport default f();").err().unwrap();
        assert!(matches!(err, EvalError::CallDepthExceeded(_)));
    }

    #[test]
    fn test_try_catch_finally() {
        let src = "let log = [];\ntry { null.x; } catch (e) { log = [...log, e.name]; } finally { log = [...log, 'done']; }\nexport default { log };";
        assert_eq!(export_json(src), serde_json::json!({ "log": ["TypeError", "done"] }));
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let src = "const env = process.env;\nexport default { distDir: env.DIST_DIR ?? 'out', base: env?.x?.y, n: env.x?.length };";
        assert_eq!(export_json(src), serde_json::json!({ "distDir": "out" }));
    }

    #[test]
    fn test_const_reassignment_throws() {
        let allocator = Allocator::default();
        let err = load(&allocator, "const a = 1; a = 2; export default {};").err().unwrap();
        assert!(matches!(&err, EvalError::Thrown(msg) if msg.contains("constant")), "{err}");
    }

    #[test]
    fn test_const_object_member_mutation() {
        let src = "const config = {}; config.distDir = 'out'; config.kit = { paths: {} }; config.kit.paths.base = '/b'; export default config;";
        assert_eq!(
            export_json(src),
            serde_json::json!({ "distDir": "out", "kit": { "paths": { "base": "/b" } } })
        );
    }

    #[test]
    fn test_object_assign_writes_back() {
        let src = "const config = { a: 1 }; Object.assign(config, { distDir: 'out' }); export default config;";
        assert_eq!(export_json(src), serde_json::json!({ "a": 1, "distDir": "out" }));
    }

    #[test]
    fn test_template_and_arithmetic() {
        let src = "const v = 2; export default { dir: `dist-${v * 3}`, n: 1 + 2, s: 'a' + 1, t: typeof nope };";
        assert_eq!(export_json(src), serde_json::json!({ "dir": "dist-6", "n": 3, "s": "a1", "t": "undefined" }));
    }

    #[test]
    fn test_typescript_wrappers() {
        let allocator = Allocator::default();
        let src = "import type { NextConfig } from 'next';\ninterface X { a: string }\nconst config: NextConfig = { distDir: 'ts' as string } satisfies NextConfig;\nexport default config;";
        let module = load_module(&allocator, Path::new("/project/next.config.ts"), src).unwrap();
        assert_eq!(module.export.to_json().value, serde_json::json!({ "distDir": "ts" }));
    }

    #[test]
    fn test_package_import_is_opaque() {
        let allocator = Allocator::default();
        let src = "import withMDX from '@next/mdx';\nexport default withMDX({ distDir: 'out' });";
        let module = load(&allocator, src).unwrap();
        assert!(matches!(module.export, JsValue::Opaque(_)));
    }

    #[test]
    fn test_destructuring_defaults_and_rest() {
        let src = "const { a = 1, ...rest } = { b: 2, c: 3 };\nconst [x, , y = 9, ...tail] = [1, 2, undefined, 4, 5];\nexport default { a, rest, x, y, tail };";
        assert_eq!(
            export_json(src),
            serde_json::json!({ "a": 1, "rest": { "b": 2, "c": 3 }, "x": 1, "y": 9, "tail": [4, 5] })
        );
    }

    #[test]
    fn test_hoisted_function_declaration() {
        let src = "export default make();\nfunction make() { return { distDir: 'hoisted' }; }";
        assert_eq!(export_json(src), serde_json::json!({ "distDir": "hoisted" }));
    }

    #[test]
    fn test_writes_after_export_are_visible() {
        let src = "const config = {};\nmodule.exports = config;\nconfig.distDir = 'out';";
        assert_eq!(export_json(src), serde_json::json!({ "distDir": "out" }));

        let src = "const kit = {};\nconst config = { kit };\nkit.outDir = 'o';\nexport default config;";
        assert_eq!(export_json(src), serde_json::json!({ "kit": { "outDir": "o" } }));
    }

    #[test]
    fn test_object_assign_returns_its_target() {
        let src = "const a = {};\nconst b = Object.assign(a, { x: 1 }, null);\nexport default { same: a === b, other: a === {}, x: a.x };";
        assert_eq!(export_json(src), serde_json::json!({ "same": true, "other": false, "x": 1 }));
    }

    #[test]
    fn test_push_and_delete_mutate_shared_values() {
        let src = "const plugins = [];\nconst config = { plugins, a: 1, b: 2 };\nplugins.push('mdx', 'sass');\ndelete config.a;\nexport default config;";
        assert_eq!(export_json(src), serde_json::json!({ "plugins": ["mdx", "sass"], "b": 2 }));
    }

    #[test]
    fn test_rebinding_exports_does_not_export() {
        let allocator = Allocator::default();
        let module = load(&allocator, "exports = { distDir: 'x' };").unwrap();
        assert!(matches!(module.export, JsValue::Undefined));
    }

    #[test]
    fn test_unresolved_operands_stay_unresolved() {
        let allocator = Allocator::default();
        let src = "import { root } from './paths.mjs';\nconst out = require('./site.config');\nexport default {\n  distDir: root + '/build',\n  tpl: `${out}`,\n  kind: typeof root,\n  alt: root || 'dist',\n  pick: root ? 'a' : 'b',\n  same: root === 'x',\n  known: 'a' + 'b',\n};";
        let module = load(&allocator, src).unwrap();
        let snapshot = module.export.to_json();
        assert_eq!(snapshot.value, serde_json::json!({ "known": "ab" }));
        assert_eq!(snapshot.unresolved, ["distDir", "tpl", "kind", "alt", "pick", "same"]);
    }

    #[test]
    fn test_branching_on_unresolved_value_fails() {
        let allocator = Allocator::default();
        let src = "import { flag } from 'pkg';\nlet dir = 'a';\nif (flag) { dir = 'b'; }\nexport default { distDir: dir };";
        let err = load(&allocator, src).err().unwrap();
        assert!(matches!(&err, EvalError::UnresolvedCondition(desc) if desc.contains("flag")), "{err}");
    }

    #[test]
    fn test_call_frames_are_not_retained() {
        let allocator = Allocator::default();
        let items = vec!["1"; 500].join(", ");
        let src = format!("const xs = [{}];\nexport default {{ n: xs.map((x) => {{ const y = x * 2; return y; }}).length }};", items);
        let src: &str = allocator.alloc_str(&src);
        let module = load(&allocator, src).unwrap();
        assert_eq!(module.export.to_json().value, serde_json::json!({ "n": 500 }));
        assert!(module.interpreter.scopes.is_empty());
    }

    #[test]
    fn test_closures_keep_their_frames_tracked() {
        let allocator = Allocator::default();
        let src = "function make(dir) { return () => dir; }\nconst get = make('out');\nexport default { distDir: get() };";
        let module = load(&allocator, src).unwrap();
        assert_eq!(module.export.to_json().value, serde_json::json!({ "distDir": "out" }));
        assert_eq!(module.interpreter.scopes.len(), 1);
    }
}
