use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::value::JsValue;

struct Binding<'a> {
    value: JsValue<'a>,
    mutable: bool,
}

struct ScopeFrame<'a> {
    bindings: RefCell<HashMap<String, Binding<'a>>>,
    parent: Option<Scope<'a>>,
}

/// Lexical environment. Cloning a `Scope` shares the frame, which is how closures capture it.
#[derive(Clone)]
pub struct Scope<'a>(Rc<ScopeFrame<'a>>);

/// Outcome of writing to a name.
#[derive(Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    Undeclared,
    Constant,
}

impl<'a> Scope<'a> {
    pub fn root() -> Self {
        Scope(Rc::new(ScopeFrame { bindings: RefCell::default(), parent: None }))
    }

    pub fn child(&self) -> Self {
        Scope(Rc::new(ScopeFrame { bindings: RefCell::default(), parent: Some(self.clone()) }))
    }

    /// Declare in this frame, shadowing anything outside it. Redeclaring overwrites.
    pub fn declare(&self, name: &str, value: JsValue<'a>, mutable: bool) {
        self.0.bindings.borrow_mut().insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<JsValue<'a>> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(binding) = scope.0.bindings.borrow().get(name) {
                return Some(binding.value.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    pub fn has(&self, name: &str) -> bool {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if scope.0.bindings.borrow().contains_key(name) {
                return true;
            }
            frame = scope.0.parent.as_ref();
        }
        false
    }

    /// Rebind `name`. Fails on `const` bindings.
    pub fn assign(&self, name: &str, value: JsValue<'a>) -> AssignOutcome {
        self.with_binding(name, |binding| {
            if !binding.mutable {
                return AssignOutcome::Constant;
            }
            binding.value = value;
            AssignOutcome::Assigned
        })
        .unwrap_or(AssignOutcome::Undeclared)
    }

    fn with_binding<R>(&self, name: &str, f: impl FnOnce(&mut Binding<'a>) -> R) -> Option<R> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(binding) = scope.0.bindings.borrow_mut().get_mut(name) {
                return Some(f(binding));
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    pub(crate) fn parent(&self) -> Option<&Scope<'a>> {
        self.0.parent.as_ref()
    }

    /// Identity of the frame, stable for as long as any handle to it is alive.
    pub(crate) fn id(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }

    /// Drop every binding in this frame. Closures stored in a frame hold the frame itself, so
    /// the interpreter clears frames on teardown to release those cycles.
    pub(crate) fn clear(&self) {
        let drained: Vec<Binding<'a>> =
            self.0.bindings.borrow_mut().drain().map(|(_, binding)| binding).collect();
        drop(drained);
    }
}
