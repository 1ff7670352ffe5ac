use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::eval::{Callable, HostCallable, HostFn};
use crate::value::Value;

/// A one-slot mutable cell. Variables are bound through a `Binding` rather
/// than stored directly in the scope's map so that `global` can alias a
/// single cell into multiple scopes and have writes from any of them
/// observed by all.
pub type Binding = Rc<RefCell<Value>>;

pub fn new_binding(value: Value) -> Binding {
    Rc::new(RefCell::new(value))
}

struct ScopeData {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

/// A chain of name -> binding maps. Variable lookup walks parents; `set`
/// finds and mutates the first binding it encounters in the chain, or
/// creates a fresh one in the root scope if the name is unbound anywhere
/// (this dialect's implicit-global rule).
#[derive(Clone)]
pub struct Scope(Rc<ScopeData>);

impl Scope {
    pub fn root() -> Scope {
        Scope(Rc::new(ScopeData {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    pub fn child(parent: &Scope) -> Scope {
        Scope(Rc::new(ScopeData {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        match self.get_binding(name) {
            Some(binding) => Ok(binding.borrow().clone()),
            None => Err(Error::unbound_variable(name, None)),
        }
    }

    pub fn get_binding(&self, name: &str) -> Option<Binding> {
        if let Some(b) = self.0.bindings.borrow().get(name) {
            return Some(b.clone());
        }
        match &self.0.parent {
            Some(p) => p.get_binding(name),
            None => None,
        }
    }

    fn root_scope(&self) -> Scope {
        match &self.0.parent {
            Some(p) => p.root_scope(),
            None => self.clone(),
        }
    }

    /// Updates the existing binding for `name` anywhere in the chain; if
    /// none exists, creates one in the root scope rather than shadowing
    /// in the current scope (so `make` from inside a procedure writes a
    /// global unless `local` declared the name first).
    pub fn set(&self, name: &str, value: Value) {
        if let Some(binding) = self.get_binding(name) {
            *binding.borrow_mut() = value;
        } else {
            self.root_scope().bind_value(name, value);
        }
    }

    pub fn bind(&self, name: impl Into<String>, binding: Binding) {
        self.0.bindings.borrow_mut().insert(name.into(), binding);
    }

    pub fn bind_value(&self, name: impl Into<String>, value: Value) {
        self.bind(name, new_binding(value));
    }

    pub fn bind_values(&self, values: impl IntoIterator<Item = (String, Value)>) {
        for (name, value) in values {
            self.bind_value(name, value);
        }
    }

    pub fn is_bound_here(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }
}

/// Flat, non-chaining registry of callables (builtins, host functions, and
/// user-defined procedures all live here under equal footing).
#[derive(Clone)]
pub struct ProcedureScope(Rc<RefCell<HashMap<String, Rc<dyn Callable>>>>);

impl ProcedureScope {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(HashMap::new())))
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Callable>> {
        self.0.borrow().get(name).cloned()
    }

    pub fn define(&self, name: impl Into<String>, callable: Rc<dyn Callable>) {
        self.0.borrow_mut().insert(name.into(), callable);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    /// Bulk registration of embedder-supplied builtins (turtle primitives,
    /// typically): `(name, arity, function)` triples, each installed as a
    /// host callable indistinguishable from a builtin or user procedure at
    /// the call site.
    pub fn bind_values(&self, entries: impl IntoIterator<Item = (String, usize, HostFn)>) {
        for (name, arity, func) in entries {
            self.define(name.clone(), HostCallable::new(name, arity, func));
        }
    }
}

impl Default for ProcedureScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_on_bound_name_does_not_shadow() {
        let root = Scope::root();
        root.bind_value("x", Value::Number(1.0));
        let child = Scope::child(&root);
        child.set("x", Value::Number(2.0));
        assert_eq!(root.get("x").unwrap().as_number(), Some(2.0));
        assert_eq!(child.get("x").unwrap().as_number(), Some(2.0));
    }

    #[test]
    fn set_on_unbound_name_creates_in_root() {
        let root = Scope::root();
        let child = Scope::child(&root);
        child.set("y", Value::Number(5.0));
        assert!(root.is_bound_here("y"));
        assert!(!child.is_bound_here("y"));
    }

    #[test]
    fn local_bind_shadows_parent() {
        let root = Scope::root();
        root.bind_value("x", Value::Number(1.0));
        let child = Scope::child(&root);
        child.bind_value("x", Value::Number(9.0));
        assert_eq!(child.get("x").unwrap().as_number(), Some(9.0));
        assert_eq!(root.get("x").unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn global_alias_shares_one_cell() {
        let root = Scope::root();
        let binding = new_binding(Value::Number(1.0));
        root.bind("g", binding.clone());
        let child = Scope::child(&root);
        child.bind("g", binding.clone());
        child.set("g", Value::Number(42.0));
        assert_eq!(root.get("g").unwrap().as_number(), Some(42.0));
    }
}
