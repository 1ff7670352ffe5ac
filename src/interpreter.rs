use std::rc::Rc;
use std::sync::Arc;

use crate::builtins;
use crate::control::{ControlState, InterpreterHandle, Limits};
use crate::diagnostic::Diagnostic;
use crate::error::{Error, Result};
use crate::eval::{Evaluator, HostCallable, HostFn};
use crate::list::NodeId;
use crate::parser;
use crate::scope::ProcedureScope;
use crate::sourcemap::SourceLocation;
use crate::value::Value;

/// The embeddable Logo interpreter. Owns a long-lived procedure scope and
/// global variable scope (definitions and globals persist across
/// `execute` calls) plus the per-run parser output and control state.
///
/// # Example
///
/// ```
/// use logo_core::Interpreter;
///
/// let mut interpreter = Interpreter::new();
/// let mut printed = Vec::new();
/// interpreter.on_print(move |s| println!("{}", s));
/// interpreter.execute("print 1 + 2 * 3").unwrap();
/// ```
pub struct Interpreter {
    evaluator: Evaluator,
    control: Arc<ControlState>,
}

impl Interpreter {
    pub fn new() -> Self {
        let control = ControlState::new();
        let mut evaluator = Evaluator::new(control.clone());
        builtins::install(&evaluator.procedures);
        Self { evaluator, control }
    }

    /// Registers an embedder-supplied builtin (a turtle primitive, for
    /// instance) under `name` with the given fixed arity. Indistinguishable
    /// from a built-in or user-defined procedure at the call site.
    pub fn register_builtin<F>(&mut self, name: impl Into<String>, arity: usize, func: F)
    where
        F: Fn(&[Value]) -> Result<Option<Value>> + 'static,
    {
        let func: HostFn = Rc::new(func);
        let name = name.into();
        self.evaluator
            .procedures
            .define(name.clone(), HostCallable::new(name, arity, func));
    }

    pub fn procedure_scope(&self) -> ProcedureScope {
        self.evaluator.procedures.clone()
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.evaluator.set_limits(limits);
    }

    pub fn handle(&self) -> InterpreterHandle {
        InterpreterHandle::new(self.control.clone())
    }

    pub fn pause(&self) {
        self.control.request_pause();
    }

    pub fn continue_(&self) {
        self.control.request_continue();
    }

    pub fn break_(&self) {
        self.control.request_break();
    }

    pub fn on_call(&mut self, f: impl FnMut(&str, &[Value], Option<NodeId>) + 'static) {
        self.evaluator.set_on_call(f);
    }

    pub fn on_value(&mut self, f: impl FnMut(&Value, Option<NodeId>) + 'static) {
        self.evaluator.set_on_value(f);
    }

    pub fn on_print(&mut self, f: impl FnMut(&str) + 'static) {
        self.evaluator.set_on_print(f);
    }

    /// Parses `source` without evaluating it, returning the program list
    /// and its source map for inspection or pre-flight validation.
    pub fn parse(&self, source: &str) -> Result<(crate::list::List, crate::sourcemap::SourceMap)> {
        parser::parse(source)
    }

    /// Parses and evaluates `source` to completion. Fails with
    /// `Error::AlreadyRunning` if this interpreter is already executing a
    /// program (on another thread, typically). Always clears run state
    /// before returning, success, failure, or panic, so the interpreter
    /// is ready for the next call.
    pub fn execute(&mut self, source: &str) -> Result<Option<Value>> {
        self.control.begin_run()?;
        let _guard = RunGuard(self.control.clone());
        self.execute_inner(source)
    }

    fn execute_inner(&mut self, source: &str) -> Result<Option<Value>> {
        let (program, source_map) = parser::parse(source)?;
        self.evaluator.begin_program(source.to_string(), source_map);
        self.evaluator.evaluate(&program)
    }

    /// Resolves the source text and byte span backing `node`, for
    /// diagnostics or observer-driven highlighting.
    pub fn source_for_node(&self, node: NodeId) -> Option<SourceLocation> {
        let span = self.evaluator.source_map.get(node)?;
        Some(SourceLocation {
            source: self.evaluator.source_text.clone(),
            span,
        })
    }

    /// Renders a human-readable diagnostic for `err`, underlining its span
    /// in the most recently executed source text, if any.
    pub fn diagnostic(&self, err: &Error) -> Diagnostic {
        Diagnostic::from_error(err, &self.evaluator.source_text)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears run state on drop, so it happens whether `execute_inner` returns
/// normally, returns an error, or unwinds through a panic. A plain
/// `begin_run` / call / `end_run` sequence would skip `end_run` on panic,
/// wedging `running` at `true` forever (every later `execute` call would
/// see `AlreadyRunning`) and leaving `ControlState`'s mutex poisoned, which
/// would in turn panic every later lock attempt too.
struct RunGuard(Arc<ControlState>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.end_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn execute_returns_printed_output() {
        let mut interpreter = Interpreter::new();
        let printed = Rc::new(RefCell::new(Vec::new()));
        let printed_clone = printed.clone();
        interpreter.on_print(move |s| printed_clone.borrow_mut().push(s.to_string()));
        interpreter.execute("print 1 + 2 * 3 - 4").unwrap();
        assert_eq!(*printed.borrow(), vec!["3".to_string()]);
    }

    #[test]
    fn reentrant_execute_is_rejected() {
        // Without real concurrency this only exercises the guard directly:
        // begin_run twice in a row without end_run must fail.
        let interpreter = Interpreter::new();
        interpreter.control.begin_run().unwrap();
        assert!(matches!(interpreter.control.begin_run(), Err(Error::AlreadyRunning)));
        interpreter.control.end_run();
    }

    #[test]
    fn host_builtin_is_callable_like_any_procedure() {
        let mut interpreter = Interpreter::new();
        interpreter.register_builtin("triple", 1, |args| {
            Ok(Some(Value::Number(args[0].as_number().unwrap_or(0.0) * 3.0)))
        });
        let result = interpreter.execute("triple 4").unwrap();
        assert_eq!(result.unwrap().as_number(), Some(12.0));
    }

    #[test]
    fn definitions_persist_across_executions() {
        let mut interpreter = Interpreter::new();
        interpreter.execute("to sq :n output :n * :n end").unwrap();
        let result = interpreter.execute("sq 5").unwrap();
        assert_eq!(result.unwrap().as_number(), Some(25.0));
    }
}
