use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::control::{ControlState, Limits};
use crate::error::{Error, Result};
use crate::list::{List, ListBuilder, NodeId};
use crate::scope::{ProcedureScope, Scope};
use crate::sourcemap::{SourceMap, Span};
use crate::value::Value;

fn operator_priority(op: &str) -> Option<u8> {
    match op {
        "*" | "/" => Some(10),
        "+" | "-" => Some(5),
        "<" | ">" | "=" => Some(1),
        _ => None,
    }
}

fn advance(cursor: &mut List) {
    *cursor = cursor.tail();
}

/// The activation record of one procedure invocation. `if`/`repeat`/
/// template bodies reuse the enclosing context (pushed only by user
/// procedure calls), so `stop`/`output` inside them unwind the whole
/// enclosing procedure rather than just the immediate body.
pub struct Context {
    pub output: Option<Value>,
    pub stop: bool,
    pub is_global: bool,
}

impl Context {
    pub fn global() -> Self {
        Self {
            output: None,
            stop: false,
            is_global: true,
        }
    }

    pub fn procedure() -> Self {
        Self {
            output: None,
            stop: false,
            is_global: false,
        }
    }
}

/// Anything invokable from the procedure scope: builtins, embedder-supplied
/// host functions, and user-defined `to ... end` procedures are all
/// indistinguishable at the call site.
pub trait Callable {
    fn name(&self) -> &str;
    /// The fixed number of arguments `handle_fixed` collects. Variadic
    /// calls via `( … )` treat this as a minimum instead.
    fn arity(&self) -> usize;
    fn call(&self, ev: &mut Evaluator, args: Vec<Value>) -> Result<Option<Value>>;
}

pub type BuiltinFn = Rc<dyn Fn(&mut Evaluator, Vec<Value>) -> Result<Option<Value>>>;

/// A builtin implemented in Rust with full evaluator access, used for
/// control flow, templates, and anything that needs to push scopes or
/// read/write the current context.
pub struct Native {
    name: String,
    arity: usize,
    func: BuiltinFn,
}

impl Native {
    pub fn new<F>(name: impl Into<String>, arity: usize, func: F) -> Rc<Self>
    where
        F: Fn(&mut Evaluator, Vec<Value>) -> Result<Option<Value>> + 'static,
    {
        Rc::new(Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        })
    }
}

impl Callable for Native {
    fn name(&self) -> &str {
        &self.name
    }
    fn arity(&self) -> usize {
        self.arity
    }
    fn call(&self, ev: &mut Evaluator, args: Vec<Value>) -> Result<Option<Value>> {
        (self.func)(ev, args)
    }
}

pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Option<Value>>>;

/// Wraps an embedder-registered function (turtle primitives, printer) so
/// it satisfies `Callable` without needing evaluator access — the host is
/// expected to be fast, synchronous, and non-blocking.
pub struct HostCallable {
    name: String,
    arity: usize,
    func: HostFn,
}

impl HostCallable {
    pub fn new(name: impl Into<String>, arity: usize, func: HostFn) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            arity,
            func,
        })
    }
}

impl Callable for HostCallable {
    fn name(&self) -> &str {
        &self.name
    }
    fn arity(&self) -> usize {
        self.arity
    }
    fn call(&self, _ev: &mut Evaluator, args: Vec<Value>) -> Result<Option<Value>> {
        (self.func)(&args)
    }
}

/// A user-defined `to NAME :args… body end` procedure.
pub struct UserProcedure {
    name: String,
    params: Vec<String>,
    body: List,
    arity: usize,
}

impl UserProcedure {
    pub fn new(name: String, params: Vec<String>, body: List) -> Self {
        let arity = params.len();
        Self {
            name,
            params,
            body,
            arity,
        }
    }
}

impl Callable for UserProcedure {
    fn name(&self) -> &str {
        &self.name
    }
    fn arity(&self) -> usize {
        self.arity
    }
    fn call(&self, ev: &mut Evaluator, args: Vec<Value>) -> Result<Option<Value>> {
        let scope = Scope::child(&ev.current_scope());
        for (i, param) in self.params.iter().enumerate() {
            // Missing actuals bind to `false`: the closed four-variant
            // value model has no null/undefined to fall back to.
            let v = args.get(i).cloned().unwrap_or(Value::Boolean(false));
            scope.bind_value(param.clone(), v);
        }
        ev.scope_stack.push(scope);
        ev.context_stack.push(Rc::new(RefCell::new(Context::procedure())));
        let result = ev.evaluate(&self.body);
        // Pop on every exit path, success or failure.
        ev.scope_stack.pop();
        let ctx = ev.context_stack.pop().expect("just pushed");
        result?;
        let output = ctx.borrow_mut().output.take();
        Ok(output)
    }
}

type ObserverCall = Box<dyn FnMut(&str, &[Value], Option<NodeId>)>;
type ObserverValue = Box<dyn FnMut(&Value, Option<NodeId>)>;
type ObserverPrint = Box<dyn FnMut(&str)>;

/// Recursive-descent evaluator. Walks list cursors directly rather than a
/// separate token stream: `List::tail()` plays the role of "advance the
/// cursor".
pub struct Evaluator {
    pub procedures: ProcedureScope,
    pub globals: Scope,
    pub(crate) scope_stack: Vec<Scope>,
    pub(crate) context_stack: Vec<Rc<RefCell<Context>>>,
    pub(crate) control: Arc<ControlState>,
    pub(crate) limits: Limits,
    steps: u64,
    call_depth: usize,
    pub(crate) source_map: SourceMap,
    pub(crate) source_text: String,
    on_call: Option<ObserverCall>,
    on_value: Option<ObserverValue>,
    on_print: Option<ObserverPrint>,
}

impl Evaluator {
    pub fn new(control: Arc<ControlState>) -> Self {
        let globals = Scope::root();
        Self {
            procedures: ProcedureScope::new(),
            globals: globals.clone(),
            scope_stack: vec![globals],
            context_stack: vec![Rc::new(RefCell::new(Context::global()))],
            control,
            limits: Limits::default(),
            steps: 0,
            call_depth: 0,
            source_map: SourceMap::new(),
            source_text: String::new(),
            on_call: None,
            on_value: None,
            on_print: None,
        }
    }

    pub fn current_scope(&self) -> Scope {
        self.scope_stack.last().expect("scope stack never empty").clone()
    }

    pub fn set_on_call(&mut self, f: impl FnMut(&str, &[Value], Option<NodeId>) + 'static) {
        self.on_call = Some(Box::new(f));
    }

    pub fn set_on_value(&mut self, f: impl FnMut(&Value, Option<NodeId>) + 'static) {
        self.on_value = Some(Box::new(f));
    }

    pub fn set_on_print(&mut self, f: impl FnMut(&str) + 'static) {
        self.on_print = Some(Box::new(f));
    }

    pub fn emit_print(&mut self, text: &str) {
        if let Some(mut cb) = self.on_print.take() {
            cb(text);
            self.on_print = Some(cb);
        }
    }

    /// Resets the per-run step/depth counters and installs a fresh global
    /// context/scope frame. Called once at the start of `execute`.
    pub(crate) fn begin_program(&mut self, source: String, source_map: SourceMap) {
        self.steps = 0;
        self.call_depth = 0;
        self.source_text = source;
        self.source_map = source_map;
        self.scope_stack = vec![self.globals.clone()];
        self.context_stack = vec![Rc::new(RefCell::new(Context::global()))];
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    fn span_for(&self, cursor: &List) -> Option<Span> {
        cursor.node_id().and_then(|id| self.source_map.get(id))
    }

    fn top_stop(&self) -> bool {
        self.context_stack
            .last()
            .expect("context stack never empty")
            .borrow()
            .stop
    }

    fn take_top_output(&self) -> Option<Value> {
        self.context_stack
            .last()
            .expect("context stack never empty")
            .borrow_mut()
            .output
            .take()
    }

    /// Sequence evaluator: runs statements in `body` in order, handling
    /// `to` definitions inline and stopping early once a procedure-level
    /// `stop`/`output` has fired.
    pub fn evaluate(&mut self, body: &List) -> Result<Option<Value>> {
        let mut cursor = body.clone();
        let mut last_value: Option<Value> = None;

        loop {
            if last_value.is_some() && !cursor.is_empty() {
                return Err(Error::syntax(
                    "extra instructions after value",
                    self.span_for(&cursor),
                ));
            }
            if self.top_stop() {
                return Ok(self.take_top_output());
            }
            if cursor.is_empty() {
                return Ok(None);
            }

            let head = cursor.head().expect("checked non-empty").clone();
            if let Value::Word(w) = &head {
                if &**w == "to" {
                    advance(&mut cursor);
                    self.handle_to(&mut cursor)?;
                    last_value = None;
                    continue;
                }
            }
            last_value = self.handle_arg(&mut cursor, 0)?;
        }
    }

    fn is_literal_head(&self, v: &Value) -> bool {
        match v {
            Value::List(_) | Value::Boolean(_) | Value::Number(_) => true,
            Value::Word(w) => w.starts_with('"') || w.starts_with(':'),
        }
    }

    /// Parses one expression, then consumes any following infix operator
    /// chain via precedence climbing.
    fn handle_arg(&mut self, cursor: &mut List, prio: u8) -> Result<Option<Value>> {
        let head = cursor
            .head()
            .cloned()
            .ok_or_else(|| Error::syntax("unexpected end of input", None))?;

        let result = if matches!(&head, Value::Word(w) if &**w == "(") {
            self.handle_variadic(cursor)?
        } else if self.is_literal_head(&head) {
            self.handle_literal(cursor)?
        } else {
            self.handle_fixed(cursor)?
        };

        if let (Some(value), Some(Value::Word(w))) = (&result, cursor.head()) {
            if operator_priority(w).is_some() {
                let value = self.handle_operator(cursor, value.clone(), prio)?;
                return Ok(Some(value));
            }
        }
        Ok(result)
    }

    fn handle_literal(&mut self, cursor: &mut List) -> Result<Option<Value>> {
        let head = cursor.head().cloned().expect("handle_arg checked non-empty");
        let span = self.span_for(cursor);
        advance(cursor);
        match head {
            Value::List(_) | Value::Boolean(_) | Value::Number(_) => Ok(Some(head)),
            Value::Word(w) => {
                if let Some(rest) = w.strip_prefix('"') {
                    Ok(Some(Value::word(rest)))
                } else if let Some(name) = w.strip_prefix(':') {
                    let value = self
                        .current_scope()
                        .get(name)
                        .map_err(|_| Error::unbound_variable(name.to_string(), span))?;
                    Ok(Some(value))
                } else {
                    Err(Error::syntax(format!("'{}' cannot appear here", w), span))
                }
            }
        }
    }

    fn handle_fixed(&mut self, cursor: &mut List) -> Result<Option<Value>> {
        let span = self.span_for(cursor);
        let node = cursor.node_id();
        let name = match cursor.head() {
            Some(Value::Word(w)) => w.to_string(),
            _ => return Err(Error::syntax("expected a procedure name", span)),
        };
        advance(cursor);

        if name == "-" {
            let arg = self
                .handle_arg(cursor, 0)?
                .ok_or_else(|| Error::syntax("expected a value after unary '-'", span))?;
            let n = arg
                .as_number()
                .ok_or_else(|| Error::type_error("number", arg.type_name(), span))?;
            return Ok(Some(Value::Number(-n)));
        }

        let proc = self
            .procedures
            .get(&name)
            .ok_or_else(|| Error::unbound_procedure(name.clone(), span))?;
        let arity = proc.arity();
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            let v = self.handle_arg(cursor, 0)?.ok_or_else(|| {
                Error::syntax(
                    format!("'{}' didn't get enough inputs", name),
                    span,
                )
            })?;
            args.push(v);
        }
        self.perform_call(&name, proc, args, node)
    }

    fn handle_variadic(&mut self, cursor: &mut List) -> Result<Option<Value>> {
        let open_span = self.span_for(cursor);
        advance(cursor); // consume '('

        let is_named = matches!(cursor.head(), Some(Value::Word(w)) if self.procedures.is_defined(w) && operator_priority(w).is_none() && &**w != "(" && &**w != ")");

        if is_named {
            let name = match cursor.head() {
                Some(Value::Word(w)) => w.to_string(),
                _ => unreachable!(),
            };
            let node = cursor.node_id();
            advance(cursor);
            let proc = self.procedures.get(&name).expect("checked is_defined");
            let mut args = Vec::new();
            loop {
                match cursor.head() {
                    Some(Value::Word(w)) if &**w == ")" => {
                        advance(cursor);
                        break;
                    }
                    None => {
                        return Err(Error::syntax(
                            "unexpected end of input in variadic call",
                            open_span,
                        ))
                    }
                    _ => {
                        let v = self.handle_arg(cursor, 0)?.ok_or_else(|| {
                            Error::syntax("command used where a value was expected", open_span)
                        })?;
                        args.push(v);
                    }
                }
            }
            if args.len() < proc.arity() {
                return Err(Error::syntax(
                    format!("'{}' needs at least {} input(s)", name, proc.arity()),
                    open_span,
                ));
            }
            self.perform_call(&name, proc, args, node)
        } else {
            let value = self.handle_arg(cursor, 0)?;
            match cursor.head() {
                Some(Value::Word(w)) if &**w == ")" => {
                    advance(cursor);
                    Ok(value)
                }
                _ => Err(Error::syntax("expected ')'", open_span)),
            }
        }
    }

    /// Precedence-climbing infix resolution. `handle_arg`'s own trailing
    /// check already absorbed any higher-priority operator into `left`'s
    /// right operand by the time we get here, so this only needs to walk
    /// operators at `>= old_prio`.
    fn handle_operator(&mut self, cursor: &mut List, left: Value, old_prio: u8) -> Result<Value> {
        let op = match cursor.head() {
            Some(Value::Word(w)) => w.to_string(),
            _ => return Ok(left),
        };
        let p = match operator_priority(&op) {
            Some(p) => p,
            None => return Ok(left),
        };
        if p < old_prio {
            return Ok(left);
        }
        let op_span = self.span_for(cursor);
        let node = cursor.node_id();
        advance(cursor);

        let right = self
            .handle_arg(cursor, p)?
            .ok_or_else(|| Error::syntax(format!("'{}' needs a right-hand value", op), op_span))?;

        let proc = self
            .procedures
            .get(&op)
            .expect("operators are pre-registered builtins");
        let value = self
            .perform_call(&op, proc, vec![left, right], node)?
            .ok_or_else(|| Error::syntax(format!("'{}' produced no value", op), op_span))?;

        if cursor.head().is_some() {
            self.handle_operator(cursor, value, old_prio)
        } else {
            Ok(value)
        }
    }

    fn handle_to(&mut self, cursor: &mut List) -> Result<()> {
        let name = match cursor.head() {
            Some(Value::Word(w)) => w.to_string(),
            _ => return Err(Error::syntax("expected a procedure name after 'to'", None)),
        };
        advance(cursor);

        let mut params = Vec::new();
        while let Some(Value::Word(w)) = cursor.head() {
            match w.strip_prefix(':') {
                Some(p) => {
                    params.push(p.to_string());
                    advance(cursor);
                }
                None => break,
            }
        }

        let mut body_builder = ListBuilder::new();
        loop {
            let old_id = cursor.node_id();
            match cursor.head() {
                Some(Value::Word(w)) if &**w == "end" => {
                    advance(cursor);
                    break;
                }
                None => {
                    return Err(Error::syntax(
                        format!("'to {}' is missing 'end'", name),
                        None,
                    ))
                }
                Some(v) => {
                    let v = v.clone();
                    advance(cursor);
                    let new_id = body_builder.push(v);
                    if let Some(old_id) = old_id {
                        if let Some(span) = self.source_map.get(old_id) {
                            self.source_map.record(new_id, span);
                        }
                    }
                }
            }
        }

        let proc = UserProcedure::new(name.clone(), params, body_builder.build());
        self.procedures.define(name, Rc::new(proc));
        Ok(())
    }

    /// The one point every call (builtin, host, user procedure) passes
    /// through: checks for a pending break, enforces resource limits, and
    /// fires the `on_call`/`on_value` observer hooks around the dispatch.
    pub fn perform_call(
        &mut self,
        name: &str,
        proc: Rc<dyn Callable>,
        args: Vec<Value>,
        node: Option<NodeId>,
    ) -> Result<Option<Value>> {
        self.control.check_break()?;

        self.steps += 1;
        if let Some(max) = self.limits.max_steps {
            if self.steps > max {
                return Err(Error::syntax("step limit exceeded", None));
            }
        }

        self.call_depth += 1;
        if let Some(max) = self.limits.max_call_depth {
            if self.call_depth > max {
                self.call_depth -= 1;
                return Err(Error::syntax("call depth limit exceeded", None));
            }
        }

        if let Some(mut cb) = self.on_call.take() {
            cb(name, &args, node);
            self.on_call = Some(cb);
        }

        let result = proc.call(self, args);
        self.call_depth -= 1;
        let result = result?;

        if let Some(value) = &result {
            if let Some(mut cb) = self.on_value.take() {
                cb(value, node);
                self.on_value = Some(cb);
            }
        }

        Ok(result)
    }
}

/// Invokes a template — either a bare procedure name or a
/// `[[args…] body…]` list — with the given positional arguments, per the
/// template-runner contract.
pub fn invoke_template(ev: &mut Evaluator, template: &Value, args: Vec<Value>) -> Result<Option<Value>> {
    match template {
        Value::Word(name) => {
            let proc = ev
                .procedures
                .get(name)
                .ok_or_else(|| Error::unbound_procedure(name.to_string(), None))?;
            ev.perform_call(name, proc, args, None)
        }
        Value::List(list) => {
            let params_value = list
                .head()
                .cloned()
                .ok_or_else(|| Error::syntax("template is missing an argument list", None))?;
            let params_list = params_value
                .as_list()
                .ok_or_else(|| Error::syntax("template must start with an argument-name list", None))?;
            let mut params = Vec::new();
            for v in params_list.iter() {
                match v {
                    Value::Word(w) => params.push(w.trim_start_matches(':').to_string()),
                    _ => return Err(Error::syntax("template argument names must be words", None)),
                }
            }
            let body = list.tail();

            let scope = Scope::child(&ev.current_scope());
            for (i, p) in params.iter().enumerate() {
                let v = args.get(i).cloned().unwrap_or(Value::Boolean(false));
                scope.bind_value(p.clone(), v);
            }
            ev.scope_stack.push(scope);
            let result = ev.evaluate(&body);
            ev.scope_stack.pop();
            result
        }
        other => Err(Error::type_error("template", other.type_name(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(source: &str) -> (Evaluator, Result<Option<Value>>) {
        let control = ControlState::new();
        control.begin_run().unwrap();
        let mut ev = Evaluator::new(control);
        crate::builtins::install(&ev.procedures);
        let (program, source_map) = parse(source).unwrap();
        ev.begin_program(source.to_string(), source_map);
        let result = ev.evaluate(&program);
        (ev, result)
    }

    #[test]
    fn arithmetic_precedence() {
        let (_, result) = run("1 + 2 * 3 - 4");
        assert_eq!(result.unwrap().unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn unary_minus_before_expression() {
        let (_, result) = run("-3 + 4");
        assert_eq!(result.unwrap().unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn procedure_with_output_persists_definition() {
        let (ev, result) = run("to sq :n output :n * :n end sq 7");
        assert_eq!(result.unwrap().unwrap().as_number(), Some(49.0));
        assert!(ev.procedures.is_defined("sq"));
    }

    #[test]
    fn bare_stop_at_top_level_is_an_error() {
        let (_, result) = run("stop");
        assert!(result.is_err());
    }
}
