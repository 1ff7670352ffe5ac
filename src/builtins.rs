use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::eval::{invoke_template, Evaluator, Native};
use crate::list::{List, ListBuilder};
use crate::scope::ProcedureScope;
use crate::value::Value;

fn number(v: &Value) -> Result<f64> {
    v.as_number()
        .ok_or_else(|| Error::type_error("number", v.type_name(), None))
}

fn list_of(v: &Value) -> Result<List> {
    v.as_list()
        .cloned()
        .ok_or_else(|| Error::type_error("list", v.type_name(), None))
}

fn word_of(v: &Value) -> Result<Rc<str>> {
    match v {
        Value::Word(w) => Ok(w.clone()),
        _ => Err(Error::type_error("word", v.type_name(), None)),
    }
}

fn boolean(v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| Error::type_error("boolean", v.type_name(), None))
}

/// Runs an `if`/`ifelse` branch. A branch is either a bare procedure name
/// (called through the template machinery, same as `apply`/`invoke`) or a
/// plain instruction list like `[print 1]`, run directly the way
/// `repeat`'s body is — *not* routed through `invoke_template`, which
/// would misread the list's head (`print`) as an argument-name list and
/// reject it. Only a genuine `[[args] body]` template list needs that
/// machinery, and `apply`/`invoke`/`foreach`/`map` are where that form
/// actually shows up.
fn run_branch(ev: &mut Evaluator, branch: &Value) -> Result<Option<Value>> {
    match branch {
        Value::List(list) => ev.evaluate(list),
        Value::Word(_) => invoke_template(ev, branch, Vec::new()),
        other => Err(Error::type_error("instruction list", other.type_name(), None)),
    }
}

/// Installs the fixed builtin registry into `procedures`, plus the
/// `op`/`bf`/`bl` aliases. Called once per `Interpreter`, before any
/// embedder builtins are registered.
pub fn install(procedures: &ProcedureScope) {
    macro_rules! def {
        ($name:expr, $arity:expr, $func:expr) => {
            procedures.define($name, Native::new($name, $arity, $func));
        };
    }

    // Booleans and logic.
    def!("true", 0, |_ev, _args| Ok(Some(Value::Boolean(true))));
    def!("false", 0, |_ev, _args| Ok(Some(Value::Boolean(false))));
    def!("not", 1, |_ev, args| Ok(Some(Value::Boolean(!boolean(&args[0])?))));
    def!("and", 2, |_ev, args: Vec<Value>| {
        for a in &args {
            if !boolean(a)? {
                return Ok(Some(Value::Boolean(false)));
            }
        }
        Ok(Some(Value::Boolean(true)))
    });
    def!("or", 2, |_ev, args: Vec<Value>| {
        for a in &args {
            if boolean(a)? {
                return Ok(Some(Value::Boolean(true)));
            }
        }
        Ok(Some(Value::Boolean(false)))
    });

    // Words and lists.
    def!("word", 2, |_ev, args: Vec<Value>| {
        let mut out = String::new();
        for a in &args {
            out.push_str(&word_of(a)?);
        }
        Ok(Some(Value::word(out)))
    });
    def!("se", 2, |_ev, args: Vec<Value>| {
        let mut builder = ListBuilder::new();
        for a in &args {
            match a {
                Value::List(l) => builder.concat(l.iter()),
                other => {
                    builder.push(other.clone());
                }
            }
        }
        Ok(Some(Value::List(builder.build())))
    });
    def!("list", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::List(List::from_values(args))))
    });
    def!("fput", 2, |_ev, args: Vec<Value>| {
        let tail = list_of(&args[1])?;
        Ok(Some(Value::List(List::cons(args[0].clone(), tail))))
    });
    def!("lput", 2, |_ev, args: Vec<Value>| {
        let list = list_of(&args[1])?;
        let mut builder = ListBuilder::new();
        builder.concat(list.iter());
        builder.push(args[0].clone());
        Ok(Some(Value::List(builder.build())))
    });
    def!("combine", 2, |_ev, args: Vec<Value>| {
        match &args[1] {
            Value::List(tail) => Ok(Some(Value::List(List::cons(args[0].clone(), tail.clone())))),
            Value::Word(b) => {
                let a = word_of(&args[0])?;
                Ok(Some(Value::word(format!("{}{}", a, b))))
            }
            other => Err(Error::type_error("word or list", other.type_name(), None)),
        }
    });
    def!("reverse", 1, |_ev, args: Vec<Value>| {
        let list = list_of(&args[0])?;
        Ok(Some(Value::List(list.reverse())))
    });
    def!("count", 1, |_ev, args: Vec<Value>| {
        let n = match &args[0] {
            Value::List(l) => l.count(),
            Value::Word(w) => w.chars().count(),
            other => return Err(Error::type_error("word or list", other.type_name(), None)),
        };
        Ok(Some(Value::Number(n as f64)))
    });
    def!("first", 1, |_ev, args: Vec<Value>| match &args[0] {
        Value::List(l) => Ok(Some(
            l.head()
                .cloned()
                .ok_or_else(|| Error::type_error("non-empty list", "empty list", None))?,
        )),
        Value::Word(w) => {
            let c = w
                .chars()
                .next()
                .ok_or_else(|| Error::type_error("non-empty word", "empty word", None))?;
            Ok(Some(Value::word(c.to_string())))
        }
        other => Err(Error::type_error("word or list", other.type_name(), None)),
    });
    def!("last", 1, |_ev, args: Vec<Value>| match &args[0] {
        Value::List(l) => Ok(Some(
            l.end()
                .head()
                .cloned()
                .ok_or_else(|| Error::type_error("non-empty list", "empty list", None))?,
        )),
        Value::Word(w) => {
            let c = w
                .chars()
                .last()
                .ok_or_else(|| Error::type_error("non-empty word", "empty word", None))?;
            Ok(Some(Value::word(c.to_string())))
        }
        other => Err(Error::type_error("word or list", other.type_name(), None)),
    });
    def!("butfirst", 1, |_ev, args: Vec<Value>| match &args[0] {
        Value::List(l) => Ok(Some(Value::List(l.tail()))),
        Value::Word(w) => Ok(Some(Value::word(w.chars().skip(1).collect::<String>()))),
        other => Err(Error::type_error("word or list", other.type_name(), None)),
    });
    def!("butlast", 1, |_ev, args: Vec<Value>| match &args[0] {
        Value::List(l) => {
            let mut items: Vec<Value> = l.iter().collect();
            items.pop();
            Ok(Some(Value::List(List::from_values(items))))
        }
        Value::Word(w) => {
            let mut chars: Vec<char> = w.chars().collect();
            chars.pop();
            Ok(Some(Value::word(chars.into_iter().collect::<String>())))
        }
        other => Err(Error::type_error("word or list", other.type_name(), None)),
    });
    def!("item", 2, |_ev, args: Vec<Value>| {
        let idx = number(&args[0])? as i64;
        if idx < 1 {
            return Err(Error::type_error("index >= 1", "out of range", None));
        }
        match &args[1] {
            Value::List(l) => l
                .iter()
                .nth((idx - 1) as usize)
                .map(Some)
                .ok_or_else(|| Error::type_error("in-range index", "out of range", None)),
            Value::Word(w) => w
                .chars()
                .nth((idx - 1) as usize)
                .map(|c| Some(Value::word(c.to_string())))
                .ok_or_else(|| Error::type_error("in-range index", "out of range", None)),
            other => Err(Error::type_error("word or list", other.type_name(), None)),
        }
    });
    def!("remove", 2, |_ev, args: Vec<Value>| {
        let list = list_of(&args[1])?;
        let target = args[0].clone();
        Ok(Some(Value::List(list.filter(|v| !v.logo_eq(&target)))))
    });

    // Output.
    def!("print", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        ev.emit_print(&args[0].stringify(false));
        Ok(None)
    });
    def!("show", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        ev.emit_print(&args[0].stringify(true));
        Ok(None)
    });
    def!("wait", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let frames = number(&args[0])?;
        let total = Duration::from_secs_f64((frames.max(0.0)) / 60.0);
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        // `wait` is cancellable by `break_()` but not by `pause()`: a
        // non-blocking poll of the break flag rather than the blocking
        // `check_break` used at ordinary suspension points.
        while waited < total {
            if ev.control.break_requested() {
                return Err(Error::BreakRequested);
            }
            let sleep_for = (total - waited).min(step);
            std::thread::sleep(sleep_for);
            waited += sleep_for;
        }
        Ok(None)
    });

    // Variables.
    def!("thing", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let name = word_of(&args[0])?;
        Ok(Some(ev.current_scope().get(&name)?))
    });
    def!("make", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let name = word_of(&args[0])?;
        ev.current_scope().set(&name, args[1].clone());
        Ok(None)
    });
    def!("local", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let name = word_of(&args[0])?;
        ev.current_scope().bind_value(name.to_string(), Value::Boolean(false));
        Ok(None)
    });
    def!("global", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let name = word_of(&args[0])?;
        let root = ev.globals.clone();
        if let Some(binding) = root.get_binding(&name) {
            ev.current_scope().bind(name.to_string(), binding);
        } else {
            root.bind_value(name.to_string(), Value::Boolean(false));
            let binding = root.get_binding(&name).expect("just bound");
            ev.current_scope().bind(name.to_string(), binding);
        }
        Ok(None)
    });
    def!("push", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let name = word_of(&args[0])?;
        let current = ev.current_scope().get(&name)?;
        let list = list_of(&current)?;
        ev.current_scope()
            .set(&name, Value::List(List::cons(args[1].clone(), list)));
        Ok(None)
    });

    // Arithmetic.
    def!("+", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Number(number(&args[0])? + number(&args[1])?)))
    });
    def!("-", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Number(number(&args[0])? - number(&args[1])?)))
    });
    def!("*", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Number(number(&args[0])? * number(&args[1])?)))
    });
    def!("/", 2, |_ev, args: Vec<Value>| {
        let b = number(&args[1])?;
        if b == 0.0 {
            return Err(Error::type_error("non-zero divisor", "zero", None));
        }
        Ok(Some(Value::Number(number(&args[0])? / b)))
    });
    def!("sum", 2, |_ev, args: Vec<Value>| {
        let mut total = 0.0;
        for a in &args {
            total += number(a)?;
        }
        Ok(Some(Value::Number(total)))
    });
    def!("difference", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Number(number(&args[0])? - number(&args[1])?)))
    });
    def!("product", 2, |_ev, args: Vec<Value>| {
        let mut total = 1.0;
        for a in &args {
            total *= number(a)?;
        }
        Ok(Some(Value::Number(total)))
    });
    def!("quotient", 2, |_ev, args: Vec<Value>| {
        let b = number(&args[1])?;
        if b == 0.0 {
            return Err(Error::type_error("non-zero divisor", "zero", None));
        }
        Ok(Some(Value::Number(number(&args[0])? / b)))
    });
    def!("remainder", 2, |_ev, args: Vec<Value>| {
        let b = number(&args[1])?;
        if b == 0.0 {
            return Err(Error::type_error("non-zero divisor", "zero", None));
        }
        Ok(Some(Value::Number(number(&args[0])? % b)))
    });
    def!("<", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(number(&args[0])? < number(&args[1])?)))
    });
    def!(">", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(number(&args[0])? > number(&args[1])?)))
    });
    def!("=", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(args[0].logo_eq(&args[1]))))
    });

    // Predicates.
    def!("emptyp", 1, |_ev, args: Vec<Value>| {
        let empty = match &args[0] {
            Value::List(l) => l.is_empty(),
            Value::Word(w) => w.is_empty(),
            other => return Err(Error::type_error("word or list", other.type_name(), None)),
        };
        Ok(Some(Value::Boolean(empty)))
    });
    def!("equalp", 2, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(args[0].logo_eq(&args[1]))))
    });
    def!("listp", 1, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(matches!(args[0], Value::List(_)))))
    });
    def!("memberp", 2, |_ev, args: Vec<Value>| {
        let found = match &args[1] {
            Value::List(l) => l.iter().any(|v| v.logo_eq(&args[0])),
            Value::Word(w) => {
                let needle = word_of(&args[0])?;
                w.contains(needle.as_ref())
            }
            other => return Err(Error::type_error("word or list", other.type_name(), None)),
        };
        Ok(Some(Value::Boolean(found)))
    });
    def!("numberp", 1, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(matches!(args[0], Value::Number(_)))))
    });
    def!("wordp", 1, |_ev, args: Vec<Value>| {
        Ok(Some(Value::Boolean(matches!(args[0], Value::Word(_)))))
    });

    // Control.
    def!("stop", 0, |ev: &mut Evaluator, _args: Vec<Value>| {
        let ctx = ev.context_stack.last().expect("context stack never empty").clone();
        let mut ctx = ctx.borrow_mut();
        if ctx.is_global {
            return Err(Error::syntax("'stop' can only be used inside a procedure", None));
        }
        ctx.stop = true;
        Ok(None)
    });
    def!("output", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let ctx = ev.context_stack.last().expect("context stack never empty").clone();
        let mut ctx = ctx.borrow_mut();
        if ctx.is_global {
            return Err(Error::syntax("'output' can only be used inside a procedure", None));
        }
        ctx.output = Some(args[0].clone());
        ctx.stop = true;
        Ok(None)
    });
    def!("run", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let body = list_of(&args[0])?;
        ev.evaluate(&body)
    });
    def!("runresult", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let body = list_of(&args[0])?;
        let result = ev.evaluate(&body)?;
        let wrapped = match result {
            Some(v) => List::from_values(vec![v]),
            None => List::empty(),
        };
        Ok(Some(Value::List(wrapped)))
    });
    def!("repeat", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let n = number(&args[0])? as i64;
        let body = list_of(&args[1])?;
        for _ in 0..n {
            ev.evaluate(&body)?;
            if ev.context_stack.last().expect("never empty").borrow().stop {
                break;
            }
            ev.control.check_break()?;
        }
        Ok(None)
    });
    def!("forever", 1, |ev: &mut Evaluator, args: Vec<Value>| {
        let body = list_of(&args[0])?;
        loop {
            ev.evaluate(&body)?;
            if ev.context_stack.last().expect("never empty").borrow().stop {
                break;
            }
            ev.control.check_break()?;
        }
        Ok(None)
    });
    def!("if", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        if boolean(&args[0])? {
            run_branch(ev, &args[1])
        } else {
            Ok(None)
        }
    });
    def!("ifelse", 3, |ev: &mut Evaluator, args: Vec<Value>| {
        let branch = if boolean(&args[0])? { &args[1] } else { &args[2] };
        run_branch(ev, branch)
    });

    // Templates.
    def!("apply", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let items: Vec<Value> = list_of(&args[1])?.iter().collect();
        invoke_template(ev, &args[0], items)
    });
    def!("invoke", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        invoke_template(ev, &args[0], vec![args[1].clone()])
    });
    def!("foreach", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let (mut cursors, template) = lockstep_sources(&args)?;
        loop {
            match next_items(&mut cursors) {
                Some(items) => {
                    invoke_template(ev, &template, items)?;
                }
                None => break,
            }
        }
        Ok(None)
    });
    def!("map", 2, |ev: &mut Evaluator, args: Vec<Value>| {
        let (mut cursors, template) = lockstep_sources(&args)?;
        let mut builder = ListBuilder::new();
        loop {
            match next_items(&mut cursors) {
                Some(items) => {
                    if let Some(v) = invoke_template(ev, &template, items)? {
                        builder.push(v);
                    }
                }
                None => break,
            }
        }
        Ok(Some(Value::List(builder.build())))
    });

    // Aliases.
    if let Some(output) = procedures.get("output") {
        procedures.define("op", output);
    }
    if let Some(butfirst) = procedures.get("butfirst") {
        procedures.define("bf", butfirst);
    }
    if let Some(butlast) = procedures.get("butlast") {
        procedures.define("bl", butlast);
    }
}

/// Splits a `foreach`/`map` argument list into its lock-step list sources
/// and trailing template — the last argument is always the template,
/// every argument before it a list to walk in step.
fn lockstep_sources(args: &[Value]) -> Result<(Vec<List>, Value)> {
    if args.len() < 2 {
        return Err(Error::type_error("at least one list and a template", "too few arguments", None));
    }
    let template = args.last().cloned().expect("checked len >= 2");
    let mut lists = Vec::new();
    for a in &args[..args.len() - 1] {
        lists.push(list_of(a)?);
    }
    Ok((lists, template))
}

/// Advances all cursors by one step, returning their heads, or `None` as
/// soon as any source is exhausted (lock-step termination rule).
fn next_items(cursors: &mut [List]) -> Option<Vec<Value>> {
    let mut items = Vec::with_capacity(cursors.len());
    for c in cursors.iter() {
        items.push(c.head()?.clone());
    }
    for c in cursors.iter_mut() {
        *c = c.tail();
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlState;
    use crate::parser::parse;

    fn run(source: &str) -> Option<Value> {
        let control = ControlState::new();
        control.begin_run().unwrap();
        let mut ev = Evaluator::new(control);
        install(&ev.procedures);
        let (program, source_map) = parse(source).unwrap();
        ev.begin_program(source.to_string(), source_map);
        ev.evaluate(&program).unwrap()
    }

    #[test]
    fn list_first_and_butfirst() {
        let result = run("first butfirst [a b c]").unwrap();
        assert_eq!(result.stringify(true), "b");
    }

    #[test]
    fn count_nested_list() {
        let result = run("count [a [b c] d]").unwrap();
        assert_eq!(result.as_number(), Some(3.0));
    }

    #[test]
    fn and_or_short_circuit() {
        assert_eq!(run("and false true").unwrap().as_bool(), Some(false));
        assert_eq!(run("or true false").unwrap().as_bool(), Some(true));
    }
}
