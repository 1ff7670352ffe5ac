use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use logo_core::{Error, Interpreter, List, Value};
use pretty_assertions::assert_eq;

fn printed_output(source: &str) -> Vec<String> {
    let mut interpreter = Interpreter::new();
    let printed = Rc::new(RefCell::new(Vec::new()));
    let sink = printed.clone();
    interpreter.on_print(move |s| sink.borrow_mut().push(s.to_string()));
    interpreter.execute(source).unwrap();
    let result = printed.borrow().clone();
    result
}

#[test]
fn scenario_1_precedence_and_associativity() {
    assert_eq!(printed_output("print 1 + 2 * 3 - 4"), vec!["3"]);
}

/// A recording turtle double: tracks heading and pen state and records
/// each pen-down movement's length, without needing real trigonometry to
/// make the scenario's assertions (length and final heading) checkable.
#[derive(Default)]
struct TurtleState {
    heading: f64,
    pen_down: bool,
    x: f64,
    y: f64,
    moves: Vec<(f64, f64)>, // (length, heading at time of movement)
}

fn install_test_turtle(interpreter: &mut Interpreter) -> Rc<RefCell<TurtleState>> {
    let state = Rc::new(RefCell::new(TurtleState {
        pen_down: true,
        ..Default::default()
    }));

    let s = state.clone();
    interpreter.register_builtin("cs", 0, move |_args| {
        let mut t = s.borrow_mut();
        t.heading = 0.0;
        t.pen_down = true;
        t.x = 0.0;
        t.y = 0.0;
        t.moves.clear();
        Ok(None)
    });

    let s = state.clone();
    interpreter.register_builtin("up", 0, move |_args| {
        s.borrow_mut().pen_down = false;
        Ok(None)
    });

    let s = state.clone();
    interpreter.register_builtin("down", 0, move |_args| {
        s.borrow_mut().pen_down = true;
        Ok(None)
    });

    let s = state.clone();
    interpreter.register_builtin("seth", 1, move |args| {
        s.borrow_mut().heading = args[0].as_number().unwrap_or(0.0).rem_euclid(360.0);
        Ok(None)
    });

    let s = state.clone();
    interpreter.register_builtin("setpos", 1, move |args| {
        let coords: Vec<Value> = args[0].as_list().expect("setpos takes a list").iter().collect();
        let mut t = s.borrow_mut();
        t.x = coords[0].as_number().unwrap_or(0.0);
        t.y = coords[1].as_number().unwrap_or(0.0);
        Ok(None)
    });

    for (name, sign) in [("forward", 1.0), ("back", -1.0)] {
        let s = state.clone();
        interpreter.register_builtin(name, 1, move |args| {
            let distance = sign * args[0].as_number().unwrap_or(0.0);
            let mut t = s.borrow_mut();
            if t.pen_down {
                let heading = t.heading;
                t.moves.push((distance.abs(), heading));
            }
            let radians = t.heading.to_radians();
            t.x += distance * radians.sin();
            t.y += distance * radians.cos();
            Ok(None)
        });
    }

    for (name, sign) in [("right", 1.0), ("left", -1.0)] {
        let s = state.clone();
        interpreter.register_builtin(name, 1, move |args| {
            let delta = sign * args[0].as_number().unwrap_or(0.0);
            let mut t = s.borrow_mut();
            t.heading = (t.heading + delta).rem_euclid(360.0);
            Ok(None)
        });
    }

    let s = state.clone();
    interpreter.register_builtin("xcor", 0, move |_args| Ok(Some(Value::Number(s.borrow().x))));
    let s = state.clone();
    interpreter.register_builtin("ycor", 0, move |_args| Ok(Some(Value::Number(s.borrow().y))));
    let s = state.clone();
    interpreter.register_builtin("heading", 0, move |_args| Ok(Some(Value::Number(s.borrow().heading))));
    let s = state.clone();
    interpreter.register_builtin("pos", 0, move |_args| {
        let t = s.borrow();
        Ok(Some(Value::List(List::from_values(vec![
            Value::Number(t.x),
            Value::Number(t.y),
        ]))))
    });
    interpreter.register_builtin("color", 1, |_args| Ok(None));

    state
}

#[test]
fn scenario_2_repeat_with_turtle_effect() {
    let mut interpreter = Interpreter::new();
    let turtle = install_test_turtle(&mut interpreter);

    interpreter
        .execute("cs repeat 18 [ forward 200 right 10 back 200 right 10 ]")
        .unwrap();

    let state = turtle.borrow();
    assert_eq!(state.moves.len(), 36);
    for (length, _heading) in &state.moves {
        assert!((length - 200.0).abs() < 1e-9);
    }
    assert!(state.heading.abs() < 1e-9 || (state.heading - 360.0).abs() < 1e-9);
}

#[test]
fn scenario_3_procedure_with_output() {
    let mut interpreter = Interpreter::new();
    let printed = Rc::new(RefCell::new(Vec::new()));
    let sink = printed.clone();
    interpreter.on_print(move |s| sink.borrow_mut().push(s.to_string()));
    interpreter
        .execute("to sq :n output :n * :n end print sq 7")
        .unwrap();
    assert_eq!(*printed.borrow(), vec!["49".to_string()]);
    assert!(interpreter.procedure_scope().is_defined("sq"));
}

#[test]
fn scenario_4_stop_short_circuits_repeat() {
    assert_eq!(
        printed_output("to f repeat 10 [ print 1 stop print 2 ] end f"),
        vec!["1"]
    );
}

#[test]
fn scenario_5_list_manipulation() {
    assert_eq!(printed_output("print first butfirst [a b c]"), vec!["b"]);
    assert_eq!(printed_output("print count [a [b c] d]"), vec!["3"]);
}

#[test]
fn scenario_6_unary_vs_binary_minus() {
    assert_eq!(printed_output("print -3 + 4"), vec!["1"]);

    // A space before '-' but none after makes it a negative-number token,
    // not a binary minus, so `print` only ever sees "3" as its one input
    // and the trailing "-4" is a separate (silently discarded) statement.
    assert_eq!(printed_output("print 3 -4"), vec!["3"]);

    assert_eq!(printed_output("print 3 - 4"), vec!["-1"]);

    let mut interpreter = Interpreter::new();
    let err = interpreter.execute("3 4").unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }));
}

#[test]
fn scenario_if_ifelse_run_plain_instruction_lists() {
    // The idiomatic, spec-mandated form: a plain instruction list, not a
    // `[[args] body]` template. `[print 1]`'s head is the word `print`,
    // not an argument-name list, so this must not go through the
    // template machinery that `apply`/`invoke`/`foreach`/`map` use.
    assert_eq!(printed_output("if true [print 1]"), vec!["1"]);
    assert_eq!(printed_output("if false [print 1]"), Vec::<String>::new());
    assert_eq!(printed_output("ifelse true [print 1] [print 2]"), vec!["1"]);
    assert_eq!(printed_output("ifelse false [print 1] [print 2]"), vec!["2"]);
    assert_eq!(
        printed_output("to f :n if :n > 0 [print \"positive] if :n < 0 [print \"negative] end f 5 f -5"),
        vec!["positive", "negative"]
    );
}

#[test]
fn scenario_7_break_interrupts_wait() {
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut interpreter = Interpreter::new();
        tx.send(interpreter.handle()).expect("main thread still waiting");
        interpreter.execute("wait 600")
    });

    let handle = rx.recv().expect("worker sent its handle");
    thread::sleep(Duration::from_millis(50));
    handle.break_();

    let result = worker.join().expect("worker thread did not panic");
    assert!(matches!(result, Err(Error::BreakRequested)));
}

#[test]
fn invariant_reverse_is_involutive() {
    let list = List::from_values(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
    assert!(list.equal(&list.reverse().reverse()));
}

#[test]
fn invariant_empty_list_tail_is_empty() {
    let empty = List::empty();
    assert!(empty.is_empty());
    assert!(empty.tail().is_empty());
}

#[test]
fn invariant_parse_is_lossless_modulo_whitespace() {
    let interpreter = Interpreter::new();
    let (program, _) = interpreter.parse("print [a b c]").unwrap();
    assert_eq!(program.stringify("", "", true).trim(), "print [a b c]");
}
