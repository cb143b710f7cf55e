//! End-to-end scenarios: source → lower → compile → run.

use pex::{prepare, RecordingEffects, RejectEffects, RunError, Value};

/// Runs an effect-free program against an input.
fn eval(source: &str, input: Value) -> Value {
    prepare(source)
        .unwrap()
        .run_with_handler(input, &mut RejectEffects)
        .unwrap()
}

fn eval_err(source: &str, input: Value) -> RunError {
    prepare(source)
        .unwrap()
        .run_with_handler(input, &mut RejectEffects)
        .unwrap_err()
}

#[test]
fn pipeline_lower_trim() {
    assert_eq!(
        eval("$$ | lower | trim", Value::str("  HELLO  ")),
        Value::str("hello")
    );
}

#[test]
fn recursive_factorial() {
    let src = "let: f (fn (n) (if (<= n 1) 1 (* n (f (- n 1))))); (f 5)";
    assert_eq!(eval(src, Value::Null), Value::Num(120.0));
}

#[test]
fn mutual_recursion_even_odd() {
    let src = "fn: even (n) (if (== n 0) true (odd (- n 1))); \
               fn: odd (n) (if (== n 0) false (even (- n 1))); \
               (even 6)";
    assert_eq!(eval(src, Value::Null), Value::Bool(true));
}

#[test]
fn closure_over_let_binding() {
    let src = "let: x 10; fn: add (y) (+ x y); (add 5)";
    assert_eq!(eval(src, Value::Null), Value::Num(15.0));
}

#[test]
fn effects_run_in_order_and_program_completes() {
    let mut recorder = RecordingEffects::new();
    let result = prepare("print: \"a\"; print: \"b\"; 42")
        .unwrap()
        .run_with_handler(Value::Null, &mut recorder)
        .unwrap();
    assert_eq!(result, Value::Num(42.0));
    assert_eq!(recorder.names(), vec!["print", "print"]);
    assert_eq!(recorder.calls[0].1, vec![Value::str("a")]);
    assert_eq!(recorder.calls[1].1, vec![Value::str("b")]);
}

#[test]
fn positional_input_access() {
    let input = Value::array(vec![Value::Num(10.0), Value::Num(20.0)]);
    assert_eq!(eval("(+ $0 $1)", input), Value::Num(30.0));
}

#[test]
fn empty_program_is_null() {
    assert_eq!(eval("", Value::Num(7.0)), Value::Null);
}

#[test]
fn array_index_out_of_bounds_is_null() {
    assert_eq!(eval("(get (array 1 2) 5)", Value::Null), Value::Null);
    assert_eq!(eval("(get (array 1 2) -1)", Value::Null), Value::Null);
    assert_eq!(eval("$3", Value::array(vec![Value::Num(1.0)])), Value::Null);
}

#[test]
fn indexing_null_input_is_null() {
    assert_eq!(eval("$0", Value::Null), Value::Null);
}

#[test]
fn string_indexing_by_character() {
    assert_eq!(eval("$0", Value::str("abc")), Value::str("a"));
}

#[test]
fn object_indexing_by_key() {
    let mut map = ahash::AHashMap::new();
    map.insert("name".to_owned(), Value::str("pex"));
    let input = Value::object(map);
    assert_eq!(eval("(get $$ \"name\")", input.clone()), Value::str("pex"));
    assert_eq!(eval("(get $$ \"missing\")", input), Value::Null);
}

#[test]
fn division_by_zero_errors() {
    assert_eq!(eval_err("(/ 1 0)", Value::Null), RunError::DivisionByZero);
    assert_eq!(eval_err("(% 1 0)", Value::Null), RunError::DivisionByZero);
}

#[test]
fn truthiness_via_if() {
    let executor = prepare("(if $$ 1 0)").unwrap();
    let truthy = |input: Value| {
        executor
            .run_with_handler(input, &mut RejectEffects)
            .unwrap()
            == Value::Num(1.0)
    };
    assert!(!truthy(Value::Null));
    assert!(!truthy(Value::Bool(false)));
    assert!(!truthy(Value::Num(0.0)));
    assert!(!truthy(Value::Num(f64::NAN)));
    assert!(!truthy(Value::str("")));

    assert!(truthy(Value::Bool(true)));
    assert!(truthy(Value::Num(-1.0)));
    assert!(truthy(Value::str("0")));
    assert!(truthy(Value::array(vec![])));
    assert!(truthy(Value::object(ahash::AHashMap::new())));
}

#[test]
fn arithmetic_matches_host_integers() {
    let add = prepare("(+ $0 $1)").unwrap();
    let sub = prepare("(- $0 $1)").unwrap();
    let mul = prepare("(* $0 $1)").unwrap();
    for a in (-20..=20).step_by(7) {
        for b in (-20..=20).step_by(3) {
            let input = Value::array(vec![Value::Num(f64::from(a)), Value::Num(f64::from(b))]);
            let run = |ex: &pex::Executor| {
                ex.run_with_handler(input.clone(), &mut RejectEffects).unwrap()
            };
            assert_eq!(run(&add), Value::Num(f64::from(a + b)));
            assert_eq!(run(&sub), Value::Num(f64::from(a - b)));
            assert_eq!(run(&mul), Value::Num(f64::from(a * b)));
        }
    }
}

#[test]
fn unary_and_binary_minus() {
    assert_eq!(eval("(- 5)", Value::Null), Value::Num(-5.0));
    assert_eq!(eval("(- 5 2)", Value::Null), Value::Num(3.0));
}

#[test]
fn and_or_short_circuit_values() {
    // `and` yields the first falsy operand, `or` the first truthy one.
    assert_eq!(eval("(and 0 \"x\")", Value::Null), Value::Num(0.0));
    assert_eq!(eval("(and 1 \"x\")", Value::Null), Value::str("x"));
    assert_eq!(eval("(or 0 \"x\")", Value::Null), Value::str("x"));
    assert_eq!(eval("(or 1 \"x\")", Value::Null), Value::Num(1.0));
}

#[test]
fn null_coalesce() {
    assert_eq!(eval("(?? $$ \"fallback\")", Value::Null), Value::str("fallback"));
    assert_eq!(eval("(?? $$ \"fallback\")", Value::Num(5.0)), Value::Num(5.0));
    // false is not null, so it passes through.
    assert_eq!(eval("(?? $$ \"fallback\")", Value::Bool(false)), Value::Bool(false));
}

#[test]
fn deep_equality_on_arrays() {
    assert_eq!(
        eval("(== $$ (array 1 2))", Value::array(vec![Value::Num(1.0), Value::Num(2.0)])),
        Value::Bool(true)
    );
    // No coercion: 1 != "1".
    assert_eq!(eval("(== 1 \"1\")", Value::Null), Value::Bool(false));
    assert_eq!(eval("(!= 1 \"1\")", Value::Null), Value::Bool(true));
}

#[test]
fn ordered_comparison_coerces() {
    assert_eq!(eval("(< \"2\" 10)", Value::Null), Value::Bool(true));
    // NaN poisons ordered comparisons.
    assert_eq!(eval("(< \"x\" 10)", Value::Null), Value::Bool(false));
    assert_eq!(eval("(>= \"x\" 10)", Value::Null), Value::Bool(false));
}

#[test]
fn pipeline_with_builtin_chain() {
    let src = "$$ | trim | (split \" \") | len";
    assert_eq!(eval(src, Value::str("  a b c  ")), Value::Num(3.0));
}

#[test]
fn repeated_execution_is_deterministic() {
    let executor = prepare("let: f (fn (n) (* n n)); (+ (f 3) (f 4))").unwrap();
    for _ in 0..5 {
        assert_eq!(
            executor.run_with_handler(Value::Null, &mut RejectEffects).unwrap(),
            Value::Num(25.0)
        );
    }
}

#[test]
fn deep_recursion_hits_frame_limit() {
    let err = eval_err("fn: f (n) (f n); (f 1)", Value::Null);
    assert_eq!(err, RunError::FrameOverflow);
}

#[test]
fn calling_a_non_function_errors() {
    let err = eval_err("let: x 3; (x 1)", Value::Null);
    assert_eq!(err, RunError::NotCallable("number"));
}

#[test]
fn arity_mismatch_errors() {
    let err = eval_err("let: f (fn (a b) a); (f 1)", Value::Null);
    assert_eq!(err, RunError::ArityMismatch { expected: 2, got: 1 });
}

#[test]
fn indexing_a_number_errors() {
    let err = eval_err("(get 5 0)", Value::Null);
    assert_eq!(err, RunError::NotIndexable("number"));
}

#[test]
fn builtin_errors_carry_the_builtin_message() {
    let err = eval_err("(split 1 \",\")", Value::Null);
    let RunError::Builtin { name, message } = err else {
        panic!("expected builtin error, got {err:?}");
    };
    assert_eq!(name, "split");
    assert!(message.contains("expects a string"));
}

#[test]
fn builtin_overrides_take_effect() {
    let ir = pex::parse_and_lower("(len \"abc\")").unwrap();
    let program = pex::compile(&ir).unwrap();
    let mut executor = pex::Executor::new(program).unwrap();
    executor.override_builtin("len", std::rc::Rc::new(|_: &[Value]| Ok(Value::Num(1000.0))));
    assert_eq!(
        executor.run_with_handler(Value::Null, &mut RejectEffects).unwrap(),
        Value::Num(1000.0)
    );
}

#[test]
fn regex_builtins_end_to_end() {
    assert_eq!(
        eval("(test $$ \"^h\" \"i\")", Value::str("Hello")),
        Value::Bool(true)
    );
    assert_eq!(
        eval("(match $$ \"(\\\\d+)-(\\\\d+)\")", Value::str("12-34")),
        Value::array(vec![Value::str("12-34"), Value::str("12"), Value::str("34")])
    );
}
