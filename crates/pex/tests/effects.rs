//! Effects, continuations, and the suspension state machine.

use pex::{
    handler_fn, prepare, EffectOutcome, NullEffects, RecordingEffects, RejectEffects, RunError, RunProgress,
    Value,
};

#[test]
fn effect_resumes_with_the_handler_value() {
    let mut handler = RecordingEffects::with_replies([Value::Num(41.0)]);
    let result = prepare("let: x (ask:); (+ x 1)")
        .unwrap()
        .run_with_handler(Value::Null, &mut handler)
        .unwrap();
    assert_eq!(result, Value::Num(42.0));
    assert_eq!(handler.names(), vec!["ask"]);
}

#[test]
fn effect_arguments_are_evaluated_in_source_order() {
    let mut handler = RecordingEffects::new();
    prepare("emit: 1 (+ 1 1) \"three\"")
        .unwrap()
        .run_with_handler(Value::Null, &mut handler)
        .unwrap();
    assert_eq!(
        handler.calls[0].1,
        vec![Value::Num(1.0), Value::Num(2.0), Value::str("three")]
    );
}

#[test]
fn default_posture_rejects_effects() {
    let err = prepare("launch: 1")
        .unwrap()
        .run_with_handler(Value::Null, &mut RejectEffects)
        .unwrap_err();
    assert_eq!(err, RunError::UnhandledEffect("launch".into()));
}

#[test]
fn null_effects_resume_with_null() {
    let result = prepare("print: \"x\"; 7")
        .unwrap()
        .run_with_handler(Value::Null, &mut NullEffects)
        .unwrap();
    assert_eq!(result, Value::Num(7.0));
}

#[test]
fn state_machine_walks_each_suspension() {
    let executor = prepare("(+ (ask:) (ask:))").unwrap();
    let progress = executor.run(Value::Null).unwrap();

    let RunProgress::Effect(mut first) = progress else {
        panic!("expected a suspension");
    };
    assert_eq!(first.name, "ask");
    assert!(first.args.is_empty());
    assert!(!first.continuation.is_resumed());

    let RunProgress::Effect(mut second) = first.continuation.resume(Value::Num(40.0)).unwrap() else {
        panic!("expected a second suspension");
    };
    assert!(first.continuation.is_resumed());

    let RunProgress::Complete(result) = second.continuation.resume(Value::Num(2.0)).unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(result, Value::Num(42.0));
}

#[test]
fn continuations_are_one_shot() {
    let executor = prepare("(ask:)").unwrap();
    let RunProgress::Effect(mut call) = executor.run(Value::Null).unwrap() else {
        panic!("expected a suspension");
    };
    call.continuation.resume(Value::Num(1.0)).unwrap();
    assert!(call.continuation.is_resumed());
    assert_eq!(
        call.continuation.resume(Value::Num(2.0)).unwrap_err(),
        RunError::ContinuationConsumed
    );
}

#[test]
fn dropping_a_continuation_abandons_the_program() {
    let executor = prepare("(ask:); 99").unwrap();
    let progress = executor.run(Value::Null).unwrap();
    // Dropping the suspension is a legitimate host choice; nothing panics
    // and the executor stays usable.
    drop(progress);
    assert!(executor.run(Value::Null).is_ok());
}

#[test]
fn values_stay_shared_across_suspension() {
    // The handler mutates the array it received; the resumed program reads
    // the same array through its own binding.
    let executor = prepare("let: a (array 1); (poke: a); (len a)").unwrap();
    let mut handler = handler_fn(|name, args: Vec<Value>| {
        assert_eq!(name, "poke");
        let Value::Array(items) = &args[0] else {
            panic!("expected array argument");
        };
        items.borrow_mut().push(Value::Num(2.0));
        items.borrow_mut().push(Value::Num(3.0));
        EffectOutcome::Resume(Value::Null)
    });
    let result = executor.run_with_handler(Value::Null, &mut handler).unwrap();
    assert_eq!(result, Value::Num(3.0));
}

#[test]
fn handler_may_run_another_executor() {
    // Answer each `double` effect by running a second PEX program.
    let doubler = prepare("(* $$ 2)").unwrap();
    let outer = prepare("(+ (double: 20) (double: 0))").unwrap();
    let mut handler = handler_fn(move |name, mut args: Vec<Value>| {
        assert_eq!(name, "double");
        let input = args.pop().unwrap_or(Value::Null);
        let result = doubler
            .run_with_handler(input, &mut RejectEffects)
            .expect("inner program is effect-free");
        EffectOutcome::Resume(result)
    });
    let result = outer.run_with_handler(Value::Num(1.0), &mut handler).unwrap();
    assert_eq!(result, Value::Num(40.0));
}

#[test]
fn effect_inside_a_function_suspends_the_whole_stack() {
    let src = "fn: confirm (msg) (if (ask: msg) \"yes\" \"no\"); (confirm \"ok?\")";
    let mut handler = RecordingEffects::with_replies([Value::Bool(true)]);
    let result = prepare(src)
        .unwrap()
        .run_with_handler(Value::Null, &mut handler)
        .unwrap();
    assert_eq!(result, Value::str("yes"));
    assert_eq!(handler.calls[0].1, vec![Value::str("ok?")]);
}

#[test]
fn effect_value_feeds_pipelines() {
    let mut handler = RecordingEffects::with_replies([Value::str("  Mixed Case  ")]);
    let result = prepare("(read:) | trim | lower")
        .unwrap()
        .run_with_handler(Value::Null, &mut handler)
        .unwrap();
    assert_eq!(result, Value::str("mixed case"));
}

#[test]
fn two_runs_of_one_executor_are_independent() {
    let executor = prepare("(ask:)").unwrap();
    let RunProgress::Effect(mut a) = executor.run(Value::Null).unwrap() else {
        panic!("expected suspension");
    };
    let RunProgress::Effect(mut b) = executor.run(Value::Null).unwrap() else {
        panic!("expected suspension");
    };
    // Resuming one does not disturb the other.
    let ra = a.continuation.resume(Value::Num(1.0)).unwrap();
    let rb = b.continuation.resume(Value::Num(2.0)).unwrap();
    assert_eq!(ra.into_complete().unwrap(), Value::Num(1.0));
    assert_eq!(rb.into_complete().unwrap(), Value::Num(2.0));
}
