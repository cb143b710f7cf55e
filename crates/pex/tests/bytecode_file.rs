//! Persistence round-trips through the binary bytecode format.

use pex::{
    compile, parse_and_lower, prepare, read_bytecode, write_bytecode, BytecodeReadError, RejectEffects, Value,
};

#[test]
fn compiled_programs_round_trip_structurally() {
    let src = "fn: f (n) (if (<= n 1) 1 (* n (f (- n 1)))); \
               print: (f 3); \
               ($$ | (split \",\") | len)";
    let program = compile(&parse_and_lower(src).unwrap()).unwrap();
    let bytes = write_bytecode(&program);
    assert_eq!(read_bytecode(&bytes).unwrap(), program);
}

#[test]
fn reloaded_programs_run_identically() {
    let src = "let: f (fn (n) (* n n)); (+ (f $0) (f $1))";
    let program = compile(&parse_and_lower(src).unwrap()).unwrap();
    let reloaded = read_bytecode(&write_bytecode(&program)).unwrap();

    let input = Value::array(vec![Value::Num(3.0), Value::Num(4.0)]);
    let direct = pex::Executor::new(program)
        .unwrap()
        .run_with_handler(input.clone(), &mut RejectEffects)
        .unwrap();
    let roundtripped = pex::Executor::new(reloaded)
        .unwrap()
        .run_with_handler(input, &mut RejectEffects)
        .unwrap();
    assert_eq!(direct, roundtripped);
    assert_eq!(direct, Value::Num(25.0));
}

#[test]
fn recompiling_the_same_source_matches_the_stored_image() {
    let src = "$$ | trim | upper";
    let first = compile(&parse_and_lower(src).unwrap()).unwrap();
    let bytes = write_bytecode(&first);
    let second = compile(&parse_and_lower(src).unwrap()).unwrap();
    assert_eq!(read_bytecode(&bytes).unwrap(), second);
}

#[test]
fn artifact_serde_round_trip() {
    // The artifact types derive serde for hosts with their own storage.
    let program = compile(&parse_and_lower("let: x 2; (* x $$)").unwrap()).unwrap();
    let json = serde_json::to_string(&program).unwrap();
    let back: pex::Program = serde_json::from_str(&json).unwrap();
    assert_eq!(back, program);
}

#[test]
fn truncated_images_are_rejected() {
    let program = compile(&parse_and_lower("42").unwrap()).unwrap();
    let bytes = write_bytecode(&program);
    assert_eq!(
        read_bytecode(&bytes[..bytes.len() - 1]).unwrap_err(),
        BytecodeReadError::Truncated
    );
    assert_eq!(read_bytecode(&[]).unwrap_err(), BytecodeReadError::Truncated);
}

#[test]
fn regex_constants_survive_persistence() {
    // Build IR with a regex literal directly; the surface syntax has no
    // regex literals, but the pool and file format carry them.
    let ir = pex::Ir::Call {
        func: Box::new(pex::Ir::var("test")),
        args: vec![
            pex::Ir::var("input"),
            pex::Ir::Const(pex::Literal::Regex {
                pattern: "^a+$".into(),
                flags: "i".into(),
            }),
        ],
    };
    let program = compile(&ir).unwrap();
    let reloaded = read_bytecode(&write_bytecode(&program)).unwrap();
    let result = pex::Executor::new(reloaded)
        .unwrap()
        .run_with_handler(Value::str("AAA"), &mut RejectEffects)
        .unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn invalid_regex_fails_at_load_not_at_run() {
    let ir = pex::Ir::Const(pex::Literal::Regex {
        pattern: "(".into(),
        flags: String::new(),
    });
    let program = compile(&ir).unwrap();
    let err = pex::Executor::new(program).unwrap_err();
    assert!(matches!(err, pex::RunError::InvalidRegex { .. }));
}

#[test]
fn cli_style_flow_from_bytes() {
    // What the CLI does with --emit-bytecode / --from-bytecode, minus the
    // filesystem.
    let program = compile(&parse_and_lower("(+ $$ 1)").unwrap()).unwrap();
    let bytes = write_bytecode(&program);
    let executor = pex::Executor::new(read_bytecode(&bytes).unwrap()).unwrap();
    assert_eq!(
        executor
            .run_with_handler(Value::Num(41.0), &mut RejectEffects)
            .unwrap(),
        Value::Num(42.0)
    );
    // A second run from the same reloaded program still works.
    assert_eq!(
        executor
            .run_with_handler(Value::Num(0.0), &mut RejectEffects)
            .unwrap(),
        Value::Num(1.0)
    );
}

#[test]
fn prepare_and_reload_agree_on_effects() {
    let src = "print: \"hi\"; 1";
    let program = compile(&parse_and_lower(src).unwrap()).unwrap();
    let reloaded = read_bytecode(&write_bytecode(&program)).unwrap();
    let mut recorder = pex::RecordingEffects::new();
    let result = pex::Executor::new(reloaded)
        .unwrap()
        .run_with_handler(Value::Null, &mut recorder)
        .unwrap();
    assert_eq!(result, Value::Num(1.0));
    assert_eq!(recorder.names(), vec!["print"]);
    // And prepare() on the same source behaves the same.
    let mut recorder2 = pex::RecordingEffects::new();
    assert_eq!(
        prepare(src)
            .unwrap()
            .run_with_handler(Value::Null, &mut recorder2)
            .unwrap(),
        Value::Num(1.0)
    );
}
