//! Command-line front-end for PEX.
//!
//! ```text
//! pex <file.pex> [-i <json>]
//! pex -e '<program>' [-i <json>]
//! pex --emit-bytecode <out.pexb> (<file.pex> | -e '<program>')
//! pex --from-bytecode <in.pexb> [-i <json>]
//! ```
//!
//! The input value defaults to null. The `print` effect writes its
//! arguments to stdout, `log` to stderr; any other effect aborts the run.
//! The result is printed to stdout as JSON.

use std::env;
use std::fs;
use std::process::ExitCode;

use pex::{handler_fn, EffectOutcome, Executor, Value};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match Options::parse(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

const USAGE: &str = "usage: pex <file.pex> [-i <json>]
       pex -e '<program>' [-i <json>]
       pex --emit-bytecode <out.pexb> (<file.pex> | -e '<program>')
       pex --from-bytecode <in.pexb> [-i <json>]";

#[derive(Debug, Default)]
struct Options {
    source_file: Option<String>,
    expression: Option<String>,
    input_json: Option<String>,
    emit_bytecode: Option<String>,
    from_bytecode: Option<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut options = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-e" | "--expr" => {
                    options.expression = Some(take_value(&mut iter, "-e")?);
                }
                "-i" | "--input" => {
                    options.input_json = Some(take_value(&mut iter, "-i")?);
                }
                "--emit-bytecode" => {
                    options.emit_bytecode = Some(take_value(&mut iter, "--emit-bytecode")?);
                }
                "--from-bytecode" => {
                    options.from_bytecode = Some(take_value(&mut iter, "--from-bytecode")?);
                }
                "-h" | "--help" => return Err("help requested".to_owned()),
                other if other.starts_with('-') => {
                    return Err(format!("unknown option '{other}'"));
                }
                file => {
                    if options.source_file.is_some() {
                        return Err("more than one program file given".to_owned());
                    }
                    options.source_file = Some(file.to_owned());
                }
            }
        }
        let sources = usize::from(options.source_file.is_some())
            + usize::from(options.expression.is_some())
            + usize::from(options.from_bytecode.is_some());
        if sources != 1 {
            return Err("exactly one of <file.pex>, -e, or --from-bytecode is required".to_owned());
        }
        if options.emit_bytecode.is_some() && options.from_bytecode.is_some() {
            return Err("--emit-bytecode cannot be combined with --from-bytecode".to_owned());
        }
        Ok(options)
    }
}

fn take_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("{flag} needs a value"))
}

fn run(options: Options) -> Result<(), String> {
    let program = if let Some(path) = &options.from_bytecode {
        let bytes = fs::read(path).map_err(|e| format!("reading {path}: {e}"))?;
        pex::read_bytecode(&bytes).map_err(|e| e.to_string())?
    } else {
        let source = match (&options.expression, &options.source_file) {
            (Some(expr), _) => expr.clone(),
            (None, Some(path)) => fs::read_to_string(path).map_err(|e| format!("reading {path}: {e}"))?,
            (None, None) => unreachable!("Options::parse requires a source"),
        };
        let ir = pex::parse_and_lower(&source).map_err(|e| e.to_string())?;
        pex::compile(&ir).map_err(|e| e.to_string())?
    };

    if let Some(path) = &options.emit_bytecode {
        let bytes = pex::write_bytecode(&program);
        fs::write(path, bytes).map_err(|e| format!("writing {path}: {e}"))?;
        return Ok(());
    }

    let input = match &options.input_json {
        Some(json) => {
            let parsed: serde_json::Value = serde_json::from_str(json).map_err(|e| format!("input JSON: {e}"))?;
            json_to_value(&parsed)
        }
        None => Value::Null,
    };

    let executor = Executor::new(program).map_err(|e| e.to_string())?;
    let result = executor
        .run_with_handler(input, &mut handler_fn(handle_effect))
        .map_err(|e| e.to_string())?;

    let rendered =
        serde_json::to_string_pretty(&value_to_json(&result)).map_err(|e| format!("rendering result: {e}"))?;
    println!("{rendered}");
    Ok(())
}

/// `print` goes to stdout, `log` to stderr; everything else aborts.
fn handle_effect(name: &str, args: Vec<Value>) -> EffectOutcome {
    match name {
        "print" => {
            let line = args.iter().map(Value::display_string).collect::<Vec<_>>().join(" ");
            println!("{line}");
            EffectOutcome::Resume(Value::Null)
        }
        "log" => {
            let line = args.iter().map(Value::display_string).collect::<Vec<_>>().join(" ");
            eprintln!("{line}");
            EffectOutcome::Resume(Value::Null)
        }
        _ => EffectOutcome::Abort,
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let entries = map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect();
            Value::object(entries)
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Num(n) => serde_json::Number::from_f64(*n)
            .map_or_else(|| serde_json::Value::String(n.to_string()), serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Array(items) => serde_json::Value::Array(items.borrow().iter().map(value_to_json).collect()),
        Value::Object(map) => {
            let map = map.borrow();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries = keys
                .into_iter()
                .map(|k| (k.clone(), value_to_json(&map[k])))
                .collect();
            serde_json::Value::Object(entries)
        }
        other => serde_json::Value::String(other.to_string()),
    }
}
