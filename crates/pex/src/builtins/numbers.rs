//! Numeric builtins. All of them coerce their arguments the same way the
//! arithmetic opcodes do.

use super::{require, BuiltinError, BuiltinResult};
use crate::value::Value;

/// `(num x)` — the coercion the VM applies to arithmetic operands, exposed
/// directly.
pub(super) fn num(args: &[Value]) -> BuiltinResult {
    require("num", args, 1)?;
    Ok(Value::Num(args[0].as_number()))
}

/// `(int x)` — coerce, then truncate toward zero.
pub(super) fn int(args: &[Value]) -> BuiltinResult {
    require("int", args, 1)?;
    Ok(Value::Num(args[0].as_number().trunc()))
}

pub(super) fn abs(args: &[Value]) -> BuiltinResult {
    require("abs", args, 1)?;
    Ok(Value::Num(args[0].as_number().abs()))
}

pub(super) fn floor(args: &[Value]) -> BuiltinResult {
    require("floor", args, 1)?;
    Ok(Value::Num(args[0].as_number().floor()))
}

pub(super) fn ceil(args: &[Value]) -> BuiltinResult {
    require("ceil", args, 1)?;
    Ok(Value::Num(args[0].as_number().ceil()))
}

/// `(round x)` — round half away from zero.
pub(super) fn round(args: &[Value]) -> BuiltinResult {
    require("round", args, 1)?;
    Ok(Value::Num(args[0].as_number().round()))
}

pub(super) fn min(args: &[Value]) -> BuiltinResult {
    fold("min", args, f64::min)
}

pub(super) fn max(args: &[Value]) -> BuiltinResult {
    fold("max", args, f64::max)
}

fn fold(name: &str, args: &[Value], f: fn(f64, f64) -> f64) -> BuiltinResult {
    if args.is_empty() {
        return Err(BuiltinError::new(format!("{name} expects at least 1 argument")));
    }
    let mut acc = args[0].as_number();
    for v in &args[1..] {
        acc = f(acc, v.as_number());
    }
    Ok(Value::Num(acc))
}
