//! Container builtins, most of which also accept strings (by character).

use super::{require, str_arg, BuiltinError, BuiltinResult};
use crate::value::Value;

pub(super) fn len(args: &[Value]) -> BuiltinResult {
    require("len", args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Array(a) => a.borrow().len(),
        Value::Object(o) => o.borrow().len(),
        other => {
            return Err(BuiltinError::new(format!(
                "len expects a string, array or object, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Num(n as f64))
}

/// `(first x)` — first element/character, or null when empty.
pub(super) fn first(args: &[Value]) -> BuiltinResult {
    require("first", args, 1)?;
    match &args[0] {
        Value::Array(a) => Ok(a.borrow().first().cloned().unwrap_or(Value::Null)),
        Value::Str(s) => Ok(s
            .chars()
            .next()
            .map_or(Value::Null, |c| Value::str(c.to_string()))),
        other => Err(type_error("first", other)),
    }
}

/// `(last x)` — last element/character, or null when empty.
pub(super) fn last(args: &[Value]) -> BuiltinResult {
    require("last", args, 1)?;
    match &args[0] {
        Value::Array(a) => Ok(a.borrow().last().cloned().unwrap_or(Value::Null)),
        Value::Str(s) => Ok(s
            .chars()
            .next_back()
            .map_or(Value::Null, |c| Value::str(c.to_string()))),
        other => Err(type_error("last", other)),
    }
}

/// `(contains x needle)` — substring test for strings, deep-equality
/// membership for arrays.
pub(super) fn contains(args: &[Value]) -> BuiltinResult {
    require("contains", args, 2)?;
    match &args[0] {
        Value::Str(s) => {
            let needle = str_arg("contains", args, 1)?;
            Ok(Value::Bool(s.contains(needle)))
        }
        Value::Array(a) => Ok(Value::Bool(a.borrow().iter().any(|v| v.deep_eq(&args[1])))),
        other => Err(type_error("contains", other)),
    }
}

/// `(slice x start [end])` — subrange of an array or string (by character).
/// Negative indices count from the end; bounds clamp.
pub(super) fn slice(args: &[Value]) -> BuiltinResult {
    if args.len() != 2 && args.len() != 3 {
        return Err(BuiltinError::new(format!(
            "slice expects 2 or 3 arguments, got {}",
            args.len()
        )));
    }
    let start = index_arg("slice", args, 1)?;
    let end = if args.len() == 3 {
        Some(index_arg("slice", args, 2)?)
    } else {
        None
    };
    match &args[0] {
        Value::Array(a) => {
            let a = a.borrow();
            let (lo, hi) = resolve_range(a.len(), start, end);
            Ok(Value::array(a[lo..hi].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = resolve_range(chars.len(), start, end);
            Ok(Value::str(chars[lo..hi].iter().collect::<String>()))
        }
        other => Err(type_error("slice", other)),
    }
}

/// `(concat a b …)` — concatenation; all strings or all arrays, decided by
/// the first argument.
pub(super) fn concat(args: &[Value]) -> BuiltinResult {
    let Some(head) = args.first() else {
        return Err(BuiltinError::new("concat expects at least 1 argument"));
    };
    match head {
        Value::Str(_) => {
            let mut out = String::new();
            for (i, v) in args.iter().enumerate() {
                let Value::Str(s) = v else {
                    return Err(BuiltinError::new(format!(
                        "concat argument {i} is {}, expected string",
                        v.type_name()
                    )));
                };
                out.push_str(s);
            }
            Ok(Value::str(out))
        }
        Value::Array(_) => {
            let mut out = Vec::new();
            for (i, v) in args.iter().enumerate() {
                let Value::Array(a) = v else {
                    return Err(BuiltinError::new(format!(
                        "concat argument {i} is {}, expected array",
                        v.type_name()
                    )));
                };
                out.extend(a.borrow().iter().cloned());
            }
            Ok(Value::array(out))
        }
        other => Err(type_error("concat", other)),
    }
}

/// `(reverse x)` — a reversed copy of an array or string.
pub(super) fn reverse(args: &[Value]) -> BuiltinResult {
    require("reverse", args, 1)?;
    match &args[0] {
        Value::Array(a) => {
            let mut v: Vec<Value> = a.borrow().clone();
            v.reverse();
            Ok(Value::array(v))
        }
        Value::Str(s) => Ok(Value::str(s.chars().rev().collect::<String>())),
        other => Err(type_error("reverse", other)),
    }
}

/// `(keys x)` — object keys (sorted, so output is deterministic) or array
/// indices.
pub(super) fn keys(args: &[Value]) -> BuiltinResult {
    require("keys", args, 1)?;
    match &args[0] {
        Value::Object(o) => {
            let mut ks: Vec<String> = o.borrow().keys().cloned().collect();
            ks.sort_unstable();
            Ok(Value::array(ks.into_iter().map(Value::str).collect()))
        }
        Value::Array(a) => {
            let n = a.borrow().len();
            Ok(Value::array((0..n).map(|i| Value::Num(i as f64)).collect()))
        }
        other => Err(type_error("keys", other)),
    }
}

fn type_error(name: &str, value: &Value) -> BuiltinError {
    BuiltinError::new(format!(
        "{name} expects a string or array, got {}",
        value.type_name()
    ))
}

fn index_arg(name: &str, args: &[Value], index: usize) -> Result<i64, BuiltinError> {
    match &args[index] {
        Value::Num(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as i64),
        other => Err(BuiltinError::new(format!(
            "{name} index must be an integer, got {}",
            other.type_name()
        ))),
    }
}

/// Clamps `[start, end)` into `0..len`, resolving negative indices from the
/// end. An inverted range collapses to empty.
fn resolve_range(len: usize, start: i64, end: Option<i64>) -> (usize, usize) {
    let resolve = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let lo = resolve(start);
    let hi = end.map_or(len, resolve).max(lo);
    (lo, hi.min(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(values: &[f64]) -> Value {
        Value::array(values.iter().map(|&n| Value::Num(n)).collect())
    }

    #[test]
    fn len_variants() {
        assert_eq!(len(&[Value::str("héllo")]).unwrap(), Value::Num(5.0));
        assert_eq!(len(&[arr(&[1.0, 2.0])]).unwrap(), Value::Num(2.0));
        assert!(len(&[Value::Num(3.0)]).is_err());
    }

    #[test]
    fn first_last_and_empties() {
        assert_eq!(first(&[arr(&[7.0, 8.0])]).unwrap(), Value::Num(7.0));
        assert_eq!(last(&[arr(&[7.0, 8.0])]).unwrap(), Value::Num(8.0));
        assert_eq!(first(&[arr(&[])]).unwrap(), Value::Null);
        assert_eq!(last(&[Value::str("")]).unwrap(), Value::Null);
        assert_eq!(first(&[Value::str("ab")]).unwrap(), Value::str("a"));
    }

    #[test]
    fn contains_membership() {
        assert_eq!(
            contains(&[Value::str("hello"), Value::str("ell")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            contains(&[arr(&[1.0, 2.0]), Value::Num(2.0)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            contains(&[arr(&[1.0, 2.0]), Value::Num(3.0)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn slice_clamps_and_negates() {
        assert_eq!(
            slice(&[arr(&[1.0, 2.0, 3.0, 4.0]), Value::Num(1.0), Value::Num(3.0)]).unwrap(),
            arr(&[2.0, 3.0])
        );
        assert_eq!(
            slice(&[Value::str("hello"), Value::Num(-2.0)]).unwrap(),
            Value::str("lo")
        );
        assert_eq!(
            slice(&[arr(&[1.0]), Value::Num(5.0), Value::Num(9.0)]).unwrap(),
            arr(&[])
        );
        assert_eq!(
            slice(&[arr(&[1.0, 2.0]), Value::Num(1.0), Value::Num(0.0)]).unwrap(),
            arr(&[])
        );
    }

    #[test]
    fn concat_same_kind_only() {
        assert_eq!(
            concat(&[Value::str("a"), Value::str("b")]).unwrap(),
            Value::str("ab")
        );
        assert_eq!(concat(&[arr(&[1.0]), arr(&[2.0])]).unwrap(), arr(&[1.0, 2.0]));
        assert!(concat(&[Value::str("a"), arr(&[1.0])]).is_err());
        assert!(concat(&[]).is_err());
    }

    #[test]
    fn reverse_copies() {
        let original = arr(&[1.0, 2.0]);
        assert_eq!(reverse(&[original.clone()]).unwrap(), arr(&[2.0, 1.0]));
        // The input is untouched.
        assert_eq!(original, arr(&[1.0, 2.0]));
        assert_eq!(reverse(&[Value::str("ab")]).unwrap(), Value::str("ba"));
    }

    #[test]
    fn keys_are_sorted() {
        let mut map = ahash::AHashMap::new();
        map.insert("b".to_owned(), Value::Num(1.0));
        map.insert("a".to_owned(), Value::Num(2.0));
        assert_eq!(
            keys(&[Value::object(map)]).unwrap(),
            Value::array(vec![Value::str("a"), Value::str("b")])
        );
        assert_eq!(keys(&[arr(&[9.0, 9.0])]).unwrap(), arr(&[0.0, 1.0]));
    }
}
