//! Regex builtins. Patterns may be given as a regex value or as a pattern
//! string with optional flags (`i`, `m`, `s`, `x`).

use std::rc::Rc;

use super::{require, str_arg, BuiltinError, BuiltinResult};
use crate::value::{RegexValue, Value};

/// `(test s pattern [flags])` — whether the pattern matches anywhere.
pub(super) fn test(args: &[Value]) -> BuiltinResult {
    let (subject, regex) = subject_and_regex("test", args)?;
    Ok(Value::Bool(regex.regex.is_match(subject)))
}

/// `(match s pattern [flags])` — the first match as an array
/// `[full, group1, …]` (unmatched groups are null), or null when the
/// pattern does not match.
pub(super) fn match_(args: &[Value]) -> BuiltinResult {
    let (subject, regex) = subject_and_regex("match", args)?;
    let Some(captures) = regex.regex.captures(subject) else {
        return Ok(Value::Null);
    };
    let groups = captures
        .iter()
        .map(|group| group.map_or(Value::Null, |m| Value::str(m.as_str())))
        .collect();
    Ok(Value::array(groups))
}

/// Pulls the subject string and a compiled regex out of the argument list.
fn subject_and_regex<'a>(name: &str, args: &'a [Value]) -> Result<(&'a str, Rc<RegexValue>), BuiltinError> {
    match args.get(1) {
        Some(Value::Regex(r)) => {
            require(name, args, 2)?;
            Ok((str_arg(name, args, 0)?, Rc::clone(r)))
        }
        Some(Value::Str(pattern)) => {
            if args.len() != 2 && args.len() != 3 {
                return Err(BuiltinError::new(format!(
                    "{name} expects 2 or 3 arguments, got {}",
                    args.len()
                )));
            }
            let flags = if args.len() == 3 {
                str_arg(name, args, 2)?
            } else {
                ""
            };
            let regex = RegexValue::new(pattern, flags).map_err(BuiltinError::new)?;
            Ok((str_arg(name, args, 0)?, Rc::new(regex)))
        }
        Some(other) => Err(BuiltinError::new(format!(
            "{name} pattern must be a string or regex, got {}",
            other.type_name()
        ))),
        None => Err(BuiltinError::new(format!("{name} is missing its pattern argument"))),
    }
}
