//! Runtime value representation.
//!
//! PEX values form a small closed sum: immediates (null, booleans, numbers)
//! are stored inline, while strings, arrays, objects, regexes, closures and
//! continuations are reference-counted. Arrays and objects are internally
//! mutable and *shared by reference*: cloning a `Value` clones the handle,
//! not the data. Continuation capture relies on this — a captured stack holds
//! the same array/object handles the live program sees.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::vm::Continuation;

/// A PEX runtime value.
///
/// `Clone` is cheap: heap-backed variants clone an `Rc` handle.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// All numbers are 64-bit floats at runtime; the constant pool stores
    /// integer-valued literals as int32 but they widen on load.
    Num(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<AHashMap<String, Value>>>),
    Regex(Rc<RegexValue>),
    Closure(Rc<Closure>),
    /// A reified suspended execution. The VM never pushes these itself; hosts
    /// may inject one (e.g. through a builtin override) to pass a paused
    /// program through PEX data.
    Continuation(Rc<RefCell<Continuation>>),
}

impl Value {
    /// Builds a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Builds an array value from owned elements.
    #[must_use]
    pub fn array(elements: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(elements)))
    }

    /// Builds an object value from owned entries.
    #[must_use]
    pub fn object(entries: AHashMap<String, Value>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries)))
    }

    /// The type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Regex(_) => "regex",
            Self::Closure(_) => "function",
            Self::Continuation(_) => "continuation",
        }
    }

    /// Truthiness: null, false, zero, NaN and the empty string are falsy;
    /// everything else (including empty arrays and objects) is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion: booleans map to 0/1, strings parse (NaN on
    /// failure), null is 0, everything else is NaN.
    #[must_use]
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Num(n) => *n,
            Self::Str(s) => s.parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Deep structural equality without coercion.
    ///
    /// Values of differing types are never equal. Numbers follow IEEE
    /// semantics (NaN is not equal to itself). Closures and continuations
    /// compare by identity; regexes by pattern and flags.
    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Num(a), Self::Num(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.deep_eq(w)))
            }
            (Self::Regex(a), Self::Regex(b)) => a.pattern == b.pattern && a.flags == b.flags,
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Continuation(a), Self::Continuation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Rendering used by the `str` builtin and the CLI `print` effect:
    /// strings appear bare, everything else as its repr.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Num(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::array(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => fmt_number(f, *n),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Object(o) => {
                // Sort keys so the repr is stable across runs.
                let o = o.borrow();
                let mut keys: Vec<&String> = o.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, k) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {}", o[k])?;
                }
                f.write_str("}")
            }
            Self::Regex(r) => write!(f, "/{}/{}", r.pattern, r.flags),
            Self::Closure(_) => f.write_str("<function>"),
            Self::Continuation(_) => f.write_str("<continuation>"),
        }
    }
}

/// Writes a number the way PEX renders it: integral values without a
/// fractional part, everything else via the shortest float form.
fn fmt_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

/// A compiled regex literal: source pattern plus flags plus the compiled
/// matcher.
#[derive(Debug)]
pub struct RegexValue {
    pub pattern: String,
    pub flags: String,
    pub regex: regex::Regex,
}

impl RegexValue {
    /// Compiles `pattern` with the given flag string.
    ///
    /// Supported flags: `i` (case-insensitive), `m` (multi-line),
    /// `s` (dot matches newline), `x` (ignore whitespace). An unknown flag
    /// or an invalid pattern is an error.
    pub fn new(pattern: &str, flags: &str) -> Result<Self, String> {
        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => return Err(format!("unknown regex flag '{other}'")),
            };
        }
        let regex = builder.build().map_err(|e| e.to_string())?;
        Ok(Self {
            pattern: pattern.to_owned(),
            flags: flags.to_owned(),
            regex,
        })
    }
}

/// A function value: a template index into the program plus the captured
/// upvalues, in template spec order.
#[derive(Debug)]
pub struct Closure {
    pub template: usize,
    pub upvalues: Vec<UpvalueRef>,
}

impl Closure {
    pub(crate) fn new(template: usize, upvalues: Vec<UpvalueRef>) -> Self {
        Self { template, upvalues }
    }
}

/// Shared handle to an upvalue. Sibling closures capturing the same stack
/// slot hold the *same* handle, so a write through one is visible through
/// the other and the close-on-return transition affects both.
pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// A captured variable.
///
/// Open upvalues point at a live operand-stack slot (by absolute index);
/// they are closed — snapshotted into an owned value — when the frame that
/// owns the slot returns.
#[derive(Debug)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Num(0.0).is_truthy());
        assert!(!Value::Num(f64::NAN).is_truthy());
        assert!(!Value::str("").is_truthy());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Num(-1.5).is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(Value::object(AHashMap::new()).is_truthy());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Null.as_number(), 0.0);
        assert_eq!(Value::Bool(true).as_number(), 1.0);
        assert_eq!(Value::str("2.5").as_number(), 2.5);
        assert!(Value::str("nope").as_number().is_nan());
        assert!(Value::str("").as_number().is_nan());
        assert!(Value::array(vec![]).as_number().is_nan());
    }

    #[test]
    fn deep_equality() {
        let a = Value::array(vec![Value::Num(1.0), Value::str("x")]);
        let b = Value::array(vec![Value::Num(1.0), Value::str("x")]);
        assert!(a.deep_eq(&b));

        let c = Value::array(vec![Value::Num(2.0)]);
        assert!(!a.deep_eq(&c));

        // Differing types are never equal, even when coercion would match.
        assert!(!Value::Num(1.0).deep_eq(&Value::Bool(true)));
        assert!(!Value::Num(0.0).deep_eq(&Value::Null));

        // NaN is not equal to itself.
        assert!(!Value::Num(f64::NAN).deep_eq(&Value::Num(f64::NAN)));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Num(42.0).to_string(), "42");
        assert_eq!(Value::Num(2.5).to_string(), "2.5");
        assert_eq!(Value::str("hi").to_string(), "\"hi\"");
        assert_eq!(Value::str("hi").display_string(), "hi");
        assert_eq!(
            Value::array(vec![Value::Null, Value::Bool(true)]).to_string(),
            "[null, true]"
        );
    }

    #[test]
    fn regex_flags() {
        let re = RegexValue::new("^a+$", "i").unwrap();
        assert!(re.regex.is_match("AAA"));
        assert!(RegexValue::new("a", "q").is_err());
        assert!(RegexValue::new("(", "").is_err());
    }
}
