//! The builtin standard library and its registry.
//!
//! A builtin is a pure function from an argument slice to one value. The
//! registry is seeded from [`CATALOG`] and hosts may override or extend
//! entries per executor; the code generator recognises exactly the catalog
//! names (an overridden entry keeps its name). A builtin's own failure
//! surfaces as a runtime error carrying the builtin's message.

mod arrays;
mod numbers;
mod regex_fns;
mod strings;

use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use ahash::{AHashMap, AHashSet};

use crate::value::Value;

/// An error raised inside a builtin, e.g. `split` applied to a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinError {
    message: String,
}

impl BuiltinError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BuiltinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BuiltinError {}

pub type BuiltinResult = Result<Value, BuiltinError>;

/// Plain function pointer used for the standard catalog.
pub type NativeFn = fn(&[Value]) -> BuiltinResult;

/// Registered builtin implementation; hosts may install closures.
pub type BuiltinFn = Rc<dyn Fn(&[Value]) -> BuiltinResult>;

/// The standard catalog. Codegen treats exactly these names as builtins.
pub(crate) const CATALOG: &[(&str, NativeFn)] = &[
    // strings
    ("split", strings::split),
    ("join", strings::join),
    ("trim", strings::trim),
    ("upper", strings::upper),
    ("lower", strings::lower),
    ("replace", strings::replace),
    ("str", strings::str_),
    // strings and arrays
    ("len", arrays::len),
    ("first", arrays::first),
    ("last", arrays::last),
    ("contains", arrays::contains),
    ("slice", arrays::slice),
    ("concat", arrays::concat),
    ("reverse", arrays::reverse),
    ("keys", arrays::keys),
    // numbers
    ("num", numbers::num),
    ("int", numbers::int),
    ("abs", numbers::abs),
    ("floor", numbers::floor),
    ("ceil", numbers::ceil),
    ("round", numbers::round),
    ("min", numbers::min),
    ("max", numbers::max),
    // regex
    ("test", regex_fns::test),
    ("match", regex_fns::match_),
];

/// Whether `name` is part of the standard catalog (and therefore callable
/// from PEX source).
#[must_use]
pub fn is_standard(name: &str) -> bool {
    static NAMES: OnceLock<AHashSet<&'static str>> = OnceLock::new();
    NAMES
        .get_or_init(|| CATALOG.iter().map(|(name, _)| *name).collect())
        .contains(name)
}

/// Per-executor name → implementation map, seeded from the catalog.
#[derive(Clone)]
pub struct BuiltinTable {
    entries: AHashMap<String, BuiltinFn>,
}

impl BuiltinTable {
    /// The standard library.
    #[must_use]
    pub fn standard() -> Self {
        let mut entries: AHashMap<String, BuiltinFn> = AHashMap::with_capacity(CATALOG.len());
        for (name, f) in CATALOG {
            let f = *f;
            entries.insert((*name).to_owned(), Rc::new(move |args: &[Value]| f(args)));
        }
        Self { entries }
    }

    /// Installs or replaces an entry. Overriding a standard name changes
    /// behaviour at call sites; adding a non-standard name is only reachable
    /// from hand-built bytecode.
    pub fn set(&mut self, name: impl Into<String>, f: BuiltinFn) {
        self.entries.insert(name.into(), f);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&BuiltinFn> {
        self.entries.get(name)
    }
}

impl fmt::Debug for BuiltinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

// ---- shared argument helpers -------------------------------------------

pub(crate) fn require(name: &str, args: &[Value], count: usize) -> Result<(), BuiltinError> {
    if args.len() != count {
        return Err(BuiltinError::new(format!(
            "{name} expects {count} argument{}, got {}",
            if count == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, BuiltinError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(BuiltinError::new(format!(
            "{name} expects a string, got {}",
            other.type_name()
        ))),
        None => Err(BuiltinError::new(format!("{name} is missing argument {index}"))),
    }
}

pub(crate) fn array_arg(
    name: &str,
    args: &[Value],
    index: usize,
) -> Result<Rc<std::cell::RefCell<Vec<Value>>>, BuiltinError> {
    match args.get(index) {
        Some(Value::Array(a)) => Ok(Rc::clone(a)),
        Some(other) => Err(BuiltinError::new(format!(
            "{name} expects an array, got {}",
            other.type_name()
        ))),
        None => Err(BuiltinError::new(format!("{name} is missing argument {index}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_standard() {
        assert!(is_standard("split"));
        assert!(is_standard("match"));
        assert!(!is_standard("get")); // dedicated opcode, not a catalog entry
        assert!(!is_standard("+"));
        assert!(!is_standard("frobnicate"));
    }

    #[test]
    fn standard_table_resolves_catalog() {
        let table = BuiltinTable::standard();
        for (name, _) in CATALOG {
            assert!(table.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn overrides_replace_entries() {
        let mut table = BuiltinTable::standard();
        table.set("len", Rc::new(|_: &[Value]| Ok(Value::Num(99.0))));
        let f = table.get("len").unwrap();
        assert_eq!(f(&[Value::str("xx")]).unwrap(), Value::Num(99.0));
    }
}
