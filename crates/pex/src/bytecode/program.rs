//! The compiled bytecode artifact.
//!
//! A [`Program`] is the output of the code generator and the input to the
//! VM: a deduplicated constant pool, a deduplicated name table (identifiers
//! used by `CALL_BUILTIN` and `EFFECT`, plus function names), the function
//! templates, and one flat code section all templates index into. Everything
//! here is immutable after codegen and safe to share read-only between VM
//! instances.

use ahash::AHashMap;

/// A constant-pool entry.
///
/// Integer-valued number literals that fit in an int32 are stored as `Int`;
/// the VM widens them to f64 on load.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Null,
    True,
    False,
    Int(i32),
    Float(f64),
    Str(String),
    Regex { pattern: String, flags: String },
}

impl Constant {
    /// Canonical serialization used as the deduplication key: two literals
    /// with equal keys share one pool slot.
    #[must_use]
    pub(crate) fn canonical_key(&self) -> String {
        match self {
            Self::Null => "n".to_owned(),
            Self::True => "t".to_owned(),
            Self::False => "f".to_owned(),
            Self::Int(v) => format!("i:{v}"),
            // Bit pattern, so 0.0/-0.0 and NaN payloads key distinctly.
            Self::Float(v) => format!("d:{:016x}", v.to_bits()),
            Self::Str(s) => format!("s:{s}"),
            Self::Regex { pattern, flags } => format!("r:{}:{pattern}:{flags}", pattern.len()),
        }
    }
}

/// How a closure obtains one captured variable at `MAKE_CLOSURE` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpvalueSpec {
    /// `true`: capture local slot `index` of the immediate parent frame.
    /// `false`: forward the parent closure's upvalue `index`.
    pub is_local: bool,
    pub index: u32,
}

/// Compile-time metadata for one function; closures instantiate a template
/// with captured upvalues.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionTemplate {
    /// Name-table index, or -1 for an anonymous function.
    pub name_index: i32,
    pub param_count: u32,
    /// Total local slots, including parameters. The callee null-pads slots
    /// `param_count..local_count` on entry.
    pub local_count: u32,
    pub upvalues: Vec<UpvalueSpec>,
    /// This template's bytecode lives at
    /// `code[code_offset..code_offset + code_length]`.
    pub code_offset: u32,
    pub code_length: u32,
}

/// A complete compiled program. The entry point is template
/// [`Program::entry`] (always 0 for compiler output), which takes the
/// program input as its single argument.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub templates: Vec<FunctionTemplate>,
    pub code: Vec<u8>,
    pub entry: u32,
}

/// Interning pool for constants: first use assigns a slot, later equal
/// literals (by canonical key) reuse it.
#[derive(Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<Constant>,
    index: AHashMap<String, u32>,
}

impl ConstantPool {
    pub(crate) fn intern(&mut self, constant: Constant) -> u32 {
        let key = constant.canonical_key();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(constant);
        self.index.insert(key, idx);
        idx
    }

    pub(crate) fn into_vec(self) -> Vec<Constant> {
        self.entries
    }
}

/// Interning pool for identifier strings, same contract as the constant
/// pool.
#[derive(Debug, Default)]
pub(crate) struct NameTable {
    entries: Vec<String>,
    index: AHashMap<String, u32>,
}

impl NameTable {
    pub(crate) fn intern(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(name.to_owned());
        self.index.insert(name.to_owned(), idx);
        idx
    }

    pub(crate) fn into_vec(self) -> Vec<String> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_dedup_by_canonical_key() {
        let mut pool = ConstantPool::default();
        let a = pool.intern(Constant::Int(42));
        let b = pool.intern(Constant::Str("42".into()));
        let c = pool.intern(Constant::Int(42));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.into_vec().len(), 2);
    }

    #[test]
    fn float_and_int_do_not_collide() {
        let mut pool = ConstantPool::default();
        let a = pool.intern(Constant::Int(1));
        let b = pool.intern(Constant::Float(1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn names_dedup() {
        let mut names = NameTable::default();
        assert_eq!(names.intern("split"), 0);
        assert_eq!(names.intern("len"), 1);
        assert_eq!(names.intern("split"), 0);
        assert_eq!(names.into_vec(), vec!["split".to_owned(), "len".to_owned()]);
    }
}
