//! The lowered expression tree consumed by the code generator.
//!
//! Eight variants, no surface syntax left: pipelines, `and`/`or`, `$`
//! references and keyword forms have all been desugared by the lowerer.
//! External callers may also build this tree directly and hand it to
//! [`crate::compile`].

use ahash::AHashSet;

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Numbers are 64-bit floats; integer-valued literals that fit in an
    /// int32 are stored compactly in the constant pool.
    Num(f64),
    Str(String),
    Regex { pattern: String, flags: String },
}

/// A lowered PEX expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ir {
    Const(Literal),
    /// Reference to a lexically bound name (or a builtin, resolved at
    /// codegen).
    Var(String),
    If {
        cond: Box<Ir>,
        then: Box<Ir>,
        orelse: Box<Ir>,
    },
    /// Introduce `name` bound to `value` inside `body`; the binding stays
    /// live for the remainder of the enclosing sequence (codegen allocates a
    /// function-scoped slot).
    Let {
        name: String,
        value: Box<Ir>,
        body: Box<Ir>,
    },
    /// Evaluate in order, keeping only the last value. Empty evaluates to
    /// null.
    Seq(Vec<Ir>),
    Call {
        func: Box<Ir>,
        args: Vec<Ir>,
    },
    /// Function literal. `captures` lists the free variables of `body` that
    /// resolve in an enclosing scope, sorted, so codegen assigns
    /// deterministic upvalue indices.
    Fn {
        params: Vec<String>,
        body: Box<Ir>,
        captures: Vec<String>,
    },
    /// Perform a named effect; evaluates to whatever the handler resumes
    /// with.
    Effect {
        name: String,
        args: Vec<Ir>,
    },
}

impl Ir {
    /// Convenience constructor for a variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Convenience constructor for a number constant.
    #[must_use]
    pub fn num(n: f64) -> Self {
        Self::Const(Literal::Num(n))
    }
}

/// Collects the free variables of `expr`: names referenced but not bound by
/// an enclosing `Let`, `Fn` parameter list, or earlier `Let` sibling in the
/// same `Seq`. The result is sorted and deduplicated.
///
/// Builtin names are *not* excluded here; intersect with a scope set to get
/// capture lists (the lowerer does exactly that).
#[must_use]
pub fn free_vars(expr: &Ir) -> Vec<String> {
    let mut bound = AHashSet::new();
    let mut free = AHashSet::new();
    walk(expr, &mut bound, &mut free);
    let mut out: Vec<String> = free.into_iter().collect();
    out.sort_unstable();
    out
}

fn walk(expr: &Ir, bound: &mut AHashSet<String>, free: &mut AHashSet<String>) {
    match expr {
        Ir::Const(_) => {}
        Ir::Var(name) => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        Ir::If { cond, then, orelse } => {
            walk(cond, bound, free);
            walk(then, bound, free);
            walk(orelse, bound, free);
        }
        Ir::Let { name, value, body } => {
            walk(value, bound, free);
            let fresh = bound.insert(name.clone());
            walk(body, bound, free);
            if fresh {
                bound.remove(name);
            }
        }
        Ir::Seq(exprs) => {
            // A Let directly in a Seq keeps its binding live for the
            // remaining siblings, matching the function-scoped slots the
            // code generator allocates.
            let mut introduced: Vec<String> = Vec::new();
            for e in exprs {
                walk(e, bound, free);
                if let Ir::Let { name, .. } = e {
                    if bound.insert(name.clone()) {
                        introduced.push(name.clone());
                    }
                }
            }
            for name in introduced {
                bound.remove(&name);
            }
        }
        Ir::Call { func, args } => {
            walk(func, bound, free);
            for a in args {
                walk(a, bound, free);
            }
        }
        Ir::Fn { params, body, .. } => {
            let mut fresh: Vec<&String> = Vec::new();
            for p in params {
                if bound.insert(p.clone()) {
                    fresh.push(p);
                }
            }
            walk(body, bound, free);
            for p in fresh {
                bound.remove(p);
            }
        }
        Ir::Effect { args, .. } => {
            for a in args {
                walk(a, bound, free);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Ir>) -> Ir {
        Ir::Call {
            func: Box::new(Ir::var(name)),
            args,
        }
    }

    #[test]
    fn let_binds_its_body() {
        let e = Ir::Let {
            name: "x".into(),
            value: Box::new(Ir::var("y")),
            body: Box::new(call("+", vec![Ir::var("x"), Ir::var("z")])),
        };
        assert_eq!(free_vars(&e), vec!["+", "y", "z"]);
    }

    #[test]
    fn fn_params_are_bound() {
        let e = Ir::Fn {
            params: vec!["n".into()],
            body: Box::new(call("+", vec![Ir::var("n"), Ir::var("x")])),
            captures: vec![],
        };
        assert_eq!(free_vars(&e), vec!["+", "x"]);
    }

    #[test]
    fn seq_let_binds_later_siblings() {
        // let: f ...; (f 1) — the trailing call sees the binding.
        let e = Ir::Seq(vec![
            Ir::Let {
                name: "f".into(),
                value: Box::new(Ir::num(1.0)),
                body: Box::new(Ir::var("f")),
            },
            call("f", vec![Ir::num(1.0)]),
        ]);
        assert_eq!(free_vars(&e), Vec::<String>::new());
    }

    #[test]
    fn seq_bindings_do_not_leak_out() {
        let seq = Ir::Seq(vec![Ir::Let {
            name: "a".into(),
            value: Box::new(Ir::num(1.0)),
            body: Box::new(Ir::var("a")),
        }]);
        let e = Ir::Seq(vec![seq, Ir::var("a")]);
        assert_eq!(free_vars(&e), vec!["a"]);
    }
}
