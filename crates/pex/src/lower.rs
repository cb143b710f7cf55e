//! Lowering: surface [`Form`] trees to the canonical [`Ir`].
//!
//! Everything syntactic disappears here: `$$`/`$N`/`$` references, pipeline
//! chains, `and`/`or` short-circuiting, and `let:`/`fn:` keyword forms all
//! desugar into the eight IR variants. The lowerer also computes each
//! function literal's capture set (free variables of the body that exist in
//! the enclosing scope) so codegen can assign deterministic upvalue indices.
//!
//! Top-level `let:`/`fn:` names are pre-scanned into scope before their
//! bodies lower, so forward references between sibling functions resolve;
//! the code generator completes the picture by pre-allocating their slots.

use std::fmt;

use ahash::AHashSet;

use crate::error::PexError;
use crate::ir::{free_vars, Ir, Literal};
use crate::parse::{parse, Form};

/// The parameter name the implicit top-level function binds its input to.
/// `$$` lowers to a reference to this name.
pub const INPUT_NAME: &str = "input";

/// A structural problem found while lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum LowerError {
    /// `()` has no meaning.
    EmptyList,
    /// `$` used with no enclosing pipeline stage.
    DollarOutsidePipeline,
    /// `if`/`and`/`or` with the wrong number of arguments.
    BadArity {
        form: &'static str,
        expected: usize,
        got: usize,
    },
    /// A malformed `let:`/`fn:` special form.
    Malformed {
        form: &'static str,
        message: String,
    },
}

impl LowerError {
    fn malformed(form: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            form,
            message: message.into(),
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyList => f.write_str("empty list"),
            Self::DollarOutsidePipeline => f.write_str("'$' used outside a pipeline stage"),
            Self::BadArity { form, expected, got } => {
                write!(f, "'{form}' expects {expected} arguments, got {got}")
            }
            Self::Malformed { form, message } => write!(f, "malformed '{form}:' form: {message}"),
        }
    }
}

impl std::error::Error for LowerError {}

/// Lowers parsed top-level statements into the implicit entry function:
/// `Fn(["input"], Seq(stmts), [])`.
pub fn lower(stmts: &[Form]) -> Result<Ir, LowerError> {
    let mut lowerer = Lowerer::default();
    let mut env = Env::new();
    let body = lowerer.lower_stmts(stmts, &mut env)?;
    Ok(Ir::Fn {
        params: vec![INPUT_NAME.to_owned()],
        body: Box::new(body),
        captures: vec![],
    })
}

/// Parses and lowers a source string in one step.
pub fn parse_and_lower(source: &str) -> Result<Ir, PexError> {
    let stmts = parse(source)?;
    Ok(lower(&stmts)?)
}

/// Lexical context threaded through lowering: one name set per function
/// scope, plus the stack of live pipeline temporaries (`$` resolves to the
/// innermost one).
struct Env {
    scopes: Vec<AHashSet<String>>,
    pipes: Vec<String>,
}

impl Env {
    fn new() -> Self {
        let mut top = AHashSet::new();
        top.insert(INPUT_NAME.to_owned());
        Self {
            scopes: vec![top],
            pipes: Vec::new(),
        }
    }

    fn declare(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_owned());
    }

    /// Every name visible at this point, across all enclosing scopes.
    fn visible(&self) -> AHashSet<String> {
        let mut all = AHashSet::new();
        for scope in &self.scopes {
            all.extend(scope.iter().cloned());
        }
        all
    }
}

#[derive(Default)]
struct Lowerer {
    next_pipe: usize,
}

impl Lowerer {
    /// Lowers a statement sequence. Pre-scans `let:`/`fn:` names so forward
    /// references (mutual recursion) resolve during capture analysis.
    fn lower_stmts(&mut self, stmts: &[Form], env: &mut Env) -> Result<Ir, LowerError> {
        for stmt in stmts {
            if let Form::Keyword { name, args } = stmt {
                if (name == "let" || name == "fn") && !args.is_empty() {
                    if let Form::Symbol(bound) = &args[0] {
                        env.declare(bound);
                    }
                }
            }
        }
        let lowered = stmts
            .iter()
            .map(|s| self.lower_form(s, env))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ir::Seq(lowered))
    }

    fn lower_form(&mut self, form: &Form, env: &mut Env) -> Result<Ir, LowerError> {
        match form {
            Form::Null => Ok(Ir::Const(Literal::Null)),
            Form::Bool(b) => Ok(Ir::Const(Literal::Bool(*b))),
            Form::Num(n) => Ok(Ir::Const(Literal::Num(*n))),
            Form::Str(s) => Ok(Ir::Const(Literal::Str(s.clone()))),
            Form::Symbol(s) => self.lower_symbol(s, env),
            Form::Keyword { name, args } => self.lower_keyword(name, args, env),
            Form::List(items) => self.lower_list(items, env),
            Form::Pipeline(stages) => self.lower_pipeline(stages, env),
        }
    }

    fn lower_symbol(&mut self, name: &str, env: &Env) -> Result<Ir, LowerError> {
        if name == "$$" {
            return Ok(Ir::var(INPUT_NAME));
        }
        if name == "$" {
            return match env.pipes.last() {
                Some(temp) => Ok(Ir::var(temp.clone())),
                None => Err(LowerError::DollarOutsidePipeline),
            };
        }
        if let Some(rest) = name.strip_prefix('$') {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                let index: f64 = rest.parse().unwrap_or(f64::MAX);
                return Ok(Ir::Call {
                    func: Box::new(Ir::var("get")),
                    args: vec![Ir::var(INPUT_NAME), Ir::num(index)],
                });
            }
        }
        Ok(Ir::var(name))
    }

    fn lower_keyword(&mut self, name: &str, args: &[Form], env: &mut Env) -> Result<Ir, LowerError> {
        match name {
            "let" => {
                if args.len() != 2 && args.len() != 3 {
                    return Err(LowerError::malformed(
                        "let",
                        format!("expected 'let: name value [body]', got {} arguments", args.len()),
                    ));
                }
                let Form::Symbol(bound) = &args[0] else {
                    return Err(LowerError::malformed("let", "first argument must be an identifier"));
                };
                let value = self.lower_form(&args[1], env)?;
                env.declare(bound);
                let body = match args.get(2) {
                    Some(b) => self.lower_form(b, env)?,
                    None => Ir::var(bound.clone()),
                };
                Ok(Ir::Let {
                    name: bound.clone(),
                    value: Box::new(value),
                    body: Box::new(body),
                })
            }
            "fn" => {
                if args.len() < 3 {
                    return Err(LowerError::malformed(
                        "fn",
                        "expected 'fn: name (params…) body…'",
                    ));
                }
                let Form::Symbol(bound) = &args[0] else {
                    return Err(LowerError::malformed("fn", "function name must be an identifier"));
                };
                let Form::List(params) = &args[1] else {
                    return Err(LowerError::malformed("fn", "parameter list must be parenthesised"));
                };
                // Declared before lowering the body so self-recursion
                // resolves as a capture of the enclosing slot.
                env.declare(bound);
                let func = self.lower_fn_literal(params, &args[2..], env)?;
                Ok(Ir::Let {
                    name: bound.clone(),
                    value: Box::new(func),
                    body: Box::new(Ir::var(bound.clone())),
                })
            }
            effect => Ok(Ir::Effect {
                name: effect.to_owned(),
                args: args
                    .iter()
                    .map(|a| self.lower_form(a, env))
                    .collect::<Result<Vec<_>, _>>()?,
            }),
        }
    }

    fn lower_list(&mut self, items: &[Form], env: &mut Env) -> Result<Ir, LowerError> {
        let Some((head, rest)) = items.split_first() else {
            return Err(LowerError::EmptyList);
        };
        if let Form::Symbol(s) = head {
            match s.as_str() {
                "if" => {
                    if rest.len() != 3 {
                        return Err(LowerError::BadArity {
                            form: "if",
                            expected: 3,
                            got: rest.len(),
                        });
                    }
                    return Ok(Ir::If {
                        cond: Box::new(self.lower_form(&rest[0], env)?),
                        then: Box::new(self.lower_form(&rest[1], env)?),
                        orelse: Box::new(self.lower_form(&rest[2], env)?),
                    });
                }
                "and" | "or" => {
                    if rest.len() != 2 {
                        return Err(LowerError::BadArity {
                            form: if s == "and" { "and" } else { "or" },
                            expected: 2,
                            got: rest.len(),
                        });
                    }
                    // Fixed temporary names; nested uses shadow harmlessly.
                    let temp = if s == "and" { "$and_temp" } else { "$or_temp" };
                    let first = self.lower_form(&rest[0], env)?;
                    let second = self.lower_form(&rest[1], env)?;
                    let (then, orelse) = if s == "and" {
                        (second, Ir::var(temp))
                    } else {
                        (Ir::var(temp), second)
                    };
                    return Ok(Ir::Let {
                        name: temp.to_owned(),
                        value: Box::new(first),
                        body: Box::new(Ir::If {
                            cond: Box::new(Ir::var(temp)),
                            then: Box::new(then),
                            orelse: Box::new(orelse),
                        }),
                    });
                }
                "fn" => {
                    let Some(Form::List(params)) = rest.first() else {
                        return Err(LowerError::malformed("fn", "expected '(fn (params…) body…)'"));
                    };
                    if rest.len() < 2 {
                        return Err(LowerError::malformed("fn", "function body is missing"));
                    }
                    return self.lower_fn_literal(params, &rest[1..], env);
                }
                _ => {}
            }
        }
        let func = self.lower_form(head, env)?;
        let args = rest
            .iter()
            .map(|a| self.lower_form(a, env))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ir::Call {
            func: Box::new(func),
            args,
        })
    }

    /// Lowers a function literal and computes its capture set.
    fn lower_fn_literal(&mut self, params: &[Form], body: &[Form], env: &mut Env) -> Result<Ir, LowerError> {
        let mut names = Vec::with_capacity(params.len());
        for p in params {
            let Form::Symbol(n) = p else {
                return Err(LowerError::malformed("fn", "parameters must be identifiers"));
            };
            names.push(n.clone());
        }

        let outer = env.visible();
        let mut scope = AHashSet::new();
        scope.extend(names.iter().cloned());
        env.scopes.push(scope);
        let body_ir = self.lower_stmts(body, env)?;
        env.scopes.pop();

        // Free variables of the body that the enclosing scope can supply;
        // everything else is a parameter, a local, or a builtin. Sorted
        // order comes from free_vars.
        let captures = free_vars(&body_ir)
            .into_iter()
            .filter(|n| !names.contains(n) && outer.contains(n))
            .collect();

        Ok(Ir::Fn {
            params: names,
            body: Box::new(body_ir),
            captures,
        })
    }

    fn lower_pipeline(&mut self, stages: &[Form], env: &mut Env) -> Result<Ir, LowerError> {
        let mut stages_iter = stages.iter();
        let first = stages_iter
            .next()
            .ok_or(LowerError::malformed("pipeline", "pipeline has no stages"))?;
        let mut acc = self.lower_form(first, env)?;

        for stage in stages_iter {
            let temp = format!("$pipe{}", self.next_pipe);
            self.next_pipe += 1;
            env.declare(&temp);
            env.pipes.push(temp.clone());
            let stage_ir = self.lower_stage(stage, &temp, env);
            env.pipes.pop();
            acc = Ir::Let {
                name: temp,
                value: Box::new(acc),
                body: Box::new(stage_ir?),
            };
        }
        Ok(acc)
    }

    /// Lowers one pipeline stage with `$` bound to `temp`.
    ///
    /// A bare identifier `f` becomes `(f $)`; a call that does not mention
    /// `$` gets the temporary injected as its first argument; anything that
    /// already mentions `$` (or is not a call) lowers as-is.
    fn lower_stage(&mut self, stage: &Form, temp: &str, env: &mut Env) -> Result<Ir, LowerError> {
        match stage {
            Form::Symbol(s) if !s.starts_with('$') => Ok(Ir::Call {
                func: Box::new(self.lower_symbol(s, env)?),
                args: vec![Ir::var(temp)],
            }),
            Form::List(items) if !mentions_dollar(stage) => {
                let Some((head, rest)) = items.split_first() else {
                    return Err(LowerError::EmptyList);
                };
                // Injection only applies to plain calls; special forms
                // lower unchanged.
                if matches!(head, Form::Symbol(s) if matches!(s.as_str(), "if" | "and" | "or" | "fn")) {
                    return self.lower_form(stage, env);
                }
                let func = self.lower_form(head, env)?;
                let mut args = vec![Ir::var(temp)];
                for a in rest {
                    args.push(self.lower_form(a, env)?);
                }
                Ok(Ir::Call {
                    func: Box::new(func),
                    args,
                })
            }
            _ => self.lower_form(stage, env),
        }
    }
}

/// Whether a form mentions the pipeline reference `$` anywhere.
fn mentions_dollar(form: &Form) -> bool {
    match form {
        Form::Symbol(s) => s == "$",
        Form::Keyword { args, .. } => args.iter().any(mentions_dollar),
        Form::List(items) | Form::Pipeline(items) => items.iter().any(mentions_dollar),
        _ => false,
    }
}
