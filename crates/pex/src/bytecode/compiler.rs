//! Code generation: [`Ir`] to a bytecode [`Program`].
//!
//! The compiler keeps a stack of per-function contexts (local names, upvalue
//! specs, instruction buffer); nested function literals push a context,
//! compile recursively, and leave a `MAKE_CLOSURE` in the parent. Variable
//! references resolve local → own upvalue → recursively through parents
//! (registering capture or forwarding specs on the way) → builtin; anything
//! else is an error.
//!
//! Two shapes get special slot treatment so recursion works:
//! `Let(name, Fn, …)` allocates the slot *before* compiling the function
//! body, and a leading run of `Let(_, Fn, _)` elements in a `Seq`
//! pre-allocates all their slots first, which is what lets sibling functions
//! call each other.

use std::fmt;

use tracing::debug;

use super::builder::{BranchOp, FunctionBuilder, IndexOp, NameOp, UnboundLabel};
use super::op::Opcode;
use super::program::{Constant, ConstantPool, FunctionTemplate, NameTable, Program};
use crate::builtins;
use crate::ir::{Ir, Literal};
use crate::lower::INPUT_NAME;

/// `CALL`, `CALL_BUILTIN` and `EFFECT` encode their argument count as a u8.
const MAX_CALL_ARGS: usize = 255;

/// A code generation failure.
///
/// Apart from [`CompileError::UnresolvedLabel`] (an internal invariant
/// violation) these all indicate ill-formed input IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A `Var` that is neither bound nor a known builtin.
    UndefinedVariable(String),
    /// A builtin name referenced as a value; builtins may only be called.
    BuiltinNotValue(String),
    /// A dedicated-opcode builtin called with the wrong argument count.
    FixedOpArity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    /// More arguments than the u8 operand can encode.
    TooManyArguments(usize),
    /// A branch to a label that was never bound (compiler bug).
    UnresolvedLabel(usize),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "undefined variable '{name}'"),
            Self::BuiltinNotValue(name) => {
                write!(f, "builtin '{name}' is not a value and can only be called")
            }
            Self::FixedOpArity { name, expected, got } => {
                write!(f, "'{name}' expects {expected} arguments, got {got}")
            }
            Self::TooManyArguments(count) => {
                write!(f, "call has {count} arguments, the maximum is {MAX_CALL_ARGS}")
            }
            Self::UnresolvedLabel(label) => write!(f, "internal: unresolved jump label {label}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compiles lowered IR into a bytecode program. Deterministic and pure.
///
/// If `ir` is not already a function literal it is wrapped in the implicit
/// entry function `Fn(["input"], ir, [])`; either way the entry point is
/// template 0.
pub fn compile(ir: &Ir) -> Result<Program, CompileError> {
    let mut compiler = Compiler::default();
    match ir {
        Ir::Fn { params, body, captures } => {
            compiler.compile_function(None, params, captures, body)?;
        }
        other => {
            let params = [INPUT_NAME.to_owned()];
            compiler.compile_function(None, &params, &[], other)?;
        }
    }
    let program = Program {
        constants: compiler.constants.into_vec(),
        names: compiler.names.into_vec(),
        templates: compiler.templates,
        code: compiler.code,
        entry: 0,
    };
    debug!(
        templates = program.templates.len(),
        constants = program.constants.len(),
        names = program.names.len(),
        code_bytes = program.code.len(),
        "compiled program"
    );
    Ok(program)
}

/// Outcome of resolving a name inside some function context.
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Local(u32),
    Upvalue(u32),
}

/// Per-function compilation state.
struct FunctionCtx {
    /// Local slot names in allocation order; parameters occupy the first
    /// slots. Shadowing pushes a fresh slot, so lookup scans from the end.
    locals: Vec<String>,
    param_count: u32,
    upvalues: Vec<super::program::UpvalueSpec>,
    upvalue_names: Vec<String>,
    builder: FunctionBuilder,
}

#[derive(Default)]
struct Compiler {
    constants: ConstantPool,
    names: NameTable,
    templates: Vec<FunctionTemplate>,
    code: Vec<u8>,
    contexts: Vec<FunctionCtx>,
}

impl Compiler {
    fn builder(&mut self) -> &mut FunctionBuilder {
        &mut self.contexts.last_mut().expect("inside a function").builder
    }

    fn declare_local(&mut self, name: &str) -> u32 {
        let ctx = self.contexts.last_mut().expect("inside a function");
        ctx.locals.push(name.to_owned());
        (ctx.locals.len() - 1) as u32
    }

    /// Compiles one function body into a fresh template and returns its
    /// index. Templates are reserved up front so the entry function, which
    /// finishes last, keeps index 0.
    fn compile_function(
        &mut self,
        name: Option<&str>,
        params: &[String],
        captures: &[String],
        body: &Ir,
    ) -> Result<u32, CompileError> {
        let template_index = self.templates.len();
        self.templates.push(FunctionTemplate {
            name_index: -1,
            param_count: 0,
            local_count: 0,
            upvalues: Vec::new(),
            code_offset: 0,
            code_length: 0,
        });
        let name_index = match name {
            Some(n) => self.names.intern(n) as i32,
            None => -1,
        };

        self.contexts.push(FunctionCtx {
            locals: params.to_vec(),
            param_count: params.len() as u32,
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            builder: FunctionBuilder::new(),
        });

        // Pre-register the declared captures (sorted by the lowerer) so
        // upvalue indices are deterministic regardless of first-use order
        // inside the body. On-demand resolution below still covers IR built
        // without capture lists.
        for capture in captures {
            let depth = self.contexts.len() - 1;
            self.resolve_in(depth, capture)
                .ok_or_else(|| CompileError::UndefinedVariable(capture.clone()))?;
        }

        self.compile_expr(body)?;
        self.builder().emit(Opcode::Return);

        let ctx = self.contexts.pop().expect("context pushed above");
        let bytes = ctx
            .builder
            .encode()
            .map_err(|UnboundLabel(label)| CompileError::UnresolvedLabel(label))?;
        let code_offset = self.code.len() as u32;
        let code_length = bytes.len() as u32;
        self.code.extend_from_slice(&bytes);
        self.templates[template_index] = FunctionTemplate {
            name_index,
            param_count: ctx.param_count,
            local_count: ctx.locals.len() as u32,
            upvalues: ctx.upvalues,
            code_offset,
            code_length,
        };
        Ok(template_index as u32)
    }

    /// Resolves `name` in the innermost function context.
    fn resolve_variable(&mut self, name: &str) -> Option<Resolved> {
        let depth = self.contexts.len() - 1;
        self.resolve_in(depth, name)
    }

    /// Resolves `name` at `depth`, registering capture/forwarding upvalue
    /// specs on every level between the defining frame and `depth`.
    fn resolve_in(&mut self, depth: usize, name: &str) -> Option<Resolved> {
        if let Some(i) = self.contexts[depth].locals.iter().rposition(|n| n == name) {
            return Some(Resolved::Local(i as u32));
        }
        if let Some(i) = self.contexts[depth].upvalue_names.iter().position(|n| n == name) {
            return Some(Resolved::Upvalue(i as u32));
        }
        if depth == 0 {
            return None;
        }
        let spec = match self.resolve_in(depth - 1, name)? {
            Resolved::Local(index) => super::program::UpvalueSpec {
                is_local: true,
                index,
            },
            Resolved::Upvalue(index) => super::program::UpvalueSpec {
                is_local: false,
                index,
            },
        };
        let ctx = &mut self.contexts[depth];
        ctx.upvalues.push(spec);
        ctx.upvalue_names.push(name.to_owned());
        Some(Resolved::Upvalue((ctx.upvalues.len() - 1) as u32))
    }

    fn compile_expr(&mut self, expr: &Ir) -> Result<(), CompileError> {
        match expr {
            Ir::Const(literal) => {
                self.compile_literal(literal);
                Ok(())
            }
            Ir::Var(name) => match self.resolve_variable(name) {
                Some(Resolved::Local(slot)) => {
                    self.builder().emit_index(IndexOp::LoadLocal, slot);
                    Ok(())
                }
                Some(Resolved::Upvalue(slot)) => {
                    self.builder().emit_index(IndexOp::LoadUpvalue, slot);
                    Ok(())
                }
                None if is_fixed_op(name) || builtins::is_standard(name) => {
                    Err(CompileError::BuiltinNotValue(name.clone()))
                }
                None => Err(CompileError::UndefinedVariable(name.clone())),
            },
            Ir::If { cond, then, orelse } => {
                self.compile_expr(cond)?;
                let else_label = self.builder().new_label();
                let end_label = self.builder().new_label();
                self.builder().emit_branch(BranchOp::JumpIfFalse, else_label);
                self.compile_expr(then)?;
                self.builder().emit_branch(BranchOp::Jump, end_label);
                self.builder().bind(else_label);
                self.compile_expr(orelse)?;
                self.builder().bind(end_label);
                Ok(())
            }
            Ir::Let { name, value, body } => self.compile_let(name, value, body, None),
            Ir::Seq(exprs) => self.compile_seq(exprs),
            Ir::Call { func, args } => self.compile_call(func, args),
            Ir::Fn { params, body, captures } => {
                let template = self.compile_function(None, params, captures, body)?;
                self.builder().emit_index(IndexOp::MakeClosure, template);
                Ok(())
            }
            Ir::Effect { name, args } => {
                check_argc(args.len())?;
                let name_index = self.names.intern(name);
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.builder().emit_name(NameOp::Effect, name_index, args.len() as u8);
                Ok(())
            }
        }
    }

    fn compile_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Null => self.builder().emit(Opcode::ConstNull),
            Literal::Bool(true) => self.builder().emit(Opcode::ConstTrue),
            Literal::Bool(false) => self.builder().emit(Opcode::ConstFalse),
            Literal::Num(n) => {
                // Opcode selection for the two hottest literals; -0.0 is
                // excluded since it must keep its sign bit.
                if *n == 0.0 && n.is_sign_positive() {
                    self.builder().emit(Opcode::ConstZero);
                } else if *n == 1.0 {
                    self.builder().emit(Opcode::ConstOne);
                } else {
                    let constant = number_constant(*n);
                    let index = self.constants.intern(constant);
                    self.builder().emit_index(IndexOp::Const, index);
                }
            }
            Literal::Str(s) => {
                let index = self.constants.intern(Constant::Str(s.clone()));
                self.builder().emit_index(IndexOp::Const, index);
            }
            Literal::Regex { pattern, flags } => {
                let index = self.constants.intern(Constant::Regex {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                });
                self.builder().emit_index(IndexOp::Const, index);
            }
        }
    }

    fn compile_let(
        &mut self,
        name: &str,
        value: &Ir,
        body: &Ir,
        preassigned: Option<u32>,
    ) -> Result<(), CompileError> {
        if let Ir::Fn { params, body: fn_body, captures } = value {
            // The slot exists before the function body compiles, so a
            // recursive reference inside resolves to it.
            let slot = match preassigned {
                Some(slot) => slot,
                None => self.declare_local(name),
            };
            let template = self.compile_function(Some(name), params, captures, fn_body)?;
            self.builder().emit_index(IndexOp::MakeClosure, template);
            self.builder().emit_index(IndexOp::StoreLocal, slot);
        } else {
            self.compile_expr(value)?;
            let slot = match preassigned {
                Some(slot) => slot,
                None => self.declare_local(name),
            };
            self.builder().emit_index(IndexOp::StoreLocal, slot);
        }
        self.compile_expr(body)
    }

    fn compile_seq(&mut self, exprs: &[Ir]) -> Result<(), CompileError> {
        if exprs.is_empty() {
            self.builder().emit(Opcode::ConstNull);
            return Ok(());
        }

        // Pre-allocate slots for the leading run of function-binding lets so
        // sibling functions can reference each other (mutual recursion).
        let mut preassigned: Vec<Option<u32>> = vec![None; exprs.len()];
        for (i, expr) in exprs.iter().enumerate() {
            let Ir::Let { name, value, .. } = expr else {
                break;
            };
            if !matches!(value.as_ref(), Ir::Fn { .. }) {
                break;
            }
            preassigned[i] = Some(self.declare_local(name));
        }

        for (i, expr) in exprs.iter().enumerate() {
            match (preassigned[i], expr) {
                (Some(slot), Ir::Let { name, value, body }) => {
                    self.compile_let(name, value, body, Some(slot))?;
                }
                _ => self.compile_expr(expr)?,
            }
            if i + 1 < exprs.len() {
                self.builder().emit(Opcode::Pop);
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, func: &Ir, args: &[Ir]) -> Result<(), CompileError> {
        if let Ir::Var(name) = func {
            // A local or upvalue shadows the builtin of the same name.
            if self.resolve_variable(name).is_none() {
                if is_fixed_op(name) {
                    return self.compile_fixed_op(name, args);
                }
                if builtins::is_standard(name) {
                    check_argc(args.len())?;
                    let name_index = self.names.intern(name);
                    for arg in args {
                        self.compile_expr(arg)?;
                    }
                    self.builder()
                        .emit_name(NameOp::CallBuiltin, name_index, args.len() as u8);
                    return Ok(());
                }
                return Err(CompileError::UndefinedVariable(name.clone()));
            }
        }
        check_argc(args.len())?;
        self.compile_expr(func)?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.builder().emit_call(args.len() as u8);
        Ok(())
    }

    /// Emits the dedicated opcode for one of the fixed builtin names.
    fn compile_fixed_op(&mut self, name: &str, args: &[Ir]) -> Result<(), CompileError> {
        let arity_error = |expected: &'static str| CompileError::FixedOpArity {
            name: name.to_owned(),
            expected,
            got: args.len(),
        };

        let op = match name {
            // `-` doubles as negation and subtraction, picked by arity.
            "-" => match args.len() {
                1 => Opcode::Neg,
                2 => Opcode::Sub,
                _ => return Err(arity_error("1 or 2")),
            },
            "not" => {
                if args.len() != 1 {
                    return Err(arity_error("1"));
                }
                Opcode::Not
            }
            // MAKE_ARRAY's count operand is width-selected, so `array` is
            // not bound by the u8 argc limit of CALL.
            "array" => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.builder().emit_index(IndexOp::MakeArray, args.len() as u32);
                return Ok(());
            }
            _ => {
                if args.len() != 2 {
                    return Err(arity_error("2"));
                }
                match name {
                    "+" => Opcode::Add,
                    "*" => Opcode::Mul,
                    "/" => Opcode::Div,
                    "%" => Opcode::Mod,
                    "==" => Opcode::Eq,
                    "!=" => Opcode::Ne,
                    "<" => Opcode::Lt,
                    ">" => Opcode::Gt,
                    "<=" => Opcode::Le,
                    ">=" => Opcode::Ge,
                    "??" => Opcode::NullCoalesce,
                    "get" => Opcode::GetIndex,
                    _ => unreachable!("is_fixed_op and compile_fixed_op disagree on '{name}'"),
                }
            }
        };
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.builder().emit(op);
        Ok(())
    }
}

/// Names with dedicated opcodes, emitted inline instead of `CALL_BUILTIN`.
fn is_fixed_op(name: &str) -> bool {
    matches!(
        name,
        "+" | "-" | "*" | "/" | "%" | "==" | "!=" | "<" | ">" | "<=" | ">=" | "not" | "??" | "get" | "array"
    )
}

fn check_argc(count: usize) -> Result<(), CompileError> {
    if count > MAX_CALL_ARGS {
        return Err(CompileError::TooManyArguments(count));
    }
    Ok(())
}

/// Picks the compact constant representation for a number literal.
fn number_constant(n: f64) -> Constant {
    let as_int = n as i32;
    if n.is_finite() && f64::from(as_int) == n && !(n == 0.0 && n.is_sign_negative()) {
        Constant::Int(as_int)
    } else {
        Constant::Float(n)
    }
}
