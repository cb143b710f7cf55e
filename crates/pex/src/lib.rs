#![doc = include_str!("../../../README.md")]

mod builtins;
mod bytecode;
mod effects;
mod error;
mod ir;
mod lower;
mod parse;
mod value;
mod vm;

pub use crate::builtins::{BuiltinError, BuiltinFn, BuiltinResult, BuiltinTable, NativeFn};
pub use crate::bytecode::file::{read as read_bytecode, write as write_bytecode};
pub use crate::bytecode::{
    compile, BytecodeReadError, CompileError, Constant, FunctionTemplate, Opcode, Program, UpvalueSpec,
};
pub use crate::effects::{
    handler_fn, EffectHandler, EffectOutcome, FnHandler, NullEffects, RecordingEffects, RejectEffects,
};
pub use crate::error::PexError;
pub use crate::ir::{free_vars, Ir, Literal};
pub use crate::lower::{lower, parse_and_lower, LowerError, INPUT_NAME};
pub use crate::parse::{parse, Form, ParseError};
pub use crate::value::{Closure, RegexValue, Upvalue, UpvalueRef, Value};
pub use crate::vm::{
    Continuation, EffectCall, Executor, RunError, RunProgress, MAX_FRAMES, MAX_STACK_SIZE,
};

/// Parses, lowers, compiles and prepares a source program in one step.
pub fn prepare(source: &str) -> Result<Executor, PexError> {
    let ir = parse_and_lower(source)?;
    let program = compile(&ir)?;
    Ok(Executor::new(program)?)
}
