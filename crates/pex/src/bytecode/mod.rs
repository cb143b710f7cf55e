//! Bytecode: opcode encoding, the compiled artifact, codegen, and the
//! optional binary persistence format.

pub(crate) mod builder;
mod compiler;
pub mod file;
mod op;
mod program;

pub use compiler::{compile, CompileError};
pub use file::BytecodeReadError;
pub use op::Opcode;
pub use program::{Constant, FunctionTemplate, Program, UpvalueSpec};
