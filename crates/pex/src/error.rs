//! Top-level error sum for embedders that drive the whole
//! parse → lower → compile → run chain.

use std::fmt;

use crate::bytecode::{BytecodeReadError, CompileError};
use crate::lower::LowerError;
use crate::parse::ParseError;
use crate::vm::RunError;

/// Any error the PEX toolchain can surface, stage-tagged.
#[derive(Debug)]
pub enum PexError {
    Parse(ParseError),
    Lower(LowerError),
    Compile(CompileError),
    BytecodeRead(BytecodeReadError),
    Run(RunError),
}

impl fmt::Display for PexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Lower(e) => write!(f, "lowering error: {e}"),
            Self::Compile(e) => write!(f, "codegen error: {e}"),
            Self::BytecodeRead(e) => write!(f, "bytecode error: {e}"),
            Self::Run(e) => write!(f, "runtime error: {e}"),
        }
    }
}

impl std::error::Error for PexError {}

impl From<ParseError> for PexError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<LowerError> for PexError {
    fn from(e: LowerError) -> Self {
        Self::Lower(e)
    }
}

impl From<CompileError> for PexError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<BytecodeReadError> for PexError {
    fn from(e: BytecodeReadError) -> Self {
        Self::BytecodeRead(e)
    }
}

impl From<RunError> for PexError {
    fn from(e: RunError) -> Self {
        Self::Run(e)
    }
}
