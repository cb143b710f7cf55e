//! The stack-based virtual machine.
//!
//! One [`Machine`] owns an operand stack, a frame stack, and the open-upvalue
//! map; it executes until the entry frame returns or an `EFFECT` suspends it.
//! Suspension hands the whole machine to a [`Continuation`], so captured
//! control state is independent by construction while values stay
//! reference-shared. The embedding surface is [`Executor`]: either drive an
//! effect handler to completion with [`Executor::run_with_handler`], or step
//! the [`RunProgress`] state machine yourself.

mod continuation;
mod num;

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::builtins::{BuiltinFn, BuiltinTable};
use crate::bytecode::{Constant, Opcode, Program};
use crate::effects::{EffectHandler, EffectOutcome};
use crate::value::{Closure, RegexValue, Upvalue, UpvalueRef, Value};

pub use continuation::Continuation;

/// Operand stack capacity; exceeding it is a runtime error.
pub const MAX_STACK_SIZE: usize = 10_000;
/// Call depth limit.
pub const MAX_FRAMES: usize = 1_000;

/// A runtime failure. All of these abort the current PEX execution; nothing
/// is retried or recovered inside the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    StackOverflow,
    StackUnderflow,
    FrameOverflow,
    IpOutOfBounds,
    UnknownOpcode(u8),
    DivisionByZero,
    /// Calling a value that is not a closure.
    NotCallable(&'static str),
    ArityMismatch { expected: u32, got: u32 },
    /// `GET_INDEX` on a value with no index structure at all.
    NotIndexable(&'static str),
    /// `CALL_BUILTIN` named something absent from the registry.
    UnknownBuiltin(String),
    /// A builtin raised; carries the builtin's own message.
    Builtin { name: String, message: String },
    /// `resume` on an already-resumed continuation.
    ContinuationConsumed,
    /// The driving handler neither resumed nor was entitled to the effect.
    UnhandledEffect(String),
    /// A regex constant failed to compile at program load.
    InvalidRegex { pattern: String, message: String },
    /// Structurally invalid bytecode (bad index, bad entry template, …).
    MalformedBytecode(String),
}

impl RunError {
    fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedBytecode(message.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "operand stack overflow (limit {MAX_STACK_SIZE})"),
            Self::StackUnderflow => f.write_str("operand stack underflow"),
            Self::FrameOverflow => write!(f, "call depth exceeds {MAX_FRAMES} frames"),
            Self::IpOutOfBounds => f.write_str("instruction pointer out of bounds"),
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{byte:02x}"),
            Self::DivisionByZero => f.write_str("division by zero"),
            Self::NotCallable(kind) => write!(f, "cannot call a {kind}"),
            Self::ArityMismatch { expected, got } => {
                write!(f, "function expects {expected} arguments, got {got}")
            }
            Self::NotIndexable(kind) => write!(f, "cannot index a {kind}"),
            Self::UnknownBuiltin(name) => write!(f, "unknown builtin '{name}'"),
            Self::Builtin { name, message } => write!(f, "{name}: {message}"),
            Self::ContinuationConsumed => f.write_str("continuation already resumed"),
            Self::UnhandledEffect(name) => write!(f, "unhandled effect '{name}'"),
            Self::InvalidRegex { pattern, message } => {
                write!(f, "invalid regex constant /{pattern}/: {message}")
            }
            Self::MalformedBytecode(message) => write!(f, "malformed bytecode: {message}"),
        }
    }
}

impl std::error::Error for RunError {}

/// What a (possibly resumed) run produced: a final value, or a suspension
/// at a named effect.
#[derive(Debug)]
pub enum RunProgress {
    Complete(Value),
    Effect(EffectCall),
}

impl RunProgress {
    /// The final value, if execution completed.
    #[must_use]
    pub fn into_complete(self) -> Option<Value> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Effect(_) => None,
        }
    }

    /// The pending effect, if execution suspended.
    #[must_use]
    pub fn into_effect(self) -> Option<EffectCall> {
        match self {
            Self::Complete(_) => None,
            Self::Effect(call) => Some(call),
        }
    }
}

/// A suspended effect: its name, the evaluated arguments, and the
/// continuation that picks the program back up.
#[derive(Debug)]
pub struct EffectCall {
    pub name: String,
    pub args: Vec<Value>,
    pub continuation: Continuation,
}

/// Program plus constants materialized to runtime values (strings shared,
/// regexes compiled once at load).
#[derive(Debug)]
pub(crate) struct ProgramData {
    pub(crate) program: Program,
    pub(crate) pool: Vec<Value>,
}

/// A prepared program: validated bytecode, materialized constants, and a
/// builtin table. One executor can run many inputs; each `run` gets an
/// independent machine, so executors are reusable but a single suspended
/// run is picked up only through its own continuation.
#[derive(Debug)]
pub struct Executor {
    data: Rc<ProgramData>,
    builtins: BuiltinTable,
}

impl Executor {
    /// Validates the program and compiles its regex constants.
    pub fn new(program: Program) -> Result<Self, RunError> {
        let entry = program.entry as usize;
        let Some(entry_template) = program.templates.get(entry) else {
            return Err(RunError::malformed(format!("entry template {entry} does not exist")));
        };
        if !entry_template.upvalues.is_empty() {
            return Err(RunError::malformed("entry template must not capture upvalues"));
        }
        for (index, template) in program.templates.iter().enumerate() {
            let end = u64::from(template.code_offset) + u64::from(template.code_length);
            if end > program.code.len() as u64 {
                return Err(RunError::malformed(format!(
                    "template {index} code range lies outside the code section"
                )));
            }
            if template.local_count < template.param_count {
                return Err(RunError::malformed(format!(
                    "template {index} declares fewer locals than parameters"
                )));
            }
        }

        let pool = program
            .constants
            .iter()
            .map(|constant| match constant {
                Constant::Null => Ok(Value::Null),
                Constant::True => Ok(Value::Bool(true)),
                Constant::False => Ok(Value::Bool(false)),
                Constant::Int(v) => Ok(Value::Num(f64::from(*v))),
                Constant::Float(v) => Ok(Value::Num(*v)),
                Constant::Str(s) => Ok(Value::str(s)),
                Constant::Regex { pattern, flags } => RegexValue::new(pattern, flags)
                    .map(|r| Value::Regex(Rc::new(r)))
                    .map_err(|message| RunError::InvalidRegex {
                        pattern: pattern.clone(),
                        message,
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(constants = pool.len(), "prepared program");
        Ok(Self {
            data: Rc::new(ProgramData { program, pool }),
            builtins: BuiltinTable::standard(),
        })
    }

    /// Installs or replaces a builtin for subsequent runs. Overrides layer
    /// on top of the standard set.
    pub fn override_builtin(&mut self, name: impl Into<String>, f: BuiltinFn) {
        self.builtins.set(name, f);
    }

    /// Starts a run with `input` bound as the entry function's argument.
    ///
    /// Returns either the completed value or the first effect suspension;
    /// drive the latter through [`Continuation::resume`]. A second `run`
    /// while a prior run is suspended is fine — each run owns its machine.
    pub fn run(&self, input: Value) -> Result<RunProgress, RunError> {
        let mut machine = Machine {
            data: Rc::clone(&self.data),
            builtins: self.builtins.clone(),
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(8),
            open_upvalues: AHashMap::new(),
        };
        machine.enter_entry(input)?;
        machine.run_to_progress()
    }

    /// Runs to completion, answering every effect through `handler`.
    ///
    /// Effects reach the handler in execution order; the continuation after
    /// each effect only runs once the handler returns
    /// [`EffectOutcome::Resume`]. A handler that aborts (or rejects the
    /// effect) surfaces as [`RunError::UnhandledEffect`].
    pub fn run_with_handler<H: EffectHandler>(&self, input: Value, handler: &mut H) -> Result<Value, RunError> {
        let mut progress = self.run(input)?;
        loop {
            match progress {
                RunProgress::Complete(value) => return Ok(value),
                RunProgress::Effect(mut call) => {
                    let args = std::mem::take(&mut call.args);
                    match handler.handle(&call.name, args) {
                        EffectOutcome::Resume(value) => {
                            progress = call.continuation.resume(value)?;
                        }
                        EffectOutcome::Abort => {
                            return Err(RunError::UnhandledEffect(call.name));
                        }
                    }
                }
            }
        }
    }
}

/// One call frame: the executing closure, the absolute instruction pointer,
/// the end of this function's code range, and the stack index where its
/// locals begin.
#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    end: usize,
    bp: usize,
}

/// How the dispatch loop stopped.
#[derive(Debug)]
enum Exit {
    Complete(Value),
    Effect { name: String, args: Vec<Value> },
}

#[derive(Debug)]
pub(crate) struct Machine {
    data: Rc<ProgramData>,
    builtins: BuiltinTable,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    /// Absolute stack index → shared upvalue, for every still-open capture.
    open_upvalues: AHashMap<usize, UpvalueRef>,
}

impl Machine {
    /// Pushes the entry frame with `input` as argument 0.
    fn enter_entry(&mut self, input: Value) -> Result<(), RunError> {
        let entry = self.data.program.entry as usize;
        let template = &self.data.program.templates[entry];
        if template.param_count != 1 {
            return Err(RunError::ArityMismatch {
                expected: template.param_count,
                got: 1,
            });
        }
        let (local_count, offset, length) = (
            template.local_count as usize,
            template.code_offset as usize,
            template.code_length as usize,
        );
        self.stack.push(input);
        self.stack.extend((1..local_count).map(|_| Value::Null));
        self.frames.push(Frame {
            closure: Rc::new(Closure::new(entry, Vec::new())),
            ip: offset,
            end: offset + length,
            bp: 0,
        });
        Ok(())
    }

    /// Runs the machine and wraps the exit; on suspension the machine moves
    /// into the continuation, which keeps the captured control state
    /// independent of everything else by construction.
    pub(crate) fn run_to_progress(mut self) -> Result<RunProgress, RunError> {
        match self.run_loop()? {
            Exit::Complete(value) => Ok(RunProgress::Complete(value)),
            Exit::Effect { name, args } => Ok(RunProgress::Effect(EffectCall {
                name,
                args,
                continuation: Continuation::new(self),
            })),
        }
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), RunError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(RunError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RunError> {
        self.stack.pop().ok_or(RunError::StackUnderflow)
    }

    /// Pops the top `count` values, preserving their order.
    fn take_args(&mut self, count: usize) -> Result<Vec<Value>, RunError> {
        if self.stack.len() < count {
            return Err(RunError::StackUnderflow);
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    fn fetch(&mut self, len: usize) -> Result<usize, RunError> {
        let frame = self.frames.last_mut().ok_or(RunError::StackUnderflow)?;
        if frame.ip + len > frame.end {
            return Err(RunError::IpOutOfBounds);
        }
        let at = frame.ip;
        frame.ip += len;
        Ok(at)
    }

    fn fetch_u8(&mut self) -> Result<u8, RunError> {
        let at = self.fetch(1)?;
        Ok(self.data.program.code[at])
    }

    fn fetch_u16(&mut self) -> Result<u16, RunError> {
        let at = self.fetch(2)?;
        let code = &self.data.program.code;
        Ok(u16::from_le_bytes([code[at], code[at + 1]]))
    }

    fn fetch_u32(&mut self) -> Result<u32, RunError> {
        let at = self.fetch(4)?;
        let code = &self.data.program.code;
        Ok(u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]]))
    }

    /// Applies a signed jump offset, relative to the instruction following
    /// the jump. The target must stay inside the current function's code.
    fn jump(&mut self, offset: i64) -> Result<(), RunError> {
        let frame = self.frames.last_mut().ok_or(RunError::StackUnderflow)?;
        let start = self.data.program.templates[frame.closure.template].code_offset as usize;
        let target = frame.ip as i64 + offset;
        if target < start as i64 || target >= frame.end as i64 {
            return Err(RunError::IpOutOfBounds);
        }
        frame.ip = target as usize;
        Ok(())
    }

    fn run_loop(&mut self) -> Result<Exit, RunError> {
        loop {
            let byte = self.fetch_u8()?;
            let op = Opcode::from_byte(byte).ok_or(RunError::UnknownOpcode(byte))?;
            match op {
                Opcode::Nop => {}
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Dup => {
                    let top = self.stack.last().cloned().ok_or(RunError::StackUnderflow)?;
                    self.push(top)?;
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(RunError::StackUnderflow);
                    }
                    self.stack.swap(len - 1, len - 2);
                }

                Opcode::ConstNull => self.push(Value::Null)?,
                Opcode::ConstTrue => self.push(Value::Bool(true))?,
                Opcode::ConstFalse => self.push(Value::Bool(false))?,
                Opcode::ConstZero => self.push(Value::Num(0.0))?,
                Opcode::ConstOne => self.push(Value::Num(1.0))?,
                Opcode::Const8 => {
                    let index = self.fetch_u8()? as usize;
                    self.push_constant(index)?;
                }
                Opcode::Const16 => {
                    let index = self.fetch_u16()? as usize;
                    self.push_constant(index)?;
                }
                Opcode::Const32 => {
                    let index = self.fetch_u32()? as usize;
                    self.push_constant(index)?;
                }

                Opcode::LoadLocal8 => {
                    let slot = self.fetch_u8()? as usize;
                    self.load_local(slot)?;
                }
                Opcode::LoadLocal16 => {
                    let slot = self.fetch_u16()? as usize;
                    self.load_local(slot)?;
                }
                Opcode::LoadLocal32 => {
                    let slot = self.fetch_u32()? as usize;
                    self.load_local(slot)?;
                }
                Opcode::StoreLocal8 => {
                    let slot = self.fetch_u8()? as usize;
                    self.store_local(slot)?;
                }
                Opcode::StoreLocal16 => {
                    let slot = self.fetch_u16()? as usize;
                    self.store_local(slot)?;
                }
                Opcode::StoreLocal32 => {
                    let slot = self.fetch_u32()? as usize;
                    self.store_local(slot)?;
                }
                Opcode::LoadUpvalue8 => {
                    let index = self.fetch_u8()? as usize;
                    self.load_upvalue(index)?;
                }
                Opcode::LoadUpvalue16 => {
                    let index = self.fetch_u16()? as usize;
                    self.load_upvalue(index)?;
                }
                Opcode::LoadUpvalue32 => {
                    let index = self.fetch_u32()? as usize;
                    self.load_upvalue(index)?;
                }
                Opcode::StoreUpvalue8 => {
                    let index = self.fetch_u8()? as usize;
                    self.store_upvalue(index)?;
                }
                Opcode::StoreUpvalue16 => {
                    let index = self.fetch_u16()? as usize;
                    self.store_upvalue(index)?;
                }
                Opcode::StoreUpvalue32 => {
                    let index = self.fetch_u32()? as usize;
                    self.store_upvalue(index)?;
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    self.arithmetic(op)?;
                }
                Opcode::Neg => {
                    let value = self.pop()?;
                    self.push(Value::Num(-value.as_number()))?;
                }
                Opcode::Eq | Opcode::Ne => self.equality(op)?,
                Opcode::Lt | Opcode::Gt | Opcode::Le | Opcode::Ge => self.ordered(op)?,
                Opcode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(!value.is_truthy()))?;
                }
                Opcode::NullCoalesce => {
                    let fallback = self.pop()?;
                    let value = self.pop()?;
                    self.push(if matches!(value, Value::Null) { fallback } else { value })?;
                }

                Opcode::Jump8 => {
                    let offset = i64::from(self.fetch_u8()? as i8);
                    self.jump(offset)?;
                }
                Opcode::Jump16 => {
                    let offset = i64::from(self.fetch_u16()? as i16);
                    self.jump(offset)?;
                }
                Opcode::Jump32 => {
                    let offset = i64::from(self.fetch_u32()? as i32);
                    self.jump(offset)?;
                }
                Opcode::JumpIfFalse8 => {
                    let offset = i64::from(self.fetch_u8()? as i8);
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }
                Opcode::JumpIfFalse16 => {
                    let offset = i64::from(self.fetch_u16()? as i16);
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }
                Opcode::JumpIfFalse32 => {
                    let offset = i64::from(self.fetch_u32()? as i32);
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }
                Opcode::JumpIfTrue8 => {
                    let offset = i64::from(self.fetch_u8()? as i8);
                    let cond = self.pop()?;
                    if cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }
                Opcode::JumpIfTrue16 => {
                    let offset = i64::from(self.fetch_u16()? as i16);
                    let cond = self.pop()?;
                    if cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }
                Opcode::JumpIfTrue32 => {
                    let offset = i64::from(self.fetch_u32()? as i32);
                    let cond = self.pop()?;
                    if cond.is_truthy() {
                        self.jump(offset)?;
                    }
                }

                Opcode::MakeClosure8 => {
                    let template = self.fetch_u8()? as usize;
                    self.make_closure(template)?;
                }
                Opcode::MakeClosure16 => {
                    let template = self.fetch_u16()? as usize;
                    self.make_closure(template)?;
                }
                Opcode::MakeClosure32 => {
                    let template = self.fetch_u32()? as usize;
                    self.make_closure(template)?;
                }
                Opcode::Call => {
                    let argc = self.fetch_u8()? as usize;
                    self.call(argc)?;
                }
                Opcode::Return => {
                    if let Some(exit) = self.do_return()? {
                        return Ok(exit);
                    }
                }

                Opcode::CallBuiltin8 => {
                    let name = self.fetch_u8()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    self.call_builtin(name, argc)?;
                }
                Opcode::CallBuiltin16 => {
                    let name = self.fetch_u16()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    self.call_builtin(name, argc)?;
                }
                Opcode::CallBuiltin32 => {
                    let name = self.fetch_u32()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    self.call_builtin(name, argc)?;
                }
                Opcode::Effect8 => {
                    let name = self.fetch_u8()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    return self.begin_effect(name, argc);
                }
                Opcode::Effect16 => {
                    let name = self.fetch_u16()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    return self.begin_effect(name, argc);
                }
                Opcode::Effect32 => {
                    let name = self.fetch_u32()? as usize;
                    let argc = self.fetch_u8()? as usize;
                    return self.begin_effect(name, argc);
                }

                Opcode::MakeArray8 => {
                    let count = self.fetch_u8()? as usize;
                    let elements = self.take_args(count)?;
                    self.push(Value::array(elements))?;
                }
                Opcode::MakeArray16 => {
                    let count = self.fetch_u16()? as usize;
                    let elements = self.take_args(count)?;
                    self.push(Value::array(elements))?;
                }
                Opcode::MakeArray32 => {
                    let count = self.fetch_u32()? as usize;
                    let elements = self.take_args(count)?;
                    self.push(Value::array(elements))?;
                }
                Opcode::GetIndex => self.get_index()?,
            }
        }
    }

    fn push_constant(&mut self, index: usize) -> Result<(), RunError> {
        let value = self
            .data
            .pool
            .get(index)
            .cloned()
            .ok_or_else(|| RunError::malformed(format!("constant index {index} out of range")))?;
        self.push(value)
    }

    fn load_local(&mut self, slot: usize) -> Result<(), RunError> {
        let bp = self.frames.last().ok_or(RunError::StackUnderflow)?.bp;
        let value = self
            .stack
            .get(bp + slot)
            .cloned()
            .ok_or_else(|| RunError::malformed(format!("local slot {slot} out of range")))?;
        self.push(value)
    }

    fn store_local(&mut self, slot: usize) -> Result<(), RunError> {
        let value = self.pop()?;
        let bp = self.frames.last().ok_or(RunError::StackUnderflow)?.bp;
        let cell = self
            .stack
            .get_mut(bp + slot)
            .ok_or_else(|| RunError::malformed(format!("local slot {slot} out of range")))?;
        *cell = value;
        Ok(())
    }

    fn upvalue(&self, index: usize) -> Result<UpvalueRef, RunError> {
        let frame = self.frames.last().ok_or(RunError::StackUnderflow)?;
        frame
            .closure
            .upvalues
            .get(index)
            .cloned()
            .ok_or_else(|| RunError::malformed(format!("upvalue index {index} out of range")))
    }

    fn load_upvalue(&mut self, index: usize) -> Result<(), RunError> {
        let upvalue = self.upvalue(index)?;
        let value = match &*upvalue.borrow() {
            Upvalue::Open(slot) => self
                .stack
                .get(*slot)
                .cloned()
                .ok_or_else(|| RunError::malformed("open upvalue points past the stack"))?,
            Upvalue::Closed(value) => value.clone(),
        };
        self.push(value)
    }

    fn store_upvalue(&mut self, index: usize) -> Result<(), RunError> {
        let value = self.pop()?;
        let upvalue = self.upvalue(index)?;
        let open_slot = match &*upvalue.borrow() {
            Upvalue::Open(slot) => Some(*slot),
            Upvalue::Closed(_) => None,
        };
        match open_slot {
            Some(slot) => {
                let cell = self
                    .stack
                    .get_mut(slot)
                    .ok_or_else(|| RunError::malformed("open upvalue points past the stack"))?;
                *cell = value;
            }
            None => *upvalue.borrow_mut() = Upvalue::Closed(value),
        }
        Ok(())
    }

    /// Instantiates a closure from a template, resolving each upvalue spec.
    ///
    /// Capturing a parent local reuses the open upvalue already registered
    /// for that absolute slot, so sibling closures over the same slot share
    /// one handle.
    fn make_closure(&mut self, template_index: usize) -> Result<(), RunError> {
        let data = Rc::clone(&self.data);
        let template = data
            .program
            .templates
            .get(template_index)
            .ok_or_else(|| RunError::malformed(format!("template index {template_index} out of range")))?;
        let frame = self.frames.last().ok_or(RunError::StackUnderflow)?;
        let bp = frame.bp;
        let parent = Rc::clone(&frame.closure);

        let mut upvalues = Vec::with_capacity(template.upvalues.len());
        for spec in &template.upvalues {
            if spec.is_local {
                let slot = bp + spec.index as usize;
                let upvalue = self
                    .open_upvalues
                    .entry(slot)
                    .or_insert_with(|| Rc::new(std::cell::RefCell::new(Upvalue::Open(slot))))
                    .clone();
                upvalues.push(upvalue);
            } else {
                let upvalue = parent
                    .upvalues
                    .get(spec.index as usize)
                    .cloned()
                    .ok_or_else(|| RunError::malformed("closure forwards a missing upvalue"))?;
                upvalues.push(upvalue);
            }
        }
        self.push(Value::Closure(Rc::new(Closure::new(template_index, upvalues))))
    }

    /// `CALL argc`: stack holds `[callee, arg0 … argN]`; splice the callee
    /// out and enter its frame with `bp` at the first argument.
    fn call(&mut self, argc: usize) -> Result<(), RunError> {
        if self.stack.len() < argc + 1 {
            return Err(RunError::StackUnderflow);
        }
        let callee_at = self.stack.len() - argc - 1;
        let callee = self.stack.remove(callee_at);
        let Value::Closure(closure) = callee else {
            return Err(RunError::NotCallable(callee.type_name()));
        };
        let template = self
            .data
            .program
            .templates
            .get(closure.template)
            .ok_or_else(|| RunError::malformed(format!("template index {} out of range", closure.template)))?;
        if template.param_count as usize != argc {
            return Err(RunError::ArityMismatch {
                expected: template.param_count,
                got: argc as u32,
            });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RunError::FrameOverflow);
        }
        let padding = (template.local_count - template.param_count) as usize;
        if self.stack.len() + padding > MAX_STACK_SIZE {
            return Err(RunError::StackOverflow);
        }
        let (offset, length) = (template.code_offset as usize, template.code_length as usize);
        self.stack.extend((0..padding).map(|_| Value::Null));
        self.frames.push(Frame {
            closure,
            ip: offset,
            end: offset + length,
            bp: callee_at,
        });
        Ok(())
    }

    /// `RETURN`: close upvalues over the dying frame's slots, truncate its
    /// locals, and either resume the caller or finish the program.
    fn do_return(&mut self) -> Result<Option<Exit>, RunError> {
        let value = self.pop()?;
        let frame = self.frames.pop().ok_or(RunError::StackUnderflow)?;
        self.close_upvalues(frame.bp);
        self.stack.truncate(frame.bp);
        if self.frames.is_empty() {
            return Ok(Some(Exit::Complete(value)));
        }
        self.push(value)?;
        Ok(None)
    }

    /// Snapshots every open upvalue at or above `from` into its closed
    /// state. Because the handle is shared, all capturing closures observe
    /// the transition at once.
    fn close_upvalues(&mut self, from: usize) {
        let closing: Vec<usize> = self
            .open_upvalues
            .keys()
            .copied()
            .filter(|&slot| slot >= from)
            .collect();
        for slot in closing {
            if let Some(upvalue) = self.open_upvalues.remove(&slot) {
                let value = self.stack.get(slot).cloned().unwrap_or(Value::Null);
                *upvalue.borrow_mut() = Upvalue::Closed(value);
            }
        }
    }

    fn call_builtin(&mut self, name_index: usize, argc: usize) -> Result<(), RunError> {
        let name = self
            .data
            .program
            .names
            .get(name_index)
            .cloned()
            .ok_or_else(|| RunError::malformed(format!("name index {name_index} out of range")))?;
        let args = self.take_args(argc)?;
        let Some(builtin) = self.builtins.get(&name).cloned() else {
            return Err(RunError::UnknownBuiltin(name));
        };
        let result = builtin(&args).map_err(|e| RunError::Builtin {
            name,
            message: e.message().to_owned(),
        })?;
        self.push(result)
    }

    /// `EFFECT name argc`: pop the arguments (source order) and suspend.
    /// The instruction pointer has already advanced past the operands, so
    /// resuming pushes the handler's value and continues at the next
    /// instruction.
    fn begin_effect(&mut self, name_index: usize, argc: usize) -> Result<Exit, RunError> {
        let name = self
            .data
            .program
            .names
            .get(name_index)
            .cloned()
            .ok_or_else(|| RunError::malformed(format!("name index {name_index} out of range")))?;
        let args = self.take_args(argc)?;
        trace!(effect = %name, argc, "suspending on effect");
        Ok(Exit::Effect { name, args })
    }

    /// `GET_INDEX`: pop index then target. Out-of-range and missing-key
    /// lookups yield null; values with no index structure at all are a
    /// runtime error.
    fn get_index(&mut self) -> Result<(), RunError> {
        let index = self.pop()?;
        let target = self.pop()?;
        let result = match &target {
            Value::Null => Value::Null,
            Value::Array(items) => match integer_index(&index) {
                Some(i) => items.borrow().get(i).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            },
            Value::Str(s) => match integer_index(&index) {
                Some(i) => s
                    .chars()
                    .nth(i)
                    .map_or(Value::Null, |c| Value::str(c.to_string())),
                None => Value::Null,
            },
            Value::Object(map) => match &index {
                Value::Str(key) => map.borrow().get(key.as_ref()).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            other => return Err(RunError::NotIndexable(other.type_name())),
        };
        self.push(result)
    }
}

/// A non-negative integral number usable as an index.
fn integer_index(value: &Value) -> Option<usize> {
    match value {
        Value::Num(n) if n.is_finite() && n.fract() == 0.0 && *n >= 0.0 => Some(*n as usize),
        _ => None,
    }
}
