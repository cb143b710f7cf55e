//! Arithmetic and comparison helpers for the dispatch loop.
//!
//! Arithmetic and ordered comparisons coerce both operands to number
//! (booleans to 0/1, strings parsed with NaN on failure, null to 0, other
//! types NaN). Equality is deep and never coerces.

use super::{Machine, RunError};
use crate::bytecode::Opcode;
use crate::value::Value;

impl Machine {
    /// `ADD SUB MUL DIV MOD` — numeric with coercion. Division or modulo by
    /// zero is fatal rather than a silent NaN.
    pub(super) fn arithmetic(&mut self, op: Opcode) -> Result<(), RunError> {
        let rhs = self.pop()?.as_number();
        let lhs = self.pop()?.as_number();
        let result = match op {
            Opcode::Add => lhs + rhs,
            Opcode::Sub => lhs - rhs,
            Opcode::Mul => lhs * rhs,
            Opcode::Div => {
                if rhs == 0.0 {
                    return Err(RunError::DivisionByZero);
                }
                lhs / rhs
            }
            Opcode::Mod => {
                if rhs == 0.0 {
                    return Err(RunError::DivisionByZero);
                }
                lhs % rhs
            }
            _ => unreachable!("arithmetic called with {op}"),
        };
        self.push(Value::Num(result))
    }

    /// `EQ NE` — deep structural equality, no coercion.
    pub(super) fn equality(&mut self, op: Opcode) -> Result<(), RunError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let equal = lhs.deep_eq(&rhs);
        self.push(Value::Bool(if op == Opcode::Eq { equal } else { !equal }))
    }

    /// `LT GT LE GE` — coerce to number and compare; any NaN operand makes
    /// the comparison false.
    pub(super) fn ordered(&mut self, op: Opcode) -> Result<(), RunError> {
        let rhs = self.pop()?.as_number();
        let lhs = self.pop()?.as_number();
        let result = match lhs.partial_cmp(&rhs) {
            None => false,
            Some(ordering) => match op {
                Opcode::Lt => ordering.is_lt(),
                Opcode::Gt => ordering.is_gt(),
                Opcode::Le => ordering.is_le(),
                Opcode::Ge => ordering.is_ge(),
                _ => unreachable!("ordered called with {op}"),
            },
        };
        self.push(Value::Bool(result))
    }
}
