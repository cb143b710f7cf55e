//! One-shot continuations.

use tracing::trace;

use super::{Machine, RunError, RunProgress};
use crate::value::Value;

/// A suspended execution, resumable exactly once.
///
/// The continuation owns the captured machine — frame stack, operand stack
/// and open-upvalue map — so its control state cannot be disturbed from
/// outside; arrays, objects, closures and upvalues inside it stay
/// reference-shared with any values the host already holds. Dropping a
/// continuation without resuming abandons the program.
#[derive(Debug)]
pub struct Continuation {
    machine: Option<Machine>,
}

impl Continuation {
    pub(crate) fn new(machine: Machine) -> Self {
        Self {
            machine: Some(machine),
        }
    }

    /// Continues execution with `value` as the effect's result.
    ///
    /// Returns the next progress point: completion, or another effect
    /// suspension. A second `resume` fails with
    /// [`RunError::ContinuationConsumed`].
    pub fn resume(&mut self, value: Value) -> Result<RunProgress, RunError> {
        let mut machine = self.machine.take().ok_or(RunError::ContinuationConsumed)?;
        trace!("resuming suspended program");
        machine.push(value)?;
        machine.run_to_progress()
    }

    /// Whether [`Continuation::resume`] has already been called.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.machine.is_none()
    }
}
