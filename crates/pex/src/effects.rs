//! Effect handlers.
//!
//! [`Executor::run_with_handler`](crate::Executor::run_with_handler) calls
//! the handler once per performed effect, in execution order, and feeds the
//! returned value back into the program. Stock handlers cover the common
//! host postures; anything stateful is a closure or a custom impl.

use crate::value::Value;

/// What the host decided about one effect.
#[derive(Debug)]
pub enum EffectOutcome {
    /// Resume the program with this value as the effect's result.
    Resume(Value),
    /// Abandon the program; the driving run reports an unhandled effect.
    Abort,
}

/// Host-side interpreter for named effects.
pub trait EffectHandler {
    fn handle(&mut self, name: &str, args: Vec<Value>) -> EffectOutcome;
}

/// Adapts a closure into a handler: `handler_fn(|name, args| …)`.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(&str, Vec<Value>) -> EffectOutcome,
{
    FnHandler(f)
}

/// Closure-backed handler; build one with [`handler_fn`].
#[derive(Debug)]
pub struct FnHandler<F>(F);

impl<F> EffectHandler for FnHandler<F>
where
    F: FnMut(&str, Vec<Value>) -> EffectOutcome,
{
    fn handle(&mut self, name: &str, args: Vec<Value>) -> EffectOutcome {
        (self.0)(name, args)
    }
}

/// The default posture: every effect is an error.
#[derive(Debug, Default)]
pub struct RejectEffects;

impl EffectHandler for RejectEffects {
    fn handle(&mut self, _name: &str, _args: Vec<Value>) -> EffectOutcome {
        EffectOutcome::Abort
    }
}

/// Accepts every effect and resumes with null. Useful for programs whose
/// effects are fire-and-forget.
#[derive(Debug, Default)]
pub struct NullEffects;

impl EffectHandler for NullEffects {
    fn handle(&mut self, _name: &str, _args: Vec<Value>) -> EffectOutcome {
        EffectOutcome::Resume(Value::Null)
    }
}

/// Test and audit helper: records every effect and resumes with scripted
/// replies (null once the script runs out).
#[derive(Debug, Default)]
pub struct RecordingEffects {
    /// `(name, args)` per effect, in execution order.
    pub calls: Vec<(String, Vec<Value>)>,
    /// Replies consumed front-to-back.
    pub replies: std::collections::VecDeque<Value>,
}

impl RecordingEffects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that answers effects with `replies` in order.
    #[must_use]
    pub fn with_replies(replies: impl IntoIterator<Item = Value>) -> Self {
        Self {
            calls: Vec::new(),
            replies: replies.into_iter().collect(),
        }
    }

    /// Just the effect names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.calls.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl EffectHandler for RecordingEffects {
    fn handle(&mut self, name: &str, args: Vec<Value>) -> EffectOutcome {
        self.calls.push((name.to_owned(), args));
        EffectOutcome::Resume(self.replies.pop_front().unwrap_or(Value::Null))
    }
}
