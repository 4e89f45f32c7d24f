//! Try-stack unwinding (`spec.md` §4.6).
//!
//! `PushTry`/`PopTry` (handled in `mod.rs`'s dispatch loop) maintain the
//! try-stack; this module does the other half — when a `RunError::Thrown`
//! reaches the dispatch loop, `unwind_to_try` walks the try-stack looking
//! for a handler whose owning frame is still live, discarding stale entries
//! left behind by frames that already returned normally past their own
//! `PopTry`.

use crate::{error::RunResult, value::Value};

use super::Vm;

impl<'a> Vm<'a> {
    /// Attempts to resume execution at the nearest live try-handler.
    /// Returns `Ok(true)` if a handler was found and the VM should keep
    /// running, `Ok(false)` if the exception is uncaught and should
    /// propagate out of `run`.
    pub(super) fn unwind_to_try(&mut self, exception: Value) -> RunResult<bool> {
        while let Some(entry) = self.try_stack.last() {
            if entry.frame_index >= self.frames.len() {
                self.try_stack.pop();
                continue;
            }
            let entry_frame_index = entry.frame_index;
            let catch_ip = entry.catch_ip;
            let stack_depth = entry.stack_depth;
            self.try_stack.pop();
            self.frames.truncate(entry_frame_index + 1);
            self.stack.truncate(stack_depth);
            self.frames.last_mut().expect("truncated to at least one frame above").ip = catch_ip;
            self.push(exception)?;
            return Ok(true);
        }
        Ok(false)
    }
}
