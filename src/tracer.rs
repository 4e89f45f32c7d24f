//! Execution hooks for debugging/observability tooling built on top of the
//! VM (`spec.md` §7's ambient diagnostics surface).
//!
//! Grounded on the teacher's `tracer.rs` `VmTracer` trait, scaled to the
//! three events this VM's calling convention and exception model actually
//! produce: calls, throws, and goroutine spawns.

use crate::value::Value;

pub trait Tracer: Send {
    fn on_call(&mut self, function_name: &str) {
        let _ = function_name;
    }

    fn on_throw(&mut self, exception: &Value) {
        let _ = exception;
    }

    fn on_spawn(&mut self, goroutine_id: u64) {
        let _ = goroutine_id;
    }
}

#[derive(Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub calls: Vec<String>,
    pub throws: Vec<String>,
    pub spawns: Vec<u64>,
}

impl Tracer for RecordingTracer {
    fn on_call(&mut self, function_name: &str) {
        self.calls.push(function_name.to_string());
    }

    fn on_throw(&mut self, exception: &Value) {
        self.throws.push(exception.to_string());
    }

    fn on_spawn(&mut self, goroutine_id: u64) {
        self.spawns.push(goroutine_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_calls() {
        let mut t = RecordingTracer::default();
        t.on_call("main");
        t.on_spawn(7);
        assert_eq!(t.calls, vec!["main".to_string()]);
        assert_eq!(t.spawns, vec![7]);
    }
}
