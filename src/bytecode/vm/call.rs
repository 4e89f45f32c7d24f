//! Calling conventions (`spec.md` §4.5): plain calls, method invokes (with
//! the receiver bound at the call frame's base slot as `this`), and
//! constructor calls (which always return the freshly allocated instance
//! regardless of what the constructor body returns).
//!
//! Grounded on `ouros/src/bytecode/vm/call.rs`'s frame-setup shape.

use std::sync::Arc;

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::{BoundReceiver, Closure, HeapData, Instance},
    value::Value,
};

use super::{CallFrame, Vm};

impl<'a> Vm<'a> {
    /// `Op::Call`: the callee and `argc` arguments are already on the stack,
    /// callee first.
    pub fn call(&mut self, argc: usize) -> RunResult<()> {
        let callee = self.peek(argc).clone();
        self.call_value(callee, argc)
    }

    fn call_value(&mut self, callee: Value, argc: usize) -> RunResult<()> {
        match callee {
            Value::Ref(id) => {
                enum Callable {
                    Closure(Arc<Closure>),
                    Bound(Value, Value),
                    NotCallable,
                }
                let callable = match self.heap.lock().get(id) {
                    HeapData::Closure(c) => Callable::Closure(Arc::new(Closure { function: c.function.clone(), upvalues: c.upvalues.clone() })),
                    HeapData::BoundMethod(bound) => Callable::Bound(bound.receiver.clone(), bound.method.clone()),
                    _ => Callable::NotCallable,
                };
                match callable {
                    Callable::Closure(closure) => self.push_call_frame(closure, argc, None),
                    Callable::Bound(receiver, method) => self.call_bound_method(receiver, method, argc),
                    Callable::NotCallable => Err(self.type_error("function")),
                }
            }
            Value::Builtin(id) => self.call_builtin(id, argc),
            _ => Err(self.type_error("function")),
        }
    }

    fn call_bound_method(&mut self, receiver: BoundReceiver, method: Arc<crate::types::Function>, argc: usize) -> RunResult<()> {
        let closure = Arc::new(Closure { function: method, upvalues: Vec::new() });
        let called_class = match receiver {
            BoundReceiver::Instance(id) => {
                let class = match self.heap.lock().get(id) {
                    HeapData::Instance(inst) => inst.class,
                    _ => return Err(self.type_error("instance")),
                };
                let this = Value::Ref(id);
                self.insert_receiver(this, argc);
                Some(class)
            }
            BoundReceiver::ClassStatic(class) => {
                self.insert_receiver(Value::Class(class), argc);
                Some(class)
            }
        };
        self.push_call_frame(closure, argc, called_class)
    }

    /// `Op::Invoke`: fast path for `target.method(args)` that skips
    /// materializing an intermediate `BoundMethod` value when the target is
    /// a plain instance. Falls through to the shared builtin-method table for
    /// string/array/map/enum/channel/mutex/waitgroup/atomic receivers, which
    /// have no `Instance` backing to resolve a method against.
    pub fn invoke(&mut self, name: &str, argc: usize) -> RunResult<()> {
        let receiver = self.peek(argc).clone();
        let id = match &receiver {
            Value::Ref(id) if matches!(self.heap.lock().get(*id), HeapData::Instance(_)) => *id,
            _ => return self.invoke_builtin_method(receiver, name, argc),
        };
        let (class_id, field_shortcut) = match self.heap.lock().get(id) {
            HeapData::Instance(inst) => (inst.class, inst.fields.get(&self.intern(name)).cloned()),
            _ => return Err(self.type_error("instance")),
        };
        if let Some(value) = field_shortcut {
            // A field holding a closure, invoked like `obj.cb()`.
            return self.call_value(value, argc);
        }
        let method_name = self.intern(name);
        let method = self
            .namespaces
            .class(class_id)
            .resolve_method(method_name, &|id| self.namespaces.class(id))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        let closure = Arc::new(Closure { function: method, upvalues: Vec::new() });
        self.push_call_frame(closure, argc, Some(class_id))
    }

    fn invoke_builtin_method(&mut self, receiver: Value, name: &str, argc: usize) -> RunResult<()> {
        let args: Vec<Value> = (0..argc).map(|i| self.peek(argc - 1 - i).clone()).collect();
        let heap = self.heap.clone();
        let mut call_back = |callee: Value, args: Vec<Value>| self.call_value_sync(callee, args);
        let result = crate::builtins::methods::dispatch(&heap, &receiver, name, args, &mut call_back).unwrap_or_else(|| Err(self.type_error("instance")))?;
        for _ in 0..=argc {
            self.pop();
        }
        self.push(result)
    }

    /// Runs `callee(args)` to completion and returns its value, re-entering
    /// the dispatch loop when `callee` is a user closure so a builtin method
    /// like `Mutex::with_lock` can invoke a `.long` callback mid-call.
    pub fn call_value_sync(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        let depth_before = self.frames.len();
        let argc = args.len();
        self.push(callee)?;
        for arg in args {
            self.push(arg)?;
        }
        self.call(argc)?;
        if self.frames.len() > depth_before {
            self.run()?;
        }
        Ok(self.pop())
    }

    /// `Class::method(args)` (`spec.md` §4.3/§4.5 `invoke-static`), distinct
    /// from `invoke` since there is no receiver on the stack to inspect —
    /// the target class comes from the instruction's own operand, or from
    /// the current frame's `called_class` for `self::`/`static::` calls.
    pub fn invoke_static(&mut self, class_path: &str, name: &str, argc: usize, via_static_binding: bool) -> RunResult<()> {
        let class_id = if via_static_binding {
            self.frame().called_class.ok_or_else(|| self.no_such_method(name))?
        } else {
            self.namespaces
                .resolve_use(class_path, "")
                .ok()
                .and_then(|s| match s {
                    crate::namespace::Symbol::Class(id) => Some(id),
                    _ => None,
                })
                .ok_or_else(|| RunError::thrown(Value::str(format!("unknown class '{class_path}' ({})", ExcKind::TypeError))))?
        };
        let method_name = self.intern(name);
        let method = self
            .namespaces
            .class(class_id)
            .resolve_method(method_name, &|id| self.namespaces.class(id))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        let closure = Arc::new(Closure { function: method, upvalues: Vec::new() });
        // `push_call_frame` always expects one slot ahead of `argc` arguments
        // (normally the callee/receiver); a static method ignores it, but the
        // frame's base-pointer arithmetic still needs it present.
        self.insert_receiver(Value::Class(class_id), argc);
        self.push_call_frame(closure, argc, Some(class_id))
    }

    /// `super.method(args)`: resolved starting from the *parent* of the
    /// currently executing method's declaring class, never from the
    /// instance's own runtime class, so calling a grandparent's override
    /// through two `super` hops lands on the right rung of the chain.
    pub fn super_invoke(&mut self, name: &str, argc: usize) -> RunResult<()> {
        let called_class = self.frame().called_class.ok_or_else(|| self.no_such_method(name))?;
        let parent = self.namespaces.class(called_class).parent.ok_or_else(|| self.no_such_method(name))?;
        let method_name = self.intern(name);
        let method = self
            .namespaces
            .class(parent)
            .resolve_method(method_name, &|id| self.namespaces.class(id))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        let closure = Arc::new(Closure { function: method, upvalues: Vec::new() });
        self.push_call_frame(closure, argc, Some(parent))
    }

    /// `new Class(args)`: always allocates the instance first and returns it,
    /// regardless of what (if anything) the constructor body computes
    /// (`spec.md` §4.5's constructor calling convention).
    pub fn construct(&mut self, class_path: &str, argc: usize) -> RunResult<()> {
        let class_id = self
            .namespaces
            .resolve_use(class_path, "")
            .ok()
            .and_then(|s| match s {
                crate::namespace::Symbol::Class(id) => Some(id),
                _ => None,
            })
            .ok_or_else(|| RunError::thrown(Value::str(format!("unknown class '{class_path}' ({})", ExcKind::TypeError))))?;
        let mut fields = ahash::AHashMap::default();
        for field in &self.namespaces.class(class_id).fields {
            if !field.is_static {
                fields.insert(field.name, field.default.clone());
            }
        }
        let instance = self.heap.lock().alloc(HeapData::Instance(Instance { class: class_id, fields }));
        let Value::Ref(id) = instance else { unreachable!("alloc always returns a Ref") };

        let ctor_name = self.intern("construct");
        if let Some(ctor) = self.namespaces.class(class_id).resolve_method(ctor_name, &|c| self.namespaces.class(c)).cloned() {
            let closure = Arc::new(Closure { function: ctor, upvalues: Vec::new() });
            // No callee slot was reserved for `new` (the compiler pushes
            // only the constructor arguments), so make room for `this` by
            // inserting it ahead of them rather than overwriting a slot.
            let insert_at = self.stack.len() - argc;
            self.stack.insert(insert_at, Value::Ref(id));
            self.push_call_frame(closure, argc, Some(class_id))?;
            // Constructor's own `Return` leaves its (discarded) result on
            // the stack; overwrite it with the actual instance.
            let top = self.stack.len() - 1;
            self.stack[top] = Value::Ref(id);
        } else {
            for _ in 0..argc {
                self.pop();
            }
            self.push(Value::Ref(id))?;
        }
        Ok(())
    }

    fn push_call_frame(&mut self, closure: Arc<Closure>, argc: usize, called_class: Option<crate::namespace::ClassId>) -> RunResult<()> {
        let required = closure.function.signature.required_count();
        let total_params = closure.function.signature.params.len();
        if argc < required {
            return Err(RunError::thrown(Value::str(format!(
                "too few arguments: expected at least {required}, got {argc} ({})",
                ExcKind::InvalidArgumentException
            ))));
        }
        let base = self.stack.len() - argc - 1;
        for i in argc..total_params {
            let default = closure.function.signature.params[i].default.clone().unwrap_or(Value::Null);
            self.push(default)?;
        }
        self.frames.push(CallFrame { closure, ip: 0, base, called_class });
        self.limits.check_frame_stack(self.frames.len()).map_err(RunError::Internal)?;
        self.tracer.on_call("<function>");
        Ok(())
    }

    /// No callee/receiver slot was reserved on the stack ahead of `argc`
    /// arguments; makes room for one by inserting rather than overwriting.
    fn insert_receiver(&mut self, receiver: Value, argc: usize) {
        let insert_at = self.stack.len() - argc;
        self.stack.insert(insert_at, receiver);
    }

    fn call_builtin(&mut self, id: crate::builtins::BuiltinId, argc: usize) -> RunResult<()> {
        let base = self.stack.len() - argc;
        let args: Vec<Value> = self.stack.drain(base..).collect();
        self.pop(); // the builtin callee value itself
        let result = crate::builtins::call(self, id, args)?;
        self.push(result)
    }

    fn intern(&mut self, name: &str) -> crate::intern::StringId {
        self.interns.intern(name)
    }

    fn no_such_method(&self, name: &str) -> RunError {
        RunError::thrown(Value::str(format!("no such method '{name}' ({})", ExcKind::RuntimeException)))
    }

    pub(super) fn type_error(&self, expected: &str) -> RunError {
        RunError::thrown(Value::str(format!("expected a {expected} value ({})", ExcKind::TypeError)))
    }
}
