//! Calling conventions (`spec.md` §4.5): plain calls, method calls (with
//! `this` bound in the callee's environment), and `new` (which always
//! returns the freshly allocated instance regardless of what the
//! constructor body computes), mirroring `bytecode::vm::call`.

use std::sync::Arc;

use crate::{
    ast,
    environment::Environment,
    error::{ExcKind, RunError, RunResult},
    heap::{BoundReceiver, HeapData, Instance, TreeClosure},
    namespace::{ClassId, Symbol},
    types::{Function, Param, Signature, UpvalueDescriptor},
    value::Value,
};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(super) fn eval_call(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        match callee {
            Value::Ref(id) => {
                let (function, env, this, called_class) = match self.heap.lock().get(id) {
                    HeapData::TreeClosure(c) => (c.function.clone(), c.env.clone(), c.this.clone(), c.called_class),
                    HeapData::BoundMethod(bound) => {
                        let (env, this, called_class) = self.bound_receiver_context(&bound.receiver)?;
                        (bound.method.clone(), env, this, called_class)
                    }
                    _ => return Err(self.type_error("function")),
                };
                self.call_function(&function, env, this, called_class, args)
            }
            Value::Builtin(id) => self.call_builtin(id, args),
            _ => Err(self.type_error("function")),
        }
    }

    fn bound_receiver_context(&mut self, receiver: &BoundReceiver) -> RunResult<(Environment, Option<Value>, Option<ClassId>)> {
        match receiver {
            BoundReceiver::Instance(id) => {
                let class = match self.heap.lock().get(*id) {
                    HeapData::Instance(inst) => inst.class,
                    _ => return Err(self.type_error("instance")),
                };
                Ok((Environment::root(), Some(Value::Ref(*id)), Some(class)))
            }
            BoundReceiver::ClassStatic(class) => Ok((Environment::root(), Some(Value::Class(*class)), Some(*class))),
        }
    }

    /// `target.method(args)`: a field holding a closure is called directly
    /// (`obj.cb()`), otherwise the method is resolved through the runtime
    /// class's inheritance chain. Falls through to the shared builtin-method
    /// table for string/array/map/enum/channel/mutex/waitgroup/atomic
    /// receivers, which have no `Instance` to resolve a method against.
    pub(super) fn eval_method_call(&mut self, target: Value, name: &str, args: Vec<Value>) -> RunResult<Value> {
        let id = match &target {
            Value::Ref(id) if matches!(self.heap.lock().get(*id), HeapData::Instance(_)) => *id,
            _ => return self.eval_builtin_method(target, name, args),
        };
        let (class_id, field_shortcut) = match self.heap.lock().get(id) {
            HeapData::Instance(inst) => {
                let name_id = self.interns.intern(name);
                (inst.class, inst.fields.get(&name_id).cloned())
            }
            _ => return Err(self.type_error("instance")),
        };
        if let Some(value) = field_shortcut {
            return self.eval_call(value, args);
        }
        let method_name = self.interns.intern(name);
        let method = self
            .namespaces
            .class(class_id)
            .resolve_method(method_name, &|c| self.namespaces.class(c))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        self.call_function(&method, Environment::root(), Some(Value::Ref(id)), Some(class_id), args)
    }

    fn eval_builtin_method(&mut self, target: Value, name: &str, args: Vec<Value>) -> RunResult<Value> {
        let heap = self.heap.clone();
        let mut call_back = |callee: Value, args: Vec<Value>| self.eval_call(callee, args);
        crate::builtins::methods::dispatch(&heap, &target, name, args, &mut call_back).unwrap_or_else(|| Err(self.type_error("instance")))
    }

    pub(super) fn eval_static_call(&mut self, class_path: &str, name: &str, args: Vec<Value>, via_static_binding: bool) -> RunResult<Value> {
        let class_id = if via_static_binding {
            self.current_called_class().ok_or_else(|| self.no_such_method(name))?
        } else {
            self.resolve_class(class_path)?
        };
        let method_name = self.interns.intern(name);
        let method = self
            .namespaces
            .class(class_id)
            .resolve_method(method_name, &|c| self.namespaces.class(c))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        let this = if method.is_static { None } else { Some(Value::Class(class_id)) };
        self.call_function(&method, Environment::root(), this, Some(class_id), args)
    }

    /// `super.method(args)`, resolved starting from the parent of the
    /// currently executing method's declaring class.
    pub(super) fn eval_super(&mut self, name: &str, args: Vec<Value>, this: Option<Value>) -> RunResult<Value> {
        let called_class = self.current_called_class().ok_or_else(|| self.no_such_method(name))?;
        let parent = self.namespaces.class(called_class).parent.ok_or_else(|| self.no_such_method(name))?;
        let method_name = self.interns.intern(name);
        let method = self
            .namespaces
            .class(parent)
            .resolve_method(method_name, &|c| self.namespaces.class(c))
            .cloned()
            .ok_or_else(|| self.no_such_method(name))?;
        self.call_function(&method, Environment::root(), this, Some(parent), args)
    }

    /// `new Class(args)`.
    pub(super) fn eval_new(&mut self, class_path: &str, args: Vec<Value>) -> RunResult<Value> {
        let class_id = self
            .namespaces
            .resolve_use(class_path, "")
            .ok()
            .and_then(|s| match s {
                Symbol::Class(id) => Some(id),
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
        let ctor_name = self.interns.intern("construct");
        if let Some(ctor) = self.namespaces.class(class_id).resolve_method(ctor_name, &|c| self.namespaces.class(c)).cloned() {
            self.call_function(&ctor, Environment::root(), Some(Value::Ref(id)), Some(class_id), args)?;
        }
        Ok(Value::Ref(id))
    }

    /// Builds a closure value capturing `env` by reference (`spec.md`
    /// §4.1/§4.7). Default-argument expressions are evaluated once, at
    /// closure-creation time, against the capturing environment — the
    /// compiled `Function` shared with the bytecode backend only carries
    /// pre-resolved `Value` defaults, never an unevaluated expression.
    pub(super) fn eval_closure(&mut self, params: &[ast::Param], body: &Arc<ast::Block>, captures_this: bool, env: &Environment) -> RunResult<Value> {
        let mut sig_params = Vec::with_capacity(params.len());
        for param in params {
            let default = match &param.default {
                Some(expr) => Some(self.eval_expr(expr, env)?),
                None => None,
            };
            sig_params.push(Param { name: param.name, default, variadic: param.variadic });
        }
        let function = Arc::new(Function {
            name: self.interns.intern("<closure>"),
            signature: Signature { params: sig_params },
            upvalue_descriptors: Vec::<UpvalueDescriptor>::new(),
            code: crate::bytecode::code::Code::default(),
            body: body.clone(),
            is_static: false,
        });
        let this = if captures_this { env.get("this") } else { None };
        let closure = TreeClosure { function, env: env.clone(), this, called_class: self.current_called_class() };
        Ok(self.heap.lock().alloc(HeapData::TreeClosure(closure)))
    }

    fn no_such_method(&self, name: &str) -> RunError {
        RunError::thrown(Value::str(format!("no such method '{name}' ({})", ExcKind::RuntimeException)))
    }
}
