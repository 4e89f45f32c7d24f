//! Built-in callable dispatch for the tree-walking evaluator.
//!
//! `crate::builtins::call` is written against `&mut bytecode::vm::Vm`
//! specifically (its signature threads VM-only state like the operand
//! stack), so this module duplicates the dispatch shape — same `BuiltinId`
//! registry, same per-builtin semantics — against `&mut Evaluator` instead.
//! Every arm here must stay behaviorally identical to its `builtins::`
//! counterpart (`spec.md` §2's parity requirement covers builtins too, not
//! just user code).

use crate::{
    builtins::BuiltinId,
    error::{ExcKind, RunError, RunResult},
    heap::{HeapData, Instance},
    value::Value,
};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(crate) fn call_builtin(&mut self, id: BuiltinId, args: Vec<Value>) -> RunResult<Value> {
        match id {
            BuiltinId::FmtPrint => {
                for arg in &args {
                    let text = self.display_value(arg);
                    self.printer.write_str(&text);
                }
                Ok(Value::Null)
            }
            BuiltinId::FmtPrintln => {
                let parts: Vec<String> = args.iter().map(|a| self.display_value(a)).collect();
                self.printer.write_line(&parts.join(" "));
                Ok(Value::Null)
            }
            BuiltinId::FmtPrintf => self.printf(&args),
            BuiltinId::Len => self.len(&args),
            BuiltinId::Isset => Ok(Value::Bool(!matches!(args[0], Value::Null))),
            BuiltinId::ParseInt => {
                let Value::Str(s) = &args[0] else { return Err(self.vm_type_error("string")) };
                Ok(s.trim().parse::<i64>().map_or(Value::Null, Value::Int))
            }
            BuiltinId::ParseFloat => {
                let Value::Str(s) = &args[0] else { return Err(self.vm_type_error("string")) };
                Ok(s.trim().parse::<f64>().map_or(Value::Null, Value::Float))
            }
            BuiltinId::ToString => Ok(Value::str(self.display_value(&args[0]))),
            BuiltinId::TypeOf => self.type_of(&args),
            BuiltinId::Sleep => {
                let millis = match &args[0] {
                    Value::Int(i) => (*i).max(0) as u64,
                    Value::Float(f) => f.max(0.0) as u64,
                    _ => return Err(self.vm_type_error("number")),
                };
                std::thread::sleep(std::time::Duration::from_millis(millis));
                Ok(Value::Null)
            }
            BuiltinId::GetClassAnnotations => {
                let class_id = self.class_of(&args[0])?;
                let entries = self.namespaces.class(class_id).annotations.entries.clone();
                let mut pairs = Vec::with_capacity(entries.len());
                for (name, value) in entries {
                    pairs.push((Value::str(self.interns.get(name).to_string()), value));
                }
                Ok(self.make_map(pairs))
            }
            BuiltinId::GetClassFields => {
                let class_id = self.class_of(&args[0])?;
                let names: Vec<Value> = self
                    .namespaces
                    .class(class_id)
                    .fields
                    .iter()
                    .map(|f| Value::str(self.interns.get(f.name).to_string()))
                    .collect();
                Ok(self.make_array(names))
            }
            BuiltinId::GetClassMethods => {
                let class_id = self.class_of(&args[0])?;
                let names: Vec<Value> = self
                    .namespaces
                    .class(class_id)
                    .methods
                    .keys()
                    .map(|id| Value::str(self.interns.get(*id).to_string()))
                    .collect();
                Ok(self.make_array(names))
            }
            BuiltinId::GetClassInterfaces => {
                let class_id = self.class_of(&args[0])?;
                let names: Vec<Value> = self
                    .namespaces
                    .class(class_id)
                    .interfaces
                    .iter()
                    .map(|id| Value::str(self.interns.get(self.namespaces.interface(*id).name).to_string()))
                    .collect();
                Ok(self.make_array(names))
            }
            BuiltinId::GetFieldAnnotation => {
                let class_id = self.class_of(&args[0])?;
                let (Value::Str(field), Value::Str(annotation)) = (&args[1], &args[2]) else {
                    return Err(self.vm_type_error("string"));
                };
                let field_id = self.interns.intern(field);
                let annotation_id = self.interns.intern(annotation);
                Ok(self
                    .namespaces
                    .class(class_id)
                    .field_default(field_id)
                    .and_then(|f| f.annotations.get(annotation_id))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            BuiltinId::HasFieldAnnotation => {
                let class_id = self.class_of(&args[0])?;
                let (Value::Str(field), Value::Str(annotation)) = (&args[1], &args[2]) else {
                    return Err(self.vm_type_error("string"));
                };
                let field_id = self.interns.intern(field);
                let annotation_id = self.interns.intern(annotation);
                let has = self.namespaces.class(class_id).field_default(field_id).is_some_and(|f| f.annotations.has(annotation_id));
                Ok(Value::Bool(has))
            }
            BuiltinId::NewInstance => {
                let Value::Str(name) = &args[0] else { return Err(self.vm_type_error("string")) };
                let name = name.to_string();
                self.eval_new(&name, Vec::new())
            }
            BuiltinId::CreateInstance => {
                let Value::Str(name) = &args[0] else { return Err(self.vm_type_error("string")) };
                let class_id = self.resolve_class(name)?;
                let mut fields = ahash::AHashMap::default();
                for field in &self.namespaces.class(class_id).fields {
                    if !field.is_static {
                        fields.insert(field.name, field.default.clone());
                    }
                }
                Ok(self.heap.lock().alloc(HeapData::Instance(Instance { class: class_id, fields })))
            }
            BuiltinId::GetFieldValue => {
                let Value::Ref(id) = &args[0] else { return Err(self.vm_type_error("instance")) };
                let Value::Str(field) = &args[1] else { return Err(self.vm_type_error("string")) };
                let field_id = self.interns.intern(field);
                match self.heap.lock().get(*id) {
                    HeapData::Instance(inst) => Ok(inst.fields.get(&field_id).cloned().unwrap_or(Value::Null)),
                    _ => Err(self.vm_type_error("instance")),
                }
            }
            BuiltinId::SetFieldValue => {
                let Value::Ref(id) = &args[0] else { return Err(self.vm_type_error("instance")) };
                let Value::Str(field) = &args[1] else { return Err(self.vm_type_error("string")) };
                let field_id = self.interns.intern(field);
                let value = args[2].clone();
                let mut heap = self.heap.lock();
                heap.retain_value(&value);
                let old = match heap.get_mut(*id) {
                    HeapData::Instance(inst) => inst.fields.insert(field_id, value),
                    _ => return Err(self.vm_type_error("instance")),
                };
                if let Some(old) = old {
                    heap.release_value(&old);
                }
                Ok(Value::Null)
            }
            BuiltinId::GetClassName => {
                let class_id = self.class_of(&args[0])?;
                Ok(Value::str(self.interns.get(self.namespaces.class(class_id).name).to_string()))
            }
            BuiltinId::SetGlobal => {
                let Value::Str(name) = &args[0] else { return Err(self.vm_type_error("string")) };
                self.globals.insert(name.to_string(), args[1].clone());
                Ok(Value::Null)
            }
            BuiltinId::GetGlobal => {
                let Value::Str(name) = &args[0] else { return Err(self.vm_type_error("string")) };
                Ok(self.globals.get(name.as_ref()).cloned().unwrap_or(Value::Null))
            }
            BuiltinId::HasGlobal => {
                let Value::Str(name) = &args[0] else { return Err(self.vm_type_error("string")) };
                Ok(Value::Bool(self.globals.contains_key(name.as_ref())))
            }
            BuiltinId::CalledClass => Ok(self.current_called_class().map_or(Value::Null, Value::Class)),
            BuiltinId::NewChannel => {
                let capacity = match args.first() {
                    Some(Value::Int(n)) => (*n).max(0) as usize,
                    _ => 0,
                };
                Ok(self.heap.lock().alloc(HeapData::Channel(crate::concurrency::GoroutineChannel::new(capacity))))
            }
            BuiltinId::NewMutex => Ok(self.heap.lock().alloc(HeapData::Mutex(crate::concurrency::GoMutex::new()))),
            BuiltinId::NewWaitGroup => Ok(self.heap.lock().alloc(HeapData::WaitGroup(crate::concurrency::GoWaitGroup::new()))),
            BuiltinId::NewAtomic => {
                let initial = match args.first() {
                    Some(Value::Int(n)) => *n,
                    _ => 0,
                };
                Ok(self.heap.lock().alloc(HeapData::Atomic(crate::concurrency::GoAtomic::new(initial))))
            }
        }
    }

    fn len(&mut self, args: &[Value]) -> RunResult<Value> {
        let n = match &args[0] {
            Value::Str(s) => s.chars().count(),
            Value::Ref(id) => match self.heap.lock().get(*id) {
                HeapData::Array(items) => items.len(),
                HeapData::Map(map) => map.len(),
                _ => return Err(self.vm_type_error("array, map, or string")),
            },
            _ => return Err(self.vm_type_error("array, map, or string")),
        };
        Ok(Value::Int(n as i64))
    }

    fn type_of(&mut self, args: &[Value]) -> RunResult<Value> {
        let value = &args[0];
        let name = match value.immediate_type_name() {
            Some(n) => n.to_string(),
            None => {
                let Value::Ref(id) = value else { unreachable!("immediate_type_name only returns None for Ref") };
                self.heap.lock().get(*id).type_name().to_string()
            }
        };
        Ok(Value::str(name))
    }

    fn printf(&mut self, args: &[Value]) -> RunResult<Value> {
        let Some(Value::Str(format)) = args.first() else {
            return Err(RunError::thrown(Value::str("printf requires a format string")));
        };
        let format = format.clone();
        let mut rest = args[1..].iter();
        let mut out = String::new();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.next() {
                    Some('%') => out.push('%'),
                    Some('v' | 'd' | 's' | 'f') => {
                        if let Some(arg) = rest.next() {
                            let text = self.display_value(arg);
                            out.push_str(&text);
                        }
                    }
                    Some(other) => {
                        out.push('%');
                        out.push(other);
                    }
                    None => out.push('%'),
                }
            } else {
                out.push(c);
            }
        }
        self.printer.write_str(&out);
        Ok(Value::Null)
    }

    /// Mirrors `crate::builtins::to_string_value`.
    pub(crate) fn display_value(&mut self, value: &Value) -> String {
        let Value::Ref(id) = value else { return value.to_string() };
        let heap = self.heap.lock();
        match heap.get(*id) {
            HeapData::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                format!("[{}]", parts.join(", "))
            }
            HeapData::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                format!("{{{}}}", parts.join(", "))
            }
            HeapData::Instance(inst) => format!("<instance of {}>", self.interns.get(self.namespaces.class(inst.class).name)),
            other => format!("<{}>", other.type_name()),
        }
    }

    fn class_of(&mut self, value: &Value) -> RunResult<crate::namespace::ClassId> {
        match value {
            Value::Class(id) => Ok(*id),
            Value::Ref(id) => match self.heap.lock().get(*id) {
                HeapData::Instance(inst) => Ok(inst.class),
                _ => Err(self.vm_type_error("class or instance")),
            },
            _ => Err(self.vm_type_error("class or instance")),
        }
    }

    fn vm_type_error(&self, expected: &str) -> RunError {
        RunError::thrown(Value::str(format!("expected a {expected} value ({})", ExcKind::TypeError)))
    }
}
