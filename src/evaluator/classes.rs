//! Property access, static member access, and `instanceof` (`spec.md`
//! §4.2, §4.5), mirroring `bytecode::vm::classes`'s semantics.

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::HeapData,
    namespace::{ClassId, InterfaceId, Symbol},
    value::Value,
};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(super) fn get_property(&mut self, target: Value, name: &str) -> RunResult<Value> {
        let name_id = self.interns.intern(name);
        match target {
            Value::Ref(id) => {
                let heap = self.heap.lock();
                match heap.get(id) {
                    HeapData::Instance(inst) => inst.fields.get(&name_id).cloned().ok_or_else(|| self.no_such_field(name)),
                    HeapData::EnumMember(member) => member.fields.get(&name_id).cloned().ok_or_else(|| self.no_such_field(name)),
                    _ => Err(self.type_error("instance")),
                }
            }
            Value::Null => Err(RunError::thrown(Value::str(format!("null pointer access of '{name}' ({})", ExcKind::NullPointerException)))),
            _ => Err(self.type_error("instance")),
        }
    }

    pub(super) fn set_property(&mut self, target: Value, name: &str, value: Value) -> RunResult<()> {
        let name_id = self.interns.intern(name);
        let Value::Ref(id) = target else { return Err(self.type_error("instance")) };
        let old = {
            let mut heap = self.heap.lock();
            match heap.get_mut(id) {
                HeapData::Instance(inst) => inst.fields.insert(name_id, value.clone()),
                _ => return Err(self.type_error("instance")),
            }
        };
        let mut heap = self.heap.lock();
        heap.retain_value(&value);
        if let Some(old) = old {
            heap.release_value(&old);
        }
        Ok(())
    }

    pub(super) fn get_static_property(&mut self, class_path: &str, name: &str) -> RunResult<Value> {
        let class_id = self.resolve_class(class_path)?;
        let name_id = self.interns.intern(name);
        self.namespaces.class(class_id).static_fields.get(&name_id).cloned().ok_or_else(|| self.no_such_field(name))
    }

    pub(super) fn set_static_property(&mut self, class_path: &str, name: &str, value: Value) -> RunResult<()> {
        let class_id = self.resolve_class(class_path)?;
        let name_id = self.interns.intern(name);
        self.namespaces.class_mut(class_id).static_fields.insert(name_id, value);
        Ok(())
    }

    pub(super) fn eval_instance_of(&mut self, value: Value, type_path: &str) -> bool {
        match value {
            Value::Ref(id) => {
                let class_id = match self.heap.lock().get(id) {
                    HeapData::Instance(inst) => Some(inst.class),
                    _ => None,
                };
                class_id.is_some_and(|class_id| self.class_matches(class_id, type_path))
            }
            _ => false,
        }
    }

    /// `x as T` / `x as? T` (`spec.md` §8): succeeds iff `x instanceof T`.
    /// `safe` makes a failed assertion yield `null` instead of raising.
    pub(super) fn eval_type_assert(&mut self, value: Value, type_path: &str, safe: bool) -> RunResult<Value> {
        if self.eval_instance_of(value.clone(), type_path) {
            Ok(value)
        } else if safe {
            Ok(Value::Null)
        } else {
            Err(RunError::thrown(Value::str(format!("failed type assertion to '{type_path}' ({})", ExcKind::TypeError))))
        }
    }

    fn class_matches(&self, mut class_id: ClassId, type_path: &str) -> bool {
        loop {
            let class = self.namespaces.class(class_id);
            let name = self.interns.get(class.name);
            if name == type_path || format!("{}.{}", self.interns.get(class.namespace), name) == type_path {
                return true;
            }
            if class.interfaces.iter().any(|iface| self.interface_matches(*iface, type_path)) {
                return true;
            }
            match class.parent {
                Some(parent) => class_id = parent,
                None => return false,
            }
        }
    }

    fn interface_matches(&self, iface_id: InterfaceId, type_path: &str) -> bool {
        let iface = self.namespaces.interface(iface_id);
        let name = self.interns.get(iface.name);
        if name == type_path {
            return true;
        }
        iface.extends.iter().any(|ext| self.interface_matches(*ext, type_path))
    }

    pub(super) fn resolve_class(&self, class_path: &str) -> RunResult<ClassId> {
        match self.namespaces.resolve_use(class_path, "") {
            Ok(Symbol::Class(id)) => Ok(id),
            _ => Err(RunError::thrown(Value::str(format!("unknown class '{class_path}' ({})", ExcKind::TypeError)))),
        }
    }

    fn no_such_field(&self, name: &str) -> RunError {
        RunError::thrown(Value::str(format!("no such field '{name}' ({})", ExcKind::RuntimeException)))
    }
}
