//! Property access, static member access, and `instanceof` (`spec.md` §4.2,
//! §4.5). Grounded on `ouros/src/types/class.rs`'s single-parent class model.

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::HeapData,
    namespace::Symbol,
    value::Value,
};

use super::Vm;

impl<'a> Vm<'a> {
    pub fn get_property(&mut self, name: &str) -> RunResult<()> {
        let target = self.pop();
        let name_id = self.interns.intern(name);
        let value = match target {
            Value::Ref(id) => {
                let heap = self.heap.lock();
                match heap.get(id) {
                    HeapData::Instance(inst) => inst.fields.get(&name_id).cloned().ok_or_else(|| self.no_such_field(name))?,
                    HeapData::EnumMember(member) => member.fields.get(&name_id).cloned().ok_or_else(|| self.no_such_field(name))?,
                    _ => return Err(self.type_error("instance")),
                }
            }
            Value::Null => return Err(RunError::thrown(Value::str(format!("null pointer access of '{name}' ({})", ExcKind::NullPointerException)))),
            _ => return Err(self.type_error("instance")),
        };
        self.push(value)
    }

    pub fn set_property(&mut self, name: &str) -> RunResult<()> {
        let value = self.pop();
        let target = self.pop();
        let name_id = self.interns.intern(name);
        let Value::Ref(id) = target else {
            return Err(self.type_error("instance"));
        };
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

    pub fn get_static_property(&mut self, class_path: &str, name: &str) -> RunResult<()> {
        let class_id = self.resolve_class(class_path)?;
        let name_id = self.interns.intern(name);
        let value = self
            .namespaces
            .class(class_id)
            .static_fields
            .get(&name_id)
            .cloned()
            .ok_or_else(|| self.no_such_field(name))?;
        self.push(value)
    }

    pub fn set_static_property(&mut self, class_path: &str, name: &str) -> RunResult<()> {
        let value = self.pop();
        let class_id = self.resolve_class(class_path)?;
        let name_id = self.interns.intern(name);
        self.namespaces.class_mut(class_id).static_fields.insert(name_id, value);
        Ok(())
    }

    pub fn instance_of(&mut self, type_path: &str) -> RunResult<()> {
        let value = self.pop();
        let result = match value {
            Value::Ref(id) => {
                let class_id = match self.heap.lock().get(id) {
                    HeapData::Instance(inst) => Some(inst.class),
                    _ => None,
                };
                match class_id {
                    Some(class_id) => self.class_matches(class_id, type_path),
                    None => false,
                }
            }
            _ => false,
        };
        self.push(Value::Bool(result))
    }

    /// `x as T` / `x as? T` (`spec.md` §8): succeeds iff `x instanceof T`.
    /// `safe` makes a failed assertion yield `null` instead of raising.
    pub fn type_assert(&mut self, type_path: &str, safe: bool) -> RunResult<()> {
        let value = self.pop();
        let matches = match &value {
            Value::Ref(id) => match self.heap.lock().get(*id) {
                HeapData::Instance(inst) => self.class_matches(inst.class, type_path),
                _ => false,
            },
            _ => false,
        };
        if matches {
            self.push(value)
        } else if safe {
            self.push(Value::Null)
        } else {
            Err(RunError::thrown(Value::str(format!("failed type assertion to '{type_path}' ({})", ExcKind::TypeError))))
        }
    }

    fn class_matches(&self, mut class_id: crate::namespace::ClassId, type_path: &str) -> bool {
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

    fn interface_matches(&self, iface_id: crate::namespace::InterfaceId, type_path: &str) -> bool {
        let iface = self.namespaces.interface(iface_id);
        let name = self.interns.get(iface.name);
        if name == type_path {
            return true;
        }
        iface.extends.iter().any(|ext| self.interface_matches(*ext, type_path))
    }

    fn resolve_class(&self, class_path: &str) -> RunResult<crate::namespace::ClassId> {
        match self.namespaces.resolve_use(class_path, "") {
            Ok(Symbol::Class(id)) => Ok(id),
            _ => Err(RunError::thrown(Value::str(format!("unknown class '{class_path}' ({})", ExcKind::TypeError)))),
        }
    }

    fn no_such_field(&self, name: &str) -> RunError {
        RunError::thrown(Value::str(format!("no such field '{name}' ({})", ExcKind::RuntimeException)))
    }
}
