//! Reflection built-ins (`spec.md` §6, plus the methods/interfaces pair
//! `SPEC_FULL.md` supplements): inspecting a class's annotations, fields,
//! methods, and implemented interfaces, and constructing/inspecting
//! instances by name rather than through `new`.

use ahash::AHashMap;

use crate::{
    bytecode::vm::Vm,
    error::{ExcKind, RunError, RunResult},
    heap::{HeapData, Instance},
    namespace::{ClassId, Symbol},
    value::Value,
};

fn class_of(vm: &Vm, value: &Value) -> RunResult<ClassId> {
    match value {
        Value::Class(id) => Ok(*id),
        Value::Ref(id) => match vm.heap.lock().get(*id) {
            HeapData::Instance(inst) => Ok(inst.class),
            _ => Err(type_error()),
        },
        _ => Err(type_error()),
    }
}

fn type_error() -> RunError {
    RunError::thrown(Value::str(format!("expected a class or instance value ({})", ExcKind::TypeError)))
}

fn resolve_class_by_name(vm: &Vm, name: &str) -> RunResult<ClassId> {
    match vm.namespaces.resolve_use(name, "") {
        Ok(Symbol::Class(id)) => Ok(id),
        _ => Err(RunError::thrown(Value::str(format!("unknown class '{name}' ({})", ExcKind::TypeError)))),
    }
}

pub fn get_class_name(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let name = vm.interns.get(vm.namespaces.class(class_id).name);
    Ok(Value::str(name.to_string()))
}

pub fn get_class_annotations(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    annotations_to_map(vm, vm.namespaces.class(class_id).annotations.entries.clone())
}

pub fn get_class_fields(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let names: Vec<Value> = vm
        .namespaces
        .class(class_id)
        .fields
        .iter()
        .map(|f| Value::str(vm.interns.get(f.name).to_string()))
        .collect();
    let count = names.len();
    for name in names {
        vm.push(name)?;
    }
    vm.make_array(count)?;
    Ok(vm.stack.pop().expect("make_array leaves exactly one value"))
}

pub fn get_class_methods(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let names: Vec<Value> = vm
        .namespaces
        .class(class_id)
        .methods
        .keys()
        .map(|id| Value::str(vm.interns.get(*id).to_string()))
        .collect();
    let count = names.len();
    for name in names {
        vm.push(name)?;
    }
    vm.make_array(count)?;
    Ok(vm.stack.pop().expect("make_array leaves exactly one value"))
}

pub fn get_class_interfaces(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let names: Vec<Value> = vm
        .namespaces
        .class(class_id)
        .interfaces
        .iter()
        .map(|id| Value::str(vm.interns.get(vm.namespaces.interface(*id).name).to_string()))
        .collect();
    let count = names.len();
    for name in names {
        vm.push(name)?;
    }
    vm.make_array(count)?;
    Ok(vm.stack.pop().expect("make_array leaves exactly one value"))
}

pub fn get_field_annotation(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let (Value::Str(field), Value::Str(annotation)) = (&args[1], &args[2]) else {
        return Err(type_error());
    };
    let field_id = vm.interns.intern(field);
    let annotation_id = vm.interns.intern(annotation);
    Ok(vm
        .namespaces
        .class(class_id)
        .field_default(field_id)
        .and_then(|f| f.annotations.get(annotation_id))
        .cloned()
        .unwrap_or(Value::Null))
}

pub fn has_field_annotation(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let class_id = class_of(vm, &args[0])?;
    let (Value::Str(field), Value::Str(annotation)) = (&args[1], &args[2]) else {
        return Err(type_error());
    };
    let field_id = vm.interns.intern(field);
    let annotation_id = vm.interns.intern(annotation);
    let has = vm
        .namespaces
        .class(class_id)
        .field_default(field_id)
        .is_some_and(|f| f.annotations.has(annotation_id));
    Ok(Value::Bool(has))
}

pub fn new_instance(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Str(name) = &args[0] else { return Err(type_error()) };
    let class_id = resolve_class_by_name(vm, name)?;
    vm.construct(name, 0)?;
    let _ = class_id;
    Ok(vm.stack.pop().expect("construct leaves exactly one value"))
}

/// Like `new_instance` but skips running the constructor, leaving every
/// field at its declared default (`spec.md` §6 "create without invoking the
/// constructor").
pub fn create_instance(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Str(name) = &args[0] else { return Err(type_error()) };
    let class_id = resolve_class_by_name(vm, name)?;
    let mut fields = AHashMap::default();
    for field in &vm.namespaces.class(class_id).fields {
        if !field.is_static {
            fields.insert(field.name, field.default.clone());
        }
    }
    Ok(vm.heap.lock().alloc(HeapData::Instance(Instance { class: class_id, fields })))
}

pub fn get_field_value(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Ref(id) = &args[0] else { return Err(type_error()) };
    let Value::Str(field) = &args[1] else { return Err(type_error()) };
    let field_id = vm.interns.intern(field);
    match vm.heap.lock().get(*id) {
        HeapData::Instance(inst) => Ok(inst.fields.get(&field_id).cloned().unwrap_or(Value::Null)),
        _ => Err(type_error()),
    }
}

pub fn set_field_value(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Ref(id) = &args[0] else { return Err(type_error()) };
    let Value::Str(field) = &args[1] else { return Err(type_error()) };
    let field_id = vm.interns.intern(field);
    let value = args[2].clone();
    let mut heap = vm.heap.lock();
    heap.retain_value(&value);
    let old = match heap.get_mut(*id) {
        HeapData::Instance(inst) => inst.fields.insert(field_id, value),
        _ => return Err(type_error()),
    };
    if let Some(old) = old {
        heap.release_value(&old);
    }
    Ok(Value::Null)
}

fn annotations_to_map(vm: &mut Vm, entries: AHashMap<crate::intern::StringId, Value>) -> RunResult<Value> {
    let mut count = 0usize;
    for (name, value) in &entries {
        vm.push(Value::str(vm.interns.get(*name).to_string()))?;
        vm.push(value.clone())?;
        count += 1;
    }
    vm.make_map(count)?;
    Ok(vm.stack.pop().expect("make_map leaves exactly one value"))
}
