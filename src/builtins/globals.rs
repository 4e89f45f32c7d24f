//! Free-standing built-ins (`spec.md` §6): `len`, `isset`, `parseInt`,
//! `parseFloat`, `toString`, `typeof`, `sleep`, and global-storage accessors.

use crate::{bytecode::vm::Vm, error::RunResult, heap::HeapData, value::Value};

pub fn len(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Ref(id) => match vm.heap.lock().get(*id) {
            HeapData::Array(items) => items.len(),
            HeapData::Map(map) => map.len(),
            _ => return Err(vm_type_error("array, map, or string")),
        },
        _ => return Err(vm_type_error("array, map, or string")),
    };
    Ok(Value::Int(n as i64))
}

pub fn isset(_vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(!matches!(args[0], Value::Null)))
}

pub fn parse_int(_vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let text = match &args[0] {
        Value::Str(s) => s.trim(),
        _ => return Err(vm_type_error("string")),
    };
    Ok(text.parse::<i64>().map_or(Value::Null, Value::Int))
}

pub fn parse_float(_vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let text = match &args[0] {
        Value::Str(s) => s.trim(),
        _ => return Err(vm_type_error("string")),
    };
    Ok(text.parse::<f64>().map_or(Value::Null, Value::Float))
}

pub fn to_string(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    Ok(Value::str(crate::builtins::to_string_value(vm, &args[0])))
}

pub fn type_of(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let value = &args[0];
    let name = match value.immediate_type_name() {
        Some(n) => n.to_string(),
        None => {
            let Value::Ref(id) = value else { unreachable!("immediate_type_name only returns None for Ref") };
            vm.heap.lock().get(*id).type_name().to_string()
        }
    };
    Ok(Value::str(name))
}

pub fn sleep(_vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let millis = match &args[0] {
        Value::Int(i) => (*i).max(0) as u64,
        Value::Float(f) => f.max(0.0) as u64,
        _ => return Err(vm_type_error("number")),
    };
    std::thread::sleep(std::time::Duration::from_millis(millis));
    Ok(Value::Null)
}

pub fn set_global(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Str(name) = &args[0] else { return Err(vm_type_error("string")) };
    vm.globals.insert(name.to_string(), args[1].clone());
    Ok(Value::Null)
}

pub fn get_global(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Str(name) = &args[0] else { return Err(vm_type_error("string")) };
    Ok(vm.globals.get(name.as_ref()).cloned().unwrap_or(Value::Null))
}

pub fn has_global(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let Value::Str(name) = &args[0] else { return Err(vm_type_error("string")) };
    Ok(Value::Bool(vm.globals.contains_key(name.as_ref())))
}

/// `__called_class()`: late static binding, reads the current frame's
/// resolved `self::`/`static::` target (`spec.md` §4.5).
pub fn called_class(vm: &mut Vm, _args: &[Value]) -> RunResult<Value> {
    Ok(vm.frames.last().and_then(|f| f.called_class).map_or(Value::Null, Value::Class))
}

fn vm_type_error(expected: &str) -> crate::error::RunError {
    crate::error::RunError::thrown(Value::str(format!(
        "expected a {expected} value ({})",
        crate::error::ExcKind::TypeError
    )))
}
