//! Method dispatch for the non-instance `BoundMethod` receivers `spec.md`
//! §3.1 lists alongside user instance methods: string, array, map, and the
//! channel/mutex/waitgroup/atomic concurrency primitives (§4.8).
//!
//! Both back-ends resolve `target.method(args)` against a real instance
//! first (`vm::call::invoke`, `evaluator::call::eval_method_call`); when the
//! receiver isn't an `Instance`, they fall through to `dispatch` here rather
//! than raising immediately. `invoke` lets a caller (`Mutex::with_lock`,
//! `Atomic::update`) run a `.long` callback value without this module
//! depending on either back-end's calling convention.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    concurrency::{self, SharedHeap},
    error::{ExcKind, RunError, RunResult},
    heap::HeapData,
    value::Value,
};

pub type Invoke<'a> = dyn FnMut(Value, Vec<Value>) -> RunResult<Value> + 'a;

/// Returns `None` when `receiver` isn't a kind this module handles, so the
/// caller can fall back to its own "no such method" / `type_error`.
pub fn dispatch(heap: &SharedHeap, receiver: &Value, name: &str, args: Vec<Value>, invoke: &mut Invoke<'_>) -> Option<RunResult<Value>> {
    match receiver {
        Value::Str(s) if name == "split" => Some(string_split(heap, s, &args)),
        Value::Str(s) => Some(string_method(s, name, &args)),
        Value::Ref(id) => {
            let kind = { heap.lock().get(*id).type_name() };
            match kind {
                "array" => Some(array_method(heap, *id, name, args)),
                "map" => Some(map_method(heap, *id, name, args)),
                "channel" => Some(channel_method(heap, receiver, name, &args)),
                "mutex" => Some(mutex_method(heap, receiver, name, args, invoke)),
                "waitgroup" => Some(waitgroup_method(heap, receiver, name, &args)),
                "atomic" => Some(atomic_method(heap, receiver, name, args, invoke)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn arity_error(name: &str) -> RunError {
    RunError::thrown(Value::str(format!("wrong number of arguments to '{name}' ({})", ExcKind::InvalidArgumentException)))
}

fn no_such_method(name: &str) -> RunError {
    RunError::thrown(Value::str(format!("no such method '{name}' ({})", ExcKind::RuntimeException)))
}

fn expect_int(value: &Value) -> RunResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        _ => Err(RunError::thrown(Value::str(format!("expected an int value ({})", ExcKind::TypeError)))),
    }
}

fn code_points(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn string_method(s: &Arc<str>, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "length" => Ok(Value::Int(s.chars().count() as i64)),
        "substring" => {
            let chars = code_points(s);
            let start = expect_int(args.first().ok_or_else(|| arity_error(name))?)?.clamp(0, chars.len() as i64) as usize;
            let end = match args.get(1) {
                Some(v) => expect_int(v)?.clamp(start as i64, chars.len() as i64) as usize,
                None => chars.len(),
            };
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        }
        "charAt" => {
            let chars = code_points(s);
            let idx = expect_int(args.first().ok_or_else(|| arity_error(name))?)?;
            let idx = if idx < 0 { chars.len() as i64 + idx } else { idx };
            if idx < 0 || idx as usize >= chars.len() {
                return Err(RunError::thrown(Value::str(format!("index out of bounds ({})", ExcKind::OutOfBoundsException))));
            }
            Ok(Value::str(chars[idx as usize].to_string()))
        }
        "toUpperCase" => Ok(Value::str(s.to_uppercase())),
        "toLowerCase" => Ok(Value::str(s.to_lowercase())),
        "trim" => Ok(Value::str(s.trim().to_string())),
        "contains" => {
            let needle = match args.first() {
                Some(Value::Str(n)) => n.clone(),
                _ => return Err(arity_error(name)),
            };
            Ok(Value::Bool(s.contains(needle.as_ref())))
        }
        "indexOf" => {
            let needle = match args.first() {
                Some(Value::Str(n)) => n.clone(),
                _ => return Err(arity_error(name)),
            };
            match s.find(needle.as_ref()) {
                Some(byte_idx) => Ok(Value::Int(s[..byte_idx].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }
        _ => Err(no_such_method(name)),
    }
}

fn string_split(heap: &SharedHeap, s: &Arc<str>, args: &[Value]) -> RunResult<Value> {
    let sep = match args.first() {
        Some(Value::Str(sep)) => sep.clone(),
        _ => return Err(arity_error("split")),
    };
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        s.split(sep.as_ref()).map(|p| Value::str(p.to_string())).collect()
    };
    Ok(alloc_array(heap, parts))
}

fn alloc_array(heap: &SharedHeap, items: Vec<Value>) -> Value {
    let mut heap = heap.lock();
    for item in &items {
        heap.retain_value(item);
    }
    heap.alloc(HeapData::Array(items))
}

fn array_index(len: usize, i: i64) -> RunResult<usize> {
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(RunError::thrown(Value::str(format!("index {i} out of bounds ({})", ExcKind::OutOfBoundsException))));
    }
    Ok(resolved as usize)
}

fn array_method(heap: &SharedHeap, id: crate::heap::HeapId, name: &str, mut args: Vec<Value>) -> RunResult<Value> {
    match name {
        "push" => {
            let value = args.pop().ok_or_else(|| arity_error(name))?;
            let mut heap = heap.lock();
            heap.retain_value(&value);
            match heap.get_mut(id) {
                HeapData::Array(items) => items.push(value),
                _ => unreachable!("dispatch already matched Array"),
            }
            Ok(Value::Null)
        }
        "pop" => {
            let mut heap = heap.lock();
            match heap.get_mut(id) {
                HeapData::Array(items) => Ok(items.pop().unwrap_or(Value::Null)),
                _ => unreachable!("dispatch already matched Array"),
            }
        }
        "contains" => {
            let needle = args.first().ok_or_else(|| arity_error(name))?;
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Array(items) => Ok(Value::Bool(items.iter().any(|v| v == needle))),
                _ => unreachable!("dispatch already matched Array"),
            }
        }
        "indexOf" => {
            let needle = args.first().ok_or_else(|| arity_error(name))?;
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Array(items) => Ok(Value::Int(items.iter().position(|v| v == needle).map_or(-1, |i| i as i64))),
                _ => unreachable!("dispatch already matched Array"),
            }
        }
        "reverse" => {
            let mut heap = heap.lock();
            match heap.get_mut(id) {
                HeapData::Array(items) => items.reverse(),
                _ => unreachable!("dispatch already matched Array"),
            }
            Ok(Value::Null)
        }
        "join" => {
            let sep = match args.first() {
                Some(Value::Str(s)) => s.to_string(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Array(items) => {
                    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                    Ok(Value::str(parts.join(&sep)))
                }
                _ => unreachable!("dispatch already matched Array"),
            }
        }
        "get" => {
            let idx = expect_int(args.first().ok_or_else(|| arity_error(name))?)?;
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Array(items) => Ok(items[array_index(items.len(), idx)?].clone()),
                _ => unreachable!("dispatch already matched Array"),
            }
        }
        _ => Err(no_such_method(name)),
    }
}

fn map_key(value: &Value) -> Arc<str> {
    match value {
        Value::Str(s) => s.clone(),
        other => Arc::from(other.to_string()),
    }
}

fn map_method(heap: &SharedHeap, id: crate::heap::HeapId, name: &str, mut args: Vec<Value>) -> RunResult<Value> {
    match name {
        "get" => {
            let key = map_key(args.first().ok_or_else(|| arity_error(name))?);
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Map(map) => Ok(map.get(key.as_ref()).cloned().unwrap_or(Value::Null)),
                _ => unreachable!("dispatch already matched Map"),
            }
        }
        "set" => {
            if args.len() != 2 {
                return Err(arity_error(name));
            }
            let value = args.pop().expect("checked len");
            let key = map_key(&args.pop().expect("checked len"));
            let mut heap = heap.lock();
            let old = match heap.get_mut(id) {
                HeapData::Map(map) => map.insert(key, value.clone()),
                _ => unreachable!("dispatch already matched Map"),
            };
            heap.retain_value(&value);
            if let Some(old) = old {
                heap.release_value(&old);
            }
            Ok(Value::Null)
        }
        "delete" => {
            let key = map_key(args.first().ok_or_else(|| arity_error(name))?);
            let mut heap = heap.lock();
            let removed = match heap.get_mut(id) {
                HeapData::Map(map) => map.shift_remove(key.as_ref()),
                _ => unreachable!("dispatch already matched Map"),
            };
            if let Some(removed) = &removed {
                heap.release_value(removed);
            }
            Ok(Value::Bool(removed.is_some()))
        }
        "has" => {
            let key = map_key(args.first().ok_or_else(|| arity_error(name))?);
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Map(map) => Ok(Value::Bool(map.contains_key(key.as_ref()))),
                _ => unreachable!("dispatch already matched Map"),
            }
        }
        "size" => {
            let heap = heap.lock();
            match heap.get(id) {
                HeapData::Map(map) => Ok(Value::Int(map.len() as i64)),
                _ => unreachable!("dispatch already matched Map"),
            }
        }
        "clear" => {
            let mut heap = heap.lock();
            let old: IndexMap<Arc<str>, Value> = match heap.get_mut(id) {
                HeapData::Map(map) => std::mem::take(map),
                _ => unreachable!("dispatch already matched Map"),
            };
            for value in old.values() {
                heap.release_value(value);
            }
            Ok(Value::Null)
        }
        "keys" => {
            let keys: Vec<Value> = {
                let heap = heap.lock();
                match heap.get(id) {
                    HeapData::Map(map) => map.keys().map(|k| Value::str(k.clone())).collect(),
                    _ => unreachable!("dispatch already matched Map"),
                }
            };
            Ok(alloc_array(heap, keys))
        }
        "values" => {
            let values: Vec<Value> = {
                let heap = heap.lock();
                match heap.get(id) {
                    HeapData::Map(map) => map.values().cloned().collect(),
                    _ => unreachable!("dispatch already matched Map"),
                }
            };
            Ok(alloc_array(heap, values))
        }
        _ => Err(no_such_method(name)),
    }
}

fn channel_method(heap: &SharedHeap, receiver: &Value, name: &str, args: &[Value]) -> RunResult<Value> {
    let chan = concurrency::extract_channel(heap, receiver)?;
    match name {
        "send" => {
            let value = args.first().cloned().ok_or_else(|| arity_error(name))?;
            chan.send(value)?;
            Ok(Value::Null)
        }
        "receive" => Ok(chan.receive()?.unwrap_or(Value::Null)),
        "try_receive" => Ok(chan.try_receive().unwrap_or(Value::Null)),
        "close" => {
            chan.close();
            Ok(Value::Null)
        }
        "len" => Ok(Value::Int(chan.len() as i64)),
        "cap" => Ok(Value::Int(chan.cap() as i64)),
        _ => Err(no_such_method(name)),
    }
}

fn mutex_method(heap: &SharedHeap, receiver: &Value, name: &str, mut args: Vec<Value>, invoke: &mut Invoke<'_>) -> RunResult<Value> {
    let mutex = concurrency::extract_mutex(heap, receiver)?;
    match name {
        "lock" => {
            mutex.lock();
            Ok(Value::Null)
        }
        "unlock" => {
            mutex.unlock();
            Ok(Value::Null)
        }
        "try_lock" => Ok(Value::Bool(mutex.try_lock())),
        "with_lock" => {
            let callback = args.pop().ok_or_else(|| arity_error(name))?;
            mutex.with_lock(|| invoke(callback, Vec::new()))
        }
        _ => Err(no_such_method(name)),
    }
}

fn waitgroup_method(heap: &SharedHeap, receiver: &Value, name: &str, args: &[Value]) -> RunResult<Value> {
    let wg = concurrency::extract_waitgroup(heap, receiver)?;
    match name {
        "add" => {
            let delta = expect_int(args.first().ok_or_else(|| arity_error(name))?)?;
            wg.add(delta);
            Ok(Value::Null)
        }
        "done" => {
            wg.done();
            Ok(Value::Null)
        }
        "wait" => {
            wg.wait();
            Ok(Value::Null)
        }
        _ => Err(no_such_method(name)),
    }
}

fn atomic_method(heap: &SharedHeap, receiver: &Value, name: &str, mut args: Vec<Value>, invoke: &mut Invoke<'_>) -> RunResult<Value> {
    let atomic = concurrency::extract_atomic(heap, receiver)?;
    match name {
        "get" => Ok(Value::Int(atomic.load())),
        "set" => {
            let v = expect_int(args.first().ok_or_else(|| arity_error(name))?)?;
            atomic.store(v);
            Ok(Value::Null)
        }
        "add" => {
            let delta = expect_int(args.first().ok_or_else(|| arity_error(name))?)?;
            Ok(Value::Int(atomic.fetch_add(delta)))
        }
        "increment" => Ok(Value::Int(atomic.fetch_add(1))),
        "decrement" => Ok(Value::Int(atomic.fetch_add(-1))),
        "compare_and_swap" => {
            if args.len() != 2 {
                return Err(arity_error(name));
            }
            let new = expect_int(&args.pop().expect("checked len"))?;
            let expected = expect_int(&args.pop().expect("checked len"))?;
            Ok(Value::Bool(atomic.compare_and_swap(expected, new)))
        }
        "update" => {
            let callback = args.pop().ok_or_else(|| arity_error(name))?;
            atomic.update(|current| expect_int(&invoke(callback.clone(), vec![Value::Int(current)])?))?;
            Ok(Value::Null)
        }
        _ => Err(no_such_method(name)),
    }
}
