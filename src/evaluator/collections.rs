//! Array and map construction/indexing (`spec.md` §3.1, §8), mirroring
//! `bytecode::vm::collections`'s semantics (insertion-order maps, negative
//! array indices wrap from the end).

use indexmap::IndexMap;

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::HeapData,
    value::Value,
};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(super) fn make_array(&mut self, items: Vec<Value>) -> Value {
        let mut heap = self.heap.lock();
        for item in &items {
            heap.retain_value(item);
        }
        heap.alloc(HeapData::Array(items))
    }

    pub(super) fn make_map(&mut self, entries: Vec<(Value, Value)>) -> Value {
        let mut map = IndexMap::new();
        let mut heap = self.heap.lock();
        for (key, value) in entries {
            let key = Self::map_key(&key);
            heap.retain_value(&value);
            if let Some(old) = map.insert(key, value) {
                heap.release_value(&old);
            }
        }
        heap.alloc(HeapData::Map(map))
    }

    pub(super) fn get_index(&mut self, target: Value, index: Value) -> RunResult<Value> {
        let Value::Ref(id) = target else { return Err(self.type_error("array or map")) };
        let heap = self.heap.lock();
        match (heap.get(id), &index) {
            (HeapData::Array(items), Value::Int(i)) => {
                let idx = Self::array_index(items.len(), *i)?;
                Ok(items[idx].clone())
            }
            (HeapData::Map(map), key) => Ok(map.get(Self::map_key(key).as_ref()).cloned().unwrap_or(Value::Null)),
            _ => Err(self.type_error("array or map")),
        }
    }

    pub(super) fn set_index(&mut self, target: Value, index: Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = target else { return Err(self.type_error("array or map")) };
        let old = {
            let mut heap = self.heap.lock();
            match (heap.get_mut(id), &index) {
                (HeapData::Array(items), Value::Int(i)) => {
                    let idx = Self::array_index(items.len(), *i)?;
                    Some(std::mem::replace(&mut items[idx], value.clone()))
                }
                (HeapData::Map(map), key) => map.insert(Self::map_key(key), value.clone()),
                _ => return Err(self.type_error("array or map")),
            }
        };
        let mut heap = self.heap.lock();
        heap.retain_value(&value);
        if let Some(old) = old {
            heap.release_value(&old);
        }
        Ok(())
    }

    fn array_index(len: usize, i: i64) -> RunResult<usize> {
        let resolved = if i < 0 { len as i64 + i } else { i };
        if resolved < 0 || resolved as usize >= len {
            return Err(RunError::thrown(Value::str(format!("index {i} out of bounds ({})", ExcKind::OutOfBoundsException))));
        }
        Ok(resolved as usize)
    }

    fn map_key(value: &Value) -> std::sync::Arc<str> {
        match value {
            Value::Str(s) => s.clone(),
            other => std::sync::Arc::from(other.to_string()),
        }
    }
}
