//! Array and map opcodes (`spec.md` §3.1, §8).
//!
//! Maps are backed by `indexmap::IndexMap` (see `DESIGN.md`) specifically so
//! iteration and `delete` observe insertion order, which `spec.md` §8 tests
//! directly.

use indexmap::IndexMap;

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::HeapData,
    value::Value,
};

use super::Vm;

impl<'a> Vm<'a> {
    pub fn make_array(&mut self, count: usize) -> RunResult<()> {
        let base = self.stack.len() - count;
        let items: Vec<Value> = self.stack.drain(base..).collect();
        let mut heap = self.heap.lock();
        for item in &items {
            heap.retain_value(item);
        }
        let value = heap.alloc(HeapData::Array(items));
        drop(heap);
        self.push(value)
    }

    pub fn make_map(&mut self, count: usize) -> RunResult<()> {
        let base = self.stack.len() - count * 2;
        let entries: Vec<Value> = self.stack.drain(base..).collect();
        let mut map = IndexMap::new();
        let mut heap = self.heap.lock();
        for pair in entries.chunks(2) {
            let key = match &pair[0] {
                Value::Str(s) => s.clone(),
                other => std::sync::Arc::from(other.to_string()),
            };
            heap.retain_value(&pair[1]);
            if let Some(old) = map.insert(key, pair[1].clone()) {
                heap.release_value(&old);
            }
        }
        let value = heap.alloc(HeapData::Map(map));
        drop(heap);
        self.push(value)
    }

    pub fn get_index(&mut self) -> RunResult<()> {
        let index = self.pop();
        let target = self.pop();
        let Value::Ref(id) = target else {
            return Err(self.type_error("array or map"));
        };
        let heap = self.heap.lock();
        let value = match (heap.get(id), &index) {
            (HeapData::Array(items), Value::Int(i)) => {
                let idx = Self::array_index(items.len(), *i)?;
                items[idx].clone()
            }
            (HeapData::Map(map), key) => {
                let key = Self::map_key(key);
                map.get(key.as_ref()).cloned().unwrap_or(Value::Null)
            }
            _ => return Err(self.type_error("array or map")),
        };
        drop(heap);
        self.push(value)
    }

    pub fn set_index(&mut self) -> RunResult<()> {
        let value = self.pop();
        let index = self.pop();
        let target = self.pop();
        let Value::Ref(id) = target else {
            return Err(self.type_error("array or map"));
        };
        let old = {
            let mut heap = self.heap.lock();
            match (heap.get_mut(id), &index) {
                (HeapData::Array(items), Value::Int(i)) => {
                    let idx = Self::array_index(items.len(), *i)?;
                    Some(std::mem::replace(&mut items[idx], value.clone()))
                }
                (HeapData::Map(map), key) => {
                    let key = Self::map_key(key);
                    map.insert(key, value.clone())
                }
                _ => return Err(self.type_error("array or map")),
            }
        };
        let mut heap = self.heap.lock();
        heap.retain_value(&value);
        if let Some(old) = old {
            heap.release_value(&old);
        }
        self.push(value)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::new_shared_heap;

    #[test]
    fn negative_array_index_wraps_from_the_end() {
        assert_eq!(Vm::array_index(3, -1).unwrap(), 2);
        assert!(Vm::array_index(3, -4).is_err());
    }

    #[test]
    fn map_insertion_order_survives_a_delete() {
        let heap = new_shared_heap();
        let mut map: IndexMap<std::sync::Arc<str>, Value> = IndexMap::new();
        map.insert(std::sync::Arc::from("a"), Value::Int(1));
        map.insert(std::sync::Arc::from("b"), Value::Int(2));
        map.insert(std::sync::Arc::from("c"), Value::Int(3));
        map.shift_remove("b");
        let keys: Vec<&str> = map.keys().map(|k| k.as_ref()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        drop(heap);
    }
}
