//! The shared, explicitly refcounted heap arena (`spec.md` §3.1, §4.8).
//!
//! Grounded on the teacher's `heap.rs` free-list arena, scaled down to what
//! this spec actually needs: no generational GC, no cycle collector — just
//! strong refcounts with manual `retain`/`release`, matching the Non-goal
//! "no generational garbage collector; the VM only needs... an explicit-arena
//! refcounting scheme". The arena is wrapped in `Arc<Mutex<Heap>>` by
//! `concurrency.rs` so goroutines can share arrays/maps/instances; the arena
//! itself knows nothing about threads.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    concurrency::{GoAtomic, GoMutex, GoWaitGroup, GoroutineChannel},
    environment::Environment,
    intern::StringId,
    namespace::{ClassId, EnumId},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub fields: AHashMap<StringId, Value>,
}

#[derive(Debug)]
pub struct EnumMember {
    pub owner: EnumId,
    pub ordinal: u32,
    pub fields: AHashMap<StringId, Value>,
}

/// A closure's captured state: the compiled function plus its resolved
/// upvalues. `function` is a `HeapId` pointing at nothing heap-owned in the
/// strict sense (compiled code is immortal program data) but is modeled as a
/// plain `Arc` held outside the refcounted arena — see `types::Function`.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: std::sync::Arc<crate::types::Function>,
    pub upvalues: Vec<Upvalue>,
}

/// A resolved upvalue cell, clox-style (`spec.md` §4.7): open while the
/// referenced stack slot is still live, closed once the enclosing frame
/// returns and the value is copied out.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open(usize),
    Closed(std::sync::Arc<parking_lot::Mutex<Value>>),
}

#[derive(Debug, Clone)]
pub enum BoundReceiver {
    Instance(HeapId),
    ClassStatic(ClassId),
}

#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: BoundReceiver,
    pub method: std::sync::Arc<crate::types::Function>,
}

/// An evaluator-side closure: the captured defining `Environment` stands in
/// for the bytecode VM's resolved upvalue list (`spec.md` §4.1's "captures
/// the whole defining environment by reference" rather than per-variable
/// upvalue resolution).
#[derive(Debug, Clone)]
pub struct TreeClosure {
    pub function: std::sync::Arc<crate::types::Function>,
    pub env: Environment,
    pub this: Option<Value>,
    pub called_class: Option<ClassId>,
}

#[derive(Debug)]
pub enum HeapData {
    Array(Vec<Value>),
    Map(IndexMap<std::sync::Arc<str>, Value>),
    Instance(Instance),
    EnumMember(EnumMember),
    Closure(Closure),
    TreeClosure(TreeClosure),
    BoundMethod(BoundMethod),
    Channel(std::sync::Arc<GoroutineChannel>),
    Mutex(std::sync::Arc<GoMutex>),
    WaitGroup(std::sync::Arc<GoWaitGroup>),
    Atomic(std::sync::Arc<GoAtomic>),
}

impl HeapData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Instance(_) => "instance",
            Self::EnumMember(_) => "enum_member",
            Self::Closure(_) | Self::TreeClosure(_) => "function",
            Self::BoundMethod(_) => "function",
            Self::Channel(_) => "channel",
            Self::Mutex(_) => "mutex",
            Self::WaitGroup(_) => "waitgroup",
            Self::Atomic(_) => "atomic",
        }
    }

    /// Values directly reachable from this object, for cascading releases
    /// when its refcount drops to zero. There is no cycle detection — a
    /// reference cycle through arrays/maps/instances leaks, which is the
    /// explicit tradeoff this spec makes for not carrying a tracing GC.
    fn children(&self) -> Vec<Value> {
        match self {
            Self::Array(items) => items.clone(),
            Self::Map(map) => map.values().cloned().collect(),
            Self::Instance(inst) => inst.fields.values().cloned().collect(),
            Self::EnumMember(member) => member.fields.values().cloned().collect(),
            Self::Closure(_) | Self::TreeClosure(_) | Self::BoundMethod(_) => Vec::new(),
            Self::Channel(_) | Self::Mutex(_) | Self::WaitGroup(_) | Self::Atomic(_) => Vec::new(),
        }
    }
}

struct Slot {
    data: Option<HeapData>,
    refcount: u32,
}

/// Refcounted arena. Not `Sync` by itself; `concurrency.rs` wraps it in
/// `Arc<parking_lot::Mutex<Heap>>` for cross-goroutine sharing.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `data` with an initial strong count of 1 and returns a
    /// `Value::Ref` pointing at it.
    pub fn alloc(&mut self, data: HeapData) -> Value {
        let id = if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Slot { data: Some(data), refcount: 1 };
            idx
        } else {
            self.slots.push(Slot { data: Some(data), refcount: 1 });
            (self.slots.len() - 1) as u32
        };
        Value::Ref(HeapId(id))
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()]
            .data
            .as_ref()
            .expect("dereferenced a freed heap slot")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()]
            .data
            .as_mut()
            .expect("dereferenced a freed heap slot")
    }

    /// Bumps the strong refcount. Call whenever a `Value::Ref` is copied into
    /// a new slot that will outlive the slot it was copied from (array push,
    /// map insert, field assignment, variable binding).
    pub fn retain(&mut self, id: HeapId) {
        self.slots[id.index()].refcount += 1;
    }

    /// Drops the strong refcount by one, freeing and cascading into `children`
    /// if it reaches zero.
    pub fn release(&mut self, id: HeapId) {
        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.refcount > 0, "refcount underflow");
        slot.refcount -= 1;
        if slot.refcount != 0 {
            return;
        }
        let data = slot.data.take().expect("double free of heap slot");
        self.free.push(id.0);
        for child in data.children() {
            if let Value::Ref(child_id) = child {
                self.release(child_id);
            }
        }
    }

    /// Retains `value` if it is a heap reference; no-op otherwise. Convenience
    /// for call sites that don't want to match on `Value` themselves.
    pub fn retain_value(&mut self, value: &Value) {
        if let Value::Ref(id) = value {
            self.retain(*id);
        }
    }

    pub fn release_value(&mut self, value: &Value) {
        if let Value::Ref(id) = value {
            self.release(*id);
        }
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_to_zero_frees_slot_and_cascades() {
        let mut heap = Heap::new();
        let inner = heap.alloc(HeapData::Array(vec![Value::Int(1)]));
        let inner_id = inner.as_ref_id().unwrap();
        let outer = heap.alloc(HeapData::Array(vec![inner]));
        heap.retain_value(&outer);
        assert_eq!(heap.live_count(), 2);
        heap.release_value(&outer);
        heap.release_value(&outer);
        assert_eq!(heap.live_count(), 0);
        let _ = inner_id;
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapData::Array(vec![]));
        heap.release_value(&a);
        let b = heap.alloc(HeapData::Array(vec![]));
        assert_eq!(a.as_ref_id(), b.as_ref_id());
    }
}
