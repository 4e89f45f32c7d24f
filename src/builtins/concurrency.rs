//! Constructors for the concurrency primitives (`spec.md` §4.8): `Channel`,
//! `Mutex`, `WaitGroup`, `Atomic`. Each allocates its primitive into the
//! shared heap and hands back a `Value::Ref` like any other heap value;
//! method calls on the result are resolved by `crate::builtins::methods`.

use crate::{
    bytecode::vm::Vm,
    concurrency::{GoAtomic, GoMutex, GoWaitGroup, GoroutineChannel},
    error::RunResult,
    heap::HeapData,
    value::Value,
};

/// `Channel()` is unbounded; `Channel(n)` is bounded to `n` queued items.
pub fn new_channel(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let capacity = match args.first() {
        Some(Value::Int(n)) => (*n).max(0) as usize,
        _ => 0,
    };
    Ok(vm.heap.lock().alloc(HeapData::Channel(GoroutineChannel::new(capacity))))
}

pub fn new_mutex(vm: &mut Vm, _args: &[Value]) -> RunResult<Value> {
    Ok(vm.heap.lock().alloc(HeapData::Mutex(GoMutex::new())))
}

pub fn new_waitgroup(vm: &mut Vm, _args: &[Value]) -> RunResult<Value> {
    Ok(vm.heap.lock().alloc(HeapData::WaitGroup(GoWaitGroup::new())))
}

/// `Atomic()` starts at zero; `Atomic(n)` starts at `n`.
pub fn new_atomic(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let initial = match args.first() {
        Some(Value::Int(n)) => *n,
        _ => 0,
    };
    Ok(vm.heap.lock().alloc(HeapData::Atomic(GoAtomic::new(initial))))
}
