//! Lightweight concurrency primitives (`spec.md` §4.8): goroutines are real
//! OS threads, sharing one heap, coordinated by channel/mutex/waitgroup/atomic
//! values that are themselves ordinary heap data.
//!
//! The teacher's own `modules/threading_mod.rs` is a single-threaded sandbox
//! stand-in (no real thread ever gets spawned), which is the opposite of
//! what this spec asks for, so these primitives are grounded instead on
//! `r3e-network-neo-rs`'s use of `parking_lot::Mutex`/`Condvar` for its
//! consensus/ledger synchronization. Each primitive owns its own
//! `Mutex`/`Condvar` pair independent of the shared heap's lock, so a
//! goroutine blocked on a channel receive never holds up an unrelated
//! goroutine that just wants to read an array.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::{ExcKind, RunError, RunResult},
    heap::{Heap, HeapData},
    value::Value,
};

/// Heap shared across every goroutine in a running program. The coarse lock
/// here guards only the arena's bookkeeping (alloc/retain/release/field
/// access); it is held briefly and never across a blocking wait.
pub type SharedHeap = Arc<Mutex<Heap>>;

#[must_use]
pub fn new_shared_heap() -> SharedHeap {
    Arc::new(Mutex::new(Heap::new()))
}

/// A buffered or unbuffered channel (`spec.md` §4.8).
///
/// `capacity == 0` means unbounded per the resolved open question in
/// `DESIGN.md`: sends never block, only receives on an empty channel do.
/// A positive capacity blocks sends once the buffer is full.
#[derive(Debug)]
pub struct GoroutineChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<Value>,
    closed: bool,
}

impl GoroutineChannel {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(ChannelState { queue: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn send(&self, value: Value) -> RunResult<()> {
        let mut state = self.state.lock();
        if self.capacity > 0 {
            while state.queue.len() >= self.capacity && !state.closed {
                self.not_full.wait(&mut state);
            }
        }
        if state.closed {
            return Err(RunError::thrown(Value::str("send on closed channel")));
        }
        state.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn receive(&self) -> RunResult<Option<Value>> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let value = state.queue.pop_front();
        self.not_full.notify_one();
        Ok(value)
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Non-blocking receive (`spec.md` §4.8 `try_receive()`): `Ok(None)`
    /// covers both "empty but open" and "closed and drained" — callers that
    /// need to tell those apart also have `is_closed`.
    pub fn try_receive(&self) -> Option<Value> {
        let mut state = self.state.lock();
        let value = state.queue.pop_front();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.capacity
    }
}

/// A mutual-exclusion lock exposed as a first-class value (`spec.md` §4.8).
/// Reentrant locking from the same goroutine deadlocks, matching a plain OS
/// mutex rather than a reentrant one — `spec.md` names no reentrancy
/// guarantee, so the simplest primitive is used. Locked/unlocked state is
/// tracked explicitly rather than through a `MutexGuard` since `lock`/`unlock`
/// are exposed as two separate method calls from user code, with no Rust
/// scope to tie a guard's lifetime to.
#[derive(Debug)]
pub struct GoMutex {
    locked: Mutex<bool>,
    available: Condvar,
}

impl GoMutex {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { locked: Mutex::new(false), available: Condvar::new() })
    }

    pub fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.available.wait(&mut locked);
        }
        *locked = true;
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    pub fn unlock(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.available.notify_one();
    }

    /// Runs `body` with the lock held, releasing it on every exit path —
    /// including `body` raising — per `spec.md` §4.8 `with_lock`'s guarantee.
    pub fn with_lock<T>(&self, body: impl FnOnce() -> RunResult<T>) -> RunResult<T> {
        self.lock();
        let result = body();
        self.unlock();
        result
    }
}

/// A counter that blocks `wait()` until it returns to zero (`spec.md` §4.8).
#[derive(Debug)]
pub struct GoWaitGroup {
    state: Mutex<i64>,
    zero: Condvar,
}

impl GoWaitGroup {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(0), zero: Condvar::new() })
    }

    pub fn add(&self, delta: i64) {
        let mut n = self.state.lock();
        *n += delta;
        if *n <= 0 {
            self.zero.notify_all();
        }
    }

    pub fn done(&self) {
        self.add(-1);
    }

    pub fn wait(&self) {
        let mut n = self.state.lock();
        while *n > 0 {
            self.zero.wait(&mut n);
        }
    }
}

/// A lock-free-looking integer counter, implemented with an atomic under the
/// hood (`spec.md` §4.8).
#[derive(Debug)]
pub struct GoAtomic {
    value: std::sync::atomic::AtomicI64,
}

impl GoAtomic {
    #[must_use]
    pub fn new(initial: i64) -> Arc<Self> {
        Arc::new(Self { value: std::sync::atomic::AtomicI64::new(initial) })
    }

    pub fn load(&self) -> i64 {
        self.value.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn store(&self, v: i64) {
        self.value.store(v, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fetch_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, std::sync::atomic::Ordering::SeqCst)
    }

    /// Swaps in `new` only if the current value equals `expected`; returns
    /// whether the swap happened (`spec.md` §4.8 `compare_and_swap`).
    pub fn compare_and_swap(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst)
            .is_ok()
    }

    /// Applies `f` to the current value and stores the result, holding no
    /// lock across the call — `spec.md` §4.8's `update(fn)` names no atomicity
    /// guarantee beyond "holds one value under a lock", so a plain
    /// load-compute-store (not a compare-and-swap retry loop) matches a
    /// single-value cell rather than promising linearizable read-modify-write.
    pub fn update(&self, f: impl FnOnce(i64) -> RunResult<i64>) -> RunResult<()> {
        let current = self.load();
        self.store(f(current)?);
        Ok(())
    }
}

/// Extracts the live channel/mutex/waitgroup/atomic `Arc` behind a
/// `Value::Ref`, briefly locking `heap`. Callers then drop the heap lock and
/// block on the extracted `Arc` directly, so a goroutine waiting on a channel
/// never holds the heap lock while parked.
pub fn extract_channel(heap: &SharedHeap, value: &Value) -> RunResult<Arc<GoroutineChannel>> {
    let id = value.as_ref_id().ok_or_else(|| type_error("channel"))?;
    match heap.lock().get(id) {
        HeapData::Channel(chan) => Ok(chan.clone()),
        _ => Err(type_error("channel")),
    }
}

pub fn extract_mutex(heap: &SharedHeap, value: &Value) -> RunResult<Arc<GoMutex>> {
    let id = value.as_ref_id().ok_or_else(|| type_error("mutex"))?;
    match heap.lock().get(id) {
        HeapData::Mutex(m) => Ok(m.clone()),
        _ => Err(type_error("mutex")),
    }
}

pub fn extract_waitgroup(heap: &SharedHeap, value: &Value) -> RunResult<Arc<GoWaitGroup>> {
    let id = value.as_ref_id().ok_or_else(|| type_error("waitgroup"))?;
    match heap.lock().get(id) {
        HeapData::WaitGroup(w) => Ok(w.clone()),
        _ => Err(type_error("waitgroup")),
    }
}

pub fn extract_atomic(heap: &SharedHeap, value: &Value) -> RunResult<Arc<GoAtomic>> {
    let id = value.as_ref_id().ok_or_else(|| type_error("atomic"))?;
    match heap.lock().get(id) {
        HeapData::Atomic(a) => Ok(a.clone()),
        _ => Err(type_error("atomic")),
    }
}

fn type_error(expected: &str) -> RunError {
    RunError::thrown(Value::str(format!("expected a {expected} value ({})", ExcKind::TypeError)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_channel_send_never_blocks() {
        let chan = GoroutineChannel::new(0);
        chan.send(Value::Int(1)).unwrap();
        chan.send(Value::Int(2)).unwrap();
        assert_eq!(chan.receive().unwrap(), Some(Value::Int(1)));
        assert_eq!(chan.receive().unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn closed_empty_channel_receive_returns_none() {
        let chan = GoroutineChannel::new(0);
        chan.close();
        assert_eq!(chan.receive().unwrap(), None);
    }

    #[test]
    fn waitgroup_wait_returns_once_drained() {
        let wg = GoWaitGroup::new();
        wg.add(2);
        wg.done();
        wg.done();
        wg.wait();
    }

    #[test]
    fn atomic_fetch_add_returns_previous_value() {
        let a = GoAtomic::new(5);
        assert_eq!(a.fetch_add(3), 5);
        assert_eq!(a.load(), 8);
    }
}
