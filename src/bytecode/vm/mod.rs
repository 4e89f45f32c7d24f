//! Stack-based virtual machine (`spec.md` §4.3, §5): the canonical execution
//! backend, required to agree with the tree-walking evaluator on every
//! observable behavior.
//!
//! Shaped after `ouros/src/bytecode/vm/mod.rs`'s frame-stack/operand-stack
//! dispatch loop, scaled to this VM's calling conventions and try-stack
//! based exception handling. Submodules add `impl Vm` blocks rather than
//! duplicating the struct: `call.rs` (calling conventions), `classes.rs`
//! (property/instance/static access), `exceptions.rs` (try-stack unwind),
//! `binary.rs` (arithmetic/comparison/bitwise), `collections.rs`
//! (array/map opcodes).

pub mod binary;
pub mod call;
pub mod classes;
pub mod collections;
pub mod exceptions;

use std::sync::Arc;

use crate::{
    ast,
    bytecode::op::Op,
    concurrency::SharedHeap,
    error::{InternalError, RunError, RunResult},
    heap::{Closure, HeapData, Upvalue},
    intern::Interns,
    io::PrintWriter,
    namespace::NamespaceManager,
    resource::ResourceLimits,
    tracer::Tracer,
    types::Function,
    value::Value,
};

/// One active function activation.
pub struct CallFrame {
    pub closure: Arc<Closure>,
    pub ip: usize,
    /// Index into the operand stack where this frame's locals begin. Local
    /// slot 0 is the receiver for method/constructor calls (`spec.md`
    /// §4.5's calling convention), or the called function itself for plain
    /// calls.
    pub base: usize,
    /// `self::`/`static::` late static binding target for this activation
    /// (`spec.md` §4.5 "late static binding").
    pub called_class: Option<crate::namespace::ClassId>,
}

/// One entry on the try-stack (`spec.md` §4.6): where to resume on a thrown
/// exception, and how far to unwind the operand/frame stacks to get there.
pub struct TryEntry {
    pub catch_ip: usize,
    pub stack_depth: usize,
    pub frame_index: usize,
}

pub struct Vm<'a> {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub try_stack: Vec<TryEntry>,
    pub globals: ahash::AHashMap<String, Value>,
    pub heap: SharedHeap,
    pub namespaces: &'a mut NamespaceManager,
    pub interns: &'a mut Interns,
    pub printer: &'a mut dyn PrintWriter,
    pub tracer: &'a mut dyn Tracer,
    pub limits: ResourceLimits,
    pub next_goroutine_id: u64,
}

impl<'a> Vm<'a> {
    #[must_use]
    pub fn new(
        heap: SharedHeap,
        namespaces: &'a mut NamespaceManager,
        interns: &'a mut Interns,
        printer: &'a mut dyn PrintWriter,
        tracer: &'a mut dyn Tracer,
    ) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            try_stack: Vec::new(),
            globals: ahash::AHashMap::default(),
            heap,
            namespaces,
            interns,
            printer,
            tracer,
            limits: ResourceLimits::default(),
            next_goroutine_id: 1,
        }
    }

    pub fn push(&mut self, value: Value) -> RunResult<()> {
        self.stack.push(value);
        self.limits
            .check_operand_stack(self.stack.len())
            .map_err(RunError::Internal)
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler-balanced stack underflow")
    }

    pub fn peek(&self, depth_from_top: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - depth_from_top]
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.function.code.bytes[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_u8();
        let lo = self.read_u8();
        u16::from_be_bytes([hi, lo])
    }

    fn read_op(&mut self) -> Option<Op> {
        Op::from_u8(self.read_u8())
    }

    /// Runs a top-level function (the program's entry point) to completion,
    /// returning its final value.
    pub fn run_entry(&mut self, entry: Arc<Function>) -> RunResult<Value> {
        let closure = Arc::new(Closure { function: entry, upvalues: Vec::new() });
        self.frames.push(CallFrame { closure, ip: 0, base: self.stack.len(), called_class: None });
        self.limits.check_frame_stack(self.frames.len()).map_err(RunError::Internal)?;
        self.run()
    }

    /// The dispatch loop. Returns the value left on top of the stack when the
    /// outermost frame returns, or propagates an uncaught `RunError`.
    pub fn run(&mut self) -> RunResult<Value> {
        let base_frame_count = self.frames.len() - 1;
        loop {
            let result = self.step();
            match result {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Returned(value)) => {
                    if self.frames.len() <= base_frame_count {
                        return Ok(value);
                    }
                }
                Ok(StepOutcome::Halted(value)) => return Ok(value),
                Err(err) => {
                    if let RunError::Thrown(exception) = &err {
                        if self.unwind_to_try(exception.clone())? {
                            continue;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    fn step(&mut self) -> RunResult<StepOutcome> {
        let Some(op) = self.read_op() else {
            return Err(RunError::thrown(Value::str("illegal opcode")));
        };
        match op {
            Op::Constant => {
                let idx = self.read_u16();
                let value = self.frame().closure.function.code.constants.get(idx).clone();
                self.push(value)?;
            }
            Op::Null => self.push(Value::Null)?,
            Op::True => self.push(Value::Bool(true))?,
            Op::False => self.push(Value::Bool(false))?,
            Op::Pop => {
                self.pop();
            }
            Op::Dup => {
                let top = self.peek(0).clone();
                self.push(top)?;
            }
            Op::GetLocal => {
                let slot = self.read_u8() as usize;
                let base = self.frame().base;
                let value = self.stack[base + slot].clone();
                self.push(value)?;
            }
            Op::SetLocal => {
                let slot = self.read_u8() as usize;
                let value = self.peek(0).clone();
                let base = self.frame().base;
                self.stack[base + slot] = value;
            }
            Op::GetGlobal => {
                let idx = self.read_u16();
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                let value = self.globals.get(&name).cloned().unwrap_or(Value::Null);
                self.push(value)?;
            }
            Op::SetGlobal | Op::DefineGlobal => {
                let idx = self.read_u16();
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                let value = self.peek(0).clone();
                self.globals.insert(name, value);
            }
            Op::GetUpvalue => {
                let slot = self.read_u8() as usize;
                let value = self.read_upvalue(slot);
                self.push(value)?;
            }
            Op::SetUpvalue => {
                let slot = self.read_u8() as usize;
                let value = self.peek(0).clone();
                self.write_upvalue(slot, value);
            }
            Op::CloseUpvalue => {
                self.pop();
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::BitAnd | Op::BitOr | Op::BitXor | Op::Shl | Op::Shr => {
                self.binary_arith(op)?;
            }
            Op::Equal | Op::NotEqual | Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual => {
                self.binary_compare(op)?;
            }
            Op::Neg | Op::Not | Op::BitNot => self.unary(op)?,
            Op::Jump => {
                let dist = self.read_u16() as usize;
                self.frame_mut().ip += dist;
            }
            Op::JumpIfFalse => {
                let dist = self.read_u16() as usize;
                if !self.is_truthy(self.peek(0))? {
                    self.frame_mut().ip += dist;
                }
            }
            Op::JumpIfTrue => {
                let dist = self.read_u16() as usize;
                if self.is_truthy(self.peek(0))? {
                    self.frame_mut().ip += dist;
                }
            }
            Op::Loop => {
                let dist = self.read_u16() as usize;
                self.frame_mut().ip -= dist;
            }
            Op::Call => {
                let argc = self.read_u8() as usize;
                self.call(argc)?;
            }
            Op::Invoke => {
                let idx = self.read_u16();
                let argc = self.read_u8() as usize;
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                self.invoke(&name, argc)?;
            }
            Op::InvokeStatic => {
                let class_idx = self.read_u16();
                let name_idx = self.read_u16();
                let argc = self.read_u8() as usize;
                let via_static_binding = self.read_u8() != 0;
                let class_path = self.frame().closure.function.code.constants.get(class_idx).to_string();
                let name = self.frame().closure.function.code.constants.get(name_idx).to_string();
                self.invoke_static(&class_path, &name, argc, via_static_binding)?;
            }
            Op::TypeAssert => {
                let idx = self.read_u16();
                let safe = self.read_u8() != 0;
                let type_path = self.frame().closure.function.code.constants.get(idx).to_string();
                self.type_assert(&type_path, safe)?;
            }
            Op::SuperInvoke => {
                let idx = self.read_u16();
                let argc = self.read_u8() as usize;
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                self.super_invoke(&name, argc)?;
            }
            Op::Return => {
                let value = self.pop();
                let frame = self.frames.pop().expect("return with no active frame");
                self.stack.truncate(frame.base);
                self.push(value.clone())?;
                return Ok(StepOutcome::Returned(value));
            }
            Op::Closure => {
                let idx = self.read_u16();
                self.make_closure(idx)?;
            }
            Op::Class | Op::Inherit | Op::Method => {
                // `loader::load_program` registers class/interface/enum
                // declarations into the namespace manager in a pass ahead of
                // execution (`spec.md` §4.2); these opcodes are reserved for
                // a future bytecode-level class builder and are never
                // emitted by the current compiler, which only ever lowers
                // method bodies, not the declarations that contain them.
                return Err(RunError::thrown(Value::str("class-builder opcodes are not yet executable")));
            }
            Op::GetProperty => {
                let idx = self.read_u16();
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                self.get_property(&name)?;
            }
            Op::SetProperty => {
                let idx = self.read_u16();
                let name = self.frame().closure.function.code.constants.get(idx).to_string();
                self.set_property(&name)?;
            }
            Op::GetStaticProperty => {
                let class_idx = self.read_u16();
                let name_idx = self.read_u16();
                let class_path = self.frame().closure.function.code.constants.get(class_idx).to_string();
                let name = self.frame().closure.function.code.constants.get(name_idx).to_string();
                self.get_static_property(&class_path, &name)?;
            }
            Op::SetStaticProperty => {
                let class_idx = self.read_u16();
                let name_idx = self.read_u16();
                let class_path = self.frame().closure.function.code.constants.get(class_idx).to_string();
                let name = self.frame().closure.function.code.constants.get(name_idx).to_string();
                self.set_static_property(&class_path, &name)?;
            }
            Op::Instance => {
                let class_idx = self.read_u16();
                let argc = self.read_u8() as usize;
                let class_path = self.frame().closure.function.code.constants.get(class_idx).to_string();
                self.construct(&class_path, argc)?;
            }
            Op::InstanceOf => {
                let idx = self.read_u16();
                let type_path = self.frame().closure.function.code.constants.get(idx).to_string();
                self.instance_of(&type_path)?;
            }
            Op::CalledClass => {
                let class = self.frame().called_class;
                let value = class.map_or(Value::Null, Value::Class);
                self.push(value)?;
            }
            Op::MakeArray => {
                let count = self.read_u16() as usize;
                self.make_array(count)?;
            }
            Op::MakeMap => {
                let count = self.read_u16() as usize;
                self.make_map(count)?;
            }
            Op::GetIndex => self.get_index()?,
            Op::SetIndex => self.set_index()?,
            Op::PushTry => {
                let dist = self.read_u16() as usize;
                let catch_ip = self.frame().ip + dist;
                self.try_stack.push(TryEntry { catch_ip, stack_depth: self.stack.len(), frame_index: self.frames.len() - 1 });
            }
            Op::PopTry => {
                self.try_stack.pop();
            }
            Op::Throw => {
                let exception = self.pop();
                self.tracer.on_throw(&exception);
                return Err(RunError::thrown(exception));
            }
            Op::Spawn => self.spawn_goroutine()?,
            Op::Halt => {
                let value = self.stack.pop().unwrap_or(Value::Null);
                return Ok(StepOutcome::Halted(value));
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn read_upvalue(&self, slot: usize) -> Value {
        match &self.frame().closure.upvalues[slot] {
            Upvalue::Open(stack_index) => self.stack[*stack_index].clone(),
            Upvalue::Closed(cell) => cell.lock().clone(),
        }
    }

    fn write_upvalue(&mut self, slot: usize, value: Value) {
        match self.frames.last().expect("no active frame").closure.upvalues[slot].clone() {
            Upvalue::Open(stack_index) => self.stack[stack_index] = value,
            Upvalue::Closed(cell) => *cell.lock() = value,
        }
    }

    /// Truthiness including heap-backed emptiness checks (`spec.md` §9): an
    /// empty array or map is falsy, matching the tree-walker's
    /// `Heap`-consulting truthiness.
    pub fn is_truthy(&self, value: &Value) -> RunResult<bool> {
        if let Some(b) = value.is_truthy_immediate() {
            return Ok(b);
        }
        let id = value.as_ref_id().expect("is_truthy_immediate returned None only for Ref");
        let heap = self.heap.lock();
        Ok(match heap.get(id) {
            HeapData::Array(items) => !items.is_empty(),
            HeapData::Map(map) => !map.is_empty(),
            _ => true,
        })
    }

    fn make_closure(&mut self, function_idx: u16) -> RunResult<()> {
        let function = self.frame().closure.function.code.function(function_idx).clone();
        let mut upvalues = Vec::with_capacity(function.upvalue_descriptors.len());
        for descriptor in &function.upvalue_descriptors {
            let upvalue = match descriptor {
                crate::types::UpvalueDescriptor::Local(slot) => Upvalue::Open(self.frame().base + *slot as usize),
                crate::types::UpvalueDescriptor::Upvalue(slot) => self.frame().closure.upvalues[*slot as usize].clone(),
            };
            upvalues.push(upvalue);
        }
        let closure = Closure { function, upvalues };
        let value = self.heap.lock().alloc(HeapData::Closure(closure));
        self.push(value)
    }

    fn spawn_goroutine(&mut self) -> RunResult<()> {
        let callee = self.pop();
        let goroutine_id = self.next_goroutine_id;
        self.next_goroutine_id += 1;
        self.tracer.on_spawn(goroutine_id);
        let heap = self.heap.clone();
        let globals = self.globals.clone();
        let Value::Ref(id) = callee else {
            return Err(RunError::thrown(Value::str("spawn target must be a closure")));
        };
        let closure = match heap.lock().get(id) {
            HeapData::Closure(c) => {
                let upvalues = c.upvalues.iter().map(|u| self.close_upvalue(u)).collect();
                Arc::new(Closure { function: c.function.clone(), upvalues })
            }
            _ => return Err(RunError::thrown(Value::str("spawn target must be a closure"))),
        };
        std::thread::spawn(move || {
            let mut namespaces = NamespaceManager::new();
            let mut interns = Interns::new();
            let mut sink = crate::io::StdPrint;
            let mut tracer = crate::tracer::NoopTracer;
            let mut vm = Vm::new(heap, &mut namespaces, &mut interns, &mut sink, &mut tracer);
            vm.globals = globals;
            vm.frames.push(CallFrame { closure, ip: 0, base: vm.stack.len(), called_class: None });
            let _ = vm.run();
        });
        Ok(())
    }

    /// A goroutine runs on its own operand stack (`std::thread::spawn`'s
    /// closure owns a fresh `Vm`), so an `Upvalue::Open(stack_index)`
    /// captured by the spawned closure can't be carried over as a live
    /// index — there is no shared stack left for it to index into. Instead
    /// the captured value is snapshotted into its own cell at spawn time:
    /// a goroutine sees the variable's value as of the moment it was
    /// spawned, not a live view of the spawning frame's locals. Shared
    /// *mutable* state crossing the thread boundary still works exactly as
    /// before, through values that are themselves heap references (a
    /// `Channel`, `Mutex`, or instance), since the heap stays common to
    /// every goroutine.
    fn close_upvalue(&self, upvalue: &Upvalue) -> Upvalue {
        match upvalue {
            Upvalue::Open(idx) => Upvalue::Closed(Arc::new(parking_lot::Mutex::new(self.stack[*idx].clone()))),
            Upvalue::Closed(cell) => Upvalue::Closed(cell.clone()),
        }
    }
}

pub enum StepOutcome {
    Continue,
    Returned(Value),
    Halted(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::compiler::Compiler, concurrency::new_shared_heap};

    fn run_function(body: &ast::Block) -> Value {
        let mut interns = Interns::new();
        let (code, _, sig) = Compiler::new(&mut interns, "test.long").compile_function(&[], body).unwrap();
        let function = Arc::new(Function {
            name: interns.intern("main"),
            signature: sig,
            upvalue_descriptors: Vec::new(),
            code,
            body: Arc::new(body.clone()),
            is_static: false,
        });
        let mut namespaces = NamespaceManager::new();
        let mut sink = crate::io::CollectStringPrint::new();
        let mut tracer = crate::tracer::NoopTracer;
        let heap = new_shared_heap();
        let mut vm = Vm::new(heap, &mut namespaces, &mut interns, &mut sink, &mut tracer);
        vm.run_entry(function).unwrap()
    }

    #[test]
    fn returns_literal() {
        let body = ast::Block { stmts: vec![ast::Stmt::Return(Some(ast::Expr::Literal(ast::Literal::Int(42))))] };
        assert_eq!(run_function(&body), Value::Int(42));
    }

    #[test]
    fn arithmetic_executes_in_order() {
        let body = ast::Block {
            stmts: vec![ast::Stmt::Return(Some(ast::Expr::Binary {
                op: ast::BinOp::Add,
                lhs: Box::new(ast::Expr::Literal(ast::Literal::Int(2))),
                rhs: Box::new(ast::Expr::Binary {
                    op: ast::BinOp::Mul,
                    lhs: Box::new(ast::Expr::Literal(ast::Literal::Int(3))),
                    rhs: Box::new(ast::Expr::Literal(ast::Literal::Int(4))),
                }),
            }))],
        };
        assert_eq!(run_function(&body), Value::Int(14));
    }
}
