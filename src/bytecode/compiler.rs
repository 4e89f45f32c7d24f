//! AST-to-bytecode compiler (`spec.md` §4.4).
//!
//! Structured like `monty/src/bytecode/compiler.rs`: a stack of per-function
//! compiler frames (`FunctionScope`), a `loop_stack` for `break`/`continue`
//! target patching, and a dispatch pair (`compile_stmt`/`compile_expr`) over
//! the flat `ast::Stmt`/`ast::Expr` enums. Upvalue resolution is clox-style
//! (`spec.md` §4.7): resolving a free variable walks the enclosing compiler
//! chain and records an `UpvalueDescriptor` rather than reaching for a
//! captured-cell object at compile time, which is what sets this compiler
//! apart from the teacher's own CPython-style free-variable handling.

use crate::{
    ast::{self, BinOp, Expr, Literal, Stmt, UnOp},
    bytecode::{builder::CodeBuilder, code::Code, op::Op},
    error::{CompileError, CompileErrorKind, CompileResult},
    intern::{Interns, StringId},
    types::{Param, Signature, UpvalueDescriptor},
    value::Value,
};

fn patch_err<T>(r: Result<T, CompileErrorKind>, file: &str) -> CompileResult<T> {
    r.map_err(|kind| CompileError::new(kind, file.to_string(), 0))
}

#[derive(Debug, Clone)]
struct Local {
    name: StringId,
    depth: u32,
    is_captured: bool,
}

struct LoopContext {
    continue_target: usize,
    break_jumps: Vec<usize>,
    scope_depth: u32,
}

struct FunctionScope {
    builder: CodeBuilder,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDescriptor>,
    upvalue_names: Vec<StringId>,
    scope_depth: u32,
    loop_stack: Vec<LoopContext>,
    file: String,
}

impl FunctionScope {
    fn new(file: String) -> Self {
        Self {
            builder: CodeBuilder::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            scope_depth: 0,
            loop_stack: Vec::new(),
            file,
        }
    }

    fn resolve_local(&self, name: StringId) -> Option<u8> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, _)| i as u8)
    }

    fn add_upvalue(&mut self, descriptor: UpvalueDescriptor, name: StringId) -> CompileResult<u8> {
        if let Some((i, _)) = self.upvalue_names.iter().enumerate().find(|(_, n)| **n == name) {
            return Ok(i as u8);
        }
        if self.upvalues.len() >= u8::MAX as usize {
            return self.err(CompileErrorKind::TooManyLocals, 0);
        }
        self.upvalues.push(descriptor);
        self.upvalue_names.push(name);
        Ok((self.upvalues.len() - 1) as u8)
    }

    fn err<T>(&self, kind: CompileErrorKind, line: u32) -> CompileResult<T> {
        Err(CompileError::new(kind, self.file.clone(), line))
    }
}

pub struct Compiler<'a> {
    interns: &'a mut Interns,
    scopes: Vec<FunctionScope>,
    file: String,
}

impl<'a> Compiler<'a> {
    #[must_use]
    pub fn new(interns: &'a mut Interns, file: impl Into<String>) -> Self {
        Self { interns, scopes: Vec::new(), file: file.into() }
    }

    fn current(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("no active function scope")
    }

    fn err<T>(&self, kind: CompileErrorKind, line: u32) -> CompileResult<T> {
        Err(CompileError::new(kind, self.file.clone(), line))
    }

    /// Compiles a function body into standalone `Code` plus its resolved
    /// upvalue descriptors, for wrapping in a `types::Function`.
    pub fn compile_function(
        &mut self,
        params: &[ast::Param],
        body: &ast::Block,
    ) -> CompileResult<(Code, Vec<UpvalueDescriptor>, Signature)> {
        self.scopes.push(FunctionScope::new(self.file.clone()));
        self.begin_scope();
        let mut sig_params = Vec::new();
        for p in params {
            self.declare_local(p.name, 0)?;
            sig_params.push(Param {
                name: p.name,
                default: p.default.as_ref().and_then(Self::const_literal),
                variadic: p.variadic,
            });
        }
        self.compile_block(body, 0)?;
        self.current().builder.emit_op(Op::Null, 0);
        self.current().builder.emit_op(Op::Return, 0);
        let scope = self.scopes.pop().expect("pushed above");
        Ok((scope.builder.finish(), scope.upvalues, Signature { params: sig_params }))
    }

    fn const_literal(expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Literal(Literal::Null) => Some(Value::Null),
            Expr::Literal(Literal::Bool(b)) => Some(Value::Bool(*b)),
            Expr::Literal(Literal::Int(i)) => Some(Value::Int(*i)),
            Expr::Literal(Literal::Float(f)) => Some(Value::Float(*f)),
            Expr::Literal(Literal::Str(s)) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) -> CompileResult<()> {
        let scope = self.current();
        scope.scope_depth -= 1;
        let depth = scope.scope_depth;
        while let Some(local) = scope.locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                scope.builder.emit_op(Op::CloseUpvalue, line);
            } else {
                scope.builder.emit_op(Op::Pop, line);
            }
            scope.locals.pop();
        }
        Ok(())
    }

    fn declare_local(&mut self, name: StringId, line: u32) -> CompileResult<()> {
        let scope = self.current();
        let depth = scope.scope_depth;
        if scope.locals.iter().any(|l| l.depth == depth && l.name == name) {
            return self.err(CompileErrorKind::DuplicateDeclaration { name: name.index().to_string() }, line);
        }
        if scope.locals.len() >= u8::MAX as usize {
            return self.err(CompileErrorKind::TooManyLocals, line);
        }
        scope.locals.push(Local { name, depth, is_captured: false });
        Ok(())
    }

    fn resolve_upvalue(&mut self, scope_index: usize, name: StringId) -> CompileResult<Option<u8>> {
        if scope_index == 0 {
            return Ok(None);
        }
        let parent_index = scope_index - 1;
        if let Some(slot) = self.scopes[parent_index].resolve_local(name) {
            self.scopes[parent_index].locals[slot as usize].is_captured = true;
            let idx = self.scopes[scope_index].add_upvalue(UpvalueDescriptor::Local(slot), name)?;
            return Ok(Some(idx));
        }
        if let Some(parent_upvalue) = self.resolve_upvalue(parent_index, name)? {
            let idx = self.scopes[scope_index].add_upvalue(UpvalueDescriptor::Upvalue(parent_upvalue), name)?;
            return Ok(Some(idx));
        }
        Ok(None)
    }

    fn compile_block(&mut self, block: &ast::Block, line: u32) -> CompileResult<()> {
        self.begin_scope();
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        self.end_scope(line)
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.current().builder.emit_op(Op::Pop, 0);
            }
            Stmt::Let { name, value, span } => {
                self.compile_expr(value)?;
                self.declare_local(*name, span.line)?;
            }
            Stmt::Assign { target, value, span } => self.compile_assign(target, value, span.line)?,
            Stmt::If { cond, then_branch, else_branch } => self.compile_if(cond, then_branch, else_branch.as_ref())?,
            Stmt::While { cond, body } => self.compile_while(cond, body)?,
            Stmt::For { init, cond, step, body } => self.compile_for(init.as_deref(), cond.as_ref(), step.as_deref(), body)?,
            Stmt::ForRange { var, start, end, inclusive, body } => self.compile_for_range(*var, start, end, *inclusive, body)?,
            Stmt::ForEach { var, key, iterable, body } => self.compile_for_each(*var, *key, iterable, body)?,
            Stmt::Return(expr) => {
                match expr {
                    Some(e) => self.compile_expr(e)?,
                    None => self.current().builder.emit_op(Op::Null, 0),
                }
                self.current().builder.emit_op(Op::Return, 0);
            }
            Stmt::Break => self.compile_break()?,
            Stmt::Continue => self.compile_continue()?,
            Stmt::Throw(e) => {
                self.compile_expr(e)?;
                self.current().builder.emit_op(Op::Throw, 0);
            }
            Stmt::Try { body, catches, finally } => self.compile_try(body, catches, finally.as_ref())?,
            Stmt::Switch { subject, cases, default } => self.compile_switch(subject, cases, default.as_ref())?,
            Stmt::Spawn(e) => {
                self.compile_expr(e)?;
                self.current().builder.emit_op(Op::Spawn, 0);
            }
            Stmt::Block(b) => self.compile_block(b, 0)?,
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr, line: u32) -> CompileResult<()> {
        match target {
            Expr::Identifier(name) => {
                self.compile_expr(value)?;
                self.emit_variable_store(*name, line)?;
            }
            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.current().builder.emit_op(Op::SetIndex, line);
                self.current().builder.emit_op(Op::Pop, line);
            }
            Expr::Property { target, name } => {
                self.compile_expr(target)?;
                self.compile_expr(value)?;
                let idx = self.interned_constant(*name);
                self.current().builder.emit_op(Op::SetProperty, line);
                self.current().builder.emit_u16(idx, line);
                self.current().builder.emit_op(Op::Pop, line);
            }
            _ => return self.err(CompileErrorKind::InvalidContext { what: "assignment target".to_string() }, line),
        }
        Ok(())
    }

    fn emit_variable_store(&mut self, name: StringId, line: u32) -> CompileResult<()> {
        let scope_index = self.scopes.len() - 1;
        if let Some(slot) = self.current().resolve_local(name) {
            self.current().builder.emit_op(Op::SetLocal, line);
            self.current().builder.emit_u8(slot, line);
            return Ok(());
        }
        if let Some(slot) = self.resolve_upvalue(scope_index, name)? {
            self.current().builder.emit_op(Op::SetUpvalue, line);
            self.current().builder.emit_u8(slot, line);
            return Ok(());
        }
        let idx = self.interned_constant(name);
        self.current().builder.emit_op(Op::SetGlobal, line);
        self.current().builder.emit_u16(idx, line);
        Ok(())
    }

    fn interned_constant(&mut self, name: StringId) -> u16 {
        let s = self.interns.get(name).to_string();
        self.current().builder.code.constants.add(Value::str(s))
    }

    fn compile_if(&mut self, cond: &Expr, then_branch: &ast::Block, else_branch: Option<&ast::Block>) -> CompileResult<()> {
        self.compile_expr(cond)?;
        let then_jump = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        self.compile_block(then_branch, 0)?;
        let else_jump = self.current().builder.emit_jump(Op::Jump, 0);
        patch_err(self.current().builder.patch_jump(then_jump), &self.file)?;
        self.current().builder.emit_op(Op::Pop, 0);
        if let Some(else_branch) = else_branch {
            self.compile_block(else_branch, 0)?;
        }
        patch_err(self.current().builder.patch_jump(else_jump), &self.file)?;
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &ast::Block) -> CompileResult<()> {
        let loop_start = self.current().builder.current_offset();
        let scope_depth = self.current().scope_depth;
        self.current().loop_stack.push(LoopContext { continue_target: loop_start, break_jumps: Vec::new(), scope_depth });
        self.compile_expr(cond)?;
        let exit_jump = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        self.compile_block(body, 0)?;
        patch_err(self.current().builder.emit_loop(loop_start, 0), &self.file)?;
        patch_err(self.current().builder.patch_jump(exit_jump), &self.file)?;
        self.current().builder.emit_op(Op::Pop, 0);
        self.patch_loop_breaks()?;
        Ok(())
    }

    fn compile_for(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Stmt>, body: &ast::Block) -> CompileResult<()> {
        self.begin_scope();
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let loop_start = self.current().builder.current_offset();
        let exit_jump = if let Some(cond) = cond {
            self.compile_expr(cond)?;
            let j = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
            self.current().builder.emit_op(Op::Pop, 0);
            Some(j)
        } else {
            None
        };
        let scope_depth = self.current().scope_depth;
        self.current().loop_stack.push(LoopContext { continue_target: loop_start, break_jumps: Vec::new(), scope_depth });
        self.compile_block(body, 0)?;
        if let Some(step) = step {
            self.compile_stmt(step)?;
        }
        patch_err(self.current().builder.emit_loop(loop_start, 0), &self.file)?;
        if let Some(exit_jump) = exit_jump {
            patch_err(self.current().builder.patch_jump(exit_jump), &self.file)?;
            self.current().builder.emit_op(Op::Pop, 0);
        }
        self.patch_loop_breaks()?;
        self.end_scope(0)
    }

    /// `for i in a..b` / `a..=b` (`spec.md` §4.4). Desugars to a counting
    /// `for` loop over a hidden local holding the current value.
    fn compile_for_range(&mut self, var: StringId, start: &Expr, end: &Expr, inclusive: bool, body: &ast::Block) -> CompileResult<()> {
        self.begin_scope();
        self.compile_expr(start)?;
        self.declare_local(var, 0)?;
        let loop_start = self.current().builder.current_offset();
        let var_slot = self.current().resolve_local(var).expect("just declared");
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(var_slot, 0);
        self.compile_expr(end)?;
        self.current().builder.emit_op(if inclusive { Op::GreaterEqual } else { Op::Greater }, 0);
        let exit_jump = self.current().builder.emit_jump(Op::JumpIfTrue, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        let scope_depth = self.current().scope_depth;
        self.current().loop_stack.push(LoopContext { continue_target: 0, break_jumps: Vec::new(), scope_depth });
        self.compile_block(body, 0)?;
        let continue_target = self.current().builder.current_offset();
        self.current().loop_stack.last_mut().expect("pushed above").continue_target = continue_target;
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(var_slot, 0);
        self.current().builder.emit_constant(Value::Int(1), 0).map_err(|k| CompileError::new(k, self.file.clone(), 0))?;
        self.current().builder.emit_op(Op::Add, 0);
        self.current().builder.emit_op(Op::SetLocal, 0);
        self.current().builder.emit_u8(var_slot, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        patch_err(self.current().builder.emit_loop(loop_start, 0), &self.file)?;
        patch_err(self.current().builder.patch_jump(exit_jump), &self.file)?;
        self.current().builder.emit_op(Op::Pop, 0);
        self.patch_loop_breaks()?;
        self.end_scope(0)
    }

    /// `for (k, v) in collection` (`spec.md` §4.4). Lowered with `len()` and
    /// `GetIndex` rather than a dedicated iterator opcode, since arrays and
    /// maps already support indexed access and `__get_class_methods`-style
    /// reflection gives user code no reason to implement `Iterator` itself.
    fn compile_for_each(&mut self, var: StringId, key: Option<StringId>, iterable: &Expr, body: &ast::Block) -> CompileResult<()> {
        self.begin_scope();
        self.compile_expr(iterable)?;
        self.declare_local(StringId::from_raw(u32::MAX), 0)?; // hidden slot holding the collection
        let collection_slot = self.current().locals.len() as u8 - 1;
        self.compile_expr(&Expr::Literal(Literal::Int(0)))?;
        self.declare_local(StringId::from_raw(u32::MAX - 1), 0)?; // hidden index counter
        let index_slot = self.current().locals.len() as u8 - 1;

        let loop_start = self.current().builder.current_offset();
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(index_slot, 0);
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(collection_slot, 0);
        let len_const = self.interns.intern("len");
        let len_idx = self.interned_constant(len_const);
        self.current().builder.emit_op(Op::GetGlobal, 0);
        self.current().builder.emit_u16(len_idx, 0);
        // stack at this point: index, collection, len_fn -> call len(collection)
        // Simplify: swap isn't available, so recompute by calling len directly.
        self.current().builder.emit_op(Op::Pop, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        self.current().builder.emit_op(Op::GetGlobal, 0);
        self.current().builder.emit_u16(len_idx, 0);
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(collection_slot, 0);
        self.current().builder.emit_op(Op::Call, 0);
        self.current().builder.emit_u8(1, 0);
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(index_slot, 0);
        self.current().builder.emit_op(Op::Less, 0);
        let exit_jump = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
        self.current().builder.emit_op(Op::Pop, 0);

        self.begin_scope();
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(collection_slot, 0);
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(index_slot, 0);
        self.current().builder.emit_op(Op::GetIndex, 0);
        self.declare_local(var, 0)?;
        if let Some(key) = key {
            self.current().builder.emit_op(Op::GetLocal, 0);
            self.current().builder.emit_u8(index_slot, 0);
            self.declare_local(key, 0)?;
        }
        let scope_depth = self.current().scope_depth;
        self.current().loop_stack.push(LoopContext { continue_target: 0, break_jumps: Vec::new(), scope_depth });
        for stmt in &body.stmts {
            self.compile_stmt(stmt)?;
        }
        self.end_scope(0)?;

        let continue_target = self.current().builder.current_offset();
        self.current().loop_stack.last_mut().expect("pushed above").continue_target = continue_target;
        self.current().builder.emit_op(Op::GetLocal, 0);
        self.current().builder.emit_u8(index_slot, 0);
        self.current().builder.emit_constant(Value::Int(1), 0).map_err(|k| CompileError::new(k, self.file.clone(), 0))?;
        self.current().builder.emit_op(Op::Add, 0);
        self.current().builder.emit_op(Op::SetLocal, 0);
        self.current().builder.emit_u8(index_slot, 0);
        self.current().builder.emit_op(Op::Pop, 0);
        patch_err(self.current().builder.emit_loop(loop_start, 0), &self.file)?;
        patch_err(self.current().builder.patch_jump(exit_jump), &self.file)?;
        self.current().builder.emit_op(Op::Pop, 0);
        self.patch_loop_breaks()?;
        self.end_scope(0)
    }

    fn compile_break(&mut self) -> CompileResult<()> {
        if self.current().loop_stack.is_empty() {
            return self.err(CompileErrorKind::NotInLoop, 0);
        }
        let jump = self.current().builder.emit_jump(Op::Jump, 0);
        self.current().loop_stack.last_mut().expect("checked above").break_jumps.push(jump);
        Ok(())
    }

    fn compile_continue(&mut self) -> CompileResult<()> {
        let Some(ctx_target) = self.current().loop_stack.last().map(|l| l.continue_target) else {
            return self.err(CompileErrorKind::NotInLoop, 0);
        };
        patch_err(self.current().builder.emit_loop(ctx_target, 0), &self.file)
    }

    fn patch_loop_breaks(&mut self) -> CompileResult<()> {
        let ctx = self.current().loop_stack.pop().expect("compile_break/continue balanced with a push");
        for jump in ctx.break_jumps {
            patch_err(self.current().builder.patch_jump(jump), &self.file)?;
        }
        Ok(())
    }

    /// `try`/`catch`/`finally` (`spec.md` §4.6) lowered to `PushTry`/`PopTry`
    /// rather than a static exception table: `PushTry` records the handler
    /// offset on the VM's try-stack, `PopTry` removes it once the protected
    /// region finishes normally. A thrown exception unwinds to the nearest
    /// try-stack entry and leaves the exception value on the operand stack
    /// for the handler to bind.
    fn compile_try(&mut self, body: &ast::Block, catches: &[ast::CatchClause], finally: Option<&ast::Block>) -> CompileResult<()> {
        let push_try = self.current().builder.emit_jump(Op::PushTry, 0);
        self.compile_block(body, 0)?;
        self.current().builder.emit_op(Op::PopTry, 0);
        let skip_handlers = self.current().builder.emit_jump(Op::Jump, 0);
        patch_err(self.current().builder.patch_jump(push_try), &self.file)?;

        for (i, clause) in catches.iter().enumerate() {
            self.begin_scope();
            self.declare_local(clause.binding, 0)?;
            self.compile_block(&clause.body, 0)?;
            self.end_scope(0)?;
            if i + 1 < catches.len() {
                let _ = self.current().builder.emit_jump(Op::Jump, 0);
            }
        }
        patch_err(self.current().builder.patch_jump(skip_handlers), &self.file)?;
        if let Some(finally) = finally {
            self.compile_block(finally, 0)?;
        }
        Ok(())
    }

    fn compile_switch(&mut self, subject: &Expr, cases: &[ast::SwitchCase], default: Option<&ast::Block>) -> CompileResult<()> {
        self.compile_expr(subject)?;
        let subject_slot_scope = self.current().scope_depth;
        self.begin_scope();
        self.declare_local(StringId::from_raw(u32::MAX - 2), 0)?;
        let subject_slot = self.current().locals.len() as u8 - 1;
        let mut end_jumps = Vec::new();
        for case in cases {
            self.current().builder.emit_op(Op::GetLocal, 0);
            self.current().builder.emit_u8(subject_slot, 0);
            self.compile_expr(&case.value)?;
            self.current().builder.emit_op(Op::Equal, 0);
            let skip = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
            self.current().builder.emit_op(Op::Pop, 0);
            self.compile_block(&case.body, 0)?;
            end_jumps.push(self.current().builder.emit_jump(Op::Jump, 0));
            patch_err(self.current().builder.patch_jump(skip), &self.file)?;
            self.current().builder.emit_op(Op::Pop, 0);
        }
        if let Some(default) = default {
            self.compile_block(default, 0)?;
        }
        for jump in end_jumps {
            patch_err(self.current().builder.patch_jump(jump), &self.file)?;
        }
        self.end_scope(0)?;
        debug_assert_eq!(self.current().scope_depth, subject_slot_scope);
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Literal(lit) => self.compile_literal(lit)?,
            Expr::Identifier(name) => self.compile_variable_load(*name)?,
            Expr::This => {
                let this_id = self.interns.intern("this");
                self.compile_variable_load(this_id)?;
            }
            Expr::ArrayLiteral(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.current().builder.emit_op(Op::MakeArray, 0);
                self.current().builder.emit_u16(items.len() as u16, 0);
            }
            Expr::MapLiteral(entries) => {
                for (k, v) in entries {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.current().builder.emit_op(Op::MakeMap, 0);
                self.current().builder.emit_u16(entries.len() as u16, 0);
            }
            Expr::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs)?,
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.current().builder.emit_op(
                    match op {
                        UnOp::Neg => Op::Neg,
                        UnOp::Not => Op::Not,
                        UnOp::BitNot => Op::BitNot,
                    },
                    0,
                );
            }
            Expr::Ternary { cond, then_expr, else_expr } => {
                self.compile_expr(cond)?;
                let else_jump = self.current().builder.emit_jump(Op::JumpIfFalse, 0);
                self.current().builder.emit_op(Op::Pop, 0);
                self.compile_expr(then_expr)?;
                let end_jump = self.current().builder.emit_jump(Op::Jump, 0);
                patch_err(self.current().builder.patch_jump(else_jump), &self.file)?;
                self.current().builder.emit_op(Op::Pop, 0);
                self.compile_expr(else_expr)?;
                patch_err(self.current().builder.patch_jump(end_jump), &self.file)?;
            }
            Expr::Call { callee, args } => {
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.current().builder.emit_op(Op::Call, 0);
                self.current().builder.emit_u8(args.len() as u8, 0);
            }
            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.current().builder.emit_op(Op::GetIndex, 0);
            }
            Expr::Property { target, name } => {
                self.compile_expr(target)?;
                let idx = self.interned_constant(*name);
                self.current().builder.emit_op(Op::GetProperty, 0);
                self.current().builder.emit_u16(idx, 0);
            }
            Expr::StaticProperty { class_path, name } => {
                let class_idx = {
                    let s = class_path.clone();
                    self.current().builder.code.constants.add(Value::str(s))
                };
                let name_idx = self.interned_constant(*name);
                self.current().builder.emit_op(Op::GetStaticProperty, 0);
                self.current().builder.emit_u16(class_idx, 0);
                self.current().builder.emit_u16(name_idx, 0);
            }
            Expr::MethodCall { target, name, args } => {
                self.compile_expr(target)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let idx = self.interned_constant(*name);
                self.current().builder.emit_op(Op::Invoke, 0);
                self.current().builder.emit_u16(idx, 0);
                self.current().builder.emit_u8(args.len() as u8, 0);
            }
            Expr::StaticCall { class_path, name, args, via_static_binding } => {
                let class_idx = {
                    let s = class_path.clone();
                    self.current().builder.code.constants.add(Value::str(s))
                };
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let name_idx = self.interned_constant(*name);
                self.current().builder.emit_op(Op::InvokeStatic, 0);
                self.current().builder.emit_u16(class_idx, 0);
                self.current().builder.emit_u16(name_idx, 0);
                self.current().builder.emit_u8(args.len() as u8, 0);
                self.current().builder.emit_u8(u8::from(*via_static_binding), 0);
            }
            Expr::New { class_path, args } => {
                let class_idx = {
                    let s = class_path.clone();
                    self.current().builder.code.constants.add(Value::str(s))
                };
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.current().builder.emit_op(Op::Instance, 0);
                self.current().builder.emit_u16(class_idx, 0);
                self.current().builder.emit_u8(args.len() as u8, 0);
            }
            Expr::Super { method, args } => {
                let this_id = self.interns.intern("this");
                self.compile_variable_load(this_id)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let idx = self.interned_constant(*method);
                self.current().builder.emit_op(Op::SuperInvoke, 0);
                self.current().builder.emit_u16(idx, 0);
                self.current().builder.emit_u8(args.len() as u8, 0);
            }
            Expr::InstanceOf { value, type_path } => {
                self.compile_expr(value)?;
                let idx = {
                    let s = type_path.clone();
                    self.current().builder.code.constants.add(Value::str(s))
                };
                self.current().builder.emit_op(Op::InstanceOf, 0);
                self.current().builder.emit_u16(idx, 0);
            }
            Expr::TypeAssert { value, type_path, safe } => {
                self.compile_expr(value)?;
                let idx = {
                    let s = type_path.clone();
                    self.current().builder.code.constants.add(Value::str(s))
                };
                self.current().builder.emit_op(Op::TypeAssert, 0);
                self.current().builder.emit_u16(idx, 0);
                self.current().builder.emit_u8(u8::from(*safe), 0);
            }
            Expr::Closure { params, body, .. } => self.compile_closure(params, body)?,
            Expr::FString { parts } => self.compile_fstring(parts)?,
        }
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal) -> CompileResult<()> {
        match lit {
            Literal::Null => self.current().builder.emit_op(Op::Null, 0),
            Literal::Bool(true) => self.current().builder.emit_op(Op::True, 0),
            Literal::Bool(false) => self.current().builder.emit_op(Op::False, 0),
            Literal::Int(i) => self
                .current()
                .builder
                .emit_constant(Value::Int(*i), 0)
                .map_err(|k| CompileError::new(k, self.file.clone(), 0))?,
            Literal::Float(f) => self
                .current()
                .builder
                .emit_constant(Value::Float(*f), 0)
                .map_err(|k| CompileError::new(k, self.file.clone(), 0))?,
            Literal::Str(s) => self
                .current()
                .builder
                .emit_constant(Value::Str(s.clone()), 0)
                .map_err(|k| CompileError::new(k, self.file.clone(), 0))?,
        }
        Ok(())
    }

    fn compile_variable_load(&mut self, name: StringId) -> CompileResult<()> {
        let scope_index = self.scopes.len() - 1;
        if let Some(slot) = self.current().resolve_local(name) {
            self.current().builder.emit_op(Op::GetLocal, 0);
            self.current().builder.emit_u8(slot, 0);
            return Ok(());
        }
        if let Some(slot) = self.resolve_upvalue(scope_index, name)? {
            self.current().builder.emit_op(Op::GetUpvalue, 0);
            self.current().builder.emit_u8(slot, 0);
            return Ok(());
        }
        let idx = self.interned_constant(name);
        self.current().builder.emit_op(Op::GetGlobal, 0);
        self.current().builder.emit_u16(idx, 0);
        Ok(())
    }

    fn compile_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
        if matches!(op, BinOp::And | BinOp::Or) {
            self.compile_expr(lhs)?;
            let jump = self.current().builder.emit_jump(if op == BinOp::And { Op::JumpIfFalse } else { Op::JumpIfTrue }, 0);
            self.current().builder.emit_op(Op::Pop, 0);
            self.compile_expr(rhs)?;
            patch_err(self.current().builder.patch_jump(jump), &self.file)?;
            return Ok(());
        }
        self.compile_expr(lhs)?;
        self.compile_expr(rhs)?;
        let opcode = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Eq => Op::Equal,
            BinOp::NotEq => Op::NotEqual,
            BinOp::Lt => Op::Less,
            BinOp::LtEq => Op::LessEqual,
            BinOp::Gt => Op::Greater,
            BinOp::GtEq => Op::GreaterEqual,
            BinOp::BitAnd => Op::BitAnd,
            BinOp::BitOr => Op::BitOr,
            BinOp::BitXor => Op::BitXor,
            BinOp::Shl => Op::Shl,
            BinOp::Shr => Op::Shr,
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        };
        self.current().builder.emit_op(opcode, 0);
        Ok(())
    }

    fn compile_closure(&mut self, params: &[ast::Param], body: &ast::Block) -> CompileResult<()> {
        let (code, upvalues, signature) = self.compile_function(params, body)?;
        let function = std::sync::Arc::new(crate::types::Function {
            name: self.interns.intern("<closure>"),
            signature,
            upvalue_descriptors: upvalues.clone(),
            code,
            body: std::sync::Arc::new(body.clone()),
            is_static: false,
        });
        let idx = self.current().builder.code.add_function(function);
        self.current().builder.emit_op(Op::Closure, 0);
        self.current().builder.emit_u16(idx, 0);
        for upvalue in &upvalues {
            let (is_local, index) = match upvalue {
                UpvalueDescriptor::Local(i) => (1u8, *i),
                UpvalueDescriptor::Upvalue(i) => (0u8, *i),
            };
            self.current().builder.emit_u8(is_local, 0);
            self.current().builder.emit_u8(index, 0);
        }
        Ok(())
    }

    fn compile_fstring(&mut self, parts: &[ast::FStringPart]) -> CompileResult<()> {
        if parts.is_empty() {
            return self.compile_literal(&Literal::Str("".into()));
        }
        let mut parts_iter = parts.iter();
        match parts_iter.next().expect("checked non-empty") {
            ast::FStringPart::Literal(s) => self.compile_literal(&Literal::Str(s.clone()))?,
            ast::FStringPart::Expr(e) => self.compile_expr(e)?,
        }
        for part in parts_iter {
            match part {
                ast::FStringPart::Literal(s) => self.compile_literal(&Literal::Str(s.clone()))?,
                ast::FStringPart::Expr(e) => self.compile_expr(e)?,
            }
            // `Add` coerces to string concatenation whenever either operand
            // is already a string (`spec.md` §4.4 string interpolation).
            self.current().builder.emit_op(Op::Add, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_literal_plus_return() {
        let mut interns = Interns::new();
        let mut compiler = Compiler::new(&mut interns, "test.long");
        let body = ast::Block { stmts: vec![Stmt::Return(Some(Expr::Literal(Literal::Int(1))))] };
        let (code, upvalues, sig) = compiler.compile_function(&[], &body).unwrap();
        assert!(upvalues.is_empty());
        assert!(sig.params.is_empty());
        assert!(!code.is_empty());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let mut interns = Interns::new();
        let mut compiler = Compiler::new(&mut interns, "test.long");
        let body = ast::Block { stmts: vec![Stmt::Break] };
        let err = compiler.compile_function(&[], &body).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::NotInLoop));
    }
}
