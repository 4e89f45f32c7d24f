//! Compiled-function representation shared by the bytecode VM and the
//! tree-walking evaluator (`spec.md` §2, §4.1, §4.4).

use std::sync::Arc;

use crate::{ast, bytecode::code::Code, intern::StringId, value::Value};

#[derive(Debug, Clone)]
pub struct Param {
    pub name: StringId,
    pub default: Option<Value>,
    pub variadic: bool,
}

/// Where a parameter's default value was declared; re-evaluated at call time
/// by the evaluator, pre-compiled to a `GetConstant`/push sequence for the
/// bytecode compiler (`spec.md` §4.4 default-argument handling).
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.params.iter().take_while(|p| p.default.is_none() && !p.variadic).count()
    }
}

/// A compiled function, method, or closure body.
///
/// Both backends share this type: the bytecode VM runs `code`, the
/// tree-walking evaluator runs `body` directly against a fresh
/// `Environment`. Keeping both forms on the same struct means a class's
/// method table doesn't need to know which backend will call it.
#[derive(Debug)]
pub struct Function {
    pub name: StringId,
    pub signature: Signature,
    pub upvalue_descriptors: Vec<UpvalueDescriptor>,
    pub code: Code,
    pub body: Arc<ast::Block>,
    pub is_static: bool,
}

/// Clox-style upvalue descriptor (`spec.md` §4.7): captured at closure
/// creation time by reading either the enclosing frame's locals directly
/// (`Local`) or by forwarding one of the enclosing function's own upvalues
/// (`Upvalue`), so a closure three levels deep does not need to walk three
/// frames at call time.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueDescriptor {
    Local(u8),
    Upvalue(u8),
}
