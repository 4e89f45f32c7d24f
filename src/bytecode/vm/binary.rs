//! Arithmetic, comparison, and bitwise opcodes (`spec.md` §4.3, §8).
//!
//! Grounded on `ouros/src/bytecode/vm/binary.rs` and `compare.rs`. Division
//! by zero raises a catchable `RuntimeException` rather than panicking
//! (`spec.md` §8's division-by-zero scenario).

use crate::{
    bytecode::op::Op,
    error::{ExcKind, RunError, RunResult},
    value::Value,
};

use super::Vm;

impl<'a> Vm<'a> {
    pub(super) fn binary_arith(&mut self, op: Op) -> RunResult<()> {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = match (&lhs, &rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) if op == Op::Add => {
                Value::str(format!("{lhs}{rhs}"))
            }
            (Value::Int(a), Value::Int(b)) => Self::int_arith(op, *a, *b)?,
            (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
                Self::float_arith(op, Self::as_f64(&lhs), Self::as_f64(&rhs))?
            }
            _ => return Err(self.arith_type_error()),
        };
        self.push(result)
    }

    fn as_f64(value: &Value) -> f64 {
        match value {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            _ => unreachable!("caller already matched numeric variants"),
        }
    }

    fn int_arith(op: Op, a: i64, b: i64) -> RunResult<Value> {
        Ok(match op {
            Op::Add => Value::Int(a.wrapping_add(b)),
            Op::Sub => Value::Int(a.wrapping_sub(b)),
            Op::Mul => Value::Int(a.wrapping_mul(b)),
            Op::Div => {
                if b == 0 {
                    return Err(Self::division_by_zero());
                }
                Value::Int(a.wrapping_div(b))
            }
            Op::Mod => {
                if b == 0 {
                    return Err(Self::division_by_zero());
                }
                Value::Int(a.wrapping_rem(b))
            }
            Op::BitAnd => Value::Int(a & b),
            Op::BitOr => Value::Int(a | b),
            Op::BitXor => Value::Int(a ^ b),
            Op::Shl => Value::Int(a.wrapping_shl(b as u32)),
            Op::Shr => Value::Int(a.wrapping_shr(b as u32)),
            _ => unreachable!("caller only dispatches arithmetic opcodes here"),
        })
    }

    fn float_arith(op: Op, a: f64, b: f64) -> RunResult<Value> {
        Ok(match op {
            Op::Add => Value::Float(a + b),
            Op::Sub => Value::Float(a - b),
            Op::Mul => Value::Float(a * b),
            Op::Div => {
                if b == 0.0 {
                    return Err(Self::division_by_zero());
                }
                Value::Float(a / b)
            }
            Op::Mod => Value::Float(a % b),
            _ => return Err(RunError::thrown(Value::str(format!("bitwise operator on float operand ({})", ExcKind::TypeError)))),
        })
    }

    fn division_by_zero() -> RunError {
        RunError::thrown(Value::str(format!("division by zero ({})", ExcKind::RuntimeException)))
    }

    fn arith_type_error(&self) -> RunError {
        RunError::thrown(Value::str(format!("unsupported operand types for arithmetic ({})", ExcKind::TypeError)))
    }

    pub(super) fn binary_compare(&mut self, op: Op) -> RunResult<()> {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = match op {
            Op::Equal => Self::values_equal(&lhs, &rhs),
            Op::NotEqual => !Self::values_equal(&lhs, &rhs),
            _ => {
                let ordering = Self::compare_numeric(&lhs, &rhs).ok_or_else(|| self.arith_type_error())?;
                match op {
                    Op::Less => ordering.is_lt(),
                    Op::LessEqual => ordering.is_le(),
                    Op::Greater => ordering.is_gt(),
                    Op::GreaterEqual => ordering.is_ge(),
                    _ => unreachable!("caller only dispatches comparison opcodes here"),
                }
            }
        };
        self.push(Value::Bool(result))
    }

    fn values_equal(lhs: &Value, rhs: &Value) -> bool {
        match (lhs, rhs) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            _ => lhs == rhs,
        }
    }

    fn compare_numeric(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
                Self::as_f64(lhs).partial_cmp(&Self::as_f64(rhs))
            }
            _ => None,
        }
    }

    pub(super) fn unary(&mut self, op: Op) -> RunResult<()> {
        let operand = self.pop();
        let result = match (op, &operand) {
            (Op::Neg, Value::Int(i)) => Value::Int(-i),
            (Op::Neg, Value::Float(f)) => Value::Float(-f),
            (Op::Not, _) => Value::Bool(!self.is_truthy(&operand)?),
            (Op::BitNot, Value::Int(i)) => Value::Int(!i),
            _ => return Err(self.arith_type_error()),
        };
        self.push(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{BinOp, Block, Expr, Literal, Stmt},
        bytecode::compiler::Compiler,
        concurrency::new_shared_heap,
        intern::Interns,
        namespace::NamespaceManager,
        types::Function,
    };
    use std::sync::Arc;

    fn eval(expr: Expr) -> RunResult<Value> {
        let mut interns = Interns::new();
        let body = Block { stmts: vec![Stmt::Return(Some(expr))] };
        let (code, _, sig) = Compiler::new(&mut interns, "t.long").compile_function(&[], &body).unwrap();
        let function = Arc::new(Function {
            name: interns.intern("main"),
            signature: sig,
            upvalue_descriptors: Vec::new(),
            code,
            body: Arc::new(body),
            is_static: false,
        });
        let mut namespaces = NamespaceManager::new();
        let mut sink = crate::io::CollectStringPrint::new();
        let mut tracer = crate::tracer::NoopTracer;
        let heap = new_shared_heap();
        let mut vm = Vm::new(heap, &mut namespaces, &mut interns, &mut sink, &mut tracer);
        vm.run_entry(function)
    }

    #[test]
    fn division_by_zero_is_catchable() {
        let expr = Expr::Binary {
            op: BinOp::Div,
            lhs: Box::new(Expr::Literal(Literal::Int(1))),
            rhs: Box::new(Expr::Literal(Literal::Int(0))),
        };
        let err = eval(expr).unwrap_err();
        assert!(matches!(err, RunError::Thrown(_)));
    }

    #[test]
    fn int_and_float_compare_numerically() {
        let expr = Expr::Binary {
            op: BinOp::Lt,
            lhs: Box::new(Expr::Literal(Literal::Int(1))),
            rhs: Box::new(Expr::Literal(Literal::Float(1.5))),
        };
        assert_eq!(eval(expr).unwrap(), Value::Bool(true));
    }
}
