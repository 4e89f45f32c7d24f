//! Arithmetic, comparison, and bitwise expression evaluation (`spec.md`
//! §4.3, §8), mirroring `bytecode::vm::binary`'s semantics exactly so the
//! two back-ends never disagree on a numeric result.

use crate::{
    ast::{BinOp, UnOp},
    error::{ExcKind, RunError, RunResult},
    value::Value,
};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(super) fn eval_binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        Ok(match op {
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::Mod
            | BinOp::BitAnd
            | BinOp::BitOr
            | BinOp::BitXor
            | BinOp::Shl
            | BinOp::Shr => self.arith(op, lhs, rhs)?,
            BinOp::Eq => Value::Bool(Self::values_equal(&lhs, &rhs)),
            BinOp::NotEq => Value::Bool(!Self::values_equal(&lhs, &rhs)),
            BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                let ordering = Self::compare_numeric(&lhs, &rhs).ok_or_else(|| self.arith_type_error())?;
                Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::LtEq => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::GtEq => ordering.is_ge(),
                    _ => unreachable!("caller only dispatches comparisons here"),
                })
            }
            BinOp::And => Value::Bool(self.is_truthy(&lhs)? && self.is_truthy(&rhs)?),
            BinOp::Or => Value::Bool(self.is_truthy(&lhs)? || self.is_truthy(&rhs)?),
        })
    }

    fn arith(&self, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        match (&lhs, &rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) if op == BinOp::Add => Ok(Value::str(format!("{lhs}{rhs}"))),
            (Value::Int(a), Value::Int(b)) => Self::int_arith(op, *a, *b),
            (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
                Self::float_arith(op, Self::as_f64(&lhs), Self::as_f64(&rhs))
            }
            _ => Err(self.arith_type_error()),
        }
    }

    fn as_f64(value: &Value) -> f64 {
        match value {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            _ => unreachable!("caller already matched numeric variants"),
        }
    }

    fn int_arith(op: BinOp, a: i64, b: i64) -> RunResult<Value> {
        Ok(match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div => {
                if b == 0 {
                    return Err(Self::division_by_zero());
                }
                Value::Int(a.wrapping_div(b))
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(Self::division_by_zero());
                }
                Value::Int(a.wrapping_rem(b))
            }
            BinOp::BitAnd => Value::Int(a & b),
            BinOp::BitOr => Value::Int(a | b),
            BinOp::BitXor => Value::Int(a ^ b),
            BinOp::Shl => Value::Int(a.wrapping_shl(b as u32)),
            BinOp::Shr => Value::Int(a.wrapping_shr(b as u32)),
            _ => unreachable!("caller only dispatches arithmetic here"),
        })
    }

    fn float_arith(op: BinOp, a: f64, b: f64) -> RunResult<Value> {
        Ok(match op {
            BinOp::Add => Value::Float(a + b),
            BinOp::Sub => Value::Float(a - b),
            BinOp::Mul => Value::Float(a * b),
            BinOp::Div => {
                if b == 0.0 {
                    return Err(Self::division_by_zero());
                }
                Value::Float(a / b)
            }
            BinOp::Mod => Value::Float(a % b),
            _ => return Err(RunError::thrown(Value::str(format!("bitwise operator on float operand ({})", ExcKind::TypeError)))),
        })
    }

    fn division_by_zero() -> RunError {
        RunError::thrown(Value::str(format!("division by zero ({})", ExcKind::RuntimeException)))
    }

    fn arith_type_error(&self) -> RunError {
        RunError::thrown(Value::str(format!("unsupported operand types for arithmetic ({})", ExcKind::TypeError)))
    }

    pub(super) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
        match (lhs, rhs) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            _ => lhs == rhs,
        }
    }

    fn compare_numeric(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => Self::as_f64(lhs).partial_cmp(&Self::as_f64(rhs)),
            _ => None,
        }
    }

    pub(super) fn eval_unary(&mut self, op: UnOp, operand: Value) -> RunResult<Value> {
        Ok(match (op, &operand) {
            (UnOp::Neg, Value::Int(i)) => Value::Int(-i),
            (UnOp::Neg, Value::Float(f)) => Value::Float(-f),
            (UnOp::Not, _) => Value::Bool(!self.is_truthy(&operand)?),
            (UnOp::BitNot, Value::Int(i)) => Value::Int(!i),
            _ => return Err(self.arith_type_error()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{concurrency::new_shared_heap, intern::Interns, namespace::NamespaceManager};

    fn eval() -> Evaluator<'static> {
        // Leaked for test convenience: short-lived unit tests only.
        let namespaces: &'static mut NamespaceManager = Box::leak(Box::new(NamespaceManager::new()));
        let interns: &'static mut Interns = Box::leak(Box::new(Interns::new()));
        let printer: &'static mut crate::io::CollectStringPrint = Box::leak(Box::new(crate::io::CollectStringPrint::new()));
        let tracer: &'static mut crate::tracer::NoopTracer = Box::leak(Box::new(crate::tracer::NoopTracer));
        Evaluator::new(new_shared_heap(), namespaces, interns, printer, tracer)
    }

    #[test]
    fn division_by_zero_is_catchable() {
        let mut ev = eval();
        let err = ev.eval_binary(BinOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert!(matches!(err, RunError::Thrown(_)));
    }

    #[test]
    fn int_and_float_compare_numerically() {
        let mut ev = eval();
        assert_eq!(ev.eval_binary(BinOp::Lt, Value::Int(1), Value::Float(1.5)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn string_concatenation_coerces_the_other_operand() {
        let mut ev = eval();
        assert_eq!(ev.eval_binary(BinOp::Add, Value::str("x="), Value::Int(3)).unwrap(), Value::str("x=3"));
    }
}
