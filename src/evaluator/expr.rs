//! Expression evaluation (`spec.md` §4.1-§4.5), dispatching every
//! `ast::Expr` variant to the helpers in `binary.rs`, `collections.rs`,
//! `classes.rs`, and `call.rs`.

use crate::{ast, environment::Environment, error::RunResult, value::Value};

use super::Evaluator;

impl<'a> Evaluator<'a> {
    pub(super) fn eval_expr(&mut self, expr: &ast::Expr, env: &Environment) -> RunResult<Value> {
        match expr {
            ast::Expr::Literal(lit) => Ok(Self::eval_literal(lit)),
            ast::Expr::Identifier(name) => Ok(self.lookup_identifier(*name, env)),
            ast::Expr::This => Ok(env.get("this").unwrap_or(Value::Null)),
            ast::Expr::ArrayLiteral(items) => {
                let values = items.iter().map(|e| self.eval_expr(e, env)).collect::<RunResult<Vec<_>>>()?;
                Ok(self.make_array(values))
            }
            ast::Expr::MapLiteral(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = self.eval_expr(k, env)?;
                    let value = self.eval_expr(v, env)?;
                    pairs.push((key, value));
                }
                Ok(self.make_map(pairs))
            }
            ast::Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval_expr(lhs, env)?;
                let rhs = self.eval_expr(rhs, env)?;
                self.eval_binary(*op, lhs, rhs)
            }
            ast::Expr::Unary { op, operand } => {
                let operand = self.eval_expr(operand, env)?;
                self.eval_unary(*op, operand)
            }
            ast::Expr::Ternary { cond, then_expr, else_expr } => {
                let cond = self.eval_expr(cond, env)?;
                if self.is_truthy(&cond)? {
                    self.eval_expr(then_expr, env)
                } else {
                    self.eval_expr(else_expr, env)
                }
            }
            ast::Expr::Call { callee, args } => {
                let callee = self.eval_expr(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.eval_call(callee, args)
            }
            ast::Expr::Index { target, index } => {
                let target = self.eval_expr(target, env)?;
                let index = self.eval_expr(index, env)?;
                self.get_index(target, index)
            }
            ast::Expr::Property { target, name } => {
                let target = self.eval_expr(target, env)?;
                let name = self.interns.get(*name).to_string();
                self.get_property(target, &name)
            }
            ast::Expr::StaticProperty { class_path, name } => {
                let name = self.interns.get(*name).to_string();
                self.get_static_property(class_path, &name)
            }
            ast::Expr::MethodCall { target, name, args } => {
                let target = self.eval_expr(target, env)?;
                let args = self.eval_args(args, env)?;
                let name = self.interns.get(*name).to_string();
                self.eval_method_call(target, &name, args)
            }
            ast::Expr::StaticCall { class_path, name, args, via_static_binding } => {
                let args = self.eval_args(args, env)?;
                let name = self.interns.get(*name).to_string();
                self.eval_static_call(class_path, &name, args, *via_static_binding)
            }
            ast::Expr::New { class_path, args } => {
                let args = self.eval_args(args, env)?;
                self.eval_new(class_path, args)
            }
            ast::Expr::Super { method, args } => {
                let args = self.eval_args(args, env)?;
                let name = self.interns.get(*method).to_string();
                let this = env.get("this");
                self.eval_super(&name, args, this)
            }
            ast::Expr::InstanceOf { value, type_path } => {
                let value = self.eval_expr(value, env)?;
                Ok(Value::Bool(self.eval_instance_of(value, type_path)))
            }
            ast::Expr::TypeAssert { value, type_path, safe } => {
                let value = self.eval_expr(value, env)?;
                self.eval_type_assert(value, type_path, *safe)
            }
            ast::Expr::Closure { params, body, captures_this } => self.eval_closure(params, body, *captures_this, env),
            ast::Expr::FString { parts } => self.eval_fstring(parts, env),
        }
    }

    fn eval_args(&mut self, args: &[ast::Expr], env: &Environment) -> RunResult<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(a, env)).collect()
    }

    fn eval_literal(lit: &ast::Literal) -> Value {
        match lit {
            ast::Literal::Null => Value::Null,
            ast::Literal::Bool(b) => Value::Bool(*b),
            ast::Literal::Int(i) => Value::Int(*i),
            ast::Literal::Float(f) => Value::Float(*f),
            ast::Literal::Str(s) => Value::Str(s.clone()),
        }
    }

    /// Bare identifiers resolve through the lexical scope chain first, then
    /// fall back to the implicit-global table, and finally to `null` — the
    /// same silent-miss behavior as the bytecode VM's `GetGlobal` (`spec.md`
    /// §4.1 has no "undefined variable" error).
    fn lookup_identifier(&self, name: crate::intern::StringId, env: &Environment) -> Value {
        let text = self.interns.get(name);
        if let Some(value) = env.get(text) {
            return value;
        }
        self.globals.get(text).cloned().unwrap_or(Value::Null)
    }

    /// String interpolation (`spec.md` §3.1): each part is concatenated via
    /// `+`'s string-coercion, mirroring the bytecode compiler's
    /// `compile_fstring` approach of lowering interpolation to repeated
    /// string concatenation rather than a dedicated opcode.
    fn eval_fstring(&mut self, parts: &[ast::FStringPart], env: &Environment) -> RunResult<Value> {
        let mut out = Value::str("");
        for part in parts {
            let piece = match part {
                ast::FStringPart::Literal(s) => Value::Str(s.clone()),
                ast::FStringPart::Expr(expr) => self.eval_expr(expr, env)?,
            };
            out = self.eval_binary(ast::BinOp::Add, out, piece)?;
        }
        Ok(out)
    }
}
