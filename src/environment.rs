//! Lexical scope chain for the tree-walking evaluator (`spec.md` §4.1).
//!
//! `spec.md` §9 resolves the open question of shadowing vs. mutation in
//! favor of shadow-not-mutate: `Set` on a name declared in an outer scope
//! creates a new binding in the current scope rather than reaching through
//! to mutate the outer one, so `let`-rebinding inside an `if` block never
//! leaks out. This rules out reusing the teacher's slot-indexed namespace
//! table directly (that table is built for single-function scopes, not an
//! arbitrarily nested block chain), so the chain here is a plain
//! outer-pointer linked structure instead.
//!
//! Scopes are `Arc<parking_lot::Mutex<_>>` rather than `Rc<RefCell<_>>`
//! specifically so a closure created by the evaluator can be handed to
//! `std::thread::spawn` when `spawn expr` targets a closure literal
//! (`spec.md` §4.8): the evaluator's closures capture the whole defining
//! `Environment` by reference rather than resolving individual upvalues the
//! way the bytecode compiler does, so that reference has to be `Send` on its
//! own merits.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::value::Value;

#[derive(Debug, Default)]
struct Scope {
    bindings: AHashMap<String, Value>,
}

/// A lexical scope, reference-counted so closures can capture it directly.
#[derive(Debug, Clone)]
pub struct Environment {
    scope: Arc<Mutex<Scope>>,
    outer: Option<Arc<Environment>>,
}

impl Environment {
    #[must_use]
    pub fn root() -> Self {
        Self { scope: Arc::new(Mutex::new(Scope::default())), outer: None }
    }

    /// Pushes a new child scope on top of `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { scope: Arc::new(Mutex::new(Scope::default())), outer: Some(Arc::new(self.clone())) }
    }

    /// Declares a fresh binding in the *current* scope, shadowing any outer
    /// binding of the same name for the remainder of this scope's lifetime.
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.scope.lock().bindings.insert(name.into(), value);
    }

    /// Looks a name up through the chain, innermost scope first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.scope.lock().bindings.get(name) {
            return Some(v.clone());
        }
        self.outer.as_ref().and_then(|outer| outer.get(name))
    }

    /// Assigns to the nearest existing binding of `name`, walking outward.
    /// Returns `false` if no such binding exists anywhere in the chain (the
    /// caller should then `declare` into the global scope per `spec.md`
    /// §4.1's "implicit global declaration on first assignment outside any
    /// function", or raise an unknown-name diagnostic if that is not valid
    /// in the current context).
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if self.scope.lock().bindings.contains_key(name) {
            self.scope.lock().bindings.insert(name.to_string(), value);
            return true;
        }
        match &self.outer {
            Some(outer) => outer.assign(name, value),
            None => false,
        }
    }

    /// Declares in the current scope regardless of whether an outer binding
    /// exists, implementing shadow-not-mutate `let` semantics.
    pub fn declare_shadowing(&self, name: impl Into<String>, value: Value) {
        self.declare(name, value);
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.outer.is_none()
    }

    /// Snapshot of every name visible at this point, innermost shadowing
    /// outer bindings of the same name.
    #[must_use]
    pub fn snapshot(&self) -> AHashMap<String, Value> {
        let mut out = AHashMap::default();
        let mut frames = Vec::new();
        let mut cur = Some(self);
        while let Some(env) = cur {
            frames.push(env);
            cur = env.outer.as_deref();
        }
        for env in frames.into_iter().rev() {
            for (k, v) in &env.scope.lock().bindings {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_does_not_leak_to_outer_scope() {
        let root = Environment::root();
        root.declare("x", Value::Int(1));
        let inner = root.child();
        inner.declare_shadowing("x", Value::Int(2));
        assert_eq!(inner.get("x"), Some(Value::Int(2)));
        assert_eq!(root.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn assign_reaches_through_to_outer_binding() {
        let root = Environment::root();
        root.declare("x", Value::Int(1));
        let inner = root.child();
        assert!(inner.assign("x", Value::Int(42)));
        assert_eq!(root.get("x"), Some(Value::Int(42)));
    }

    #[test]
    fn assign_to_unknown_name_fails() {
        let root = Environment::root();
        assert!(!root.assign("missing", Value::Null));
    }

    #[test]
    fn shared_scope_mutation_is_visible_through_every_clone() {
        let root = Environment::root();
        root.declare("counter", Value::Int(0));
        let alias = root.clone();
        alias.assign("counter", Value::Int(1));
        assert_eq!(root.get("counter"), Some(Value::Int(1)));
    }
}
