//! Primary runtime value type (`spec.md` §3.1).
//!
//! Follows the teacher's hybrid design (`ouros/src/value.rs`): small values
//! are stored inline in the enum, everything else is a handle into shared
//! storage. Two handle kinds exist because two kinds of storage exist:
//! `Ref(HeapId)` for ephemeral, refcounted data (arrays, maps, instances,
//! closures, bound methods, channels, mutexes, waitgroups, atomics) living in
//! the shared `Heap` arena (`heap.rs`), and small `Copy` ids for data that is
//! permanent for the life of the program (classes, interfaces, enums,
//! namespace objects, builtin callables) and therefore needs no refcounting
//! at all — matching the design note that the namespace manager owns
//! classes/interfaces/enums outright.

use std::{fmt, sync::Arc};

use crate::{
    builtins::BuiltinId,
    heap::HeapId,
    namespace::{ClassId, EnumId, InterfaceId, NamespaceObjectId},
};

/// A runtime value.
///
/// `Clone` is cheap for every variant (either `Copy` data or an `Arc`/id
/// bump), but cloning a `Ref` does **not** bump the heap refcount by itself —
/// callers that store a cloned `Ref` into a new slot must go through
/// `Heap::retain`/`Heap::release` (see `heap.rs`) so the refcount stays
/// accurate. This mirrors the teacher's deliberate choice not to derive
/// `Clone` blindly for a refcounted value type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Immutable text. Indexing and `length()` operate on code points
    /// (`spec.md` §3.1), not bytes, so this wraps a `String` rather than a
    /// byte buffer with a separately tracked encoding.
    Str(Arc<str>),
    /// Ephemeral heap-allocated data: array, map, instance, closure,
    /// bound method, channel, mutex, waitgroup, atomic.
    Ref(HeapId),
    /// A user-defined class. Classes are permanent once declared, so they
    /// live in the namespace manager's class table rather than the heap.
    Class(ClassId),
    /// A user-defined interface. Permanent, same storage rationale as `Class`.
    Interface(InterfaceId),
    /// A user-defined enum type. Permanent, same storage rationale as `Class`.
    Enum(EnumId),
    /// A native function registered by the host (`spec.md` §6's built-in
    /// registry). Stateless, so it is addressed by a small stable id rather
    /// than heap-allocated.
    Builtin(BuiltinId),
    /// A named bag of fields exposing a built-in namespace (e.g. `fmt`).
    NamespaceObject(NamespaceObjectId),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Type name as it would be reported by the `typeof` built-in
    /// (`spec.md` §6). Heap-backed composite types are resolved by the
    /// caller via `Heap::type_name`, since that needs arena access.
    #[must_use]
    pub fn immediate_type_name(&self) -> Option<&'static str> {
        match self {
            Self::Null => Some("null"),
            Self::Bool(_) => Some("bool"),
            Self::Int(_) => Some("int"),
            Self::Float(_) => Some("float"),
            Self::Str(_) => Some("string"),
            Self::Class(_) => Some("class"),
            Self::Interface(_) => Some("interface"),
            Self::Enum(_) => Some("enum"),
            Self::Builtin(_) => Some("function"),
            Self::NamespaceObject(_) => Some("namespace"),
            Self::Ref(_) => None,
        }
    }

    /// Truthiness used by `if`, `&&`, `||`, `!`, and ternary conditions.
    ///
    /// `spec.md` §9 (Open Question) mandates semantic truthiness rather than
    /// the source language's pointer-comparison quirk: falsy values are
    /// `false`, `0`, `0.0`, `""`, and `null`. Everything else, including
    /// every heap reference, is truthy at this layer — emptiness checks for
    /// arrays/maps are handled by the caller where heap access is available
    /// (see `Heap::is_truthy`).
    #[must_use]
    pub fn is_truthy_immediate(&self) -> Option<bool> {
        match self {
            Self::Null => Some(false),
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::Str(s) => Some(!s.is_empty()),
            Self::Ref(_) => None,
            _ => Some(true),
        }
    }

    #[must_use]
    pub fn as_ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Ref(id) => write!(f, "<ref {id:?}>"),
            Self::Class(id) => write!(f, "<class {id:?}>"),
            Self::Interface(id) => write!(f, "<interface {id:?}>"),
            Self::Enum(id) => write!(f, "<enum {id:?}>"),
            Self::Builtin(id) => write!(f, "<builtin {id:?}>"),
            Self::NamespaceObject(id) => write!(f, "<namespace {id:?}>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_falsy() {
        assert_eq!(Value::str("").is_truthy_immediate(), Some(false));
        assert_eq!(Value::str("x").is_truthy_immediate(), Some(true));
    }

    #[test]
    fn zero_values_are_falsy() {
        assert_eq!(Value::Int(0).is_truthy_immediate(), Some(false));
        assert_eq!(Value::Float(0.0).is_truthy_immediate(), Some(false));
        assert_eq!(Value::Null.is_truthy_immediate(), Some(false));
    }
}
