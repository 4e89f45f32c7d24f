//! String interner used by the compiler's constant pool and by global/attribute
//! name lookup.
//!
//! Mirrors the teacher's `intern.rs`: a bidirectional table between owned
//! strings and small `Copy` ids, so the bytecode stream and constant pool can
//! carry a two-byte index instead of repeating string data.

use ahash::AHashMap;

/// Id of an interned string. Stable for the lifetime of the `Interns` table
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Builds a `StringId` from a raw index, bypassing an `Interns` table.
    /// Only legitimate for ids already known to have been interned elsewhere
    /// (e.g. reusing a well-known sentinel) or in tests.
    #[must_use]
    pub fn from_raw(v: u32) -> Self {
        Self(v)
    }
}

/// Append-only string interner.
///
/// Strings are never removed: class names, method names, and identifiers
/// live for the lifetime of the program, so there is no reclamation to do.
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<Box<str>>,
    index: AHashMap<Box<str>, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its stable id. Repeated interning of the same
    /// text returns the same id.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = StringId(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.index.insert(boxed.clone(), id);
        self.strings.push(boxed);
        id
    }

    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.index.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_equal_strings() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("hello");
        assert_eq!(a, b);
        assert_eq!(interns.get(a), "hello");
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut interns = Interns::new();
        let a = interns.intern("a");
        let b = interns.intern("b");
        assert_ne!(a, b);
    }
}
