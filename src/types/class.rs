//! Class object representation (`spec.md` §4.2, §4.5).
//!
//! Grounded on the teacher's `types/class.rs`, minus MRO: `spec.md` only ever
//! describes single inheritance plus interface implementation, so there is
//! one `parent` slot rather than a linearized lookup chain.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    intern::StringId,
    namespace::{ClassId, InterfaceId},
    types::function::Function,
    value::Value,
};

#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub entries: AHashMap<StringId, Value>,
}

impl Annotations {
    #[must_use]
    pub fn get(&self, name: StringId) -> Option<&Value> {
        self.entries.get(&name)
    }

    #[must_use]
    pub fn has(&self, name: StringId) -> bool {
        self.entries.contains_key(&name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: StringId,
    pub default: Value,
    pub is_static: bool,
    pub annotations: Annotations,
}

#[derive(Debug)]
pub struct Class {
    pub name: StringId,
    pub namespace: StringId,
    pub parent: Option<ClassId>,
    pub interfaces: Vec<InterfaceId>,
    pub fields: Vec<FieldDef>,
    pub methods: AHashMap<StringId, Arc<Function>>,
    pub static_fields: AHashMap<StringId, Value>,
    pub is_abstract: bool,
    pub annotations: Annotations,
}

impl Class {
    /// Looks a method up through the inheritance chain; `classes` is the
    /// namespace manager's class table so this can walk `parent` links.
    #[must_use]
    pub fn resolve_method<'a>(
        &'a self,
        name: StringId,
        classes: &'a (impl Fn(ClassId) -> &'a Class + Copy),
    ) -> Option<&'a Arc<Function>> {
        if let Some(f) = self.methods.get(&name) {
            return Some(f);
        }
        self.parent.map(classes).and_then(|p| p.resolve_method(name, classes))
    }

    #[must_use]
    pub fn field_default(&self, name: StringId) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}
