//! Enum type representation (`spec.md` §4.2).
//!
//! An enum declares a fixed set of named members, each optionally carrying
//! its own field values (`spec.md`'s enums are closer to Java/Kotlin enums
//! than to a bare C-style tag: a member can be constructed with arguments and
//! expose its own methods). Member *instances* are heap-allocated
//! (`heap::EnumMember`) since they're ordinary addressable values once
//! built; this type is the permanent, namespace-owned type descriptor.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{intern::StringId, types::function::Function, value::Value};

#[derive(Debug, Clone)]
pub struct EnumMemberDef {
    pub name: StringId,
    pub ordinal: u32,
    pub field_values: Vec<Value>,
}

#[derive(Debug)]
pub struct EnumDef {
    pub name: StringId,
    pub namespace: StringId,
    pub field_names: Vec<StringId>,
    pub members: Vec<EnumMemberDef>,
    pub methods: AHashMap<StringId, Arc<Function>>,
}

impl EnumDef {
    #[must_use]
    pub fn member_by_name(&self, name: StringId) -> Option<&EnumMemberDef> {
        self.members.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn member_by_ordinal(&self, ordinal: u32) -> Option<&EnumMemberDef> {
        self.members.get(ordinal as usize)
    }
}
