//! Interface representation (`spec.md` §4.2).
//!
//! Interfaces carry no code, only a method-signature contract and an
//! `extends` list of other interfaces; `instanceof` against an interface
//! walks a class's declared `interfaces` list plus each of those interfaces'
//! own `extends` chain.

use crate::{intern::StringId, namespace::InterfaceId, types::function::Signature};

#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: StringId,
    pub signature: Signature,
}

#[derive(Debug)]
pub struct Interface {
    pub name: StringId,
    pub namespace: StringId,
    pub extends: Vec<InterfaceId>,
    pub methods: Vec<MethodSignature>,
}
