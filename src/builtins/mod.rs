//! Built-in callable registry (`spec.md` §6).
//!
//! Shaped after `ouros/src/builtins/mod.rs`'s registry-enum pattern — one
//! `BuiltinId` variant per native callable, dispatched through a single
//! `call` function — crossed with `monty/src/builtins/mod.rs`'s habit of
//! keeping each builtin's actual logic in its own small submodule
//! (`fmt.rs`, `reflection.rs`, `globals.rs`) rather than one giant match arm
//! body.

pub mod concurrency;
pub mod fmt;
pub mod globals;
pub mod methods;
pub mod reflection;

use crate::{
    bytecode::vm::Vm,
    error::RunResult,
    heap::HeapData,
    namespace::{NamespaceManager, NamespaceObject},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BuiltinId {
    FmtPrint,
    FmtPrintln,
    FmtPrintf,
    Len,
    Isset,
    ParseInt,
    ParseFloat,
    ToString,
    TypeOf,
    Sleep,
    GetClassAnnotations,
    GetClassFields,
    GetClassMethods,
    GetClassInterfaces,
    GetFieldAnnotation,
    HasFieldAnnotation,
    NewInstance,
    CreateInstance,
    GetFieldValue,
    SetFieldValue,
    GetClassName,
    SetGlobal,
    GetGlobal,
    HasGlobal,
    CalledClass,
    NewChannel,
    NewMutex,
    NewWaitGroup,
    NewAtomic,
}

impl BuiltinId {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FmtPrint => "fmt.print",
            Self::FmtPrintln => "fmt.println",
            Self::FmtPrintf => "fmt.printf",
            Self::Len => "len",
            Self::Isset => "isset",
            Self::ParseInt => "parseInt",
            Self::ParseFloat => "parseFloat",
            Self::ToString => "toString",
            Self::TypeOf => "typeof",
            Self::Sleep => "sleep",
            Self::GetClassAnnotations => "__get_class_annotations",
            Self::GetClassFields => "__get_class_fields",
            Self::GetClassMethods => "__get_class_methods",
            Self::GetClassInterfaces => "__get_class_interfaces",
            Self::GetFieldAnnotation => "__get_field_annotation",
            Self::HasFieldAnnotation => "__has_field_annotation",
            Self::NewInstance => "__new_instance",
            Self::CreateInstance => "__create_instance",
            Self::GetFieldValue => "__get_field_value",
            Self::SetFieldValue => "__set_field_value",
            Self::GetClassName => "__get_class_name",
            Self::SetGlobal => "__set_global",
            Self::GetGlobal => "__get_global",
            Self::HasGlobal => "__has_global",
            Self::CalledClass => "__called_class",
            Self::NewChannel => "Channel",
            Self::NewMutex => "Mutex",
            Self::NewWaitGroup => "WaitGroup",
            Self::NewAtomic => "Atomic",
        }
    }
}

pub fn call(vm: &mut Vm, id: BuiltinId, args: Vec<Value>) -> RunResult<Value> {
    match id {
        BuiltinId::FmtPrint => fmt::print(vm, &args),
        BuiltinId::FmtPrintln => fmt::println(vm, &args),
        BuiltinId::FmtPrintf => fmt::printf(vm, &args),
        BuiltinId::Len => globals::len(vm, &args),
        BuiltinId::Isset => globals::isset(vm, &args),
        BuiltinId::ParseInt => globals::parse_int(vm, &args),
        BuiltinId::ParseFloat => globals::parse_float(vm, &args),
        BuiltinId::ToString => globals::to_string(vm, &args),
        BuiltinId::TypeOf => globals::type_of(vm, &args),
        BuiltinId::Sleep => globals::sleep(vm, &args),
        BuiltinId::GetClassAnnotations => reflection::get_class_annotations(vm, &args),
        BuiltinId::GetClassFields => reflection::get_class_fields(vm, &args),
        BuiltinId::GetClassMethods => reflection::get_class_methods(vm, &args),
        BuiltinId::GetClassInterfaces => reflection::get_class_interfaces(vm, &args),
        BuiltinId::GetFieldAnnotation => reflection::get_field_annotation(vm, &args),
        BuiltinId::HasFieldAnnotation => reflection::has_field_annotation(vm, &args),
        BuiltinId::NewInstance => reflection::new_instance(vm, &args),
        BuiltinId::CreateInstance => reflection::create_instance(vm, &args),
        BuiltinId::GetFieldValue => reflection::get_field_value(vm, &args),
        BuiltinId::SetFieldValue => reflection::set_field_value(vm, &args),
        BuiltinId::GetClassName => reflection::get_class_name(vm, &args),
        BuiltinId::SetGlobal => globals::set_global(vm, &args),
        BuiltinId::GetGlobal => globals::get_global(vm, &args),
        BuiltinId::HasGlobal => globals::has_global(vm, &args),
        BuiltinId::CalledClass => globals::called_class(vm, &args),
        BuiltinId::NewChannel => concurrency::new_channel(vm, &args),
        BuiltinId::NewMutex => concurrency::new_mutex(vm, &args),
        BuiltinId::NewWaitGroup => concurrency::new_waitgroup(vm, &args),
        BuiltinId::NewAtomic => concurrency::new_atomic(vm, &args),
    }
}

/// String conversion shared by `toString`, `fmt.print`/`println`/`printf`.
/// Heap-backed values get a structural rendering; everything else defers to
/// `Value`'s own `Display`.
pub fn to_string_value(vm: &mut Vm, value: &Value) -> String {
    let Value::Ref(id) = value else { return value.to_string() };
    let heap = vm.heap.lock();
    match heap.get(*id) {
        HeapData::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            format!("[{}]", parts.join(", "))
        }
        HeapData::Map(map) => {
            let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            format!("{{{}}}", parts.join(", "))
        }
        HeapData::Instance(inst) => format!("<instance of {}>", vm.interns.get(vm.namespaces.class(inst.class).name)),
        other => format!("<{}>", other.type_name()),
    }
}

/// Registers every built-in under its declared namespace object (`fmt`) or
/// directly as a global (everything else), per `spec.md` §6.
pub fn register(namespaces: &mut NamespaceManager, interns: &mut crate::intern::Interns, globals: &mut ahash::AHashMap<String, Value>) {
    let mut fmt_fields = ahash::AHashMap::default();
    for (id, aliases) in [
        (BuiltinId::FmtPrint, &["print"][..]),
        (BuiltinId::FmtPrintln, &["println", "Println"][..]),
        (BuiltinId::FmtPrintf, &["printf"][..]),
    ] {
        for alias in aliases {
            fmt_fields.insert(interns.intern(alias), Value::Builtin(id));
        }
    }
    namespaces.declare_namespace_object("fmt", NamespaceObject { name: interns.intern("fmt"), fields: fmt_fields });
    globals.insert("fmt".to_string(), Value::Null); // resolved via namespace table, not globals, at compile time

    for id in [
        BuiltinId::Len,
        BuiltinId::Isset,
        BuiltinId::ParseInt,
        BuiltinId::ParseFloat,
        BuiltinId::ToString,
        BuiltinId::TypeOf,
        BuiltinId::Sleep,
        BuiltinId::GetClassAnnotations,
        BuiltinId::GetClassFields,
        BuiltinId::GetClassMethods,
        BuiltinId::GetClassInterfaces,
        BuiltinId::GetFieldAnnotation,
        BuiltinId::HasFieldAnnotation,
        BuiltinId::NewInstance,
        BuiltinId::CreateInstance,
        BuiltinId::GetFieldValue,
        BuiltinId::SetFieldValue,
        BuiltinId::GetClassName,
        BuiltinId::SetGlobal,
        BuiltinId::GetGlobal,
        BuiltinId::HasGlobal,
        BuiltinId::CalledClass,
        BuiltinId::NewChannel,
        BuiltinId::NewMutex,
        BuiltinId::NewWaitGroup,
        BuiltinId::NewAtomic,
    ] {
        globals.insert(id.name().to_string(), Value::Builtin(id));
    }
}
