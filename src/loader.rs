//! Declaration loader (`spec.md` §4.2, §4.4): walks a parsed `ast::Program`
//! and registers its class/interface/enum declarations into a
//! `NamespaceManager`, resolving each class's `parent`/`interfaces` and each
//! interface's `extends` against names already declared earlier in the
//! program.
//!
//! `spec.md`'s bytecode/compiler sections describe `class`/`interface`/
//! `enum`/`namespace`/`use` as statement-level compilation rules. This crate
//! already models them as `ast::Item` variants hanging off `ast::Program`
//! rather than as `ast::Stmt` variants — the same way `Item::Function` sits
//! outside `Stmt` for ordinary top-level functions — so this loader walks
//! `Program`/`Item`, not a new family of statements; see `DESIGN.md` for the
//! reasoning.
//!
//! Declarations are resolved in a single left-to-right pass: a class naming
//! a parent or interface must follow that parent/interface's own `Item` in
//! the same program (or have it declared in an already-loaded program).
//! There is no forward-reference fixup pass, matching the rest of this crate's
//! preference for small, direct, single-pass machinery (`project.rs`'s
//! manifest parser, the bytecode compiler's single walk over the AST) over a
//! resolve-then-link compiler architecture.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    ast,
    bytecode::compiler::Compiler,
    concurrency::SharedHeap,
    environment::Environment,
    error::{CompileError, CompileErrorKind, CompileResult},
    heap::{Closure, HeapData, TreeClosure},
    intern::{Interns, StringId},
    namespace::{ClassId, InterfaceId, NamespaceManager, Symbol, Visibility as NsVisibility},
    types::{Annotations, Class, EnumDef, EnumMemberDef, FieldDef, Function, Interface, MethodSignature, Param, Signature},
    value::Value,
};

/// Top-level (non-method) functions a program declares, compiled but not yet
/// installed as callables. Installing them needs a live heap to allocate a
/// closure into, which doesn't exist yet at load time — see
/// [`install_vm_globals`]/[`install_evaluator_globals`].
pub struct LoadedProgram {
    pub functions: Vec<(StringId, Arc<Function>)>,
}

/// Registers every class/interface/enum in `program` into `namespaces`, and
/// compiles every top-level function. `file` both tags compile errors and
/// keys `NamespaceManager`'s `use`-cycle detector.
pub fn load_program(namespaces: &mut NamespaceManager, interns: &mut Interns, file: &str, program: &ast::Program) -> CompileResult<LoadedProgram> {
    namespaces.begin_loading(file).map_err(|kind| CompileError::new(kind, file, 0))?;
    let result = load_items(namespaces, interns, file, program);
    namespaces.finish_loading(file);
    result
}

fn load_items(namespaces: &mut NamespaceManager, interns: &mut Interns, file: &str, program: &ast::Program) -> CompileResult<LoadedProgram> {
    let ns_path = program.namespace.clone().unwrap_or_default();

    for use_decl in &program.uses {
        namespaces.resolve_use(&use_decl.path, &ns_path).map_err(|kind| CompileError::new(kind, file, use_decl.span.line))?;
    }

    let mut functions = Vec::new();
    for item in &program.items {
        match item {
            ast::Item::Function(decl) => functions.push((decl.name, compile_method(interns, file, decl)?)),
            ast::Item::Interface(decl) => declare_interface(namespaces, interns, file, &ns_path, decl)?,
            ast::Item::Class(decl) => declare_class(namespaces, interns, file, &ns_path, decl)?,
            ast::Item::Enum(decl) => declare_enum(namespaces, interns, file, &ns_path, decl)?,
        }
    }
    Ok(LoadedProgram { functions })
}

/// Allocates each loaded top-level function as a bytecode closure and
/// installs it into `globals` under its name, for the `Vm` backend.
pub fn install_vm_globals(loaded: &LoadedProgram, interns: &Interns, heap: &SharedHeap, globals: &mut AHashMap<String, Value>) {
    let mut heap = heap.lock();
    for (name, function) in &loaded.functions {
        let closure = heap.alloc(HeapData::Closure(Closure { function: function.clone(), upvalues: Vec::new() }));
        globals.insert(interns.get(*name).to_string(), closure);
    }
}

/// Same, for the tree-walking evaluator: each function closes over an empty
/// root environment, since a top-level function captures nothing.
pub fn install_evaluator_globals(loaded: &LoadedProgram, interns: &Interns, heap: &SharedHeap, globals: &mut AHashMap<String, Value>) {
    let mut heap = heap.lock();
    for (name, function) in &loaded.functions {
        let closure = heap.alloc(HeapData::TreeClosure(TreeClosure {
            function: function.clone(),
            env: Environment::root(),
            this: None,
            called_class: None,
        }));
        globals.insert(interns.get(*name).to_string(), closure);
    }
}

fn fqn(ns_path: &str, name: &str) -> String {
    if ns_path.is_empty() {
        name.to_string()
    } else {
        format!("{ns_path}.{name}")
    }
}

fn to_ns_visibility(v: ast::Visibility) -> NsVisibility {
    match v {
        ast::Visibility::Public => NsVisibility::Public,
        ast::Visibility::Internal => NsVisibility::Internal,
    }
}

/// Folds the constant expressions `spec.md` allows for field/parameter/
/// annotation-argument defaults (literals, and negation of a numeric
/// literal). Anything else — a call, a variable read — has no value yet at
/// declaration time and falls back to `null`.
fn const_eval(expr: &ast::Expr) -> Value {
    match expr {
        ast::Expr::Literal(ast::Literal::Null) => Value::Null,
        ast::Expr::Literal(ast::Literal::Bool(b)) => Value::Bool(*b),
        ast::Expr::Literal(ast::Literal::Int(i)) => Value::Int(*i),
        ast::Expr::Literal(ast::Literal::Float(f)) => Value::Float(*f),
        ast::Expr::Literal(ast::Literal::Str(s)) => Value::Str(s.clone()),
        ast::Expr::Unary { op: ast::UnOp::Neg, operand } => match const_eval(operand) {
            Value::Int(i) => Value::Int(-i),
            Value::Float(f) => Value::Float(-f),
            other => other,
        },
        _ => Value::Null,
    }
}

fn build_annotations(decls: &[ast::Annotation]) -> Annotations {
    let mut entries = AHashMap::default();
    for decl in decls {
        let value = decl.args.first().map_or(Value::Bool(true), const_eval);
        entries.insert(decl.name, value);
    }
    Annotations { entries }
}

fn convert_params(params: &[ast::Param]) -> Vec<Param> {
    params.iter().map(|p| Param { name: p.name, default: p.default.as_ref().map(const_eval), variadic: p.variadic }).collect()
}

fn compile_method(interns: &mut Interns, file: &str, decl: &ast::FunctionDecl) -> CompileResult<Arc<Function>> {
    let mut compiler = Compiler::new(interns, file.to_string());
    let (code, upvalue_descriptors, signature) = compiler.compile_function(&decl.params, &decl.body)?;
    Ok(Arc::new(Function { name: decl.name, signature, upvalue_descriptors, code, body: decl.body.clone(), is_static: decl.is_static }))
}

fn resolve_class_id(namespaces: &NamespaceManager, file: &str, ns_path: &str, path: &str) -> CompileResult<ClassId> {
    match namespaces.resolve_use(path, ns_path) {
        Ok(Symbol::Class(id)) => Ok(id),
        Ok(_) => Err(CompileError::new(CompileErrorKind::InvalidContext { what: format!("'{path}' is not a class") }, file, 0)),
        Err(kind) => Err(CompileError::new(kind, file, 0)),
    }
}

fn resolve_interface_id(namespaces: &NamespaceManager, file: &str, ns_path: &str, path: &str) -> CompileResult<InterfaceId> {
    match namespaces.resolve_use(path, ns_path) {
        Ok(Symbol::Interface(id)) => Ok(id),
        Ok(_) => Err(CompileError::new(CompileErrorKind::InvalidContext { what: format!("'{path}' is not an interface") }, file, 0)),
        Err(kind) => Err(CompileError::new(kind, file, 0)),
    }
}

fn declare_class(namespaces: &mut NamespaceManager, interns: &mut Interns, file: &str, ns_path: &str, decl: &ast::ClassDecl) -> CompileResult<()> {
    let name_text = interns.get(decl.name).to_string();
    let fqn_str = fqn(ns_path, &name_text);

    let parent = match &decl.parent {
        Some(path) => Some(resolve_class_id(namespaces, file, ns_path, path)?),
        None => None,
    };
    let interfaces = decl.interfaces.iter().map(|path| resolve_interface_id(namespaces, file, ns_path, path)).collect::<CompileResult<Vec<_>>>()?;

    let mut fields = Vec::with_capacity(decl.fields.len());
    let mut static_fields = AHashMap::default();
    for field in &decl.fields {
        let default = field.default.as_ref().map_or(Value::Null, const_eval);
        if field.is_static {
            static_fields.insert(field.name, default.clone());
        }
        fields.push(FieldDef { name: field.name, default, is_static: field.is_static, annotations: build_annotations(&field.annotations) });
    }

    let mut methods = AHashMap::default();
    for method in &decl.methods {
        methods.insert(method.name, compile_method(interns, file, method)?);
    }

    let class = Class {
        name: decl.name,
        namespace: interns.intern(ns_path),
        parent,
        interfaces,
        fields,
        methods,
        static_fields,
        is_abstract: decl.is_abstract,
        annotations: build_annotations(&decl.annotations),
    };
    namespaces.declare_class(&fqn_str, ns_path, to_ns_visibility(decl.visibility), class);
    Ok(())
}

fn declare_interface(namespaces: &mut NamespaceManager, interns: &mut Interns, file: &str, ns_path: &str, decl: &ast::InterfaceDecl) -> CompileResult<()> {
    let name_text = interns.get(decl.name).to_string();
    let fqn_str = fqn(ns_path, &name_text);

    let extends = decl.extends.iter().map(|path| resolve_interface_id(namespaces, file, ns_path, path)).collect::<CompileResult<Vec<_>>>()?;
    let methods = decl
        .methods
        .iter()
        .map(|m| MethodSignature { name: m.name, signature: Signature { params: convert_params(&m.params) } })
        .collect();

    let iface = Interface { name: decl.name, namespace: interns.intern(ns_path), extends, methods };
    namespaces.declare_interface(&fqn_str, ns_path, to_ns_visibility(decl.visibility), iface);
    Ok(())
}

fn declare_enum(namespaces: &mut NamespaceManager, interns: &mut Interns, file: &str, ns_path: &str, decl: &ast::EnumDecl) -> CompileResult<()> {
    let name_text = interns.get(decl.name).to_string();
    let fqn_str = fqn(ns_path, &name_text);

    let members = decl
        .members
        .iter()
        .enumerate()
        .map(|(ordinal, m)| EnumMemberDef { name: m.name, ordinal: ordinal as u32, field_values: m.args.iter().map(const_eval).collect() })
        .collect();

    let mut methods = AHashMap::default();
    for method in &decl.methods {
        methods.insert(method.name, compile_method(interns, file, method)?);
    }

    let def = EnumDef { name: decl.name, namespace: interns.intern(ns_path), field_names: decl.fields.clone(), members, methods };
    namespaces.declare_enum(&fqn_str, ns_path, to_ns_visibility(decl.visibility), def);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(line: u32) -> ast::Span {
        ast::Span { line }
    }

    #[test]
    fn declares_a_class_with_a_resolved_parent_and_interface() {
        let mut namespaces = NamespaceManager::new();
        let mut interns = Interns::new();
        let animal = interns.intern("Animal");
        let speaks = interns.intern("Speaks");
        let speak = interns.intern("speak");
        let dog = interns.intern("Dog");

        let program = ast::Program {
            namespace: Some("app".to_string()),
            uses: Vec::new(),
            items: vec![
                ast::Item::Interface(ast::InterfaceDecl {
                    name: speaks,
                    visibility: ast::Visibility::Public,
                    extends: Vec::new(),
                    methods: vec![ast::InterfaceMethodDecl { name: speak, params: Vec::new() }],
                    span: parse_line(1),
                }),
                ast::Item::Class(ast::ClassDecl {
                    name: animal,
                    visibility: ast::Visibility::Public,
                    is_abstract: false,
                    parent: None,
                    interfaces: vec!["app.Speaks".to_string()],
                    fields: Vec::new(),
                    methods: Vec::new(),
                    annotations: Vec::new(),
                    span: parse_line(2),
                }),
                ast::Item::Class(ast::ClassDecl {
                    name: dog,
                    visibility: ast::Visibility::Public,
                    is_abstract: false,
                    parent: Some("app.Animal".to_string()),
                    interfaces: Vec::new(),
                    fields: Vec::new(),
                    methods: Vec::new(),
                    annotations: Vec::new(),
                    span: parse_line(3),
                }),
            ],
        };

        let loaded = load_program(&mut namespaces, &mut interns, "app.long", &program).unwrap();
        assert!(loaded.functions.is_empty());

        let Symbol::Class(dog_id) = namespaces.resolve_use("app.Dog", "app").unwrap() else { panic!("expected a class") };
        let dog_class = namespaces.class(dog_id);
        let Symbol::Class(animal_id) = namespaces.resolve_use("app.Animal", "app").unwrap() else { panic!("expected a class") };
        assert_eq!(dog_class.parent, Some(animal_id));

        let animal_class = namespaces.class(animal_id);
        assert_eq!(animal_class.interfaces.len(), 1);
    }

    #[test]
    fn referencing_an_undeclared_parent_is_an_error() {
        let mut namespaces = NamespaceManager::new();
        let mut interns = Interns::new();
        let name = interns.intern("Orphan");
        let program = ast::Program {
            namespace: None,
            uses: Vec::new(),
            items: vec![ast::Item::Class(ast::ClassDecl {
                name,
                visibility: ast::Visibility::Public,
                is_abstract: false,
                parent: Some("Nobody".to_string()),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                annotations: Vec::new(),
                span: parse_line(1),
            })],
        };
        assert!(load_program(&mut namespaces, &mut interns, "orphan.long", &program).is_err());
    }

    #[test]
    fn loading_the_same_file_twice_concurrently_is_rejected() {
        let mut namespaces = NamespaceManager::new();
        namespaces.begin_loading("a.long").unwrap();
        let mut interns = Interns::new();
        let program = ast::Program { namespace: None, uses: Vec::new(), items: Vec::new() };
        assert!(load_program(&mut namespaces, &mut interns, "a.long", &program).is_err());
    }
}
