//! End-to-end scenarios exercising both execution back-ends against hand-built
//! `ast::Program`s (there is no lexer/parser in this crate — see `ast.rs`'s
//! own doc comment). Each scenario is run on the bytecode VM; the ones that
//! don't touch concurrency are also run on the tree-walking evaluator to
//! check the two back-ends agree, matching `spec.md` §2's parity requirement.

use std::sync::Arc;

use longlang::{
    ast::{self, BinOp, Block, ClassDecl, Expr, FieldDecl, FunctionDecl, Item, Literal, Param, Program, Span, Stmt, Visibility},
    builtins,
    bytecode::{compiler::Compiler, vm::Vm},
    concurrency::new_shared_heap,
    evaluator::Evaluator,
    intern::Interns,
    io::CollectStringPrint,
    loader,
    namespace::NamespaceManager,
    tracer::NoopTracer,
    types::Function,
    value::Value,
};

fn span() -> Span {
    Span { line: 0 }
}

fn lit_int(i: i64) -> Expr {
    Expr::Literal(Literal::Int(i))
}

fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::Str(Arc::from(s)))
}

fn ident(interns: &mut Interns, name: &str) -> Expr {
    Expr::Identifier(interns.intern(name))
}

fn run_vm(interns: &mut Interns, namespaces: &mut NamespaceManager, body: &Block, with_builtins: bool) -> Value {
    let (code, _upvalues, sig) = Compiler::new(interns, "test.long").compile_function(&[], body).unwrap();
    let function = Arc::new(Function {
        name: interns.intern("main"),
        signature: sig,
        upvalue_descriptors: Vec::new(),
        code,
        body: Arc::new(body.clone()),
        is_static: false,
    });
    let mut sink = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let heap = new_shared_heap();
    let mut vm = Vm::new(heap, namespaces, interns, &mut sink, &mut tracer);
    if with_builtins {
        builtins::register(vm.namespaces, vm.interns, &mut vm.globals);
    }
    vm.run_entry(function).unwrap()
}

fn run_evaluator(interns: &mut Interns, namespaces: &mut NamespaceManager, body: &Block, with_builtins: bool) -> Value {
    let function = Arc::new(Function {
        name: interns.intern("main"),
        signature: longlang::types::Signature { params: Vec::new() },
        upvalue_descriptors: Vec::new(),
        code: longlang::bytecode::code::Code::default(),
        body: Arc::new(body.clone()),
        is_static: false,
    });
    let mut sink = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let heap = new_shared_heap();
    let mut ev = Evaluator::new(heap, namespaces, interns, &mut sink, &mut tracer);
    if with_builtins {
        builtins::register(ev.namespaces, ev.interns, &mut ev.globals);
    }
    ev.run_entry(function).unwrap()
}

/// `for i in 0..=3 { sum = sum + i }` — a range loop accumulating into an
/// outer local, on both back-ends.
#[test]
fn for_range_sums_to_six() {
    let mut interns = Interns::new();
    let sum = interns.intern("sum");
    let i = interns.intern("i");
    let body = Block {
        stmts: vec![
            Stmt::Let { name: sum, value: lit_int(0), span: span() },
            Stmt::ForRange {
                var: i,
                start: lit_int(0),
                end: lit_int(3),
                inclusive: true,
                body: Block {
                    stmts: vec![Stmt::Assign {
                        target: Expr::Identifier(sum),
                        value: Expr::Binary { op: BinOp::Add, lhs: Box::new(Expr::Identifier(sum)), rhs: Box::new(Expr::Identifier(i)) },
                        span: span(),
                    }],
                },
            },
            Stmt::Return(Some(Expr::Identifier(sum))),
        ],
    };

    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &body, false), Value::Int(6));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &body, false), Value::Int(6));
}

/// A closure sharing an upvalue with its defining scope: two calls to the
/// same counter closure accumulate into the same captured local.
#[test]
fn closure_shares_upvalue_across_calls() {
    let mut interns = Interns::new();
    let count = interns.intern("count");
    let inc = interns.intern("inc");
    let n = interns.intern("n");

    let closure_body = Block {
        stmts: vec![
            Stmt::Assign {
                target: Expr::Identifier(count),
                value: Expr::Binary { op: BinOp::Add, lhs: Box::new(Expr::Identifier(count)), rhs: Box::new(Expr::Identifier(n)) },
                span: span(),
            },
            Stmt::Return(Some(Expr::Identifier(count))),
        ],
    };
    let body = Block {
        stmts: vec![
            Stmt::Let { name: count, value: lit_int(0), span: span() },
            Stmt::Let {
                name: inc,
                value: Expr::Closure { params: vec![Param { name: n, default: None, variadic: false }], body: Arc::new(closure_body), captures_this: false },
                span: span(),
            },
            Stmt::Expr(Expr::Call { callee: Box::new(Expr::Identifier(inc)), args: vec![lit_int(5)] }),
            Stmt::Return(Some(Expr::Call { callee: Box::new(Expr::Identifier(inc)), args: vec![lit_int(8)] })),
        ],
    };

    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &body, false), Value::Int(13));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &body, false), Value::Int(13));
}

/// `try { throw "bad"; } catch (e) { return e; }` catches the thrown value.
#[test]
fn try_catch_binds_the_thrown_value() {
    let mut interns = Interns::new();
    let e = interns.intern("e");
    let body = Block {
        stmts: vec![Stmt::Try {
            body: Block { stmts: vec![Stmt::Throw(lit_str("bad"))] },
            catches: vec![ast::CatchClause { exception_type: None, binding: e, body: Block { stmts: vec![Stmt::Return(Some(Expr::Identifier(e)))] } }],
            finally: None,
        }],
    };

    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &body, false), Value::str("bad"));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &body, false), Value::str("bad"));
}

/// `1 / 0` raises a catchable `RuntimeException`-tagged message.
#[test]
fn division_by_zero_is_caught_with_a_nonempty_message() {
    let mut interns = Interns::new();
    let e = interns.intern("e");
    let body = Block {
        stmts: vec![Stmt::Try {
            body: Block { stmts: vec![Stmt::Expr(Expr::Binary { op: BinOp::Div, lhs: Box::new(lit_int(1)), rhs: Box::new(lit_int(0)) })] },
            catches: vec![ast::CatchClause { exception_type: None, binding: e, body: Block { stmts: vec![Stmt::Return(Some(Expr::Identifier(e)))] } }],
            finally: None,
        }],
    };

    let mut namespaces = NamespaceManager::new();
    let caught = run_vm(&mut interns, &mut namespaces, &body, false);
    let Value::Str(message) = caught else { panic!("expected the caught value to be a string message") };
    assert!(!message.is_empty());
    assert!(message.contains("RuntimeException"));
}

/// Declaring `class B extends A` through the loader and calling `B::who()`,
/// which resolves `static::identify()` through `__called_class()` — late
/// static binding picks `B`, not the declaring class `A`.
#[test]
fn late_static_binding_resolves_to_the_called_class() {
    let mut interns = Interns::new();
    let identify = interns.intern("identify");
    let who = interns.intern("who");

    // class A { static function identify() { return __called_class(); } static function who() { return self::identify(); } }
    let identify_decl = FunctionDecl {
        name: identify,
        visibility: Visibility::Public,
        is_static: true,
        params: Vec::new(),
        body: Arc::new(Block { stmts: vec![Stmt::Return(Some(Expr::Call { callee: Box::new(ident(&mut interns, "__called_class")), args: Vec::new() }))] }),
        annotations: Vec::new(),
        span: span(),
    };
    let who_decl = FunctionDecl {
        name: who,
        visibility: Visibility::Public,
        is_static: true,
        params: Vec::new(),
        body: Arc::new(Block {
            stmts: vec![Stmt::Return(Some(Expr::StaticCall { class_path: "self".to_string(), name: identify, args: Vec::new(), via_static_binding: true }))],
        }),
        annotations: Vec::new(),
        span: span(),
    };
    let a_name = interns.intern("A");
    let b_name = interns.intern("B");
    let program = Program {
        namespace: None,
        uses: Vec::new(),
        items: vec![
            Item::Class(ClassDecl {
                name: a_name,
                visibility: Visibility::Public,
                is_abstract: false,
                parent: None,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: vec![identify_decl.clone(), who_decl.clone()],
                annotations: Vec::new(),
                span: span(),
            }),
            Item::Class(ClassDecl {
                name: b_name,
                visibility: Visibility::Public,
                is_abstract: false,
                parent: Some("A".to_string()),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                annotations: Vec::new(),
                span: span(),
            }),
        ],
    };

    let mut namespaces = NamespaceManager::new();
    loader::load_program(&mut namespaces, &mut interns, "app.long", &program).unwrap();

    let main_body = Block { stmts: vec![Stmt::Return(Some(Expr::StaticCall { class_path: "B".to_string(), name: who, args: Vec::new(), via_static_binding: false }))] };
    let (code, _upvalues, sig) = Compiler::new(&mut interns, "test.long").compile_function(&[], &main_body).unwrap();
    let entry = Arc::new(Function { name: interns.intern("main"), signature: sig, upvalue_descriptors: Vec::new(), code, body: Arc::new(main_body), is_static: false });

    let mut sink = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let heap = new_shared_heap();
    let mut vm = Vm::new(heap, &mut namespaces, &mut interns, &mut sink, &mut tracer);
    builtins::register(vm.namespaces, vm.interns, &mut vm.globals);
    let result = vm.run_entry(entry).unwrap();

    let Value::Class(class_id) = result else { panic!("expected __called_class() to return a class value") };
    assert_eq!(vm.interns.get(vm.namespaces.class(class_id).name), "B");
}

/// `Channel(0)`, a spawned sender, and a blocking `receive()` rendezvous on
/// the expected value.
#[test]
fn channel_send_and_receive_rendezvous() {
    let mut interns = Interns::new();
    let channel = interns.intern("channel");

    let sender_body = Block {
        stmts: vec![Stmt::Expr(Expr::MethodCall { target: Box::new(Expr::Identifier(channel)), name: interns.intern("send"), args: vec![lit_int(42)] })],
    };
    let main_body = Block {
        stmts: vec![
            Stmt::Let { name: channel, value: Expr::Call { callee: Box::new(ident(&mut interns, "Channel")), args: vec![lit_int(0)] }, span: span() },
            Stmt::Spawn(Expr::Closure { params: Vec::new(), body: Arc::new(sender_body), captures_this: false }),
            Stmt::Return(Some(Expr::MethodCall { target: Box::new(Expr::Identifier(channel)), name: interns.intern("receive"), args: Vec::new() })),
        ],
    };

    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &main_body, true), Value::Int(42));
}

/// `m.keys().join(",")` preserves insertion order across `set` calls.
#[test]
fn map_keys_join_preserves_insertion_order() {
    let mut interns = Interns::new();
    let m = interns.intern("m");
    let body = Block {
        stmts: vec![
            Stmt::Let { name: m, value: Expr::MapLiteral(Vec::new()), span: span() },
            Stmt::Expr(Expr::MethodCall { target: Box::new(Expr::Identifier(m)), name: interns.intern("set"), args: vec![lit_str("a"), lit_int(1)] }),
            Stmt::Expr(Expr::MethodCall { target: Box::new(Expr::Identifier(m)), name: interns.intern("set"), args: vec![lit_str("b"), lit_int(2)] }),
            Stmt::Return(Some(Expr::MethodCall {
                target: Box::new(Expr::MethodCall { target: Box::new(Expr::Identifier(m)), name: interns.intern("keys"), args: Vec::new() }),
                name: interns.intern("join"),
                args: vec![lit_str(",")],
            })),
        ],
    };

    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &body, false), Value::str("a,b"));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &body, false), Value::str("a,b"));
}

/// `"hello".substring(1, 4)` is code-point indexed, and `"héllo".length()`
/// counts code points rather than bytes.
#[test]
fn string_substring_and_length_are_code_point_based() {
    let mut interns = Interns::new();
    let substring_body = Block {
        stmts: vec![Stmt::Return(Some(Expr::MethodCall { target: Box::new(lit_str("hello")), name: interns.intern("substring"), args: vec![lit_int(1), lit_int(4)] }))],
    };
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &substring_body, false), Value::str("ell"));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &substring_body, false), Value::str("ell"));

    let length_body = Block { stmts: vec![Stmt::Return(Some(Expr::MethodCall { target: Box::new(lit_str("héllo")), name: interns.intern("length"), args: Vec::new() }))] };
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_vm(&mut interns, &mut namespaces, &length_body, false), Value::Int(5));
    let mut namespaces = NamespaceManager::new();
    assert_eq!(run_evaluator(&mut interns, &mut namespaces, &length_body, false), Value::Int(5));
}

/// `x as T` succeeds for a matching instance and yields the same value;
/// `x as? T` against a non-matching instance yields `null` instead of
/// raising.
#[test]
fn type_assert_matches_and_safe_variant_yields_null_on_mismatch() {
    let mut interns = Interns::new();
    let animal = interns.intern("Animal");
    let program = Program {
        namespace: None,
        uses: Vec::new(),
        items: vec![Item::Class(ClassDecl {
            name: animal,
            visibility: Visibility::Public,
            is_abstract: false,
            parent: None,
            interfaces: Vec::new(),
            fields: vec![FieldDecl { name: interns.intern("legs"), default: Some(lit_int(4)), is_static: false, annotations: Vec::new() }],
            methods: Vec::new(),
            annotations: Vec::new(),
            span: span(),
        })],
    };
    let mut namespaces = NamespaceManager::new();
    loader::load_program(&mut namespaces, &mut interns, "app.long", &program).unwrap();

    let matches_body = Block {
        stmts: vec![Stmt::Return(Some(Expr::TypeAssert {
            value: Box::new(Expr::New { class_path: "Animal".to_string(), args: Vec::new() }),
            type_path: "Animal".to_string(),
            safe: false,
        }))],
    };
    let result = run_vm(&mut interns, &mut namespaces, &matches_body, false);
    assert!(matches!(result, Value::Ref(_)));

    let mismatch_body = Block {
        stmts: vec![Stmt::Return(Some(Expr::TypeAssert { value: Box::new(lit_int(1)), type_path: "Animal".to_string(), safe: true }))],
    };
    assert_eq!(run_vm(&mut interns, &mut namespaces, &mismatch_body, false), Value::Null);
}
