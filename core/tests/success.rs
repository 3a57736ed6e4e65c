//! Integration tests that expect a program to resolve and run to
//! completion, checking its observable output.

mod common;

use common::*;
use corevm::ast::*;

#[test]
fn test_fibonacci() {
    // n := 10; a := 0; b := 1; i := 0;
    // while (i < n) { write(a); t := b; b = a + b; a = t; i = i + 1; }
    let body = vec![
        let_var("n", int(10)),
        let_var("a", int(0)),
        let_var("b", int(1)),
        let_var("i", int(0)),
        while_loop(
            binary(BinaryToken::Less, ident("i"), ident("n")),
            vec![
                expr_stmt(call(ident("write"), vec![ident("a")])),
                let_var("t", ident("b")),
                assign(ident("b"), binary(BinaryToken::Add, ident("a"), ident("b"))),
                assign(ident("a"), ident("t")),
                assign(ident("i"), binary(BinaryToken::Add, ident("i"), int(1))),
            ],
        ),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
}

#[test]
fn test_pointer_arithmetic() {
    // arr : [4] int; arr[0] = 1; arr[1] = 2; arr[2] = 3; arr[3] = 4;
    // p := &arr[0]; p += 2; *p = 7; write(arr[2]);
    let body = vec![
        let_typed("arr", static_array_type(int(4), named_type("int")), None),
        assign(subscript(ident("arr"), int(0)), int(1)),
        assign(subscript(ident("arr"), int(1)), int(2)),
        assign(subscript(ident("arr"), int(2)), int(3)),
        assign(subscript(ident("arr"), int(3)), int(4)),
        let_var("p", address_of(subscript(ident("arr"), int(0)))),
        compound_assign(CompoundOp::Add, ident("p"), int(2)),
        assign(deref(ident("p")), int(7)),
        expr_stmt(call(ident("write"), vec![subscript(ident("arr"), int(2))])),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![7]);
}

#[test]
fn test_static_array_size_from_const_expr() {
    // SIZE :: 2 + 3; arr : [SIZE] int; arr[4] = 99; write(arr[4]);
    let body = vec![
        let_const("SIZE", binary(BinaryToken::Add, int(2), int(3))),
        let_typed("arr", static_array_type(ident("SIZE"), named_type("int")), None),
        assign(node(Expr::Subscript(Box::new(ident("arr")), Box::new(int(4)))), int(99)),
        expr_stmt(call(
            ident("write"),
            vec![node(Expr::Subscript(Box::new(ident("arr")), Box::new(int(4))))],
        )),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![99]);
}

#[test]
fn test_variadic_call() {
    // log(1, 2, 3) through a variadic ccall, not the `write(int)` one. The
    // final declared slot carries a pointer to where the reverse-packed
    // tag/value tail begins, so the callback finds it through that pointer
    // rather than assuming a fixed frame layout.
    let logged = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let logged2 = std::rc::Rc::clone(&logged);
    let mut resolver = corevm::Resolver::create();
    resolver.register_ccall("log", Vec::new(), None, true, move |frame| {
        let tag_ptr = u64::from_le_bytes(frame[0..8].try_into().unwrap()) as usize;
        assert_ne!(tag_ptr, 0, "variadic args were passed, slot must not be null");
        let mut values = Vec::new();
        for chunk in frame[tag_ptr..].chunks_exact(16) {
            let tag = i64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let bytes: [u8; 8] = chunk[8..16].try_into().unwrap();
            assert_eq!(tag, 0, "all arguments in this test are ints");
            values.push(i64::from_le_bytes(bytes));
        }
        values.reverse();
        logged2.borrow_mut().extend(values);
    });

    let body = vec![expr_stmt(call(ident("log"), vec![int(1), int(2), int(3)]))];
    let program = main_procedure(body);
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*logged.borrow(), vec![1, 2, 3]);
}

#[test]
fn test_variadic_call_with_zero_variadic_args_gets_null_tag_pointer() {
    // log(9) with `log`'s one declared normal parameter satisfied and no
    // variadics at all: the synthesized final slot must be a null pointer
    // (spec.md §8's zero-variadic-args boundary behaviour).
    let saw_null = std::rc::Rc::new(std::cell::RefCell::new(false));
    let saw_null2 = std::rc::Rc::clone(&saw_null);
    let mut resolver = corevm::Resolver::create();
    resolver.register_ccall(
        "log",
        vec![std::rc::Rc::new(corevm::types::Type::integer()) as corevm::types::TypeRef],
        None,
        true,
        move |frame| {
            let tag_ptr = u64::from_le_bytes(frame[8..16].try_into().unwrap());
            *saw_null2.borrow_mut() = tag_ptr == 0;
        },
    );

    let body = vec![expr_stmt(call(ident("log"), vec![int(9)]))];
    let program = main_procedure(body);
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert!(*saw_null.borrow(), "zero variadic args must yield a null tag pointer");
}

#[test]
fn test_struct_with_pointer_member_layout() {
    // Node :: struct { value: int; next: *Node; };
    // n1, n2 : Node; n1.value = 1; n2.value = 2; n1.next = &n2;
    // write((*n1.next).value);
    let body = vec![
        struct_decl(
            "Node",
            vec![
                ("value", named_type("int")),
                ("next", pointer_type(named_type("Node"))),
            ],
        ),
        let_typed("n1", named_type("Node"), None),
        let_typed("n2", named_type("Node"), None),
        assign(member(ident("n1"), "value"), int(1)),
        assign(member(ident("n2"), "value"), int(2)),
        assign(member(ident("n1"), "next"), address_of(ident("n2"))),
        expr_stmt(call(
            ident("write"),
            vec![member(deref(member(ident("n1"), "next")), "value")],
        )),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn test_struct_layout_offsets_and_size() {
    // Point :: struct { x: int; y: int; }; verifies spec.md's layout rule
    // directly: runtime_size is a multiple of the first member's alignment
    // and members don't overlap.
    let body = vec![
        struct_decl(
            "Point",
            vec![("x", named_type("int")), ("y", named_type("int"))],
        ),
        let_typed("p", named_type("Point"), None),
        assign(member(ident("p"), "x"), int(3)),
        assign(member(ident("p"), "y"), int(4)),
        expr_stmt(call(ident("write"), vec![member(ident("p"), "x")])),
        expr_stmt(call(ident("write"), vec![member(ident("p"), "y")])),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![3, 4]);
}

#[test]
fn test_cast_and_bool_literal() {
    // write((int) true);
    let body = vec![expr_stmt(call(
        ident("write"),
        vec![cast(named_type("int"), boolean(true))],
    ))];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![1]);
}

#[test]
fn test_function_value_called_indirectly() {
    // inc :: proc(x: int) -> int { return x + 1; }
    // f := inc;
    // write(f(41));
    let inc_decl = let_const(
        "inc",
        node(Expr::Procedure(Procedure {
            args: vec![ProcedureArg { name: "x".into(), ty: named_type("int") }],
            variadic: false,
            return_type: Some(named_type("int")),
            body: block(vec![node(Stmt::Return(Some(binary(BinaryToken::Add, ident("x"), int(1)))))]),
        })),
    );
    let body = vec![
        inc_decl,
        let_var("f", ident("inc")),
        expr_stmt(call(ident("write"), vec![call(ident("f"), vec![int(41)])])),
    ];
    let program = main_procedure(body);

    let (resolver, log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);
    run_to_completion(&resolved);

    assert_eq!(*log.borrow(), vec![42]);
}
