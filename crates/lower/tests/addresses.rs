mod common;

use ast::{BinaryOp, ExprKind, Type, TypeTable, UnaryOp};
use common::*;

#[test]
fn array_indexing_becomes_scaled_address_arithmetic() {
    // x = a[i];  with a: int[10]
    let x = local("x", Type::Int);
    let a = local("a", array(Type::Int, 10));
    let i = local("i", Type::Int);
    let aref = e(
        Type::Int,
        ExprKind::Index {
            base: Box::new(var_addr(&a)),
            index: Box::new(var(&i)),
            element_size: 4,
            length: 10,
            multi: false,
        },
    );
    let f = function("main", vec![expr_stmt(assign(var(&x), aref))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = mem((addr(a) + (4 * i)))"]);
}

#[test]
fn multi_dimensional_index_flattens_by_horner() {
    // x = m[i][j];  with m: int[2][3]
    let x = local("x", Type::Int);
    let m = local("m", array(array(Type::Int, 3), 2));
    let i = local("i", Type::Int);
    let j = local("j", Type::Int);
    let row = e(
        array(Type::Int, 3),
        ExprKind::Index {
            base: Box::new(var_addr(&m)),
            index: Box::new(var(&i)),
            element_size: 12,
            length: 2,
            multi: false,
        },
    );
    let elem = e(
        Type::Int,
        ExprKind::Index {
            base: Box::new(row),
            index: Box::new(var(&j)),
            element_size: 4,
            length: 3,
            multi: true,
        },
    );
    let f = function("main", vec![expr_stmt(assign(var(&x), elem))]);
    let out = lower_fn(f);
    // linear index (j + 3*i), scaled by the element size
    assert_eq!(lines(&out), vec!["  x = mem((addr(m) + (4 * (j + (3 * i)))))"]);
}

#[test]
fn assignment_into_an_array_element() {
    // a[i] = 5;
    let a = local("a", array(Type::Int, 10));
    let i = local("i", Type::Int);
    let aref = e(
        Type::Int,
        ExprKind::Index {
            base: Box::new(var_addr(&a)),
            index: Box::new(var(&i)),
            element_size: 4,
            length: 10,
            multi: false,
        },
    );
    let f = function("main", vec![expr_stmt(assign(aref, int(5)))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  mem((addr(a) + (4 * i))) = 5"]);
}

#[test]
fn member_access_adds_the_resolved_offset() {
    // x = s.y;  with y at offset 4
    let mut types = TypeTable::new();
    types.define_struct("point", &[("x".into(), Type::Int), ("y".into(), Type::Int)]);
    let x = local("x", Type::Int);
    let s = local("s", Type::Struct("point".into()));
    let member = e(
        Type::Int,
        ExprKind::Member { base: Box::new(var(&s)), offset: 4, arrow: false, to_address: false },
    );
    let mut unit = unit_of(vec![function("main", vec![expr_stmt(assign(var(&x), member))])]);
    unit.types = types;
    let mut sink = diag::ErrorSink::new();
    let out = lower::generate(&unit, &mut sink).unwrap();
    assert_eq!(out.functions[0].to_lines(), vec!["  x = mem((addr(s) + 4))"]);
}

#[test]
fn member_store_goes_through_the_same_address() {
    // s.x = 1;
    let s = local("s", Type::Struct("point".into()));
    let member = e(
        Type::Int,
        ExprKind::Member { base: Box::new(var(&s)), offset: 0, arrow: false, to_address: false },
    );
    let f = function("main", vec![expr_stmt(assign(member, int(1)))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  mem((addr(s) + 0)) = 1"]);
}

#[test]
fn arrow_access_uses_the_pointer_value_directly() {
    // x = p->y;
    let x = local("x", Type::Int);
    let p = local("p", ptr(Type::Struct("point".into())));
    let member = e(
        Type::Int,
        ExprKind::Member { base: Box::new(var(&p)), offset: 4, arrow: true, to_address: false },
    );
    let f = function("main", vec![expr_stmt(assign(var(&x), member))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = mem((p + 4))"]);
}

#[test]
fn address_demanding_member_skips_the_load() {
    // q = &s.y spelled via the analyzer's address flag on the member node
    let q = local("q", ptr(Type::Int));
    let s = local("s", Type::Struct("point".into()));
    let member = e(
        ptr(Type::Int),
        ExprKind::Member { base: Box::new(var(&s)), offset: 4, arrow: false, to_address: true },
    );
    let f = function("main", vec![expr_stmt(assign(var(&q), member))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  q = (addr(s) + 4)"]);
}

#[test]
fn address_of_a_variable_wraps_once() {
    // q = &x;
    let q = local("q", ptr(Type::Int));
    let x = local("x", Type::Int);
    let addr = unary(ptr(Type::Int), UnaryOp::AddrOf, var(&x));
    let f = function("main", vec![expr_stmt(assign(var(&q), addr))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  q = addr(x)"]);
}

#[test]
fn address_of_a_dereference_cancels() {
    // q = &*p;
    let q = local("q", ptr(Type::Int));
    let p = local("p", ptr(Type::Int));
    let deref = unary(Type::Int, UnaryOp::Deref, var(&p));
    let addr = unary(ptr(Type::Int), UnaryOp::AddrOf, deref);
    let f = function("main", vec![expr_stmt(assign(var(&q), addr))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  q = p"]);
}

#[test]
fn dereference_of_an_address_cancels() {
    // y = *&x;
    let y = local("y", Type::Int);
    let x = local("x", Type::Int);
    let addr = unary(ptr(Type::Int), UnaryOp::AddrOf, var(&x));
    let deref = unary(Type::Int, UnaryOp::Deref, addr);
    let f = function("main", vec![expr_stmt(assign(var(&y), deref))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  y = x"]);
}

#[test]
fn pointer_plus_integer_scales_the_integer() {
    // q = p + n;
    let q = local("q", ptr(Type::Int));
    let p = local("p", ptr(Type::Int));
    let n = local("n", Type::Int);
    let sum = bin(ptr(Type::Int), BinaryOp::Plus, var(&p), var(&n));
    let f = function("main", vec![expr_stmt(assign(var(&q), sum))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  q = (p + (n * 4))"]);
}

#[test]
fn integer_plus_pointer_scales_the_other_side() {
    // q = n + p;
    let q = local("q", ptr(Type::Int));
    let p = local("p", ptr(Type::Int));
    let n = local("n", Type::Int);
    let sum = bin(ptr(Type::Int), BinaryOp::Plus, var(&n), var(&p));
    let f = function("main", vec![expr_stmt(assign(var(&q), sum))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  q = ((n * 4) + p)"]);
}

#[test]
fn unary_plus_is_identity() {
    let x = local("x", Type::Int);
    let y = local("y", Type::Int);
    let plus = unary(Type::Int, UnaryOp::Plus, var(&y));
    let f = function("main", vec![expr_stmt(assign(var(&x), plus))]);
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = y"]);
}

#[test]
fn pure_unary_operators_stay_expressions() {
    let x = local("x", Type::Int);
    let y = local("y", Type::Int);
    let f = function(
        "main",
        vec![
            expr_stmt(assign(var(&x), unary(Type::Int, UnaryOp::Minus, var(&y)))),
            expr_stmt(assign(var(&x), unary(Type::Int, UnaryOp::BitNot, var(&y)))),
            expr_stmt(assign(var(&x), unary(Type::Int, UnaryOp::LogicalNot, var(&y)))),
        ],
    );
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = (-y)", "  x = (~y)", "  x = (!y)"]);
}

#[test]
fn effective_cast_is_kept_and_noop_cast_dissolves() {
    let x = local("x", Type::Long);
    let y = local("y", Type::Int);
    let kept = e(Type::Long, ExprKind::Cast { expr: Box::new(var(&y)), effective: true });
    let gone = e(Type::Long, ExprKind::Cast { expr: Box::new(var(&y)), effective: false });
    let f = function(
        "main",
        vec![expr_stmt(assign(var(&x), kept)), expr_stmt(assign(var(&x), gone))],
    );
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = cast(y)", "  x = y"]);
}

#[test]
fn sizeof_folds_to_the_resolved_size() {
    let x = local("x", Type::Int);
    let y = local("y", Type::Long);
    let of_expr = e(Type::Int, ExprKind::SizeofExpr { expr: Box::new(var(&y)), alloc_size: 8 });
    let of_type = e(Type::Int, ExprKind::SizeofType { alloc_size: 12 });
    let f = function(
        "main",
        vec![expr_stmt(assign(var(&x), of_expr)), expr_stmt(assign(var(&x), of_type))],
    );
    let out = lower_fn(f);
    assert_eq!(lines(&out), vec!["  x = 8", "  x = 12"]);
}

#[test]
fn signed_and_unsigned_shifts_intern_differently() {
    let x = local("x", Type::Int);
    let u = local("u", Type::UInt);
    let s_shift = bin(Type::Int, BinaryOp::Shr, var(&x), int(1));
    let u_shift = bin(Type::UInt, BinaryOp::Shr, var(&u), int(1));
    let f = function(
        "main",
        vec![
            expr_stmt(assign(var(&x), s_shift)),
            expr_stmt(assign(var(&x), u_shift)),
        ],
    );
    let out = lower_fn(f);
    // >> is the arithmetic shift, >>> the logical one
    assert_eq!(lines(&out), vec!["  x = (x >> 1)", "  x = (u >>> 1)"]);
}

#[test]
fn string_literals_point_into_the_pool() {
    let s = local("s", ptr(Type::Char));
    let lit = e(ptr(Type::Char), ExprKind::Str(0));
    let mut unit = unit_of(vec![function("main", vec![expr_stmt(assign(var(&s), lit))])]);
    unit.strings = vec!["hi".to_string()];
    let mut sink = diag::ErrorSink::new();
    let out = lower::generate(&unit, &mut sink).unwrap();
    assert_eq!(out.functions[0].to_lines(), vec!["  s = str.0"]);
    assert_eq!(out.strings, vec!["hi".to_string()]);
}
