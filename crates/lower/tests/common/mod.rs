#![allow(dead_code)]

use ast::{
    BinaryOp, Block, CaseClause, Entity, EntityRef, Expr, ExprKind, Function, Loc, Storage, Stmt,
    Type, TypeTable, UnaryOp, Unit, VarDecl,
};
use diag::ErrorSink;

pub fn loc(line: u32) -> Loc {
    Loc::new(line, 1)
}

pub fn ptr(t: Type) -> Type {
    Type::Pointer(Box::new(t))
}

pub fn array(t: Type, n: usize) -> Type {
    Type::Array(Box::new(t), n)
}

pub fn func_ty(ret: Type) -> Type {
    Type::Func { ret: Box::new(ret), params: vec![], variadic: false }
}

pub fn local(name: &str, ty: Type) -> EntityRef {
    Entity::new(name, ty, Storage::Auto)
}

pub fn static_var(name: &str, ty: Type) -> EntityRef {
    Entity::new(name, ty, Storage::Static)
}

pub fn e(ty: Type, kind: ExprKind) -> Expr {
    Expr::new(loc(1), ty, kind)
}

pub fn int(v: i64) -> Expr {
    e(Type::Int, ExprKind::Int(v))
}

pub fn var(ent: &EntityRef) -> Expr {
    e(ent.ty.clone(), ExprKind::Var { entity: ent.clone(), to_address: false })
}

/// Variable reference that semantic analysis marked as address-demanding
/// (array decay, record lvalues).
pub fn var_addr(ent: &EntityRef) -> Expr {
    e(ent.ty.clone(), ExprKind::Var { entity: ent.clone(), to_address: true })
}

pub fn bin(ty: Type, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    e(ty, ExprKind::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

pub fn unary(ty: Type, op: UnaryOp, expr: Expr) -> Expr {
    e(ty, ExprKind::Unary { op, expr: Box::new(expr) })
}

pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    e(ty, ExprKind::Assign { lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

pub fn assign_op(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    e(ty, ExprKind::AssignOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

/// Call through a fresh function-typed entity named `name`.
pub fn call(name: &str, ret: Type, args: Vec<Expr>) -> Expr {
    let callee = Entity::new(name, func_ty(ret.clone()), Storage::Static);
    e(ret, ExprKind::Call { callee: Box::new(var(&callee)), args })
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::ExprStmt { loc: loc(1), expr }
}

pub fn decl(entity: &EntityRef, init: Option<Expr>) -> VarDecl {
    VarDecl { loc: loc(1), entity: entity.clone(), init }
}

pub fn case(values: Vec<Expr>, body: Vec<Stmt>) -> CaseClause {
    CaseClause { loc: loc(1), values, body }
}

pub fn default_case(body: Vec<Stmt>) -> CaseClause {
    case(vec![], body)
}

pub fn block(vars: Vec<VarDecl>, stmts: Vec<Stmt>) -> Block {
    Block { loc: loc(1), vars, stmts }
}

pub fn block_stmt(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(block(vec![], stmts))
}

pub fn function(name: &str, stmts: Vec<Stmt>) -> Function {
    Function {
        name: name.to_string(),
        params: vec![],
        return_ty: Type::Int,
        body: block(vec![], stmts),
    }
}

pub fn unit_of(functions: Vec<Function>) -> Unit {
    Unit { types: TypeTable::new(), strings: vec![], variables: vec![], functions }
}

/// Lower a single function, expect success, and run the structural
/// validator over the emitted body.
pub fn lower_fn(f: Function) -> ir::Function {
    let unit = unit_of(vec![f]);
    let mut sink = ErrorSink::new();
    let out = lower::generate(&unit, &mut sink).expect("lowering should succeed");
    assert!(!sink.error_occurred(), "unexpected diagnostics: {:?}", sink.messages());
    for f in &out.functions {
        ir::validate::validate_function(f).expect("emitted IR should validate");
    }
    out.functions.into_iter().next().unwrap()
}

/// Lower a unit that is expected to report diagnostics; returns the
/// result and the rendered messages.
pub fn lower_expecting_diags(unit: Unit) -> (anyhow::Result<ir::Unit>, Vec<String>) {
    let mut sink = ErrorSink::new();
    let result = lower::generate(&unit, &mut sink);
    (result, sink.messages())
}

pub fn lines(f: &ir::Function) -> Vec<String> {
    f.to_lines()
}
