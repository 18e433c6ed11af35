//! Lowering from the typed AST to the linear IR.
//!
//! Each function body is walked exactly once. Control flow (conditionals,
//! loops, switches, short-circuit operators, goto) becomes labels and
//! jumps; side-effecting expressions are split out of their context so
//! every IR expression is pure, with fresh temporaries carrying values
//! across the split; pointer arithmetic, indexing and member access become
//! explicit address computation.

use anyhow::{anyhow, bail, Result};
use ast::{BinaryOp, Entity, EntityRef, ExprKind, Storage, Type, TypeTable, UnaryOp};
use diag::{ErrorSink, Loc};
use ir::{Case, Label, Op};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;

/// Diagnostics this pass can report through the sink. Everything else that
/// can go wrong is an internal error and aborts the pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LowerDiag {
    #[error("duplicated label: {0}")]
    DuplicatedLabel(String),
    #[error("undefined label: {0}")]
    UndefinedLabel(String),
    #[error("useless label: {0}")]
    UselessLabel(String),
    #[error("break from out of loop")]
    BreakOutsideLoop,
    #[error("continue from out of loop")]
    ContinueOutsideLoop,
    #[error("case label is not an integer constant")]
    NonConstantCase,
}

/// Lower a semantically-analyzed unit. Module-scope initializers are
/// attached as pure expressions, every function body becomes a statement
/// list, and the pass fails once at the end if any error was reported, so
/// the user sees all of them in one run.
pub fn generate(unit: &ast::Unit, sink: &mut ErrorSink) -> Result<ir::Unit> {
    let mut g = Generator::new(&unit.types, sink);

    let mut variables = Vec::with_capacity(unit.variables.len());
    for v in &unit.variables {
        let init = match &v.init {
            Some(e) => Some(g.lower_pure_init(e)?),
            None => None,
        };
        variables.push(ir::Variable { entity: v.entity.clone(), init });
    }

    let mut functions = Vec::with_capacity(unit.functions.len());
    for f in &unit.functions {
        functions.push(g.compile_function(f)?);
    }

    if g.sink.error_occurred() {
        bail!("IR generation failed");
    }
    Ok(ir::Unit { variables, functions, strings: unit.strings.clone() })
}

/// Bookkeeping for one user label name within a function.
struct JumpEntry {
    label: Label,
    defined: bool,
    ref_count: u32,
    def_loc: Option<Loc>,
    first_ref_loc: Option<Loc>,
}

#[derive(Default)]
struct Scope {
    temps: Vec<EntityRef>,
}

struct Generator<'a> {
    types: &'a TypeTable,
    sink: &'a mut ErrorSink,

    // Per-function state, reset at each function.
    stmts: Vec<ir::Stmt>,
    scopes: Vec<Scope>,
    break_stack: Vec<Label>,
    continue_stack: Vec<Label>,
    jump_map: HashMap<String, JumpEntry>,
    label_seq: u32,
    temp_seq: u32,
    temps: Vec<EntityRef>,
    statics: Vec<ir::Variable>,
    // Index in `stmts` where the current statement began: hoisted
    // assignments are inserted there, in hoisting order.
    before_stmt: usize,
    // Statement context is nest level <= 1, i.e. the expression sits
    // directly under an expression statement.
    expr_nest_level: u32,
}

impl<'a> Generator<'a> {
    fn new(types: &'a TypeTable, sink: &'a mut ErrorSink) -> Self {
        Self {
            types,
            sink,
            stmts: Vec::new(),
            scopes: Vec::new(),
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            jump_map: HashMap::new(),
            label_seq: 0,
            temp_seq: 0,
            temps: Vec::new(),
            statics: Vec::new(),
            before_stmt: 0,
            expr_nest_level: 0,
        }
    }

    fn reset_function_state(&mut self) {
        self.stmts.clear();
        self.scopes.clear();
        self.break_stack.clear();
        self.continue_stack.clear();
        self.jump_map.clear();
        self.label_seq = 0;
        self.temp_seq = 0;
        self.temps.clear();
        self.statics.clear();
        self.before_stmt = 0;
        self.expr_nest_level = 0;
    }

    fn compile_function(&mut self, f: &ast::Function) -> Result<ir::Function> {
        self.reset_function_state();
        self.lower_block(&f.body)?;
        if !self.scopes.is_empty() || !self.break_stack.is_empty() || !self.continue_stack.is_empty()
        {
            bail!("internal error: unbalanced scope or jump stacks in {}", f.name);
        }
        self.check_jump_links();
        Ok(ir::Function {
            name: f.name.clone(),
            body: std::mem::take(&mut self.stmts),
            temps: std::mem::take(&mut self.temps),
            statics: std::mem::take(&mut self.statics),
        })
    }

    /// Module-scope and static-local initializers must fold to a single
    /// pure expression; anything that needs statements here is a bug in
    /// the previous phase.
    fn lower_pure_init(&mut self, e: &ast::Expr) -> Result<ir::Expr> {
        let mark = self.stmts.len();
        let value = self.lower_value(e)?;
        if self.stmts.len() != mark {
            bail!(
                "internal error: initializer at {} did not lower to a pure expression",
                e.loc
            );
        }
        Ok(value)
    }

    //
    // Statements
    //

    fn lower_stmt(&mut self, s: &ast::Stmt) -> Result<()> {
        self.before_stmt = self.stmts.len();
        match s {
            ast::Stmt::Block(b) => self.lower_block(b)?,

            ast::Stmt::ExprStmt { loc, expr } => {
                if let Some(e) = self.lower_expr(expr)? {
                    self.stmts.push(ir::Stmt::ExprStmt { loc: Some(*loc), expr: e });
                }
            }

            ast::Stmt::If { loc, cond, then_branch, else_branch } => {
                let then_label = self.new_label();
                let else_label = self.new_label();
                let end_label = self.new_label();

                let cond = self.lower_value(cond)?;
                self.branch(
                    Some(*loc),
                    cond,
                    then_label,
                    if else_branch.is_some() { else_label } else { end_label },
                );
                self.label(then_label);
                self.lower_stmt(then_branch)?;
                self.jump(end_label);
                if let Some(eb) = else_branch {
                    self.label(else_label);
                    self.lower_stmt(eb)?;
                    self.jump(end_label);
                }
                self.label(end_label);
            }

            ast::Stmt::While { loc, cond, body } => {
                let beg_label = self.new_label();
                let body_label = self.new_label();
                let end_label = self.new_label();

                self.label(beg_label);
                let cond = self.lower_value(cond)?;
                self.branch(Some(*loc), cond, body_label, end_label);
                self.label(body_label);
                self.push_continue(beg_label);
                self.push_break(end_label);
                self.lower_stmt(body)?;
                self.pop_break()?;
                self.pop_continue()?;
                self.jump(beg_label);
                self.label(end_label);
            }

            ast::Stmt::DoWhile { loc, body, cond } => {
                let beg_label = self.new_label();
                let cont_label = self.new_label(); // before cond, end of body
                let end_label = self.new_label();

                self.push_continue(cont_label);
                self.push_break(end_label);
                self.label(beg_label);
                self.lower_stmt(body)?;
                self.pop_break()?;
                self.pop_continue()?;
                self.label(cont_label);
                let cond = self.lower_value(cond)?;
                self.branch(Some(*loc), cond, beg_label, end_label);
                self.label(end_label);
            }

            ast::Stmt::For { loc, init, cond, post, body } => {
                let beg_label = self.new_label();
                let body_label = self.new_label();
                let cont_label = self.new_label();
                let end_label = self.new_label();

                if let Some(init) = init {
                    self.lower_expr_stmt(init)?;
                }
                self.label(beg_label);
                // An absent condition falls straight into the body: the
                // loop only exits via break, goto or return.
                if let Some(cond) = cond {
                    let cond = self.lower_value(cond)?;
                    self.branch(Some(*loc), cond, body_label, end_label);
                }
                self.label(body_label);
                self.push_continue(cont_label);
                self.push_break(end_label);
                self.lower_stmt(body)?;
                self.pop_break()?;
                self.pop_continue()?;
                self.label(cont_label);
                if let Some(post) = post {
                    self.lower_expr_stmt(post)?;
                }
                self.jump(beg_label);
                self.label(end_label);
            }

            ast::Stmt::Switch { loc, cond, cases } => {
                let cond = self.lower_value(cond)?;

                let mut table = Vec::new();
                let mut clause_labels = Vec::with_capacity(cases.len());
                let mut default_label = None;
                for c in cases {
                    let label = self.new_label();
                    clause_labels.push(label);
                    if c.is_default() {
                        default_label = Some(label);
                    } else {
                        for v in &c.values {
                            match self.lower_value(v)? {
                                ir::Expr::Int { value, .. } => {
                                    table.push(Case { value, label })
                                }
                                _ => self
                                    .sink
                                    .error(Some(v.loc), LowerDiag::NonConstantCase.to_string()),
                            }
                        }
                    }
                }
                let end_label = self.new_label();
                let default_label = default_label.unwrap_or(end_label);

                self.stmts.push(ir::Stmt::Switch {
                    loc: Some(*loc),
                    cond,
                    cases: table,
                    default_label,
                    end_label,
                });
                self.push_break(end_label);
                // Fall-through between cases is the natural label
                // sequencing; no jump is synthesized.
                for (c, label) in cases.iter().zip(&clause_labels) {
                    self.label(*label);
                    for s in &c.body {
                        self.lower_stmt(s)?;
                    }
                }
                self.pop_break()?;
                self.label(end_label);
            }

            ast::Stmt::Break { loc } => match self.break_stack.last() {
                Some(target) => {
                    let target = *target;
                    self.jump(target);
                }
                None => self.sink.error(Some(*loc), LowerDiag::BreakOutsideLoop.to_string()),
            },

            ast::Stmt::Continue { loc } => match self.continue_stack.last() {
                Some(target) => {
                    let target = *target;
                    self.jump(target);
                }
                None => self
                    .sink
                    .error(Some(*loc), LowerDiag::ContinueOutsideLoop.to_string()),
            },

            ast::Stmt::Label { loc, name, stmt } => match self.define_label(name, *loc) {
                Ok(label) => {
                    self.stmts.push(ir::Stmt::LabelStmt { loc: Some(*loc), label });
                    if let Some(s) = stmt {
                        self.lower_stmt(s)?;
                    }
                }
                Err(d) => self.sink.error(Some(*loc), d.to_string()),
            },

            ast::Stmt::Goto { loc, target } => {
                let label = self.refer_label(target, *loc);
                self.stmts.push(ir::Stmt::Jump { loc: Some(*loc), label });
            }

            ast::Stmt::Return { loc, expr } => {
                let expr = match expr {
                    Some(e) => Some(self.lower_value(e)?),
                    None => None,
                };
                self.stmts.push(ir::Stmt::Return { loc: Some(*loc), expr });
            }
        }
        Ok(())
    }

    fn lower_block(&mut self, b: &ast::Block) -> Result<()> {
        self.push_scope();
        for var in &b.vars {
            if var.entity.is_private() {
                // Statically allocated: the initializer is attached, not
                // emitted.
                let init = match &var.init {
                    Some(e) => Some(self.lower_pure_init(e)?),
                    None => None,
                };
                self.statics.push(ir::Variable { entity: var.entity.clone(), init });
            } else if let Some(init) = &var.init {
                self.before_stmt = self.stmts.len();
                let rhs = self.lower_value(init)?;
                let lhs = Self::ref_var(&var.entity);
                self.assign(Some(var.loc), lhs, rhs);
            }
        }
        for s in &b.stmts {
            self.lower_stmt(s)?;
        }
        self.pop_scope()?;
        Ok(())
    }

    /// Lower a bare expression in statement position (expression
    /// statements, `for` header parts): assignments emit directly and
    /// yield no value.
    fn lower_expr_stmt(&mut self, e: &ast::Expr) -> Result<()> {
        self.before_stmt = self.stmts.len();
        if let Some(v) = self.lower_expr(e)? {
            self.stmts.push(ir::Stmt::ExprStmt { loc: Some(e.loc), expr: v });
        }
        Ok(())
    }

    //
    // Expressions
    //

    /// `None` means the statement was already emitted (assignment family
    /// in statement context); the caller must not wrap a value.
    fn lower_expr(&mut self, node: &ast::Expr) -> Result<Option<ir::Expr>> {
        self.expr_nest_level += 1;
        let result = self.dispatch_expr(node);
        self.expr_nest_level -= 1;
        result
    }

    /// Lower an operand: a value is required, and the extra nesting takes
    /// the assignment family out of statement context so it hoists.
    fn lower_value(&mut self, node: &ast::Expr) -> Result<ir::Expr> {
        self.expr_nest_level += 1;
        let result = self.lower_expr(node);
        self.expr_nest_level -= 1;
        match result? {
            Some(e) => Ok(e),
            None => bail!("internal error: expression at {} lowered to no value", node.loc),
        }
    }

    /// Lower an assignment target, then strip one wrapping `Addr`:
    /// address-demanding lvalues come back wrapped, but a store wants the
    /// location itself.
    fn lower_lhs(&mut self, node: &ast::Expr) -> Result<ir::Expr> {
        let e = self.lower_value(node)?;
        Ok(match e {
            ir::Expr::Addr { expr, .. } => *expr,
            other => other,
        })
    }

    fn is_statement(&self) -> bool {
        self.expr_nest_level <= 1
    }

    fn dispatch_expr(&mut self, node: &ast::Expr) -> Result<Option<ir::Expr>> {
        let e = match &node.kind {
            ExprKind::Int(v) => ir::Expr::Int { ty: node.ty.clone(), value: *v },

            ExprKind::Str(entry) => ir::Expr::Str { ty: node.ty.clone(), entry: *entry },

            ExprKind::Var { entity, to_address } => {
                let var = Self::ref_var(entity);
                if *to_address {
                    self.address_of(var)
                } else {
                    var
                }
            }

            ExprKind::Bin { op: BinaryOp::LAnd, lhs, rhs } => {
                return Ok(Some(self.lower_logical_and(node, lhs, rhs)?))
            }
            ExprKind::Bin { op: BinaryOp::LOr, lhs, rhs } => {
                return Ok(Some(self.lower_logical_or(node, lhs, rhs)?))
            }
            ExprKind::Bin { op, lhs, rhs } => {
                let signed = lhs.ty.is_signed();
                let mut left = self.lower_value(lhs)?;
                let mut right = self.lower_value(rhs)?;
                if matches!(op, BinaryOp::Plus | BinaryOp::Minus) {
                    // Pointer arithmetic: scale the integer operand by the
                    // pointee size.
                    if left.ty().is_dereferable() && right.ty().is_integer() {
                        right = self.scale_index(right, left.ty())?;
                    } else if right.ty().is_dereferable() && left.ty().is_integer() {
                        left = self.scale_index(left, right.ty())?;
                    }
                }
                ir::Expr::Bin {
                    ty: node.ty.clone(),
                    op: Op::intern_binary(*op, signed),
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                }
            }

            ExprKind::Unary { op: UnaryOp::Plus, expr } => self.lower_value(expr)?,

            ExprKind::Unary { op: UnaryOp::AddrOf, expr } => {
                let e = self.lower_value(expr)?;
                if expr.evaluates_to_address() && matches!(e, ir::Expr::Addr { .. }) {
                    e
                } else {
                    self.address_of(e)
                }
            }

            ExprKind::Unary { op: UnaryOp::Deref, expr } => {
                let inner = self.lower_value(expr)?;
                self.deref_to(node.ty.clone(), inner)
            }

            ExprKind::Unary { op, expr } => ir::Expr::Uni {
                ty: node.ty.clone(),
                op: Op::intern_unary(*op),
                expr: Box::new(self.lower_value(expr)?),
            },

            ExprKind::Index { base, index: _, element_size, .. } => {
                let int_ty = self.types.signed_int();
                let offset = ir::Expr::Bin {
                    ty: int_ty,
                    op: Op::Mul,
                    lhs: Box::new(self.int_value(*element_size as i64)),
                    rhs: Box::new(self.lower_array_index(node)?),
                };
                let base = self.lower_value(Self::index_base(base))?;
                let addr = ir::Expr::Bin {
                    ty: self.types.pointer_to(node.ty.clone()),
                    op: Op::Add,
                    lhs: Box::new(base),
                    rhs: Box::new(offset),
                };
                ir::Expr::Mem { ty: node.ty.clone(), addr: Box::new(addr) }
            }

            ExprKind::Member { base, offset, arrow, to_address } => {
                let base_e = self.lower_value(base)?;
                let base_addr = if *arrow { base_e } else { self.address_of(base_e) };
                let addr = ir::Expr::Bin {
                    ty: self.types.pointer_to(node.ty.clone()),
                    op: Op::Add,
                    lhs: Box::new(base_addr),
                    rhs: Box::new(self.int_value(*offset as i64)),
                };
                if *to_address {
                    addr
                } else {
                    ir::Expr::Mem { ty: node.ty.clone(), addr: Box::new(addr) }
                }
            }

            ExprKind::Cast { expr, effective } => {
                let inner = self.lower_value(expr)?;
                if *effective {
                    ir::Expr::Uni { ty: node.ty.clone(), op: Op::Cast, expr: Box::new(inner) }
                } else {
                    inner
                }
            }

            ExprKind::SizeofExpr { alloc_size, .. } | ExprKind::SizeofType { alloc_size } => {
                self.int_value(*alloc_size as i64)
            }

            ExprKind::IncDec { pre: true, inc, target } => {
                let op = if *inc { Op::Add } else { Op::Sub };
                let lhs = self.lower_lhs(target)?;
                let one = self.int_value(1);
                return self.transform_op_assign(Some(node.loc), lhs, op, one);
            }

            ExprKind::IncDec { pre: false, inc, target } => {
                let op = if *inc { Op::Add } else { Op::Sub };
                let lhs = self.lower_lhs(target)?;
                if self.is_statement() {
                    // expr++; is expr += 1;
                    let one = self.int_value(1);
                    return self.transform_op_assign(Some(node.loc), lhs, op, one);
                } else if lhs.is_constant_address() {
                    // f(expr++) is v = expr; expr = expr + 1; f(v)
                    let lhs_ty = lhs.ty().clone();
                    let v = self.alloc_tmp(lhs_ty.clone());
                    self.assign_before_stmt(Self::ref_var(&v), lhs.clone());
                    let one = self.int_value(1);
                    let rhs = self.expand_pointer_arithmetic(one, op, &lhs_ty)?;
                    let bin = ir::Expr::Bin {
                        ty: lhs_ty,
                        op,
                        lhs: Box::new(lhs.clone()),
                        rhs: Box::new(rhs),
                    };
                    self.assign_before_stmt(lhs, bin);
                    Self::ref_var(&v)
                } else {
                    // f(expr++) is a = &expr; v = *a; *a = *a + 1; f(v)
                    let lhs_ty = lhs.ty().clone();
                    let addr = self.address_of(lhs);
                    let a = self.alloc_tmp(addr.ty().clone());
                    let v = self.alloc_tmp(lhs_ty.clone());
                    self.assign_before_stmt(Self::ref_var(&a), addr);
                    self.assign_before_stmt(Self::ref_var(&v), self.deref_var(&a)?);
                    let one = self.int_value(1);
                    let scaled = self.expand_pointer_arithmetic(one, op, &lhs_ty)?;
                    let bin = ir::Expr::Bin {
                        ty: lhs_ty,
                        op,
                        lhs: Box::new(self.deref_var(&a)?),
                        rhs: Box::new(scaled),
                    };
                    self.assign_before_stmt(self.deref_var(&a)?, bin);
                    Self::ref_var(&v)
                }
            }

            ExprKind::Assign { lhs, rhs } => {
                if self.is_statement() {
                    let rhs_e = self.lower_value(rhs)?;
                    let lhs_e = self.lower_lhs(lhs)?;
                    self.assign(Some(node.loc), lhs_e, rhs_e);
                    return Ok(None);
                } else {
                    // The temporary keeps the value alive however the
                    // enclosing expression uses the location afterwards.
                    let tmp = self.alloc_tmp(rhs.ty.clone());
                    let rhs_e = self.lower_value(rhs)?;
                    self.assign_before_stmt(Self::ref_var(&tmp), rhs_e);
                    let lhs_e = self.lower_lhs(lhs)?;
                    self.assign_before_stmt(lhs_e, Self::ref_var(&tmp));
                    Self::ref_var(&tmp)
                }
            }

            ExprKind::AssignOp { op, lhs, rhs } => {
                // rhs evaluates before lhs, per source order.
                let signed = lhs.ty.is_signed();
                let rhs_e = self.lower_value(rhs)?;
                let lhs_e = self.lower_lhs(lhs)?;
                return self.transform_op_assign(
                    Some(node.loc),
                    lhs_e,
                    Op::intern_binary(*op, signed),
                    rhs_e,
                );
            }

            ExprKind::Cond { cond, then_e, else_e } => {
                let then_label = self.new_label();
                let else_label = self.new_label();
                let end_label = self.new_label();
                let var = self.alloc_tmp(node.ty.clone());

                let cond = self.lower_value(cond)?;
                self.branch(Some(node.loc), cond, then_label, else_label);
                self.label(then_label);
                let then_v = self.lower_value(then_e)?;
                self.assign(None, Self::ref_var(&var), then_v);
                self.jump(end_label);
                self.label(else_label);
                let else_v = self.lower_value(else_e)?;
                self.assign(None, Self::ref_var(&var), else_v);
                self.jump(end_label);
                self.label(end_label);
                Self::ref_var(&var)
            }

            ExprKind::Call { callee, args } => {
                // Arguments lower right to left, preserving the source's
                // argument evaluation order; the callee comes last.
                let mut new_args: Vec<ir::Expr> = Vec::with_capacity(args.len());
                for a in args.iter().rev() {
                    new_args.insert(0, self.lower_value(a)?);
                }
                let callee_e = self.lower_value(callee)?;
                ir::Expr::Call {
                    ty: node.ty.clone(),
                    callee: Box::new(callee_e),
                    args: new_args,
                }
            }
        };
        Ok(Some(e))
    }

    /// Short-circuit `&&`: the left-hand assignment doubles as the test
    /// value, so the whole expression reduces to the temporary.
    fn lower_logical_and(
        &mut self,
        node: &ast::Expr,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> Result<ir::Expr> {
        let right_label = self.new_label();
        let end_label = self.new_label();
        let var = self.alloc_tmp(node.ty.clone());

        let left = self.lower_value(lhs)?;
        self.assign(None, Self::ref_var(&var), left);
        self.branch(Some(node.loc), Self::ref_var(&var), right_label, end_label);
        self.label(right_label);
        let right = self.lower_value(rhs)?;
        self.assign(None, Self::ref_var(&var), right);
        self.label(end_label);
        Ok(Self::ref_var(&var))
    }

    fn lower_logical_or(
        &mut self,
        node: &ast::Expr,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> Result<ir::Expr> {
        let right_label = self.new_label();
        let end_label = self.new_label();
        let var = self.alloc_tmp(node.ty.clone());

        let left = self.lower_value(lhs)?;
        self.assign(None, Self::ref_var(&var), left);
        self.branch(Some(node.loc), Self::ref_var(&var), end_label, right_label);
        self.label(right_label);
        let right = self.lower_value(rhs)?;
        self.assign(None, Self::ref_var(&var), right);
        self.label(end_label);
        Ok(Self::ref_var(&var))
    }

    /// `lhs op= rhs`, and the expansion target of `++`/`--`. The address
    /// of a non-trivial target is computed exactly once: `a[f()] += 1`
    /// calls `f` once.
    fn transform_op_assign(
        &mut self,
        loc: Option<Loc>,
        lhs: ir::Expr,
        op: Op,
        rhs: ir::Expr,
    ) -> Result<Option<ir::Expr>> {
        let lhs_ty = lhs.ty().clone();
        let rhs = self.expand_pointer_arithmetic(rhs, op, &lhs_ty)?;
        if self.is_statement() {
            if lhs.is_constant_address() {
                // lhs = lhs op rhs
                let bin = ir::Expr::Bin {
                    ty: lhs_ty,
                    op,
                    lhs: Box::new(lhs.clone()),
                    rhs: Box::new(rhs),
                };
                self.assign(loc, lhs, bin);
            } else {
                // a = &lhs; *a = *a op rhs
                let addr = self.address_of(lhs);
                let a = self.alloc_tmp(addr.ty().clone());
                self.assign(loc, Self::ref_var(&a), addr);
                let bin = ir::Expr::Bin {
                    ty: lhs_ty,
                    op,
                    lhs: Box::new(self.deref_var(&a)?),
                    rhs: Box::new(rhs),
                };
                let target = self.deref_var(&a)?;
                self.assign(loc, target, bin);
            }
            Ok(None)
        } else {
            // a = &lhs; *a = *a op rhs; value is *a
            let addr = self.address_of(lhs);
            let a = self.alloc_tmp(addr.ty().clone());
            self.assign_before_stmt(Self::ref_var(&a), addr);
            let bin = ir::Expr::Bin {
                ty: lhs_ty,
                op,
                lhs: Box::new(self.deref_var(&a)?),
                rhs: Box::new(rhs),
            };
            let target = self.deref_var(&a)?;
            self.assign_before_stmt(target, bin);
            Ok(Some(self.deref_var(&a)?))
        }
    }

    /// For `+`/`-` against a dereferable left-hand type, the added integer
    /// is in elements: scale it to bytes.
    fn expand_pointer_arithmetic(&self, rhs: ir::Expr, op: Op, lhs_ty: &Type) -> Result<ir::Expr> {
        if matches!(op, Op::Add | Op::Sub) && lhs_ty.is_dereferable() {
            return self.scale_index(rhs, lhs_ty);
        }
        Ok(rhs)
    }

    fn scale_index(&self, index: ir::Expr, ptr_ty: &Type) -> Result<ir::Expr> {
        let base = ptr_ty
            .base_type()
            .ok_or_else(|| anyhow!("internal error: pointer arithmetic on {:?}", ptr_ty))?;
        let size = self.types.size_of(base);
        Ok(ir::Expr::Bin {
            ty: index.ty().clone(),
            op: Op::Mul,
            lhs: Box::new(index),
            rhs: Box::new(self.ptr_diff_value(size as i64)),
        })
    }

    /// Flattened index of a (possibly multi-dimensional) array reference,
    /// by Horner's scheme: ((i1*d2 + i2)*d3 + i3)...
    fn lower_array_index(&mut self, node: &ast::Expr) -> Result<ir::Expr> {
        let ExprKind::Index { base, index, length, multi, .. } = &node.kind else {
            bail!("internal error: array index lowering on a non-index node at {}", node.loc);
        };
        if *multi {
            let int_ty = self.types.signed_int();
            let inner = self.lower_array_index(base)?;
            let scaled = ir::Expr::Bin {
                ty: int_ty.clone(),
                op: Op::Mul,
                lhs: Box::new(self.int_value(*length as i64)),
                rhs: Box::new(inner),
            };
            Ok(ir::Expr::Bin {
                ty: int_ty,
                op: Op::Add,
                lhs: Box::new(self.lower_value(index)?),
                rhs: Box::new(scaled),
            })
        } else {
            self.lower_value(index)
        }
    }

    /// The expression below a chain of index nodes (the array itself).
    fn index_base(node: &ast::Expr) -> &ast::Expr {
        match &node.kind {
            ExprKind::Index { base, .. } => Self::index_base(base),
            _ => node,
        }
    }

    //
    // Address algebra
    //

    /// Canonical address of a lowered expression: `&*e` cancels; arrays
    /// and non-loadable variables keep their own type as the carrier.
    fn address_of(&self, expr: ir::Expr) -> ir::Expr {
        if let ir::Expr::Mem { addr, .. } = expr {
            return *addr;
        }
        let keeps_own_type = expr.ty().is_array()
            || matches!(&expr, ir::Expr::Var { entity } if entity.cannot_load());
        let ty = if keeps_own_type {
            expr.ty().clone()
        } else {
            self.types.pointer_to(expr.ty().clone())
        };
        ir::Expr::Addr { ty, expr: Box::new(expr) }
    }

    /// `*e` with the result type supplied by the node: `*&x` cancels to
    /// the location itself; an address of a non-loadable lvalue is already
    /// the address, so only the wrapper is dropped.
    fn deref_to(&self, ty: Type, inner: ir::Expr) -> ir::Expr {
        match inner {
            ir::Expr::Addr { expr, .. } => {
                let loadable_var =
                    matches!(&*expr, ir::Expr::Var { entity } if !entity.cannot_load());
                if loadable_var {
                    *expr
                } else {
                    ir::Expr::Mem { ty, addr: expr }
                }
            }
            other => ir::Expr::Mem { ty, addr: Box::new(other) },
        }
    }

    /// Load through an address-typed temporary.
    fn deref_var(&self, var: &EntityRef) -> Result<ir::Expr> {
        let base = var
            .ty
            .base_type()
            .cloned()
            .ok_or_else(|| anyhow!("internal error: dereference of non-pointer {}", var.name))?;
        Ok(ir::Expr::Mem { ty: base, addr: Box::new(Self::ref_var(var)) })
    }

    fn ref_var(entity: &EntityRef) -> ir::Expr {
        ir::Expr::Var { entity: entity.clone() }
    }

    fn int_value(&self, n: i64) -> ir::Expr {
        ir::Expr::Int { ty: self.types.signed_int(), value: n }
    }

    fn ptr_diff_value(&self, n: i64) -> ir::Expr {
        ir::Expr::Int { ty: self.types.ptr_diff(), value: n }
    }

    //
    // Emission helpers
    //

    fn assign(&mut self, loc: Option<Loc>, lhs: ir::Expr, rhs: ir::Expr) {
        self.stmts.push(ir::Stmt::Assign { loc, lhs, rhs });
    }

    /// Insert an assignment in front of the current statement and advance
    /// the cursor, so hoisted evaluations keep their hoisting order.
    fn assign_before_stmt(&mut self, lhs: ir::Expr, rhs: ir::Expr) {
        self.stmts.insert(self.before_stmt, ir::Stmt::Assign { loc: None, lhs, rhs });
        self.before_stmt += 1;
    }

    fn label(&mut self, label: Label) {
        self.stmts.push(ir::Stmt::LabelStmt { loc: None, label });
    }

    fn jump(&mut self, label: Label) {
        self.stmts.push(ir::Stmt::Jump { loc: None, label });
    }

    fn branch(&mut self, loc: Option<Loc>, cond: ir::Expr, then_label: Label, else_label: Label) {
        self.stmts.push(ir::Stmt::BranchIf { loc, cond, then_label, else_label });
    }

    fn new_label(&mut self) -> Label {
        self.label_seq += 1;
        Label(self.label_seq)
    }

    //
    // Scopes and temporaries
    //

    fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn pop_scope(&mut self) -> Result<()> {
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| anyhow!("internal error: unmatched scope pop"))?;
        self.temps.extend(scope.temps);
        Ok(())
    }

    /// Fresh temporary in the innermost open scope; it surfaces in the
    /// function's temp list when the scope closes.
    fn alloc_tmp(&mut self, ty: Type) -> EntityRef {
        let name = format!("tmp.{}", self.temp_seq);
        self.temp_seq += 1;
        let ent = Entity::new(&name, ty, Storage::Auto);
        match self.scopes.last_mut() {
            Some(scope) => scope.temps.push(ent.clone()),
            None => self.temps.push(ent.clone()),
        }
        ent
    }

    //
    // Break/continue stacks
    //

    fn push_break(&mut self, label: Label) {
        self.break_stack.push(label);
    }

    fn pop_break(&mut self) -> Result<()> {
        self.break_stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| anyhow!("internal error: unmatched pop for break stack"))
    }

    fn push_continue(&mut self, label: Label) {
        self.continue_stack.push(label);
    }

    fn pop_continue(&mut self) -> Result<()> {
        self.continue_stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| anyhow!("internal error: unmatched pop for continue stack"))
    }

    //
    // User labels
    //

    /// Entry for a user label name, created with a fresh internal label on
    /// first use by either definition or reference.
    fn jump_entry(&mut self, name: &str) -> &mut JumpEntry {
        let next = Label(self.label_seq + 1);
        match self.jump_map.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                self.label_seq += 1;
                v.insert(JumpEntry {
                    label: next,
                    defined: false,
                    ref_count: 0,
                    def_loc: None,
                    first_ref_loc: None,
                })
            }
        }
    }

    fn define_label(&mut self, name: &str, loc: Loc) -> std::result::Result<Label, LowerDiag> {
        let entry = self.jump_entry(name);
        if entry.defined {
            return Err(LowerDiag::DuplicatedLabel(name.to_string()));
        }
        entry.defined = true;
        entry.def_loc = Some(loc);
        Ok(entry.label)
    }

    fn refer_label(&mut self, name: &str, loc: Loc) -> Label {
        let entry = self.jump_entry(name);
        entry.ref_count += 1;
        if entry.first_ref_loc.is_none() {
            entry.first_ref_loc = Some(loc);
        }
        entry.label
    }

    /// Post-pass audit of the jump map: undefined labels are errors at
    /// their first reference, unreferenced labels are warnings at their
    /// definition.
    fn check_jump_links(&mut self) {
        let mut entries: Vec<(String, JumpEntry)> = self.jump_map.drain().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, entry) in entries {
            if !entry.defined {
                self.sink
                    .error(entry.first_ref_loc, LowerDiag::UndefinedLabel(name.clone()).to_string());
            }
            if entry.ref_count == 0 {
                self.sink.warn(entry.def_loc, LowerDiag::UselessLabel(name).to_string());
            }
        }
    }
}
