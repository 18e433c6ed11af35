//! Structural audit of emitted function bodies.
//!
//! Expression purity holds by construction (the expression type cannot
//! contain statements); what remains checkable is the label discipline,
//! the address algebra, and the shape of assignment targets.

use crate::{Expr, Function, Label, Stmt};
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Collect every violation in `f`'s body. Empty means the body is sound.
pub fn check_function(f: &Function) -> Vec<String> {
    let mut problems = Vec::new();

    // Label discipline: every referenced label defined exactly once.
    let mut defined: HashMap<Label, usize> = HashMap::new();
    for s in &f.body {
        if let Stmt::LabelStmt { label, .. } = s {
            *defined.entry(*label).or_insert(0) += 1;
        }
    }
    for (label, count) in &defined {
        if *count > 1 {
            problems.push(format!("{}: label defined {} times in {}", label, count, f.name));
        }
    }
    let mut require = |label: &Label, what: &str| {
        if !defined.contains_key(label) {
            problems.push(format!("{}: {} target not defined in {}", label, what, f.name));
        }
    };
    for s in &f.body {
        match s {
            Stmt::Jump { label, .. } => require(label, "jump"),
            Stmt::BranchIf { then_label, else_label, .. } => {
                require(then_label, "branch");
                require(else_label, "branch");
            }
            Stmt::Switch { cases, default_label, end_label, .. } => {
                for c in cases {
                    require(&c.label, "switch case");
                }
                require(default_label, "switch default");
                require(end_label, "switch end");
            }
            _ => {}
        }
    }

    // Assignment targets and the address algebra.
    for s in &f.body {
        match s {
            Stmt::Assign { lhs, rhs, .. } => {
                match lhs {
                    Expr::Mem { .. } => {}
                    Expr::Var { entity } if !entity.cannot_load() => {}
                    other => problems.push(format!(
                        "bad assignment target in {}: {}",
                        f.name, other
                    )),
                }
                check_expr(lhs, &f.name, &mut problems);
                check_expr(rhs, &f.name, &mut problems);
            }
            Stmt::ExprStmt { expr, .. } => check_expr(expr, &f.name, &mut problems),
            Stmt::BranchIf { cond, .. } => check_expr(cond, &f.name, &mut problems),
            Stmt::Switch { cond, .. } => check_expr(cond, &f.name, &mut problems),
            Stmt::Return { expr: Some(e), .. } => check_expr(e, &f.name, &mut problems),
            _ => {}
        }
    }

    problems
}

fn check_expr(e: &Expr, func: &str, problems: &mut Vec<String>) {
    match e {
        Expr::Addr { expr, .. } => {
            if matches!(**expr, Expr::Mem { .. }) {
                problems.push(format!("addr wraps mem in {}: {}", func, e));
            }
            check_expr(expr, func, problems);
        }
        Expr::Mem { addr, .. } => {
            if matches!(**addr, Expr::Addr { .. }) {
                problems.push(format!("mem wraps addr in {}: {}", func, e));
            }
            check_expr(addr, func, problems);
        }
        Expr::Bin { lhs, rhs, .. } => {
            check_expr(lhs, func, problems);
            check_expr(rhs, func, problems);
        }
        Expr::Uni { expr, .. } => check_expr(expr, func, problems),
        Expr::Call { callee, args, .. } => {
            check_expr(callee, func, problems);
            for a in args {
                check_expr(a, func, problems);
            }
        }
        Expr::Int { .. } | Expr::Str { .. } | Expr::Var { .. } => {}
    }
}

/// Fail on the first unsound function body.
pub fn validate_function(f: &Function) -> Result<()> {
    let problems = check_function(f);
    if !problems.is_empty() {
        bail!("invalid IR for {}: {}", f.name, problems.join("; "));
    }
    Ok(())
}

pub fn validate_unit(unit: &crate::Unit) -> Result<()> {
    for f in &unit.functions {
        validate_function(f)?;
    }
    Ok(())
}
