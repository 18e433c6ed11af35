//! Linear IR emitted by the lowering pass: a flat statement stream over
//! pure expression trees. Control flow is labels and jumps; every side
//! effect is its own statement.

pub mod validate;

use ast::{EntityRef, Type};
use diag::Loc;
use std::fmt;

/// A jump target. Labels are identities minted from a per-function counter,
/// not strings; user label names are translated by the lowering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Closed operator set shared by `Bin` and `Uni`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    LShift,
    RShift,
    ArShift,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitNot,
    Not,
    UMinus,
    Cast,
    SCast,
    UCast,
}

impl Op {
    /// Map a source binary operator. `signed` selects the arithmetic shift
    /// for `>>`.
    pub fn intern_binary(op: ast::BinaryOp, signed: bool) -> Op {
        use ast::BinaryOp as B;
        match op {
            B::Plus => Op::Add,
            B::Minus => Op::Sub,
            B::Mul => Op::Mul,
            B::Div => Op::Div,
            B::Mod => Op::Mod,
            B::BitAnd => Op::And,
            B::BitOr => Op::Or,
            B::BitXor => Op::Xor,
            B::Shl => Op::LShift,
            B::Shr => {
                if signed {
                    Op::ArShift
                } else {
                    Op::RShift
                }
            }
            B::Eq => Op::Eq,
            B::Ne => Op::Neq,
            B::Lt => Op::Lt,
            B::Le => Op::LtEq,
            B::Gt => Op::Gt,
            B::Ge => Op::GtEq,
            B::LAnd | B::LOr => unreachable!("short-circuit operators lower to branches"),
        }
    }

    pub fn intern_unary(op: ast::UnaryOp) -> Op {
        use ast::UnaryOp as U;
        match op {
            U::Minus => Op::UMinus,
            U::BitNot => Op::BitNot,
            U::LogicalNot => Op::Not,
            U::Plus | U::AddrOf | U::Deref => {
                unreachable!("operator has a dedicated lowering, not a Uni node")
            }
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::LShift => "<<",
            Op::RShift => ">>>",
            Op::ArShift => ">>",
            Op::Eq => "==",
            Op::Neq => "!=",
            Op::Lt => "<",
            Op::LtEq => "<=",
            Op::Gt => ">",
            Op::GtEq => ">=",
            Op::BitNot => "~",
            Op::Not => "!",
            Op::UMinus => "-",
            Op::Cast => "cast",
            Op::SCast => "s_cast",
            Op::UCast => "u_cast",
        }
    }
}

/// Pure expression tree. Evaluating one never changes observable state:
/// the lowering pass has already hoisted every side effect into statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        ty: Type,
        value: i64,
    },
    /// Pointer to a string-pool entry.
    Str {
        ty: Type,
        entry: usize,
    },
    Var {
        entity: EntityRef,
    },
    Bin {
        ty: Type,
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Uni {
        ty: Type,
        op: Op,
        expr: Box<Expr>,
    },
    /// Load from an address; `ty` is the pointee type.
    Mem {
        ty: Type,
        addr: Box<Expr>,
    },
    /// Address of an inner location.
    Addr {
        ty: Type,
        expr: Box<Expr>,
    },
    /// Sequenced by the lowering pass; the code generator still treats it
    /// as effectful.
    Call {
        ty: Type,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn ty(&self) -> &Type {
        match self {
            Expr::Int { ty, .. }
            | Expr::Str { ty, .. }
            | Expr::Bin { ty, .. }
            | Expr::Uni { ty, .. }
            | Expr::Mem { ty, .. }
            | Expr::Addr { ty, .. }
            | Expr::Call { ty, .. } => ty,
            Expr::Var { entity } => &entity.ty,
        }
    }

    /// True when the address of this lvalue is known without evaluating
    /// any sub-expression: a named variable, or the address of one.
    pub fn is_constant_address(&self) -> bool {
        match self {
            Expr::Var { .. } => true,
            Expr::Addr { expr, .. } => matches!(**expr, Expr::Var { .. }),
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int { value, .. } => write!(f, "{}", value),
            Expr::Str { entry, .. } => write!(f, "str.{}", entry),
            Expr::Var { entity } => write!(f, "{}", entity.name),
            Expr::Bin { op, lhs, rhs, .. } => {
                write!(f, "({} {} {})", lhs, op.mnemonic(), rhs)
            }
            Expr::Uni { op, expr, .. } => match op {
                Op::Cast | Op::SCast | Op::UCast => write!(f, "{}({})", op.mnemonic(), expr),
                _ => write!(f, "({}{})", op.mnemonic(), expr),
            },
            Expr::Mem { addr, .. } => write!(f, "mem({})", addr),
            Expr::Addr { expr, .. } => write!(f, "addr({})", expr),
            Expr::Call { callee, args, .. } => {
                write!(f, "call {}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One `(value, label)` row of a `Switch` jump table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub value: i64,
    pub label: Label,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        loc: Option<Loc>,
        lhs: Expr,
        rhs: Expr,
    },
    ExprStmt {
        loc: Option<Loc>,
        expr: Expr,
    },
    LabelStmt {
        loc: Option<Loc>,
        label: Label,
    },
    Jump {
        loc: Option<Loc>,
        label: Label,
    },
    BranchIf {
        loc: Option<Loc>,
        cond: Expr,
        then_label: Label,
        else_label: Label,
    },
    Switch {
        loc: Option<Loc>,
        cond: Expr,
        cases: Vec<Case>,
        default_label: Label,
        end_label: Label,
    },
    Return {
        loc: Option<Loc>,
        expr: Option<Expr>,
    },
}

// Labels sit flush left; everything else is indented like an instruction.
impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { lhs, rhs, .. } => write!(f, "  {} = {}", lhs, rhs),
            Stmt::ExprStmt { expr, .. } => write!(f, "  eval {}", expr),
            Stmt::LabelStmt { label, .. } => write!(f, "{}:", label),
            Stmt::Jump { label, .. } => write!(f, "  jump {}", label),
            Stmt::BranchIf { cond, then_label, else_label, .. } => {
                write!(f, "  if {} then {} else {}", cond, then_label, else_label)
            }
            Stmt::Switch { cond, cases, default_label, end_label, .. } => {
                write!(f, "  switch {} [", cond)?;
                for (i, c) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}->{}", c.value, c.label)?;
                }
                write!(f, "] default {} end {}", default_label, end_label)
            }
            Stmt::Return { expr, .. } => match expr {
                Some(e) => write!(f, "  return {}", e),
                None => write!(f, "  return"),
            },
        }
    }
}

/// A defined variable carried into the IR, with its lowered (pure)
/// initializer when it has one.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub entity: EntityRef,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub body: Vec<Stmt>,
    /// Compiler temporaries allocated while lowering the body.
    pub temps: Vec<EntityRef>,
    /// Block-scoped statics with their lowered initializers.
    pub statics: Vec<Variable>,
}

impl Function {
    pub fn to_lines(&self) -> Vec<String> {
        self.body.iter().map(|s| s.to_string()).collect()
    }

    pub fn dump(&self) -> String {
        let mut out = format!("{}:\n", self.name);
        for line in self.to_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// The lowered translation unit handed to the code generator. The string
/// pool passes through from the AST unchanged.
#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub variables: Vec<Variable>,
    pub functions: Vec<Function>,
    pub strings: Vec<String>,
}
