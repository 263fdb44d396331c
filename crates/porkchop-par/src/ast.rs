//! The typed expression tree.
//!
//! Nodes form a strict tree owned top-down. Cross references (break to
//! loop, function reference to continuum slot) are integer indices, never
//! pointers, so the tree stays acyclic. Every node carries the source
//! segment it covers, its cached type, and optionally a compile-time
//! constant.

use porkchop_lex::{Token, TokenKind};
use porkchop_sem::{ConstValue, Type};
use porkchop_util::Segment;

/// How an identifier resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// `_`: reads produce the unit value, writes discard.
    None,
    /// A slot in the enclosing function's locals.
    Local(usize),
    /// A function in the continuum.
    Function(usize),
}

/// An expression node.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub segment: Segment,
    /// The type computed by this node's rule when it was constructed.
    pub typ: Type,
    /// The compile-time constant value, when the folder produced one.
    /// Its interpretation is fixed by `typ`.
    pub constant: Option<ConstValue>,
}

impl Expr {
    /// True for expressions that may appear on the left of an assignment.
    pub fn is_assignable_form(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Id(_) | ExprKind::Access { .. } | ExprKind::TupleLit(_)
        )
    }
}

#[derive(Debug)]
pub enum ExprKind {
    BoolConst(bool),
    CharConst(char),
    StringConst(String),
    IntConst(i64),
    FloatConst(f64),
    Id(Lookup),
    /// `+ - ! ~ sizeof @@ & * >>` before an operand.
    Prefix {
        op: TokenKind,
        rhs: Box<Expr>,
    },
    /// `++e` / `--e`.
    StatefulPrefix {
        increment: bool,
        rhs: Box<Expr>,
    },
    /// `e++` / `e--`.
    StatefulPostfix {
        increment: bool,
        lhs: Box<Expr>,
    },
    Infix {
        op: TokenKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: TokenKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        conjunction: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    In {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: TokenKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs[rhs]`.
    Access {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Invoke {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `lhs.f`: partial application of `f`'s first parameter.
    Dot {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs as T`; the target type is the node's own type.
    As {
        lhs: Box<Expr>,
    },
    Is {
        lhs: Box<Expr>,
        target: Type,
    },
    /// `default(T)`; the type is the node's own type.
    Default,
    TupleLit(Vec<Expr>),
    ListLit(Vec<Expr>),
    SetLit(Vec<Expr>),
    DictLit(Vec<(Expr, Expr)>),
    /// `{ e; e; … }` and the top-level program body.
    Clause(Vec<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    For {
        declarator: Declarator,
        iterable: Box<Expr>,
        body: Box<Expr>,
    },
    Break,
    Return(Box<Expr>),
    YieldReturn(Box<Expr>),
    YieldBreak,
    /// A named function; the index addresses the continuum.
    Fn(usize),
    Lambda {
        captures: Vec<Expr>,
        index: usize,
    },
    Let {
        declarator: Declarator,
        initializer: Box<Expr>,
    },
}

/// An lvalue target in `let` or `for`: a simple identifier with an
/// optional designated type, or a nested tuple of declarators.
#[derive(Debug)]
pub struct Declarator {
    pub segment: Segment,
    pub kind: DeclaratorKind,
    /// Filled in by [`Declarator::infer`]; the unit type until then.
    pub typ: Type,
}

#[derive(Debug)]
pub enum DeclaratorKind {
    Simple {
        name: String,
        token: Token,
        designated: Option<Type>,
        /// Local slot, assigned when the declarator is declared.
        /// `None` for `_`.
        index: Option<usize>,
    },
    Tuple(Vec<Declarator>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(kind: ExprKind, typ: Type) -> Expr {
        Expr {
            kind,
            segment: Segment::default(),
            typ,
            constant: None,
        }
    }

    #[test]
    fn test_assignable_forms() {
        assert!(dummy(ExprKind::Id(Lookup::Local(0)), Type::INT).is_assignable_form());
        assert!(dummy(ExprKind::TupleLit(vec![]), Type::INT).is_assignable_form());
        assert!(!dummy(ExprKind::IntConst(1), Type::INT).is_assignable_form());
    }
}
