//! The recursive-descent parser and semantic analyser.
//!
//! Parsing proceeds over a precedence ladder from ASSIGNMENT down to
//! PRIMARY. Every node is typed as it is constructed: the builder runs
//! the node's type rule against its children's cached types, then an
//! optional constant folder. Function and lambda bodies are parsed in a
//! fresh child context whose parent is the enclosing one.

use porkchop_lex::{parse_char, parse_float, parse_int, parse_string, Token, TokenKind};
use porkchop_sem::{identity_kind, ConstValue, IdentityKind, ScalarKind, Type};
use porkchop_util::{Category, Diagnostic, ErrorMessage, Segment, Source};

use crate::ast::{Declarator, DeclaratorKind, Expr, ExprKind, Lookup};
use crate::externals::external_prototypes;
use crate::function::{Continuum, FunctionDefinition};
use crate::local::{ContextLookup, DeclEntry, LocalContext};

/// The precedence ladder, low to high.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Assignment,
    LOr,
    LAnd,
    Or,
    Xor,
    And,
    Equality,
    Comparison,
    Shift,
    Addition,
    Multiplication,
    Prefix,
    Postfix,
    Primary,
}

impl Level {
    fn upper(self) -> Level {
        match self {
            Level::Assignment => Level::LOr,
            Level::LOr => Level::LAnd,
            Level::LAnd => Level::Or,
            Level::Or => Level::Xor,
            Level::Xor => Level::And,
            Level::And => Level::Equality,
            Level::Equality => Level::Comparison,
            Level::Comparison => Level::Shift,
            Level::Shift => Level::Addition,
            Level::Addition => Level::Multiplication,
            Level::Multiplication => Level::Prefix,
            Level::Prefix => Level::Postfix,
            Level::Postfix => Level::Primary,
            Level::Primary => unreachable!("no level above primary"),
        }
    }
}

fn in_level(kind: TokenKind, level: Level) -> bool {
    match kind {
        TokenKind::LOr => level == Level::LOr,
        TokenKind::LAnd => level == Level::LAnd,
        TokenKind::Or => level == Level::Or,
        TokenKind::Xor => level == Level::Xor,
        TokenKind::And => level == Level::And,
        TokenKind::Eq | TokenKind::Ne | TokenKind::Eqq | TokenKind::Neq => {
            level == Level::Equality
        }
        TokenKind::Lt | TokenKind::Gt | TokenKind::Le | TokenKind::Ge => {
            level == Level::Comparison
        }
        TokenKind::Shl | TokenKind::Shr | TokenKind::Ushr => level == Level::Shift,
        TokenKind::Add | TokenKind::Sub => level == Level::Addition,
        TokenKind::In | TokenKind::Mul | TokenKind::Div | TokenKind::Rem => {
            level == Level::Multiplication
        }
        _ => false,
    }
}

fn is_assign_op(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Assign
            | TokenKind::AssignAnd
            | TokenKind::AssignXor
            | TokenKind::AssignOr
            | TokenKind::AssignShl
            | TokenKind::AssignShr
            | TokenKind::AssignUshr
            | TokenKind::AssignAdd
            | TokenKind::AssignSub
            | TokenKind::AssignMul
            | TokenKind::AssignDiv
            | TokenKind::AssignRem
    )
}

fn ordinal(index: usize) -> String {
    let n = index + 1;
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Parses a whole program into its continuum, with the program body as
/// the synthetic `main` function.
pub fn parse_program(source: &Source, tokens: &[Token]) -> Result<Continuum, Diagnostic> {
    let mut parser = Parser::new(source, tokens);
    parser.run()?;
    Ok(parser.continuum)
}

pub(crate) struct Parser<'src> {
    source: &'src Source,
    tokens: &'src [Token],
    pos: usize,
    pub continuum: Continuum,
    contexts: Vec<LocalContext>,
    /// Break counters of the open loops, innermost last.
    hooks: Vec<usize>,
}

impl<'src> Parser<'src> {
    fn new(source: &'src Source, tokens: &'src [Token]) -> Self {
        let continuum = Continuum::new();
        let mut root = LocalContext::new(0);
        for (index, (name, prototype)) in external_prototypes().into_iter().enumerate() {
            root.define_global(name, index, prototype);
        }
        Self {
            source,
            tokens,
            pos: 0,
            continuum,
            contexts: vec![root],
            hooks: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // token cursor
    // ------------------------------------------------------------------

    fn remains(&self) -> bool {
        self.pos < self.tokens.len()
    }

    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Result<Token, Diagnostic> {
        if self.remains() {
            let token = self.tokens[self.pos];
            self.pos += 1;
            Ok(token)
        } else {
            Err(self.syntax("unexpected termination of tokens", self.peek().segment()))
        }
    }

    fn rewind(&self) -> Token {
        self.tokens[self.pos - 1]
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> Result<Token, Diagnostic> {
        let token = self.next()?;
        if token.kind != kind {
            return Err(self.syntax(msg, token.segment()));
        }
        Ok(token)
    }

    fn expect_comma(&mut self) -> Result<(), Diagnostic> {
        self.expect(TokenKind::Comma, "',' is expected")?;
        Ok(())
    }

    fn optional_comma(&self, size: usize) -> Result<(), Diagnostic> {
        if size == 1 && self.rewind().kind == TokenKind::Comma {
            return Err(self.syntax(
                "the additional comma is forbidden beside a single element",
                self.rewind().segment(),
            ));
        }
        Ok(())
    }

    fn of(&self, token: Token) -> &str {
        self.source.slice(token.line, token.column, token.width)
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    fn syntax(&self, msg: &str, segment: Segment) -> Diagnostic {
        Diagnostic::error(Category::Syntactic, msg, segment)
    }

    fn type_error(&self, msg: impl Into<String>, segment: Segment) -> Diagnostic {
        Diagnostic::error(Category::SemanticType, msg, segment)
    }

    fn expect_type(&self, expr: &Expr, expected: &Type) -> Result<(), Diagnostic> {
        if &expr.typ != expected {
            return Err(self.type_error(
                format!("expected '{}' but got '{}'", expected, expr.typ),
                expr.segment,
            ));
        }
        Ok(())
    }

    fn expect_desc(&self, expr: &Expr, expected: &str) -> Diagnostic {
        self.type_error(
            format!("expected {expected} but got '{}'", expr.typ),
            expr.segment,
        )
    }

    fn expect_pred(
        &self,
        expr: &Expr,
        pred: fn(&Type) -> bool,
        expected: &str,
    ) -> Result<(), Diagnostic> {
        if !pred(&expr.typ) {
            return Err(self.expect_desc(expr, expected));
        }
        Ok(())
    }

    fn match_operands(&self, lhs: &Expr, rhs: &Expr) -> Result<(), Diagnostic> {
        if lhs.typ != rhs.typ {
            return Err(self
                .type_error(
                    "type mismatch on both operands",
                    lhs.segment.cover(rhs.segment),
                )
                .with(ErrorMessage::note(
                    format!("type of left operand is '{}'", lhs.typ),
                    lhs.segment,
                ))
                .with(ErrorMessage::note(
                    format!("type of right operand is '{}'", rhs.typ),
                    rhs.segment,
                )));
        }
        Ok(())
    }

    fn check_assignable(
        &self,
        typ: &Type,
        expected: &Type,
        segment: Segment,
    ) -> Result<(), Diagnostic> {
        if !expected.assignable_from(typ) {
            return Err(self.type_error(
                format!("'{typ}' is not assignable to '{expected}'"),
                segment,
            ));
        }
        Ok(())
    }

    fn never_allowed(&self, typ: &Type, msg: &str, segment: Segment) -> Result<(), Diagnostic> {
        if typ.is_never() {
            return Err(self.type_error(format!("'never' is never allowed {msg}"), segment));
        }
        Ok(())
    }

    fn require_const(&self, expr: &Expr) -> Result<ConstValue, Diagnostic> {
        expr.constant.ok_or_else(|| {
            Diagnostic::error(
                Category::ConstantEval,
                "cannot evaluate at compile-time",
                expr.segment,
            )
        })
    }

    fn ctx(&mut self) -> &mut LocalContext {
        self.contexts.last_mut().expect("context stack is never empty")
    }

    // ------------------------------------------------------------------
    // program entry
    // ------------------------------------------------------------------

    fn run(&mut self) -> Result<(), Diagnostic> {
        let first = self.peek();
        let mut lines = Vec::new();
        while self.remains() {
            if self.peek().kind == TokenKind::Linebreak {
                self.next()?;
                continue;
            }
            lines.push(self.parse_expression(Level::Assignment)?);
            match self.peek().kind {
                TokenKind::Linebreak => {}
                _ => {
                    return Err(self.syntax(
                        "a linebreak is expected between expressions",
                        self.peek().segment(),
                    ))
                }
            }
        }
        let segment = first.to(self.rewind());
        let body = self.clause_expr(lines, segment)?;
        let (body, ret, generator) = self.finish_fn_body(body, None, true)?;
        debug_assert!(!generator);
        self.ctx().finish()?;
        let root = self.contexts.pop().expect("root context");
        self.continuum.define_main(FunctionDefinition {
            parameters: Vec::new(),
            prototype: Type::func(Vec::new(), ret),
            locals: root.local_types,
            body,
            generator: false,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // the ladder
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, level: Level) -> Result<Expr, Diagnostic> {
        match level {
            Level::Assignment => self.parse_assignment(),
            Level::Prefix => self.parse_prefix(),
            Level::Postfix => self.parse_postfix(),
            Level::Primary => self.parse_primary(),
            _ => {
                let mut lhs = self.parse_expression(level.upper())?;
                while in_level(self.peek().kind, level) {
                    let token = self.next()?;
                    let rhs = self.parse_expression(level.upper())?;
                    lhs = match level {
                        Level::LOr | Level::LAnd => self.logical_expr(token, lhs, rhs)?,
                        Level::Equality | Level::Comparison => {
                            self.compare_expr(token, lhs, rhs)?
                        }
                        _ => {
                            if token.kind == TokenKind::In {
                                self.in_expr(lhs, rhs)?
                            } else {
                                self.infix_expr(token, lhs, rhs)?
                            }
                        }
                    };
                }
                Ok(lhs)
            }
        }
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        if self.peek().kind == TokenKind::Return {
            let token = self.next()?;
            let rhs = self.parse_expression(Level::Assignment)?;
            self.never_allowed(&rhs.typ, "to return", rhs.segment)?;
            let segment = token.segment().cover(rhs.segment);
            self.ctx().returns.push((rhs.typ.clone(), segment));
            return Ok(Expr {
                kind: ExprKind::Return(Box::new(rhs)),
                segment,
                typ: Type::NEVER,
                constant: None,
            });
        }
        let lhs = self.parse_expression(Level::LOr)?;
        if is_assign_op(self.peek().kind) {
            let token = self.next()?;
            let rhs = self.parse_expression(Level::Assignment)?;
            if !lhs.is_assignable_form() {
                return Err(self.syntax("assignable expression is expected", token.segment()));
            }
            return self.assign_expr(token, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek();
        match token.kind {
            TokenKind::Add | TokenKind::Sub => {
                self.next()?;
                // an adjacent integer literal merges with its sign, so
                // -9223372036854775808 evaluates in range
                let literal = self.peek();
                if matches!(
                    literal.kind,
                    TokenKind::BinaryInteger
                        | TokenKind::OctalInteger
                        | TokenKind::DecimalInteger
                        | TokenKind::HexadecimalInteger
                ) && literal.line == token.line
                    && token.column + token.width == literal.column
                {
                    self.next()?;
                    let merged = Token {
                        line: token.line,
                        column: token.column,
                        width: token.width + literal.width,
                        kind: literal.kind,
                    };
                    let value = parse_int(self.source, merged)?;
                    return Ok(Expr {
                        kind: ExprKind::IntConst(value),
                        segment: merged.segment(),
                        typ: Type::INT,
                        constant: Some(ConstValue::from_int(value)),
                    });
                }
                let rhs = self.parse_expression(Level::Prefix)?;
                self.prefix_expr(token, rhs)
            }
            TokenKind::Not
            | TokenKind::Inv
            | TokenKind::Sizeof
            | TokenKind::AtAt
            | TokenKind::And
            | TokenKind::Mul
            | TokenKind::Shr => {
                self.next()?;
                let rhs = self.parse_expression(Level::Prefix)?;
                self.prefix_expr(token, rhs)
            }
            TokenKind::Inc | TokenKind::Dec => {
                self.next()?;
                let rhs = self.parse_expression(Level::Prefix)?;
                if !rhs.is_assignable_form() {
                    return Err(self.syntax("assignable expression is expected", token.segment()));
                }
                self.ensure_assignable(&rhs)?;
                self.expect_type(&rhs, &Type::INT)?;
                Ok(Expr {
                    segment: token.segment().cover(rhs.segment),
                    kind: ExprKind::StatefulPrefix {
                        increment: token.kind == TokenKind::Inc,
                        rhs: Box::new(rhs),
                    },
                    typ: Type::INT,
                    constant: None,
                })
            }
            _ => self.parse_expression(Level::Postfix),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_expression(Level::Primary)?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let token1 = self.next()?;
                    let args = self.parse_expressions(TokenKind::RParen)?;
                    let token2 = self.next()?;
                    lhs = self.invoke_expr(token1, token2, lhs, args)?;
                }
                TokenKind::LBracket => {
                    self.next()?;
                    let rhs = self.parse_expression(Level::Assignment)?;
                    let token2 = self.expect(TokenKind::RBracket, "missing ']' to match '['")?;
                    lhs = self.access_expr(token2, lhs, rhs)?;
                }
                TokenKind::Dot => {
                    self.next()?;
                    let rhs = self.parse_id()?;
                    lhs = self.dot_expr(lhs, rhs)?;
                }
                TokenKind::As => {
                    self.next()?;
                    let target = self.parse_type()?;
                    lhs = self.as_expr(self.rewind(), lhs, target)?;
                }
                TokenKind::Is => {
                    self.next()?;
                    let target = self.parse_type()?;
                    lhs = self.is_expr(self.rewind(), lhs, target)?;
                }
                TokenKind::Inc | TokenKind::Dec => {
                    let token = self.next()?;
                    if !lhs.is_assignable_form() {
                        return Err(self.syntax(
                            "id-expression or access expression is expected",
                            token.segment(),
                        ));
                    }
                    self.ensure_assignable(&lhs)?;
                    self.expect_type(&lhs, &Type::INT)?;
                    lhs = Expr {
                        segment: lhs.segment.cover(token.segment()),
                        kind: ExprKind::StatefulPostfix {
                            increment: token.kind == TokenKind::Inc,
                            lhs: Box::new(lhs),
                        },
                        typ: Type::INT,
                        constant: None,
                    };
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek();
        match token.kind {
            TokenKind::LParen => {
                self.next()?;
                let mut exprs = self.parse_expressions(TokenKind::RParen)?;
                let token2 = self.next()?;
                match exprs.len() {
                    0 => Ok(Expr {
                        kind: ExprKind::Clause(Vec::new()),
                        segment: token.to(token2),
                        typ: Type::NONE,
                        constant: Some(ConstValue::NONE),
                    }),
                    1 => Ok(exprs.pop().expect("one element")),
                    _ => self.tuple_expr(token, token2, exprs),
                }
            }
            TokenKind::LBracket => {
                self.next()?;
                let exprs = self.parse_expressions(TokenKind::RBracket)?;
                let token2 = self.next()?;
                if exprs.is_empty() {
                    return Err(self.syntax(
                        "use default([T]) to create empty list",
                        token.to(token2),
                    ));
                }
                self.list_expr(token, token2, exprs)
            }
            TokenKind::AtBracket => self.parse_set_or_dict(),
            TokenKind::LBrace => self.parse_clause(),
            TokenKind::Identifier => self.parse_id(),
            TokenKind::False | TokenKind::True => {
                let token = self.next()?;
                let value = token.kind == TokenKind::True;
                Ok(Expr {
                    kind: ExprKind::BoolConst(value),
                    segment: token.segment(),
                    typ: Type::BOOL,
                    constant: Some(ConstValue::from_bool(value)),
                })
            }
            TokenKind::CharacterLiteral => {
                let token = self.next()?;
                let value = parse_char(self.source, token)?;
                Ok(Expr {
                    kind: ExprKind::CharConst(value),
                    segment: token.segment(),
                    typ: Type::CHAR,
                    constant: Some(ConstValue::from_char(value)),
                })
            }
            TokenKind::StringLiteral => {
                let token = self.next()?;
                let value = parse_string(self.source, token)?;
                Ok(Expr {
                    kind: ExprKind::StringConst(value),
                    segment: token.segment(),
                    typ: Type::STRING,
                    constant: None,
                })
            }
            TokenKind::BinaryInteger
            | TokenKind::OctalInteger
            | TokenKind::DecimalInteger
            | TokenKind::HexadecimalInteger
            | TokenKind::Line
            | TokenKind::Eof => {
                let token = self.next()?;
                let value = match token.kind {
                    TokenKind::Line => token.line as i64 + 1,
                    TokenKind::Eof => -1,
                    _ => parse_int(self.source, token)?,
                };
                Ok(Expr {
                    kind: ExprKind::IntConst(value),
                    segment: token.segment(),
                    typ: Type::INT,
                    constant: Some(ConstValue::from_int(value)),
                })
            }
            TokenKind::FloatingPoint | TokenKind::Nan | TokenKind::Inf => {
                let token = self.next()?;
                let value = match token.kind {
                    TokenKind::Nan => f64::NAN,
                    TokenKind::Inf => f64::INFINITY,
                    _ => parse_float(self.source, token)?,
                };
                Ok(Expr {
                    kind: ExprKind::FloatConst(value),
                    segment: token.segment(),
                    typ: Type::FLOAT,
                    constant: Some(ConstValue::from_float(value)),
                })
            }
            TokenKind::Default => {
                self.next()?;
                self.expect(TokenKind::LParen, "'(' is expected")?;
                let target = self.parse_type()?;
                let token2 = self.expect(TokenKind::RParen, "missing ')' to match '('")?;
                self.default_expr(token, token2, target)
            }
            TokenKind::Break => {
                let token = self.next()?;
                let base = self.contexts.last().expect("context").hook_base;
                if self.hooks.len() <= base {
                    return Err(self.syntax("wild break", token.segment()));
                }
                *self.hooks.last_mut().expect("hook") += 1;
                Ok(Expr {
                    kind: ExprKind::Break,
                    segment: token.segment(),
                    typ: Type::NEVER,
                    constant: None,
                })
            }
            TokenKind::Yield => {
                let token = self.next()?;
                if self.peek().kind == TokenKind::Break {
                    let token2 = self.next()?;
                    return Ok(Expr {
                        kind: ExprKind::YieldBreak,
                        segment: token.to(token2),
                        typ: Type::NEVER,
                        constant: None,
                    });
                }
                let rhs = self.parse_expression(Level::Assignment)?;
                self.never_allowed(&rhs.typ, "to yield", rhs.segment)?;
                let segment = token.segment().cover(rhs.segment);
                self.ctx().yields.push((rhs.typ.clone(), segment));
                let typ = rhs.typ.clone();
                Ok(Expr {
                    kind: ExprKind::YieldReturn(Box::new(rhs)),
                    segment,
                    typ,
                    constant: None,
                })
            }
            TokenKind::While => self.parse_while(),
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Fn => self.parse_fn(),
            TokenKind::Dollar => self.parse_lambda(),
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_expression(Level::Assignment),
            TokenKind::Else => {
                let token = self.next()?;
                Err(self.syntax("stray 'else'", token.segment()))
            }
            TokenKind::Linebreak => {
                let token = self.next()?;
                Err(self.syntax("unexpected linebreak", token.segment()))
            }
            _ => {
                let token = self.next()?;
                Err(self.syntax("unexpected token", token.segment()))
            }
        }
    }

    // ------------------------------------------------------------------
    // compound statements
    // ------------------------------------------------------------------

    fn parse_clause(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.expect(TokenKind::LBrace, "'{' is expected")?;
        self.ctx().push();
        let mut lines = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::RBrace => {
                    self.next()?;
                    break;
                }
                TokenKind::Linebreak => {
                    self.next()?;
                }
                _ => {
                    lines.push(self.parse_expression(Level::Assignment)?);
                    match self.peek().kind {
                        TokenKind::RBrace => {
                            self.next()?;
                            break;
                        }
                        TokenKind::Linebreak => {
                            self.next()?;
                        }
                        _ => {
                            return Err(self.syntax(
                                "a linebreak is expected between expressions",
                                self.peek().segment(),
                            ))
                        }
                    }
                }
            }
        }
        self.ctx().pop()?;
        self.clause_expr(lines, token.to(self.rewind()))
    }

    fn parse_expressions(&mut self, stop: TokenKind) -> Result<Vec<Expr>, Diagnostic> {
        let mut exprs = Vec::new();
        loop {
            if self.peek().kind == stop {
                break;
            }
            exprs.push(self.parse_expression(Level::Assignment)?);
            if self.peek().kind == stop {
                break;
            }
            self.expect_comma()?;
        }
        self.optional_comma(exprs.len())?;
        Ok(exprs)
    }

    fn parse_set_or_dict(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        let mut elements: Vec<(Expr, Option<Expr>)> = Vec::new();
        let mut values = 0usize;
        loop {
            if self.peek().kind == TokenKind::RBracket {
                break;
            }
            let key = self.parse_expression(Level::Assignment)?;
            let value = if self.peek().kind == TokenKind::Colon {
                self.next()?;
                values += 1;
                Some(self.parse_expression(Level::Assignment)?)
            } else {
                None
            };
            elements.push((key, value));
            if self.peek().kind == TokenKind::RBracket {
                break;
            }
            self.expect_comma()?;
        }
        self.optional_comma(elements.len())?;
        let token2 = self.next()?;
        if elements.is_empty() {
            return Err(self.syntax(
                "use default(@[T]) or default(@[K: V]) to create empty set or dict",
                token.to(token2),
            ));
        }
        if values == 0 {
            let keys = elements.into_iter().map(|(key, _)| key).collect();
            self.set_expr(token, token2, keys)
        } else if values == elements.len() {
            let pairs = elements
                .into_iter()
                .map(|(key, value)| (key, value.expect("value present")))
                .collect();
            self.dict_expr(token, token2, pairs)
        } else {
            Err(self.syntax(
                "missing values for some keys to create dict",
                token.to(token2),
            ))
        }
    }

    fn parse_if(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        self.ctx().push();
        let cond = self.parse_expression(Level::Assignment)?;
        let then = self.parse_clause()?;
        let otherwise = if self.peek().kind == TokenKind::Else {
            self.next()?;
            if self.peek().kind == TokenKind::If {
                self.parse_if()?
            } else {
                self.parse_clause()?
            }
        } else {
            Expr {
                kind: ExprKind::Clause(Vec::new()),
                segment: self.rewind().segment(),
                typ: Type::NONE,
                constant: Some(ConstValue::NONE),
            }
        };
        self.ctx().pop()?;
        self.if_else_expr(token, cond, then, otherwise)
    }

    fn parse_while(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        self.hooks.push(0);
        self.ctx().push();
        let cond = self.parse_expression(Level::Assignment)?;
        let body = self.parse_clause()?;
        self.ctx().pop()?;
        let breaks = self.hooks.pop().expect("loop hook");
        let typ = if cond.typ.is_never() {
            Type::NEVER
        } else {
            self.expect_type(&cond, &Type::BOOL)?;
            if cond.constant.is_some_and(ConstValue::as_bool) && breaks == 0 {
                Type::NEVER
            } else {
                Type::NONE
            }
        };
        Ok(Expr {
            segment: token.segment().cover(body.segment),
            kind: ExprKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            typ,
            constant: None,
        })
    }

    fn parse_for(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        let mut declarator = self.parse_declarator()?;
        self.expect(TokenKind::In, "'in' is expected")?;
        self.hooks.push(0);
        self.ctx().push();
        let iterable = self.parse_expression(Level::Assignment)?;
        let Some(element) = iterable.typ.element_of(false) else {
            return Err(self.expect_desc(&iterable, "iterable type"));
        };
        self.infer_declarator(&mut declarator, &element)?;
        self.declare_declarator(&mut declarator);
        let body = self.parse_clause()?;
        self.ctx().pop()?;
        self.hooks.pop();
        let typ = if body.typ.is_never() {
            Type::NEVER
        } else {
            Type::NONE
        };
        Ok(Expr {
            segment: token.segment().cover(body.segment),
            kind: ExprKind::For {
                declarator,
                iterable: Box::new(iterable),
                body: Box::new(body),
            },
            typ,
            constant: None,
        })
    }

    fn parse_let(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        let mut declarator = self.parse_declarator()?;
        self.expect(TokenKind::Assign, "'=' is expected before initializer")?;
        let initializer = self.parse_expression(Level::Assignment)?;
        self.infer_declarator(&mut declarator, &initializer.typ)?;
        self.declare_declarator(&mut declarator);
        let typ = declarator.typ.clone();
        Ok(Expr {
            segment: token.segment().cover(initializer.segment),
            kind: ExprKind::Let {
                declarator,
                initializer: Box::new(initializer),
            },
            typ,
            constant: None,
        })
    }

    // ------------------------------------------------------------------
    // functions and lambdas
    // ------------------------------------------------------------------

    fn expect_identifier(&mut self) -> Result<Token, Diagnostic> {
        let token = self.next()?;
        if token.kind != TokenKind::Identifier {
            return Err(self.syntax("id-expression is expected", token.segment()));
        }
        Ok(token)
    }

    fn parse_id(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.expect_identifier()?;
        let name = self.of(token).to_owned();
        let (lookup, typ) = self.lookup(&name, token.segment())?;
        let constant = match lookup {
            Lookup::None => Some(ConstValue::NONE),
            _ => None,
        };
        Ok(Expr {
            kind: ExprKind::Id(lookup),
            segment: token.segment(),
            typ,
            constant,
        })
    }

    fn lookup(&self, name: &str, segment: Segment) -> Result<(Lookup, Type), Diagnostic> {
        if name == "_" {
            return Ok((Lookup::None, Type::NONE));
        }
        for (depth, context) in self.contexts.iter().enumerate().rev() {
            let innermost = depth + 1 == self.contexts.len();
            if innermost {
                if let Some((index, typ)) = context.lookup_local(name) {
                    return Ok((Lookup::Local(index), typ));
                }
            }
            if let Some(ContextLookup::Function { index, typ }) =
                context.lookup_function(name)?
            {
                return Ok((Lookup::Function(index), typ));
            }
            if !innermost && context.lookup_local(name).is_some() {
                return Err(Diagnostic::error(
                    Category::SemanticResolution,
                    "cannot implicitly capture a variable of an enclosing function",
                    segment,
                )
                .with(ErrorMessage::plain_note(
                    "list it as a lambda capture to bring it into scope",
                )));
            }
        }
        Err(Diagnostic::error(
            Category::SemanticResolution,
            "unable to resolve this identifier",
            segment,
        ))
    }

    fn parse_parameters(&mut self) -> Result<Vec<(Token, Option<Type>)>, Diagnostic> {
        self.expect(TokenKind::LParen, "'(' is expected")?;
        let mut parameters = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RParen {
                break;
            }
            let declarator = self.parse_simple_declarator()?;
            let DeclaratorKind::Simple {
                token, designated, ..
            } = declarator.kind
            else {
                unreachable!("simple declarator expected")
            };
            parameters.push((token, designated));
            if self.peek().kind == TokenKind::RParen {
                break;
            }
            self.expect_comma()?;
        }
        self.optional_comma(parameters.len())?;
        self.next()?;
        Ok(parameters)
    }

    fn required_parameter_types(
        &self,
        parameters: &[(Token, Option<Type>)],
    ) -> Result<Vec<Type>, Diagnostic> {
        parameters
            .iter()
            .enumerate()
            .map(|(i, (token, typ))| {
                typ.clone().ok_or_else(|| {
                    self.syntax(
                        &format!("missing type for {} parameter", ordinal(i)),
                        token.segment(),
                    )
                })
            })
            .collect()
    }

    fn optional_type(&mut self) -> Result<Option<Type>, Diagnostic> {
        if self.peek().kind != TokenKind::Colon {
            return Ok(None);
        }
        self.next()?;
        Ok(Some(self.parse_type()?))
    }

    /// Parses a function body in the current (freshly pushed) context and
    /// reconciles returns/yields with the declared return type.
    fn parse_fn_body(
        &mut self,
        declared: Option<Type>,
    ) -> Result<(Expr, Type, bool), Diagnostic> {
        let body = self.parse_expression(Level::Assignment)?;
        self.finish_fn_body(body, declared, false)
    }

    fn finish_fn_body(
        &mut self,
        body: Expr,
        declared: Option<Type>,
        main: bool,
    ) -> Result<(Expr, Type, bool), Diagnostic> {
        let context = self.ctx();
        let returns = std::mem::take(&mut context.returns);
        let yields = std::mem::take(&mut context.yields);
        if !yields.is_empty() {
            if main {
                return Err(self.type_error("yield is not allowed at top level", yields[0].1));
            }
            if let Some((_, segment)) = returns.first() {
                return Err(self.type_error("return is not allowed inside a generator", *segment));
            }
            let (element, _) = yields[0].clone();
            for (typ, segment) in yields.iter().skip(1) {
                if typ != &element {
                    return Err(self
                        .type_error(
                            format!(
                                "type mismatch on yields, the one is '{element}', \
                                 but the other is '{typ}'"
                            ),
                            *segment,
                        )
                        .with(ErrorMessage::note("first yield is here", yields[0].1)));
                }
            }
            let ret = match declared {
                Some(ret) => {
                    let Type::Iter(expected) = &ret else {
                        return Err(self.type_error(
                            format!("a generator must return an iterator type, not '{ret}'"),
                            yields[0].1,
                        ));
                    };
                    if **expected != element {
                        return Err(self.type_error(
                            format!(
                                "this generator yields '{element}' but declares '{ret}'"
                            ),
                            yields[0].1,
                        ));
                    }
                    ret
                }
                None => Type::iter(element),
            };
            return Ok((body, ret, true));
        }
        let type0 = if returns.is_empty() {
            body.typ.clone()
        } else {
            let (first, first_segment) = returns[0].clone();
            for (typ, segment) in returns.iter().skip(1) {
                if typ != &first {
                    return Err(self
                        .type_error(
                            format!(
                                "type mismatch on returns, the one is '{first}', \
                                 but the other is '{typ}'"
                            ),
                            *segment,
                        )
                        .with(ErrorMessage::note("first return is here", first_segment)));
                }
            }
            if !body.typ.is_never() && body.typ != first {
                return Err(self.type_error(
                    format!(
                        "type mismatch on returns and expression body, the one is \
                         '{first}', but the other is '{}'",
                        body.typ
                    ),
                    body.segment,
                ));
            }
            first
        };
        match declared {
            Some(ret) => {
                self.check_assignable(&type0, &ret, body.segment)?;
                Ok((body, ret, false))
            }
            None => Ok((body, type0, false)),
        }
    }

    fn parse_fn(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        let name_token = self.expect_identifier()?;
        let name = self.of(name_token).to_owned();
        if name == "_" {
            return Err(self.syntax("function name must not be '_'", name_token.segment()));
        }
        let parameters = self.parse_parameters()?;
        let parameter_types = self.required_parameter_types(&parameters)?;
        let declared_ret = self.optional_type()?;
        let decl_segment = token.to(self.rewind());

        // reconcile with a forward declaration in the same scope
        let existing = self.ctx().existing_decl(&name).cloned();
        if let Some(entry) = &existing {
            if entry.parameters != parameter_types
                || declared_ret
                    .as_ref()
                    .is_some_and(|ret| entry.ret.as_ref() != Some(ret))
            {
                return Err(Diagnostic::error(
                    Category::SemanticResolution,
                    "prototype mismatches the former declaration",
                    decl_segment,
                )
                .with(ErrorMessage::note("declared here", entry.segment)));
            }
        }

        if self.peek().kind != TokenKind::Assign {
            // a plain declaration
            let Some(ret) = declared_ret else {
                return Err(self.syntax(
                    "return type of declared function is missing",
                    self.rewind().segment(),
                ));
            };
            let index = match existing {
                Some(entry) => entry.index,
                None => {
                    let prototype = Type::func(parameter_types.clone(), ret.clone());
                    let index =
                        self.continuum
                            .declare_named(&name, decl_segment, Some(prototype));
                    self.ctx().declare(
                        &name,
                        DeclEntry {
                            index,
                            parameters: parameter_types.clone(),
                            ret: Some(ret.clone()),
                            segment: decl_segment,
                        },
                    );
                    index
                }
            };
            return Ok(Expr {
                kind: ExprKind::Fn(index),
                segment: decl_segment,
                typ: Type::func(parameter_types, ret),
                constant: None,
            });
        }

        let index = match &existing {
            Some(entry) => entry.index,
            None => {
                let prototype = declared_ret
                    .clone()
                    .map(|ret| Type::func(parameter_types.clone(), ret));
                let index = self.continuum.declare_named(&name, decl_segment, prototype);
                self.ctx().declare(
                    &name,
                    DeclEntry {
                        index,
                        parameters: parameter_types.clone(),
                        ret: declared_ret.clone(),
                        segment: decl_segment,
                    },
                );
                index
            }
        };
        self.next()?; // '='

        let declared = declared_ret.or_else(|| existing.as_ref().and_then(|e| e.ret.clone()));
        self.contexts.push(LocalContext::new(self.hooks.len()));
        let mut parameter_names = Vec::with_capacity(parameters.len());
        for ((param_token, _), typ) in parameters.iter().zip(&parameter_types) {
            let param_name = self.of(*param_token).to_owned();
            self.bind_parameter(&param_name, typ.clone());
            parameter_names.push(param_name);
        }
        let (body, ret, generator) = self.parse_fn_body(declared)?;
        self.ctx().finish()?;
        let child = self.contexts.pop().expect("child context");

        let prototype = Type::func(parameter_types, ret);
        self.continuum.define_named(
            index,
            FunctionDefinition {
                parameters: parameter_names,
                prototype: prototype.clone(),
                locals: child.local_types,
                body,
                generator,
            },
        );
        self.ctx().define(&name, index, prototype.clone());
        Ok(Expr {
            kind: ExprKind::Fn(index),
            segment: decl_segment,
            typ: prototype,
            constant: None,
        })
    }

    fn bind_parameter(&mut self, name: &str, typ: Type) {
        if name == "_" {
            self.ctx().local_anon(typ);
        } else {
            self.ctx().local(name, typ);
        }
    }

    fn parse_lambda(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.next()?;
        let mut captures = Vec::new();
        loop {
            if self.peek().kind == TokenKind::LParen {
                break;
            }
            captures.push(self.parse_id()?);
            if self.peek().kind == TokenKind::LParen {
                break;
            }
            self.expect_comma()?;
        }
        self.optional_comma(captures.len())?;
        let parameters = self.parse_parameters()?;
        let parameter_types = self.required_parameter_types(&parameters)?;
        let declared_ret = self.optional_type()?;
        self.expect(TokenKind::Assign, "'=' is expected before lambda body")?;

        self.contexts.push(LocalContext::new(self.hooks.len()));
        let mut underlying_names = Vec::new();
        let mut underlying_types = Vec::new();
        for capture in &captures {
            let capture_name = self.source.segment_text(capture.segment).to_owned();
            self.bind_parameter(&capture_name, capture.typ.clone());
            underlying_names.push(capture_name);
            underlying_types.push(capture.typ.clone());
        }
        for ((param_token, _), typ) in parameters.iter().zip(&parameter_types) {
            let param_name = self.of(*param_token).to_owned();
            self.bind_parameter(&param_name, typ.clone());
            underlying_names.push(param_name);
        }
        underlying_types.extend(parameter_types.iter().cloned());
        let (body, ret, generator) = self.parse_fn_body(declared_ret)?;
        self.ctx().finish()?;
        let child = self.contexts.pop().expect("child context");

        let index = self.continuum.add_lambda(FunctionDefinition {
            parameters: underlying_names,
            prototype: Type::func(underlying_types, ret.clone()),
            locals: child.local_types,
            body,
            generator,
        });
        let visible = Type::func(parameter_types, ret);
        Ok(Expr {
            segment: token.to(self.rewind()),
            kind: ExprKind::Lambda { captures, index },
            typ: visible,
            constant: None,
        })
    }

    // ------------------------------------------------------------------
    // types and declarators
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type, Diagnostic> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Identifier => {
                let name = self.of(token);
                match ScalarKind::from_name(name) {
                    Some(kind) => Ok(Type::Scalar(kind)),
                    None => Err(self.syntax("type is expected", token.segment())),
                }
            }
            TokenKind::LBracket => {
                let element = self.parse_type()?;
                self.never_allowed(&element, "as a list element", self.rewind().segment())?;
                self.expect(TokenKind::RBracket, "missing ']' to match '['")?;
                Ok(Type::list(element))
            }
            TokenKind::AtBracket => {
                let key = self.parse_type()?;
                let value = self.optional_type()?;
                self.expect(TokenKind::RBracket, "missing ']' to match '@['")?;
                match value {
                    Some(value) => {
                        self.never_allowed(&key, "as a dict key", self.rewind().segment())?;
                        self.never_allowed(&value, "as a dict value", self.rewind().segment())?;
                        Ok(Type::dict(key, value))
                    }
                    None => {
                        self.never_allowed(&key, "as a set element", self.rewind().segment())?;
                        Ok(Type::set(key))
                    }
                }
            }
            TokenKind::LParen => {
                let mut parameters = Vec::new();
                loop {
                    if self.peek().kind == TokenKind::RParen {
                        break;
                    }
                    let parameter = self.parse_type()?;
                    self.never_allowed(
                        &parameter,
                        "as a tuple element or a parameter",
                        self.rewind().segment(),
                    )?;
                    parameters.push(parameter);
                    if self.peek().kind == TokenKind::RParen {
                        break;
                    }
                    self.expect_comma()?;
                }
                self.optional_comma(parameters.len())?;
                self.next()?;
                if let Some(ret) = self.optional_type()? {
                    return Ok(Type::func(parameters, ret));
                }
                match parameters.len() {
                    0 => Ok(Type::NONE),
                    1 => Ok(parameters.pop().expect("one element")),
                    _ => Ok(Type::Tuple(parameters)),
                }
            }
            TokenKind::Mul => Ok(Type::iter(self.parse_type()?)),
            _ => Err(self.syntax("type is expected", token.segment())),
        }
    }

    fn parse_simple_declarator(&mut self) -> Result<Declarator, Diagnostic> {
        let token = self.expect_identifier()?;
        let mut designated = self.optional_type()?;
        let underscore = self.of(token) == "_";
        let segment = token.to(self.rewind());
        match &designated {
            Some(typ) => {
                self.never_allowed(typ, "as a declarator", segment)?;
                if underscore && !typ.is_none() {
                    return Err(self.syntax("the type of '_' must be none", segment));
                }
            }
            None => {
                if underscore {
                    designated = Some(Type::NONE);
                }
            }
        }
        Ok(Declarator {
            segment,
            kind: DeclaratorKind::Simple {
                name: self.of(token).to_owned(),
                token,
                designated,
                index: None,
            },
            typ: Type::NONE,
        })
    }

    fn parse_declarator(&mut self) -> Result<Declarator, Diagnostic> {
        if self.peek().kind != TokenKind::LParen {
            return self.parse_simple_declarator();
        }
        let token1 = self.next()?;
        let mut elements = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RParen {
                break;
            }
            elements.push(self.parse_declarator()?);
            if self.peek().kind == TokenKind::RParen {
                break;
            }
            self.expect_comma()?;
        }
        self.optional_comma(elements.len())?;
        let token2 = self.next()?;
        let segment = token1.to(token2);
        match elements.len() {
            0 => Err(self.syntax("invalid empty declarator", segment)),
            1 => Ok(elements.pop().expect("one element")),
            _ => Ok(Declarator {
                segment,
                kind: DeclaratorKind::Tuple(elements),
                typ: Type::NONE,
            }),
        }
    }

    fn infer_declarator(
        &mut self,
        declarator: &mut Declarator,
        typ: &Type,
    ) -> Result<(), Diagnostic> {
        match &mut declarator.kind {
            DeclaratorKind::Simple { designated, .. } => {
                match designated {
                    Some(expected) => {
                        let expected = expected.clone();
                        self.check_assignable(typ, &expected, declarator.segment)?;
                        declarator.typ = expected;
                    }
                    None => declarator.typ = typ.clone(),
                }
                Ok(())
            }
            DeclaratorKind::Tuple(elements) => {
                let Type::Tuple(element_types) = typ else {
                    return Err(self.type_error(
                        format!("expected a tuple type but got '{typ}'"),
                        declarator.segment,
                    ));
                };
                if elements.len() != element_types.len() {
                    return Err(self
                        .type_error(
                            format!(
                                "expected {} elements but got {}",
                                element_types.len(),
                                elements.len()
                            ),
                            declarator.segment,
                        )
                        .with(ErrorMessage::plain_note(format!(
                            "initializer for this tuple is '{typ}'"
                        ))));
                }
                let mut inferred = Vec::with_capacity(elements.len());
                for (element, element_type) in elements.iter_mut().zip(element_types) {
                    self.infer_declarator(element, element_type)?;
                    inferred.push(element.typ.clone());
                }
                declarator.typ = Type::Tuple(inferred);
                Ok(())
            }
        }
    }

    fn declare_declarator(&mut self, declarator: &mut Declarator) {
        match &mut declarator.kind {
            DeclaratorKind::Simple { name, index, .. } => {
                if name != "_" {
                    let slot = self.contexts.last_mut().expect("context").local(
                        name,
                        declarator.typ.clone(),
                    );
                    *index = Some(slot);
                }
            }
            DeclaratorKind::Tuple(elements) => {
                for element in elements {
                    self.declare_declarator(element);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // node builders: type rules and constant folding
    // ------------------------------------------------------------------

    fn clause_expr(&mut self, lines: Vec<Expr>, segment: Segment) -> Result<Expr, Diagnostic> {
        for window in lines.windows(2) {
            if window[0].typ.is_never() {
                return Err(self
                    .type_error("this line is unreachable", window[1].segment)
                    .with(ErrorMessage::note(
                        "since the previous line never returns",
                        window[0].segment,
                    )));
            }
        }
        let typ = lines.last().map(|line| line.typ.clone()).unwrap_or(Type::NONE);
        let constant = if lines.is_empty() {
            Some(ConstValue::NONE)
        } else {
            lines
                .iter()
                .map(|line| line.constant)
                .collect::<Option<Vec<_>>>()
                .map(|values| *values.last().expect("nonempty"))
        };
        Ok(Expr {
            kind: ExprKind::Clause(lines),
            segment,
            typ,
            constant,
        })
    }

    fn prefix_expr(&mut self, token: Token, rhs: Expr) -> Result<Expr, Diagnostic> {
        let segment = token.segment().cover(rhs.segment);
        let typ = match token.kind {
            TokenKind::Add | TokenKind::Sub => {
                self.expect_pred(&rhs, Type::is_arithmetic, "arithmetic type")?;
                rhs.typ.clone()
            }
            TokenKind::Not => {
                self.expect_type(&rhs, &Type::BOOL)?;
                Type::BOOL
            }
            TokenKind::Inv => {
                self.expect_pred(&rhs, Type::is_integral, "integral type")?;
                rhs.typ.clone()
            }
            TokenKind::Sizeof => {
                if !matches!(
                    rhs.typ,
                    Type::Scalar(ScalarKind::String)
                        | Type::List(_)
                        | Type::Set(_)
                        | Type::Dict(..)
                        | Type::Tuple(_)
                ) {
                    return Err(self.expect_desc(&rhs, "sizeable type"));
                }
                Type::INT
            }
            TokenKind::AtAt => {
                self.never_allowed(&rhs.typ, "to hash", rhs.segment)?;
                Type::INT
            }
            TokenKind::And => match rhs.typ.element_of(false) {
                Some(element) => Type::iter(element),
                None => return Err(self.expect_desc(&rhs, "iterable type")),
            },
            TokenKind::Mul => match &rhs.typ {
                Type::Iter(element) => (**element).clone(),
                _ => return Err(self.expect_desc(&rhs, "iterator type")),
            },
            TokenKind::Shr => match &rhs.typ {
                Type::Iter(_) => Type::BOOL,
                _ => return Err(self.expect_desc(&rhs, "iterator type")),
            },
            _ => unreachable!("not a prefix operator"),
        };
        let constant = self.fold_prefix(token.kind, &rhs);
        Ok(Expr {
            kind: ExprKind::Prefix {
                op: token.kind,
                rhs: Box::new(rhs),
            },
            segment,
            typ,
            constant,
        })
    }

    fn fold_prefix(&self, op: TokenKind, rhs: &Expr) -> Option<ConstValue> {
        if op == TokenKind::Sizeof {
            if let Type::Tuple(elements) = &rhs.typ {
                return Some(ConstValue::from_int(elements.len() as i64));
            }
            return None;
        }
        let value = rhs.constant?;
        match op {
            TokenKind::Add => Some(value),
            TokenKind::Sub => Some(if rhs.typ.is_int() {
                ConstValue::from_int(value.as_int().wrapping_neg())
            } else {
                ConstValue::from_float(-value.as_float())
            }),
            TokenKind::Not => Some(ConstValue::from_bool(!value.as_bool())),
            TokenKind::Inv => Some(if rhs.typ.is_int() {
                ConstValue::from_int(!value.as_int())
            } else {
                ConstValue::from_byte(!value.as_byte())
            }),
            TokenKind::AtAt => match identity_kind(&rhs.typ) {
                IdentityKind::SelfBits => Some(value),
                _ => None,
            },
            _ => None,
        }
    }

    fn infix_expr(&mut self, token: Token, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        let segment = lhs.segment.cover(rhs.segment);
        let typ = match token.kind {
            TokenKind::Or | TokenKind::Xor | TokenKind::And => {
                self.expect_pred(&lhs, Type::is_integral, "integral type")?;
                self.match_operands(&lhs, &rhs)?;
                lhs.typ.clone()
            }
            TokenKind::Shl | TokenKind::Shr | TokenKind::Ushr => {
                self.expect_pred(&lhs, Type::is_integral, "integral type")?;
                self.expect_type(&rhs, &Type::INT)?;
                lhs.typ.clone()
            }
            TokenKind::Add if lhs.typ.is_string() || rhs.typ.is_string() => {
                self.never_allowed(&lhs.typ, "to stringify", lhs.segment)?;
                self.never_allowed(&rhs.typ, "to stringify", rhs.segment)?;
                Type::STRING
            }
            TokenKind::Add | TokenKind::Sub | TokenKind::Mul | TokenKind::Div
            | TokenKind::Rem => {
                self.match_operands(&lhs, &rhs)?;
                self.expect_pred(&lhs, Type::is_arithmetic, "arithmetic type")?;
                lhs.typ.clone()
            }
            _ => unreachable!("not an infix operator"),
        };
        let constant = self.fold_infix(token.kind, &lhs, &rhs, segment)?;
        Ok(Expr {
            kind: ExprKind::Infix {
                op: token.kind,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            segment,
            typ,
            constant,
        })
    }

    fn fold_infix(
        &self,
        op: TokenKind,
        lhs: &Expr,
        rhs: &Expr,
        segment: Segment,
    ) -> Result<Option<ConstValue>, Diagnostic> {
        if lhs.typ.is_string() || rhs.typ.is_string() {
            return Ok(None);
        }
        let (Some(value1), Some(value2)) = (lhs.constant, rhs.constant) else {
            return Ok(None);
        };
        let int = lhs.typ.is_int();
        let folded = match op {
            TokenKind::Or => ConstValue(value1.bits() | value2.bits()),
            TokenKind::Xor => ConstValue(value1.bits() ^ value2.bits()),
            TokenKind::And => ConstValue(value1.bits() & value2.bits()),
            TokenKind::Shl => {
                if int {
                    ConstValue::from_int(value1.as_int().wrapping_shl(value2.as_int() as u32))
                } else {
                    ConstValue::from_byte(
                        (value1.as_byte() as u64).wrapping_shl(value2.as_int() as u32) as u8,
                    )
                }
            }
            TokenKind::Shr => {
                if int {
                    ConstValue::from_int(value1.as_int().wrapping_shr(value2.as_int() as u32))
                } else {
                    ConstValue::from_byte(value1.as_byte().wrapping_shr(value2.as_int() as u32))
                }
            }
            TokenKind::Ushr => {
                if int {
                    ConstValue(value1.bits().wrapping_shr(value2.as_int() as u32))
                } else {
                    ConstValue::from_byte(value1.as_byte().wrapping_shr(value2.as_int() as u32))
                }
            }
            TokenKind::Add => {
                if int {
                    ConstValue::from_int(value1.as_int().wrapping_add(value2.as_int()))
                } else {
                    ConstValue::from_float(value1.as_float() + value2.as_float())
                }
            }
            TokenKind::Sub => {
                if int {
                    ConstValue::from_int(value1.as_int().wrapping_sub(value2.as_int()))
                } else {
                    ConstValue::from_float(value1.as_float() - value2.as_float())
                }
            }
            TokenKind::Mul => {
                if int {
                    ConstValue::from_int(value1.as_int().wrapping_mul(value2.as_int()))
                } else {
                    ConstValue::from_float(value1.as_float() * value2.as_float())
                }
            }
            TokenKind::Div => {
                if int {
                    let divisor = value2.as_int();
                    if divisor == 0 {
                        return Err(Diagnostic::error(
                            Category::ConstantEval,
                            "divided by zero",
                            segment,
                        ));
                    }
                    ConstValue::from_int(value1.as_int().wrapping_div(divisor))
                } else {
                    ConstValue::from_float(value1.as_float() / value2.as_float())
                }
            }
            TokenKind::Rem => {
                if int {
                    let divisor = value2.as_int();
                    if divisor == 0 {
                        return Err(Diagnostic::error(
                            Category::ConstantEval,
                            "divided by zero",
                            segment,
                        ));
                    }
                    ConstValue::from_int(value1.as_int().wrapping_rem(divisor))
                } else {
                    ConstValue::from_float(value1.as_float() % value2.as_float())
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(folded))
    }

    fn compare_expr(&mut self, token: Token, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        self.match_operands(&lhs, &rhs)?;
        let segment = lhs.segment.cover(rhs.segment);
        let equality = matches!(
            token.kind,
            TokenKind::Eq | TokenKind::Ne | TokenKind::Eqq | TokenKind::Neq
        );
        match &lhs.typ {
            Type::Scalar(kind) => match kind {
                ScalarKind::Any | ScalarKind::None => {
                    if !equality {
                        return Err(self.type_error(
                            "none and any only support equality operators",
                            segment,
                        ));
                    }
                }
                ScalarKind::Never => {
                    self.never_allowed(&lhs.typ, "in relational operations", lhs.segment)?;
                }
                _ => {}
            },
            _ => {
                if !equality {
                    return Err(
                        self.type_error("compound types only support equality operators", segment)
                    );
                }
            }
        }
        let constant = self.fold_compare(token.kind, &lhs, &rhs);
        Ok(Expr {
            kind: ExprKind::Compare {
                op: token.kind,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            segment,
            typ: Type::BOOL,
            constant,
        })
    }

    fn fold_compare(&self, op: TokenKind, lhs: &Expr, rhs: &Expr) -> Option<ConstValue> {
        if !lhs.typ.is_value_based() {
            return None;
        }
        if lhs.typ.is_none() {
            return Some(ConstValue::from_bool(matches!(
                op,
                TokenKind::Eq | TokenKind::Eqq
            )));
        }
        let value1 = lhs.constant?;
        let value2 = rhs.constant?;
        // identity comparison is raw-bit equality
        if matches!(op, TokenKind::Eqq | TokenKind::Neq) {
            let equal = value1.bits() == value2.bits();
            return Some(ConstValue::from_bool(
                (op == TokenKind::Eqq) == equal,
            ));
        }
        let ordering = if lhs.typ.is_int() {
            value1.as_int().partial_cmp(&value2.as_int())
        } else if lhs.typ.is_float() {
            value1.as_float().partial_cmp(&value2.as_float())
        } else {
            value1.bits().partial_cmp(&value2.bits())
        };
        let result = match op {
            TokenKind::Eq => ordering == Some(std::cmp::Ordering::Equal),
            TokenKind::Ne => ordering != Some(std::cmp::Ordering::Equal),
            TokenKind::Lt => ordering == Some(std::cmp::Ordering::Less),
            TokenKind::Gt => ordering == Some(std::cmp::Ordering::Greater),
            TokenKind::Le => matches!(
                ordering,
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            TokenKind::Ge => matches!(
                ordering,
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            _ => unreachable!("not a comparison"),
        };
        Some(ConstValue::from_bool(result))
    }

    fn logical_expr(&mut self, token: Token, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        self.expect_type(&lhs, &Type::BOOL)?;
        self.expect_type(&rhs, &Type::BOOL)?;
        let conjunction = token.kind == TokenKind::LAnd;
        let constant = match lhs.constant {
            Some(value1) if conjunction == value1.as_bool() => rhs.constant,
            Some(value1) => Some(value1),
            None => None,
        };
        Ok(Expr {
            segment: lhs.segment.cover(rhs.segment),
            kind: ExprKind::Logical {
                conjunction,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            typ: Type::BOOL,
            constant,
        })
    }

    fn in_expr(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        let Some(mut element) = rhs.typ.element_of(true) else {
            return Err(self.expect_desc(&rhs, "iterable type"));
        };
        if let Type::Dict(key, _) = &rhs.typ {
            element = (**key).clone();
        }
        self.expect_type(&lhs, &element)?;
        Ok(Expr {
            segment: lhs.segment.cover(rhs.segment),
            kind: ExprKind::In {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            typ: Type::BOOL,
            constant: None,
        })
    }

    /// Recursive assignability of an lvalue form.
    fn ensure_assignable(&self, expr: &Expr) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::Id(Lookup::Function(_)) => {
                Err(self.type_error("function is not assignable", expr.segment))
            }
            ExprKind::Id(_) => Ok(()),
            ExprKind::Access { lhs, .. } => {
                if matches!(lhs.typ, Type::Tuple(_)) {
                    return Err(self.type_error(
                        "tuple is immutable and its elements are not assignable",
                        expr.segment,
                    ));
                }
                Ok(())
            }
            ExprKind::TupleLit(elements) => {
                for element in elements {
                    if !element.is_assignable_form() {
                        return Err(self
                            .syntax("assignable expression is expected", element.segment));
                    }
                    self.ensure_assignable(element)?;
                }
                Ok(())
            }
            _ => Err(self.syntax("assignable expression is expected", expr.segment)),
        }
    }

    fn assign_expr(&mut self, token: Token, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        self.ensure_assignable(&lhs)?;
        let segment = lhs.segment.cover(rhs.segment);
        let type1 = lhs.typ.clone();
        // += / -= on collections insert or remove elements
        if matches!(token.kind, TokenKind::AssignAdd | TokenKind::AssignSub) {
            if let Some(element) = type1.element_of(true) {
                let element = if token.kind == TokenKind::AssignSub {
                    match &type1 {
                        Type::Dict(key, _) => (**key).clone(),
                        _ => element,
                    }
                } else {
                    element
                };
                self.expect_type(&rhs, &element)?;
                return Ok(Expr {
                    kind: ExprKind::Assign {
                        op: token.kind,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    segment,
                    typ: type1,
                    constant: None,
                });
            }
        }
        let typ = match token.kind {
            TokenKind::Assign => {
                self.check_assignable(&rhs.typ, &type1, segment)?;
                type1
            }
            TokenKind::AssignAnd | TokenKind::AssignXor | TokenKind::AssignOr => {
                self.expect_pred(&lhs, Type::is_integral, "integral type")?;
                self.expect_type(&rhs, &type1)?;
                type1
            }
            TokenKind::AssignShl | TokenKind::AssignShr | TokenKind::AssignUshr => {
                self.expect_pred(&lhs, Type::is_integral, "integral type")?;
                self.expect_type(&rhs, &Type::INT)?;
                type1
            }
            TokenKind::AssignAdd if type1.is_string() => Type::STRING,
            TokenKind::AssignAdd
            | TokenKind::AssignSub
            | TokenKind::AssignMul
            | TokenKind::AssignDiv
            | TokenKind::AssignRem => {
                self.expect_pred(&lhs, Type::is_arithmetic, "arithmetic type")?;
                self.expect_type(&rhs, &type1)?;
                type1
            }
            _ => unreachable!("not an assignment operator"),
        };
        Ok(Expr {
            kind: ExprKind::Assign {
                op: token.kind,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            segment,
            typ,
            constant: None,
        })
    }

    fn access_expr(&mut self, token2: Token, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        let segment = lhs.segment.cover(token2.segment());
        let typ = match &lhs.typ {
            Type::Tuple(elements) => {
                self.expect_type(&rhs, &Type::INT)?;
                let index = self.require_const(&rhs)?.as_int();
                if index < 0 || index as usize >= elements.len() {
                    return Err(self
                        .type_error("index out of bound", rhs.segment)
                        .with(ErrorMessage::plain_note(format!("it evaluates to {index}")))
                        .with(ErrorMessage::note(
                            format!("type of this tuple is '{}'", lhs.typ),
                            lhs.segment,
                        )));
                }
                elements[index as usize].clone()
            }
            Type::List(element) => {
                self.expect_type(&rhs, &Type::INT)?;
                (**element).clone()
            }
            Type::Dict(key, value) => {
                self.expect_type(&rhs, key)?;
                (**value).clone()
            }
            _ => return Err(self.expect_desc(&lhs, "indexable type")),
        };
        Ok(Expr {
            kind: ExprKind::Access {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            segment,
            typ,
            constant: None,
        })
    }

    fn invoke_expr(
        &mut self,
        token1: Token,
        token2: Token,
        callee: Expr,
        args: Vec<Expr>,
    ) -> Result<Expr, Diagnostic> {
        let Type::Func(parameters, ret) = &callee.typ else {
            return Err(self.expect_desc(&callee, "invocable type"));
        };
        if args.len() != parameters.len() {
            return Err(self
                .type_error(
                    format!(
                        "expected {} parameters but got {}",
                        parameters.len(),
                        args.len()
                    ),
                    token1.to(token2),
                )
                .with(ErrorMessage::note(
                    format!("type of this function is '{}'", callee.typ),
                    callee.segment,
                )));
        }
        for (arg, parameter) in args.iter().zip(parameters) {
            if !parameter.assignable_from(&arg.typ) {
                return Err(self
                    .type_error(
                        format!("'{}' is not assignable to '{parameter}'", arg.typ),
                        arg.segment,
                    )
                    .with(ErrorMessage::note(
                        format!("type of this function is '{}'", callee.typ),
                        callee.segment,
                    )));
            }
        }
        let typ = (**ret).clone();
        Ok(Expr {
            segment: callee.segment.cover(token2.segment()),
            kind: ExprKind::Invoke {
                callee: Box::new(callee),
                args,
            },
            typ,
            constant: None,
        })
    }

    fn dot_expr(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr, Diagnostic> {
        let Type::Func(parameters, ret) = &rhs.typ else {
            return Err(self.expect_desc(&rhs, "invocable type"));
        };
        let Some(first) = parameters.first() else {
            return Err(self.expect_desc(&rhs, "a function with at least one parameter"));
        };
        if !first.assignable_from(&lhs.typ) {
            return Err(self
                .type_error(
                    format!("'{}' is not assignable to '{first}'", lhs.typ),
                    lhs.segment,
                )
                .with(ErrorMessage::note(
                    format!("type of this function is '{}'", rhs.typ),
                    rhs.segment,
                )));
        }
        let typ = Type::func(parameters[1..].to_vec(), (**ret).clone());
        Ok(Expr {
            segment: lhs.segment.cover(rhs.segment),
            kind: ExprKind::Dot {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            typ,
            constant: None,
        })
    }

    fn as_expr(&mut self, token2: Token, lhs: Expr, target: Type) -> Result<Expr, Diagnostic> {
        let segment = lhs.segment.cover(token2.segment());
        let typ = &lhs.typ;
        let similar = |pred: fn(&Type) -> bool| pred(typ) && pred(&target);
        let permitted = target.assignable_from(typ)
            || target.is_any() && !typ.is_never()
            || typ.is_any() && !target.is_never()
            || similar(Type::is_arithmetic)
            || similar(Type::is_integral)
            || similar(Type::is_char_like);
        if !permitted {
            return Err(self.type_error(
                format!("cannot cast this expression from '{typ}' to '{target}'"),
                segment,
            ));
        }
        let constant = self.fold_as(&lhs, &target, segment)?;
        Ok(Expr {
            segment,
            typ: target,
            kind: ExprKind::As { lhs: Box::new(lhs) },
            constant,
        })
    }

    fn fold_as(
        &self,
        lhs: &Expr,
        target: &Type,
        segment: Segment,
    ) -> Result<Option<ConstValue>, Diagnostic> {
        if !target.is_value_based() {
            return Ok(None);
        }
        let Some(value) = lhs.constant else {
            return Ok(None);
        };
        if lhs.typ.is_int() {
            if target.is_byte() {
                return Ok(Some(ConstValue::from_byte(value.as_byte())));
            }
            if target.is_char() {
                if porkchop_util::unicode::is_invalid_char(value.as_int()) {
                    return Err(self
                        .type_error("invalid 'int' to cast to 'char'", segment)
                        .with(ErrorMessage::note(
                            format!("it evaluates to {}", value.as_int()),
                            lhs.segment,
                        )));
                }
                return Ok(Some(ConstValue(value.bits() & 0xFFFF_FFFF)));
            }
            if target.is_float() {
                return Ok(Some(ConstValue::from_float(value.as_int() as f64)));
            }
        } else if target.is_int() && lhs.typ.is_float() {
            return Ok(Some(ConstValue::from_int(value.as_float() as i64)));
        }
        Ok(Some(value))
    }

    fn is_expr(&mut self, token2: Token, lhs: Expr, target: Type) -> Result<Expr, Diagnostic> {
        self.never_allowed(&lhs.typ, "to check its type", lhs.segment)?;
        self.never_allowed(&target, "here for it has no instance at all", token2.segment())?;
        let constant = if lhs.typ.is_any() {
            None
        } else {
            Some(ConstValue::from_bool(lhs.typ == target))
        };
        Ok(Expr {
            segment: lhs.segment.cover(token2.segment()),
            kind: ExprKind::Is {
                lhs: Box::new(lhs),
                target,
            },
            typ: Type::BOOL,
            constant,
        })
    }

    fn default_expr(
        &mut self,
        token: Token,
        token2: Token,
        target: Type,
    ) -> Result<Expr, Diagnostic> {
        let segment = token.to(token2);
        let constructible = target.is_value_based()
            || target.is_string()
            || matches!(target, Type::List(_) | Type::Set(_) | Type::Dict(..));
        if !constructible {
            return Err(self.type_error(
                format!("cannot construct a default value of '{target}'"),
                segment,
            ));
        }
        let constant = target.is_value_based().then_some(ConstValue::NONE);
        Ok(Expr {
            kind: ExprKind::Default,
            segment,
            typ: target,
            constant,
        })
    }

    fn tuple_expr(
        &mut self,
        token1: Token,
        token2: Token,
        elements: Vec<Expr>,
    ) -> Result<Expr, Diagnostic> {
        let types = elements.iter().map(|e| e.typ.clone()).collect();
        Ok(Expr {
            kind: ExprKind::TupleLit(elements),
            segment: token1.to(token2),
            typ: Type::Tuple(types),
            constant: None,
        })
    }

    fn ensure_elements(
        &self,
        elements: &[Expr],
        segment: Segment,
        msg: &str,
    ) -> Result<Type, Diagnostic> {
        let first = &elements[0];
        self.never_allowed(&first.typ, msg, first.segment)?;
        if elements.iter().any(|e| e.typ != first.typ) {
            let mut diagnostic =
                self.type_error(format!("type must be identical {msg}"), segment);
            for element in elements {
                diagnostic = diagnostic.with(ErrorMessage::note(
                    format!("type of this is '{}'", element.typ),
                    element.segment,
                ));
            }
            return Err(diagnostic);
        }
        Ok(first.typ.clone())
    }

    fn list_expr(
        &mut self,
        token1: Token,
        token2: Token,
        elements: Vec<Expr>,
    ) -> Result<Expr, Diagnostic> {
        let segment = token1.to(token2);
        let element = self.ensure_elements(&elements, segment, "as elements of a list")?;
        Ok(Expr {
            kind: ExprKind::ListLit(elements),
            segment,
            typ: Type::list(element),
            constant: None,
        })
    }

    fn set_expr(
        &mut self,
        token1: Token,
        token2: Token,
        elements: Vec<Expr>,
    ) -> Result<Expr, Diagnostic> {
        let segment = token1.to(token2);
        let element = self.ensure_elements(&elements, segment, "as elements of a set")?;
        Ok(Expr {
            kind: ExprKind::SetLit(elements),
            segment,
            typ: Type::set(element),
            constant: None,
        })
    }

    fn dict_expr(
        &mut self,
        token1: Token,
        token2: Token,
        pairs: Vec<(Expr, Expr)>,
    ) -> Result<Expr, Diagnostic> {
        let segment = token1.to(token2);
        let keys: Vec<&Expr> = pairs.iter().map(|(key, _)| key).collect();
        let values: Vec<&Expr> = pairs.iter().map(|(_, value)| value).collect();
        let key = self.ensure_elements_ref(&keys, segment, "as keys of a dict")?;
        let value = self.ensure_elements_ref(&values, segment, "as values of a dict")?;
        Ok(Expr {
            kind: ExprKind::DictLit(pairs),
            segment,
            typ: Type::dict(key, value),
            constant: None,
        })
    }

    fn ensure_elements_ref(
        &self,
        elements: &[&Expr],
        segment: Segment,
        msg: &str,
    ) -> Result<Type, Diagnostic> {
        let first = elements[0];
        self.never_allowed(&first.typ, msg, first.segment)?;
        if elements.iter().any(|e| e.typ != first.typ) {
            let mut diagnostic =
                self.type_error(format!("type must be identical {msg}"), segment);
            for element in elements {
                diagnostic = diagnostic.with(ErrorMessage::note(
                    format!("type of this is '{}'", element.typ),
                    element.segment,
                ));
            }
            return Err(diagnostic);
        }
        Ok(first.typ.clone())
    }

    fn if_else_expr(
        &mut self,
        token: Token,
        cond: Expr,
        then: Expr,
        otherwise: Expr,
    ) -> Result<Expr, Diagnostic> {
        self.expect_type(&cond, &Type::BOOL)?;
        let Some(typ) = then.typ.either_of(&otherwise.typ) else {
            self.match_operands(&then, &otherwise)?;
            unreachable!("either_of failed on matched operands");
        };
        let constant = match cond.constant {
            Some(value) => {
                if value.as_bool() {
                    then.constant
                } else {
                    otherwise.constant
                }
            }
            None => None,
        };
        Ok(Expr {
            segment: token.segment().cover(otherwise.segment),
            kind: ExprKind::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            typ,
            constant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionReference;
    use porkchop_lex::tokenize;

    fn parse(text: &str) -> Result<Continuum, Diagnostic> {
        let source = Source::new(text);
        let tokens = tokenize(&source)?;
        parse_program(&source, &tokens)
    }

    fn main_def(continuum: &Continuum) -> &FunctionDefinition {
        match &continuum.functions[continuum.entry()] {
            FunctionReference::Main { definition } => definition.as_ref().unwrap(),
            _ => panic!("entry is not main"),
        }
    }

    #[test]
    fn test_arithmetic_folds() {
        let continuum = parse("2 + 3 * 4").unwrap();
        let body = &main_def(&continuum).body;
        assert_eq!(body.typ, Type::INT);
        let ExprKind::Clause(lines) = &body.kind else {
            panic!("body is a clause")
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_int(14)));
    }

    #[test]
    fn test_precedence() {
        // (2 + 3) * 4 vs 2 + 3 * 4 through folding
        let continuum = parse("(2 + 3) * 4").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_int(20)));
    }

    #[test]
    fn test_let_and_lookup() {
        let continuum = parse("let x = 1\nx + 1").unwrap();
        let def = main_def(&continuum);
        assert_eq!(def.locals, vec![Type::INT]);
    }

    #[test]
    fn test_type_mismatch() {
        let err = parse("1 + 1.5").unwrap_err();
        assert!(err.primary().contains("type mismatch"));
    }

    #[test]
    fn test_unresolved() {
        let err = parse("y + 1").unwrap_err();
        assert!(err.primary().contains("unable to resolve"));
    }

    #[test]
    fn test_string_concat_type() {
        let continuum = parse("\"a\" + 1").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].typ, Type::STRING);
    }

    #[test]
    fn test_fn_definition_and_recursion() {
        let continuum =
            parse("fn fact(n: int): int = if n <= 1 { 1 } else { n * fact(n - 1) }").unwrap();
        let index = continuum.entry() + 1;
        match &continuum.functions[index] {
            FunctionReference::Named { definition, .. } => {
                let def = definition.as_ref().unwrap();
                assert_eq!(def.prototype, Type::func(vec![Type::INT], Type::INT));
                assert_eq!(def.locals[0], Type::INT);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_recursion_without_return_type_rejected() {
        let err = parse("fn f(n: int) = f(n)").unwrap_err();
        assert!(err.primary().contains("recursive function"));
    }

    #[test]
    fn test_forward_declaration() {
        let program = "fn g(): int\nfn f(): int = g()\nfn g(): int = 1\nf()";
        parse(program).unwrap();
    }

    #[test]
    fn test_undefined_declaration() {
        let err = parse("{\nfn g(): int\n}").unwrap_err();
        assert!(err.primary().contains("never defined"));
    }

    #[test]
    fn test_missing_parameter_type() {
        let err = parse("fn f(x) = x").unwrap_err();
        assert!(err.primary().contains("missing type for 1st parameter"));
    }

    #[test]
    fn test_lambda_captures() {
        let continuum = parse("let a = 1\nlet f = $a(b: int): int = a + b\nf(2)").unwrap();
        let lambda = continuum
            .functions
            .iter()
            .find_map(|f| match f {
                FunctionReference::Lambda { definition } => Some(definition),
                _ => None,
            })
            .unwrap();
        // capture + parameter
        assert_eq!(
            lambda.prototype,
            Type::func(vec![Type::INT, Type::INT], Type::INT)
        );
    }

    #[test]
    fn test_implicit_capture_rejected() {
        let err = parse("let a = 1\nfn f(): int = a").unwrap_err();
        assert!(err.primary().contains("implicitly capture"));
    }

    #[test]
    fn test_while_never() {
        let continuum = parse("let f = $(): never = { while true { } }").unwrap();
        let lambda = continuum
            .functions
            .iter()
            .find_map(|f| match f {
                FunctionReference::Lambda { definition } => Some(definition),
                _ => None,
            })
            .unwrap();
        assert_eq!(lambda.prototype, Type::func(vec![], Type::NEVER));
    }

    #[test]
    fn test_while_with_break_is_none() {
        parse("while true { break }").unwrap();
        let err = parse("break").unwrap_err();
        assert!(err.primary().contains("wild break"));
    }

    #[test]
    fn test_tuple_index() {
        let continuum = parse("let t = (1, \"a\")\nt[0] + 1").unwrap();
        assert!(main_def(&continuum).locals[0] == Type::Tuple(vec![Type::INT, Type::STRING]));
        let err = parse("let t = (1, \"a\")\nt[2]").unwrap_err();
        assert!(err.primary().contains("index out of bound"));
    }

    #[test]
    fn test_tuple_immutable() {
        let err = parse("let t = (1, 2)\nt[0] = 5").unwrap_err();
        assert!(err.primary().contains("immutable"));
    }

    #[test]
    fn test_destructuring_let() {
        let continuum = parse("let (a, b) = (1, \"x\")\na").unwrap();
        assert_eq!(main_def(&continuum).locals, vec![Type::INT, Type::STRING]);
    }

    #[test]
    fn test_for_over_list() {
        parse("for x in [1, 2, 3] { print(i2s(x)) }").unwrap();
        let err = parse("for x in 1 { }").unwrap_err();
        assert!(err.primary().contains("iterable"));
    }

    #[test]
    fn test_dict_literal() {
        let continuum = parse("let d = @[1: \"a\", 2: \"b\"]\nd[2]").unwrap();
        assert_eq!(
            main_def(&continuum).locals[0],
            Type::dict(Type::INT, Type::STRING)
        );
    }

    #[test]
    fn test_set_literal() {
        let continuum = parse("let s = @[1, 2, 3]\n2 in s").unwrap();
        assert_eq!(main_def(&continuum).locals[0], Type::set(Type::INT));
    }

    #[test]
    fn test_mixed_dict_rejected() {
        let err = parse("let d = @[1: \"a\", 2]").unwrap_err();
        assert!(err.primary().contains("missing values"));
    }

    #[test]
    fn test_as_cast_rules() {
        parse("1 as float").unwrap();
        parse("1 as byte").unwrap();
        parse("1 as char").unwrap();
        parse("(1 as any) as int").unwrap();
        let err = parse("\"s\" as int").unwrap_err();
        assert!(err.primary().contains("cannot cast"));
    }

    #[test]
    fn test_as_char_out_of_range() {
        let err = parse("0x110000 as char").unwrap_err();
        assert!(err.primary().contains("invalid 'int' to cast to 'char'"));
    }

    #[test]
    fn test_is_folds_on_static_types() {
        let continuum = parse("1 is int").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_bool(true)));
    }

    #[test]
    fn test_generator() {
        let program = "let gen = $(): *int = { yield 1; yield 2; yield break }\ngen";
        let continuum = parse(program).unwrap();
        let lambda = continuum
            .functions
            .iter()
            .find_map(|f| match f {
                FunctionReference::Lambda { definition } => Some(definition),
                _ => None,
            })
            .unwrap();
        assert!(lambda.generator);
        assert_eq!(lambda.prototype, Type::func(vec![], Type::iter(Type::INT)));
    }

    #[test]
    fn test_generator_infers_iterator() {
        let continuum = parse("let g = $() = { yield 1 }\ng").unwrap();
        let lambda = continuum
            .functions
            .iter()
            .find_map(|f| match f {
                FunctionReference::Lambda { definition } => Some(definition),
                _ => None,
            })
            .unwrap();
        assert_eq!(lambda.prototype, Type::func(vec![], Type::iter(Type::INT)));
    }

    #[test]
    fn test_unreachable_line() {
        let err = parse("{\nreturn 1\n2\n}").unwrap_err();
        assert!(err.primary().contains("unreachable"));
    }

    #[test]
    fn test_underscore() {
        parse("let _ = println(\"hi\")\n_").unwrap();
        let err = parse("let _: int = 1").unwrap_err();
        assert!(err.primary().contains("the type of '_' must be none"));
    }

    #[test]
    fn test_dot_partial_application() {
        let continuum = parse("let f = $(a: int, b: int): int = a + b\nlet g = 1.f\ng(2)").unwrap();
        let def = main_def(&continuum);
        assert_eq!(def.locals[1], Type::func(vec![Type::INT], Type::INT));
    }

    #[test]
    fn test_line_literal() {
        let continuum = parse("__LINE__").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_int(1)));
    }

    #[test]
    fn test_merged_negative_literal() {
        let continuum = parse("-9223372036854775808").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_int(i64::MIN)));
    }

    #[test]
    fn test_compound_assignment() {
        parse("let x = 1\nx += 2\nx <<= 1").unwrap();
        let err = parse("1 += 2").unwrap_err();
        assert!(err.primary().contains("assignable expression"));
    }

    #[test]
    fn test_collection_compound_assignment() {
        parse("let xs = [1, 2]\nxs += 3\nxs -= 1").unwrap();
        parse("let d = @[1: \"a\"]\nd -= 1").unwrap();
    }

    #[test]
    fn test_increments() {
        parse("let x = 1\n++x\nx++\n--x\nx--").unwrap();
        let err = parse("let b = true\n++b").unwrap_err();
        assert!(err.primary().contains("expected 'int'"));
    }

    #[test]
    fn test_sizeof() {
        let continuum = parse("sizeof (1, 2, 3)").unwrap();
        let ExprKind::Clause(lines) = &main_def(&continuum).body.kind else {
            panic!()
        };
        assert_eq!(lines[0].constant, Some(ConstValue::from_int(3)));
        parse("sizeof \"abc\"").unwrap();
        parse("sizeof [1]").unwrap();
        assert!(parse("sizeof 1").is_err());
    }

    #[test]
    fn test_iterator_prefixes() {
        parse("let it = &[1, 2]\nwhile >>it { print(i2s(*it)) }").unwrap();
    }

    #[test]
    fn test_default() {
        parse("default(int)\ndefault([int])\ndefault(@[int])\ndefault(@[int: int])").unwrap();
        assert!(parse("default((int): int)").is_err());
    }

    #[test]
    fn test_division_by_zero_fold() {
        let err = parse("1 / 0").unwrap_err();
        assert!(err.primary().contains("divided by zero"));
    }

    #[test]
    fn test_identity_comparison() {
        parse("let xs = [1]\nlet ys = [1]\nxs === ys").unwrap();
        let err = parse("let xs = [1]\nxs < xs").unwrap_err();
        assert!(err.primary().contains("equality operators"));
    }
}
