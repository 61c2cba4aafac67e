//! Recursive descent parser for the JavaScript subset.
//!
//! Operator precedence, lowest first:
//! assignment / arrow → `?:` → `??` → `||` → `&&` → equality → relational
//! → additive → multiplicative → `**` (right assoc) → unary → postfix → call/member.

use std::ops::Range;
use std::rc::Rc;

use crate::error::TransformError;
use crate::javascript::ast::*;
use crate::javascript::lexer::{tokenize, Token};
use crate::javascript::value::number_to_string;

/// Combined statement and expression nesting accepted before bailing out.
const MAX_NESTING: usize = 256;

/// Reserved words outside the supported subset.
const UNSUPPORTED: &[&str] = &[
    "async", "await", "case", "catch", "class", "debugger", "delete", "do", "enum", "export",
    "extends", "finally", "import", "in", "instanceof", "new", "super", "switch", "this", "try",
    "void", "with", "yield",
];

/// Parse a complete program.
pub fn parse(source: &str) -> Result<Program, TransformError> {
    Parser::new(source)?.parse_program()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl Infix {
    fn build(self, left: Expr, right: Expr) -> Expr {
        match self {
            Infix::Binary(op) => Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            Infix::Logical(op) => Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }
}

fn infix(token: &Token<'_>) -> Option<(u8, Infix)> {
    let entry = match token {
        Token::QuestionQuestion => (1, Infix::Logical(LogicalOp::Nullish)),
        Token::OrOr => (2, Infix::Logical(LogicalOp::Or)),
        Token::AndAnd => (3, Infix::Logical(LogicalOp::And)),
        Token::EqEq => (4, Infix::Binary(BinaryOp::Eq)),
        Token::NotEq => (4, Infix::Binary(BinaryOp::NotEq)),
        Token::EqEqEq => (4, Infix::Binary(BinaryOp::StrictEq)),
        Token::NotEqEq => (4, Infix::Binary(BinaryOp::StrictNotEq)),
        Token::Lt => (5, Infix::Binary(BinaryOp::Lt)),
        Token::Lte => (5, Infix::Binary(BinaryOp::Lte)),
        Token::Gt => (5, Infix::Binary(BinaryOp::Gt)),
        Token::Gte => (5, Infix::Binary(BinaryOp::Gte)),
        Token::Plus => (6, Infix::Binary(BinaryOp::Add)),
        Token::Minus => (6, Infix::Binary(BinaryOp::Sub)),
        Token::Star => (7, Infix::Binary(BinaryOp::Mul)),
        Token::Slash => (7, Infix::Binary(BinaryOp::Div)),
        Token::Percent => (7, Infix::Binary(BinaryOp::Rem)),
        Token::StarStar => (8, Infix::Binary(BinaryOp::Exp)),
        _ => return None,
    };
    Some(entry)
}

/// Identifier or keyword text, usable as a property name.
fn word<'src>(token: &Token<'src>) -> Option<&'src str> {
    let text = match token {
        Token::Ident(name) => *name,
        Token::Var => "var",
        Token::Let => "let",
        Token::Const => "const",
        Token::Function => "function",
        Token::Return => "return",
        Token::If => "if",
        Token::Else => "else",
        Token::While => "while",
        Token::For => "for",
        Token::Break => "break",
        Token::Continue => "continue",
        Token::Throw => "throw",
        Token::Typeof => "typeof",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        _ => return None,
    };
    Some(text)
}

/// Parser over a pre-tokenized source.
pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<(Token<'src>, Range<usize>)>,
    pos: usize,
    function_depth: usize,
    loop_depth: usize,
    nesting: usize,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Result<Self, TransformError> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
            function_depth: 0,
            loop_depth: 0,
            nesting: 0,
        })
    }

    pub fn parse_program(&mut self) -> Result<Program, TransformError> {
        let directives = self.parse_directives()?;
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { directives, body })
    }

    // ── token helpers ──────────────────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token<'src>> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token<'src>) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token<'src>) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Byte offset of the current token, or end of input.
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |(_, span)| span.start)
    }

    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1) {
            Some(i) => self.tokens[i].1.end,
            None => 0,
        }
    }

    /// Whether a line break separates the previous token from the current one.
    fn newline_before(&self) -> bool {
        self.pos > 0 && self.source[self.prev_end()..self.offset()].contains('\n')
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> TransformError {
        TransformError::syntax(self.source, offset, message)
    }

    fn unexpected(&self) -> TransformError {
        match self.peek() {
            Some(Token::Ident(name)) if UNSUPPORTED.contains(name) => {
                self.error_at(self.offset(), format!("Unsupported syntax '{name}'"))
            }
            _ => self.error_at(self.offset(), "Unexpected token"),
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, TransformError>,
    ) -> Result<T, TransformError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_at(self.offset(), "Too many nested expressions"));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn expect(&mut self, token: Token<'src>, text: &str) -> Result<(), TransformError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error_at(
                self.offset(),
                format!("Unexpected token, expected \"{text}\""),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, TransformError> {
        match self.peek() {
            Some(Token::Ident(name)) if !UNSUPPORTED.contains(name) => {
                let name = name.to_string();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Automatic semicolon insertion: `;`, `}`, end of input or a line break.
    fn consume_semicolon(&mut self) -> Result<(), TransformError> {
        if self.eat(&Token::Semicolon) {
            return Ok(());
        }
        match self.peek() {
            None | Some(Token::RBrace) => Ok(()),
            Some(_) if self.newline_before() => Ok(()),
            Some(_) => Err(self.error_at(self.prev_end(), "Missing semicolon")),
        }
    }

    // ── statements ─────────────────────────────────────────────────

    fn parse_directives(&mut self) -> Result<Vec<String>, TransformError> {
        let mut directives = Vec::new();
        while let Some((Token::String(raw), span)) = self.tokens.get(self.pos) {
            let terminated = match self.tokens.get(self.pos + 1) {
                None | Some((Token::Semicolon, _)) | Some((Token::RBrace, _)) => true,
                Some((_, next)) => self.source[span.end..next.start].contains('\n'),
            };
            if !terminated {
                break;
            }
            let value = unescape(self.source, raw, span.start)?;
            self.pos += 1;
            directives.push(value);
            self.consume_semicolon()?;
        }
        Ok(directives)
    }

    fn parse_statement(&mut self) -> Result<Stmt, TransformError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, TransformError> {
        match self.peek() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::Var | Token::Let | Token::Const) => {
                let decl = self.parse_var_decl()?;
                self.consume_semicolon()?;
                Ok(decl)
            }
            Some(Token::Function) => Ok(Stmt::Function(Rc::new(self.parse_function(true)?))),
            Some(Token::Return) => self.parse_return(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Break) => self.parse_jump(Stmt::Break, "Unsyntactic break"),
            Some(Token::Continue) => self.parse_jump(Stmt::Continue, "Unsyntactic continue"),
            Some(Token::Throw) => self.parse_throw(),
            Some(Token::Semicolon) => {
                self.pos += 1;
                Ok(Stmt::Empty)
            }
            None => Err(self.unexpected()),
            Some(_) => {
                let expr = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, TransformError> {
        self.expect(Token::LBrace, "{")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_at_end() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.pos += 1;
        Ok(body)
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, TransformError> {
        let kind = match self.advance() {
            Some(Token::Var) => VarKind::Var,
            Some(Token::Let) => VarKind::Let,
            _ => VarKind::Const,
        };

        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                if matches!(self.peek(), Some(Token::Ident("of" | "in"))) {
                    return Err(self.error_at(self.offset(), "Unsupported syntax 'for...of'"));
                }
                if kind == VarKind::Const {
                    return Err(self.error_at(
                        self.prev_end(),
                        "Missing initializer in const declaration",
                    ));
                }
                None
            };
            decls.push(Declarator { name, init });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(Stmt::VarDecl { kind, decls })
    }

    fn parse_return(&mut self) -> Result<Stmt, TransformError> {
        let start = self.offset();
        self.pos += 1;
        if self.function_depth == 0 {
            return Err(self.error_at(start, "'return' outside of function"));
        }
        let arg = match self.peek() {
            None | Some(Token::Semicolon) | Some(Token::RBrace) => None,
            Some(_) if self.newline_before() => None,
            Some(_) => Some(self.parse_expression()?),
        };
        self.consume_semicolon()?;
        Ok(Stmt::Return(arg))
    }

    fn parse_if(&mut self) -> Result<Stmt, TransformError> {
        self.pos += 1;
        self.expect(Token::LParen, "(")?;
        let test = self.parse_expression()?;
        self.expect(Token::RParen, ")")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, TransformError> {
        self.pos += 1;
        self.expect(Token::LParen, "(")?;
        let test = self.parse_expression()?;
        self.expect(Token::RParen, ")")?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::While { test, body })
    }

    fn parse_for(&mut self) -> Result<Stmt, TransformError> {
        self.pos += 1;
        self.expect(Token::LParen, "(")?;

        let init = match self.peek() {
            Some(Token::Semicolon) => None,
            Some(Token::Var | Token::Let | Token::Const) => Some(Box::new(self.parse_var_decl()?)),
            _ => Some(Box::new(Stmt::Expr(self.parse_expression()?))),
        };
        self.expect(Token::Semicolon, ";")?;

        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon, ";")?;

        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RParen, ")")?;

        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_loop_body(&mut self) -> Result<Stmt, TransformError> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    fn parse_jump(&mut self, stmt: Stmt, outside_loop: &str) -> Result<Stmt, TransformError> {
        let start = self.offset();
        self.pos += 1;
        if self.loop_depth == 0 {
            return Err(self.error_at(start, outside_loop));
        }
        self.consume_semicolon()?;
        Ok(stmt)
    }

    fn parse_throw(&mut self) -> Result<Stmt, TransformError> {
        self.pos += 1;
        if self.newline_before() {
            return Err(self.error_at(self.prev_end(), "Illegal newline after throw"));
        }
        let arg = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Throw(arg))
    }

    fn parse_function(&mut self, declaration: bool) -> Result<Function, TransformError> {
        self.expect(Token::Function, "function")?;
        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ if declaration => return Err(self.unexpected()),
            _ => None,
        };
        let params = self.parse_params()?;
        let body = self.parse_function_body()?;
        Ok(Function {
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<String>, TransformError> {
        self.expect(Token::LParen, "(")?;
        let mut params = Vec::new();
        while !self.eat(&Token::RParen) {
            params.push(self.expect_ident()?);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen, ")")?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_function_body(&mut self) -> Result<Vec<Stmt>, TransformError> {
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    // ── expressions ────────────────────────────────────────────────

    pub fn parse_expression(&mut self) -> Result<Expr, TransformError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, TransformError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, TransformError> {
        if self.is_arrow_start() {
            return self.parse_arrow();
        }

        let start = self.offset();
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Some(Token::Assign) => AssignOp::Assign,
            Some(Token::PlusAssign) => AssignOp::Add,
            Some(Token::MinusAssign) => AssignOp::Sub,
            Some(Token::StarAssign) => AssignOp::Mul,
            Some(Token::SlashAssign) => AssignOp::Div,
            Some(Token::PercentAssign) => AssignOp::Rem,
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(self.error_at(start, "Invalid left-hand side in assignment"));
        }
        self.pos += 1;
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// `x =>` or a parenthesised list whose closing paren is followed by `=>`.
    fn is_arrow_start(&self) -> bool {
        match self.peek() {
            Some(Token::Ident(_)) => matches!(self.peek_at(1), Some(Token::Arrow)),
            Some(Token::LParen) => {
                let mut depth = 0usize;
                for (i, (token, _)) in self.tokens.iter().enumerate().skip(self.pos) {
                    match token {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(
                                    self.tokens.get(i + 1),
                                    Some((Token::Arrow, _))
                                );
                            }
                        }
                        _ => {}
                    }
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr, TransformError> {
        let params = if self.check(&Token::LParen) {
            self.parse_params()?
        } else {
            vec![self.expect_ident()?]
        };
        self.expect(Token::Arrow, "=>")?;

        let body = if self.check(&Token::LBrace) {
            FunctionBody::Block(self.parse_function_body()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };

        Ok(Expr::Function(Rc::new(Function {
            name: None,
            params,
            body,
            is_arrow: true,
        })))
    }

    fn parse_conditional(&mut self) -> Result<Expr, TransformError> {
        let test = self.parse_binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(Token::Colon, ":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, TransformError> {
        let start = self.offset();
        // `-a ** b` is ambiguous; only `(-a) ** b` or `-(a ** b)` are accepted
        let mut bare_unary = matches!(
            self.peek(),
            Some(Token::Bang | Token::Minus | Token::Plus | Token::Typeof)
        );
        let mut left = self.parse_unary()?;
        while let Some((prec, op)) = self.peek().and_then(infix) {
            if prec < min_prec {
                break;
            }
            if bare_unary && op == Infix::Binary(BinaryOp::Exp) {
                return Err(self.error_at(
                    start,
                    "Illegal expression. Wrap left hand side or entire exponentiation in parentheses.",
                ));
            }
            bare_unary = false;
            self.pos += 1;
            let next_min = if op == Infix::Binary(BinaryOp::Exp) {
                prec
            } else {
                prec + 1
            };
            let right = self.parse_binary(next_min)?;
            left = op.build(left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, TransformError> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, TransformError> {
        let op = match self.peek() {
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let arg = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }

        let update = match self.peek() {
            Some(Token::PlusPlus) => Some(UpdateOp::Increment),
            Some(Token::MinusMinus) => Some(UpdateOp::Decrement),
            _ => None,
        };
        if let Some(op) = update {
            let start = self.offset();
            self.pos += 1;
            let target = self.parse_unary()?;
            if !target.is_assignable() {
                return Err(self.error_at(start, "Invalid left-hand side in prefix operation"));
            }
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, TransformError> {
        let start = self.offset();
        let expr = self.parse_call_member()?;
        let op = match self.peek() {
            Some(Token::PlusPlus) => UpdateOp::Increment,
            Some(Token::MinusMinus) => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        if self.newline_before() {
            return Ok(expr);
        }
        if !expr.is_assignable() {
            return Err(self.error_at(start, "Invalid left-hand side in postfix operation"));
        }
        self.pos += 1;
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_call_member(&mut self) -> Result<Expr, TransformError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let Some(name) = self.peek().and_then(word) else {
                        return Err(self.unexpected());
                    };
                    let name = name.to_string();
                    self.pos += 1;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Named(name),
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let property = self.parse_expression()?;
                    self.expect(Token::RBracket, "]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(property)),
                    };
                }
                Some(Token::LParen) => {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, TransformError> {
        self.expect(Token::LParen, "(")?;
        let mut args = Vec::new();
        while !self.eat(&Token::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen, ")")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, TransformError> {
        let start = self.offset();
        let expr = match self.peek() {
            Some(Token::Number(n)) => Expr::Number(*n),
            Some(Token::String(raw)) => Expr::String(unescape(self.source, raw, start)?),
            Some(Token::True) => Expr::Bool(true),
            Some(Token::False) => Expr::Bool(false),
            Some(Token::Null) => Expr::Null,
            Some(Token::Ident(_)) => Expr::Ident(self.expect_ident()?),
            Some(Token::Function) => return Ok(Expr::Function(Rc::new(self.parse_function(false)?))),
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expression()?;
                self.expect(Token::RParen, ")")?;
                return Ok(inner);
            }
            Some(Token::LBracket) => return self.parse_array(),
            Some(Token::LBrace) => return self.parse_object(),
            _ => return Err(self.unexpected()),
        };
        if !matches!(expr, Expr::Ident(_)) {
            self.pos += 1;
        }
        Ok(expr)
    }

    fn parse_array(&mut self) -> Result<Expr, TransformError> {
        self.expect(Token::LBracket, "[")?;
        let mut elements = Vec::new();
        while !self.eat(&Token::RBracket) {
            elements.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBracket, "]")?;
                break;
            }
        }
        Ok(Expr::Array(elements))
    }

    fn parse_object(&mut self) -> Result<Expr, TransformError> {
        self.expect(Token::LBrace, "{")?;
        let mut entries = Vec::new();
        while !self.eat(&Token::RBrace) {
            let start = self.offset();
            let (key, shorthand) = match self.peek() {
                Some(Token::String(raw)) => (unescape(self.source, raw, start)?, false),
                Some(Token::Number(n)) => (number_to_string(*n), false),
                Some(token) => match word(token) {
                    Some(name) => (name.to_string(), matches!(token, Token::Ident(_))),
                    None => return Err(self.unexpected()),
                },
                None => return Err(self.unexpected()),
            };
            self.pos += 1;

            let value = if self.eat(&Token::Colon) {
                self.parse_assignment()?
            } else if shorthand {
                Expr::Ident(key.clone())
            } else {
                return Err(self.error_at(self.offset(), "Unexpected token, expected \":\""));
            };
            entries.push((key, value));

            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace, "}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

/// Decode a quoted string literal, including its escape sequences.
fn unescape(source: &str, raw: &str, offset: usize) -> Result<String, TransformError> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    let bad_escape = || TransformError::syntax(source, offset, "Bad character escape sequence");

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            return Err(bad_escape());
        };
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 {
                    return Err(bad_escape());
                }
                let code = u32::from_str_radix(&hex, 16).map_err(|_| bad_escape())?;
                out.push(char::from_u32(code).ok_or_else(bad_escape)?);
            }
            'u' => {
                let rest = chars.as_str();
                let (hex, consumed) = if let Some(braced) = rest.strip_prefix('{') {
                    let end = braced.find('}').ok_or_else(bad_escape)?;
                    (&braced[..end], end + 2)
                } else {
                    (rest.get(..4).ok_or_else(bad_escape)?, 4)
                };
                let code = u32::from_str_radix(hex, 16).map_err(|_| bad_escape())?;
                out.push(char::from_u32(code).ok_or_else(bad_escape)?);
                chars = rest[consumed..].chars();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        let program = parse(source).unwrap();
        match program.body.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    fn error(source: &str) -> String {
        parse(source).unwrap_err().to_string()
    }

    #[test]
    fn test_precedence() {
        let e = expr("1 + 2 * 3");
        match e {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let e = expr("2 ** 3 ** 2");
        match e {
            Expr::Binary {
                op: BinaryOp::Exp,
                left,
                right,
            } => {
                assert_eq!(*left, Expr::Number(2.0));
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Exp, .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_directive_prologue() {
        let program = parse("'use strict';\n1").unwrap();
        assert_eq!(program.directives, vec!["use strict".to_string()]);
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_string_expression_is_not_directive() {
        let program = parse("'a' + 'b'").unwrap();
        assert!(program.directives.is_empty());
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_arrow_functions() {
        assert!(matches!(expr("x => x * 2"), Expr::Function(f) if f.is_arrow && f.params == ["x"]));
        assert!(matches!(expr("(a, b) => { return a; }"), Expr::Function(f) if f.params.len() == 2));
        assert!(matches!(expr("() => 1"), Expr::Function(f) if f.params.is_empty()));
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        assert!(matches!(expr("(1 + 2) * 3"), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_asi_on_newline() {
        let program = parse("let a = 1\nlet b = 2\na + b").unwrap();
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_missing_semicolon() {
        assert_eq!(error("let a = 1 let b = 2"), "Missing semicolon (1:9)");
    }

    #[test]
    fn test_unary_operand_of_exponent_needs_parentheses() {
        let message =
            "Illegal expression. Wrap left hand side or entire exponentiation in parentheses.";
        assert_eq!(error("-2 ** 2"), format!("{message} (1:0)"));
        assert_eq!(error("x = typeof a ** 2"), format!("{message} (1:4)"));
        assert_eq!(error("1 + !b ** 2"), format!("{message} (1:4)"));

        assert!(matches!(
            expr("(-2) ** 2"),
            Expr::Binary { op: BinaryOp::Exp, .. }
        ));
        assert!(matches!(expr("-(2 ** 2)"), Expr::Unary { op: UnaryOp::Neg, .. }));
        assert!(matches!(expr("2 ** -2"), Expr::Binary { op: BinaryOp::Exp, .. }));
        assert!(matches!(expr("-2 * 2"), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_incomplete_binary() {
        assert_eq!(error("1 +"), "Unexpected token (1:3)");
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert_eq!(error("1 = 2"), "Invalid left-hand side in assignment (1:0)");
    }

    #[test]
    fn test_return_outside_function() {
        assert_eq!(error("return 1"), "'return' outside of function (1:0)");
    }

    #[test]
    fn test_break_outside_loop() {
        assert_eq!(error("break;"), "Unsyntactic break (1:0)");
    }

    #[test]
    fn test_break_inside_function_inside_loop() {
        assert_eq!(
            error("while (true) { function f() { break; } }"),
            "Unsyntactic break (1:30)"
        );
    }

    #[test]
    fn test_const_requires_initializer() {
        assert!(error("const x;").starts_with("Missing initializer in const declaration"));
    }

    #[test]
    fn test_unsupported_keyword() {
        assert_eq!(error("new Foo()"), "Unsupported syntax 'new' (1:0)");
        assert_eq!(error("class A {}"), "Unsupported syntax 'class' (1:0)");
    }

    #[test]
    fn test_object_and_array_literals() {
        match expr("({ a: 1, 'b': [1, 2,], c })") {
            Expr::Object(entries) => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b", "c"]);
                assert!(matches!(&entries[1].1, Expr::Array(items) if items.len() == 2));
                assert_eq!(entries[2].1, Expr::Ident("c".into()));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_member_and_call_chain() {
        match expr("a.b[0](1, 2)") {
            Expr::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(*callee, Expr::Member { property: MemberProp::Computed(_), .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_for_loop() {
        let program = parse("for (let i = 0; i < 3; i++) { continue; }").unwrap();
        assert!(matches!(&program.body[0], Stmt::For { init: Some(_), test: Some(_), update: Some(_), .. }));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(expr(r#""a\n\t\x41B\u{43}""#), Expr::String("a\n\tABC".into()));
    }

    #[test]
    fn test_bad_escape() {
        assert!(error(r#""\x4""#).starts_with("Bad character escape sequence"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(error(&source).starts_with("Too many nested expressions"));
    }

    #[test]
    fn test_postfix_requires_target() {
        assert_eq!(error("1++"), "Invalid left-hand side in postfix operation (1:0)");
    }
}
