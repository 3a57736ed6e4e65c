//! A small hand-rolled lexer and recursive-descent parser, just complete
//! enough to drive [corevm] from a text file on disk. `corevm` itself never
//! parses source text (spec: the resolver consumes an already-built AST), so
//! this lives here rather than in the core crate.
//!
//! Surface syntax:
//!
//! ```text
//! name :: expr;               // constant, inferred type
//! name := expr;                // variable, inferred type
//! name : Type;                 // variable, declared type, no initializer
//! name : Type = expr;          // variable, declared type + initializer
//! proc (a: int, b: int) -> int { ... }   // procedure literal
//! Name :: struct { a: int; b: *Name; }   // struct declaration
//! ```
//!
//! Static-array type syntax (`[N]T`) is not supported here; that code path
//! is exercised directly against the AST in the core crate's integration
//! tests instead.

use anyhow::{anyhow, bail, Result};
use corevm::ast::*;
use corevm::util::Span;

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Real(f64),
    True,
    False,
    If,
    Else,
    For,
    While,
    Do,
    Return,
    Break,
    Continue,
    Proc,
    Struct,
    Colon,
    ColonColon,
    ColonEqual,
    Semi,
    Comma,
    Equal,
    Arrow,
    Dot,
    Ellipsis,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Star,
    Amp,
    Plus,
    Minus,
    Slash,
    Percent,
    Bang,
    Tilde,
    Pipe,
    Caret,
    PipePipe,
    AmpAmp,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Shl,
    Shr,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    AmpEqual,
    PipeEqual,
    CaretEqual,
    ShlEqual,
    ShrEqual,
    Eof,
}

fn lex(source: &str) -> Result<Vec<(Tok, Span)>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1usize;
    let mut col = 1usize;

    macro_rules! advance_one {
        () => {{
            if chars[i].1 == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let (byte_off, c) = chars[i];
        if c.is_whitespace() {
            advance_one!();
            continue;
        }
        if c == '/' && chars.get(i + 1).map(|(_, c)| *c) == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                advance_one!();
            }
            continue;
        }

        let start_line = line;
        let start_col = col;

        let (tok, len_chars) = if c.is_ascii_digit() {
            let mut j = i;
            let mut is_real = false;
            while j < chars.len() && chars[j].1.is_ascii_digit() {
                j += 1;
            }
            if j < chars.len() && chars[j].1 == '.' && chars.get(j + 1).map(|(_, c)| c.is_ascii_digit()).unwrap_or(false) {
                is_real = true;
                j += 1;
                while j < chars.len() && chars[j].1.is_ascii_digit() {
                    j += 1;
                }
            }
            let text: String = chars[i..j].iter().map(|(_, c)| *c).collect();
            let tok = if is_real {
                Tok::Real(text.parse().map_err(|_| anyhow!("invalid number literal `{}`", text))?)
            } else {
                Tok::Int(text.parse().map_err(|_| anyhow!("invalid number literal `{}`", text))?)
            };
            (tok, j - i)
        } else if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                j += 1;
            }
            let text: String = chars[i..j].iter().map(|(_, c)| *c).collect();
            let tok = match text.as_str() {
                "true" => Tok::True,
                "false" => Tok::False,
                "if" => Tok::If,
                "else" => Tok::Else,
                "for" => Tok::For,
                "while" => Tok::While,
                "do" => Tok::Do,
                "return" => Tok::Return,
                "break" => Tok::Break,
                "continue" => Tok::Continue,
                "proc" => Tok::Proc,
                "struct" => Tok::Struct,
                _ => Tok::Ident(text),
            };
            (tok, j - i)
        } else {
            let c2 = chars.get(i + 2).map(|(_, c)| *c);
            match (c, chars.get(i + 1).map(|(_, c)| *c)) {
                (':', Some(':')) => (Tok::ColonColon, 2),
                (':', Some('=')) => (Tok::ColonEqual, 2),
                (':', _) => (Tok::Colon, 1),
                ('.', Some('.')) if chars.get(i + 2).map(|(_, c)| *c) == Some('.') => (Tok::Ellipsis, 3),
                ('.', _) => (Tok::Dot, 1),
                ('=', Some('=')) => (Tok::EqEq, 2),
                ('=', _) => (Tok::Equal, 1),
                ('!', Some('=')) => (Tok::NotEq, 2),
                ('!', _) => (Tok::Bang, 1),
                ('<', Some('<')) if c2 == Some('=') => (Tok::ShlEqual, 3),
                ('<', Some('=')) => (Tok::LtEq, 2),
                ('<', Some('<')) => (Tok::Shl, 2),
                ('<', _) => (Tok::Lt, 1),
                ('>', Some('>')) if c2 == Some('=') => (Tok::ShrEqual, 3),
                ('>', Some('=')) => (Tok::GtEq, 2),
                ('>', Some('>')) => (Tok::Shr, 2),
                ('>', _) => (Tok::Gt, 1),
                ('-', Some('>')) => (Tok::Arrow, 2),
                ('-', Some('=')) => (Tok::MinusEqual, 2),
                ('-', _) => (Tok::Minus, 1),
                ('&', Some('&')) => (Tok::AmpAmp, 2),
                ('&', Some('=')) => (Tok::AmpEqual, 2),
                ('&', _) => (Tok::Amp, 1),
                ('|', Some('|')) => (Tok::PipePipe, 2),
                ('|', Some('=')) => (Tok::PipeEqual, 2),
                ('|', _) => (Tok::Pipe, 1),
                ('+', Some('=')) => (Tok::PlusEqual, 2),
                ('+', _) => (Tok::Plus, 1),
                ('*', Some('=')) => (Tok::StarEqual, 2),
                ('*', _) => (Tok::Star, 1),
                ('/', Some('=')) => (Tok::SlashEqual, 2),
                ('/', _) => (Tok::Slash, 1),
                ('%', Some('=')) => (Tok::PercentEqual, 2),
                ('%', _) => (Tok::Percent, 1),
                ('^', Some('=')) => (Tok::CaretEqual, 2),
                ('^', _) => (Tok::Caret, 1),
                ('~', _) => (Tok::Tilde, 1),
                (';', _) => (Tok::Semi, 1),
                (',', _) => (Tok::Comma, 1),
                ('(', _) => (Tok::LParen, 1),
                (')', _) => (Tok::RParen, 1),
                ('{', _) => (Tok::LBrace, 1),
                ('}', _) => (Tok::RBrace, 1),
                ('[', _) => (Tok::LBracket, 1),
                (']', _) => (Tok::RBracket, 1),
                (other, _) => bail!("unexpected character `{}` at {}:{}", other, start_line, start_col),
            }
        };

        for _ in 0..len_chars {
            advance_one!();
        }
        let end_byte = chars.get(i).map(|(b, _)| *b).unwrap_or(source.len());
        out.push((
            tok,
            Span {
                offset: byte_off,
                length: end_byte - byte_off,
                start_line,
                start_col,
                end_line: line,
                end_col: col,
            },
        ));
    }
    out.push((Tok::Eof, Span { offset: source.len(), length: 0, start_line: line, start_col: col, end_line: line, end_col: col }));
    Ok(out)
}

struct Parser {
    tokens: Vec<(Tok, Span)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].0
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].0
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> (Tok, Span) {
        let item = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, want: &Tok) -> Result<Span> {
        if self.peek() == want {
            Ok(self.advance().1)
        } else {
            bail!("expected {:?}, found {:?} at {}:{}", want, self.peek(), self.span().start_line, self.span().start_col)
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span)> {
        match self.advance() {
            (Tok::Ident(name), span) => Ok((name, span)),
            (other, span) => bail!("expected identifier, found {:?} at {}:{}", other, span.start_line, span.start_col),
        }
    }

    fn merge(start: Span, end: Span) -> Span {
        Span {
            offset: start.offset,
            length: (end.offset + end.length).saturating_sub(start.offset),
            start_line: start.start_line,
            start_col: start.start_col,
            end_line: end.end_line,
            end_col: end.end_col,
        }
    }

    // ---- top level -----------------------------------------------------

    fn parse_program(&mut self) -> Result<Block> {
        let mut statements = Vec::new();
        while *self.peek() != Tok::Eof {
            statements.push(self.parse_stmt()?);
        }
        Ok(Block { statements })
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Tok::LBrace)?;
        let mut statements = Vec::new();
        while *self.peek() != Tok::RBrace {
            statements.push(self.parse_stmt()?);
        }
        self.expect(&Tok::RBrace)?;
        Ok(Block { statements })
    }

    // ---- statements -----------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        match self.peek().clone() {
            Tok::LBrace => {
                let block = self.parse_block()?;
                Ok(Node::new(Stmt::Block(block), start))
            }
            Tok::If => self.parse_if(),
            Tok::For => self.parse_for(),
            Tok::While => self.parse_while(),
            Tok::Do => self.parse_do(),
            Tok::Return => {
                self.advance();
                let value = if *self.peek() == Tok::Semi { None } else { Some(self.parse_expr()?) };
                let end = self.expect(&Tok::Semi)?;
                Ok(Node::new(Stmt::Return(value), Self::merge(start, end)))
            }
            Tok::Break => {
                self.advance();
                let end = self.expect(&Tok::Semi)?;
                Ok(Node::new(Stmt::Break, Self::merge(start, end)))
            }
            Tok::Continue => {
                self.advance();
                let end = self.expect(&Tok::Semi)?;
                Ok(Node::new(Stmt::Continue, Self::merge(start, end)))
            }
            Tok::Ident(_)
                if matches!(self.peek_at(1), Tok::ColonColon | Tok::ColonEqual | Tok::Colon) =>
            {
                self.parse_declaration()
            }
            _ => {
                let expr = self.parse_expr()?;
                let compound = match self.peek() {
                    Tok::PlusEqual => Some(CompoundOp::Add),
                    Tok::MinusEqual => Some(CompoundOp::Subtract),
                    Tok::StarEqual => Some(CompoundOp::Multiply),
                    Tok::SlashEqual => Some(CompoundOp::Divide),
                    Tok::PercentEqual => Some(CompoundOp::Modulo),
                    Tok::AmpEqual => Some(CompoundOp::BitAnd),
                    Tok::PipeEqual => Some(CompoundOp::BitOr),
                    Tok::CaretEqual => Some(CompoundOp::BitXor),
                    Tok::ShlEqual => Some(CompoundOp::ShiftLeft),
                    Tok::ShrEqual => Some(CompoundOp::ShiftRight),
                    _ => None,
                };
                if *self.peek() == Tok::Equal || compound.is_some() {
                    self.advance();
                    let rhs = self.parse_expr()?;
                    let end = self.expect(&Tok::Semi)?;
                    let span = Self::merge(start, end);
                    Ok(Node::new(Stmt::Assignment(expr, rhs, compound), span))
                } else {
                    let end = self.expect(&Tok::Semi)?;
                    let span = Self::merge(start, end);
                    Ok(Node::new(Stmt::Expression(expr), span))
                }
            }
        }
    }

    fn parse_declaration(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        let (name, _) = self.expect_ident()?;
        let (is_constant, declared_type) = match self.peek().clone() {
            Tok::ColonColon => {
                self.advance();
                (true, None)
            }
            Tok::ColonEqual => {
                self.advance();
                (false, None)
            }
            Tok::Colon => {
                self.advance();
                let ty = self.parse_type_expr()?;
                (false, Some(ty))
            }
            other => bail!("expected a declaration operator, found {:?}", other),
        };
        let initializer = if declared_type.is_some() {
            if *self.peek() == Tok::Equal {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            }
        } else if is_constant && *self.peek() == Tok::Struct {
            // `Name :: struct { ... };` — a struct type declared as the
            // value of a constant, the same way `Name :: proc(...) {...};`
            // declares a procedure.
            let ty = self.parse_type_expr()?;
            let span = ty.span;
            Some(Node::new(Expr::Type(ty), span))
        } else {
            Some(self.parse_expr()?)
        };
        let end = self.expect(&Tok::Semi)?;
        let span = Self::merge(start, end);
        Ok(Node::new(
            Stmt::Declaration(Declaration { name, is_constant, declared_type, initializer }),
            span,
        ))
    }

    fn parse_if(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        self.expect(&Tok::If)?;
        self.expect(&Tok::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Tok::RParen)?;
        let true_branch = Box::new(self.parse_stmt()?);
        let (false_branch, end) = if *self.peek() == Tok::Else {
            self.advance();
            let else_branch = self.parse_stmt()?;
            let span = else_branch.span;
            (Some(Box::new(else_branch)), span)
        } else {
            (None, true_branch.span)
        };
        let span = Self::merge(start, end);
        Ok(Node::new(Stmt::If { condition, true_branch, false_branch }, span))
    }

    fn parse_for(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        self.expect(&Tok::For)?;
        self.expect(&Tok::LParen)?;
        let init = if *self.peek() == Tok::Semi {
            self.advance();
            None
        } else {
            let stmt = if matches!(self.peek_at(1), Tok::ColonColon | Tok::ColonEqual | Tok::Colon) {
                self.parse_declaration()?
            } else {
                let expr_start = self.span();
                let expr = self.parse_expr()?;
                let end = self.expect(&Tok::Semi)?;
                Node::new(Stmt::Expression(expr), Self::merge(expr_start, end))
            };
            Some(Box::new(stmt))
        };
        let condition = if *self.peek() == Tok::Semi { None } else { Some(self.parse_expr()?) };
        self.expect(&Tok::Semi)?;
        let increment = if *self.peek() == Tok::RParen { None } else { Some(self.parse_expr()?) };
        self.expect(&Tok::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        let span = Self::merge(start, body.span);
        Ok(Node::new(Stmt::For { init, condition, increment, body }, span))
    }

    fn parse_while(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        self.expect(&Tok::While)?;
        self.expect(&Tok::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Tok::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        let span = Self::merge(start, body.span);
        Ok(Node::new(Stmt::While { condition, body }, span))
    }

    fn parse_do(&mut self) -> Result<Node<Stmt>> {
        let start = self.span();
        self.expect(&Tok::Do)?;
        let body = Box::new(self.parse_stmt()?);
        self.expect(&Tok::While)?;
        self.expect(&Tok::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Tok::RParen)?;
        let end = self.expect(&Tok::Semi)?;
        let span = Self::merge(start, end);
        Ok(Node::new(Stmt::Do { body, condition }, span))
    }

    // ---- type expressions ------------------------------------------------

    fn parse_type_expr(&mut self) -> Result<Node<TypeExpr>> {
        let start = self.span();
        match self.peek().clone() {
            Tok::Star => {
                self.advance();
                let inner = self.parse_type_expr()?;
                let span = Self::merge(start, inner.span);
                Ok(Node::new(TypeExpr::Pointer(Box::new(inner)), span))
            }
            Tok::LBracket if *self.peek_at(1) == Tok::RBracket => {
                self.advance();
                self.advance();
                let inner = self.parse_type_expr()?;
                let span = Self::merge(start, inner.span);
                Ok(Node::new(TypeExpr::ArrayView(Box::new(inner)), span))
            }
            Tok::Proc => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let mut argument_types = Vec::new();
                let mut variadic = false;
                while *self.peek() != Tok::RParen {
                    if *self.peek() == Tok::Ellipsis {
                        self.advance();
                        variadic = true;
                        break;
                    }
                    argument_types.push(self.parse_type_expr()?);
                    if *self.peek() == Tok::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let end = self.expect(&Tok::RParen)?;
                let (return_type, end) = if *self.peek() == Tok::Arrow {
                    self.advance();
                    let ret = self.parse_type_expr()?;
                    let span = ret.span;
                    (Some(Box::new(ret)), span)
                } else {
                    (None, end)
                };
                let span = Self::merge(start, end);
                Ok(Node::new(
                    TypeExpr::Procedure(ProcedurePrototype { argument_types, variadic, return_type }),
                    span,
                ))
            }
            Tok::Struct => {
                self.advance();
                self.expect(&Tok::LBrace)?;
                let mut fields = Vec::new();
                while *self.peek() != Tok::RBrace {
                    let (name, _) = self.expect_ident()?;
                    self.expect(&Tok::Colon)?;
                    let ty = self.parse_type_expr()?;
                    fields.push(StructFieldDecl { name, ty });
                    self.expect(&Tok::Semi)?;
                }
                let end = self.expect(&Tok::RBrace)?;
                let span = Self::merge(start, end);
                Ok(Node::new(TypeExpr::Struct(fields), span))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(Node::new(TypeExpr::Named(name), start))
            }
            other => bail!("expected a type, found {:?} at {}:{}", other, start.start_line, start.start_col),
        }
    }

    // ---- expressions: precedence climbing ---------------------------------

    fn parse_expr(&mut self) -> Result<Node<Expr>> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_logical_and()?;
        while *self.peek() == Tok::PipePipe {
            self.advance();
            let rhs = self.parse_logical_and()?;
            lhs = self.binary(BinaryToken::LogicalOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_bit_or()?;
        while *self.peek() == Tok::AmpAmp {
            self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = self.binary(BinaryToken::LogicalAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_bit_xor()?;
        while *self.peek() == Tok::Pipe {
            self.advance();
            let rhs = self.parse_bit_xor()?;
            lhs = self.binary(BinaryToken::BitOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_bit_and()?;
        while *self.peek() == Tok::Caret {
            self.advance();
            let rhs = self.parse_bit_and()?;
            lhs = self.binary(BinaryToken::BitXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_equality()?;
        while *self.peek() == Tok::Amp {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = self.binary(BinaryToken::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinaryToken::Equal,
                Tok::NotEq => BinaryToken::NotEqual,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinaryToken::Less,
                Tok::LtEq => BinaryToken::LessEqual,
                Tok::Gt => BinaryToken::Greater,
                Tok::GtEq => BinaryToken::GreaterEqual,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_shift()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Shl => BinaryToken::ShiftLeft,
                Tok::Shr => BinaryToken::ShiftRight,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryToken::Add,
                Tok::Minus => BinaryToken::Subtract,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Node<Expr>> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinaryToken::Multiply,
                Tok::Slash => BinaryToken::Divide,
                Tok::Percent => BinaryToken::Modulo,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn binary(&self, op: BinaryToken, lhs: Node<Expr>, rhs: Node<Expr>) -> Node<Expr> {
        let span = Self::merge(lhs.span, rhs.span);
        Node::new(Expr::Binary(op, Box::new(lhs), Box::new(rhs)), span)
    }

    fn parse_unary(&mut self) -> Result<Node<Expr>> {
        let start = self.span();
        let op = match self.peek() {
            Tok::Minus => Some(UnaryToken::Negate),
            Tok::Plus => Some(UnaryToken::Plus),
            Tok::Bang => Some(UnaryToken::Not),
            Tok::Tilde => Some(UnaryToken::BitNot),
            Tok::Amp => Some(UnaryToken::Address),
            Tok::Star => Some(UnaryToken::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = Self::merge(start, operand.span);
            return Ok(Node::new(Expr::Unary(op, Box::new(operand)), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node<Expr>> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Tok::Dot => {
                    self.advance();
                    let (name, name_span) = self.expect_ident()?;
                    let span = Self::merge(expr.span, name_span);
                    expr = Node::new(Expr::Member(Box::new(expr), name), span);
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(&Tok::RBracket)?;
                    let span = Self::merge(expr.span, end);
                    expr = Node::new(Expr::Subscript(Box::new(expr), Box::new(index)), span);
                }
                Tok::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while *self.peek() != Tok::RParen {
                        args.push(self.parse_expr()?);
                        if *self.peek() == Tok::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let end = self.expect(&Tok::RParen)?;
                    let span = Self::merge(expr.span, end);
                    expr = Node::new(Expr::Call(Box::new(expr), args), span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Node<Expr>> {
        let start = self.span();
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Node::new(Expr::Literal(LiteralValue::Integer(v)), start))
            }
            Tok::Real(v) => {
                self.advance();
                Ok(Node::new(Expr::Literal(LiteralValue::Real(v)), start))
            }
            Tok::True => {
                self.advance();
                Ok(Node::new(Expr::Literal(LiteralValue::Bool(true)), start))
            }
            Tok::False => {
                self.advance();
                Ok(Node::new(Expr::Literal(LiteralValue::Bool(false)), start))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(Node::new(Expr::Identifier(name), start))
            }
            Tok::LParen => {
                self.advance();
                // Disambiguate `(expr)` from a cast `(Type)expr`: a cast
                // target is always a bare type name, `*Type`, `[]Type`, or
                // `proc(...)`, never something followed by an operator.
                if matches!(self.peek(), Tok::Star | Tok::Proc)
                    || (matches!(self.peek(), Tok::Ident(_)) && *self.peek_at(1) == Tok::RParen)
                    || (*self.peek() == Tok::LBracket && *self.peek_at(1) == Tok::RBracket)
                {
                    let save = self.pos;
                    if let Ok(ty) = self.parse_type_expr() {
                        if *self.peek() == Tok::RParen {
                            self.advance();
                            let operand = self.parse_unary()?;
                            let span = Self::merge(start, operand.span);
                            return Ok(Node::new(Expr::Cast(ty, Box::new(operand)), span));
                        }
                    }
                    self.pos = save;
                }
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::Proc => self.parse_procedure_literal(),
            other => bail!("expected an expression, found {:?} at {}:{}", other, start.start_line, start.start_col),
        }
    }

    fn parse_procedure_literal(&mut self) -> Result<Node<Expr>> {
        let start = self.span();
        self.expect(&Tok::Proc)?;
        self.expect(&Tok::LParen)?;
        let mut args = Vec::new();
        let mut variadic = false;
        while *self.peek() != Tok::RParen {
            if *self.peek() == Tok::Ellipsis {
                self.advance();
                variadic = true;
                break;
            }
            let (name, _) = self.expect_ident()?;
            self.expect(&Tok::Colon)?;
            let ty = self.parse_type_expr()?;
            args.push(ProcedureArg { name, ty });
            if *self.peek() == Tok::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Tok::RParen)?;
        let return_type = if *self.peek() == Tok::Arrow {
            self.advance();
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let span = start;
        Ok(Node::new(Expr::Procedure(Procedure { args, variadic, return_type, body }), span))
    }
}

/// Parse a full program into the top-level block the resolver expects.
pub fn parse_program(source: &str) -> Result<Block> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}
