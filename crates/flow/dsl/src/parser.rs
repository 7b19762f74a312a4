//! Parser: recursive descent parser for configuration text
//!
//! Consumes tokens from the lexer and produces the configuration tree
//! ([`Body`] of attributes and blocks) that the graph builder consumes.
//! Statements need no separators: an identifier followed by `=` starts an
//! attribute, anything else starts a block header.

use flow_types::{Attribute, BinaryOp, Block, Body, Expr, Number, Span, UnaryOp, Value, ValueMap};

use crate::errors::{DslError, DslResult};
use crate::lexer::{Lexer, Token, TokenKind};

/// Deepest nesting of blocks and expressions accepted
pub const MAX_NESTING: usize = 64;

/// Parser for configuration text
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Parse configuration text into a Body
    pub fn parse(input: &str) -> DslResult<Body> {
        let mut parser = Self::from_input(input)?;
        let body = parser.parse_body()?;
        parser.expect(TokenKind::Eof)?;
        Ok(body)
    }

    /// Parse a standalone expression
    pub fn parse_expression(input: &str) -> DslResult<Expr> {
        let mut parser = Self::from_input(input)?;
        let expr = parser.parse_expr()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn from_input(input: &str) -> DslResult<Self> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    // ── Statements ───────────────────────────────────────────────────

    fn parse_body(&mut self) -> DslResult<Body> {
        let mut body = Body::new();

        while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            let first = self.expect(TokenKind::Identifier)?.clone();
            let span = Span::new(first.line, first.col);

            if self.check(TokenKind::Assign) {
                self.advance();
                if body.attributes.iter().any(|a| a.name == first.text) {
                    return Err(DslError::ParseError {
                        line: first.line,
                        col: first.col,
                        message: format!("Attribute '{}' is set more than once", first.text),
                    });
                }
                let value = self.parse_expr()?;
                body.attributes.push(Attribute {
                    name: first.text,
                    value,
                    span,
                });
            } else {
                let block = self.parse_block(first.text, span)?;
                body.blocks.push(block);
            }
        }

        Ok(body)
    }

    fn parse_block(&mut self, first: String, span: Span) -> DslResult<Block> {
        // name.parts "label" { body }
        let mut name = vec![first];
        while self.check(TokenKind::Dot) {
            self.advance();
            name.push(self.expect_identifier()?);
        }

        let label = if self.check(TokenKind::StringLiteral) {
            Some(self.advance().text.clone())
        } else {
            None
        };

        self.expect(TokenKind::OpenBrace)?;
        let body = self.nested(Self::parse_body)?;
        self.expect(TokenKind::CloseBrace)?;

        Ok(Block {
            name,
            label,
            body,
            span,
        })
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn parse_expr(&mut self) -> DslResult<Expr> {
        self.nested(|p| p.parse_binary(0))
    }

    /// Precedence climbing over the binary operator table
    fn parse_binary(&mut self, level: usize) -> DslResult<Expr> {
        const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
            &[(TokenKind::OrOr, BinaryOp::Or)],
            &[(TokenKind::AndAnd, BinaryOp::And)],
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::NotEq)],
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::LtEq, BinaryOp::LtEq),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::GtEq, BinaryOp::GtEq),
            ],
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        ];

        if level >= LEVELS.len() {
            return self.parse_unary();
        }

        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let kind = self.peek_kind();
            let Some(&(_, op)) = LEVELS[level].iter().find(|(k, _)| *k == kind) else {
                break;
            };
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> DslResult<Expr> {
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = self.nested(Self::parse_unary)?;
                Ok(match operand {
                    Expr::Literal(Value::Number(Number::Int(i))) if i != i64::MIN => {
                        Expr::Literal(Value::Number(Number::Int(-i)))
                    }
                    Expr::Literal(Value::Number(Number::Float(f))) => {
                        Expr::Literal(Value::Number(Number::Float(-f)))
                    }
                    other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
                })
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.nested(Self::parse_unary)?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> DslResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_identifier()?;
                    expr = match expr {
                        Expr::Reference(mut path) => {
                            path.push(field);
                            Expr::Reference(path)
                        }
                        other => Expr::Access(Box::new(other), field),
                    };
                }
                TokenKind::OpenBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::CloseBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> DslResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::NumberLiteral => {
                self.advance();
                self.number_literal(&tok).map(Expr::Literal)
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::Literal(Value::String(tok.text)))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(match tok.text.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Reference(vec![tok.text]),
                })
            }
            TokenKind::OpenBracket => self.parse_array(),
            TokenKind::OpenBrace => self.parse_object(),
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Eof => Err(DslError::UnexpectedEof("expression".into())),
            _ => Err(DslError::UnexpectedToken {
                expected: "expression".into(),
                found: tok.text,
                line: tok.line,
                col: tok.col,
            }),
        }
    }

    fn parse_array(&mut self) -> DslResult<Expr> {
        self.expect(TokenKind::OpenBracket)?;
        let mut items = Vec::new();
        while !self.check(TokenKind::CloseBracket) {
            items.push(self.parse_expr()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::CloseBracket)?;

        if items.iter().all(|e| matches!(e, Expr::Literal(_))) {
            let values = items
                .into_iter()
                .filter_map(|e| match e {
                    Expr::Literal(v) => Some(v),
                    _ => None,
                })
                .collect();
            return Ok(Expr::Literal(Value::Array(values)));
        }
        Ok(Expr::Array(items))
    }

    fn parse_object(&mut self) -> DslResult<Expr> {
        self.expect(TokenKind::OpenBrace)?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        while !self.check(TokenKind::CloseBrace) {
            let key_tok = self.peek().clone();
            let key = match key_tok.kind {
                TokenKind::Identifier | TokenKind::StringLiteral => {
                    self.advance();
                    key_tok.text
                }
                TokenKind::Eof => return Err(DslError::UnexpectedEof("object key".into())),
                _ => {
                    return Err(DslError::UnexpectedToken {
                        expected: "object key".into(),
                        found: key_tok.text,
                        line: key_tok.line,
                        col: key_tok.col,
                    })
                }
            };
            if self.check(TokenKind::Colon) {
                self.advance();
            } else {
                self.expect(TokenKind::Assign)?;
            }
            let value = self.parse_expr()?;
            fields.retain(|(k, _)| *k != key);
            fields.push((key, value));
            if self.check(TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::CloseBrace)?;

        if fields.iter().all(|(_, e)| matches!(e, Expr::Literal(_))) {
            let map: ValueMap = fields
                .into_iter()
                .filter_map(|(k, e)| match e {
                    Expr::Literal(v) => Some((k, v)),
                    _ => None,
                })
                .collect();
            return Ok(Expr::Literal(Value::Object(map)));
        }
        Ok(Expr::Object(fields))
    }

    fn number_literal(&self, tok: &Token) -> DslResult<Value> {
        let invalid = || DslError::InvalidValue {
            line: tok.line,
            col: tok.col,
            message: format!("'{}' is not a valid number", tok.text),
        };
        if tok.text.contains('.') {
            tok.text
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| invalid())
        } else {
            tok.text
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid())
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> DslResult<T>) -> DslResult<T> {
        if self.depth >= MAX_NESTING {
            let tok = self.peek();
            return Err(DslError::ParseError {
                line: tok.line,
                col: tok.col,
                message: format!("Nesting deeper than {} levels", MAX_NESTING),
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ── Token helpers ────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn expect(&mut self, kind: TokenKind) -> DslResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(DslError::UnexpectedEof(format!("{}", kind)))
        } else {
            let tok = self.peek();
            Err(DslError::UnexpectedToken {
                expected: format!("{}", kind),
                found: tok.text.clone(),
                line: tok.line,
                col: tok.col,
            })
        }
    }

    fn expect_identifier(&mut self) -> DslResult<String> {
        let tok = self.expect(TokenKind::Identifier)?;
        Ok(tok.text.clone())
    }
}
