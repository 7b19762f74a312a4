//! Lexer: tokenizes configuration text
//!
//! Produces a stream of tokens that the parser consumes.
//! Handles identifiers, quoted and raw string literals, numbers,
//! operators and structural tokens ({, }, [, ], =, etc.).

use crate::errors::{DslError, DslResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token (unescaped contents for strings)
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Structural
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Comma,
    Dot,
    Assign,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::OpenBracket => write!(f, "["),
            Self::CloseBracket => write!(f, "]"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::Assign => write!(f, "="),
            Self::Colon => write!(f, ":"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::AndAnd => write!(f, "&&"),
            Self::OrOr => write!(f, "||"),
            Self::Bang => write!(f, "!"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for configuration text
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> DslResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> DslResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        let two = |lexer: &mut Self, kind: TokenKind, text: &str| -> DslResult<Token> {
            lexer.advance();
            lexer.advance();
            Ok(Token::new(kind, text, line, col))
        };

        match ch {
            '=' if self.peek_at(1) == Some('=') => two(self, TokenKind::EqEq, "=="),
            '!' if self.peek_at(1) == Some('=') => two(self, TokenKind::NotEq, "!="),
            '<' if self.peek_at(1) == Some('=') => two(self, TokenKind::LtEq, "<="),
            '>' if self.peek_at(1) == Some('=') => two(self, TokenKind::GtEq, ">="),
            '&' if self.peek_at(1) == Some('&') => two(self, TokenKind::AndAnd, "&&"),
            '|' if self.peek_at(1) == Some('|') => two(self, TokenKind::OrOr, "||"),
            '"' => self.read_string_literal(),
            '`' => self.read_raw_string(),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(),
            _ => {
                let kind = match ch {
                    '{' => TokenKind::OpenBrace,
                    '}' => TokenKind::CloseBrace,
                    '[' => TokenKind::OpenBracket,
                    ']' => TokenKind::CloseBracket,
                    '(' => TokenKind::OpenParen,
                    ')' => TokenKind::CloseParen,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    '=' => TokenKind::Assign,
                    ':' => TokenKind::Colon,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '<' => TokenKind::Lt,
                    '>' => TokenKind::Gt,
                    '!' => TokenKind::Bang,
                    _ => {
                        return Err(DslError::ParseError {
                            line,
                            col,
                            message: format!("Unexpected character: '{}'", ch),
                        })
                    }
                };
                self.advance();
                Ok(Token::new(kind, ch.to_string(), line, col))
            }
        }
    }

    fn read_string_literal(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != '"' {
            let ch = self.input[self.pos];
            if ch == '\\' {
                let escaped = match self.peek_at(1) {
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    other => {
                        return Err(DslError::ParseError {
                            line: self.line,
                            col: self.col,
                            message: format!("Invalid escape sequence: '\\{}'", other.unwrap_or(' ')),
                        })
                    }
                };
                self.advance();
                text.push(escaped);
            } else if ch == '\n' {
                break;
            } else {
                text.push(ch);
            }
            self.advance();
        }

        if self.pos >= self.input.len() || self.input[self.pos] != '"' {
            return Err(DslError::ParseError {
                line,
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.advance(); // skip closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    /// Backtick strings span lines and have no escapes
    fn read_raw_string(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance();

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != '`' {
            text.push(self.input[self.pos]);
            self.advance();
        }

        if self.pos >= self.input.len() {
            return Err(DslError::ParseError {
                line,
                col,
                message: "Unterminated raw string literal".into(),
            });
        }

        self.advance();
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            text.push(self.input[self.pos]);
            self.advance();
        }

        if self.peek_at(0) == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.advance();
        }

        Ok(Token::new(TokenKind::Identifier, text, line, col))
    }

    fn skip_whitespace_and_comments(&mut self) -> DslResult<()> {
        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' || (ch == '/' && self.peek_at(1) == Some('/')) {
                // Line comment
                while self.pos < self.input.len() && self.input[self.pos] != '\n' {
                    self.advance();
                }
            } else if ch == '/' && self.peek_at(1) == Some('*') {
                let (line, col) = (self.line, self.col);
                self.advance();
                self.advance();
                loop {
                    if self.pos >= self.input.len() {
                        return Err(DslError::ParseError {
                            line,
                            col,
                            message: "Unterminated block comment".into(),
                        });
                    }
                    if self.input[self.pos] == '*' && self.peek_at(1) == Some('/') {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_block_header_tokens() {
        let mut lexer = Lexer::new("testcomponents.count \"inc\" { }");
        let tokens = lexer.tokenize().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "testcomponents");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].text, "count");
        assert_eq!(tokens[3].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[3].text, "inc");
        assert_eq!(tokens[4].kind, TokenKind::OpenBrace);
        assert_eq!(tokens[5].kind, TokenKind::CloseBrace);
        assert_eq!(tokens[6].kind, TokenKind::Eof);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== != <= >= && || < > ! = + - * / %"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Bang,
                TokenKind::Assign,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_literal() {
        let tokens = Lexer::new("10 2.5 3.x").tokenize().unwrap();
        assert_eq!(tokens[0].text, "10");
        assert_eq!(tokens[1].text, "2.5");
        assert_eq!(tokens[2].text, "3");
        assert_eq!(tokens[3].kind, TokenKind::Dot);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Lexer::new(r#""a\"b\n\\""#).tokenize().unwrap();
        assert_eq!(tokens[0].text, "a\"b\n\\");
        assert!(Lexer::new(r#""bad \q""#).tokenize().is_err());
    }

    #[test]
    fn test_raw_string_spans_lines() {
        let tokens = Lexer::new("`line \"one\"\nline two` x").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "line \"one\"\nline two");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a # hash\nb // slash\n/* block\n comment */ c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
        assert!(Lexer::new("/* open").tokenize().is_err());
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Lexer::new("a\n  b\n{").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("\"unterminated").tokenize().is_err());
        assert!(Lexer::new("\"broken\nline\"").tokenize().is_err());
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a = @").tokenize().unwrap_err();
        assert!(matches!(err, DslError::ParseError { col: 5, .. }));
    }

    #[test]
    fn test_empty_input() {
        let tokens = Lexer::new("").tokenize().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }
}
