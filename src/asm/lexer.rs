//! The lexer (spec §4.4.1): source text in, a token stream out.
//!
//! Tracks `(line, column)` on every token. Comments run from `;` to end of
//! line and are lexed as a dedicated [`TokenKind::Comment`] that
//! [`Lexer::tokenize`] filters out of the returned stream, per spec. An
//! unterminated string or an unrecognized character becomes a
//! [`TokenKind::Error`] token (and a matching [`Diagnostic`]) rather than
//! aborting the whole pass.

use crate::error::Diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Data,
    Code,
    Page,
    In,
    Db,
    Dw,
    Da,
}

impl Keyword {
    fn from_str(word: &str) -> Option<Self> {
        Some(match word.to_ascii_uppercase().as_str() {
            "DATA" => Self::Data,
            "CODE" => Self::Code,
            "PAGE" => Self::Page,
            "IN" => Self::In,
            "DB" => Self::Db,
            "DW" => Self::Dw,
            "DA" => Self::Da,
            _ => return None,
        })
    }
}

/// The five general-purpose registers, each addressable as a 16-bit whole
/// register or as two 8-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Ax,
    Bx,
    Cx,
    Dx,
    Ex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    High,
    Low,
}

/// A register operand as written in source: either the full 16-bit
/// register or one of its 8-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterToken {
    pub register: Register,
    pub half: Option<Half>,
}

impl RegisterToken {
    fn from_str(word: &str) -> Option<Self> {
        let upper = word.to_ascii_uppercase();
        let register = match upper.as_bytes().first()? {
            b'A' => Register::Ax,
            b'B' => Register::Bx,
            b'C' => Register::Cx,
            b'D' => Register::Dx,
            b'E' => Register::Ex,
            _ => return None,
        };
        match upper.as_bytes().get(1)? {
            b'X' if upper.len() == 2 => Some(Self {
                register,
                half: None,
            }),
            b'H' if upper.len() == 2 => Some(Self {
                register,
                half: Some(Half::High),
            }),
            b'L' if upper.len() == 2 => Some(Self {
                register,
                half: Some(Half::Low),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Eol,
    Eof,
    Keyword(Keyword),
    Ident(String),
    Register(RegisterToken),
    Number(i64),
    Str(String),
    Colon,
    Comma,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,
    Minus,
    Comment,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lexes the whole source, filtering out comments, and returns the
    /// token stream alongside any lex diagnostics collected along the way.
    pub fn tokenize(source: &'a str) -> (Vec<Token>, Diagnostics) {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        let mut diagnostics = Diagnostics::new();
        loop {
            let token = lexer.next_token(&mut diagnostics);
            let is_eof = token.kind == TokenKind::Eof;
            if token.kind != TokenKind::Comment {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }
        (tokens, diagnostics)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn make(&self, kind: TokenKind, line: u32, column: u32) -> Token {
        Token { kind, line, column }
    }

    fn next_token(&mut self, diagnostics: &mut Diagnostics) -> Token {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.advance();
                }
                _ => break,
            }
        }

        let line = self.line;
        let column = self.column;

        let Some(byte) = self.peek() else {
            return self.make(TokenKind::Eof, line, column);
        };

        match byte {
            b'\n' => {
                self.advance();
                self.make(TokenKind::Eol, line, column)
            }
            b';' => {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.advance();
                }
                self.make(TokenKind::Comment, line, column)
            }
            b':' => {
                self.advance();
                self.make(TokenKind::Colon, line, column)
            }
            b',' => {
                self.advance();
                self.make(TokenKind::Comma, line, column)
            }
            b'[' => {
                self.advance();
                self.make(TokenKind::LBracket, line, column)
            }
            b']' => {
                self.advance();
                self.make(TokenKind::RBracket, line, column)
            }
            b'(' => {
                self.advance();
                self.make(TokenKind::LParen, line, column)
            }
            b')' => {
                self.advance();
                self.make(TokenKind::RParen, line, column)
            }
            b'+' => {
                self.advance();
                self.make(TokenKind::Plus, line, column)
            }
            b'-' if !self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                self.advance();
                self.make(TokenKind::Minus, line, column)
            }
            b'"' | b'\'' => self.lex_string(byte, line, column, diagnostics),
            b'0'..=b'9' => self.lex_number(line, column),
            b'-' => self.lex_number(line, column),
            _ if byte.is_ascii_alphabetic() || byte == b'_' => self.lex_word(line, column),
            _ => {
                let character = self.advance().map(char::from).unwrap_or_default();
                diagnostics.push(line, column, format!("unknown character {character:?}"));
                self.make(TokenKind::Error(format!("unknown character {character:?}")), line, column)
            }
        }
    }

    fn lex_word(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.advance();
        }
        let word = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        if let Some(keyword) = Keyword::from_str(word) {
            self.make(TokenKind::Keyword(keyword), line, column)
        } else if let Some(register) = RegisterToken::from_str(word) {
            self.make(TokenKind::Register(register), line, column)
        } else {
            self.make(TokenKind::Ident(word.to_string()), line, column)
        }
    }

    fn lex_number(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.advance();
        }
        let is_hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X'));
        if is_hex {
            self.advance();
            self.advance();
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        let value = parse_number(text).unwrap_or(0);
        self.make(TokenKind::Number(value), line, column)
    }

    fn lex_string(
        &mut self,
        quote: u8,
        line: u32,
        column: u32,
        diagnostics: &mut Diagnostics,
    ) -> Token {
        self.advance();
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    diagnostics.push(line, column, "unterminated string literal");
                    return self.make(
                        TokenKind::Error("unterminated string literal".to_string()),
                        line,
                        column,
                    );
                }
                Some(byte) if byte == quote => {
                    self.advance();
                    return self.make(TokenKind::Str(value), line, column);
                }
                Some(b'\\') => {
                    self.advance();
                    let escaped = self.advance();
                    value.push(match escaped {
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(b'r') => '\r',
                        Some(b'\\') => '\\',
                        Some(b'"') => '"',
                        Some(b'\'') => '\'',
                        Some(b'0') => '\0',
                        Some(other) => other as char,
                        None => {
                            diagnostics.push(line, column, "unterminated string literal");
                            return self.make(
                                TokenKind::Error("unterminated string literal".to_string()),
                                line,
                                column,
                            );
                        }
                    });
                }
                Some(byte) => {
                    value.push(byte as char);
                    self.advance();
                }
            }
        }
    }
}

/// Parses a decimal or `0x`-prefixed hex literal, with an optional leading
/// `-`, into its two's-complement 64-bit representation.
pub fn parse_number(text: &str) -> Option<i64> {
    let (negative, rest) = text
        .strip_prefix('-')
        .map_or((false, text), |rest| (true, rest));
    let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        rest.parse::<i64>().ok()?
    };
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn filters_comments() {
        let kinds = kinds("; just a comment\n");
        assert_eq!(kinds, vec![TokenKind::Eol, TokenKind::Eof]);
    }

    #[test]
    fn lexes_hex_and_decimal_numbers() {
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("-1"), Some(-1));
    }

    #[test]
    fn lexes_registers_case_insensitively() {
        let kinds = kinds("ax AH bl\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Register(RegisterToken {
                    register: Register::Ax,
                    half: None
                }),
                TokenKind::Register(RegisterToken {
                    register: Register::Ax,
                    half: Some(Half::High)
                }),
                TokenKind::Register(RegisterToken {
                    register: Register::Bx,
                    half: Some(Half::Low)
                }),
                TokenKind::Eol,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        let kinds = kinds("\"a\\nb\"\n");
        assert_eq!(kinds[0], TokenKind::Str("a\nb".to_string()));
    }

    #[test]
    fn unterminated_string_produces_error_token_and_diagnostic() {
        let (tokens, diagnostics) = Lexer::tokenize("\"unterminated\n");
        assert!(matches!(tokens[0].kind, TokenKind::Error(_)));
        assert_eq!(diagnostics.len(), 1);
    }
}
