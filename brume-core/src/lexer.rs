//! Lexer for Brume source.
//!
//! The lexer is intentionally simple: it recognizes keywords, identifiers,
//! integer and boolean literals and punctuation. Everything else is left to
//! the parser.

use crate::diagnostic::Diagnostic;
use crate::span::{FileId, Span};

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Special
    Eof,

    // Identifiers and literals
    Ident,
    IntLiteral,
    BoolLiteral, // true / false

    // Punctuation
    LParen,       // (
    RParen,       // )
    LBrace,       // {
    RBrace,       // }
    Comma,        // ,
    Semi,         // ;
    Colon,        // :
    Dot,          // .
    Equal,        // =
    EqualEqual,   // ==
    Bang,         // !
    BangEqual,    // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Plus,         // +
    Minus,        // -
    Star,         // *
    Arrow,        // ->

    // Keywords
    Fn,
    Let,
    Return,
    If,
    Else,
    Struct,
    Typeclass,
    Instance,
    Export,
}

/// A single token with its kind and span.
///
/// The text of a token is recovered by slicing the source with its span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        &source[self.span.start as usize..self.span.end as usize]
    }
}

/// Result of lexing a source file.
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens. The token list always ends with `Eof`.
pub fn lex(file_id: FileId, source: &str) -> LexResult {
    let mut lexer = Lexer {
        file_id,
        chars: source.as_bytes(),
        source,
        index: 0,
        diagnostics: Vec::new(),
    };
    lexer.run()
}

struct Lexer<'src> {
    file_id: FileId,
    source: &'src str,
    chars: &'src [u8],
    index: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> LexResult {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }
            if ch == b'/' && self.peek_next() == Some(b'/') {
                self.skip_line_comment();
                continue;
            }

            let start = self.index as u32;
            let token = match ch {
                b'(' => self.single(TokenKind::LParen, start),
                b')' => self.single(TokenKind::RParen, start),
                b'{' => self.single(TokenKind::LBrace, start),
                b'}' => self.single(TokenKind::RBrace, start),
                b',' => self.single(TokenKind::Comma, start),
                b';' => self.single(TokenKind::Semi, start),
                b':' => self.single(TokenKind::Colon, start),
                b'.' => self.single(TokenKind::Dot, start),
                b'+' => self.single(TokenKind::Plus, start),
                b'*' => self.single(TokenKind::Star, start),
                b'=' => self.one_or_two(b'=', TokenKind::Equal, TokenKind::EqualEqual, start),
                b'!' => self.one_or_two(b'=', TokenKind::Bang, TokenKind::BangEqual, start),
                b'<' => self.one_or_two(b'=', TokenKind::Less, TokenKind::LessEqual, start),
                b'>' => {
                    self.one_or_two(b'=', TokenKind::Greater, TokenKind::GreaterEqual, start)
                }
                b'-' => self.one_or_two(b'>', TokenKind::Minus, TokenKind::Arrow, start),
                b'0'..=b'9' => self.lex_number(start),
                _ => {
                    if is_ident_start(ch) {
                        self.lex_ident_or_keyword(start)
                    } else {
                        self.consume_char();
                        self.unexpected_char(start)
                    }
                }
            };

            if let Some(tok) = token {
                tokens.push(tok);
            }
        }

        let len = self.chars.len() as u32;
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(self.file_id, len, len),
        });

        LexResult {
            tokens,
            diagnostics: std::mem::take(&mut self.diagnostics),
        }
    }

    fn single(&mut self, kind: TokenKind, start: u32) -> Option<Token> {
        self.consume_char();
        self.simple_token(kind, start)
    }

    fn one_or_two(
        &mut self,
        second: u8,
        short: TokenKind,
        long: TokenKind,
        start: u32,
    ) -> Option<Token> {
        self.consume_char();
        if self.peek_char() == Some(second) {
            self.consume_char();
            self.simple_token(long, start)
        } else {
            self.simple_token(short, start)
        }
    }

    fn simple_token(&self, kind: TokenKind, start: u32) -> Option<Token> {
        Some(Token {
            kind,
            span: Span::new(self.file_id, start, self.index as u32),
        })
    }

    fn unexpected_char(&mut self, start: u32) -> Option<Token> {
        let span = Span::new(self.file_id, start, self.index as u32);
        let diag = Diagnostic::error("unexpected character", span).with_code("E0001");
        self.diagnostics.push(diag);
        None
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn lex_number(&mut self, start: u32) -> Option<Token> {
        while let Some(ch) = self.peek_char() {
            if matches!(ch, b'0'..=b'9' | b'_') {
                self.consume_char();
            } else {
                break;
            }
        }
        self.simple_token(TokenKind::IntLiteral, start)
    }

    fn lex_ident_or_keyword(&mut self, start: u32) -> Option<Token> {
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.consume_char();
            } else {
                break;
            }
        }

        let text = &self.source[start as usize..self.index];
        let kind = match text {
            "fn" => TokenKind::Fn,
            "let" => TokenKind::Let,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "struct" => TokenKind::Struct,
            "typeclass" => TokenKind::Typeclass,
            "instance" => TokenKind::Instance,
            "export" => TokenKind::Export,
            "true" | "false" => TokenKind::BoolLiteral,
            _ => TokenKind::Ident,
        };
        self.simple_token(kind, start)
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
