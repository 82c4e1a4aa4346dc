//! Lexer for the expression language.
//!
//! Source text is read by a small mode machine. In expression mode tokens
//! come from a logos lexer; strings, template literals and template
//! documents are scanned by hand, because their bodies are text rather than
//! tokens. `{{` inside a template pushes the current mode and switches to
//! expression mode; the matching `}}` pops back.
//!
//! # Token Categories
//!
//! - **Punctuation**: `(`, `)`, `[`, `]`, `{`, `}`, `:`, `=`, `/`, `` ` ``
//! - **Template braces**: `{{`, `}}`
//! - **Separators**: `,` or a run of whitespace containing a line break
//! - **Pipeline arrow**: `->`
//! - **References**: anything else up to a delimiter, with `\` escapes
//! - **Strings**: `'single'` or `"double"` quoted, with `\` escapes
//!
//! A backslash escapes the next character in every mode. A backslash before
//! a line break or at the end of input is an error.

use std::fmt;

use logos::{Filter, Logos, Span};

use crate::error::SyntaxError;

/// A token with its span in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(token: T, span: Span) -> Self {
        Self { token, span }
    }
}

/// Lexer error types.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LexerError {
    #[default]
    UnexpectedCharacter,
    UnterminatedString,
    UnterminatedTemplate,
    /// `{{` without its closing `}}`.
    UnclosedInterpolation,
    BackslashBeforeNewline,
    BackslashAtEnd,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexerError::UnexpectedCharacter => write!(f, "unexpected character"),
            LexerError::UnterminatedString => write!(f, "unterminated string"),
            LexerError::UnterminatedTemplate => write!(f, "unterminated template literal"),
            LexerError::UnclosedInterpolation => write!(f, "unexpected end of input inside {{{{ }}}}"),
            LexerError::BackslashBeforeNewline => write!(f, "unexpected newline after backslash"),
            LexerError::BackslashAtEnd => write!(f, "unexpected end of input after backslash"),
        }
    }
}

impl std::error::Error for LexerError {}

impl Spanned<LexerError> {
    /// Convert to a syntax error against `source`.
    pub fn into_syntax_error(self, source: &str) -> SyntaxError {
        SyntaxError::new(self.token.to_string(), self.span.start, source)
    }
}

/// Tokens produced by [`lex`].
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Arrow,
    Backtick,
    Colon,
    DoubleLeftBrace,
    DoubleRightBrace,
    Equal,
    LeftBrace,
    LeftBracket,
    LeftParen,
    Reference(String),
    RightBrace,
    RightBracket,
    RightParen,
    Separator,
    Slash,
    String(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Arrow => write!(f, "->"),
            Token::Backtick => write!(f, "`"),
            Token::Colon => write!(f, ":"),
            Token::DoubleLeftBrace => write!(f, "{{{{"),
            Token::DoubleRightBrace => write!(f, "}}}}"),
            Token::Equal => write!(f, "="),
            Token::LeftBrace => write!(f, "{{"),
            Token::LeftBracket => write!(f, "["),
            Token::LeftParen => write!(f, "("),
            Token::Reference(name) => write!(f, "{name}"),
            Token::RightBrace => write!(f, "}}"),
            Token::RightBracket => write!(f, "]"),
            Token::RightParen => write!(f, ")"),
            Token::Separator => write!(f, "separator"),
            Token::Slash => write!(f, "/"),
            Token::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Where lexing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// Source is an expression.
    Expression,
    /// Source is text with `{{ }}` spans.
    TemplateDocument,
}

/// Expression-mode tokens, before mode handling.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexerError)]
#[logos(skip r"#[^\r\n]*")]
enum Raw {
    #[regex(r"[ \t\r\n]+", whitespace)]
    #[token(",")]
    Separator,

    #[token("->", priority = 10)]
    Arrow,

    #[token("`")]
    Backtick,

    #[token("'")]
    SingleQuote,

    #[token("\"")]
    DoubleQuote,

    #[token(":")]
    Colon,

    #[token("}}")]
    DoubleRightBrace,

    #[token("=")]
    Equal,

    #[token("{")]
    LeftBrace,

    #[token("[")]
    LeftBracket,

    #[token("(")]
    LeftParen,

    #[token("}")]
    RightBrace,

    #[token("]")]
    RightBracket,

    #[token(")")]
    RightParen,

    #[token("/")]
    Slash,

    // A reference may not begin with `->`, so `x ->f` is a pipeline.
    #[regex(
        r#"(?:[^\s#'"`(),/:=\[\]{}\\-]|\\[^\r\n]|-(?:[^\s#'"`(),/:=\[\]{}\\>]|\\[^\r\n]))(?:[^\s#'"`(),/:=\[\]{}\\]|\\[^\r\n])*|-"#,
        reference
    )]
    Reference(String),
}

/// Whitespace only separates statements when it spans a line break.
fn whitespace(lex: &mut logos::Lexer<Raw>) -> Filter<()> {
    if lex.slice().contains('\n') {
        Filter::Emit(())
    } else {
        Filter::Skip
    }
}

fn reference(lex: &mut logos::Lexer<Raw>) -> String {
    let mut name = String::with_capacity(lex.slice().len());
    let mut chars = lex.slice().chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                name.push(escaped);
            }
        } else {
            name.push(c);
        }
    }
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Expression,
    TemplateLiteral,
    TemplateDocument,
}

impl From<LexMode> for Mode {
    fn from(mode: LexMode) -> Self {
        match mode {
            LexMode::Expression => Mode::Expression,
            LexMode::TemplateDocument => Mode::TemplateDocument,
        }
    }
}

struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    initial: Mode,
    mode: Mode,
    /// Open single braces in the current expression context.
    depth: usize,
    /// Modes (and brace depths) suspended by `{{`.
    stack: Vec<(Mode, usize)>,
    tokens: Vec<Spanned<Token>>,
}

/// Tokenize `source` starting in `mode`.
///
/// Lexing stops at the first error. Input must end back in the starting
/// mode: an unterminated string, template literal or `{{` is an error.
pub fn lex(source: &str, mode: LexMode) -> Result<Vec<Spanned<Token>>, Spanned<LexerError>> {
    let mut scanner = Scanner {
        source,
        pos: 0,
        initial: mode.into(),
        mode: mode.into(),
        depth: 0,
        stack: Vec::new(),
        tokens: Vec::new(),
    };
    scanner.run()?;
    Ok(scanner.tokens)
}

/// Tokenize an expression.
pub fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>, SyntaxError> {
    lex(source, LexMode::Expression).map_err(|err| err.into_syntax_error(source))
}

impl Scanner<'_> {
    fn run(&mut self) -> Result<(), Spanned<LexerError>> {
        while self.pos < self.source.len() {
            match self.mode {
                Mode::Expression => self.expression()?,
                Mode::TemplateLiteral | Mode::TemplateDocument => self.text()?,
            }
        }
        if self.mode != self.initial || !self.stack.is_empty() {
            let end = self.source.len();
            let error = match self.mode {
                Mode::TemplateLiteral => LexerError::UnterminatedTemplate,
                _ => LexerError::UnclosedInterpolation,
            };
            return Err(Spanned::new(error, end..end));
        }
        Ok(())
    }

    fn push(&mut self, token: Token, span: Span) {
        self.tokens.push(Spanned::new(token, span));
    }

    /// Lex one expression-mode token.
    fn expression(&mut self) -> Result<(), Spanned<LexerError>> {
        let source = self.source;
        let start = self.pos;
        let mut lexer = Raw::lexer(&source[start..]);
        let Some(result) = lexer.next() else {
            // Only comments or plain whitespace were left.
            self.pos = self.source.len();
            return Ok(());
        };
        let span = start + lexer.span().start..start + lexer.span().end;
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => return Err(self.refine(err, span.start)),
        };
        self.pos = span.end;

        let token = match raw {
            Raw::SingleQuote => return self.string('\'', span.start),
            Raw::DoubleQuote => return self.string('"', span.start),
            Raw::Backtick => {
                self.push(Token::Backtick, span);
                self.mode = Mode::TemplateLiteral;
                return Ok(());
            }
            Raw::DoubleRightBrace if self.depth > 0 => {
                // Closes an inner `{`; the second brace is lexed again.
                self.depth -= 1;
                self.pos = span.start + 1;
                self.push(Token::RightBrace, span.start..span.start + 1);
                return Ok(());
            }
            Raw::DoubleRightBrace => {
                self.push(Token::DoubleRightBrace, span);
                let (mode, depth) = self.stack.pop().unwrap_or((self.initial, 0));
                self.mode = mode;
                self.depth = depth;
                return Ok(());
            }
            Raw::LeftBrace => {
                self.depth += 1;
                Token::LeftBrace
            }
            Raw::RightBrace => {
                self.depth = self.depth.saturating_sub(1);
                Token::RightBrace
            }
            Raw::Separator => Token::Separator,
            Raw::Arrow => Token::Arrow,
            Raw::Colon => Token::Colon,
            Raw::Equal => Token::Equal,
            Raw::LeftBracket => Token::LeftBracket,
            Raw::LeftParen => Token::LeftParen,
            Raw::RightBracket => Token::RightBracket,
            Raw::RightParen => Token::RightParen,
            Raw::Slash => Token::Slash,
            Raw::Reference(name) => Token::Reference(name),
        };
        self.push(token, span);
        Ok(())
    }

    /// Replace a generic logos error at `at` with a precise one.
    fn refine(&self, err: LexerError, at: usize) -> Spanned<LexerError> {
        let rest = &self.source[at..];
        if let Some(after) = rest.strip_prefix('\\') {
            return self.backslash_error(after, at);
        }
        let len = rest.chars().next().map_or(0, char::len_utf8);
        Spanned::new(err, at..at + len)
    }

    fn backslash_error(&self, after: &str, at: usize) -> Spanned<LexerError> {
        let error = match after.chars().next() {
            None => LexerError::BackslashAtEnd,
            Some(_) => LexerError::BackslashBeforeNewline,
        };
        Spanned::new(error, at..at + 1)
    }

    /// Read a quoted string whose opening quote is at `start`.
    fn string(&mut self, quote: char, start: usize) -> Result<(), Spanned<LexerError>> {
        let source = self.source;
        let mut value = String::new();
        let mut chars = source[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            let at = self.pos + offset;
            if c == '\\' {
                match chars.next() {
                    Some((_, '\n' | '\r')) | None => {
                        return Err(self.backslash_error(&source[at + 1..], at));
                    }
                    Some((_, escaped)) => value.push(escaped),
                }
            } else if c == quote {
                let end = at + c.len_utf8();
                self.pos = end;
                self.push(Token::String(value), start..end);
                return Ok(());
            } else {
                value.push(c);
            }
        }
        let end = self.source.len();
        Err(Spanned::new(LexerError::UnterminatedString, start..end))
    }

    /// Read template text up to `{{`, a closing backtick, or the end.
    fn text(&mut self) -> Result<(), Spanned<LexerError>> {
        let source = self.source;
        let start = self.pos;
        let mut value = String::new();
        let mut chars = source[start..].char_indices().peekable();
        while let Some((offset, c)) = chars.next() {
            let at = start + offset;
            if c == '\\' {
                match chars.next() {
                    Some((_, '\n' | '\r')) | None => {
                        return Err(self.backslash_error(&source[at + 1..], at));
                    }
                    Some((_, escaped)) => value.push(escaped),
                }
                continue;
            }
            if c == '{' && matches!(chars.peek(), Some((_, '{'))) {
                self.flush_text(value, start..at);
                self.push(Token::DoubleLeftBrace, at..at + 2);
                self.stack.push((self.mode, self.depth));
                self.mode = Mode::Expression;
                self.depth = 0;
                self.pos = at + 2;
                return Ok(());
            }
            if c == '`' && self.mode == Mode::TemplateLiteral {
                self.flush_text(value, start..at);
                self.push(Token::Backtick, at..at + 1);
                self.mode = Mode::Expression;
                self.pos = at + 1;
                return Ok(());
            }
            value.push(c);
        }
        let end = self.source.len();
        self.flush_text(value, start..end);
        self.pos = end;
        Ok(())
    }

    fn flush_text(&mut self, text: String, span: Span) {
        if !text.is_empty() {
            self.push(Token::String(text), span);
        }
    }
}
