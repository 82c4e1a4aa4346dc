//! Parser for the expression language.
//!
//! Transforms a token stream from the lexer into [`Code`]. Uses chumsky
//! combinators; every grammar term is its own parser function, generic over
//! the token input.
//!
//! ```text
//! expression := pipeline
//! pipeline   := call ("->" call)*
//! call       := primary args*
//! args       := "(" list ")"
//! primary    := lambda | template | string | group | pattern | object | array | path
//! lambda     := "=" expression
//! template   := "`" (string | "{{" expression "}}")* "`"
//! group      := "(" expression ")"
//! pattern    := "{" reference "}" reference?
//! object     := "{" (key (":" | "=") expression)* "}"
//! array      := "[" list "]"
//! path       := reference ("/" reference?)*
//! assignment := (pattern | reference) "=" expression
//! ```
//!
//! List items are separated by commas or line breaks; leading and trailing
//! separators are allowed.

use std::sync::Arc;

use chumsky::{input::ValueInput, prelude::*};

use crate::ast::{Code, KeySyntax, Literal, Pattern, TemplatePart};
use crate::error::SyntaxError;
use crate::lexer::{self, LexMode, Token};

/// Span type used throughout the parser.
pub type Span = SimpleSpan;

type ParserError<'tokens> = extra::Err<Rich<'tokens, Token, Span>>;

/// The self-reference marker.
pub const SELF_REFERENCE: &str = "ƒ";

/// Parse an expression.
pub fn parse_expression(source: &str) -> Result<Code, SyntaxError> {
    let tokens = tokens(source, LexMode::Expression)?;
    let end_span: Span = (source.len()..source.len()).into();
    expression_source_parser()
        .parse(tokens.as_slice().map(end_span, |(t, s)| (t, s)))
        .into_result()
        .map_err(|errors| syntax_error(source, errors))
}

/// Parse a tree key as an assignment or a bare reference.
///
/// Self-reference markers in an assignment's expression are replaced with a
/// scope lookup of the whole key text.
pub fn parse_key(source: &str) -> Result<KeySyntax, SyntaxError> {
    let tokens = tokens(source, LexMode::Expression)?;
    let end_span: Span = (source.len()..source.len()).into();
    let syntax = key_parser()
        .parse(tokens.as_slice().map(end_span, |(t, s)| (t, s)))
        .into_result()
        .map_err(|errors| syntax_error(source, errors))?;

    Ok(match syntax {
        KeySyntax::Assignment { pattern, code } => KeySyntax::Assignment {
            pattern,
            code: code.replace_scope(&is_self_reference, source),
        },
        reference => reference,
    })
}

/// Parse a template document into literal text and `{{ }}` spans.
pub fn parse_template_document(source: &str) -> Result<Vec<TemplatePart>, SyntaxError> {
    let tokens = tokens(source, LexMode::TemplateDocument)?;
    let end_span: Span = (source.len()..source.len()).into();
    template_document_parser()
        .parse(tokens.as_slice().map(end_span, |(t, s)| (t, s)))
        .into_result()
        .map_err(|errors| syntax_error(source, errors))
}

fn is_self_reference(name: &str) -> bool {
    name == SELF_REFERENCE || name.starts_with("ƒ.")
}

fn tokens(source: &str, mode: LexMode) -> Result<Vec<(Token, Span)>, SyntaxError> {
    let tokens = lexer::lex(source, mode).map_err(|err| err.into_syntax_error(source))?;
    Ok(tokens
        .into_iter()
        .map(|spanned| (spanned.token, (spanned.span.start..spanned.span.end).into()))
        .collect())
}

fn syntax_error(source: &str, errors: Vec<Rich<'_, Token, Span>>) -> SyntaxError {
    match errors.into_iter().next() {
        Some(error) => SyntaxError::new(error.to_string(), error.span().start, source),
        None => SyntaxError::new("invalid syntax", 0, source),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Parser Combinators - generic over input type
// ═══════════════════════════════════════════════════════════════════════════

/// A whole expression source, allowing blank lines around it.
fn expression_source_parser<'tokens, I>() -> impl Parser<'tokens, I, Code, ParserError<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    separators_parser()
        .ignore_then(expression_parser())
        .then_ignore(separators_parser())
        .then_ignore(end())
}

/// `pattern = expression` or a bare pattern.
fn key_parser<'tokens, I>() -> impl Parser<'tokens, I, KeySyntax, ParserError<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    let pattern = choice((
        variable_parser().map(|(name, suffix)| Pattern::Variable { name, suffix }),
        reference_parser().map(Pattern::Literal),
    ));

    pattern
        .then(
            just(Token::Equal)
                .ignore_then(separators_parser())
                .ignore_then(expression_parser())
                .or_not(),
        )
        .then_ignore(separators_parser())
        .then_ignore(end())
        .map(|(pattern, code)| match code {
            Some(code) => KeySyntax::Assignment { pattern, code },
            None => KeySyntax::Reference(pattern),
        })
        .labelled("key")
}

/// Literal text interleaved with `{{ expression }}` spans.
fn template_document_parser<'tokens, I>() -> impl Parser<'tokens, I, Vec<TemplatePart>, ParserError<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    let text = select! {
        Token::String(s) => TemplatePart::Text(s),
    };

    let span = separators_parser()
        .ignore_then(expression_parser())
        .then_ignore(separators_parser())
        .delimited_by(just(Token::DoubleLeftBrace), just(Token::DoubleRightBrace))
        .map_with(|code, e| {
            let span: Span = e.span();
            TemplatePart::Span {
                code,
                range: span.start..span.end,
            }
        });

    choice((text, span))
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
}

/// Expression parser: pipelines of calls over primaries.
///
/// Uses `recursive` since groups, arguments, lambdas and templates all
/// contain expressions.
fn expression_parser<'tokens, I>() -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    recursive(|expression| {
        let args = list_parser(expression.clone())
            .delimited_by(just(Token::LeftParen), just(Token::RightParen))
            .labelled("arguments");

        let primary = choice((
            lambda_parser(expression.clone()),
            template_literal_parser(expression.clone()),
            select! {
                Token::String(s) => Code::string(s),
            }
            .labelled("string"),
            group_parser(expression.clone()),
            variable_parser().map(|(name, suffix)| Code::Variable { name, suffix }),
            object_parser(expression.clone()),
            list_parser(expression)
                .delimited_by(just(Token::LeftBracket), just(Token::RightBracket))
                .map(Code::Array)
                .labelled("array"),
            path_parser(),
        ));

        let call = primary.foldl(args.repeated(), |callee, args| Code::Call {
            callee: Box::new(callee),
            args,
        });

        let arrow = separators_parser()
            .ignore_then(just(Token::Arrow))
            .then_ignore(separators_parser());

        call.separated_by(arrow)
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|mut steps| {
                if steps.len() == 1 {
                    steps.remove(0)
                } else {
                    Code::Pipeline(steps)
                }
            })
            .labelled("expression")
    })
    .boxed()
}

/// `=expression`: a function of its arguments.
fn lambda_parser<'tokens, I, E>(expression: E) -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    E: Parser<'tokens, I, Code, ParserError<'tokens>> + Clone,
{
    just(Token::Equal)
        .ignore_then(expression)
        .map(|body| Code::Lambda(Arc::new(body)))
        .labelled("lambda")
}

/// `` `text {{ expression }} text` ``
fn template_literal_parser<'tokens, I, E>(expression: E) -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    E: Parser<'tokens, I, Code, ParserError<'tokens>> + Clone,
{
    let interpolation = separators_parser()
        .ignore_then(expression)
        .then_ignore(separators_parser())
        .delimited_by(just(Token::DoubleLeftBrace), just(Token::DoubleRightBrace));

    let part = choice((
        select! {
            Token::String(s) => Code::string(s),
        },
        interpolation,
    ));

    part.repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::Backtick), just(Token::Backtick))
        .map(|mut parts| {
            if parts.is_empty() {
                return Code::string("");
            }
            if parts.len() == 1 && matches!(parts[0], Code::Literal(Literal::String(_))) {
                return parts.remove(0);
            }
            Code::Concat(parts)
        })
        .labelled("template literal")
}

/// `(expression)`
fn group_parser<'tokens, I, E>(expression: E) -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    E: Parser<'tokens, I, Code, ParserError<'tokens>> + Clone,
{
    separators_parser()
        .ignore_then(expression)
        .then_ignore(separators_parser())
        .delimited_by(just(Token::LeftParen), just(Token::RightParen))
        .labelled("group")
}

/// `{ key: value, key = getter }`
fn object_parser<'tokens, I, E>(expression: E) -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    E: Parser<'tokens, I, Code, ParserError<'tokens>> + Clone,
{
    let key = select! {
        Token::Reference(name) => name,
        Token::String(s) => s,
    };

    let entry = key
        .then(choice((just(Token::Colon).to(false), just(Token::Equal).to(true))))
        .then(expression)
        .map(|((key, is_getter), code)| {
            let code = if is_getter {
                Code::Getter(Arc::new(code))
            } else {
                code
            };
            (key, code)
        });

    separators_parser()
        .ignore_then(
            entry
                .separated_by(separator_run_parser())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(separators_parser())
        .delimited_by(just(Token::LeftBrace), just(Token::RightBrace))
        .map(Code::Object)
        .labelled("object")
}

/// Expressions separated by commas or line breaks.
fn list_parser<'tokens, I, E>(expression: E) -> impl Parser<'tokens, I, Vec<Code>, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    E: Parser<'tokens, I, Code, ParserError<'tokens>> + Clone,
{
    separators_parser()
        .ignore_then(
            expression
                .separated_by(separator_run_parser())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(separators_parser())
}

/// `{name}suffix`, yielding the name and optional suffix.
fn variable_parser<'tokens, I>() -> impl Parser<'tokens, I, (String, Option<String>), ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    reference_parser()
        .delimited_by(just(Token::LeftBrace), just(Token::RightBrace))
        .then(reference_parser().or_not())
        .labelled("pattern")
}

/// `a/b/c`: a scope lookup, or a traversal call when there are several keys.
fn path_parser<'tokens, I>() -> impl Parser<'tokens, I, Code, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    reference_parser()
        .then(
            just(Token::Slash)
                .ignore_then(reference_parser().or_not())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, rest)| path_code(first, rest))
        .labelled("path")
}

fn reference_parser<'tokens, I>() -> impl Parser<'tokens, I, String, ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    select! {
        Token::Reference(name) => name,
    }
    .labelled("reference")
}

/// Zero or more separators.
fn separators_parser<'tokens, I>() -> impl Parser<'tokens, I, (), ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    just(Token::Separator).repeated().collect::<Vec<_>>().ignored()
}

/// One or more separators.
fn separator_run_parser<'tokens, I>() -> impl Parser<'tokens, I, (), ParserError<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    just(Token::Separator)
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .ignored()
}

/// Build the code for a path. Every key but the last gets a trailing slash.
fn path_code(first: String, rest: Vec<Option<String>>) -> Code {
    if rest.is_empty() {
        return match number(&first) {
            Some(literal) => Code::Literal(literal),
            None => Code::Scope(first),
        };
    }

    let mut keys = vec![first];
    for segment in rest {
        if let Some(last) = keys.last_mut() {
            if !last.ends_with('/') {
                last.push('/');
            }
        }
        if let Some(name) = segment {
            keys.push(name);
        }
    }

    let mut keys = keys.into_iter();
    let callee = Code::Scope(keys.next().unwrap_or_default());
    let args: Vec<Code> = keys.map(Code::string).collect();
    if args.is_empty() {
        callee
    } else {
        Code::Call {
            callee: Box::new(callee),
            args,
        }
    }
}

/// A reference that reads as a number.
fn number(text: &str) -> Option<Literal> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Literal::Int(n));
    }
    if digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return text.parse::<f64>().ok().map(Literal::Float);
    }
    None
}
