//! Parser tests using rstest for parameterization.
//!
//! Parsed code is compared through its `Display` form, which prints calls,
//! pipelines and literals in a normalized shape.

use grove_kernel::ast::{KeySyntax, Pattern, TemplatePart};
use grove_kernel::parser::{parse_expression, parse_key, parse_template_document};
use rstest::rstest;

/// Parse `input` and render it back.
fn normalized(input: &str) -> String {
    parse_expression(input)
        .unwrap_or_else(|err| panic!("parse error for {input:?}: {err}"))
        .to_string()
}

fn expect_parse_error(input: &str) {
    assert!(parse_expression(input).is_err(), "expected error for input: {input:?}");
}

// ============================================================================
// Expressions
// ============================================================================

#[rstest]
#[case::reference("name", "name")]
#[case::string("'x'", "\"x\"")]
#[case::call("fn(a, 'b')", "fn(a, \"b\")")]
#[case::zero_args("f()", "f()")]
#[case::chained("f(a)(b)", "f(a)(b)")]
#[case::path("a/b/c", "a/(\"b/\", \"c\")")]
#[case::trailing_slash("posts/", "posts/")]
#[case::pipeline("x -> f -> g", "x -> f -> g")]
#[case::pipeline_without_space_after("x ->f ->g", "x -> f -> g")]
#[case::group("(a -> b)", "a -> b")]
#[case::lambda("map(posts, =title)", "map(posts, =title)")]
#[case::template_literal("`Hi {{ name }}`", "`Hi {{ name }}`")]
#[case::object("{ a: 1, b = f() }", "{ a: 1, b = f() }")]
#[case::array("[1, 2.5]", "[1, 2.5]")]
#[case::multiline_args("f(\n  a\n  b\n)", "f(a, b)")]
#[case::variable("{slug}.md", "{slug}.md")]
#[case::self_reference("ƒ", "ƒ")]
fn test_expression(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalized(input), expected);
}

#[rstest]
#[case::unclosed_call("fn(")]
#[case::stray_paren(")")]
#[case::juxtaposed("a b")]
#[case::empty_lambda("=")]
#[case::unclosed_array("[a")]
#[case::missing_value("{ a: }")]
fn test_expression_errors(#[case] input: &str) {
    expect_parse_error(input);
}

// ============================================================================
// Keys
// ============================================================================

#[test]
fn test_formula_key() {
    let KeySyntax::Assignment { pattern, code } = parse_key("{name}.html = page({name}.md)").unwrap() else {
        panic!("expected an assignment");
    };
    assert_eq!(
        pattern,
        Pattern::Variable {
            name: "name".into(),
            suffix: Some(".html".into())
        }
    );
    assert_eq!(code.to_string(), "page({name}.md)");
}

#[rstest]
#[case::plain("index.html", Pattern::Literal("index.html".into()))]
#[case::bare_variable("{x}", Pattern::Variable { name: "x".into(), suffix: None })]
fn test_reference_key(#[case] input: &str, #[case] expected: Pattern) {
    assert_eq!(parse_key(input).unwrap(), KeySyntax::Reference(expected));
}

#[test]
fn test_self_reference_becomes_source() {
    let source = "page.html = ƒ.ori(data)";
    let KeySyntax::Assignment { code, .. } = parse_key(source).unwrap() else {
        panic!("expected an assignment");
    };
    assert_eq!(code.to_string(), format!("{source}(data)"));
}

// ============================================================================
// Template documents
// ============================================================================

#[test]
fn test_document_parts() {
    let source = "a {{ b }} c {{ d(e) }}";
    let parts = parse_template_document(source).unwrap();
    let ranges: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            TemplatePart::Span { range, .. } => Some(&source[range.clone()]),
            TemplatePart::Text(_) => None,
        })
        .collect();
    assert_eq!(ranges, ["{{ b }}", "{{ d(e) }}"]);
    assert_eq!(parts[0], TemplatePart::Text("a ".into()));
    assert_eq!(parts[2], TemplatePart::Text(" c ".into()));
}

#[test]
fn test_document_without_spans() {
    let parts = parse_template_document("just text").unwrap();
    assert_eq!(parts, vec![TemplatePart::Text("just text".into())]);
}

#[rstest]
#[case::bad_expression("x {{ f( }}")]
#[case::unclosed("x {{ y")]
fn test_document_errors(#[case] input: &str) {
    assert!(parse_template_document(input).is_err());
}
