//! Templates: front matter, scope, and `.ori` files.

mod common;

use grove_kernel::interpreter::evaluate;
use grove_kernel::parser::parse_expression;
use grove_kernel::{FileTree, FormulaTree, GroveConfig, ObjectTree, Scope, Template, TreeError, TreeRef, Value, ops};
use rstest::rstest;
use serde_json::json;

async fn render(source: &str, input: Option<Value>) -> String {
    let template = Template::compile(source).unwrap_or_else(|err| panic!("compile error for {source:?}: {err}"));
    template.apply(input, None).await.unwrap().text
}

fn input(json: serde_json::Value) -> Option<Value> {
    let tree: TreeRef = ObjectTree::from_json(&json);
    Some(Value::Tree(tree))
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test]
async fn test_front_matter_scenario() {
    let text = render("---\nname: Bob\n---\nHello, {{ name }}!", None).await;
    assert_eq!(text, "Hello, Bob!");
}

#[rstest]
#[case::dot("<p>{{ . }}</p>", Some(Value::from("hi")), "<p>hi</p>")]
#[case::input_path("{{ @input/author }}", input(json!({"author": "Ann"})), "Ann")]
#[case::input_names("{{ title }}: {{ body }}", input(json!({"title": "T", "body": "B"})), "T: B")]
#[case::absent_is_empty("[{{ nothing }}]", None, "[]")]
#[case::builtins("{{ concat('a', 'b') }}", None, "ab")]
#[case::template_text("{{ @template/text }}", None, "{{ @template/text }}")]
#[tokio::test]
async fn test_render(#[case] source: &str, #[case] input: Option<Value>, #[case] expected: &str) {
    assert_eq!(render(source, input).await, expected);
}

#[rstest]
#[case::expression("---\ntitle: !ori concat('A', 'B')\n---\n{{ title }}", "AB")]
#[case::sibling("---\nname: Bob\ngreeting: !ori \"`Hi {{ name }}`\"\n---\n{{ greeting }}", "Hi Bob")]
#[tokio::test]
async fn test_front_matter_getters(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(render(source, None).await, expected);
}

#[tokio::test]
async fn test_rendered_output_is_a_tree() {
    let template = Template::compile("---\ntitle: T\nbody: front\n---\n{{ body }}").unwrap();
    let rendered = template.apply(input(json!({"body": "input"})), None).await.unwrap();
    assert_eq!(rendered.to_string(), "input");
    let tree = rendered.to_tree();
    assert_eq!(ops::plain(tree).await.unwrap(), json!({"body": "input", "title": "T"}));
}

// ============================================================================
// Template files
// ============================================================================

#[tokio::test]
async fn test_ori_file_is_a_function() {
    let dir = common::temp_dir("ori");
    common::write_files(
        &dir,
        &[
            ("page.ori", "<p>{{ . }} from {{ site.txt }}</p>"),
            ("site.txt", "Grove"),
        ],
    );
    let files: TreeRef = FileTree::new(&dir, GroveConfig::default().shared());
    let code = parse_expression("page.ori('Bob')").unwrap();
    let value = evaluate(&code, Scope::of(&files)).await.unwrap();
    assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("<p>Bob from Grove</p>"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_ori_file_behind_a_formula() {
    let dir = common::temp_dir("ori-formula");
    common::write_files(
        &dir,
        &[
            ("page.ori", "<main>{{ . }}</main>"),
            ("about.md", "About"),
            ("{name}.html = page.ori({name}.md)", ""),
        ],
    );
    let config = GroveConfig::default().shared();
    let files: TreeRef = FileTree::new(&dir, config.clone());
    let site: TreeRef = FormulaTree::new(files, config);
    let value = ops::traverse_path(&site, "about.html").await.unwrap();
    assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("<main>About</main>"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_bad_template_file_keeps_cause() {
    let dir = common::temp_dir("ori-bad");
    common::write_files(&dir, &[("bad.ori", "{{ f( }}")]);
    let files: TreeRef = FileTree::new(&dir, GroveConfig::default().shared());
    let code = parse_expression("bad.ori('x')").unwrap();
    let err = evaluate(&code, Scope::of(&files)).await.unwrap_err();
    assert!(matches!(err.root_cause(), TreeError::Syntax(_)), "{err}");
    let _ = std::fs::remove_dir_all(&dir);
}
