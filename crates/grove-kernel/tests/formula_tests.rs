//! Formula trees: implied keys, lookups, and formulas stored as file names.

mod common;

use grove_kernel::formula::expand_keys;
use grove_kernel::{
    FileTree, Formula, FormulaTree, GroveConfig, KeyOrder, MutableTree, ObjectTree, Tree, TreeError, TreeRef, Value, ops,
};
use indexmap::IndexSet;
use rstest::rstest;
use serde_json::json;

fn formula_tree(json: serde_json::Value) -> TreeRef {
    let inner: TreeRef = ObjectTree::from_json(&json);
    FormulaTree::new(inner, GroveConfig::default().shared())
}

async fn text_at(tree: &TreeRef, path: &str) -> Option<String> {
    ops::traverse_path(tree, path)
        .await
        .unwrap()
        .and_then(|value| value.to_text())
}

// ============================================================================
// Fixed-point expansion
// ============================================================================

#[test]
fn test_expansion_is_idempotent() {
    let formulas: Vec<Formula> = [
        "{x}.html = page({x}.md)",
        "{x}.md = convert({x}.txt)",
        "{x}.txt",
    ]
    .iter()
    .filter_map(|key| Formula::parse(key))
    .collect();
    let mut once: IndexSet<String> = ["a.txt", "b.md", "notes"].map(String::from).into_iter().collect();
    expand_keys(&formulas, &mut once, 64);

    let mut twice = once.clone();
    let passes = expand_keys(&formulas, &mut twice, 64);
    assert_eq!(passes, 0);
    assert_eq!(once, twice);
    for key in ["a.md", "a.html", "b.html"] {
        assert!(once.contains(key), "missing {key}");
    }
}

#[tokio::test]
async fn test_keys_are_unique_and_stable() {
    let tree = formula_tree(json!({
        "a.md": "A",
        "a.html": "raw",
        "{x}.html = {x}.md": null,
        "{y}.html = `{{ y }}`": null,
    }));
    let first = tree.keys().await.unwrap();
    let second = tree.keys().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, ["a.html", "a.md", "{x}.html", "{y}.html"]);
}

#[tokio::test]
async fn test_declaration_order() {
    let inner: TreeRef = ObjectTree::from_json(&json!({
        "z.md": "Z",
        "{x}.html = {x}.md": null,
    }));
    let config = GroveConfig::default().with_key_order(KeyOrder::Declaration).shared();
    let tree: TreeRef = FormulaTree::new(inner, config);
    assert_eq!(tree.keys().await.unwrap(), ["z.md", "{x}.html", "z.html"]);
}

// ============================================================================
// Lookups
// ============================================================================

#[rstest]
#[case::literal_assignment("title", Some("Grove"))]
#[case::pattern("about.html", Some("<h1>About</h1>"))]
#[case::raw_wins("index.html", Some("raw index"))]
#[case::no_source("missing.txt", None)]
#[tokio::test]
async fn test_lookup(#[case] path: &str, #[case] expected: Option<&str>) {
    let tree = formula_tree(json!({
        "about.md": "About",
        "index.html": "raw index",
        "title = 'Grove'": null,
        "{name}.html = `<h1>{{ {name}.md }}</h1>`": null,
    }));
    assert_eq!(text_at(&tree, path).await.as_deref(), expected);
}

#[tokio::test]
async fn test_function_result_takes_remaining_keys() {
    let tree = formula_tree(json!({"greet = =`Hi {{ . }}`": null}));
    assert_eq!(text_at(&tree, "greet/Bob").await.as_deref(), Some("Hi Bob"));
}

#[tokio::test]
async fn test_tree_result_is_traversed() {
    let tree = formula_tree(json!({"{x}.json = { name: x }": null}));
    assert_eq!(text_at(&tree, "a.json/name").await.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_subtrees_get_formulas_and_outer_scope() {
    let tree = formula_tree(json!({
        "site": "Grove",
        "sub": {
            "{x}.txt = `{{ x }} of {{ site }}`": null,
        },
    }));
    assert_eq!(text_at(&tree, "sub/page.txt").await.as_deref(), Some("page of Grove"));
}

#[tokio::test]
async fn test_evaluation_errors_propagate() {
    let tree = formula_tree(json!({"bad.txt = 'text'(1)": null}));
    let err = ops::traverse_path(&tree, "bad.txt").await.unwrap_err();
    assert!(err.to_string().starts_with("evaluating bad.txt"), "{err}");
    assert!(matches!(err.root_cause(), TreeError::Eval(_)));
}

// ============================================================================
// Formulas as file names
// ============================================================================

#[tokio::test]
async fn test_formulas_in_a_directory() {
    let dir = common::temp_dir("formulas");
    common::write_files(
        &dir,
        &[
            ("about.md", "About"),
            ("{name}.html = `# {{ {name}.md }}`", ""),
        ],
    );
    let config = GroveConfig::default().shared();
    let files: TreeRef = FileTree::new(&dir, config.clone());
    let tree: TreeRef = FormulaTree::new(files, config);

    assert_eq!(tree.keys().await.unwrap(), ["about.html", "about.md", "{name}.html"]);
    assert_eq!(text_at(&tree, "about.html").await.as_deref(), Some("# About"));

    // Writes go to the directory and refresh the implied keys.
    let mutable = tree.as_mutable().unwrap();
    mutable.set("contact.md", Some(Value::from("Contact"))).await.unwrap();
    assert_eq!(
        tree.keys().await.unwrap(),
        ["about.html", "about.md", "contact.html", "contact.md", "{name}.html"]
    );
    assert_eq!(text_at(&tree, "contact.html").await.as_deref(), Some("# Contact"));

    let _ = std::fs::remove_dir_all(&dir);
}
