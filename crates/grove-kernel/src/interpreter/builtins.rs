//! Builtin functions: the last link of every scope.

use std::sync::OnceLock;

use async_trait::async_trait;
use futures::future::{BoxFuture, try_join_all};
use grove_types::Key;
use indexmap::IndexMap;

use super::eval::{invoke, stringify};
use crate::error::{TreeError, TreeResult};
use crate::ops;
use crate::template::Template;
use crate::tree::{ObjectTree, Record, Tree, TreeRef};
use crate::transform::{FilterTree, GlobTree, MapTree, MatchTree, MergeTree, ReverseTree, ShuffleTree, SubtractTree};
use crate::value::{Function, Invocation, Value};

static BUILTINS: OnceLock<TreeRef> = OnceLock::new();

/// The shared builtins tree.
pub fn builtins() -> TreeRef {
    BUILTINS
        .get_or_init(|| {
            let tree: TreeRef = BuiltinTree::new();
            tree
        })
        .clone()
}

/// Read-only tree of builtin functions.
struct BuiltinTree {
    functions: IndexMap<&'static str, Function>,
}

impl BuiltinTree {
    fn new() -> std::sync::Arc<Self> {
        let functions: [(&'static str, Function); 13] = [
            ("map", Function::new("map", map)),
            ("filter", Function::new("filter", filter)),
            ("reverse", Function::new("reverse", reverse)),
            ("merge", Function::new("merge", merge)),
            ("subtract", Function::new("subtract", subtract)),
            ("globs", Function::new("globs", globs)),
            ("keys", Function::new("keys", keys)),
            ("values", Function::new("values", values)),
            ("concat", Function::new("concat", concat)),
            ("match", Function::new("match", match_keys)),
            ("inline", Function::new("inline", inline)),
            ("nulls", Function::new("nulls", nulls)),
            ("shuffle", Function::new("shuffle", shuffle)),
        ];
        std::sync::Arc::new(Self {
            functions: functions.into_iter().collect(),
        })
    }
}

#[async_trait]
impl Tree for BuiltinTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: "Builtins" });
        };
        Ok(self.functions.get(name).cloned().map(Value::Function))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        Ok(self.functions.keys().map(|name| name.to_string()).collect())
    }

    async fn is_key_for_subtree(&self, _key: &str) -> TreeResult<bool> {
        Ok(false)
    }

    fn kind(&self) -> &'static str {
        "Builtins"
    }
}

/// Coerce a value to a tree: forcing getters and unpacking packed content.
pub fn to_tree(value: Option<Value>) -> BoxFuture<'static, TreeResult<TreeRef>> {
    Box::pin(async move {
        let value = match value {
            Some(value) => value.resolve(None).await?,
            None => None,
        };
        match value {
            Some(Value::Tree(tree)) => Ok(tree),
            Some(Value::Packed(packed)) => to_tree(Some(packed.unpack().await?)).await,
            Some(other) => Err(TreeError::Eval(format!("expected a tree, got {}", other.type_name()))),
            None => Err(TreeError::Eval("expected a tree, got nothing".into())),
        }
    })
}

/// Coerce a callable value to a function; trees and packed values are
/// called through [`invoke`].
pub fn to_function(value: Value) -> Function {
    match value {
        Value::Function(function) => function,
        other => {
            let name = other.type_name();
            Function::new(name, move |invocation: Invocation| {
                let callee = other.clone();
                let this = invocation.this.unwrap_or_else(builtins);
                invoke(callee, invocation.args, this)
            })
        }
    }
}

fn required(invocation: &mut Invocation, index: usize, builtin: &str, what: &str) -> TreeResult<Value> {
    invocation
        .take(index)
        .ok_or_else(|| TreeError::Eval(format!("{builtin}: missing {what}")))
}

/// `map(tree, fn, ".src->.dst")`
async fn map(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    let function = to_function(required(&mut invocation, 1, "map", "function")?);
    let extensions = match invocation.take(2) {
        Some(option) => {
            let text = option.to_text().unwrap_or_default();
            match text.split_once("->") {
                Some((source, target)) => Some((source.trim().to_string(), target.trim().to_string())),
                None => return Err(TreeError::Eval(format!("map: expected \".src->.dst\", got {text:?}"))),
            }
        }
        None => None,
    };
    Ok(Some(Value::Tree(MapTree::new(tree, function, extensions))))
}

/// `filter(tree, fn)`
async fn filter(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    let predicate = to_function(required(&mut invocation, 1, "filter", "predicate")?);
    Ok(Some(Value::Tree(FilterTree::new(tree, predicate))))
}

async fn reverse(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    Ok(Some(Value::Tree(ReverseTree::new(tree))))
}

/// `merge(a, b, ...)`; absent arguments are skipped.
async fn merge(invocation: Invocation) -> TreeResult<Option<Value>> {
    let trees = try_join_all(invocation.args.into_iter().flatten().map(|value| to_tree(Some(value)))).await?;
    Ok(Some(Value::Tree(MergeTree::new(trees))))
}

/// `subtract(original, remove)`
async fn subtract(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let original = to_tree(invocation.take(0)).await?;
    let remove = to_tree(invocation.take(1)).await?;
    Ok(Some(Value::Tree(SubtractTree::new(original, remove))))
}

async fn globs(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    Ok(Some(Value::Tree(GlobTree::new(tree))))
}

async fn keys(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    let keys = tree.keys().await?;
    let record = Record::sequence(keys.into_iter().map(Value::String));
    Ok(Some(Value::Tree(ObjectTree::new(record))))
}

async fn values(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    let values = ops::values(&tree).await?;
    let record = Record::sequence(values.into_iter().map(|value| value.unwrap_or(Value::Null)));
    Ok(Some(Value::Tree(ObjectTree::new(record))))
}

/// `concat(a, b, ...)`: the arguments stringified and joined.
async fn concat(invocation: Invocation) -> TreeResult<Option<Value>> {
    let texts = try_join_all(invocation.args.into_iter().map(stringify)).await?;
    Ok(Some(Value::String(texts.concat())))
}

/// `match("[name].html", fn, keys?)`
async fn match_keys(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let pattern = required(&mut invocation, 0, "match", "pattern")?;
    let Some(pattern) = pattern.to_text() else {
        return Err(TreeError::Eval(format!("match: expected a pattern, got {}", pattern.type_name())));
    };
    let function = to_function(required(&mut invocation, 1, "match", "function")?);
    let keys = match invocation.take(2) {
        Some(keys) => Some(to_tree(Some(keys)).await?),
        None => None,
    };
    let scope = invocation.this.clone().unwrap_or_else(builtins);
    Ok(Some(Value::Tree(MatchTree::new(&pattern, function, keys, scope)?)))
}

/// `inline(text)`: the text rendered as a template in the calling scope.
/// Front matter is data for the spans and is dropped from the output.
async fn inline(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let text = match invocation.take(0) {
        Some(value) => value.resolve(None).await?,
        None => None,
    };
    let Some(text) = text else {
        return Ok(None);
    };
    let Some(text) = text.to_text() else {
        return Err(TreeError::Eval(format!("inline: expected text, got {}", text.type_name())));
    };
    let template = Template::compile(&text)?;
    let rendered = template.apply(None, invocation.this.clone()).await?;
    Ok(Some(Value::String(rendered.text)))
}

/// `nulls(tree)`: the same shape with every terminal value null.
async fn nulls(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    Ok(Some(Value::Tree(MapTree::new(tree, null_values(), None))))
}

fn null_values() -> Function {
    Function::new("nulls", |invocation: Invocation| async move {
        Ok(Some(match invocation.arg(0) {
            Some(Value::Tree(subtree)) => Value::Tree(MapTree::new(subtree.clone(), null_values(), None)),
            _ => Value::Null,
        }))
    })
}

async fn shuffle(mut invocation: Invocation) -> TreeResult<Option<Value>> {
    let tree = to_tree(invocation.take(0)).await?;
    Ok(Some(Value::Tree(ShuffleTree::new(tree))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::evaluate;
    use crate::parser::parse_expression;
    use crate::scope::Scope;
    use rstest::rstest;

    async fn eval(source: &str, json: serde_json::Value) -> Option<Value> {
        let data: TreeRef = ObjectTree::from_json(&json);
        let scope = Scope::prepend(vec![data], builtins());
        evaluate(&parse_expression(source).unwrap(), scope).await.unwrap()
    }

    async fn eval_plain(source: &str, json: serde_json::Value) -> serde_json::Value {
        match eval(source, json).await {
            Some(Value::Tree(tree)) => ops::plain(tree).await.unwrap(),
            other => panic!("expected a tree, got {other:?}"),
        }
    }

    #[rstest]
    #[case("keys(data)", serde_json::json!(["a", "b", "sub/"]))]
    #[case("values(list)", serde_json::json!(["x", "y"]))]
    #[case("reverse(list)", serde_json::json!({"1": "y", "0": "x"}))]
    #[tokio::test]
    async fn test_tree_builtins(#[case] source: &str, #[case] expected: serde_json::Value) {
        let json = serde_json::json!({
            "data": {"a": 1, "b": 2, "sub": {}},
            "list": ["x", "y"],
        });
        assert_eq!(eval_plain(source, json).await, expected);
    }

    #[tokio::test]
    async fn test_concat() {
        let value = eval("concat('a', n, list)", serde_json::json!({"n": 1, "list": ["x", "y"]})).await;
        assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("a1xy"));
    }

    #[tokio::test]
    async fn test_map_with_lambda() {
        let json = serde_json::json!({"people": {"a": {"name": "Ann"}, "b": {"name": "Bo"}}});
        assert_eq!(
            eval_plain("map(people, =`Hi {{ name }}`)", json).await,
            serde_json::json!({"a": "Hi Ann", "b": "Hi Bo"})
        );
    }

    #[tokio::test]
    async fn test_map_requires_function() {
        let data: TreeRef = ObjectTree::from_json(&serde_json::json!({"t": {}}));
        let scope = Scope::prepend(vec![data], builtins());
        let err = evaluate(&parse_expression("map(t)").unwrap(), scope).await.unwrap_err();
        assert!(err.to_string().contains("map: missing function"));
    }

    #[tokio::test]
    async fn test_match_lists_and_answers_keys() {
        let source = "match('[name].html', =`Hello, {{ name }}!`, ['Alice.html', 'Bob.html', 'Carol.html'])";
        let Some(Value::Tree(tree)) = eval(source, serde_json::json!({})).await else {
            panic!("match should return a tree");
        };
        let unlisted = tree.get(&"David.html".into()).await.unwrap();
        assert_eq!(unlisted.and_then(|v| v.to_text()).as_deref(), Some("Hello, David!"));
        assert!(tree.get(&"David.txt".into()).await.unwrap().is_none());
        assert_eq!(
            ops::plain(tree).await.unwrap(),
            serde_json::json!({
                "Alice.html": "Hello, Alice!",
                "Bob.html": "Hello, Bob!",
                "Carol.html": "Hello, Carol!",
            })
        );
    }

    #[tokio::test]
    async fn test_match_sees_calling_scope() {
        let value = eval("match('[n].txt', =`{{ greeting }} {{ n }}`)", serde_json::json!({"greeting": "hi"})).await;
        let Some(Value::Tree(tree)) = value else {
            panic!("match should return a tree");
        };
        let value = tree.get(&"you.txt".into()).await.unwrap();
        assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("hi you"));
    }

    #[rstest]
    #[case::scope_names("Hello, {{name}}!", "Hello, Alice!")]
    #[case::front_matter("---\nname: Bob\n---\nHello, {{ name }}!", "Hello, Bob!")]
    #[case::plain_text("no spans", "no spans")]
    #[tokio::test]
    async fn test_inline(#[case] text: &str, #[case] expected: &str) {
        let value = eval("inline(text)", serde_json::json!({"text": text, "name": "Alice"})).await;
        assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some(expected));
    }

    #[tokio::test]
    async fn test_nulls_keep_shape() {
        let json = serde_json::json!({"data": {"a": 1, "sub": {"b": "x"}, "list": [1, 2]}});
        assert_eq!(
            eval_plain("nulls(data)", json).await,
            serde_json::json!({"a": null, "sub": {"b": null}, "list": [null, null]})
        );
    }

    #[tokio::test]
    async fn test_shuffle_keeps_entries() {
        let json = serde_json::json!({"data": {"a": 1, "b": 2, "c": 3, "d": 4}});
        let Some(Value::Tree(tree)) = eval("shuffle(data)", json).await else {
            panic!("shuffle should return a tree");
        };
        let mut keys = tree.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, ["a", "b", "c", "d"]);
        assert!(matches!(tree.get(&"c".into()).await.unwrap(), Some(Value::Int(3))));
    }

    #[tokio::test]
    async fn test_builtin_names() {
        let names = builtins().keys().await.unwrap();
        assert!(names.contains(&"globs".to_string()));
        assert!(builtins().get(&"nope".into()).await.unwrap().is_none());
    }
}
