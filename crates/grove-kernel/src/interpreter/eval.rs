//! Expression evaluation.
//!
//! The evaluator takes compiled code and reduces it to a value. Names are
//! resolved through the scope tree, calls apply functions or traverse trees,
//! and template literals stringify their parts.

use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use grove_types::Key;

use crate::ast::Code;
use crate::error::{TreeError, TreeResult};
use crate::ops;
use crate::scope::Scope;
use crate::tree::{ObjectTree, Record, TreeRef};
use crate::value::{Function, Invocation, Thunk, Value};

/// Evaluate `code` with `scope` as the execution context.
pub fn evaluate<'a>(code: &'a Code, scope: TreeRef) -> BoxFuture<'a, TreeResult<Option<Value>>> {
    Box::pin(async move {
        match code {
            Code::Scope(name) => scope.get(&Key::from(name.as_str())).await,
            Code::Literal(literal) => Ok(Some(literal.to_value())),
            Code::Getter(inner) => Ok(Some(Value::Lazy(Thunk::new(inner.clone(), Some(scope))))),
            Code::Concat(parts) => {
                let texts = try_join_all(parts.iter().map(|part| {
                    let scope = scope.clone();
                    async move { stringify(evaluate(part, scope).await?).await }
                }))
                .await?;
                Ok(Some(Value::String(texts.concat())))
            }
            Code::Call { callee, args } => eval_call(callee, args, scope).await,
            Code::Pipeline(steps) => eval_pipeline(steps, scope).await,
            Code::Lambda(body) => Ok(Some(Value::Function(lambda(body.clone(), scope)))),
            Code::Variable { name, suffix } => {
                let bound = scope.get(&Key::from(name.as_str())).await?;
                let mut key = stringify(bound).await?;
                if let Some(suffix) = suffix {
                    key.push_str(suffix);
                }
                scope.get(&Key::from(key)).await
            }
            Code::Object(entries) => eval_object(entries, scope).await,
            Code::Array(items) => {
                let values = eval_all(items, &scope).await?;
                let record = Record::sequence(values.into_iter().map(|value| value.unwrap_or(Value::Null)));
                Ok(Some(Value::Tree(ObjectTree::new(record))))
            }
        }
    })
}

/// Apply `callee` to `args`.
///
/// Functions are called with `this` as their scope. Getters are forced and
/// packed values unpacked first. A tree is traversed with the arguments as
/// keys. Any other value called with no arguments is itself.
pub fn invoke(callee: Value, args: Vec<Option<Value>>, this: TreeRef) -> BoxFuture<'static, TreeResult<Option<Value>>> {
    Box::pin(async move {
        match callee {
            Value::Function(function) => function.call(args, Some(this)).await,
            Value::Lazy(thunk) => match thunk.force(Some(this.clone())).await? {
                Some(value) => invoke(value, args, this).await,
                None => Ok(None),
            },
            Value::Packed(packed) => {
                let unpacked = packed.unpack().await?;
                invoke(unpacked, args, this).await
            }
            Value::Tree(tree) => {
                let mut keys = Vec::with_capacity(args.len());
                for arg in args {
                    match arg.and_then(|value| value.to_text()) {
                        Some(key) => keys.push(key),
                        None => return Ok(None),
                    }
                }
                ops::traverse(&tree, &keys).await
            }
            other if args.is_empty() => Ok(Some(other)),
            other => Err(TreeError::Eval(format!(
                "cannot call a {} value with {} argument(s)",
                other.type_name(),
                args.len()
            ))),
        }
    })
}

/// Text for a value, as used by template literals and `concat`.
///
/// Trees contribute their values in key order, deeply. Functions are called
/// without arguments. An absent or null value is the empty string.
pub fn stringify(value: Option<Value>) -> BoxFuture<'static, TreeResult<String>> {
    Box::pin(async move {
        let Some(value) = value else {
            return Ok(String::new());
        };
        let Some(value) = value.resolve(None).await? else {
            return Ok(String::new());
        };
        match value {
            Value::Tree(tree) => {
                let values = ops::values(&tree).await?;
                let texts = try_join_all(values.into_iter().map(stringify)).await?;
                Ok(texts.concat())
            }
            Value::Function(function) => stringify(function.call(Vec::new(), None).await?).await,
            other => Ok(other.to_text().unwrap_or_default()),
        }
    })
}

async fn eval_call(callee: &Code, args: &[Code], scope: TreeRef) -> TreeResult<Option<Value>> {
    let Some(function) = evaluate(callee, scope.clone()).await? else {
        tracing::trace!(%callee, "callee is absent");
        return Ok(None);
    };
    let args = eval_all(args, &scope).await?;
    invoke(function, args, scope).await
}

async fn eval_pipeline(steps: &[Code], scope: TreeRef) -> TreeResult<Option<Value>> {
    let Some((first, rest)) = steps.split_first() else {
        return Ok(None);
    };
    let mut value = evaluate(first, scope.clone()).await?;
    for step in rest {
        let Some(function) = evaluate(step, scope.clone()).await? else {
            return Ok(None);
        };
        value = invoke(function, vec![value], scope.clone()).await?;
    }
    Ok(value)
}

async fn eval_object(entries: &[(String, Code)], scope: TreeRef) -> TreeResult<Option<Value>> {
    let mut record = Record::new();
    let immediate: Vec<&(String, Code)> = entries
        .iter()
        .filter(|(_, code)| !matches!(code, Code::Getter(_)))
        .collect();
    let values = try_join_all(immediate.iter().map(|(_, code)| evaluate(code, scope.clone()))).await?;
    let mut values = immediate.iter().map(|(key, _)| key).zip(values);

    for (key, code) in entries {
        match code {
            // Getters run later, with the new tree in front of this scope.
            Code::Getter(inner) => record.insert(key.clone(), Value::Lazy(Thunk::new(inner.clone(), None))),
            _ => {
                if let Some((_, Some(value))) = values.next() {
                    record.insert(key.clone(), value);
                }
            }
        }
    }
    Ok(Some(Value::Tree(ObjectTree::with_scope(record, scope))))
}

/// Evaluate arguments independently; all complete before any is used.
async fn eval_all(codes: &[Code], scope: &TreeRef) -> TreeResult<Vec<Option<Value>>> {
    try_join_all(codes.iter().map(|code| evaluate(code, scope.clone()))).await
}

/// A function of `.`/`@value` (first argument) and `@key` (second).
///
/// When the first argument is a tree its keys are in scope too.
fn lambda(body: Arc<Code>, scope: TreeRef) -> Function {
    let name = format!("={body}");
    Function::new(name, move |mut invocation: Invocation| {
        let body = body.clone();
        let scope = scope.clone();
        let value = invocation.take(0);
        let key = invocation.take(1);
        async move {
            let mut ambients: Vec<TreeRef> = vec![ObjectTree::ambient([
                (".", value.clone()),
                ("@value", value.clone()),
                ("@key", key),
            ])];
            if let Some(Value::Tree(tree)) = value {
                ambients.push(tree);
            }
            evaluate(&body, Scope::prepend(ambients, scope)).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builtins;
    use crate::parser::parse_expression;

    fn scope(json: serde_json::Value) -> TreeRef {
        let data: TreeRef = ObjectTree::from_json(&json);
        Scope::prepend(vec![data], builtins())
    }

    async fn eval_text(source: &str, scope: TreeRef) -> Option<String> {
        let code = parse_expression(source).unwrap();
        evaluate(&code, scope).await.unwrap().and_then(|v| v.to_text())
    }

    #[tokio::test]
    async fn test_literal_and_lookup() {
        let scope = scope(serde_json::json!({"name": "Bob"}));
        assert_eq!(eval_text("'hi'", scope.clone()).await.as_deref(), Some("hi"));
        assert_eq!(eval_text("name", scope.clone()).await.as_deref(), Some("Bob"));
        assert_eq!(eval_text("42", scope).await.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_missing_name_is_absent() {
        let scope = scope(serde_json::json!({}));
        let code = parse_expression("nope(1, 2)").unwrap();
        assert!(evaluate(&code, scope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traverses() {
        let scope = scope(serde_json::json!({"a": {"b": {"c": "deep"}}}));
        assert_eq!(eval_text("a/b/c", scope).await.as_deref(), Some("deep"));
    }

    #[tokio::test]
    async fn test_template_literal_stringifies() {
        let scope = scope(serde_json::json!({"name": "Bob", "n": 3, "list": ["x", "y"]}));
        assert_eq!(
            eval_text("`{{ name }} has {{ n }}: {{ list }}`", scope).await.as_deref(),
            Some("Bob has 3: xy")
        );
    }

    #[tokio::test]
    async fn test_lambda_binds_value_and_key() {
        let scope = scope(serde_json::json!({}));
        let code = parse_expression("=`{{ @key }}:{{ . }}`").unwrap();
        let Some(Value::Function(f)) = evaluate(&code, scope).await.unwrap() else {
            panic!("expected a function");
        };
        let result = f.call(vec![Some(Value::from("v")), Some(Value::from("k"))], None).await.unwrap();
        assert_eq!(result.and_then(|v| v.to_text()).as_deref(), Some("k:v"));
    }

    #[tokio::test]
    async fn test_pipeline_feeds_each_step() {
        let scope = scope(serde_json::json!({"name": "Bob"}));
        assert_eq!(
            eval_text("name -> =`<{{ . }}>` -> =`[{{ . }}]`", scope).await.as_deref(),
            Some("[<Bob>]")
        );
    }

    #[tokio::test]
    async fn test_variable_pattern_looks_up_suffixed_key() {
        let scope = scope(serde_json::json!({"slug": "post1", "post1.md": "body"}));
        assert_eq!(eval_text("{slug}.md", scope).await.as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_object_getter_sees_siblings_and_outer_scope() {
        let scope = scope(serde_json::json!({"greeting": "Hello"}));
        let code = parse_expression("{ name: 'Bob', line = `{{ greeting }}, {{ name }}` }").unwrap();
        let Some(Value::Tree(tree)) = evaluate(&code, scope).await.unwrap() else {
            panic!("expected a tree");
        };
        let line = tree.get(&"line".into()).await.unwrap();
        assert_eq!(line.and_then(|v| v.to_text()).as_deref(), Some("Hello, Bob"));
    }

    #[tokio::test]
    async fn test_array_literal() {
        let scope = scope(serde_json::json!({"a": 1}));
        let code = parse_expression("[a, 'two']").unwrap();
        let Some(Value::Tree(tree)) = evaluate(&code, scope).await.unwrap() else {
            panic!("expected a tree");
        };
        assert_eq!(ops::plain(tree).await.unwrap(), serde_json::json!([1, "two"]));
    }

    #[tokio::test]
    async fn test_calling_a_string_with_args_fails() {
        let scope = scope(serde_json::json!({"name": "Bob"}));
        let code = parse_expression("name(1)").unwrap();
        let err = evaluate(&code, scope).await.unwrap_err();
        assert!(matches!(err, TreeError::Eval(_)));
    }
}
