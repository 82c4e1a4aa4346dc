//! Value mapping, with optional extension rewriting.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use grove_types::{Key, has_trailing_slash};

use crate::error::{TreeError, TreeResult};
use crate::scope::Scope;
use crate::tree::{ObjectTree, ParentCell, Tree, TreeRef, adopt};
use crate::value::{Function, Value};

const KIND: &str = "MapTree";

/// A tree whose values are the inner tree's values passed through a
/// function.
///
/// With extensions `(".md", ".html")`, a key `post.md` of the inner tree
/// appears as `post.html`, mapped; keys without `.md` pass through as they
/// are, unmapped.
pub struct MapTree {
    inner: TreeRef,
    function: Function,
    extensions: Option<(String, String)>,
    this: Weak<MapTree>,
    parent: ParentCell,
}

impl MapTree {
    pub fn new(inner: TreeRef, function: Function, extensions: Option<(String, String)>) -> Arc<Self> {
        Arc::new_cyclic(|this| MapTree {
            inner,
            function,
            extensions,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }

    /// The outer key for an inner key.
    fn outer_key(&self, inner_key: &str) -> String {
        match &self.extensions {
            Some((source, target)) if !has_trailing_slash(inner_key) => match inner_key.strip_suffix(source.as_str()) {
                Some(stem) => format!("{stem}{target}"),
                None => inner_key.to_string(),
            },
            _ => inner_key.to_string(),
        }
    }

    /// The inner key for an outer key, and whether its value is mapped.
    fn inner_key(&self, key: &str) -> Option<(String, bool)> {
        let Some((source, target)) = &self.extensions else {
            return Some((key.to_string(), true));
        };
        if has_trailing_slash(key) {
            return Some((key.to_string(), false));
        }
        if let Some(stem) = key.strip_suffix(target.as_str()) {
            return Some((format!("{stem}{source}"), true));
        }
        if key.ends_with(source.as_str()) {
            // Renamed to the target extension.
            return None;
        }
        Some((key.to_string(), false))
    }

    async fn apply(&self, value: Value, inner_key: &str) -> TreeResult<Option<Value>> {
        let mut ambients: Vec<TreeRef> = vec![ObjectTree::ambient([
            ("@key", Some(Value::String(inner_key.to_string()))),
            ("@value", Some(value.clone())),
            (".", Some(value.clone())),
        ])];
        if let Value::Tree(tree) = &value {
            ambients.push(tree.clone());
        }
        let this = Scope::prepend(ambients, Scope::of(&self.inner));
        let args = vec![Some(value), Some(Value::String(inner_key.to_string()))];
        self.function.call(args, Some(this)).await
    }
}

#[async_trait]
impl Tree for MapTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };
        let Some((inner_key, mapped)) = self.inner_key(name) else {
            return Ok(None);
        };
        let Some(value) = self.inner.get(&Key::from(inner_key.as_str())).await? else {
            return Ok(None);
        };
        let result = if mapped {
            self.apply(value, &inner_key).await?
        } else {
            Some(value)
        };
        if let Some(value) = &result {
            adopt(value, self.this.clone());
        }
        Ok(result)
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let keys = self.inner.keys().await?;
        Ok(keys.iter().map(|key| self.outer_key(key)).collect())
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn parent(&self) -> Option<TreeRef> {
        self.parent.get()
    }

    fn set_parent(&self, parent: Weak<dyn Tree>) {
        self.parent.set(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use crate::value::Invocation;

    fn upper() -> Function {
        Function::new("upper", |inv: Invocation| async move {
            Ok(inv.arg(0).and_then(Value::to_text).map(|s| Value::String(s.to_uppercase())))
        })
    }

    #[tokio::test]
    async fn test_maps_values_and_keeps_keys() {
        let inner: TreeRef = ObjectTree::from_json(&serde_json::json!({"a": "x", "b": "y"}));
        let tree: TreeRef = MapTree::new(inner, upper(), None);
        assert_eq!(ops::plain(tree).await.unwrap(), serde_json::json!({"a": "X", "b": "Y"}));
    }

    #[tokio::test]
    async fn test_extension_rewrite() {
        let inner: TreeRef = ObjectTree::from_json(&serde_json::json!({
            "a.txt": "hello",
            "notes.md": "keep",
        }));
        let extensions = Some((".txt".to_string(), ".upper".to_string()));
        let tree: TreeRef = MapTree::new(inner, upper(), extensions);
        assert_eq!(tree.keys().await.unwrap(), vec!["a.upper", "notes.md"]);
        let mapped = tree.get(&"a.upper".into()).await.unwrap();
        assert_eq!(mapped.and_then(|v| v.to_text()).as_deref(), Some("HELLO"));
        let passed = tree.get(&"notes.md".into()).await.unwrap();
        assert_eq!(passed.and_then(|v| v.to_text()).as_deref(), Some("keep"));
        assert!(tree.get(&"a.txt".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_function_sees_key_ambient() {
        let key_of = Function::new("key", |inv: Invocation| async move {
            match inv.this {
                Some(this) => this.get(&"@key".into()).await,
                None => Ok(None),
            }
        });
        let inner: TreeRef = ObjectTree::from_json(&serde_json::json!({"a": 1}));
        let tree: TreeRef = MapTree::new(inner, key_of, None);
        let value = tree.get(&"a".into()).await.unwrap();
        assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("a"));
    }
}
