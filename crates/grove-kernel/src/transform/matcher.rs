//! Keys matched against a bracketed pattern.

use std::sync::{Arc, LazyLock, Weak};

use async_trait::async_trait;
use grove_types::Key;
use regex::Regex;

use crate::error::{TreeError, TreeResult};
use crate::ops;
use crate::scope::Scope;
use crate::tree::{ObjectTree, ParentCell, Tree, TreeRef, adopt};
use crate::value::{Function, Value};

const KIND: &str = "MatchTree";

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z_][A-Za-z0-9_]*)\]"));

/// A tree that answers any key matching a pattern such as `[name].html`.
///
/// Each placeholder binds the text it matched; the function is called with
/// those bindings (and `@key`) in front of the scope the tree was made in.
/// Keys are whatever `keys` lists, or none.
pub struct MatchTree {
    source: String,
    pattern: Regex,
    function: Function,
    keys: Option<TreeRef>,
    scope: TreeRef,
    this: Weak<MatchTree>,
    parent: ParentCell,
}

impl MatchTree {
    pub fn new(pattern: &str, function: Function, keys: Option<TreeRef>, scope: TreeRef) -> TreeResult<Arc<Self>> {
        let compiled = compile_pattern(pattern)?;
        Ok(Arc::new_cyclic(|this| MatchTree {
            source: pattern.to_string(),
            pattern: compiled,
            function,
            keys,
            scope,
            this: this.clone(),
            parent: ParentCell::default(),
        }))
    }

    /// Placeholder bindings for `key`, in pattern order, if it matches.
    pub fn bindings(&self, key: &str) -> Option<Vec<(String, String)>> {
        let captures = self.pattern.captures(key)?;
        Some(
            self.pattern
                .capture_names()
                .flatten()
                .filter_map(|name| captures.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect(),
        )
    }
}

/// Translate `[year]-[slug].md` into an anchored regex with one named group
/// per placeholder. Text outside brackets matches literally.
pub fn compile_pattern(pattern: &str) -> TreeResult<Regex> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|e| TreeError::Eval(format!("placeholder pattern: {e}")))?;
    let mut source = String::from("^");
    let mut last = 0;
    for captures in placeholder.captures_iter(pattern) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        source.push_str(&regex::escape(&pattern[last..whole.start()]));
        source.push_str(&format!("(?P<{}>.+?)", name.as_str()));
        last = whole.end();
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');
    Regex::new(&source).map_err(|e| TreeError::Eval(format!("match: invalid pattern {pattern:?}: {e}")))
}

#[async_trait]
impl Tree for MatchTree {
    #[tracing::instrument(level = "trace", skip(self), fields(pattern = %self.source))]
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };
        let Some(bindings) = self.bindings(name) else {
            return Ok(None);
        };

        let mut ambient: Vec<(String, Option<Value>)> = bindings
            .into_iter()
            .map(|(name, text)| (name, Some(Value::String(text))))
            .collect();
        ambient.push(("@key".to_string(), Some(Value::String(name.to_string()))));
        let bound: TreeRef = ObjectTree::ambient(ambient);
        let this = Scope::prepend(vec![bound.clone()], self.scope.clone());

        let args = vec![Some(Value::Tree(bound)), Some(Value::String(name.to_string()))];
        let result = self.function.call(args, Some(this)).await?;
        if let Some(value) = &result {
            adopt(value, self.this.clone());
        }
        Ok(result)
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let Some(keys) = &self.keys else {
            return Ok(Vec::new());
        };
        let values = ops::values(keys).await?;
        Ok(values.into_iter().flatten().filter_map(|value| value.to_text()).collect())
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
