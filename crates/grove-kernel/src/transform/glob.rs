//! Wildcard keys.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use grove_types::{Key, remove_trailing_slash};
use regex::Regex;

use crate::error::{TreeError, TreeResult};
use crate::tree::{ObjectTree, ParentCell, Record, Tree, TreeRef, adopt};
use crate::transform::MergeTree;
use crate::value::Value;

const KIND: &str = "GlobTree";

/// The globstar key: its subtree applies at every depth.
const GLOBSTAR: &str = "**";

/// A tree whose keys are wildcard patterns.
///
/// `*` matches one or more characters and `?` exactly one. `get(key)`
/// returns the value of the first pattern, in key order, that matches
/// `key`. A `**` subtree supplies patterns for this level and every level
/// below it.
pub struct GlobTree {
    globs: TreeRef,
    this: Weak<GlobTree>,
    parent: ParentCell,
}

impl GlobTree {
    pub fn new(globs: TreeRef) -> Arc<Self> {
        Arc::new_cyclic(|this| GlobTree {
            globs,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }

    async fn first_match(&self, name: &str) -> TreeResult<Option<Value>> {
        for glob in self.globs.keys().await? {
            let pattern = remove_trailing_slash(&glob);
            if pattern == GLOBSTAR || !glob_regex(pattern)?.is_match(name) {
                continue;
            }
            if let Some(value) = self.globs.get(&Key::from(glob.as_str())).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Tree for GlobTree {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };
        let name = remove_trailing_slash(name);
        let mut value = self.first_match(name).await?;

        if let Some(Value::Tree(globstar)) = self.globs.get(&Key::from(GLOBSTAR)).await? {
            let deeper: TreeRef = ObjectTree::new(Record::new().field(GLOBSTAR, Value::Tree(globstar.clone())));
            value = match value {
                None => match GlobTree::new(globstar).get(&Key::from(name)).await? {
                    Some(found) => Some(found),
                    None => Some(Value::Tree(deeper)),
                },
                Some(Value::Tree(tree)) => Some(Value::Tree(MergeTree::new(vec![tree, deeper]))),
                other => other,
            };
        }

        let value = match value {
            Some(Value::Tree(tree)) => Value::Tree(GlobTree::new(tree)),
            Some(other) => other,
            None => return Ok(None),
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        self.globs.keys().await
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

/// Anchored regex for a glob pattern.
fn glob_regex(pattern: &str) -> TreeResult<Regex> {
    let mut source = String::from("^");
    let mut literal = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".+"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| TreeError::Eval(format!("invalid glob {pattern:?}: {e}")))
}
