//! Scope chains for name resolution.
//!
//! A [`Scope`] is an ordered list of trees consulted front to back. Nested
//! contexts prepend ambient trees (current key, current value, template
//! input) to an existing chain, producing a new scope; the existing chain is
//! never modified. Scopes are built per evaluation and dropped with it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use grove_types::{Key, remove_trailing_slash, union_keys};

use crate::error::{TreeError, TreeResult};
use crate::interpreter;
use crate::tree::{Tree, TreeRef};
use crate::value::Value;

/// An ordered composite of trees. The first link with a value wins.
pub struct Scope {
    links: Vec<TreeRef>,
}

impl Scope {
    pub fn new(links: Vec<TreeRef>) -> Arc<Self> {
        Arc::new(Self { links })
    }

    /// The scope seen from inside `tree`: the tree itself, its ancestors
    /// nearest first, then the builtins.
    pub fn of(tree: &TreeRef) -> TreeRef {
        let mut links = vec![tree.clone()];
        let mut seen = HashSet::new();
        seen.insert(Arc::as_ptr(tree) as *const () as usize);
        let mut current = tree.parent();
        while let Some(parent) = current {
            if !seen.insert(Arc::as_ptr(&parent) as *const () as usize) {
                tracing::warn!(kind = parent.kind(), "parent cycle while building scope");
                break;
            }
            current = parent.parent();
            links.push(parent);
        }
        links.push(interpreter::builtins());
        Scope::new(links)
    }

    /// A scope with `ambients` in front of `base`.
    pub fn prepend(ambients: Vec<TreeRef>, base: TreeRef) -> TreeRef {
        let mut links = ambients;
        links.push(base);
        Scope::new(links)
    }

    pub fn links(&self) -> &[TreeRef] {
        &self.links
    }
}

#[async_trait]
impl Tree for Scope {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        if key.name().is_none() {
            return Err(TreeError::NullKey { tree: "Scope" });
        }
        for link in &self.links {
            if let Some(value) = link.get(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let mut lists = Vec::with_capacity(self.links.len());
        for link in &self.links {
            lists.push(link.keys().await?);
        }
        Ok(union_keys(lists))
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        for link in &self.links {
            let bare = remove_trailing_slash(key);
            if link.keys().await?.iter().any(|k| remove_trailing_slash(k) == bare) {
                return link.is_key_for_subtree(key).await;
            }
        }
        Ok(false)
    }

    fn kind(&self) -> &'static str {
        "Scope"
    }
}
