//! Union of several trees.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::try_join_all;
use grove_types::{Key, union_keys};

use crate::error::TreeResult;
use crate::tree::{ParentCell, Tree, TreeRef, adopt};
use crate::value::Value;

const KIND: &str = "MergeTree";

/// The union of several trees' keys.
///
/// `get` answers with the first tree that has a value. When that value is a
/// subtree, every source's subtree under the key is merged in the same way.
pub struct MergeTree {
    trees: Vec<TreeRef>,
    this: Weak<MergeTree>,
    parent: ParentCell,
}

impl MergeTree {
    pub fn new(trees: Vec<TreeRef>) -> Arc<Self> {
        Arc::new_cyclic(|this| MergeTree {
            trees,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }
}

#[async_trait]
impl Tree for MergeTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let values = try_join_all(self.trees.iter().map(|tree| tree.get(key))).await?;
        let mut values = values.into_iter().flatten();
        let Some(first) = values.next() else {
            return Ok(None);
        };

        let value = match first {
            Value::Tree(first) => {
                let mut subtrees = vec![first];
                subtrees.extend(values.filter_map(|value| match value {
                    Value::Tree(tree) => Some(tree),
                    _ => None,
                }));
                if subtrees.len() == 1 {
                    Value::Tree(subtrees.remove(0))
                } else {
                    Value::Tree(MergeTree::new(subtrees))
                }
            }
            other => other,
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let all = try_join_all(self.trees.iter().map(|tree| tree.keys())).await?;
        Ok(union_keys(all))
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        for tree in &self.trees {
            if tree.is_key_for_subtree(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
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
