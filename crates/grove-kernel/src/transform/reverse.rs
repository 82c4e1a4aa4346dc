//! Key order reversal.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use grove_types::Key;

use crate::error::TreeResult;
use crate::tree::{ParentCell, Tree, TreeRef, adopt};
use crate::value::Value;

const KIND: &str = "ReverseTree";

/// The inner tree with its keys in reverse order, at every level.
pub struct ReverseTree {
    inner: TreeRef,
    this: Weak<ReverseTree>,
    parent: ParentCell,
}

impl ReverseTree {
    pub fn new(inner: TreeRef) -> Arc<Self> {
        Arc::new_cyclic(|this| ReverseTree {
            inner,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }
}

#[async_trait]
impl Tree for ReverseTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let value = match self.inner.get(key).await? {
            Some(Value::Tree(subtree)) => Value::Tree(ReverseTree::new(subtree)),
            Some(other) => other,
            None => return Ok(None),
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let mut keys = self.inner.keys().await?;
        keys.reverse();
        Ok(keys)
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        self.inner.is_key_for_subtree(key).await
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
